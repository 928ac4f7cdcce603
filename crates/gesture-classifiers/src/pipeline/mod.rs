//! The gesture-recognition pipeline: pre-processing, feature extraction, one
//! classifier or regressor, and post-processing, trained and run as a unit.
//!
//! Training pushes the whole dataset through the stages one stage at a
//! time. Feature-extraction stages that learn from data are fitted on the
//! output of the stage before them, and samples for which a buffered stage
//! produced no output are dropped with a warning. The trained pipeline
//! records the raw input dimensionality and rejects inputs of any other
//! size.
use std::time::Instant;

use anyhow::{Context, Result};

use crate::config::PipelineConfig;
use crate::data::{ClassificationData, RegressionData, TimeSeriesClassificationData, NULL_CLASS_LABEL};
use crate::error::GestureError;
use crate::factory;
use crate::feature_extraction::FeatureExtraction;
use crate::math::Array2;
use crate::models::Classifier;
use crate::postprocessing::PostProcessing;
use crate::preprocessing::PreProcessing;
use crate::regression::Regressor;

pub mod metrics;
mod persistence;

pub use metrics::{ClassificationResult, RegressionMetrics, TestMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No classifier or regressor attached.
    Uninitialized,
    Initialized,
    Trained,
}

/// Rows of one sample on their way through the stages; `index` points back
/// into the source dataset.
struct Working {
    index: usize,
    rows: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct GestureRecognitionPipeline {
    pre_processing: Vec<Box<dyn PreProcessing>>,
    feature_extraction: Vec<Box<dyn FeatureExtraction>>,
    classifier: Option<Box<dyn Classifier>>,
    regressor: Option<Box<dyn Regressor>>,
    post_processing: Vec<Box<dyn PostProcessing>>,
    input_vector_dimensions: usize,
    trained: bool,
    predicted_class_label: u32,
    unprocessed_predicted_class_label: u32,
    pre_processed_data: Vec<f64>,
    feature_extraction_data: Vec<f64>,
    regression_data: Vec<f64>,
    test_metrics: Option<TestMetrics>,
    regression_metrics: Option<RegressionMetrics>,
    cross_validation_accuracy: Option<f64>,
    cross_validation_rms_error: Option<f64>,
    training_time_ms: f64,
    last_error: Option<String>,
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn not_trained() -> anyhow::Error {
    GestureError::Precondition("pipeline has not been trained".to_string()).into()
}

impl GestureRecognitionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an untrained pipeline from a configuration.
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        if config.classifier.is_some() && config.regressor.is_some() {
            return Err(GestureError::Configuration(
                "a pipeline holds either a classifier or a regressor, not both".to_string(),
            )
            .into());
        }
        let mut pipeline = Self::new();
        pipeline.pre_processing = factory::build_all(&config.pre_processing, "pre-processing", factory::build_pre_processing)?;
        pipeline.feature_extraction =
            factory::build_all(&config.feature_extraction, "feature extraction", factory::build_feature_extraction)?;
        pipeline.post_processing =
            factory::build_all(&config.post_processing, "post-processing", factory::build_post_processing)?;
        if let Some(c) = &config.classifier {
            pipeline.classifier = Some(factory::build_classifier(c).context("Invalid classifier")?);
        }
        if let Some(r) = &config.regressor {
            pipeline.regressor = Some(factory::build_regressor(r).context("Invalid regressor")?);
        }
        Ok(pipeline)
    }

    // ---------------------------------------------------------------------
    // Composition

    pub fn state(&self) -> PipelineState {
        if self.classifier.is_none() && self.regressor.is_none() {
            PipelineState::Uninitialized
        } else if self.trained {
            PipelineState::Trained
        } else {
            PipelineState::Initialized
        }
    }

    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub fn is_classification_mode(&self) -> bool {
        self.classifier.is_some()
    }

    pub fn is_regression_mode(&self) -> bool {
        self.regressor.is_some()
    }

    /// Inserts `stage` at `index`, or appends it when `index` is `None`.
    pub fn add_pre_processing(&mut self, stage: Box<dyn PreProcessing>, index: Option<usize>) -> Result<()> {
        let at = insert_position(index, self.pre_processing.len())?;
        self.pre_processing.insert(at, stage);
        self.trained = false;
        Ok(())
    }

    pub fn remove_pre_processing(&mut self, index: usize) -> Result<()> {
        check_index(index, self.pre_processing.len(), "pre-processing")?;
        self.pre_processing.remove(index);
        self.trained = false;
        Ok(())
    }

    pub fn remove_all_pre_processing(&mut self) {
        self.pre_processing.clear();
        self.trained = false;
    }

    pub fn add_feature_extraction(&mut self, stage: Box<dyn FeatureExtraction>, index: Option<usize>) -> Result<()> {
        let at = insert_position(index, self.feature_extraction.len())?;
        self.feature_extraction.insert(at, stage);
        self.trained = false;
        Ok(())
    }

    pub fn remove_feature_extraction(&mut self, index: usize) -> Result<()> {
        check_index(index, self.feature_extraction.len(), "feature extraction")?;
        self.feature_extraction.remove(index);
        self.trained = false;
        Ok(())
    }

    pub fn remove_all_feature_extraction(&mut self) {
        self.feature_extraction.clear();
        self.trained = false;
    }

    pub fn add_post_processing(&mut self, stage: Box<dyn PostProcessing>, index: Option<usize>) -> Result<()> {
        let at = insert_position(index, self.post_processing.len())?;
        self.post_processing.insert(at, stage);
        self.trained = false;
        Ok(())
    }

    pub fn remove_post_processing(&mut self, index: usize) -> Result<()> {
        check_index(index, self.post_processing.len(), "post-processing")?;
        self.post_processing.remove(index);
        self.trained = false;
        Ok(())
    }

    pub fn remove_all_post_processing(&mut self) {
        self.post_processing.clear();
        self.trained = false;
    }

    /// Attaches a classifier, detaching any regressor.
    pub fn set_classifier(&mut self, classifier: Box<dyn Classifier>) {
        self.classifier = Some(classifier);
        self.regressor = None;
        self.trained = false;
    }

    /// Attaches a regressor, detaching any classifier.
    pub fn set_regressor(&mut self, regressor: Box<dyn Regressor>) {
        self.regressor = Some(regressor);
        self.classifier = None;
        self.trained = false;
    }

    pub fn remove_classifier(&mut self) {
        self.classifier = None;
        self.trained = false;
    }

    pub fn remove_regressor(&mut self) {
        self.regressor = None;
        self.trained = false;
    }

    /// Removes every stage and model and forgets all results.
    pub fn clear_all(&mut self) {
        *self = Self::default();
    }

    /// Clears the internal buffers of every stage and of the model without
    /// forgetting what was trained.
    pub fn reset(&mut self) {
        self.pre_processing.iter_mut().for_each(|s| s.reset());
        self.feature_extraction.iter_mut().for_each(|s| s.reset());
        self.post_processing.iter_mut().for_each(|s| s.reset());
        if let Some(c) = self.classifier.as_mut() {
            c.reset();
        }
        self.predicted_class_label = NULL_CLASS_LABEL;
        self.unprocessed_predicted_class_label = NULL_CLASS_LABEL;
    }

    // ---------------------------------------------------------------------
    // Getters

    pub fn classifier(&self) -> Option<&dyn Classifier> {
        self.classifier.as_deref()
    }

    pub fn classifier_mut(&mut self) -> Option<&mut (dyn Classifier + 'static)> {
        self.classifier.as_deref_mut()
    }

    pub fn regressor(&self) -> Option<&dyn Regressor> {
        self.regressor.as_deref()
    }

    pub fn pre_processing(&self) -> &[Box<dyn PreProcessing>] {
        &self.pre_processing
    }

    pub fn feature_extraction(&self) -> &[Box<dyn FeatureExtraction>] {
        &self.feature_extraction
    }

    pub fn post_processing(&self) -> &[Box<dyn PostProcessing>] {
        &self.post_processing
    }

    pub fn input_vector_dimensions(&self) -> usize {
        self.input_vector_dimensions
    }

    /// Label after post-processing.
    pub fn predicted_class_label(&self) -> u32 {
        self.predicted_class_label
    }

    /// Label straight from the classifier, before post-processing.
    pub fn unprocessed_predicted_class_label(&self) -> u32 {
        self.unprocessed_predicted_class_label
    }

    pub fn maximum_likelihood(&self) -> f64 {
        self.classifier.as_ref().map_or(0.0, |c| c.maximum_likelihood())
    }

    pub fn class_likelihoods(&self) -> &[f64] {
        self.classifier.as_ref().map(|c| c.class_likelihoods()).unwrap_or(&[])
    }

    pub fn class_distances(&self) -> &[f64] {
        self.classifier.as_ref().map(|c| c.class_distances()).unwrap_or(&[])
    }

    pub fn pre_processed_data(&self) -> &[f64] {
        &self.pre_processed_data
    }

    pub fn feature_extraction_data(&self) -> &[f64] {
        &self.feature_extraction_data
    }

    pub fn regression_data(&self) -> &[f64] {
        &self.regression_data
    }

    pub fn test_metrics(&self) -> Option<&TestMetrics> {
        self.test_metrics.as_ref()
    }

    pub fn regression_metrics(&self) -> Option<&RegressionMetrics> {
        self.regression_metrics.as_ref()
    }

    pub fn test_accuracy(&self) -> Option<f64> {
        self.test_metrics.as_ref().map(|m| m.accuracy)
    }

    pub fn cross_validation_accuracy(&self) -> Option<f64> {
        self.cross_validation_accuracy
    }

    pub fn cross_validation_rms_error(&self) -> Option<f64> {
        self.cross_validation_rms_error
    }

    pub fn training_time_ms(&self) -> f64 {
        self.training_time_ms
    }

    /// `{:#}` rendering of the most recent failure.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            let message = format!("{:#}", err);
            log::debug!("pipeline operation failed: {}", message);
            self.last_error = Some(message);
        }
        result
    }

    // ---------------------------------------------------------------------
    // Stage plumbing

    /// Dimensionality after the last pre-processing or feature-extraction stage.
    fn processed_dimensions(&self, input_dims: usize) -> usize {
        if let Some(last) = self.feature_extraction.last() {
            last.num_output_dimensions()
        } else if let Some(last) = self.pre_processing.last() {
            last.num_output_dimensions()
        } else {
            input_dims
        }
    }

    /// Every stage's declared output must match the next stage's declared input.
    fn check_stage_dimensions(&self, input_dims: usize) -> Result<()> {
        let mut dims = input_dims;
        let mut previous = "input data".to_string();
        let hops = self
            .pre_processing
            .iter()
            .map(|s| (s.type_name(), s.num_input_dimensions(), s.num_output_dimensions()))
            .chain(
                self.feature_extraction
                    .iter()
                    .map(|s| (s.type_name(), s.num_input_dimensions(), s.num_output_dimensions())),
            );
        for (name, input, output) in hops {
            if input != dims {
                return Err(GestureError::Configuration(format!(
                    "{} expects {} dimensions but {} provides {}",
                    name, input, previous, dims
                ))
                .into());
            }
            dims = output;
            previous = name.to_string();
        }
        Ok(())
    }

    fn reset_stages(&mut self) {
        self.pre_processing.iter_mut().for_each(|s| s.reset());
        self.feature_extraction.iter_mut().for_each(|s| s.reset());
    }

    /// Runs every sample through the pre-processing and feature-extraction
    /// stages, one stage at a time. With `reset_per_sample` each sample is an
    /// independent stream (time series); otherwise the samples form one
    /// stream. Samples left without rows are dropped.
    fn run_stages(&mut self, mut samples: Vec<Working>, reset_per_sample: bool) -> Result<Vec<Working>> {
        self.reset_stages();
        for (i, stage) in self.pre_processing.iter_mut().enumerate() {
            for sample in samples.iter_mut() {
                if reset_per_sample {
                    stage.reset();
                }
                for row in sample.rows.iter_mut() {
                    *row = stage.process(row).with_context(|| {
                        format!("Pre-processing stage {} ({}) failed on sample {}", i, stage.type_name(), sample.index)
                    })?;
                }
            }
            stage.reset();
        }

        for (i, stage) in self.feature_extraction.iter_mut().enumerate() {
            if stage.requires_fit() {
                let rows: Vec<Vec<f64>> = samples.iter().flat_map(|s| s.rows.iter().cloned()).collect();
                let matrix = Array2::from_rows(&rows)?;
                stage
                    .fit(&matrix)
                    .with_context(|| format!("Failed to fit feature extraction stage {} ({})", i, stage.type_name()))?;
            }
            let before = samples.len();
            for sample in samples.iter_mut() {
                if reset_per_sample {
                    stage.reset();
                }
                let mut features = Vec::with_capacity(sample.rows.len());
                for row in &sample.rows {
                    stage.compute_features(row).with_context(|| {
                        format!(
                            "Feature extraction stage {} ({}) failed on sample {}",
                            i,
                            stage.type_name(),
                            sample.index
                        )
                    })?;
                    if stage.feature_data_ready() {
                        features.push(stage.feature_vector().to_vec());
                    }
                }
                sample.rows = features;
            }
            samples.retain(|s| !s.rows.is_empty());
            if samples.len() < before {
                log::warn!(
                    "{} ({}) had no output for {} of {} samples; they were dropped",
                    stage.type_name(),
                    i,
                    before - samples.len(),
                    before
                );
            }
            stage.reset();
        }
        Ok(samples)
    }

    /// Streams one vector through the stages. `None` while a buffered
    /// feature-extraction stage has no output yet.
    fn process_vector(&mut self, input: &[f64]) -> Result<Option<Vec<f64>>> {
        let mut x = input.to_vec();
        for (i, stage) in self.pre_processing.iter_mut().enumerate() {
            x = stage
                .process(&x)
                .with_context(|| format!("Pre-processing stage {} ({}) failed", i, stage.type_name()))?;
        }
        self.pre_processed_data = x.clone();
        for (i, stage) in self.feature_extraction.iter_mut().enumerate() {
            stage
                .compute_features(&x)
                .with_context(|| format!("Feature extraction stage {} ({}) failed", i, stage.type_name()))?;
            if !stage.feature_data_ready() {
                return Ok(None);
            }
            x = stage.feature_vector().to_vec();
        }
        self.feature_extraction_data = x.clone();
        Ok(Some(x))
    }

    fn post_process(&mut self, label: u32) -> Result<u32> {
        let mut label = label;
        for (i, stage) in self.post_processing.iter_mut().enumerate() {
            label = stage
                .process(label)
                .with_context(|| format!("Post-processing stage {} ({}) failed", i, stage.type_name()))?;
        }
        Ok(label)
    }

    fn begin_training(&mut self, input_dims: usize, empty: bool) -> Result<()> {
        if self.classifier.is_none() && self.regressor.is_none() {
            return Err(GestureError::Precondition("no classifier or regressor is attached".to_string()).into());
        }
        if empty {
            return Err(GestureError::Data("training data is empty".to_string()).into());
        }
        self.trained = false;
        self.test_metrics = None;
        self.regression_metrics = None;
        self.check_stage_dimensions(input_dims)?;
        self.input_vector_dimensions = input_dims;
        Ok(())
    }

    fn classifier_or_err(&mut self) -> Result<&mut Box<dyn Classifier>> {
        self.classifier
            .as_mut()
            .ok_or_else(|| GestureError::Precondition("the pipeline is not in classification mode".to_string()).into())
    }

    fn finish_training(&mut self, start: Instant) {
        self.trained = true;
        self.training_time_ms = elapsed_ms(start);
        self.reset();
        log::info!("Pipeline trained in {:.1} ms", self.training_time_ms);
    }

    // ---------------------------------------------------------------------
    // Classification training

    /// Trains on static vectors.
    pub fn train(&mut self, data: &ClassificationData) -> Result<()> {
        let result = self.train_static(data);
        self.record(result)
    }

    fn train_static(&mut self, data: &ClassificationData) -> Result<()> {
        let start = Instant::now();
        self.begin_training(data.num_dimensions(), data.is_empty())?;
        if self.classifier_or_err()?.is_timeseries_classifier() {
            return Err(GestureError::Configuration(format!(
                "{} needs time-series training data",
                self.classifier_or_err()?.type_name()
            ))
            .into());
        }
        let samples = data
            .iter()
            .enumerate()
            .map(|(index, s)| Working {
                index,
                rows: vec![s.data.clone()],
            })
            .collect();
        let processed = self.run_stages(samples, false)?;

        let mut training = ClassificationData::new(self.processed_dimensions(data.num_dimensions()));
        training.set_allow_null_gesture_class(data.allow_null_gesture_class());
        for w in processed {
            let label = data.samples()[w.index].class_label;
            for row in w.rows {
                training.add_sample(label, row)?;
            }
        }
        self.classifier_or_err()?
            .train(&training)
            .context("Failed to train the classifier")?;
        self.finish_training(start);
        Ok(())
    }

    /// Trains on time series. A sequence classifier receives the processed
    /// series; a static classifier receives every processed time step as one
    /// sample.
    pub fn train_timeseries(&mut self, data: &TimeSeriesClassificationData) -> Result<()> {
        let result = self.train_series(data);
        self.record(result)
    }

    fn train_series(&mut self, data: &TimeSeriesClassificationData) -> Result<()> {
        let start = Instant::now();
        self.begin_training(data.num_dimensions(), data.is_empty())?;
        let samples = data
            .iter()
            .enumerate()
            .map(|(index, s)| Working {
                index,
                rows: s.data.rows().map(<[f64]>::to_vec).collect(),
            })
            .collect();
        let processed = self.run_stages(samples, true)?;
        let dims = self.processed_dimensions(data.num_dimensions());

        if self.classifier_or_err()?.is_timeseries_classifier() {
            let mut training = TimeSeriesClassificationData::new(dims);
            training.set_allow_null_gesture_class(data.allow_null_gesture_class());
            for w in processed {
                let label = data.samples()[w.index].class_label;
                training.add_sample(label, Array2::from_rows(&w.rows)?)?;
            }
            self.classifier_or_err()?
                .train_timeseries(&training)
                .context("Failed to train the classifier")?;
        } else {
            let mut training = ClassificationData::new(dims);
            training.set_allow_null_gesture_class(data.allow_null_gesture_class());
            for w in processed {
                let label = data.samples()[w.index].class_label;
                for row in w.rows {
                    training.add_sample(label, row)?;
                }
            }
            self.classifier_or_err()?
                .train(&training)
                .context("Failed to train the classifier")?;
        }
        self.finish_training(start);
        Ok(())
    }

    /// K-fold cross-validation on static vectors. Returns the mean test
    /// accuracy; the pipeline keeps the model of the last fold.
    pub fn train_kfold(&mut self, data: &ClassificationData, k: usize, stratified: bool) -> Result<f64> {
        let result = self.kfold(data, k, stratified, Self::train_static, Self::test_static);
        self.record(result)
    }

    pub fn train_timeseries_kfold(
        &mut self,
        data: &TimeSeriesClassificationData,
        k: usize,
        stratified: bool,
    ) -> Result<f64> {
        let result = self.kfold(data, k, stratified, Self::train_series, Self::test_series);
        self.record(result)
    }

    fn kfold<P: crate::data::SamplePayload>(
        &mut self,
        data: &crate::data::LabelledDataset<P>,
        k: usize,
        stratified: bool,
        train: fn(&mut Self, &crate::data::LabelledDataset<P>) -> Result<()>,
        test: fn(&mut Self, &crate::data::LabelledDataset<P>) -> Result<()>,
    ) -> Result<f64> {
        let mut folds = data.clone();
        folds.split_into_k_folds(k, stratified)?;
        let mut accuracies = Vec::with_capacity(k);
        for fold in 0..k {
            let training = folds.training_fold_data(fold)?;
            let testing = folds.test_fold_data(fold)?;
            train(self, &training).with_context(|| format!("Training failed on fold {}", fold))?;
            test(self, &testing).with_context(|| format!("Testing failed on fold {}", fold))?;
            let accuracy = self.test_accuracy().unwrap_or(0.0);
            log::info!("Fold {}/{}: accuracy {:.2}%", fold + 1, k, accuracy);
            accuracies.push(accuracy);
        }
        let mean = crate::stats::mean(&accuracies);
        self.cross_validation_accuracy = Some(mean);
        log::info!("{}-fold cross-validation accuracy: {:.2}%", k, mean);
        Ok(mean)
    }

    // ---------------------------------------------------------------------
    // Classification testing

    fn check_test_labels<P: crate::data::SamplePayload>(&self, data: &crate::data::LabelledDataset<P>) -> Result<Vec<u32>> {
        if !self.trained {
            return Err(not_trained());
        }
        let classifier = self
            .classifier
            .as_ref()
            .ok_or_else(|| GestureError::Precondition("the pipeline is not in classification mode".to_string()))?;
        if data.is_empty() {
            return Err(GestureError::Data("test data is empty".to_string()).into());
        }
        if data.num_dimensions() != self.input_vector_dimensions {
            return Err(GestureError::Precondition(format!(
                "test data has {} dimensions but the pipeline was trained with {}",
                data.num_dimensions(),
                self.input_vector_dimensions
            ))
            .into());
        }
        let labels = classifier.class_labels().to_vec();
        for label in data.class_labels() {
            if label != NULL_CLASS_LABEL && !labels.contains(&label) {
                return Err(GestureError::Data(format!("test class label {} is not known to the model", label)).into());
            }
        }
        Ok(labels)
    }

    fn include_null_column<P: crate::data::SamplePayload>(&self, data: &crate::data::LabelledDataset<P>) -> bool {
        self.classifier.as_ref().is_some_and(|c| c.null_rejection_enabled())
            || !self.post_processing.is_empty()
            || data.class_labels().contains(&NULL_CLASS_LABEL)
    }

    /// Tests on static vectors; every sample runs the full prediction path.
    pub fn test(&mut self, data: &ClassificationData) -> Result<&TestMetrics> {
        let result = self.test_static(data);
        self.record(result)?;
        self.test_metrics.as_ref().ok_or_else(not_trained)
    }

    fn test_static(&mut self, data: &ClassificationData) -> Result<()> {
        let start = Instant::now();
        let labels = self.check_test_labels(data)?;
        let include_null = self.include_null_column(data);
        self.reset();
        let mut results = Vec::with_capacity(data.num_samples());
        for (i, sample) in data.iter().enumerate() {
            self.predict_vector(&sample.data)
                .with_context(|| format!("Prediction failed on test sample {}", i))?;
            results.push(ClassificationResult {
                class_label: sample.class_label,
                predicted_class_label: self.predicted_class_label,
                maximum_likelihood: self.maximum_likelihood(),
            });
        }
        self.store_test_metrics(&labels, include_null, results, start);
        Ok(())
    }

    /// Tests on time series. A static classifier is judged by its prediction
    /// after the last time step.
    pub fn test_timeseries(&mut self, data: &TimeSeriesClassificationData) -> Result<&TestMetrics> {
        let result = self.test_series(data);
        self.record(result)?;
        self.test_metrics.as_ref().ok_or_else(not_trained)
    }

    fn test_series(&mut self, data: &TimeSeriesClassificationData) -> Result<()> {
        let start = Instant::now();
        let labels = self.check_test_labels(data)?;
        let include_null = self.include_null_column(data);
        self.reset();
        let mut results = Vec::with_capacity(data.num_samples());
        for (i, sample) in data.iter().enumerate() {
            self.predict_series(&sample.data)
                .with_context(|| format!("Prediction failed on test sample {}", i))?;
            results.push(ClassificationResult {
                class_label: sample.class_label,
                predicted_class_label: self.predicted_class_label,
                maximum_likelihood: self.maximum_likelihood(),
            });
        }
        self.store_test_metrics(&labels, include_null, results, start);
        Ok(())
    }

    fn store_test_metrics(&mut self, labels: &[u32], include_null: bool, results: Vec<ClassificationResult>, start: Instant) {
        let mut metrics = TestMetrics::from_results(labels, include_null, results);
        metrics.test_time_ms = elapsed_ms(start);
        log::info!(
            "Tested {} samples: accuracy {:.2}%, rejection rate {:.2}",
            metrics.results.len(),
            metrics.accuracy,
            metrics.rejection_rate()
        );
        self.test_metrics = Some(metrics);
    }

    // ---------------------------------------------------------------------
    // Prediction

    /// Runs one input vector through the full pipeline.
    ///
    /// In classification mode the result is read with
    /// [`predicted_class_label`](Self::predicted_class_label); in regression
    /// mode with [`regression_data`](Self::regression_data).
    pub fn predict(&mut self, input: &[f64]) -> Result<()> {
        let result = self.predict_vector(input);
        self.record(result)
    }

    fn predict_vector(&mut self, input: &[f64]) -> Result<()> {
        if !self.trained {
            return Err(not_trained());
        }
        if input.len() != self.input_vector_dimensions {
            return Err(GestureError::Precondition(format!(
                "input has {} dimensions but the pipeline was trained with {}",
                input.len(),
                self.input_vector_dimensions
            ))
            .into());
        }
        let Some(features) = self.process_vector(input)? else {
            self.unprocessed_predicted_class_label = NULL_CLASS_LABEL;
            self.predicted_class_label = NULL_CLASS_LABEL;
            return Ok(());
        };

        if let Some(regressor) = self.regressor.as_mut() {
            regressor.predict(&features).context("Regressor failed to predict")?;
            self.regression_data = regressor.regression_data().to_vec();
            return Ok(());
        }
        let classifier = self.classifier_or_err()?;
        classifier.predict(&features).context("Classifier failed to predict")?;
        let label = classifier.predicted_class_label();
        self.unprocessed_predicted_class_label = label;
        self.predicted_class_label = self.post_process(label)?;
        Ok(())
    }

    /// Classifies a whole time series (rows are time steps). Stage buffers
    /// are reset first so the series is judged on its own.
    pub fn predict_timeseries(&mut self, input: &Array2<f64>) -> Result<()> {
        let result = self.predict_series(input);
        self.record(result)
    }

    fn predict_series(&mut self, input: &Array2<f64>) -> Result<()> {
        if !self.trained {
            return Err(not_trained());
        }
        if input.ncols() != self.input_vector_dimensions {
            return Err(GestureError::Precondition(format!(
                "input has {} dimensions but the pipeline was trained with {}",
                input.ncols(),
                self.input_vector_dimensions
            ))
            .into());
        }
        let sequence_classifier = self.classifier_or_err()?.is_timeseries_classifier();
        if !sequence_classifier {
            self.reset();
            for row in input.rows() {
                self.predict_vector(row)?;
            }
            return Ok(());
        }

        self.reset_stages();
        let mut rows = Vec::with_capacity(input.nrows());
        for row in input.rows() {
            if let Some(features) = self.process_vector(row)? {
                rows.push(features);
            }
        }
        if rows.is_empty() {
            self.unprocessed_predicted_class_label = NULL_CLASS_LABEL;
            self.predicted_class_label = NULL_CLASS_LABEL;
            return Ok(());
        }
        let series = Array2::from_rows(&rows)?;
        let classifier = self.classifier_or_err()?;
        classifier
            .predict_timeseries(&series)
            .context("Classifier failed to predict")?;
        let label = classifier.predicted_class_label();
        self.unprocessed_predicted_class_label = label;
        self.predicted_class_label = self.post_process(label)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Regression

    pub fn train_regression(&mut self, data: &RegressionData) -> Result<()> {
        let result = self.train_regressor(data);
        self.record(result)
    }

    fn train_regressor(&mut self, data: &RegressionData) -> Result<()> {
        let start = Instant::now();
        self.begin_training(data.num_input_dimensions(), data.is_empty())?;
        if self.regressor.is_none() {
            return Err(GestureError::Precondition("the pipeline is not in regression mode".to_string()).into());
        }
        let samples = data
            .samples()
            .iter()
            .enumerate()
            .map(|(index, s)| Working {
                index,
                rows: vec![s.input.clone()],
            })
            .collect();
        let processed = self.run_stages(samples, false)?;
        let mut training = RegressionData::new(
            self.processed_dimensions(data.num_input_dimensions()),
            data.num_target_dimensions(),
        );
        for w in processed {
            let target = &data.samples()[w.index].target;
            for row in w.rows {
                training.add_sample(row, target.clone())?;
            }
        }
        if let Some(regressor) = self.regressor.as_mut() {
            regressor.train(&training).context("Failed to train the regressor")?;
        }
        self.finish_training(start);
        Ok(())
    }

    pub fn test_regression(&mut self, data: &RegressionData) -> Result<RegressionMetrics> {
        let result = self.test_regressor(data);
        self.record(result)
    }

    fn test_regressor(&mut self, data: &RegressionData) -> Result<RegressionMetrics> {
        let start = Instant::now();
        if !self.trained || self.regressor.is_none() {
            return Err(not_trained());
        }
        self.reset();
        let mut errors = Vec::with_capacity(data.num_samples());
        for (i, sample) in data.samples().iter().enumerate() {
            self.predict_vector(&sample.input)
                .with_context(|| format!("Prediction failed on test sample {}", i))?;
            let se: f64 = self
                .regression_data
                .iter()
                .zip(&sample.target)
                .map(|(p, t)| (p - t) * (p - t))
                .sum();
            errors.push(se);
        }
        let mut metrics = RegressionMetrics::from_errors(&errors)?;
        metrics.test_time_ms = elapsed_ms(start);
        log::info!("Regression test: rms error {:.6}, sse {:.6}", metrics.rms_error, metrics.sse);
        self.regression_metrics = Some(metrics);
        Ok(metrics)
    }

    /// K-fold cross-validation for regression. Returns the mean test RMS
    /// error; the pipeline keeps the model of the last fold.
    pub fn train_regression_kfold(&mut self, data: &RegressionData, k: usize) -> Result<f64> {
        let result = self.regression_kfold(data, k);
        self.record(result)
    }

    fn regression_kfold(&mut self, data: &RegressionData, k: usize) -> Result<f64> {
        let mut folds = data.clone();
        folds.split_into_k_folds(k)?;
        let mut errors = Vec::with_capacity(k);
        for fold in 0..k {
            let training = folds.training_fold_data(fold)?;
            let testing = folds.test_fold_data(fold)?;
            self.train_regressor(&training)
                .with_context(|| format!("Training failed on fold {}", fold))?;
            let metrics = self
                .test_regressor(&testing)
                .with_context(|| format!("Testing failed on fold {}", fold))?;
            errors.push(metrics.rms_error);
        }
        let mean = crate::stats::mean(&errors);
        self.cross_validation_rms_error = Some(mean);
        log::info!("{}-fold cross-validation rms error: {:.6}", k, mean);
        Ok(mean)
    }
}

fn insert_position(index: Option<usize>, len: usize) -> Result<usize> {
    match index {
        None => Ok(len),
        Some(i) if i <= len => Ok(i),
        Some(i) => Err(GestureError::Precondition(format!("insert position {} is past the end ({})", i, len)).into()),
    }
}

fn check_index(index: usize, len: usize, role: &str) -> Result<()> {
    if index >= len {
        return Err(GestureError::Precondition(format!(
            "no {} stage at index {} ({} stages)",
            role, index, len
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MinDist;
    use crate::postprocessing::ClassLabelChangeFilter;
    use crate::preprocessing::MovingAverageFilter;

    fn blobs() -> ClassificationData {
        let mut data = ClassificationData::new(2);
        for i in 0..10 {
            let jitter = i as f64 * 0.02;
            data.add_sample(1, vec![jitter, 0.0]).unwrap();
            data.add_sample(2, vec![3.0 + jitter, 3.0]).unwrap();
        }
        data
    }

    #[test]
    fn state_follows_composition() {
        let mut p = GestureRecognitionPipeline::new();
        assert_eq!(p.state(), PipelineState::Uninitialized);
        p.set_classifier(Box::new(MinDist::new(2).unwrap().with_seed(Some(1))));
        assert_eq!(p.state(), PipelineState::Initialized);
        p.train(&blobs()).unwrap();
        assert_eq!(p.state(), PipelineState::Trained);
        p.add_post_processing(Box::new(ClassLabelChangeFilter::new()), None).unwrap();
        assert_eq!(p.state(), PipelineState::Initialized);
    }

    #[test]
    fn mismatched_stage_dimensions_are_rejected() {
        let mut p = GestureRecognitionPipeline::new();
        p.set_classifier(Box::new(MinDist::default()));
        p.add_pre_processing(Box::new(MovingAverageFilter::new(3, 5).unwrap()), None).unwrap();
        let err = p.train(&blobs()).unwrap_err();
        assert!(matches!(crate::error::error_kind(&err), Some(GestureError::Configuration(_))));
        assert!(p.last_error().is_some());
    }

    #[test]
    fn bad_insert_position_fails() {
        let mut p = GestureRecognitionPipeline::new();
        assert!(p.add_pre_processing(Box::new(MovingAverageFilter::default()), Some(1)).is_err());
        assert!(p.remove_post_processing(0).is_err());
    }

    #[test]
    fn post_processing_sees_the_raw_label() {
        let mut p = GestureRecognitionPipeline::new();
        p.set_classifier(Box::new(MinDist::new(2).unwrap().with_seed(Some(3))));
        p.add_post_processing(Box::new(ClassLabelChangeFilter::new()), None).unwrap();
        p.train(&blobs()).unwrap();
        p.predict(&[3.0, 3.0]).unwrap();
        assert_eq!(p.predicted_class_label(), 2);
        p.predict(&[3.1, 3.0]).unwrap();
        assert_eq!(p.unprocessed_predicted_class_label(), 2);
        assert_eq!(p.predicted_class_label(), NULL_CLASS_LABEL);
    }
}
