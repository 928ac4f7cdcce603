use std::path::Path;

use anyhow::{Context, Result};

use crate::data::{ClassificationData, TimeSeriesClassificationData, NULL_CLASS_LABEL};
use crate::error::GestureError;
use crate::io::tokens::{read_text_file, write_text_file, FieldWriter, TokenReader};
use crate::math::Array2;
use crate::stats::{self, arg_max, arg_min, MinMax, ScoreDirection};

/// Outcome of the most recent prediction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prediction {
    pub predicted_class_label: u32,
    /// Normalised likelihood of the winning class, in `[0, 1]`.
    pub maximum_likelihood: f64,
    /// Normalised likelihood per class, in class-label order.
    pub class_likelihoods: Vec<f64>,
    /// Raw per-class score: log-likelihood for probabilistic models,
    /// distance for template and distance models.
    pub class_distances: Vec<f64>,
}

/// State shared by every classifier: class bookkeeping, input scaling,
/// null rejection and the last prediction.
#[derive(Debug, Clone)]
pub struct ClassifierCore {
    pub(crate) trained: bool,
    pub(crate) num_input_dimensions: usize,
    pub(crate) class_labels: Vec<u32>,
    pub(crate) use_scaling: bool,
    pub(crate) ranges: Vec<MinMax>,
    pub(crate) use_null_rejection: bool,
    pub(crate) null_rejection_coeff: f64,
    pub(crate) direction: ScoreDirection,
    pub(crate) training_mu: Vec<f64>,
    pub(crate) training_sigma: Vec<f64>,
    pub(crate) null_rejection_thresholds: Vec<f64>,
    pub(crate) prediction: Prediction,
}

impl ClassifierCore {
    pub fn new(direction: ScoreDirection, null_rejection_coeff: f64) -> Self {
        Self {
            trained: false,
            num_input_dimensions: 0,
            class_labels: Vec::new(),
            use_scaling: false,
            ranges: Vec::new(),
            use_null_rejection: false,
            null_rejection_coeff,
            direction,
            training_mu: Vec::new(),
            training_sigma: Vec::new(),
            null_rejection_thresholds: Vec::new(),
            prediction: Prediction::default(),
        }
    }

    /// Forgets everything learned; hyperparameters are kept.
    pub fn clear(&mut self) {
        self.trained = false;
        self.num_input_dimensions = 0;
        self.class_labels.clear();
        self.ranges.clear();
        self.training_mu.clear();
        self.training_sigma.clear();
        self.null_rejection_thresholds.clear();
        self.prediction = Prediction::default();
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// Records the score distribution of each class's own training samples
    /// and derives the rejection thresholds from it.
    pub fn set_training_scores(&mut self, per_class: &[Vec<f64>]) {
        self.training_mu = per_class.iter().map(|s| stats::mean(s)).collect();
        self.training_sigma = per_class.iter().map(|s| stats::std_dev(s)).collect();
        self.update_null_rejection_thresholds();
    }

    pub fn update_null_rejection_thresholds(&mut self) {
        let coeff = self.null_rejection_coeff;
        let direction = self.direction;
        self.null_rejection_thresholds = self
            .training_mu
            .iter()
            .zip(&self.training_sigma)
            .map(|(&mu, &sigma)| stats::threshold_from_moments(mu, sigma, coeff, direction))
            .collect();
        log::debug!("null rejection thresholds: {:?}", self.null_rejection_thresholds);
    }

    pub fn ensure_trained(&self) -> Result<()> {
        if !self.trained {
            return Err(GestureError::Precondition("model has not been trained".to_string()).into());
        }
        Ok(())
    }

    /// Fails unless the model is trained and `dims` matches the training data.
    pub fn ensure_ready(&self, dims: usize) -> Result<()> {
        self.ensure_trained()?;
        if dims != self.num_input_dimensions {
            return Err(GestureError::Precondition(format!(
                "input has {} dimensions but the model was trained with {}",
                dims, self.num_input_dimensions
            ))
            .into());
        }
        Ok(())
    }

    /// Min-max scales `x` into `[0, 1]` with the training ranges when scaling is on.
    pub fn scale_input(&self, x: &[f64]) -> Vec<f64> {
        if !self.use_scaling || self.ranges.len() != x.len() {
            return x.to_vec();
        }
        x.iter()
            .zip(&self.ranges)
            .map(|(&v, r)| stats::scale(v, r.min, r.max, 0.0, 1.0, false))
            .collect()
    }

    pub fn scale_series(&self, x: &Array2<f64>) -> Array2<f64> {
        if !self.use_scaling {
            return x.clone();
        }
        let mut out = x.clone();
        for r in 0..out.nrows() {
            let scaled = self.scale_input(out.row(r));
            out.row_mut(r).copy_from_slice(&scaled);
        }
        out
    }

    /// Picks the winner from raw per-class scores, oriented by `direction`,
    /// and applies null rejection.
    pub fn decide_from_scores(&mut self, scores: Vec<f64>) {
        let winner = match self.direction {
            ScoreDirection::HigherIsBetter => arg_max(&scores),
            ScoreDirection::LowerIsBetter => arg_min(&scores),
        };
        let Some(winner) = winner else {
            self.reject(scores);
            return;
        };
        let likelihoods = match self.direction {
            ScoreDirection::HigherIsBetter => softmax(&scores),
            ScoreDirection::LowerIsBetter => inverse_distance_weights(&scores),
        };
        if !scores[winner].is_finite() {
            self.reject(scores);
            return;
        }
        self.decide(winner, likelihoods, scores);
    }

    /// Commits a prediction for class index `winner`, overriding it with the
    /// null label when rejection is on and its score misses the threshold.
    pub fn decide(&mut self, winner: usize, class_likelihoods: Vec<f64>, class_distances: Vec<f64>) {
        let mut label = self.class_labels[winner];
        if self.use_null_rejection {
            let threshold = self.null_rejection_thresholds[winner];
            if !stats::passes_threshold(class_distances[winner], threshold, self.direction) {
                log::trace!(
                    "class {} rejected: score {} does not clear threshold {}",
                    label,
                    class_distances[winner],
                    threshold
                );
                label = NULL_CLASS_LABEL;
            }
        }
        self.prediction = Prediction {
            predicted_class_label: label,
            maximum_likelihood: class_likelihoods[winner],
            class_likelihoods,
            class_distances,
        };
    }

    /// No class explains the input at all.
    fn reject(&mut self, scores: Vec<f64>) {
        self.prediction = Prediction {
            predicted_class_label: NULL_CLASS_LABEL,
            maximum_likelihood: 0.0,
            class_likelihoods: vec![0.0; scores.len()],
            class_distances: scores,
        };
    }

    pub fn save(&self, w: &mut FieldWriter) {
        w.flag("Trained:", self.trained)
            .flag("UseScaling:", self.use_scaling)
            .flag("UseNullRejection:", self.use_null_rejection)
            .field("NullRejectionCoeff:", self.null_rejection_coeff);
        if !self.trained {
            return;
        }
        w.field("NumInputDimensions:", self.num_input_dimensions)
            .field("NumClasses:", self.class_labels.len())
            .line("ClassLabels:")
            .vector(&self.class_labels)
            .line("TrainingMu:")
            .vector(&self.training_mu)
            .line("TrainingSigma:")
            .vector(&self.training_sigma);
        if self.use_scaling {
            w.line("Ranges:");
            for r in &self.ranges {
                w.vector(&[r.min, r.max]);
            }
        }
    }

    /// Reads the fields written by [`save`](Self::save) into a fresh core.
    pub fn load(&self, r: &mut TokenReader<'_>) -> Result<Self> {
        let mut core = Self::new(self.direction, self.null_rejection_coeff);
        core.trained = r.flag("Trained:")?;
        core.use_scaling = r.flag("UseScaling:")?;
        core.use_null_rejection = r.flag("UseNullRejection:")?;
        core.null_rejection_coeff = r.field("NullRejectionCoeff:")?;
        if !core.trained {
            return Ok(core);
        }
        core.num_input_dimensions = r.field("NumInputDimensions:")?;
        let num_classes = r.field::<usize>("NumClasses:")?;
        r.expect("ClassLabels:")?;
        core.class_labels = r.vector(num_classes)?;
        r.expect("TrainingMu:")?;
        core.training_mu = r.vector(num_classes)?;
        r.expect("TrainingSigma:")?;
        core.training_sigma = r.vector(num_classes)?;
        if core.use_scaling {
            r.expect("Ranges:")?;
            for _ in 0..core.num_input_dimensions {
                let min = r.value::<f64>()?;
                let max = r.value::<f64>()?;
                core.ranges.push(MinMax::new(min, max));
            }
        }
        core.update_null_rejection_thresholds();
        Ok(core)
    }
}

/// Numerically stable normalisation of log-likelihoods into probabilities.
pub(crate) fn softmax(log_likelihoods: &[f64]) -> Vec<f64> {
    let max = log_likelihoods.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![0.0; log_likelihoods.len()];
    }
    let exp: Vec<f64> = log_likelihoods.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.iter().map(|e| e / sum).collect()
}

/// Likelihoods proportional to inverse distance; an exact match takes all the mass.
pub(crate) fn inverse_distance_weights(distances: &[f64]) -> Vec<f64> {
    if let Some(exact) = distances.iter().position(|&d| d == 0.0) {
        let mut out = vec![0.0; distances.len()];
        out[exact] = 1.0;
        return out;
    }
    let inv: Vec<f64> = distances
        .iter()
        .map(|&d| if d.is_finite() { 1.0 / d } else { 0.0 })
        .collect();
    let sum: f64 = inv.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; distances.len()];
    }
    inv.iter().map(|v| v / sum).collect()
}

/// Capability contract shared by every classifier.
///
/// Static classifiers implement [`train`](Classifier::train) and
/// [`predict`](Classifier::predict); sequence classifiers implement the
/// time-series pair and report `is_timeseries_classifier() == true`. The
/// other pair fails with a configuration error by default.
pub trait Classifier: Send + Sync {
    /// Stable tag used by the factory and in pipeline files.
    fn type_name(&self) -> &'static str;

    fn core(&self) -> &ClassifierCore;

    fn core_mut(&mut self) -> &mut ClassifierCore;

    fn is_timeseries_classifier(&self) -> bool {
        false
    }

    fn train(&mut self, _data: &ClassificationData) -> Result<()> {
        Err(GestureError::Configuration(format!("{} cannot be trained on static samples", self.type_name())).into())
    }

    fn train_timeseries(&mut self, _data: &TimeSeriesClassificationData) -> Result<()> {
        Err(GestureError::Configuration(format!("{} cannot be trained on time series", self.type_name())).into())
    }

    /// Classifies one vector. Sequence classifiers treat it as the next time step of a stream.
    fn predict(&mut self, input: &[f64]) -> Result<()>;

    fn predict_timeseries(&mut self, _input: &Array2<f64>) -> Result<()> {
        Err(GestureError::Configuration(format!("{} cannot classify time series", self.type_name())).into())
    }

    /// Drops streaming state without forgetting the trained model.
    fn reset(&mut self) {}

    /// Forgets the trained model.
    fn clear(&mut self);

    fn save_model(&self, w: &mut FieldWriter) -> Result<()>;

    /// Replaces the model with the one read from `r`. Implementations parse
    /// into fresh state and commit only on success.
    fn load_model(&mut self, r: &mut TokenReader<'_>) -> Result<()>;

    fn clone_box(&self) -> Box<dyn Classifier>;

    fn is_trained(&self) -> bool {
        self.core().trained
    }

    fn num_input_dimensions(&self) -> usize {
        self.core().num_input_dimensions
    }

    fn num_classes(&self) -> usize {
        self.core().num_classes()
    }

    fn class_labels(&self) -> &[u32] {
        &self.core().class_labels
    }

    fn prediction(&self) -> &Prediction {
        &self.core().prediction
    }

    fn predicted_class_label(&self) -> u32 {
        self.core().prediction.predicted_class_label
    }

    fn maximum_likelihood(&self) -> f64 {
        self.core().prediction.maximum_likelihood
    }

    fn class_likelihoods(&self) -> &[f64] {
        &self.core().prediction.class_likelihoods
    }

    fn class_distances(&self) -> &[f64] {
        &self.core().prediction.class_distances
    }

    fn null_rejection_enabled(&self) -> bool {
        self.core().use_null_rejection
    }

    fn enable_null_rejection(&mut self, enable: bool) {
        self.core_mut().use_null_rejection = enable;
    }

    fn null_rejection_coeff(&self) -> f64 {
        self.core().null_rejection_coeff
    }

    /// Sets the rejection strictness and recomputes the thresholds of a trained model.
    fn set_null_rejection_coeff(&mut self, coeff: f64) -> Result<()> {
        if !coeff.is_finite() {
            return Err(GestureError::Configuration(format!("null rejection coefficient {} is not finite", coeff)).into());
        }
        let core = self.core_mut();
        core.null_rejection_coeff = coeff;
        if core.trained {
            core.update_null_rejection_thresholds();
        }
        Ok(())
    }

    fn null_rejection_thresholds(&self) -> &[f64] {
        &self.core().null_rejection_thresholds
    }

    fn enable_scaling(&mut self, enable: bool) {
        self.core_mut().use_scaling = enable;
    }

    fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut w = FieldWriter::new();
        self.save_model(&mut w)?;
        write_text_file(path, w.as_str()).with_context(|| format!("Failed to save {} model", self.type_name()))
    }

    /// Loads a model file; on any failure the classifier is left cleared.
    fn load_from_file(&mut self, path: &Path) -> Result<()> {
        let loaded = read_text_file(path).and_then(|text| self.load_model(&mut TokenReader::new(&text)));
        if let Err(err) = loaded {
            self.clear();
            return Err(err.context(format!("Failed to load {} model from {}", self.type_name(), path.display())));
        }
        Ok(())
    }
}

impl Clone for Box<dyn Classifier> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(self.type_name())
            .field("trained", &self.is_trained())
            .field("class_labels", &self.class_labels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(direction: ScoreDirection) -> ClassifierCore {
        let mut core = ClassifierCore::new(direction, 0.0);
        core.trained = true;
        core.num_input_dimensions = 1;
        core.class_labels = vec![3, 7];
        core
    }

    #[test]
    fn likelihood_winner_and_tie_break() {
        let mut c = core(ScoreDirection::HigherIsBetter);
        c.decide_from_scores(vec![-4.0, -2.0]);
        assert_eq!(c.prediction.predicted_class_label, 7);
        c.decide_from_scores(vec![-2.0, -2.0]);
        assert_eq!(c.prediction.predicted_class_label, 3);
        let sum: f64 = c.prediction.class_likelihoods.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
    }

    #[test]
    fn distance_winner_is_smallest() {
        let mut c = core(ScoreDirection::LowerIsBetter);
        c.decide_from_scores(vec![0.5, 2.0]);
        assert_eq!(c.prediction.predicted_class_label, 3);
        assert!(c.prediction.maximum_likelihood > 0.5);
    }

    #[test]
    fn rejection_uses_winner_threshold() {
        let mut c = core(ScoreDirection::HigherIsBetter);
        c.use_null_rejection = true;
        c.set_training_scores(&[vec![-10.0, -12.0], vec![-3.0, -5.0]]);
        c.decide_from_scores(vec![-20.0, -6.0]);
        assert_eq!(c.prediction.predicted_class_label, NULL_CLASS_LABEL);
        c.decide_from_scores(vec![-20.0, -3.5]);
        assert_eq!(c.prediction.predicted_class_label, 7);
    }

    #[test]
    fn all_impossible_scores_are_rejected() {
        let mut c = core(ScoreDirection::HigherIsBetter);
        c.decide_from_scores(vec![f64::NEG_INFINITY, f64::NEG_INFINITY]);
        assert_eq!(c.prediction.predicted_class_label, NULL_CLASS_LABEL);
    }

    #[test]
    fn core_round_trips_through_text() {
        let mut c = core(ScoreDirection::LowerIsBetter);
        c.use_scaling = true;
        c.ranges = vec![MinMax::new(-1.0, 4.0)];
        c.set_training_scores(&[vec![1.0, 2.0], vec![3.0]]);
        let mut w = FieldWriter::new();
        c.save(&mut w);
        let text = w.finish();
        let loaded = c.load(&mut TokenReader::new(&text)).unwrap();
        assert_eq!(loaded.class_labels, c.class_labels);
        assert_eq!(loaded.null_rejection_thresholds, c.null_rejection_thresholds);
        assert_eq!(loaded.ranges, c.ranges);
    }
}
