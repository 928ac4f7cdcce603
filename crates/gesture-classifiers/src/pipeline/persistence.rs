//! Whole-pipeline files: a header naming every stage type, followed by each
//! stage's own settings block and the model block.
use std::path::Path;

use anyhow::{Context, Result};

use super::GestureRecognitionPipeline;
use crate::error::GestureError;
use crate::factory;
use crate::io::tokens::{read_text_file, write_text_file, FieldWriter, TokenReader};

const FILE_HEADER: &str = "PIPELINE_FILE_V1.0";
const CLASSIFICATION_MODE: &str = "CLASSIFICATION_MODE";
const REGRESSION_MODE: &str = "REGRESSION_MODE";
const MODE_NOT_SET: &str = "NOT_SET";

impl GestureRecognitionPipeline {
    /// Serialises every stage and the model.
    pub fn to_text(&self) -> Result<String> {
        let mut w = FieldWriter::new();
        let mode = if self.classifier.is_some() {
            CLASSIFICATION_MODE
        } else if self.regressor.is_some() {
            REGRESSION_MODE
        } else {
            MODE_NOT_SET
        };
        w.line(FILE_HEADER)
            .field("PipelineMode:", mode)
            .field("NumPreprocessingModules:", self.pre_processing.len())
            .field("NumFeatureExtractionModules:", self.feature_extraction.len())
            .field("NumPostprocessingModules:", self.post_processing.len())
            .flag("Trained:", self.trained)
            .field("InputVectorDimensions:", self.input_vector_dimensions);

        let tags: Vec<&str> = self.pre_processing.iter().map(|s| s.type_name()).collect();
        w.line("PreProcessingModuleDatatypes:").vector(&tags);
        let tags: Vec<&str> = self.feature_extraction.iter().map(|s| s.type_name()).collect();
        w.line("FeatureExtractionModuleDatatypes:").vector(&tags);
        if let Some(c) = &self.classifier {
            w.field("ClassificationModuleDatatype:", c.type_name());
        }
        if let Some(r) = &self.regressor {
            w.field("RegressionModuleDatatype:", r.type_name());
        }
        let tags: Vec<&str> = self.post_processing.iter().map(|s| s.type_name()).collect();
        w.line("PostProcessingModuleDatatypes:").vector(&tags);

        for (i, stage) in self.pre_processing.iter().enumerate() {
            w.line(&format!("PreProcessingModule_{}:", i + 1));
            stage.save_settings(&mut w)?;
        }
        for (i, stage) in self.feature_extraction.iter().enumerate() {
            w.line(&format!("FeatureExtractionModule_{}:", i + 1));
            stage.save_settings(&mut w)?;
        }
        if let Some(c) = &self.classifier {
            w.line("ClassificationModule:");
            c.save_model(&mut w)?;
        }
        if let Some(r) = &self.regressor {
            w.line("RegressionModule:");
            r.save_model(&mut w)?;
        }
        for (i, stage) in self.post_processing.iter().enumerate() {
            w.line(&format!("PostProcessingModule_{}:", i + 1));
            stage.save_settings(&mut w)?;
        }
        Ok(w.finish())
    }

    /// Parses a pipeline written by [`to_text`](Self::to_text).
    pub fn from_text(text: &str) -> Result<Self> {
        let mut r = TokenReader::new(text);
        r.expect(FILE_HEADER)?;
        let mode: String = r.field("PipelineMode:")?;
        let num_pre = r.field::<usize>("NumPreprocessingModules:")?;
        let num_fe = r.field::<usize>("NumFeatureExtractionModules:")?;
        let num_post = r.field::<usize>("NumPostprocessingModules:")?;
        let trained = r.flag("Trained:")?;
        let input_vector_dimensions = r.field::<usize>("InputVectorDimensions:")?;

        let mut pipeline = Self::new();
        r.expect("PreProcessingModuleDatatypes:")?;
        for _ in 0..num_pre {
            let tag = r.next_token("pre-processing type")?;
            pipeline.pre_processing.push(factory::create_pre_processing(tag)?);
        }
        r.expect("FeatureExtractionModuleDatatypes:")?;
        for _ in 0..num_fe {
            let tag = r.next_token("feature extraction type")?;
            pipeline.feature_extraction.push(factory::create_feature_extraction(tag)?);
        }
        match mode.as_str() {
            CLASSIFICATION_MODE => {
                let tag = r.field::<String>("ClassificationModuleDatatype:")?;
                pipeline.classifier = Some(factory::create_classifier(&tag)?);
            }
            REGRESSION_MODE => {
                let tag = r.field::<String>("RegressionModuleDatatype:")?;
                pipeline.regressor = Some(factory::create_regressor(&tag)?);
            }
            MODE_NOT_SET => {}
            other => {
                return Err(GestureError::Format {
                    expected: "pipeline mode".to_string(),
                    found: other.to_string(),
                }
                .into())
            }
        }
        r.expect("PostProcessingModuleDatatypes:")?;
        for _ in 0..num_post {
            let tag = r.next_token("post-processing type")?;
            pipeline.post_processing.push(factory::create_post_processing(tag)?);
        }

        for (i, stage) in pipeline.pre_processing.iter_mut().enumerate() {
            r.expect(&format!("PreProcessingModule_{}:", i + 1))?;
            stage
                .load_settings(&mut r)
                .with_context(|| format!("Failed to load pre-processing module {}", i + 1))?;
        }
        for (i, stage) in pipeline.feature_extraction.iter_mut().enumerate() {
            r.expect(&format!("FeatureExtractionModule_{}:", i + 1))?;
            stage
                .load_settings(&mut r)
                .with_context(|| format!("Failed to load feature extraction module {}", i + 1))?;
        }
        if let Some(c) = pipeline.classifier.as_mut() {
            r.expect("ClassificationModule:")?;
            c.load_model(&mut r).context("Failed to load the classification module")?;
        }
        if let Some(reg) = pipeline.regressor.as_mut() {
            r.expect("RegressionModule:")?;
            reg.load_model(&mut r).context("Failed to load the regression module")?;
        }
        for (i, stage) in pipeline.post_processing.iter_mut().enumerate() {
            r.expect(&format!("PostProcessingModule_{}:", i + 1))?;
            stage
                .load_settings(&mut r)
                .with_context(|| format!("Failed to load post-processing module {}", i + 1))?;
        }

        let model_trained = match (&pipeline.classifier, &pipeline.regressor) {
            (Some(c), _) => c.is_trained(),
            (None, Some(reg)) => reg.is_trained(),
            (None, None) => false,
        };
        if trained && !model_trained {
            return Err(GestureError::Data("pipeline is marked trained but its model is not".to_string()).into());
        }
        pipeline.trained = trained;
        pipeline.input_vector_dimensions = input_vector_dimensions;
        Ok(pipeline)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let text = self.to_text()?;
        write_text_file(&path, &text).context("Failed to save pipeline")?;
        log::info!("Saved pipeline to {}", path.as_ref().display());
        Ok(())
    }

    /// Replaces this pipeline with the one stored at `path`; on any failure
    /// the pipeline is left empty.
    pub fn load_from_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let loaded = read_text_file(path).and_then(|text| Self::from_text(&text));
        match loaded {
            Ok(pipeline) => {
                *self = pipeline;
                log::info!("Loaded pipeline from {}", path.display());
                Ok(())
            }
            Err(err) => {
                self.clear_all();
                let err = err.context(format!("Failed to load pipeline from {}", path.display()));
                self.last_error = Some(format!("{:#}", err));
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ClassificationData;
    use crate::models::Knn;
    use crate::postprocessing::ClassLabelFilter;
    use crate::preprocessing::DeadZone;

    fn trained_pipeline() -> GestureRecognitionPipeline {
        let mut data = ClassificationData::new(2);
        for i in 0..6 {
            let x = i as f64 * 0.1;
            data.add_sample(1, vec![x, x]).unwrap();
            data.add_sample(2, vec![5.0 + x, 5.0 - x]).unwrap();
        }
        let mut p = GestureRecognitionPipeline::new();
        p.add_pre_processing(Box::new(DeadZone::new(-0.05, 0.05, 2).unwrap()), None)
            .unwrap();
        p.set_classifier(Box::new(Knn::new(3).unwrap()));
        p.add_post_processing(Box::new(ClassLabelFilter::new(1, 3).unwrap()), None)
            .unwrap();
        p.train(&data).unwrap();
        p
    }

    #[test]
    fn reloaded_pipeline_predicts_the_same() {
        let mut original = trained_pipeline();
        let mut reloaded = GestureRecognitionPipeline::from_text(&original.to_text().unwrap()).unwrap();
        assert!(reloaded.is_trained());
        assert_eq!(reloaded.input_vector_dimensions(), 2);
        for x in [[0.2, 0.1], [5.3, 4.9]] {
            original.predict(&x).unwrap();
            reloaded.predict(&x).unwrap();
            assert_eq!(original.predicted_class_label(), reloaded.predicted_class_label());
        }
    }

    #[test]
    fn unknown_module_tag_fails() {
        let text = trained_pipeline().to_text().unwrap().replacen("DeadZone", "Butterworth", 1);
        let err = GestureRecognitionPipeline::from_text(&text).unwrap_err();
        assert!(matches!(crate::error::error_kind(&err), Some(GestureError::Configuration(_))));
    }

    #[test]
    fn failed_file_load_clears_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.txt");
        let text = trained_pipeline().to_text().unwrap().replacen("NumInputDimensions:", "NumInputDimension:", 1);
        std::fs::write(&path, text).unwrap();

        let mut p = trained_pipeline();
        assert!(p.load_from_file(&path).is_err());
        assert!(!p.is_trained());
        assert!(p.pre_processing().is_empty());
        assert!(p.classifier().is_none());
        assert!(p.last_error().is_some());
    }
}
