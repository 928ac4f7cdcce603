use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::HmmModelType;
use crate::postprocessing::TimeoutFilterMode;

/// Classifier settings shared by every classifier type.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ClassifierConfig {
    #[serde(default)]
    pub use_scaling: bool,
    #[serde(default)]
    pub use_null_rejection: bool,
    /// Rejection strictness; the classifier's own default when absent.
    #[serde(default)]
    pub null_rejection_coeff: Option<f64>,

    #[serde(flatten)]
    pub model_type: ClassifierType,
}

/// Supported classifiers and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ClassifierType {
    HMM {
        num_states: usize,
        num_symbols: usize,
        model_type: HmmModelType,
        delta: usize,
        max_num_epochs: usize,
        min_change: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
    DTW {
        z_normalise: bool,
        offset_using_first_sample: bool,
        constrain_warping_path: bool,
        radius: f64,
    },
    MinDist {
        num_clusters: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
    KNN {
        k: usize,
        search_for_best_k: bool,
        min_k: usize,
        max_k: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
    GMM {
        num_mixture_models: usize,
        max_num_iterations: usize,
        min_change: f64,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for ClassifierType {
    fn default() -> Self {
        ClassifierType::HMM {
            num_states: 5,
            num_symbols: 10,
            model_type: HmmModelType::LeftRight,
            delta: 1,
            max_num_epochs: 100,
            min_change: 1.0e-5,
            seed: None,
        }
    }
}

impl FromStr for ClassifierType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hmm" => Ok(ClassifierType::default()),
            "dtw" => Ok(ClassifierType::DTW {
                z_normalise: false,
                offset_using_first_sample: false,
                constrain_warping_path: true,
                radius: 0.2,
            }),
            "mindist" => Ok(ClassifierType::MinDist {
                num_clusters: 10,
                seed: None,
            }),
            "knn" => Ok(ClassifierType::KNN {
                k: 10,
                search_for_best_k: false,
                min_k: 1,
                max_k: 10,
                seed: None,
            }),
            "gmm" => Ok(ClassifierType::GMM {
                num_mixture_models: 2,
                max_num_iterations: 100,
                min_change: 1.0e-5,
                seed: None,
            }),
            _ => Err(format!("Unknown classifier type: {}. Expected one of hmm, dtw, mindist, knn, gmm", s)),
        }
    }
}

impl ClassifierConfig {
    pub fn new(model_type: ClassifierType) -> Self {
        Self {
            model_type,
            ..Self::default()
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RegressorConfig {
    #[serde(default = "enabled")]
    pub use_scaling: bool,

    #[serde(flatten)]
    pub model_type: RegressorType,
}

fn enabled() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum RegressorType {
    LinearRegression {
        learning_rate: f64,
        max_num_epochs: usize,
        min_change: f64,
        num_restarts: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for RegressorType {
    fn default() -> Self {
        RegressorType::LinearRegression {
            learning_rate: 0.01,
            max_num_epochs: 500,
            min_change: 1.0e-5,
            num_restarts: 1,
            seed: None,
        }
    }
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            use_scaling: true,
            model_type: RegressorType::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum PreProcessingConfig {
    MovingAverageFilter { filter_size: usize, num_dimensions: usize },
    DoubleMovingAverageFilter { filter_size: usize, num_dimensions: usize },
    DeadZone { lower_limit: f64, upper_limit: f64, num_dimensions: usize },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum FeatureExtractionConfig {
    KMeansQuantizer {
        num_clusters: usize,
        num_dimensions: usize,
        #[serde(default)]
        seed: Option<u64>,
    },
    MovementIndex { buffer_length: usize, num_dimensions: usize },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum PostProcessingConfig {
    ClassLabelFilter { minimum_count: usize, buffer_size: usize },
    ClassLabelChangeFilter,
    ClassLabelTimeoutFilter { timeout_ms: u64, mode: TimeoutFilterMode },
}

/// A whole pipeline: ordered stages plus exactly one classifier or regressor.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub pre_processing: Vec<PreProcessingConfig>,
    pub feature_extraction: Vec<FeatureExtractionConfig>,
    pub classifier: Option<ClassifierConfig>,
    pub regressor: Option<RegressorConfig>,
    pub post_processing: Vec<PostProcessingConfig>,
}

impl PipelineConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_tags_parse_case_insensitively() {
        assert!(matches!("KNN".parse::<ClassifierType>(), Ok(ClassifierType::KNN { k: 10, .. })));
        assert!("svm".parse::<ClassifierType>().is_err());
    }

    #[test]
    fn pipeline_config_reads_json() {
        let json = r#"{
            "pre_processing": [{"MovingAverageFilter": {"filter_size": 3, "num_dimensions": 2}}],
            "feature_extraction": [{"KMeansQuantizer": {"num_clusters": 8, "num_dimensions": 2, "seed": 1}}],
            "classifier": {
                "use_null_rejection": true,
                "HMM": {"num_states": 4, "num_symbols": 8, "model_type": "left_right",
                        "delta": 1, "max_num_epochs": 50, "min_change": 0.001}
            },
            "post_processing": ["ClassLabelChangeFilter"]
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pre_processing.len(), 1);
        let classifier = config.classifier.unwrap();
        assert!(classifier.use_null_rejection);
        assert!(matches!(classifier.model_type, ClassifierType::HMM { num_states: 4, seed: None, .. }));
        assert!(config.regressor.is_none());
        assert_eq!(config.post_processing, vec![PostProcessingConfig::ClassLabelChangeFilter]);
    }
}
