//! Construction of boxed stages and models from type tags (used when loading
//! pipeline files) or from configuration values.
use anyhow::{Context, Result};

use crate::config::{
    ClassifierConfig, ClassifierType, FeatureExtractionConfig, PostProcessingConfig, PreProcessingConfig,
    RegressorConfig, RegressorType,
};
use crate::error::GestureError;
use crate::feature_extraction::{FeatureExtraction, KMeansQuantizer, MovementIndex};
use crate::models::{Classifier, Dtw, Gmm, Hmm, Knn, MinDist};
use crate::postprocessing::{ClassLabelChangeFilter, ClassLabelFilter, ClassLabelTimeoutFilter, PostProcessing};
use crate::preprocessing::{DeadZone, DoubleMovingAverageFilter, MovingAverageFilter, PreProcessing};
use crate::regression::{LinearRegression, Regressor};

pub const CLASSIFIER_TAGS: &[&str] = &["HMM", "DTW", "MinDist", "KNN", "GMM"];
pub const REGRESSOR_TAGS: &[&str] = &["LinearRegression"];
pub const PRE_PROCESSING_TAGS: &[&str] = &["MovingAverageFilter", "DoubleMovingAverageFilter", "DeadZone"];
pub const FEATURE_EXTRACTION_TAGS: &[&str] = &["KMeansQuantizer", "MovementIndex"];
pub const POST_PROCESSING_TAGS: &[&str] = &["ClassLabelFilter", "ClassLabelChangeFilter", "ClassLabelTimeoutFilter"];

fn unknown(role: &str, tag: &str) -> anyhow::Error {
    GestureError::Configuration(format!("unknown {} type: {}", role, tag)).into()
}

/// Default instance for a classifier tag.
pub fn create_classifier(tag: &str) -> Result<Box<dyn Classifier>> {
    Ok(match tag {
        "HMM" => Box::new(Hmm::default()),
        "DTW" => Box::new(Dtw::default()),
        "MinDist" => Box::new(MinDist::default()),
        "KNN" => Box::new(Knn::default()),
        "GMM" => Box::new(Gmm::default()),
        _ => return Err(unknown("classifier", tag)),
    })
}

pub fn create_regressor(tag: &str) -> Result<Box<dyn Regressor>> {
    Ok(match tag {
        "LinearRegression" => Box::new(LinearRegression::default()),
        _ => return Err(unknown("regressor", tag)),
    })
}

pub fn create_pre_processing(tag: &str) -> Result<Box<dyn PreProcessing>> {
    Ok(match tag {
        "MovingAverageFilter" => Box::new(MovingAverageFilter::default()),
        "DoubleMovingAverageFilter" => Box::new(DoubleMovingAverageFilter::default()),
        "DeadZone" => Box::new(DeadZone::default()),
        _ => return Err(unknown("pre-processing", tag)),
    })
}

pub fn create_feature_extraction(tag: &str) -> Result<Box<dyn FeatureExtraction>> {
    Ok(match tag {
        "KMeansQuantizer" => Box::new(KMeansQuantizer::default()),
        "MovementIndex" => Box::new(MovementIndex::default()),
        _ => return Err(unknown("feature extraction", tag)),
    })
}

pub fn create_post_processing(tag: &str) -> Result<Box<dyn PostProcessing>> {
    Ok(match tag {
        "ClassLabelFilter" => Box::new(ClassLabelFilter::default()),
        "ClassLabelChangeFilter" => Box::new(ClassLabelChangeFilter::default()),
        "ClassLabelTimeoutFilter" => Box::new(ClassLabelTimeoutFilter::default()),
        _ => return Err(unknown("post-processing", tag)),
    })
}

/// Build a boxed classifier from a `ClassifierConfig`.
pub fn build_classifier(config: &ClassifierConfig) -> Result<Box<dyn Classifier>> {
    let mut classifier: Box<dyn Classifier> = match config.model_type {
        ClassifierType::HMM {
            num_states,
            num_symbols,
            model_type,
            delta,
            max_num_epochs,
            min_change,
            seed,
        } => {
            let mut hmm = Hmm::new(num_states, num_symbols, model_type, delta)?.with_seed(seed);
            hmm.set_training_limits(max_num_epochs, min_change)?;
            Box::new(hmm)
        }
        ClassifierType::DTW {
            z_normalise,
            offset_using_first_sample,
            constrain_warping_path,
            radius,
        } => Box::new(Dtw::new(z_normalise, offset_using_first_sample, constrain_warping_path, radius)?),
        ClassifierType::MinDist { num_clusters, seed } => Box::new(MinDist::new(num_clusters)?.with_seed(seed)),
        ClassifierType::KNN {
            k,
            search_for_best_k,
            min_k,
            max_k,
            seed,
        } => {
            let mut knn = Knn::new(k)?.with_seed(seed);
            knn.set_best_k_search(search_for_best_k, min_k, max_k)?;
            Box::new(knn)
        }
        ClassifierType::GMM {
            num_mixture_models,
            max_num_iterations,
            min_change,
            seed,
        } => Box::new(Gmm::new(num_mixture_models, max_num_iterations, min_change)?.with_seed(seed)),
    };
    classifier.enable_scaling(config.use_scaling);
    classifier.enable_null_rejection(config.use_null_rejection);
    if let Some(coeff) = config.null_rejection_coeff {
        classifier.set_null_rejection_coeff(coeff)?;
    }
    Ok(classifier)
}

pub fn build_regressor(config: &RegressorConfig) -> Result<Box<dyn Regressor>> {
    let mut regressor: Box<dyn Regressor> = match config.model_type {
        RegressorType::LinearRegression {
            learning_rate,
            max_num_epochs,
            min_change,
            num_restarts,
            seed,
        } => Box::new(LinearRegression::new(learning_rate, max_num_epochs, min_change, num_restarts)?.with_seed(seed)),
    };
    regressor.enable_scaling(config.use_scaling);
    Ok(regressor)
}

pub fn build_pre_processing(config: &PreProcessingConfig) -> Result<Box<dyn PreProcessing>> {
    Ok(match *config {
        PreProcessingConfig::MovingAverageFilter {
            filter_size,
            num_dimensions,
        } => Box::new(MovingAverageFilter::new(filter_size, num_dimensions)?),
        PreProcessingConfig::DoubleMovingAverageFilter {
            filter_size,
            num_dimensions,
        } => Box::new(DoubleMovingAverageFilter::new(filter_size, num_dimensions)?),
        PreProcessingConfig::DeadZone {
            lower_limit,
            upper_limit,
            num_dimensions,
        } => Box::new(DeadZone::new(lower_limit, upper_limit, num_dimensions)?),
    })
}

pub fn build_feature_extraction(config: &FeatureExtractionConfig) -> Result<Box<dyn FeatureExtraction>> {
    Ok(match *config {
        FeatureExtractionConfig::KMeansQuantizer {
            num_clusters,
            num_dimensions,
            seed,
        } => Box::new(KMeansQuantizer::new(num_clusters, num_dimensions)?.with_seed(seed)),
        FeatureExtractionConfig::MovementIndex {
            buffer_length,
            num_dimensions,
        } => Box::new(MovementIndex::new(buffer_length, num_dimensions)?),
    })
}

pub fn build_post_processing(config: &PostProcessingConfig) -> Result<Box<dyn PostProcessing>> {
    Ok(match *config {
        PostProcessingConfig::ClassLabelFilter {
            minimum_count,
            buffer_size,
        } => Box::new(ClassLabelFilter::new(minimum_count, buffer_size)?),
        PostProcessingConfig::ClassLabelChangeFilter => Box::new(ClassLabelChangeFilter::new()),
        PostProcessingConfig::ClassLabelTimeoutFilter { timeout_ms, mode } => {
            Box::new(ClassLabelTimeoutFilter::new(timeout_ms, mode)?)
        }
    })
}

/// Every registered tag, by role, for listing in tools.
pub fn registered_tags() -> Vec<(&'static str, &'static [&'static str])> {
    vec![
        ("classifier", CLASSIFIER_TAGS),
        ("regressor", REGRESSOR_TAGS),
        ("pre-processing", PRE_PROCESSING_TAGS),
        ("feature extraction", FEATURE_EXTRACTION_TAGS),
        ("post-processing", POST_PROCESSING_TAGS),
    ]
}

/// Builds a stage list, naming the failing entry.
pub(crate) fn build_all<C, T>(configs: &[C], role: &str, build: impl Fn(&C) -> Result<T>) -> Result<Vec<T>> {
    configs
        .iter()
        .enumerate()
        .map(|(i, c)| build(c).with_context(|| format!("Invalid {} stage {}", role, i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_round_trips_through_its_type_name() {
        for tag in CLASSIFIER_TAGS {
            assert_eq!(create_classifier(tag).unwrap().type_name(), *tag);
        }
        for tag in REGRESSOR_TAGS {
            assert_eq!(create_regressor(tag).unwrap().type_name(), *tag);
        }
        for tag in PRE_PROCESSING_TAGS {
            assert_eq!(create_pre_processing(tag).unwrap().type_name(), *tag);
        }
        for tag in FEATURE_EXTRACTION_TAGS {
            assert_eq!(create_feature_extraction(tag).unwrap().type_name(), *tag);
        }
        for tag in POST_PROCESSING_TAGS {
            assert_eq!(create_post_processing(tag).unwrap().type_name(), *tag);
        }
    }

    #[test]
    fn unknown_tag_is_a_configuration_error() {
        let err = create_classifier("SVM").unwrap_err();
        assert!(matches!(crate::error::error_kind(&err), Some(GestureError::Configuration(_))));
    }

    #[test]
    fn config_settings_reach_the_classifier() {
        let mut config = ClassifierConfig::new("knn".parse().unwrap());
        config.use_null_rejection = true;
        config.null_rejection_coeff = Some(1.5);
        let knn = build_classifier(&config).unwrap();
        assert!(knn.null_rejection_enabled());
        assert_eq!(knn.null_rejection_coeff(), 1.5);
    }
}
