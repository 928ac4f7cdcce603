use gesture_classifiers::config::PipelineConfig;
use gesture_classifiers::data::{ClassificationData, RegressionData, TimeSeriesClassificationData, NULL_CLASS_LABEL};
use gesture_classifiers::error::{error_kind, GestureError};
use gesture_classifiers::feature_extraction::{KMeansQuantizer, MovementIndex};
use gesture_classifiers::math::Array2;
use gesture_classifiers::models::{Classifier, Hmm, HmmModelType, Knn, MinDist};
use gesture_classifiers::pipeline::{GestureRecognitionPipeline, PipelineState};
use gesture_classifiers::postprocessing::ClassLabelChangeFilter;
use gesture_classifiers::regression::LinearRegression;

fn blobs(per_class: usize) -> ClassificationData {
    let mut data = ClassificationData::new(2);
    for i in 0..per_class {
        let t = i as f64 / per_class as f64;
        data.add_sample(1, vec![t * 0.5, 0.2 - t * 0.3]).unwrap();
        data.add_sample(2, vec![4.0 + t * 0.5, 4.0 - t * 0.2]).unwrap();
        data.add_sample(3, vec![-4.0 + t * 0.4, 4.0 + t * 0.3]).unwrap();
    }
    data
}

/// Two-dimensional strokes: class 1 moves along x, class 2 along y.
fn strokes() -> TimeSeriesClassificationData {
    let mut data = TimeSeriesClassificationData::new(2);
    for s in 0..6 {
        let jitter = s as f64 * 0.01;
        let along_x: Vec<Vec<f64>> = (0..12).map(|t| vec![t as f64 / 11.0, jitter]).collect();
        let along_y: Vec<Vec<f64>> = (0..12).map(|t| vec![jitter, t as f64 / 11.0]).collect();
        data.add_sample(1, Array2::from_rows(&along_x).unwrap()).unwrap();
        data.add_sample(2, Array2::from_rows(&along_y).unwrap()).unwrap();
    }
    data
}

// ---------------------------------------------------------------------------
// Preconditions

#[test]
fn predicting_with_an_untrained_classifier_fails_cleanly() {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.set_classifier(Box::new(Knn::default()));
    assert_eq!(pipeline.state(), PipelineState::Initialized);

    let err = pipeline.predict(&[0.1, 0.2]).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Precondition(_))));
    assert!(pipeline.last_error().unwrap().contains("not been trained"));
    assert_eq!(pipeline.predicted_class_label(), NULL_CLASS_LABEL);
}

#[test]
fn inputs_of_the_wrong_size_are_rejected_after_training() {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.set_classifier(Box::new(MinDist::new(2).unwrap().with_seed(Some(1))));
    pipeline.train(&blobs(8)).unwrap();
    let err = pipeline.predict(&[1.0, 2.0, 3.0]).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Precondition(_))));
}

#[test]
fn unknown_test_label_is_a_data_error() {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.set_classifier(Box::new(Knn::new(3).unwrap()));
    pipeline.train(&blobs(6)).unwrap();

    let mut test = ClassificationData::new(2);
    test.add_sample(9, vec![0.0, 0.0]).unwrap();
    let err = pipeline.test(&test).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Data(_))));
}

// ---------------------------------------------------------------------------
// Classification

#[test]
fn static_pipeline_classifies_held_out_blobs() {
    let mut train = blobs(20);
    let test = train.partition(75, true).unwrap();

    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.set_classifier(Box::new(Knn::new(3).unwrap()));
    pipeline.train(&train).unwrap();
    let metrics = pipeline.test(&test).unwrap();

    assert_eq!(metrics.accuracy, 100.0);
    assert_eq!(metrics.class_labels, vec![1, 2, 3]);
    assert!(metrics.confusion_matrix.is_row_stochastic(1e-12));
    assert_eq!(metrics.results.len(), test.num_samples());
}

#[test]
fn raising_the_rejection_coefficient_never_rejects_less() {
    let mut classifier = MinDist::new(2).unwrap().with_seed(Some(4));
    classifier.enable_null_rejection(true);
    classifier.train(&blobs(12)).unwrap();

    let probes: Vec<Vec<f64>> = (0..40)
        .map(|i| {
            let r = i as f64 * 0.05;
            vec![r, 0.1 + r * 0.5]
        })
        .collect();

    let mut previous = 0;
    for coeff in [-3.0, -2.0, -1.0, 0.0, 1.0, 2.0, 3.0] {
        classifier.set_null_rejection_coeff(coeff).unwrap();
        let rejected = probes
            .iter()
            .filter(|p| {
                classifier.predict(p).unwrap();
                classifier.predicted_class_label() == NULL_CLASS_LABEL
            })
            .count();
        assert!(rejected >= previous, "coeff {} rejected {} < {}", coeff, rejected, previous);
        previous = rejected;
    }
    assert!(previous > 0);
}

#[test]
fn quantized_strokes_are_recognised_by_hmm() {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline
        .add_feature_extraction(Box::new(KMeansQuantizer::new(6, 2).unwrap().with_seed(Some(3))), None)
        .unwrap();
    pipeline.set_classifier(Box::new(
        Hmm::new(4, 6, HmmModelType::LeftRight, 1).unwrap().with_seed(Some(3)),
    ));

    let data = strokes();
    pipeline.train_timeseries(&data).unwrap();
    assert!(pipeline.is_trained());

    let metrics = pipeline.test_timeseries(&data).unwrap();
    assert!(metrics.accuracy >= 90.0, "accuracy {}", metrics.accuracy);
}

#[test]
fn warm_up_nulls_count_against_recall() {
    // Class 1 holds still, class 2 jitters; the movement index needs five
    // samples before its first output.
    let mut data = ClassificationData::new(2);
    for _ in 0..10 {
        data.add_sample(1, vec![5.0, 5.0]).unwrap();
    }
    for i in 0..10 {
        let v = (i % 2) as f64;
        data.add_sample(2, vec![v, v]).unwrap();
    }

    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline
        .add_feature_extraction(Box::new(MovementIndex::new(5, 2).unwrap()), None)
        .unwrap();
    pipeline.set_classifier(Box::new(Knn::new(1).unwrap()));
    pipeline.train(&data).unwrap();

    let metrics = pipeline.test(&data).unwrap();
    let nulls = metrics
        .results
        .iter()
        .filter(|r| r.predicted_class_label == NULL_CLASS_LABEL)
        .count();
    assert_eq!(nulls, 4);
    assert_eq!(metrics.accuracy, 80.0);
    assert_eq!(metrics.confusion_labels, vec![NULL_CLASS_LABEL, 1, 2]);
    assert!((metrics.class_recall(1).unwrap() - 0.6).abs() < 1e-12);
    assert_eq!(metrics.class_recall(2), Some(1.0));
    assert!((metrics.confusion_matrix[(1, 0)] - 0.4).abs() < 1e-12);
}

#[test]
fn repeated_series_tests_start_from_a_clean_state() {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline
        .add_feature_extraction(Box::new(KMeansQuantizer::new(6, 2).unwrap().with_seed(Some(3))), None)
        .unwrap();
    pipeline.set_classifier(Box::new(
        Hmm::new(4, 6, HmmModelType::LeftRight, 1).unwrap().with_seed(Some(3)),
    ));
    pipeline.add_post_processing(Box::new(ClassLabelChangeFilter::new()), None).unwrap();
    let data = strokes();
    pipeline.train_timeseries(&data).unwrap();

    let mut ones = TimeSeriesClassificationData::new(2);
    for s in data.iter().filter(|s| s.class_label == 1) {
        ones.add_sample(1, s.data.clone()).unwrap();
    }
    let predicted = |p: &mut GestureRecognitionPipeline| -> Vec<u32> {
        let metrics = p.test_timeseries(&ones).unwrap();
        metrics.results.iter().map(|r| r.predicted_class_label).collect()
    };
    let first = predicted(&mut pipeline);
    let second = predicted(&mut pipeline);
    assert_ne!(first[0], NULL_CLASS_LABEL);
    assert_eq!(first, second);
}

#[test]
fn kfold_reports_mean_accuracy_and_keeps_a_trained_model() {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.set_classifier(Box::new(Knn::new(1).unwrap()));
    let accuracy = pipeline.train_kfold(&blobs(10), 5, true).unwrap();

    assert!(accuracy > 95.0);
    assert_eq!(pipeline.cross_validation_accuracy(), Some(accuracy));
    assert!(pipeline.is_trained());
    assert!(pipeline.train_kfold(&blobs(10), 1, true).is_err());
}

// ---------------------------------------------------------------------------
// Regression

#[test]
fn linear_pipeline_fits_a_line() {
    let mut data = RegressionData::new(1, 1);
    for i in 0..21 {
        let x = i as f64 / 20.0;
        data.add_sample(vec![x], vec![2.0 * x + 1.0]).unwrap();
    }
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.set_regressor(Box::new(
        LinearRegression::new(0.1, 2000, 1.0e-12, 1).unwrap().with_seed(Some(8)),
    ));
    assert!(pipeline.is_regression_mode());
    pipeline.train_regression(&data).unwrap();

    let metrics = pipeline.test_regression(&data).unwrap();
    assert!(metrics.rms_error < 0.1, "rms {}", metrics.rms_error);
    pipeline.predict(&[0.5]).unwrap();
    assert!((pipeline.regression_data()[0] - 2.0).abs() < 0.1);
}

// ---------------------------------------------------------------------------
// Configuration and persistence

#[test]
fn pipeline_built_from_json_survives_a_file_round_trip() {
    let json = r#"{
        "pre_processing": [{"DeadZone": {"lower_limit": -0.05, "upper_limit": 0.05, "num_dimensions": 2}}],
        "classifier": {"KNN": {"k": 3, "search_for_best_k": false, "min_k": 1, "max_k": 5}},
        "post_processing": [{"ClassLabelFilter": {"minimum_count": 1, "buffer_size": 2}}]
    }"#;
    let config: PipelineConfig = serde_json::from_str(json).unwrap();
    let mut pipeline = GestureRecognitionPipeline::from_config(&config).unwrap();
    pipeline.train(&blobs(8)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.txt");
    pipeline.save_to_file(&path).unwrap();

    let mut loaded = GestureRecognitionPipeline::new();
    loaded.load_from_file(&path).unwrap();
    assert!(loaded.is_trained());
    assert_eq!(loaded.pre_processing().len(), 1);
    assert_eq!(loaded.post_processing().len(), 1);
    assert_eq!(loaded.classifier().map(|c| c.type_name()), Some("KNN"));

    for probe in [[4.1, 3.9], [4.2, 3.9], [-3.9, 4.1], [-3.8, 4.2]] {
        pipeline.predict(&probe).unwrap();
        loaded.predict(&probe).unwrap();
        assert_eq!(pipeline.predicted_class_label(), loaded.predicted_class_label());
    }
}

#[test]
fn classifier_and_regressor_together_are_rejected() {
    let json = r#"{
        "classifier": {"MinDist": {"num_clusters": 2}},
        "regressor": {"LinearRegression": {"learning_rate": 0.01, "max_num_epochs": 10,
                                           "min_change": 0.0, "num_restarts": 1}}
    }"#;
    let config: PipelineConfig = serde_json::from_str(json).unwrap();
    let err = GestureRecognitionPipeline::from_config(&config).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Configuration(_))));
}
