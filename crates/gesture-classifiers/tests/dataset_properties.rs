use std::collections::BTreeSet;

use gesture_classifiers::data::{ClassificationData, RegressionData, TimeSeriesClassificationData};
use gesture_classifiers::math::Array2;
use gesture_classifiers::error::{error_kind, GestureError};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// `per_class` samples for each label; the first value of every sample is a
/// unique id so samples can be tracked through splits.
fn tagged_data(labels: &[u32], per_class: usize) -> ClassificationData {
    let mut data = ClassificationData::new(2);
    let mut id = 0.0;
    for &label in labels {
        for _ in 0..per_class {
            data.add_sample(label, vec![id, label as f64]).unwrap();
            id += 1.0;
        }
    }
    data
}

fn ids(data: &ClassificationData) -> Vec<u64> {
    data.iter().map(|s| s.data[0] as u64).collect()
}

// ---------------------------------------------------------------------------
// Partitioning

#[test]
fn stratified_partition_keeps_class_proportions() {
    let mut data = tagged_data(&[1, 2], 10);
    let test = data.partition(80, true).unwrap();

    assert_eq!(data.class_data(1).num_samples(), 8);
    assert_eq!(data.class_data(2).num_samples(), 8);
    assert_eq!(test.class_data(1).num_samples(), 2);
    assert_eq!(test.class_data(2).num_samples(), 2);
}

#[test]
fn partition_conserves_every_sample() {
    let mut rng = StdRng::seed_from_u64(42);
    for percent in [0, 25, 50, 73, 100] {
        for stratified in [false, true] {
            let mut data = tagged_data(&[1, 2, 3], 7);
            let test = data.partition_with_rng(percent, stratified, &mut rng).unwrap();
            assert_eq!(data.num_samples() + test.num_samples(), 21);

            let mut seen: Vec<u64> = ids(&data);
            seen.extend(ids(&test));
            seen.sort_unstable();
            assert_eq!(seen, (0..21).collect::<Vec<u64>>());
        }
    }
}

#[test]
fn partition_rejects_a_percentage_over_100() {
    let mut data = tagged_data(&[1], 4);
    let err = data.partition(120, false).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Configuration(_))));
    assert_eq!(data.num_samples(), 4);
}

// ---------------------------------------------------------------------------
// K-fold cross-validation

#[test]
fn test_folds_cover_the_dataset_exactly_once() {
    let mut rng = StdRng::seed_from_u64(7);
    for k in 2..=5 {
        for stratified in [false, true] {
            let mut data = tagged_data(&[1, 2], 6);
            data.split_into_k_folds_with_rng(k, stratified, &mut rng).unwrap();

            let mut covered = Vec::new();
            for fold in 0..k {
                let test: BTreeSet<u64> = ids(&data.test_fold_data(fold).unwrap()).into_iter().collect();
                let train: BTreeSet<u64> = ids(&data.training_fold_data(fold).unwrap()).into_iter().collect();
                assert!(test.is_disjoint(&train));
                assert_eq!(test.len() + train.len(), 12);
                covered.extend(test);
            }
            covered.sort_unstable();
            assert_eq!(covered, (0..12).collect::<Vec<u64>>());
        }
    }
}

#[test]
fn invalid_fold_requests_are_rejected() {
    let mut data = tagged_data(&[1, 2], 3);
    assert!(data.test_fold_data(0).is_err());

    let err = data.split_into_k_folds(1, false).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Configuration(_))));
    let err = data.split_into_k_folds(7, false).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Precondition(_))));
    let err = data.split_into_k_folds(4, true).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Precondition(_))));

    data.split_into_k_folds(3, true).unwrap();
    assert!(data.test_fold_data(3).is_err());
}

#[test]
fn regression_folds_cover_the_dataset() {
    let mut data = RegressionData::new(1, 1);
    for i in 0..10 {
        data.add_sample(vec![i as f64], vec![0.0]).unwrap();
    }
    data.split_into_k_folds(3).unwrap();
    let mut covered: Vec<u64> = (0..3)
        .flat_map(|f| data.test_fold_data(f).unwrap().samples().iter().map(|s| s.input[0] as u64).collect::<Vec<_>>())
        .collect();
    covered.sort_unstable();
    assert_eq!(covered, (0..10).collect::<Vec<u64>>());
}

// ---------------------------------------------------------------------------
// Scaling and labels

#[test]
fn scaling_round_trips_to_the_original_ranges() {
    let mut data = ClassificationData::new(3);
    data.add_sample(1, vec![-4.0, 10.0, 0.5]).unwrap();
    data.add_sample(1, vec![2.0, 30.0, 0.25]).unwrap();
    data.add_sample(2, vec![6.0, 20.0, 1.0]).unwrap();
    let original = data.clone();
    let ranges = data.ranges();

    data.scale(-1.0, 1.0).unwrap();
    for r in data.ranges() {
        assert!((r.min + 1.0).abs() < 1e-12 && (r.max - 1.0).abs() < 1e-12);
    }
    let scaled_ranges = data.ranges();
    data.rescale(&scaled_ranges, &ranges).unwrap();

    for (a, b) in data.iter().zip(original.iter()) {
        for (x, y) in a.data.iter().zip(&b.data) {
            assert!((x - y).abs() < 1e-9);
        }
    }
}

#[test]
fn null_label_needs_explicit_opt_in() {
    let mut data = ClassificationData::new(1);
    let err = data.add_sample(0, vec![1.0]).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Data(_))));
    assert!(data.is_empty());

    data.set_allow_null_gesture_class(true);
    data.add_sample(0, vec![1.0]).unwrap();
    assert_eq!(data.class_labels(), vec![0]);
}

#[test]
fn dataset_file_round_trip_keeps_labels_and_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.txt");
    let mut data = tagged_data(&[3, 5], 2);
    data.set_dataset_name("swipes").unwrap();
    data.save_to_file(&path).unwrap();

    let mut loaded = ClassificationData::new(0);
    loaded.load_from_file(&path).unwrap();
    assert_eq!(loaded.dataset_name(), "swipes");
    assert_eq!(loaded.class_labels(), vec![3, 5]);
    assert_eq!(ids(&loaded), ids(&data));
}

#[test]
fn oversized_counts_in_a_dataset_file_fail_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("series.txt");
    let mut series = TimeSeriesClassificationData::new(1);
    series
        .add_sample(1, Array2::from_shape_vec((3, 1), vec![0.1, 0.2, 0.3]).unwrap())
        .unwrap();
    let text = series.to_text().replacen("TimeSeriesLength: 3", "TimeSeriesLength: 18446744073709551615", 1);
    std::fs::write(&path, text).unwrap();

    let mut loaded = series.clone();
    let err = loaded.load_from_file(&path).unwrap_err();
    assert!(matches!(error_kind(&err), Some(GestureError::Format { .. })));
    assert!(loaded.is_empty());

    let text = tagged_data(&[1, 2], 2)
        .to_text()
        .replacen("NumberOfClasses: 2", "NumberOfClasses: 18446744073709551615", 1);
    assert!(ClassificationData::from_text(&text).is_err());
}
