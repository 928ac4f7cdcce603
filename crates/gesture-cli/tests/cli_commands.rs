use std::path::Path;

use gesture_cli::commands::import::{run_import, ImportArgs};
use gesture_cli::commands::info::run_info;
use gesture_cli::commands::test::{format_report, run_test, TestArgs, TestReport};
use gesture_cli::commands::train::{run_training, TrainArgs};

fn write_csv(path: &Path) {
    let mut rows = vec!["label,x,y".to_string()];
    for i in 0..10 {
        let t = i as f64 * 0.05;
        rows.push(format!("1,{},{}", t, 0.1 - t));
        rows.push(format!("2,{},{}", 3.0 + t, 3.0));
    }
    std::fs::write(path, rows.join("\n")).unwrap();
}

// ---------------------------------------------------------------------------
// import -> train -> test

#[test]
fn imported_table_trains_and_tests_a_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("gestures.csv");
    let dataset = dir.path().join("gestures.txt");
    let config = dir.path().join("pipeline.json");
    let pipeline = dir.path().join("pipeline.txt");
    let report = dir.path().join("report.json");
    write_csv(&csv);

    let data = run_import(&ImportArgs {
        input: csv,
        output: dataset.clone(),
        label_column: 0,
        has_headers: true,
        name: Some("swipes".to_string()),
    })
    .unwrap();
    assert_eq!(data.num_samples(), 20);
    assert_eq!(data.num_dimensions(), 2);

    std::fs::write(
        &config,
        r#"{"classifier": {"MinDist": {"num_clusters": 2, "seed": 3}}}"#,
    )
    .unwrap();
    let summary = run_training(&TrainArgs {
        config,
        data: dataset.clone(),
        output: pipeline.clone(),
        kfold: Some(4),
        stratified: true,
    })
    .unwrap();
    assert_eq!(summary.num_samples, 20);
    assert!(summary.cross_validation_accuracy.unwrap() > 95.0);
    assert!(pipeline.exists());

    let result = run_test(&TestArgs {
        pipeline,
        data: dataset.clone(),
        report: Some(report.clone()),
    })
    .unwrap();
    let TestReport::Classification(metrics) = &result else {
        panic!("expected a classification report");
    };
    assert_eq!(metrics.accuracy, 100.0);
    assert!(format_report(&result).contains("Accuracy: 100.00%"));

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(json["accuracy"], 100.0);

    let info = run_info(&dataset).unwrap();
    assert!(info.contains("Name: swipes"));
    assert!(info.contains("Classes: 2"));
}

// ---------------------------------------------------------------------------
// Failures

#[test]
fn import_rejects_unknown_extensions() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("table.txt");
    std::fs::write(&input, "1,2,3").unwrap();
    let err = run_import(&ImportArgs {
        input,
        output: dir.path().join("out.txt"),
        label_column: 0,
        has_headers: false,
        name: None,
    })
    .unwrap_err();
    assert!(err.to_string().contains(".tsv or .csv"));
}

#[test]
fn training_with_a_missing_config_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_training(&TrainArgs {
        config: dir.path().join("missing.json"),
        data: dir.path().join("missing.txt"),
        output: dir.path().join("out.txt"),
        kfold: None,
        stratified: false,
    })
    .unwrap_err();
    assert!(format!("{:#}", err).contains("missing.json"));
}
