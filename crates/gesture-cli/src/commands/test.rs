use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::Serialize;

use gesture_classifiers::pipeline::{GestureRecognitionPipeline, RegressionMetrics, TestMetrics};

use crate::dataset::{load_dataset, Dataset};

#[derive(Debug, Clone)]
pub struct TestArgs {
    pub pipeline: PathBuf,
    pub data: PathBuf,
    /// Optional JSON file receiving the full report.
    pub report: Option<PathBuf>,
}

impl TestArgs {
    pub fn from_arguments(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            pipeline: matches
                .get_one::<PathBuf>("pipeline")
                .cloned()
                .context("Missing required argument --pipeline")?,
            data: matches
                .get_one::<PathBuf>("data")
                .cloned()
                .context("Missing required argument --data")?,
            report: matches.get_one::<PathBuf>("report").cloned(),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TestReport {
    Classification(TestMetrics),
    Regression(RegressionMetrics),
}

pub fn run_test(args: &TestArgs) -> Result<TestReport> {
    let mut pipeline = GestureRecognitionPipeline::new();
    pipeline.load_from_file(&args.pipeline)?;
    let dataset = load_dataset(&args.data)?;

    let report = match &dataset {
        Dataset::Static(d) => TestReport::Classification(pipeline.test(d)?.clone()),
        Dataset::TimeSeries(d) => TestReport::Classification(pipeline.test_timeseries(d)?.clone()),
        Dataset::Regression(d) => TestReport::Regression(pipeline.test_regression(d)?),
    };

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report: {}", path.display()))?;
        log::info!("Wrote test report to {}", path.display());
    }
    Ok(report)
}

/// Human-readable report: accuracy, per-class precision/recall/F-measure and
/// the row-normalised confusion matrix.
pub fn format_report(report: &TestReport) -> String {
    let mut out = String::new();
    match report {
        TestReport::Classification(m) => {
            out.push_str(&format!("Accuracy: {:.2}%\n", m.accuracy));
            out.push_str(&format!("Rejection rate: {:.4}\n", m.rejection_rate()));
            out.push_str("Class\tPrecision\tRecall\tF-measure\n");
            for (i, label) in m.class_labels.iter().enumerate() {
                out.push_str(&format!(
                    "{}\t{:.4}\t{:.4}\t{:.4}\n",
                    label, m.precision[i], m.recall[i], m.f_measure[i]
                ));
            }
            out.push_str("Confusion matrix (rows: true, columns: predicted)\n");
            let header: Vec<String> = m.confusion_labels.iter().map(u32::to_string).collect();
            out.push_str(&format!("\t{}\n", header.join("\t")));
            for (label, row) in m.confusion_labels.iter().zip(m.confusion_matrix.rows()) {
                let cells: Vec<String> = row.iter().map(|v| format!("{:.3}", v)).collect();
                out.push_str(&format!("{}\t{}\n", label, cells.join("\t")));
            }
        }
        TestReport::Regression(m) => {
            out.push_str(&format!("RMS error: {:.6}\n", m.rms_error));
            out.push_str(&format!("SSE: {:.6}\n", m.sse));
        }
    }
    out
}
