use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;

use gesture_classifiers::config::PipelineConfig;
use gesture_classifiers::pipeline::GestureRecognitionPipeline;

use crate::dataset::{load_dataset, Dataset};

#[derive(Debug, Clone)]
pub struct TrainArgs {
    pub config: PathBuf,
    pub data: PathBuf,
    pub output: PathBuf,
    /// Run K-fold cross-validation instead of a single fit.
    pub kfold: Option<usize>,
    pub stratified: bool,
}

impl TrainArgs {
    pub fn from_arguments(matches: &ArgMatches) -> Result<Self> {
        let path = |name: &str| -> Result<PathBuf> {
            matches
                .get_one::<PathBuf>(name)
                .cloned()
                .with_context(|| format!("Missing required argument --{}", name))
        };
        Ok(Self {
            config: path("config")?,
            data: path("data")?,
            output: path("output")?,
            kfold: matches.get_one::<usize>("kfold").copied(),
            stratified: matches.get_flag("stratified"),
        })
    }
}

/// Outcome of a training run, printed by the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainSummary {
    pub num_samples: usize,
    pub training_time_ms: f64,
    pub cross_validation_accuracy: Option<f64>,
    pub cross_validation_rms_error: Option<f64>,
}

pub fn run_training(args: &TrainArgs) -> Result<TrainSummary> {
    let config = PipelineConfig::from_json_file(&args.config)?;
    let mut pipeline = GestureRecognitionPipeline::from_config(&config).context("Failed to build the pipeline")?;
    let dataset = load_dataset(&args.data)?;
    log::info!(
        "Training on {} {} samples from {}",
        dataset.num_samples(),
        dataset.kind(),
        args.data.display()
    );

    match (&dataset, args.kfold) {
        (Dataset::Static(d), Some(k)) => {
            pipeline.train_kfold(d, k, args.stratified)?;
        }
        (Dataset::Static(d), None) => pipeline.train(d)?,
        (Dataset::TimeSeries(d), Some(k)) => {
            pipeline.train_timeseries_kfold(d, k, args.stratified)?;
        }
        (Dataset::TimeSeries(d), None) => pipeline.train_timeseries(d)?,
        (Dataset::Regression(d), Some(k)) => {
            pipeline.train_regression_kfold(d, k)?;
        }
        (Dataset::Regression(d), None) => pipeline.train_regression(d)?,
    }

    pipeline.save_to_file(&args.output)?;
    Ok(TrainSummary {
        num_samples: dataset.num_samples(),
        training_time_ms: pipeline.training_time_ms(),
        cross_validation_accuracy: pipeline.cross_validation_accuracy(),
        cross_validation_rms_error: pipeline.cross_validation_rms_error(),
    })
}
