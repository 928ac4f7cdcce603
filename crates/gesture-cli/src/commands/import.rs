use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::ArgMatches;

use gesture_classifiers::data::ClassificationData;
use gesture_classifiers::io::{classification_data_from_table, read_delimited};

use crate::util::validate_tsv_or_csv_file;

#[derive(Debug, Clone)]
pub struct ImportArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub label_column: usize,
    pub has_headers: bool,
    pub name: Option<String>,
}

impl ImportArgs {
    pub fn from_arguments(matches: &ArgMatches) -> Result<Self> {
        Ok(Self {
            input: matches
                .get_one::<PathBuf>("input")
                .cloned()
                .context("Missing required argument --input")?,
            output: matches
                .get_one::<PathBuf>("output")
                .cloned()
                .context("Missing required argument --output")?,
            label_column: matches.get_one::<usize>("label_column").copied().unwrap_or(0),
            has_headers: matches.get_flag("has_headers"),
            name: matches.get_one::<String>("name").cloned(),
        })
    }
}

/// Converts a CSV/TSV table into a classification dataset file.
pub fn run_import(args: &ImportArgs) -> Result<ClassificationData> {
    let delimiter = validate_tsv_or_csv_file(&args.input)?;
    let table = read_delimited(&args.input, delimiter, args.has_headers)?;
    let mut data = classification_data_from_table(&table, args.label_column)
        .with_context(|| format!("Failed to convert {}", args.input.display()))?;
    if let Some(name) = &args.name {
        data.set_dataset_name(name)?;
    }
    data.save_to_file(&args.output)?;
    log::info!(
        "Imported {} samples ({} classes) into {}",
        data.num_samples(),
        data.num_classes(),
        args.output.display()
    );
    Ok(data)
}
