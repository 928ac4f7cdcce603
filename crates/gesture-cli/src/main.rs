use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use gesture_cli::commands::import::{run_import, ImportArgs};
use gesture_cli::commands::info::run_info;
use gesture_cli::commands::test::{format_report, run_test, TestArgs};
use gesture_cli::commands::train::{run_training, TrainArgs};

fn path_arg(name: &'static str, long: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(long)
        .help(help)
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .value_hint(ValueHint::FilePath)
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("GESTURE_LOG", "error,gesture=info"))
        .init();

    let matches = Command::new("gesture")
        .version(clap::crate_version!())
        .about("Gesture recognition toolkit: train, test and inspect recognition pipelines")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("train")
                .about("Train a pipeline described by a JSON configuration and save it")
                .arg(path_arg("config", "config", "Path to the pipeline JSON configuration").short('c'))
                .arg(path_arg("data", "data", "Path to the training dataset file").short('d'))
                .arg(path_arg("output", "output", "File the trained pipeline will be written to").short('o'))
                .arg(
                    Arg::new("kfold")
                        .short('k')
                        .long("kfold")
                        .help("Run K-fold cross-validation (K >= 2) and keep the last fold's model")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    Arg::new("stratified")
                        .long("stratified")
                        .help("Keep class proportions in every fold")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("test")
                .about("Evaluate a saved pipeline on a labelled dataset")
                .arg(path_arg("pipeline", "pipeline", "Path to a saved pipeline file").short('p'))
                .arg(path_arg("data", "data", "Path to the test dataset file").short('d'))
                .arg(
                    Arg::new("report")
                        .short('r')
                        .long("report")
                        .help("Write the full test report as JSON to this file")
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                ),
        )
        .subcommand(
            Command::new("info")
                .about("Print statistics of a dataset file")
                .arg(path_arg("data", "data", "Path to the dataset file").short('d')),
        )
        .subcommand(
            Command::new("import")
                .about("Convert a CSV/TSV table into a classification dataset file")
                .arg(path_arg("input", "input", "Path to the .csv or .tsv input").short('i'))
                .arg(path_arg("output", "output", "Dataset file to write").short('o'))
                .arg(
                    Arg::new("label_column")
                        .short('l')
                        .long("label-column")
                        .help("Zero-based column holding the class label")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("has_headers")
                        .long("has-headers")
                        .help("Skip the first row of the table")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .help("Dataset name (no whitespace)")
                        .value_parser(clap::builder::NonEmptyStringValueParser::new()),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("train", sub_m)) => handle_train(sub_m),
        Some(("test", sub_m)) => handle_test(sub_m),
        Some(("info", sub_m)) => handle_info(sub_m),
        Some(("import", sub_m)) => handle_import(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

fn handle_train(matches: &ArgMatches) -> Result<()> {
    let args = TrainArgs::from_arguments(matches)?;
    log::info!("[gesture::train] Training from config: {:?}", args.config);
    match run_training(&args) {
        Ok(summary) => {
            if let Some(accuracy) = summary.cross_validation_accuracy {
                println!("Cross-validation accuracy: {:.2}%", accuracy);
            }
            if let Some(rms) = summary.cross_validation_rms_error {
                println!("Cross-validation RMS error: {:.6}", rms);
            }
            println!(
                "Trained on {} samples in {:.1} ms; pipeline written to {}",
                summary.num_samples,
                summary.training_time_ms,
                args.output.display()
            );
            Ok(())
        }
        Err(e) => {
            log::error!("Training failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_test(matches: &ArgMatches) -> Result<()> {
    let args = TestArgs::from_arguments(matches)?;
    match run_test(&args) {
        Ok(report) => {
            print!("{}", format_report(&report));
            Ok(())
        }
        Err(e) => {
            log::error!("Testing failed: {:#}", e);
            std::process::exit(1)
        }
    }
}

fn handle_info(matches: &ArgMatches) -> Result<()> {
    let Some(path) = matches.get_one::<PathBuf>("data") else {
        anyhow::bail!("Missing required argument --data");
    };
    print!("{}", run_info(path)?);
    Ok(())
}

fn handle_import(matches: &ArgMatches) -> Result<()> {
    let args = ImportArgs::from_arguments(matches)?;
    match run_import(&args) {
        Ok(data) => {
            println!(
                "Imported {} samples with {} dimensions into {}",
                data.num_samples(),
                data.num_dimensions(),
                args.output.display()
            );
            Ok(())
        }
        Err(e) => {
            log::error!("Import failed: {:#}", e);
            std::process::exit(1)
        }
    }
}
