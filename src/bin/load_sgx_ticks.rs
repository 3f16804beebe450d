use std::{error::Error, path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;
use log::{error, info};
use sgx_ticks::{
    config::{load_env_file, ConfigError, Settings},
    etl::{
        pipeline::{LoadError, LoadPipeline, LoadSummary},
        reader::CsvTableReader,
        writer::open_writer,
    },
    logging::{init_logging, FacadeLog},
    storage::open_store,
};
use tabled::{builder::Builder, settings::Style};

/// Load the staged SGX tick files into the tick table.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Glob of the staged objects to load, `*` also matches `/`
    #[arg(long, default_value = "sgx-data/*.csv")]
    gcs_path: String,

    /// Target table
    #[arg(long, default_value = "sgx_tick_data")]
    table: String,

    /// Rows per insert
    #[arg(long, default_value_t = 100_000, value_parser = clap::value_parser!(u64).range(1..))]
    batch_size: u64,

    /// Create the table if it doesn't exist
    #[arg(long)]
    create_table: bool,

    /// Append the log to this file too
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load_settings(env: &str) -> Result<(Settings, Option<PathBuf>), ConfigError> {
    let env_file = load_env_file(env)?;
    Ok((Settings::from_env()?, env_file))
}

fn ascii_table(summary: &LoadSummary) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["", "Loaded", "Failed", "Rejected"]);
    builder.push_record(vec![
        "Files".to_string(),
        summary.files_read.to_string(),
        summary.files_failed.to_string(),
        String::new(),
    ]);
    builder.push_record(vec![
        "Batches".to_string(),
        summary.batches_loaded.to_string(),
        summary.batches_failed.to_string(),
        String::new(),
    ]);
    builder.push_record(vec![
        "Rows".to_string(),
        summary.rows_loaded.to_string(),
        summary.rows_failed.to_string(),
        summary.rows_rejected.to_string(),
    ]);
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}

fn run(args: &Args, settings: &Settings) -> Result<LoadSummary, Box<dyn Error>> {
    let log = Arc::new(FacadeLog::new("load_sgx_ticks"));
    let store = open_store(&settings.storage)?;
    let writer = open_writer(&settings.sink, &settings.insert_retry)?;
    let pipeline = LoadPipeline::new(
        store.clone(),
        Box::new(CsvTableReader::new(store)),
        writer,
        settings.insert_retry.clone(),
        log,
    );
    if args.create_table {
        pipeline.prepare(&args.table)?;
    }
    let batch_size = usize::try_from(args.batch_size).map_err(|_| LoadError::InvalidBatchSize)?;
    Ok(pipeline.run(&args.gcs_path, &args.table, batch_size)?)
}

fn main() -> ExitCode {
    let args = Args::parse();

    let (settings, env_file) = match load_settings(&args.env) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(2);
        }
    };
    let log_file = args.log_file.clone().or_else(|| settings.log_file.clone());
    if let Err(e) = init_logging(log_file.as_deref()) {
        eprintln!("Cannot set up logging: {}", e);
        return ExitCode::from(2);
    }
    if let Some(path) = env_file {
        info!("Loaded {}", path.display());
    }

    match run(&args, &settings) {
        Ok(summary) => {
            println!("{}", ascii_table(&summary));
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}
