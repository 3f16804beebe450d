use std::{error::Error, path::PathBuf, process::ExitCode, sync::Arc};

use clap::{ArgGroup, Parser};
use jiff::Zoned;
use log::{error, info};
use sgx_ticks::{
    calendar::{DateMode, DateResolver},
    config::{load_env_file, ConfigError, Settings},
    fetch::{
        pipeline::{FetchOptions, FetchPipeline, FetchSummary},
        source::HttpArchiveSource,
    },
    logging::{init_logging, FacadeLog},
    storage::open_store,
};
use tabled::{builder::Builder, settings::Style};

/// Download the SGX derivatives tick archives, unzip them and stage the csv
/// files in object storage.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["date", "range", "today", "auto"])))]
struct Args {
    /// Environment name, e.g., test, prod
    #[arg(short, long, default_value = "prod")]
    env: String,

    /// Download one day
    #[arg(long, value_name = "YYYY-MM-DD")]
    date: Option<String>,

    /// Download every weekday between START and END, inclusive
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    range: Option<Vec<String>>,

    /// Download the last published weekday
    #[arg(long)]
    today: bool,

    /// Download every weekday since the base date
    #[arg(long)]
    auto: bool,

    /// Append the log to this file too
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    fn mode(&self) -> DateMode {
        if let Some(date) = &self.date {
            DateMode::Single(date.clone())
        } else if let Some(range) = &self.range {
            DateMode::Range(range[0].clone(), range[1].clone())
        } else if self.today {
            DateMode::LastWeekday
        } else {
            DateMode::Auto
        }
    }
}

fn load_settings(env: &str) -> Result<(Settings, Option<PathBuf>), ConfigError> {
    let env_file = load_env_file(env)?;
    Ok((Settings::from_env()?, env_file))
}

fn ascii_table(summary: &FetchSummary) -> tabled::Table {
    let mut builder = Builder::new();
    builder.push_record(vec!["Date", "Status", "Details"]);
    for date in &summary.succeeded {
        builder.push_record(vec![date.to_string(), "staged".to_string(), String::new()]);
    }
    for (date, reason) in &summary.failed {
        builder.push_record(vec![date.to_string(), "FAILED".to_string(), reason.clone()]);
    }
    let mut table = builder.build();
    table.with(Style::sharp());
    table
}

fn run(args: &Args, settings: &Settings) -> Result<FetchSummary, Box<dyn Error>> {
    let log = Arc::new(FacadeLog::new("download_sgx_ticks"));
    let resolver = DateResolver::new(
        Zoned::now().datetime(),
        settings.base_date,
        settings.today_cutoff,
        log.clone(),
    );
    let mode = args.mode();
    let mut dates = resolver.resolve(&mode)?;
    if matches!(mode, DateMode::Single(_) | DateMode::Range(..)) {
        dates = resolver.clamp_available(dates);
    }
    if dates.is_empty() {
        info!("No dates to download.");
        return Ok(FetchSummary::default());
    }
    info!(
        "Downloading {} day(s), {} to {}",
        dates.len(),
        dates[0],
        dates[dates.len() - 1]
    );

    let store = open_store(&settings.storage)?;
    let source = HttpArchiveSource::new(settings.download_timeout)?;
    let pipeline = FetchPipeline::new(FetchOptions::from(settings), Box::new(source), store, log);
    Ok(pipeline.run(&dates))
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
            if !summary.succeeded.is_empty() || !summary.failed.is_empty() {
                println!("{}", ascii_table(&summary));
            }
            if summary.is_success() {
                ExitCode::SUCCESS
            } else {
                error!(
                    "{} day(s) failed, see {}",
                    summary.failed.len(),
                    settings.missed_files_path.display()
                );
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(2)
        }
    }
}
