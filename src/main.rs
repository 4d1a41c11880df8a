//! CLI entry point for the taxi star-schema ETL.
//!
//! Reads one trip CSV, models it as a star schema and loads the seven tables
//! into BigQuery, or into a directory of CSV files with `--export-dir`.

use anyhow::{Context, Result};
use clap::Parser;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use taxi_star_etl::config::PipelineConfig;
use taxi_star_etl::dimensions::KeyOrder;
use taxi_star_etl::infra::bigquery::{BigQueryClient, ServiceAccountKey};
use taxi_star_etl::infra::local::CsvDirWarehouse;
use taxi_star_etl::load::{DEFAULT_CHUNK_SIZE, LoadOptions};
use taxi_star_etl::pipeline;
use taxi_star_etl::services::warehouse::{DatasetRef, LoadMode, WriteDisposition};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "taxi_star_etl")]
#[command(about = "Load a taxi trip CSV into a star-schema warehouse", long_about = None)]
struct Cli {
    /// Trip CSV to load (may be .csv.gz)
    #[arg(short, long, default_value = "taxi_data.csv")]
    input: PathBuf,

    /// Google Cloud project; defaults to the key's project_id
    #[arg(long, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// Destination dataset
    #[arg(short, long, env = "TAXI_ETL_DATASET", default_value = "taxi_star")]
    dataset: String,

    /// Location used when the dataset has to be created
    #[arg(long, default_value = "US")]
    location: String,

    /// Service-account key file
    #[arg(
        long,
        env = "GOOGLE_APPLICATION_CREDENTIALS",
        default_value = "service_account.json"
    )]
    credentials: PathBuf,

    #[arg(short, long, value_enum, default_value_t = LoadMode::Batch)]
    mode: LoadMode,

    /// Rows per streaming insert request
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    #[arg(long, value_enum, default_value_t = WriteDisposition::Replace)]
    write_disposition: WriteDisposition,

    /// How surrogate keys are assigned within each dimension
    #[arg(long, value_enum, default_value_t = KeyOrder::FirstSeen)]
    key_order: KeyOrder,

    /// Write tables as CSV files under this directory instead of BigQuery
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/taxi_star_etl.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("taxi_star_etl.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let load = LoadOptions {
        mode: cli.mode,
        disposition: cli.write_disposition,
        chunk_size: cli.chunk_size,
    };

    let report = match &cli.export_dir {
        Some(dir) => {
            let project = cli.project.clone().unwrap_or_else(|| "local".into());
            let config = pipeline_config(&cli, project, load);
            info!(dir = %dir.display(), "Exporting to local CSV files");
            let warehouse = CsvDirWarehouse::new(dir);
            pipeline::run(&config, &warehouse).await
        }
        None => {
            let key = ServiceAccountKey::from_file(&cli.credentials)?;
            let project = cli
                .project
                .clone()
                .or_else(|| key.project_id.clone())
                .context("no project given and the service-account key has no project_id")?;
            let config = pipeline_config(&cli, project, load);
            info!(
                project = %config.dataset.project,
                dataset = %config.dataset.dataset,
                "Loading into BigQuery"
            );
            let warehouse = BigQueryClient::from_service_account(&key).await?;
            pipeline::run(&config, &warehouse).await
        }
    };

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            return Err(e.into());
        }
    };

    report.log();
    if let Some(path) = &cli.report {
        report.write_json(path)?;
    }

    Ok(())
}

fn pipeline_config(cli: &Cli, project: String, load: LoadOptions) -> PipelineConfig {
    PipelineConfig {
        input: cli.input.clone(),
        dataset: DatasetRef {
            project,
            dataset: cli.dataset.clone(),
            location: cli.location.clone(),
        },
        load,
        key_order: cli.key_order,
    }
}
