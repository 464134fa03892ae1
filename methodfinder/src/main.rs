use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use methodfinder::cli::{Cli, Commands};
use methodfinder::config::{self, AppConfig, ConfigError};
use methodfinder::correlator;
use methodfinder::detector::{self, DetectOptions, Detector};
use methodfinder::edge_api::EdgeApiClient;
use methodfinder::export::{self, RunReport};
use methodfinder::logger::{PipelineLogger, VerbosityLevel};
use methodfinder::merger;
use methodfinder::splitter;

/// Overrides the `-v` derived tracing filter
const LOG_ENV: &str = "METHODFINDER_LOG";

fn init_tracing(verbosity: VerbosityLevel) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(format!("methodfinder={}", verbosity.tracing_level()))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// `--config` must exist; the default location falls back to the built-in template.
fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_from_path(path),
        None => match AppConfig::load() {
            Err(ConfigError::FileNotFound(_)) => AppConfig::embedded(),
            other => other,
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = cli.command {
        if Path::new(config::CONFIG_PATH).exists() && !force {
            eprintln!("Configuration file already exists at {} (use --force to overwrite)", config::CONFIG_PATH);
            std::process::exit(1);
        }
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("Created default configuration file at: {}", path.display());
                return Ok(());
            }
            Err(e) => {
                eprintln!("Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = cli.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(2);
    }

    let verbosity = if cli.quiet {
        VerbosityLevel::Silent
    } else {
        VerbosityLevel::from_verbose_count(cli.verbose)
    };
    init_tracing(verbosity);

    let mut app_config = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut app_config);
    if let Err(e) = app_config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let logger = match &cli.log_file {
        Some(path) => PipelineLogger::with_log_file(verbosity, path.clone()),
        None => PipelineLogger::new(verbosity),
    };

    let started_at = Utc::now();
    logger.start_stage(cli.stage_name());
    let outcome = run_command(&cli, &app_config, &logger).await;
    logger.finish_stage();

    if let Err(e) = &outcome {
        logger.error(&format!("{:#}", e));
    } else {
        logger.print_final_summary();
    }

    if let Some(path) = &cli.summary_json {
        let report = RunReport::new(started_at, logger.summary());
        if let Err(e) = export::export_run_report(&report, path) {
            logger.error(&format!("Failed to write run summary: {:#}", e));
        }
    }
    if let Err(e) = logger.export_logs() {
        eprintln!("Failed to write log file: {}", e);
    }

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_command(cli: &Cli, app_config: &AppConfig, logger: &PipelineLogger) -> Result<()> {
    match &cli.command {
        Commands::Init { .. } => Ok(()),

        Commands::Split { input, output_dir, .. } => {
            let summary = splitter::run_split(
                input,
                output_dir,
                &app_config.splitter.output_prefix,
                app_config.splitter.chunk_size,
            )?;
            logger.record_input(&input.display().to_string(), summary.rows_read);
            let per_file = app_config.splitter.chunk_size;
            for (i, file) in summary.files.iter().enumerate() {
                let rows = per_file.min(summary.records_written - i * per_file);
                logger.record_output(&file.display().to_string(), rows);
            }
            Ok(())
        }

        Commands::Detect { input, output_dir, combined, url_only, errors, .. } => {
            let detector = Arc::new(Detector::from_config(app_config)?);
            let options = DetectOptions {
                url_only: *url_only,
                concurrency: app_config.detector.concurrency,
                combined: combined.clone(),
                write_errors: *errors,
            };
            detector::run_detect(detector, input, output_dir, &options, logger).await?;
            Ok(())
        }

        Commands::Correlate { services, tls, output } => {
            let summary = correlator::run_correlate(services, tls, output.as_deref())?;
            let written = output.as_deref().unwrap_or(services.as_path());
            logger.record_input(&services.display().to_string(), summary.total);
            logger.record_updated(summary.matched);
            logger.record_output(&written.display().to_string(), summary.total);
            logger.info(&format!("Processed {} entries, matched DNS pattern: {}", summary.total, summary.matched));
            Ok(())
        }

        Commands::Merge { detections, services, output } => {
            let summary = merger::run_merge(detections, services, output)?;
            logger.record_input(&detections.display().to_string(), summary.total);
            logger.record_updated(summary.updated);
            logger.record_output(&output.display().to_string(), summary.total);
            logger.info(&format!("Processed {} entries, updated method: {}", summary.total, summary.updated));
            Ok(())
        }

        Commands::ExportTls { output } => {
            let client = EdgeApiClient::from_config(app_config)?;
            let records = client
                .fetch_tls_subscriptions()
                .await
                .context("Failed to export TLS subscriptions")?;
            export::export_tls_subscriptions(&records, output)?;
            logger.record_output(&output.display().to_string(), records.len());
            Ok(())
        }

        Commands::ExportDicts { output } => {
            let client = EdgeApiClient::from_config(app_config)?;
            let records = client
                .fetch_service_dictionaries()
                .await
                .context("Failed to export service dictionaries")?;
            export::export_service_dictionaries(&records, output)?;
            logger.record_output(&output.display().to_string(), records.len());
            Ok(())
        }
    }
}
