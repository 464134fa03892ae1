use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "methodfinder")]
#[command(about = "Detects how customer sites integrate the translation script and reconciles it with edge service data")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose logging (use -v for INFO, -vv for DEBUG with per-URL outcomes)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only print errors and the final summary
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to ./config/methodfinder.toml, then the built-in defaults)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Save the user-facing log to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<String>,

    /// Write a JSON summary of the run to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub summary_json: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the default configuration file at ./config/methodfinder.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Expand a customer CSV into one (token, url) row per allowed domain, in chunk files
    Split {
        /// Customer CSV with a token column and a domain-list column
        input: PathBuf,

        /// Directory for the chunk files
        #[arg(short, long, default_value = "output/split")]
        output_dir: PathBuf,

        /// Chunk file name prefix (files are <prefix>_<n>.csv)
        #[arg(long)]
        prefix: Option<String>,

        /// Maximum rows per chunk file (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Fetch every URL and classify the integration method
    Detect {
        /// A CSV file, or a directory whose *.csv files are all processed
        input: PathBuf,

        /// Directory for per-file results (same file names as the input)
        #[arg(short, long, default_value = "output/detected")]
        output_dir: PathBuf,

        /// Also write all results into this single CSV
        #[arg(long, value_name = "PATH")]
        combined: Option<PathBuf>,

        /// Input has only a url column; tokens are read from the script tag
        #[arg(long)]
        url_only: bool,

        /// Write <name>_errors.csv with the rows whose request failed
        #[arg(long)]
        errors: bool,

        /// Maximum concurrent requests (overrides config)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Total attempts per URL (overrides config)
        #[arg(long)]
        max_retries: Option<u32>,
    },

    /// Mark services whose default host is covered by a TLS subscription
    Correlate {
        /// Service dictionary summary CSV
        #[arg(long, default_value = "output/service_dicts_summary.csv")]
        services: PathBuf,

        /// TLS subscription CSV
        #[arg(long, default_value = "output/tls_subscriptions.csv")]
        tls: PathBuf,

        /// Output CSV (defaults to rewriting the service file)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Update detected methods from the annotated service summary
    Merge {
        /// Detection results CSV
        #[arg(long, default_value = "output/wovn_install_methods_merged.csv")]
        detections: PathBuf,

        /// Annotated service dictionary summary CSV
        #[arg(long, default_value = "output/service_dicts_summary.csv")]
        services: PathBuf,

        /// Output CSV
        #[arg(short, long, default_value = "wovn_install_methods_updated.csv")]
        output: PathBuf,
    },

    /// Export TLS subscriptions from the edge API
    ExportTls {
        #[arg(short, long, default_value = "output/tls_subscriptions.csv")]
        output: PathBuf,
    },

    /// Export every service's dictionaries from the edge API
    ExportDicts {
        #[arg(short, long, default_value = "output/service_dicts_summary.csv")]
        output: PathBuf,
    },
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        match &self.command {
            Commands::Split { chunk_size: Some(0), .. } => {
                Err("Chunk size must be greater than 0".to_string())
            }
            Commands::Split { prefix: Some(p), .. } if p.is_empty() => {
                Err("Prefix cannot be empty".to_string())
            }
            Commands::Detect { concurrency: Some(0), .. } => {
                Err("Concurrency must be greater than 0".to_string())
            }
            Commands::Detect { concurrency: Some(n), .. } if *n > 100 => {
                Err("Concurrency cannot exceed 100 to avoid overwhelming customer sites".to_string())
            }
            Commands::Detect { max_retries: Some(0), .. } => {
                Err("Max retries must be at least 1 (the first attempt counts)".to_string())
            }
            _ => Ok(()),
        }
    }

    /// Apply command-line overrides on top of the loaded configuration
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        match &self.command {
            Commands::Split { chunk_size, prefix, .. } => {
                if let Some(size) = chunk_size {
                    config.splitter.chunk_size = *size;
                }
                if let Some(prefix) = prefix {
                    config.splitter.output_prefix = prefix.clone();
                }
            }
            Commands::Detect { concurrency, max_retries, .. } => {
                if let Some(n) = concurrency {
                    config.detector.concurrency = *n;
                }
                if let Some(n) = max_retries {
                    config.retry.max_attempts = *n;
                }
            }
            _ => {}
        }
    }

    pub fn stage_name(&self) -> &'static str {
        match self.command {
            Commands::Init { .. } => "init",
            Commands::Split { .. } => "split",
            Commands::Detect { .. } => "detect",
            Commands::Correlate { .. } => "correlate",
            Commands::Merge { .. } => "merge",
            Commands::ExportTls { .. } => "export-tls",
            Commands::ExportDicts { .. } => "export-dicts",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_overrides() {
        let cli = Cli::parse_from(["methodfinder", "detect", "in.csv", "-j", "4", "--max-retries", "5", "-vv"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.validate().is_ok());

        let mut config = AppConfig::embedded().unwrap();
        cli.apply_overrides(&mut config);
        assert_eq!(config.detector.concurrency, 4);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let cli = Cli::parse_from(["methodfinder", "split", "in.csv", "--chunk-size", "0"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_correlate_output_optional() {
        let cli = Cli::parse_from(["methodfinder", "correlate"]);
        match cli.command {
            Commands::Correlate { output, services, .. } => {
                assert!(output.is_none());
                assert_eq!(services, PathBuf::from("output/service_dicts_summary.csv"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["methodfinder", "merge", "--log-file", "run.log", "--config", "alt.toml"]);
        assert_eq!(cli.log_file.as_deref(), Some("run.log"));
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert_eq!(cli.stage_name(), "merge");
    }
}
