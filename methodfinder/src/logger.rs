use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::RwLock;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,    // Only show progress bar and final summary
    Summary = 1,   // Stage progress (default)
    Detailed = 2,  // Per-file steps, warnings
    Debug = 3,     // Everything, including per-URL outcomes
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Matching filter directive for the tracing subscriber
    pub fn tracing_level(&self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "error",
            VerbosityLevel::Summary => "warn",
            VerbosityLevel::Detailed => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

/// User-facing stage log: timestamped lines, a progress bar for long
/// batches, and the counters printed in the final summary.
#[derive(Clone)]
pub struct PipelineLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
    metadata: Arc<Mutex<StageMetadata>>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<String>,
}

#[derive(Default, Clone)]
struct StageMetadata {
    stage: String,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
    inputs: Vec<String>,
    rows_read: usize,
    records_written: usize,
    rows_updated: usize,
    failures: usize,
    outputs: Vec<String>,
    method_counts: BTreeMap<String, usize>,
}

/// Serializable snapshot of a finished stage
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub rows_read: usize,
    pub records_written: usize,
    pub rows_updated: usize,
    pub failures: usize,
    pub method_counts: BTreeMap<String, usize>,
    pub duration_secs: f64,
}

impl PipelineLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(RwLock::new(None)),
            metadata: Arc::new(Mutex::new(StageMetadata::default())),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: String) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        // Errors are shown at every verbosity
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", Local::now().format("%H:%M:%S%.3f"), level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }

        // Print through the progress bar when one is active so it is not torn
        if let Ok(guard) = self.progress_bar.try_read() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    pub async fn start_progress(&self, total_steps: u64) {
        let pb = ProgressBar::new(total_steps);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        if self.verbosity == VerbosityLevel::Silent {
            pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
        }

        let mut progress_guard = self.progress_bar.write().await;
        *progress_guard = Some(pb);
    }

    pub async fn update_progress(&self, message: &str) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.set_message(message.to_string());
        }
    }

    pub async fn advance_progress(&self, steps: u64) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.inc(steps);
        }
    }

    pub async fn finish_progress(&self) {
        let mut progress_guard = self.progress_bar.write().await;
        if let Some(pb) = progress_guard.take() {
            pb.finish_and_clear();
        }
    }

    fn with_metadata(&self, f: impl FnOnce(&mut StageMetadata)) {
        if let Ok(mut metadata) = self.metadata.lock() {
            f(&mut metadata);
        }
    }

    pub fn start_stage(&self, stage: &str) {
        self.with_metadata(|m| {
            m.stage = stage.to_string();
            m.start_time = Some(SystemTime::now());
        });
        self.info(&format!("Starting {} stage", stage));
    }

    pub fn finish_stage(&self) {
        self.with_metadata(|m| m.end_time = Some(SystemTime::now()));
    }

    pub fn record_input(&self, path: &str, rows: usize) {
        self.with_metadata(|m| {
            m.inputs.push(path.to_string());
            m.rows_read += rows;
        });
        self.info(&format!("Loaded {} rows from {}", rows, path));
    }

    pub fn record_output(&self, path: &str, records: usize) {
        self.with_metadata(|m| {
            m.outputs.push(path.to_string());
            m.records_written += records;
        });
        self.info(&format!("Wrote {} rows to {}", records, path));
    }

    /// Output file that does not count towards the written record total
    pub fn record_side_output(&self, path: &str, records: usize) {
        self.with_metadata(|m| m.outputs.push(path.to_string()));
        self.debug(&format!("Wrote {} rows to {}", records, path));
    }

    pub fn record_updated(&self, count: usize) {
        self.with_metadata(|m| m.rows_updated += count);
    }

    pub fn record_failure(&self, url: &str, reason: &str) {
        self.with_metadata(|m| m.failures += 1);
        self.debug(&format!("{}: {}", url, reason));
    }

    pub fn record_method(&self, label: &str) {
        self.with_metadata(|m| *m.method_counts.entry(label.to_string()).or_insert(0) += 1);
    }

    pub fn summary(&self) -> StageSummary {
        let m = self.metadata.lock().map(|m| m.clone()).unwrap_or_default();
        let duration_secs = match (m.start_time, m.end_time) {
            (Some(start), Some(end)) => end.duration_since(start).unwrap_or_default().as_secs_f64(),
            _ => 0.0,
        };
        StageSummary {
            stage: m.stage,
            inputs: m.inputs,
            outputs: m.outputs,
            rows_read: m.rows_read,
            records_written: m.records_written,
            rows_updated: m.rows_updated,
            failures: m.failures,
            method_counts: m.method_counts,
            duration_secs,
        }
    }

    pub fn print_final_summary(&self) {
        let summary = self.summary();

        println!("\n=== {} SUMMARY ===", summary.stage.to_uppercase());
        println!("Duration: {:.2}s", summary.duration_secs);
        println!("Rows Read: {}", summary.rows_read);
        println!("Records Written: {}", summary.records_written);
        if summary.rows_updated > 0 {
            println!("Rows Updated: {}", summary.rows_updated);
        }
        if summary.failures > 0 {
            println!("Failed Requests: {}", summary.failures);
        }
        if !summary.method_counts.is_empty() {
            println!("By Method:");
            for (method, count) in &summary.method_counts {
                println!("  {}: {}", method, count);
            }
        }
        for output in &summary.outputs {
            println!("Output: {}", output);
        }
        println!("========================\n");
    }

    /// Export all collected logs to the configured file
    pub fn export_logs(&self) -> io::Result<()> {
        if let Some(ref log_file_path) = self.log_file_path {
            if let Ok(buffer) = self.log_buffer.lock() {
                if let Some(parent) = Path::new(log_file_path).parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(log_file_path)?;

                for log_entry in buffer.iter() {
                    writeln!(file, "{}", log_entry)?;
                }

                file.flush()?;
            }
        }
        Ok(())
    }

    pub fn get_log_count(&self) -> usize {
        self.log_buffer.lock().map(|b| b.len()).unwrap_or(0)
    }
}
