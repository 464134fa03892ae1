use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::Writer;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::columns::{METHOD_HEADER, VERSION_HEADER};
use crate::logger::StageSummary;
use crate::records::{DetectionResult, ServiceDictionaryRecord, TlsSubscriptionRecord};

pub const DETECTION_HEADERS: [&str; 4] = ["token", "url", METHOD_HEADER, VERSION_HEADER];
/// Appended after `DETECTION_HEADERS` for url-only runs
pub const TITLE_HEADER: &str = "title";

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

pub fn write_detections<W: Write>(results: &[DetectionResult], writer: W, with_title: bool) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);
    let mut headers = DETECTION_HEADERS.to_vec();
    if with_title {
        headers.push(TITLE_HEADER);
    }
    wtr.write_record(&headers)?;

    for result in results {
        let label = result.method.as_label();
        let mut row = vec![
            result.token.as_deref().unwrap_or(""),
            result.url.as_str(),
            label.as_str(),
            result.version.as_deref().unwrap_or(""),
        ];
        if with_title {
            row.push(result.title.as_deref().unwrap_or(""));
        }
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

pub fn export_detections(results: &[DetectionResult], output_path: &Path, with_title: bool) -> Result<()> {
    debug!("Exporting {} detections to {}", results.len(), output_path.display());
    write_detections(results, create_file(output_path)?, with_title)
}

pub fn export_tls_subscriptions(records: &[TlsSubscriptionRecord], output_path: &Path) -> Result<()> {
    let mut wtr = Writer::from_writer(create_file(output_path)?);
    wtr.write_record(TlsSubscriptionRecord::HEADERS)?;
    for record in records {
        wtr.write_record(record.to_row())?;
    }
    wtr.flush()?;

    info!("Exported {} TLS subscriptions to {}", records.len(), output_path.display());
    Ok(())
}

pub fn export_service_dictionaries(records: &[ServiceDictionaryRecord], output_path: &Path) -> Result<()> {
    let mut wtr = Writer::from_writer(create_file(output_path)?);
    wtr.write_record(ServiceDictionaryRecord::HEADERS)?;
    for record in records {
        wtr.write_record(record.to_row())?;
    }
    wtr.flush()?;

    info!("Exported {} service dictionaries to {}", records.len(), output_path.display());
    Ok(())
}

/// JSON report of one command invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub completed_at: String,
    #[serde(flatten)]
    pub stage: StageSummary,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>, stage: StageSummary) -> Self {
        Self {
            started_at: started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            completed_at: Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            stage,
        }
    }
}

pub fn export_run_report(report: &RunReport, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run summary")?;
    let mut file = create_file(output_path)?;
    file.write_all(json.as_bytes())
        .with_context(|| format!("Failed to write run summary to: {}", output_path.display()))?;
    Ok(())
}
