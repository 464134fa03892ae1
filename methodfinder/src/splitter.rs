//! Domain splitter: one wide row per customer in, one `(token, url)` row per
//! allowed domain out, written into bounded-size chunk files.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::columns::{self, clean_header};
use crate::error::PipelineError;
use crate::records::TokenDomainRecord;

/// A run of newlines, commas and semicolons counts as one separator.
static SEPARATOR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\n,;]+").unwrap());

/// Header row of every chunk file
pub const CHUNK_HEADERS: [&str; 2] = ["token", "url"];

/// Split a domain-list cell into trimmed, non-empty domains.
pub fn split_domain_list(cell: &str) -> Vec<String> {
    SEPARATOR_RE
        .split(cell)
        .map(|d| d.trim())
        .filter(|d| !d.is_empty())
        .map(|d| d.to_string())
        .collect()
}

/// Prepend `https://` unless the value already carries an http(s) scheme.
pub fn normalize_url(domain: &str) -> String {
    if has_http_scheme(domain) {
        domain.to_string()
    } else {
        format!("https://{}", domain)
    }
}

fn has_http_scheme(value: &str) -> bool {
    let starts_with_ci = |prefix: &str| {
        value
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    };
    starts_with_ci("http://") || starts_with_ci("https://")
}

/// Read the wide customer CSV and expand it into one record per domain.
///
/// Rows whose token is blank are dropped along with their domains.
pub fn split_rows<R: io::Read>(source: &str, reader: R) -> Result<(usize, Vec<TokenDomainRecord>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV headers from {}", source))?
        .iter()
        .map(|h| clean_header(h).to_string())
        .collect();

    let token_idx = columns::SPLIT_TOKEN.resolve(&headers, source)?;
    let domain_idx = columns::SPLIT_DOMAINS.resolve(&headers, source)?;
    debug!(
        "{}: token column '{}', domain column '{}'",
        source, headers[token_idx], headers[domain_idx]
    );

    let mut rows_read = 0;
    let mut records = Vec::new();
    for result in reader.records() {
        let row = result.with_context(|| format!("Failed to parse CSV record in {}", source))?;
        rows_read += 1;

        let token = row.get(token_idx).unwrap_or("").trim();
        if token.is_empty() {
            continue;
        }

        for domain in split_domain_list(row.get(domain_idx).unwrap_or("")) {
            records.push(TokenDomainRecord {
                token: token.to_string(),
                url: normalize_url(&domain),
            });
        }
    }

    Ok((rows_read, records))
}

/// Writes records into `<prefix>_<n>.csv` files of at most `chunk_size` rows.
pub struct ChunkedWriter {
    dir: PathBuf,
    prefix: String,
    chunk_size: usize,
    current: Option<csv::Writer<File>>,
    count: usize,
    files: Vec<PathBuf>,
}

impl ChunkedWriter {
    pub fn new(dir: &Path, prefix: &str, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(PipelineError::ZeroChunkSize.into());
        }
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            chunk_size,
            current: None,
            count: 0,
            files: Vec::new(),
        })
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}_{}.csv", self.prefix, index))
    }

    pub fn write(&mut self, record: &TokenDomainRecord) -> Result<()> {
        if self.current.is_none() || self.count == self.chunk_size {
            self.open_next()?;
        }

        if let Some(wtr) = self.current.as_mut() {
            wtr.write_record([record.token.as_str(), record.url.as_str()])?;
        }
        self.count += 1;
        Ok(())
    }

    fn open_next(&mut self) -> Result<()> {
        if let Some(mut previous) = self.current.take() {
            previous.flush()?;
        }

        let path = self.chunk_path(self.files.len() + 1);
        let mut wtr = csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create chunk file: {}", path.display()))?;
        wtr.write_record(CHUNK_HEADERS)?;

        debug!("Opened chunk file {}", path.display());
        self.files.push(path);
        self.current = Some(wtr);
        self.count = 0;
        Ok(())
    }

    /// Flush the open chunk and return every file written, in order.
    pub fn finish(mut self) -> Result<Vec<PathBuf>> {
        if let Some(mut wtr) = self.current.take() {
            wtr.flush()?;
        }
        Ok(self.files)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SplitSummary {
    pub rows_read: usize,
    pub records_written: usize,
    pub files: Vec<PathBuf>,
}

pub fn run_split(input: &Path, output_dir: &Path, prefix: &str, chunk_size: usize) -> Result<SplitSummary> {
    let file = File::open(input).with_context(|| format!("Failed to open input file: {}", input.display()))?;
    let (rows_read, records) = split_rows(&input.display().to_string(), file)?;

    let mut writer = ChunkedWriter::new(output_dir, prefix, chunk_size)?;
    for record in &records {
        writer.write(record)?;
    }
    let files = writer.finish()?;

    info!(
        "Split {} rows into {} records across {} files",
        rows_read,
        records.len(),
        files.len()
    );

    Ok(SplitSummary {
        rows_read,
        records_written: records.len(),
        files,
    })
}
