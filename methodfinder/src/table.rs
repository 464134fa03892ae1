//! In-memory CSV table that keeps every column of its source file.
//!
//! The correlator and merger only touch a handful of columns and must
//! write everything else back untouched, so they work on this instead of
//! typed records. CSV has no null: an empty cell is read as `None`.

use anyhow::{Context, Result};
use std::fs::File;
use std::io;
use std::path::Path;

use crate::columns::{clean_header, ColumnAliases};
use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    source: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(source: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self {
            source: source.into(),
            headers,
            rows,
        }
    }

    pub fn from_reader<R: io::Read>(source: &str, reader: R) -> Result<Self> {
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

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.with_context(|| format!("Failed to parse CSV record in {}", source))?;
            rows.push(record.iter().map(|s| s.to_string()).collect());
        }

        Ok(Self::new(source, headers, rows))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        Self::from_reader(&path.display().to_string(), file)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require(&self, aliases: &ColumnAliases) -> Result<usize, PipelineError> {
        aliases.resolve(&self.headers, &self.source)
    }

    /// Cell value, `None` when the cell is empty.
    pub fn value(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }

    pub fn set_value(&mut self, row: usize, col: usize, value: String) {
        if let Some(cell) = self.rows.get_mut(row).and_then(|r| r.get_mut(col)) {
            *cell = value;
        }
    }

    /// Replace the named column, or append it when absent.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.headers.push(name.to_string());
                let mut values = values.into_iter();
                for row in self.rows.iter_mut() {
                    row.push(values.next().unwrap_or_default());
                }
            }
        }
    }

    /// Remove the named column. Returns whether it existed.
    pub fn drop_column(&mut self, name: &str) -> bool {
        match self.column(name) {
            Some(idx) => {
                self.headers.remove(idx);
                for row in self.rows.iter_mut() {
                    row.remove(idx);
                }
                true
            }
            None => false,
        }
    }

    pub fn write_to<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        self.write_to(file)
    }
}
