//! Correlator: mark services whose default host is covered by a TLS
//! subscription domain as DNS-pattern integrations.

use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

use crate::columns;
use crate::records::DNS_PATTERN;
use crate::table::Table;

/// Column appended (or replaced) on the service summary
pub const INTEGRATION_METHOD_COLUMN: &str = "integration_method";

/// Every domain id listed by any TLS subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsDomainSet {
    ids: BTreeSet<String>,
}

impl TlsDomainSet {
    pub fn from_table(tls: &Table) -> Result<Self> {
        let col = tls.require(&columns::TLS_DOMAIN_IDS)?;
        let ids = (0..tls.len())
            .filter_map(|row| tls.value(row, col))
            .flat_map(|cell| cell.split(','))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self { ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// A host matches when it occurs as a substring of any known id.
    /// Blank hosts never match.
    pub fn is_dns_pattern(&self, host: Option<&str>) -> bool {
        match host.map(str::trim).filter(|h| !h.is_empty()) {
            Some(host) => self.ids.iter().any(|id| id.contains(host)),
            None => false,
        }
    }
}

impl<S: Into<String>> FromIterator<S> for TlsDomainSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CorrelateSummary {
    pub total: usize,
    pub matched: usize,
}

/// Set `integration_method` on every service row. Returns the number of
/// rows marked as DNS pattern.
pub fn annotate(service: &mut Table, domains: &TlsDomainSet) -> Result<usize> {
    let host_col = service.require(&columns::DEFAULT_HOST)?;

    let values: Vec<String> = (0..service.len())
        .map(|row| {
            if domains.is_dns_pattern(service.value(row, host_col)) {
                DNS_PATTERN.to_string()
            } else {
                String::new()
            }
        })
        .collect();
    let matched = values.iter().filter(|v| !v.is_empty()).count();

    service.set_column(INTEGRATION_METHOD_COLUMN, values);
    Ok(matched)
}

/// Annotate `service_path` against `tls_path` and write the result to
/// `output`, or back over the service file when no output is given.
pub fn run_correlate(service_path: &Path, tls_path: &Path, output: Option<&Path>) -> Result<CorrelateSummary> {
    let mut service = Table::from_path(service_path)?;
    let tls = Table::from_path(tls_path)?;

    let domains = TlsDomainSet::from_table(&tls)?;
    debug!("Loaded {} TLS domain ids from {}", domains.len(), tls_path.display());

    let matched = annotate(&mut service, &domains)?;

    let output = output.unwrap_or(service_path);
    service.write_to_path(output)?;
    info!("Marked {} of {} services as {}", matched, service.len(), DNS_PATTERN);

    Ok(CorrelateSummary {
        total: service.len(),
        matched,
    })
}
