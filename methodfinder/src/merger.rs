//! Merger: overwrite detected methods with the service-side integration
//! method wherever the service table has one for the same token.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::columns;
use crate::correlator::INTEGRATION_METHOD_COLUMN;
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub total: usize,
    pub updated: usize,
}

/// token -> integration method. The first row for a token wins, even when
/// its method is empty.
pub fn service_methods(service: &Table) -> Result<HashMap<String, Option<String>>> {
    let token_col = service.require(&columns::JOIN_TOKEN)?;
    let method_col = service.require(&columns::INTEGRATION_METHOD)?;

    let mut methods = HashMap::new();
    let mut duplicates = 0;
    for row in 0..service.len() {
        let Some(token) = service.value(row, token_col) else {
            continue;
        };
        if methods.contains_key(token) {
            duplicates += 1;
            continue;
        }
        methods.insert(
            token.to_string(),
            service.value(row, method_col).map(str::to_string),
        );
    }

    if duplicates > 0 {
        debug!("{}: ignored {} duplicate token rows", service.source(), duplicates);
    }
    Ok(methods)
}

/// Update the method column of `detection` in place and drop any
/// `integration_method` column it carried.
pub fn merge(detection: &mut Table, service: &Table) -> Result<MergeSummary> {
    let token_col = detection.require(&columns::JOIN_TOKEN)?;
    let method_col = detection.require(&columns::METHOD)?;
    let methods = service_methods(service)?;

    let mut updated = 0;
    for row in 0..detection.len() {
        let replacement = detection
            .value(row, token_col)
            .and_then(|token| methods.get(token))
            .and_then(|method| method.clone());

        if let Some(method) = replacement {
            detection.set_value(row, method_col, method);
            updated += 1;
        }
    }

    detection.drop_column(INTEGRATION_METHOD_COLUMN);

    Ok(MergeSummary {
        total: detection.len(),
        updated,
    })
}

pub fn run_merge(detection_path: &Path, service_path: &Path, output: &Path) -> Result<MergeSummary> {
    let mut detection = Table::from_path(detection_path)?;
    let service = Table::from_path(service_path)?;

    let summary = merge(&mut detection, &service)?;
    detection.write_to_path(output)?;

    info!(
        "Updated {} of {} detection rows from {}",
        summary.updated,
        summary.total,
        service_path.display()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(content: &str) -> Table {
        Table::from_reader("test.csv", content.as_bytes()).unwrap()
    }

    #[test]
    fn test_first_occurrence_wins() {
        let service = table("token,integration_method\nabc,\nabc,DNSPattern\nxyz,DNSPattern\n");
        let methods = service_methods(&service).unwrap();
        assert_eq!(methods.get("abc"), Some(&None));
        assert_eq!(methods.get("xyz"), Some(&Some("DNSPattern".to_string())));
    }

    #[test]
    fn test_merge_overwrites_only_non_empty() {
        let mut detection = table("token,url,導入方式,バージョン\nabc,https://a.com,Proxy,0.3\nxyz,https://x.com,Proxy,0.3\n");
        let service = table("token,default_host,integration_method\nabc,a.com,DNSPattern\nxyz,x.com,\n");

        let summary = merge(&mut detection, &service).unwrap();
        assert_eq!(summary, MergeSummary { total: 2, updated: 1 });
        assert_eq!(detection.value(0, 2), Some("DNSPattern"));
        assert_eq!(detection.value(1, 2), Some("Proxy"));
        // Other columns untouched
        assert_eq!(detection.value(0, 3), Some("0.3"));
    }

    #[test]
    fn test_unknown_token_unchanged() {
        let mut detection = table("token,url,導入方式\nabc,https://a.com,ScriptTag\nxyz,https://x.com,Proxy\n");
        let service = table("token,integration_method\nabc,DNSPattern\n");
        let summary = merge(&mut detection, &service).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(detection.value(0, 2), Some("DNSPattern"));
        assert_eq!(detection.value(1, 2), Some("Proxy"));
    }

    #[test]
    fn test_blank_tokens_never_join() {
        let mut detection = table("token,url,導入方式\n,https://a.com,NotInstalled\n");
        let service = table("token,integration_method\n,DNSPattern\n");
        let summary = merge(&mut detection, &service).unwrap();
        assert_eq!(summary.updated, 0);
        assert_eq!(detection.value(0, 2), Some("NotInstalled"));
    }

    #[test]
    fn test_english_method_header_accepted() {
        let mut detection = table("token,url,method\nabc,https://a.com,ScriptTag\n");
        let service = table("token,integration_method\nabc,DNSPattern\n");
        merge(&mut detection, &service).unwrap();
        assert_eq!(detection.value(0, 2), Some("DNSPattern"));
    }

    #[test]
    fn test_integration_method_column_dropped() {
        let mut detection = table("token,導入方式,integration_method\nabc,Proxy,stale\n");
        let service = table("token,integration_method\nabc,\n");
        merge(&mut detection, &service).unwrap();
        assert_eq!(detection.headers(), &["token".to_string(), "導入方式".to_string()]);
    }

    #[test]
    fn test_missing_integration_method_is_fatal() {
        let mut detection = table("token,導入方式\nabc,Proxy\n");
        let service = table("token,default_host\nabc,a.com\n");
        assert!(merge(&mut detection, &service).is_err());
    }
}
