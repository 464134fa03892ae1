//! Client for the edge platform's REST API, used to export the TLS
//! subscription and service dictionary tables the correlator consumes.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AppConfig, API_TOKEN_ENV};
use crate::error::PipelineError;
use crate::records::{ServiceDictionaryRecord, TlsSubscriptionRecord};

const AUTH_HEADER: &str = "Fastly-Key";

#[derive(Debug, Deserialize)]
struct ServiceSummary {
    id: String,
    #[serde(default)]
    version: Value,
}

#[derive(Debug, Deserialize)]
struct Dictionary {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DictionaryItem {
    item_key: String,
    #[serde(default)]
    item_value: String,
}

pub struct EdgeApiClient {
    base_url: String,
    api_token: String,
    per_page: u32,
    client: reqwest::Client,
}

impl EdgeApiClient {
    pub fn new(base_url: &str, api_token: &str, per_page: u32, timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            per_page: per_page.max(1),
            client,
        })
    }

    /// Build a client from config; a missing token is a configuration error.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let token = config
            .api
            .resolve_token()
            .ok_or(PipelineError::MissingApiToken { env: API_TOKEN_ENV })?;

        Self::new(
            &config.api.base_url,
            &token,
            config.api.per_page,
            config.http.request_timeout(),
            &config.http.user_agent,
        )
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(query)
            .header(AUTH_HEADER, &self.api_token)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("Request to {} failed: HTTP {}", url, response.status()));
        }

        response
            .json::<Value>()
            .await
            .with_context(|| format!("Invalid JSON from {}", url))
    }

    pub async fn fetch_tls_subscriptions(&self) -> Result<Vec<TlsSubscriptionRecord>> {
        let json = self.get_json("/tls/subscriptions", &[]).await?;
        let records = flatten_subscriptions(&json);
        info!("Fetched {} TLS subscriptions", records.len());
        Ok(records)
    }

    async fn list_services(&self) -> Result<Vec<ServiceSummary>> {
        let mut services = Vec::new();
        let mut page = 1u32;

        loop {
            let json = self
                .get_json(
                    "/service",
                    &[("page", page.to_string()), ("per_page", self.per_page.to_string())],
                )
                .await?;
            let batch: Vec<ServiceSummary> =
                serde_json::from_value(json).context("Unexpected service list response")?;
            let short_page = batch.len() < self.per_page as usize;

            debug!("Service page {}: {} services", page, batch.len());
            services.extend(batch);

            if short_page {
                break;
            }
            page += 1;
        }

        Ok(services)
    }

    /// One record per dictionary of every service's current version.
    pub async fn fetch_service_dictionaries(&self) -> Result<Vec<ServiceDictionaryRecord>> {
        let services = self.list_services().await?;
        info!("Fetched {} services", services.len());

        let mut records = Vec::new();
        for service in services {
            let version = cell(&service.version);
            let json = self
                .get_json(&format!("/service/{}/version/{}/dictionary", service.id, version), &[])
                .await?;
            let dictionaries: Vec<Dictionary> =
                serde_json::from_value(json).context("Unexpected dictionary list response")?;

            for dictionary in dictionaries {
                let json = self
                    .get_json(&format!("/service/{}/dictionary/{}/items", service.id, dictionary.id), &[])
                    .await?;
                let items: Vec<DictionaryItem> =
                    serde_json::from_value(json).context("Unexpected dictionary item response")?;

                let mut record = ServiceDictionaryRecord {
                    service_id: service.id.clone(),
                    version: version.clone(),
                    dictionary_id: dictionary.id,
                    ..Default::default()
                };
                for item in items {
                    record.set_item(&item.item_key, item.item_value);
                }
                records.push(record);
            }
        }

        Ok(records)
    }
}

/// JSON scalar as a CSV cell. Null and containers become empty.
fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Flatten `{"data": [{id, type, attributes, relationships}]}` into records.
pub fn flatten_subscriptions(json: &Value) -> Vec<TlsSubscriptionRecord> {
    let Some(data) = json.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };

    data.iter()
        .map(|sub| {
            let attr = |name: &str| sub.get("attributes").and_then(|a| a.get(name)).map(cell).unwrap_or_default();

            let tls_domain_ids = sub
                .pointer("/relationships/tls_domains/data")
                .and_then(Value::as_array)
                .map(|domains| {
                    domains
                        .iter()
                        .filter_map(|d| d.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();

            TlsSubscriptionRecord {
                id: sub.get("id").map(cell).unwrap_or_default(),
                kind: sub.get("type").map(cell).unwrap_or_default(),
                certificate_authority: attr("certificate_authority"),
                created_at: attr("created_at"),
                state: attr("state"),
                has_active_order: attr("has_active_order"),
                updated_at: attr("updated_at"),
                tls_domain_ids,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_subscriptions() {
        let body = json!({
            "data": [{
                "id": "sub1",
                "type": "tls_subscription",
                "attributes": {
                    "certificate_authority": "lets-encrypt",
                    "created_at": "2024-01-01T00:00:00Z",
                    "state": "issued",
                    "has_active_order": false,
                    "updated_at": null
                },
                "relationships": {
                    "tls_domains": {"data": [
                        {"id": "www.example.com", "type": "tls_domain"},
                        {"type": "tls_domain"},
                        {"id": "shop.example.com", "type": "tls_domain"}
                    ]}
                }
            }, {
                "id": "sub2",
                "type": "tls_subscription"
            }]
        });

        let records = flatten_subscriptions(&body);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].certificate_authority, "lets-encrypt");
        assert_eq!(records[0].has_active_order, "false");
        assert_eq!(records[0].updated_at, "");
        assert_eq!(records[0].joined_domain_ids(), "shop.example.com,www.example.com");
        assert!(records[1].tls_domain_ids.is_empty());
    }

    #[test]
    fn test_missing_data_is_empty() {
        assert!(flatten_subscriptions(&json!({})).is_empty());
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let mut config = AppConfig::embedded().unwrap();
        config.api.api_token = String::new();
        // Only meaningful when the environment does not supply one
        if std::env::var(API_TOKEN_ENV).is_err() {
            let err = EdgeApiClient::from_config(&config).err().expect("missing token");
            assert!(err.downcast_ref::<PipelineError>().is_some());
        }
    }
}
