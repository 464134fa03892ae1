use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Label written by the correlator for services fronted by a DNS pattern.
pub const DNS_PATTERN: &str = "DNSPattern";

/// How the translation script reaches a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrationMethod {
    Proxy,
    PhpLibrary,
    CSharpLibrary,
    JavaLibrary,
    WordPressPlugin,
    ScriptTag,
    NotInstalled,
    Skipped,
    RequestFailed,
    /// Page never produced, with the reason
    Error(String),
}

impl std::fmt::Display for IntegrationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_label())
    }
}

impl IntegrationMethod {
    /// The value written to the method column.
    pub fn as_label(&self) -> String {
        match self {
            IntegrationMethod::Proxy => "Proxy".to_string(),
            IntegrationMethod::PhpLibrary => "PhpLibrary".to_string(),
            IntegrationMethod::CSharpLibrary => "CSharpLibrary".to_string(),
            IntegrationMethod::JavaLibrary => "JavaLibrary".to_string(),
            IntegrationMethod::WordPressPlugin => "WordPressPlugin".to_string(),
            IntegrationMethod::ScriptTag => "ScriptTag".to_string(),
            IntegrationMethod::NotInstalled => "NotInstalled".to_string(),
            IntegrationMethod::Skipped => "Skipped: auth required".to_string(),
            IntegrationMethod::RequestFailed => "RequestFailed".to_string(),
            IntegrationMethod::Error(message) => format!("Error: {}", message),
        }
    }

    /// Rows a human should look at: the fetch never produced a page.
    pub fn is_failure(&self) -> bool {
        matches!(self, IntegrationMethod::RequestFailed | IntegrationMethod::Error(_))
    }
}

/// One normalized (token, domain) pair produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDomainRecord {
    pub token: String,
    pub url: String,
}

/// Outcome of inspecting one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionResult {
    pub token: Option<String>,
    pub url: String,
    pub method: IntegrationMethod,
    pub version: Option<String>,
    /// Page `<title>`; only captured for url-only input
    pub title: Option<String>,
}

impl DetectionResult {
    pub fn new(token: Option<String>, url: impl Into<String>, method: IntegrationMethod) -> Self {
        Self {
            token,
            url: url.into(),
            method,
            version: None,
            title: None,
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }
}

/// One dictionary resource of an edge service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDictionaryRecord {
    pub service_id: String,
    pub version: String,
    pub dictionary_id: String,
    pub token: Option<String>,
    pub default_host: Option<String>,
    pub url_pattern_name: Option<String>,
    pub auth_header: Option<String>,
}

impl ServiceDictionaryRecord {
    pub const HEADERS: [&'static str; 7] = [
        "service_id",
        "version",
        "dictionary_id",
        "token",
        "default_host",
        "url_pattern_name",
        "auth_header",
    ];

    /// Assign a dictionary item to its field. Returns false for unknown keys.
    pub fn set_item(&mut self, key: &str, value: String) -> bool {
        let slot = match key {
            "token" => &mut self.token,
            "default_host" => &mut self.default_host,
            "url_pattern_name" => &mut self.url_pattern_name,
            "auth_header" => &mut self.auth_header,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.service_id.clone(),
            self.version.clone(),
            self.dictionary_id.clone(),
            self.token.clone().unwrap_or_default(),
            self.default_host.clone().unwrap_or_default(),
            self.url_pattern_name.clone().unwrap_or_default(),
            self.auth_header.clone().unwrap_or_default(),
        ]
    }
}

/// A TLS subscription flattened from the API's nested JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSubscriptionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub certificate_authority: String,
    pub created_at: String,
    pub state: String,
    pub has_active_order: String,
    pub updated_at: String,
    pub tls_domain_ids: BTreeSet<String>,
}

impl TlsSubscriptionRecord {
    pub const HEADERS: [&'static str; 8] = [
        "id",
        "type",
        "certificate_authority",
        "created_at",
        "state",
        "has_active_order",
        "updated_at",
        "tls_domain_ids",
    ];

    pub fn joined_domain_ids(&self) -> String {
        self.tls_domain_ids.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.kind.clone(),
            self.certificate_authority.clone(),
            self.created_at.clone(),
            self.state.clone(),
            self.has_active_order.clone(),
            self.updated_at.clone(),
            self.joined_domain_ids(),
        ]
    }
}
