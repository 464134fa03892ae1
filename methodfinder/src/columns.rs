//! Header alias resolution
//!
//! Each logical field accepts a small ordered list of header spellings
//! (canonical first, then localized). Resolution happens once per file.

use crate::error::PipelineError;

/// Accepted header spellings for one logical field.
#[derive(Debug, Clone, Copy)]
pub struct ColumnAliases {
    pub field: &'static str,
    pub aliases: &'static [&'static str],
    pub case_insensitive: bool,
}

pub const SPLIT_TOKEN: ColumnAliases = ColumnAliases::exact("token", &["token", "トークンキー"]);
pub const SPLIT_DOMAINS: ColumnAliases = ColumnAliases::exact("url", &["url", "WOVN.io: 許可ドメインリスト"]);

pub const TARGET_TOKEN: ColumnAliases = ColumnAliases::any_case("token", &["token"]);
pub const TARGET_URL: ColumnAliases = ColumnAliases::any_case("url", &["url"]);

pub const METHOD: ColumnAliases = ColumnAliases::exact("method", &["導入方式", "method"]);
pub const JOIN_TOKEN: ColumnAliases = ColumnAliases::exact("token", &["token"]);
pub const INTEGRATION_METHOD: ColumnAliases = ColumnAliases::exact("integration_method", &["integration_method"]);
pub const DEFAULT_HOST: ColumnAliases = ColumnAliases::exact("default_host", &["default_host"]);
pub const TLS_DOMAIN_IDS: ColumnAliases = ColumnAliases::exact("tls_domain_ids", &["tls_domain_ids"]);

/// Header written for the method column of detection output.
pub const METHOD_HEADER: &str = "導入方式";
/// Header written for the version column of detection output.
pub const VERSION_HEADER: &str = "バージョン";

impl ColumnAliases {
    pub const fn exact(field: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { field, aliases, case_insensitive: false }
    }

    pub const fn any_case(field: &'static str, aliases: &'static [&'static str]) -> Self {
        Self { field, aliases, case_insensitive: true }
    }

    /// Index of the first alias present in `headers`, in alias order.
    pub fn find<S: AsRef<str>>(&self, headers: &[S]) -> Option<usize> {
        self.aliases.iter().find_map(|alias| {
            headers.iter().position(|h| {
                let h = clean_header(h.as_ref());
                if self.case_insensitive {
                    h.to_lowercase() == alias.to_lowercase()
                } else {
                    h == *alias
                }
            })
        })
    }

    pub fn resolve<S: AsRef<str>>(&self, headers: &[S], file: &str) -> Result<usize, PipelineError> {
        self.find(headers).ok_or_else(|| PipelineError::MissingColumn {
            file: file.to_string(),
            field: self.field.to_string(),
            expected: self
                .aliases
                .iter()
                .map(|a| format!("'{}'", a))
                .collect::<Vec<_>>()
                .join(" or "),
        })
    }
}

/// Strip a UTF-8 byte-order mark left on the first header by spreadsheet exports.
pub fn clean_header(header: &str) -> &str {
    header.trim_start_matches('\u{feff}')
}
