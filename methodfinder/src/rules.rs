//! Ordered classification rules for the translation script tag.
//!
//! Rules are evaluated top to bottom and the first match wins, so the
//! position of a rule in [`RuleSet::standard`] is its priority.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::records::IntegrationMethod;

/// Attribute carrying the primary integration markers
pub const PRIMARY_ATTR: &str = "data-wovnio";
/// Attribute carrying plugin information
pub const INFO_ATTR: &str = "data-wovnio-info";

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"key=([a-zA-Z0-9_-]+)").unwrap());

/// The two data attributes of the script tag, empty when absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptAttributes {
    pub primary: String,
    pub info: String,
}

impl ScriptAttributes {
    pub fn new(primary: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            info: info.into(),
        }
    }

    fn get(&self, attr: Attr) -> &str {
        match attr {
            Attr::Primary => &self.primary,
            Attr::Info => &self.info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Primary,
    Info,
}

#[derive(Debug, Clone)]
pub enum Condition {
    Contains(Attr, &'static str),
    Lacks(Attr, &'static str),
}

impl Condition {
    fn holds(&self, attrs: &ScriptAttributes) -> bool {
        match self {
            Condition::Contains(attr, needle) => attrs.get(*attr).contains(needle),
            Condition::Lacks(attr, needle) => !attrs.get(*attr).contains(needle),
        }
    }
}

/// One (predicate, classification, version extractor) entry.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub method: IntegrationMethod,
    pub conditions: Vec<Condition>,
    /// Applied to `version_attr`; capture group 1 is the version.
    pub version: Option<(Attr, Regex)>,
}

impl Rule {
    pub fn matches(&self, attrs: &ScriptAttributes) -> bool {
        self.conditions.iter().all(|c| c.holds(attrs))
    }

    pub fn extract_version(&self, attrs: &ScriptAttributes) -> Option<String> {
        self.version.as_ref().and_then(|(attr, re)| {
            re.captures(attrs.get(*attr))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub method: IntegrationMethod,
    pub version: Option<String>,
    /// Name of the matching rule, `None` when nothing matched
    pub rule: Option<&'static str>,
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

fn version_re(pattern: &str) -> Regex {
    // Patterns are literals below; a failure here is a programming error.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid version pattern {}: {}", pattern, e))
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The production rule chain, highest priority first.
    pub fn standard() -> Self {
        use Attr::{Info, Primary};
        use Condition::{Contains, Lacks};

        Self::new(vec![
            Rule {
                name: "proxy",
                method: IntegrationMethod::Proxy,
                conditions: vec![Contains(Primary, "backendVersion=WOVN.proxy_")],
                version: Some((Primary, version_re(r"backendVersion=WOVN\.proxy_([0-9.]+)"))),
            },
            Rule {
                name: "php",
                method: IntegrationMethod::PhpLibrary,
                conditions: vec![Contains(Primary, "backendVersion=WOVN.php_")],
                version: Some((Primary, version_re(r"backendVersion=WOVN\.php_([0-9.]+)"))),
            },
            Rule {
                name: "csharp",
                method: IntegrationMethod::CSharpLibrary,
                conditions: vec![Contains(Primary, "version=Wovn.cs_")],
                version: Some((Primary, version_re(r"version=Wovn\.cs_([0-9.]+)"))),
            },
            // Any versioned backend that is not one of the above. Broad on purpose;
            // see DESIGN.md before narrowing it.
            Rule {
                name: "java",
                method: IntegrationMethod::JavaLibrary,
                conditions: vec![Contains(Primary, "version="), Contains(Primary, "backend=true")],
                version: Some((Primary, version_re(r"version=([0-9.]+)"))),
            },
            Rule {
                name: "wordpress",
                method: IntegrationMethod::WordPressPlugin,
                conditions: vec![Contains(Info, "version=WOVN.wp_")],
                version: Some((Info, version_re(r"version=WOVN\.wp_([0-9.]+)"))),
            },
            Rule {
                name: "script-tag",
                method: IntegrationMethod::ScriptTag,
                conditions: vec![Contains(Primary, "key="), Lacks(Primary, "backend")],
                version: None,
            },
        ])
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify a present script tag. A tag no rule recognises is `NotInstalled`.
    pub fn classify(&self, attrs: &ScriptAttributes) -> Classification {
        match self.rules.iter().find(|rule| rule.matches(attrs)) {
            Some(rule) => Classification {
                method: rule.method.clone(),
                version: rule.extract_version(attrs).filter(|v| !v.is_empty()),
                rule: Some(rule.name),
            },
            None => Classification {
                method: IntegrationMethod::NotInstalled,
                version: None,
                rule: None,
            },
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

/// Token embedded in the primary attribute as `key=<token>`.
pub fn extract_token(attrs: &ScriptAttributes) -> Option<String> {
    TOKEN_RE
        .captures(&attrs.primary)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
