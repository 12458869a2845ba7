//! Compatibility descriptor lookup and the language level it implies.

use std::path::Path;

use serde::Serialize;
use swc_core::ecma::ast::EsVersion;
use tracing::debug;

use crate::errors::{DashpackError, Result};

pub const BROWSERSLIST_ENV: &str = "BROWSERSLIST";
pub const BROWSERSLIST_FILE: &str = ".browserslistrc";

/// The syntax level bundles are lowered to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageLevel {
    /// ES3 with ie8 quirks: reserved-word property names quoted
    Es3,
    Es5,
}

impl LanguageLevel {
    pub fn es_version(self) -> EsVersion {
        match self {
            Self::Es3 => EsVersion::Es3,
            Self::Es5 => EsVersion::Es5,
        }
    }

    pub fn is_ie8(self) -> bool {
        self == Self::Es3
    }
}

impl std::fmt::Display for LanguageLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Es3 => write!(f, "es3"),
            Self::Es5 => write!(f, "es5"),
        }
    }
}

/// Browser queries the bundles must run on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatDescriptor {
    pub queries: Vec<String>,
    pub source: String,
}

impl CompatDescriptor {
    /// Look the descriptor up: environment, `.browserslistrc`, then `package.json`
    pub fn load(root: &Path) -> Result<Self> {
        if let Ok(value) = std::env::var(BROWSERSLIST_ENV) {
            let queries = split_queries(&value);
            if !queries.is_empty() {
                return Ok(Self {
                    queries,
                    source: format!("${}", BROWSERSLIST_ENV),
                });
            }
        }

        let rc_path = root.join(BROWSERSLIST_FILE);
        if rc_path.is_file() {
            let content = std::fs::read_to_string(&rc_path).map_err(|e| {
                DashpackError::file_system_error("Failed to read browserslist file", &rc_path, e)
            })?;
            let queries = parse_browserslistrc(&content);
            if !queries.is_empty() {
                return Ok(Self {
                    queries,
                    source: rc_path.display().to_string(),
                });
            }
        }

        let package_path = root.join("package.json");
        if package_path.is_file() {
            let content = std::fs::read_to_string(&package_path).map_err(|e| {
                DashpackError::file_system_error("Failed to read package.json", &package_path, e)
            })?;
            let package: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                DashpackError::configuration_with_source(
                    format!("Invalid {}", package_path.display()),
                    e,
                )
            })?;

            let queries = match package.get("browserslist") {
                Some(serde_json::Value::String(s)) => split_queries(s),
                Some(serde_json::Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| v.as_str())
                    .flat_map(split_queries)
                    .collect(),
                _ => Vec::new(),
            };

            if !queries.is_empty() {
                return Ok(Self {
                    queries,
                    source: package_path.display().to_string(),
                });
            }
        }

        Err(DashpackError::configuration(format!(
            "No browser compatibility descriptor found: set ${}, add {} or a \"browserslist\" field to package.json in {}",
            BROWSERSLIST_ENV,
            BROWSERSLIST_FILE,
            root.display()
        )))
    }

    /// Internet Explorer 8 or older anywhere in the queries means ES3
    pub fn language_level(&self) -> LanguageLevel {
        let level = if self.queries.iter().any(|q| targets_old_ie(q)) {
            LanguageLevel::Es3
        } else {
            LanguageLevel::Es5
        };
        debug!("Compatibility descriptor from {} selects {}", self.source, level);
        level
    }
}

fn parse_browserslistrc(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default())
        .filter(|line| !line.trim_start().starts_with('['))
        .flat_map(split_queries)
        .collect()
}

fn split_queries(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

fn targets_old_ie(query: &str) -> bool {
    let query = query.to_ascii_lowercase();
    if query.starts_with("not ") {
        return false;
    }

    let mut parts = query.split_whitespace();
    let browser = parts.next().unwrap_or_default();
    if browser != "ie" && browser != "explorer" {
        return false;
    }

    let rest: Vec<&str> = parts.collect();
    let version = match rest.as_slice() {
        [v] => *v,
        ["<=", v] | ["<", v] => *v,
        ["-", ..] | [] => return false,
        [v, "-", _] => *v,
        _ => return false,
    };

    version
        .split(['-', '.'])
        .next()
        .and_then(|major| major.parse::<u32>().ok())
        .map(|major| major <= 8)
        .unwrap_or(false)
}
