//! Application configuration, loaded once from the environment.
//!
//! The config is frozen after `from_env()` and passed around by `Arc`.
//! Stages never read environment variables themselves.

use std::env;

use thiserror::Error;

/// Default cap on concurrently in-flight AI requests.
pub const DEFAULT_MAX_CONCURRENT_AI_REQUESTS: usize = 5;

/// Maximum number of source documents a category lookup returns in test mode.
pub const TEST_MODE_MAX_DOCUMENTS: usize = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },
}

/// The kind of audit being performed. Drives the Chapter 4 planning rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditType {
    /// Initial certification or re-certification audit.
    Zertifizierung,
    /// First surveillance audit after certification.
    Ueberwachung1,
    /// Second surveillance audit after certification.
    Ueberwachung2,
}

impl AuditType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zertifizierung => "Zertifizierungsaudit",
            Self::Ueberwachung1 => "1. Überwachungsaudit",
            Self::Ueberwachung2 => "2. Überwachungsaudit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "Zertifizierungsaudit" => Some(Self::Zertifizierung),
            "1. Überwachungsaudit" => Some(Self::Ueberwachung1),
            "2. Überwachungsaudit" => Some(Self::Ueberwachung2),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root directory of the blob store.
    pub store_root: String,
    /// Prefix under which the customer's source documents live.
    pub source_prefix: String,
    /// Prefix under which all pipeline artifacts are written.
    pub output_prefix: String,
    pub audit_type: AuditType,
    pub max_concurrent_ai_requests: usize,
    /// Reduced-workload mode: fewer documents, fewer items per step.
    pub test_mode: bool,
    /// Optional language hint for narrative fields in generated content.
    pub output_language: Option<String>,
    /// Base URL of the structured-generation provider.
    pub ai_base_url: String,
    /// Model identifier passed to the provider.
    pub ai_model: String,
}

impl AppConfig {
    /// Loads and validates configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_root = require("STORE_ROOT")?;
        let source_prefix = require("SOURCE_PREFIX")?;
        let output_prefix = require("OUTPUT_PREFIX")?;

        let audit_type_raw = require("AUDIT_TYPE")?;
        let audit_type =
            AuditType::from_str(&audit_type_raw).ok_or(ConfigError::InvalidValue {
                var: "AUDIT_TYPE",
                value: audit_type_raw,
            })?;

        // Non-numeric values fall back to the default rather than aborting.
        let max_concurrent_ai_requests = env::var("MAX_CONCURRENT_AI_REQUESTS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_CONCURRENT_AI_REQUESTS);

        let test_mode = env::var("TEST")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let output_language = env::var("OUTPUT_LANGUAGE").ok().filter(|v| !v.is_empty());

        let ai_base_url = env::var("AI_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        let ai_model = require("AI_MODEL")?;

        Ok(Self {
            store_root,
            source_prefix: normalize_prefix(&source_prefix),
            output_prefix: normalize_prefix(&output_prefix),
            audit_type,
            max_concurrent_ai_requests,
            test_mode,
            output_language,
            ai_base_url,
            ai_model,
        })
    }

    /// Caps an item count in test mode: at most 10% of `total`, at least 1.
    pub fn test_mode_cap(&self, total: usize) -> usize {
        if !self.test_mode || total == 0 {
            return total;
        }
        (total / 10).max(1)
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(var))
}

/// Prefixes are stored with a trailing slash so key joins stay mechanical.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

pub fn default_log_filter() -> &'static str {
    "pruefwerk=info"
}
