//! Typed configuration.
//!
//! [`SwarmConfig`] holds the coordinator options. It is built once, checked
//! by [`SwarmConfig::validate`], and shared read-only by every client.
//! [`Config`] is the process-level configuration loaded from environment
//! variables at startup; sensitive values are wrapped in
//! `secrecy::SecretString` to keep them out of logs.

pub mod duration;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use duration::{DurationUnit, StaleAfter};

pub const DEFAULT_ENTITY_KIND: &str = "Job";
pub const DEFAULT_ENVIRONMENT: &str = "testing";
pub const DEFAULT_MAX_FIELD_LENGTH: usize = 1_000_000;
pub const DEFAULT_MAX_INDEX_LENGTH: usize = 1500;
pub const DEFAULT_MAX_DELETE_LENGTH: usize = 500;

// ---------------------------------------------------------------------------
// Coordinator options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub project_id: String,
    pub namespace: String,
    /// Collection jobs live in.
    pub entity_kind: String,
    /// Grants the privileged `Controller` client.
    pub controller: bool,
    /// Stamped on every job at creation.
    pub environment: String,
    /// Active jobs started longer ago than this are stale.
    pub stale_after: Option<String>,
    /// Reserved jobs reserved longer ago than this are stale.
    pub stale_after_reserved: Option<String>,
    /// Payloads of at least this many bytes are chunked.
    pub max_field_length: usize,
    /// Field values of at least this many bytes are not indexed.
    pub max_index_length: usize,
    /// Keys per delete call.
    pub max_delete_length: usize,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            namespace: String::new(),
            entity_kind: DEFAULT_ENTITY_KIND.to_string(),
            controller: false,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            stale_after: None,
            stale_after_reserved: None,
            max_field_length: DEFAULT_MAX_FIELD_LENGTH,
            max_index_length: DEFAULT_MAX_INDEX_LENGTH,
            max_delete_length: DEFAULT_MAX_DELETE_LENGTH,
        }
    }
}

impl SwarmConfig {
    /// Defaults for everything but the two required options.
    pub fn new(project_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Check required options and parse staleness durations that are set.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("project_id", &self.project_id),
            ("namespace", &self.namespace),
            ("entity_kind", &self.entity_kind),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!(
                    "property {name} is required and must be a non-empty string"
                )));
            }
        }
        for (name, value) in [
            ("max_field_length", self.max_field_length),
            ("max_index_length", self.max_index_length),
            ("max_delete_length", self.max_delete_length),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        parse_stale("stale_after", self.stale_after.as_deref())?;
        parse_stale("stale_after_reserved", self.stale_after_reserved.as_deref())?;
        Ok(())
    }

    /// Both staleness cutoffs relative to `now`: (active, reserved).
    pub fn stale_cutoffs(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let active = parse_stale("stale_after", self.stale_after.as_deref())?
            .ok_or_else(|| missing_stale("stale_after"))?;
        let reserved = parse_stale("stale_after_reserved", self.stale_after_reserved.as_deref())?
            .ok_or_else(|| missing_stale("stale_after_reserved"))?;
        Ok((active.cutoff(now)?, reserved.cutoff(now)?))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: SwarmConfig =
            toml::from_str(s).map_err(|e| Error::Config(format!("bad swarm config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read swarm config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `JOBSWARM_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            project_id: required_var("JOBSWARM_PROJECT_ID")?,
            namespace: required_var("JOBSWARM_NAMESPACE")?,
            entity_kind: std::env::var("JOBSWARM_ENTITY_KIND").unwrap_or(defaults.entity_kind),
            controller: parsed_var("JOBSWARM_CONTROLLER")?.unwrap_or(false),
            environment: std::env::var("JOBSWARM_ENVIRONMENT").unwrap_or(defaults.environment),
            stale_after: std::env::var("JOBSWARM_STALE_AFTER").ok(),
            stale_after_reserved: std::env::var("JOBSWARM_STALE_AFTER_RESERVED").ok(),
            max_field_length: parsed_var("JOBSWARM_MAX_FIELD_LENGTH")?
                .unwrap_or(defaults.max_field_length),
            max_index_length: parsed_var("JOBSWARM_MAX_INDEX_LENGTH")?
                .unwrap_or(defaults.max_index_length),
            max_delete_length: parsed_var("JOBSWARM_MAX_DELETE_LENGTH")?
                .unwrap_or(defaults.max_delete_length),
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse_stale(name: &str, value: Option<&str>) -> Result<Option<StaleAfter>> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}: {e}"))),
    }
}

fn missing_stale(name: &str) -> Error {
    Error::Config(format!(
        "stale job queries require the controller to be configured with a {name} value"
    ))
}

// ---------------------------------------------------------------------------
// Process configuration
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub swarm: SwarmConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// The swarm options come from the TOML file named by `JOBSWARM_CONFIG`
    /// when set, otherwise from `JOBSWARM_*` variables. In local dev, call
    /// `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let swarm = match std::env::var("JOBSWARM_CONFIG") {
            Ok(path) => SwarmConfig::load(Path::new(&path))?,
            Err(_) => SwarmConfig::from_env()?,
        };
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            swarm,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SwarmConfig::new("proj", "ns");
        assert_eq!(config.entity_kind, "Job");
        assert!(!config.controller);
        assert_eq!(config.max_index_length, 1500);
        assert_eq!(config.max_delete_length, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_required_options_fail_validation() {
        assert!(matches!(
            SwarmConfig::default().validate(),
            Err(Error::Config(_))
        ));
        let config = SwarmConfig {
            entity_kind: " ".into(),
            ..SwarmConfig::new("proj", "ns")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_stale_duration_fails_validation() {
        let config = SwarmConfig {
            stale_after: Some("soon".into()),
            ..SwarmConfig::new("proj", "ns")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stale_after"), "{err}");
    }

    #[test]
    fn stale_cutoffs_require_both_durations() {
        let config = SwarmConfig {
            stale_after: Some("30 minutes".into()),
            ..SwarmConfig::new("proj", "ns")
        };
        let err = config.stale_cutoffs(Utc::now()).unwrap_err();
        assert!(err.to_string().contains("stale_after_reserved"), "{err}");
    }

    #[test]
    fn toml_fills_defaults() {
        let config = SwarmConfig::from_toml_str(
            r#"
            project_id = "proj"
            namespace = "render-farm"
            controller = true
            stale_after = "30 minutes"
            stale_after_reserved = "10 minutes"
            max_delete_length = 100
            "#,
        )
        .unwrap();
        assert!(config.controller);
        assert_eq!(config.entity_kind, "Job");
        assert_eq!(config.max_delete_length, 100);
        assert_eq!(config.max_field_length, DEFAULT_MAX_FIELD_LENGTH);
    }
}
