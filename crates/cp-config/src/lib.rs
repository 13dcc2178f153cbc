// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for the comfy-pilot daemon.
//!
//! This crate provides [`CpConfig`] — the top-level runtime settings —
//! together with helpers for loading from TOML files, merging overlays,
//! and producing advisory [`ConfigWarning`]s. Mirrors the shape of the
//! teacher's `abp-config`.

#![deny(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// A correction retry budget is unusually large.
    LargeRetryBudget {
        /// The configured value.
        max_correction_retries: u32,
    },
    /// A hosted backend is configured without an API key available in its
    /// named environment variable (checked at validation time, not load
    /// time, since the process may export it later).
    MissingApiKeyEnv {
        /// Backend name.
        backend: String,
        /// Environment variable that was expected to hold the key.
        env_var: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeRetryBudget {
                max_correction_retries,
            } => {
                write!(
                    f,
                    "max_correction_retries is unusually large ({max_correction_retries})"
                )
            }
            ConfigWarning::MissingApiKeyEnv { backend, env_var } => {
                write!(
                    f,
                    "backend '{backend}' expects its API key in ${env_var}, which is not set"
                )
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration for the comfy-pilot daemon.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CpConfig {
    /// Base URL of the execution host (§6: default `http://127.0.0.1:8188`).
    #[serde(default = "default_host_base_url")]
    pub host_base_url: String,

    /// Address the daemon's HTTP server binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Retry budget for the correction loop (§6: tunable, default 3).
    #[serde(default = "default_max_correction_retries")]
    pub max_correction_retries: u32,

    /// Root directory of markdown knowledge documents (canonical tree;
    /// `{knowledge_dir}/user` is scanned as the user subtree).
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: String,

    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Named backend definitions.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendEntry>,
}

fn default_host_base_url() -> String {
    "http://127.0.0.1:8188".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:8189".to_string()
}

fn default_max_correction_retries() -> u32 {
    3
}

fn default_knowledge_dir() -> String {
    "knowledge".to_string()
}

impl Default for CpConfig {
    fn default() -> Self {
        Self {
            host_base_url: default_host_base_url(),
            bind_address: default_bind_address(),
            max_correction_retries: default_max_correction_retries(),
            knowledge_dir: default_knowledge_dir(),
            log_level: Some("info".into()),
            backends: BTreeMap::new(),
        }
    }
}

/// Configuration for a single backend (§4.5).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum BackendEntry {
    /// A deterministic backend for tests/demos; carries no settings.
    #[serde(rename = "mock")]
    Mock {},
    /// A local, Ollama-compatible model server (`cp-backend-local`).
    #[serde(rename = "local")]
    Local {
        /// Base URL of the local model server.
        base_url: String,
        /// Models advertised to callers.
        #[serde(default)]
        models: Vec<String>,
    },
    /// A large-context hosted API (`cp-backend-hosted`).
    #[serde(rename = "hosted")]
    Hosted {
        /// Base URL of the hosted API.
        base_url: String,
        /// Name of the environment variable holding the API key — the key
        /// itself is never written to the config file.
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        /// Models advertised to callers.
        #[serde(default)]
        models: Vec<String>,
    },
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Above this, a warning is emitted (still valid — just worth a second look).
const LARGE_RETRY_THRESHOLD: u32 = 10;

/// Hard ceiling; more than this is rejected outright.
const MAX_RETRY_CEILING: u32 = 100;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`CpConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, returns [`CpConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<CpConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => CpConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`CpConfig`].
pub fn parse_toml(content: &str) -> Result<CpConfig, ConfigError> {
    toml::from_str::<CpConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides.
///
/// Recognised variables:
/// - `CP_HOST_BASE_URL`
/// - `CP_BIND_ADDRESS`
/// - `CP_MAX_CORRECTION_RETRIES`
/// - `CP_KNOWLEDGE_DIR`
/// - `CP_LOG_LEVEL`
pub fn apply_env_overrides(config: &mut CpConfig) {
    if let Ok(val) = std::env::var("CP_HOST_BASE_URL") {
        config.host_base_url = val;
    }
    if let Ok(val) = std::env::var("CP_BIND_ADDRESS") {
        config.bind_address = val;
    }
    if let Ok(val) = std::env::var("CP_MAX_CORRECTION_RETRIES") {
        if let Ok(parsed) = val.parse::<u32>() {
            config.max_correction_retries = parsed;
        }
    }
    if let Ok(val) = std::env::var("CP_KNOWLEDGE_DIR") {
        config.knowledge_dir = val;
    }
    if let Ok(val) = std::env::var("CP_LOG_LEVEL") {
        config.log_level = Some(val);
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, returning advisory warnings.
///
/// Hard errors (unparseable URLs, zero/excessive retry budgets, empty
/// backend base URLs) are returned as a [`ConfigError::ValidationError`];
/// soft issues come back as warnings.
pub fn validate_config(config: &CpConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level {
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            errors.push(format!("invalid log_level '{level}'"));
        }
    }

    if !config.host_base_url.starts_with("http://") && !config.host_base_url.starts_with("https://") {
        errors.push(format!(
            "host_base_url '{}' must start with http:// or https://",
            config.host_base_url
        ));
    }

    if config.max_correction_retries == 0 {
        errors.push("max_correction_retries must be at least 1".to_string());
    } else if config.max_correction_retries > MAX_RETRY_CEILING {
        errors.push(format!(
            "max_correction_retries {} exceeds the ceiling of {MAX_RETRY_CEILING}",
            config.max_correction_retries
        ));
    } else if config.max_correction_retries > LARGE_RETRY_THRESHOLD {
        warnings.push(ConfigWarning::LargeRetryBudget {
            max_correction_retries: config.max_correction_retries,
        });
    }

    if config.knowledge_dir.trim().is_empty() {
        errors.push("knowledge_dir must not be empty".to_string());
    }

    for (name, backend) in &config.backends {
        if name.is_empty() {
            errors.push("backend name must not be empty".to_string());
        }

        match backend {
            BackendEntry::Mock {} => {}
            BackendEntry::Local { base_url, .. } => {
                if base_url.trim().is_empty() {
                    errors.push(format!("backend '{name}': base_url must not be empty"));
                }
            }
            BackendEntry::Hosted {
                base_url,
                api_key_env,
                ..
            } => {
                if base_url.trim().is_empty() {
                    errors.push(format!("backend '{name}': base_url must not be empty"));
                }
                if std::env::var(api_key_env).is_err() {
                    warnings.push(ConfigWarning::MissingApiKeyEnv {
                        backend: name.clone(),
                        env_var: api_key_env.clone(),
                    });
                }
            }
        }
    }

    if config.backends.is_empty() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "backends".into(),
            hint: "no backends configured; only the chat endpoint's agent_not_found path will exercise".into(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over `base`.
///
/// Backend maps are combined; on name collisions the overlay entry wins.
pub fn merge_configs(base: CpConfig, overlay: CpConfig) -> CpConfig {
    let mut backends = base.backends;
    backends.extend(overlay.backends);
    CpConfig {
        host_base_url: if overlay.host_base_url == default_host_base_url() {
            base.host_base_url
        } else {
            overlay.host_base_url
        },
        bind_address: if overlay.bind_address == default_bind_address() {
            base.bind_address
        } else {
            overlay.bind_address
        },
        max_correction_retries: overlay.max_correction_retries,
        knowledge_dir: if overlay.knowledge_dir == default_knowledge_dir() {
            base.knowledge_dir
        } else {
            overlay.knowledge_dir
        },
        log_level: overlay.log_level.or(base.log_level),
        backends,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
