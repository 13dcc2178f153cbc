// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-query backend configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    4096
}

/// Configuration accepted by [`Backend::query`](crate) implementations.
///
/// Unrecognized vendor-specific knobs live in `extra` rather than failing
/// deserialization — backends are free to ignore keys they don't recognize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Requested model identifier, if the caller wants a non-default model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,

    /// Sampling temperature, expected in `[0, 2]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Hard cap on generated tokens.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Composed system prompt for this query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Opaque vendor-specific extras, passed through untouched.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model_identifier: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            system_prompt: None,
            extra: BTreeMap::new(),
        }
    }
}

impl BackendConfig {
    /// Build a config carrying the given system prompt and otherwise-default values.
    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Self::default()
        }
    }

    /// Returns `true` if `temperature` and `max_output_tokens` are within
    /// the ranges recognized by `spec.md` §3.
    pub fn is_valid(&self) -> bool {
        (0.0..=2.0).contains(&self.temperature) && self.max_output_tokens > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = BackendConfig::default();
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.max_output_tokens, 4096);
        assert!(cfg.model_identifier.is_none());
        assert!(cfg.is_valid());
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let cfg: BackendConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.max_output_tokens, 4096);
    }

    #[test]
    fn out_of_range_temperature_is_invalid() {
        let cfg = BackendConfig {
            temperature: 2.5,
            ..BackendConfig::default()
        };
        assert!(!cfg.is_valid());
    }

    #[test]
    fn zero_max_tokens_is_invalid() {
        let cfg = BackendConfig {
            max_output_tokens: 0,
            ..BackendConfig::default()
        };
        assert!(!cfg.is_valid());
    }
}
