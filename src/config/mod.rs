pub mod validation;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::canonical::WireProtocol;
use crate::protocol::DEFAULT_MAX_OUTPUT_TOKENS;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// The single backend the bridge talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default)]
    pub protocol: WireProtocol,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u64,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}
fn default_max_output_tokens() -> u64 {
    DEFAULT_MAX_OUTPUT_TOKENS
}

impl ProviderConfig {
    /// Minimal config for `base_url` and `model`; everything else defaulted.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path_suffix: None,
            api_key: None,
            model: model.into(),
            protocol: WireProtocol::default(),
            request_timeout_ms: default_request_timeout_ms(),
            max_output_tokens: default_max_output_tokens(),
            extra_headers: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Retry budget for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_jitter_ratio() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

/// How the latest user text may pre-select a forced tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ToolHintMode {
    Off,
    Mention,
    #[default]
    Pattern,
}

impl fmt::Display for ToolHintMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolHintMode::Off => write!(f, "off"),
            ToolHintMode::Mention => write!(f, "mention"),
            ToolHintMode::Pattern => write!(f, "pattern"),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub tool_hint: ToolHintMode,
    /// Overrides the built-in hint regex; capture group 1 names the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_hint_pattern: Option<String>,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tool_hint: ToolHintMode::default(),
            tool_hint_pattern: None,
        }
    }
}

/// Top-level bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

impl BridgeConfig {
    #[must_use]
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            retry: RetryConfig::default(),
            features: FeaturesConfig::default(),
        }
    }
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<BridgeConfig, ConfigError> {
    let config: BridgeConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<BridgeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.provider.protocol, WireProtocol::Responses);
        assert_eq!(config.provider.request_timeout_ms, 120_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.features.tool_hint, ToolHintMode::Pattern);
        assert_eq!(
            config.provider.extra_headers.get("x-client").map(String::as_str),
            Some("protobridge")
        );
    }

    #[test]
    fn test_minimal_yaml_gets_defaults() {
        let config = parse_config(
            "provider:\n  base_url: http://localhost:8080/v1\n  model: local\n",
        )
        .unwrap();
        assert_eq!(config.provider.protocol, WireProtocol::Chat);
        assert_eq!(config.provider.max_output_tokens, DEFAULT_MAX_OUTPUT_TOKENS);
        assert!(config.provider.api_key.is_none());
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.features.log_level, "INFO");
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let err = parse_config(
            "provider:\n  base_url: http://h/v1\n  model: m\n  protocol: grpc\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_tool_hint_mode_serde() {
        let json = serde_json::to_string(&ToolHintMode::Mention).unwrap();
        assert_eq!(json, "\"mention\"");
        let mode: ToolHintMode = serde_json::from_str("\"off\"").unwrap();
        assert_eq!(mode, ToolHintMode::Off);
        assert_eq!(ToolHintMode::default().to_string(), "pattern");
    }
}
