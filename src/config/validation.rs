use super::{BridgeConfig, ConfigError, ToolHintMode};

/// Validate the full bridge config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &BridgeConfig) -> Result<(), ConfigError> {
    validate_provider(config)?;
    validate_retry(config)?;
    validate_log_level(config)?;
    validate_tool_hint(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_provider(config: &BridgeConfig) -> Result<(), ConfigError> {
    let provider = &config.provider;
    let parsed = url::Url::parse(provider.base_url.trim()).map_err(|err| {
        validation_err(format!("provider.base_url is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(
            "provider.base_url must start with http:// or https://",
        ));
    }
    if provider.model.trim().is_empty() {
        return Err(validation_err("provider.model cannot be empty"));
    }
    if provider.request_timeout_ms == 0 {
        return Err(validation_err(
            "provider.request_timeout_ms must be greater than 0",
        ));
    }
    if provider.max_output_tokens == 0 {
        return Err(validation_err(
            "provider.max_output_tokens must be greater than 0",
        ));
    }
    if let Some(key) = provider.api_key.as_deref() {
        if key.trim().is_empty() {
            return Err(validation_err("provider.api_key cannot be empty when set"));
        }
    }
    for name in provider.extra_headers.keys() {
        if http::HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(validation_err(format!(
                "provider.extra_headers: invalid header name '{name}'"
            )));
        }
    }
    Ok(())
}

fn validate_retry(config: &BridgeConfig) -> Result<(), ConfigError> {
    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(validation_err("retry.max_attempts must be greater than 0"));
    }
    if retry.base_delay_ms > retry.max_delay_ms {
        return Err(validation_err(
            "retry.base_delay_ms must not exceed retry.max_delay_ms",
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter_ratio) {
        return Err(validation_err("retry.jitter_ratio must be within [0, 1]"));
    }
    Ok(())
}

fn validate_log_level(config: &BridgeConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_tool_hint(config: &BridgeConfig) -> Result<(), ConfigError> {
    let Some(pattern) = config.features.tool_hint_pattern.as_deref() else {
        return Ok(());
    };
    if config.features.tool_hint != ToolHintMode::Pattern {
        return Err(validation_err(
            "features.tool_hint_pattern is only used with tool_hint: pattern",
        ));
    }
    let regex = regex_lite::Regex::new(pattern).map_err(|err| {
        validation_err(format!("features.tool_hint_pattern is not a valid regex: {err}"))
    })?;
    if regex.captures_len() < 2 {
        return Err(validation_err(
            "features.tool_hint_pattern needs a capture group naming the tool",
        ));
    }
    Ok(())
}
