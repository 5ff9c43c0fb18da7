pub mod token_counter;

use tracing_subscriber::EnvFilter;

use crate::protocol::canonical::{UsageMetadata, WireProtocol};

/// Map a configured level name to a tracing filter directive.
///
/// `None` means logging is disabled.
#[must_use]
pub fn filter_directive(log_level: &str) -> Option<String> {
    let level = log_level.trim().to_uppercase();
    match level.as_str() {
        "DISABLED" => None,
        "WARNING" => Some("WARN".to_string()),
        "CRITICAL" => Some("ERROR".to_string()),
        _ => Some(level),
    }
}

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
pub fn init_tracing(log_level: &str) {
    let Some(directive) = filter_directive(log_level) else {
        return;
    };

    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Log token usage for a completed request, computing duration from start time.
pub fn log_request_complete(
    model: &str,
    protocol: WireProtocol,
    usage: &UsageMetadata,
    start_time: std::time::Instant,
) {
    token_counter::log_request_usage(model, protocol, usage, start_time.elapsed());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directive_mapping() {
        assert_eq!(filter_directive("warning").as_deref(), Some("WARN"));
        assert_eq!(filter_directive("CRITICAL").as_deref(), Some("ERROR"));
        assert_eq!(filter_directive("debug").as_deref(), Some("DEBUG"));
        assert_eq!(filter_directive("Disabled"), None);
    }
}
