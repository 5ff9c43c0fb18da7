use std::time::Duration;

use tracing::info;

use crate::protocol::canonical::{ProviderMessage, UsageMetadata, WireProtocol};

/// Rough token count for `text` (`bytes / 4`, rounded up).
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Estimate the prompt tokens of a normalized message sequence.
#[must_use]
pub fn estimate_prompt_tokens(messages: &[ProviderMessage]) -> u64 {
    messages
        .iter()
        .map(|message| match message {
            ProviderMessage::Chat {
                text, tool_calls, ..
            } => {
                estimate_tokens(text)
                    + tool_calls
                        .iter()
                        .map(|call| estimate_tokens(&call.name) + estimate_tokens(&call.arguments))
                        .sum::<u64>()
            }
            ProviderMessage::ToolResult { content, .. } => estimate_tokens(content),
        })
        .sum()
}

/// Fill zero or missing upstream counts with local estimates.
///
/// Non-zero upstream values are never overwritten; the total is recomputed
/// from the resolved parts when the upstream left it at zero.
#[must_use]
pub fn merge_usage(
    upstream: Option<UsageMetadata>,
    estimated_prompt: u64,
    estimated_output: u64,
) -> UsageMetadata {
    let upstream = upstream.unwrap_or_default();
    let prompt = if upstream.prompt_token_count > 0 {
        upstream.prompt_token_count
    } else {
        estimated_prompt
    };
    let output = if upstream.candidates_token_count > 0 {
        upstream.candidates_token_count
    } else {
        estimated_output
    };
    let total = if upstream.total_token_count > 0 {
        upstream.total_token_count
    } else {
        prompt + output
    };
    UsageMetadata {
        prompt_token_count: prompt,
        candidates_token_count: output,
        total_token_count: total,
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(
    model: &str,
    protocol: WireProtocol,
    usage: &UsageMetadata,
    duration: Duration,
) {
    info!(
        model = model,
        protocol = %protocol,
        prompt_tokens = usage.prompt_token_count,
        output_tokens = usage.candidates_token_count,
        total_tokens = usage.total_token_count,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{MessageRole, ToolCall};

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_estimate_prompt_counts_calls_and_results() {
        let messages = vec![
            ProviderMessage::text(MessageRole::User, "abcdefgh"),
            ProviderMessage::Chat {
                role: MessageRole::Assistant,
                text: String::new(),
                tool_calls: vec![ToolCall {
                    id: "a1".into(),
                    name: "read".into(),
                    arguments: "{\"p\":1}".into(),
                }],
            },
            ProviderMessage::ToolResult {
                tool_call_id: "a1".into(),
                content: "ok".into(),
            },
        ];
        assert_eq!(estimate_prompt_tokens(&messages), 2 + 1 + 2 + 1);
    }

    #[test]
    fn test_merge_usage_prefers_upstream() {
        let upstream = UsageMetadata {
            prompt_token_count: 100,
            candidates_token_count: 50,
            total_token_count: 150,
        };
        assert_eq!(merge_usage(Some(upstream), 999, 999), upstream);
    }

    #[test]
    fn test_merge_usage_fills_missing() {
        let merged = merge_usage(None, 40, 20);
        assert_eq!(merged.prompt_token_count, 40);
        assert_eq!(merged.candidates_token_count, 20);
        assert_eq!(merged.total_token_count, 60);
    }

    #[test]
    fn test_merge_usage_partial_upstream() {
        let upstream = UsageMetadata {
            prompt_token_count: 100,
            candidates_token_count: 0,
            total_token_count: 0,
        };
        let merged = merge_usage(Some(upstream), 50, 25);
        assert_eq!(merged.prompt_token_count, 100);
        assert_eq!(merged.candidates_token_count, 25);
        assert_eq!(merged.total_token_count, 125);
    }
}
