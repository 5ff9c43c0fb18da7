use super::canonical::{FinishReason, MessageRole, TurnRole, UsageMetadata};

// ---------------------------------------------------------------------------
// Role mappings
// ---------------------------------------------------------------------------

#[must_use]
pub fn message_role_to_openai(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Provider role for a non-assistant caller turn that carries plain text.
#[must_use]
pub fn turn_role_to_message_role(role: TurnRole) -> MessageRole {
    match role {
        TurnRole::System => MessageRole::System,
        TurnRole::Assistant => MessageRole::Assistant,
        // A tool turn without a result is free text from the caller.
        TurnRole::User | TurnRole::Tool => MessageRole::User,
    }
}

// ---------------------------------------------------------------------------
// Finish reason mappings
// ---------------------------------------------------------------------------

/// Map a Chat Completions `finish_reason` string.
///
/// A tool-call stop is still a natural stop from the caller's point of view.
#[must_use]
pub fn openai_finish_to_normalized(s: &str) -> FinishReason {
    match s {
        "stop" | "tool_calls" | "function_call" => FinishReason::Stop,
        "length" => FinishReason::MaxTokens,
        _ => FinishReason::Other,
    }
}

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

#[must_use]
pub fn usage_from_counts(prompt: u64, output: u64, total: Option<u64>) -> UsageMetadata {
    UsageMetadata {
        prompt_token_count: prompt,
        candidates_token_count: output,
        total_token_count: total.unwrap_or_else(|| prompt.saturating_add(output)),
    }
}
