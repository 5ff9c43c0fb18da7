use serde_json::Value;

use crate::error::BridgeError;
use crate::protocol::canonical::{FunctionCall, NormalizedResponse, ResponsePart};
use crate::protocol::mapping::{openai_finish_to_normalized, usage_from_counts};
use crate::util::parse_arguments_or_empty;

use super::OpenAiChatResponse;

/// Decode a Chat Completions body.
///
/// # Errors
///
/// Returns [`BridgeError::Translation`] when the body is not a JSON object.
pub fn decode_chat_response_bytes(body: &[u8]) -> Result<NormalizedResponse, BridgeError> {
    let response: OpenAiChatResponse = serde_json::from_slice(body).map_err(|e| {
        BridgeError::Translation(format!("failed to parse chat completion response: {e}"))
    })?;
    Ok(decode_chat_response(&response))
}

/// Decode an `OpenAI` Chat Completions response into the normalized shape.
///
/// Only the first choice is read. A response without choices yields a single
/// empty candidate with no finish reason.
#[must_use]
pub fn decode_chat_response(response: &OpenAiChatResponse) -> NormalizedResponse {
    let choice = response.choices.first();
    let mut parts: Vec<ResponsePart> = Vec::new();

    if let Some(message) = choice.and_then(|c| c.message.as_ref()) {
        let text = content_text(message.content.as_ref());
        if !text.is_empty() {
            parts.push(ResponsePart::Text(text));
        }
        for call in message.tool_calls.iter().flatten() {
            parts.push(ResponsePart::FunctionCall(FunctionCall {
                id: (!call.id.is_empty()).then(|| call.id.clone()),
                name: call.function.name.clone(),
                args: parse_arguments_or_empty(&call.function.arguments),
            }));
        }
    }

    let finish_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(openai_finish_to_normalized);

    let mut normalized = NormalizedResponse::single(parts, finish_reason);
    normalized.usage_metadata = response
        .usage
        .map(|u| usage_from_counts(u.prompt_tokens, u.completion_tokens, u.total_tokens));
    normalized.response_id.clone_from(&response.id);
    normalized
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => {
            let mut out = String::new();
            for part in parts {
                let is_text = part
                    .get("type")
                    .and_then(Value::as_str)
                    .map_or(true, |t| t == "text" || t == "output_text");
                if let (true, Some(text)) = (is_text, part.get("text").and_then(Value::as_str)) {
                    out.push_str(text);
                }
            }
            out
        }
        _ => String::new(),
    }
}
