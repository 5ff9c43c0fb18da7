use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::protocol::canonical::{
    FinishReason, FunctionCall, NormalizedResponse, ResponsePart, UsageMetadata,
};
use crate::protocol::mapping::usage_from_counts;
use crate::util::parse_arguments_or_empty;

const CALL_ITEM_TYPES: [&str; 2] = ["function_call", "tool_call"];

/// Parse a Responses API body into JSON, ready for [`decode_responses_output`]
/// and [`responses_output_has_tool_call`].
///
/// # Errors
///
/// Returns [`BridgeError::Translation`] when the body is not valid JSON.
pub fn parse_responses_body(body: &[u8]) -> Result<Value, BridgeError> {
    serde_json::from_slice(body)
        .map_err(|e| BridgeError::Translation(format!("failed to parse responses body: {e}")))
}

/// Decode a Responses API response object into the normalized shape.
///
/// The `output` array is walked structurally; unknown item types are skipped.
/// The finish reason is always [`FinishReason::Stop`].
#[must_use]
pub fn decode_responses_output(response: &Value) -> NormalizedResponse {
    let mut parts: Vec<ResponsePart> = Vec::new();

    for item in output_items(response) {
        match item_type(item) {
            Some("output_text") => push_text(&mut parts, item),
            Some(t) if CALL_ITEM_TYPES.contains(&t) => push_call(&mut parts, item),
            Some("message") => {
                let content = item.get("content").and_then(Value::as_array);
                for entry in content.into_iter().flatten() {
                    match item_type(entry) {
                        Some("output_text") => push_text(&mut parts, entry),
                        Some(t) if CALL_ITEM_TYPES.contains(&t) => push_call(&mut parts, entry),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let mut normalized = NormalizedResponse::single(parts, Some(FinishReason::Stop));
    normalized.usage_metadata = response.get("usage").and_then(usage_from_value);
    normalized.response_id = response
        .get("response_id")
        .or_else(|| response.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    normalized
}

/// Whether a Responses API response holds at least one tool-call item.
#[must_use]
pub fn responses_output_has_tool_call(response: &Value) -> bool {
    output_items(response).any(|item| match item_type(item) {
        Some(t) if CALL_ITEM_TYPES.contains(&t) => true,
        Some("message") => item
            .get("content")
            .and_then(Value::as_array)
            .is_some_and(|content| {
                content
                    .iter()
                    .any(|entry| item_type(entry).is_some_and(|t| CALL_ITEM_TYPES.contains(&t)))
            }),
        _ => false,
    })
}

/// Read token counts, accepting `*_tokens`, `*_token_count` and Chat-style names.
#[must_use]
pub fn usage_from_value(usage: &Value) -> Option<UsageMetadata> {
    let map = usage.as_object()?;
    let prompt = first_count(
        map,
        &[
            "input_tokens",
            "input_token_count",
            "prompt_tokens",
            "prompt_token_count",
        ],
    )
    .unwrap_or(0);
    let output = first_count(
        map,
        &[
            "output_tokens",
            "output_token_count",
            "completion_tokens",
            "completion_token_count",
        ],
    )
    .unwrap_or(0);
    let total = first_count(map, &["total_tokens", "total_token_count"]);
    Some(usage_from_counts(prompt, output, total))
}

/// Build a normalized function call from a Responses call item.
pub(crate) fn call_from_item(item: &Value) -> Option<FunctionCall> {
    let name = item.get("name").and_then(Value::as_str)?;
    let id = item
        .get("call_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let args = match item.get("arguments") {
        Some(Value::String(text)) => parse_arguments_or_empty(text),
        Some(value @ Value::Object(_)) => value.clone(),
        _ => Value::Object(Map::new()),
    };
    Some(FunctionCall {
        id,
        name: name.to_string(),
        args,
    })
}

pub(crate) fn item_type(item: &Value) -> Option<&str> {
    item.get("type").and_then(Value::as_str)
}

fn output_items(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn first_count(map: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| map.get(*key).and_then(Value::as_u64))
}

fn push_text(parts: &mut Vec<ResponsePart>, item: &Value) {
    if let Some(text) = item.get("text").and_then(Value::as_str) {
        if !text.is_empty() {
            parts.push(ResponsePart::Text(text.to_string()));
        }
    }
}

fn push_call(parts: &mut Vec<ResponsePart>, item: &Value) {
    if let Some(call) = call_from_item(item) {
        parts.push(ResponsePart::FunctionCall(call));
    }
}
