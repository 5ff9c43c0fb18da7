use crate::error::BridgeError;
use crate::protocol::canonical::{declarations, MessageRole, ProviderMessage, WireRequestPlan};
use crate::protocol::mapping::message_role_to_openai;
use crate::protocol::DEFAULT_MAX_OUTPUT_TOKENS;

use super::{
    ResponsesFunctionCallItem, ResponsesFunctionCallOutputItem, ResponsesInputContent,
    ResponsesInputItem, ResponsesInputMessage, ResponsesRequest, ResponsesTool,
    ResponsesToolChoice,
};

/// Encode a request plan into the `OpenAI` Responses API wire format.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] when the plan has no model.
pub fn encode_responses_request(
    plan: &WireRequestPlan<'_>,
) -> Result<ResponsesRequest, BridgeError> {
    if plan.model.is_empty() {
        return Err(BridgeError::InvalidRequest(
            "model must not be empty".to_string(),
        ));
    }

    let input = encode_input(plan.messages);

    let tools: Vec<ResponsesTool> = declarations(plan.tools)
        .map(|decl| ResponsesTool::Function {
            name: decl.name.clone(),
            description: decl.description.clone(),
            parameters: decl.parameters_json_schema.clone(),
        })
        .collect();

    let tool_choice = if tools.is_empty() {
        None
    } else {
        Some(match plan.declared_forced_tool() {
            Some(name) => ResponsesToolChoice::Function {
                type_: "function".to_string(),
                name: name.to_string(),
            },
            None => ResponsesToolChoice::Mode("auto".to_string()),
        })
    };

    Ok(ResponsesRequest {
        model: plan.model.to_string(),
        input,
        max_output_tokens: plan
            .options
            .max_output_tokens
            .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        temperature: plan.options.temperature,
        top_p: plan.options.top_p,
        stream: plan.stream.then_some(true),
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
    })
}

/// Encode and serialize in one step.
///
/// # Errors
///
/// Returns [`BridgeError`] when encoding or serialization fails.
pub fn encode_responses_request_bytes(
    plan: &WireRequestPlan<'_>,
) -> Result<Vec<u8>, BridgeError> {
    let request = encode_responses_request(plan)?;
    serde_json::to_vec(&request).map_err(|e| {
        BridgeError::Translation(format!("failed to serialize responses request: {e}"))
    })
}

/// Project provider messages onto the flat `input` item list.
#[must_use]
pub fn encode_input(messages: &[ProviderMessage]) -> Vec<ResponsesInputItem> {
    let mut input = Vec::with_capacity(messages.len());
    for message in messages {
        match message {
            ProviderMessage::Chat {
                role,
                text,
                tool_calls,
            } => {
                if !text.is_empty() {
                    input.push(text_item(*role, text));
                }
                for call in tool_calls {
                    input.push(ResponsesInputItem::FunctionCall(ResponsesFunctionCallItem {
                        type_: "function_call".to_string(),
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    }));
                }
            }
            ProviderMessage::ToolResult {
                tool_call_id,
                content,
            } => input.push(ResponsesInputItem::FunctionCallOutput(
                ResponsesFunctionCallOutputItem {
                    type_: "function_call_output".to_string(),
                    call_id: tool_call_id.clone(),
                    output: content.clone(),
                },
            )),
        }
    }

    if input.is_empty() {
        input.push(text_item(MessageRole::User, ""));
    }
    input
}

fn text_item(role: MessageRole, text: &str) -> ResponsesInputItem {
    let content_type = if role == MessageRole::Assistant {
        "output_text"
    } else {
        "input_text"
    };
    ResponsesInputItem::Message(ResponsesInputMessage {
        role: message_role_to_openai(role).to_string(),
        content: vec![ResponsesInputContent {
            type_: content_type.to_string(),
            text: text.to_string(),
        }],
    })
}
