use serde_json::Value;

use crate::error::BridgeError;
use crate::protocol::canonical::{declarations, ProviderMessage, WireRequestPlan};
use crate::protocol::mapping::message_role_to_openai;
use crate::protocol::DEFAULT_MAX_OUTPUT_TOKENS;

use super::{
    OpenAiChatRequest, OpenAiMessage, OpenAiStreamOptions, OpenAiTool, OpenAiToolCall,
    OpenAiToolCallFunction, OpenAiToolChoice, OpenAiToolChoiceFunction,
    OpenAiToolChoiceFunctionCall, OpenAiToolFunction,
};

/// Encode a request plan into the `OpenAI` Chat Completions wire format.
///
/// # Errors
///
/// Returns [`BridgeError::InvalidRequest`] when the plan has no model.
pub fn encode_chat_request(plan: &WireRequestPlan<'_>) -> Result<OpenAiChatRequest, BridgeError> {
    if plan.model.is_empty() {
        return Err(BridgeError::InvalidRequest(
            "model must not be empty".to_string(),
        ));
    }

    let messages = plan.messages.iter().map(encode_message).collect();

    let tools: Vec<OpenAiTool> = declarations(plan.tools)
        .map(|decl| OpenAiTool {
            type_: "function".to_string(),
            function: OpenAiToolFunction {
                name: decl.name.clone(),
                description: decl.description.clone(),
                parameters: decl.parameters_json_schema.clone(),
            },
        })
        .collect();

    let tool_choice = if tools.is_empty() {
        None
    } else {
        Some(match plan.declared_forced_tool() {
            Some(name) => OpenAiToolChoice::Function(OpenAiToolChoiceFunctionCall {
                type_: "function".to_string(),
                function: OpenAiToolChoiceFunction {
                    name: name.to_string(),
                },
            }),
            None => OpenAiToolChoice::Mode("auto".to_string()),
        })
    };

    Ok(OpenAiChatRequest {
        model: plan.model.to_string(),
        messages,
        temperature: plan.options.temperature,
        max_tokens: Some(
            plan.options
                .max_output_tokens
                .unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        ),
        top_p: plan.options.top_p,
        stream: plan.stream,
        stream_options: plan.stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
        tools: (!tools.is_empty()).then_some(tools),
        tool_choice,
    })
}

/// Encode and serialize in one step.
///
/// # Errors
///
/// Returns [`BridgeError`] when encoding or serialization fails.
pub fn encode_chat_request_bytes(plan: &WireRequestPlan<'_>) -> Result<Vec<u8>, BridgeError> {
    let request = encode_chat_request(plan)?;
    serde_json::to_vec(&request)
        .map_err(|e| BridgeError::Translation(format!("failed to serialize chat request: {e}")))
}

fn encode_message(message: &ProviderMessage) -> OpenAiMessage {
    match message {
        ProviderMessage::ToolResult {
            tool_call_id,
            content,
        } => OpenAiMessage {
            role: "tool".to_string(),
            content: Some(Value::String(content.clone())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.clone()),
        },
        ProviderMessage::Chat {
            role,
            text,
            tool_calls,
        } => {
            let tool_calls: Vec<OpenAiToolCall> = tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.id.clone(),
                    type_: "function".to_string(),
                    function: OpenAiToolCallFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect();
            let content = if text.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(Value::String(text.clone()))
            };
            OpenAiMessage {
                role: message_role_to_openai(*role).to_string(),
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
    }
}
