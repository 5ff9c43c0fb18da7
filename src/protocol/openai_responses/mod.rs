pub mod encoder;
pub mod response_decoder;
pub mod stream;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `OpenAI` Responses API request wire type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesInputItem>,
    pub max_output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ResponsesToolChoice>,
}

/// One entry of the `input` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesInputItem {
    Message(ResponsesInputMessage),
    FunctionCall(ResponsesFunctionCallItem),
    FunctionCallOutput(ResponsesFunctionCallOutputItem),
}

/// A role-tagged text message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesInputMessage {
    pub role: String,
    pub content: Vec<ResponsesInputContent>,
}

/// Text content of an input message; `type` is `input_text` or `output_text`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesInputContent {
    #[serde(rename = "type")]
    pub type_: String,
    pub text: String,
}

/// A prior model tool call replayed as input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesFunctionCallItem {
    #[serde(rename = "type")]
    pub type_: String,
    pub call_id: String,
    pub name: String,
    pub arguments: String,
}

/// The result of a prior tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesFunctionCallOutputItem {
    #[serde(rename = "type")]
    pub type_: String,
    pub call_id: String,
    pub output: String,
}

/// A tool in the Responses API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesTool {
    #[serde(rename = "function")]
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        parameters: Option<Value>,
    },
}

/// `tool_choice` in Responses requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsesToolChoice {
    Mode(String),
    Function {
        #[serde(rename = "type")]
        type_: String,
        name: String,
    },
}

/// Responses API streaming event types.
///
/// Items are kept as raw JSON; their shape varies across backends.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ResponsesStreamEvent {
    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta {
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        output_index: usize,
        #[serde(default)]
        item: Value,
    },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        output_index: usize,
        #[serde(default)]
        item: Value,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        output_index: usize,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        output_index: usize,
        #[serde(default)]
        arguments: Option<String>,
    },
    #[serde(rename = "response.completed")]
    ResponseCompleted {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.incomplete")]
    ResponseIncomplete {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "response.failed")]
    ResponseFailed {
        #[serde(default)]
        response: Value,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}
