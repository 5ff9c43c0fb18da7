use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WireProtocol {
    #[default]
    Chat,
    Responses,
}

impl WireProtocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WireProtocol::Chat => "chat",
            WireProtocol::Responses => "responses",
        }
    }
}

impl std::fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Caller-side conversation
// ---------------------------------------------------------------------------

/// Role of one caller turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    #[serde(alias = "model")]
    Assistant,
    Tool,
}

/// A model-issued function invocation as the caller stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// The outcome of executing a function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub response: Value,
}

/// One fragment of a caller turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnPart {
    Text(String),
    FunctionCall(FunctionCall),
    FunctionResponse(FunctionResponse),
}

/// One conversational unit supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
}

impl Turn {
    #[must_use]
    pub fn new(role: TurnRole, parts: Vec<TurnPart>) -> Self {
        Self { role, parts }
    }

    #[must_use]
    pub fn text(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![TurnPart::Text(text.into())],
        }
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters_json_schema: Option<Value>,
}

/// A caller-provided group of function declarations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolGroup {
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
}

/// Iterate every declaration across all tool groups.
pub fn declarations(tools: &[ToolGroup]) -> impl Iterator<Item = &FunctionDeclaration> {
    tools.iter().flat_map(|group| group.function_declarations.iter())
}

/// Generation parameters passed through to the upstream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u64>,
}

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct GenerateRequest {
    /// Overrides the configured model when set.
    pub model: Option<String>,
    pub contents: Vec<Turn>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolGroup>,
    pub options: GenerationOptions,
}

// ---------------------------------------------------------------------------
// Wire-neutral intermediate messages
// ---------------------------------------------------------------------------

/// Role of a non-tool provider message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A tool call carried by an assistant provider message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON object text.
    pub arguments: String,
}

/// One normalized message shared by both request builders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderMessage {
    Chat {
        role: MessageRole,
        text: String,
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl ProviderMessage {
    #[must_use]
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        ProviderMessage::Chat {
            role,
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// Count `(tool calls, tool results)` in a normalized sequence.
#[must_use]
pub fn count_tool_exchange(messages: &[ProviderMessage]) -> (usize, usize) {
    messages
        .iter()
        .fold((0, 0), |(calls, results), message| match message {
            ProviderMessage::Chat { tool_calls, .. } => (calls + tool_calls.len(), results),
            ProviderMessage::ToolResult { .. } => (calls, results + 1),
        })
}

/// Everything a request builder needs for one wire request.
#[derive(Debug, Clone, Copy)]
pub struct WireRequestPlan<'a> {
    pub model: &'a str,
    pub messages: &'a [ProviderMessage],
    pub tools: &'a [ToolGroup],
    pub options: &'a GenerationOptions,
    /// Tool the model should be made to call, if it is declared.
    pub forced_tool: Option<&'a str>,
    pub stream: bool,
}

impl WireRequestPlan<'_> {
    /// The forced tool, only when it names a declared function.
    #[must_use]
    pub fn declared_forced_tool(&self) -> Option<&str> {
        let forced = self.forced_tool?;
        declarations(self.tools)
            .any(|decl| decl.name == forced)
            .then_some(forced)
    }

    #[must_use]
    pub fn has_tools(&self) -> bool {
        declarations(self.tools).next().is_some()
    }
}

// ---------------------------------------------------------------------------
// Normalized response
// ---------------------------------------------------------------------------

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Other,
}

/// One piece of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponsePart {
    Text(String),
    FunctionCall(FunctionCall),
}

/// A single candidate of a normalized response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub role: String,
    pub parts: Vec<ResponsePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl Candidate {
    #[must_use]
    pub fn model(parts: Vec<ResponsePart>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            role: "model".to_string(),
            parts,
            finish_reason,
        }
    }
}

/// Token accounting reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: u64,
    pub candidates_token_count: u64,
    pub total_token_count: u64,
}

/// The caller-facing response shape, used for whole responses and stream fragments alike.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResponse {
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl NormalizedResponse {
    /// A single-candidate response.
    #[must_use]
    pub fn single(parts: Vec<ResponsePart>, finish_reason: Option<FinishReason>) -> Self {
        Self {
            candidates: vec![Candidate::model(parts, finish_reason)],
            usage_metadata: None,
            response_id: None,
        }
    }

    #[must_use]
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.candidates.first().and_then(|c| c.finish_reason)
    }

    /// Concatenated text of the first candidate.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in self.candidates.iter().flat_map(|c| c.parts.iter()) {
            if let ResponsePart::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }

    /// Function calls across all candidates, in order.
    pub fn function_calls(&self) -> impl Iterator<Item = &FunctionCall> {
        self.candidates
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|part| match part {
                ResponsePart::FunctionCall(call) => Some(call),
                ResponsePart::Text(_) => None,
            })
    }
}
