mod request_id;
pub mod tool_hint;

use std::time::Instant;

use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::Instrument;

use crate::config::{BridgeConfig, ProviderConfig};
use crate::diagnostics::{report_failure, FailureReport};
use crate::error::BridgeError;
use crate::observability::log_request_complete;
use crate::observability::token_counter::{estimate_prompt_tokens, estimate_tokens, merge_usage};
use crate::protocol::canonical::{
    GenerateRequest, GenerationOptions, NormalizedResponse, ProviderMessage, ToolGroup,
    WireProtocol, WireRequestPlan,
};
use crate::protocol::normalize::normalize_conversation_with_stats;
use crate::protocol::openai_chat::encoder::encode_chat_request_bytes;
use crate::protocol::openai_chat::response_decoder::decode_chat_response_bytes;
use crate::protocol::openai_chat::stream::chat_response_stream;
use crate::protocol::openai_responses::encoder::encode_responses_request_bytes;
use crate::protocol::openai_responses::response_decoder::{
    decode_responses_output, parse_responses_body, responses_output_has_tool_call,
};
use crate::protocol::openai_responses::stream::responses_response_stream;
use crate::stream::ResponseStream;
use crate::transport::{resolve_endpoint, HttpTransport, RequestTarget, RetryPolicy, StreamReply};

use request_id::RequestIdGenerator;
pub use tool_hint::{ToolHintPolicy, DEFAULT_TOOL_HINT_PATTERN};

/// Per-call state derived from a [`GenerateRequest`].
struct PreparedCall {
    model: String,
    messages: Vec<ProviderMessage>,
    options: GenerationOptions,
    forced_tool: Option<String>,
}

impl PreparedCall {
    fn plan<'a>(&'a self, tools: &'a [ToolGroup], stream: bool) -> WireRequestPlan<'a> {
        WireRequestPlan {
            model: &self.model,
            messages: &self.messages,
            tools,
            options: &self.options,
            forced_tool: self.forced_tool.as_deref(),
            stream,
        }
    }
}

/// Whether a Responses reply should be re-issued once over Chat.
///
/// True only when a declared tool was forced and the output holds no tool call.
#[must_use]
pub fn needs_chat_fallback(plan: &WireRequestPlan<'_>, responses_body: &Value) -> bool {
    plan.has_tools()
        && plan.declared_forced_tool().is_some()
        && !responses_output_has_tool_call(responses_body)
}

fn encode_body(protocol: WireProtocol, plan: &WireRequestPlan<'_>) -> Result<Bytes, BridgeError> {
    let bytes = match protocol {
        WireProtocol::Chat => encode_chat_request_bytes(plan)?,
        WireProtocol::Responses => encode_responses_request_bytes(plan)?,
    };
    Ok(Bytes::from(bytes))
}

/// Issues generation requests against the configured backend.
///
/// `Send + Sync`; share it behind an `Arc` across concurrent calls.
#[derive(Debug)]
pub struct ProviderRouter {
    provider: ProviderConfig,
    target: RequestTarget,
    transport: HttpTransport,
    protocol: RwLock<WireProtocol>,
    tool_hint: ToolHintPolicy,
    request_ids: RequestIdGenerator,
}

impl ProviderRouter {
    /// Build a router with an HTTP transport derived from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an unusable endpoint or tool-hint
    /// pattern, or [`BridgeError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let transport = HttpTransport::new(
            config.provider.request_timeout(),
            RetryPolicy::from_config(&config.retry),
        )?;
        Self::with_transport(config, transport)
    }

    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] for an unusable endpoint or tool-hint pattern.
    pub fn with_transport(
        config: &BridgeConfig,
        transport: HttpTransport,
    ) -> Result<Self, BridgeError> {
        let provider = &config.provider;
        let target = resolve_endpoint(
            &provider.base_url,
            provider.path_suffix.as_deref(),
            provider.api_key.as_deref(),
            &provider.extra_headers,
        )?;
        Ok(Self {
            provider: provider.clone(),
            target,
            transport,
            protocol: RwLock::new(provider.protocol),
            tool_hint: ToolHintPolicy::from_config(&config.features)?,
            request_ids: RequestIdGenerator::new(),
        })
    }

    #[must_use]
    pub fn with_tool_hint(mut self, policy: ToolHintPolicy) -> Self {
        self.tool_hint = policy;
        self
    }

    #[must_use]
    pub fn protocol(&self) -> WireProtocol {
        *self.protocol.read()
    }

    /// Switch the wire protocol for subsequent calls.
    ///
    /// Calls already in flight keep the protocol they started with.
    pub fn set_protocol(&self, protocol: WireProtocol) {
        let previous = std::mem::replace(&mut *self.protocol.write(), protocol);
        if previous != protocol {
            tracing::info!(from = %previous, to = %protocol, "wire protocol changed");
        }
    }

    #[must_use]
    pub fn target(&self) -> &RequestTarget {
        &self.target
    }

    fn prepare(&self, request: &GenerateRequest) -> PreparedCall {
        let model = request
            .model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(&self.provider.model)
            .to_string();

        let (messages, stats) = normalize_conversation_with_stats(
            &request.contents,
            request.system_instruction.as_deref(),
        );
        if stats.pruned_calls > 0 || stats.dropped_results > 0 {
            tracing::debug!(
                pruned_calls = stats.pruned_calls,
                dropped_results = stats.dropped_results,
                "conversation reconciled before send"
            );
        }

        let mut options = request.options.clone();
        if options.max_output_tokens.is_none() {
            options.max_output_tokens = Some(self.provider.max_output_tokens);
        }

        let forced_tool = self
            .tool_hint
            .select(&request.contents, &request.tools)
            .map(str::to_string);
        if let Some(tool) = forced_tool.as_deref() {
            tracing::debug!(tool, "forcing tool choice from user hint");
        }

        PreparedCall {
            model,
            messages,
            options,
            forced_tool,
        }
    }

    /// Send one buffered request, returning the body of a 2xx reply.
    async fn send_buffered(
        &self,
        protocol: WireProtocol,
        plan: &WireRequestPlan<'_>,
    ) -> Result<Bytes, BridgeError> {
        let url = self.target.url_for(protocol);
        let headers = self.target.headers();
        let body = encode_body(protocol, plan)?;

        match self.transport.send_buffered(&url, headers, body.clone()).await {
            Ok(reply) if reply.is_success() => Ok(reply.body),
            Ok(reply) => {
                report_failure(
                    &FailureReport::new(protocol, &url, headers, &body)
                        .with_response(reply.status, &reply.body)
                        .with_messages(plan.messages),
                );
                Err(reply.to_error())
            }
            Err(err) => {
                report_failure(
                    &FailureReport::new(protocol, &url, headers, &body)
                        .with_error(&err)
                        .with_messages(plan.messages),
                );
                Err(err)
            }
        }
    }

    /// Generate one complete response.
    ///
    /// A Responses reply that ignores a forced tool choice is re-issued once
    /// as a Chat request, and that result is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Upstream`] for a non-2xx reply, transport errors
    /// once retries are exhausted, or [`BridgeError::Translation`] for a body
    /// that is not JSON.
    pub async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<NormalizedResponse, BridgeError> {
        let (request_seq, request_id) = self.request_ids.next_id();
        let protocol = self.protocol();
        let span = tracing::info_span!("generate", request_seq, %request_id, %protocol);
        self.generate_with(request, protocol).instrument(span).await
    }

    async fn generate_with(
        &self,
        request: &GenerateRequest,
        protocol: WireProtocol,
    ) -> Result<NormalizedResponse, BridgeError> {
        let start = Instant::now();
        let call = self.prepare(request);
        let plan = call.plan(&request.tools, false);

        let body = self.send_buffered(protocol, &plan).await?;
        let (response, answered_by) = match protocol {
            WireProtocol::Chat => (decode_chat_response_bytes(&body)?, WireProtocol::Chat),
            WireProtocol::Responses => {
                let value = parse_responses_body(&body)?;
                if needs_chat_fallback(&plan, &value) {
                    tracing::warn!(
                        forced_tool = plan.forced_tool.unwrap_or_default(),
                        "responses output has no tool call under forced tool choice, retrying once over chat"
                    );
                    let body = self.send_buffered(WireProtocol::Chat, &plan).await?;
                    (decode_chat_response_bytes(&body)?, WireProtocol::Chat)
                } else {
                    (decode_responses_output(&value), WireProtocol::Responses)
                }
            }
        };

        let usage = merge_usage(
            response.usage_metadata,
            estimate_prompt_tokens(&call.messages),
            estimate_tokens(&response.text()),
        );
        log_request_complete(&call.model, answered_by, &usage, start);
        Ok(response)
    }

    /// Start a streamed generation.
    ///
    /// Retries cover connection establishment only; once fragments flow,
    /// failures surface as the stream's last item.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Upstream`] for a non-2xx reply or transport
    /// errors once retries are exhausted.
    pub async fn generate_stream(
        &self,
        request: &GenerateRequest,
    ) -> Result<ResponseStream, BridgeError> {
        let (request_seq, request_id) = self.request_ids.next_id();
        let protocol = self.protocol();
        let span = tracing::info_span!("generate_stream", request_seq, %request_id, %protocol);
        self.open_stream(request, protocol).instrument(span).await
    }

    async fn open_stream(
        &self,
        request: &GenerateRequest,
        protocol: WireProtocol,
    ) -> Result<ResponseStream, BridgeError> {
        let call = self.prepare(request);
        let plan = call.plan(&request.tools, true);
        let url = self.target.url_for(protocol);
        let headers = self.target.headers();
        let body = encode_body(protocol, &plan)?;

        let response = match self.transport.send_stream(&url, headers, body.clone()).await {
            Ok(StreamReply::Open(response)) => response,
            Ok(StreamReply::Rejected(reply)) => {
                report_failure(
                    &FailureReport::new(protocol, &url, headers, &body)
                        .with_response(reply.status, &reply.body)
                        .with_messages(plan.messages),
                );
                return Err(reply.to_error());
            }
            Err(err) => {
                report_failure(
                    &FailureReport::new(protocol, &url, headers, &body)
                        .with_error(&err)
                        .with_messages(plan.messages),
                );
                return Err(err);
            }
        };

        let bytes = response.bytes_stream();
        Ok(match protocol {
            WireProtocol::Chat => chat_response_stream(bytes),
            WireProtocol::Responses => responses_response_stream(bytes),
        })
    }
}
