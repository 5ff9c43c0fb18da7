use std::collections::BTreeMap;

use futures_util::Stream;
use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::error::BridgeError;
use crate::protocol::canonical::{FinishReason, NormalizedResponse, ResponsePart};
use crate::stream::accumulator::{
    call_fragment, drain_buffers, text_fragment, FragmentQueue, ToolCallBuffer,
};
use crate::stream::{fold_sse_body, EventFolder, ResponseStream};

use super::response_decoder::{decode_responses_output, item_type, usage_from_value};
use super::ResponsesStreamEvent;

/// `status` placed on stream-level failures, which carry no HTTP status.
pub const STREAM_FAILURE_STATUS: u16 = 0;

/// Folds Responses API stream events.
#[derive(Debug, Default)]
pub struct ResponsesEventAccumulator {
    buffers: BTreeMap<usize, ToolCallBuffer>,
    flushed: FxHashSet<usize>,
    response_id: Option<String>,
    emitted_any: bool,
    finished: bool,
}

impl ResponsesEventAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one typed event.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Upstream`] for `error` and `response.failed`.
    pub fn push_event(
        &mut self,
        event: ResponsesStreamEvent,
        out: &mut FragmentQueue,
    ) -> Result<(), BridgeError> {
        if self.finished {
            return Ok(());
        }

        match event {
            ResponsesStreamEvent::ResponseCreated { response } => {
                self.capture_response_id(&response);
            }
            ResponsesStreamEvent::OutputTextDelta { delta } => {
                if !delta.is_empty() {
                    self.emitted_any = true;
                    out.push_back(text_fragment(delta));
                }
            }
            ResponsesStreamEvent::OutputItemAdded { output_index, item } => {
                if is_call_item(&item) {
                    self.flushed.remove(&output_index);
                    let buffer = self.buffers.entry(output_index).or_default();
                    merge_item(buffer, &item);
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDelta {
                output_index,
                delta,
            } => {
                if !self.flushed.contains(&output_index) {
                    self.buffers
                        .entry(output_index)
                        .or_default()
                        .arguments
                        .push_str(&delta);
                }
            }
            ResponsesStreamEvent::FunctionCallArgumentsDone {
                output_index,
                arguments,
            } => {
                if let (Some(buffer), Some(arguments)) =
                    (self.buffers.get_mut(&output_index), arguments)
                {
                    buffer.arguments = arguments;
                }
                self.try_flush(output_index, out);
            }
            ResponsesStreamEvent::OutputItemDone { output_index, item } => {
                if is_call_item(&item) && !self.flushed.contains(&output_index) {
                    let buffer = self.buffers.entry(output_index).or_default();
                    merge_item(buffer, &item);
                    if let Some(call) = self
                        .buffers
                        .remove(&output_index)
                        .and_then(ToolCallBuffer::force_complete)
                    {
                        self.flushed.insert(output_index);
                        self.emitted_any = true;
                        out.push_back(call_fragment(call));
                    }
                }
            }
            ResponsesStreamEvent::ResponseCompleted { response }
            | ResponsesStreamEvent::ResponseIncomplete { response } => {
                self.capture_response_id(&response);
                let mut parts = drain_buffers(&mut self.buffers);
                if !self.emitted_any && parts.is_empty() {
                    // Backends that skip deltas still send the full output here.
                    parts = decode_responses_output(&response)
                        .candidates
                        .into_iter()
                        .flat_map(|c| c.parts)
                        .collect();
                }
                let mut terminal = self.terminal(parts);
                terminal.usage_metadata = response.get("usage").and_then(usage_from_value);
                self.finished = true;
                out.push_back(terminal);
            }
            ResponsesStreamEvent::ResponseFailed { response } => {
                self.finished = true;
                let message = response
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("response failed");
                return Err(BridgeError::Upstream {
                    status: STREAM_FAILURE_STATUS,
                    message: message.to_string(),
                });
            }
            ResponsesStreamEvent::Error { message, code } => {
                self.finished = true;
                let mut message = message.unwrap_or_else(|| "stream error".to_string());
                if let Some(code) = code.as_ref().and_then(Value::as_str) {
                    message = format!("{code}: {message}");
                }
                return Err(BridgeError::Upstream {
                    status: STREAM_FAILURE_STATUS,
                    message,
                });
            }
            ResponsesStreamEvent::Unknown => {}
        }
        Ok(())
    }

    fn try_flush(&mut self, output_index: usize, out: &mut FragmentQueue) {
        let Some(call) = self
            .buffers
            .get(&output_index)
            .and_then(ToolCallBuffer::try_complete)
        else {
            return;
        };
        self.buffers.remove(&output_index);
        self.flushed.insert(output_index);
        self.emitted_any = true;
        out.push_back(call_fragment(call));
    }

    fn capture_response_id(&mut self, response: &Value) {
        if self.response_id.is_none() {
            self.response_id = response
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }

    fn terminal(&self, parts: Vec<ResponsePart>) -> NormalizedResponse {
        let mut terminal = NormalizedResponse::single(parts, Some(FinishReason::Stop));
        terminal.response_id.clone_from(&self.response_id);
        terminal
    }
}

impl EventFolder for ResponsesEventAccumulator {
    fn fold(&mut self, event: Value, out: &mut FragmentQueue) -> Result<(), BridgeError> {
        match serde_json::from_value::<ResponsesStreamEvent>(event) {
            Ok(event) => self.push_event(event, out),
            Err(e) => {
                tracing::trace!(error = %e, "skipping unrecognized responses stream event");
                Ok(())
            }
        }
    }

    fn finish(&mut self, out: &mut FragmentQueue) {
        if self.finished {
            return;
        }
        self.finished = true;
        let parts = drain_buffers(&mut self.buffers);
        tracing::debug!(
            pending_calls = parts.len(),
            "responses stream ended without completion event"
        );
        out.push_back(self.terminal(parts));
    }
}

/// Fragments of a streamed Responses API body.
pub fn responses_response_stream<S, E>(byte_stream: S) -> ResponseStream
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    fold_sse_body(byte_stream, ResponsesEventAccumulator::new())
}

fn is_call_item(item: &Value) -> bool {
    matches!(item_type(item), Some("function_call" | "tool_call"))
}

fn merge_item(buffer: &mut ToolCallBuffer, item: &Value) {
    if let Some(id) = item
        .get("call_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)
    {
        if buffer.id.is_none() {
            buffer.id = Some(id.to_string());
        }
    }
    if let Some(name) = item.get("name").and_then(Value::as_str) {
        buffer.merge_name(name);
    }
    match item.get("arguments") {
        Some(Value::String(arguments)) if !arguments.is_empty() => {
            buffer.arguments.clone_from(arguments);
        }
        Some(value @ Value::Object(_)) => buffer.arguments = value.to_string(),
        _ => {}
    }
}
