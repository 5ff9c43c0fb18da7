use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use pin_project_lite::pin_project;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::BridgeError;
use crate::protocol::canonical::{
    FinishReason, FunctionCall, NormalizedResponse, ResponsePart, UsageMetadata,
};
use crate::protocol::mapping::{openai_finish_to_normalized, usage_from_counts};
use crate::protocol::openai_chat::{OpenAiStreamChunk, OpenAiStreamToolCall};
use crate::util::{generated_call_id, parse_arguments_or_empty, parse_complete_object};

/// Fragments ready for the consumer, in emission order.
pub type FragmentQueue = VecDeque<NormalizedResponse>;

/// A per-call fold from decoded upstream events to normalized fragments.
pub trait EventFolder {
    /// Fold one decoded event.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError`] when the event reports an upstream failure; the
    /// stream ends after yielding it.
    fn fold(&mut self, event: Value, out: &mut FragmentQueue) -> Result<(), BridgeError>;

    /// The upstream ended; emit whatever is still held.
    fn finish(&mut self, out: &mut FragmentQueue);
}

/// One in-flight tool call keyed by its wire position.
#[derive(Debug, Default, Clone)]
pub(crate) struct ToolCallBuffer {
    pub(crate) id: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) arguments: String,
}

impl ToolCallBuffer {
    pub(crate) fn merge_name(&mut self, name: &str) {
        if name.is_empty() {
            return;
        }
        match self.name.as_mut() {
            None => self.name = Some(name.to_string()),
            Some(current) if current.as_str() == name => {}
            Some(current) => current.push_str(name),
        }
    }

    /// The completed call, once a name is known and the arguments are a whole object.
    pub(crate) fn try_complete(&self) -> Option<FunctionCall> {
        let name = self.name.as_deref()?;
        let args = parse_complete_object(&self.arguments)?;
        Some(FunctionCall {
            id: Some(self.call_id(name)),
            name: name.to_string(),
            args,
        })
    }

    /// Complete the call regardless of argument state; `None` without a name.
    pub(crate) fn force_complete(self) -> Option<FunctionCall> {
        let name = self.name.as_deref()?;
        Some(FunctionCall {
            id: Some(self.call_id(name)),
            name: name.to_string(),
            args: parse_arguments_or_empty(&self.arguments),
        })
    }

    fn call_id(&self, name: &str) -> String {
        match self.id.as_deref() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => generated_call_id(name),
        }
    }
}

/// Force-flush buffers in index order into function-call parts.
pub(crate) fn drain_buffers<K: Ord>(buffers: &mut BTreeMap<K, ToolCallBuffer>) -> Vec<ResponsePart> {
    std::mem::take(buffers)
        .into_values()
        .filter_map(|buffer| {
            let call = buffer.force_complete();
            if call.is_none() {
                tracing::debug!("dropping streamed tool call without a name");
            }
            call.map(ResponsePart::FunctionCall)
        })
        .collect()
}

pub(crate) fn text_fragment(text: String) -> NormalizedResponse {
    NormalizedResponse::single(vec![ResponsePart::Text(text)], None)
}

pub(crate) fn call_fragment(call: FunctionCall) -> NormalizedResponse {
    NormalizedResponse::single(vec![ResponsePart::FunctionCall(call)], None)
}

#[derive(Debug)]
enum ChatPhase {
    Accumulating,
    /// Finish reason seen; the terminal waits one event for trailing usage.
    Finishing(NormalizedResponse),
    Finished,
}

/// Folds Chat Completions stream chunks.
///
/// Text is forwarded as it arrives; a tool call is held per wire index until
/// its arguments parse as a complete object.
#[derive(Debug)]
pub struct ChatDeltaAccumulator {
    phase: ChatPhase,
    buffers: BTreeMap<u32, ToolCallBuffer>,
    flushed: FxHashMap<u32, Option<String>>,
    usage: Option<UsageMetadata>,
    response_id: Option<String>,
}

impl Default for ChatDeltaAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatDeltaAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: ChatPhase::Accumulating,
            buffers: BTreeMap::new(),
            flushed: FxHashMap::default(),
            usage: None,
            response_id: None,
        }
    }

    /// Fold one decoded chunk.
    pub fn push_chunk(&mut self, chunk: OpenAiStreamChunk, out: &mut FragmentQueue) {
        let usage = chunk
            .usage
            .map(|u| usage_from_counts(u.prompt_tokens, u.completion_tokens, u.total_tokens));

        match std::mem::replace(&mut self.phase, ChatPhase::Finished) {
            ChatPhase::Finished => return,
            ChatPhase::Finishing(mut terminal) => {
                if usage.is_some() {
                    terminal.usage_metadata = usage;
                }
                out.push_back(terminal);
                return;
            }
            ChatPhase::Accumulating => self.phase = ChatPhase::Accumulating,
        }

        if self.response_id.is_none() {
            self.response_id = chunk.id;
        }
        if usage.is_some() {
            self.usage = usage;
        }

        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content {
                    if !text.is_empty() {
                        out.push_back(text_fragment(text));
                    }
                }
                for call in delta.tool_calls.into_iter().flatten() {
                    self.merge_tool_call(call, out);
                }
            }

            if let Some(reason) = choice.finish_reason {
                let parts = drain_buffers(&mut self.buffers);
                self.phase = ChatPhase::Finishing(self.terminal(
                    parts,
                    openai_finish_to_normalized(&reason),
                ));
                return;
            }
        }
    }

    fn merge_tool_call(&mut self, call: OpenAiStreamToolCall, out: &mut FragmentQueue) {
        let index = call.index;
        if let Some(flushed_id) = self.flushed.get(&index) {
            let is_new_call = matches!(
                (&call.id, flushed_id),
                (Some(new), Some(old)) if !new.is_empty() && new != old
            ) || matches!((&call.id, flushed_id), (Some(new), None) if !new.is_empty());
            if !is_new_call {
                return;
            }
            self.flushed.remove(&index);
        }

        let buffer = self.buffers.entry(index).or_default();
        if let Some(id) = call.id.filter(|id| !id.is_empty()) {
            buffer.id = Some(id);
        }
        if let Some(function) = call.function {
            if let Some(name) = function.name.as_deref() {
                buffer.merge_name(name);
            }
            if let Some(arguments) = function.arguments.as_deref() {
                buffer.arguments.push_str(arguments);
            }
        }

        if let Some(complete) = buffer.try_complete() {
            self.buffers.remove(&index);
            self.flushed.insert(index, complete.id.clone());
            out.push_back(call_fragment(complete));
        }
    }

    fn terminal(&self, parts: Vec<ResponsePart>, finish: FinishReason) -> NormalizedResponse {
        let mut terminal = NormalizedResponse::single(parts, Some(finish));
        terminal.usage_metadata = self.usage;
        terminal.response_id.clone_from(&self.response_id);
        terminal
    }
}

impl EventFolder for ChatDeltaAccumulator {
    fn fold(&mut self, event: Value, out: &mut FragmentQueue) -> Result<(), BridgeError> {
        match serde_json::from_value::<OpenAiStreamChunk>(event) {
            Ok(chunk) => self.push_chunk(chunk, out),
            Err(e) => tracing::trace!(error = %e, "skipping unrecognized chat stream chunk"),
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut FragmentQueue) {
        match std::mem::replace(&mut self.phase, ChatPhase::Finished) {
            ChatPhase::Finishing(terminal) => out.push_back(terminal),
            ChatPhase::Accumulating => {
                let parts = drain_buffers(&mut self.buffers);
                tracing::debug!(
                    pending_calls = parts.len(),
                    "chat stream ended without finish reason"
                );
                out.push_back(self.terminal(parts, FinishReason::Stop));
            }
            ChatPhase::Finished => {}
        }
    }
}

pin_project! {
    /// Pull-based adapter driving an [`EventFolder`] over a JSON event stream.
    ///
    /// Nothing is read from `events` until the consumer polls.
    pub struct FragmentStream<S, F> {
        #[pin]
        events: S,
        folder: F,
        pending: FragmentQueue,
        done: bool,
    }
}

impl<S, F> FragmentStream<S, F> {
    pub fn new(events: S, folder: F) -> Self {
        Self {
            events,
            folder,
            pending: VecDeque::with_capacity(4),
            done: false,
        }
    }
}

impl<S, F> Stream for FragmentStream<S, F>
where
    S: Stream<Item = Result<Value, BridgeError>>,
    F: EventFolder,
{
    type Item = Result<NormalizedResponse, BridgeError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(fragment) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(fragment)));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.events.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(event))) => {
                    if let Err(e) = this.folder.fold(event, this.pending) {
                        *this.done = true;
                        this.pending.clear();
                        return Poll::Ready(Some(Err(e)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    this.folder.finish(this.pending);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{stream, StreamExt};
    use serde_json::json;

    fn fold_all(events: Vec<Value>) -> Vec<NormalizedResponse> {
        let mut acc = ChatDeltaAccumulator::new();
        let mut out = FragmentQueue::new();
        for event in events {
            acc.fold(event, &mut out).unwrap();
        }
        acc.finish(&mut out);
        out.into_iter().collect()
    }

    fn args_delta(index: u32, id: Option<&str>, name: Option<&str>, args: &str) -> Value {
        let mut call = json!({"index": index, "function": {"arguments": args}});
        if let Some(id) = id {
            call["id"] = json!(id);
        }
        if let Some(name) = name {
            call["function"]["name"] = json!(name);
        }
        json!({"choices": [{"delta": {"tool_calls": [call]}}]})
    }

    fn finish(reason: &str) -> Value {
        json!({"choices": [{"delta": {}, "finish_reason": reason}]})
    }

    fn finish_count(fragments: &[NormalizedResponse]) -> usize {
        fragments
            .iter()
            .filter(|f| f.finish_reason().is_some())
            .count()
    }

    #[test]
    fn test_text_deltas_forwarded_immediately() {
        let mut acc = ChatDeltaAccumulator::new();
        let mut out = FragmentQueue::new();
        acc.fold(json!({"choices": [{"delta": {"content": "Hel"}}]}), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text(), "Hel");
    }

    #[test]
    fn test_split_arguments_yield_one_call() {
        let payload = r#"{"path":"src/main.rs","limit":20}"#;
        for splits in 1..payload.len() {
            let mut events = Vec::new();
            let step = payload.len().div_ceil(splits);
            let mut first = true;
            for piece in payload.as_bytes().chunks(step) {
                let piece = std::str::from_utf8(piece).unwrap();
                if first {
                    events.push(args_delta(0, Some("call_1"), Some("read_file"), piece));
                    first = false;
                } else {
                    events.push(args_delta(0, None, None, piece));
                }
            }
            events.push(finish("tool_calls"));
            let fragments = fold_all(events);
            let calls: Vec<&FunctionCall> =
                fragments.iter().flat_map(NormalizedResponse::function_calls).collect();
            assert_eq!(calls.len(), 1, "splits={splits}");
            assert_eq!(calls[0].id.as_deref(), Some("call_1"));
            assert_eq!(calls[0].args, json!({"path": "src/main.rs", "limit": 20}));
            assert_eq!(finish_count(&fragments), 1);
            assert_eq!(
                fragments.last().unwrap().finish_reason(),
                Some(FinishReason::Stop)
            );
        }
    }

    #[test]
    fn test_early_flush_then_whitespace_does_not_duplicate() {
        let fragments = fold_all(vec![
            args_delta(0, Some("c1"), Some("list_dir"), "{}"),
            args_delta(0, None, None, " "),
            finish("tool_calls"),
        ]);
        let calls: Vec<_> = fragments.iter().flat_map(NormalizedResponse::function_calls).collect();
        assert_eq!(calls.len(), 1);
        assert!(fragments[0].finish_reason().is_none());
    }

    #[test]
    fn test_reused_index_with_new_id_is_new_call() {
        let fragments = fold_all(vec![
            args_delta(0, Some("c1"), Some("a"), "{}"),
            args_delta(0, Some("c2"), Some("b"), "{\"x\":1}"),
            finish("tool_calls"),
        ]);
        let names: Vec<_> = fragments
            .iter()
            .flat_map(NormalizedResponse::function_calls)
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_incomplete_arguments_force_flushed_on_finish() {
        let fragments = fold_all(vec![
            args_delta(1, Some("c2"), Some("grep"), "{\"q\":"),
            args_delta(0, Some("c1"), Some("read_file"), "{\"path\":\"a"),
            finish("length"),
        ]);
        assert_eq!(fragments.len(), 1);
        let terminal = &fragments[0];
        assert_eq!(terminal.finish_reason(), Some(FinishReason::MaxTokens));
        let calls: Vec<_> = terminal.function_calls().collect();
        assert_eq!(calls[0].name, "read_file");
        assert_eq!(calls[1].name, "grep");
        assert_eq!(calls[1].args, json!({}));
    }

    #[test]
    fn test_trailing_usage_attached_to_terminal() {
        let fragments = fold_all(vec![
            json!({"id": "chatcmpl-9", "choices": [{"delta": {"content": "hi"}}]}),
            finish("stop"),
            json!({"choices": [], "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}}),
            json!({"choices": [{"delta": {"content": "late"}}]}),
        ]);
        assert_eq!(fragments.len(), 2);
        let terminal = &fragments[1];
        assert_eq!(terminal.finish_reason(), Some(FinishReason::Stop));
        assert_eq!(terminal.usage_metadata.unwrap().total_token_count, 7);
        assert_eq!(terminal.response_id.as_deref(), Some("chatcmpl-9"));
    }

    #[test]
    fn test_missing_finish_synthesizes_stop() {
        let fragments = fold_all(vec![json!({"choices": [{"delta": {"content": "partial"}}]})]);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].finish_reason(), Some(FinishReason::Stop));
        assert!(fragments[1].candidates[0].parts.is_empty());
    }

    #[test]
    fn test_missing_finish_flushes_pending_calls() {
        let fragments = fold_all(vec![args_delta(0, Some("c1"), Some("grep"), "{\"q\":\"x\"")]);
        assert_eq!(fragments.len(), 1);
        let calls: Vec<_> = fragments[0].function_calls().collect();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, json!({}));
        assert_eq!(fragments[0].finish_reason(), Some(FinishReason::Stop));
    }

    #[test]
    fn test_unrecognized_chunks_skipped() {
        let fragments = fold_all(vec![json!([1, 2]), json!({"choices": "nope"})]);
        assert_eq!(fragments.len(), 1);
        assert_eq!(finish_count(&fragments), 1);
    }

    #[tokio::test]
    async fn test_fragment_stream_pulls_lazily_and_ends_with_terminal() {
        let events: Vec<Result<Value, BridgeError>> = vec![
            Ok(json!({"choices": [{"delta": {"content": "a"}}]})),
            Ok(json!({"choices": [{"delta": {"content": "b"}, "finish_reason": "stop"}]})),
        ];
        let stream = FragmentStream::new(stream::iter(events), ChatDeltaAccumulator::new());
        let fragments: Vec<_> = stream.map(Result::unwrap).collect().await;
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[2].finish_reason(), Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn test_fragment_stream_error_ends_without_terminal() {
        let events: Vec<Result<Value, BridgeError>> = vec![
            Ok(json!({"choices": [{"delta": {"content": "a"}}]})),
            Err(BridgeError::Transport("reset".into())),
        ];
        let stream = FragmentStream::new(stream::iter(events), ChatDeltaAccumulator::new());
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
