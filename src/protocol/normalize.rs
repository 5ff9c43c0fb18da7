//! Caller turns to wire-neutral provider messages, with tool-call ids reconciled.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use smallvec::SmallVec;

use crate::protocol::canonical::{
    FunctionCall, FunctionResponse, MessageRole, ProviderMessage, ToolCall, Turn, TurnPart,
    TurnRole,
};
use crate::protocol::mapping::turn_role_to_message_role;
use crate::util::generated_call_id;

/// Separator between text fragments of one turn.
const TEXT_JOINER: &str = "\n\n";

/// Counters describing what reconciliation discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub pruned_calls: usize,
    pub dropped_results: usize,
    pub empty_assistant_messages: usize,
}

/// Per-pass identifier bookkeeping.
#[derive(Default)]
struct IdTables {
    declared: FxHashSet<String>,
    consumed: FxHashSet<String>,
    pending_by_name: FxHashMap<String, VecDeque<String>>,
    name_by_id: FxHashMap<String, String>,
}

impl IdTables {
    fn declare(&mut self, call: &FunctionCall) -> String {
        let id = match call.id.as_deref() {
            Some(id) if !id.is_empty() && !self.declared.contains(id) => id.to_string(),
            _ => generated_call_id(&call.name),
        };
        self.declared.insert(id.clone());
        self.pending_by_name
            .entry(call.name.clone())
            .or_default()
            .push_back(id.clone());
        self.name_by_id.insert(id.clone(), call.name.clone());
        id
    }

    fn resolve(&mut self, response: &FunctionResponse) -> Option<String> {
        if let Some(id) = response.id.as_deref() {
            if self.declared.contains(id) && !self.consumed.contains(id) {
                let id = id.to_string();
                self.consume(&id);
                return Some(id);
            }
        }

        let name = response.name.as_deref()?;
        let queue = self.pending_by_name.get_mut(name)?;
        let id = queue.pop_front()?;
        self.consume(&id);
        Some(id)
    }

    fn consume(&mut self, id: &str) {
        if let Some(name) = self.name_by_id.get(id) {
            if let Some(queue) = self.pending_by_name.get_mut(name) {
                queue.retain(|pending| pending != id);
            }
        }
        self.consumed.insert(id.to_string());
    }
}

/// Normalize caller turns into provider messages.
///
/// Never fails; malformed tool exchanges degrade by omission.
#[must_use]
pub fn normalize_conversation(
    turns: &[Turn],
    system_instruction: Option<&str>,
) -> Vec<ProviderMessage> {
    normalize_conversation_with_stats(turns, system_instruction).0
}

/// Same as [`normalize_conversation`], also returning what was discarded.
#[must_use]
pub fn normalize_conversation_with_stats(
    turns: &[Turn],
    system_instruction: Option<&str>,
) -> (Vec<ProviderMessage>, NormalizeStats) {
    let mut tables = IdTables::default();
    let mut stats = NormalizeStats::default();
    let mut messages: Vec<ProviderMessage> = Vec::with_capacity(turns.len() + 1);

    if let Some(system) = system_instruction {
        if !system.is_empty() {
            messages.push(ProviderMessage::text(MessageRole::System, system));
        }
    }

    for turn in turns {
        let mut texts: SmallVec<[&str; 2]> = SmallVec::new();
        let mut calls: SmallVec<[&FunctionCall; 2]> = SmallVec::new();
        let mut responses: SmallVec<[&FunctionResponse; 2]> = SmallVec::new();

        for part in &turn.parts {
            match part {
                TurnPart::Text(text) if !text.is_empty() => texts.push(text),
                TurnPart::Text(_) => {}
                TurnPart::FunctionCall(call) => calls.push(call),
                TurnPart::FunctionResponse(response) => responses.push(response),
            }
        }
        let text = texts.join(TEXT_JOINER);

        if turn.role == TurnRole::Assistant {
            let tool_calls: Vec<ToolCall> = calls
                .iter()
                .map(|call| ToolCall {
                    id: tables.declare(call),
                    name: call.name.clone(),
                    arguments: arguments_text(&call.args),
                })
                .collect();
            if !text.is_empty() || !tool_calls.is_empty() {
                messages.push(ProviderMessage::Chat {
                    role: MessageRole::Assistant,
                    text,
                    tool_calls,
                });
            }
            for response in responses {
                push_result(&mut messages, &mut tables, &mut stats, response, None);
            }
            continue;
        }

        if !calls.is_empty() {
            tracing::debug!(
                role = ?turn.role,
                ignored_calls = calls.len(),
                "ignoring tool calls outside assistant turn"
            );
        }

        let mut pending_text = (!text.is_empty()).then_some(text.as_str());
        let mut emitted_results = 0usize;
        for response in responses {
            if push_result(&mut messages, &mut tables, &mut stats, response, pending_text) {
                pending_text = None;
                emitted_results += 1;
            }
        }
        if emitted_results == 0 {
            if let Some(text) = pending_text {
                messages.push(ProviderMessage::text(
                    turn_role_to_message_role(turn.role),
                    text,
                ));
            }
        }
    }

    prune_unanswered(&mut messages, &tables, &mut stats);

    if stats.pruned_calls > 0 || stats.dropped_results > 0 {
        tracing::warn!(
            pruned_calls = stats.pruned_calls,
            dropped_results = stats.dropped_results,
            "reconciled unmatched tool exchange"
        );
    }
    tracing::debug!(
        message_count = messages.len(),
        pruned_calls = stats.pruned_calls,
        dropped_results = stats.dropped_results,
        empty_assistant_messages = stats.empty_assistant_messages,
        "normalized conversation"
    );

    (messages, stats)
}

fn push_result(
    messages: &mut Vec<ProviderMessage>,
    tables: &mut IdTables,
    stats: &mut NormalizeStats,
    response: &FunctionResponse,
    leading_text: Option<&str>,
) -> bool {
    let Some(tool_call_id) = tables.resolve(response) else {
        stats.dropped_results += 1;
        tracing::debug!(
            id = response.id.as_deref().unwrap_or(""),
            name = response.name.as_deref().unwrap_or(""),
            "dropping tool result without a matching call"
        );
        return false;
    };

    let payload = result_payload(&response.response);
    let content = match leading_text {
        Some(text) => format!("{text}{TEXT_JOINER}{payload}"),
        None => payload,
    };
    messages.push(ProviderMessage::ToolResult {
        tool_call_id,
        content,
    });
    true
}

fn prune_unanswered(
    messages: &mut Vec<ProviderMessage>,
    tables: &IdTables,
    stats: &mut NormalizeStats,
) {
    messages.retain_mut(|message| match message {
        ProviderMessage::Chat {
            role: MessageRole::Assistant,
            text,
            tool_calls,
        } => {
            let before = tool_calls.len();
            tool_calls.retain(|call| tables.consumed.contains(&call.id));
            stats.pruned_calls += before - tool_calls.len();
            if text.is_empty() && tool_calls.is_empty() {
                stats.empty_assistant_messages += 1;
                false
            } else {
                true
            }
        }
        ProviderMessage::Chat { .. } => true,
        ProviderMessage::ToolResult { tool_call_id, .. } => {
            let keep = tables.consumed.contains(tool_call_id.as_str());
            if !keep {
                stats.dropped_results += 1;
            }
            keep
        }
    });
}

/// Serialize call arguments as JSON object text.
fn arguments_text(args: &Value) -> String {
    match args {
        Value::Object(_) => args.to_string(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ Value::Object(_)) => parsed.to_string(),
            _ => "{}".to_string(),
        },
        _ => "{}".to_string(),
    }
}

/// Render a tool result payload as the text the provider sees.
#[must_use]
pub fn result_payload(response: &Value) -> String {
    match response {
        Value::String(text) => text.clone(),
        Value::Object(map) if map.len() == 1 => match map.get("output") {
            Some(Value::String(output)) => output.clone(),
            _ => response.to_string(),
        },
        _ => response.to_string(),
    }
}
