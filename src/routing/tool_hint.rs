use regex_lite::Regex;

use crate::config::{FeaturesConfig, ToolHintMode};
use crate::error::BridgeError;
use crate::protocol::canonical::{declarations, ToolGroup, Turn, TurnPart, TurnRole};

/// Built-in hint: "use the `read_file` tool", with optional article and backticks.
pub const DEFAULT_TOOL_HINT_PATTERN: &str =
    r"(?i)\buse\s+(?:the\s+)?`?([A-Za-z0-9_.\-]+)`?\s+tool\b";

/// How the latest user text may pre-select a forced tool choice.
#[derive(Debug, Clone)]
pub enum ToolHintPolicy {
    Off,
    /// Any declared tool name appearing in the text; the longest wins.
    Mention,
    /// Capture group 1 must name a declared tool.
    Pattern(Regex),
}

impl Default for ToolHintPolicy {
    fn default() -> Self {
        match Regex::new(DEFAULT_TOOL_HINT_PATTERN) {
            Ok(regex) => ToolHintPolicy::Pattern(regex),
            Err(_) => ToolHintPolicy::Off,
        }
    }
}

impl ToolHintPolicy {
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] when the configured pattern does not compile.
    pub fn from_config(features: &FeaturesConfig) -> Result<Self, BridgeError> {
        match features.tool_hint {
            ToolHintMode::Off => Ok(ToolHintPolicy::Off),
            ToolHintMode::Mention => Ok(ToolHintPolicy::Mention),
            ToolHintMode::Pattern => {
                let pattern = features
                    .tool_hint_pattern
                    .as_deref()
                    .unwrap_or(DEFAULT_TOOL_HINT_PATTERN);
                Regex::new(pattern)
                    .map(ToolHintPolicy::Pattern)
                    .map_err(|e| BridgeError::Config(format!("invalid tool hint pattern: {e}")))
            }
        }
    }

    /// The declared tool the latest user turn asks for, if any.
    #[must_use]
    pub fn select<'t>(&self, turns: &[Turn], tools: &'t [ToolGroup]) -> Option<&'t str> {
        if matches!(self, ToolHintPolicy::Off) {
            return None;
        }
        let text = latest_user_text(turns)?;
        match self {
            ToolHintPolicy::Off => None,
            ToolHintPolicy::Mention => declarations(tools)
                .map(|decl| decl.name.as_str())
                .filter(|name| !name.is_empty() && text.contains(*name))
                .max_by_key(|name| name.len()),
            ToolHintPolicy::Pattern(regex) => regex.captures_iter(&text).find_map(|caps| {
                let hinted = caps.get(1)?.as_str();
                declared_name(tools, hinted)
            }),
        }
    }
}

fn declared_name<'t>(tools: &'t [ToolGroup], hinted: &str) -> Option<&'t str> {
    declarations(tools)
        .find(|decl| decl.name == hinted)
        .or_else(|| declarations(tools).find(|decl| decl.name.eq_ignore_ascii_case(hinted)))
        .map(|decl| decl.name.as_str())
}

/// Text of the most recent user turn that carries any.
fn latest_user_text(turns: &[Turn]) -> Option<String> {
    turns
        .iter()
        .rev()
        .filter(|turn| turn.role == TurnRole::User)
        .find_map(|turn| {
            let mut text = String::new();
            for part in &turn.parts {
                if let TurnPart::Text(fragment) = part {
                    if !text.is_empty() {
                        text.push('\n');
                    }
                    text.push_str(fragment);
                }
            }
            (!text.trim().is_empty()).then_some(text)
        })
}
