use std::fmt::Write as _;

use crate::error::{category_from_upstream_status, BridgeError, ErrorCategory};
use crate::protocol::canonical::{count_tool_exchange, ProviderMessage, WireProtocol};
use crate::util::truncate_utf8;

/// Response bodies longer than this are cut before logging.
pub const MAX_REPORTED_BODY_BYTES: usize = 4 * 1024;

const SENSITIVE_HEADERS: [&str; 4] = [
    "authorization",
    "x-api-key",
    "api-key",
    "proxy-authorization",
];

const MASK_KEEP_CHARS: usize = 4;
const MASK_MIN_CHARS: usize = 12;

/// Mask a credential, keeping an auth scheme prefix such as `Bearer `.
#[must_use]
pub fn mask_secret(value: &str) -> String {
    let (scheme, secret) = match value.split_once(' ') {
        Some((scheme, secret)) if !secret.is_empty() => (Some(scheme), secret.trim()),
        _ => (None, value.trim()),
    };

    let chars = secret.chars().count();
    let masked = if chars > MASK_MIN_CHARS {
        let head: String = secret.chars().take(MASK_KEEP_CHARS).collect();
        let tail: String = secret.chars().skip(chars - MASK_KEEP_CHARS).collect();
        format!("{head}…{tail}")
    } else {
        "***".to_string()
    };

    match scheme {
        Some(scheme) => format!("{scheme} {masked}"),
        None => masked,
    }
}

fn is_sensitive_header(name: &str) -> bool {
    SENSITIVE_HEADERS
        .iter()
        .any(|sensitive| name.eq_ignore_ascii_case(sensitive))
}

fn shell_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    out.push_str(&value.replace('\'', r"'\''"));
    out.push('\'');
    out
}

fn pretty_body(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

/// Build a `curl` command that replays the request with credentials masked.
#[must_use]
pub fn build_curl_command(url: &url::Url, headers: &http::HeaderMap, body: &[u8]) -> String {
    let mut lines: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes());
            let value = if is_sensitive_header(name.as_str()) {
                mask_secret(&value)
            } else {
                value.into_owned()
            };
            (name.as_str().to_string(), value)
        })
        .collect();
    lines.sort();

    let mut out = String::new();
    let _ = write!(out, "curl -X POST {}", shell_quote(url.as_str()));
    for (name, value) in &lines {
        let _ = write!(out, " \\\n  -H {}", shell_quote(&format!("{name}: {value}")));
    }
    if !body.is_empty() {
        let _ = write!(out, " \\\n  -d {}", shell_quote(&pretty_body(body)));
    }
    out
}

/// Short error text from an upstream error body.
///
/// Prefers `error.message`, then a string `error` or `message` field, then
/// the raw body, cut to 500 bytes.
#[must_use]
pub fn upstream_error_message(body: &[u8]) -> String {
    const MAX_LEN: usize = 500;

    let extracted = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            json.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .or_else(|| json.get("message"))
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        });
    let text = extracted.unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    if text.len() > MAX_LEN {
        format!("{}...", truncate_utf8(&text, MAX_LEN))
    } else {
        text
    }
}

/// What gets logged when an upstream call fails for good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub protocol: WireProtocol,
    pub status: Option<u16>,
    pub category: ErrorCategory,
    pub curl: String,
    pub response_body: String,
    pub tool_calls: usize,
    pub tool_results: usize,
}

impl FailureReport {
    #[must_use]
    pub fn new(
        protocol: WireProtocol,
        url: &url::Url,
        headers: &http::HeaderMap,
        request_body: &[u8],
    ) -> Self {
        Self {
            protocol,
            status: None,
            category: ErrorCategory::Unknown,
            curl: build_curl_command(url, headers, request_body),
            response_body: String::new(),
            tool_calls: 0,
            tool_results: 0,
        }
    }

    #[must_use]
    pub fn with_response(mut self, status: u16, body: &[u8]) -> Self {
        let text = String::from_utf8_lossy(body);
        self.status = Some(status);
        self.category = category_from_upstream_status(status);
        self.response_body = truncate_utf8(&text, MAX_REPORTED_BODY_BYTES).to_string();
        self
    }

    /// Record a failure that produced no HTTP reply.
    #[must_use]
    pub fn with_error(mut self, err: &BridgeError) -> Self {
        self.category = err.category();
        self.response_body = err.to_string();
        self
    }

    #[must_use]
    pub fn with_messages(mut self, messages: &[ProviderMessage]) -> Self {
        let (calls, results) = count_tool_exchange(messages);
        self.tool_calls = calls;
        self.tool_results = results;
        self
    }
}

/// Log a failure report at `error`.
pub fn report_failure(report: &FailureReport) {
    tracing::error!(
        protocol = %report.protocol,
        status = report.status,
        category = ?report.category,
        tool_calls = report.tool_calls,
        tool_results = report.tool_results,
        response_body = %report.response_body,
        "upstream request failed; reproduce with:\n{}",
        report.curl
    );
}
