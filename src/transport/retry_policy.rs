use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;

use crate::config::RetryConfig;
use crate::error::BridgeError;

pub(crate) const RETRY_AFTER_MAX_SECS: u64 = 30;

/// When and how long to wait before re-sending a failed request.
///
/// `max_attempts` counts the first try, so `3` means at most two retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the computed delay applied as +/- random jitter.
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Whether another try is allowed after `attempts_made` tries.
    #[inline]
    #[must_use]
    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Whether `err` is worth re-sending the same request for.
    #[must_use]
    pub fn is_retryable(&self, err: &BridgeError) -> bool {
        match err {
            BridgeError::Timeout(_) => true,
            BridgeError::Upstream { status, message } => {
                should_retry_upstream_status(*status) || contains_timeout(message)
            }
            BridgeError::Transport(message) => should_retry_transport_message(message),
            BridgeError::Config(message)
            | BridgeError::InvalidRequest(message)
            | BridgeError::Translation(message)
            | BridgeError::Internal(message) => contains_timeout(message),
        }
    }

    /// Exponential backoff with jitter for the `retry_index`-th retry (0-based).
    #[must_use]
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let shift = retry_index.min(16);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let raw_ms = base_ms.saturating_mul(1_u64 << shift).min(max_ms);
        if self.jitter_ratio <= 0.0 || raw_ms == 0 {
            return Duration::from_millis(raw_ms);
        }
        let factor = 1.0 + self.jitter_ratio * (2.0 * fastrand::f64() - 1.0);
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let jittered = ((raw_ms as f64) * factor).round().max(0.0) as u64;
        Duration::from_millis(jittered.min(max_ms))
    }

    /// Server-requested delay when present, otherwise backoff.
    #[must_use]
    pub fn delay_for(&self, headers: &http::HeaderMap, retry_index: u32) -> Duration {
        parse_retry_after_delay(headers).unwrap_or_else(|| self.backoff_delay(retry_index))
    }
}

#[inline]
pub(crate) fn should_retry_upstream_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

#[inline]
pub(crate) fn should_retry_transport_message(message: &str) -> bool {
    const NEEDLES: [&[u8]; 8] = [
        b"timed out",
        b"timeout",
        b"connection reset",
        b"connection aborted",
        b"connection refused",
        b"connection closed",
        b"broken pipe",
        b"unexpected eof",
    ];
    let haystack = message.as_bytes();
    NEEDLES
        .iter()
        .any(|needle| contains_ascii_case_insensitive(haystack, needle))
}

#[inline]
fn contains_timeout(message: &str) -> bool {
    contains_ascii_case_insensitive(message.as_bytes(), b"timeout")
}

#[inline]
fn contains_ascii_case_insensitive(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if haystack.len() < needle.len() {
        return false;
    }

    haystack.windows(needle.len()).any(|window| {
        window
            .iter()
            .zip(needle.iter())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
    })
}

#[inline]
pub(crate) fn parse_retry_after_delay(headers: &http::HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds.min(RETRY_AFTER_MAX_SECS)));
    }

    let target = httpdate::parse_http_date(raw).ok()?;
    let delay = target.duration_since(SystemTime::now()).unwrap_or_default();
    Some(delay.min(Duration::from_secs(RETRY_AFTER_MAX_SECS)))
}
