use std::collections::BTreeMap;

use crate::error::BridgeError;
use crate::protocol::canonical::WireProtocol;

pub const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";
pub const RESPONSES_PATH: &str = "/responses";

/// Where requests go and which headers they carry.
///
/// Built once from configuration and read-only afterwards.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    base: url::Url,
    headers: http::HeaderMap,
}

impl RequestTarget {
    #[must_use]
    pub fn headers(&self) -> &http::HeaderMap {
        &self.headers
    }

    #[must_use]
    pub fn base_url(&self) -> &url::Url {
        &self.base
    }

    /// The endpoint URL for `protocol`.
    ///
    /// A base already ending in one protocol's path has that segment swapped
    /// for the other's; any other base gets the protocol path appended. The
    /// query string is preserved.
    #[must_use]
    pub fn url_for(&self, protocol: WireProtocol) -> url::Url {
        let wanted = protocol_path(protocol);
        let path = self.base.path().trim_end_matches('/');
        let stem = path
            .strip_suffix(CHAT_COMPLETIONS_PATH)
            .or_else(|| path.strip_suffix(RESPONSES_PATH))
            .unwrap_or(path);

        let mut url = self.base.clone();
        let mut new_path = String::with_capacity(stem.len() + wanted.len());
        new_path.push_str(stem);
        new_path.push_str(wanted);
        url.set_path(&new_path);
        url
    }
}

#[must_use]
pub fn protocol_path(protocol: WireProtocol) -> &'static str {
    match protocol {
        WireProtocol::Chat => CHAT_COMPLETIONS_PATH,
        WireProtocol::Responses => RESPONSES_PATH,
    }
}

/// Combine base URL, optional path suffix and credentials into a request target.
///
/// # Errors
///
/// Returns [`BridgeError::Config`] when the URL does not parse, is not http(s),
/// or a header name/value is invalid.
pub fn resolve_endpoint(
    base_url: &str,
    path_suffix: Option<&str>,
    api_key: Option<&str>,
    extra_headers: &BTreeMap<String, String>,
) -> Result<RequestTarget, BridgeError> {
    let raw = base_url.trim();
    let mut base = url::Url::parse(raw)
        .map_err(|e| BridgeError::Config(format!("invalid base URL '{raw}': {e}")))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(BridgeError::Config(format!(
            "base URL must be http or https, got '{}'",
            base.scheme()
        )));
    }
    if let Some(suffix) = path_suffix
        .map(|s| s.trim().trim_matches('/'))
        .filter(|s| !s.is_empty())
    {
        let joined = format!("{}/{suffix}", base.path().trim_end_matches('/'));
        base.set_path(&joined);
    }

    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    if let Some(key) = api_key.map(str::trim).filter(|k| !k.is_empty()) {
        let value = http::HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| BridgeError::Config(format!("invalid api key header value: {e}")))?;
        headers.insert(http::header::AUTHORIZATION, value);
    }
    for (name, value) in extra_headers {
        let name = http::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BridgeError::Config(format!("invalid header name '{name}': {e}")))?;
        let value = http::HeaderValue::from_str(value)
            .map_err(|e| BridgeError::Config(format!("invalid value for header '{name}': {e}")))?;
        headers.insert(name, value);
    }

    Ok(RequestTarget { base, headers })
}
