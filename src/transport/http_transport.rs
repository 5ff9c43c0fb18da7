use std::time::Duration;

use bytes::Bytes;

use crate::diagnostics::upstream_error_message;
use crate::error::BridgeError;

use super::retry_policy::RetryPolicy;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_reqwest_client(timeout: Duration) -> Result<reqwest::Client, BridgeError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(CONNECT_TIMEOUT.min(timeout))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeout)
        .build()
        .map_err(|err| BridgeError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// A fully read upstream reply. Non-2xx statuses are returned, not raised,
/// so the caller can attach the body to its failure report.
#[derive(Debug, Clone)]
pub struct UpstreamReply {
    pub status: u16,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl UpstreamReply {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The rejection as an error, with the message pulled from the body.
    #[must_use]
    pub fn to_error(&self) -> BridgeError {
        BridgeError::Upstream {
            status: self.status,
            message: upstream_error_message(&self.body),
        }
    }

    async fn read(response: reqwest::Response) -> Result<Self, BridgeError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }
}

/// Outcome of opening a streamed request.
#[derive(Debug)]
pub enum StreamReply {
    /// 2xx; the body is unread.
    Open(reqwest::Response),
    /// Final non-2xx reply, fully read.
    Rejected(UpstreamReply),
}

/// HTTP client for upstream providers with the retry policy applied per send.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] when the underlying client cannot be built.
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Result<Self, BridgeError> {
        Ok(Self {
            client: build_reqwest_client(timeout)?,
            retry,
        })
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn execute(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: &Bytes,
    ) -> Result<reqwest::Response, BridgeError> {
        let mut request = reqwest::Request::new(http::Method::POST, url.clone());
        *request.headers_mut() = headers.clone();
        *request.body_mut() = Some(reqwest::Body::from(body.clone()));
        Ok(self.client.execute(request).await?)
    }

    /// Whether a failed attempt should be re-sent; sleeps for the delay when it should.
    async fn backoff_after_error(&self, err: &BridgeError, attempt: u32) -> bool {
        if !self.retry.has_attempts_left(attempt) || !self.retry.is_retryable(err) {
            return false;
        }
        let delay = self.retry.backoff_delay(attempt - 1);
        tracing::debug!(
            retry_attempt = attempt,
            delay_ms = delay.as_millis(),
            error = %err,
            "retrying upstream request after transport error"
        );
        tokio::time::sleep(delay).await;
        true
    }

    /// Classify a non-2xx reply like any other error; sleeps and returns `true`
    /// when it should be sent again.
    async fn backoff_after_reply(&self, reply: &UpstreamReply, attempt: u32) -> bool {
        if !self.retry.has_attempts_left(attempt) {
            return false;
        }
        let err = reply.to_error();
        if !self.retry.is_retryable(&err) {
            return false;
        }
        let delay = self.retry.delay_for(&reply.headers, attempt - 1);
        tracing::debug!(
            status = reply.status,
            retry_attempt = attempt,
            delay_ms = delay.as_millis(),
            error = %err,
            "retrying upstream request after retriable reply"
        );
        tokio::time::sleep(delay).await;
        true
    }

    /// POST `body` and read the whole reply, retrying transient failures.
    ///
    /// Reading the body is part of each attempt, so a timeout while the body
    /// is still arriving is retried like a connect timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] or [`BridgeError::Timeout`] once
    /// retries are exhausted or the failure is not retryable.
    pub async fn send_buffered(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamReply, BridgeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = match self.execute(url, headers, &body).await {
                Ok(response) => response,
                Err(err) => {
                    if self.backoff_after_error(&err, attempt).await {
                        continue;
                    }
                    return Err(err);
                }
            };

            let reply = match UpstreamReply::read(response).await {
                Ok(reply) => reply,
                Err(err) => {
                    if self.backoff_after_error(&err, attempt).await {
                        continue;
                    }
                    return Err(err);
                }
            };
            if !reply.is_success() && self.backoff_after_reply(&reply, attempt).await {
                continue;
            }
            return Ok(reply);
        }
    }

    /// POST `body` and hand back a 2xx response with its body unread.
    ///
    /// Connection failures and retriable rejections are retried; once a 2xx
    /// response is returned, its body belongs to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] or [`BridgeError::Timeout`] once
    /// retries are exhausted or the failure is not retryable.
    pub async fn send_stream(
        &self,
        url: &url::Url,
        headers: &http::HeaderMap,
        body: Bytes,
    ) -> Result<StreamReply, BridgeError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = match self.execute(url, headers, &body).await {
                Ok(response) => response,
                Err(err) => {
                    if self.backoff_after_error(&err, attempt).await {
                        continue;
                    }
                    return Err(err);
                }
            };
            if response.status().is_success() {
                return Ok(StreamReply::Open(response));
            }

            let reply = match UpstreamReply::read(response).await {
                Ok(reply) => reply,
                Err(err) => {
                    if self.backoff_after_error(&err, attempt).await {
                        continue;
                    }
                    return Err(err);
                }
            };
            if self.backoff_after_reply(&reply, attempt).await {
                continue;
            }
            return Ok(StreamReply::Rejected(reply));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_builds_with_policy() {
        let transport =
            HttpTransport::new(Duration::from_secs(5), RetryPolicy::no_retry()).unwrap();
        assert_eq!(transport.retry_policy().max_attempts, 1);
    }

    #[test]
    fn test_reply_success_range() {
        let reply = UpstreamReply {
            status: 204,
            headers: http::HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(reply.is_success());
        let reply = UpstreamReply {
            status: 429,
            ..reply
        };
        assert!(!reply.is_success());
    }

    #[test]
    fn test_reply_to_error_uses_body_message() {
        let reply = UpstreamReply {
            status: 408,
            headers: http::HeaderMap::new(),
            body: Bytes::from_static(br#"{"error":{"message":"Request timeout"}}"#),
        };
        let err = reply.to_error();
        assert_eq!(err.upstream_status(), Some(408));
        assert!(RetryPolicy::default().is_retryable(&err));

        let reply = UpstreamReply {
            status: 400,
            body: Bytes::from_static(br#"{"error":{"message":"bad tool schema"}}"#),
            ..reply
        };
        assert!(!RetryPolicy::default().is_retryable(&reply.to_error()));
    }

    #[tokio::test]
    async fn test_refused_connection_is_retried_then_surfaced() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_ratio: 0.0,
        };
        let transport = HttpTransport::new(Duration::from_secs(2), policy).unwrap();
        let url = url::Url::parse(&format!("http://{addr}/v1/chat/completions")).unwrap();
        let err = transport
            .send_buffered(&url, &http::HeaderMap::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::Transport(_) | BridgeError::Timeout(_)
        ));
    }
}
