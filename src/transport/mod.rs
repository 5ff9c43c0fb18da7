pub mod endpoint;
mod http_transport;
mod retry_policy;

pub use endpoint::{resolve_endpoint, RequestTarget};
pub use http_transport::{HttpTransport, StreamReply, UpstreamReply};
pub use retry_policy::RetryPolicy;
