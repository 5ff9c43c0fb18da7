pub mod accumulator;
pub mod sse;

use std::pin::Pin;

use futures_util::Stream;

use crate::error::BridgeError;
use crate::protocol::canonical::NormalizedResponse;

pub use accumulator::{ChatDeltaAccumulator, EventFolder, FragmentQueue, FragmentStream};
pub use sse::{sse_json_stream, FeedStatus, SseParser};

/// A lazy, finite sequence of response fragments for one call.
///
/// The last successful item is the only one carrying a finish reason.
/// Dropping the stream cancels the upstream request.
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<NormalizedResponse, BridgeError>> + Send>>;

/// Drive `folder` over an SSE body and box the result.
pub fn fold_sse_body<S, E, F>(byte_stream: S, folder: F) -> ResponseStream
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
    F: EventFolder + Send + 'static,
{
    Box::pin(FragmentStream::new(sse_json_stream(byte_stream), folder))
}
