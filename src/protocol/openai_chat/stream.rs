use futures_util::Stream;

use crate::error::BridgeError;
use crate::stream::{fold_sse_body, ChatDeltaAccumulator, ResponseStream};

/// Fragments of a streamed Chat Completions body.
pub fn chat_response_stream<S, E>(byte_stream: S) -> ResponseStream
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Into<BridgeError> + Send + 'static,
{
    fold_sse_body(byte_stream, ChatDeltaAccumulator::new())
}
