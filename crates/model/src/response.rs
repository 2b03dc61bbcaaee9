use std::pin::Pin;
use std::task::{self, Poll};

use bytes::Bytes;

use crate::provider::ChatProviderError;

/// A streaming response from the chat provider.
///
/// The response only carries the raw body. It does not interpret the
/// server-sent events, so it can be relayed byte-for-byte or decoded with
/// a [`StreamDecoder`](crate::StreamDecoder).
pub trait ChatResponse: Sized + Send + 'static {
    /// The error type that may be returned by the provider.
    type Error: ChatProviderError;

    /// Attempts to pull out the next body chunk.
    ///
    /// # Return value
    ///
    /// - `Poll::Pending` means that the next chunk is not ready yet.
    ///   Implementations will ensure that the current task will be
    ///   notified when it may be ready.
    /// - `Poll::Ready(Ok(Some(chunk)))` delivers a chunk. Chunk boundaries
    ///   carry no meaning and may split an event or a UTF-8 sequence.
    /// - `Poll::Ready(Ok(None))` means the body has ended.
    /// - `Poll::Ready(Err(error))` means reading the body failed.
    ///
    /// Calling this method after completion should always return `None`.
    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<Bytes>, Self::Error>>;
}
