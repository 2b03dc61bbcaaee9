use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use farm_chat_model::{ChatResponse, ErrorKind};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::Chunks;

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextChunk = (Result<Option<Bytes>, Error>, Chunks);

pin_project! {
    /// The streaming body of a successful gateway response.
    pub struct GatewayResponse {
        next_chunk_fut: Option<PinnedFuture<NextChunk>>,
        bytes_read: usize,
    }
}

impl GatewayResponse {
    #[inline]
    pub(crate) fn from_chunks(chunks: Chunks) -> Self {
        Self {
            next_chunk_fut: Some(Box::pin(next_chunk(chunks))),
            bytes_read: 0,
        }
    }

    /// Returns how many body bytes have been read so far.
    #[inline]
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }
}

impl ChatResponse for GatewayResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Bytes>, Self::Error>> {
        let this = self.project();
        let Some(next_chunk_fut) = this.next_chunk_fut else {
            // The body has been exhausted or has failed.
            return Poll::Ready(Ok(None));
        };
        let (result, chunks) = ready!(next_chunk_fut.as_mut().poll(cx));
        match result {
            Ok(Some(chunk)) => {
                *this.bytes_read += chunk.len();
                // The body may have more data, create a new future for the
                // next chunk.
                *this.next_chunk_fut = Some(Box::pin(next_chunk(chunks)));
                Poll::Ready(Ok(Some(chunk)))
            }
            Ok(None) => {
                trace!("body ended after {} bytes", this.bytes_read);
                *this.next_chunk_fut = None;
                Poll::Ready(Ok(None))
            }
            Err(err) => {
                *this.next_chunk_fut = None;
                Poll::Ready(Err(err))
            }
        }
    }
}

async fn next_chunk(mut chunks: Chunks) -> NextChunk {
    let result = chunks.next_chunk().await.map_err(|err| {
        Error::new(
            format!("failed to read the response body: {}", err.0),
            ErrorKind::Unavailable,
        )
    });
    (result, chunks)
}
