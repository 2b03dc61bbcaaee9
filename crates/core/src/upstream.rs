//! The HTTP client for the upstream chat model service.

use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use farm_chat_model::{
    ChatProvider, ChatProviderError, ChatRequest, ChatResponse,
    DecodeSummary, StreamDecoder,
};
use tracing::Instrument;

/// A type-erased provider error.
pub type UpstreamError = Box<dyn ChatProviderError>;

type SendRequestResult = Result<UpstreamResponse, UpstreamError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ChatRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// A wrapper around a chat provider that provides a type-erased interface
/// for the relay and the HTTP server.
#[derive(Clone)]
pub struct UpstreamClient {
    handler_fn: HandlerFn,
}

impl UpstreamClient {
    /// Wraps a provider.
    #[inline]
    pub fn new<P: ChatProvider + 'static>(provider: P) -> Self {
        // Erase `P` so callers don't need a generic parameter.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("sending {} messages", req.messages.len());
                    match fut.await {
                        Ok(resp) => Ok(UpstreamResponse {
                            inner: Box::pin(resp),
                        }),
                        Err(err) => {
                            error!("request rejected: {err}");
                            Err(Box::new(err) as UpstreamError)
                        }
                    }
                }
                .instrument(trace_span!("upstream req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and resolves once the response status is known.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Nothing is read from the response body
    /// until the returned response is polled.
    #[inline]
    pub async fn send_request(&self, req: ChatRequest) -> SendRequestResult {
        (self.handler_fn)(req).await
    }
}

trait ErasedResponse: Send {
    fn poll_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Bytes>, UpstreamError>>;
}

impl<R: ChatResponse> ErasedResponse for R {
    fn poll_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Bytes>, UpstreamError>> {
        self.poll_next_chunk(cx)
            .map_err(|err| Box::new(err) as UpstreamError)
    }
}

/// An accepted response whose body has not been consumed yet.
pub struct UpstreamResponse {
    inner: Pin<Box<dyn ErasedResponse>>,
}

impl UpstreamResponse {
    /// Reads the next raw body chunk, or `None` at the end of the body.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, UpstreamError> {
        poll_fn(|cx| self.inner.as_mut().poll_chunk(cx)).await
    }

    /// Decodes the body to the end.
    ///
    /// After every fragment, `on_progress` receives the whole text
    /// accumulated so far. Reading stops at the done sentinel or at the end
    /// of the body, whichever comes first.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future abandons the body. Fragments already
    /// reported stay reported.
    pub async fn stream(
        mut self,
        mut on_progress: impl FnMut(&str),
    ) -> Result<StreamedReply, UpstreamError> {
        let mut decoder = StreamDecoder::new();
        let mut text = String::new();

        trace!("start receiving chunks");
        while !decoder.is_done() {
            let chunk = match self.next_chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(err) => {
                    error!("stream broke after {} bytes: {err}", text.len());
                    return Err(err);
                }
            };
            trace!("got a chunk of {} bytes", chunk.len());

            for fragment in decoder.feed(&chunk) {
                text.push_str(&fragment);
                on_progress(&text);
            }
        }

        let summary = decoder.finish();
        trace!("finished receiving: {summary:?}");
        Ok(StreamedReply { text, summary })
    }
}

/// A completely received reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamedReply {
    /// All fragments concatenated in arrival order.
    pub text: String,
    /// What the decoder observed.
    pub summary: DecodeSummary,
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use farm_chat_model::{ErrorKind, Turn};
    use farm_chat_test_model::{PresetReply, TestChatProvider, frame};

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            messages: vec![Turn::user("Hi")],
        }
    }

    #[tokio::test]
    async fn test_stream_reply() {
        let mut provider = TestChatProvider::default();
        provider.add_reply(PresetReply::with_fragments(["How ", "are ", "you?"]));
        let client = UpstreamClient::new(provider);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let resp = client.send_request(request()).await.unwrap();
        let reply = resp
            .stream({
                let seen = Arc::clone(&seen);
                move |text: &str| seen.lock().unwrap().push(text.to_owned())
            })
            .await
            .unwrap();

        assert_eq!(reply.text, "How are you?");
        assert!(reply.summary.saw_sentinel);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["How ", "How are ", "How are you?"]
        );
    }

    #[tokio::test]
    async fn test_stops_at_sentinel() {
        let mut provider = TestChatProvider::default();
        provider.add_reply(PresetReply::with_chunks([
            "data: [DONE]\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n",
        ]));
        let client = UpstreamClient::new(provider.clone());

        let resp = client.send_request(request()).await.unwrap();
        let reply = resp.stream(|_| {}).await.unwrap();
        assert_eq!(reply.text, "");
        assert_eq!(provider.chunks_read(), 1);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let mut provider = TestChatProvider::default();
        provider.add_reply(PresetReply::with_status(402));
        provider.add_reply(PresetReply::with_chunks([frame("Hel")]).then_fail());
        let client = UpstreamClient::new(provider);

        let err = client.send_request(request()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);

        let resp = client.send_request(request()).await.unwrap();
        let err = resp.stream(|_| {}).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        let err = client.send_request(request()).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
    }
}
