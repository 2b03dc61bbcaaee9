use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use farm_chat_model::{
    ChatProvider, ChatProviderError, ChatRequest, ChatResponse, ErrorKind,
    Role, StreamDecoder, Turn,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeProviderError(ErrorKind);

impl Display for FakeProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeProviderError {}

impl ChatProviderError for FakeProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Echoes the last user turn back word by word, with frames split in the
/// middle to exercise the decoder.
#[derive(Debug)]
struct FakeResponse {
    fake_chunks: VecDeque<Bytes>,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FakeResponse {
    fn new(input: &str) -> Self {
        let mut body = String::new();
        for word in format!("You said {input}").split_inclusive(' ') {
            let record = serde_json::json!({
                "choices": [{ "delta": { "content": word } }]
            });
            body.push_str(&format!("data: {record}\n"));
        }
        body.push_str("data: [DONE]\n");

        let fake_chunks = body
            .as_bytes()
            .chunks(7)
            .map(Bytes::copy_from_slice)
            .collect();
        Self {
            fake_chunks,
            sleep: None,
        }
    }
}

impl ChatResponse for FakeResponse {
    type Error = FakeProviderError;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<Bytes>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };
        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;
            return Poll::Ready(Ok(this.fake_chunks.pop_front()));
        }
        this.sleep = Some(Box::pin(sleep(Duration::from_millis(1))));
        Pin::new(this).poll_next_chunk(cx)
    }
}

struct FakeProvider;

impl ChatProvider for FakeProvider {
    type Error = FakeProviderError;
    type Response = FakeResponse;

    fn send_request(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let result = 'blk: {
            let Some(last) = req.messages.last() else {
                break 'blk Err(FakeProviderError(ErrorKind::Unavailable));
            };
            if last.role != Role::User {
                break 'blk Err(FakeProviderError(ErrorKind::RateLimited));
            }
            Ok(FakeResponse::new(&last.content))
        };
        ready(result)
    }
}

mod tests {
    use std::future::poll_fn;

    use super::*;

    #[tokio::test]
    async fn test_completion() {
        let provider = FakeProvider;
        let req = ChatRequest {
            messages: vec![
                Turn::system("Answer in bullets."),
                Turn::user("Good morning"),
            ],
        };
        let mut resp = provider.send_request(&req).await.unwrap();

        let mut decoder = StreamDecoder::new();
        let mut resp_message = String::new();
        loop {
            let chunk_fut =
                poll_fn(|cx| Pin::new(&mut resp).poll_next_chunk(cx));
            match chunk_fut.await {
                Ok(Some(chunk)) => {
                    for fragment in decoder.feed(&chunk) {
                        resp_message.push_str(&fragment);
                    }
                }
                Ok(None) => break,
                Err(err) => unreachable!("unexpected error: {err:?}"),
            }
        }

        assert_eq!(resp_message, "You said Good morning");
        let summary = decoder.finish();
        assert!(summary.saw_sentinel);
        assert_eq!(summary.malformed_frames, 0);
    }

    #[tokio::test]
    async fn test_error() {
        let provider = FakeProvider;
        let req = ChatRequest { messages: vec![] };
        let err = provider.send_request(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);

        let req = ChatRequest {
            messages: vec![Turn::assistant("• Hello")],
        };
        let err = provider.send_request(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }
}
