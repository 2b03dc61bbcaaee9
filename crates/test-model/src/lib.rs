//! A local scripted provider for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use bytes::Bytes;
use farm_chat_model::{
    ChatProvider, ChatProviderError, ChatRequest, ChatResponse, ErrorKind,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    #[allow(dead_code)]
    message: &'static str,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl ChatProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

#[derive(Debug)]
pub struct TestChatResponse {
    chunks: VecDeque<PresetChunk>,
    chunks_read: Arc<AtomicUsize>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ChatResponse for TestChatResponse {
    type Error = crate::Error;

    fn poll_next_chunk(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<Bytes>, Self::Error>> {
        // SAFETY: This type does not require to be pinned.
        let this = unsafe { self.get_unchecked_mut() };

        if let Some(sleep) = &mut this.sleep {
            let sleep = sleep.as_mut();
            ready!(sleep.poll(cx));
            this.sleep = None;

            return match this.chunks.pop_front() {
                Some(PresetChunk::Text(text)) => {
                    this.chunks_read.fetch_add(1, Ordering::SeqCst);
                    Poll::Ready(Ok(Some(Bytes::from(text))))
                }
                Some(PresetChunk::Fail) => {
                    // Nothing can be read after a broken connection.
                    this.chunks.clear();
                    Poll::Ready(Err(Error {
                        message: "connection reset",
                        kind: ErrorKind::Unavailable,
                    }))
                }
                None => Poll::Ready(Ok(None)),
            };
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_chunk(cx)
    }
}

/// A local scripted provider for testing purpose.
///
/// Before sending requests, queue the replies the provider should answer
/// with. Each request consumes one reply in order. If there are no replies
/// left, an error will be returned.
///
/// Clones share the script and the recorded requests, so a test can keep
/// one clone for inspection after handing another to the code under test.
#[derive(Clone, Default)]
pub struct TestChatProvider {
    replies: Arc<Mutex<VecDeque<PresetReply>>>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
    chunks_read: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl TestChatProvider {
    #[inline]
    pub fn add_reply(&mut self, reply: PresetReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request received so far.
    #[inline]
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Returns how many body chunks have been handed out so far.
    #[inline]
    pub fn chunks_read(&self) -> usize {
        self.chunks_read.load(Ordering::SeqCst)
    }
}

impl ChatProvider for TestChatProvider {
    type Error = crate::Error;
    type Response = TestChatResponse;

    fn send_request(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.requests.lock().unwrap().push(req.clone());

        let result = 'blk: {
            let Some(reply) = self.replies.lock().unwrap().pop_front() else {
                break 'blk Err(Error {
                    message: "no enough replies",
                    kind: ErrorKind::Unavailable,
                });
            };
            if let Some(kind) = ErrorKind::from_status(reply.status) {
                break 'blk Err(Error {
                    message: "preset status",
                    kind,
                });
            }
            Ok(TestChatResponse {
                chunks: reply.chunks.into(),
                chunks_read: Arc::clone(&self.chunks_read),
                delay: self.delay.unwrap_or(Duration::from_millis(1)),
                sleep: None,
            })
        };
        ready(result)
    }
}
