//! The relay orchestrator: sends a user turn upstream and persists the exchange.

mod builder;
mod error;

use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use farm_chat_model::{ChatRequest, Role, Transcript, Turn};

pub use self::builder::RelayBuilder;
pub use self::error::{Error, ErrorKind};
use crate::context::ContextAnnotation;
use crate::guard::ConversationLocks;
use crate::store::{
    ConversationId, Error as StoreError, ErrorKind as StoreErrorKind,
    RecordStore, StoredMessage,
};
use crate::upstream::{StreamedReply, UpstreamClient};

/// Where a send currently is.
///
/// A send moves `Idle → RequestSent → (Rejected | Streaming) → (Finalized
/// | Failed)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SendStage {
    /// Nothing has happened yet.
    #[default]
    Idle,
    /// The request is on its way and the status is not known yet.
    RequestSent,
    /// The upstream answered with a failure status.
    Rejected,
    /// The body is being read.
    Streaming,
    /// The reply is complete.
    Finalized,
    /// The body broke or carried no text.
    Failed,
}

impl Display for SendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendStage::Idle => "idle",
            SendStage::RequestSent => "request sent",
            SendStage::Rejected => "rejected",
            SendStage::Streaming => "streaming",
            SendStage::Finalized => "finalized",
            SendStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Whether a turn reached the record store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Persistence {
    /// The turn was stored.
    Saved(StoredMessage),
    /// The turn could not be stored. The reason is meant for a warning.
    NotSaved(String),
}

impl Persistence {
    /// Returns `true` if the turn was stored.
    #[inline]
    pub fn is_saved(&self) -> bool {
        matches!(self, Persistence::Saved(_))
    }
}

/// The outcome of a successful send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssistantTurn {
    /// The full reply text.
    pub content: String,
    /// Whether the user turn was stored.
    pub user_message: Persistence,
    /// Whether the reply was stored.
    pub message: Persistence,
    /// How many data frames were dropped as unparseable.
    pub malformed_frames: usize,
}

/// Relays user turns to the upstream provider and persists the results.
///
/// A relay is cheap to share between tasks. Sends for different
/// conversations run independently, while a second send for a
/// conversation that already has one in flight is refused with
/// [`ErrorKind::Busy`].
pub struct Relay {
    upstream: UpstreamClient,
    store: Arc<dyn RecordStore>,
    locks: ConversationLocks,
    system_prompt: String,
    persist_budget: Duration,
}

impl Relay {
    /// Returns the record store this relay persists to.
    #[inline]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Returns the client for the upstream provider.
    #[inline]
    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    /// Returns `true` if a send is in flight for the conversation.
    #[inline]
    pub fn is_busy(&self, conversation: &ConversationId) -> bool {
        self.locks.is_busy(conversation)
    }

    /// Sends a new user turn and streams the reply.
    ///
    /// `transcript` holds the prior turns, without the new one. The
    /// annotation is only prepended to the outgoing copy of the new turn.
    /// The stored user turn is always `new_user_content` alone.
    ///
    /// `on_progress` receives the whole reply accumulated so far each time
    /// it grows.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future stops reading the reply, stores nothing
    /// for the assistant and releases the conversation for the next send.
    /// The user turn may already be stored.
    pub async fn send(
        &self,
        conversation: &ConversationId,
        transcript: &Transcript,
        new_user_content: &str,
        context: &ContextAnnotation,
        on_progress: impl FnMut(&str) + Send,
    ) -> Result<AssistantTurn, Error> {
        let Some(_guard) = self.locks.try_acquire(conversation) else {
            warn!("{conversation}: refused overlapping send");
            return Err(Error::new(ErrorKind::Busy, SendStage::Idle));
        };

        let user_message =
            self.persist(conversation, Role::User, new_user_content).await;

        let req = self.build_request(transcript, new_user_content, context);
        let mut stage = SendStage::Idle;
        advance(conversation, &mut stage, SendStage::RequestSent);

        let resp = match self.upstream.send_request(req).await {
            Ok(resp) => resp,
            Err(err) => {
                advance(conversation, &mut stage, SendStage::Rejected);
                return Err(Error::new(err.kind().into(), stage)
                    .with_reason(err.to_string()));
            }
        };
        advance(conversation, &mut stage, SendStage::Streaming);

        let reply = resp.stream(on_progress).await;
        let StreamedReply { text, summary } = match reply {
            Ok(reply) => reply,
            Err(err) => {
                advance(conversation, &mut stage, SendStage::Failed);
                return Err(Error::new(err.kind().into(), stage)
                    .with_reason(err.to_string()));
            }
        };
        if summary.malformed_frames > 0 {
            warn!(
                "{conversation}: dropped {} malformed frames",
                summary.malformed_frames
            );
        }
        if text.is_empty() {
            advance(conversation, &mut stage, SendStage::Failed);
            return Err(Error::new(ErrorKind::EmptyResponse, stage));
        }
        advance(conversation, &mut stage, SendStage::Finalized);

        let message =
            self.persist(conversation, Role::Assistant, &text).await;
        if message.is_saved() {
            if let Err(err) = self.store.touch_conversation(conversation).await
            {
                warn!("{conversation}: failed to refresh: {err}");
            }
        }

        Ok(AssistantTurn {
            content: text,
            user_message,
            message,
            malformed_frames: summary.malformed_frames,
        })
    }

    /// Builds the outgoing request: the system prompt, the prior turns, then
    /// the annotated new turn.
    pub fn build_request(
        &self,
        transcript: &Transcript,
        new_user_content: &str,
        context: &ContextAnnotation,
    ) -> ChatRequest {
        let mut messages = Vec::with_capacity(transcript.len() + 2);
        messages.push(Turn::system(self.system_prompt.as_str()));
        messages.extend(transcript.iter().cloned());
        messages.push(Turn::user(context.annotate(new_user_content)));
        ChatRequest { messages }
    }

    async fn persist(
        &self,
        conversation: &ConversationId,
        role: Role,
        content: &str,
    ) -> Persistence {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(50))
            .with_max_elapsed_time(Some(self.persist_budget))
            .build();
        let store = &self.store;
        let result = backoff::future::retry(backoff, || async move {
            store
                .save_message(conversation, role, content)
                .await
                .map_err(classify_store_error)
        })
        .await;

        match result {
            Ok(message) => Persistence::Saved(message),
            Err(err) => {
                warn!(
                    "{conversation}: failed to save {} turn: {err}",
                    role.as_str()
                );
                Persistence::NotSaved(err.reason().into_owned())
            }
        }
    }
}

fn advance(
    conversation: &ConversationId,
    stage: &mut SendStage,
    next: SendStage,
) {
    debug!("{conversation}: {stage} -> {next}");
    *stage = next;
}

fn classify_store_error(err: StoreError) -> backoff::Error<StoreError> {
    match err.kind() {
        StoreErrorKind::Unavailable => backoff::Error::transient(err),
        StoreErrorKind::NotFound => backoff::Error::permanent(err),
    }
}
