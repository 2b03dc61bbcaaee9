//! The record store that conversations and messages are persisted to.
//!
//! The relay only needs [`RecordStore::save_message`] and
//! [`RecordStore::touch_conversation`]; the rest backs conversation
//! management in the session layer.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use farm_chat_model::Role;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to new conversations.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Identifies a conversation in the store.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wraps an existing identifier.
    #[inline]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The summary record of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Identifier of the conversation.
    pub id: ConversationId,
    /// Title shown in the conversation list.
    pub title: String,
    /// When the conversation was created.
    pub created_at: DateTime<Utc>,
    /// When the conversation last received a reply.
    pub updated_at: DateTime<Utc>,
    /// Whether the conversation is pinned to the top.
    pub is_pinned: bool,
    /// Whether the conversation is archived.
    pub is_archived: bool,
}

/// A persisted message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Identifier of the message.
    pub id: String,
    /// The conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub role: Role,
    /// The displayed text.
    pub content: String,
    /// When the message was stored.
    pub created_at: DateTime<Utc>,
}

/// Metadata changes for a conversation. `None` fields are left alone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationPatch {
    /// New title.
    pub title: Option<String>,
    /// New pinned flag.
    pub is_pinned: Option<bool>,
    /// New archived flag.
    pub is_archived: Option<bool>,
}

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The record does not exist.
    NotFound,
    /// The store could not be reached or refused the write.
    Unavailable,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::Unavailable => write!(f, "Store unavailable"),
        }
    }
}

/// Describes a record store error.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Error {
    kind: ErrorKind,
    reason: Option<String>,
}

impl Error {
    /// Creates a new error with the `NotFound` kind.
    #[inline]
    pub fn not_found() -> Self {
        Self {
            kind: ErrorKind::NotFound,
            reason: None,
        }
    }

    /// Creates a new error with the `Unavailable` kind.
    #[inline]
    pub fn unavailable() -> Self {
        Self {
            kind: ErrorKind::Unavailable,
            reason: None,
        }
    }

    /// Attaches a reason to the error.
    #[inline]
    pub fn with_reason<S: Into<String>>(self, reason: S) -> Self {
        Self {
            kind: self.kind,
            reason: Some(reason.into()),
        }
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the reason for the error.
    #[inline]
    pub fn reason(&self) -> Cow<'_, str> {
        match self.reason.as_deref() {
            Some(reason) => Cow::Borrowed(reason),
            None => Cow::Owned(format!("{}", self.kind)),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

impl std::error::Error for Error {}

/// A store for conversations and their messages.
///
/// Implementations are expected to serialize writes per conversation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Creates an empty conversation with the default title.
    async fn create_conversation(&self) -> Result<ConversationSummary, Error>;

    /// Lists conversations, most recently updated first.
    async fn list_conversations(
        &self,
    ) -> Result<Vec<ConversationSummary>, Error>;

    /// Applies a metadata patch to a conversation.
    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<ConversationSummary, Error>;

    /// Refreshes the conversation's `updated_at`.
    async fn touch_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<(), Error>;

    /// Deletes a conversation and its messages.
    async fn delete_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<(), Error>;

    /// Deletes every conversation.
    async fn delete_all_conversations(&self) -> Result<(), Error>;

    /// Appends a message to a conversation.
    async fn save_message(
        &self,
        id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, Error>;

    /// Lists a conversation's messages, oldest first.
    async fn list_messages(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, Error>;
}

#[derive(Default)]
struct MemoryState {
    // The counter breaks ties between equal timestamps.
    conversations: HashMap<ConversationId, (ConversationSummary, u64)>,
    messages: Vec<StoredMessage>,
    clock: u64,
}

impl MemoryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// A [`RecordStore`] kept in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> T {
        let mut state =
            self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_conversation(&self) -> Result<ConversationSummary, Error> {
        let now = Utc::now();
        let summary = ConversationSummary {
            id: ConversationId(Uuid::new_v4().to_string()),
            title: DEFAULT_TITLE.to_owned(),
            created_at: now,
            updated_at: now,
            is_pinned: false,
            is_archived: false,
        };
        self.with_state(|state| {
            let seq = state.tick();
            state
                .conversations
                .insert(summary.id.clone(), (summary.clone(), seq));
        });
        Ok(summary)
    }

    async fn list_conversations(
        &self,
    ) -> Result<Vec<ConversationSummary>, Error> {
        let mut entries: Vec<_> = self.with_state(|state| {
            state.conversations.values().cloned().collect()
        });
        entries.sort_by(|(a, a_seq), (b, b_seq)| {
            (b.updated_at, b_seq).cmp(&(a.updated_at, a_seq))
        });
        Ok(entries.into_iter().map(|(summary, _)| summary).collect())
    }

    async fn update_conversation(
        &self,
        id: &ConversationId,
        patch: ConversationPatch,
    ) -> Result<ConversationSummary, Error> {
        self.with_state(|state| {
            let (summary, _) = state
                .conversations
                .get_mut(id)
                .ok_or_else(Error::not_found)?;
            if let Some(title) = patch.title {
                summary.title = title;
            }
            if let Some(is_pinned) = patch.is_pinned {
                summary.is_pinned = is_pinned;
            }
            if let Some(is_archived) = patch.is_archived {
                summary.is_archived = is_archived;
            }
            Ok(summary.clone())
        })
    }

    async fn touch_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<(), Error> {
        self.with_state(|state| {
            let seq = state.tick();
            let entry = state
                .conversations
                .get_mut(id)
                .ok_or_else(Error::not_found)?;
            entry.0.updated_at = Utc::now();
            entry.1 = seq;
            Ok(())
        })
    }

    async fn delete_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<(), Error> {
        self.with_state(|state| {
            state
                .conversations
                .remove(id)
                .ok_or_else(Error::not_found)?;
            state.messages.retain(|m| &m.conversation_id != id);
            Ok(())
        })
    }

    async fn delete_all_conversations(&self) -> Result<(), Error> {
        self.with_state(|state| {
            state.conversations.clear();
            state.messages.clear();
        });
        Ok(())
    }

    async fn save_message(
        &self,
        id: &ConversationId,
        role: Role,
        content: &str,
    ) -> Result<StoredMessage, Error> {
        self.with_state(|state| {
            if !state.conversations.contains_key(id) {
                return Err(Error::not_found()
                    .with_reason(format!("no conversation {id}")));
            }
            let message = StoredMessage {
                id: Uuid::new_v4().to_string(),
                conversation_id: id.clone(),
                role,
                content: content.to_owned(),
                created_at: Utc::now(),
            };
            state.messages.push(message.clone());
            Ok(message)
        })
    }

    async fn list_messages(
        &self,
        id: &ConversationId,
    ) -> Result<Vec<StoredMessage>, Error> {
        self.with_state(|state| {
            if !state.conversations.contains_key(id) {
                return Err(Error::not_found());
            }
            Ok(state
                .messages
                .iter()
                .filter(|m| &m.conversation_id == id)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_messages_round_trip() {
        let store = MemoryStore::new();
        let conversation = store.create_conversation().await.unwrap();
        assert_eq!(conversation.title, DEFAULT_TITLE);

        store
            .save_message(&conversation.id, Role::User, "hi")
            .await
            .unwrap();
        store
            .save_message(&conversation.id, Role::Assistant, "• Hello")
            .await
            .unwrap();

        let messages = store.list_messages(&conversation.id).await.unwrap();
        let contents: Vec<_> =
            messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["hi", "• Hello"]);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let store = MemoryStore::new();
        let id = ConversationId::new("missing");
        let err = store.save_message(&id, Role::User, "hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "no conversation missing");

        let err = store.touch_conversation(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Not found");
    }

    #[tokio::test]
    async fn test_listing_order_and_patches() {
        let store = MemoryStore::new();
        let first = store.create_conversation().await.unwrap();
        let second = store.create_conversation().await.unwrap();

        let listed = store.list_conversations().await.unwrap();
        assert_eq!(listed[0].id, second.id);

        store.touch_conversation(&first.id).await.unwrap();
        let listed = store.list_conversations().await.unwrap();
        assert_eq!(listed[0].id, first.id);

        let patched = store
            .update_conversation(
                &second.id,
                ConversationPatch {
                    title: Some("Wheat sowing".to_owned()),
                    is_pinned: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(patched.title, "Wheat sowing");
        assert!(patched.is_pinned);
        assert!(!patched.is_archived);
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let store = MemoryStore::new();
        let keep = store.create_conversation().await.unwrap();
        let gone = store.create_conversation().await.unwrap();
        store.save_message(&keep.id, Role::User, "a").await.unwrap();
        store.save_message(&gone.id, Role::User, "b").await.unwrap();

        store.delete_conversation(&gone.id).await.unwrap();
        assert_eq!(
            store.list_messages(&gone.id).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(store.list_messages(&keep.id).await.unwrap().len(), 1);

        store.delete_all_conversations().await.unwrap();
        assert!(store.list_conversations().await.unwrap().is_empty());
    }
}
