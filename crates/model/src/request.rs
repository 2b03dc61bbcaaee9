use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// Who authored a turn.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The system instructions.
    System,
    /// The farmer.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Returns the wire name of the role.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Turn {
    /// The author of the turn.
    pub role: Role,
    /// The text, possibly with markdown and an image marker.
    pub content: String,
}

impl Turn {
    /// Creates a system turn.
    #[inline]
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Creates a user turn.
    #[inline]
    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant turn.
    #[inline]
    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The ordered list of turns exchanged so far.
///
/// The transcript is append-only; earlier turns are never rewritten.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Creates an empty transcript.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a turn.
    #[inline]
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Returns the last turn if any.
    #[inline]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Consumes the transcript and returns its turns.
    #[inline]
    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

impl Deref for Transcript {
    type Target = [Turn];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.turns
    }
}

impl From<Vec<Turn>> for Transcript {
    #[inline]
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

impl FromIterator<Turn> for Transcript {
    fn from_iter<I: IntoIterator<Item = Turn>>(iter: I) -> Self {
        Self {
            turns: iter.into_iter().collect(),
        }
    }
}

/// A request to be sent to the chat provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChatRequest {
    /// The messages to send, system instructions included.
    pub messages: Vec<Turn>,
}
