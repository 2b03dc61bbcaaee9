use std::fmt::{self, Display};
use std::sync::Arc;

use farm_chat_core::relay::{self, AssistantTurn, Relay, RelayBuilder};
use farm_chat_core::store::{
    self, ConversationId, ConversationPatch, ConversationSummary, RecordStore,
};
use farm_chat_core::{LocationContext, UpstreamClient};
use farm_chat_model::{ChatProvider, Transcript, Turn};

const IMAGE_MARKER: &str = "!Uploaded Image";

/// Speech settings of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoiceSettings {
    /// BCP 47 tag used for recognition and playback.
    pub language: String,
    /// Preferred playback voice, if any.
    pub voice_uri: Option<String>,
    /// Whether replies to spoken input are read aloud.
    pub auto_play: bool,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_owned(),
            voice_uri: None,
            auto_play: false,
        }
    }
}

/// Per-session settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionConfig {
    /// Speech settings.
    pub voice: VoiceSettings,
    /// Where the farmer is and what the weather is like.
    pub location: LocationContext,
}

/// A session error.
#[derive(Debug)]
pub enum Error {
    /// The relay refused or failed the send.
    Relay(relay::Error),
    /// The record store failed.
    Store(store::Error),
    /// A conversation title was empty after trimming.
    EmptyTitle,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Relay(err) => Display::fmt(err, f),
            Error::Store(err) => Display::fmt(err, f),
            Error::EmptyTitle => write!(f, "Title must not be empty"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Relay(err) => Some(err),
            Error::Store(err) => Some(err),
            Error::EmptyTitle => None,
        }
    }
}

impl From<relay::Error> for Error {
    fn from(err: relay::Error) -> Self {
        Error::Relay(err)
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Error::Store(err)
    }
}

/// A reply produced by [`Session::send_message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// The assistant turn returned by the relay.
    pub turn: AssistantTurn,
    /// Whether the reply should be read aloud.
    pub speak: bool,
}

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    relay_builder: RelayBuilder,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Creates a session builder with a specified provider.
    pub fn with_provider<P: ChatProvider + 'static>(provider: P) -> Self {
        Self::with_upstream(UpstreamClient::new(provider))
    }

    /// Creates a session builder with an already wrapped provider.
    pub fn with_upstream(upstream: UpstreamClient) -> Self {
        Self {
            relay_builder: RelayBuilder::with_upstream(upstream),
            config: SessionConfig::default(),
        }
    }

    /// Sets the record store.
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.relay_builder = self.relay_builder.with_store(store);
        self
    }

    /// Replaces the built-in system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.relay_builder = self.relay_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the initial settings.
    #[inline]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds a new session.
    pub fn build(self) -> Session {
        Session {
            relay: Arc::new(self.relay_builder.build()),
            config: self.config,
            current: None,
            transcript: Transcript::new(),
        }
    }
}

/// A chat session, like a window that shows one conversation and has an
/// input box.
///
/// The session keeps the local transcript of the current conversation.
/// A conversation is only created in the store once the first message is
/// sent.
pub struct Session {
    relay: Arc<Relay>,
    config: SessionConfig,
    current: Option<ConversationId>,
    transcript: Transcript,
}

impl Session {
    /// Returns the settings.
    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the settings for modification.
    #[inline]
    pub fn config_mut(&mut self) -> &mut SessionConfig {
        &mut self.config
    }

    /// Returns the conversation being shown, if one has been created.
    #[inline]
    pub fn current_conversation(&self) -> Option<&ConversationId> {
        self.current.as_ref()
    }

    /// Returns the local transcript.
    #[inline]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Sends a message and waits for the full reply.
    ///
    /// `on_progress` receives the reply accumulated so far. The user turn
    /// stays in the local transcript even if the send fails.
    pub async fn send_message(
        &mut self,
        input: &str,
        has_image: bool,
        is_voice: bool,
        on_progress: impl FnMut(&str) + Send,
    ) -> Result<Reply, Error> {
        let conversation = match &self.current {
            Some(id) => id.clone(),
            None => {
                let summary = self.relay.store().create_conversation().await?;
                debug!("created conversation {}", summary.id);
                self.current = Some(summary.id.clone());
                summary.id
            }
        };

        let content = compose_user_content(input, has_image);
        let prior = self.transcript.clone();
        self.transcript.push(Turn::user(content.as_str()));

        let context = self.config.location.annotation();
        let turn = self
            .relay
            .send(&conversation, &prior, &content, &context, on_progress)
            .await?;
        self.transcript.push(Turn::assistant(turn.content.as_str()));

        let speak = is_voice && self.config.voice.auto_play;
        Ok(Reply { turn, speak })
    }

    /// Lists the stored conversations, most recently updated first.
    pub async fn list_conversations(
        &self,
    ) -> Result<Vec<ConversationSummary>, Error> {
        Ok(self.relay.store().list_conversations().await?)
    }

    /// Shows an existing conversation, loading its messages.
    pub async fn select_conversation(
        &mut self,
        id: &ConversationId,
    ) -> Result<(), Error> {
        let messages = self.relay.store().list_messages(id).await?;
        self.transcript = messages
            .into_iter()
            .map(|m| Turn {
                role: m.role,
                content: m.content,
            })
            .collect();
        self.current = Some(id.clone());
        Ok(())
    }

    /// Leaves the current conversation. The next message starts a new one.
    pub fn start_new_chat(&mut self) {
        self.current = None;
        self.transcript = Transcript::new();
    }

    /// Renames a conversation. The title is trimmed and must not be empty.
    pub async fn rename_conversation(
        &self,
        id: &ConversationId,
        title: &str,
    ) -> Result<ConversationSummary, Error> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::EmptyTitle);
        }
        let patch = ConversationPatch {
            title: Some(title.to_owned()),
            ..Default::default()
        };
        Ok(self.relay.store().update_conversation(id, patch).await?)
    }

    /// Flips whether a conversation is pinned.
    pub async fn toggle_pin(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationSummary, Error> {
        let summary = self.find_conversation(id).await?;
        let patch = ConversationPatch {
            is_pinned: Some(!summary.is_pinned),
            ..Default::default()
        };
        Ok(self.relay.store().update_conversation(id, patch).await?)
    }

    /// Flips whether a conversation is archived.
    pub async fn toggle_archive(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationSummary, Error> {
        let summary = self.find_conversation(id).await?;
        let patch = ConversationPatch {
            is_archived: Some(!summary.is_archived),
            ..Default::default()
        };
        Ok(self.relay.store().update_conversation(id, patch).await?)
    }

    /// Deletes a conversation. Deleting the current one starts a new chat.
    pub async fn delete_conversation(
        &mut self,
        id: &ConversationId,
    ) -> Result<(), Error> {
        self.relay.store().delete_conversation(id).await?;
        if self.current.as_ref() == Some(id) {
            self.start_new_chat();
        }
        Ok(())
    }

    /// Deletes every conversation and starts a new chat.
    pub async fn delete_all_conversations(&mut self) -> Result<(), Error> {
        self.relay.store().delete_all_conversations().await?;
        self.start_new_chat();
        Ok(())
    }

    async fn find_conversation(
        &self,
        id: &ConversationId,
    ) -> Result<ConversationSummary, Error> {
        self.list_conversations()
            .await?
            .into_iter()
            .find(|summary| &summary.id == id)
            .ok_or_else(|| Error::Store(store::Error::not_found()))
    }
}

/// Builds the content of a user turn, marking an attached image.
pub fn compose_user_content(input: &str, has_image: bool) -> String {
    match (has_image, input.is_empty()) {
        (false, _) => input.to_owned(),
        (true, true) => IMAGE_MARKER.to_owned(),
        (true, false) => format!("{input}\n\n{IMAGE_MARKER}"),
    }
}
