use std::sync::Arc;
use std::time::Duration;

use farm_chat_model::ChatProvider;

use super::Relay;
use crate::SYSTEM_PROMPT;
use crate::guard::ConversationLocks;
use crate::store::{MemoryStore, RecordStore};
use crate::upstream::UpstreamClient;

const DEFAULT_PERSIST_BUDGET: Duration = Duration::from_secs(5);

/// [`Relay`] builder.
pub struct RelayBuilder {
    upstream: UpstreamClient,
    store: Option<Arc<dyn RecordStore>>,
    system_prompt: Option<String>,
    persist_budget: Duration,
}

impl RelayBuilder {
    /// Creates a new builder with the specified provider.
    #[inline]
    pub fn with_provider<P: ChatProvider + 'static>(provider: P) -> Self {
        Self::with_upstream(UpstreamClient::new(provider))
    }

    /// Creates a new builder with an already wrapped provider.
    #[inline]
    pub fn with_upstream(upstream: UpstreamClient) -> Self {
        Self {
            upstream,
            store: None,
            system_prompt: None,
            persist_budget: DEFAULT_PERSIST_BUDGET,
        }
    }

    /// Sets the record store. Defaults to a [`MemoryStore`].
    #[inline]
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the built-in system prompt.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets how long a failing write is retried before the turn is
    /// reported as not saved.
    #[inline]
    pub fn with_persist_budget(mut self, budget: Duration) -> Self {
        self.persist_budget = budget;
        self
    }

    /// Builds the relay.
    pub fn build(self) -> Relay {
        let RelayBuilder {
            upstream,
            store,
            system_prompt,
            persist_budget,
        } = self;

        Relay {
            upstream,
            store: store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            locks: ConversationLocks::default(),
            system_prompt: system_prompt
                .unwrap_or_else(|| SYSTEM_PROMPT.to_owned()),
            persist_budget,
        }
    }
}
