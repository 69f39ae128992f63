//! Assistant directory with process-lifetime caches.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::chat::errors::{ChatError, ChatResult};
use crate::provider::{AssistantConfig, AssistantJobs};
use crate::storage::AssistantDirectoryStore;

/// Resolves assistant names to provider ids and ids to configuration,
/// memoizing both for the life of the process. Caches are monotonic: once a
/// key is populated it is never invalidated (operators restart the process to
/// pick up provider-side changes).
pub struct AssistantDirectory {
    store: Arc<dyn AssistantDirectoryStore>,
    provider: Arc<dyn AssistantJobs>,
    ids: DashMap<String, String>,
    configs: DashMap<String, AssistantConfig>,
}

impl AssistantDirectory {
    /// Create a directory over a store and a provider.
    #[must_use]
    pub fn new(store: Arc<dyn AssistantDirectoryStore>, provider: Arc<dyn AssistantJobs>) -> Self {
        Self {
            store,
            provider,
            ids: DashMap::new(),
            configs: DashMap::new(),
        }
    }

    /// Resolve the provider-side assistant id for a name.
    ///
    /// # Errors
    /// Returns [`ChatError::UnknownAssistant`] if no mapping exists, or a
    /// persistence error if the lookup fails.
    pub async fn resolve_assistant_id(&self, name: &str) -> ChatResult<String> {
        if let Some(cached) = self.ids.get(name) {
            debug!(name, "assistant id cache hit");
            return Ok(cached.clone());
        }

        let id = self
            .store
            .find_assistant_id(name)
            .await?
            .ok_or_else(|| ChatError::UnknownAssistant(name.to_string()))?;

        info!(name, assistant_id = %id, "assistant id resolved and cached");
        self.ids.insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// Resolve provider-side settings for an assistant id.
    ///
    /// # Errors
    /// Returns [`ChatError::AssistantConfigUnavailable`] if the provider call
    /// fails; the fetch is never retried.
    pub async fn resolve_config(&self, assistant_id: &str) -> ChatResult<AssistantConfig> {
        if let Some(cached) = self.configs.get(assistant_id) {
            debug!(assistant_id, "assistant config cache hit");
            return Ok(cached.clone());
        }

        let config = self
            .provider
            .fetch_assistant(assistant_id)
            .await
            .map_err(|source| ChatError::AssistantConfigUnavailable {
                assistant_id: assistant_id.to_string(),
                source,
            })?;

        info!(assistant_id, "assistant config fetched and cached");
        self.configs.insert(assistant_id.to_string(), config.clone());
        Ok(config)
    }
}
