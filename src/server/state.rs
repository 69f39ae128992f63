//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::config::DefaultAssistant;
use crate::chat::{ChatConfig, ChatService};
use crate::crawl::{
    CrawlScheduler, CrawlService, FetchConfig, PageFetcher, SchedulerConfig, StructuredReplier,
};
use crate::provider::openai::{OpenAiAssistantClient, ProviderConfig};
use crate::provider::AssistantJobs;
use crate::storage::{
    CrawlStore, SqliteAssistantStore, SqliteCrawlStore, SqliteMessageStore, SqliteUserStore,
    StorageConfig,
};

/// Top-level agent configuration.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Storage settings.
    pub storage: StorageConfig,
    /// Assistant provider settings.
    pub provider: ProviderConfig,
    /// Chat orchestration settings.
    pub chat: ChatConfig,
    /// Page fetcher settings.
    pub fetch: FetchConfig,
    /// Crawl scheduler settings.
    pub scheduler: SchedulerConfig,
}

impl AgentConfig {
    /// Build configuration from `NABI_*` environment variables, falling back
    /// to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let api_key = std::env::var("NABI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .unwrap_or_default();
        let mut provider = ProviderConfig::new(api_key);
        if let Ok(base_url) = std::env::var("NABI_PROVIDER_URL") {
            provider.base_url = base_url;
        }

        let mut chat = ChatConfig::default();
        if let Ok(name) = std::env::var("NABI_DEFAULT_ASSISTANT") {
            chat.default_assistant = DefaultAssistant(name);
        }

        let mut storage = StorageConfig::default();
        if let Ok(path) = std::env::var("NABI_SQLITE_PATH") {
            storage.sqlite_path = path.into();
        }

        Self {
            storage,
            provider,
            chat,
            fetch: FetchConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    /// Conversation orchestrator.
    pub chat: Arc<ChatService>,
    /// Crawl pipeline.
    pub crawl: Arc<CrawlService>,
    /// Crawl site/record store, for the CRUD routes.
    pub crawl_store: Arc<dyn CrawlStore>,
    scheduler_config: SchedulerConfig,
}

impl AppState {
    /// Wire all services from a configuration.
    ///
    /// # Errors
    /// Returns an error if any store, client or service cannot be created.
    pub async fn from_config(
        config: AgentConfig,
    ) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let provider: Arc<dyn AssistantJobs> =
            Arc::new(OpenAiAssistantClient::new(config.provider)?);

        let users = Arc::new(SqliteUserStore::new(&config.storage).await?);
        let messages = Arc::new(SqliteMessageStore::new(&config.storage).await?);
        let assistants = Arc::new(SqliteAssistantStore::new(&config.storage).await?);
        let crawl_store: Arc<dyn CrawlStore> =
            Arc::new(SqliteCrawlStore::new(&config.storage).await?);

        let chat = Arc::new(ChatService::new(
            config.chat,
            provider,
            users,
            messages,
            assistants,
        )?);

        let fetcher = Arc::new(PageFetcher::new(config.fetch)?);
        let crawl = Arc::new(CrawlService::new(
            fetcher,
            Arc::clone(&chat) as Arc<dyn StructuredReplier>,
            Arc::clone(&crawl_store),
        ));

        Ok(Arc::new(Self {
            chat,
            crawl,
            crawl_store,
            scheduler_config: config.scheduler,
        }))
    }

    /// Wire all services from environment variables.
    ///
    /// # Errors
    /// Returns an error if any store, client or service cannot be created.
    pub async fn from_env() -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        Self::from_config(AgentConfig::from_env()).await
    }

    /// Build the crawl scheduler over this state's services.
    #[must_use]
    pub fn scheduler(&self) -> CrawlScheduler {
        CrawlScheduler::new(
            Arc::clone(&self.crawl),
            Arc::clone(&self.crawl_store),
            self.scheduler_config.clone(),
        )
    }
}
