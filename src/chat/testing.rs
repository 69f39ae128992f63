//! Shared in-memory fakes for chat subsystem tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;

use crate::provider::{
    AssistantConfig, AssistantJobs, ContentPart, ListedMessage, MessageRole, ProviderError,
    ProviderResult, RawReply, RunEventStream, RunHandle, RunStatus, RunStreamEvent, SeedMessage,
};
use crate::storage::{
    AssistantDirectoryStore, MessageStore, NewExchange, StorageError, StorageResult, StoreFuture,
    UserRecord, UserStore,
};

/// Directory store fake counting lookups.
#[derive(Default)]
pub(crate) struct FakeDirectoryStore {
    entries: Mutex<HashMap<String, String>>,
    pub(crate) lookups: Arc<AtomicUsize>,
}

impl FakeDirectoryStore {
    pub(crate) fn with_entry(name: &str, assistant_id: &str) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .unwrap()
            .insert(name.to_string(), assistant_id.to_string());
        store
    }
}

impl AssistantDirectoryStore for FakeDirectoryStore {
    fn find_assistant_id(&self, name: &str) -> StoreFuture<'_, StorageResult<Option<String>>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let found = self.entries.lock().unwrap().get(name).cloned();
        Box::pin(async move { Ok(found) })
    }

    fn register(&self, name: &str, assistant_id: &str) -> StoreFuture<'_, StorageResult<()>> {
        self.entries
            .lock()
            .unwrap()
            .insert(name.to_string(), assistant_id.to_string());
        Box::pin(async move { Ok(()) })
    }
}

/// User store fake with insert-if-absent semantics.
#[derive(Default)]
pub(crate) struct FakeUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
    next_id: AtomicUsize,
}

impl UserStore for FakeUserStore {
    fn upsert(&self, platform_id: &str, username: &str) -> StoreFuture<'_, StorageResult<UserRecord>> {
        let mut users = self.users.lock().unwrap();
        let record = users
            .entry(platform_id.to_string())
            .or_insert_with(|| {
                let now = Utc::now();
                UserRecord {
                    id: self.next_id.fetch_add(1, Ordering::SeqCst) as i64 + 1,
                    platform_id: platform_id.to_string(),
                    username: username.to_string(),
                    context_enabled: true,
                    last_conversation_id: None,
                    created_at: now,
                    last_interaction: now,
                }
            })
            .clone();
        Box::pin(async move { Ok(record) })
    }

    fn find_by_platform_id(
        &self,
        platform_id: &str,
    ) -> StoreFuture<'_, StorageResult<Option<UserRecord>>> {
        let found = self.users.lock().unwrap().get(platform_id).cloned();
        Box::pin(async move { Ok(found) })
    }
}

/// Message store fake recording exchanges in memory.
#[derive(Default)]
pub(crate) struct FakeMessageStore {
    pub(crate) latest: Mutex<Option<String>>,
    pub(crate) recorded: Mutex<Vec<NewExchange>>,
    fail_next: AtomicBool,
}

impl FakeMessageStore {
    pub(crate) fn with_latest(conversation_id: &str) -> Self {
        let store = Self::default();
        *store.latest.lock().unwrap() = Some(conversation_id.to_string());
        store
    }

    pub(crate) fn fail_next_record(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl MessageStore for FakeMessageStore {
    fn record_exchange(&self, exchange: NewExchange) -> StoreFuture<'_, StorageResult<()>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Box::pin(async move {
                Err(StorageError::InvalidRow("simulated write failure".to_string()))
            });
        }
        *self.latest.lock().unwrap() = exchange.conversation_id.clone();
        self.recorded.lock().unwrap().push(exchange);
        Box::pin(async move { Ok(()) })
    }

    fn latest_conversation(&self, _user_id: i64) -> StoreFuture<'_, StorageResult<Option<String>>> {
        let latest = self.latest.lock().unwrap().clone();
        Box::pin(async move { Ok(latest) })
    }

    fn mark_all_deleted(&self, _user_id: i64) -> StoreFuture<'_, StorageResult<u64>> {
        let touched = self.recorded.lock().unwrap().len() as u64 * 2;
        *self.latest.lock().unwrap() = None;
        Box::pin(async move { Ok(touched) })
    }
}

/// Programmable assistant-jobs fake.
pub(crate) struct FakeProvider {
    pub(crate) assistant_fetches: Arc<AtomicUsize>,
    pub(crate) conversation_runs: AtomicUsize,
    pub(crate) created_conversations: Mutex<Vec<(Vec<SeedMessage>, bool)>>,
    pub(crate) appended_messages: Mutex<Vec<(String, String)>>,
    pub(crate) runs_started: Mutex<Vec<(String, bool)>>,
    pub(crate) status_fetches: AtomicUsize,
    pub(crate) fail_status_fetches: AtomicUsize,
    statuses: Mutex<VecDeque<RunStatus>>,
    latest_reply: Mutex<Option<ListedMessage>>,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self {
            assistant_fetches: Arc::new(AtomicUsize::new(0)),
            conversation_runs: AtomicUsize::new(0),
            created_conversations: Mutex::new(Vec::new()),
            appended_messages: Mutex::new(Vec::new()),
            runs_started: Mutex::new(Vec::new()),
            status_fetches: AtomicUsize::new(0),
            fail_status_fetches: AtomicUsize::new(0),
            statuses: Mutex::new(VecDeque::new()),
            latest_reply: Mutex::new(Some(ListedMessage {
                role: MessageRole::Assistant,
                content: RawReply::Parts(vec![ContentPart::text("hello from assistant")]),
            })),
        }
    }
}

impl FakeProvider {
    pub(crate) fn push_statuses(&self, statuses: &[RunStatus]) {
        self.statuses.lock().unwrap().extend(statuses.iter().copied());
    }

    pub(crate) fn clear_statuses(&self) {
        self.statuses.lock().unwrap().clear();
    }

    fn default_stream(conversation_id: Option<String>) -> RunEventStream {
        let mut events: Vec<ProviderResult<RunStreamEvent>> = Vec::new();
        if let Some(conversation_id) = conversation_id {
            events.push(Ok(RunStreamEvent::ConversationCreated { conversation_id }));
        }
        events.push(Ok(RunStreamEvent::MessageDelta {
            fragment: "hello from assistant".to_string(),
        }));
        events.push(Ok(RunStreamEvent::Status {
            status: RunStatus::Completed,
        }));
        Box::pin(futures::stream::iter(events))
    }
}

#[async_trait]
impl AssistantJobs for FakeProvider {
    async fn fetch_assistant(&self, assistant_id: &str) -> ProviderResult<AssistantConfig> {
        self.assistant_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(AssistantConfig {
            id: assistant_id.to_string(),
            name: Some("fake".to_string()),
            instructions: Some("You are a board parser.".to_string()),
            model: None,
        })
    }

    async fn create_conversation_run(
        &self,
        _assistant_id: &str,
        messages: Vec<SeedMessage>,
        structured: bool,
    ) -> ProviderResult<RunHandle> {
        self.conversation_runs.fetch_add(1, Ordering::SeqCst);
        self.created_conversations
            .lock()
            .unwrap()
            .push((messages, structured));
        Ok(RunHandle {
            run_id: "run_1".to_string(),
            conversation_id: "conv_new".to_string(),
        })
    }

    async fn append_message(&self, conversation_id: &str, content: &str) -> ProviderResult<()> {
        self.appended_messages
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), content.to_string()));
        Ok(())
    }

    async fn create_run(
        &self,
        conversation_id: &str,
        _assistant_id: &str,
        structured: bool,
    ) -> ProviderResult<RunHandle> {
        self.runs_started
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), structured));
        Ok(RunHandle {
            run_id: "run_1".to_string(),
            conversation_id: conversation_id.to_string(),
        })
    }

    async fn fetch_run(&self, _conversation_id: &str, _run_id: &str) -> ProviderResult<RunStatus> {
        self.status_fetches.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_status_fetches.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_status_fetches.store(remaining - 1, Ordering::SeqCst);
            return Err(ProviderError::Api {
                status: 503,
                message: "temporarily unavailable".to_string(),
            });
        }
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunStatus::InProgress);
        Ok(status)
    }

    async fn latest_message(
        &self,
        _conversation_id: &str,
    ) -> ProviderResult<Option<ListedMessage>> {
        Ok(self.latest_reply.lock().unwrap().clone())
    }

    async fn stream_conversation_run(
        &self,
        _assistant_id: &str,
        messages: Vec<SeedMessage>,
        structured: bool,
    ) -> ProviderResult<RunEventStream> {
        self.conversation_runs.fetch_add(1, Ordering::SeqCst);
        self.created_conversations
            .lock()
            .unwrap()
            .push((messages, structured));
        Ok(Self::default_stream(Some("conv_new".to_string())))
    }

    async fn stream_run(
        &self,
        conversation_id: &str,
        _assistant_id: &str,
        structured: bool,
    ) -> ProviderResult<RunEventStream> {
        self.runs_started
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), structured));
        Ok(Self::default_stream(None))
    }
}
