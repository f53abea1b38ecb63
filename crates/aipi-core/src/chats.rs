//! Chats — turns a provider's [`ChatAdapter`] hooks into a full chat
//! lifecycle with optional auto-persistence.
//!
//! # Design
//!
//! - The adapter implements only the raw hooks (`create_chat`, `run_chat`,
//!   ...). [`Chats`] owns the lifecycle: lookups, not-found handling, the
//!   engine handed to every [`Chat`], and persistence.
//! - Persistence has a single choke point, the engine's `on_change`: when a
//!   persister is set **and** the chat's `auto_persist` flag is on, the
//!   serialized chat is saved under `PersisterKey::new("chat", id, tags)`.
//!   Adapters never touch the persister.
//! - The persister and tags live behind a shared lock, so changing them
//!   affects chats that are already out in the wild.
//! - Adapter errors (including `NotSupported`) propagate unchanged.
//!
//! # Connections
//!
//! - Builds [`Chat`]s and implements [`ChatEngine`] for them.
//! - Persists through a [`JsonPersister`].
//! - Nested inside agents by [`Agency`](crate::agency::Agency).

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::chat::{
    Chat, ChatEngine, ChatResources, ChatResourcesPatch, ChatSnapshot, RunChatInput, RunResponse,
    SerializedChat, UpdateChatData,
};
use crate::errors::{AipiError, Result};
use crate::messages::{Message, QueryOptions};
use crate::persister::{JsonPersister, Persistable, Persister, PersisterKey, Reviver, SaveOptions};
use crate::registry::BootstrapOptions;
use crate::resource::{BoxFuture, Resource, ResourceState};

/// Persister key namespace for chats.
pub const CHAT_KEY_KIND: &str = "chat";

// ---------------------------------------------------------------------------
// Inputs & results
// ---------------------------------------------------------------------------

/// Input of [`Chats::start_chat`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateChatInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ChatResourcesPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ChatSnapshot>,
    /// Persist the chat after creation and on every change. Falls back to
    /// [`ChatsConfig::default_auto_persist`]. No effect without a persister.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist: Option<bool>,
}

/// What an adapter returns from `create_chat`.
#[derive(Debug, Clone)]
pub struct CreateChatResult<C> {
    pub chat_id: String,
    pub snapshot: ChatSnapshot,
    pub context: C,
}

/// What an adapter returns from `load_chat`.
#[derive(Debug, Clone)]
pub struct LoadChatResult<C> {
    pub snapshot: ChatSnapshot,
    pub resources: ChatResources,
    pub context: C,
}

/// Outcome of [`Chats::clear_chats`]. Deletions are independent: one
/// failure never rolls back or stops the others.
#[derive(Debug, Default)]
pub struct ClearChatsReport {
    pub deleted: Vec<String>,
    pub failed: Vec<(String, AipiError)>,
}

impl ClearChatsReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ChatAdapter
// ---------------------------------------------------------------------------

/// Provider hooks behind a [`Chats`] instance.
///
/// Any hook may fail with [`AipiError::not_supported`] when the provider
/// lacks the capability; the error reaches the caller unchanged.
pub trait ChatAdapter: Send + Sync + 'static {
    /// Provider-specific per-chat state (a thread id, a model handle, ...).
    type Context: Send + Sync + 'static;

    /// Called when the owning [`Chats`] is mounted.
    fn on_mount<'a>(&'a self, _app: &'a App, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn create_chat<'a>(
        &'a self,
        input: &'a CreateChatInput,
    ) -> BoxFuture<'a, Result<CreateChatResult<Self::Context>>>;

    /// Fresh context for a chat that already has an id (revive, load).
    fn create_chat_context<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, Result<Self::Context>>;

    fn refresh_chat<'a>(&'a self, chat: &'a Chat<Self::Context>) -> BoxFuture<'a, Result<ChatSnapshot>>;

    /// `None` when the provider has no record of the chat.
    fn load_chat<'a>(
        &'a self,
        chat_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LoadChatResult<Self::Context>>>>;

    fn alter_chat<'a>(
        &'a self,
        chat: &'a Chat<Self::Context>,
        data: &'a UpdateChatData,
    ) -> BoxFuture<'a, Result<()>>;

    fn delete_chat<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn load_chats<'a>(&'a self, query: Option<&'a QueryOptions>) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Run the chat. `input.resources` already holds the merged resource
    /// set. Returns the snapshot *delta* produced by this run.
    fn run_chat<'a>(
        &'a self,
        chat: &'a Chat<Self::Context>,
        input: RunChatInput,
    ) -> BoxFuture<'a, Result<RunResponse>>;

    fn push_messages<'a>(
        &'a self,
        chat: &'a Chat<Self::Context>,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<()>>;

    fn delete_message<'a>(
        &'a self,
        chat: &'a Chat<Self::Context>,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    fn load_messages<'a>(
        &'a self,
        chat: &'a Chat<Self::Context>,
        query: Option<&'a QueryOptions>,
    ) -> BoxFuture<'a, Result<Vec<Message>>>;

    /// `None` for an unknown message id.
    fn load_message<'a>(
        &'a self,
        chat: &'a Chat<Self::Context>,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Message>>>;
}

// ---------------------------------------------------------------------------
// ChatsConfig
// ---------------------------------------------------------------------------

/// Construction-time configuration of a [`Chats`] instance.
#[derive(Clone)]
pub struct ChatsConfig {
    pub persister: Option<Arc<JsonPersister>>,
    /// Added to every chat key, e.g. `["agent", "<agent id>"]`.
    pub persister_tags: Vec<String>,
    /// Default for [`CreateChatInput::persist`].
    pub default_auto_persist: bool,
}

impl Default for ChatsConfig {
    fn default() -> Self {
        Self {
            persister: None,
            persister_tags: Vec::new(),
            default_auto_persist: true,
        }
    }
}

impl std::fmt::Debug for ChatsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatsConfig")
            .field("persister", &self.persister.as_ref().map(|p| p.name()))
            .field("persister_tags", &self.persister_tags)
            .field("default_auto_persist", &self.default_auto_persist)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Shared state / engine
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Persistence {
    persister: Option<Arc<JsonPersister>>,
    tags: Vec<String>,
}

impl Persistence {
    fn chat_key(&self, chat_id: &str) -> PersisterKey {
        PersisterKey::new(CHAT_KEY_KIND, chat_id, &self.tags)
    }
}

struct ChatsShared<A: ChatAdapter> {
    adapter: A,
    persistence: Mutex<Persistence>,
    auto_persist: bool,
}

impl<A: ChatAdapter> ChatsShared<A> {
    fn persistence(&self) -> Persistence {
        self.persistence.lock().unwrap().clone()
    }

    /// Save the chat if a persister is set and the chat opts in.
    async fn persist(&self, chat: &Chat<A::Context>) -> Result<()> {
        let persistence = self.persistence();
        let Some(persister) = persistence.persister.as_ref() else {
            return Ok(());
        };
        if !chat.auto_persist() {
            return Ok(());
        }
        let value = serde_json::to_value(chat.serialize())?;
        persister
            .save(&persistence.chat_key(chat.id()), value, SaveOptions::overwrite())
            .await
    }
}

impl<A: ChatAdapter> ChatEngine<A::Context> for ChatsShared<A> {
    fn add_messages<'a>(
        &'a self,
        chat: &'a Chat<A::Context>,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<()>> {
        self.adapter.push_messages(chat, messages)
    }

    fn delete_message<'a>(
        &'a self,
        chat: &'a Chat<A::Context>,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        self.adapter.delete_message(chat, message_id)
    }

    fn load_messages<'a>(
        &'a self,
        chat: &'a Chat<A::Context>,
        query: Option<&'a QueryOptions>,
    ) -> BoxFuture<'a, Result<Vec<Message>>> {
        self.adapter.load_messages(chat, query)
    }

    fn load_message<'a>(
        &'a self,
        chat: &'a Chat<A::Context>,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Message>>> {
        self.adapter.load_message(chat, message_id)
    }

    fn refresh<'a>(&'a self, chat: &'a Chat<A::Context>) -> BoxFuture<'a, Result<ChatSnapshot>> {
        self.adapter.refresh_chat(chat)
    }

    fn run<'a>(
        &'a self,
        chat: &'a Chat<A::Context>,
        input: RunChatInput,
    ) -> BoxFuture<'a, Result<RunResponse>> {
        self.adapter.run_chat(chat, input)
    }

    fn update<'a>(
        &'a self,
        chat: &'a Chat<A::Context>,
        data: &'a UpdateChatData,
    ) -> BoxFuture<'a, Result<()>> {
        self.adapter.alter_chat(chat, data)
    }

    fn on_change<'a>(&'a self, chat: &'a Chat<A::Context>) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.persist(chat))
    }
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

/// Chat lifecycle over a provider adapter.
pub struct Chats<A: ChatAdapter> {
    state: ResourceState,
    shared: Arc<ChatsShared<A>>,
}

impl<A: ChatAdapter> Chats<A> {
    pub fn new(adapter: A, config: ChatsConfig) -> Self {
        Self {
            state: ResourceState::new(),
            shared: Arc::new(ChatsShared {
                adapter,
                persistence: Mutex::new(Persistence {
                    persister: config.persister,
                    tags: config.persister_tags,
                }),
                auto_persist: config.default_auto_persist,
            }),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.shared.adapter
    }

    fn engine(&self) -> Arc<dyn ChatEngine<A::Context>> {
        self.shared.clone()
    }

    // -- Persister configuration --

    /// Replace the persister. Chats already handed out pick up the change.
    pub fn set_persister(&self, persister: Option<Arc<JsonPersister>>) {
        self.shared.persistence.lock().unwrap().persister = persister;
    }

    pub fn persister(&self) -> Option<Arc<JsonPersister>> {
        self.shared.persistence().persister
    }

    pub fn add_persister_tags<S: AsRef<str>>(&self, tags: &[S]) {
        self.shared
            .persistence
            .lock()
            .unwrap()
            .tags
            .extend(tags.iter().map(|t| t.as_ref().to_string()));
    }

    pub fn set_persister_tags(&self, tags: Vec<String>) {
        self.shared.persistence.lock().unwrap().tags = tags;
    }

    pub fn persister_tags(&self) -> Vec<String> {
        self.shared.persistence().tags
    }

    // -- Lifecycle --

    /// Create a chat through the adapter and persist it when enabled.
    pub async fn start_chat(&self, input: CreateChatInput) -> Result<Chat<A::Context>> {
        let created = self.shared.adapter.create_chat(&input).await?;
        let auto_persist = input.persist.unwrap_or(self.shared.auto_persist);
        let chat = Chat::new(
            self.engine(),
            created.chat_id,
            ChatResources::from_patch(input.resources.as_ref()),
            created.snapshot,
            created.context,
        )
        .with_auto_persist(auto_persist);

        self.shared.persist(&chat).await?;
        debug!("started chat {}", chat.id());
        Ok(chat)
    }

    /// Rebuild a chat from its persisted form with a fresh context.
    ///
    /// The persisted form carries no persist flag: the revived chat gets
    /// [`ChatsConfig::default_auto_persist`].
    pub async fn revive(&self, serialized: SerializedChat) -> Result<Chat<A::Context>> {
        let context = self
            .shared
            .adapter
            .create_chat_context(&serialized.chat_id)
            .await?;
        Ok(Chat::new(
            self.engine(),
            serialized.chat_id,
            serialized.resources,
            serialized.snapshot,
            context,
        )
        .with_auto_persist(self.shared.auto_persist))
    }

    /// Look a chat up. `None` when neither the adapter nor the persister
    /// knows it. Like [`revive`](Self::revive), the loaded chat's
    /// `auto_persist` is reset to the configured default, so the id-based
    /// operations (`run`, `add_messages`, ...) follow the default too.
    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat<A::Context>>> {
        if let Some(loaded) = self.shared.adapter.load_chat(chat_id).await? {
            let chat = Chat::new(
                self.engine(),
                chat_id,
                loaded.resources,
                loaded.snapshot,
                loaded.context,
            )
            .with_auto_persist(self.shared.auto_persist);
            return Ok(Some(chat));
        }

        let persistence = self.shared.persistence();
        let Some(persister) = persistence.persister.as_ref() else {
            return Ok(None);
        };
        match persister.load(&persistence.chat_key(chat_id)).await? {
            Some(value) => {
                let serialized: SerializedChat = serde_json::from_value(value)?;
                self.revive(serialized).await.map(Some)
            }
            None => Ok(None),
        }
    }

    async fn find_chat(&self, chat_id: &str) -> Result<Chat<A::Context>> {
        self.get_chat(chat_id)
            .await?
            .ok_or_else(|| AipiError::not_found("chat"))
    }

    /// Update a chat's resources; tools are replaced, resource data is
    /// deep-merged.
    pub async fn update_chat(&self, chat_id: &str, data: UpdateChatData) -> Result<Chat<A::Context>> {
        let mut chat = self.find_chat(chat_id).await?;
        chat.update(data).await?;
        Ok(chat)
    }

    /// Replace a chat's snapshot with the provider's.
    pub async fn refresh_chat(&self, chat_id: &str) -> Result<Chat<A::Context>> {
        let mut chat = self.find_chat(chat_id).await?;
        chat.refresh().await?;
        Ok(chat)
    }

    /// Delete a chat from the provider and from the persister. The chat
    /// need not be known locally.
    pub async fn end_chat(&self, chat_id: &str) -> Result<()> {
        self.shared.adapter.delete_chat(chat_id).await?;
        let persistence = self.shared.persistence();
        if let Some(persister) = persistence.persister.as_ref() {
            persister.delete(&persistence.chat_key(chat_id)).await?;
        }
        debug!("ended chat {chat_id}");
        Ok(())
    }

    /// Ids reported by the adapter, followed by persisted ids (under this
    /// instance's tags) the adapter did not report. `query` pages the
    /// merged list.
    pub async fn list_chats(&self, query: Option<QueryOptions>) -> Result<Vec<String>> {
        let mut ids = self.shared.adapter.load_chats(None).await?;

        let persistence = self.shared.persistence();
        if let Some(persister) = persistence.persister.as_ref() {
            for key in persister.keys().await? {
                if !key.is_in(CHAT_KEY_KIND, &persistence.tags) {
                    continue;
                }
                if let Some(id) = key.value_str() {
                    if !ids.iter().any(|known| known == id) {
                        ids.push(id.to_string());
                    }
                }
            }
        }

        Ok(match &query {
            Some(query) => query.apply(&ids),
            None => ids,
        })
    }

    /// Delete every listed chat, independently. Listing failures propagate;
    /// per-chat failures are collected in the report.
    pub async fn clear_chats(&self) -> Result<ClearChatsReport> {
        let ids = self.list_chats(None).await?;
        let outcomes = join_all(ids.iter().map(|id| self.end_chat(id))).await;

        let mut report = ClearChatsReport::default();
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.deleted.push(id),
                Err(e) => {
                    warn!("failed to delete chat {id}: {e}");
                    report.failed.push((id, e));
                }
            }
        }
        Ok(report)
    }

    // -- Chat-level operations --

    /// Run a chat and append the produced delta to its snapshot.
    pub async fn run(&self, chat_id: &str, input: RunChatInput) -> Result<RunResponse> {
        let mut chat = self.find_chat(chat_id).await?;
        chat.run(input).await
    }

    pub async fn add_messages(&self, chat_id: &str, messages: Vec<Message>) -> Result<()> {
        let mut chat = self.find_chat(chat_id).await?;
        chat.push_messages(messages).await
    }

    pub async fn remove_message(&self, chat_id: &str, message_id: &str) -> Result<()> {
        let mut chat = self.find_chat(chat_id).await?;
        chat.delete_message(message_id).await
    }

    pub async fn list_messages(&self, chat_id: &str, query: Option<QueryOptions>) -> Result<Vec<Message>> {
        let mut chat = self.find_chat(chat_id).await?;
        chat.load_messages(query).await
    }

    /// `None` for an unknown message; a missing chat is still `NotFound`.
    pub async fn get_message(&self, chat_id: &str, message_id: &str) -> Result<Option<Message>> {
        let chat = self.find_chat(chat_id).await?;
        chat.load_message(message_id).await
    }
}

impl<A: ChatAdapter> Resource for Chats<A> {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn on_mount<'a>(&'a self, options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let app = self.app()?;
            self.shared.adapter.on_mount(&app, options).await
        })
    }
}

impl<A: ChatAdapter> Reviver<SerializedChat, Chat<A::Context>> for Chats<A> {
    fn revive(&self, serialized: SerializedChat) -> BoxFuture<'_, Result<Chat<A::Context>>> {
        Box::pin(Chats::revive(self, serialized))
    }
}
