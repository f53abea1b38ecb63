//! Test fakes for the aipi adapter and resource traits.
//!
//! Concrete, predictable implementations that record every hook call so
//! tests can assert both behaviour and interaction patterns.
//!
//! # Design
//!
//! - **Concrete fakes, no mock framework.** They are plain structs that can
//!   be read and tweaked directly.
//! - **`Mutex<..>` interior mutability.** Fakes end up behind `Arc` and in
//!   `BoxFuture`s, so they must be `Send + Sync`; no lock is held across an
//!   `.await`.
//! - **Stateful vs stateless chats.** [`FakeChatAdapter::stateful`] keeps
//!   its own record of every chat like a hosted provider would;
//!   [`FakeChatAdapter::stateless`] remembers nothing, so lookups have to go
//!   through the persister.
//!
//! # Connections
//!
//! Used by the in-crate tests of `app`, `chats`, `agency`, `chat_agency` and
//! `json_schema`, and available to downstream crates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::agency::{AgencyAdapter, CreateAgentInput, CreateAgentResult, LoadAgentResult};
use crate::agent::{Agent, AgentConfig, UpdateAgentData};
use crate::app::{App, Covers};
use crate::chat::{Chat, ChatResources, ChatSnapshot, RunChatInput, RunResponse, UpdateChatData};
use crate::chats::{ChatAdapter, Chats, ChatsConfig, CreateChatInput, CreateChatResult, LoadChatResult};
use crate::errors::{AipiError, Result};
use crate::json_schema::JsonSchemaValidator;
use crate::memory_persister::MemoryPersister;
use crate::messages::{Message, QueryOptions};
use crate::persister::{ClearOptions, Persister, PersisterKey, SaveOptions};
use crate::registry::BootstrapOptions;
use crate::resource::{BoxFuture, Resource, ResourceState};
use crate::schema_builder::ValidationReport;
use crate::utils::{create_id, DEFAULT_ID_LENGTH};

fn paged<T: Clone>(items: Vec<T>, query: Option<&QueryOptions>) -> Vec<T> {
    match query {
        Some(query) => query.apply(&items),
        None => items,
    }
}

// ---------------------------------------------------------------------------
// FakeChatAdapter
// ---------------------------------------------------------------------------

struct StoredChat {
    id: String,
    resources: ChatResources,
    snapshot: ChatSnapshot,
}

/// A chat provider fake. Chat contexts are the string `"ctx:<chat id>"`.
///
/// # Usage
///
/// ```rust
/// use aipi_core::chats::{Chats, ChatsConfig};
/// use aipi_core::testing::FakeChatAdapter;
///
/// let chats = Chats::new(FakeChatAdapter::stateful(), ChatsConfig::default());
/// assert!(chats.adapter().calls().is_empty());
/// ```
pub struct FakeChatAdapter {
    stateful: bool,
    /// Creation order is listing order.
    chats: Mutex<Vec<StoredChat>>,
    failures: Mutex<HashMap<String, AipiError>>,
    failing_deletes: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
}

impl FakeChatAdapter {
    fn with_state(stateful: bool) -> Self {
        Self {
            stateful,
            chats: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            failing_deletes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Keeps its own record of chats and messages.
    pub fn stateful() -> Self {
        Self::with_state(true)
    }

    /// Remembers nothing: `load_chat` is always `None`, `load_chats` is
    /// always empty and message reads answer from the chat itself.
    pub fn stateless() -> Self {
        Self::with_state(false)
    }

    /// Names of the hooks called so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every later call of `hook` fail with `error`.
    pub fn fail_on(&self, hook: &str, error: AipiError) {
        self.failures.lock().unwrap().insert(hook.to_string(), error);
    }

    /// Make `delete_chat` fail for one chat id.
    pub fn fail_delete_for(&self, chat_id: &str) {
        self.failing_deletes.lock().unwrap().push(chat_id.to_string());
    }

    fn enter(&self, hook: &str) -> Result<()> {
        self.calls.lock().unwrap().push(hook.to_string());
        match self.failures.lock().unwrap().get(hook) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn with_stored<R>(&self, chat_id: &str, f: impl FnOnce(&mut StoredChat) -> R) -> Option<R> {
        if !self.stateful {
            return None;
        }
        let mut chats = self.chats.lock().unwrap();
        chats.iter_mut().find(|c| c.id == chat_id).map(f)
    }

    /// Stored messages of a stateful chat, or the chat's own.
    fn messages_of(&self, chat: &Chat<String>) -> Vec<Message> {
        self.with_stored(chat.id(), |stored| stored.snapshot.messages.clone())
            .unwrap_or_else(|| chat.messages().to_vec())
    }
}

impl ChatAdapter for FakeChatAdapter {
    type Context = String;

    fn on_mount<'a>(&'a self, _app: &'a App, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.enter("on_mount") })
    }

    fn create_chat<'a>(&'a self, input: &'a CreateChatInput) -> BoxFuture<'a, Result<CreateChatResult<String>>> {
        Box::pin(async move {
            self.enter("create_chat")?;
            let chat_id = create_id(DEFAULT_ID_LENGTH);
            let snapshot = input.snapshot.clone().unwrap_or_default();
            if self.stateful {
                self.chats.lock().unwrap().push(StoredChat {
                    id: chat_id.clone(),
                    resources: ChatResources::from_patch(input.resources.as_ref()),
                    snapshot: snapshot.clone(),
                });
            }
            Ok(CreateChatResult {
                context: format!("ctx:{chat_id}"),
                chat_id,
                snapshot,
            })
        })
    }

    fn create_chat_context<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.enter("create_chat_context")?;
            Ok(format!("ctx:{chat_id}"))
        })
    }

    fn refresh_chat<'a>(&'a self, chat: &'a Chat<String>) -> BoxFuture<'a, Result<ChatSnapshot>> {
        Box::pin(async move {
            self.enter("refresh_chat")?;
            Ok(self
                .with_stored(chat.id(), |stored| stored.snapshot.clone())
                .unwrap_or_else(|| chat.snapshot().clone()))
        })
    }

    fn load_chat<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, Result<Option<LoadChatResult<String>>>> {
        Box::pin(async move {
            self.enter("load_chat")?;
            Ok(self.with_stored(chat_id, |stored| LoadChatResult {
                snapshot: stored.snapshot.clone(),
                resources: stored.resources.clone(),
                context: format!("ctx:{chat_id}"),
            }))
        })
    }

    fn alter_chat<'a>(&'a self, chat: &'a Chat<String>, data: &'a UpdateChatData) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.enter("alter_chat")?;
            if let Some(patch) = &data.resources {
                self.with_stored(chat.id(), |stored| stored.resources.apply(patch));
            }
            Ok(())
        })
    }

    fn delete_chat<'a>(&'a self, chat_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.enter("delete_chat")?;
            if self.failing_deletes.lock().unwrap().iter().any(|id| id == chat_id) {
                return Err(AipiError::new(format!("cannot delete chat {chat_id}")));
            }
            self.chats.lock().unwrap().retain(|c| c.id != chat_id);
            Ok(())
        })
    }

    fn load_chats<'a>(&'a self, query: Option<&'a QueryOptions>) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            self.enter("load_chats")?;
            let ids: Vec<String> = self.chats.lock().unwrap().iter().map(|c| c.id.clone()).collect();
            Ok(paged(ids, query))
        })
    }

    /// Answers with one assistant message counting the messages it saw.
    fn run_chat<'a>(&'a self, chat: &'a Chat<String>, input: RunChatInput) -> BoxFuture<'a, Result<RunResponse>> {
        Box::pin(async move {
            self.enter("run_chat")?;
            let seen = self.messages_of(chat).len() + input.messages.len();
            let delta = ChatSnapshot::from_messages(vec![Message::assistant(format!("seen {seen}"))]);
            self.with_stored(chat.id(), |stored| stored.snapshot.stack(delta.clone()));
            Ok(RunResponse {
                run_id: create_id(DEFAULT_ID_LENGTH),
                snapshot: delta,
            })
        })
    }

    fn push_messages<'a>(&'a self, chat: &'a Chat<String>, messages: &'a [Message]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.enter("push_messages")?;
            self.with_stored(chat.id(), |stored| {
                stored.snapshot.messages.extend(messages.iter().cloned())
            });
            Ok(())
        })
    }

    fn delete_message<'a>(&'a self, chat: &'a Chat<String>, message_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.enter("delete_message")?;
            self.with_stored(chat.id(), |stored| {
                stored
                    .snapshot
                    .messages
                    .retain(|m| m.id.as_deref() != Some(message_id))
            });
            Ok(())
        })
    }

    fn load_messages<'a>(
        &'a self,
        chat: &'a Chat<String>,
        query: Option<&'a QueryOptions>,
    ) -> BoxFuture<'a, Result<Vec<Message>>> {
        Box::pin(async move {
            self.enter("load_messages")?;
            Ok(paged(self.messages_of(chat), query))
        })
    }

    fn load_message<'a>(&'a self, chat: &'a Chat<String>, message_id: &'a str) -> BoxFuture<'a, Result<Option<Message>>> {
        Box::pin(async move {
            self.enter("load_message")?;
            Ok(self
                .messages_of(chat)
                .into_iter()
                .find(|m| m.id.as_deref() == Some(message_id)))
        })
    }
}

// ---------------------------------------------------------------------------
// FakeAgencyAdapter
// ---------------------------------------------------------------------------

/// An agency provider fake. Agent contexts are `"agent-ctx:<agent id>"`.
///
/// Each agent's chats are stateless [`FakeChatAdapter`]s persisted in one
/// shared [`MemoryPersister`] under the tags `["agent", <agent id>]`, so
/// every `chats()` call sees the same chats.
pub struct FakeAgencyAdapter {
    agents: Mutex<Vec<(String, AgentConfig)>>,
    remote: Mutex<HashMap<String, AgentConfig>>,
    chat_store: Arc<MemoryPersister>,
    calls: Mutex<Vec<String>>,
}

impl FakeAgencyAdapter {
    pub fn new() -> Self {
        Self {
            agents: Mutex::new(Vec::new()),
            remote: Mutex::new(HashMap::new()),
            chat_store: Arc::new(MemoryPersister::json()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Config `refresh_agent` reports for `agent_id`, as if it had been
    /// changed provider-side.
    pub fn set_remote_config(&self, agent_id: &str, config: AgentConfig) {
        self.remote.lock().unwrap().insert(agent_id.to_string(), config);
    }

    /// The store behind every agent's chats.
    pub fn chat_store(&self) -> &Arc<MemoryPersister> {
        &self.chat_store
    }

    fn record(&self, hook: &str) {
        self.calls.lock().unwrap().push(hook.to_string());
    }

    fn stored_config(&self, agent_id: &str) -> Option<AgentConfig> {
        self.agents
            .lock()
            .unwrap()
            .iter()
            .find(|(id, _)| id == agent_id)
            .map(|(_, config)| config.clone())
    }
}

impl Default for FakeAgencyAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl AgencyAdapter for FakeAgencyAdapter {
    type Context = String;
    type Chats = FakeChatAdapter;

    fn on_mount<'a>(&'a self, _app: &'a App, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("on_mount");
            Ok(())
        })
    }

    fn create_agent<'a>(&'a self, input: &'a CreateAgentInput) -> BoxFuture<'a, Result<CreateAgentResult<String>>> {
        Box::pin(async move {
            self.record("create_agent");
            let agent_id = create_id(DEFAULT_ID_LENGTH);
            let config = AgentConfig::default().merged(&input.config);
            self.agents.lock().unwrap().push((agent_id.clone(), config.clone()));
            Ok(CreateAgentResult {
                context: format!("agent-ctx:{agent_id}"),
                agent_id,
                config,
            })
        })
    }

    fn create_agent_context<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record("create_agent_context");
            Ok(format!("agent-ctx:{agent_id}"))
        })
    }

    fn load_agent<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Option<LoadAgentResult<String>>>> {
        Box::pin(async move {
            self.record("load_agent");
            Ok(self.stored_config(agent_id).map(|config| LoadAgentResult {
                config,
                context: format!("agent-ctx:{agent_id}"),
            }))
        })
    }

    fn alter_agent<'a>(
        &'a self,
        agent: &'a Agent<String, String>,
        data: &'a UpdateAgentData,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("alter_agent");
            if let Some(patch) = &data.config {
                let mut agents = self.agents.lock().unwrap();
                if let Some((_, config)) = agents.iter_mut().find(|(id, _)| id == agent.id()) {
                    config.apply(patch);
                }
            }
            Ok(())
        })
    }

    fn delete_agent<'a>(&'a self, agent: &'a Agent<String, String>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("delete_agent");
            self.agents.lock().unwrap().retain(|(id, _)| id != agent.id());
            Ok(())
        })
    }

    fn load_agents<'a>(&'a self, query: Option<&'a QueryOptions>) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            self.record("load_agents");
            let ids: Vec<String> = self.agents.lock().unwrap().iter().map(|(id, _)| id.clone()).collect();
            Ok(paged(ids, query))
        })
    }

    /// The remote config when one was set, else the stored one.
    fn refresh_agent<'a>(&'a self, agent: &'a Agent<String, String>) -> BoxFuture<'a, Result<AgentConfig>> {
        Box::pin(async move {
            self.record("refresh_agent");
            let remote = self.remote.lock().unwrap().get(agent.id()).cloned();
            Ok(remote
                .or_else(|| self.stored_config(agent.id()))
                .unwrap_or_else(|| agent.config().clone()))
        })
    }

    fn chats<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Chats<FakeChatAdapter>>> {
        Box::pin(async move {
            self.record("chats");
            Ok(Chats::new(
                FakeChatAdapter::stateless(),
                ChatsConfig {
                    persister: Some(self.chat_store.clone()),
                    persister_tags: vec!["agent".to_string(), agent_id.to_string()],
                    default_auto_persist: true,
                },
            ))
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingPersister
// ---------------------------------------------------------------------------

/// A [`MemoryPersister`] that remembers every save.
pub struct RecordingPersister {
    state: ResourceState,
    inner: MemoryPersister,
    saves: Mutex<Vec<(PersisterKey, Value)>>,
}

impl RecordingPersister {
    pub fn new() -> Self {
        Self {
            state: ResourceState::new(),
            inner: MemoryPersister::json(),
            saves: Mutex::new(Vec::new()),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    /// The most recent save, key and value.
    pub fn last_saved(&self) -> Option<(PersisterKey, Value)> {
        self.saves.lock().unwrap().last().cloned()
    }

    pub fn saves(&self) -> Vec<(PersisterKey, Value)> {
        self.saves.lock().unwrap().clone()
    }
}

impl Default for RecordingPersister {
    fn default() -> Self {
        Self::new()
    }
}

impl Resource for RecordingPersister {
    fn state(&self) -> &ResourceState {
        &self.state
    }
}

impl Persister<PersisterKey, Value> for RecordingPersister {
    fn save<'a>(&'a self, key: &'a PersisterKey, value: Value, options: SaveOptions) -> BoxFuture<'a, Result<()>> {
        self.saves.lock().unwrap().push((key.clone(), value.clone()));
        self.inner.save(key, value, options)
    }

    fn load<'a>(&'a self, key: &'a PersisterKey) -> BoxFuture<'a, Result<Option<Value>>> {
        self.inner.load(key)
    }

    fn delete<'a>(&'a self, key: &'a PersisterKey) -> BoxFuture<'a, Result<()>> {
        self.inner.delete(key)
    }

    fn clear(&self, options: ClearOptions) -> BoxFuture<'_, Result<()>> {
        self.inner.clear(options)
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<PersisterKey>>> {
        self.inner.keys()
    }

    fn size(&self) -> BoxFuture<'_, Result<usize>> {
        self.inner.size()
    }
}

// ---------------------------------------------------------------------------
// FakeParser
// ---------------------------------------------------------------------------

/// A capability resolved by MIME type through [`App::cover`].
pub trait Parser: Resource + Covers<str> {
    fn label(&self) -> &str;
}

/// A [`Parser`] covering a fixed list of MIME types.
pub struct FakeParser {
    state: ResourceState,
    label: String,
    mimes: Vec<String>,
}

impl FakeParser {
    pub fn new(label: &str, mimes: &[&str]) -> Self {
        Self {
            state: ResourceState::new(),
            label: label.to_string(),
            mimes: mimes.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl Resource for FakeParser {
    fn state(&self) -> &ResourceState {
        &self.state
    }
}

impl Covers<str> for FakeParser {
    fn covers(&self, mime: &str) -> bool {
        self.mimes.iter().any(|m| m == mime)
    }
}

impl Parser for FakeParser {
    fn label(&self) -> &str {
        &self.label
    }
}

// ---------------------------------------------------------------------------
// FakeValidator
// ---------------------------------------------------------------------------

/// A [`JsonSchemaValidator`] with a fixed verdict.
pub struct FakeValidator {
    state: ResourceState,
    errors: Vec<String>,
    calls: Mutex<Vec<(Value, Value)>>,
}

impl FakeValidator {
    pub fn passing() -> Self {
        Self::failing(&[])
    }

    /// Reports `errors` for every validation.
    pub fn failing(errors: &[&str]) -> Self {
        Self {
            state: ResourceState::new(),
            errors: errors.iter().map(|e| e.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of validations so far.
    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// `(schema, data)` of every validation.
    pub fn recorded_calls(&self) -> Vec<(Value, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Resource for FakeValidator {
    fn state(&self) -> &ResourceState {
        &self.state
    }
}

impl JsonSchemaValidator for FakeValidator {
    fn validate(&self, schema: &Value, data: &Value) -> ValidationReport {
        self.calls.lock().unwrap().push((schema.clone(), data.clone()));
        ValidationReport::from_errors(self.errors.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stateful_chat_adapter_keeps_its_own_record() {
        let adapter = FakeChatAdapter::stateful();
        let created = adapter.create_chat(&CreateChatInput::default()).await.unwrap();
        assert_eq!(created.context, format!("ctx:{}", created.chat_id));

        let loaded = adapter.load_chat(&created.chat_id).await.unwrap().unwrap();
        assert!(loaded.snapshot.messages.is_empty());
        assert_eq!(adapter.load_chats(None).await.unwrap(), vec![created.chat_id.clone()]);

        adapter.delete_chat(&created.chat_id).await.unwrap();
        assert!(adapter.load_chat(&created.chat_id).await.unwrap().is_none());
        assert_eq!(
            adapter.calls(),
            vec!["create_chat", "load_chat", "load_chats", "delete_chat", "load_chat"]
        );
    }

    #[tokio::test]
    async fn stateless_chat_adapter_remembers_nothing() {
        let adapter = FakeChatAdapter::stateless();
        let created = adapter.create_chat(&CreateChatInput::default()).await.unwrap();
        assert!(adapter.load_chat(&created.chat_id).await.unwrap().is_none());
        assert!(adapter.load_chats(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_returned_and_recorded() {
        let adapter = FakeChatAdapter::stateful();
        adapter.fail_on("create_chat", AipiError::not_supported("createChat", ""));
        let err = adapter.create_chat(&CreateChatInput::default()).await.unwrap_err();
        assert!(err.is_not_supported());
        assert_eq!(adapter.calls(), vec!["create_chat"]);
    }

    #[tokio::test]
    async fn recording_persister_counts_saves() {
        let persister = RecordingPersister::new();
        let key = PersisterKey::untagged("chat", "c");
        persister.save(&key, json!(1), SaveOptions::default()).await.unwrap();
        persister.save(&key, json!(2), SaveOptions::default()).await.unwrap();

        assert_eq!(persister.save_count(), 2);
        assert_eq!(persister.last_saved(), Some((key.clone(), json!(2))));
        assert_eq!(persister.load(&key).await.unwrap(), Some(json!(2)));
        assert_eq!(persister.size().await.unwrap(), 1);
    }

    #[test]
    fn fake_validator_records_calls() {
        let validator = FakeValidator::passing();
        assert!(validator.is_valid(&json!({}), &json!(1)));
        assert_eq!(validator.recorded_calls(), vec![(json!({}), json!(1))]);
        assert_eq!(FakeValidator::failing(&["no"]).errors(&json!({}), &json!(1)), vec!["no"]);
    }
}
