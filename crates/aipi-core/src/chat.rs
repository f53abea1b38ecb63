//! Chat — per-conversation state driven through a [`ChatEngine`].
//!
//! A [`Chat`] holds the conversation snapshot, its resources (tools plus
//! free-form resource data) and a provider-specific context. It never talks
//! to a provider directly: every side effect goes through the engine its
//! owning [`Chats`](crate::chats::Chats) handed it at construction.
//!
//! # Design
//!
//! Every mutating method follows the same order:
//!
//! 1. call the engine (so the adapter can fail before anything changes),
//! 2. apply the change to the in-memory state,
//! 3. await `on_change`, the single persistence choke point.
//!
//! Mutating methods take `&mut self`; overlapping mutation of one chat is
//! therefore impossible without external synchronization.
//!
//! # Connections
//!
//! - Built by [`Chats`](crate::chats::Chats), which implements the engine.
//! - Serialized to [`SerializedChat`] for a [`Persister`](crate::persister::Persister).

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{AipiError, Result};
use crate::messages::{Format, Message, QueryOptions, Tool, ToolMatch};
use crate::persister::Persistable;
use crate::resource::BoxFuture;
use crate::utils::merge_objects;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Accumulated chat state: messages plus the tool matches they produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tool_matches: Vec<ToolMatch>,
}

impl ChatSnapshot {
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            tool_matches: Vec::new(),
        }
    }

    /// Append `delta` after the current contents.
    pub fn stack(&mut self, delta: ChatSnapshot) {
        self.messages.extend(delta.messages);
        self.tool_matches.extend(delta.tool_matches);
    }
}

/// `a.messages ++ b.messages`, `a.tool_matches ++ b.tool_matches`.
/// Never deduplicates or reorders.
pub fn stack_snapshots(a: &ChatSnapshot, b: &ChatSnapshot) -> ChatSnapshot {
    let mut stacked = a.clone();
    stacked.stack(b.clone());
    stacked
}

// ---------------------------------------------------------------------------
// Resources & inputs
// ---------------------------------------------------------------------------

/// Tools and resource data attached to a chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResources {
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub resources: Value,
}

/// Partial [`ChatResources`] supplied by callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResourcesPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
}

impl ChatResources {
    pub fn from_patch(patch: Option<&ChatResourcesPatch>) -> Self {
        let mut resources = Self::default();
        if let Some(patch) = patch {
            resources.apply(patch);
        }
        resources
    }

    /// Update semantics: tools are replaced, resource data is deep-merged
    /// (arrays replaced).
    pub fn apply(&mut self, patch: &ChatResourcesPatch) {
        if let Some(tools) = &patch.tools {
            self.tools = tools.clone();
        }
        if let Some(resources) = &patch.resources {
            merge_objects(&mut self.resources, resources);
        }
    }

    /// Run semantics: the chat's tools followed by the caller's, resource
    /// data deep-merged with the caller's taking precedence.
    pub fn merged_for_run(&self, patch: Option<&ChatResourcesPatch>) -> Self {
        let mut merged = self.clone();
        if let Some(patch) = patch {
            if let Some(tools) = &patch.tools {
                merged.tools.extend(tools.iter().cloned());
            }
            if let Some(resources) = &patch.resources {
                merge_objects(&mut merged.resources, resources);
            }
        }
        merged
    }
}

impl From<ChatResources> for ChatResourcesPatch {
    fn from(resources: ChatResources) -> Self {
        Self {
            tools: Some(resources.tools),
            resources: Some(resources.resources),
        }
    }
}

/// Data accepted by [`Chat::update`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateChatData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ChatResourcesPatch>,
}

/// Input of a chat run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunChatInput {
    /// Messages to run in addition to the chat's own.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<Message>,
    /// Run-specific resources. By the time an adapter sees the input this
    /// holds the full merged set (see [`ChatResources::merged_for_run`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ChatResourcesPatch>,
    /// Number of choices to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<Format>,
}

/// Result of a run: the run id and the snapshot *delta* it produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub run_id: String,
    pub snapshot: ChatSnapshot,
}

/// Persisted form of a chat. The context is not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedChat {
    pub chat_id: String,
    pub resources: ChatResources,
    pub snapshot: ChatSnapshot,
}

// ---------------------------------------------------------------------------
// ChatEngine
// ---------------------------------------------------------------------------

/// Side-effecting operations a [`Chat`] delegates to its owner.
pub trait ChatEngine<C>: Send + Sync {
    fn add_messages<'a>(
        &'a self,
        chat: &'a Chat<C>,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<()>>;

    fn delete_message<'a>(&'a self, chat: &'a Chat<C>, message_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn load_messages<'a>(
        &'a self,
        chat: &'a Chat<C>,
        query: Option<&'a QueryOptions>,
    ) -> BoxFuture<'a, Result<Vec<Message>>>;

    fn load_message<'a>(
        &'a self,
        chat: &'a Chat<C>,
        message_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Message>>>;

    /// Authoritative snapshot, replacing the local one.
    fn refresh<'a>(&'a self, chat: &'a Chat<C>) -> BoxFuture<'a, Result<ChatSnapshot>>;

    fn run<'a>(&'a self, chat: &'a Chat<C>, input: RunChatInput) -> BoxFuture<'a, Result<RunResponse>>;

    fn update<'a>(&'a self, chat: &'a Chat<C>, data: &'a UpdateChatData) -> BoxFuture<'a, Result<()>>;

    /// Called after every successful mutation.
    fn on_change<'a>(&'a self, chat: &'a Chat<C>) -> BoxFuture<'a, Result<()>>;
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A conversation and its state.
pub struct Chat<C> {
    engine: Arc<dyn ChatEngine<C>>,
    id: String,
    resources: ChatResources,
    snapshot: ChatSnapshot,
    context: C,
    last_run_id: Option<String>,
    auto_persist: bool,
}

impl<C> Chat<C> {
    /// Build a chat. An empty `id` leaves it unassigned for
    /// [`assign_id`](Chat::assign_id).
    pub fn new(
        engine: Arc<dyn ChatEngine<C>>,
        id: impl Into<String>,
        resources: ChatResources,
        snapshot: ChatSnapshot,
        context: C,
    ) -> Self {
        Self {
            engine,
            id: id.into(),
            resources,
            snapshot,
            context,
            last_run_id: None,
            auto_persist: true,
        }
    }

    pub fn with_auto_persist(mut self, auto_persist: bool) -> Self {
        self.auto_persist = auto_persist;
        self
    }

    // -- Readers --

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resources(&self) -> &ChatResources {
        &self.resources
    }

    pub fn tools(&self) -> &[Tool] {
        &self.resources.tools
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn snapshot(&self) -> &ChatSnapshot {
        &self.snapshot
    }

    pub fn messages(&self) -> &[Message] {
        &self.snapshot.messages
    }

    pub fn tool_matches(&self) -> &[ToolMatch] {
        &self.snapshot.tool_matches
    }

    pub fn latest_message(&self) -> Option<&Message> {
        self.snapshot.messages.last()
    }

    pub fn has_messages(&self) -> bool {
        !self.snapshot.messages.is_empty()
    }

    pub fn last_run_id(&self) -> Option<&str> {
        self.last_run_id.as_deref()
    }

    pub fn auto_persist(&self) -> bool {
        self.auto_persist
    }

    /// Local messages with `offset` then `limit` applied.
    pub fn query(&self, query: &QueryOptions) -> Vec<Message> {
        query.apply(&self.snapshot.messages)
    }

    // -- Local setters (no engine, no persistence) --

    /// Set the id of a chat built without one.
    pub fn assign_id(&mut self, id: impl Into<String>) -> Result<()> {
        if !self.id.is_empty() {
            return Err(AipiError::new("Chat already initialized"));
        }
        self.id = id.into();
        Ok(())
    }

    pub fn set_snapshot(&mut self, snapshot: ChatSnapshot) {
        self.snapshot = snapshot;
    }

    /// Append `delta` to the local snapshot.
    pub fn update_snapshot(&mut self, delta: ChatSnapshot) {
        self.snapshot.stack(delta);
    }

    pub fn update_context(&mut self, context: C) {
        self.context = context;
    }

    pub fn set_auto_persist(&mut self, auto_persist: bool) {
        self.auto_persist = auto_persist;
    }
}

impl<C: Send + Sync> Chat<C> {
    /// Add messages: engine, then local append, then `on_change`.
    pub async fn push_messages(&mut self, messages: Vec<Message>) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        engine.add_messages(self, &messages).await?;
        self.snapshot.messages.extend(messages);
        engine.on_change(self).await
    }

    /// Delete a message: engine, then local removal, then `on_change`.
    pub async fn delete_message(&mut self, message_id: &str) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        engine.delete_message(self, message_id).await?;
        self.snapshot
            .messages
            .retain(|m| m.id.as_deref() != Some(message_id));
        engine.on_change(self).await
    }

    /// Load messages through the engine. Without a query the result also
    /// replaces the local message list.
    pub async fn load_messages(&mut self, query: Option<QueryOptions>) -> Result<Vec<Message>> {
        let engine = Arc::clone(&self.engine);
        let messages = engine.load_messages(self, query.as_ref()).await?;
        if query.is_none() {
            self.snapshot.messages = messages.clone();
        }
        Ok(messages)
    }

    pub async fn load_message(&self, message_id: &str) -> Result<Option<Message>> {
        self.engine.load_message(self, message_id).await
    }

    /// Replace the snapshot with the engine's authoritative one.
    pub async fn refresh(&mut self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        self.snapshot = engine.refresh(self).await?;
        engine.on_change(self).await
    }

    /// Update resources: tools replaced, resource data deep-merged.
    pub async fn update(&mut self, data: UpdateChatData) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        engine.update(self, &data).await?;
        if let Some(patch) = &data.resources {
            self.resources.apply(patch);
        }
        engine.on_change(self).await
    }

    /// Run the chat and append the produced delta to the snapshot.
    pub async fn run(&mut self, mut input: RunChatInput) -> Result<RunResponse> {
        let merged = self.resources.merged_for_run(input.resources.as_ref());
        input.resources = Some(merged.into());

        let engine = Arc::clone(&self.engine);
        let response = engine.run(self, input).await?;
        self.snapshot.stack(response.snapshot.clone());
        self.last_run_id = Some(response.run_id.clone());
        engine.on_change(self).await?;
        Ok(response)
    }
}

impl<C> Persistable for Chat<C> {
    type Serialized = SerializedChat;

    fn serialize(&self) -> SerializedChat {
        SerializedChat {
            chat_id: self.id.clone(),
            resources: self.resources.clone(),
            snapshot: self.snapshot.clone(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Chat<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat")
            .field("id", &self.id)
            .field("resources", &self.resources)
            .field("snapshot", &self.snapshot)
            .field("context", &self.context)
            .field("last_run_id", &self.last_run_id)
            .field("auto_persist", &self.auto_persist)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Engine that records calls and can be told to fail.
    #[derive(Default)]
    struct ScriptedEngine {
        calls: Mutex<Vec<String>>,
        fail: Mutex<bool>,
        refreshed: Mutex<ChatSnapshot>,
        last_run_input: Mutex<Option<RunChatInput>>,
    }

    impl ScriptedEngine {
        fn record(&self, call: &str) -> Result<()> {
            self.calls.lock().unwrap().push(call.to_string());
            if *self.fail.lock().unwrap() {
                return Err(AipiError::not_supported(call, ""));
            }
            Ok(())
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ChatEngine<()> for ScriptedEngine {
        fn add_messages<'a>(&'a self, _: &'a Chat<()>, _: &'a [Message]) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move { self.record("add_messages") })
        }

        fn delete_message<'a>(&'a self, _: &'a Chat<()>, _: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move { self.record("delete_message") })
        }

        fn load_messages<'a>(
            &'a self,
            _: &'a Chat<()>,
            query: Option<&'a QueryOptions>,
        ) -> BoxFuture<'a, Result<Vec<Message>>> {
            Box::pin(async move {
                self.record("load_messages")?;
                let all = vec![Message::user("remote 1"), Message::user("remote 2")];
                Ok(match query {
                    Some(q) => q.apply(&all),
                    None => all,
                })
            })
        }

        fn load_message<'a>(&'a self, chat: &'a Chat<()>, id: &'a str) -> BoxFuture<'a, Result<Option<Message>>> {
            Box::pin(async move {
                self.record("load_message")?;
                Ok(chat.messages().iter().find(|m| m.id.as_deref() == Some(id)).cloned())
            })
        }

        fn refresh<'a>(&'a self, _: &'a Chat<()>) -> BoxFuture<'a, Result<ChatSnapshot>> {
            Box::pin(async move {
                self.record("refresh")?;
                Ok(self.refreshed.lock().unwrap().clone())
            })
        }

        fn run<'a>(&'a self, _: &'a Chat<()>, input: RunChatInput) -> BoxFuture<'a, Result<RunResponse>> {
            Box::pin(async move {
                self.record("run")?;
                *self.last_run_input.lock().unwrap() = Some(input);
                Ok(RunResponse {
                    run_id: "run-1".into(),
                    snapshot: ChatSnapshot::from_messages(vec![Message::assistant("answer")]),
                })
            })
        }

        fn update<'a>(&'a self, _: &'a Chat<()>, _: &'a UpdateChatData) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move { self.record("update") })
        }

        fn on_change<'a>(&'a self, _: &'a Chat<()>) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push("on_change".into());
                Ok(())
            })
        }
    }

    fn chat_with(engine: &Arc<ScriptedEngine>) -> Chat<()> {
        Chat::new(
            engine.clone(),
            "c1",
            ChatResources {
                tools: vec![Tool::function("own")],
                resources: json!({"model": {"name": "a", "temp": 1}}),
            },
            ChatSnapshot::from_messages(vec![Message::user("first").with_id("m1")]),
            (),
        )
    }

    // ---- Snapshot stacking ----

    #[test]
    fn stack_snapshots_concatenates_in_order() {
        let m1 = Message::user("m1");
        let m2 = Message::assistant("m2");
        let t1 = ToolMatch::parse(Tool::function("t"), "{}", None);
        let a = ChatSnapshot::from_messages(vec![m1.clone()]);
        let b = ChatSnapshot {
            messages: vec![m2.clone()],
            tool_matches: vec![t1.clone()],
        };
        let stacked = stack_snapshots(&a, &b);
        assert_eq!(stacked.messages, vec![m1.clone(), m2]);
        assert_eq!(stacked.tool_matches, vec![t1]);

        // Stacking never deduplicates.
        let doubled = stack_snapshots(&a, &a);
        assert_eq!(doubled.messages, vec![m1.clone(), m1]);
    }

    // ---- Mutation order ----

    #[tokio::test]
    async fn push_messages_calls_engine_then_persists() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = chat_with(&engine);
        chat.push_messages(vec![Message::user("second")]).await.unwrap();

        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.latest_message().unwrap().text_content.as_deref(), Some("second"));
        assert_eq!(engine.calls(), vec!["add_messages", "on_change"]);
    }

    #[tokio::test]
    async fn engine_failure_leaves_state_untouched() {
        let engine = Arc::new(ScriptedEngine::default());
        *engine.fail.lock().unwrap() = true;
        let mut chat = chat_with(&engine);

        let err = chat.push_messages(vec![Message::user("x")]).await.unwrap_err();
        assert!(err.is_not_supported());
        assert_eq!(chat.messages().len(), 1);

        assert!(chat.run(RunChatInput::default()).await.is_err());
        assert!(chat.last_run_id().is_none());
        assert_eq!(chat.messages().len(), 1);

        assert_eq!(engine.calls(), vec!["add_messages", "run"]);
    }

    #[tokio::test]
    async fn delete_message_removes_by_id() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = chat_with(&engine);
        chat.delete_message("m1").await.unwrap();
        assert!(!chat.has_messages());
        assert_eq!(engine.calls(), vec!["delete_message", "on_change"]);
    }

    #[tokio::test]
    async fn load_messages_replaces_only_without_query() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = chat_with(&engine);

        let page = chat.load_messages(Some(QueryOptions::page(1, 1))).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(chat.messages()[0].text_content.as_deref(), Some("first"));

        chat.load_messages(None).await.unwrap();
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0].text_content.as_deref(), Some("remote 1"));
        // Reads do not persist.
        assert!(!engine.calls().contains(&"on_change".to_string()));
    }

    #[tokio::test]
    async fn load_message_is_a_pure_read() {
        let engine = Arc::new(ScriptedEngine::default());
        let chat = chat_with(&engine);
        assert!(chat.load_message("m1").await.unwrap().is_some());
        assert!(chat.load_message("missing").await.unwrap().is_none());
        assert_eq!(engine.calls(), vec!["load_message", "load_message"]);
    }

    #[tokio::test]
    async fn refresh_replaces_snapshot_wholesale() {
        let engine = Arc::new(ScriptedEngine::default());
        *engine.refreshed.lock().unwrap() =
            ChatSnapshot::from_messages(vec![Message::system("authoritative")]);
        let mut chat = chat_with(&engine);

        chat.refresh().await.unwrap();
        assert_eq!(chat.messages().len(), 1);
        assert_eq!(chat.messages()[0].role, crate::messages::Role::System);
        assert_eq!(engine.calls(), vec!["refresh", "on_change"]);
    }

    // ---- Run ----

    #[tokio::test]
    async fn run_appends_delta_and_merges_resources() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = chat_with(&engine);

        let response = chat
            .run(RunChatInput {
                resources: Some(ChatResourcesPatch {
                    tools: Some(vec![Tool::function("extra")]),
                    resources: Some(json!({"model": {"temp": 0}})),
                }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.run_id, "run-1");
        assert_eq!(chat.last_run_id(), Some("run-1"));
        let texts: Vec<_> = chat
            .messages()
            .iter()
            .map(|m| m.text_content.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["first", "answer"]);

        let seen = engine.last_run_input.lock().unwrap().clone().unwrap();
        let resources = seen.resources.unwrap();
        let tool_names: Vec<_> = resources.tools.unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(tool_names, vec!["own", "extra"]);
        assert_eq!(resources.resources.unwrap(), json!({"model": {"name": "a", "temp": 0}}));

        // The chat's own resources are not changed by a run.
        assert_eq!(chat.tools().len(), 1);
        assert_eq!(engine.calls(), vec!["run", "on_change"]);
    }

    // ---- Update ----

    #[tokio::test]
    async fn update_replaces_tools_and_merges_resources() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = chat_with(&engine);

        chat.update(UpdateChatData {
            resources: Some(ChatResourcesPatch {
                tools: Some(vec![Tool::function("replacement")]),
                resources: Some(json!({"model": {"temp": 2}, "stop": ["x"]})),
            }),
        })
        .await
        .unwrap();

        assert_eq!(chat.tools().len(), 1);
        assert_eq!(chat.tools()[0].name, "replacement");
        assert_eq!(
            chat.resources().resources,
            json!({"model": {"name": "a", "temp": 2}, "stop": ["x"]})
        );
        assert_eq!(engine.calls(), vec!["update", "on_change"]);
    }

    // ---- Local state ----

    #[test]
    fn assign_id_only_once() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = Chat::new(
            engine as Arc<dyn ChatEngine<()>>,
            "",
            ChatResources::default(),
            ChatSnapshot::default(),
            (),
        );
        chat.assign_id("fresh").unwrap();
        assert_eq!(chat.id(), "fresh");
        let err = chat.assign_id("again").unwrap_err();
        assert_eq!(err.to_string(), "Chat already initialized");
    }

    #[test]
    fn query_and_update_snapshot() {
        let engine = Arc::new(ScriptedEngine::default());
        let mut chat = chat_with(&engine);
        chat.update_snapshot(ChatSnapshot::from_messages(vec![
            Message::assistant("two"),
            Message::user("three"),
        ]));
        let page = chat.query(&QueryOptions::page(1, 1));
        assert_eq!(page[0].text_content.as_deref(), Some("two"));

        chat.set_snapshot(ChatSnapshot::default());
        assert!(!chat.has_messages());
        assert!(chat.latest_message().is_none());
    }

    #[test]
    fn serialize_uses_wire_names() {
        let engine = Arc::new(ScriptedEngine::default());
        let chat = chat_with(&engine);
        let json = serde_json::to_value(chat.serialize()).unwrap();
        assert_eq!(json["chatId"], json!("c1"));
        assert_eq!(json["snapshot"]["toolMatches"], json!([]));
        assert_eq!(json["resources"]["tools"][0]["name"], json!("own"));
    }
}
