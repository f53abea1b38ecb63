//! Agent — a configured persona that owns its own set of chats.
//!
//! Like [`Chat`], an [`Agent`] never talks to a provider itself. Every side
//! effect goes through the [`AgentEngine`] its [`Agency`](crate::agency::Agency)
//! built for it; the engine also owns the agent's nested
//! [`Chats`](crate::chats::Chats).
//!
//! Config updates are shallow: a field present in the patch replaces the
//! whole field. `refresh` replaces the config wholesale with whatever the
//! provider reports.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::Chat;
use crate::chats::CreateChatInput;
use crate::errors::Result;
use crate::messages::{QueryOptions, Tool};
use crate::persister::Persistable;
use crate::resource::BoxFuture;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub content: String,
}

impl Instructions {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Everything that defines an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub resources: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    pub instructions: Instructions,
    pub description: String,
    pub name: String,
}

/// Partial [`AgentConfig`]; present fields replace the config's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<Instructions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AgentConfigPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

impl AgentConfig {
    /// Shallow merge: each present patch field replaces the whole field.
    pub fn apply(&mut self, patch: &AgentConfigPatch) {
        if let Some(tools) = &patch.tools {
            self.tools = tools.clone();
        }
        if let Some(resources) = &patch.resources {
            self.resources = resources.clone();
        }
        if let Some(data) = &patch.data {
            self.data = data.clone();
        }
        if let Some(instructions) = &patch.instructions {
            self.instructions = instructions.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
    }

    pub fn merged(mut self, patch: &AgentConfigPatch) -> Self {
        self.apply(patch);
        self
    }
}

/// Data accepted by [`Agent::update`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateAgentData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<AgentConfigPatch>,
}

/// Persisted form of an agent. The context is not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedAgent {
    pub agent_id: String,
    pub config: AgentConfig,
}

// ---------------------------------------------------------------------------
// AgentEngine
// ---------------------------------------------------------------------------

/// Side effects an [`Agent`] delegates to its agency. `C` is the agent
/// context, `CC` the context of the agent's chats.
pub trait AgentEngine<C, CC>: Send + Sync {
    fn start_chat<'a>(
        &'a self,
        agent: &'a Agent<C, CC>,
        input: CreateChatInput,
    ) -> BoxFuture<'a, Result<Chat<CC>>>;

    fn load_chat<'a>(
        &'a self,
        agent: &'a Agent<C, CC>,
        chat_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Chat<CC>>>>;

    fn delete_chat<'a>(&'a self, agent: &'a Agent<C, CC>, chat_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn list_chats<'a>(
        &'a self,
        agent: &'a Agent<C, CC>,
        query: Option<QueryOptions>,
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    fn update<'a>(&'a self, agent: &'a Agent<C, CC>, data: &'a UpdateAgentData) -> BoxFuture<'a, Result<()>>;

    /// Authoritative config, replacing the local one.
    fn refresh<'a>(&'a self, agent: &'a Agent<C, CC>) -> BoxFuture<'a, Result<AgentConfig>>;
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent<C, CC> {
    engine: Arc<dyn AgentEngine<C, CC>>,
    id: String,
    context: C,
    config: AgentConfig,
}

impl<C, CC> Agent<C, CC> {
    pub fn new(
        engine: Arc<dyn AgentEngine<C, CC>>,
        id: impl Into<String>,
        context: C,
        config: AgentConfig,
    ) -> Self {
        Self {
            engine,
            id: id.into(),
            context,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: AgentConfig) {
        self.config = config;
    }

    pub fn update_context(&mut self, context: C) {
        self.context = context;
    }
}

impl<C: Send + Sync, CC: Send + Sync> Agent<C, CC> {
    pub async fn start_chat(&self, input: CreateChatInput) -> Result<Chat<CC>> {
        self.engine.start_chat(self, input).await
    }

    pub async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat<CC>>> {
        self.engine.load_chat(self, chat_id).await
    }

    pub async fn end_chat(&self, chat_id: &str) -> Result<()> {
        self.engine.delete_chat(self, chat_id).await
    }

    pub async fn list_chats(&self, query: Option<QueryOptions>) -> Result<Vec<String>> {
        self.engine.list_chats(self, query).await
    }

    /// Engine first, then shallow-merge the patch into the local config.
    pub async fn update(&mut self, data: UpdateAgentData) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        engine.update(self, &data).await?;
        if let Some(patch) = &data.config {
            self.config.apply(patch);
        }
        Ok(())
    }

    /// Replace the config with the engine's.
    pub async fn refresh(&mut self) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        self.config = engine.refresh(self).await?;
        Ok(())
    }
}

impl<C, CC> Persistable for Agent<C, CC> {
    type Serialized = SerializedAgent;

    fn serialize(&self) -> SerializedAgent {
        SerializedAgent {
            agent_id: self.id.clone(),
            config: self.config.clone(),
        }
    }
}

impl<C: fmt::Debug, CC> fmt::Debug for Agent<C, CC> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("config", &self.config)
            .finish()
    }
}
