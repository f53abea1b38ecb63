//! Agency — agent lifecycle over a provider's [`AgencyAdapter`].
//!
//! # Design
//!
//! - Mirrors [`Chats`]: the adapter implements raw hooks, [`Agency`] owns
//!   lookups, not-found handling and the engine each [`Agent`] receives.
//! - Every agent gets its own [`Chats`] from `AgencyAdapter::chats`. The
//!   agency mounts it standalone on its own app the first time it is seen,
//!   so an agency must be mounted before use.
//!
//! # Connections
//!
//! - Builds [`Agent`]s; their engine wraps the adapter plus the nested chats.
//! - [`ChatAgency`](crate::chat_agency::ChatAgency) is the stock adapter.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::agent::{Agent, AgentConfig, AgentConfigPatch, AgentEngine, SerializedAgent, UpdateAgentData};
use crate::app::App;
use crate::chat::Chat;
use crate::chats::{ChatAdapter, Chats, CreateChatInput};
use crate::errors::{AipiError, Result};
use crate::messages::QueryOptions;
use crate::persister::Reviver;
use crate::registry::BootstrapOptions;
use crate::resource::{BoxFuture, Resource, ResourceState};

/// Context type of the chats an adapter's agents own.
pub type ChatContextOf<A> = <<A as AgencyAdapter>::Chats as ChatAdapter>::Context;

/// The agent type produced by an `Agency<A>`.
pub type AgentOf<A> = Agent<<A as AgencyAdapter>::Context, ChatContextOf<A>>;

// ---- Inputs & results ----

/// Input of [`Agency::spawn_agent`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateAgentInput {
    #[serde(default)]
    pub config: AgentConfigPatch,
}

#[derive(Debug, Clone)]
pub struct CreateAgentResult<C> {
    pub agent_id: String,
    pub config: AgentConfig,
    pub context: C,
}

#[derive(Debug, Clone)]
pub struct LoadAgentResult<C> {
    pub config: AgentConfig,
    pub context: C,
}

// ---- AgencyAdapter ----

/// Provider hooks behind an [`Agency`]. Like chat hooks, any of them may
/// fail with `NotSupported`.
pub trait AgencyAdapter: Send + Sync + 'static {
    type Context: Send + Sync + 'static;
    /// Adapter of the per-agent chats.
    type Chats: ChatAdapter;

    fn on_mount<'a>(&'a self, _app: &'a App, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn create_agent<'a>(
        &'a self,
        input: &'a CreateAgentInput,
    ) -> BoxFuture<'a, Result<CreateAgentResult<Self::Context>>>;

    fn create_agent_context<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Self::Context>>;

    /// `None` when the provider has no record of the agent.
    fn load_agent<'a>(
        &'a self,
        agent_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<LoadAgentResult<Self::Context>>>>;

    fn alter_agent<'a>(
        &'a self,
        agent: &'a Agent<Self::Context, <Self::Chats as ChatAdapter>::Context>,
        data: &'a UpdateAgentData,
    ) -> BoxFuture<'a, Result<()>>;

    fn delete_agent<'a>(
        &'a self,
        agent: &'a Agent<Self::Context, <Self::Chats as ChatAdapter>::Context>,
    ) -> BoxFuture<'a, Result<()>>;

    fn load_agents<'a>(&'a self, query: Option<&'a QueryOptions>) -> BoxFuture<'a, Result<Vec<String>>>;

    fn refresh_agent<'a>(
        &'a self,
        agent: &'a Agent<Self::Context, <Self::Chats as ChatAdapter>::Context>,
    ) -> BoxFuture<'a, Result<AgentConfig>>;

    /// The chats owned by `agent_id`. May be unmounted.
    fn chats<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Chats<Self::Chats>>>;
}

// ---- Per-agent engine ----

struct AgentSession<A: AgencyAdapter> {
    adapter: Arc<A>,
    chats: Chats<A::Chats>,
}

impl<A: AgencyAdapter> AgentEngine<A::Context, ChatContextOf<A>> for AgentSession<A> {
    fn start_chat<'a>(
        &'a self,
        _agent: &'a AgentOf<A>,
        input: CreateChatInput,
    ) -> BoxFuture<'a, Result<Chat<ChatContextOf<A>>>> {
        Box::pin(self.chats.start_chat(input))
    }

    fn load_chat<'a>(
        &'a self,
        _agent: &'a AgentOf<A>,
        chat_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Chat<ChatContextOf<A>>>>> {
        Box::pin(self.chats.get_chat(chat_id))
    }

    fn delete_chat<'a>(&'a self, _agent: &'a AgentOf<A>, chat_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.chats.end_chat(chat_id))
    }

    fn list_chats<'a>(
        &'a self,
        _agent: &'a AgentOf<A>,
        query: Option<QueryOptions>,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(self.chats.list_chats(query))
    }

    fn update<'a>(&'a self, agent: &'a AgentOf<A>, data: &'a UpdateAgentData) -> BoxFuture<'a, Result<()>> {
        self.adapter.alter_agent(agent, data)
    }

    fn refresh<'a>(&'a self, agent: &'a AgentOf<A>) -> BoxFuture<'a, Result<AgentConfig>> {
        self.adapter.refresh_agent(agent)
    }
}

// ---- Agency ----

/// Agent lifecycle resource. Must be mounted before use.
pub struct Agency<A: AgencyAdapter> {
    state: ResourceState,
    adapter: Arc<A>,
}

impl<A: AgencyAdapter> Agency<A> {
    pub fn new(adapter: A) -> Self {
        Self {
            state: ResourceState::new(),
            adapter: Arc::new(adapter),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    async fn create_agent_engine(&self, agent_id: &str) -> Result<Arc<dyn AgentEngine<A::Context, ChatContextOf<A>>>> {
        let chats = self.adapter.chats(agent_id).await?;
        if !chats.mounted() {
            self.app()?.mount(&chats).await?;
        }
        Ok(Arc::new(AgentSession {
            adapter: Arc::clone(&self.adapter),
            chats,
        }))
    }

    /// Create an agent through the adapter.
    pub async fn spawn_agent(&self, input: CreateAgentInput) -> Result<AgentOf<A>> {
        let created = self.adapter.create_agent(&input).await?;
        let engine = self.create_agent_engine(&created.agent_id).await?;
        debug!("spawned agent {}", created.agent_id);
        Ok(Agent::new(engine, created.agent_id, created.context, created.config))
    }

    /// `None` when the adapter has no record of the agent.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentOf<A>>> {
        let Some(loaded) = self.adapter.load_agent(agent_id).await? else {
            return Ok(None);
        };
        let engine = self.create_agent_engine(agent_id).await?;
        Ok(Some(Agent::new(engine, agent_id, loaded.context, loaded.config)))
    }

    async fn find_agent(&self, agent_id: &str) -> Result<AgentOf<A>> {
        self.get_agent(agent_id)
            .await?
            .ok_or_else(|| AipiError::not_found("agent"))
    }

    /// Delete an agent. Fails with `NotFound` for an unknown id.
    pub async fn kill_agent(&self, agent_id: &str) -> Result<()> {
        let agent = self.find_agent(agent_id).await?;
        self.adapter.delete_agent(&agent).await?;
        debug!("killed agent {agent_id}");
        Ok(())
    }

    pub async fn list_agents(&self, query: Option<QueryOptions>) -> Result<Vec<String>> {
        self.adapter.load_agents(query.as_ref()).await
    }

    pub async fn update_agent(&self, agent_id: &str, data: UpdateAgentData) -> Result<AgentOf<A>> {
        let mut agent = self.find_agent(agent_id).await?;
        agent.update(data).await?;
        Ok(agent)
    }

    /// The provider's current config for the agent.
    pub async fn refresh_agent(&self, agent_id: &str) -> Result<AgentConfig> {
        let mut agent = self.find_agent(agent_id).await?;
        agent.refresh().await?;
        Ok(agent.config().clone())
    }

    /// Rebuild an agent from its persisted form with a fresh context.
    pub async fn revive(&self, serialized: SerializedAgent) -> Result<AgentOf<A>> {
        let engine = self.create_agent_engine(&serialized.agent_id).await?;
        let context = self.adapter.create_agent_context(&serialized.agent_id).await?;
        Ok(Agent::new(engine, serialized.agent_id, context, serialized.config))
    }
}

impl<A: AgencyAdapter> Resource for Agency<A> {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn on_mount<'a>(&'a self, options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let app = self.app()?;
            self.adapter.on_mount(&app, options).await
        })
    }
}

impl<A: AgencyAdapter> Reviver<SerializedAgent, AgentOf<A>> for Agency<A> {
    fn revive(&self, serialized: SerializedAgent) -> BoxFuture<'_, Result<AgentOf<A>>> {
        Box::pin(Agency::revive(self, serialized))
    }
}
