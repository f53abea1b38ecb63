//! ChatAgency — a persister-backed [`AgencyAdapter`] over any [`ChatAdapter`].
//!
//! Agents are plain records (`SerializedAgent`) stored under
//! `PersisterKey::untagged("agent", id)`. Each agent's chats come from a
//! caller-supplied factory and, unless `persist_chats` is off, are persisted
//! through the same store under the tags `["agent", <agent id>]`.

use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::agency::{AgencyAdapter, CreateAgentInput, CreateAgentResult, LoadAgentResult};
use crate::agent::{Agent, AgentConfig, SerializedAgent, UpdateAgentData};
use crate::chats::{ChatAdapter, Chats};
use crate::config::AipiConfig;
use crate::errors::Result;
use crate::messages::QueryOptions;
use crate::persister::{JsonPersister, Persister, PersisterKey, SaveOptions};
use crate::resource::BoxFuture;

/// Persister key namespace for agents.
pub const AGENT_KEY_KIND: &str = "agent";

/// Builds the (unconfigured) chats of one agent.
pub type ChatsFactory<CA> = Box<dyn Fn(&str) -> Chats<CA> + Send + Sync>;

pub struct ChatAgencyConfig<CA: ChatAdapter> {
    pub persister: Arc<JsonPersister>,
    pub chats: ChatsFactory<CA>,
    /// Persist agent chats in `persister`. Defaults to `true`.
    pub persist_chats: bool,
}

impl<CA: ChatAdapter> ChatAgencyConfig<CA> {
    pub fn new(
        persister: Arc<JsonPersister>,
        chats: impl Fn(&str) -> Chats<CA> + Send + Sync + 'static,
    ) -> Self {
        Self {
            persister,
            chats: Box::new(chats),
            persist_chats: true,
        }
    }

    /// Like [`new`](Self::new), taking `persist_chats` from `[agency]`.
    pub fn from_config(
        config: &AipiConfig,
        persister: Arc<JsonPersister>,
        chats: impl Fn(&str) -> Chats<CA> + Send + Sync + 'static,
    ) -> Self {
        Self::new(persister, chats).with_persist_chats(config.agency.persist_chats)
    }

    pub fn with_persist_chats(mut self, persist_chats: bool) -> Self {
        self.persist_chats = persist_chats;
        self
    }
}

pub struct ChatAgency<CA: ChatAdapter> {
    config: ChatAgencyConfig<CA>,
}

impl<CA: ChatAdapter> ChatAgency<CA> {
    pub fn new(config: ChatAgencyConfig<CA>) -> Self {
        Self { config }
    }

    pub fn persister(&self) -> &Arc<JsonPersister> {
        &self.config.persister
    }

    /// Tags scoping an agent's chats.
    pub fn persister_tags(agent_id: &str) -> Vec<String> {
        vec![AGENT_KEY_KIND.to_string(), agent_id.to_string()]
    }

    fn agent_key(agent_id: &str) -> PersisterKey {
        PersisterKey::untagged(AGENT_KEY_KIND, agent_id)
    }

    async fn save_agent(&self, agent_id: &str, config: AgentConfig) -> Result<()> {
        let record = SerializedAgent {
            agent_id: agent_id.to_string(),
            config,
        };
        self.config
            .persister
            .save(
                &Self::agent_key(agent_id),
                serde_json::to_value(record)?,
                SaveOptions::overwrite(),
            )
            .await
    }

    async fn read_agent(&self, agent_id: &str) -> Result<Option<SerializedAgent>> {
        match self.config.persister.load(&Self::agent_key(agent_id)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

impl<CA: ChatAdapter> AgencyAdapter for ChatAgency<CA> {
    type Context = ();
    type Chats = CA;

    fn create_agent<'a>(&'a self, input: &'a CreateAgentInput) -> BoxFuture<'a, Result<CreateAgentResult<()>>> {
        Box::pin(async move {
            let agent_id = Uuid::new_v4().to_string();
            let config = AgentConfig::default().merged(&input.config);
            self.save_agent(&agent_id, config.clone()).await?;
            Ok(CreateAgentResult {
                agent_id,
                config,
                context: (),
            })
        })
    }

    fn create_agent_context<'a>(&'a self, _agent_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn load_agent<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Option<LoadAgentResult<()>>>> {
        Box::pin(async move {
            Ok(self.read_agent(agent_id).await?.map(|record| LoadAgentResult {
                config: record.config,
                context: (),
            }))
        })
    }

    fn alter_agent<'a>(
        &'a self,
        agent: &'a Agent<(), CA::Context>,
        data: &'a UpdateAgentData,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut config = agent.config().clone();
            if let Some(patch) = &data.config {
                config.apply(patch);
            }
            self.save_agent(agent.id(), config).await
        })
    }

    fn delete_agent<'a>(&'a self, agent: &'a Agent<(), CA::Context>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.config.persister.delete(&Self::agent_key(agent.id())).await })
    }

    fn load_agents<'a>(&'a self, query: Option<&'a QueryOptions>) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let ids: Vec<String> = self
                .config
                .persister
                .keys()
                .await?
                .into_iter()
                .filter(|key| key.is_in::<&str>(AGENT_KEY_KIND, &[]))
                .filter_map(|key| match key.value {
                    Value::String(id) => Some(id),
                    _ => None,
                })
                .collect();
            Ok(match query {
                Some(query) => query.apply(&ids),
                None => ids,
            })
        })
    }

    /// The stored config; the agent's own when nothing is stored.
    fn refresh_agent<'a>(&'a self, agent: &'a Agent<(), CA::Context>) -> BoxFuture<'a, Result<AgentConfig>> {
        Box::pin(async move {
            Ok(match self.read_agent(agent.id()).await? {
                Some(record) => record.config,
                None => agent.config().clone(),
            })
        })
    }

    fn chats<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Chats<CA>>> {
        Box::pin(async move {
            let chats = (self.config.chats)(agent_id);
            if self.config.persist_chats {
                chats.set_persister(Some(Arc::clone(&self.config.persister)));
            }
            chats.set_persister_tags(Self::persister_tags(agent_id));
            Ok(chats)
        })
    }
}
