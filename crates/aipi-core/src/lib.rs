//! aipi-core: provider-agnostic core for conversational AI applications.
//!
//! A small registry wires resources (persisters, chat and agent providers,
//! schema validators) into an app; chats and agents run on top of whatever
//! provider adapter is plugged in, with optional persistence through any
//! key/value store.
//!
//! # Crate Organization
//!
//! - `errors` — `AipiError` and its tags
//! - `utils` — id generation and JSON deep-merge
//! - `resource` — `Resource` trait and mount state
//! - `registry` — capability-keyed `Registry`, bootstrap, presets
//! - `app` — the `App` handle and `Covers` dispatch
//! - `persister` — `Persister` contract, `PersisterKey`, serialize/revive traits
//! - `memory_persister`, `fs_persister` — stock persisters
//! - `messages` — messages, tools, tool matches, query options
//! - `chat` — `Chat` state machine and snapshots
//! - `chats` — `ChatAdapter` hooks and the `Chats` lifecycle resource
//! - `agent`, `agency` — agents, `AgencyAdapter` hooks, the `Agency` resource
//! - `chat_agency` — persister-backed agency over any chat adapter
//! - `schema_builder`, `json_schema`, `strict_schema` — schema pipelines
//! - `config`, `presets` — TOML configuration and the default preset
//! - `testing` — concrete fakes for tests

pub mod errors;
pub mod utils;

pub mod app;
pub mod registry;
pub mod resource;

pub mod fs_persister;
pub mod memory_persister;
pub mod persister;

pub mod chat;
pub mod chats;
pub mod messages;

pub mod agency;
pub mod agent;
pub mod chat_agency;

pub mod json_schema;
pub mod schema_builder;
pub mod strict_schema;

pub mod config;
pub mod presets;

pub mod testing;

pub use app::App;
pub use errors::{AipiError, Result};
pub use registry::Registry;
pub use resource::Resource;
