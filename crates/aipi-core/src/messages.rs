//! Conversation data types shared by chats, agents and adapters.
//!
//! All structs use camelCase on the wire (`textContent`, `toolMatches`,
//! `rawParams`, ...) so persisted chats stay readable by other tooling, and
//! optional fields are skipped when absent.
//!
//! # Key design decisions
//!
//! - [`Role`] serializes as a plain string; unknown roles round-trip through
//!   [`Role::Other`].
//! - [`ToolMatch::parse`] never fails: malformed tool-call arguments are
//!   contained in `parse_error` with the original payload in `raw_params`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---- Role ----

/// Author of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    User,
    System,
    Assistant,
    Other(String),
}

impl From<String> for Role {
    fn from(role: String) -> Self {
        match role.as_str() {
            "user" => Self::User,
            "system" => Self::System,
            "assistant" => Self::Assistant,
            _ => Self::Other(role),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::User => "user".into(),
            Role::System => "system".into(),
            Role::Assistant => "assistant".into(),
            Role::Other(other) => other,
        }
    }
}

// ---- Message ----

/// One message in a chat snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_content: Option<String>,
    /// Provider-shaped content (parts, blocks, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text_content: Some(text.into()),
            content: None,
            attachments: None,
            info: None,
            id: None,
            index: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }
}

// ---- Tool ----

/// A tool (function) a model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configure: Option<Value>,
    /// JSON Schema of the parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Tool {
    pub fn function(name: impl Into<String>) -> Self {
        Self {
            kind: "function".into(),
            name: name.into(),
            description: None,
            configure: None,
            schema: None,
            data: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

// ---- ToolMatch ----

/// A (possibly malformed) tool invocation requested by a model response.
///
/// If `parse_error` is set, `params` is not trustworthy and `raw_params`
/// holds the original payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMatch {
    pub tool: Tool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    /// Provider reference, e.g. a tool-call id.
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl ToolMatch {
    /// Parse the raw argument string a provider returned for a tool call.
    ///
    /// Empty arguments parse as `{}`. Malformed JSON never fails the call:
    /// `params` stays `None`, `raw_params` keeps the input and
    /// `parse_error` describes the problem.
    pub fn parse(tool: Tool, arguments: &str, index: Option<u32>) -> Self {
        let (params, raw_params, parse_error) = if arguments.trim().is_empty() {
            (Some(Value::Object(Map::new())), None, None)
        } else {
            match serde_json::from_str::<Value>(arguments) {
                Ok(params) => (Some(params), None, None),
                Err(e) => (None, Some(arguments.to_string()), Some(e.to_string())),
            }
        };
        Self {
            tool,
            params,
            raw_params,
            parse_error,
            index,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn is_valid(&self) -> bool {
        self.parse_error.is_none()
    }
}

// ---- Format ----

/// Requested response format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

// ---- QueryOptions ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Common paging/sorting options for list operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<SortOrder>,
}

impl QueryOptions {
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// Apply `offset`, then `limit`.
    pub fn apply<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let offset = self.offset.unwrap_or(0).min(items.len());
        let rest = &items[offset..];
        let limit = self.limit.unwrap_or(rest.len()).min(rest.len());
        rest[..limit].to_vec()
    }
}

// ---- ChatBuilder ----

/// Small helper for assembling message lists.
#[derive(Debug, Clone, Default)]
pub struct ChatBuilder {
    messages: Vec<Message>,
}

impl ChatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self {
            messages: messages.into_iter().collect(),
        }
    }

    pub fn add_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn build(self) -> Vec<Message> {
        self.messages
    }

    /// Keep only the present messages, in order.
    pub fn filter(messages: impl IntoIterator<Item = Option<Message>>) -> Vec<Message> {
        messages.into_iter().flatten().collect()
    }
}
