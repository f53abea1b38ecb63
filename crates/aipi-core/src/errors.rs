//! Error types for the aipi core.
//!
//! There is a single error root, [`AipiError`]. The taxonomy is expressed
//! through [`ErrorTag`]s rather than a deep enum hierarchy, so an error can
//! be both "not found" and something adapter-specific at the same time.
//!
//! Named constructors cover the conditions the core itself raises:
//!
//! | Constructor                         | Tag            | HTTP status |
//! |-------------------------------------|----------------|-------------|
//! | [`AipiError::not_found`]            | `not-found`    | 404         |
//! | [`AipiError::not_supported`]        | `not-supported`| 501         |
//! | [`AipiError::resource_not_found`]   | `not-found`    | 500         |
//! | [`AipiError::not_mounted`]          | —              | 500         |
//! | [`AipiError::already_mounted`]      | —              | 500         |
//! | [`AipiError::type_error`]           | `type-error`   | 500         |
//!
//! All types derive `Serialize` so errors can cross a JSON boundary
//! (an HTTP adapter, a log sink) without a separate DTO.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AipiError>;

// -- ErrorTag --

/// Classification tag attached to an [`AipiError`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorTag {
    NotFound,
    TypeError,
    NotSupported,
    /// Adapter-defined tag.
    #[serde(untagged)]
    Other(String),
}

impl ErrorTag {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NotFound => "not-found",
            Self::TypeError => "type-error",
            Self::NotSupported => "not-supported",
            Self::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- ErrorCause --

/// What caused an [`AipiError`]: either another `AipiError` or a foreign
/// error flattened to its message.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(untagged)]
pub enum ErrorCause {
    #[error(transparent)]
    Aipi(Box<AipiError>),
    #[error("{0}")]
    External(String),
}

// -- AipiError --

/// The crate-wide error.
///
/// Carries enough metadata for an outer HTTP layer to render a response
/// (`http_status`, `error_code`, `http_message`) without the core knowing
/// anything about HTTP.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct AipiError {
    pub message: String,
    #[source]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<ErrorCause>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<ErrorTag>,
    /// Set for failures that indicate a bug or an environment problem rather
    /// than a condition callers are expected to handle.
    pub unexpected: bool,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_message: Option<String>,
}

impl AipiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
            data: Value::Null,
            tags: Vec::new(),
            unexpected: false,
            http_status: 500,
            error_code: None,
            http_message: None,
        }
    }

    // -- Named constructors --

    /// `"{subject} not found"`, tagged `not-found`, HTTP 404.
    pub fn not_found(subject: &str) -> Self {
        Self::new(format!("{subject} not found"))
            .with_tag(ErrorTag::NotFound)
            .with_status(404)
    }

    /// A capability the adapter or persister does not offer.
    pub fn not_supported(subject: &str, message: &str) -> Self {
        let text = if message.is_empty() {
            format!("{subject} not supported.")
        } else {
            format!("{subject} not supported. {message}")
        };
        Self::new(text)
            .with_tag(ErrorTag::NotSupported)
            .with_status(501)
    }

    /// Registry resolution failure for a mandatory capability.
    pub fn resource_not_found(name: &str) -> Self {
        Self::new(format!("Resource {name} not found")).with_tag(ErrorTag::NotFound)
    }

    /// A resource's app was accessed before it was mounted.
    pub fn not_mounted() -> Self {
        Self::new("Not yet mounted")
    }

    /// A resource was mounted a second time.
    pub fn already_mounted() -> Self {
        Self::new("Resource already mounted")
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(message).with_tag(ErrorTag::TypeError)
    }

    // -- Builders --

    pub fn with_cause(mut self, cause: AipiError) -> Self {
        self.cause = Some(ErrorCause::Aipi(Box::new(cause)));
        self
    }

    pub fn with_external_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(ErrorCause::External(cause.to_string()));
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn with_tag(mut self, tag: ErrorTag) -> Self {
        self.add_tag(tag);
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    pub fn with_error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_http_message(mut self, message: impl Into<String>) -> Self {
        self.http_message = Some(message.into());
        self
    }

    pub fn into_unexpected(mut self) -> Self {
        self.unexpected = true;
        self
    }

    // -- Tags --

    pub fn add_tag(&mut self, tag: ErrorTag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    pub fn remove_tag(&mut self, tag: &ErrorTag) {
        self.tags.retain(|t| t != tag);
    }

    pub fn has_tag(&self, tag: &ErrorTag) -> bool {
        self.tags.contains(tag)
    }

    /// Whether the direct cause is itself an [`AipiError`].
    pub fn cause_is_aipi_error(&self) -> bool {
        matches!(self.cause, Some(ErrorCause::Aipi(_)))
    }

    pub fn is_not_found(&self) -> bool {
        self.has_tag(&ErrorTag::NotFound)
    }

    pub fn is_not_supported(&self) -> bool {
        self.has_tag(&ErrorTag::NotSupported)
    }
}

// -- Foreign error conversions --

impl From<std::io::Error> for AipiError {
    fn from(err: std::io::Error) -> Self {
        AipiError::new(format!("I/O error: {err}"))
            .with_external_cause(&err)
            .into_unexpected()
    }
}

impl From<serde_json::Error> for AipiError {
    fn from(err: serde_json::Error) -> Self {
        AipiError::type_error(format!("JSON error: {err}"))
            .with_external_cause(&err)
            .into_unexpected()
    }
}

impl From<toml::de::Error> for AipiError {
    fn from(err: toml::de::Error) -> Self {
        AipiError::type_error(format!("TOML error: {err}"))
            .with_external_cause(&err)
            .into_unexpected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn not_found_carries_tag_and_status() {
        let err = AipiError::not_found("chat");
        assert_eq!(err.to_string(), "chat not found");
        assert_eq!(err.http_status, 404);
        assert!(err.is_not_found());
        assert!(!err.is_not_supported());
    }

    #[test]
    fn not_supported_message_format() {
        let err = AipiError::not_supported("Save", "File already exists.");
        assert_eq!(err.to_string(), "Save not supported. File already exists.");
        assert!(err.is_not_supported());

        let bare = AipiError::not_supported("loadChats", "");
        assert_eq!(bare.to_string(), "loadChats not supported.");
    }

    #[test]
    fn resource_not_found_is_tagged_not_found() {
        let err = AipiError::resource_not_found("Persister");
        assert_eq!(err.to_string(), "Resource Persister not found");
        assert!(err.is_not_found());
        assert_eq!(err.http_status, 500);
    }

    #[test]
    fn tags_are_deduplicated_and_removable() {
        let mut err = AipiError::new("boom");
        err.add_tag(ErrorTag::TypeError);
        err.add_tag(ErrorTag::TypeError);
        err.add_tag(ErrorTag::Other("retry".into()));
        assert_eq!(err.tags.len(), 2);

        err.remove_tag(&ErrorTag::TypeError);
        assert!(!err.has_tag(&ErrorTag::TypeError));
        assert!(err.has_tag(&ErrorTag::Other("retry".into())));
    }

    #[test]
    fn cause_chain_is_exposed_as_source() {
        let inner = AipiError::not_found("agent");
        let outer = AipiError::new("lookup failed").with_cause(inner);
        assert!(outer.cause_is_aipi_error());
        let source = outer.source().unwrap();
        assert_eq!(source.to_string(), "agent not found");

        let foreign = AipiError::new("io").with_external_cause("disk full");
        assert!(!foreign.cause_is_aipi_error());
        assert_eq!(foreign.source().unwrap().to_string(), "disk full");
    }

    #[test]
    fn io_error_converts_as_unexpected() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "nope");
        let err: AipiError = io.into();
        assert!(err.unexpected);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn serializes_tags_in_kebab_case() {
        let err = AipiError::not_found("chat").with_tag(ErrorTag::Other("custom".into()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["tags"], serde_json::json!(["not-found", "custom"]));
        assert_eq!(json["http_status"], 404);
        assert!(json.get("cause").is_none());
        assert!(json.get("data").is_none());
    }
}
