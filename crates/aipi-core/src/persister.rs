//! Persister — the key/value store contract used for durable state.
//!
//! Chats and agencies never assume a backing store; they talk to a
//! [`Persister`] through the [`JsonPersister`] alias, keyed by
//! [`PersisterKey`]s so several logical namespaces ("chat", "agent", ...)
//! can share one physical store.
//!
//! # Design
//!
//! - Keys are compared by content, never identity: two `PersisterKey`s with
//!   equal `type`/`value`/`tags` address the same entry in every
//!   implementation. [`PersisterKey::fingerprint`] is the canonical form.
//! - The overwrite default is per implementation and documented on each
//!   one. `clear` always requires `force`.
//!
//! # Connections
//!
//! - [`MemoryPersister`](crate::memory_persister::MemoryPersister),
//!   [`FileSystemStorage`](crate::fs_persister::FileSystemStorage) and
//!   [`JsonFilePersister`](crate::fs_persister::JsonFilePersister) implement
//!   the trait.
//! - [`Chats`](crate::chats::Chats) persists [`SerializedChat`](crate::chat::SerializedChat)s
//!   and [`ChatAgency`](crate::chat_agency::ChatAgency) persists agent configs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;
use crate::resource::{BoxFuture, Resource};

/// Prefix applied to every tag by [`PersisterKey::new`].
pub const TAG_PREFIX: &str = "$$";

/// The persister shape used by chats and agencies.
pub type JsonPersister = dyn Persister<PersisterKey, Value>;

// ---------------------------------------------------------------------------
// Keys & options
// ---------------------------------------------------------------------------

/// Structured persister key: `{type, value, tags}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersisterKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: Value,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl PersisterKey {
    /// Build a key, prefixing each tag with `$$`.
    pub fn new<S: AsRef<str>>(kind: &str, value: impl Into<Value>, tags: &[S]) -> Self {
        Self {
            kind: kind.to_string(),
            value: value.into(),
            tags: prefix_tags(tags),
        }
    }

    /// Key without tags.
    pub fn untagged(kind: &str, value: impl Into<Value>) -> Self {
        Self::new::<&str>(kind, value, &[])
    }

    /// Canonical string form. Object keys serialize sorted, so equal keys
    /// always produce equal fingerprints.
    pub fn fingerprint(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Whether this key belongs to the `kind` namespace under exactly the
    /// given (unprefixed) tags.
    pub fn is_in<S: AsRef<str>>(&self, kind: &str, tags: &[S]) -> bool {
        self.kind == kind && self.tags == prefix_tags(tags)
    }

    /// The key's value as a string id, if it is one.
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_str()
    }
}

fn prefix_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    tags.iter()
        .map(|t| format!("{TAG_PREFIX}{}", t.as_ref()))
        .collect()
}

/// Options for [`Persister::save`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveOptions {
    /// `None` means "use the implementation's default".
    pub overwrite: Option<bool>,
}

impl SaveOptions {
    pub fn overwrite() -> Self {
        Self {
            overwrite: Some(true),
        }
    }

    pub fn no_overwrite() -> Self {
        Self {
            overwrite: Some(false),
        }
    }
}

/// Options for [`Persister::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOptions {
    /// Must be `true` or `clear` refuses to run.
    pub force: bool,
}

impl ClearOptions {
    pub fn force() -> Self {
        Self { force: true }
    }
}

// ---------------------------------------------------------------------------
// Persister
// ---------------------------------------------------------------------------

/// Async key/value store.
///
/// Only `save`, `load`, `delete`, `clear` and `keys` are required; the
/// remaining operations default to combinations of those.
pub trait Persister<K, V>: Resource
where
    K: Send + Sync,
    V: Send,
{
    fn save<'a>(&'a self, key: &'a K, value: V, options: SaveOptions) -> BoxFuture<'a, Result<()>>;

    fn load<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<Option<V>>>;

    fn delete<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<()>>;

    fn clear(&self, options: ClearOptions) -> BoxFuture<'_, Result<()>>;

    fn keys(&self) -> BoxFuture<'_, Result<Vec<K>>>;

    fn values(&self) -> BoxFuture<'_, Result<Vec<V>>> {
        Box::pin(async move {
            Ok(self
                .entries()
                .await?
                .into_iter()
                .map(|(_, value)| value)
                .collect())
        })
    }

    fn entries(&self) -> BoxFuture<'_, Result<Vec<(K, V)>>> {
        Box::pin(async move {
            let mut entries = Vec::new();
            for key in self.keys().await? {
                if let Some(value) = self.load(&key).await? {
                    entries.push((key, value));
                }
            }
            Ok(entries)
        })
    }

    fn size(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move { Ok(self.keys().await?.len()) })
    }

    fn has<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.load(key).await?.is_some()) })
    }
}

// ---------------------------------------------------------------------------
// Serialize / revive
// ---------------------------------------------------------------------------

/// Something that can be flattened into a persistable form.
pub trait Persistable {
    type Serialized;

    fn serialize(&self) -> Self::Serialized;
}

/// Rebuilds live objects from their persisted form.
pub trait Reviver<S, T> {
    fn revive(&self, serialized: S) -> BoxFuture<'_, Result<T>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_prefixes_tags() {
        let key = PersisterKey::new("chat", "abc", &["agent", "a1"]);
        assert_eq!(key.kind, "chat");
        assert_eq!(key.value, json!("abc"));
        assert_eq!(key.tags, vec!["$$agent", "$$a1"]);
    }

    #[test]
    fn key_serializes_kind_as_type() {
        let key = PersisterKey::untagged("agent", "x");
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, json!({"type": "agent", "value": "x", "tags": []}));
    }

    #[test]
    fn equal_keys_share_a_fingerprint() {
        let a = PersisterKey::new("chat", json!({"b": 1, "a": 2}), &["t"]);
        let b = PersisterKey::new("chat", json!({"a": 2, "b": 1}), &["t"]);
        assert_eq!(a.fingerprint(), b.fingerprint());

        let other_tags = PersisterKey::new("chat", json!({"a": 2, "b": 1}), &["u"]);
        assert_ne!(a.fingerprint(), other_tags.fingerprint());
    }

    #[test]
    fn is_in_matches_kind_and_exact_tags() {
        let key = PersisterKey::new("chat", "c1", &["agent", "a1"]);
        assert!(key.is_in("chat", &["agent", "a1"]));
        assert!(!key.is_in("chat", &["agent"]));
        assert!(!key.is_in("agent", &["agent", "a1"]));
    }

    #[test]
    fn save_options_helpers() {
        assert_eq!(SaveOptions::default().overwrite, None);
        assert_eq!(SaveOptions::overwrite().overwrite, Some(true));
        assert_eq!(SaveOptions::no_overwrite().overwrite, Some(false));
        assert!(ClearOptions::force().force);
        assert!(!ClearOptions::default().force);
    }
}
