//! AipiConfig — TOML configuration for bootstrapping an aipi app.
//!
//! Every section and field is optional; missing values take the defaults
//! documented on each field.
//!
//! ```toml
//! [bootstrap]
//! print_registry = true
//!
//! [chats]
//! auto_persist = true
//! persister_tags = ["tenant-a"]
//!
//! [storage]
//! kind = "fs"          # "memory" (default) or "fs"
//! base_dir = "./data"  # required for "fs"
//!
//! [agency]
//! persist_chats = true
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chats::ChatsConfig;
use crate::errors::{AipiError, Result};
use crate::registry::BootstrapOptions;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSection {
    /// Log the registry after bootstrap and enable dev logging.
    pub print_registry: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatsSection {
    /// Default `persist` for new chats. Defaults to `true`.
    pub auto_persist: bool,
    pub persister_tags: Vec<String>,
}

impl Default for ChatsSection {
    fn default() -> Self {
        Self {
            auto_persist: true,
            persister_tags: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Fs,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub kind: StorageKind,
    /// Root directory of the file-system persisters.
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgencySection {
    /// Persist agent chats in the agency's persister. Defaults to `true`.
    pub persist_chats: bool,
}

impl Default for AgencySection {
    fn default() -> Self {
        Self { persist_chats: true }
    }
}

// ---------------------------------------------------------------------------
// AipiConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AipiConfig {
    pub bootstrap: BootstrapSection,
    pub chats: ChatsSection,
    pub storage: StorageSection,
    pub agency: AgencySection,
}

impl AipiConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: AipiConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| AipiError::from(e).with_data(serde_json::json!({ "path": path })))?;
        Self::from_toml_str(&source)
    }

    /// Reject settings that would only fail later, at mount time.
    pub fn validate(&self) -> Result<()> {
        if self.storage.kind == StorageKind::Fs
            && self
                .storage
                .base_dir
                .as_ref()
                .map_or(true, |dir| dir.as_os_str().is_empty())
        {
            return Err(AipiError::type_error(
                "Invalid config: storage.base_dir is required when storage.kind = \"fs\"",
            ));
        }
        if self.chats.persister_tags.iter().any(|t| t.trim().is_empty()) {
            return Err(AipiError::type_error(
                "Invalid config: chats.persister_tags must not contain empty tags",
            ));
        }
        Ok(())
    }
}

impl From<&AipiConfig> for BootstrapOptions {
    fn from(config: &AipiConfig) -> Self {
        BootstrapOptions {
            print_registry: config.bootstrap.print_registry,
            ..Default::default()
        }
    }
}

/// No persister is set; pick one from the app's registry.
impl From<&AipiConfig> for ChatsConfig {
    fn from(config: &AipiConfig) -> Self {
        ChatsConfig {
            persister: None,
            persister_tags: config.chats.persister_tags.clone(),
            default_auto_persist: config.chats.auto_persist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorTag;
    use std::io::Write;

    #[test]
    fn empty_document_uses_defaults() {
        let config = AipiConfig::from_toml_str("").unwrap();
        assert_eq!(config, AipiConfig::default());
        assert!(config.chats.auto_persist);
        assert!(config.agency.persist_chats);
        assert_eq!(config.storage.kind, StorageKind::Memory);
    }

    #[test]
    fn parses_every_section() {
        let config = AipiConfig::from_toml_str(
            r#"
            [bootstrap]
            print_registry = true

            [chats]
            auto_persist = false
            persister_tags = ["tenant", "a"]

            [storage]
            kind = "fs"
            base_dir = "/var/lib/aipi"

            [agency]
            persist_chats = false
            "#,
        )
        .unwrap();

        assert!(config.bootstrap.print_registry);
        assert!(!config.chats.auto_persist);
        assert_eq!(config.chats.persister_tags, vec!["tenant", "a"]);
        assert_eq!(config.storage.kind, StorageKind::Fs);
        assert_eq!(config.storage.base_dir, Some(PathBuf::from("/var/lib/aipi")));
        assert!(!config.agency.persist_chats);
    }

    #[test]
    fn fs_storage_requires_base_dir() {
        let err = AipiConfig::from_toml_str("[storage]\nkind = \"fs\"\n").unwrap_err();
        assert!(err.has_tag(&ErrorTag::TypeError));
        assert!(err.to_string().contains("storage.base_dir"));

        let err = AipiConfig::from_toml_str("[storage]\nkind = \"fs\"\nbase_dir = \"\"\n").unwrap_err();
        assert!(err.to_string().contains("storage.base_dir"));
    }

    #[test]
    fn empty_tags_are_rejected() {
        let err = AipiConfig::from_toml_str("[chats]\npersister_tags = [\"ok\", \" \"]\n").unwrap_err();
        assert!(err.to_string().contains("persister_tags"));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(AipiConfig::from_toml_str("[storage\nkind = ").is_err());
        assert!(AipiConfig::from_toml_str("[storage]\nkind = \"s3\"\n").is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bootstrap]\nprint_registry = true").unwrap();
        let config = AipiConfig::from_file(file.path()).unwrap();
        assert!(config.bootstrap.print_registry);

        assert!(AipiConfig::from_file("/definitely/not/here.toml").is_err());
    }

    #[test]
    fn converts_into_runtime_options() {
        let config = AipiConfig::from_toml_str(
            "[bootstrap]\nprint_registry = true\n[chats]\nauto_persist = false\npersister_tags = [\"t\"]\n",
        )
        .unwrap();

        let options = BootstrapOptions::from(&config);
        assert!(options.print_registry);

        let chats = ChatsConfig::from(&config);
        assert!(chats.persister.is_none());
        assert!(!chats.default_auto_persist);
        assert_eq!(chats.persister_tags, vec!["t"]);
    }
}
