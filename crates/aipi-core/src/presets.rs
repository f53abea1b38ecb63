//! Stock registry presets.
//!
//! [`default_preset`] registers the persisters an [`AipiConfig`] asks for at
//! [`PRESET_PRIORITY`], low enough that anything registered explicitly at
//! the default priority wins.

use std::sync::Arc;

use log::debug;

use crate::config::{AipiConfig, StorageKind};
use crate::errors::{AipiError, Result};
use crate::fs_persister::{FileSystemStorage, JsonFilePersister};
use crate::memory_persister::MemoryPersister;
use crate::persister::{JsonPersister, Persister};
use crate::registry::Registry;

pub const PRESET_PRIORITY: i32 = 50;

/// Subdirectory of `storage.base_dir` holding JSON documents.
pub const DOCUMENTS_DIR: &str = "documents";
/// Subdirectory of `storage.base_dir` holding raw files.
pub const FILES_DIR: &str = "files";

/// Raw byte storage capability registered by the fs preset.
pub type FileStorage = dyn Persister<String, Vec<u8>>;

/// Preset registering a [`JsonPersister`] (and, for `fs` storage, a
/// [`FileStorage`]) according to `config.storage`.
///
/// # Example
///
/// ```rust
/// use aipi_core::config::AipiConfig;
/// use aipi_core::presets::default_preset;
/// use aipi_core::registry::Registry;
///
/// let registry = Registry::new();
/// registry.preset(default_preset(&AipiConfig::default()));
/// ```
pub fn default_preset(config: &AipiConfig) -> impl FnOnce(&Registry) -> Result<()> + Send + 'static {
    let storage = config.storage.clone();
    move |registry: &Registry| {
        match storage.kind {
            StorageKind::Memory => {
                debug!("default preset: in-memory persister");
                registry.use_with_priority::<JsonPersister>(Arc::new(MemoryPersister::json()), PRESET_PRIORITY);
            }
            StorageKind::Fs => {
                let base_dir = storage
                    .base_dir
                    .filter(|dir| !dir.as_os_str().is_empty())
                    .ok_or_else(|| AipiError::type_error("storage.base_dir is required for fs storage"))?;
                debug!("default preset: file persisters under {}", base_dir.display());
                registry
                    .use_with_priority::<JsonPersister>(
                        Arc::new(JsonFilePersister::new(base_dir.join(DOCUMENTS_DIR))),
                        PRESET_PRIORITY,
                    )
                    .use_with_priority::<FileStorage>(
                        Arc::new(FileSystemStorage::new(base_dir.join(FILES_DIR))),
                        PRESET_PRIORITY,
                    );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSection;
    use crate::persister::{PersisterKey, SaveOptions};
    use crate::registry::BootstrapOptions;
    use crate::resource::Resource;
    use serde_json::json;

    fn fs_config(dir: &std::path::Path) -> AipiConfig {
        AipiConfig {
            storage: StorageSection {
                kind: StorageKind::Fs,
                base_dir: Some(dir.to_path_buf()),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn memory_preset_registers_a_json_persister() {
        let registry = Registry::new();
        registry.preset(default_preset(&AipiConfig::default()));
        let app = registry.bootstrap(BootstrapOptions::default()).await.unwrap();

        let persister = app.require::<JsonPersister>().unwrap();
        assert!(persister.mounted());
        assert!(app.get::<FileStorage>().is_none());

        let key = PersisterKey::untagged("chat", "c1");
        persister.save(&key, json!({"ok": true}), SaveOptions::default()).await.unwrap();
        assert_eq!(persister.load(&key).await.unwrap(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn fs_preset_writes_under_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        registry.preset(default_preset(&fs_config(dir.path())));
        let app = registry.bootstrap(BootstrapOptions::default()).await.unwrap();

        let documents = app.require::<JsonPersister>().unwrap();
        documents
            .save(&PersisterKey::untagged("agent", "a1"), json!(1), SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path().join(DOCUMENTS_DIR)).unwrap().count(), 1);

        let files = app.require::<FileStorage>().unwrap();
        files
            .save(&"notes.txt".to_string(), b"hi".to_vec(), SaveOptions::default())
            .await
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join(FILES_DIR).join("notes.txt")).unwrap(), b"hi");
    }

    #[tokio::test]
    async fn explicit_registrations_outrank_the_preset() {
        let registry = Registry::new();
        let mine = Arc::new(MemoryPersister::json());
        registry.use_resource::<JsonPersister>(mine.clone());
        registry.preset(default_preset(&AipiConfig::default()));
        let app = registry.bootstrap(BootstrapOptions::default()).await.unwrap();

        assert_eq!(app.get_all::<JsonPersister>().len(), 2);
        assert_eq!(app.require::<JsonPersister>().unwrap().id(), mine.id());
    }

    #[tokio::test]
    async fn fs_preset_without_base_dir_fails_bootstrap() {
        let config = AipiConfig {
            storage: StorageSection {
                kind: StorageKind::Fs,
                base_dir: None,
            },
            ..Default::default()
        };
        let registry = Registry::new();
        registry.preset(default_preset(&config));
        let err = registry.bootstrap(BootstrapOptions::default()).await.err().unwrap();
        assert!(err.to_string().contains("storage.base_dir"));
    }
}
