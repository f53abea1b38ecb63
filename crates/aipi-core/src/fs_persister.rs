//! Filesystem-backed persisters.
//!
//! - [`FileSystemStorage`] stores raw bytes under plain file names.
//! - [`JsonFilePersister`] stores JSON documents keyed by [`PersisterKey`];
//!   this is the one to hand to [`Chats`](crate::chats::Chats) or
//!   [`ChatAgency`](crate::chat_agency::ChatAgency).
//!
//! Both refuse to overwrite an existing file unless the caller passes
//! `overwrite: Some(true)`, and both offer no cross-process locking:
//! concurrent writers to the same key can interleave.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::errors::{AipiError, Result};
use crate::persister::{ClearOptions, Persister, PersisterKey, SaveOptions};
use crate::registry::BootstrapOptions;
use crate::resource::{BoxFuture, Resource, ResourceState};

const JSON_EXTENSION: &str = "json";

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn refuse_existing() -> AipiError {
    AipiError::not_supported("Save", "File already exists.")
}

fn refuse_clear() -> AipiError {
    AipiError::not_supported("Clear", "Use force to delete all files.")
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_optional(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Regular files directly under `dir`, sorted by name. A missing directory
/// lists as empty.
async fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

async fn write_file(dir: &Path, path: &Path, bytes: &[u8], overwrite: bool) -> Result<()> {
    if !overwrite && fs::try_exists(path).await? {
        return Err(refuse_existing());
    }
    fs::create_dir_all(dir).await?;
    fs::write(path, bytes).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// FileSystemStorage
// ---------------------------------------------------------------------------

/// Raw file storage: keys are file names under `base_dir`.
pub struct FileSystemStorage {
    state: ResourceState,
    base_dir: PathBuf,
}

impl FileSystemStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: ResourceState::new(),
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_file_name(name)?;
        Ok(self.base_dir.join(name))
    }
}

/// File names must stay inside the base directory.
fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(AipiError::type_error(format!("Invalid file name: {name:?}")));
    }
    Ok(())
}

impl Resource for FileSystemStorage {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn on_mount<'a>(&'a self, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            fs::create_dir_all(&self.base_dir).await?;
            Ok(())
        })
    }
}

impl Persister<String, Vec<u8>> for FileSystemStorage {
    fn save<'a>(
        &'a self,
        key: &'a String,
        value: Vec<u8>,
        options: SaveOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.path_for(key)?;
            write_file(&self.base_dir, &path, &value, options.overwrite == Some(true)).await
        })
    }

    fn load<'a>(&'a self, key: &'a String) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move { read_optional(&self.path_for(key)?).await })
    }

    fn delete<'a>(&'a self, key: &'a String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { remove_optional(&self.path_for(key)?).await })
    }

    fn clear(&self, options: ClearOptions) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !options.force {
                return Err(refuse_clear());
            }
            for path in list_files(&self.base_dir).await? {
                remove_optional(&path).await?;
            }
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            Ok(list_files(&self.base_dir)
                .await?
                .iter()
                .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(String::from))
                .collect())
        })
    }

    fn has<'a>(&'a self, key: &'a String) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(fs::try_exists(self.path_for(key)?).await?) })
    }
}

// ---------------------------------------------------------------------------
// JsonFilePersister
// ---------------------------------------------------------------------------

/// On-disk document: the key is stored next to the value so listing can
/// recover keys from hashed file names.
#[derive(Debug, Serialize, Deserialize)]
struct Document {
    key: PersisterKey,
    value: Value,
}

/// JSON document store keyed by [`PersisterKey`].
///
/// Each entry lives in `<base_dir>/<sha256(fingerprint)>.json`.
pub struct JsonFilePersister {
    state: ResourceState,
    base_dir: PathBuf,
}

impl JsonFilePersister {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            state: ResourceState::new(),
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, key: &PersisterKey) -> PathBuf {
        let digest = Sha256::digest(key.fingerprint().as_bytes());
        self.base_dir
            .join(format!("{digest:x}"))
            .with_extension(JSON_EXTENSION)
    }

    async fn documents(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for path in list_files(&self.base_dir).await? {
            if path.extension().and_then(|e| e.to_str()) != Some(JSON_EXTENSION) {
                continue;
            }
            if let Some(bytes) = read_optional(&path).await? {
                documents.push(serde_json::from_slice::<Document>(&bytes)?);
            }
        }
        Ok(documents)
    }
}

impl Resource for JsonFilePersister {
    fn state(&self) -> &ResourceState {
        &self.state
    }

    fn on_mount<'a>(&'a self, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            fs::create_dir_all(&self.base_dir).await?;
            Ok(())
        })
    }
}

impl Persister<PersisterKey, Value> for JsonFilePersister {
    fn save<'a>(
        &'a self,
        key: &'a PersisterKey,
        value: Value,
        options: SaveOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let document = Document {
                key: key.clone(),
                value,
            };
            let bytes = serde_json::to_vec_pretty(&document)?;
            write_file(
                &self.base_dir,
                &self.path_for(key),
                &bytes,
                options.overwrite == Some(true),
            )
            .await
        })
    }

    fn load<'a>(&'a self, key: &'a PersisterKey) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            match read_optional(&self.path_for(key)).await? {
                Some(bytes) => Ok(Some(serde_json::from_slice::<Document>(&bytes)?.value)),
                None => Ok(None),
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a PersisterKey) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { remove_optional(&self.path_for(key)).await })
    }

    fn clear(&self, options: ClearOptions) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !options.force {
                return Err(refuse_clear());
            }
            for path in list_files(&self.base_dir).await? {
                if path.extension().and_then(|e| e.to_str()) == Some(JSON_EXTENSION) {
                    remove_optional(&path).await?;
                }
            }
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<PersisterKey>>> {
        Box::pin(async move { Ok(self.documents().await?.into_iter().map(|d| d.key).collect()) })
    }

    fn entries(&self) -> BoxFuture<'_, Result<Vec<(PersisterKey, Value)>>> {
        Box::pin(async move {
            Ok(self
                .documents()
                .await?
                .into_iter()
                .map(|d| (d.key, d.value))
                .collect())
        })
    }

    fn has<'a>(&'a self, key: &'a PersisterKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(fs::try_exists(self.path_for(key)).await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---------------------------------------------------------------
    // FileSystemStorage
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn storage_refuses_overwrite_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        let name = "notes.txt".to_string();

        storage.save(&name, b"one".to_vec(), SaveOptions::default()).await.unwrap();
        let err = storage
            .save(&name, b"two".to_vec(), SaveOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Save not supported. File already exists.");
        assert_eq!(storage.load(&name).await.unwrap(), Some(b"one".to_vec()));

        storage.save(&name, b"two".to_vec(), SaveOptions::overwrite()).await.unwrap();
        assert_eq!(storage.load(&name).await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn storage_missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        assert_eq!(storage.load(&"nope".to_string()).await.unwrap(), None);
        assert!(!storage.has(&"nope".to_string()).await.unwrap());
        storage.delete(&"nope".to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn storage_lists_and_clears_with_force() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path().join("nested"));
        assert!(storage.keys().await.unwrap().is_empty());

        for name in ["b.txt", "a.txt"] {
            storage
                .save(&name.to_string(), name.as_bytes().to_vec(), SaveOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(storage.keys().await.unwrap(), vec!["a.txt", "b.txt"]);
        assert_eq!(storage.size().await.unwrap(), 2);

        let err = storage.clear(ClearOptions::default()).await.unwrap_err();
        assert!(err.is_not_supported());
        assert_eq!(storage.size().await.unwrap(), 2);

        storage.clear(ClearOptions::force()).await.unwrap();
        assert_eq!(storage.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn storage_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        for bad in ["", "..", "../x", "a/b"] {
            let err = storage
                .save(&bad.to_string(), Vec::new(), SaveOptions::default())
                .await
                .unwrap_err();
            assert!(err.has_tag(&crate::errors::ErrorTag::TypeError), "{bad}");
        }
    }

    // ---------------------------------------------------------------
    // JsonFilePersister
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn json_round_trips_values_by_key_content() {
        let dir = tempfile::tempdir().unwrap();
        let persister = JsonFilePersister::new(dir.path());
        let key = PersisterKey::new("chat", "c1", &["agent", "a1"]);
        let value = json!({"chatId": "c1", "snapshot": {"messages": []}});

        persister.save(&key, value.clone(), SaveOptions::default()).await.unwrap();

        let same = PersisterKey::new("chat", "c1", &["agent", "a1"]);
        assert_eq!(persister.load(&same).await.unwrap(), Some(value));
        assert!(persister.has(&same).await.unwrap());
        assert_eq!(
            persister.load(&PersisterKey::untagged("chat", "c1")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn json_keys_are_recovered_from_documents() {
        let dir = tempfile::tempdir().unwrap();
        let persister = JsonFilePersister::new(dir.path());
        let chat = PersisterKey::untagged("chat", "c1");
        let agent = PersisterKey::untagged("agent", "a1");
        persister.save(&chat, json!(1), SaveOptions::default()).await.unwrap();
        persister.save(&agent, json!(2), SaveOptions::default()).await.unwrap();

        let keys = persister.keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&chat));
        assert!(keys.contains(&agent));

        let mut values = persister.values().await.unwrap();
        values.sort_by_key(|v| v.as_i64());
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn json_overwrite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let persister = JsonFilePersister::new(dir.path());
        let key = PersisterKey::untagged("agent", "a1");

        persister.save(&key, json!("v1"), SaveOptions::default()).await.unwrap();
        assert!(persister
            .save(&key, json!("v2"), SaveOptions::default())
            .await
            .unwrap_err()
            .is_not_supported());
        persister.save(&key, json!("v2"), SaveOptions::overwrite()).await.unwrap();
        assert_eq!(persister.load(&key).await.unwrap(), Some(json!("v2")));

        persister.delete(&key).await.unwrap();
        assert_eq!(persister.load(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn json_mount_creates_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("store");
        let app = crate::registry::Registry::new()
            .bootstrap(BootstrapOptions::default())
            .await
            .unwrap();
        let persister = JsonFilePersister::new(&base);
        app.mount(&persister).await.unwrap();
        assert!(base.is_dir());
    }
}
