//! In-memory, content-addressed [`Persister`].
//!
//! Entries are keyed by the canonical JSON form of the key, so structurally
//! equal keys (e.g. two separately built [`PersisterKey`]s) address the same
//! entry. Overwrite defaults to `true`; only an explicit
//! `overwrite: Some(false)` refuses to replace an existing entry.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::errors::{AipiError, Result};
use crate::persister::{ClearOptions, Persister, PersisterKey, SaveOptions};
use crate::resource::{BoxFuture, Resource, ResourceState};

struct Slot<K, V> {
    seq: u64,
    key: K,
    value: V,
}

/// Map-backed persister. Safe to share across tasks; nothing survives the
/// process.
pub struct MemoryPersister<K = PersisterKey, V = Value> {
    state: ResourceState,
    slots: Mutex<HashMap<String, Slot<K, V>>>,
    next_seq: Mutex<u64>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> MemoryPersister<K, V> {
    pub fn new() -> Self {
        Self {
            state: ResourceState::new(),
            slots: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(0),
            _marker: PhantomData,
        }
    }
}

impl MemoryPersister<PersisterKey, Value> {
    /// The persister shape chats and agencies use.
    pub fn json() -> Self {
        Self::new()
    }
}

impl<K, V> Default for MemoryPersister<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn address<K: Serialize>(key: &K) -> Result<String> {
    Ok(serde_json::to_string(key)?)
}

impl<K, V> MemoryPersister<K, V>
where
    K: Clone,
    V: Clone,
{
    /// Entries in insertion order (a replaced entry keeps its position).
    fn ordered(&self) -> Vec<(K, V)> {
        let slots = self.slots.lock().unwrap();
        let mut ordered: Vec<_> = slots.values().collect();
        ordered.sort_by_key(|slot| slot.seq);
        ordered
            .into_iter()
            .map(|slot| (slot.key.clone(), slot.value.clone()))
            .collect()
    }
}

impl<K, V> Resource for MemoryPersister<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    fn state(&self) -> &ResourceState {
        &self.state
    }
}

impl<K, V> Persister<K, V> for MemoryPersister<K, V>
where
    K: Serialize + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn save<'a>(&'a self, key: &'a K, value: V, options: SaveOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let address = address(key)?;
            let mut slots = self.slots.lock().unwrap();
            if let Some(slot) = slots.get_mut(&address) {
                if options.overwrite == Some(false) {
                    return Err(AipiError::not_supported("Save", "Entry already exists."));
                }
                slot.value = value;
                return Ok(());
            }
            let seq = {
                let mut next = self.next_seq.lock().unwrap();
                *next += 1;
                *next
            };
            slots.insert(
                address,
                Slot {
                    seq,
                    key: key.clone(),
                    value,
                },
            );
            Ok(())
        })
    }

    fn load<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<Option<V>>> {
        Box::pin(async move {
            let address = address(key)?;
            let slots = self.slots.lock().unwrap();
            Ok(slots.get(&address).map(|slot| slot.value.clone()))
        })
    }

    fn delete<'a>(&'a self, key: &'a K) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let address = address(key)?;
            self.slots.lock().unwrap().remove(&address);
            Ok(())
        })
    }

    fn clear(&self, options: ClearOptions) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !options.force {
                return Err(AipiError::not_supported(
                    "Clear",
                    "Use force to clear all entries.",
                ));
            }
            self.slots.lock().unwrap().clear();
            Ok(())
        })
    }

    fn keys(&self) -> BoxFuture<'_, Result<Vec<K>>> {
        Box::pin(async move { Ok(self.ordered().into_iter().map(|(k, _)| k).collect()) })
    }

    fn values(&self) -> BoxFuture<'_, Result<Vec<V>>> {
        Box::pin(async move { Ok(self.ordered().into_iter().map(|(_, v)| v).collect()) })
    }

    fn entries(&self) -> BoxFuture<'_, Result<Vec<(K, V)>>> {
        Box::pin(async move { Ok(self.ordered()) })
    }

    fn size(&self) -> BoxFuture<'_, Result<usize>> {
        Box::pin(async move { Ok(self.slots.lock().unwrap().len()) })
    }
}
