//! Registry — priority-ordered, capability-keyed resource container.
//!
//! Resources are registered under a *capability key*: the type they are
//! registered as, usually a trait object such as
//! `dyn Persister<PersisterKey, Value>`. Several resources can share a key;
//! lookups return them by descending priority, with insertion order kept for
//! ties.
//!
//! # Design
//!
//! - **Explicit container.** There is no process-wide instance; build a
//!   [`Registry`], configure it, then [`bootstrap`](Registry::bootstrap) it
//!   into an [`App`]. Tests construct isolated registries freely.
//! - **Typed keys, checked downcast.** Buckets are keyed by the capability's
//!   `TypeId`; each entry stores the `Arc<C>` behind `dyn Any` and lookups
//!   filter with a downcast, so a lookup can never return a value of the
//!   wrong type.
//! - **Interior mutability.** All methods take `&self`, so resources can
//!   register further resources through `app.registry()` at runtime. The
//!   locks are never held across an `.await`.
//!
//! # Connections
//!
//! - Owned by [`App`] after bootstrap.
//! - Mounts [`Resource`]s; presets such as
//!   [`default_preset`](crate::presets::default_preset) register more.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use futures::future::try_join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::App;
use crate::errors::{AipiError, Result};
use crate::resource::{short_type_name, BoxFuture, Resource};

/// Priority used by [`Registry::use_resource`].
pub const DEFAULT_PRIORITY: i32 = 100;

// ---------------------------------------------------------------------------
// BootstrapOptions
// ---------------------------------------------------------------------------

/// Options passed to every resource's `on_mount` during bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapOptions {
    /// Log the registry dump after bootstrap. Also switches the app into
    /// dev mode, enabling [`App::log_dev`].
    #[serde(default)]
    pub print_registry: bool,
    /// Free-form options for resources that need more than the core knows.
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

type MountFn = Box<dyn Fn(App, BootstrapOptions) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A preset runs once during bootstrap and may register more resources.
pub type Preset = Box<dyn FnOnce(&Registry) -> Result<()> + Send>;

struct Entry {
    /// `Arc<C>` for the bucket's capability `C`.
    handle: Box<dyn Any + Send + Sync>,
    id: String,
    name: String,
    priority: i32,
    mount: MountFn,
}

struct Bucket {
    key: TypeId,
    label: String,
    entries: Vec<Entry>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Capability-keyed resource container.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use aipi_core::memory_persister::MemoryPersister;
/// use aipi_core::persister::JsonPersister;
/// use aipi_core::registry::Registry;
///
/// let registry = Registry::new();
/// registry.use_with_priority::<JsonPersister>(Arc::new(MemoryPersister::json()), 10);
/// assert!(registry.find::<JsonPersister>().is_some());
/// ```
pub struct Registry {
    buckets: Mutex<Vec<Bucket>>,
    presets: Mutex<Vec<Preset>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(Vec::new()),
            presets: Mutex::new(Vec::new()),
        }
    }

    // -- Registration --

    /// Register `resource` under capability `C` at [`DEFAULT_PRIORITY`].
    pub fn use_resource<C>(&self, resource: Arc<C>) -> &Self
    where
        C: Resource + ?Sized + 'static,
    {
        self.use_with_priority(resource, DEFAULT_PRIORITY)
    }

    /// Register `resource` under capability `C`. Earlier registrations under
    /// the same capability are kept; higher priorities sort first.
    pub fn use_with_priority<C>(&self, resource: Arc<C>, priority: i32) -> &Self
    where
        C: Resource + ?Sized + 'static,
    {
        let key = TypeId::of::<C>();
        let id = resource.id().to_string();
        let name = resource.name();

        let mount_target = Arc::clone(&resource);
        let mount: MountFn = Box::new(move |app, options| {
            let target = Arc::clone(&mount_target);
            Box::pin(async move { target.mount(&app, &options).await })
        });

        let entry = Entry {
            handle: Box::new(resource),
            id,
            name,
            priority,
            mount,
        };

        let mut buckets = self.buckets.lock().unwrap();
        let bucket = match buckets.iter().position(|b| b.key == key) {
            Some(index) => &mut buckets[index],
            None => {
                buckets.push(Bucket {
                    key,
                    label: short_type_name(std::any::type_name::<C>()),
                    entries: Vec::new(),
                });
                let last = buckets.len() - 1;
                &mut buckets[last]
            }
        };
        bucket.entries.push(entry);
        // Stable sort keeps insertion order for equal priorities.
        bucket.entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    /// Register the resource built by `factory` only when `condition` holds.
    pub fn use_if<C, F>(&self, condition: bool, factory: F, priority: i32) -> &Self
    where
        C: Resource + ?Sized + 'static,
        F: FnOnce() -> Arc<C>,
    {
        if condition {
            self.use_with_priority(factory(), priority);
        }
        self
    }

    /// Queue a preset to run during bootstrap, after the initial mount.
    pub fn preset(&self, preset: impl FnOnce(&Registry) -> Result<()> + Send + 'static) -> &Self {
        self.presets.lock().unwrap().push(Box::new(preset));
        self
    }

    /// Drop every registration (presets are kept).
    pub fn clear(&self) {
        self.buckets.lock().unwrap().clear();
    }

    // -- Lookup --

    /// All resources registered under `C`, highest priority first.
    pub fn find_all<C>(&self) -> Vec<Arc<C>>
    where
        C: ?Sized + 'static,
    {
        let key = TypeId::of::<C>();
        let buckets = self.buckets.lock().unwrap();
        buckets
            .iter()
            .filter(|b| b.key == key)
            .flat_map(|b| b.entries.iter())
            .filter_map(|e| e.handle.downcast_ref::<Arc<C>>().cloned())
            .collect()
    }

    /// The highest-priority resource registered under `C`.
    pub fn find<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + 'static,
    {
        self.find_all::<C>().into_iter().next()
    }

    /// Like [`find`](Registry::find) but fails with `ResourceNotFound`.
    pub fn require<C>(&self) -> Result<Arc<C>>
    where
        C: ?Sized + 'static,
    {
        self.find::<C>().ok_or_else(|| {
            AipiError::resource_not_found(&short_type_name(std::any::type_name::<C>()))
        })
    }

    /// Number of registrations across all capabilities.
    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Bootstrap --

    /// Mount every registered resource, run presets, mount whatever the
    /// presets registered, and hand back the [`App`].
    ///
    /// Mounting fans out concurrently: `on_mount` hooks must not rely on
    /// another resource having finished mounting. A resource registered
    /// under several capabilities is mounted once.
    pub async fn bootstrap(self, options: BootstrapOptions) -> Result<App> {
        let app = App::new(self, options);
        let registry = app.registry();
        let mut mounted = HashSet::new();

        registry.mount_pending(&app, &mut mounted).await?;

        let presets = std::mem::take(&mut *registry.presets.lock().unwrap());
        if !presets.is_empty() {
            debug!("running {} registry preset(s)", presets.len());
        }
        for preset in presets {
            preset(registry)?;
        }
        registry.mount_pending(&app, &mut mounted).await?;

        if app.options().print_registry {
            info!("{}", registry.print());
        }
        Ok(app)
    }

    async fn mount_pending(&self, app: &App, mounted: &mut HashSet<String>) -> Result<()> {
        let pending: Vec<_> = {
            let buckets = self.buckets.lock().unwrap();
            buckets
                .iter()
                .flat_map(|b| b.entries.iter())
                .filter(|e| mounted.insert(e.id.clone()))
                .map(|e| {
                    debug!("mounting {} <{}>", e.name, e.priority);
                    (e.mount)(app.clone(), app.options().clone())
                })
                .collect()
        };
        try_join_all(pending).await?;
        Ok(())
    }

    // -- Dump --

    /// Human-readable dump of every capability and its entries.
    pub fn print(&self) -> String {
        let buckets = self.buckets.lock().unwrap();
        let mut out = String::from("## aipi registry ##\n");
        for bucket in buckets.iter() {
            out.push_str(&format!("{}(s):\n", bucket.label));
            for entry in &bucket.entries {
                out.push_str(&format!("   {} <{}>\n", entry.name, entry.priority));
            }
        }
        out.push_str("## aipi end ##");
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Greeter: Resource {
        fn greet(&self) -> String;
    }

    struct Hello {
        state: ResourceState,
        word: &'static str,
        mounts: AtomicUsize,
    }

    impl Hello {
        fn new(word: &'static str) -> Arc<Self> {
            Arc::new(Self {
                state: ResourceState::new(),
                word,
                mounts: AtomicUsize::new(0),
            })
        }
    }

    impl Resource for Hello {
        fn state(&self) -> &ResourceState {
            &self.state
        }

        fn on_mount<'a>(&'a self, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                self.mounts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    impl Greeter for Hello {
        fn greet(&self) -> String {
            self.word.to_string()
        }
    }

    // ---------------------------------------------------------------
    // Priority ordering
    // ---------------------------------------------------------------

    #[test]
    fn find_returns_highest_priority() {
        let registry = Registry::new();
        registry.use_with_priority::<dyn Greeter>(Hello::new("low"), 10);
        registry.use_with_priority::<dyn Greeter>(Hello::new("high"), 90);

        assert_eq!(registry.find::<dyn Greeter>().unwrap().greet(), "high");
        let all: Vec<_> = registry
            .find_all::<dyn Greeter>()
            .iter()
            .map(|g| g.greet())
            .collect();
        assert_eq!(all, vec!["high", "low"]);
    }

    #[test]
    fn equal_priority_keeps_insertion_order() {
        let registry = Registry::new();
        registry
            .use_resource::<dyn Greeter>(Hello::new("first"))
            .use_resource::<dyn Greeter>(Hello::new("second"))
            .use_with_priority::<dyn Greeter>(Hello::new("top"), 200);

        let all: Vec<_> = registry
            .find_all::<dyn Greeter>()
            .iter()
            .map(|g| g.greet())
            .collect();
        assert_eq!(all, vec!["top", "first", "second"]);
    }

    #[test]
    fn capabilities_are_isolated() {
        let registry = Registry::new();
        registry.use_resource::<dyn Greeter>(Hello::new("dyn"));
        assert!(registry.find::<Hello>().is_none());

        registry.use_resource::<Hello>(Hello::new("concrete"));
        assert_eq!(registry.find::<Hello>().unwrap().greet(), "concrete");
        assert_eq!(registry.find_all::<dyn Greeter>().len(), 1);
    }

    #[test]
    fn require_missing_is_resource_not_found() {
        let registry = Registry::new();
        let err = registry.require::<dyn Greeter>().err().unwrap();
        assert_eq!(err.to_string(), "Resource Greeter not found");
        assert!(err.is_not_found());
    }

    #[test]
    fn use_if_respects_condition() {
        let registry = Registry::new();
        registry.use_if::<dyn Greeter, _>(false, || Hello::new("no"), DEFAULT_PRIORITY);
        assert!(registry.is_empty());
        registry.use_if::<dyn Greeter, _>(true, || Hello::new("yes"), DEFAULT_PRIORITY);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_drops_everything() {
        let registry = Registry::new();
        registry.use_resource::<dyn Greeter>(Hello::new("a"));
        registry.clear();
        assert!(registry.find::<dyn Greeter>().is_none());
    }

    // ---------------------------------------------------------------
    // Bootstrap
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn bootstrap_mounts_each_resource_once() {
        let registry = Registry::new();
        let hello = Hello::new("hi");
        registry.use_resource::<dyn Greeter>(hello.clone());
        registry.use_resource::<Hello>(hello.clone());

        let app = registry.bootstrap(BootstrapOptions::default()).await.unwrap();
        assert!(hello.mounted());
        assert_eq!(hello.mounts.load(Ordering::SeqCst), 1);
        assert!(hello.app().is_ok());
        assert_eq!(app.get_all::<dyn Greeter>().len(), 1);
    }

    #[tokio::test]
    async fn presets_run_and_their_resources_get_mounted() {
        let registry = Registry::new();
        let late = Hello::new("late");
        let handle = late.clone();
        registry.preset(move |r| {
            r.use_with_priority::<dyn Greeter>(handle, 50);
            Ok(())
        });

        let app = registry.bootstrap(BootstrapOptions::default()).await.unwrap();
        assert!(late.mounted());
        assert_eq!(app.require::<dyn Greeter>().unwrap().greet(), "late");
    }

    #[tokio::test]
    async fn failing_preset_fails_bootstrap() {
        let registry = Registry::new();
        registry.preset(|_| Err(AipiError::new("bad preset")));
        let err = registry.bootstrap(BootstrapOptions::default()).await.err().unwrap();
        assert_eq!(err.to_string(), "bad preset");
    }

    #[test]
    fn print_lists_capabilities_and_priorities() {
        let registry = Registry::new();
        registry.use_with_priority::<dyn Greeter>(Hello::new("a"), 7);
        let dump = registry.print();
        assert!(dump.starts_with("## aipi registry ##"));
        assert!(dump.contains("Greeter(s):"));
        assert!(dump.contains("   Hello <7>"));
        assert!(dump.ends_with("## aipi end ##"));
    }
}
