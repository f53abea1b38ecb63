//! Resource — the base unit of mountable, app-aware functionality.
//!
//! Every component the registry hands out (persisters, chats, agencies,
//! validators, adapters) is a [`Resource`]. A resource is constructed
//! unmounted, mounted exactly once against an [`App`], and from then on can
//! reach the rest of the application through [`Resource::app`].
//!
//! # Design
//!
//! - **Explicit `Pin<Box<dyn Future>>`** (via [`BoxFuture`]) instead of
//!   `#[async_trait]`, so `Arc<dyn Resource>`-style trait objects stay
//!   object-safe with visible signatures.
//! - **Shared state in a struct.** Implementors embed a [`ResourceState`]
//!   and return it from [`Resource::state`]; the id, mount flag and app
//!   back-reference live there so the default `mount` can enforce the
//!   mount-once rule for everyone.
//! - **Weak back-reference.** The registry owns resources and resources
//!   point back at the app, so the back-reference is a [`WeakApp`] to avoid
//!   a reference cycle.
//!
//! # Connections
//!
//! - Mounted by [`Registry::bootstrap`](crate::registry::Registry::bootstrap)
//!   or standalone via [`App::mount`].
//! - [`Persister`](crate::persister::Persister),
//!   [`Chats`](crate::chats::Chats) and [`Agency`](crate::agency::Agency)
//!   are all resources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub use futures::future::BoxFuture;

use crate::app::{App, WeakApp};
use crate::errors::{AipiError, Result};
use crate::registry::BootstrapOptions;
use crate::utils::{create_id, DEFAULT_ID_LENGTH};

// ---------------------------------------------------------------------------
// ResourceState
// ---------------------------------------------------------------------------

/// Identity and mount state shared by every resource implementation.
pub struct ResourceState {
    id: String,
    mounted: AtomicBool,
    app: Mutex<Option<WeakApp>>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::with_id(create_id(DEFAULT_ID_LENGTH))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mounted: AtomicBool::new(false),
            app: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Bind the app and flip the mount flag. Fails on a second call.
    pub(crate) fn bind(&self, app: &App) -> Result<()> {
        if self.mounted.swap(true, Ordering::SeqCst) {
            return Err(AipiError::already_mounted());
        }
        self.feed(app);
        Ok(())
    }

    pub(crate) fn feed(&self, app: &App) {
        *self.app.lock().unwrap() = Some(app.downgrade());
    }

    pub(crate) fn app(&self) -> Result<App> {
        self.app
            .lock()
            .unwrap()
            .as_ref()
            .and_then(WeakApp::upgrade)
            .ok_or_else(AipiError::not_mounted)
    }
}

impl Default for ResourceState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceState")
            .field("id", &self.id)
            .field("mounted", &self.is_mounted())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A mountable, app-aware unit of functionality.
///
/// Implementors only need [`state`](Resource::state); override
/// [`on_mount`](Resource::on_mount) to run async initialization once the app
/// is available.
///
/// # Example
///
/// ```rust
/// use aipi_core::resource::{Resource, ResourceState};
///
/// struct Greeter {
///     state: ResourceState,
/// }
///
/// impl Resource for Greeter {
///     fn state(&self) -> &ResourceState {
///         &self.state
///     }
/// }
///
/// let greeter = Greeter { state: ResourceState::new() };
/// assert!(!greeter.mounted());
/// assert!(greeter.app().is_err());
/// ```
pub trait Resource: Send + Sync {
    fn state(&self) -> &ResourceState;

    /// Display name used in registry dumps and error messages.
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }

    fn id(&self) -> &str {
        self.state().id()
    }

    fn mounted(&self) -> bool {
        self.state().is_mounted()
    }

    /// The owning app. Fails with `NotMounted` before mount (or before
    /// [`feed_app`](Resource::feed_app)).
    fn app(&self) -> Result<App> {
        self.state().app()
    }

    /// Give the resource an app without running the mount lifecycle.
    fn feed_app(&self, app: &App) {
        self.state().feed(app);
    }

    /// Mount the resource. A second call fails with an `AipiError`.
    fn mount<'a>(
        &'a self,
        app: &'a App,
        options: &'a BootstrapOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.state().bind(app)?;
            self.on_mount(options).await
        })
    }

    /// Hook run once, right after the app has been bound.
    fn on_mount<'a>(&'a self, _options: &'a BootstrapOptions) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// `aipi_core::chats::Chats<x::Y>` → `Chats`, `dyn a::b::Persister<..>` → `Persister`.
pub(crate) fn short_type_name(full: &str) -> String {
    let full = full.trim_start_matches("dyn ");
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head).to_string()
}
