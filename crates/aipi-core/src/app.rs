//! App — the handle mounted resources use to reach the rest of the system.
//!
//! An [`App`] is produced by [`Registry::bootstrap`] and is cheap to clone.
//! Resources receive it at mount and keep a [`WeakApp`] back-reference.
//!
//! Capability dispatch goes through [`Covers`]: resources that can handle
//! some kinds of input (a file parser for certain MIME types, a param parser
//! for certain param shapes) implement `Covers<Item>`, and
//! [`App::cover`] picks the first registered one that claims the item.

use std::sync::{Arc, Weak};

use log::{debug, info};

use crate::errors::Result;
use crate::registry::{BootstrapOptions, Registry};
use crate::resource::Resource;

/// A capability that claims some inputs and not others.
pub trait Covers<T: ?Sized> {
    fn covers(&self, item: &T) -> bool;
}

struct AppInner {
    registry: Registry,
    options: BootstrapOptions,
}

/// Shared application handle.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").finish_non_exhaustive()
    }
}

/// Non-owning app reference held by mounted resources.
#[derive(Clone)]
pub struct WeakApp(Weak<AppInner>);

impl WeakApp {
    pub fn upgrade(&self) -> Option<App> {
        self.0.upgrade().map(|inner| App { inner })
    }
}

impl App {
    /// Wrap a registry without mounting anything. Prefer
    /// [`Registry::bootstrap`].
    pub fn new(registry: Registry, options: BootstrapOptions) -> Self {
        Self {
            inner: Arc::new(AppInner { registry, options }),
        }
    }

    pub fn downgrade(&self) -> WeakApp {
        WeakApp(Arc::downgrade(&self.inner))
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn options(&self) -> &BootstrapOptions {
        &self.inner.options
    }

    /// Dev mode follows `print_registry`.
    pub fn dev_mode(&self) -> bool {
        self.inner.options.print_registry
    }

    // -- Resolution --

    pub fn get<C>(&self) -> Option<Arc<C>>
    where
        C: ?Sized + 'static,
    {
        self.registry().find::<C>()
    }

    pub fn require<C>(&self) -> Result<Arc<C>>
    where
        C: ?Sized + 'static,
    {
        self.registry().require::<C>()
    }

    pub fn get_all<C>(&self) -> Vec<Arc<C>>
    where
        C: ?Sized + 'static,
    {
        self.registry().find_all::<C>()
    }

    /// First resource registered under `C` (by priority) that covers `item`.
    pub fn cover<C, T>(&self, item: &T) -> Option<Arc<C>>
    where
        C: Covers<T> + ?Sized + 'static,
        T: ?Sized,
    {
        self.get_all::<C>().into_iter().find(|r| r.covers(item))
    }

    /// Every resource registered under `C` that covers `item`.
    pub fn cover_all<C, T>(&self, item: &T) -> Vec<Arc<C>>
    where
        C: Covers<T> + ?Sized + 'static,
        T: ?Sized,
    {
        self.get_all::<C>()
            .into_iter()
            .filter(|r| r.covers(item))
            .collect()
    }

    // -- Standalone mounting --

    /// Mount a resource that is not (necessarily) registered, with the
    /// app's bootstrap options.
    pub async fn mount<R>(&self, resource: &R) -> Result<()>
    where
        R: Resource + ?Sized,
    {
        self.mount_with(resource, &self.inner.options).await
    }

    pub async fn mount_with<R>(&self, resource: &R, options: &BootstrapOptions) -> Result<()>
    where
        R: Resource + ?Sized,
    {
        debug!("mounting standalone {}", resource.name());
        resource.mount(self, options).await
    }

    // -- Logging --

    pub fn log(&self, message: &str) {
        info!("{message}");
    }

    /// Logged only in dev mode.
    pub fn log_dev(&self, message: &str) {
        if self.dev_mode() {
            debug!("{message}");
        }
    }
}
