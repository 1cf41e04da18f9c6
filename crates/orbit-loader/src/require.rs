// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The loader and its `require` functions

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument};
use url::Url;

use crate::config::LoaderConfig;
use crate::error::Result;
use crate::fetch::{FetchCoordinator, FetchKey};
use crate::instantiate::instantiate;
use crate::registry::{CacheView, Exports, Module, ModuleRegistry, ModuleStatus};
use crate::resolver;
use crate::sandbox::Sandbox;
use crate::transport::Transport;

/// Eventual result of a non-blocking `require`/`resolve`
///
/// Every non-blocking caller for the same location receives a clone of the
/// same continuation.
pub type Continuation<T> = Shared<BoxFuture<'static, Result<T>>>;

fn continuation<T, F>(fut: F) -> Continuation<T>
where
    T: Clone + Send + Sync + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    fut.boxed().shared()
}

struct PendingEntry<T: Clone> {
    ticket: u64,
    continuation: Continuation<T>,
}

/// One continuation per location. Failed continuations remove themselves
/// so the next caller starts over.
struct PendingTable<T: Clone> {
    entries: Mutex<HashMap<Url, PendingEntry<T>>>,
    tickets: AtomicU64,
}

impl<T: Clone + Send + Sync + 'static> PendingTable<T> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            tickets: AtomicU64::new(1),
        }
    }

    /// Existing continuation for `location`, or the one built by `create`.
    /// `create` runs under the table lock, so racing callers converge.
    /// An entry for which `is_stale` holds is discarded and rebuilt.
    fn get_or_insert_with(
        &self,
        location: &Url,
        is_stale: impl FnOnce(&Continuation<T>) -> bool,
        create: impl FnOnce(u64) -> Continuation<T>,
    ) -> Continuation<T> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(location) {
            if !is_stale(&entry.continuation) {
                debug!("Reusing pending continuation for {}", location);
                return entry.continuation.clone();
            }
            debug!("Discarding stale continuation for {}", location);
        }
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let continuation = create(ticket);
        entries.insert(
            location.clone(),
            PendingEntry {
                ticket,
                continuation: continuation.clone(),
            },
        );
        continuation
    }

    fn remove(&self, location: &Url, ticket: u64) {
        let mut entries = self.entries.lock();
        if entries.get(location).is_some_and(|entry| entry.ticket == ticket) {
            entries.remove(location);
        }
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// State shared by a loader and every `require` it hands out
pub(crate) struct LoaderShared {
    config: RwLock<LoaderConfig>,
    pub(crate) registry: Arc<ModuleRegistry>,
    fetcher: FetchCoordinator,
    pub(crate) sandbox: Arc<dyn Sandbox>,
    loads: PendingTable<Exports>,
    resolutions: PendingTable<Url>,
}

impl LoaderShared {
    /// Exports of a live record, skipping failed ones
    fn cached_exports(&self, location: &Url) -> Option<Exports> {
        self.registry
            .get(location)
            .filter(|module| module.status() != ModuleStatus::Failed)
            .map(|module| module.exports())
    }

    /// Whether a settled load no longer matches the live record for
    /// `location` (the record failed, was replaced or was dropped).
    fn is_stale_load(&self, location: &Url, continuation: &Continuation<Exports>) -> bool {
        match continuation.peek() {
            None => false,
            Some(Ok(exports)) => !self
                .cached_exports(location)
                .is_some_and(|live| live.ptr_eq(exports)),
            Some(Err(_)) => true,
        }
    }
}

/// A module loader: registry, fetch coordination and configuration
///
/// Clones share all state.
#[derive(Clone)]
pub struct Loader {
    shared: Arc<LoaderShared>,
}

impl Loader {
    /// Create a loader
    pub fn new(config: LoaderConfig, transport: Arc<dyn Transport>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            shared: Arc::new(LoaderShared {
                config: RwLock::new(config),
                registry: Arc::new(ModuleRegistry::new()),
                fetcher: FetchCoordinator::new(transport),
                sandbox,
                loads: PendingTable::new(),
                resolutions: PendingTable::new(),
            }),
        }
    }

    /// The root `require`, with no requiring module
    pub fn require(&self) -> Require {
        Require {
            shared: self.shared.clone(),
            parent: None,
        }
    }

    /// Current module root
    pub fn root(&self) -> String {
        self.shared.config.read().root.clone()
    }

    /// Change the module root. Only affects identifiers resolved afterwards.
    pub fn set_root(&self, root: impl Into<String>) {
        let root = root.into();
        debug!("Module root set to {}", root);
        self.shared.config.write().root = root;
    }

    /// Base location the root and context-less identifiers resolve against
    pub fn base(&self) -> Url {
        self.shared.config.read().base.clone()
    }

    /// Read-only view of the module registry
    pub fn cache(&self) -> CacheView {
        CacheView::new(self.shared.registry.clone())
    }

    /// Forget every module, request and pending continuation.
    ///
    /// Exports handed out before the reset are no longer the ones later
    /// requires return: a module required again is fetched and executed
    /// anew.
    pub fn clear_cache(&self) {
        debug!("Clearing module cache");
        self.shared.fetcher.clear();
        self.shared.loads.clear();
        self.shared.resolutions.clear();
        self.shared.registry.clear();
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.shared.config.read();
        f.debug_struct("Loader")
            .field("base", &config.base.as_str())
            .field("root", &config.root)
            .field("modules", &self.shared.registry.len())
            .finish()
    }
}

/// A `require` function bound to a resolution context
///
/// The root `require` comes from [`Loader::require`]; each module receives
/// its own through the sandbox bindings, so relative identifiers resolve
/// against that module's location.
#[derive(Clone)]
pub struct Require {
    shared: Arc<LoaderShared>,
    parent: Option<Arc<Module>>,
}

impl Require {
    pub(crate) fn for_module(shared: Arc<LoaderShared>, module: Arc<Module>) -> Self {
        Self {
            shared,
            parent: Some(module),
        }
    }

    /// The module this `require` belongs to (`None` for the root)
    pub fn module(&self) -> Option<&Arc<Module>> {
        self.parent.as_ref()
    }

    /// Canonical location for `id`. Pure: nothing is fetched or registered.
    pub fn resolve_location(&self, id: &str) -> Result<Url> {
        let config = self.shared.config.read();
        resolver::resolve(
            id,
            self.parent.as_ref().map(|module| module.location()),
            &config.root,
            &config.base,
        )
    }

    /// Load `id` and return its exports, blocking until done.
    ///
    /// A non-blocking fetch still in flight for the same location is taken
    /// over and redone blocking.
    #[instrument(level = "debug", skip(self))]
    pub fn require(&self, id: &str) -> Result<Exports> {
        let location = self.resolve_location(id)?;
        if let Some(exports) = self.shared.cached_exports(&location) {
            debug!("Cache hit for {}", location);
            return Ok(exports);
        }

        let response = self
            .shared
            .fetcher
            .acquire_blocking(&FetchKey::load(location.clone()))?;
        instantiate(&self.shared, &location, self.parent.as_ref(), &response)
    }

    /// Load `id` without blocking. The fetch is issued before this returns.
    #[instrument(level = "debug", skip(self))]
    pub fn require_async(&self, id: &str) -> Continuation<Exports> {
        let location = match self.resolve_location(id) {
            Ok(location) => location,
            Err(e) => return continuation(future::ready(Err(e))),
        };

        if let Some(exports) = self.shared.cached_exports(&location) {
            debug!("Cache hit for {}", location);
            return continuation(future::ready(Ok(exports)));
        }

        let shared = self.shared.clone();
        let parent = self.parent.clone();
        let key = location.clone();
        let is_stale = |pending: &Continuation<Exports>| self.shared.is_stale_load(&key, pending);
        self.shared.loads.get_or_insert_with(&key, is_stale, |ticket| {
            let completion = shared.fetcher.acquire(&FetchKey::load(location.clone()));
            continuation(async move {
                let result = match completion {
                    Ok(completion) => match completion.wait().await {
                        Ok(response) => instantiate(&shared, &location, parent.as_ref(), &response),
                        Err(e) => Err(e),
                    },
                    Err(e) => Err(e),
                };
                if result.is_err() {
                    shared.loads.remove(&location, ticket);
                }
                result
            })
        })
    }

    /// Canonical location for `id`, once the location has been fetched
    /// successfully. Never registers or executes a module.
    #[instrument(level = "debug", skip(self))]
    pub fn resolve(&self, id: &str) -> Result<Url> {
        let location = self.resolve_location(id)?;
        self.shared
            .fetcher
            .acquire_blocking(&FetchKey::resolve(location.clone()))?;
        Ok(location)
    }

    /// Non-blocking form of [`resolve`](Self::resolve)
    #[instrument(level = "debug", skip(self))]
    pub fn resolve_async(&self, id: &str) -> Continuation<Url> {
        let location = match self.resolve_location(id) {
            Ok(location) => location,
            Err(e) => return continuation(future::ready(Err(e))),
        };

        let shared = self.shared.clone();
        let key = location.clone();
        self.shared.resolutions.get_or_insert_with(&key, |_| false, |ticket| {
            let completion = shared.fetcher.acquire(&FetchKey::resolve(location.clone()));
            continuation(async move {
                let result = match completion {
                    Ok(completion) => completion.wait().await.map(|_| location.clone()),
                    Err(e) => Err(e),
                };
                if result.is_err() {
                    shared.resolutions.remove(&location, ticket);
                }
                result
            })
        })
    }

    /// Read-only view of the module registry (`require.cache`)
    pub fn cache(&self) -> CacheView {
        CacheView::new(self.shared.registry.clone())
    }
}

impl fmt::Debug for Require {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Require")
            .field("module", &self.parent.as_ref().map(|m| m.filename()))
            .finish()
    }
}
