// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records and the registry that caches them by canonical location

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::debug;
use url::Url;

use crate::resolver::dirname;

/// Shared, mutable exports of a module
///
/// Cloning yields another handle to the same container, so every requirer
/// of a module observes the same (possibly still growing) value.
#[derive(Clone)]
pub struct Exports(Arc<RwLock<Value>>);

impl Exports {
    /// Create an empty exports object (`{}`)
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// Create an exports container holding `value`
    pub fn from_value(value: Value) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Snapshot of the current value
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    /// Set a named export. A non-object value is replaced by an object first.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        let mut exports = self.0.write();
        if !exports.is_object() {
            *exports = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut *exports {
            map.insert(key.into(), value);
        }
    }

    /// Replace the whole value (`module.exports = ...`)
    pub fn replace(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Whether both handles point to the same container
    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Exports {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Exports").field(&*self.0.read()).finish()
    }
}

/// Lifecycle of a module record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    /// Registered, body is running (or a cycle is observing it)
    Evaluating,
    /// Body finished
    Loaded,
    /// Body raised; the next require re-executes it
    Failed,
}

/// A module record, created once per canonical location
pub struct Module {
    id: String,
    location: Url,
    dirname: String,
    parent: Option<Weak<Module>>,
    children: RwLock<Vec<Arc<Module>>>,
    status: RwLock<ModuleStatus>,
    exports: Exports,
}

impl Module {
    /// Allocate a record for `location`, created on behalf of `parent`
    pub fn new(location: Url, parent: Option<&Arc<Module>>) -> Self {
        Self {
            id: location.path().to_string(),
            dirname: dirname(&location),
            location,
            parent: parent.map(Arc::downgrade),
            children: RwLock::new(Vec::new()),
            status: RwLock::new(ModuleStatus::Evaluating),
            exports: Exports::new(),
        }
    }

    /// Path portion of the location
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical location
    pub fn location(&self) -> &Url {
        &self.location
    }

    /// Canonical location as a string (`__filename`)
    pub fn filename(&self) -> &str {
        self.location.as_str()
    }

    /// Containing directory of the location (`__dirname`)
    pub fn dirname(&self) -> &str {
        &self.dirname
    }

    /// The module that first required this one
    pub fn parent(&self) -> Option<Arc<Module>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Modules first required by this one, in require order
    pub fn children(&self) -> Vec<Arc<Module>> {
        self.children.read().clone()
    }

    pub(crate) fn add_child(&self, child: Arc<Module>) {
        self.children.write().push(child);
    }

    /// Current lifecycle state
    pub fn status(&self) -> ModuleStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: ModuleStatus) {
        *self.status.write() = status;
    }

    /// Whether the body finished executing
    pub fn is_loaded(&self) -> bool {
        self.status() == ModuleStatus::Loaded
    }

    /// Handle to the exports container
    pub fn exports(&self) -> Exports {
        self.exports.clone()
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("location", &self.location.as_str())
            .field("status", &self.status())
            .field("children", &self.children.read().len())
            .finish()
    }
}

/// Outcome of [`ModuleRegistry::register`]
#[derive(Debug, Clone)]
pub enum Registration {
    /// The supplied record was inserted
    Fresh(Arc<Module>),
    /// A live record already existed and was kept
    Existing(Arc<Module>),
}

/// Process-wide mapping from canonical location to module record
#[derive(Default)]
pub struct ModuleRegistry {
    modules: DashMap<Url, Arc<Module>>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a module by location
    pub fn get(&self, location: &Url) -> Option<Arc<Module>> {
        self.modules.get(location).map(|entry| entry.value().clone())
    }

    /// Check if a location is registered
    pub fn contains(&self, location: &Url) -> bool {
        self.modules.contains_key(location)
    }

    /// Insert `module` unless a live record for its location exists.
    ///
    /// Racing registrations converge on the first record. The only entry
    /// ever replaced is one whose body failed.
    pub fn register(&self, module: Arc<Module>) -> Registration {
        match self.modules.entry(module.location().clone()) {
            Entry::Occupied(entry) if entry.get().status() != ModuleStatus::Failed => {
                Registration::Existing(entry.get().clone())
            }
            Entry::Occupied(mut entry) => {
                debug!("Replacing failed module {}", module.location());
                entry.insert(module.clone());
                Registration::Fresh(module)
            }
            Entry::Vacant(entry) => {
                debug!("Registered module {}", module.location());
                entry.insert(module.clone());
                Registration::Fresh(module)
            }
        }
    }

    /// All registered locations
    pub fn keys(&self) -> Vec<Url> {
        self.modules.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Drop every record
    pub(crate) fn clear(&self) {
        self.modules.clear();
    }
}

/// Read-only view of a loader's registry (`require.cache`)
#[derive(Clone)]
pub struct CacheView {
    registry: Arc<ModuleRegistry>,
}

impl CacheView {
    pub(crate) fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }

    /// Get a module by location
    pub fn get(&self, location: &Url) -> Option<Arc<Module>> {
        self.registry.get(location)
    }

    /// Check if a location is registered
    pub fn contains(&self, location: &Url) -> bool {
        self.registry.contains(location)
    }

    /// All registered locations, sorted
    pub fn keys(&self) -> Vec<Url> {
        let mut keys = self.registry.keys();
        keys.sort();
        keys
    }

    /// Snapshot of all records, sorted by location
    pub fn modules(&self) -> Vec<Arc<Module>> {
        self.keys()
            .iter()
            .filter_map(|location| self.registry.get(location))
            .collect()
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}
