//! Diff-tracked key/value container.
//!
//! # Responsibilities
//! - Lazily materialize a store from its registry
//! - Track every mutation as an `original → current` change
//! - Flush only when something changed, then reset the change-set
//! - Notify observers synchronously on every mutation
//!
//! # Design Decisions
//! - The change-set is maintained incrementally; no snapshot comparison
//! - A change that restores the original value drops out of the change-set
//! - `originals` are captured when the store is first materialized

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::EngineResult;
use crate::storage::require::{Fallback, Fallbacks};

/// Materialized key/value state.
pub type Store = Map<String, Value>;

/// Backing medium for a `StorageDiff`.
///
/// `key` selects a sub-bag inside the registry (e.g. `"user"` inside a session).
pub trait Registry: Send + Sync {
    fn load(&self, key: Option<&str>) -> Store;
    fn save(&self, key: Option<&str>, store: &Store);
}

/// A pending change to one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub original: Option<Value>,
    pub current: Option<Value>,
}

/// Notification passed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Handle returned by `subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type ObserverFn = Arc<dyn Fn(&Mutation) + Send + Sync>;

struct Observer {
    id: ObserverId,
    attr: Option<String>,
    handler: ObserverFn,
}

pub struct StorageDiff {
    registry: Arc<dyn Registry>,
    key: Option<String>,
    store: Option<Store>,
    changes: BTreeMap<String, Change>,
    observers: Vec<Observer>,
    next_observer: u64,
    fallbacks: Fallbacks,
}

impl StorageDiff {
    pub fn new(registry: Arc<dyn Registry>, key: Option<&str>) -> Self {
        Self {
            registry,
            key: key.map(str::to_string),
            store: None,
            changes: BTreeMap::new(),
            observers: Vec::new(),
            next_observer: 0,
            fallbacks: Fallbacks::default(),
        }
    }

    pub fn with_fallbacks(mut self, fallbacks: Fallbacks) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    fn store_mut(&mut self) -> &mut Store {
        let registry = &self.registry;
        let key = self.key.as_deref();
        self.store.get_or_insert_with(|| registry.load(key))
    }

    pub fn get(&mut self, key: &str) -> Option<Value> {
        self.store_mut().get(key).cloned()
    }

    /// Typed read; `None` when absent or not deserializable as `T`.
    pub fn get_as<T: DeserializeOwned>(&mut self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn has(&mut self, key: &str) -> bool {
        self.store_mut().contains_key(key)
    }

    pub fn keys(&mut self) -> Vec<String> {
        self.store_mut().keys().cloned().collect()
    }

    pub fn values(&mut self) -> Vec<Value> {
        self.store_mut().values().cloned().collect()
    }

    pub fn entries(&mut self) -> Vec<(String, Value)> {
        self.store_mut()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&mut self) -> usize {
        self.store_mut().len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.store_mut().is_empty()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        let old = self.store_mut().insert(key.clone(), value.clone());
        if old.as_ref() == Some(&value) {
            return;
        }
        self.record(key, old, Some(value));
    }

    /// Typed write.
    pub fn set_as<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> EngineResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> Option<Value> {
        let old = self.store_mut().remove(key);
        if old.is_some() {
            self.record(key.to_string(), old.clone(), None);
        }
        old
    }

    pub fn clear(&mut self) {
        for key in self.keys() {
            self.delete(&key);
        }
    }

    fn record(&mut self, key: String, old: Option<Value>, new: Option<Value>) {
        let change = self.changes.entry(key.clone()).or_insert_with(|| Change {
            original: old.clone(),
            current: None,
        });
        change.current = new.clone();
        if change.current == change.original {
            self.changes.remove(&key);
        }
        self.notify(&Mutation { key, old, new });
    }

    fn notify(&self, mutation: &Mutation) {
        for observer in &self.observers {
            if observer.attr.as_deref().map_or(true, |a| a == mutation.key) {
                (observer.handler)(mutation);
            }
        }
    }

    /// Register a change listener for one attribute, or all when `attr` is `None`.
    pub fn subscribe<F>(&mut self, attr: Option<&str>, handler: F) -> ObserverId
    where
        F: Fn(&Mutation) + Send + Sync + 'static,
    {
        self.next_observer += 1;
        let id = ObserverId(self.next_observer);
        self.observers.push(Observer {
            id,
            attr: attr.map(str::to_string),
            handler: Arc::new(handler),
        });
        id
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| o.id != id);
        self.observers.len() != before
    }

    /// Keys present now whose value is new or changed.
    pub fn get_added(&self) -> Vec<String> {
        self.changes
            .iter()
            .filter(|(_, c)| c.current.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Keys present originally and absent now.
    pub fn get_deleted(&self) -> Vec<String> {
        self.changes
            .iter()
            .filter(|(_, c)| c.current.is_none() && c.original.is_some())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn changes(&self) -> &BTreeMap<String, Change> {
        &self.changes
    }

    pub fn is_modified(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Flush the store to the registry if modified (or forced).
    ///
    /// Returns whether a write happened.
    pub fn commit(&mut self, force: bool) -> bool {
        if !self.is_modified() && !force {
            return false;
        }
        let key = self.key.clone();
        let store = self.store_mut().clone();
        self.registry.save(key.as_deref(), &store);
        self.changes.clear();
        true
    }

    /// Reset the change-set after a subclass rendered its own physical format.
    pub fn mark_committed(&mut self) {
        self.changes.clear();
    }

    pub fn define_handler(&mut self, attr: impl Into<String>, fallback: Fallback) {
        self.fallbacks.define(attr, fallback);
    }

    pub fn fallbacks(&self) -> &Fallbacks {
        &self.fallbacks
    }
}
