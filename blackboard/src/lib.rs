// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

///
/// A Blackboard is an unordered key/value store shared between host threads and script code for
/// behavior-tree and planner state exchange.
///
/// Every mutator and observer is safe under arbitrary concurrent use. The store is not
/// transactional: composite read-modify-write sequences are inherently racy and are the caller's
/// responsibility.
///
/// Clones share the underlying store.
///
#[derive(Clone, Default)]
pub struct Blackboard {
    entries: Arc<RwLock<HashMap<String, Value>>>,
}

impl Blackboard {
    pub fn new() -> Blackboard {
        Blackboard::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    ///
    /// Remove the given key, returning true if it was present.
    ///
    pub fn delete(&self, key: &str) -> bool {
        self.entries.write().remove(key).is_some()
    }

    ///
    /// Return a defensive copy of the current keys. Iteration order is unspecified, but the
    /// returned Vec is stable for the duration of the call.
    ///
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    ///
    /// Return a copy of the store whose top-level map is not shared with the live store: later
    /// mutations of the Blackboard are not visible in the snapshot.
    ///
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.entries.read().clone()
    }

    ///
    /// True if two handles share the same underlying store.
    ///
    pub fn ptr_eq(&self, other: &Blackboard) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl std::fmt::Debug for Blackboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blackboard")
            .field("len", &self.len())
            .finish()
    }
}
