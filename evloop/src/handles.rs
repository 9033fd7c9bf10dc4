// Copyright 2025 OSM project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::{JsObject, JsValue};
use crossbeam_channel::Sender;

use crate::Job;

///
/// A table pinning script values so that Send-able handles can refer to them from arbitrary host
/// threads. The table itself lives on the worker thread and holds the values rooted; handles only
/// carry the numeric id plus a release channel.
///
/// This mirrors the usual embedding split for runtimes whose values are not thread-safe: identity
/// lives host-side, the value itself never leaves the worker.
///
#[derive(Clone)]
pub struct HandleTable(Rc<RefCell<HandleTableInner>>);

#[derive(Default)]
struct HandleTableInner {
    entries: HashMap<u64, JsValue>,
    id_generator: u64,
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable(Rc::new(RefCell::new(HandleTableInner::default())))
    }

    pub fn insert(&self, value: JsValue) -> u64 {
        let mut inner = self.0.borrow_mut();
        inner.id_generator += 1;
        let id = inner.id_generator;
        inner.entries.insert(id, value);
        id
    }

    pub fn get(&self, id: u64) -> Option<JsValue> {
        self.0.borrow().entries.get(&id).cloned()
    }

    pub fn release(&self, id: u64) {
        self.0.borrow_mut().entries.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }
}

///
/// A Send + Sync reference to a script value pinned in a `HandleTable`. Dropping the last clone
/// schedules a best-effort release on the worker; if the loop is already gone the entry dies with
/// it.
///
#[derive(Clone)]
pub struct ScriptHandle(Arc<HandleRef>);

struct HandleRef {
    id: u64,
    releaser: Sender<Job>,
}

impl ScriptHandle {
    pub(crate) fn new(id: u64, releaser: Sender<Job>) -> ScriptHandle {
        ScriptHandle(Arc::new(HandleRef { id, releaser }))
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }
}

impl Drop for HandleRef {
    fn drop(&mut self) {
        let _ = self.releaser.send(Job::Release(self.id));
    }
}

impl std::fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ScriptHandle").field(&self.0.id).finish()
    }
}

///
/// A loop-local table giving numeric identity to host values referenced from script objects (via
/// a hidden id property). Entries live for the lifetime of the loop; they are created at
/// tree-construction time, not per tick.
///
#[derive(Clone)]
pub struct NativeTable(Rc<NativeTableInner>);

struct NativeTableInner {
    entries: RefCell<HashMap<u64, Box<dyn Any>>>,
    id_generator: Cell<u64>,
}

impl NativeTable {
    pub fn new() -> NativeTable {
        NativeTable(Rc::new(NativeTableInner {
            entries: RefCell::new(HashMap::new()),
            id_generator: Cell::new(0),
        }))
    }

    pub fn insert<T: Any>(&self, value: T) -> u64 {
        let id = self.0.id_generator.get() + 1;
        self.0.id_generator.set(id);
        self.0.entries.borrow_mut().insert(id, Box::new(value));
        id
    }

    ///
    /// Clone the value stored under `id`, if it exists and has the expected type.
    ///
    pub fn get<T: Any + Clone>(&self, id: u64) -> Option<T> {
        self.0
            .entries
            .borrow()
            .get(&id)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }
}

///
/// A cache of script wrapper objects keyed by stable host-side identity, so that repeatedly
/// handing the same host value to script reuses one wrapper instead of growing without bound in
/// ticker loops.
///
#[derive(Clone)]
pub struct ObjectCache(Rc<RefCell<HashMap<u64, JsObject>>>);

impl ObjectCache {
    pub fn new() -> ObjectCache {
        ObjectCache(Rc::new(RefCell::new(HashMap::new())))
    }

    pub fn get(&self, key: u64) -> Option<JsObject> {
        self.0.borrow().get(&key).cloned()
    }

    pub fn put(&self, key: u64, object: JsObject) {
        self.0.borrow_mut().insert(key, object);
    }
}
