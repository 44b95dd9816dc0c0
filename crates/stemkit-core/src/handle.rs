//! Handle table: stable integer handles mapped to shared records
//!
//! Callers only ever see the integer. The table owns one `Arc` per live
//! handle; lookups clone the `Arc` out so the lock is held only for the
//! map access itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::types::{Handle, INVALID_HANDLE};

struct Inner<T> {
    next: Handle,
    entries: HashMap<Handle, Arc<T>>,
}

pub struct HandleTable<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next: INVALID_HANDLE + 1,
                entries: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        // Entries stay consistent even if a holder panicked mid-lookup
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate the next handle and register the record built for it
    pub fn insert_with(&self, build: impl FnOnce(Handle) -> Arc<T>) -> (Handle, Arc<T>) {
        let mut inner = self.lock();
        let handle = inner.next;
        inner.next += 1;
        let record = build(handle);
        inner.entries.insert(handle, Arc::clone(&record));
        (handle, record)
    }

    pub fn get(&self, handle: Handle) -> Option<Arc<T>> {
        self.lock().entries.get(&handle).cloned()
    }

    pub fn remove(&self, handle: Handle) -> Option<Arc<T>> {
        self.lock().entries.remove(&handle)
    }

    /// Remove every record, returning them in handle order
    pub fn drain(&self) -> Vec<(Handle, Arc<T>)> {
        let mut drained: Vec<_> = self.lock().entries.drain().collect();
        drained.sort_by_key(|(handle, _)| *handle);
        drained
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}
