// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! String-keyed hashes with chained buckets.
//!
//! Keys are whatever the program supplies, materialized as strings via
//! the value-to-string coercion; the integer 1 and the string "1" name
//! the same item. Items hold a *scalar handle*, not a value, so two
//! lookups of the same key share one cell and an assignment through one
//! is visible through the other.
//!
//! Buckets are a fixed-width array; each bucket is a singly linked chain
//! kept sorted ascending by key, which makes lookups deterministic and
//! lets misses stop early. The pool slot lock serializes every structural
//! operation on a shared hash.

use super::{Heap, HashHandle, ScalarHandle};
use crate::config::HASH_BUCKETS;

struct Item {
    key: String,
    value: ScalarHandle,
    next: Option<Box<Item>>,
}

/// A string-keyed map of scalar handles.
pub struct Hash {
    buckets: Vec<Option<Box<Item>>>,
    len: usize,
}

impl Default for Hash {
    fn default() -> Self {
        let mut buckets = Vec::with_capacity(HASH_BUCKETS);
        buckets.resize_with(HASH_BUCKETS, || None);
        Hash { buckets, len: 0 }
    }
}

/// Bob Jenkins' one-at-a-time mixer; good enough for perl, good enough
/// for us.
fn hash_key(key: &str) -> u32 {
    let mut hash: u32 = 0;
    for &b in key.as_bytes() {
        hash = hash.wrapping_add(u32::from(b));
        hash = hash.wrapping_add(hash << 10);
        hash ^= hash >> 6;
    }
    hash = hash.wrapping_add(hash << 3);
    hash ^= hash >> 11;
    hash.wrapping_add(hash << 15)
}

impl Hash {
    fn bucket_of(&self, key: &str) -> usize {
        hash_key(key) as usize % self.buckets.len()
    }

    pub(crate) fn get(&self, key: &str) -> Option<ScalarHandle> {
        let mut cursor = self.buckets[self.bucket_of(key)].as_deref();
        while let Some(item) = cursor {
            match item.key.as_str().cmp(key) {
                std::cmp::Ordering::Equal => return Some(item.value),
                // Sorted chain: gone past where the key would live.
                std::cmp::Ordering::Greater => return None,
                std::cmp::Ordering::Less => cursor = item.next.as_deref(),
            }
        }
        None
    }

    /// Insert a key known to be absent, keeping the chain sorted.
    pub(crate) fn insert(&mut self, key: String, value: ScalarHandle) {
        let bucket = self.bucket_of(&key);
        Self::insert_into(&mut self.buckets[bucket], key, value);
        self.len += 1;
    }

    fn insert_into(slot: &mut Option<Box<Item>>, key: String, value: ScalarHandle) {
        match slot {
            None => {
                *slot = Some(Box::new(Item {
                    key,
                    value,
                    next: None,
                }));
            }
            Some(item) if item.key > key => {
                let next = slot.take();
                *slot = Some(Box::new(Item { key, value, next }));
            }
            Some(item) => Self::insert_into(&mut item.next, key, value),
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<ScalarHandle> {
        let bucket = self.bucket_of(key);
        let removed = Self::remove_from(&mut self.buckets[bucket], key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_from(slot: &mut Option<Box<Item>>, key: &str) -> Option<ScalarHandle> {
        match slot {
            None => None,
            Some(item) if item.key.as_str() == key => {
                let mut item = slot.take()?;
                *slot = item.next.take();
                Some(item.value)
            }
            Some(item) if item.key.as_str() > key => None,
            Some(item) => Self::remove_from(&mut item.next, key),
        }
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn each<'a>(&'a self, mut f: impl FnMut(&'a Item)) {
        for bucket in &self.buckets {
            let mut cursor = bucket.as_deref();
            while let Some(item) = cursor {
                f(item);
                cursor = item.next.as_deref();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Heap {
    /// Allocate an empty hash with refcount 1.
    pub fn hash_allocate(&self, shared: bool) -> HashHandle {
        self.hashes.allocate(shared)
    }

    pub fn hash_reference(&self, handle: HashHandle) -> HashHandle {
        self.hashes.reference(handle)
    }

    /// Give up one reference; the last one releases every item's cell.
    pub fn hash_release(&self, handle: HashHandle) {
        if let Some(hash) = self.hashes.release(handle) {
            let mut cells = Vec::with_capacity(hash.len());
            hash.each(|item| cells.push(item.value));
            for cell in cells {
                self.scalar_release(cell);
            }
        }
    }

    /// Handle of the item named by `key`, auto-vivifying on a miss.
    ///
    /// The returned handle carries a fresh reference that the caller must
    /// release; the hash keeps its own.
    pub fn hash_key_item(&self, handle: HashHandle, key: &str) -> ScalarHandle {
        self.hashes.lock(handle);
        let cell = match self.hashes.with(handle, |h| h.get(key)) {
            Some(cell) => cell,
            None => {
                // Items of a shared hash have to be shared themselves.
                let fresh = self.scalar_allocate(self.hashes.is_shared(handle));
                self.hashes
                    .with_mut(handle, |h| h.insert(key.to_string(), fresh));
                fresh
            }
        };
        let out = self.scalar_reference(cell);
        self.hashes.unlock(handle);
        out
    }

    /// 1 if the key exists, 0 otherwise; never vivifies.
    pub fn hash_key_exists(&self, handle: HashHandle, key: &str) -> bool {
        self.hashes.with(handle, |h| h.contains(key))
    }

    /// Drop the item named by `key`; a miss is a success.
    pub fn hash_key_delete(&self, handle: HashHandle, key: &str) {
        let removed = self.hashes.with_mut(handle, |h| h.remove(key));
        if let Some(cell) = removed {
            self.scalar_release(cell);
        }
    }

    /// All keys, bucket order (deterministic for a given key set).
    pub fn hash_keys(&self, handle: HashHandle) -> Vec<String> {
        self.hashes.with(handle, |h| {
            let mut keys = Vec::with_capacity(h.len());
            h.each(|item| keys.push(item.key.clone()));
            keys
        })
    }

    /// All item cells, each with a fresh reference for the caller.
    pub fn hash_values(&self, handle: HashHandle) -> Vec<ScalarHandle> {
        self.hashes.lock(handle);
        let mut cells = Vec::new();
        self.hashes.with(handle, |h| h.each(|item| cells.push(item.value)));
        for cell in &cells {
            self.scalar_reference(*cell);
        }
        self.hashes.unlock(handle);
        cells
    }

    /// All (key, cell) pairs; cells carry fresh references.
    pub fn hash_pairs(&self, handle: HashHandle) -> Vec<(String, ScalarHandle)> {
        self.hashes.lock(handle);
        let mut pairs = Vec::new();
        self.hashes.with(handle, |h| {
            h.each(|item| pairs.push((item.key.clone(), item.value)));
        });
        for (_, cell) in &pairs {
            self.scalar_reference(*cell);
        }
        self.hashes.unlock(handle);
        pairs
    }

    pub fn hash_len(&self, handle: HashHandle) -> usize {
        self.hashes.with(handle, Hash::len)
    }
}
