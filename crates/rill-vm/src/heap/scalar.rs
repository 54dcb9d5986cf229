// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled scalar cells.
//!
//! A scalar cell is a pooled [`Value`]: the referent of scalar references
//! and of every named scalar binding. Cells allocated shared take their
//! per-slot lock around every content operation, so reads and writes are
//! atomic with respect to other threads; the explicit
//! [`scalar_lock`](Heap::scalar_lock) / [`scalar_unlock`](Heap::scalar_unlock)
//! pair extends that atomicity across a read-modify-write sequence (the
//! lock is reentrant).

use super::{raw_dup, Heap, ScalarHandle};
use crate::value::Value;

impl Heap {
    /// Allocate a fresh undefined scalar cell with refcount 1.
    pub fn scalar_allocate(&self, shared: bool) -> ScalarHandle {
        self.scalars.allocate(shared)
    }

    /// Allocate `n` undefined cells with consecutive handles; returns the
    /// first.
    pub fn scalar_allocate_many(&self, n: usize, shared: bool) -> ScalarHandle {
        self.scalars.allocate_many(n, shared, Value::default)
    }

    /// Take another reference to a live cell.
    pub fn scalar_reference(&self, handle: ScalarHandle) -> ScalarHandle {
        self.scalars.reference(handle)
    }

    /// Give up one reference; the last one destroys the cell's payload.
    pub fn scalar_release(&self, handle: ScalarHandle) {
        if let Some(old) = self.scalars.release(handle) {
            self.release_value(old);
        }
    }

    /// Explicitly lock a shared cell across several operations.
    pub fn scalar_lock(&self, handle: ScalarHandle) {
        self.scalars.lock(handle);
    }

    /// Counterpart of [`scalar_lock`](Heap::scalar_lock).
    pub fn scalar_unlock(&self, handle: ScalarHandle) {
        self.scalars.unlock(handle);
    }

    /// Copy the cell's value out (deep for strings, refcount bump for
    /// references).
    pub fn scalar_get(&self, handle: ScalarHandle) -> Value {
        // Hold the content lock across the structural copy and the
        // refcount bump so a concurrent write cannot release the referent
        // in between.
        self.scalars.lock(handle);
        let dup = self.scalars.with(handle, raw_dup);
        self.bump_refs(&dup);
        self.scalars.unlock(handle);
        dup
    }

    /// Store `value` in the cell; the previous payload is destroyed.
    pub fn scalar_set(&self, handle: ScalarHandle, value: Value) {
        let old = self
            .scalars
            .with_mut(handle, |cell| std::mem::replace(cell, value));
        self.release_value(old);
    }

    /// Convenience setters mirroring the literal kinds.
    pub fn scalar_set_int(&self, handle: ScalarHandle, value: i64) {
        self.scalar_set(handle, Value::Int(value));
    }

    pub fn scalar_set_float(&self, handle: ScalarHandle, value: f64) {
        self.scalar_set(handle, Value::Float(value));
    }

    pub fn scalar_set_str(&self, handle: ScalarHandle, value: &str) {
        self.scalar_set(handle, Value::Str(value.to_string()));
    }

    /// Coercing getters; see [`Value`] for the rules.
    pub fn scalar_get_int(&self, handle: ScalarHandle) -> i64 {
        self.scalars.with(handle, Value::as_int)
    }

    pub fn scalar_get_float(&self, handle: ScalarHandle) -> f64 {
        self.scalars.with(handle, Value::as_float)
    }

    pub fn scalar_get_string(&self, handle: ScalarHandle) -> String {
        self.scalars.with(handle, ToString::to_string)
    }

    pub fn scalar_get_bool(&self, handle: ScalarHandle) -> bool {
        self.scalars.with(handle, Value::truthy)
    }

    /// Whether the cell currently holds anything but undef.
    pub fn scalar_is_defined(&self, handle: ScalarHandle) -> bool {
        self.scalars.with(handle, Value::is_defined)
    }
}
