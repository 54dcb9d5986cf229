// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The heap: one pool per object kind plus the reference-aware value
//! plumbing.
//!
//! All cross-kind logic lives here: cloning a [`Value`] (which must bump
//! the referent's refcount) and releasing one (which must recursively
//! release whatever a dying object still holds). The per-kind operation
//! sets live in their own modules as further `impl Heap` blocks.
//!
//! # Cycles
//!
//! Reference counting only. A container that transitively references
//! itself is never reclaimed; breaking such cycles is the program's job.

/// Dynamic arrays of values.
pub mod array;
/// Bounded blocking channels.
pub mod channel;
/// Pooled code entry points.
pub mod function;
/// String-keyed hashes with chained buckets.
pub mod hash;
/// Pooled scalar cells.
pub mod scalar;
/// Output streams (stdout, stderr, files, capture buffers).
pub mod stream;

use std::sync::Arc;

use crate::config;
use crate::pool::{Handle, Pool};
use crate::value::Value;

pub use array::Array;
pub use channel::Channel;
pub use function::Function;
pub use hash::Hash;
pub use stream::Stream;

/// Handle to a pooled scalar cell.
pub type ScalarHandle = Handle<Value>;
/// Handle to a pooled array.
pub type ArrayHandle = Handle<Array>;
/// Handle to a pooled hash.
pub type HashHandle = Handle<Hash>;
/// Handle to a pooled channel.
pub type ChannelHandle = Handle<Arc<Channel>>;
/// Handle to a pooled function.
pub type FunctionHandle = Handle<Function>;
/// Handle to a pooled stream.
pub type StreamHandle = Handle<Arc<Stream>>;

/// Live object counts per pool, for diagnostics and leak checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub scalars: usize,
    pub arrays: usize,
    pub hashes: usize,
    pub channels: usize,
    pub functions: usize,
    pub streams: usize,
}

/// Owner of every heap object in one runtime.
pub struct Heap {
    pub(crate) scalars: Pool<Value>,
    pub(crate) arrays: Pool<Array>,
    pub(crate) hashes: Pool<Hash>,
    pub(crate) channels: Pool<Arc<Channel>>,
    pub(crate) functions: Pool<Function>,
    pub(crate) streams: Pool<Arc<Stream>>,
    stdout: StreamHandle,
    stderr: StreamHandle,
}

impl Heap {
    /// Create a heap with the standard streams already bound.
    pub fn new() -> Self {
        let streams = Pool::new(config::STREAM_POOL_INITIAL);
        let stdout = streams.allocate_with(true, Arc::new(Stream::stdout()));
        let stderr = streams.allocate_with(true, Arc::new(Stream::stderr()));
        Heap {
            scalars: Pool::new(config::SCALAR_POOL_INITIAL),
            arrays: Pool::new(config::ARRAY_POOL_INITIAL),
            hashes: Pool::new(config::HASH_POOL_INITIAL),
            channels: Pool::new(config::CHANNEL_POOL_INITIAL),
            functions: Pool::new(config::FUNCTION_POOL_INITIAL),
            streams,
            stdout,
            stderr,
        }
    }

    /// Handle of the process stdout stream. Owned by the heap; do not
    /// release unless a matching reference was taken.
    pub fn stdout(&self) -> StreamHandle {
        self.stdout
    }

    /// Handle of the process stderr stream.
    pub fn stderr(&self) -> StreamHandle {
        self.stderr
    }

    /// Live object counts across all pools.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            scalars: self.scalars.live(),
            arrays: self.arrays.live(),
            hashes: self.hashes.live(),
            channels: self.channels.live(),
            functions: self.functions.live(),
            streams: self.streams.live(),
        }
    }

    /// Duplicate a value: strings are deep-copied, references are bumped.
    pub fn clone_value(&self, value: &Value) -> Value {
        let dup = raw_dup(value);
        self.bump_refs(&dup);
        dup
    }

    /// Destroy a value: strings drop their buffer, references give up one
    /// refcount (recursively releasing the referent's contents when that
    /// was the last one).
    pub fn release_value(&self, value: Value) {
        match value {
            Value::Undef | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
            Value::ScalarRef(h) => self.scalar_release(h),
            Value::ArrayRef(h) => self.array_release(h),
            Value::HashRef(h) => self.hash_release(h),
            Value::ChannelRef(h) => self.channel_release(h),
            Value::FunctionRef(h) => self.function_release(h),
            Value::StreamRef(h) => self.stream_release(h),
        }
    }

    fn bump_refs(&self, value: &Value) {
        match value {
            Value::Undef | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
            Value::ScalarRef(h) => {
                self.scalars.reference(*h);
            }
            Value::ArrayRef(h) => {
                self.arrays.reference(*h);
            }
            Value::HashRef(h) => {
                self.hashes.reference(*h);
            }
            Value::ChannelRef(h) => {
                self.channels.reference(*h);
            }
            Value::FunctionRef(h) => {
                self.functions.reference(*h);
            }
            Value::StreamRef(h) => {
                self.streams.reference(*h);
            }
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural duplicate without refcount bookkeeping. Callers must follow
/// up with `bump_refs` before the duplicate escapes.
pub(crate) fn raw_dup(value: &Value) -> Value {
    match value {
        Value::Undef => Value::Undef,
        Value::Int(i) => Value::Int(*i),
        Value::Float(f) => Value::Float(*f),
        Value::Str(s) => Value::Str(s.clone()),
        Value::ScalarRef(h) => Value::ScalarRef(*h),
        Value::ArrayRef(h) => Value::ArrayRef(*h),
        Value::HashRef(h) => Value::HashRef(*h),
        Value::ChannelRef(h) => Value::ChannelRef(*h),
        Value::FunctionRef(h) => Value::FunctionRef(*h),
        Value::StreamRef(h) => Value::StreamRef(*h),
    }
}
