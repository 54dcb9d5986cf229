// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Central runtime tunables - single source of truth.
//!
//! Every size and capacity the runtime cares about is named here once.
//! Do not hardcode these values elsewhere.

/// Initial slot count of the scalar cell pool.
///
/// Scalars are by far the most heavily allocated kind (every hash item and
/// every named binding owns one), so this pool starts an order of magnitude
/// larger than the container pools.
pub const SCALAR_POOL_INITIAL: usize = 1024;

/// Initial slot count of the array pool.
pub const ARRAY_POOL_INITIAL: usize = 64;

/// Initial slot count of the hash pool.
pub const HASH_POOL_INITIAL: usize = 64;

/// Initial slot count of the channel pool.
pub const CHANNEL_POOL_INITIAL: usize = 64;

/// Initial slot count of the function pool.
pub const FUNCTION_POOL_INITIAL: usize = 64;

/// Initial slot count of the stream pool.
pub const STREAM_POOL_INITIAL: usize = 16;

/// Number of fixed buckets in every hash object.
///
/// Bucket chains are kept sorted, so a modest fixed width is enough; the
/// bucket array is never resized.
pub const HASH_BUCKETS: usize = 256;

/// Ring capacity of a channel when the program does not ask for one.
pub const CHANNEL_DEFAULT_CAPACITY: usize = 16;

/// Initial capacity of a context's data stack.
pub const DATA_STACK_INITIAL: usize = 16;

/// Initial capacity of a context's return stack.
pub const RETURN_STACK_INITIAL: usize = 16;
