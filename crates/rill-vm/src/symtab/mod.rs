// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Nested lexical scopes with cross-thread lifetime.
//!
//! A scope owns the bindings declared while it is current and chains to
//! its parent. A scope's reference count is 1 for its direct owner (the
//! context or call frame it is current in) plus 1 per live child scope;
//! the `Arc` underneath only manages memory and never drives reaping.
//!
//! When a scope's count hits zero on [`ScopeRegistry::destroy`], its
//! bindings release their heap objects and the scope leaves the global
//! registry. A parent whose count is pushed to zero by a child that
//! outlived it (the child ran on another thread) stays in the registry
//! until the next [`ScopeRegistry::garbage_collect`] pass reclaims it.
//!
//! Lock discipline: the registry mutex is never held across a heap
//! operation; binding releases always happen after the relevant lock is
//! dropped.

mod tree;

pub use tree::{Referent, Symbol, SymbolTree};

use std::sync::atomic::{fence, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bytecode::Ident;
use crate::config;
use crate::heap::Heap;
use crate::{Error, Result};

/// Kind requested by a SYMDEF instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Scalar,
    Array,
    Hash,
    Channel,
}

/// Kind mask within SYMDEF flags.
pub const SYMBOL_KIND_MASK: u32 = 0x0000_00ff;
/// The object is shared between threads (allocated with a slot lock).
pub const SYMBOL_FLAG_SHARED: u32 = 0x0000_0100;

impl SymbolKind {
    /// Decode the kind bits of SYMDEF flags.
    pub fn from_flags(flags: u32) -> Option<SymbolKind> {
        match flags & SYMBOL_KIND_MASK {
            0x01 => Some(SymbolKind::Scalar),
            0x02 => Some(SymbolKind::Array),
            0x03 => Some(SymbolKind::Hash),
            0x04 => Some(SymbolKind::Channel),
            _ => None,
        }
    }

    /// Encode as SYMDEF flag bits.
    pub fn to_flags(self) -> u32 {
        match self {
            SymbolKind::Scalar => 0x01,
            SymbolKind::Array => 0x02,
            SymbolKind::Hash => 0x03,
            SymbolKind::Channel => 0x04,
        }
    }
}

/// One lexical scope.
pub struct Scope {
    parent: Option<Arc<Scope>>,
    refs: AtomicU32,
    subscopes: AtomicU32,
    symbols: Mutex<SymbolTree>,
}

impl Scope {
    /// Allocate the requested heap object and bind it to `ident` in this
    /// scope. Fails without allocating a binding when the identifier is
    /// already defined here.
    pub fn define(
        &self,
        heap: &Heap,
        ident: Ident,
        kind: SymbolKind,
        shared: bool,
    ) -> Result<Referent> {
        let referent = match kind {
            SymbolKind::Scalar => Referent::Scalar(heap.scalar_allocate(shared)),
            SymbolKind::Array => Referent::Array(heap.array_allocate(shared)),
            SymbolKind::Hash => Referent::Hash(heap.hash_allocate(shared)),
            SymbolKind::Channel => {
                Referent::Channel(heap.channel_allocate(config::CHANNEL_DEFAULT_CAPACITY))
            }
        };
        let result = self.symbols.lock().insert(Symbol { ident, referent });
        match result {
            Ok(()) => Ok(referent),
            Err(sym) => {
                release_referent(heap, sym.referent);
                Err(Error::SymbolExists(ident))
            }
        }
    }

    /// Bind `ident` here to an already-referenced object (SYMCLONE).
    pub fn bind(&self, heap: &Heap, ident: Ident, referent: Referent) -> Result<()> {
        let result = self.symbols.lock().insert(Symbol { ident, referent });
        match result {
            Ok(()) => Ok(()),
            Err(sym) => {
                release_referent(heap, sym.referent);
                Err(Error::SymbolExists(ident))
            }
        }
    }

    /// Search this scope, then its ancestors.
    pub fn lookup(&self, ident: Ident) -> Option<Referent> {
        let mut scope: &Scope = self;
        loop {
            if let Some(referent) = scope.symbols.lock().get(ident) {
                return Some(referent);
            }
            match &scope.parent {
                Some(parent) => scope = parent,
                None => return None,
            }
        }
    }

    /// Remove `ident` from this scope only; a miss is a success.
    pub fn undefine(&self, heap: &Heap, ident: Ident) {
        let removed = self.symbols.lock().remove(ident);
        if let Some(sym) = removed {
            release_referent(heap, sym.referent);
        }
    }

    /// Reference count: direct owner plus live children.
    pub fn refs(&self) -> u32 {
        self.refs.load(Ordering::Relaxed)
    }

    /// Number of live child scopes.
    pub fn subscope_count(&self) -> u32 {
        self.subscopes.load(Ordering::Relaxed)
    }

    /// Number of bindings in this scope alone.
    pub fn binding_count(&self) -> usize {
        self.symbols.lock().len()
    }
}

fn release_referent(heap: &Heap, referent: Referent) {
    match referent {
        Referent::Scalar(h) => heap.scalar_release(h),
        Referent::Array(h) => heap.array_release(h),
        Referent::Hash(h) => heap.hash_release(h),
        Referent::Channel(h) => heap.channel_release(h),
    }
}

/// Registry of every live scope, for cross-thread reaping.
pub struct ScopeRegistry {
    scopes: Mutex<Vec<Arc<Scope>>>,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        ScopeRegistry {
            scopes: Mutex::new(Vec::new()),
        }
    }

    /// A parentless scope with count 1, registered.
    pub fn root(&self) -> Arc<Scope> {
        let scope = Arc::new(Scope {
            parent: None,
            refs: AtomicU32::new(1),
            subscopes: AtomicU32::new(0),
            symbols: Mutex::new(SymbolTree::default()),
        });
        self.scopes.lock().push(Arc::clone(&scope));
        scope
    }

    /// Open a child of `parent`, bumping the parent's count.
    pub fn child(&self, parent: &Arc<Scope>) -> Arc<Scope> {
        parent.refs.fetch_add(1, Ordering::Relaxed);
        parent.subscopes.fetch_add(1, Ordering::Relaxed);
        let scope = Arc::new(Scope {
            parent: Some(Arc::clone(parent)),
            refs: AtomicU32::new(1),
            subscopes: AtomicU32::new(0),
            symbols: Mutex::new(SymbolTree::default()),
        });
        self.scopes.lock().push(Arc::clone(&scope));
        scope
    }

    /// Drop one count from `scope`. At zero its bindings are released,
    /// its parent loses the child count, and it leaves the registry. A
    /// parent pushed to zero here is *not* reaped; it waits for
    /// [`garbage_collect`](ScopeRegistry::garbage_collect).
    pub fn destroy(&self, scope: &Arc<Scope>, heap: &Heap) {
        let prev = scope.refs.fetch_sub(1, Ordering::Release);
        assert!(prev >= 1, "scope refcount underflow");
        if prev != 1 {
            return;
        }
        fence(Ordering::Acquire);

        self.reap_bindings(scope, heap);
        self.scopes.lock().retain(|s| !Arc::ptr_eq(s, scope));
    }

    /// Reap every registered scope whose count has reached zero,
    /// repeating until the cascade (a reaped child may zero its parent)
    /// settles. Returns the number of scopes reclaimed.
    pub fn garbage_collect(&self, heap: &Heap) -> usize {
        let mut reaped = 0;
        loop {
            // Pull the dead entries out under the registry lock, release
            // their bindings after dropping it.
            let dead: Vec<Arc<Scope>> = {
                let mut scopes = self.scopes.lock();
                let mut dead = Vec::new();
                scopes.retain(|s| {
                    if s.refs.load(Ordering::Acquire) == 0 {
                        dead.push(Arc::clone(s));
                        false
                    } else {
                        true
                    }
                });
                dead
            };
            if dead.is_empty() {
                return reaped;
            }
            for scope in &dead {
                self.reap_bindings(scope, heap);
            }
            reaped += dead.len();
        }
    }

    fn reap_bindings(&self, scope: &Scope, heap: &Heap) {
        let symbols = {
            let mut tree = scope.symbols.lock();
            tree.drain()
        };
        for sym in symbols {
            release_referent(heap, sym.referent);
        }
        if let Some(parent) = &scope.parent {
            let prev = parent.subscopes.fetch_sub(1, Ordering::Relaxed);
            debug_assert!(prev >= 1, "parent lost a child it never had");
            parent.refs.fetch_sub(1, Ordering::Release);
        }
    }

    /// Number of scopes currently registered (live or awaiting gc).
    pub fn live(&self) -> usize {
        self.scopes.lock().len()
    }
}

impl Default for ScopeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
