// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The driver surface.
//!
//! A [`Runtime`] ties one program to one heap, one scope registry, and a
//! default output stream, and hands out [`Context`]s to execute it.
//! Contexts share everything through the runtime but own their stacks;
//! several of them may run in parallel on OS threads, talking through
//! shared heap objects (channels, shared scalars) and through bindings in
//! the global scope.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::bytecode::Program;
use crate::heap::{Heap, StreamHandle};
use crate::symtab::{Scope, ScopeRegistry};
use crate::vm::Context;
use crate::{Error, Result};

/// Shared state of one VM instance.
pub struct Runtime {
    heap: Heap,
    scopes: ScopeRegistry,
    global: Arc<Scope>,
    program: Program,
    out: Mutex<StreamHandle>,
}

impl Runtime {
    /// Build a runtime for `program`. The default output stream is the
    /// process stdout.
    pub fn new(program: Program) -> Arc<Runtime> {
        let heap = Heap::new();
        let scopes = ScopeRegistry::new();
        let global = scopes.root();
        let out = Mutex::new(heap.stdout());
        Arc::new(Runtime {
            heap,
            scopes,
            global,
            program,
            out,
        })
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    /// The scope shared by every context of this runtime; bindings made
    /// here are visible to all of them.
    pub fn global_scope(&self) -> &Arc<Scope> {
        &self.global
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// A context starting at the program's declared entry offset.
    pub fn context(self: &Arc<Self>) -> Context {
        self.context_at(self.program.entry())
    }

    /// A context starting at an arbitrary offset (producer/consumer
    /// setups give each thread its own entry point).
    pub fn context_at(self: &Arc<Self>, entry: usize) -> Context {
        Context::new(Arc::clone(self), entry)
    }

    /// Run a single context at the entry offset to termination.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        self.context().run()
    }

    /// Run one context per entry offset, each on its own thread, and
    /// wait for all of them. The first error (in entry order) wins.
    pub fn run_parallel(self: &Arc<Self>, entries: &[usize]) -> Result<()> {
        let outcome = crossbeam::thread::scope(|s| {
            let workers: Vec<_> = entries
                .iter()
                .map(|&entry| {
                    let rt = Arc::clone(self);
                    s.spawn(move |_| rt.context_at(entry).run())
                })
                .collect();

            let mut result = Ok(());
            for worker in workers {
                match worker.join() {
                    Ok(run_result) => {
                        if result.is_ok() {
                            result = run_result;
                        }
                    }
                    Err(_) => result = Err(Error::WorkerPanic),
                }
            }
            result
        });
        match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::WorkerPanic),
        }
    }

    /// Current default output stream.
    pub fn output(&self) -> StreamHandle {
        *self.out.lock()
    }

    /// Redirect OUT/OUTL to `stream`.
    pub fn set_output(&self, stream: StreamHandle) {
        *self.out.lock() = stream;
    }

    /// Install a fresh in-memory capture stream as the default output and
    /// return its handle; read it back with
    /// [`output_text`](Runtime::output_text).
    pub fn capture_output(&self) -> StreamHandle {
        let stream = self.heap.stream_buffer();
        self.set_output(stream);
        stream
    }

    /// Captured text of a buffer stream (empty for real sinks).
    pub fn output_text(&self, stream: StreamHandle) -> String {
        self.heap.stream_contents(stream)
    }

    /// Reap detached scopes whose reference counts have reached zero.
    pub fn garbage_collect(&self) -> usize {
        self.scopes.garbage_collect(&self.heap)
    }

    pub(crate) fn write_out(&self, text: &str) {
        let stream = self.output();
        if let Err(e) = self.heap.stream_write(stream, text) {
            // Stream trouble must never take the interpreter down.
            log::warn!("[vm] output write failed: {}", e);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.scopes.destroy(&self.global, &self.heap);
        self.scopes.garbage_collect(&self.heap);
    }
}
