// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # rill-vm - Runtime for the rill language
//!
//! A stack-based bytecode virtual machine with typed dynamic values,
//! pool-backed reference-counted heap objects, nested lexical scopes, and
//! blocking bounded channels for communication between interpreter threads.
//!
//! ## Quick Start
//!
//! ```rust
//! use rill_vm::{Op, ProgramBuilder, Runtime, Result};
//!
//! fn main() -> Result<()> {
//!     let mut b = ProgramBuilder::new();
//!     let entry = b.here();
//!     b.int_lit(3).int_lit(4).op(Op::IntAdd).op(Op::OutL).op(Op::End);
//!
//!     let rt = Runtime::new(b.finish(entry));
//!     let out = rt.capture_output();
//!     rt.run()?;
//!     assert_eq!(rt.output_text(out), "7\n");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                        Driver / Host Layer                         |
//! |      Runtime -> Context (one per OS thread) -> run loop            |
//! +--------------------------------------------------------------------+
//! |                        Interpreter Layer                           |
//! |   Opcode table | Data stack of Values | Return stack | Scopes      |
//! +--------------------------------------------------------------------+
//! |                          Heap Layer                                |
//! |   Scalar cells | Arrays | Hashes | Channels | Functions | Streams  |
//! +--------------------------------------------------------------------+
//! |                          Pool Layer                                |
//! |   Arena slots | 1-based handles | refcounts | per-slot locks       |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Runtime`] | Shared heap, scope registry and streams; factory for contexts |
//! | [`Context`] | Per-thread interpreter state (PC, data stack, return stack) |
//! | [`Value`] | Tagged dynamic value (undef / int / float / string / reference) |
//! | [`Program`] | Flat bytecode buffer plus its entry offset |
//! | [`ProgramBuilder`] | Programmatic bytecode emitter (the assembler stays external) |
//!
//! ## Memory model
//!
//! Heap objects live in per-kind pools behind stable non-zero integer
//! handles and are reference counted. There is no cycle collector: a
//! container that (transitively) references itself leaks by design and
//! must be broken up at the source level.
//!
//! Objects allocated as *shared* carry a per-slot lock and may be
//! referenced from several interpreter threads; ordinary objects must stay
//! on the thread that allocated them.

/// Flat bytecode format: opcodes, operand codec, programs and the builder.
pub mod bytecode;
/// Central tunables and wire constants.
pub mod config;
/// Heap object kinds (scalar cells, arrays, hashes, channels, functions, streams).
pub mod heap;
/// Generic slot pool with stable handles and per-object refcounts.
pub mod pool;
/// Runtime: shared heap + scope registry + default streams, context factory.
pub mod runtime;
/// Symbol tables: nested scopes, identifier trees, cross-thread lifetime.
pub mod symtab;
/// Dynamic values and their coercions.
pub mod value;
/// Interpreter contexts and the instruction dispatch loop.
pub mod vm;

pub use bytecode::{Ident, Op, Program, ProgramBuilder};
pub use heap::channel::Channel;
pub use heap::{
    ArrayHandle, ChannelHandle, FunctionHandle, HashHandle, Heap, HeapStats, ScalarHandle,
    StreamHandle,
};
pub use pool::Handle;
pub use runtime::Runtime;
pub use symtab::{Scope, SymbolKind};
pub use value::Value;
pub use vm::Context;

/// Errors raised by the VM runtime.
///
/// Traps (`StackUnderflow`, `DivisionByZero`, `UnknownOpcode`, ...)
/// terminate the faulting [`Context`] with a non-zero status; they never
/// unwind across call frames or cross thread boundaries.
#[derive(Debug)]
pub enum Error {
    /// An opcode popped from an empty data stack.
    StackUnderflow,
    /// RETURN executed with no frame on the return stack.
    ReturnStackUnderflow,
    /// INTDIV or INTMOD with a zero divisor.
    DivisionByZero,
    /// The byte at the program counter is not a known opcode.
    UnknownOpcode(u8),
    /// The program counter left the bytecode buffer.
    PcOutOfRange { pc: usize, len: usize },
    /// An inline operand runs past the end of the bytecode buffer.
    TruncatedOperand { pc: usize },
    /// END reached while call frames were still live.
    UnbalancedReturn,
    /// A reference opcode found the wrong kind of value on the stack.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// The identifier is already bound in the current scope.
    SymbolExists(bytecode::Ident),
    /// Channel operation on a channel whose last reference was released.
    ChannelClosed,
    /// A VM worker thread panicked.
    WorkerPanic,
    /// Stream I/O failure.
    Io(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::StackUnderflow => write!(f, "data stack underflow"),
            Error::ReturnStackUnderflow => write!(f, "return stack underflow"),
            Error::DivisionByZero => write!(f, "integer division by zero"),
            Error::UnknownOpcode(op) => write!(f, "unknown opcode 0x{:02x}", op),
            Error::PcOutOfRange { pc, len } => {
                write!(f, "program counter {} out of range (len {})", pc, len)
            }
            Error::TruncatedOperand { pc } => {
                write!(f, "truncated inline operand at offset {}", pc)
            }
            Error::UnbalancedReturn => write!(f, "END reached inside a function call"),
            Error::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Error::SymbolExists(id) => {
                write!(f, "identifier {} already defined in current scope", id)
            }
            Error::ChannelClosed => write!(f, "channel closed"),
            Error::WorkerPanic => write!(f, "VM worker thread panicked"),
            Error::Io(e) => write!(f, "stream I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// Convenient alias for runtime results using the public [`Error`] type.
pub type Result<T> = core::result::Result<T, Error>;
