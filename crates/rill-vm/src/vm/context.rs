// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-thread interpreter state.
//!
//! A context owns its program counter, its data stack of values, its
//! return stack of call frames, and the scope that is current on this
//! thread. The heap and the scope registry are shared through the
//! runtime; the stacks never are.
//!
//! Dropping a context releases whatever its stacks still hold, so a
//! trapped context cleans up after itself.

use std::sync::Arc;

use crate::config;
use crate::runtime::Runtime;
use crate::symtab::Scope;
use crate::value::Value;
use crate::{Error, Result};

/// One record of the return stack: where RETURN goes back to, and which
/// scope becomes current again when it does.
pub(crate) struct Frame {
    pub return_pc: usize,
    pub scope: Arc<Scope>,
}

/// Interpreter state for one execution thread.
pub struct Context {
    pub(crate) rt: Arc<Runtime>,
    pub(crate) code: Arc<[u8]>,
    pub(crate) pc: usize,
    pub(crate) data: Vec<Value>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) scope: Arc<Scope>,
}

impl Context {
    pub(crate) fn new(rt: Arc<Runtime>, entry: usize) -> Self {
        let scope = rt.scopes().child(rt.global_scope());
        let code = Arc::clone(rt.program().code());
        Context {
            rt,
            code,
            pc: entry,
            data: Vec::with_capacity(config::DATA_STACK_INITIAL),
            frames: Vec::with_capacity(config::RETURN_STACK_INITIAL),
            scope,
        }
    }

    /// Current program counter (the offset of the next opcode).
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Values currently on the data stack.
    pub fn stack_depth(&self) -> usize {
        self.data.len()
    }

    /// Live call frames.
    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn ds_push(&mut self, value: Value) {
        self.data.push(value);
    }

    pub(crate) fn ds_pop(&mut self) -> Result<Value> {
        self.data.pop().ok_or(Error::StackUnderflow)
    }

    pub(crate) fn ds_top(&self) -> Result<&Value> {
        self.data.last().ok_or(Error::StackUnderflow)
    }

    /// Peek `depth` values below the top (0 is the top itself).
    pub(crate) fn ds_peek(&self, depth: usize) -> Result<&Value> {
        self.data
            .len()
            .checked_sub(depth + 1)
            .and_then(|i| self.data.get(i))
            .ok_or(Error::StackUnderflow)
    }

    fn operand(&self, at: usize, len: usize) -> Result<&[u8]> {
        self.code
            .get(at..at + len)
            .ok_or(Error::TruncatedOperand { pc: self.pc })
    }

    pub(crate) fn rd_i64(&self, at: usize) -> Result<i64> {
        let bytes = self.operand(at, 8)?;
        Ok(i64::from_le_bytes(bytes.try_into().map_err(|_| {
            Error::TruncatedOperand { pc: self.pc }
        })?))
    }

    pub(crate) fn rd_u64(&self, at: usize) -> Result<u64> {
        let bytes = self.operand(at, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().map_err(|_| {
            Error::TruncatedOperand { pc: self.pc }
        })?))
    }

    pub(crate) fn rd_f64(&self, at: usize) -> Result<f64> {
        Ok(f64::from_bits(self.rd_u64(at)? ))
    }

    pub(crate) fn rd_u32(&self, at: usize) -> Result<u32> {
        let bytes = self.operand(at, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().map_err(|_| {
            Error::TruncatedOperand { pc: self.pc }
        })?))
    }

    pub(crate) fn rd_u16(&self, at: usize) -> Result<u16> {
        let bytes = self.operand(at, 2)?;
        Ok(u16::from_le_bytes(bytes.try_into().map_err(|_| {
            Error::TruncatedOperand { pc: self.pc }
        })?))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // A trapped context can leave values and frames behind; give
        // their references back before the stacks go away.
        for value in self.data.drain(..) {
            self.rt.heap().release_value(value);
        }
        self.rt.scopes().destroy(&self.scope, self.rt.heap());
        for frame in self.frames.drain(..) {
            self.rt.scopes().destroy(&frame.scope, self.rt.heap());
        }
    }
}
