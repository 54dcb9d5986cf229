// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The instruction table.
//!
//! One handler per opcode, indexed by the opcode byte. Each handler reads
//! its inline operands starting at `pc + 1`, performs its stack effect,
//! and returns the signed delta to add to the program counter (never 0).
//! END and NOOP are special-cased by the dispatch loop and their table
//! slots must not be reached.
//!
//! Ownership convention: a popped value is owned by the handler and must
//! be released (or moved onward) on *every* path, including traps. The
//! `take_*_ref` helpers transfer the popped reference's refcount to the
//! returned handle, which the handler then releases when done.

use std::sync::Arc;

use crate::bytecode::Op;
use crate::heap::{
    ArrayHandle, Channel, ChannelHandle, FunctionHandle, HashHandle, ScalarHandle,
};
use crate::symtab::{Referent, SymbolKind, SYMBOL_FLAG_SHARED};
use crate::value::Value;
use crate::{Error, Result};

use super::context::{Context, Frame};

pub(crate) type Handler = fn(&mut Context) -> Result<isize>;

/// Handler table, indexed by opcode byte.
pub(crate) const TABLE: [Handler; Op::COUNT] = [
    op_end,
    op_noop,
    op_call,
    op_return,
    op_drop,
    op_swap,
    op_dup,
    op_over,
    op_branch,
    op_branch0,
    op_symdef,
    op_symfind,
    op_symclone,
    op_symundef,
    op_srlock,
    op_srunlock,
    op_srread,
    op_srwrite,
    op_arindex,
    op_arpush,
    op_arpop,
    op_arshift,
    op_arunshift,
    op_hrindex,
    op_hrkeyexists,
    op_hrkeydelete,
    op_crread,
    op_crwrite,
    op_frcall,
    op_intlit,
    op_intadd,
    op_intsub,
    op_intmul,
    op_intdiv,
    op_intmod,
    op_strlit,
    op_strcat,
    op_fltlit,
    op_fltadd,
    op_fltsub,
    op_fltmul,
    op_fltdiv,
    op_fltmod,
    op_funlit,
    op_out,
    op_outl,
];

// ---------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------

/// Pop a scalar reference; the popped refcount transfers to the returned
/// handle (caller releases it). Anything else is released and traps.
fn take_scalar_ref(ctx: &mut Context) -> Result<ScalarHandle> {
    match ctx.ds_pop()? {
        Value::ScalarRef(h) => Ok(h),
        other => trap_mismatch(ctx, "scalar ref", other),
    }
}

fn take_array_ref(ctx: &mut Context) -> Result<ArrayHandle> {
    match ctx.ds_pop()? {
        Value::ArrayRef(h) => Ok(h),
        other => trap_mismatch(ctx, "array ref", other),
    }
}

fn take_hash_ref(ctx: &mut Context) -> Result<HashHandle> {
    match ctx.ds_pop()? {
        Value::HashRef(h) => Ok(h),
        other => trap_mismatch(ctx, "hash ref", other),
    }
}

fn take_channel_ref(ctx: &mut Context) -> Result<ChannelHandle> {
    match ctx.ds_pop()? {
        Value::ChannelRef(h) => Ok(h),
        other => trap_mismatch(ctx, "channel ref", other),
    }
}

fn take_function_ref(ctx: &mut Context) -> Result<FunctionHandle> {
    match ctx.ds_pop()? {
        Value::FunctionRef(h) => Ok(h),
        other => trap_mismatch(ctx, "function ref", other),
    }
}

fn trap_mismatch<T>(ctx: &mut Context, expected: &'static str, found: Value) -> Result<T> {
    let name = found.type_name();
    ctx.rt.heap().release_value(found);
    Err(Error::TypeMismatch {
        expected,
        found: name,
    })
}

/// Pop `b` then `a`, push `f(a, b)` as an integer.
fn int_binop(ctx: &mut Context, f: impl FnOnce(i64, i64) -> i64) -> Result<isize> {
    let b = ctx.ds_pop()?;
    let a = ctx.ds_pop()?;
    let result = f(a.as_int(), b.as_int());
    ctx.rt.heap().release_value(a);
    ctx.rt.heap().release_value(b);
    ctx.ds_push(Value::Int(result));
    Ok(1)
}

/// Pop `b` then `a`, push `f(a, b)` as a float.
fn flt_binop(ctx: &mut Context, f: impl FnOnce(f64, f64) -> f64) -> Result<isize> {
    let b = ctx.ds_pop()?;
    let a = ctx.ds_pop()?;
    let result = f(a.as_float(), b.as_float());
    ctx.rt.heap().release_value(a);
    ctx.rt.heap().release_value(b);
    ctx.ds_push(Value::Float(result));
    Ok(1)
}

/// Open a call frame returning to `return_pc` and jump to `target`.
fn enter_call(ctx: &mut Context, target: usize, return_pc: usize) -> isize {
    let outer = Arc::clone(&ctx.scope);
    ctx.scope = ctx.rt.scopes().child(&outer);
    ctx.frames.push(Frame {
        return_pc,
        scope: outer,
    });
    target as isize - ctx.pc as isize
}

/// A referent as a stack value, with its refcount bumped for the stack's
/// share.
fn referent_value(ctx: &Context, referent: Referent) -> Value {
    let heap = ctx.rt.heap();
    match referent {
        Referent::Scalar(h) => Value::ScalarRef(heap.scalar_reference(h)),
        Referent::Array(h) => Value::ArrayRef(heap.array_reference(h)),
        Referent::Hash(h) => Value::HashRef(heap.hash_reference(h)),
        Referent::Channel(h) => Value::ChannelRef(heap.channel_reference(h)),
    }
}

// ---------------------------------------------------------------------
// control
// ---------------------------------------------------------------------

/// END: table slot only; the dispatch loop terminates before calling it.
fn op_end(_ctx: &mut Context) -> Result<isize> {
    unreachable!("END is handled by the dispatch loop");
}

/// NOOP: table slot only; the dispatch loop advances past it.
fn op_noop(_ctx: &mut Context) -> Result<isize> {
    unreachable!("NOOP is handled by the dispatch loop");
}

/// CALL ( -- ): absolute target inline; pushes a frame, opens a scope.
fn op_call(ctx: &mut Context) -> Result<isize> {
    let target = ctx.rd_u64(ctx.pc + 1)? as usize;
    Ok(enter_call(ctx, target, ctx.pc + 1 + 8))
}

/// RETURN ( -- ): closes the current scope, pops a frame, jumps back.
fn op_return(ctx: &mut Context) -> Result<isize> {
    let frame = ctx.frames.pop().ok_or(Error::ReturnStackUnderflow)?;
    let ended = std::mem::replace(&mut ctx.scope, frame.scope);
    ctx.rt.scopes().destroy(&ended, ctx.rt.heap());
    Ok(frame.return_pc as isize - ctx.pc as isize)
}

/// BRANCH ( -- ): signed offset inline, relative to the opcode byte.
fn op_branch(ctx: &mut Context) -> Result<isize> {
    Ok(ctx.rd_i64(ctx.pc + 1)? as isize)
}

/// BRANCH0 ( a -- ): branch when `a` is false, else fall through.
fn op_branch0(ctx: &mut Context) -> Result<isize> {
    let offset = ctx.rd_i64(ctx.pc + 1)?;
    let a = ctx.ds_pop()?;
    let taken = !a.truthy();
    ctx.rt.heap().release_value(a);
    Ok(if taken { offset as isize } else { 1 + 8 })
}

// ---------------------------------------------------------------------
// plain stack shuffles
// ---------------------------------------------------------------------

/// DROP ( a -- )
fn op_drop(ctx: &mut Context) -> Result<isize> {
    let a = ctx.ds_pop()?;
    ctx.rt.heap().release_value(a);
    Ok(1)
}

/// SWAP ( a b -- b a )
fn op_swap(ctx: &mut Context) -> Result<isize> {
    let b = ctx.ds_pop()?;
    let a = ctx.ds_pop()?;
    ctx.ds_push(b);
    ctx.ds_push(a);
    Ok(1)
}

/// DUP ( a -- a a )
fn op_dup(ctx: &mut Context) -> Result<isize> {
    let dup = ctx.rt.heap().clone_value(ctx.ds_top()?);
    ctx.ds_push(dup);
    Ok(1)
}

/// OVER ( a b -- a b a )
fn op_over(ctx: &mut Context) -> Result<isize> {
    let dup = ctx.rt.heap().clone_value(ctx.ds_peek(1)?);
    ctx.ds_push(dup);
    Ok(1)
}

// ---------------------------------------------------------------------
// symbols
// ---------------------------------------------------------------------

/// SYMDEF ( -- ): inline flags and identifier; binds a fresh object.
fn op_symdef(ctx: &mut Context) -> Result<isize> {
    let flags = ctx.rd_u32(ctx.pc + 1)?;
    let ident = ctx.rd_u64(ctx.pc + 1 + 4)?;
    match SymbolKind::from_flags(flags) {
        Some(kind) => {
            let shared = flags & SYMBOL_FLAG_SHARED != 0;
            if let Err(e) = ctx.scope.define(ctx.rt.heap(), ident, kind, shared) {
                // Duplicate definition is recoverable: the program keeps
                // the existing binding.
                log::warn!("[vm] SYMDEF: {}", e);
            }
        }
        None => log::warn!("[vm] SYMDEF with unknown kind flags {:#x}", flags),
    }
    Ok(1 + 4 + 8)
}

/// SYMFIND ( -- ref|0 ): pushes the referent, or int 0 on a miss.
fn op_symfind(ctx: &mut Context) -> Result<isize> {
    let ident = ctx.rd_u64(ctx.pc + 1)?;
    let value = match ctx.scope.lookup(ident) {
        Some(referent) => referent_value(ctx, referent),
        None => Value::Int(0),
    };
    ctx.ds_push(value);
    Ok(1 + 8)
}

/// SYMCLONE ( -- ): binds the identifier here to the referent an
/// enclosing scope already binds it to.
fn op_symclone(ctx: &mut Context) -> Result<isize> {
    let ident = ctx.rd_u64(ctx.pc + 1)?;
    match ctx.scope.lookup(ident) {
        Some(referent) => {
            // Bump for the new binding; `bind` releases it again if the
            // identifier is already defined here.
            let bumped = match referent_value(ctx, referent) {
                Value::ScalarRef(h) => Referent::Scalar(h),
                Value::ArrayRef(h) => Referent::Array(h),
                Value::HashRef(h) => Referent::Hash(h),
                Value::ChannelRef(h) => Referent::Channel(h),
                _ => unreachable!("referent_value only builds references"),
            };
            if let Err(e) = ctx.scope.bind(ctx.rt.heap(), ident, bumped) {
                log::warn!("[vm] SYMCLONE: {}", e);
            }
        }
        None => log::warn!("[vm] SYMCLONE of undefined identifier {}", ident),
    }
    Ok(1 + 8)
}

/// SYMUNDEF ( -- ): removes the identifier from the current scope only.
fn op_symundef(ctx: &mut Context) -> Result<isize> {
    let ident = ctx.rd_u64(ctx.pc + 1)?;
    ctx.scope.undefine(ctx.rt.heap(), ident);
    Ok(1 + 8)
}

// ---------------------------------------------------------------------
// scalar references
// ---------------------------------------------------------------------

/// SRLOCK ( h -- h ): lock the pooled scalar; no-op unless shared.
fn op_srlock(ctx: &mut Context) -> Result<isize> {
    match ctx.ds_top()? {
        Value::ScalarRef(h) => {
            let h = *h;
            ctx.rt.heap().scalar_lock(h);
            Ok(1)
        }
        other => Err(Error::TypeMismatch {
            expected: "scalar ref",
            found: other.type_name(),
        }),
    }
}

/// SRUNLOCK ( h -- h )
fn op_srunlock(ctx: &mut Context) -> Result<isize> {
    match ctx.ds_top()? {
        Value::ScalarRef(h) => {
            let h = *h;
            ctx.rt.heap().scalar_unlock(h);
            Ok(1)
        }
        other => Err(Error::TypeMismatch {
            expected: "scalar ref",
            found: other.type_name(),
        }),
    }
}

/// SRREAD ( h -- a ): copy the cell's value out.
fn op_srread(ctx: &mut Context) -> Result<isize> {
    let h = take_scalar_ref(ctx)?;
    let value = ctx.rt.heap().scalar_get(h);
    ctx.rt.heap().scalar_release(h);
    ctx.ds_push(value);
    Ok(1)
}

/// SRWRITE ( a h -- ): store into the cell.
fn op_srwrite(ctx: &mut Context) -> Result<isize> {
    let h = take_scalar_ref(ctx)?;
    let a = match ctx.ds_pop() {
        Ok(a) => a,
        Err(e) => {
            ctx.rt.heap().scalar_release(h);
            return Err(e);
        }
    };
    ctx.rt.heap().scalar_set(h, a);
    ctx.rt.heap().scalar_release(h);
    Ok(1)
}

// ---------------------------------------------------------------------
// array references
// ---------------------------------------------------------------------

/// ARINDEX ( i h -- a ): copy out the element; undef when out of range.
fn op_arindex(ctx: &mut Context) -> Result<isize> {
    let h = take_array_ref(ctx)?;
    let i = match ctx.ds_pop() {
        Ok(i) => i,
        Err(e) => {
            ctx.rt.heap().array_release(h);
            return Err(e);
        }
    };
    let index = i.as_int();
    ctx.rt.heap().release_value(i);
    let value = usize::try_from(index)
        .ok()
        .and_then(|index| ctx.rt.heap().array_item(h, index));
    if value.is_none() {
        log::debug!("[vm] ARINDEX {} out of range", index);
    }
    ctx.rt.heap().array_release(h);
    ctx.ds_push(value.unwrap_or(Value::Undef));
    Ok(1)
}

/// ARPUSH ( a h -- )
fn op_arpush(ctx: &mut Context) -> Result<isize> {
    let h = take_array_ref(ctx)?;
    let a = match ctx.ds_pop() {
        Ok(a) => a,
        Err(e) => {
            ctx.rt.heap().array_release(h);
            return Err(e);
        }
    };
    ctx.rt.heap().array_push(h, a);
    ctx.rt.heap().array_release(h);
    Ok(1)
}

/// ARPOP ( h -- a ): undef when the array is empty.
fn op_arpop(ctx: &mut Context) -> Result<isize> {
    let h = take_array_ref(ctx)?;
    let value = ctx.rt.heap().array_pop(h);
    if value.is_none() {
        log::debug!("[vm] ARPOP of an empty array");
    }
    ctx.rt.heap().array_release(h);
    ctx.ds_push(value.unwrap_or(Value::Undef));
    Ok(1)
}

/// ARSHFT ( h -- a ): undef when the array is empty.
fn op_arshift(ctx: &mut Context) -> Result<isize> {
    let h = take_array_ref(ctx)?;
    let value = ctx.rt.heap().array_shift(h);
    if value.is_none() {
        log::debug!("[vm] ARSHFT of an empty array");
    }
    ctx.rt.heap().array_release(h);
    ctx.ds_push(value.unwrap_or(Value::Undef));
    Ok(1)
}

/// ARUNSHFT ( a h -- )
fn op_arunshift(ctx: &mut Context) -> Result<isize> {
    let h = take_array_ref(ctx)?;
    let a = match ctx.ds_pop() {
        Ok(a) => a,
        Err(e) => {
            ctx.rt.heap().array_release(h);
            return Err(e);
        }
    };
    ctx.rt.heap().array_unshift(h, a);
    ctx.rt.heap().array_release(h);
    Ok(1)
}

// ---------------------------------------------------------------------
// hash references
// ---------------------------------------------------------------------

/// HRINDEX ( k h -- a ): item cell for the key, auto-vivified on a miss.
fn op_hrindex(ctx: &mut Context) -> Result<isize> {
    let h = take_hash_ref(ctx)?;
    let k = match ctx.ds_pop() {
        Ok(k) => k,
        Err(e) => {
            ctx.rt.heap().hash_release(h);
            return Err(e);
        }
    };
    let key = k.to_string();
    ctx.rt.heap().release_value(k);
    let cell = ctx.rt.heap().hash_key_item(h, &key);
    ctx.rt.heap().hash_release(h);
    ctx.ds_push(Value::ScalarRef(cell));
    Ok(1)
}

/// HRKEYEX ( k h -- 0|1 )
fn op_hrkeyexists(ctx: &mut Context) -> Result<isize> {
    let h = take_hash_ref(ctx)?;
    let k = match ctx.ds_pop() {
        Ok(k) => k,
        Err(e) => {
            ctx.rt.heap().hash_release(h);
            return Err(e);
        }
    };
    let key = k.to_string();
    ctx.rt.heap().release_value(k);
    let exists = ctx.rt.heap().hash_key_exists(h, &key);
    ctx.rt.heap().hash_release(h);
    ctx.ds_push(Value::Int(i64::from(exists)));
    Ok(1)
}

/// HRKEYDEL ( k h -- ): a missing key is a success.
fn op_hrkeydelete(ctx: &mut Context) -> Result<isize> {
    let h = take_hash_ref(ctx)?;
    let k = match ctx.ds_pop() {
        Ok(k) => k,
        Err(e) => {
            ctx.rt.heap().hash_release(h);
            return Err(e);
        }
    };
    let key = k.to_string();
    ctx.rt.heap().release_value(k);
    ctx.rt.heap().hash_key_delete(h, &key);
    ctx.rt.heap().hash_release(h);
    Ok(1)
}

// ---------------------------------------------------------------------
// channel references
// ---------------------------------------------------------------------

/// CRREAD ( h -- a ): blocking read; traps once the channel is closed.
fn op_crread(ctx: &mut Context) -> Result<isize> {
    let h = take_channel_ref(ctx)?;
    let channel: Arc<Channel> = ctx.rt.heap().channel_get(h);
    ctx.rt.heap().channel_release(h);
    let value = channel.read()?;
    ctx.ds_push(value);
    Ok(1)
}

/// CRWRITE ( a h -- ): blocking write; traps once the channel is closed.
fn op_crwrite(ctx: &mut Context) -> Result<isize> {
    let h = take_channel_ref(ctx)?;
    let a = match ctx.ds_pop() {
        Ok(a) => a,
        Err(e) => {
            ctx.rt.heap().channel_release(h);
            return Err(e);
        }
    };
    let channel: Arc<Channel> = ctx.rt.heap().channel_get(h);
    ctx.rt.heap().channel_release(h);
    if let Err(rejected) = channel.write(a) {
        ctx.rt.heap().release_value(rejected);
        return Err(Error::ChannelClosed);
    }
    Ok(1)
}

// ---------------------------------------------------------------------
// function references
// ---------------------------------------------------------------------

/// FRCALL ( h -- ): CALL with the target taken from the function object.
fn op_frcall(ctx: &mut Context) -> Result<isize> {
    let h = take_function_ref(ctx)?;
    let entry = ctx.rt.heap().function_entry(h);
    ctx.rt.heap().function_release(h);
    Ok(enter_call(ctx, entry, ctx.pc + 1))
}

// ---------------------------------------------------------------------
// literals and arithmetic
// ---------------------------------------------------------------------

/// INTLIT ( -- a )
fn op_intlit(ctx: &mut Context) -> Result<isize> {
    let lit = ctx.rd_i64(ctx.pc + 1)?;
    ctx.ds_push(Value::Int(lit));
    Ok(1 + 8)
}

/// INTADD ( a b -- a+b ); two's complement, wrapping.
fn op_intadd(ctx: &mut Context) -> Result<isize> {
    int_binop(ctx, i64::wrapping_add)
}

/// INTSUBT ( a b -- a-b )
fn op_intsub(ctx: &mut Context) -> Result<isize> {
    int_binop(ctx, i64::wrapping_sub)
}

/// INTMULT ( a b -- a*b )
fn op_intmul(ctx: &mut Context) -> Result<isize> {
    int_binop(ctx, i64::wrapping_mul)
}

/// INTDIV ( a b -- a/b ); division by zero traps.
fn op_intdiv(ctx: &mut Context) -> Result<isize> {
    let b = ctx.ds_pop()?;
    let a = ctx.ds_pop()?;
    let (x, y) = (a.as_int(), b.as_int());
    ctx.rt.heap().release_value(a);
    ctx.rt.heap().release_value(b);
    if y == 0 {
        return Err(Error::DivisionByZero);
    }
    ctx.ds_push(Value::Int(x.wrapping_div(y)));
    Ok(1)
}

/// INTMOD ( a b -- a%b ); division by zero traps.
fn op_intmod(ctx: &mut Context) -> Result<isize> {
    let b = ctx.ds_pop()?;
    let a = ctx.ds_pop()?;
    let (x, y) = (a.as_int(), b.as_int());
    ctx.rt.heap().release_value(a);
    ctx.rt.heap().release_value(b);
    if y == 0 {
        return Err(Error::DivisionByZero);
    }
    ctx.ds_push(Value::Int(x.wrapping_rem(y)));
    Ok(1)
}

/// STRLIT ( -- s ): inline u16 length then raw bytes. An embedded NUL
/// ends the stored string; the full run is always consumed.
fn op_strlit(ctx: &mut Context) -> Result<isize> {
    let len = usize::from(ctx.rd_u16(ctx.pc + 1)?);
    let start = ctx.pc + 1 + 2;
    let bytes = ctx
        .code
        .get(start..start + len)
        .ok_or(Error::TruncatedOperand { pc: ctx.pc })?;
    let stored = match bytes.iter().position(|&b| b == 0) {
        Some(nul) => &bytes[..nul],
        None => bytes,
    };
    let s = String::from_utf8_lossy(stored).into_owned();
    ctx.ds_push(Value::Str(s));
    Ok(1 + 2 + len as isize)
}

/// STRCAT ( a b -- ab ): string coercion of both, concatenated.
fn op_strcat(ctx: &mut Context) -> Result<isize> {
    let b = ctx.ds_pop()?;
    let a = ctx.ds_pop()?;
    let mut s = a.to_string();
    s.push_str(&b.to_string());
    ctx.rt.heap().release_value(a);
    ctx.rt.heap().release_value(b);
    ctx.ds_push(Value::Str(s));
    Ok(1)
}

/// FLTLIT ( -- a )
fn op_fltlit(ctx: &mut Context) -> Result<isize> {
    let lit = ctx.rd_f64(ctx.pc + 1)?;
    ctx.ds_push(Value::Float(lit));
    Ok(1 + 8)
}

/// FLTADD ( a b -- a+b )
fn op_fltadd(ctx: &mut Context) -> Result<isize> {
    flt_binop(ctx, |a, b| a + b)
}

/// FLTSUBT ( a b -- a-b )
fn op_fltsub(ctx: &mut Context) -> Result<isize> {
    flt_binop(ctx, |a, b| a - b)
}

/// FLTMULT ( a b -- a*b )
fn op_fltmul(ctx: &mut Context) -> Result<isize> {
    flt_binop(ctx, |a, b| a * b)
}

/// FLTDIV ( a b -- a/b ); IEEE semantics, no trap on zero.
fn op_fltdiv(ctx: &mut Context) -> Result<isize> {
    flt_binop(ctx, |a, b| a / b)
}

/// FLTMOD ( a b -- a%b ); result keeps the dividend's sign.
fn op_fltmod(ctx: &mut Context) -> Result<isize> {
    flt_binop(ctx, |a, b| a % b)
}

/// FUNLIT ( -- f ): inline entry offset; pushes a function reference.
fn op_funlit(ctx: &mut Context) -> Result<isize> {
    let entry = ctx.rd_u64(ctx.pc + 1)? as usize;
    let h = ctx.rt.heap().function_allocate(entry);
    ctx.ds_push(Value::FunctionRef(h));
    Ok(1 + 8)
}

// ---------------------------------------------------------------------
// output
// ---------------------------------------------------------------------

/// OUT ( a -- ): write the value as text to the default output stream.
fn op_out(ctx: &mut Context) -> Result<isize> {
    let a = ctx.ds_pop()?;
    ctx.rt.write_out(&a.to_string());
    ctx.rt.heap().release_value(a);
    Ok(1)
}

/// OUTL ( a -- ): OUT followed by a newline.
fn op_outl(ctx: &mut Context) -> Result<isize> {
    let a = ctx.ds_pop()?;
    let mut text = a.to_string();
    text.push('\n');
    ctx.rt.write_out(&text);
    ctx.rt.heap().release_value(a);
    Ok(1)
}
