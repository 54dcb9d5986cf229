// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hash opcodes end to end: auto-vivification, shared item cells, key
//! coercion, and deletion.

use rill_vm::symtab::SymbolKind;
use rill_vm::{Op, ProgramBuilder, Runtime};

const H: u64 = 40;

/// Indexing a missing key creates it: a later HRKEYEX prints 1.
#[test]
fn autovivify_then_exists() {
    let flags = SymbolKind::Hash.to_flags();

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, H);
    // ( k h -- cell ), then store 5 through the cell: ( a h -- )
    b.str_lit("x").sym_find(H).op(Op::HrIndex);
    b.int_lit(5).op(Op::Swap).op(Op::SrWrite);
    // exists? -> 1
    b.str_lit("x").sym_find(H).op(Op::HrKeyExists).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "1\n");
}

/// The item cell is shared: a second HRINDEX of the same key reads what
/// was stored through the first.
#[test]
fn hash_items_share_their_cell() {
    let flags = SymbolKind::Hash.to_flags();

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, H);
    b.str_lit("k").sym_find(H).op(Op::HrIndex);
    b.int_lit(7).op(Op::Swap).op(Op::SrWrite);
    b.str_lit("k").sym_find(H).op(Op::HrIndex).op(Op::SrRead).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "7\n");
}

/// Keys are materialized through the string coercion: the integer 1 and
/// the string "1" name the same item.
#[test]
fn keys_coerce_to_strings() {
    let flags = SymbolKind::Hash.to_flags();

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, H);
    b.int_lit(1).sym_find(H).op(Op::HrIndex);
    b.int_lit(9).op(Op::Swap).op(Op::SrWrite);
    b.str_lit("1").sym_find(H).op(Op::HrIndex).op(Op::SrRead).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "9\n");
}

/// Delete then exists prints 0; the deleted item's cell is released.
#[test]
fn delete_then_exists_is_zero() {
    let flags = SymbolKind::Hash.to_flags();

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, H);
    b.str_lit("gone").sym_find(H).op(Op::HrIndex).op(Op::Drop);
    b.str_lit("gone").sym_find(H).op(Op::HrKeyDelete);
    b.str_lit("gone").sym_find(H).op(Op::HrKeyExists).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "0\n");
    assert_eq!(rt.heap().stats().scalars, 0);
}
