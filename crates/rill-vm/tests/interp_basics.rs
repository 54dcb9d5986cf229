// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end interpreter tests: arithmetic, control flow, function
//! calls, and symbol opcodes running through complete programs.

use rill_vm::symtab::{SymbolKind, SYMBOL_FLAG_SHARED};
use rill_vm::{Error, Op, ProgramBuilder, Runtime};

/// `(3 + 4) * 2` prints 14.
#[test]
fn integer_arithmetic() {
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.int_lit(3)
        .int_lit(4)
        .op(Op::IntAdd)
        .int_lit(2)
        .op(Op::IntMul)
        .op(Op::OutL)
        .op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "14\n");
}

#[test]
fn integer_sub_div_mod() {
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    // (20 - 2) / 3 = 6; 6 % 4 = 2
    b.int_lit(20)
        .int_lit(2)
        .op(Op::IntSub)
        .int_lit(3)
        .op(Op::IntDiv)
        .int_lit(4)
        .op(Op::IntMod)
        .op(Op::OutL)
        .op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "2\n");
}

/// CALL into a body that pushes 7 and returns; the caller prints it and
/// the data stack must be empty at termination.
#[test]
fn function_call_returns_through_the_stack() {
    let mut b = ProgramBuilder::new();
    let body = b.here();
    b.int_lit(7).op(Op::Return);
    let entry = b.here();
    b.call(body).op(Op::OutL).op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    let mut ctx = rt.context();
    ctx.run().unwrap();
    assert_eq!(ctx.stack_depth(), 0);
    assert_eq!(ctx.frame_depth(), 0);
    assert_eq!(rt.output_text(out), "7\n");
}

/// FUNLIT + FRCALL behave like CALL with the target read from the
/// referenced function object.
#[test]
fn frcall_through_a_function_reference() {
    let mut b = ProgramBuilder::new();
    let body = b.here();
    b.int_lit(21).int_lit(2).op(Op::IntMul).op(Op::Return);
    let entry = b.here();
    b.fun_lit(body).op(Op::FrCall).op(Op::OutL).op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "42\n");
    // The function object allocated by FUNLIT was released by FRCALL.
    assert_eq!(rt.heap().stats().functions, 0);
}

#[test]
fn nested_calls_restore_scopes_and_return_addresses() {
    let mut b = ProgramBuilder::new();
    let inner = b.here();
    b.int_lit(1).op(Op::Return);
    let outer = b.here();
    b.call(inner).int_lit(2).op(Op::IntAdd).op(Op::Return);
    let entry = b.here();
    b.call(outer).op(Op::OutL).op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "3\n");
    // Every CALL scope was closed again: only the global scope remains.
    rt.garbage_collect();
    assert_eq!(rt.scopes().live(), 1);
}

/// BRANCH0 jumps over the OUTL when the popped value is false and falls
/// through when it is true.
#[test]
fn branch0_taken_and_not_taken() {
    for (flag, expected) in [(0, "done\n"), (1, "1\ndone\n")] {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.int_lit(flag);
        let skip = b.branch0();
        b.int_lit(1).op(Op::OutL);
        b.land(skip);
        b.str_lit("done").op(Op::OutL).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        let out = rt.capture_output();
        rt.run().unwrap();
        assert_eq!(rt.output_text(out), expected, "flag {flag}");
    }
}

#[test]
fn branch_loops_backward() {
    // Count down from 3, printing each value.
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.int_lit(3);
    let top = b.here();
    b.op(Op::Dup).op(Op::OutL);
    b.int_lit(1).op(Op::IntSub).op(Op::Dup);
    let exit = b.branch0();
    let back = b.here();
    b.branch_rel(top as i64 - back as i64);
    b.land(exit);
    b.op(Op::Drop).op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "3\n2\n1\n");
}

#[test]
fn string_literals_and_concatenation() {
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.str_lit("answer: ").int_lit(42).op(Op::StrCat).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "answer: 42\n");
}

#[test]
fn float_arithmetic_and_mod_sign() {
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.flt_lit(1.5).flt_lit(2.0).op(Op::FltMul).op(Op::OutL);
    // -7 % 3 keeps the dividend's sign.
    b.flt_lit(-7.0).flt_lit(3.0).op(Op::FltMod).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "3\n-1\n");
}

/// SYMDEF a scalar, write through SYMFIND, read it back; SYMUNDEF makes
/// SYMFIND yield 0 again.
#[test]
fn symbol_define_find_undefine() {
    const A: u64 = 11;
    let flags = SymbolKind::Scalar.to_flags();

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, A);
    // store 5 into the binding: ( a h -- )
    b.int_lit(5).sym_find(A).op(Op::SrWrite);
    // read it back
    b.sym_find(A).op(Op::SrRead).op(Op::OutL);
    // undefine: SYMFIND now pushes 0
    b.sym_undef(A);
    b.sym_find(A).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "5\n0\n");
    // The binding's cell was released by SYMUNDEF.
    assert_eq!(rt.heap().stats().scalars, 0);
}

/// A local binding shadows an outer one for the duration of the call.
#[test]
fn call_scopes_shadow_and_restore() {
    const X: u64 = 7;
    let flags = SymbolKind::Scalar.to_flags();

    let mut b = ProgramBuilder::new();
    let body = b.here();
    // Local x = 2, printed inside the call.
    b.sym_def(flags, X);
    b.int_lit(2).sym_find(X).op(Op::SrWrite);
    b.sym_find(X).op(Op::SrRead).op(Op::OutL);
    b.op(Op::Return);

    let entry = b.here();
    // Outer x = 1.
    b.sym_def(flags, X);
    b.int_lit(1).sym_find(X).op(Op::SrWrite);
    b.call(body);
    // Back outside: the outer binding is untouched.
    b.sym_find(X).op(Op::SrRead).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "2\n1\n");
}

/// SYMCLONE binds the same referent in the inner scope: writes through
/// the clone are visible outside.
#[test]
fn symclone_shares_the_referent() {
    const X: u64 = 3;
    let flags = SymbolKind::Scalar.to_flags() | SYMBOL_FLAG_SHARED;

    let mut b = ProgramBuilder::new();
    let body = b.here();
    b.sym_clone(X);
    b.int_lit(99).sym_find(X).op(Op::SrWrite);
    b.op(Op::Return);

    let entry = b.here();
    b.sym_def(flags, X);
    b.call(body);
    b.sym_find(X).op(Op::SrRead).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "99\n");
}

#[test]
fn array_opcodes_push_pop_shift_index() {
    const A: u64 = 21;
    let flags = SymbolKind::Array.to_flags();

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, A);
    // push 1, 2 then unshift 0: [0, 1, 2]
    b.int_lit(1).sym_find(A).op(Op::ArPush);
    b.int_lit(2).sym_find(A).op(Op::ArPush);
    b.int_lit(0).sym_find(A).op(Op::ArUnshift);
    // item_at(1) -> 1
    b.int_lit(1).sym_find(A).op(Op::ArIndex).op(Op::OutL);
    // shift -> 0, pop -> 2
    b.sym_find(A).op(Op::ArShift).op(Op::OutL);
    b.sym_find(A).op(Op::ArPop).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "1\n0\n2\n");
}

#[test]
fn srlock_srunlock_bracket_a_read_modify_write() {
    const X: u64 = 5;
    let flags = SymbolKind::Scalar.to_flags() | SYMBOL_FLAG_SHARED;

    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.sym_def(flags, X);
    b.int_lit(20).sym_find(X).op(Op::SrWrite);
    // h LOCK; read, add 1, write back through a second find; UNLOCK
    b.sym_find(X).op(Op::SrLock).op(Op::Dup).op(Op::SrRead);
    b.int_lit(1).op(Op::IntAdd);
    b.op(Op::Swap).op(Op::SrUnlock).op(Op::SrWrite);
    b.sym_find(X).op(Op::SrRead).op(Op::OutL);
    b.op(Op::End);

    let rt = Runtime::new(b.finish(entry));
    let out = rt.capture_output();
    rt.run().unwrap();
    assert_eq!(rt.output_text(out), "21\n");
}

#[test]
fn traps_surface_as_errors() {
    // Unknown opcode.
    let rt = Runtime::new(rill_vm::Program::new(vec![0, 0xEE], 1));
    assert!(matches!(rt.run(), Err(Error::UnknownOpcode(0xEE))));

    // Division by zero.
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.int_lit(9).int_lit(0).op(Op::IntDiv).op(Op::End);
    let rt = Runtime::new(b.finish(entry));
    assert!(matches!(rt.run(), Err(Error::DivisionByZero)));

    // RETURN with no frame.
    let mut b = ProgramBuilder::new();
    let entry = b.here();
    b.op(Op::Return);
    let rt = Runtime::new(b.finish(entry));
    assert!(matches!(rt.run(), Err(Error::ReturnStackUnderflow)));
}
