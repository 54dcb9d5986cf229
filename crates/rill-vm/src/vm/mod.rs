// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The interpreter.
//!
//! One opcode at a time: the byte at the program counter selects a
//! handler from the instruction table, the handler reads its inline
//! operands and performs its stack effect, and the signed delta it
//! returns advances the counter. END and NOOP short-circuit before the
//! table.
//!
//! Termination: END with an empty return stack, or the counter walking
//! off the end of the buffer. END under a live call frame, an unknown
//! opcode, a truncated operand, or a trap from a handler terminates the
//! context with an error; the context's stacks are cleaned up when it is
//! dropped.

mod context;
mod ops;

pub use context::Context;

use crate::bytecode::Op;
use crate::{Error, Result};

impl Context {
    /// Run this context to termination.
    pub fn run(&mut self) -> Result<()> {
        let len = self.code.len();
        while self.pc < len {
            let byte = self.code[self.pc];
            let op = Op::from_byte(byte).ok_or(Error::UnknownOpcode(byte))?;

            #[cfg(feature = "trace-dispatch")]
            log::trace!(
                "[vm] pc={:<6} {:8} depth={}",
                self.pc,
                op.mnemonic(),
                self.stack_depth()
            );

            match op {
                Op::End => {
                    if self.frame_depth() != 0 {
                        return Err(Error::UnbalancedReturn);
                    }
                    return Ok(());
                }
                Op::Noop => self.pc += 1,
                _ => {
                    let delta = ops::TABLE[byte as usize](self)?;
                    debug_assert!(delta != 0, "{} returned a zero delta", op.mnemonic());
                    let next = self.pc as isize + delta;
                    if next < 0 {
                        return Err(Error::PcOutOfRange {
                            pc: self.pc,
                            len,
                        });
                    }
                    self.pc = next as usize;
                }
            }
        }
        // Walking off the end is a clean termination.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::bytecode::{Op, ProgramBuilder};
    use crate::runtime::Runtime;
    use crate::Error;

    #[test]
    fn swap_exchanges_the_top_two() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.int_lit(1).int_lit(2).op(Op::Swap).op(Op::OutL).op(Op::OutL).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        let out = rt.capture_output();
        rt.run().unwrap();
        assert_eq!(rt.output_text(out), "1\n2\n");
    }

    #[test]
    fn dup_and_over_copy_without_consuming() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        // ( 7 9 ) OVER -> ( 7 9 7 ); DUP -> ( 7 9 7 7 )
        b.int_lit(7).int_lit(9).op(Op::Over).op(Op::Dup);
        b.op(Op::OutL).op(Op::OutL).op(Op::OutL).op(Op::OutL).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        let out = rt.capture_output();
        rt.run().unwrap();
        assert_eq!(rt.output_text(out), "7\n7\n9\n7\n");
    }

    #[test]
    fn noop_advances_and_end_pad_terminates() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.op(Op::Noop).op(Op::Noop).int_lit(1).op(Op::OutL).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        let out = rt.capture_output();
        rt.run().unwrap();
        assert_eq!(rt.output_text(out), "1\n");
    }

    #[test]
    fn unknown_opcode_is_a_trap() {
        let rt = Runtime::new(crate::Program::new(vec![0, 0xEE], 1));
        assert!(matches!(rt.run(), Err(Error::UnknownOpcode(0xEE))));
    }

    #[test]
    fn truncated_operand_is_a_trap() {
        // INTLIT with only four of its eight operand bytes.
        let code = vec![0, Op::IntLit as u8, 1, 2, 3, 4];
        let rt = Runtime::new(crate::Program::new(code, 1));
        assert!(matches!(rt.run(), Err(Error::TruncatedOperand { .. })));
    }

    #[test]
    fn pop_from_empty_stack_is_a_trap() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.op(Op::Drop).op(Op::End);
        let rt = Runtime::new(b.finish(entry));
        assert!(matches!(rt.run(), Err(Error::StackUnderflow)));
    }

    #[test]
    fn division_by_zero_is_a_trap() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.int_lit(1).int_lit(0).op(Op::IntDiv).op(Op::End);
        let rt = Runtime::new(b.finish(entry));
        assert!(matches!(rt.run(), Err(Error::DivisionByZero)));
    }

    #[test]
    fn end_inside_a_call_is_a_trap() {
        let mut b = ProgramBuilder::new();
        // Function body that ends the world instead of returning.
        let body = b.here();
        b.op(Op::End);
        let entry = b.here();
        b.call(body).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        assert!(matches!(rt.run(), Err(Error::UnbalancedReturn)));
    }

    #[test]
    fn trapped_context_releases_its_stack() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        // Leave a string on the stack, then trap.
        b.str_lit("leak?").int_lit(1).int_lit(0).op(Op::IntMod).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        {
            let mut ctx = rt.context();
            assert!(matches!(ctx.run(), Err(Error::DivisionByZero)));
            assert_eq!(ctx.stack_depth(), 1);
        }
        // Context dropped: its root scope is gone from the registry.
        assert_eq!(rt.scopes().live(), 1); // only the global scope
    }

    #[test]
    fn type_mismatch_releases_the_operands() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        // SRREAD of a plain integer.
        b.int_lit(3).op(Op::SrRead).op(Op::End);
        let rt = Runtime::new(b.finish(entry));
        assert!(matches!(
            rt.run(),
            Err(Error::TypeMismatch {
                expected: "scalar ref",
                ..
            })
        ));
    }

    #[test]
    fn values_round_trip_through_the_stack() {
        let mut b = ProgramBuilder::new();
        let entry = b.here();
        b.str_lit("keep").flt_lit(2.5).op(Op::Swap);
        b.op(Op::OutL).op(Op::OutL).op(Op::End);

        let rt = Runtime::new(b.finish(entry));
        let out = rt.capture_output();
        rt.run().unwrap();
        assert_eq!(rt.output_text(out), "keep\n2.5\n");
    }
}
