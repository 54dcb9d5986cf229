// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Programs and the programmatic emitter.
//!
//! [`Program`] is the contract between the (external) assembler and the
//! VM: the flat byte buffer plus its declared entry offset. The buffer is
//! shared so any number of contexts can execute it in parallel.
//!
//! [`ProgramBuilder`] emits that format directly from host code; the
//! driver and the test suite use it in place of the textual assembler.

use std::sync::Arc;

use super::{Ident, Op};

/// An assembled program: flat bytecode plus entry offset.
#[derive(Clone, Debug)]
pub struct Program {
    code: Arc<[u8]>,
    entry: usize,
}

impl Program {
    /// Wrap an assembled byte buffer. `entry` is the byte offset
    /// execution starts at.
    pub fn new(code: Vec<u8>, entry: usize) -> Self {
        Program {
            code: code.into(),
            entry,
        }
    }

    pub fn code(&self) -> &Arc<[u8]> {
        &self.code
    }

    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// Patch token for a forward branch; see [`ProgramBuilder::branch`].
#[derive(Clone, Copy, Debug)]
#[must_use = "an unpatched branch jumps to offset 0"]
pub struct Jump {
    /// Offset of the branch opcode byte.
    at: usize,
}

/// Emits bytecode in the canonical encoding.
///
/// The buffer starts with the conventional END pad at offset 0, so the
/// first emitted instruction lands at offset 1.
pub struct ProgramBuilder {
    code: Vec<u8>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            code: vec![Op::End as u8],
        }
    }

    /// Offset the next emitted byte will land at.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Emit a bare opcode.
    pub fn op(&mut self, op: Op) -> &mut Self {
        self.code.push(op as u8);
        self
    }

    /// INTLIT with its inline `i64`.
    pub fn int_lit(&mut self, value: i64) -> &mut Self {
        self.op(Op::IntLit);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// FLTLIT with its inline `f64`.
    pub fn flt_lit(&mut self, value: f64) -> &mut Self {
        self.op(Op::FltLit);
        self.code.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// STRLIT with its inline length and raw bytes. Lengths beyond
    /// `u16::MAX` are truncated (and logged); the wire format has no way
    /// to carry them.
    pub fn str_lit(&mut self, value: &str) -> &mut Self {
        let bytes = value.as_bytes();
        let len = if bytes.len() > usize::from(u16::MAX) {
            log::warn!("[bytecode] string literal truncated to 65535 bytes");
            usize::from(u16::MAX)
        } else {
            bytes.len()
        };
        self.op(Op::StrLit);
        self.code.extend_from_slice(&(len as u16).to_le_bytes());
        self.code.extend_from_slice(&bytes[..len]);
        self
    }

    /// FUNLIT with the function's absolute entry offset.
    pub fn fun_lit(&mut self, entry: usize) -> &mut Self {
        self.op(Op::FunLit);
        self.code.extend_from_slice(&(entry as u64).to_le_bytes());
        self
    }

    /// CALL to an absolute byte offset.
    pub fn call(&mut self, target: usize) -> &mut Self {
        self.op(Op::Call);
        self.code.extend_from_slice(&(target as u64).to_le_bytes());
        self
    }

    /// BRANCH with a placeholder offset; patch with
    /// [`land`](ProgramBuilder::land) or [`patch`](ProgramBuilder::patch).
    pub fn branch(&mut self) -> Jump {
        let at = self.here();
        self.op(Op::Branch);
        self.code.extend_from_slice(&0i64.to_le_bytes());
        Jump { at }
    }

    /// BRANCH0 with a placeholder offset.
    pub fn branch0(&mut self) -> Jump {
        let at = self.here();
        self.op(Op::Branch0);
        self.code.extend_from_slice(&0i64.to_le_bytes());
        Jump { at }
    }

    /// BRANCH with a known relative offset (from the opcode byte).
    pub fn branch_rel(&mut self, offset: i64) -> &mut Self {
        self.op(Op::Branch);
        self.code.extend_from_slice(&offset.to_le_bytes());
        self
    }

    /// Point a recorded jump at an absolute target offset.
    pub fn patch(&mut self, jump: Jump, target: usize) -> &mut Self {
        let offset = target as i64 - jump.at as i64;
        self.code[jump.at + 1..jump.at + 9].copy_from_slice(&offset.to_le_bytes());
        self
    }

    /// Point a recorded jump at the current position.
    pub fn land(&mut self, jump: Jump) -> &mut Self {
        let here = self.here();
        self.patch(jump, here)
    }

    /// SYMDEF with inline flags and identifier.
    pub fn sym_def(&mut self, flags: u32, ident: Ident) -> &mut Self {
        self.op(Op::SymDef);
        self.code.extend_from_slice(&flags.to_le_bytes());
        self.code.extend_from_slice(&ident.to_le_bytes());
        self
    }

    /// SYMFIND with its inline identifier.
    pub fn sym_find(&mut self, ident: Ident) -> &mut Self {
        self.op(Op::SymFind);
        self.code.extend_from_slice(&ident.to_le_bytes());
        self
    }

    /// SYMCLONE with its inline identifier.
    pub fn sym_clone(&mut self, ident: Ident) -> &mut Self {
        self.op(Op::SymClone);
        self.code.extend_from_slice(&ident.to_le_bytes());
        self
    }

    /// SYMUNDEF with its inline identifier.
    pub fn sym_undef(&mut self, ident: Ident) -> &mut Self {
        self.op(Op::SymUndef);
        self.code.extend_from_slice(&ident.to_le_bytes());
        self
    }

    /// Finish the buffer into a [`Program`] starting at `entry`.
    pub fn finish(self, entry: usize) -> Program {
        Program::new(self.code, entry)
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_the_end_pad() {
        let b = ProgramBuilder::new();
        assert_eq!(b.here(), 1);
        let p = b.finish(1);
        assert_eq!(p.code()[0], Op::End as u8);
        assert_eq!(p.entry(), 1);
    }

    #[test]
    fn int_lit_encodes_little_endian() {
        let mut b = ProgramBuilder::new();
        b.int_lit(0x0102_0304_0506_0708);
        let p = b.finish(1);
        assert_eq!(p.code()[1], Op::IntLit as u8);
        assert_eq!(
            &p.code()[2..10],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn str_lit_carries_length_and_bytes() {
        let mut b = ProgramBuilder::new();
        b.str_lit("hey");
        let p = b.finish(1);
        assert_eq!(p.code()[1], Op::StrLit as u8);
        assert_eq!(&p.code()[2..4], &[3, 0]);
        assert_eq!(&p.code()[4..7], b"hey");
    }

    #[test]
    fn branch_patching_is_relative_to_the_opcode() {
        let mut b = ProgramBuilder::new();
        let j = b.branch0();
        b.int_lit(1);
        let target = b.here();
        b.op(Op::End);
        b.patch(j, target);

        let p = b.finish(1);
        let offset = i64::from_le_bytes(p.code()[2..10].try_into().unwrap());
        assert_eq!(offset, target as i64 - 1);
    }

    #[test]
    fn sym_def_packs_flags_then_ident() {
        let mut b = ProgramBuilder::new();
        b.sym_def(0x0101, 77);
        let p = b.finish(1);
        assert_eq!(p.code()[1], Op::SymDef as u8);
        assert_eq!(u32::from_le_bytes(p.code()[2..6].try_into().unwrap()), 0x0101);
        assert_eq!(u64::from_le_bytes(p.code()[6..14].try_into().unwrap()), 77);
    }
}
