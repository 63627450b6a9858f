//! Reserved placeholder words and their resolution.
//!
//! Control constructs know their block boundaries only after the blocks have
//! been emitted. They reserve a zero word, keep the returned token, and
//! resolve it once the target is known. Tokens are move-only so a slot can
//! be resolved at most once; the buffer counts outstanding tokens so a slot
//! that was never resolved is caught at the end of compilation.

use crate::bytecode::buffer::{BytecodeBuffer, EmitPosition};
use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::{Word, encode_int};

/// Which boundary a reserved offset points at. Used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    Then,
    Else,
    End,
    Body,
    Init,
    Finish,
    /// Jump over a handler body at definition time.
    Skip,
}

/// A reserved offset word, relative to `anchor`.
#[must_use = "a reserved jump slot must be resolved"]
#[derive(Debug, PartialEq, Eq)]
pub struct PendingJump {
    anchor: EmitPosition,
    slot: EmitPosition,
    kind: JumpKind,
}

impl PendingJump {
    pub fn anchor(&self) -> EmitPosition {
        self.anchor
    }

    pub fn slot(&self) -> EmitPosition {
        self.slot
    }

    pub fn kind(&self) -> JumpKind {
        self.kind
    }
}

/// A reserved literal word filled in once its value is known.
#[must_use = "a reserved word must be filled"]
#[derive(Debug, PartialEq, Eq)]
pub struct PendingWord {
    slot: EmitPosition,
}

impl BytecodeBuffer {
    /// Emits a zero placeholder for an offset measured from `anchor`.
    pub fn reserve_jump(&mut self, anchor: EmitPosition, kind: JumpKind) -> PendingJump {
        let slot = self.emit_operand(0);
        self.outstanding += 1;
        PendingJump { anchor, slot, kind }
    }

    pub fn reserve_word(&mut self) -> PendingWord {
        let slot = self.emit_operand(0);
        self.outstanding += 1;
        PendingWord { slot }
    }

    /// Writes `target - anchor` into the reserved slot.
    pub fn resolve(&mut self, pending: PendingJump, target: EmitPosition) -> Result<(), CompileError> {
        let offset = target.0 as i64 - pending.anchor.0 as i64;
        let offset = i32::try_from(offset).map_err(|_| {
            CompileError::internal(format!(
                "{:?} offset from {} to {} does not fit in a word",
                pending.kind, pending.anchor, target
            ))
        })?;
        self.patch_word(pending.slot, encode_int(offset))?;
        self.outstanding -= 1;
        tracing::trace!(
            kind = ?pending.kind,
            anchor = pending.anchor.0,
            target = target.0,
            "resolved jump"
        );
        Ok(())
    }

    /// Resolves to the next word to be emitted.
    pub fn resolve_here(&mut self, pending: PendingJump) -> Result<(), CompileError> {
        let here = self.current_position();
        self.resolve(pending, here)
    }

    pub fn fill(&mut self, pending: PendingWord, value: Word) -> Result<(), CompileError> {
        self.patch_word(pending.slot, value)?;
        self.outstanding -= 1;
        Ok(())
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }
}
