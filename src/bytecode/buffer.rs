use std::collections::HashMap;

use crate::bytecode::compile_error::CompileError;
use crate::bytecode::op::{Opcode, Word, encode_float, encode_int};

/// Index of a word in the buffer, returned by every emission call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EmitPosition(pub usize);

impl std::fmt::Display for EmitPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// String/symbol literals referenced by operand words.
#[derive(Debug, Clone, Default)]
pub struct LiteralPool {
    strings: Vec<String>,
    index: HashMap<String, u32>,
    dedup: bool,
}

impl LiteralPool {
    pub fn new(dedup: bool) -> Self {
        LiteralPool {
            strings: Vec::new(),
            index: HashMap::new(),
            dedup,
        }
    }

    /// Adds `text`, reusing an existing slot when deduplication is on.
    pub fn intern(&mut self, text: &str) -> u32 {
        if self.dedup {
            if let Some(&idx) = self.index.get(text) {
                return idx;
            }
        }
        let idx = self.strings.len() as u32;
        self.strings.push(text.to_string());
        if self.dedup {
            self.index.insert(text.to_string(), idx);
        }
        idx
    }

    pub fn get(&self, idx: u32) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.strings
    }
}

/// The growable word stream of one compilation.
#[derive(Debug, Default)]
pub struct BytecodeBuffer {
    code: Vec<Word>,
    literals: LiteralPool,
    /// Reserved slots not yet resolved; maintained by the back-patcher.
    pub(crate) outstanding: usize,
}

impl BytecodeBuffer {
    pub fn new(dedup_literals: bool) -> Self {
        BytecodeBuffer {
            code: Vec::new(),
            literals: LiteralPool::new(dedup_literals),
            outstanding: 0,
        }
    }

    pub fn emit_opcode(&mut self, op: Opcode) -> EmitPosition {
        self.emit_operand(op.into())
    }

    pub fn emit_operand(&mut self, word: Word) -> EmitPosition {
        let pos = self.current_position();
        self.code.push(word);
        pos
    }

    /// Interns `text` and emits its literal index.
    pub fn emit_string(&mut self, text: &str) -> EmitPosition {
        let idx = self.intern(text);
        self.emit_operand(idx)
    }

    pub fn intern(&mut self, text: &str) -> Word {
        self.literals.intern(text)
    }

    pub fn emit_push_int(&mut self, n: i32) -> EmitPosition {
        let pos = self.emit_opcode(Opcode::PushInt);
        self.emit_operand(encode_int(n));
        pos
    }

    pub fn emit_push_float(&mut self, n: f64) -> EmitPosition {
        let pos = self.emit_opcode(Opcode::PushFloat);
        let [hi, lo] = encode_float(n);
        self.emit_operand(hi);
        self.emit_operand(lo);
        pos
    }

    /// Opcode followed by one literal operand.
    pub fn emit_with_literal(&mut self, op: Opcode, text: &str) -> EmitPosition {
        let pos = self.emit_opcode(op);
        self.emit_string(text);
        pos
    }

    pub fn current_position(&self) -> EmitPosition {
        EmitPosition(self.code.len())
    }

    pub fn patch_word(&mut self, pos: EmitPosition, value: Word) -> Result<(), CompileError> {
        let len = self.code.len();
        let slot = self
            .code
            .get_mut(pos.0)
            .ok_or_else(|| CompileError::patch_out_of_bounds(pos.0, len))?;
        *slot = value;
        Ok(())
    }

    pub fn word_at(&self, pos: EmitPosition) -> Option<Word> {
        self.code.get(pos.0).copied()
    }

    pub fn literals(&self) -> &LiteralPool {
        &self.literals
    }

    pub fn code(&self) -> &[Word] {
        &self.code
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Word>, Vec<String>) {
        (self.code, self.literals.into_vec())
    }
}
