use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::bytecode::compile_error::BytecodeError;
use crate::bytecode::op::Word;

/// A compiled script: one word stream holding the main block and every
/// handler body, plus the tables needed to run it.
///
/// Convention: the main block starts at word 0 and ends with `STOP`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptBytecode {
    pub code: Vec<Word>,

    /// String and symbol literals, indexed by operand words.
    pub literals: Vec<String>,

    /// Top-level handlers (`on` and `macro`): name -> entry.
    pub handlers: BTreeMap<String, ProcedureEntry>,

    /// Factories: name -> methods and instance variables.
    pub factories: BTreeMap<String, FactoryEntry>,

    /// Properties declared at script level.
    pub properties: Vec<String>,
}

/// Where a procedure body starts and how it is called.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureEntry {
    pub name: String,

    /// First word of the body.
    pub entry: u32,

    /// Declared parameters. Factory methods take `me` in an extra slot 0.
    pub arity: u32,

    /// Owning factory for methods.
    pub factory: Option<String>,
}

impl ProcedureEntry {
    /// Number of parameter slots in a frame running this procedure.
    pub fn slot_count(&self) -> usize {
        self.arity as usize + usize::from(self.factory.is_some())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryEntry {
    pub name: String,
    pub methods: BTreeMap<String, ProcedureEntry>,
    pub ivars: Vec<String>,
}

impl ScriptBytecode {
    pub fn literal(&self, index: Word) -> Option<&str> {
        self.literals.get(index as usize).map(String::as_str)
    }

    pub fn handler(&self, name: &str) -> Option<&ProcedureEntry> {
        self.handlers.get(&name.to_ascii_lowercase())
    }

    pub fn factory(&self, name: &str) -> Option<&FactoryEntry> {
        self.factories.get(&name.to_ascii_lowercase())
    }

    /// Encodes the script with postcard.
    pub fn to_bytes(&self) -> Result<Vec<u8>, BytecodeError> {
        postcard::to_allocvec(self).map_err(|e| BytecodeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BytecodeError> {
        postcard::from_bytes(bytes).map_err(|e| BytecodeError::Serialization(e.to_string()))
    }
}
