use serde::{Deserialize, Serialize};

use crate::bytecode::compile_error::BytecodeError;

/// One slot of the instruction stream: an opcode, an operand, half of a
/// float, a literal index or a relative offset.
pub type Word = u32;

// =============================================================================
// OPCODE - instruction set
// =============================================================================

macro_rules! opcodes {
    ($($(#[$doc:meta])* $variant:ident = $value:literal, $mnemonic:literal, $operands:literal;)*) => {
        /// Bytecode instruction. The discriminant is the encoded word.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum Opcode {
            $($(#[$doc])* $variant = $value,)*
        }

        impl Opcode {
            /// Number of operand words that immediately follow the opcode.
            pub fn operand_words(self) -> usize {
                match self {
                    $(Opcode::$variant => $operands,)*
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }
        }

        impl TryFrom<Word> for Opcode {
            type Error = Word;

            fn try_from(word: Word) -> Result<Self, Word> {
                match word {
                    $($value => Ok(Opcode::$variant),)*
                    other => Err(other),
                }
            }
        }
    };
}

opcodes! {
    /// Terminates the current block.
    Stop = 0, "STOP", 0;

    // literals and stack
    PushInt = 1, "PUSH_INT", 1;
    /// High word then low word of the `f64` bit pattern.
    PushFloat = 2, "PUSH_FLOAT", 2;
    PushString = 3, "PUSH_STRING", 1;
    PushSymbol = 4, "PUSH_SYMBOL", 1;
    PushVoid = 5, "PUSH_VOID", 0;
    Pop = 6, "POP", 0;
    Swap = 7, "SWAP", 0;
    /// Pops a value and shows it through the host.
    Put = 8, "PUT", 0;

    // variables
    PushVar = 10, "PUSH_VAR", 1;
    PushGlobal = 11, "PUSH_GLOBAL", 1;
    PushProp = 12, "PUSH_PROP", 1;
    PushParam = 13, "PUSH_PARAM", 1;
    AssignVar = 14, "ASSIGN_VAR", 1;
    AssignGlobal = 15, "ASSIGN_GLOBAL", 1;
    AssignProp = 16, "ASSIGN_PROP", 1;
    AssignParam = 17, "ASSIGN_PARAM", 1;

    // the-entities
    TheEntityPush = 20, "THE_ENTITY_PUSH", 2;
    TheEntityWithIdPush = 21, "THE_ENTITY_WITH_ID_PUSH", 2;
    TheMenuItemPush = 22, "THE_MENU_ITEM_PUSH", 2;
    TheEntityAssign = 23, "THE_ENTITY_ASSIGN", 2;
    TheEntityWithIdAssign = 24, "THE_ENTITY_WITH_ID_ASSIGN", 2;
    TheMenuItemAssign = 25, "THE_MENU_ITEM_ASSIGN", 2;
    ObjectFieldPush = 26, "OBJECT_FIELD_PUSH", 1;
    ObjectFieldAssign = 27, "OBJECT_FIELD_ASSIGN", 1;

    // arithmetic
    Add = 30, "ADD", 0;
    Sub = 31, "SUB", 0;
    Mul = 32, "MUL", 0;
    Div = 33, "DIV", 0;
    Mod = 34, "MOD", 0;
    Negate = 35, "NEGATE", 0;

    // comparison
    Eq = 40, "EQ", 0;
    NotEq = 41, "NOT_EQ", 0;
    Lt = 42, "LT", 0;
    LtEq = 43, "LT_EQ", 0;
    Gt = 44, "GT", 0;
    GtEq = 45, "GT_EQ", 0;

    // logic
    And = 50, "AND", 0;
    Or = 51, "OR", 0;
    Not = 52, "NOT", 0;

    // strings and chunks
    Concat = 60, "CONCAT", 0;
    ConcatSpace = 61, "CONCAT_SPACE", 0;
    Contains = 62, "CONTAINS", 0;
    Starts = 63, "STARTS", 0;
    CharOf = 64, "CHAR_OF", 0;
    WordOf = 65, "WORD_OF", 0;
    ItemOf = 66, "ITEM_OF", 0;
    LineOf = 67, "LINE_OF", 0;
    CharToOf = 68, "CHAR_TO_OF", 0;
    WordToOf = 69, "WORD_TO_OF", 0;
    ItemToOf = 70, "ITEM_TO_OF", 0;
    LineToOf = 71, "LINE_TO_OF", 0;

    // sprite geometry
    Intersects = 75, "INTERSECTS", 0;
    Within = 76, "WITHIN", 0;

    // structured control flow; offsets are relative to the opcode word
    /// `then else end`; pops the condition.
    IfCode = 80, "IF_CODE", 3;
    /// `body end`; the condition block follows the operands.
    RepeatWhile = 81, "REPEAT_WHILE", 2;
    /// `init finish body inc end` plus the loop variable `scope ref`.
    RepeatWith = 82, "REPEAT_WITH", 7;
    /// `end`; pops the tell target.
    Tell = 83, "TELL", 1;
    /// `end event`; registers the handler body for `event`.
    WhenCode = 84, "WHEN_CODE", 2;
    Jump = 85, "JUMP", 1;
    ExitRepeat = 86, "EXIT_REPEAT", 0;
    NextRepeat = 87, "NEXT_REPEAT", 0;

    // calls
    Call = 90, "CALL", 2;
    CallBuiltin = 91, "CALL_BUILTIN", 2;
    /// Receiver is pushed before the arguments.
    ObjCall = 92, "OBJ_CALL", 1;
    ProcReturn = 93, "PROC_RETURN", 0;
    ReturnValue = 94, "RETURN_VALUE", 0;

    // navigation
    GoTo = 100, "GO_TO", 0;
    Play = 101, "PLAY", 0;
    GoLoop = 102, "GO_LOOP", 0;
    GoNext = 103, "GO_NEXT", 0;
    GoPrevious = 104, "GO_PREVIOUS", 0;
    PlayDone = 105, "PLAY_DONE", 0;
}

impl From<Opcode> for Word {
    fn from(op: Opcode) -> Word {
        op as Word
    }
}

/// Scope of the loop variable named by `REPEAT_WITH`'s `scope ref` words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum VarScope {
    Local = 0,
    Global = 1,
    Property = 2,
    Param = 3,
}

impl TryFrom<Word> for VarScope {
    type Error = Word;

    fn try_from(word: Word) -> Result<Self, Word> {
        match word {
            0 => Ok(VarScope::Local),
            1 => Ok(VarScope::Global),
            2 => Ok(VarScope::Property),
            3 => Ok(VarScope::Param),
            other => Err(other),
        }
    }
}

/// A decoded instruction borrowed from the word stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr<'a> {
    pub pos: usize,
    pub op: Opcode,
    pub operands: &'a [Word],
}

impl Instr<'_> {
    /// Position of the next instruction.
    pub fn next(&self) -> usize {
        self.pos + 1 + self.operands.len()
    }

    /// Absolute target of the relative offset stored in operand `index`.
    pub fn target(&self, index: usize) -> usize {
        offset_target(self.pos, self.operands[index])
    }
}

/// Applies a relative offset word to its anchor.
pub fn offset_target(anchor: usize, offset: Word) -> usize {
    (anchor as i64 + offset as i32 as i64) as usize
}

/// Decodes the instruction at `pos`, checking that all its operand words
/// are present.
pub fn decode(code: &[Word], pos: usize) -> Result<Instr<'_>, BytecodeError> {
    let word = *code
        .get(pos)
        .ok_or(BytecodeError::OutOfBounds { pos, len: code.len() })?;
    let op = Opcode::try_from(word).map_err(|word| BytecodeError::UnknownOpcode { pos, word })?;
    let end = pos + 1 + op.operand_words();
    if end > code.len() {
        return Err(BytecodeError::TruncatedOperands {
            pos,
            op: op.mnemonic(),
        });
    }
    Ok(Instr {
        pos,
        op,
        operands: &code[pos + 1..end],
    })
}

pub fn encode_int(n: i32) -> Word {
    n as Word
}

pub fn decode_int(word: Word) -> i32 {
    word as i32
}

pub fn encode_float(n: f64) -> [Word; 2] {
    let bits = n.to_bits();
    [(bits >> 32) as Word, bits as Word]
}

pub fn decode_float(hi: Word, lo: Word) -> f64 {
    f64::from_bits(((hi as u64) << 32) | lo as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_words_round_trip() {
        for word in 0..128 {
            if let Ok(op) = Opcode::try_from(word) {
                assert_eq!(Word::from(op), word);
            }
        }
        assert_eq!(Opcode::try_from(9999), Err(9999));
    }

    #[test]
    fn test_operand_counts() {
        assert_eq!(Opcode::IfCode.operand_words(), 3);
        assert_eq!(Opcode::RepeatWhile.operand_words(), 2);
        assert_eq!(Opcode::RepeatWith.operand_words(), 7);
        assert_eq!(Opcode::Tell.operand_words(), 1);
        assert_eq!(Opcode::PushFloat.operand_words(), 2);
        assert_eq!(Opcode::Add.operand_words(), 0);
    }

    #[test]
    fn test_decode() {
        let code = [Opcode::PushInt as Word, 7, Opcode::Stop as Word];
        let instr = decode(&code, 0).unwrap();
        assert_eq!(instr.op, Opcode::PushInt);
        assert_eq!(instr.operands, &[7]);
        assert_eq!(instr.next(), 2);
    }

    #[test]
    fn test_decode_truncated() {
        let code = [Opcode::Call as Word, 0];
        let err = decode(&code, 0).unwrap_err();
        assert!(err.to_string().contains("CALL"));
    }

    #[test]
    fn test_decode_unknown() {
        let err = decode(&[4242], 0).unwrap_err();
        assert!(matches!(err, BytecodeError::UnknownOpcode { word: 4242, .. }));
    }

    #[test]
    fn test_negative_offsets() {
        assert_eq!(offset_target(10, encode_int(-4)), 6);
        assert_eq!(offset_target(10, 5), 15);
    }

    #[test]
    fn test_float_words() {
        let [hi, lo] = encode_float(-2.5);
        assert_eq!(decode_float(hi, lo), -2.5);
        assert_eq!(decode_int(encode_int(-1)), -1);
        assert_eq!(encode_int(-1), 0xFFFF_FFFF);
    }
}
