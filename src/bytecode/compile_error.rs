use crate::frontend::lexer::{LexerError, Span};
use crate::frontend::token::Token;

// =============================================================================
// DIAGNOSTICS - reported through the compiler callback
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A message reported while compiling. Errors mark the compilation as failed,
/// warnings do not.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}:{}: {}: {}", self.line, self.col, kind, self.message)
    }
}

/// Recoverable syntax error. The statement parser reports it and skips to
/// the next line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        SyntaxError {
            message: message.into(),
            line: span.line,
            col: span.col,
        }
    }

    /// `expected X, found Y`
    pub fn unexpected(found: &Token, expected: &str, span: Span) -> Self {
        Self::new(
            format!("expected {}, found {}", expected, found.describe()),
            span,
        )
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        Diagnostic {
            severity: Severity::Error,
            message: self.message,
            line: self.line,
            col: self.col,
        }
    }
}

// =============================================================================
// COMPILE ERROR - fatal
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// The source could not be tokenized.
    #[error("compile error: {0}")]
    Lexer(#[from] LexerError),

    /// Broken compiler invariant: patching outside the buffer, a reservation
    /// left unresolved, a keyword without an opcode.
    #[error("compile error: internal error: {0}")]
    Internal(String),

    /// A script with syntax errors was handed to something that runs it.
    #[error("compile error: script rejected after {errors} error(s)")]
    Rejected { errors: usize },
}

impl CompileError {
    pub fn internal(msg: impl Into<String>) -> Self {
        CompileError::Internal(msg.into())
    }

    pub fn patch_out_of_bounds(pos: usize, len: usize) -> Self {
        CompileError::Internal(format!(
            "patch at word {} is outside the buffer ({} words)",
            pos, len
        ))
    }

    pub fn unresolved_reservations(count: usize) -> Self {
        CompileError::Internal(format!(
            "{} reserved jump slot(s) left unresolved at end of compilation",
            count
        ))
    }
}

// =============================================================================
// BYTECODE ERROR - malformed word streams
// =============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BytecodeError {
    #[error("bytecode error: position {pos} is outside the code ({len} words)")]
    OutOfBounds { pos: usize, len: usize },

    #[error("bytecode error: unknown opcode {word:#x} at {pos}")]
    UnknownOpcode { pos: usize, word: u32 },

    #[error("bytecode error: {op} at {pos} is missing operand words")]
    TruncatedOperands { pos: usize, op: &'static str },

    #[error("bytecode error: invalid operand {word:#x} for {op} at {pos}")]
    InvalidOperand {
        pos: usize,
        op: &'static str,
        word: u32,
    },

    #[error("bytecode error: literal index {index} out of range at {pos}")]
    BadLiteral { pos: usize, index: u32 },

    #[error("bytecode error: serialization failed: {0}")]
    Serialization(String),
}
