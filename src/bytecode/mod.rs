pub mod buffer;
pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod patch;
pub mod stack_check;

pub use buffer::{BytecodeBuffer, EmitPosition};
pub use compile::{Compilation, Compiler, CompilerConfig};
pub use compile_error::{CompileError, Diagnostic, Severity};
pub use ir::ScriptBytecode;
pub use op::{Opcode, Word};
