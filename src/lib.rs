//! Single-pass Lingo compiler and bytecode virtual machine.
//!
//! Source text is lexed by [`frontend`], compiled straight to a flat word
//! stream by [`bytecode::Compiler`] (no syntax tree), and executed by
//! [`runtime::Vm`] against a [`runtime::Host`].

pub mod bytecode;
pub mod frontend;
pub mod lang;
pub mod runtime;

use thiserror::Error;

use crate::bytecode::{CompileError, Compiler};
use crate::runtime::{Host, RuntimeError, Vm};

#[derive(Debug, Error)]
pub enum LingoError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

/// Compiles `source`, refusing scripts with syntax errors, and runs its
/// main block on a fresh VM.
pub fn compile_and_run(source: &str, host: &mut dyn Host) -> Result<Vm, LingoError> {
    let script = Compiler::new().compile(source)?.into_script()?;
    let mut vm = Vm::new();
    vm.run(&script, host)?;
    Ok(vm)
}
