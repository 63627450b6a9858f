//! # Runtime
//!
//! The stop-structured bytecode VM and the host boundary it talks to.

pub mod host;
pub mod runtime_error;
pub mod vm;

pub use host::{Host, MemoryHost, Navigation};
pub use runtime_error::RuntimeError;
pub use vm::{Vm, VmConfig};
