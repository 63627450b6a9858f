//! # Lingo runtime values
//!
//! The value model shared by the compiler (constants, `the` references,
//! built-in table) and the VM (operators, chunks, built-in evaluation).

pub mod builtins;
pub mod entity;
pub mod value;
