use crate::bytecode::compile_error::BytecodeError;
use crate::bytecode::stack_check::StackCheckError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("runtime error: {message}{}", format_call_stack(.call_stack))]
pub struct RuntimeError {
    pub message: String,
    pub call_stack: Vec<String>,
}

fn format_call_stack(call_stack: &[String]) -> String {
    if call_stack.is_empty() {
        return String::new();
    }

    let mut out = String::from("\n  call stack:");
    for (i, frame) in call_stack.iter().rev().enumerate() {
        out.push_str(&format!("\n    {}: {}", i, frame));
    }
    out
}

impl RuntimeError {
    pub fn new(msg: impl Into<String>) -> Self {
        RuntimeError {
            message: msg.into(),
            call_stack: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.call_stack.push(context.to_string());
        self
    }
}

impl From<BytecodeError> for RuntimeError {
    fn from(err: BytecodeError) -> Self {
        RuntimeError::new(err.to_string())
    }
}

impl From<StackCheckError> for RuntimeError {
    fn from(err: StackCheckError) -> Self {
        RuntimeError::new(err.to_string())
    }
}

pub fn stack_underflow(op: &str) -> RuntimeError {
    RuntimeError::new(format!("stack underflow in {}", op))
}

pub fn type_error(op: &str, expected: &str, got: &str) -> RuntimeError {
    RuntimeError::new(format!(
        "type error in {}: expected {}, got {}",
        op, expected, got
    ))
}

pub fn division_by_zero() -> RuntimeError {
    RuntimeError::new("division by zero")
}

pub fn undefined_handler(name: &str) -> RuntimeError {
    RuntimeError::new(format!("call to undefined handler '{}'", name))
}

pub fn undefined_variable(name: &str) -> RuntimeError {
    RuntimeError::new(format!("variable '{}' used before assignment", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_without_call_stack() {
        let err = RuntimeError::new("boom");
        assert_eq!(err.to_string(), "runtime error: boom");
    }

    #[test]
    fn test_display_lists_innermost_frame_first() {
        let err = division_by_zero()
            .with_context("in handler 'inner'")
            .with_context("in handler 'outer'");
        let msg = err.to_string();
        assert!(msg.starts_with("runtime error: division by zero"));
        let outer = msg.find("0: in handler 'outer'").unwrap();
        let inner = msg.find("1: in handler 'inner'").unwrap();
        assert!(outer < inner);
    }

    #[test]
    fn test_helpers() {
        assert!(stack_underflow("POP").message.contains("POP"));
        assert!(
            type_error("ADD", "number", "symbol")
                .message
                .contains("expected number, got symbol")
        );
        assert!(undefined_handler("foo").message.contains("'foo'"));
        assert!(undefined_variable("x").message.contains("before assignment"));
    }
}
