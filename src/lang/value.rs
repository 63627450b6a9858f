use std::cmp::Ordering;

use crate::runtime::runtime_error::{RuntimeError, division_by_zero, type_error};

/// Handle of a factory instance owned by the VM's object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(pub u32);

/// Runtime value in Lingo.
///
/// Values are the only data that can exist on the VM operand stack.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The uninitialised value (`VOID`).
    Void,

    /// 32-bit signed integer. Booleans are integers (`TRUE` = 1).
    Int(i32),

    /// Double precision float.
    Float(f64),

    /// Text value.
    String(String),

    /// Symbol literal: `#name`. Stored lower-cased.
    Symbol(String),

    /// Factory instance.
    Object(ObjectId),
}

impl std::fmt::Display for Value {
    /// Format a value the way `put` shows it.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Void => write!(f, "<Void>"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:.4}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Symbol(s) => write!(f, "#{}", s),
            Value::Object(id) => write!(f, "<Object #{}>", id.0),
        }
    }
}

/// Lingo booleans are plain integers.
pub fn bool_value(b: bool) -> Value {
    Value::Int(if b { 1 } else { 0 })
}

enum Numeric {
    Int(i32),
    Float(f64),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::Object(_) => "object",
        }
    }

    /// Text used by `&`, `&&` and the string operators.
    pub fn to_text(&self) -> String {
        match self {
            Value::Void => String::new(),
            Value::Symbol(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn numeric(&self, op: &str) -> Result<Numeric, RuntimeError> {
        match self {
            Value::Int(n) => Ok(Numeric::Int(*n)),
            Value::Float(n) => Ok(Numeric::Float(*n)),
            Value::Void => Ok(Numeric::Int(0)),
            Value::String(s) => {
                let trimmed = s.trim();
                if let Ok(n) = trimmed.parse::<i32>() {
                    Ok(Numeric::Int(n))
                } else if let Ok(n) = trimmed.parse::<f64>() {
                    Ok(Numeric::Float(n))
                } else {
                    Err(type_error(op, "number", "non-numeric string"))
                }
            }
            other => Err(type_error(op, "number", other.type_name())),
        }
    }

    pub fn to_int(&self, op: &str) -> Result<i32, RuntimeError> {
        Ok(match self.numeric(op)? {
            Numeric::Int(n) => n,
            Numeric::Float(n) => n as i32,
        })
    }

    pub fn to_float(&self, op: &str) -> Result<f64, RuntimeError> {
        Ok(match self.numeric(op)? {
            Numeric::Int(n) => n as f64,
            Numeric::Float(n) => n,
        })
    }

    pub fn is_truthy(&self) -> Result<bool, RuntimeError> {
        match self {
            Value::Void => Ok(false),
            Value::Int(n) => Ok(*n != 0),
            Value::Float(n) => Ok(*n != 0.0),
            Value::Object(_) => Ok(true),
            other => Err(type_error("condition", "number", other.type_name())),
        }
    }
}

fn arith(
    a: &Value,
    b: &Value,
    op: &str,
    int_op: fn(i32, i32) -> i32,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    match (a.numeric(op)?, b.numeric(op)?) {
        (Numeric::Int(x), Numeric::Int(y)) => Ok(Value::Int(int_op(x, y))),
        (x, y) => {
            let x = match x {
                Numeric::Int(n) => n as f64,
                Numeric::Float(n) => n,
            };
            let y = match y {
                Numeric::Int(n) => n as f64,
                Numeric::Float(n) => n,
            };
            Ok(Value::Float(float_op(x, y)))
        }
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    arith(a, b, "+", i32::wrapping_add, |x, y| x + y)
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    arith(a, b, "-", i32::wrapping_sub, |x, y| x - y)
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    arith(a, b, "*", i32::wrapping_mul, |x, y| x * y)
}

pub fn div(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (a.numeric("/")?, b.numeric("/")?) {
        (_, Numeric::Int(0)) => Err(division_by_zero()),
        (_, Numeric::Float(y)) if y == 0.0 => Err(division_by_zero()),
        (Numeric::Int(x), Numeric::Int(y)) => Ok(Value::Int(x.wrapping_div(y))),
        _ => Ok(Value::Float(a.to_float("/")? / b.to_float("/")?)),
    }
}

pub fn modulo(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let y = b.to_int("mod")?;
    if y == 0 {
        return Err(division_by_zero());
    }
    Ok(Value::Int(a.to_int("mod")?.wrapping_rem(y)))
}

pub fn negate(a: &Value) -> Result<Value, RuntimeError> {
    match a.numeric("-")? {
        Numeric::Int(n) => Ok(Value::Int(n.wrapping_neg())),
        Numeric::Float(n) => Ok(Value::Float(-n)),
    }
}

/// Ordering used by the comparison operators: numbers numerically, text
/// case-insensitively.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, RuntimeError> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            Ok(x.to_lowercase().cmp(&y.to_lowercase()))
        }
        (Value::Symbol(x), Value::Symbol(y)) => Ok(x.cmp(y)),
        _ => {
            let x = a.to_float("comparison")?;
            let y = b.to_float("comparison")?;
            x.partial_cmp(&y)
                .ok_or_else(|| RuntimeError::new("comparison with NaN"))
        }
    }
}

pub fn equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => x == y,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        (Value::Void, Value::Void) => true,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::String(x), Value::String(y)) => x.to_lowercase() == y.to_lowercase(),
        _ => compare(a, b).map(|o| o == Ordering::Equal).unwrap_or(false),
    }
}

pub fn concat(a: &Value, b: &Value, with_space: bool) -> Value {
    let mut text = a.to_text();
    if with_space {
        text.push(' ');
    }
    text.push_str(&b.to_text());
    Value::String(text)
}

pub fn contains(haystack: &Value, needle: &Value) -> Value {
    let haystack = haystack.to_text().to_lowercase();
    let needle = needle.to_text().to_lowercase();
    bool_value(haystack.contains(&needle))
}

pub fn starts(haystack: &Value, prefix: &Value) -> Value {
    let haystack = haystack.to_text().to_lowercase();
    let prefix = prefix.to_text().to_lowercase();
    bool_value(haystack.starts_with(&prefix))
}

/// Chunk kinds addressed by `char`, `word`, `item` and `line ... of`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Char,
    Word,
    Item,
    Line,
}

impl ChunkKind {
    fn pieces(self, text: &str) -> Vec<String> {
        match self {
            ChunkKind::Char => text.chars().map(|c| c.to_string()).collect(),
            ChunkKind::Word => text.split_whitespace().map(str::to_string).collect(),
            ChunkKind::Item => text.split(',').map(str::to_string).collect(),
            ChunkKind::Line => text
                .split(['\r', '\n'])
                .map(str::to_string)
                .collect(),
        }
    }

    fn separator(self) -> &'static str {
        match self {
            ChunkKind::Char => "",
            ChunkKind::Word => " ",
            ChunkKind::Item => ",",
            ChunkKind::Line => "\r",
        }
    }
}

/// Extracts chunks `from..=to` (1-based) of `source`. Out-of-range requests
/// yield `EMPTY`, as in Director.
pub fn chunk(kind: ChunkKind, from: i32, to: i32, source: &Value) -> Value {
    let pieces = kind.pieces(&source.to_text());
    if from < 1 || to < from || from as usize > pieces.len() {
        return Value::String(String::new());
    }
    let last = (to as usize).min(pieces.len());
    Value::String(pieces[from as usize - 1..last].join(kind.separator()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Value {
        Value::String(text.to_string())
    }

    #[test]
    fn test_int_arithmetic() {
        assert_eq!(add(&Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(sub(&Value::Int(2), &Value::Int(3)).unwrap(), Value::Int(-1));
        assert_eq!(mul(&Value::Int(4), &Value::Int(3)).unwrap(), Value::Int(12));
        assert_eq!(div(&Value::Int(7), &Value::Int(2)).unwrap(), Value::Int(3));
        assert_eq!(modulo(&Value::Int(7), &Value::Int(3)).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_float_promotion() {
        assert_eq!(
            add(&Value::Int(1), &Value::Float(0.5)).unwrap(),
            Value::Float(1.5)
        );
        assert_eq!(
            div(&Value::Float(1.0), &Value::Int(4)).unwrap(),
            Value::Float(0.25)
        );
    }

    #[test]
    fn test_numeric_strings_coerce() {
        assert_eq!(add(&s("40"), &Value::Int(2)).unwrap(), Value::Int(42));
        assert!(add(&s("forty"), &Value::Int(2)).is_err());
    }

    #[test]
    fn test_division_by_zero() {
        let err = div(&Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(err.message.contains("division by zero"));
        assert!(modulo(&Value::Int(1), &Value::Int(0)).is_err());
    }

    #[test]
    fn test_string_equality_ignores_case() {
        assert!(equals(&s("Hello"), &s("hello")));
        assert!(!equals(&s("Hello"), &s("world")));
        assert!(equals(&Value::Int(2), &Value::Float(2.0)));
        assert!(!equals(&Value::Symbol("a".into()), &s("a")));
    }

    #[test]
    fn test_concat() {
        assert_eq!(concat(&s("a"), &Value::Int(1), false), s("a1"));
        assert_eq!(concat(&s("a"), &s("b"), true), s("a b"));
    }

    #[test]
    fn test_contains_and_starts() {
        assert_eq!(contains(&s("Macromedia"), &s("MEDIA")), Value::Int(1));
        assert_eq!(starts(&s("Macromedia"), &s("media")), Value::Int(0));
        assert_eq!(starts(&s("Macromedia"), &s("macro")), Value::Int(1));
    }

    #[test]
    fn test_chunks() {
        let text = s("one two  three");
        assert_eq!(chunk(ChunkKind::Word, 2, 2, &text), s("two"));
        assert_eq!(chunk(ChunkKind::Word, 2, 3, &text), s("two three"));
        assert_eq!(chunk(ChunkKind::Char, 1, 3, &text), s("one"));
        assert_eq!(chunk(ChunkKind::Item, 2, 2, &s("a,b,c")), s("b"));
        assert_eq!(chunk(ChunkKind::Line, 2, 2, &s("x\ry\rz")), s("y"));
        assert_eq!(chunk(ChunkKind::Char, 9, 9, &s("abc")), s(""));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::Int(1).is_truthy().unwrap());
        assert!(!Value::Int(0).is_truthy().unwrap());
        assert!(!Value::Void.is_truthy().unwrap());
        assert!(s("yes").is_truthy().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float(1.5).to_string(), "1.5000");
        assert_eq!(Value::Symbol("done".into()).to_string(), "#done");
        assert_eq!(Value::Void.to_string(), "<Void>");
    }
}
