use crate::lang::value::{Value, chunk, ChunkKind, compare};
use crate::runtime::runtime_error::{RuntimeError, type_error};

/// Where a built-in function is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    /// Pure function computed by the VM.
    Native,
    /// Forwarded to `Host::command`.
    Host,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    pub kind: BuiltinKind,
}

impl Builtin {
    const fn native(name: &'static str, min_args: usize, max_args: Option<usize>) -> Self {
        Builtin {
            name,
            min_args,
            max_args,
            kind: BuiltinKind::Native,
        }
    }

    const fn host(name: &'static str, min_args: usize, max_args: Option<usize>) -> Self {
        Builtin {
            name,
            min_args,
            max_args,
            kind: BuiltinKind::Host,
        }
    }

    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_args && self.max_args.is_none_or(|max| argc <= max)
    }

    pub fn arity_text(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

const BUILTINS: &[Builtin] = &[
    Builtin::native("abs", 1, Some(1)),
    Builtin::native("sqrt", 1, Some(1)),
    Builtin::native("length", 1, Some(1)),
    Builtin::native("chars", 3, Some(3)),
    Builtin::native("chartonum", 1, Some(1)),
    Builtin::native("numtochar", 1, Some(1)),
    Builtin::native("integer", 1, Some(1)),
    Builtin::native("float", 1, Some(1)),
    Builtin::native("string", 1, Some(1)),
    Builtin::native("offset", 2, Some(2)),
    Builtin::native("min", 1, None),
    Builtin::native("max", 1, None),
    Builtin::host("random", 1, Some(1)),
    Builtin::host("beep", 0, Some(1)),
    Builtin::host("alert", 1, Some(1)),
    Builtin::host("updatestage", 0, Some(0)),
    Builtin::host("puppetsprite", 2, Some(2)),
    Builtin::host("cursor", 1, Some(1)),
    Builtin::host("delay", 1, Some(1)),
];

/// Looks up a built-in by its lower-cased name.
pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

/// Evaluates a VM-native built-in.
pub fn call_native(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Void);

    match name {
        "abs" => match arg(0) {
            Value::Float(n) => Ok(Value::Float(n.abs())),
            other => Ok(Value::Int(other.to_int("abs")?.wrapping_abs())),
        },
        "sqrt" => {
            let n = arg(0).to_float("sqrt")?;
            if n < 0.0 {
                return Err(RuntimeError::new("sqrt of a negative number"));
            }
            Ok(Value::Float(n.sqrt()))
        }
        "length" => Ok(Value::Int(arg(0).to_text().chars().count() as i32)),
        "chars" => {
            let from = arg(1).to_int("chars")?;
            let to = arg(2).to_int("chars")?;
            Ok(chunk(ChunkKind::Char, from, to, &arg(0)))
        }
        "chartonum" => {
            let text = arg(0).to_text();
            Ok(Value::Int(text.chars().next().map_or(0, |c| c as i32)))
        }
        "numtochar" => {
            let code = arg(0).to_int("numToChar")?;
            let c = u32::try_from(code)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| RuntimeError::new(format!("numToChar: invalid code {}", code)))?;
            Ok(Value::String(c.to_string()))
        }
        "integer" => match arg(0) {
            Value::Float(n) => Ok(Value::Int(n.round() as i32)),
            other => Ok(Value::Int(other.to_int("integer")?)),
        },
        "float" => Ok(Value::Float(arg(0).to_float("float")?)),
        "string" => Ok(Value::String(arg(0).to_text())),
        "offset" => {
            let needle = arg(0).to_text().to_lowercase();
            let haystack = arg(1).to_text().to_lowercase();
            let pos = haystack
                .find(&needle)
                .map_or(0, |byte| haystack[..byte].chars().count() as i32 + 1);
            Ok(Value::Int(pos))
        }
        "min" | "max" => {
            let want = if name == "min" {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            };
            let mut best = args
                .first()
                .cloned()
                .ok_or_else(|| type_error(name, "argument", "nothing"))?;
            for candidate in &args[1..] {
                if compare(candidate, &best)? == want {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        other => Err(RuntimeError::new(format!("'{}' is not a native builtin", other))),
    }
}
