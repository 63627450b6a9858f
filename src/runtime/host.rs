use std::collections::HashMap;

use crate::lang::builtins::{self, BuiltinKind};
use crate::lang::entity::EntityRef;
use crate::lang::value::Value;
use crate::runtime::runtime_error::RuntimeError;

/// Playback requests issued by `go` and `play`.
#[derive(Debug, Clone, PartialEq)]
pub enum Navigation {
    GoTo { frame: Value, movie: Value },
    Play { frame: Value, movie: Value },
    Loop,
    Next,
    Previous,
    PlayDone,
}

/// Everything the VM cannot do by itself: stage state, output, host
/// commands and playback.
pub trait Host {
    /// Reads `the <field> [of <entity> <id>]`.
    fn get_the(&mut self, entity: &EntityRef) -> Result<Value, RuntimeError>;

    fn set_the(&mut self, entity: &EntityRef, value: Value) -> Result<(), RuntimeError>;

    /// Shows the value of a bare `put`.
    fn put(&mut self, value: &Value);

    /// Runs a command no script handler or factory answered. `Ok(None)`
    /// means the host does not know `name` either.
    fn command(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, RuntimeError>;

    fn navigate(&mut self, nav: Navigation) -> Result<(), RuntimeError>;
}

/// In-memory host used by the CLI and the tests.
#[derive(Debug, Default)]
pub struct MemoryHost {
    /// Entity values keyed by their `the ...` spelling.
    pub entities: HashMap<String, Value>,
    pub output: Vec<String>,
    pub commands: Vec<(String, Vec<Value>)>,
    pub navigation: Vec<Navigation>,
    /// Also print `put` output to stdout.
    pub echo: bool,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn set(&mut self, entity: &EntityRef, value: Value) {
        self.entities.insert(entity.to_string(), value);
    }
}

impl Host for MemoryHost {
    fn get_the(&mut self, entity: &EntityRef) -> Result<Value, RuntimeError> {
        Ok(self
            .entities
            .get(&entity.to_string())
            .cloned()
            .unwrap_or(Value::Void))
    }

    fn set_the(&mut self, entity: &EntityRef, value: Value) -> Result<(), RuntimeError> {
        self.set(entity, value);
        Ok(())
    }

    fn put(&mut self, value: &Value) {
        let line = value.to_string();
        if self.echo {
            println!("{}", line);
        }
        self.output.push(line);
    }

    fn command(&mut self, name: &str, args: &[Value]) -> Result<Option<Value>, RuntimeError> {
        let Some(builtin) = builtins::lookup(name).filter(|b| b.kind == BuiltinKind::Host) else {
            return Ok(None);
        };
        self.commands.push((builtin.name.to_string(), args.to_vec()));
        Ok(Some(match builtin.name {
            // deterministic
            "random" => Value::Int(1),
            _ => Value::Void,
        }))
    }

    fn navigate(&mut self, nav: Navigation) -> Result<(), RuntimeError> {
        tracing::debug!(?nav, "navigate");
        self.navigation.push(nav);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::entity::{TheEntity, TheField};

    #[test]
    fn test_entities_default_to_void() {
        let mut host = MemoryHost::new();
        let r = EntityRef::with_id(TheEntity::Sprite, TheField::LocH, Value::Int(1));
        assert_eq!(host.get_the(&r).unwrap(), Value::Void);
        host.set_the(&r, Value::Int(40)).unwrap();
        assert_eq!(host.get_the(&r).unwrap(), Value::Int(40));
    }

    #[test]
    fn test_commands() {
        let mut host = MemoryHost::new();
        assert_eq!(host.command("random", &[Value::Int(6)]).unwrap(), Some(Value::Int(1)));
        assert_eq!(host.command("beep", &[]).unwrap(), Some(Value::Void));
        assert_eq!(host.command("nosuch", &[]).unwrap(), None);
        assert_eq!(host.commands.len(), 2);
    }

    #[test]
    fn test_put_records_output() {
        let mut host = MemoryHost::new();
        host.put(&Value::Float(1.5));
        host.put(&Value::Void);
        assert_eq!(host.output, vec!["1.5000", "<Void>"]);
    }
}
