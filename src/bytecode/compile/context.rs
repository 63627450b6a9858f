use std::collections::{BTreeMap, HashSet};

use crate::bytecode::buffer::{BytecodeBuffer, EmitPosition};
use crate::bytecode::compile::CompilerConfig;
use crate::bytecode::compile_error::{CompileError, Diagnostic, Severity, SyntaxError};
use crate::bytecode::ir::{FactoryEntry, ProcedureEntry, ScriptBytecode};
use crate::bytecode::op::{VarScope, Word};
use crate::frontend::lexer::Span;

pub type Reporter = Box<dyn FnMut(&Diagnostic)>;

/// How a name resolves at the point where it is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarRef {
    /// Parameter slot of the running handler.
    Param(u32),
    /// Script property or factory instance variable.
    Property(String),
    Global(String),
    /// Handler-local variable.
    Local(String),
}

impl VarRef {
    pub fn scope(&self) -> VarScope {
        match self {
            VarRef::Param(_) => VarScope::Param,
            VarRef::Property(_) => VarScope::Property,
            VarRef::Global(_) => VarScope::Global,
            VarRef::Local(_) => VarScope::Local,
        }
    }
}

/// All state of one compilation. Created per `compile` call and consumed
/// when the script is finished.
pub struct CompilerContext {
    pub buffer: BytecodeBuffer,
    handlers: BTreeMap<String, ProcedureEntry>,
    factories: BTreeMap<String, FactoryEntry>,

    /// Inside `on`, `macro` or `method`.
    pub in_definition: bool,
    pub current_factory: Option<String>,
    /// Formal parameter names of the definition being compiled; index = slot.
    pub arguments: Vec<String>,

    handler_globals: HashSet<String>,
    top_globals: HashSet<String>,
    script_properties: Vec<String>,
    /// Locals assigned so far in the current handler.
    assigned: HashSet<String>,
    /// Variables assigned so far in the main block; survives definitions.
    top_assigned: HashSet<String>,

    pub loop_depth: usize,
    diagnostics: Vec<Diagnostic>,
    had_error: bool,
    reporter: Option<Reporter>,
}

impl CompilerContext {
    pub fn new(config: &CompilerConfig, reporter: Option<Reporter>) -> Self {
        CompilerContext {
            buffer: BytecodeBuffer::new(config.dedup_literals),
            handlers: BTreeMap::new(),
            factories: BTreeMap::new(),
            in_definition: false,
            current_factory: None,
            arguments: Vec::new(),
            handler_globals: HashSet::new(),
            top_globals: HashSet::new(),
            script_properties: Vec::new(),
            assigned: HashSet::new(),
            top_assigned: HashSet::new(),
            loop_depth: 0,
            diagnostics: Vec::new(),
            had_error: false,
            reporter,
        }
    }

    // -------------------------------------------------------------------------
    // diagnostics
    // -------------------------------------------------------------------------

    pub fn report(&mut self, diagnostic: Diagnostic) {
        if diagnostic.is_error() {
            self.had_error = true;
        }
        tracing::debug!(
            line = diagnostic.line,
            col = diagnostic.col,
            severity = ?diagnostic.severity,
            "{}",
            diagnostic.message
        );
        if let Some(reporter) = self.reporter.as_mut() {
            reporter(&diagnostic);
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn report_syntax(&mut self, err: SyntaxError) {
        self.report(err.into_diagnostic());
    }

    pub fn warn(&mut self, message: impl Into<String>, span: Span) {
        self.report(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            line: span.line,
            col: span.col,
        });
    }

    // -------------------------------------------------------------------------
    // definitions
    // -------------------------------------------------------------------------

    /// Enters definition mode for a handler or method. Methods get the
    /// receiver as parameter slot 0.
    pub fn begin_definition(&mut self, is_method: bool) {
        self.in_definition = true;
        self.arguments.clear();
        if is_method {
            self.arguments.push("me".to_string());
        }
        self.handler_globals.clear();
        self.assigned.clear();
        self.loop_depth = 0;
    }

    pub fn end_definition(&mut self) {
        self.in_definition = false;
        self.arguments.clear();
        self.handler_globals.clear();
        self.assigned.clear();
        self.loop_depth = 0;
    }

    /// Adds a formal parameter; returns false for a duplicate name.
    pub fn add_argument(&mut self, name: &str) -> bool {
        if self.arguments.iter().any(|a| a == name) {
            return false;
        }
        self.arguments.push(name.to_string());
        true
    }

    /// Registers a finished procedure. A later definition with the same name
    /// replaces the earlier one.
    pub fn define(&mut self, name: &str, entry: EmitPosition, arity: usize) {
        let entry = ProcedureEntry {
            name: name.to_string(),
            entry: entry.0 as u32,
            arity: arity as u32,
            factory: self.current_factory.clone(),
        };

        let replaced = match &self.current_factory {
            Some(factory) => self
                .factories
                .entry(factory.clone())
                .or_insert_with(|| FactoryEntry {
                    name: factory.clone(),
                    ..Default::default()
                })
                .methods
                .insert(name.to_string(), entry),
            None => self.handlers.insert(name.to_string(), entry),
        };

        if replaced.is_some() {
            tracing::warn!(handler = %name, "handler redefined; the later definition wins");
        } else {
            tracing::debug!(handler = %name, arity, "defined handler");
        }
    }

    pub fn begin_factory(&mut self, name: &str) {
        self.current_factory = Some(name.to_string());
        self.factories
            .entry(name.to_string())
            .or_insert_with(|| FactoryEntry {
                name: name.to_string(),
                ..Default::default()
            });
    }

    // -------------------------------------------------------------------------
    // declarations and name resolution
    // -------------------------------------------------------------------------

    pub fn declare_global(&mut self, name: &str) {
        if self.in_definition {
            self.handler_globals.insert(name.to_string());
        } else {
            self.top_globals.insert(name.to_string());
        }
    }

    pub fn declare_property(&mut self, name: &str) {
        if !self.script_properties.iter().any(|p| p == name) {
            self.script_properties.push(name.to_string());
        }
    }

    /// Declares an instance variable of the current factory.
    pub fn declare_ivar(&mut self, name: &str) -> bool {
        let Some(factory) = self.current_factory.clone() else {
            return false;
        };
        let entry = self.factories.entry(factory).or_default();
        if !entry.ivars.iter().any(|v| v == name) {
            entry.ivars.push(name.to_string());
        }
        true
    }

    fn is_property(&self, name: &str) -> bool {
        let ivar = self
            .current_factory
            .as_ref()
            .and_then(|f| self.factories.get(f))
            .is_some_and(|f| f.ivars.iter().any(|v| v == name));
        ivar || self.script_properties.iter().any(|p| p == name)
    }

    fn is_declared_global(&self, name: &str) -> bool {
        self.handler_globals.contains(name) || self.top_globals.contains(name)
    }

    /// Resolution order: parameter, property or instance variable, declared
    /// global, then local. Outside definitions every other name is global.
    pub fn resolve(&self, name: &str) -> VarRef {
        if self.in_definition {
            if let Some(slot) = self.arguments.iter().position(|a| a == name) {
                return VarRef::Param(slot as u32);
            }
        }
        if self.is_property(name) {
            return VarRef::Property(name.to_string());
        }
        if self.is_declared_global(name) || !self.in_definition {
            return VarRef::Global(name.to_string());
        }
        VarRef::Local(name.to_string())
    }

    /// True when `name` names a variable that already holds a value here,
    /// which makes `name(...)` an object call.
    pub fn is_bound(&self, name: &str) -> bool {
        let assigned = if self.in_definition {
            &self.assigned
        } else {
            &self.top_assigned
        };
        (self.in_definition && self.arguments.iter().any(|a| a == name))
            || self.is_property(name)
            || self.is_declared_global(name)
            || assigned.contains(name)
    }

    pub fn mark_assigned(&mut self, name: &str) {
        if self.in_definition {
            self.assigned.insert(name.to_string());
        } else {
            self.top_assigned.insert(name.to_string());
        }
    }

    /// Operand word addressing `var`: a slot or a literal index.
    pub fn var_operand(&mut self, var: &VarRef) -> Word {
        match var {
            VarRef::Param(slot) => *slot,
            VarRef::Property(name) | VarRef::Global(name) | VarRef::Local(name) => {
                self.buffer.intern(name)
            }
        }
    }

    // -------------------------------------------------------------------------
    // finishing
    // -------------------------------------------------------------------------

    pub fn finish(self) -> Result<(ScriptBytecode, Vec<Diagnostic>, bool), CompileError> {
        let outstanding = self.buffer.outstanding();
        if outstanding != 0 {
            return Err(CompileError::unresolved_reservations(outstanding));
        }
        let (code, literals) = self.buffer.into_parts();
        let script = ScriptBytecode {
            code,
            literals,
            handlers: self.handlers,
            factories: self.factories,
            properties: self.script_properties,
        };
        Ok((script, self.diagnostics, self.had_error))
    }

    /// Hands the reporter back to the `Compiler` that lent it.
    pub fn take_reporter(&mut self) -> Option<Reporter> {
        self.reporter.take()
    }
}
