use std::collections::HashMap;

use crate::bytecode::ir::{ProcedureEntry, ScriptBytecode};
use crate::bytecode::op::{Instr, Opcode, VarScope, decode, decode_float, decode_int};
use crate::bytecode::stack_check::check_script;
use crate::lang::builtins::{self, BuiltinKind};
use crate::lang::entity::{EntityRef, TheEntity, TheField};
use crate::lang::value::{self, ChunkKind, ObjectId, Value, bool_value};
use crate::runtime::host::{Host, Navigation};
use crate::runtime::runtime_error::{
    RuntimeError, stack_underflow, type_error, undefined_handler, undefined_variable,
};

#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Nesting limit. Every handler call and every nested block (if,
    /// repeat, tell, when) counts one level.
    pub max_call_depth: usize,
    pub max_steps: Option<usize>,
    pub max_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 250,
            max_steps: None,
            max_stack_size: 10_000,
        }
    }
}

/// Why a block stopped before its `STOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unwind {
    /// `PROC_RETURN` / `RETURN_VALUE`; consumed by the call boundary.
    Return,
    /// Consumed by the innermost loop.
    ExitRepeat,
    NextRepeat,
}

type Flow = Option<Unwind>;

#[derive(Debug)]
struct Frame {
    name: String,
    params: Vec<Value>,
    locals: HashMap<String, Value>,
    receiver: Option<ObjectId>,
    result: Value,
}

#[derive(Debug)]
struct Object {
    factory: String,
    ivars: HashMap<String, Value>,
}

#[derive(Debug)]
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: HashMap<String, Value>,
    objects: Vec<Object>,
    script_props: HashMap<String, Value>,
    tell_stack: Vec<Value>,
    /// Event name -> first word of the registered `when` statement.
    when_handlers: HashMap<String, usize>,
    // Safety limits
    config: VmConfig,
    steps: usize,
    depth: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: HashMap::new(),
            objects: Vec::new(),
            script_props: HashMap::new(),
            tell_stack: Vec::new(),
            when_handlers: HashMap::new(),
            config,
            steps: 0,
            depth: 0,
        }
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(&name.to_ascii_lowercase())
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_ascii_lowercase(), value);
    }

    /// Value of an instance variable of a live object.
    pub fn ivar(&self, id: ObjectId, name: &str) -> Option<&Value> {
        self.objects.get(id.0 as usize)?.ivars.get(name)
    }

    pub fn reset_execution_state(&mut self) {
        self.steps = 0;
        self.depth = 0;
        self.stack.clear();
        self.frames.clear();
        self.tell_stack.clear();
    }

    /// Verifies `script` and runs its main block. Globals and objects
    /// survive across runs; `when` registrations belong to the script and
    /// are replaced.
    pub fn run(&mut self, script: &ScriptBytecode, host: &mut dyn Host) -> Result<(), RuntimeError> {
        check_script(script)?;
        self.reset_execution_state();
        self.when_handlers.clear();
        for prop in &script.properties {
            self.script_props.entry(prop.clone()).or_insert(Value::Void);
        }

        tracing::debug!(words = script.code.len(), "running main block");
        // a top-level `exit` ends the script early
        self.exec_block(script, host, 0)?;
        Ok(())
    }

    /// Calls a handler by name, as the host does for events.
    pub fn call_handler(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        self.reset_execution_state();
        let proc = script
            .handler(name)
            .ok_or_else(|| undefined_handler(&name.to_ascii_lowercase()))?;
        self.invoke(script, host, proc, args, None)
    }

    /// Runs the `when` statement registered for `event`. Returns false when
    /// nothing is registered.
    pub fn dispatch_event(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        event: &str,
    ) -> Result<bool, RuntimeError> {
        let Some(&pos) = self.when_handlers.get(&event.to_ascii_lowercase()) else {
            return Ok(false);
        };
        self.reset_execution_state();
        tracing::debug!(event, pos, "dispatching event");
        self.exec_block(script, host, pos)
            .map_err(|e| e.with_context(&format!("in when {}", event)))?;
        Ok(true)
    }

    // Execution

    fn check_limits(&mut self) -> Result<(), RuntimeError> {
        self.steps += 1;

        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeError::new(format!(
                    "execution step limit exceeded ({})",
                    max
                )));
            }
        }

        if self.stack.len() > self.config.max_stack_size {
            return Err(RuntimeError::new(format!(
                "stack size limit exceeded ({})",
                self.config.max_stack_size
            )));
        }

        Ok(())
    }

    /// Executes from `pos` to the block's `STOP`, or until an unwind.
    fn exec_block(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        pos: usize,
    ) -> Result<Flow, RuntimeError> {
        self.depth += 1;

        if self.depth > self.config.max_call_depth {
            self.depth -= 1;
            return Err(RuntimeError::new(format!(
                "call depth limit exceeded ({}) - possible infinite recursion{}",
                self.config.max_call_depth,
                match self.current_handler() {
                    Some(name) => format!(" in '{}'", name),
                    None => String::new(),
                }
            )));
        }

        let result = self.exec_block_inner(script, host, pos);

        self.depth -= 1;
        result
    }

    /// Control opcodes stay here; they recurse into nested blocks, so this
    /// frame is kept small.
    fn exec_block_inner(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        mut pos: usize,
    ) -> Result<Flow, RuntimeError> {
        loop {
            self.check_limits()?;
            let instr = decode(&script.code, pos)?;
            let ops = instr.operands;
            let mut next = instr.next();

            match instr.op {
                Opcode::Stop => return Ok(None),

                // Structured control flow
                Opcode::IfCode => {
                    let cond = self.pop("IF_CODE")?.is_truthy()?;
                    let block = if cond { instr.target(0) } else { instr.target(1) };
                    if let Some(unwind) = self.exec_block(script, host, block)? {
                        return Ok(Some(unwind));
                    }
                    next = instr.target(2);
                }
                Opcode::RepeatWhile => {
                    let body = instr.target(0);
                    loop {
                        if let Some(unwind) = self.exec_block(script, host, instr.next())? {
                            return Ok(Some(unwind));
                        }
                        if !self.pop("REPEAT_WHILE")?.is_truthy()? {
                            break;
                        }
                        match self.exec_block(script, host, body)? {
                            Some(Unwind::ExitRepeat) => break,
                            Some(Unwind::Return) => return Ok(Some(Unwind::Return)),
                            Some(Unwind::NextRepeat) | None => {}
                        }
                    }
                    next = instr.target(1);
                }
                Opcode::RepeatWith => {
                    if let Some(unwind) = self.exec_repeat_with(script, host, &instr)? {
                        return Ok(Some(unwind));
                    }
                    next = instr.target(4);
                }
                Opcode::Tell => {
                    let target = self.pop("TELL")?;
                    self.tell_stack.push(target);
                    let flow = self.exec_block(script, host, instr.next());
                    self.tell_stack.pop();
                    if let Some(unwind) = flow? {
                        return Ok(Some(unwind));
                    }
                    next = instr.target(0);
                }
                Opcode::WhenCode => {
                    let event = literal(script, &instr, 1)?;
                    tracing::debug!(event, pos = instr.next(), "registered when handler");
                    self.when_handlers.insert(event.to_string(), instr.next());
                    next = instr.target(0);
                }
                Opcode::Jump => next = instr.target(0),
                Opcode::ExitRepeat => return Ok(Some(Unwind::ExitRepeat)),
                Opcode::NextRepeat => return Ok(Some(Unwind::NextRepeat)),

                // Calls
                Opcode::Call => {
                    let name = literal(script, &instr, 0)?;
                    let args = self.pop_args(ops[1] as usize, "CALL")?;
                    let result = self.call(script, host, name, args)?;
                    self.push(result);
                }
                Opcode::CallBuiltin => {
                    let name = literal(script, &instr, 0)?;
                    let args = self.pop_args(ops[1] as usize, "CALL_BUILTIN")?;
                    let result = self.call_builtin(host, name, &args)?;
                    self.push(result);
                }
                Opcode::ObjCall => {
                    let mut args = self.pop_args(ops[0] as usize, "OBJ_CALL")?;
                    let obj = self.pop("OBJ_CALL")?;
                    let id = self.object_index(&obj, "OBJ_CALL")?;
                    let method = match args.first() {
                        Some(Value::Symbol(name)) => name.clone(),
                        Some(other) => {
                            return Err(type_error("OBJ_CALL", "method symbol", other.type_name()));
                        }
                        None => return Err(RuntimeError::new("object call without a method name")),
                    };
                    args.remove(0);
                    let result = self.call_method(script, host, id, &method, args)?;
                    self.push(result);
                }
                Opcode::ProcReturn => return Ok(Some(Unwind::Return)),
                Opcode::ReturnValue => {
                    let v = self.pop("RETURN_VALUE")?;
                    if let Some(frame) = self.frames.last_mut() {
                        frame.result = v;
                    }
                    return Ok(Some(Unwind::Return));
                }

                _ => self.exec_simple(script, host, &instr)?,
            }

            pos = next;
        }
    }

    /// Opcodes that run straight through to the next instruction.
    #[inline(never)]
    fn exec_simple(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        instr: &Instr<'_>,
    ) -> Result<(), RuntimeError> {
        let ops = instr.operands;

        match instr.op {
            // Literals and stack
            Opcode::PushInt => self.push(Value::Int(decode_int(ops[0]))),
            Opcode::PushFloat => self.push(Value::Float(decode_float(ops[0], ops[1]))),
            Opcode::PushString => {
                let text = literal(script, instr, 0)?;
                self.push(Value::String(text.to_string()));
            }
            Opcode::PushSymbol => {
                let text = literal(script, instr, 0)?;
                self.push(Value::Symbol(text.to_string()));
            }
            Opcode::PushVoid => self.push(Value::Void),
            Opcode::Pop => {
                self.pop("POP")?;
            }
            Opcode::Swap => {
                let b = self.pop("SWAP")?;
                let a = self.pop("SWAP")?;
                self.push(b);
                self.push(a);
            }
            Opcode::Put => {
                let v = self.pop("PUT")?;
                host.put(&v);
            }

            // Variables
            Opcode::PushVar => {
                let name = literal(script, instr, 0)?;
                let v = self.read_local(name)?;
                self.push(v);
            }
            Opcode::PushGlobal => {
                let name = literal(script, instr, 0)?;
                let v = self.globals.get(name).cloned().unwrap_or(Value::Void);
                self.push(v);
            }
            Opcode::PushProp => {
                let name = literal(script, instr, 0)?;
                let v = self.read_prop(name);
                self.push(v);
            }
            Opcode::PushParam => {
                let v = self.read_param(ops[0] as usize)?;
                self.push(v);
            }
            Opcode::AssignVar => {
                let name = literal(script, instr, 0)?;
                let v = self.pop("ASSIGN_VAR")?;
                self.frame_mut("ASSIGN_VAR")?.locals.insert(name.to_string(), v);
            }
            Opcode::AssignGlobal => {
                let name = literal(script, instr, 0)?;
                let v = self.pop("ASSIGN_GLOBAL")?;
                self.globals.insert(name.to_string(), v);
            }
            Opcode::AssignProp => {
                let name = literal(script, instr, 0)?;
                let v = self.pop("ASSIGN_PROP")?;
                self.write_prop(name, v);
            }
            Opcode::AssignParam => {
                let v = self.pop("ASSIGN_PARAM")?;
                self.write_param(ops[0] as usize, v)?;
            }

            // The-entities
            Opcode::TheEntityPush => {
                let (_, field) = entity_operands(instr)?;
                let v = host.get_the(&EntityRef::movie(field))?;
                self.push(v);
            }
            Opcode::TheEntityWithIdPush => {
                let (entity, field) = entity_operands(instr)?;
                let id = self.pop("THE_ENTITY_WITH_ID_PUSH")?;
                let v = host.get_the(&EntityRef::with_id(entity, field, id))?;
                self.push(v);
            }
            Opcode::TheMenuItemPush => {
                let (_, field) = entity_operands(instr)?;
                let menu = self.pop("THE_MENU_ITEM_PUSH")?;
                let item = self.pop("THE_MENU_ITEM_PUSH")?;
                let v = host.get_the(&EntityRef::menu_item(field, item, menu))?;
                self.push(v);
            }
            Opcode::TheEntityAssign => {
                let (_, field) = entity_operands(instr)?;
                let v = self.pop("THE_ENTITY_ASSIGN")?;
                host.set_the(&EntityRef::movie(field), v)?;
            }
            Opcode::TheEntityWithIdAssign => {
                let (entity, field) = entity_operands(instr)?;
                let v = self.pop("THE_ENTITY_WITH_ID_ASSIGN")?;
                let id = self.pop("THE_ENTITY_WITH_ID_ASSIGN")?;
                host.set_the(&EntityRef::with_id(entity, field, id), v)?;
            }
            Opcode::TheMenuItemAssign => {
                let (_, field) = entity_operands(instr)?;
                let v = self.pop("THE_MENU_ITEM_ASSIGN")?;
                let menu = self.pop("THE_MENU_ITEM_ASSIGN")?;
                let item = self.pop("THE_MENU_ITEM_ASSIGN")?;
                host.set_the(&EntityRef::menu_item(field, item, menu), v)?;
            }
            Opcode::ObjectFieldPush => {
                let name = literal(script, instr, 0)?;
                let obj = self.pop("OBJECT_FIELD_PUSH")?;
                let id = self.object_index(&obj, "OBJECT_FIELD_PUSH")?;
                let v = self.objects[id]
                    .ivars
                    .get(name)
                    .cloned()
                    .ok_or_else(|| self.no_ivar(id, name))?;
                self.push(v);
            }
            Opcode::ObjectFieldAssign => {
                let name = literal(script, instr, 0)?;
                let v = self.pop("OBJECT_FIELD_ASSIGN")?;
                let obj = self.pop("OBJECT_FIELD_ASSIGN")?;
                let id = self.object_index(&obj, "OBJECT_FIELD_ASSIGN")?;
                if !self.objects[id].ivars.contains_key(name) {
                    return Err(self.no_ivar(id, name));
                }
                self.objects[id].ivars.insert(name.to_string(), v);
            }

            // Arithmetic
            Opcode::Add => self.binary("ADD", value::add)?,
            Opcode::Sub => self.binary("SUB", value::sub)?,
            Opcode::Mul => self.binary("MUL", value::mul)?,
            Opcode::Div => self.binary("DIV", value::div)?,
            Opcode::Mod => self.binary("MOD", value::modulo)?,
            Opcode::Negate => {
                let a = self.pop("NEGATE")?;
                self.push(value::negate(&a)?);
            }

            // Comparison
            Opcode::Eq => self.binary("EQ", |a, b| Ok(bool_value(value::equals(a, b))))?,
            Opcode::NotEq => {
                self.binary("NOT_EQ", |a, b| Ok(bool_value(!value::equals(a, b))))?
            }
            Opcode::Lt => self.binary("LT", |a, b| Ok(bool_value(value::compare(a, b)?.is_lt())))?,
            Opcode::LtEq => {
                self.binary("LT_EQ", |a, b| Ok(bool_value(value::compare(a, b)?.is_le())))?
            }
            Opcode::Gt => self.binary("GT", |a, b| Ok(bool_value(value::compare(a, b)?.is_gt())))?,
            Opcode::GtEq => {
                self.binary("GT_EQ", |a, b| Ok(bool_value(value::compare(a, b)?.is_ge())))?
            }

            // Logic
            Opcode::And => {
                self.binary("AND", |a, b| Ok(bool_value(a.is_truthy()? && b.is_truthy()?)))?
            }
            Opcode::Or => {
                self.binary("OR", |a, b| Ok(bool_value(a.is_truthy()? || b.is_truthy()?)))?
            }
            Opcode::Not => {
                let a = self.pop("NOT")?;
                self.push(bool_value(!a.is_truthy()?));
            }

            // Strings and chunks
            Opcode::Concat => self.binary("CONCAT", |a, b| Ok(value::concat(a, b, false)))?,
            Opcode::ConcatSpace => {
                self.binary("CONCAT_SPACE", |a, b| Ok(value::concat(a, b, true)))?
            }
            Opcode::Contains => self.binary("CONTAINS", |a, b| Ok(value::contains(a, b)))?,
            Opcode::Starts => self.binary("STARTS", |a, b| Ok(value::starts(a, b)))?,
            Opcode::CharOf | Opcode::WordOf | Opcode::ItemOf | Opcode::LineOf => {
                let name = instr.op.mnemonic();
                let source = self.pop(name)?;
                let i = self.pop(name)?.to_int(name)?;
                self.push(value::chunk(chunk_kind(instr.op), i, i, &source));
            }
            Opcode::CharToOf | Opcode::WordToOf | Opcode::ItemToOf | Opcode::LineToOf => {
                let name = instr.op.mnemonic();
                let source = self.pop(name)?;
                let to = self.pop(name)?.to_int(name)?;
                let from = self.pop(name)?.to_int(name)?;
                self.push(value::chunk(chunk_kind(instr.op), from, to, &source));
            }

            // Sprite geometry
            Opcode::Intersects | Opcode::Within => {
                let name = instr.op.mnemonic();
                let b = self.pop(name)?;
                let a = self.pop(name)?;
                let [al, at, ar, ab] = sprite_rect(host, &a)?;
                let [bl, bt, br, bb] = sprite_rect(host, &b)?;
                let hit = if instr.op == Opcode::Intersects {
                    al < br && bl < ar && at < bb && bt < ab
                } else {
                    al >= bl && ar <= br && at >= bt && ab <= bb
                };
                self.push(bool_value(hit));
            }

            // Navigation
            Opcode::GoTo | Opcode::Play => {
                let name = instr.op.mnemonic();
                let movie = self.pop(name)?;
                let frame = self.pop(name)?;
                let nav = if instr.op == Opcode::GoTo {
                    Navigation::GoTo { frame, movie }
                } else {
                    Navigation::Play { frame, movie }
                };
                host.navigate(nav)?;
            }
            Opcode::GoLoop => host.navigate(Navigation::Loop)?,
            Opcode::GoNext => host.navigate(Navigation::Next)?,
            Opcode::GoPrevious => host.navigate(Navigation::Previous)?,
            Opcode::PlayDone => host.navigate(Navigation::PlayDone)?,

            op => {
                return Err(RuntimeError::new(format!(
                    "{} is not a straight-line opcode",
                    op.mnemonic()
                )));
            }
        }
        Ok(())
    }

    /// `init` and `finish` are evaluated once; the counter is re-read from
    /// the loop variable after every body run.
    fn exec_repeat_with(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        instr: &Instr<'_>,
    ) -> Result<Flow, RuntimeError> {
        let step = decode_int(instr.operands[3]);
        let scope = VarScope::try_from(instr.operands[5])
            .map_err(|word| RuntimeError::new(format!("bad loop variable scope {}", word)))?;
        let var = instr.operands[6];
        let name = match scope {
            VarScope::Param => String::new(),
            _ => literal(script, instr, 6)?.to_string(),
        };

        if let Some(unwind) = self.exec_block(script, host, instr.target(0))? {
            return Ok(Some(unwind));
        }
        let mut counter = self.pop("REPEAT_WITH")?.to_int("repeat with")?;
        if let Some(unwind) = self.exec_block(script, host, instr.target(1))? {
            return Ok(Some(unwind));
        }
        let finish = self.pop("REPEAT_WITH")?.to_int("repeat with")?;

        self.write_loop_var(scope, var, &name, Value::Int(counter))?;
        loop {
            let more = if step >= 0 { counter <= finish } else { counter >= finish };
            if !more {
                break;
            }
            match self.exec_block(script, host, instr.target(2))? {
                Some(Unwind::ExitRepeat) => break,
                Some(Unwind::Return) => return Ok(Some(Unwind::Return)),
                Some(Unwind::NextRepeat) | None => {}
            }
            let current = self
                .read_loop_var(scope, var, &name)?
                .to_int("repeat with")?;
            counter = match current.checked_add(step) {
                Some(n) => n,
                None => break,
            };
            self.write_loop_var(scope, var, &name, Value::Int(counter))?;
        }
        Ok(None)
    }

    fn read_loop_var(&self, scope: VarScope, slot: u32, name: &str) -> Result<Value, RuntimeError> {
        match scope {
            VarScope::Local => self.read_local(name),
            VarScope::Global => Ok(self.globals.get(name).cloned().unwrap_or(Value::Void)),
            VarScope::Property => Ok(self.read_prop(name)),
            VarScope::Param => self.read_param(slot as usize),
        }
    }

    fn write_loop_var(
        &mut self,
        scope: VarScope,
        slot: u32,
        name: &str,
        v: Value,
    ) -> Result<(), RuntimeError> {
        match scope {
            VarScope::Local => {
                self.frame_mut("REPEAT_WITH")?.locals.insert(name.to_string(), v);
            }
            VarScope::Global => {
                self.globals.insert(name.to_string(), v);
            }
            VarScope::Property => self.write_prop(name, v),
            VarScope::Param => self.write_param(slot as usize, v)?,
        }
        Ok(())
    }

    // Calls

    /// `CALL` resolution: a method of the object being told, a handler,
    /// a factory, then the host.
    fn call(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if let Some(told @ Value::Object(_)) = self.tell_stack.last() {
            let id = self.object_index(told, "TELL")?;
            let has_method = script
                .factory(&self.objects[id].factory)
                .is_some_and(|f| f.methods.contains_key(name));
            if has_method {
                return self.call_method(script, host, id, name, args);
            }
        }

        if let Some(proc) = script.handler(name) {
            return self.invoke(script, host, proc, args, None);
        }

        if script.factory(name).is_some() {
            return self.instantiate(script, host, name, args);
        }

        match host.command(name, &args)? {
            Some(v) => Ok(v),
            None => Err(undefined_handler(name)),
        }
    }

    fn call_builtin(
        &mut self,
        host: &mut dyn Host,
        name: &str,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let builtin = builtins::lookup(name).ok_or_else(|| undefined_handler(name))?;
        match builtin.kind {
            BuiltinKind::Native => builtins::call_native(name, args),
            BuiltinKind::Host => host
                .command(name, args)?
                .ok_or_else(|| undefined_handler(name)),
        }
    }

    /// `Factory(mNew, args...)`: creates an object and runs its `mnew`
    /// method when the factory has one. Always yields the new object.
    fn instantiate(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        factory: &str,
        mut args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match args.first() {
            Some(Value::Symbol(m)) if m == "mnew" => {
                args.remove(0);
            }
            _ => {
                return Err(RuntimeError::new(format!(
                    "factory '{}' must be called with mNew",
                    factory
                )));
            }
        }

        let entry = script
            .factory(factory)
            .ok_or_else(|| undefined_handler(factory))?;
        let ivars = entry
            .ivars
            .iter()
            .map(|name| (name.clone(), Value::Void))
            .collect();
        let id = self.objects.len();
        self.objects.push(Object {
            factory: entry.name.clone(),
            ivars,
        });
        tracing::debug!(factory, id, "instantiated object");

        if entry.methods.contains_key("mnew") {
            self.call_method(script, host, id, "mnew", args)?;
        }
        Ok(Value::Object(ObjectId(id as u32)))
    }

    fn call_method(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        id: usize,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let factory = &self
            .objects
            .get(id)
            .ok_or_else(|| RuntimeError::new(format!("dangling object #{}", id)))?
            .factory;
        let proc = script
            .factory(factory)
            .and_then(|f| f.methods.get(method))
            .ok_or_else(|| {
                RuntimeError::new(format!(
                    "object of factory '{}' has no method '{}'",
                    factory, method
                ))
            })?;

        let me = ObjectId(id as u32);
        let mut params = Vec::with_capacity(args.len() + 1);
        params.push(Value::Object(me));
        params.extend(args);
        self.invoke(script, host, proc, params, Some(me))
    }

    /// Runs a procedure body in a new frame; the frame's result is the
    /// call's value.
    fn invoke(
        &mut self,
        script: &ScriptBytecode,
        host: &mut dyn Host,
        proc: &ProcedureEntry,
        mut params: Vec<Value>,
        receiver: Option<ObjectId>,
    ) -> Result<Value, RuntimeError> {
        if params.len() < proc.slot_count() {
            params.resize(proc.slot_count(), Value::Void);
        }
        tracing::trace!(handler = %proc.name, depth = self.frames.len(), "call");
        self.frames.push(Frame {
            name: proc.name.clone(),
            params,
            locals: HashMap::new(),
            receiver,
            result: Value::Void,
        });

        let flow = self.exec_block(script, host, proc.entry as usize);
        let frame = self.frames.pop();
        flow.map_err(|e| e.with_context(&format!("in handler '{}'", proc.name)))?;
        Ok(frame.map_or(Value::Void, |f| f.result))
    }

    // Variables

    fn frame_mut(&mut self, op: &str) -> Result<&mut Frame, RuntimeError> {
        self.frames
            .last_mut()
            .ok_or_else(|| RuntimeError::new(format!("{} outside a handler", op)))
    }

    fn read_local(&self, name: &str) -> Result<Value, RuntimeError> {
        self.frames
            .last()
            .and_then(|f| f.locals.get(name))
            .cloned()
            .ok_or_else(|| undefined_variable(name))
    }

    fn read_param(&self, slot: usize) -> Result<Value, RuntimeError> {
        let frame = self
            .frames
            .last()
            .ok_or_else(|| RuntimeError::new("parameter read outside a handler"))?;
        Ok(frame.params.get(slot).cloned().unwrap_or(Value::Void))
    }

    fn write_param(&mut self, slot: usize, v: Value) -> Result<(), RuntimeError> {
        let frame = self.frame_mut("ASSIGN_PARAM")?;
        if frame.params.len() <= slot {
            frame.params.resize(slot + 1, Value::Void);
        }
        frame.params[slot] = v;
        Ok(())
    }

    /// Object whose instance variable `name` is visible here: the running
    /// method's receiver first, then the object being told.
    fn prop_owner(&self, name: &str) -> Option<usize> {
        let receiver = self.frames.last().and_then(|f| f.receiver).map(|id| id.0 as usize);
        let told = match self.tell_stack.last() {
            Some(Value::Object(id)) => Some(id.0 as usize),
            _ => None,
        };
        [receiver, told]
            .into_iter()
            .flatten()
            .find(|&id| self.objects.get(id).is_some_and(|o| o.ivars.contains_key(name)))
    }

    fn read_prop(&self, name: &str) -> Value {
        match self.prop_owner(name) {
            Some(id) => self.objects[id].ivars.get(name).cloned().unwrap_or(Value::Void),
            None => self.script_props.get(name).cloned().unwrap_or(Value::Void),
        }
    }

    fn write_prop(&mut self, name: &str, v: Value) {
        match self.prop_owner(name) {
            Some(id) => {
                self.objects[id].ivars.insert(name.to_string(), v);
            }
            None => {
                self.script_props.insert(name.to_string(), v);
            }
        }
    }

    fn object_index(&self, value: &Value, op: &str) -> Result<usize, RuntimeError> {
        match value {
            Value::Object(id) if (id.0 as usize) < self.objects.len() => Ok(id.0 as usize),
            Value::Object(id) => Err(RuntimeError::new(format!("dangling object #{}", id.0))),
            other => Err(type_error(op, "object", other.type_name())),
        }
    }

    fn no_ivar(&self, id: usize, name: &str) -> RuntimeError {
        RuntimeError::new(format!(
            "object of factory '{}' has no instance variable '{}'",
            self.objects[id].factory, name
        ))
    }

    // Stack helpers

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self, op: &str) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or_else(|| stack_underflow(op))
    }

    fn pop_args(&mut self, argc: usize, op: &str) -> Result<Vec<Value>, RuntimeError> {
        if self.stack.len() < argc {
            return Err(stack_underflow(op));
        }
        Ok(self.stack.split_off(self.stack.len() - argc))
    }

    fn binary(
        &mut self,
        op: &str,
        f: impl FnOnce(&Value, &Value) -> Result<Value, RuntimeError>,
    ) -> Result<(), RuntimeError> {
        let b = self.pop(op)?;
        let a = self.pop(op)?;
        self.push(f(&a, &b)?);
        Ok(())
    }

    /// Name of the innermost running handler, for diagnostics.
    pub fn current_handler(&self) -> Option<&str> {
        self.frames.last().map(|f| f.name.as_str())
    }
}

fn literal<'s>(script: &'s ScriptBytecode, instr: &Instr<'_>, index: usize) -> Result<&'s str, RuntimeError> {
    let word = instr.operands[index];
    script.literal(word).ok_or_else(|| {
        RuntimeError::new(format!(
            "literal index {} out of range in {} at {}",
            word,
            instr.op.mnemonic(),
            instr.pos
        ))
    })
}

fn entity_operands(instr: &Instr<'_>) -> Result<(TheEntity, TheField), RuntimeError> {
    let entity = TheEntity::from_word(instr.operands[0]);
    let field = TheField::from_word(instr.operands[1]);
    match (entity, field) {
        (Some(e), Some(f)) => Ok((e, f)),
        _ => Err(RuntimeError::new(format!(
            "bad entity operands in {} at {}",
            instr.op.mnemonic(),
            instr.pos
        ))),
    }
}

fn chunk_kind(op: Opcode) -> ChunkKind {
    match op {
        Opcode::CharOf | Opcode::CharToOf => ChunkKind::Char,
        Opcode::WordOf | Opcode::WordToOf => ChunkKind::Word,
        Opcode::ItemOf | Opcode::ItemToOf => ChunkKind::Item,
        _ => ChunkKind::Line,
    }
}

/// `[left, top, right, bottom]` of a sprite, read through the host.
fn sprite_rect(host: &mut dyn Host, sprite: &Value) -> Result<[i32; 4], RuntimeError> {
    let mut rect = [0; 4];
    let fields = [TheField::Left, TheField::Top, TheField::Right, TheField::Bottom];
    for (slot, field) in rect.iter_mut().zip(fields) {
        let edge = EntityRef::with_id(TheEntity::Sprite, field, sprite.clone());
        *slot = host.get_the(&edge)?.to_int("sprite geometry")?;
    }
    Ok(rect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;
    use crate::bytecode::op::{Word, encode_int};
    use crate::runtime::host::MemoryHost;

    // ============================================================
    // Test Helpers
    // ============================================================

    fn w(op: Opcode) -> Word {
        op.into()
    }

    /// Run raw words as the main block and return the resulting stack
    fn run_ops(code: Vec<Word>) -> Result<Vec<Value>, RuntimeError> {
        let script = ScriptBytecode {
            code,
            literals: vec!["hello".to_string(), "x".to_string()],
            ..Default::default()
        };
        let mut vm = Vm::new();
        vm.run(&script, &mut MemoryHost::new())?;
        Ok(vm.stack().to_vec())
    }

    /// Assert stack contains expected values
    fn assert_stack(code: Vec<Word>, expected: Vec<Value>) {
        let stack = run_ops(code).expect("execution should succeed");
        assert_eq!(stack, expected, "stack mismatch");
    }

    fn compile(src: &str) -> ScriptBytecode {
        Compiler::new()
            .compile(src)
            .expect("compiles")
            .into_script()
            .expect("no syntax errors")
    }

    /// Compile and run a script, returning the VM and host
    fn run_src(src: &str) -> Result<(Vm, MemoryHost), RuntimeError> {
        let script = compile(src);
        let mut vm = Vm::new();
        let mut host = MemoryHost::new();
        vm.run(&script, &mut host)?;
        Ok((vm, host))
    }

    fn assert_output(src: &str, expected: &[&str]) {
        let (_, host) = run_src(src).expect("execution should succeed");
        assert_eq!(host.output, expected, "output mismatch");
    }

    /// Assert execution produces an error containing the given substring
    fn assert_error(src: &str, error_contains: &str) {
        match run_src(src) {
            Ok((_, host)) => panic!(
                "expected error containing '{}', got output: {:?}",
                error_contains, host.output
            ),
            Err(e) => assert!(
                e.to_string().contains(error_contains),
                "expected error containing '{}', got: {}",
                error_contains,
                e
            ),
        }
    }

    // ============================================================
    // Raw bytecode
    // ============================================================

    #[test]
    fn test_push_and_add() {
        assert_stack(
            vec![w(Opcode::PushInt), 2, w(Opcode::PushInt), 3, w(Opcode::Add), w(Opcode::Stop)],
            vec![Value::Int(5)],
        );
    }

    #[test]
    fn test_swap_and_strings() {
        assert_stack(
            vec![
                w(Opcode::PushString),
                0,
                w(Opcode::PushSymbol),
                1,
                w(Opcode::Swap),
                w(Opcode::Stop),
            ],
            vec![Value::Symbol("x".to_string()), Value::String("hello".to_string())],
        );
    }

    #[test]
    fn test_negative_int_word() {
        assert_stack(
            vec![w(Opcode::PushInt), encode_int(-7), w(Opcode::Negate), w(Opcode::Stop)],
            vec![Value::Int(7)],
        );
    }

    #[test]
    fn test_if_code_picks_else_block() {
        // 2 IF_CODE [then: PUSH 1 PUT STOP] [else: PUSH 2 PUT STOP] STOP
        let script = ScriptBytecode {
            code: vec![
                w(Opcode::PushInt),
                0,
                w(Opcode::IfCode),
                4,
                8,
                12,
                w(Opcode::PushInt),
                1,
                w(Opcode::Put),
                w(Opcode::Stop),
                w(Opcode::PushInt),
                2,
                w(Opcode::Put),
                w(Opcode::Stop),
                w(Opcode::Stop),
            ],
            ..Default::default()
        };
        let mut host = MemoryHost::new();
        Vm::new().run(&script, &mut host).unwrap();
        assert_eq!(host.output, vec!["2"]);
    }

    #[test]
    fn test_stack_check_runs_first() {
        let err = run_ops(vec![w(Opcode::Pop), w(Opcode::Stop)]).unwrap_err();
        assert!(err.message.contains("stack-check"));
    }

    #[test]
    fn test_step_limit() {
        let script = compile("repeat while 1\nend repeat");
        let mut vm = Vm::with_config(VmConfig {
            max_steps: Some(100),
            ..Default::default()
        });
        let err = vm.run(&script, &mut MemoryHost::new()).unwrap_err();
        assert!(err.message.contains("step limit"));
    }

    // ============================================================
    // Compiled scripts
    // ============================================================

    #[test]
    fn test_put_and_arithmetic() {
        assert_output("put 1 + 2 * 3\nput 7 / 2\nput 1.5 + 1", &["7", "3", "2.5000"]);
    }

    #[test]
    fn test_string_operators() {
        assert_output(
            "put \"a\" & \"b\" && \"c\"\nput \"Hello\" contains \"ELL\"\nput \"abc\" starts \"b\"",
            &["ab c", "1", "0"],
        );
    }

    #[test]
    fn test_chunks() {
        assert_output(
            "put word 2 of \"one two three\"\nput item 1 to 2 of \"a,b,c\"\nput char 5 of \"abc\"",
            &["two", "a,b", ""],
        );
    }

    #[test]
    fn test_if_else() {
        let src = "x = 5\nif x > 3 then\n  put \"big\"\nelse\n  put \"small\"\nend if\nif x < 3 then put 1 else put 2";
        assert_output(src, &["big", "2"]);
    }

    #[test]
    fn test_else_if_chain() {
        let src = "on grade n\n  if n > 90 then\n    return \"a\"\n  else if n > 80 then\n    return \"b\"\n  else\n    return \"c\"\n  end if\nend\nput grade(95)\nput grade(85)\nput grade(10)";
        assert_output(src, &["a", "b", "c"]);
    }

    #[test]
    fn test_repeat_while() {
        assert_output("i = 0\nrepeat while i < 3\n  put i\n  i = i + 1\nend repeat", &["0", "1", "2"]);
    }

    #[test]
    fn test_repeat_with_up_and_down() {
        assert_output("repeat with i = 1 to 3\n  put i\nend repeat", &["1", "2", "3"]);
        assert_output("repeat with i = 3 down to 1\n  put i\nend repeat", &["3", "2", "1"]);
        assert_output("repeat with i = 5 to 1\n  put i\nend repeat", &[]);
    }

    #[test]
    fn test_repeat_with_rereads_counter() {
        let src = "on f\n  repeat with i = 1 to 10\n    put i\n    i = i + 4\n  end repeat\nend\nf";
        assert_output(src, &["1", "6"]);
    }

    #[test]
    fn test_exit_and_next_repeat() {
        let src = "on f\n  repeat with i = 1 to 5\n    if i = 2 then next repeat\n    if i = 4 then exit repeat\n    put i\n  end repeat\n  put \"done\"\nend\nf";
        assert_output(src, &["1", "3", "done"]);
    }

    #[test]
    fn test_return_unwinds_loops() {
        let src = "on find\n  repeat while 1\n    repeat with i = 1 to 9\n      if i = 3 then return i\n    end repeat\n  end repeat\nend\nput find()";
        assert_output(src, &["3"]);
    }

    #[test]
    fn test_forward_call_and_recursion() {
        let src = "put fact(5)\non fact n\n  if n <= 1 then return 1\n  return n * fact(n - 1)\nend";
        assert_output(src, &["120"]);
    }

    #[test]
    fn test_handler_without_return_yields_void() {
        assert_output("on f\n  x = 1\nend\nput f()", &["<Void>"]);
    }

    #[test]
    fn test_missing_args_are_void() {
        assert_output("on f a, b\n  return b\nend\nput f(1)", &["<Void>"]);
    }

    #[test]
    fn test_globals_shared_between_handlers() {
        let src = "global counter\non bump\n  global counter\n  counter = counter + 1\nend\ncounter = 10\nbump\nbump\nput counter";
        assert_output(src, &["12"]);
    }

    #[test]
    fn test_unassigned_global_reads_void() {
        assert_output("put nothing", &["<Void>"]);
    }

    #[test]
    fn test_unassigned_local_is_an_error() {
        assert_error("on f\n  put y\nend\nf", "'y' used before assignment");
    }

    #[test]
    fn test_error_carries_handler_context() {
        assert_error("on inner\n  return 1 / 0\nend\non outer\n  return inner()\nend\nput outer()", "in handler 'inner'");
    }

    #[test]
    fn test_undefined_handler() {
        assert_error("nosuchthing 1", "undefined handler 'nosuchthing'");
    }

    #[test]
    fn test_recursion_limit() {
        let script = compile("on loop1\n  return loop1()\nend\nput loop1()");
        let mut vm = Vm::with_config(VmConfig {
            max_call_depth: 50,
            ..Default::default()
        });
        let err = vm.run(&script, &mut MemoryHost::new()).unwrap_err();
        assert!(err.message.contains("call depth limit exceeded (50)"));
    }

    #[test]
    fn test_nested_blocks_count_toward_depth() {
        // three blocks per call: body, then-branch and loop body
        let src = "on r n\n  if n > 0 then\n    repeat with i = 1 to 1\n      return r(n - 1)\n    end repeat\n  end if\n  return 0\nend\n";
        assert_output(&format!("{}put r(20)", src), &["0"]);

        let script = compile(&format!("{}put r(190)", src));
        let mut vm = Vm::new();
        let err = vm.run(&script, &mut MemoryHost::new()).unwrap_err();
        assert!(err.message.contains("call depth limit exceeded (250)"), "{}", err);
        assert!(err.message.contains("in 'r'"), "{}", err);

        // the counter is reset for the next run
        let script = compile(&format!("{}put r(5)", src));
        let mut host = MemoryHost::new();
        vm.run(&script, &mut host).unwrap();
        assert_eq!(host.output, vec!["0"]);
    }

    #[test]
    fn test_builtins() {
        assert_output(
            "put abs(-3)\nput max(1, 9, 4)\nput length(\"hello\")\nput offset(\"l\", \"hello\")",
            &["3", "9", "5", "3"],
        );
    }

    #[test]
    fn test_host_builtins_and_commands() {
        let (_, host) = run_src("beep\nput random(6)").unwrap();
        assert_eq!(host.output, vec!["1"]);
        assert_eq!(host.commands[0].0, "beep");
        assert_eq!(host.commands[1], ("random".to_string(), vec![Value::Int(6)]));
    }

    #[test]
    fn test_the_entities() {
        let src = "set the locH of sprite 2 to 40\nput the locH of sprite 2\nset the stageColor to 3\nput the stageColor\nput 7 into the text of field \"score\"\nput the text of field \"score\"";
        assert_output(src, &["40", "3", "7"]);
    }

    #[test]
    fn test_menu_items() {
        let src = "set the checkMark of menuItem 1 of menu \"File\" to 1\nput the checkMark of menuItem 1 of menu \"File\"";
        assert_output(src, &["1"]);
    }

    #[test]
    fn test_sprite_geometry() {
        let script = compile("put sprite 1 intersects sprite 2\nput sprite 1 within 2\nput sprite 3 within 2");
        let mut host = MemoryHost::new();
        let rects = [(1, [0, 0, 10, 10]), (2, [5, 5, 50, 50]), (3, [10, 10, 20, 20])];
        let fields = [TheField::Left, TheField::Top, TheField::Right, TheField::Bottom];
        for (sprite, rect) in rects {
            for (field, edge) in fields.iter().zip(rect) {
                host.set(&EntityRef::with_id(TheEntity::Sprite, *field, Value::Int(sprite)), Value::Int(edge));
            }
        }
        Vm::new().run(&script, &mut host).unwrap();
        assert_eq!(host.output, vec!["1", "0", "1"]);
    }

    #[test]
    fn test_navigation() {
        let (_, host) = run_src("go to frame 5\ngo loop\nplay movie \"intro\"\nplay done").unwrap();
        assert_eq!(
            host.navigation,
            vec![
                Navigation::GoTo {
                    frame: Value::Int(5),
                    movie: Value::Void
                },
                Navigation::Loop,
                Navigation::Play {
                    frame: Value::Void,
                    movie: Value::String("intro".to_string())
                },
                Navigation::PlayDone,
            ]
        );
    }

    #[test]
    fn test_factory_objects() {
        let src = "global c\nc = counter(mNew, 10)\nput c(mNext)\nput c(mNext)\nput c(mGet)\n\nfactory counter\ninstance n\nmethod mNew start\n  set n = start\nmethod mNext\n  set n = n + 1\n  return n\nmethod mGet\n  return the n of me";
        assert_output(src, &["11", "12", "12"]);
    }

    #[test]
    fn test_objects_are_independent() {
        let src = "global a, b\na = box(mNew, 1)\nb = box(mNew, 2)\nput a(mGet) + b(mGet)\n\nfactory box\ninstance v\nmethod mNew x\n  set v = x\nmethod mGet\n  return v";
        assert_output(src, &["3"]);
    }

    #[test]
    fn test_object_field_assignment() {
        let src = "global p\np = pt(mNew)\nset the x of p to 9\nput p(mGet)\nput the x of p\n\nfactory pt\ninstance x\nmethod mGet\n  return x";
        assert_output(src, &["9", "9"]);
    }

    #[test]
    fn test_tell_routes_calls_to_object() {
        let src = "factory greeter\nmethod hello\n  put \"hi from object\"\n\non hello\n  put \"hi from handler\"\nend\nglobal g\ng = greeter(mNew)\ntell g to hello\nhello";
        assert_output(src, &["hi from object", "hi from handler"]);
    }

    #[test]
    fn test_script_properties() {
        let src = "property score\non addPoint\n  score = score + 1\nend\nscore = 0\naddPoint\naddPoint\nput score";
        assert_output(src, &["2"]);
    }

    #[test]
    fn test_when_handlers() {
        let script = compile("global clicks\nclicks = 0\nwhen mouseDown then clicks = clicks + 1");
        let mut vm = Vm::new();
        let mut host = MemoryHost::new();
        vm.run(&script, &mut host).unwrap();
        assert!(vm.dispatch_event(&script, &mut host, "MouseDown").unwrap());
        assert!(vm.dispatch_event(&script, &mut host, "mousedown").unwrap());
        assert!(!vm.dispatch_event(&script, &mut host, "keyDown").unwrap());
        assert_eq!(vm.global("clicks"), Some(&Value::Int(2)));
    }

    #[test]
    fn test_call_handler_from_host() {
        let script = compile("on add a, b\n  return a + b\nend");
        let mut vm = Vm::new();
        let mut host = MemoryHost::new();
        vm.run(&script, &mut host).unwrap();
        let v = vm
            .call_handler(&script, &mut host, "Add", vec![Value::Int(2), Value::Int(3)])
            .unwrap();
        assert_eq!(v, Value::Int(5));
        assert!(vm.call_handler(&script, &mut host, "nope", vec![]).is_err());
    }

    #[test]
    fn test_dangling_object_from_host_is_an_error() {
        let script = compile("on f o\n  tell o to g\nend\non h o\n  return o(mNext)\nend");
        let mut vm = Vm::new();
        let mut host = MemoryHost::new();
        vm.run(&script, &mut host).unwrap();

        let stale = vec![Value::Object(ObjectId(7))];
        let err = vm.call_handler(&script, &mut host, "f", stale.clone()).unwrap_err();
        assert!(err.message.contains("dangling object #7"), "{}", err);
        let err = vm.call_handler(&script, &mut host, "h", stale).unwrap_err();
        assert!(err.message.contains("dangling object #7"), "{}", err);
    }

    #[test]
    fn test_top_level_exit_stops_script() {
        assert_output("put 1\nexit\nput 2", &["1"]);
    }

    #[test]
    fn test_type_errors() {
        assert_error("put #a + 1", "type error in +");
        assert_error("if \"x\" then put 1", "type error in condition");
    }
}
