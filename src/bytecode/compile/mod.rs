//! Single-pass compiler: tokens in, word-encoded bytecode out.
//!
//! The parser emits code while it recognises the input. Constructs whose
//! block boundaries are not known yet reserve offset words and resolve them
//! once the blocks are emitted (see `bytecode::patch`).

mod context;
mod expr;
mod handler;
mod parser;
mod stmt;

pub use context::{Reporter, VarRef};
pub use stmt::AssignTarget;

use crate::bytecode::compile::context::CompilerContext;
use crate::bytecode::compile::parser::Emitter;
use crate::bytecode::compile_error::{CompileError, Diagnostic, Severity};
use crate::bytecode::ir::ScriptBytecode;
use crate::frontend::lexer::{Lexer, Spanned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerConfig {
    /// Reuse literal slots for repeated strings, symbols and names.
    pub dedup_literals: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            dedup_literals: true,
        }
    }
}

/// Result of compiling one script. Bytecode is produced even when the
/// script had errors; `into_script` refuses it in that case.
#[derive(Debug, Clone, PartialEq)]
pub struct Compilation {
    pub script: ScriptBytecode,
    pub diagnostics: Vec<Diagnostic>,
    pub had_error: bool,
}

impl Compilation {
    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }

    pub fn into_script(self) -> Result<ScriptBytecode, CompileError> {
        if self.had_error {
            let errors = self.diagnostics.iter().filter(|d| d.is_error()).count();
            return Err(CompileError::Rejected { errors });
        }
        Ok(self.script)
    }
}

pub struct Compiler {
    config: CompilerConfig,
    reporter: Option<Reporter>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        Compiler {
            config,
            reporter: None,
        }
    }

    /// Calls `f` for every diagnostic as soon as it is reported.
    pub fn on_diagnostic(mut self, f: impl FnMut(&Diagnostic) + 'static) -> Self {
        self.reporter = Some(Box::new(f));
        self
    }

    /// Lexes and compiles `source`. Syntax errors end up in the returned
    /// diagnostics; only lexer and internal errors are `Err`.
    pub fn compile(&mut self, source: &str) -> Result<Compilation, CompileError> {
        let tokens = match Lexer::new(source).tokenize_clean() {
            Ok(tokens) => tokens,
            Err(err) => {
                if let Some(reporter) = self.reporter.as_mut() {
                    reporter(&Diagnostic {
                        severity: Severity::Error,
                        message: err.message.clone(),
                        line: err.line,
                        col: err.col,
                    });
                }
                return Err(err.into());
            }
        };
        self.compile_tokens(tokens)
    }

    pub fn compile_tokens(&mut self, tokens: Vec<Spanned>) -> Result<Compilation, CompileError> {
        let ctx = CompilerContext::new(&self.config, self.reporter.take());
        let mut emitter = Emitter::new(tokens, ctx);
        let result = emitter.compile_script();

        let mut ctx = emitter.into_context();
        self.reporter = ctx.take_reporter();
        result?;

        let (script, diagnostics, had_error) = ctx.finish()?;
        tracing::debug!(
            words = script.code.len(),
            literals = script.literals.len(),
            handlers = script.handlers.len(),
            diagnostics = diagnostics.len(),
            had_error,
            "compiled script"
        );
        Ok(Compilation {
            script,
            diagnostics,
            had_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::bytecode::op::{Opcode, Word, decode, decode_int};

    fn compile(src: &str) -> Compilation {
        Compiler::new().compile(src).unwrap()
    }

    fn compile_ok(src: &str) -> ScriptBytecode {
        let compilation = compile(src);
        assert!(
            !compilation.had_error,
            "unexpected errors: {:?}",
            compilation.diagnostics
        );
        compilation.script
    }

    fn error_messages(src: &str) -> Vec<String> {
        compile(src).errors().map(|d| d.message.clone()).collect()
    }

    /// Opcode sequence of the whole stream, operands skipped.
    fn opcodes(script: &ScriptBytecode) -> Vec<Opcode> {
        let mut ops = Vec::new();
        let mut pos = 0;
        while pos < script.code.len() {
            let instr = decode(&script.code, pos).unwrap();
            ops.push(instr.op);
            pos = instr.next();
        }
        ops
    }

    fn w(op: Opcode) -> Word {
        op.into()
    }

    #[test]
    fn test_put_literal() {
        let script = compile_ok("put 1");
        assert_eq!(script.code, vec![w(Opcode::PushInt), 1, w(Opcode::Put), 0]);
    }

    #[test]
    fn test_arithmetic_precedence() {
        let script = compile_ok("put 1 + 2 * 3");
        assert_eq!(
            opcodes(&script),
            vec![
                Opcode::PushInt,
                Opcode::PushInt,
                Opcode::PushInt,
                Opcode::Mul,
                Opcode::Add,
                Opcode::Put,
                Opcode::Stop
            ]
        );
    }

    #[test]
    fn test_negative_literal_is_folded() {
        let script = compile_ok("put -5");
        assert_eq!(script.code[0], w(Opcode::PushInt));
        assert_eq!(decode_int(script.code[1]), -5);
    }

    #[test]
    fn test_single_line_if_layout() {
        let script = compile_ok("if x then put 1");
        assert_eq!(
            script.code,
            vec![
                w(Opcode::PushGlobal),
                0,
                w(Opcode::IfCode),
                4,
                8,
                9,
                w(Opcode::PushInt),
                1,
                w(Opcode::Put),
                w(Opcode::Stop),
                w(Opcode::Stop),
                w(Opcode::Stop),
            ]
        );
    }

    #[test]
    fn test_if_else_blocks() {
        let src = "if a then\n  put 1\nelse\n  put 2\nend if";
        let script = compile_ok(src);
        let instr = decode(&script.code, 2).unwrap();
        assert_eq!(instr.op, Opcode::IfCode);
        let then_block = instr.target(0);
        let else_block = instr.target(1);
        let end = instr.target(2);
        assert_eq!(then_block, instr.next());
        assert_eq!(script.code[else_block - 1], w(Opcode::Stop));
        assert_eq!(script.code[end - 1], w(Opcode::Stop));
        assert_eq!(decode(&script.code, else_block).unwrap().op, Opcode::PushInt);
        assert_eq!(script.code[else_block + 1], 2);
    }

    #[test]
    fn test_else_if_nests_inside_else_block() {
        let src = "if a then\n put 1\nelse if b then\n put 2\nelse\n put 3\nend if";
        let script = compile_ok(src);
        let ifs = opcodes(&script)
            .into_iter()
            .filter(|op| *op == Opcode::IfCode)
            .count();
        assert_eq!(ifs, 2);

        let outer = decode(&script.code, 2).unwrap();
        let inner_cond = outer.target(1);
        let inner_pos = inner_cond + 2;
        let inner = decode(&script.code, inner_pos).unwrap();
        assert_eq!(inner.op, Opcode::IfCode);
        // inner end lands on the outer else block's STOP
        assert_eq!(inner.target(2), outer.target(2) - 1);
    }

    #[test]
    fn test_repeat_while_layout() {
        let src = "repeat while i < 3\n  i = i + 1\nend repeat";
        let script = compile_ok(src);
        let instr = decode(&script.code, 0).unwrap();
        assert_eq!(instr.op, Opcode::RepeatWhile);
        let body = instr.target(0);
        let end = instr.target(1);
        assert_eq!(script.code[body - 1], w(Opcode::Stop));
        assert_eq!(script.code[end - 1], w(Opcode::Stop));
        assert_eq!(end, script.code.len() - 1);
    }

    #[test]
    fn test_repeat_with_down_to() {
        let src = "on count\n  repeat with i = 5 down to 1\n    put i\n  end repeat\nend";
        let script = compile_ok(src);
        let entry = script.handler("count").unwrap().entry as usize;
        let instr = decode(&script.code, entry).unwrap();
        assert_eq!(instr.op, Opcode::RepeatWith);
        assert_eq!(instr.operands[3], 0xFFFF_FFFF);
        assert_eq!(instr.operands[5], crate::bytecode::op::VarScope::Local as Word);
        assert_eq!(script.literal(instr.operands[6]), Some("i"));
        assert_eq!(instr.target(0), instr.next());
    }

    #[test]
    fn test_handler_is_skipped_by_main_block() {
        let script = compile_ok("on foo\n  return 5\nend");
        assert_eq!(
            script.code,
            vec![
                w(Opcode::Jump),
                6,
                w(Opcode::PushInt),
                5,
                w(Opcode::ReturnValue),
                w(Opcode::ProcReturn),
                w(Opcode::Stop),
            ]
        );
        let foo = script.handler("foo").unwrap();
        assert_eq!(foo.entry, 2);
        assert_eq!(foo.arity, 0);
    }

    #[test]
    fn test_handler_params_are_slots() {
        let script = compile_ok("on add a, b\n  return a + b\nend add");
        let add = script.handler("add").unwrap();
        assert_eq!(add.arity, 2);
        let entry = add.entry as usize;
        assert_eq!(&script.code[entry..entry + 4], &[w(Opcode::PushParam), 0, w(Opcode::PushParam), 1]);
    }

    #[test]
    fn test_forward_call_compiles_to_call() {
        let script = compile_ok("put double(2)\non double n\n  return n * 2\nend");
        let ops = opcodes(&script);
        assert_eq!(ops[1], Opcode::Call);
        assert_eq!(script.literal(script.code[3]), Some("double"));
        assert_eq!(script.code[4], 1);
    }

    #[test]
    fn test_command_statement_discards_result() {
        let script = compile_ok("on go1\n  beep\n  doIt 1, 2\nend");
        let ops = opcodes(&script);
        assert!(ops.windows(2).any(|p| p == [Opcode::CallBuiltin, Opcode::Pop]));
        assert!(ops.windows(2).any(|p| p == [Opcode::Call, Opcode::Pop]));
    }

    #[test]
    fn test_builtin_arity_is_checked() {
        let errors = error_messages("put abs(1, 2)");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'abs' expects"));
    }

    #[test]
    fn test_method_name_argument_becomes_symbol() {
        let script = compile_ok("global obj\nobj = counter(mNew)\nput obj(mNext)");
        let symbols: Vec<_> = script
            .literals
            .iter()
            .filter(|l| l.starts_with('m'))
            .cloned()
            .collect();
        assert!(symbols.contains(&"mnew".to_string()));
        assert!(symbols.contains(&"mnext".to_string()));
        assert!(opcodes(&script).contains(&Opcode::ObjCall));
    }

    #[test]
    fn test_name_resolution() {
        let src = "property score\nglobal g\non f p\n  global h\n  x = 1\n  put p & x & g & h & score\nend";
        let script = compile_ok(src);
        let ops = opcodes(&script);
        assert!(ops.contains(&Opcode::AssignVar));
        assert!(ops.contains(&Opcode::PushParam));
        assert!(ops.contains(&Opcode::PushVar));
        assert_eq!(ops.iter().filter(|op| **op == Opcode::PushGlobal).count(), 2);
        assert!(ops.contains(&Opcode::PushProp));
        assert_eq!(script.properties, vec!["score".to_string()]);
    }

    #[test]
    fn test_put_into_entity_with_id_swaps() {
        let script = compile_ok("put 10 into the locH of sprite 3");
        assert_eq!(
            opcodes(&script),
            vec![
                Opcode::PushInt,
                Opcode::PushInt,
                Opcode::Swap,
                Opcode::TheEntityWithIdAssign,
                Opcode::Stop
            ]
        );
    }

    #[test]
    fn test_put_after_concatenates() {
        let script = compile_ok("s = \"a\"\nput \"b\" after s");
        let ops = opcodes(&script);
        assert!(ops.windows(4).any(|p| p
            == [Opcode::PushString, Opcode::PushGlobal, Opcode::Swap, Opcode::Concat]));
    }

    #[test]
    fn test_put_into_menu_item_is_rejected() {
        let errors = error_messages("put 1 into the checkMark of menuItem 1 of menu 2");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'set'"));
    }

    #[test]
    fn test_set_menu_item() {
        let script = compile_ok("set the enabled of menuItem 1 of menu \"File\" to 0");
        assert!(opcodes(&script).contains(&Opcode::TheMenuItemAssign));
    }

    #[test]
    fn test_tell_and_when() {
        let script = compile_ok("tell obj to put 1\nwhen mouseDown then beep");
        let ops = opcodes(&script);
        assert!(ops.contains(&Opcode::Tell));
        assert!(ops.contains(&Opcode::WhenCode));
        let when_pos = script
            .code
            .iter()
            .position(|word| *word == w(Opcode::WhenCode))
            .unwrap();
        assert_eq!(script.literal(script.code[when_pos + 2]), Some("mousedown"));
    }

    #[test]
    fn test_navigation() {
        let script = compile_ok("go to frame 5\ngo loop\nplay done\nplay movie \"intro\"");
        let ops = opcodes(&script);
        assert!(ops.contains(&Opcode::GoTo));
        assert!(ops.contains(&Opcode::GoLoop));
        assert!(ops.contains(&Opcode::PlayDone));
        assert!(ops.contains(&Opcode::Play));
    }

    #[test]
    fn test_factory_methods() {
        let src = "factory counter\ninstance n\nmethod mNew\n  set n = 0\n  return me\nmethod mNext\n  set n = n + 1\n  return n\n";
        let script = compile_ok(src);
        let factory = script.factory("counter").unwrap();
        assert_eq!(factory.ivars, vec!["n".to_string()]);
        let mnew = &factory.methods["mnew"];
        assert_eq!(mnew.arity, 0);
        assert_eq!(mnew.slot_count(), 1);
        assert_eq!(mnew.factory.as_deref(), Some("counter"));
        assert!(script.handlers.is_empty());
    }

    #[test]
    fn test_top_level_object_survives_handler_definitions() {
        let src = "o = counter(mNew)\non f\n  x = 1\nend\nput o(mNext)";
        let ops = opcodes(&compile_ok(src));
        assert!(ops.contains(&Opcode::ObjCall));
        assert_eq!(ops.iter().filter(|op| **op == Opcode::Call).count(), 1);

        // a handler's locals stay its own
        let ops = opcodes(&compile_ok("x = 1\non f\n  put x(1)\nend"));
        assert!(!ops.contains(&Opcode::ObjCall));
    }

    #[test]
    fn test_me_outside_method_is_an_error() {
        let errors = error_messages("on f\n  put me\nend");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'me'"));
    }

    #[test]
    fn test_exit_repeat_outside_loop() {
        let errors = error_messages("on f\n  exit repeat\nend");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_recovers_and_reports_every_bad_line() {
        let compilation = compile("put (1\nput 2 +\nput 3");
        assert_eq!(compilation.errors().count(), 2);
        assert!(compilation.had_error);
        // the good line still compiles
        assert!(compilation.script.code.len() > 2);
    }

    #[test]
    fn test_missing_end_is_reported() {
        let errors = error_messages("on f\n  if a then\n    put 1\n");
        assert!(errors.iter().any(|e| e.contains("missing 'end' for if")));
        assert!(errors.iter().any(|e| e.contains("missing 'end' for handler 'f'")));
    }

    #[test]
    fn test_end_name_mismatch_is_a_warning() {
        let compilation = compile("on f\n  repeat while 1\n    exit repeat\n  end if\nend f");
        assert!(!compilation.had_error);
        assert_eq!(compilation.warnings().count(), 1);
    }

    #[test]
    fn test_into_script_rejects_errors() {
        let compilation = compile("put +");
        assert!(matches!(
            compilation.into_script(),
            Err(CompileError::Rejected { errors: 1 })
        ));
    }

    #[test]
    fn test_lexer_error_is_fatal() {
        let err = Compiler::new().compile("put \"abc").unwrap_err();
        assert!(matches!(err, CompileError::Lexer(_)));
    }

    #[test]
    fn test_lexer_error_reaches_the_reporter() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut compiler = Compiler::new().on_diagnostic(move |d| sink.borrow_mut().push(d.clone()));
        assert!(compiler.compile("put 1\nput \"abc").is_err());

        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].is_error());
        assert_eq!(seen[0].line, 2);
    }

    #[test]
    fn test_reporter_sees_diagnostics_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut compiler = Compiler::new().on_diagnostic(move |d| sink.borrow_mut().push(d.line));
        compiler.compile("put +\nput 1\nput *").unwrap();
        assert_eq!(*seen.borrow(), vec![1, 3]);

        // the reporter survives for the next compilation
        compiler.compile("put -").unwrap();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn test_recompilation_is_identical() {
        let src = "on f a\n  if a > 1 then return a\n  return 0\nend\nput f(3)";
        let mut compiler = Compiler::new();
        let first = compiler.compile(src).unwrap();
        let second = compiler.compile(src).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_literal_dedup_can_be_disabled() {
        let src = "put \"x\"\nput \"x\"";
        let dedup = Compiler::new().compile(src).unwrap().script;
        let plain = Compiler::with_config(CompilerConfig {
            dedup_literals: false,
        })
        .compile(src)
        .unwrap()
        .script;
        assert_eq!(dedup.literals.len(), 1);
        assert_eq!(plain.literals.len(), 2);
    }
}
