use crate::bytecode::compile_error::BytecodeError;
use crate::bytecode::ir::{ProcedureEntry, ScriptBytecode};
use crate::bytecode::op::{Instr, Opcode, VarScope, Word, decode, offset_target};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("stack-check error: {message}")]
pub struct StackCheckError {
    pub message: String,
}

impl StackCheckError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<BytecodeError> for StackCheckError {
    fn from(err: BytecodeError) -> Self {
        Self::new(err.to_string())
    }
}

/// Returns (pops, pushes) for the straight-line opcodes. Structured opcodes
/// are handled by the walker and return `None`.
fn effect(instr: &Instr<'_>) -> Option<(i32, i32)> {
    use Opcode::*;
    Some(match instr.op {
        PushInt | PushFloat | PushString | PushSymbol | PushVoid => (0, 1),
        Pop => (1, 0),
        Swap => (2, 2),
        Put => (1, 0),

        PushVar | PushGlobal | PushProp | PushParam => (0, 1),
        AssignVar | AssignGlobal | AssignProp | AssignParam => (1, 0),

        TheEntityPush => (0, 1),
        TheEntityWithIdPush => (1, 1),
        TheMenuItemPush => (2, 1),
        TheEntityAssign => (1, 0),
        TheEntityWithIdAssign => (2, 0),
        TheMenuItemAssign => (3, 0),
        ObjectFieldPush => (1, 1),
        ObjectFieldAssign => (2, 0),

        Add | Sub | Mul | Div | Mod => (2, 1),
        Negate => (1, 1),
        Eq | NotEq | Lt | LtEq | Gt | GtEq => (2, 1),
        And | Or => (2, 1),
        Not => (1, 1),

        Concat | ConcatSpace | Contains | Starts => (2, 1),
        // ( index source -- chunk )
        CharOf | WordOf | ItemOf | LineOf => (2, 1),
        // ( from to source -- chunk )
        CharToOf | WordToOf | ItemToOf | LineToOf => (3, 1),
        Intersects | Within => (2, 1),

        ExitRepeat | NextRepeat => (0, 0),

        // every call leaves exactly one result
        Call | CallBuiltin => (instr.operands[1] as i32, 1),
        ObjCall => (instr.operands[0] as i32 + 1, 1),
        ProcReturn => (0, 0),
        ReturnValue => (1, 0),

        // ( frame movie -- )
        GoTo | Play => (2, 0),
        GoLoop | GoNext | GoPrevious | PlayDone => (0, 0),

        Stop | IfCode | RepeatWhile | RepeatWith | Tell | WhenCode | Jump => return None,
    })
}

/// Operand indices holding literal-pool references.
fn literal_operands(instr: &Instr<'_>) -> &'static [usize] {
    use Opcode::*;
    match instr.op {
        PushString | PushSymbol | PushVar | PushGlobal | PushProp | AssignVar | AssignGlobal
        | AssignProp | ObjectFieldPush | ObjectFieldAssign | Call | CallBuiltin => &[0],
        WhenCode => &[1],
        RepeatWith if instr.operands[5] != VarScope::Param as Word => &[6],
        _ => &[],
    }
}

struct Checker<'a> {
    script: &'a ScriptBytecode,
}

impl Checker<'_> {
    fn code(&self) -> &[Word] {
        &self.script.code
    }

    /// Walks one block starting at `pos` until its closing `STOP` (or until
    /// `stop_at` for handler bodies). Returns the position after the block
    /// and the stack height at its end.
    fn block(
        &self,
        mut pos: usize,
        mut height: i32,
        limit: usize,
        stop_at: Option<usize>,
    ) -> Result<(usize, i32), StackCheckError> {
        loop {
            if stop_at == Some(pos) {
                return Ok((pos, height));
            }
            if pos >= limit {
                return Err(StackCheckError::new(format!(
                    "block starting before {} runs past its end at {}",
                    pos, limit
                )));
            }

            let instr = decode(self.code(), pos)?;
            self.check_literals(&instr)?;

            if let Some((pops, pushes)) = effect(&instr) {
                height = pop(height, pops, &instr)?;
                height += pushes;
                pos = instr.next();
                continue;
            }

            match instr.op {
                Opcode::Stop => return Ok((instr.next(), height)),
                Opcode::IfCode => {
                    height = pop(height, 1, &instr)?;
                    let then_block = self.forward_target(&instr, 0)?;
                    let else_block = self.forward_target(&instr, 1)?;
                    let end = self.forward_target(&instr, 2)?;
                    expect_at(then_block, instr.next(), "then block")?;
                    self.balanced(then_block, height, 0, else_block, "then block")?;
                    self.balanced(else_block, height, 0, end, "else block")?;
                    pos = end;
                }
                Opcode::RepeatWhile => {
                    let body = self.forward_target(&instr, 0)?;
                    let end = self.forward_target(&instr, 1)?;
                    self.balanced(instr.next(), height, 1, body, "loop condition")?;
                    self.balanced(body, height, 0, end, "loop body")?;
                    pos = end;
                }
                Opcode::RepeatWith => {
                    let init = self.forward_target(&instr, 0)?;
                    let finish = self.forward_target(&instr, 1)?;
                    let body = self.forward_target(&instr, 2)?;
                    let end = self.forward_target(&instr, 4)?;
                    let step = instr.operands[3];
                    if step != 1 && step != 0xFFFF_FFFF {
                        return Err(invalid(&instr, step).into());
                    }
                    VarScope::try_from(instr.operands[5])
                        .map_err(|word| StackCheckError::from(invalid(&instr, word)))?;
                    expect_at(init, instr.next(), "loop start value")?;
                    self.balanced(init, height, 1, finish, "loop start value")?;
                    self.balanced(finish, height, 1, body, "loop end value")?;
                    self.balanced(body, height, 0, end, "loop body")?;
                    pos = end;
                }
                Opcode::Tell => {
                    height = pop(height, 1, &instr)?;
                    let end = self.forward_target(&instr, 0)?;
                    self.balanced(instr.next(), height, 0, end, "tell block")?;
                    pos = end;
                }
                Opcode::WhenCode => {
                    let end = self.forward_target(&instr, 0)?;
                    // runs later on an empty stack
                    self.balanced(instr.next(), 0, 0, end, "when block")?;
                    pos = end;
                }
                Opcode::Jump => {
                    pos = self.forward_target(&instr, 0)?;
                }
                other => {
                    return Err(StackCheckError::new(format!(
                        "no stack effect for {} at {}",
                        other.mnemonic(),
                        pos
                    )));
                }
            }
        }
    }

    /// Checks that the block at `start` ends exactly at `end` having grown
    /// the stack by `net`.
    fn balanced(
        &self,
        start: usize,
        height: i32,
        net: i32,
        end: usize,
        what: &str,
    ) -> Result<(), StackCheckError> {
        let (after, out) = self.block(start, height, end, None)?;
        expect_at(after, end, what)?;
        if out != height + net {
            return Err(StackCheckError::new(format!(
                "{} at {} leaves {} value(s), expected {}",
                what,
                start,
                out - height,
                net
            )));
        }
        Ok(())
    }

    fn forward_target(&self, instr: &Instr<'_>, index: usize) -> Result<usize, StackCheckError> {
        let target = offset_target(instr.pos, instr.operands[index]);
        if target <= instr.pos || target > self.code().len() {
            return Err(StackCheckError::new(format!(
                "{} at {} jumps to {}, outside the code after it",
                instr.op.mnemonic(),
                instr.pos,
                target
            )));
        }
        Ok(target)
    }

    fn check_literals(&self, instr: &Instr<'_>) -> Result<(), BytecodeError> {
        for &i in literal_operands(instr) {
            let index = instr.operands[i];
            if self.script.literal(index).is_none() {
                return Err(BytecodeError::BadLiteral {
                    pos: instr.pos,
                    index,
                });
            }
        }
        Ok(())
    }

    /// A procedure body runs from its entry to the word its skip jump
    /// lands on, starting and ending on an empty stack.
    fn procedure(&self, proc: &ProcedureEntry) -> Result<(), StackCheckError> {
        let entry = proc.entry as usize;
        let jump_pos = entry
            .checked_sub(2)
            .ok_or_else(|| StackCheckError::new(format!("handler '{}' has no skip jump", proc.name)))?;
        let jump = decode(self.code(), jump_pos)?;
        if jump.op != Opcode::Jump || jump.next() != entry {
            return Err(StackCheckError::new(format!(
                "handler '{}' entry {} does not follow a JUMP",
                proc.name, entry
            )));
        }
        let end = self.forward_target(&jump, 0)?;
        let (_, height) = self
            .block(entry, 0, end, Some(end))
            .map_err(|e| StackCheckError::new(format!("in handler '{}': {}", proc.name, e.message)))?;
        if height != 0 {
            return Err(StackCheckError::new(format!(
                "handler '{}' leaves {} value(s) on the stack",
                proc.name, height
            )));
        }
        Ok(())
    }
}

fn pop(height: i32, pops: i32, instr: &Instr<'_>) -> Result<i32, StackCheckError> {
    let h = height - pops;
    if h < 0 {
        return Err(StackCheckError::new(format!(
            "stack underflow at {}, {} needs {} value(s)",
            instr.pos,
            instr.op.mnemonic(),
            pops
        )));
    }
    Ok(h)
}

fn expect_at(found: usize, expected: usize, what: &str) -> Result<(), StackCheckError> {
    if found != expected {
        return Err(StackCheckError::new(format!(
            "{} ends at {}, expected {}",
            what, found, expected
        )));
    }
    Ok(())
}

fn invalid(instr: &Instr<'_>, word: Word) -> BytecodeError {
    BytecodeError::InvalidOperand {
        pos: instr.pos,
        op: instr.op.mnemonic(),
        word,
    }
}

/// Verifies the structure and stack discipline of a compiled script: every
/// block is closed where its offsets say, control blocks are balanced,
/// nothing underflows, and every handler body is stack-neutral.
pub fn check_script(script: &ScriptBytecode) -> Result<(), StackCheckError> {
    let checker = Checker { script };
    checker.block(0, 0, script.code.len(), None)?;

    let methods = script.factories.values().flat_map(|f| f.methods.values());
    for proc in script.handlers.values().chain(methods) {
        checker.procedure(proc)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::Compiler;

    fn compiled(src: &str) -> ScriptBytecode {
        Compiler::new().compile(src).unwrap().into_script().unwrap()
    }

    fn raw(code: Vec<Word>) -> ScriptBytecode {
        ScriptBytecode {
            code,
            literals: vec!["x".to_string()],
            ..Default::default()
        }
    }

    fn w(op: Opcode) -> Word {
        op.into()
    }

    #[test]
    fn test_compiled_scripts_pass() {
        let src = "on f a, b\n  if a > b then\n    return a\n  else\n    return b\n  end if\nend\n\
                   repeat with i = 1 to 3\n  put f(i, 2)\nend repeat\n\
                   tell x to put 1\nwhen mouseUp then put the mouseH";
        assert!(check_script(&compiled(src)).is_ok());
    }

    #[test]
    fn test_underflow() {
        let script = raw(vec![w(Opcode::Add), w(Opcode::Stop)]);
        let err = check_script(&script).unwrap_err();
        assert!(err.message.contains("underflow"));
    }

    #[test]
    fn test_unbalanced_then_block() {
        // 1 IF_CODE [then: PUSH 2 STOP] [else: STOP]
        let script = raw(vec![
            w(Opcode::PushInt),
            1,
            w(Opcode::IfCode),
            4,
            7,
            8,
            w(Opcode::PushInt),
            2,
            w(Opcode::Stop),
            w(Opcode::Stop),
            w(Opcode::Stop),
        ]);
        let err = check_script(&script).unwrap_err();
        assert!(err.message.contains("then block"), "{}", err);
    }

    #[test]
    fn test_backward_target_is_rejected() {
        let script = raw(vec![w(Opcode::Jump), 0, w(Opcode::Stop)]);
        let err = check_script(&script).unwrap_err();
        assert!(err.message.contains("JUMP at 0"));
    }

    #[test]
    fn test_bad_literal_index() {
        let script = raw(vec![w(Opcode::PushString), 9, w(Opcode::Pop), w(Opcode::Stop)]);
        let err = check_script(&script).unwrap_err();
        assert!(err.message.contains("literal index 9"));
    }

    #[test]
    fn test_call_leaves_one_value() {
        // CALL "x" with two args, then POP
        let script = raw(vec![
            w(Opcode::PushInt),
            1,
            w(Opcode::PushInt),
            2,
            w(Opcode::Call),
            0,
            2,
            w(Opcode::Pop),
            w(Opcode::Stop),
        ]);
        assert!(check_script(&script).is_ok());
    }

    #[test]
    fn test_handler_must_be_neutral() {
        let mut script = compiled("on f\n  return 1\nend");
        // replace RETURN_VALUE with PUSH_VOID
        let entry = script.handler("f").unwrap().entry as usize;
        script.code[entry + 2] = w(Opcode::PushVoid);
        let err = check_script(&script).unwrap_err();
        assert!(err.message.contains("handler 'f'"));
    }
}
