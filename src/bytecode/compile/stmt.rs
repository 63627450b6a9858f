use crate::bytecode::compile::context::VarRef;
use crate::bytecode::compile::parser::{BlockEnd, Emitter, PResult};
use crate::bytecode::compile_error::{CompileError, SyntaxError};
use crate::bytecode::op::{Opcode, Word, encode_int};
use crate::bytecode::patch::JumpKind;
use crate::frontend::token::Token;
use crate::lang::entity::{TheEntity, TheField};

/// Destination of `set`, `put ... into` and `x = ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    /// Parameter, local or global.
    Variable(VarRef),
    /// Script property or instance variable.
    Property(String),
    /// `the <field>`
    Entity(TheField),
    /// `the <field> of <entity> <id>`; the id is already on the stack.
    EntityWithId(TheEntity, TheField),
    /// `the <field> of menuItem <i> of menu <m>`; item and menu are on the stack.
    MenuItemEntity(TheField),
    /// `the <name> of <object>`; the object is on the stack.
    ObjectField(String),
}

impl AssignTarget {
    fn from_var(var: VarRef) -> Self {
        match var {
            VarRef::Property(name) => AssignTarget::Property(name),
            other => AssignTarget::Variable(other),
        }
    }

    /// Number of values the target pushed while it was parsed.
    fn operand_values(&self) -> usize {
        match self {
            AssignTarget::EntityWithId(..) | AssignTarget::ObjectField(_) => 1,
            AssignTarget::MenuItemEntity(_) => 2,
            _ => 0,
        }
    }
}

/// Whether a multi-line `if` already consumed the `end` that closes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IfClose {
    ClosedByEnd,
    Open,
}

impl Emitter {
    pub(super) fn parse_statement(&mut self) -> PResult<()> {
        match self.peek() {
            Token::Put => self.parse_put(),
            Token::Set => self.parse_set(),
            Token::Global | Token::Property | Token::Instance => self.parse_declaration(),
            Token::If => {
                self.parse_if()?;
                Ok(())
            }
            Token::Repeat => Ok(self.parse_repeat()?),
            Token::Exit => self.parse_exit(),
            Token::Next => self.parse_next(),
            Token::Return => self.parse_return(),
            Token::Tell => Ok(self.parse_tell()?),
            Token::When => self.parse_when(),
            Token::Go => self.parse_go(),
            Token::Play => self.parse_play(),
            Token::Ident(_) => self.parse_identifier_statement(),
            _ => {
                self.parse_expr()?;
                self.ctx.buffer.emit_opcode(Opcode::Pop);
                Ok(())
            }
        }
    }

    // =========================================================================
    // assignment
    // =========================================================================

    fn parse_identifier_statement(&mut self) -> PResult<()> {
        match self.peek_at(1) {
            Token::Eq => {
                let name = self.expect_name("a variable name")?;
                self.advance();
                self.parse_expr()?;
                let target = AssignTarget::from_var(self.ctx.resolve(&name));
                self.emit_assign(&target);
                Ok(())
            }
            Token::LParen => {
                self.parse_expr()?;
                self.ctx.buffer.emit_opcode(Opcode::Pop);
                Ok(())
            }
            _ => {
                // command form: `name arg, arg`
                let span = self.span();
                let name = self.expect_name("a command")?;
                let argc = self.parse_command_args()?;
                self.emit_call(&name, argc, span)?;
                self.ctx.buffer.emit_opcode(Opcode::Pop);
                Ok(())
            }
        }
    }

    fn parse_command_args(&mut self) -> PResult<u32> {
        if self.at_statement_end() {
            return Ok(0);
        }
        let mut argc = 1;
        self.parse_expr()?;
        while self.eat(&Token::Comma) {
            self.parse_expr()?;
            argc += 1;
        }
        Ok(argc)
    }

    /// Parses an assignment destination, emitting any id or object
    /// expressions it contains.
    pub(super) fn parse_assign_target(&mut self) -> PResult<AssignTarget> {
        match self.peek() {
            Token::The => self.parse_the_target(),
            Token::Ident(_) => {
                let name = self.expect_name("a variable name")?;
                Ok(AssignTarget::from_var(self.ctx.resolve(&name)))
            }
            other => Err(SyntaxError::unexpected(other, "a variable or 'the' property", self.span()).into()),
        }
    }

    fn parse_the_target(&mut self) -> PResult<AssignTarget> {
        self.expect(&Token::The, "'the'")?;
        let (name, span) = self.parse_the_name()?;

        if !self.eat(&Token::Of) {
            let field = Self::the_field(&name, span)?;
            return Ok(AssignTarget::Entity(field));
        }

        match self.peek().name_text().and_then(TheEntity::from_name) {
            Some(TheEntity::MenuItem) => {
                self.advance();
                self.parse_menu_item_operands()?;
                Ok(AssignTarget::MenuItemEntity(Self::the_field(&name, span)?))
            }
            Some(entity) => {
                self.advance();
                self.parse_unary()?;
                Ok(AssignTarget::EntityWithId(entity, Self::the_field(&name, span)?))
            }
            None => {
                self.parse_unary()?;
                Ok(AssignTarget::ObjectField(name.to_ascii_lowercase()))
            }
        }
    }

    /// Pops the value on top of the stack into `target`.
    pub(super) fn emit_assign(&mut self, target: &AssignTarget) {
        let buffer = &mut self.ctx.buffer;
        match target {
            AssignTarget::Variable(VarRef::Param(slot)) => {
                buffer.emit_opcode(Opcode::AssignParam);
                buffer.emit_operand(*slot);
            }
            AssignTarget::Variable(VarRef::Local(name)) => {
                buffer.emit_with_literal(Opcode::AssignVar, name);
                self.ctx.mark_assigned(name);
            }
            AssignTarget::Variable(VarRef::Global(name)) => {
                buffer.emit_with_literal(Opcode::AssignGlobal, name);
                self.ctx.mark_assigned(name);
            }
            AssignTarget::Variable(VarRef::Property(name)) | AssignTarget::Property(name) => {
                buffer.emit_with_literal(Opcode::AssignProp, name);
            }
            AssignTarget::Entity(field) => {
                buffer.emit_opcode(Opcode::TheEntityAssign);
                buffer.emit_operand(TheEntity::Movie as Word);
                buffer.emit_operand(*field as Word);
            }
            AssignTarget::EntityWithId(entity, field) => {
                buffer.emit_opcode(Opcode::TheEntityWithIdAssign);
                buffer.emit_operand(*entity as Word);
                buffer.emit_operand(*field as Word);
            }
            AssignTarget::MenuItemEntity(field) => {
                buffer.emit_opcode(Opcode::TheMenuItemAssign);
                buffer.emit_operand(TheEntity::MenuItem as Word);
                buffer.emit_operand(*field as Word);
            }
            AssignTarget::ObjectField(name) => {
                buffer.emit_with_literal(Opcode::ObjectFieldAssign, name);
            }
        }
    }

    fn parse_set(&mut self) -> PResult<()> {
        self.expect(&Token::Set, "'set'")?;
        let target = self.parse_assign_target()?;
        if !self.eat(&Token::Eq) && !self.eat(&Token::To) {
            return Err(SyntaxError::unexpected(self.peek(), "'=' or 'to'", self.span()).into());
        }
        self.parse_expr()?;
        self.emit_assign(&target);
        Ok(())
    }

    fn parse_put(&mut self) -> PResult<()> {
        self.expect(&Token::Put, "'put'")?;
        self.parse_expr()?;

        match self.peek() {
            Token::Into => {
                self.advance();
                let span = self.span();
                let target = self.parse_assign_target()?;
                match target.operand_values() {
                    0 => {}
                    1 => {
                        // value id -- id value
                        self.ctx.buffer.emit_opcode(Opcode::Swap);
                    }
                    _ => {
                        return Err(SyntaxError::new(
                            "menu item properties can only be changed with 'set'",
                            span,
                        )
                        .into());
                    }
                }
                self.emit_assign(&target);
            }
            Token::After | Token::Before => {
                let after = self.advance() == Token::After;
                let span = self.span();
                let target = self.parse_assign_target()?;
                let var = match &target {
                    AssignTarget::Variable(var) => var.clone(),
                    AssignTarget::Property(name) => VarRef::Property(name.clone()),
                    _ => {
                        return Err(SyntaxError::new(
                            "'put ... after/before' needs a variable",
                            span,
                        )
                        .into());
                    }
                };
                self.emit_push_var(&var);
                if after {
                    self.ctx.buffer.emit_opcode(Opcode::Swap);
                }
                self.ctx.buffer.emit_opcode(Opcode::Concat);
                self.emit_assign(&target);
            }
            _ => {
                self.ctx.buffer.emit_opcode(Opcode::Put);
            }
        }
        Ok(())
    }

    // =========================================================================
    // if
    // =========================================================================

    /// `cond IF_CODE then else end <then-block> STOP <else-block> STOP`.
    ///
    /// An `if` without `else` still gets an else block (a lone `STOP`).
    /// `else if` nests the next `if` inside the else block, so the nested
    /// end lands on the outer else block's `STOP`.
    pub(super) fn parse_if(&mut self) -> Result<IfClose, CompileError> {
        self.advance();
        self.expr_or_recover(&[Token::Then])?;
        if !self.eat(&Token::Then) {
            let err = SyntaxError::unexpected(self.peek(), "'then'", self.span());
            self.ctx.report_syntax(err);
            self.skip_line();
        }

        let buffer = &mut self.ctx.buffer;
        let anchor = buffer.emit_opcode(Opcode::IfCode);
        let then_jump = buffer.reserve_jump(anchor, JumpKind::Then);
        let else_jump = buffer.reserve_jump(anchor, JumpKind::Else);
        let end_jump = buffer.reserve_jump(anchor, JumpKind::End);
        buffer.resolve_here(then_jump)?;

        let close = if self.at_line_end() {
            let ended = self.parse_block(true)?;
            self.ctx.buffer.emit_opcode(Opcode::Stop);
            self.ctx.buffer.resolve_here(else_jump)?;
            if ended == BlockEnd::Else {
                self.advance();
                self.parse_else_branch()?;
            } else {
                self.close_block(ended, "if", "if")?;
            }
            IfClose::ClosedByEnd
        } else {
            self.statement_or_recover()?;
            self.ctx.buffer.emit_opcode(Opcode::Stop);
            self.ctx.buffer.resolve_here(else_jump)?;
            if self.eat(&Token::Else) {
                self.statement_or_recover()?;
            }
            IfClose::Open
        };

        self.ctx.buffer.emit_opcode(Opcode::Stop);
        self.ctx.buffer.resolve_here(end_jump)?;
        Ok(close)
    }

    /// Else branch of a multi-line `if`, after the `else` keyword.
    fn parse_else_branch(&mut self) -> Result<(), CompileError> {
        if self.at_line_end() {
            let ended = self.parse_block(false)?;
            return self.close_block(ended, "if", "if");
        }

        if self.check(&Token::If) {
            if self.parse_if()? == IfClose::ClosedByEnd {
                return Ok(());
            }
        } else {
            self.statement_or_recover()?;
        }
        // `else <stmt>` on one line, then more lines up to `end if`
        self.line_end_or_recover()?;
        let ended = self.parse_block(false)?;
        self.close_block(ended, "if", "if")
    }

    // =========================================================================
    // repeat
    // =========================================================================

    fn parse_repeat(&mut self) -> Result<(), CompileError> {
        self.advance();
        match self.peek() {
            Token::While => {
                self.advance();
                self.compile_repeat_while(true)
            }
            Token::With => {
                self.advance();
                match self.parse_repeat_with_header() {
                    Ok((name, var)) => self.compile_repeat_with(&name, var),
                    Err(failure) => {
                        self.recover(failure)?;
                        self.compile_repeat_while(false)
                    }
                }
            }
            other => {
                let err = SyntaxError::unexpected(other, "'while' or 'with'", self.span());
                self.ctx.report_syntax(err);
                self.skip_line();
                self.compile_repeat_while(false)
            }
        }
    }

    /// `REPEAT_WHILE body end <cond> STOP <body> STOP`. Without a usable
    /// header the condition block is just `VOID`, which keeps the block
    /// structure intact for a script that is rejected anyway.
    fn compile_repeat_while(&mut self, with_condition: bool) -> Result<(), CompileError> {
        let buffer = &mut self.ctx.buffer;
        let anchor = buffer.emit_opcode(Opcode::RepeatWhile);
        let body_jump = buffer.reserve_jump(anchor, JumpKind::Body);
        let end_jump = buffer.reserve_jump(anchor, JumpKind::End);

        if with_condition {
            self.expr_or_recover(&[])?;
        } else {
            self.ctx.buffer.emit_opcode(Opcode::PushVoid);
        }
        self.ctx.buffer.emit_opcode(Opcode::Stop);
        self.ctx.buffer.resolve_here(body_jump)?;

        self.compile_loop_body()?;
        self.ctx.buffer.resolve_here(end_jump)?;
        Ok(())
    }

    fn parse_repeat_with_header(&mut self) -> PResult<(String, VarRef)> {
        let name = self.expect_name("a loop variable")?;
        self.expect(&Token::Eq, "'='")?;
        let var = self.ctx.resolve(&name);
        Ok((name, var))
    }

    /// `REPEAT_WITH init finish body inc end scope ref
    ///  <init> STOP <finish> STOP <body> STOP`
    fn compile_repeat_with(&mut self, name: &str, var: VarRef) -> Result<(), CompileError> {
        let buffer = &mut self.ctx.buffer;
        let anchor = buffer.emit_opcode(Opcode::RepeatWith);
        let init_jump = buffer.reserve_jump(anchor, JumpKind::Init);
        let finish_jump = buffer.reserve_jump(anchor, JumpKind::Finish);
        let body_jump = buffer.reserve_jump(anchor, JumpKind::Body);
        let increment = buffer.reserve_word();
        let end_jump = buffer.reserve_jump(anchor, JumpKind::End);
        buffer.emit_operand(var.scope() as Word);
        let reference = self.ctx.var_operand(&var);
        self.ctx.buffer.emit_operand(reference);
        if matches!(var, VarRef::Local(_) | VarRef::Global(_)) {
            self.ctx.mark_assigned(name);
        }

        self.ctx.buffer.resolve_here(init_jump)?;
        self.expr_or_recover(&[Token::To, Token::Down])?;
        self.ctx.buffer.emit_opcode(Opcode::Stop);

        let down = self.eat(&Token::Down);
        if !self.eat(&Token::To) {
            let err = SyntaxError::unexpected(self.peek(), "'to'", self.span());
            self.ctx.report_syntax(err);
            self.skip_line();
        }
        let step = if down { encode_int(-1) } else { encode_int(1) };
        self.ctx.buffer.fill(increment, step)?;

        self.ctx.buffer.resolve_here(finish_jump)?;
        self.expr_or_recover(&[])?;
        self.ctx.buffer.emit_opcode(Opcode::Stop);
        self.ctx.buffer.resolve_here(body_jump)?;

        self.compile_loop_body()?;
        self.ctx.buffer.resolve_here(end_jump)?;
        Ok(())
    }

    /// Rest of the header line, then the body up to `end repeat`, then `STOP`.
    fn compile_loop_body(&mut self) -> Result<(), CompileError> {
        self.line_end_or_recover()?;
        self.ctx.loop_depth += 1;
        let ended = self.parse_block(false);
        self.ctx.loop_depth -= 1;
        self.close_block(ended?, "repeat", "repeat")?;
        self.ctx.buffer.emit_opcode(Opcode::Stop);
        Ok(())
    }

    fn parse_exit(&mut self) -> PResult<()> {
        let span = self.expect(&Token::Exit, "'exit'")?;
        if self.eat(&Token::Repeat) {
            if self.ctx.loop_depth == 0 {
                return Err(SyntaxError::new("'exit repeat' outside a repeat loop", span).into());
            }
            self.ctx.buffer.emit_opcode(Opcode::ExitRepeat);
        } else {
            self.ctx.buffer.emit_opcode(Opcode::ProcReturn);
        }
        Ok(())
    }

    fn parse_next(&mut self) -> PResult<()> {
        let span = self.expect(&Token::Next, "'next'")?;
        self.expect(&Token::Repeat, "'repeat'")?;
        if self.ctx.loop_depth == 0 {
            return Err(SyntaxError::new("'next repeat' outside a repeat loop", span).into());
        }
        self.ctx.buffer.emit_opcode(Opcode::NextRepeat);
        Ok(())
    }

    fn parse_return(&mut self) -> PResult<()> {
        self.expect(&Token::Return, "'return'")?;
        if self.at_statement_end() {
            self.ctx.buffer.emit_opcode(Opcode::ProcReturn);
        } else {
            self.parse_expr()?;
            self.ctx.buffer.emit_opcode(Opcode::ReturnValue);
        }
        Ok(())
    }

    // =========================================================================
    // tell, when
    // =========================================================================

    /// `<target> TELL end <body> STOP`
    fn parse_tell(&mut self) -> Result<(), CompileError> {
        self.advance();
        self.expr_or_recover(&[Token::To])?;

        let anchor = self.ctx.buffer.emit_opcode(Opcode::Tell);
        let end_jump = self.ctx.buffer.reserve_jump(anchor, JumpKind::End);

        if self.eat(&Token::To) {
            self.statement_or_recover()?;
        } else {
            self.line_end_or_recover()?;
            let ended = self.parse_block(false)?;
            self.close_block(ended, "tell", "tell")?;
        }
        self.ctx.buffer.emit_opcode(Opcode::Stop);
        self.ctx.buffer.resolve_here(end_jump)?;
        Ok(())
    }

    /// `WHEN_CODE end event <stmt> STOP`; the statement runs when the host
    /// dispatches `event`.
    fn parse_when(&mut self) -> PResult<()> {
        self.expect(&Token::When, "'when'")?;
        let event = match self.peek().name_text() {
            Some(name) => name.to_ascii_lowercase(),
            None => {
                return Err(SyntaxError::unexpected(self.peek(), "an event name", self.span()).into());
            }
        };
        self.advance();
        self.expect(&Token::Then, "'then'")?;

        let anchor = self.ctx.buffer.emit_opcode(Opcode::WhenCode);
        let end_jump = self.ctx.buffer.reserve_jump(anchor, JumpKind::End);
        self.ctx.buffer.emit_string(&event);
        self.statement_or_recover()?;
        self.ctx.buffer.emit_opcode(Opcode::Stop);
        self.ctx.buffer.resolve_here(end_jump)?;
        Ok(())
    }

    // =========================================================================
    // navigation
    // =========================================================================

    fn parse_go(&mut self) -> PResult<()> {
        self.expect(&Token::Go, "'go'")?;
        let op = match self.peek() {
            Token::Loop => Opcode::GoLoop,
            Token::Next => Opcode::GoNext,
            Token::Previous => Opcode::GoPrevious,
            _ => {
                self.eat(&Token::To);
                self.parse_destination()?;
                self.ctx.buffer.emit_opcode(Opcode::GoTo);
                return Ok(());
            }
        };
        self.advance();
        self.ctx.buffer.emit_opcode(op);
        Ok(())
    }

    fn parse_play(&mut self) -> PResult<()> {
        self.expect(&Token::Play, "'play'")?;
        if self.eat(&Token::Done) {
            self.ctx.buffer.emit_opcode(Opcode::PlayDone);
            return Ok(());
        }
        self.parse_destination()?;
        self.ctx.buffer.emit_opcode(Opcode::Play);
        Ok(())
    }

    /// Pushes `frame movie`; a missing part is `VOID`.
    fn parse_destination(&mut self) -> PResult<()> {
        if self.eat(&Token::Movie) {
            self.ctx.buffer.emit_opcode(Opcode::PushVoid);
            self.parse_expr()?;
            return Ok(());
        }
        self.eat(&Token::Frame);
        self.parse_expr()?;
        if self.eat(&Token::Of) {
            self.expect(&Token::Movie, "'movie'")?;
            self.parse_expr()?;
        } else {
            self.ctx.buffer.emit_opcode(Opcode::PushVoid);
        }
        Ok(())
    }
}
