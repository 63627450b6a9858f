use crate::bytecode::compile::context::VarRef;
use crate::bytecode::compile::parser::{Emitter, PResult};
use crate::bytecode::compile_error::{CompileError, SyntaxError};
use crate::bytecode::op::{Opcode, Word};
use crate::frontend::lexer::Span;
use crate::frontend::token::Token;
use crate::lang::builtins;
use crate::lang::entity::{TheEntity, TheField};

/// Named constants and the literal they push.
enum Constant {
    Int(i32),
    Float(f64),
    Text(&'static str),
    Void,
}

fn constant(name: &str) -> Option<Constant> {
    Some(match name {
        "true" => Constant::Int(1),
        "false" => Constant::Int(0),
        "empty" => Constant::Text(""),
        "void" => Constant::Void,
        "quote" => Constant::Text("\""),
        "space" => Constant::Text(" "),
        "tab" => Constant::Text("\t"),
        "pi" => Constant::Float(std::f64::consts::PI),
        _ => return None,
    })
}

/// `mNew`, `mGet`: factory method names passed as the first call argument.
fn is_method_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some('m' | 'M')) && chars.next().is_some_and(|c| c.is_ascii_uppercase())
}

impl Emitter {
    /// Emits code leaving exactly one value on the stack.
    pub(super) fn parse_expr(&mut self) -> PResult<()> {
        self.parse_logical()
    }

    fn parse_logical(&mut self) -> PResult<()> {
        self.parse_not()?;
        loop {
            let op = match self.peek() {
                Token::And => Opcode::And,
                Token::Or => Opcode::Or,
                _ => return Ok(()),
            };
            self.advance();
            self.parse_not()?;
            self.ctx.buffer.emit_opcode(op);
        }
    }

    fn parse_not(&mut self) -> PResult<()> {
        if self.eat(&Token::Not) {
            self.parse_not()?;
            self.ctx.buffer.emit_opcode(Opcode::Not);
            return Ok(());
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> PResult<()> {
        self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Token::Eq => Opcode::Eq,
                Token::NotEq => Opcode::NotEq,
                Token::Lt => Opcode::Lt,
                Token::LtEq => Opcode::LtEq,
                Token::Gt => Opcode::Gt,
                Token::GtEq => Opcode::GtEq,
                Token::Contains => Opcode::Contains,
                Token::Starts => Opcode::Starts,
                _ => return Ok(()),
            };
            self.advance();
            self.parse_concat()?;
            self.ctx.buffer.emit_opcode(op);
        }
    }

    fn parse_concat(&mut self) -> PResult<()> {
        self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Ampersand => Opcode::Concat,
                Token::DoubleAmpersand => Opcode::ConcatSpace,
                _ => return Ok(()),
            };
            self.advance();
            self.parse_additive()?;
            self.ctx.buffer.emit_opcode(op);
        }
    }

    fn parse_additive(&mut self) -> PResult<()> {
        self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => Opcode::Add,
                Token::Minus => Opcode::Sub,
                _ => return Ok(()),
            };
            self.advance();
            self.parse_multiplicative()?;
            self.ctx.buffer.emit_opcode(op);
        }
    }

    fn parse_multiplicative(&mut self) -> PResult<()> {
        self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => Opcode::Mul,
                Token::Slash => Opcode::Div,
                Token::Mod => Opcode::Mod,
                _ => return Ok(()),
            };
            self.advance();
            self.parse_unary()?;
            self.ctx.buffer.emit_opcode(op);
        }
    }

    pub(super) fn parse_unary(&mut self) -> PResult<()> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                // fold negative literals
                match self.peek().clone() {
                    Token::Integer(n) => {
                        self.advance();
                        self.ctx.buffer.emit_push_int(n.wrapping_neg());
                    }
                    Token::Float(n) => {
                        self.advance();
                        self.ctx.buffer.emit_push_float(-n);
                    }
                    _ => {
                        self.parse_unary()?;
                        self.ctx.buffer.emit_opcode(Opcode::Negate);
                    }
                }
                Ok(())
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> PResult<()> {
        let span = self.span();
        match self.peek().clone() {
            Token::Integer(n) => {
                self.advance();
                self.ctx.buffer.emit_push_int(n);
            }
            Token::Float(n) => {
                self.advance();
                self.ctx.buffer.emit_push_float(n);
            }
            Token::String(text) => {
                self.advance();
                self.ctx.buffer.emit_with_literal(Opcode::PushString, &text);
            }
            Token::Symbol(name) => {
                self.advance();
                self.ctx
                    .buffer
                    .emit_with_literal(Opcode::PushSymbol, &name.to_ascii_lowercase());
            }
            Token::LParen => {
                self.advance();
                self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
            }
            // the RETURN constant
            Token::Return => {
                self.advance();
                self.ctx.buffer.emit_with_literal(Opcode::PushString, "\r");
            }
            Token::The => self.parse_the_expr()?,
            Token::Me => self.parse_me()?,
            Token::Char | Token::Word | Token::Item | Token::Line => self.parse_chunk()?,
            Token::Sprite => self.parse_sprite_test()?,
            Token::Ident(name) => {
                self.advance();
                self.parse_identifier(&name.to_ascii_lowercase(), span)?;
            }
            other => {
                return Err(SyntaxError::unexpected(&other, "an expression", span).into());
            }
        }
        Ok(())
    }

    // =========================================================================
    // names, variables and calls
    // =========================================================================

    fn parse_identifier(&mut self, name: &str, span: Span) -> PResult<()> {
        if self.check(&Token::LParen) {
            if self.ctx.is_bound(name) {
                let var = self.ctx.resolve(name);
                self.emit_push_var(&var);
                let argc = self.parse_paren_args()?;
                self.emit_obj_call(argc);
            } else {
                let argc = self.parse_paren_args()?;
                self.emit_call(name, argc, span)?;
            }
            return Ok(());
        }

        if let Some(value) = constant(name) {
            let buffer = &mut self.ctx.buffer;
            match value {
                Constant::Int(n) => buffer.emit_push_int(n),
                Constant::Float(n) => buffer.emit_push_float(n),
                Constant::Text(text) => buffer.emit_with_literal(Opcode::PushString, text),
                Constant::Void => buffer.emit_opcode(Opcode::PushVoid),
            };
            return Ok(());
        }

        let var = self.ctx.resolve(name);
        self.emit_push_var(&var);
        Ok(())
    }

    fn parse_me(&mut self) -> PResult<()> {
        let span = self.expect(&Token::Me, "'me'")?;
        let in_method = self.ctx.in_definition
            && self.ctx.current_factory.is_some()
            && self.ctx.arguments.first().is_some_and(|a| a == "me");
        if !in_method {
            return Err(SyntaxError::new("'me' is only available inside factory methods", span).into());
        }
        self.emit_push_var(&VarRef::Param(0));
        if self.check(&Token::LParen) {
            let argc = self.parse_paren_args()?;
            self.emit_obj_call(argc);
        }
        Ok(())
    }

    pub(super) fn emit_push_var(&mut self, var: &VarRef) {
        let buffer = &mut self.ctx.buffer;
        match var {
            VarRef::Param(slot) => {
                buffer.emit_opcode(Opcode::PushParam);
                buffer.emit_operand(*slot);
            }
            VarRef::Property(name) => {
                buffer.emit_with_literal(Opcode::PushProp, name);
            }
            VarRef::Global(name) => {
                buffer.emit_with_literal(Opcode::PushGlobal, name);
            }
            VarRef::Local(name) => {
                buffer.emit_with_literal(Opcode::PushVar, name);
            }
        }
    }

    /// `( [arg {, arg}] )`; returns the argument count. A leading
    /// `mName` argument is passed as the symbol `#mname`.
    fn parse_paren_args(&mut self) -> PResult<u32> {
        self.expect(&Token::LParen, "'('")?;
        if self.eat(&Token::RParen) {
            return Ok(0);
        }

        let mut argc = 0;
        loop {
            let method = match (self.peek(), self.peek_at(1)) {
                (Token::Ident(name), Token::Comma | Token::RParen)
                    if argc == 0 && is_method_name(name) =>
                {
                    Some(name.to_ascii_lowercase())
                }
                _ => None,
            };
            match method {
                Some(name) => {
                    self.advance();
                    self.ctx.buffer.emit_with_literal(Opcode::PushSymbol, &name);
                }
                None => self.parse_expr()?,
            }
            argc += 1;
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "')'")?;
        Ok(argc)
    }

    /// `CALL_BUILTIN` for built-in functions (arity checked here), `CALL`
    /// for everything else; handlers are looked up when the call runs.
    pub(super) fn emit_call(&mut self, name: &str, argc: u32, span: Span) -> PResult<()> {
        let op = match builtins::lookup(name) {
            Some(builtin) => {
                if !builtin.accepts(argc as usize) {
                    return Err(SyntaxError::new(
                        format!(
                            "'{}' expects {} argument(s), got {}",
                            name,
                            builtin.arity_text(),
                            argc
                        ),
                        span,
                    )
                    .into());
                }
                Opcode::CallBuiltin
            }
            None => Opcode::Call,
        };
        let buffer = &mut self.ctx.buffer;
        buffer.emit_with_literal(op, name);
        buffer.emit_operand(argc);
        Ok(())
    }

    fn emit_obj_call(&mut self, argc: u32) {
        self.ctx.buffer.emit_opcode(Opcode::ObjCall);
        self.ctx.buffer.emit_operand(argc);
    }

    // =========================================================================
    // the-entities
    // =========================================================================

    /// Name after `the`; keywords such as `frame` count as names.
    pub(super) fn parse_the_name(&mut self) -> PResult<(String, Span)> {
        let span = self.span();
        match self.peek().name_text() {
            Some(name) => {
                let name = name.to_string();
                self.advance();
                Ok((name, span))
            }
            None => Err(SyntaxError::unexpected(self.peek(), "a property name", span).into()),
        }
    }

    pub(super) fn the_field(name: &str, span: Span) -> PResult<TheField> {
        TheField::from_name(name)
            .ok_or_else(|| SyntaxError::new(format!("unknown property 'the {}'", name), span).into())
    }

    /// `<item> of menu <menu>`, both pushed.
    pub(super) fn parse_menu_item_operands(&mut self) -> PResult<()> {
        self.parse_unary()?;
        self.expect(&Token::Of, "'of'")?;
        match self.peek() {
            Token::Ident(name) if name.eq_ignore_ascii_case("menu") => {
                self.advance();
            }
            other => {
                return Err(SyntaxError::unexpected(other, "'menu'", self.span()).into());
            }
        }
        self.parse_unary()
    }

    fn parse_the_expr(&mut self) -> PResult<()> {
        self.expect(&Token::The, "'the'")?;
        let (name, span) = self.parse_the_name()?;

        if !self.eat(&Token::Of) {
            let field = Self::the_field(&name, span)?;
            self.emit_entity_op(Opcode::TheEntityPush, TheEntity::Movie, field);
            return Ok(());
        }

        match self.peek().name_text().and_then(TheEntity::from_name) {
            Some(TheEntity::MenuItem) => {
                self.advance();
                self.parse_menu_item_operands()?;
                let field = Self::the_field(&name, span)?;
                self.emit_entity_op(Opcode::TheMenuItemPush, TheEntity::MenuItem, field);
            }
            Some(entity) => {
                self.advance();
                self.parse_unary()?;
                let field = Self::the_field(&name, span)?;
                self.emit_entity_op(Opcode::TheEntityWithIdPush, entity, field);
            }
            None => {
                self.parse_unary()?;
                self.ctx
                    .buffer
                    .emit_with_literal(Opcode::ObjectFieldPush, &name.to_ascii_lowercase());
            }
        }
        Ok(())
    }

    fn emit_entity_op(&mut self, op: Opcode, entity: TheEntity, field: TheField) {
        let buffer = &mut self.ctx.buffer;
        buffer.emit_opcode(op);
        buffer.emit_operand(entity as Word);
        buffer.emit_operand(field as Word);
    }

    // =========================================================================
    // keyword operators
    // =========================================================================

    /// `char|word|item|line <i> [to <j>] of <source>`
    fn parse_chunk(&mut self) -> PResult<()> {
        let kind = self.advance();
        self.parse_unary()?;
        let ranged = self.eat(&Token::To);
        if ranged {
            self.parse_unary()?;
        }
        self.expect(&Token::Of, "'of'")?;
        self.parse_unary()?;

        let op = chunk_opcode(&kind, ranged)?;
        self.ctx.buffer.emit_opcode(op);
        Ok(())
    }

    /// `sprite <a> intersects|within [sprite] <b>`
    fn parse_sprite_test(&mut self) -> PResult<()> {
        self.expect(&Token::Sprite, "'sprite'")?;
        self.parse_unary()?;
        let op = match self.peek() {
            Token::Intersects => Opcode::Intersects,
            Token::Within => Opcode::Within,
            other => {
                return Err(SyntaxError::unexpected(other, "'intersects' or 'within'", self.span()).into());
            }
        };
        self.advance();
        self.eat(&Token::Sprite);
        self.parse_unary()?;
        self.ctx.buffer.emit_opcode(op);
        Ok(())
    }
}

/// Keyword built-ins map to exactly one opcode each.
fn chunk_opcode(kind: &Token, ranged: bool) -> Result<Opcode, CompileError> {
    Ok(match (kind, ranged) {
        (Token::Char, false) => Opcode::CharOf,
        (Token::Word, false) => Opcode::WordOf,
        (Token::Item, false) => Opcode::ItemOf,
        (Token::Line, false) => Opcode::LineOf,
        (Token::Char, true) => Opcode::CharToOf,
        (Token::Word, true) => Opcode::WordToOf,
        (Token::Item, true) => Opcode::ItemToOf,
        (Token::Line, true) => Opcode::LineToOf,
        (other, _) => {
            return Err(CompileError::internal(format!(
                "no opcode for chunk keyword {}",
                other.describe()
            )));
        }
    })
}
