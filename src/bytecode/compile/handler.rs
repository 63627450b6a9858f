use crate::bytecode::compile::parser::{BlockEnd, Emitter, PResult};
use crate::bytecode::compile_error::{CompileError, SyntaxError};
use crate::bytecode::op::Opcode;
use crate::bytecode::patch::JumpKind;
use crate::frontend::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DefKind {
    /// `on name ... end`
    Handler,
    /// `macro name ...`, closed by the next definition or `end`.
    Macro,
    /// `method name ...` inside a factory.
    Method,
}

impl Emitter {
    pub(super) fn parse_definition(&mut self) -> Result<(), CompileError> {
        let kind = match self.peek() {
            Token::Factory => return self.parse_factory(),
            Token::Macro => DefKind::Macro,
            Token::Method => DefKind::Method,
            _ => DefKind::Handler,
        };
        self.compile_definition(kind)
    }

    fn parse_factory(&mut self) -> Result<(), CompileError> {
        self.advance();
        let header = self
            .expect_name("a factory name")
            .and_then(|name| self.expect_line_end().map(|()| name));
        match header {
            Ok(name) => {
                tracing::debug!(factory = %name, "factory");
                self.ctx.begin_factory(&name);
            }
            Err(failure) => self.recover(failure)?,
        }
        Ok(())
    }

    /// `JUMP skip <body> PROC_RETURN`; `skip` lands after `PROC_RETURN` so
    /// the main block steps over the body.
    fn compile_definition(&mut self, mut kind: DefKind) -> Result<(), CompileError> {
        let span = self.span();
        self.advance();

        if kind == DefKind::Method && self.ctx.current_factory.is_none() {
            let err = SyntaxError::new("'method' outside a factory", span);
            self.ctx.report_syntax(err);
            kind = DefKind::Handler;
        }
        if kind != DefKind::Method {
            self.ctx.current_factory = None;
        }

        let name = match self.expect_name("a handler name") {
            Ok(name) => name,
            Err(failure) => {
                self.recover(failure)?;
                String::from("?")
            }
        };

        self.ctx.begin_definition(kind == DefKind::Method);
        if let Err(failure) = self.parse_params().and_then(|()| self.expect_line_end()) {
            self.recover(failure)?;
        }

        let anchor = self.ctx.buffer.emit_opcode(Opcode::Jump);
        let skip = self.ctx.buffer.reserve_jump(anchor, JumpKind::Skip);
        let entry = self.ctx.buffer.current_position();

        let ended = self.parse_block(false)?;
        match (kind, ended) {
            (DefKind::Handler, ended) => {
                self.close_block(ended, &format!("handler '{}'", name), &name)?;
                self.line_end_or_recover()?;
            }
            (_, BlockEnd::End) => {
                self.close_block(BlockEnd::End, "", &name)?;
                self.line_end_or_recover()?;
            }
            // macros and methods also end at the next definition
            (_, _) => {}
        }

        self.ctx.buffer.emit_opcode(Opcode::ProcReturn);
        self.ctx.buffer.resolve_here(skip)?;

        let receiver = usize::from(kind == DefKind::Method);
        let arity = self.ctx.arguments.len() - receiver;
        self.ctx.define(&name, entry, arity);
        self.ctx.end_definition();
        Ok(())
    }

    /// `a, b, c` or `(a, b, c)`.
    fn parse_params(&mut self) -> PResult<()> {
        if self.at_line_end() {
            return Ok(());
        }
        let parens = self.eat(&Token::LParen);
        if !(parens && self.check(&Token::RParen)) {
            loop {
                let span = self.span();
                let param = self.expect_name("a parameter name")?;
                if !self.ctx.add_argument(&param) {
                    return Err(SyntaxError::new(
                        format!("duplicate parameter '{}'", param),
                        span,
                    )
                    .into());
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        if parens {
            self.expect(&Token::RParen, "')'")?;
        }
        Ok(())
    }

    /// `global`, `property` and `instance` name lists.
    pub(super) fn parse_declaration(&mut self) -> PResult<()> {
        let span = self.span();
        let keyword = self.advance();

        let mut names = vec![self.expect_name("a variable name")?];
        while self.eat(&Token::Comma) {
            names.push(self.expect_name("a variable name")?);
        }

        for name in &names {
            match keyword {
                Token::Global => self.ctx.declare_global(name),
                Token::Property => {
                    if self.ctx.in_definition {
                        return Err(SyntaxError::new(
                            "'property' declarations belong at script level",
                            span,
                        )
                        .into());
                    }
                    self.ctx.declare_property(name);
                }
                _ => {
                    if !self.ctx.declare_ivar(name) {
                        return Err(SyntaxError::new("'instance' outside a factory", span).into());
                    }
                }
            }
        }
        Ok(())
    }
}
