use crate::bytecode::compile::context::CompilerContext;
use crate::bytecode::compile_error::{CompileError, SyntaxError};
use crate::bytecode::op::Opcode;
use crate::frontend::lexer::{Span, Spanned};
use crate::frontend::token::Token;

/// Why a rule function gave up.
#[derive(Debug)]
pub enum ParseFailure {
    /// Reported, then skipped to a line boundary.
    Syntax(SyntaxError),
    /// Aborts compilation.
    Internal(CompileError),
}

impl From<SyntaxError> for ParseFailure {
    fn from(err: SyntaxError) -> Self {
        ParseFailure::Syntax(err)
    }
}

impl From<CompileError> for ParseFailure {
    fn from(err: CompileError) -> Self {
        ParseFailure::Internal(err)
    }
}

pub type PResult<T> = Result<T, ParseFailure>;

/// What stopped a statement block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEnd {
    /// An `end` clause, not yet consumed.
    End,
    /// An `else` at the start of a line, not yet consumed.
    Else,
    /// `on`, `macro`, `factory` or `method`.
    Definition,
    Eof,
}

/// Recursive-descent parser whose rule functions emit bytecode as they
/// recognise the input. There is no syntax tree.
pub struct Emitter {
    tokens: Vec<Spanned>,
    pos: usize,
    pub(super) ctx: CompilerContext,
}

impl Emitter {
    pub fn new(mut tokens: Vec<Spanned>, ctx: CompilerContext) -> Self {
        let ends_with_eof = tokens.last().is_some_and(|t| t.token == Token::Eof);
        if !ends_with_eof {
            let span = tokens.last().map_or(Span { line: 1, col: 1 }, |t| t.span);
            tokens.push(Spanned {
                token: Token::Eof,
                span,
            });
        }
        Emitter {
            tokens,
            pos: 0,
            ctx,
        }
    }

    pub fn into_context(self) -> CompilerContext {
        self.ctx
    }

    // =========================================================================
    // cursor
    // =========================================================================

    pub(super) fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    pub(super) fn peek_at(&self, ahead: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + ahead).min(last)].token
    }

    pub(super) fn span(&self) -> Span {
        let last = self.tokens.len() - 1;
        self.tokens[self.pos.min(last)].span
    }

    pub(super) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token != Token::Eof {
            self.pos += 1;
        }
        token
    }

    pub(super) fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    pub(super) fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(super) fn expect(&mut self, token: &Token, what: &str) -> PResult<Span> {
        let span = self.span();
        if self.eat(token) {
            Ok(span)
        } else {
            Err(SyntaxError::unexpected(self.peek(), what, span).into())
        }
    }

    /// Identifier, lower-cased.
    pub(super) fn expect_name(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.to_ascii_lowercase();
                self.advance();
                Ok(name)
            }
            other => Err(SyntaxError::unexpected(other, what, self.span()).into()),
        }
    }

    pub(super) fn at_line_end(&self) -> bool {
        matches!(self.peek(), Token::Newline | Token::Eof)
    }

    /// End of a statement: end of line, or an `else` closing a one-line
    /// `if` branch.
    pub(super) fn at_statement_end(&self) -> bool {
        self.at_line_end() || self.check(&Token::Else)
    }

    pub(super) fn expect_line_end(&mut self) -> PResult<()> {
        if self.at_line_end() {
            Ok(())
        } else {
            Err(SyntaxError::unexpected(self.peek(), "end of line", self.span()).into())
        }
    }

    pub(super) fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    /// Skips to the end of the line without consuming the newline.
    pub(super) fn skip_line(&mut self) {
        while !self.at_line_end() {
            self.advance();
        }
    }

    fn skip_until(&mut self, stop: &[Token]) {
        while !self.at_line_end() && !stop.contains(self.peek()) {
            self.advance();
        }
    }

    // =========================================================================
    // recovery
    // =========================================================================

    /// Reports a syntax error and skips the rest of the line; internal
    /// errors pass through.
    pub(super) fn recover(&mut self, failure: ParseFailure) -> Result<(), CompileError> {
        self.recover_until(failure, &[])
    }

    /// Like `recover`, but stops early at any of `stop`.
    pub(super) fn recover_until(
        &mut self,
        failure: ParseFailure,
        stop: &[Token],
    ) -> Result<(), CompileError> {
        match failure {
            ParseFailure::Syntax(err) => {
                self.ctx.report_syntax(err);
                self.skip_until(stop);
                Ok(())
            }
            ParseFailure::Internal(err) => Err(err),
        }
    }

    /// Expression that always leaves one value: on a syntax error the
    /// error is reported, input is skipped up to `stop` and `VOID` stands in.
    pub(super) fn expr_or_recover(&mut self, stop: &[Token]) -> Result<(), CompileError> {
        if let Err(failure) = self.parse_expr() {
            self.recover_until(failure, stop)?;
            self.ctx.buffer.emit_opcode(Opcode::PushVoid);
        }
        Ok(())
    }

    /// One statement on the current line, recovering up to the line end or
    /// a trailing `else`.
    pub(super) fn statement_or_recover(&mut self) -> Result<(), CompileError> {
        if self.at_statement_end() {
            let err = SyntaxError::unexpected(self.peek(), "a statement", self.span());
            self.ctx.report_syntax(err);
            return Ok(());
        }
        if let Err(failure) = self.parse_statement() {
            self.recover_until(failure, &[Token::Else])?;
        }
        Ok(())
    }

    pub(super) fn line_end_or_recover(&mut self) -> Result<(), CompileError> {
        if let Err(failure) = self.expect_line_end() {
            self.recover(failure)?;
        }
        Ok(())
    }

    // =========================================================================
    // script and blocks
    // =========================================================================

    /// Compiles the whole token stream: main-level statements interleaved
    /// with definitions, terminated by `STOP`.
    pub fn compile_script(&mut self) -> Result<(), CompileError> {
        loop {
            self.skip_newlines();
            match self.peek() {
                Token::Eof => break,
                Token::On | Token::Macro | Token::Method | Token::Factory => {
                    self.parse_definition()?;
                }
                _ => match self.parse_block(false)? {
                    BlockEnd::End => {
                        let err = SyntaxError::new("'end' without an open block", self.span());
                        self.ctx.report_syntax(err);
                        self.advance();
                        self.skip_line();
                    }
                    BlockEnd::Else | BlockEnd::Definition | BlockEnd::Eof => {}
                },
            }
        }
        self.ctx.buffer.emit_opcode(Opcode::Stop);
        Ok(())
    }

    /// Statements up to an `end`, `else` (when `accept_else`), a definition
    /// keyword or the end of input. Statement errors are reported and the
    /// block continues on the next line.
    pub(super) fn parse_block(&mut self, accept_else: bool) -> Result<BlockEnd, CompileError> {
        loop {
            self.skip_newlines();
            match self.peek() {
                Token::Eof => return Ok(BlockEnd::Eof),
                Token::On | Token::Macro | Token::Factory | Token::Method => {
                    return Ok(BlockEnd::Definition);
                }
                Token::End => return Ok(BlockEnd::End),
                Token::Else if accept_else => return Ok(BlockEnd::Else),
                Token::Else => {
                    let err = SyntaxError::new("'else' without a matching 'if'", self.span());
                    self.ctx.report_syntax(err);
                    self.skip_line();
                    continue;
                }
                _ => {}
            }

            let result = self.parse_statement().and_then(|()| self.expect_line_end());
            if let Err(failure) = result {
                self.recover(failure)?;
            }
        }
    }

    /// Consumes `end [name]`. A name other than `expected` is only a warning:
    /// every `end` closes the innermost open block.
    pub(super) fn parse_end_clause(&mut self, expected: &str) -> PResult<()> {
        let span = self.expect(&Token::End, "'end'")?;
        if self.at_line_end() {
            return Ok(());
        }
        let found = match self.peek().name_text() {
            Some(name) => name.to_ascii_lowercase(),
            None => {
                return Err(SyntaxError::unexpected(self.peek(), "a name after 'end'", self.span()).into());
            }
        };
        self.advance();
        if found != expected {
            self.ctx.warn(
                format!("'end {}' closes '{}'", found, expected),
                span,
            );
        }
        Ok(())
    }

    /// Finishes a block opened by `what`: consumes its `end` clause, or
    /// reports the missing one when the block ran into a definition or the
    /// end of input.
    pub(super) fn close_block(
        &mut self,
        ended: BlockEnd,
        what: &str,
        expected: &str,
    ) -> Result<(), CompileError> {
        match ended {
            BlockEnd::End => {
                if let Err(failure) = self.parse_end_clause(expected) {
                    self.recover(failure)?;
                }
            }
            BlockEnd::Else | BlockEnd::Definition | BlockEnd::Eof => {
                let err = SyntaxError::new(format!("missing 'end' for {}", what), self.span());
                self.ctx.report_syntax(err);
            }
        }
        Ok(())
    }
}
