use crate::frontend::token::{Token, keyword};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct LexerError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

/// Line continuation character (Option-Return on classic Mac keyboards).
const CONTINUATION: char = '¬';

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span {
            line: self.line,
            col: self.col,
        }
    }

    fn error(&self, message: impl Into<String>, line: usize, col: usize) -> LexerError {
        LexerError {
            message: message.into(),
            line,
            col,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' {
                self.advance();
            } else if ch == CONTINUATION {
                // `¬` swallows the line break that follows it
                self.advance();
                while matches!(self.current(), Some(' ') | Some('\t')) {
                    self.advance();
                }
                if self.current() == Some('\r') {
                    self.advance();
                }
                if self.current() == Some('\n') {
                    self.advance();
                }
            } else {
                break;
            }
        }
    }

    fn read_comment(&mut self) -> Token {
        self.advance();
        self.advance();
        let mut comment = String::new();
        while let Some(ch) = self.current() {
            if ch == '\n' || ch == '\r' {
                break;
            }
            comment.push(ch);
            self.advance();
        }
        Token::Comment(comment.trim().to_string())
    }

    /// Lingo strings have no escape sequences; `QUOTE` is used instead.
    fn read_string(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::String(string));
                }
                Some('\n') | Some('\r') | None => {
                    return Err(self.error("unterminated string literal", start_line, start_col));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;

        let mut digits = String::new();
        let mut has_dot = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }

        // optional exponent: 1.5e3, 2E-4
        if has_dot && matches!(self.current(), Some('e') | Some('E')) {
            let signed = matches!(self.peek(), Some('+') | Some('-'));
            let exp_digit = if signed {
                self.source.get(self.pos + 2).copied()
            } else {
                self.peek()
            };
            if exp_digit.map(|c| c.is_ascii_digit()).unwrap_or(false) {
                digits.push('e');
                self.advance();
                if signed {
                    if let Some(sign) = self.advance() {
                        digits.push(sign);
                    }
                }
                while let Some(ch) = self.current() {
                    if !ch.is_ascii_digit() {
                        break;
                    }
                    digits.push(ch);
                    self.advance();
                }
            }
        }

        if has_dot {
            let value: f64 = digits
                .parse()
                .map_err(|_| self.error(format!("invalid float: {}", digits), start_line, start_col))?;
            Ok(Token::Float(value))
        } else {
            let value: i32 = digits.parse().map_err(|_| {
                self.error(format!("invalid integer: {}", digits), start_line, start_col)
            })?;
            Ok(Token::Integer(value))
        }
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                name.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        name
    }

    fn read_identifier(&mut self) -> Token {
        let ident = self.read_name();
        match keyword(&ident.to_ascii_lowercase()) {
            Some(token) => token,
            None => Token::Ident(ident),
        }
    }

    fn read_symbol(&mut self) -> Result<Token, LexerError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance();
        let name = self.read_name();
        if name.is_empty() {
            return Err(self.error("expected a name after '#'", start_line, start_col));
        }
        Ok(Token::Symbol(name))
    }

    fn read_operator(&mut self) -> Option<Token> {
        let ch = self.current()?;
        let next = self.peek();

        let (token, width) = match (ch, next) {
            ('<', Some('>')) => (Token::NotEq, 2),
            ('<', Some('=')) => (Token::LtEq, 2),
            ('>', Some('=')) => (Token::GtEq, 2),
            ('&', Some('&')) => (Token::DoubleAmpersand, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('=', _) => (Token::Eq, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('&', _) => (Token::Ampersand, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let span = self.span();

            match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some('\r') => {
                    // classic Mac line endings; CRLF collapses into one newline
                    self.advance();
                    if self.current() == Some('\n') {
                        self.advance();
                    } else {
                        self.line += 1;
                        self.col = 1;
                    }
                    tokens.push(Spanned {
                        token: Token::Newline,
                        span,
                    });
                }
                Some('\n') => {
                    self.advance();
                    tokens.push(Spanned {
                        token: Token::Newline,
                        span,
                    });
                }
                Some('-') if self.peek() == Some('-') => {
                    let token = self.read_comment();
                    tokens.push(Spanned { token, span });
                }
                Some('"') => {
                    let token = self.read_string()?;
                    tokens.push(Spanned { token, span });
                }
                Some('#') => {
                    let token = self.read_symbol()?;
                    tokens.push(Spanned { token, span });
                }
                Some(ch) if ch.is_ascii_digit() => {
                    let token = self.read_number()?;
                    tokens.push(Spanned { token, span });
                }
                Some('.') if self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                    let token = self.read_number()?;
                    tokens.push(Spanned { token, span });
                }
                Some(ch) if ch.is_alphabetic() || ch == '_' => {
                    let token = self.read_identifier();
                    tokens.push(Spanned { token, span });
                }
                Some(ch) => match self.read_operator() {
                    Some(token) => tokens.push(Spanned { token, span }),
                    None => {
                        return Err(self.error(
                            format!("unexpected character: '{}'", ch),
                            self.line,
                            self.col,
                        ));
                    }
                },
            }
        }

        Ok(tokens)
    }

    /// Tokens without comments; newlines are kept because Lingo statements are
    /// line-terminated.
    pub fn tokenize_clean(&mut self) -> Result<Vec<Spanned>, LexerError> {
        let tokens = self.tokenize()?;
        Ok(tokens
            .into_iter()
            .filter(|t| !matches!(t.token, Token::Comment(_)))
            .collect())
    }
}
