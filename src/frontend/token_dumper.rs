use crate::frontend::lexer::Spanned;
use crate::frontend::token::Token;

pub struct TokenDumper {
    pub color: bool,
    pub show_debug_repr: bool, // if false, prints a nicer value for some tokens
}

impl Default for TokenDumper {
    fn default() -> Self {
        Self {
            color: true,
            show_debug_repr: true,
        }
    }
}

impl TokenDumper {
    // ANSI colors
    const RESET: &'static str = "\x1b[0m";
    const DIM: &'static str = "\x1b[2m";
    const GRN: &'static str = "\x1b[32m";
    const YEL: &'static str = "\x1b[33m";
    const CYN: &'static str = "\x1b[36m";
    const MAG: &'static str = "\x1b[35m";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn no_color(mut self) -> Self {
        self.color = false;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.show_debug_repr = false;
        self
    }

    pub fn dump(&self, tokens: &[Spanned]) {
        for s in tokens {
            println!("{}", self.render(s));
        }
    }

    pub fn render(&self, s: &Spanned) -> String {
        let line = s.span.line;
        let col = s.span.col;

        let kind = self.kind(&s.token);
        let colr = if self.color { self.color(&s.token) } else { "" };
        let reset = if self.color { Self::RESET } else { "" };

        if self.show_debug_repr {
            return format!(
                "[{:02}:{:02}] {}{:<8} {:?}{}",
                line, col, colr, kind, s.token, reset
            );
        }

        let text = match &s.token {
            Token::Comment(c) => format!("COMMENT: {}", c),
            Token::Newline => "NEWLINE".to_string(),
            Token::Symbol(name) => format!("#{}", name),
            Token::String(text) => format!("\"{}\"", text),
            other => match other.name_text() {
                Some(name) => name.to_string(),
                None => format!("{:?}", other),
            },
        };
        format!(
            "[{:02}:{:02}] {}{:<8} {}{}",
            line, col, colr, kind, text, reset
        )
    }

    fn kind(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Newline => "NEWLINE",
            Comment(_) => "COMMENT",
            Eof => "EOF",

            Integer(_) => "INT",
            Float(_) => "FLOAT",
            String(_) => "STRING",
            Symbol(_) => "SYMBOL",

            Ident(_) => "IDENT",

            LParen | RParen | Comma => "PUNCT",

            Plus | Minus | Star | Slash | Mod | Ampersand | DoubleAmpersand => "OP",
            Eq | NotEq | Lt | LtEq | Gt | GtEq => "CMP",

            _ => "KEYWORD",
        }
    }

    fn color(&self, t: &Token) -> &'static str {
        use Token::*;
        match t {
            Newline | Comment(_) | Eof => Self::DIM,
            String(_) => Self::GRN,
            Integer(_) | Float(_) | Symbol(_) => Self::CYN,
            Ident(_) => Self::YEL,
            Plus | Minus | Star | Slash | Mod | Ampersand | DoubleAmpersand => Self::MAG,
            Eq | NotEq | Lt | LtEq | Gt | GtEq => Self::MAG,
            _ => Self::RESET,
        }
    }
}
