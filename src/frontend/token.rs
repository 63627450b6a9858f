#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i32),
    Float(f64),
    String(std::string::String),
    Symbol(std::string::String),

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Mod,

    // Comparison
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,

    // String operators
    Ampersand,
    DoubleAmpersand,
    Contains,
    Starts,

    // Logic
    And,
    Or,
    Not,

    // Chunk expressions
    Char,
    Word,
    Item,
    Line,

    // Geometry
    Sprite,
    Intersects,
    Within,

    // Control flow
    If,
    Then,
    Else,
    End,
    Repeat,
    While,
    With,
    To,
    Down,
    Exit,
    Next,
    Return,
    Tell,
    When,

    // Definitions & declarations
    On,
    Macro,
    Factory,
    Method,
    Global,
    Property,
    Instance,
    Me,

    // Statements
    Put,
    Into,
    After,
    Before,
    Set,
    The,
    Of,
    Go,
    Play,
    Done,
    Loop,
    Frame,
    Movie,
    Previous,

    // Delimiters
    LParen,
    RParen,
    Comma,

    // Identifier (variable, handler or builtin name)
    Ident(std::string::String),

    Comment(std::string::String),
    Newline,
    Eof,
}

impl Token {
    /// Source spelling of keyword tokens.
    ///
    /// Used where Lingo lets a keyword double as a name, e.g. `the frame`,
    /// `the movie` or the trailing name of an `end` clause.
    pub fn keyword_text(&self) -> Option<&'static str> {
        use Token::*;
        Some(match self {
            Mod => "mod",
            Contains => "contains",
            Starts => "starts",
            And => "and",
            Or => "or",
            Not => "not",
            Char => "char",
            Word => "word",
            Item => "item",
            Line => "line",
            Sprite => "sprite",
            Intersects => "intersects",
            Within => "within",
            If => "if",
            Then => "then",
            Else => "else",
            End => "end",
            Repeat => "repeat",
            While => "while",
            With => "with",
            To => "to",
            Down => "down",
            Exit => "exit",
            Next => "next",
            Return => "return",
            Tell => "tell",
            When => "when",
            On => "on",
            Macro => "macro",
            Factory => "factory",
            Method => "method",
            Global => "global",
            Property => "property",
            Instance => "instance",
            Me => "me",
            Put => "put",
            Into => "into",
            After => "after",
            Before => "before",
            Set => "set",
            The => "the",
            Of => "of",
            Go => "go",
            Play => "play",
            Done => "done",
            Loop => "loop",
            Frame => "frame",
            Movie => "movie",
            Previous => "previous",
            _ => return None,
        })
    }

    /// Identifier text or keyword spelling, whichever applies.
    pub fn name_text(&self) -> Option<&str> {
        match self {
            Token::Ident(name) => Some(name.as_str()),
            other => other.keyword_text(),
        }
    }

    /// Short human-readable description for diagnostics.
    pub fn describe(&self) -> std::string::String {
        match self {
            Token::Integer(n) => format!("integer {}", n),
            Token::Float(n) => format!("float {}", n),
            Token::String(s) => format!("string \"{}\"", s),
            Token::Symbol(s) => format!("symbol #{}", s),
            Token::Ident(name) => format!("identifier '{}'", name),
            Token::Newline => "end of line".to_string(),
            Token::Eof => "end of file".to_string(),
            Token::Comment(_) => "comment".to_string(),
            Token::Plus => "'+'".to_string(),
            Token::Minus => "'-'".to_string(),
            Token::Star => "'*'".to_string(),
            Token::Slash => "'/'".to_string(),
            Token::Eq => "'='".to_string(),
            Token::NotEq => "'<>'".to_string(),
            Token::Lt => "'<'".to_string(),
            Token::Gt => "'>'".to_string(),
            Token::LtEq => "'<='".to_string(),
            Token::GtEq => "'>='".to_string(),
            Token::Ampersand => "'&'".to_string(),
            Token::DoubleAmpersand => "'&&'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            other => match other.keyword_text() {
                Some(kw) => format!("keyword '{}'", kw),
                None => format!("{:?}", other),
            },
        }
    }
}

/// Keyword lookup on the lower-cased spelling.
pub fn keyword(lowered: &str) -> Option<Token> {
    use Token::*;
    Some(match lowered {
        "mod" => Mod,
        "contains" => Contains,
        "starts" => Starts,
        "and" => And,
        "or" => Or,
        "not" => Not,
        "char" => Char,
        "word" => Word,
        "item" => Item,
        "line" => Line,
        "sprite" => Sprite,
        "intersects" => Intersects,
        "within" => Within,
        "if" => If,
        "then" => Then,
        "else" => Else,
        "end" => End,
        "repeat" => Repeat,
        "while" => While,
        "with" => With,
        "to" => To,
        "down" => Down,
        "exit" => Exit,
        "next" => Next,
        "return" => Return,
        "tell" => Tell,
        "when" => When,
        "on" => On,
        "macro" => Macro,
        "factory" => Factory,
        "method" => Method,
        "global" => Global,
        "property" => Property,
        "instance" => Instance,
        "me" => Me,
        "put" => Put,
        "into" => Into,
        "after" => After,
        "before" => Before,
        "set" => Set,
        "the" => The,
        "of" => Of,
        "go" => Go,
        "play" => Play,
        "done" => Done,
        "loop" => Loop,
        "frame" => Frame,
        "movie" => Movie,
        "previous" => Previous,
        _ => return None,
    })
}
