/// Where a string literal token sits relative to an interpolation.
///
/// `"a {x} b {y} c"` lexes as `String("a ", Begin)`, the tokens of `x`,
/// `String(" b ", Continue)`, the tokens of `y`, `String(" c", Close)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringStatus {
    None,
    Begin,
    Close,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Integer(i64),
    Float(f64),
    String(std::string::String, StringStatus),
    Ident(std::string::String),
    True,
    False,
    None,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    ShiftLeft,
    ShiftRight,

    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logic
    And,
    Or,
    Not,

    // Assignment
    Assign,
    AssignAdd,
    AssignSubtract,
    AssignMultiply,
    AssignDivide,
    AssignModulo,
    AssignBitAnd,
    AssignBitOr,
    AssignBitXor,
    AssignShiftLeft,
    AssignShiftRight,

    // Delimiters
    LeftParen,
    RightParen,
    LeftSquare,
    RightSquare,
    LeftCurly,
    RightCurly,
    Comma,
    Colon,
    Semicolon,
    Dot,

    // Statements
    Let,
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Break,
    Continue,
    Function,
    Return,
    Try,
    Except,
    Throw,
    Use,
    Echo,
    Print,

    // Builtin forms
    Len,
    Keys,
    Exists,
    Delete,
    Insert,
    Copy,
    Clear,
    Index,
    Push,
    Pop,
    ToFloat,
    ToInteger,
    ToString,
    Type,

    Eof,
}

impl Token {
    /// Maps an identifier to its keyword token, if it is one.
    pub fn keyword(ident: &str) -> Option<Token> {
        let token = match ident {
            "and" => Token::And,
            "break" => Token::Break,
            "clear" => Token::Clear,
            "continue" => Token::Continue,
            "copy" => Token::Copy,
            "delete" => Token::Delete,
            "echo" => Token::Echo,
            "elif" => Token::Elif,
            "else" => Token::Else,
            "except" => Token::Except,
            "exists" => Token::Exists,
            "false" => Token::False,
            "for" => Token::For,
            "function" => Token::Function,
            "if" => Token::If,
            "in" => Token::In,
            "index" => Token::Index,
            "insert" => Token::Insert,
            "keys" => Token::Keys,
            "len" => Token::Len,
            "let" => Token::Let,
            "none" => Token::None,
            "not" => Token::Not,
            "or" => Token::Or,
            "pop" => Token::Pop,
            "print" => Token::Print,
            "push" => Token::Push,
            "return" => Token::Return,
            "throw" => Token::Throw,
            "to_float" => Token::ToFloat,
            "to_integer" => Token::ToInteger,
            "to_string" => Token::ToString,
            "true" => Token::True,
            "try" => Token::Try,
            "type" => Token::Type,
            "use" => Token::Use,
            "while" => Token::While,
            _ => return None,
        };
        Some(token)
    }

    /// For a compound assignment token, the binary token it applies.
    pub fn compound_operator(&self) -> Option<Token> {
        let op = match self {
            Token::AssignAdd => Token::Plus,
            Token::AssignSubtract => Token::Minus,
            Token::AssignMultiply => Token::Star,
            Token::AssignDivide => Token::Slash,
            Token::AssignModulo => Token::Percent,
            Token::AssignBitAnd => Token::BitAnd,
            Token::AssignBitOr => Token::BitOr,
            Token::AssignBitXor => Token::BitXor,
            Token::AssignShiftLeft => Token::ShiftLeft,
            Token::AssignShiftRight => Token::ShiftRight,
            _ => return None,
        };
        Some(op)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Integer(n) => write!(f, "{}", n),
            Token::Float(n) => write!(f, "{}", n),
            Token::String(s, _) => write!(f, "\"{}\"", s),
            Token::Ident(s) => write!(f, "{}", s),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::None => write!(f, "none"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::BitAnd => write!(f, "&"),
            Token::BitOr => write!(f, "|"),
            Token::BitXor => write!(f, "^"),
            Token::BitNot => write!(f, "~"),
            Token::ShiftLeft => write!(f, "<<"),
            Token::ShiftRight => write!(f, ">>"),
            Token::Equal => write!(f, "=="),
            Token::NotEqual => write!(f, "!="),
            Token::Less => write!(f, "<"),
            Token::LessEqual => write!(f, "<="),
            Token::Greater => write!(f, ">"),
            Token::GreaterEqual => write!(f, ">="),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::Assign => write!(f, "="),
            Token::AssignAdd => write!(f, "+="),
            Token::AssignSubtract => write!(f, "-="),
            Token::AssignMultiply => write!(f, "*="),
            Token::AssignDivide => write!(f, "/="),
            Token::AssignModulo => write!(f, "%="),
            Token::AssignBitAnd => write!(f, "&="),
            Token::AssignBitOr => write!(f, "|="),
            Token::AssignBitXor => write!(f, "^="),
            Token::AssignShiftLeft => write!(f, "<<="),
            Token::AssignShiftRight => write!(f, ">>="),
            Token::LeftParen => write!(f, "("),
            Token::RightParen => write!(f, ")"),
            Token::LeftSquare => write!(f, "["),
            Token::RightSquare => write!(f, "]"),
            Token::LeftCurly => write!(f, "{{"),
            Token::RightCurly => write!(f, "}}"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Semicolon => write!(f, ";"),
            Token::Dot => write!(f, "."),
            Token::Let => write!(f, "let"),
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::For => write!(f, "for"),
            Token::In => write!(f, "in"),
            Token::While => write!(f, "while"),
            Token::Break => write!(f, "break"),
            Token::Continue => write!(f, "continue"),
            Token::Function => write!(f, "function"),
            Token::Return => write!(f, "return"),
            Token::Try => write!(f, "try"),
            Token::Except => write!(f, "except"),
            Token::Throw => write!(f, "throw"),
            Token::Use => write!(f, "use"),
            Token::Echo => write!(f, "echo"),
            Token::Print => write!(f, "print"),
            Token::Len => write!(f, "len"),
            Token::Keys => write!(f, "keys"),
            Token::Exists => write!(f, "exists"),
            Token::Delete => write!(f, "delete"),
            Token::Insert => write!(f, "insert"),
            Token::Copy => write!(f, "copy"),
            Token::Clear => write!(f, "clear"),
            Token::Index => write!(f, "index"),
            Token::Push => write!(f, "push"),
            Token::Pop => write!(f, "pop"),
            Token::ToFloat => write!(f, "to_float"),
            Token::ToInteger => write!(f, "to_integer"),
            Token::ToString => write!(f, "to_string"),
            Token::Type => write!(f, "type"),
            Token::Eof => write!(f, "end of file"),
        }
    }
}
