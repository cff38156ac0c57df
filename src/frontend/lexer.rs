use crate::frontend::token::{StringStatus, Token};

/// Position of a token: 0-based row and column, half-open byte range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub row: usize,
    pub column: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}:{}: {message}", .row + 1, .column + 1)]
pub struct LexError {
    pub message: String,
    pub row: usize,
    pub column: usize,
}

/// An open `{...}` inside a string literal.
#[derive(Debug, Clone, Copy)]
struct Interpolation {
    quote: char,
    depth: usize,
}

/// Pull lexer: the compiler asks for one token at a time.
pub struct Lexer {
    source: Vec<(usize, char)>,
    size: usize,
    pos: usize,
    row: usize,
    column: usize,
    interpolations: Vec<Interpolation>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.char_indices().collect(),
            size: source.len(),
            pos: 0,
            row: 0,
            column: 0,
            interpolations: Vec::new(),
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).map(|(_, c)| *c)
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.source.get(self.pos).map(|(i, _)| *i).unwrap_or(self.size)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.row += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        let offset = self.offset();
        Span {
            row: self.row,
            column: self.column,
            start: offset,
            end: offset,
        }
    }

    fn error(&self, message: impl Into<String>, span: Span) -> LexError {
        LexError {
            message: message.into(),
            row: span.row,
            column: span.column,
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.current() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    /// Reads string characters up to the closing quote or an opening `{`.
    ///
    /// Returns the text and whether an interpolation was opened.
    fn read_string(&mut self, quote: char, start: Span) -> Result<(String, bool), LexError> {
        let mut string = String::new();
        loop {
            match self.current() {
                Some(ch) if ch == quote => {
                    self.advance();
                    return Ok((string, false));
                }
                Some('{') => {
                    self.advance();
                    self.interpolations.push(Interpolation { quote, depth: 0 });
                    return Ok((string, true));
                }
                Some('\\') => {
                    self.advance();
                    let escaped = match self.current() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('0') => '\0',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some('{') => '{',
                        Some('}') => '}',
                        Some(ch) => {
                            return Err(self.error(format!("Unknown escape sequence: \\{}", ch), self.span()));
                        }
                        None => return Err(self.error("Unterminated string literal", start)),
                    };
                    string.push(escaped);
                    self.advance();
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
                None => return Err(self.error("Unterminated string literal", start)),
            }
        }
    }

    fn read_number(&mut self, start: Span) -> Result<Token, LexError> {
        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            self.advance();

            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            if hex.is_empty() {
                return Err(self.error("Expected hex digits after 0x", start));
            }
            return i64::from_str_radix(&hex, 16)
                .map(Token::Integer)
                .map_err(|_| self.error(format!("Integer literal out of range: 0x{}", hex), start));
        }

        let mut digits = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                self.advance();
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                digits.push('.');
                self.advance();
            } else {
                break;
            }
        }

        if matches!(self.current(), Some('e') | Some('E')) {
            let signed = matches!(self.peek(), Some('+') | Some('-'));
            let exponent_digit = if signed {
                self.source.get(self.pos + 2).map(|(_, c)| *c)
            } else {
                self.peek()
            };
            if exponent_digit.is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
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

        if is_float {
            digits
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error(format!("Invalid float literal: {}", digits), start))
        } else {
            digits
                .parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| self.error(format!("Integer literal out of range: {}", digits), start))
        }
    }

    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();
        while let Some(ch) = self.current() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Token::keyword(&ident).unwrap_or(Token::Ident(ident))
    }

    /// Consumes `first` and picks the longest operator that starts with it.
    fn read_operator(&mut self, first: char) -> Option<Token> {
        let next = self.peek();
        let third = self.source.get(self.pos + 2).map(|(_, c)| *c);

        let (token, width) = match (first, next, third) {
            ('<', Some('<'), Some('=')) => (Token::AssignShiftLeft, 3),
            ('>', Some('>'), Some('=')) => (Token::AssignShiftRight, 3),
            ('<', Some('<'), _) => (Token::ShiftLeft, 2),
            ('>', Some('>'), _) => (Token::ShiftRight, 2),
            ('<', Some('='), _) => (Token::LessEqual, 2),
            ('>', Some('='), _) => (Token::GreaterEqual, 2),
            ('=', Some('='), _) => (Token::Equal, 2),
            ('!', Some('='), _) => (Token::NotEqual, 2),
            ('+', Some('='), _) => (Token::AssignAdd, 2),
            ('-', Some('='), _) => (Token::AssignSubtract, 2),
            ('*', Some('='), _) => (Token::AssignMultiply, 2),
            ('/', Some('='), _) => (Token::AssignDivide, 2),
            ('%', Some('='), _) => (Token::AssignModulo, 2),
            ('&', Some('='), _) => (Token::AssignBitAnd, 2),
            ('|', Some('='), _) => (Token::AssignBitOr, 2),
            ('^', Some('='), _) => (Token::AssignBitXor, 2),
            ('<', _, _) => (Token::Less, 1),
            ('>', _, _) => (Token::Greater, 1),
            ('=', _, _) => (Token::Assign, 1),
            ('!', _, _) => (Token::Not, 1),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            ('&', _, _) => (Token::BitAnd, 1),
            ('|', _, _) => (Token::BitOr, 1),
            ('^', _, _) => (Token::BitXor, 1),
            ('~', _, _) => (Token::BitNot, 1),
            ('(', _, _) => (Token::LeftParen, 1),
            (')', _, _) => (Token::RightParen, 1),
            ('[', _, _) => (Token::LeftSquare, 1),
            (']', _, _) => (Token::RightSquare, 1),
            (',', _, _) => (Token::Comma, 1),
            (':', _, _) => (Token::Colon, 1),
            (';', _, _) => (Token::Semicolon, 1),
            ('.', _, _) => (Token::Dot, 1),
            _ => return None,
        };

        for _ in 0..width {
            self.advance();
        }
        Some(token)
    }

    /// Produces the next token, or `Eof` once the source is exhausted.
    pub fn next_token(&mut self) -> Result<Spanned, LexError> {
        self.skip_whitespace();
        let mut span = self.span();

        let token = match self.current() {
            None => {
                if !self.interpolations.is_empty() {
                    return Err(self.error("Unterminated string interpolation", span));
                }
                Token::Eof
            }
            Some(quote @ ('"' | '\'')) => {
                self.advance();
                let (text, opened) = self.read_string(quote, span)?;
                let status = if opened { StringStatus::Begin } else { StringStatus::None };
                Token::String(text, status)
            }
            Some('{') => {
                self.advance();
                if let Some(top) = self.interpolations.last_mut() {
                    top.depth += 1;
                }
                Token::LeftCurly
            }
            Some('}') => {
                self.advance();
                match self.interpolations.last_mut() {
                    Some(top) if top.depth == 0 => {
                        let quote = top.quote;
                        self.interpolations.pop();
                        let (text, opened) = self.read_string(quote, span)?;
                        let status = if opened { StringStatus::Continue } else { StringStatus::Close };
                        Token::String(text, status)
                    }
                    Some(top) => {
                        top.depth -= 1;
                        Token::RightCurly
                    }
                    None => Token::RightCurly,
                }
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number(span)?,
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => self.read_identifier(),
            Some(ch) => match self.read_operator(ch) {
                Some(token) => token,
                None => return Err(self.error(format!("Unknown character: `{}`", ch), span)),
            },
        };

        span.end = self.offset();
        Ok(Spanned { token, span })
    }

    /// Lexes the whole source. Used by tests and diagnostics; the compiler pulls tokens lazily.
    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();
        loop {
            let spanned = self.next_token()?;
            let done = spanned.token == Token::Eof;
            tokens.push(spanned);
            if done {
                return Ok(tokens);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(source);
        lexer
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .filter(|t| !matches!(t, Token::Eof))
            .collect()
    }

    fn string(text: &str, status: StringStatus) -> Token {
        Token::String(text.to_string(), status)
    }

    #[test]
    fn test_let_statement() {
        let t = tokens("let x = 1 + 2;");
        assert_eq!(
            t,
            vec![
                Token::Let,
                Token::Ident("x".to_string()),
                Token::Assign,
                Token::Integer(1),
                Token::Plus,
                Token::Integer(2),
                Token::Semicolon
            ]
        );
    }

    #[test]
    fn test_numbers() {
        let t = tokens("42 3.5 0x1F 2e3 1.5e-2 7.");
        assert_eq!(
            t,
            vec![
                Token::Integer(42),
                Token::Float(3.5),
                Token::Integer(31),
                Token::Float(2000.0),
                Token::Float(0.015),
                Token::Integer(7),
                Token::Dot
            ]
        );
    }

    #[test]
    fn test_compound_operators() {
        let t = tokens("+= -= *= /= %= &= |= ^= <<= >>= << >> <= >= == != = !");
        assert_eq!(
            t,
            vec![
                Token::AssignAdd,
                Token::AssignSubtract,
                Token::AssignMultiply,
                Token::AssignDivide,
                Token::AssignModulo,
                Token::AssignBitAnd,
                Token::AssignBitOr,
                Token::AssignBitXor,
                Token::AssignShiftLeft,
                Token::AssignShiftRight,
                Token::ShiftLeft,
                Token::ShiftRight,
                Token::LessEqual,
                Token::GreaterEqual,
                Token::Equal,
                Token::NotEqual,
                Token::Assign,
                Token::Not
            ]
        );
    }

    #[test]
    fn test_keywords_and_builtins() {
        let t = tokens("if elif else while for in exists to_integer echo lenx");
        assert_eq!(
            t,
            vec![
                Token::If,
                Token::Elif,
                Token::Else,
                Token::While,
                Token::For,
                Token::In,
                Token::Exists,
                Token::ToInteger,
                Token::Echo,
                Token::Ident("lenx".to_string())
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let t = tokens("# a comment\necho 1 # trailing\n");
        assert_eq!(t, vec![Token::Echo, Token::Integer(1)]);
    }

    #[test]
    fn test_string_escapes() {
        let t = tokens(r#""a\tb\n" 'it\'s' "\{x\}""#);
        assert_eq!(
            t,
            vec![
                string("a\tb\n", StringStatus::None),
                string("it's", StringStatus::None),
                string("{x}", StringStatus::None)
            ]
        );
    }

    #[test]
    fn test_string_interpolation() {
        let t = tokens(r#""a {x} b {y + 1} c""#);
        assert_eq!(
            t,
            vec![
                string("a ", StringStatus::Begin),
                Token::Ident("x".to_string()),
                string(" b ", StringStatus::Continue),
                Token::Ident("y".to_string()),
                Token::Plus,
                Token::Integer(1),
                string(" c", StringStatus::Close)
            ]
        );
    }

    #[test]
    fn test_interpolation_with_nested_braces() {
        let t = tokens(r#""v={ {a: "q"}.a }!""#);
        assert_eq!(
            t,
            vec![
                string("v=", StringStatus::Begin),
                Token::LeftCurly,
                Token::Ident("a".to_string()),
                Token::Colon,
                string("q", StringStatus::None),
                Token::RightCurly,
                Token::Dot,
                Token::Ident("a".to_string()),
                string("!", StringStatus::Close)
            ]
        );
    }

    #[test]
    fn test_spans_are_zero_based() {
        let mut lexer = Lexer::new("let\n  abc");
        let tokens = lexer.tokenize().unwrap();
        assert_eq!(tokens[0].span, Span { row: 0, column: 0, start: 0, end: 3 });
        assert_eq!(tokens[1].span, Span { row: 1, column: 2, start: 6, end: 9 });
    }

    #[test]
    fn test_unknown_character() {
        let mut lexer = Lexer::new("let x = 1 @ 2");
        let err = lexer.tokenize().unwrap_err();
        assert_eq!(err.message, "Unknown character: `@`");
        assert_eq!((err.row, err.column), (0, 10));
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("echo \"abc");
        let err = lexer.tokenize().unwrap_err();
        assert!(err.message.contains("Unterminated string"));
    }

    #[test]
    fn test_unterminated_interpolation() {
        let mut lexer = Lexer::new("echo \"abc {x");
        let err = lexer.tokenize().unwrap_err();
        assert!(err.message.contains("interpolation"));
    }

    #[test]
    fn test_integer_out_of_range() {
        let mut lexer = Lexer::new("99999999999999999999");
        let err = lexer.tokenize().unwrap_err();
        assert!(err.message.contains("out of range"));
    }
}
