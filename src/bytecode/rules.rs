use crate::bytecode::Op;
use crate::frontend::token::Token;

/// Binding power, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assign,
    Bits,
    Or,
    And,
    Equality,
    Compare,
    Term,
    Factor,
    Unary,
    Call,
}

impl Precedence {
    /// One level tighter, used for the right operand of left-associative operators.
    pub fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assign,
            Precedence::Assign => Precedence::Bits,
            Precedence::Bits => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Compare,
            Precedence::Compare => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary | Precedence::Call => Precedence::Call,
        }
    }
}

/// Parsing routine run when a token starts an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prefix {
    Group,
    Array,
    Table,
    Unary,
    Literal,
    String,
    Variable,
    Function,
    Builtin,
}

/// Parsing routine run when a token follows a complete operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Infix {
    Binary,
    And,
    Or,
    Call,
    Dot,
    Square,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub prefix: Option<Prefix>,
    pub infix: Option<Infix>,
    pub precedence: Precedence,
}

const fn rule_of(prefix: Option<Prefix>, infix: Option<Infix>, precedence: Precedence) -> Rule {
    Rule {
        prefix,
        infix,
        precedence,
    }
}

/// The Pratt table. A pure function of the token kind.
pub fn rule(token: &Token) -> Rule {
    use Precedence as P;
    match token {
        Token::LeftParen => rule_of(Some(Prefix::Group), Some(Infix::Call), P::Call),
        Token::LeftSquare => rule_of(Some(Prefix::Array), Some(Infix::Square), P::Call),
        Token::LeftCurly => rule_of(Some(Prefix::Table), None, P::None),
        Token::Dot => rule_of(None, Some(Infix::Dot), P::Call),

        Token::Minus => rule_of(Some(Prefix::Unary), Some(Infix::Binary), P::Term),
        Token::Plus => rule_of(None, Some(Infix::Binary), P::Term),
        Token::Star | Token::Slash | Token::Percent => rule_of(None, Some(Infix::Binary), P::Factor),
        Token::Not | Token::BitNot => rule_of(Some(Prefix::Unary), None, P::None),

        Token::BitAnd | Token::BitOr | Token::BitXor | Token::ShiftLeft | Token::ShiftRight => {
            rule_of(None, Some(Infix::Binary), P::Bits)
        }
        Token::Equal | Token::NotEqual => rule_of(None, Some(Infix::Binary), P::Equality),
        Token::Less | Token::LessEqual | Token::Greater | Token::GreaterEqual => {
            rule_of(None, Some(Infix::Binary), P::Compare)
        }
        Token::And => rule_of(None, Some(Infix::And), P::And),
        Token::Or => rule_of(None, Some(Infix::Or), P::Or),

        Token::Integer(_) | Token::Float(_) | Token::True | Token::False | Token::None => {
            rule_of(Some(Prefix::Literal), None, P::None)
        }
        Token::String(..) => rule_of(Some(Prefix::String), None, P::None),
        Token::Ident(_) => rule_of(Some(Prefix::Variable), None, P::None),
        Token::Function => rule_of(Some(Prefix::Function), None, P::None),

        Token::Len
        | Token::Keys
        | Token::Exists
        | Token::Delete
        | Token::Insert
        | Token::Copy
        | Token::Clear
        | Token::Index
        | Token::Push
        | Token::Pop
        | Token::ToFloat
        | Token::ToInteger
        | Token::ToString
        | Token::Type => rule_of(Some(Prefix::Builtin), None, P::None),

        _ => rule_of(None, None, P::None),
    }
}

/// Opcode emitted for a binary operator token.
pub fn binary_op(token: &Token) -> Option<Op> {
    let op = match token {
        Token::Plus => Op::Add,
        Token::Minus => Op::Subtract,
        Token::Star => Op::Multiply,
        Token::Slash => Op::Divide,
        Token::Percent => Op::Modulo,
        Token::BitAnd => Op::BitAnd,
        Token::BitOr => Op::BitOr,
        Token::BitXor => Op::BitXor,
        Token::ShiftLeft => Op::BitLeftShift,
        Token::ShiftRight => Op::BitRightShift,
        Token::Equal => Op::Equal,
        Token::NotEqual => Op::NotEqual,
        Token::Less => Op::Less,
        Token::LessEqual => Op::LessEqual,
        Token::Greater => Op::Greater,
        Token::GreaterEqual => Op::GreaterEqual,
        _ => return None,
    };
    Some(op)
}

/// Opcode and argument count of a builtin form such as `len(x)`.
pub fn builtin(token: &Token) -> Option<(Op, usize)> {
    let entry = match token {
        Token::Len => (Op::Len, 1),
        Token::Keys => (Op::Keys, 1),
        Token::Exists => (Op::Exists, 2),
        Token::Delete => (Op::Delete, 2),
        Token::Insert => (Op::ArrayInsert, 3),
        Token::Copy => (Op::Copy, 1),
        Token::Clear => (Op::Clear, 1),
        Token::Index => (Op::Index, 2),
        Token::Push => (Op::ArrayPush, 2),
        Token::Pop => (Op::ArrayPop, 1),
        Token::ToFloat => (Op::ToFloat, 1),
        Token::ToInteger => (Op::ToInteger, 1),
        Token::ToString => (Op::ToString, 1),
        Token::Type => (Op::Type, 1),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(Precedence::Assign < Precedence::Bits);
        assert!(Precedence::Bits < Precedence::Or);
        assert!(Precedence::Or < Precedence::And);
        assert!(Precedence::Term < Precedence::Factor);
        assert_eq!(Precedence::Factor.next(), Precedence::Unary);
        assert_eq!(Precedence::Call.next(), Precedence::Call);
    }

    #[test]
    fn test_every_infix_token_binds() {
        let tokens = [Token::Plus, Token::Star, Token::And, Token::Or, Token::Dot, Token::LeftParen, Token::ShiftLeft];
        for token in tokens {
            let r = rule(&token);
            assert!(r.infix.is_some(), "{} has no infix rule", token);
            assert!(r.precedence > Precedence::None, "{} does not bind", token);
        }
    }

    #[test]
    fn test_statement_tokens_have_no_rule() {
        for token in [Token::Let, Token::RightCurly, Token::Semicolon, Token::Eof] {
            let r = rule(&token);
            assert_eq!(r.prefix, None);
            assert_eq!(r.infix, None);
            assert_eq!(r.precedence, Precedence::None);
        }
    }

    #[test]
    fn test_builtin_arity() {
        assert_eq!(builtin(&Token::Insert), Some((Op::ArrayInsert, 3)));
        assert_eq!(builtin(&Token::Len), Some((Op::Len, 1)));
        assert_eq!(builtin(&Token::Let), None);
    }
}
