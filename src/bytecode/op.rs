use serde::{Deserialize, Serialize};

// =============================================================================
// OP - Bytecode instructions
// =============================================================================

/// One VM instruction. Operands are inline; `usize` operands index the
/// function's constant pool or the frame's local slots.
///
/// Jump offsets are relative to the instruction after the jump.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Op {
    // literals
    /// Push `constants[index]`.
    Constant(usize),
    None,
    True,
    False,
    /// Push an inline integer literal.
    Int(i64),
    /// Push an inline float literal.
    Float(f64),

    // stack
    Pop,
    Duplicate,
    /// ( a b -- a b a b ), used by compound assignment on `a[i]`.
    DuplicatePair,

    // arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negate,

    // bitwise
    BitAnd,
    BitOr,
    BitXor,
    BitLeftShift,
    BitRightShift,
    BitNot,

    // logic
    Not,

    // comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // variables
    /// Pop a value into the global named by `constants[index]`.
    DefineGlobal(usize),
    GetGlobal(usize),
    SetGlobal(usize),
    GetLocal(usize),
    SetLocal(usize),
    /// `local += n` for an integer literal `n`; pushes the new value.
    IncrementLocalAndSet(usize, i64),
    /// ( object key -- value )
    GetDynamic,
    /// ( object key value -- value )
    SetDynamic,
    /// ( table -- value ), key is `constants[index]`.
    GetProperty(usize),
    /// ( table value -- value )
    SetProperty(usize),

    // collections
    /// Pop `n` values into a new array.
    NewArray(usize),
    /// Pop `n` key/value pairs into a new table.
    NewTable(usize),
    ArrayPush,
    ArrayPop,
    ArrayInsert,
    Delete,
    Len,
    Keys,
    Exists,
    Index,
    Slice,
    Clear,
    Copy,

    // control flow
    Jump(usize),
    /// Jump if the top of the stack is falsy. Does not pop.
    JumpIfFalse(usize),
    /// Jump if the top of the stack is truthy. Does not pop.
    JumpIfTrue(usize),
    /// Jump backwards.
    Loop(usize),
    /// Start a `for .. in` loop over the iterable in local `slot`.
    ///
    /// Pushes the hidden key list and index plus `vars` loop variables.
    /// Jumps forward by `jump` when there is nothing to iterate.
    For { slot: usize, vars: usize, jump: usize },
    /// Advance a `for .. in` loop; jumps backwards by `jump` while items remain.
    ForLoop { slot: usize, vars: usize, jump: usize },

    // calls
    /// Call the value below `n` arguments.
    Call(usize),
    Return,
    Throw,

    // misc
    Print,
    Echo,
    Type,
    Use,
    ToInteger,
    ToFloat,
    ToString,
}

impl Op {
    /// Upper-case mnemonic used by the disassembler.
    pub fn name(&self) -> &'static str {
        match self {
            Op::Constant(_) => "CONSTANT",
            Op::None => "NONE",
            Op::True => "TRUE",
            Op::False => "FALSE",
            Op::Int(_) => "INT",
            Op::Float(_) => "FLOAT",
            Op::Pop => "POP",
            Op::Duplicate => "DUPLICATE",
            Op::DuplicatePair => "DUPLICATE_PAIR",
            Op::Add => "ADD",
            Op::Subtract => "SUBTRACT",
            Op::Multiply => "MULTIPLY",
            Op::Divide => "DIVIDE",
            Op::Modulo => "MODULO",
            Op::Negate => "NEGATE",
            Op::BitAnd => "BIT_AND",
            Op::BitOr => "BIT_OR",
            Op::BitXor => "BIT_XOR",
            Op::BitLeftShift => "BIT_LEFT_SHIFT",
            Op::BitRightShift => "BIT_RIGHT_SHIFT",
            Op::BitNot => "BIT_NOT",
            Op::Not => "NOT",
            Op::Equal => "EQUAL",
            Op::NotEqual => "NOT_EQUAL",
            Op::Less => "LESS",
            Op::LessEqual => "LESS_EQUAL",
            Op::Greater => "GREATER",
            Op::GreaterEqual => "GREATER_EQUAL",
            Op::DefineGlobal(_) => "DEFINE_GLOBAL",
            Op::GetGlobal(_) => "GET_GLOBAL",
            Op::SetGlobal(_) => "SET_GLOBAL",
            Op::GetLocal(_) => "GET_LOCAL",
            Op::SetLocal(_) => "SET_LOCAL",
            Op::IncrementLocalAndSet(..) => "INCREMENT_LOCAL_AND_SET",
            Op::GetDynamic => "GET_DYNAMIC",
            Op::SetDynamic => "SET_DYNAMIC",
            Op::GetProperty(_) => "GET_PROPERTY",
            Op::SetProperty(_) => "SET_PROPERTY",
            Op::NewArray(_) => "NEW_ARRAY",
            Op::NewTable(_) => "NEW_TABLE",
            Op::ArrayPush => "ARRAY_PUSH",
            Op::ArrayPop => "ARRAY_POP",
            Op::ArrayInsert => "ARRAY_INSERT",
            Op::Delete => "DELETE",
            Op::Len => "LEN",
            Op::Keys => "KEYS",
            Op::Exists => "EXISTS",
            Op::Index => "INDEX",
            Op::Slice => "SLICE",
            Op::Clear => "CLEAR",
            Op::Copy => "COPY",
            Op::Jump(_) => "JUMP",
            Op::JumpIfFalse(_) => "JUMP_IF_FALSE",
            Op::JumpIfTrue(_) => "JUMP_IF_TRUE",
            Op::Loop(_) => "LOOP",
            Op::For { .. } => "FOR",
            Op::ForLoop { .. } => "FOR_LOOP",
            Op::Call(_) => "CALL",
            Op::Return => "RETURN",
            Op::Throw => "THROW",
            Op::Print => "PRINT",
            Op::Echo => "ECHO",
            Op::Type => "TYPE",
            Op::Use => "USE",
            Op::ToInteger => "TO_INTEGER",
            Op::ToFloat => "TO_FLOAT",
            Op::ToString => "TO_STRING",
        }
    }

    /// Absolute target of a jump at `ip`, if this op jumps.
    pub fn jump_target(&self, ip: usize) -> Option<usize> {
        match *self {
            Op::Jump(offset)
            | Op::JumpIfFalse(offset)
            | Op::JumpIfTrue(offset)
            | Op::For { jump: offset, .. } => Some(ip + 1 + offset),
            Op::Loop(offset) | Op::ForLoop { jump: offset, .. } => (ip + 1).checked_sub(offset),
            _ => None,
        }
    }
}
