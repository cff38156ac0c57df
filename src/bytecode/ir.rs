use crate::bytecode::Op;
use crate::lang::value::Value;

/// A compiled instruction stream.
///
/// `lines[i]` is the 1-based source line that produced `instructions[i]`.
#[derive(Debug, Clone, Default)]
pub struct ByteCode {
    pub instructions: Vec<Op>,
    pub lines: Vec<usize>,
    pub constants: Vec<Value>,
}

impl ByteCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn write(&mut self, op: Op, line: usize) -> usize {
        self.instructions.push(op);
        self.lines.push(line);
        self.instructions.len() - 1
    }

    /// Drops every instruction from `len` on.
    pub fn truncate(&mut self, len: usize) {
        self.instructions.truncate(len);
        self.lines.truncate(len);
    }

    /// Adds a constant, reusing an equal string constant if one exists.
    pub fn add_constant(&mut self, value: Value) -> usize {
        if let Value::String(s) = &value {
            let existing = self
                .constants
                .iter()
                .position(|c| matches!(c, Value::String(other) if other == s));
            if let Some(index) = existing {
                return index;
            }
        }
        self.constants.push(value);
        self.constants.len() - 1
    }

    pub fn line(&self, ip: usize) -> usize {
        self.lines.get(ip).copied().unwrap_or(0)
    }

    /// Compact binary encoding of the instruction stream.
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(&self.instructions)
    }

    pub fn decode(bytes: &[u8]) -> Result<Vec<Op>, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

/// One `try` region of a function.
///
/// Instructions in `start..end` are covered; `end` is also where the
/// handler begins. `stack` is the local count to restore, relative to the
/// frame base. `next` links to the previously registered region, so a walk
/// from the function's head visits inner regions before outer ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptRange {
    pub start: usize,
    pub end: usize,
    pub stack: usize,
    pub next: Option<usize>,
}

impl ExceptRange {
    pub fn covers(&self, ip: usize) -> bool {
        self.start <= ip && ip < self.end
    }
}

/// A compiled function or script body.
#[derive(Debug, Clone, Default)]
pub struct Function {
    /// `None` for a script body.
    pub name: Option<String>,
    pub script: Option<String>,
    pub arity: usize,
    pub code: ByteCode,
    pub excepts: Vec<ExceptRange>,
    /// Head of the `excepts` chain.
    pub except: Option<usize>,
}

impl Function {
    pub fn new(name: Option<String>, script: Option<String>) -> Self {
        Self {
            name,
            script,
            ..Self::default()
        }
    }

    /// Innermost `try` region covering `ip`.
    pub fn find_except(&self, ip: usize) -> Option<&ExceptRange> {
        let mut cursor = self.except;
        while let Some(index) = cursor {
            let range = self.excepts.get(index)?;
            if range.covers(ip) {
                return Some(range);
            }
            cursor = range.next;
        }
        None
    }

    pub fn display_name(&self) -> &str {
        match (&self.name, &self.script) {
            (Some(name), _) => name,
            (None, Some(script)) => script,
            (None, None) => "<script>",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_constants_are_shared() {
        let mut code = ByteCode::new();
        let a = code.add_constant(Value::string("x"));
        let b = code.add_constant(Value::Integer(1));
        let c = code.add_constant(Value::string("x"));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(code.constants.len(), 2);
    }

    #[test]
    fn test_encode_instructions() {
        let mut code = ByteCode::new();
        code.write(Op::Int(3), 1);
        code.write(Op::Jump(2), 1);
        code.write(Op::Echo, 2);
        let bytes = code.encode().unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(ByteCode::decode(&bytes).unwrap(), code.instructions);
    }

    #[test]
    fn test_find_except_prefers_inner_range() {
        let mut function = Function::new(Some("f".to_string()), None);
        function.excepts.push(ExceptRange { start: 0, end: 10, stack: 1, next: None });
        function.excepts.push(ExceptRange { start: 2, end: 5, stack: 2, next: Some(0) });
        function.except = Some(1);

        assert_eq!(function.find_except(3).map(|r| r.stack), Some(2));
        assert_eq!(function.find_except(7).map(|r| r.stack), Some(1));
        assert_eq!(function.find_except(10), None);
    }
}
