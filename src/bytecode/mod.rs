pub mod compile;
pub mod compile_error;
pub mod disasm;
pub mod ir;
pub mod op;
pub mod rules;

pub use ir::{ByteCode, ExceptRange, Function};
pub use op::Op;
