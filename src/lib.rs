//! # Hymn
//!
//! A small dynamically typed scripting language. Source is compiled in a
//! single pass to stack bytecode and run on [`Hymn`], a virtual machine
//! with shared arrays and tables, exceptions and script imports.
//!
//! ```no_run
//! let mut vm = hymn::Hymn::new();
//! vm.interpret("echo 1 + 2").unwrap();
//! ```

pub mod bytecode;
pub mod error;
pub mod frontend;
pub mod harness;
pub mod lang;
pub mod runtime;

pub use bytecode::compile::compile;
pub use bytecode::disasm::disassemble;
pub use error::HymnError;
pub use lang::value::Value;
pub use runtime::{Hymn, NativeCall, RuntimeError, VmConfig};
