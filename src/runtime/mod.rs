pub mod arith;
pub mod collections;
pub mod import;
pub mod runtime_error;
pub mod vm;

pub use runtime_error::RuntimeError;
pub use vm::{Hymn, NativeCall, VmConfig};
