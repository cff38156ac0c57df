//! Runtime values shared by the compiler and the VM.

pub mod value;
