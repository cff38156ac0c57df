use std::path::PathBuf;

use crate::bytecode::compile_error::CompileError;
use crate::runtime::runtime_error::RuntimeError;

/// Everything an interpreter entry point can fail with.
#[derive(Debug, thiserror::Error)]
pub enum HymnError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HymnError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HymnError::Io {
            path: path.into(),
            source,
        }
    }
}
