use quire_core::PrepareError;
use thiserror::Error;

use crate::address::NetworkResolutionError;
use crate::compiler::CompileError;

pub type Result<T> = std::result::Result<T, DevError>;

#[derive(Debug, Error)]
pub enum DevError {
    /// The first site preparation failed; there is nothing to serve.
    #[error("Failed to prepare site: {0}")]
    Initialization(#[source] PrepareError),

    /// A later preparation failed. Logged, never returned from the server.
    #[error("Failed to regenerate site after {reason}: {source}")]
    Regeneration {
        reason: String,
        #[source]
        source: PrepareError,
    },

    #[error(transparent)]
    NetworkResolution(#[from] NetworkResolutionError),

    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
