//! Error types for zypperpkg.
//!
//! Module functions report failures through [`ModuleError`](crate::modules::ModuleError);
//! this module defines the crate-level error returned by the registry and
//! mapped to an exit status by the CLI.

use thiserror::Error;

use crate::modules::ModuleError;

/// Result type alias for zypperpkg operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for zypperpkg.
#[derive(Error, Debug)]
pub enum Error {
    /// Function not found in the registry, or its module refused to load.
    #[error("'{0}' is not available")]
    FunctionNotFound(String),

    /// A module function failed.
    #[error(transparent)]
    Module(#[from] ModuleError),
}

impl Error {
    /// Structured payload attached to a failed command, if any.
    pub fn info(&self) -> Option<&serde_json::Value> {
        match self {
            Error::Module(err) => err.info(),
            _ => None,
        }
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Module(ModuleError::CommandExecution { .. }) => 2,
            Error::Module(ModuleError::Invocation(_))
            | Error::Module(ModuleError::InvalidParameter(_))
            | Error::Module(ModuleError::MissingParameter(_)) => 3,
            Error::FunctionNotFound(_) => 4,
            Error::Module(_) => 1,
        }
    }
}
