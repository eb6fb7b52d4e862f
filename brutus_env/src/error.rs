//! Error types for the Brutus engine abstraction.

use thiserror::Error;

/// Errors that can occur while driving an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine program could not be launched
    #[error("Failed to spawn engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or waiting on the engine failed
    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `read_line`/`signal_end` called before `start`
    #[error("Engine not started")]
    NotStarted,

    /// `start` called twice on one engine
    #[error("Engine already started")]
    AlreadyStarted,

    /// The engine rejected its initial conditions
    #[error("Invalid engine payload: {0}")]
    InvalidPayload(String),
}

impl EngineError {
    /// Creates a spawn error.
    pub fn spawn(program: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.to_string(),
            source,
        }
    }

    /// Creates an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self::InvalidPayload(msg.into())
    }
}
