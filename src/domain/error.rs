use crate::core::session::state::TransitionError;
use thiserror::Error;

/// GattPool unified error type
#[derive(Error, Debug)]
pub enum GattPoolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Session pool is already initialized")]
    AlreadyInitialized,

    #[error("Session {0} is not held by a caller")]
    SessionNotHeld(usize),

    #[error("Command rejected: {0}")]
    Transition(#[from] TransitionError),

    #[error("Failed to write command: {0}")]
    CommandWrite(#[source] std::io::Error),

    #[error("Could not connect to {address}")]
    ConnectFailed { address: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Output error: {0}")]
    Output(String),
}

impl GattPoolError {
    /// True when the caller may simply retry the same call later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GattPoolError::Transition(e) if e.is_retryable())
    }
}

pub type GattPoolResult<T> = Result<T, GattPoolError>;
