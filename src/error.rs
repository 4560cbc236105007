//! Error types for querystage.
//!
//! Defines the main error enum used throughout the crate. Every variant maps
//! onto one failure class a script run can report back to its caller.

use thiserror::Error;

/// Main error type for querystage operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The remote session could not be opened (host unreachable, credentials rejected).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The session transport broke while a statement was in flight.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The query service rejected the statement.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A local input named by a statement is missing or unusable.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Any other failure while executing a statement.
    #[error("Execution error: {0}")]
    Execution(String),

    /// The job was cancelled before its result was delivered.
    #[error("Job cancelled: {0}")]
    Cancelled(String),

    /// File-system failures inside the staging area.
    #[error("Staging error: {0}")]
    Staging(String),

    /// Configuration errors (invalid config file, bad values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, closed channels, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StageError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a transport failure with the given message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a parse error with the given message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Creates an invalid input error with the given message.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an execution error with the given message.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    /// Creates a cancellation error for the given job.
    pub fn cancelled(job_id: impl Into<String>) -> Self {
        Self::Cancelled(job_id.into())
    }

    /// Creates a staging error with the given message.
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Transport(_) => "Transport Failure",
            Self::Parse(_) => "Parse Error",
            Self::InvalidInput(_) => "Invalid Input",
            Self::Execution(_) => "Execution Error",
            Self::Cancelled(_) => "Cancelled",
            Self::Staging(_) => "Staging Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the bare message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Connection(m)
            | Self::Transport(m)
            | Self::Parse(m)
            | Self::InvalidInput(m)
            | Self::Execution(m)
            | Self::Cancelled(m)
            | Self::Staging(m)
            | Self::Config(m)
            | Self::Internal(m) => m,
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        Self::Staging(e.to_string())
    }
}

/// Result type alias using StageError.
pub type Result<T> = std::result::Result<T, StageError>;
