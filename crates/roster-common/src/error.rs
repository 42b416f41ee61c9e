//! Error types shared across the roster workspace

use thiserror::Error;

/// Result type alias for roster operations
pub type Result<T> = std::result::Result<T, RosterError>;

/// Main error type for shared roster functionality
#[derive(Error, Debug)]
pub enum RosterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RosterError {
    /// Create a configuration error from any displayable value
    pub fn config(msg: impl std::fmt::Display) -> Self {
        RosterError::Config(msg.to_string())
    }

    /// Create a parse error from any displayable value
    pub fn parse(msg: impl std::fmt::Display) -> Self {
        RosterError::Parse(msg.to_string())
    }
}
