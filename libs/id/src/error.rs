//! Error types for identifier parsing and validation.

use thiserror::Error;

/// Errors that can occur when parsing or validating identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    /// The identifier string is empty.
    #[error("{kind} cannot be empty")]
    Empty { kind: &'static str },

    /// The identifier is shorter than the kind allows.
    #[error("{kind} `{value}' is too short: minimum is {min} characters")]
    TooShort {
        kind: &'static str,
        value: String,
        min: usize,
    },

    /// The identifier is longer than the kind allows.
    #[error("{kind} `{value}' is too long: maximum is {max} characters")]
    TooLong {
        kind: &'static str,
        value: String,
        max: usize,
    },

    /// The identifier contains a character outside the allowed set.
    #[error("{kind} `{value}' contains invalid character {ch:?}")]
    InvalidCharacter {
        kind: &'static str,
        value: String,
        ch: char,
    },

    /// The identifier format is invalid.
    #[error("invalid {kind} `{value}': {message}")]
    InvalidFormat {
        kind: &'static str,
        value: String,
        message: String,
    },
}

impl IdError {
    /// Returns true if this error indicates the input was empty.
    pub fn is_empty(&self) -> bool {
        matches!(self, IdError::Empty { .. })
    }

    /// Returns the kind of identifier that failed validation.
    pub fn kind(&self) -> &'static str {
        match self {
            IdError::Empty { kind }
            | IdError::TooShort { kind, .. }
            | IdError::TooLong { kind, .. }
            | IdError::InvalidCharacter { kind, .. }
            | IdError::InvalidFormat { kind, .. } => kind,
        }
    }
}
