use std::io;

use thiserror::Error;

use crate::attribute::FileAttribute;

/// The helper's response does not follow the attribute protocol.
///
/// Line numbers are 1-based and count physical lines of the current response.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("line {line}: response ended before {attribute} was complete")]
    Incomplete {
        line: usize,
        attribute: FileAttribute,
    },

    #[error("line {line}: invalid {attribute} value {value:?}")]
    InvalidValue {
        line: usize,
        attribute: FileAttribute,
        value: String,
    },

    #[error("line {line}: malformed exit line {value:?}")]
    InvalidExit { line: usize, value: String },

    #[error("line {line}: expected an exit line, got {value:?}")]
    UnexpectedLine { line: usize, value: String },

    #[error("line {line}: response ended without an exit line")]
    MissingExit { line: usize },

    #[error("line {line}: no identity known for id {id}")]
    UnresolvedIdentity { line: usize, id: u32 },

    #[error("reading response: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// The offending line, when the error is tied to one.
    pub fn line(&self) -> Option<usize> {
        match self {
            DecodeError::Incomplete { line, .. }
            | DecodeError::InvalidValue { line, .. }
            | DecodeError::InvalidExit { line, .. }
            | DecodeError::UnexpectedLine { line, .. }
            | DecodeError::MissingExit { line }
            | DecodeError::UnresolvedIdentity { line, .. } => Some(*line),
            DecodeError::Io(_) => None,
        }
    }
}

/// A request cannot be framed safely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("argument {index} of {command} contains a newline")]
    NewlineInArgument { command: String, index: usize },

    #[error("invalid command name {0:?}")]
    InvalidCommand(String),

    #[error("boundary must not be empty")]
    EmptyBoundary,
}
