use std::io;

use fsbridge_protocol::{DecodeError, RequestError};
use thiserror::Error;

/// Failures of the session and process layer.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("helper did not become ready: {0}")]
    NotReady(String),

    #[error("helper output ended before the response boundary")]
    UnexpectedEof,

    #[error("protocol violation: {0}")]
    Protocol(#[from] DecodeError),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("session is closed")]
    Closed,

    #[error("item not available (exit status {0})")]
    ItemNotAvailable(i32),

    #[error("helper exited with status {0}")]
    HelperExitStatus(i32),

    #[error("no session cache entry for {0}")]
    MissingCacheEntry(String),

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("failed to spawn helper {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("worker task failed: {0}")]
    Worker(String),
}

impl BridgeError {
    /// The session can no longer be trusted to be in sync with its helper and
    /// must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::NotReady(_)
                | BridgeError::UnexpectedEof
                | BridgeError::Protocol(_)
                | BridgeError::Closed
                | BridgeError::Io(_)
                | BridgeError::Spawn { .. }
        )
    }
}

/// Filesystem-level failures derived from helper exit codes.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("not found (status {0})")]
    NotFound(i32),

    #[error("permission denied (status {0})")]
    PermissionDenied(i32),

    #[error("already exists (status {0})")]
    AlreadyExists(i32),

    #[error("bad request (status {0})")]
    BadRequest(i32),

    #[error("I/O failure (status {0})")]
    Io(i32),

    #[error("critical failure (status {0})")]
    Critical(i32),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl FsError {
    /// Classify a non-zero helper status. Sign is ignored.
    pub fn from_status(code: i32) -> Self {
        match code.unsigned_abs() {
            2 | 93 => FsError::NotFound(code),
            13 => FsError::PermissionDenied(code),
            17 => FsError::AlreadyExists(code),
            1 | 20 | 21 | 22 => FsError::BadRequest(code),
            5 | 6 | 16 | 19 | 23 | 24 | 27 | 28 | 30 | 31 => FsError::Io(code),
            _ => FsError::Critical(code),
        }
    }

    /// Short machine-readable name, used in CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            FsError::NotFound(_) => "NOT_FOUND",
            FsError::PermissionDenied(_) => "PERMISSION_DENIED",
            FsError::AlreadyExists(_) => "ALREADY_EXISTS",
            FsError::BadRequest(_) => "BAD_REQUEST",
            FsError::Io(_) => "IO_ERROR",
            FsError::Critical(_) => "CRITICAL_ERROR",
            FsError::Bridge(_) => "BRIDGE_ERROR",
        }
    }
}

/// Value of a command together with the helper's final status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsResult<T> {
    pub status: i32,
    pub value: T,
}

impl<T> FsResult<T> {
    pub fn new(status: i32, value: T) -> Self {
        Self { status, value }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 0
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FsResult<U> {
        FsResult {
            status: self.status,
            value: f(self.value),
        }
    }

    /// Turn a non-zero status into an [`FsError`].
    pub fn into_result(self) -> Result<T, FsError> {
        if self.status == 0 {
            Ok(self.value)
        } else {
            Err(FsError::from_status(self.status))
        }
    }
}

impl<T> FsResult<Option<T>> {
    /// The single item a command reported, or
    /// [`BridgeError::ItemNotAvailable`] with the status the helper gave
    /// instead.
    pub fn into_item(self) -> Result<T> {
        match self.value {
            Some(value) if self.status == 0 => Ok(value),
            _ => Err(BridgeError::ItemNotAvailable(self.status)),
        }
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
