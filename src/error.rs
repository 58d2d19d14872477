use std::{error::Error, fmt};

use backtrace::Backtrace;

/// Stable numeric error codes, part of the public API. The values must
/// never be reordered, callers match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidParameter = 1,
    InvalidFileHeader = 2,
    InvalidFileVersion = 3,
    OutOfMemory = 4,
    IoError = 5,
    KeyNotFound = 6,
    DuplicateKey = 7,
    IntegrityViolated = 8,
    LimitsReached = 9,
    NeedRecovery = 10,
    NetworkError = 11,
    TxnConflict = 12,
    CursorStillOpen = 13,
    DatabaseAlreadyExists = 14,
    DatabaseNotFound = 15,
    PluginNotFound = 16,
    ParserError = 17,
    NotImplemented = 18,
}

impl ErrorCode {
    pub fn value(&self) -> i32 {
        *self as i32
    }

    fn name(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "invalid-parameter",
            ErrorCode::InvalidFileHeader => "invalid-file-header",
            ErrorCode::InvalidFileVersion => "invalid-file-version",
            ErrorCode::OutOfMemory => "out-of-memory",
            ErrorCode::IoError => "io-error",
            ErrorCode::KeyNotFound => "key-not-found",
            ErrorCode::DuplicateKey => "duplicate-key",
            ErrorCode::IntegrityViolated => "integrity-violated",
            ErrorCode::LimitsReached => "limits-reached",
            ErrorCode::NeedRecovery => "need-recovery",
            ErrorCode::NetworkError => "network-error",
            ErrorCode::TxnConflict => "txn-conflict",
            ErrorCode::CursorStillOpen => "cursor-still-open",
            ErrorCode::DatabaseAlreadyExists => "database-already-exists",
            ErrorCode::DatabaseNotFound => "database-not-found",
            ErrorCode::PluginNotFound => "plugin-not-found",
            ErrorCode::ParserError => "parser-error",
            ErrorCode::NotImplemented => "not-implemented",
        }
    }
}

#[derive(Debug)]
pub struct OakError {
    code: ErrorCode,
    details: String,
}

impl OakError {
    pub fn new(code: ErrorCode, msg: &str) -> OakError {
        OakError {
            code,
            details: msg.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn io(msg: &str) -> OakError {
        Self::new(ErrorCode::IoError, msg)
    }

    pub fn invalid_parameter(msg: &str) -> OakError {
        Self::new(ErrorCode::InvalidParameter, msg)
    }

    pub fn key_not_found() -> OakError {
        Self::new(ErrorCode::KeyNotFound, "key not found")
    }

    pub fn duplicate_key() -> OakError {
        Self::new(ErrorCode::DuplicateKey, "key already exists")
    }

    pub fn txn_conflict() -> OakError {
        Self::new(
            ErrorCode::TxnConflict,
            "key is modified by another live transaction",
        )
    }

    pub fn integrity(msg: &str) -> OakError {
        Self::new(ErrorCode::IntegrityViolated, msg)
    }

    pub fn show_backtrace(&self) {
        let bt = Backtrace::new();
        log::error!("{}\nbacktrace: {:?}", self, bt);
    }
}

impl fmt::Display for OakError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.details.is_empty() {
            write!(f, "{}", self.code.name())
        } else {
            write!(f, "{}: {}", self.code.name(), self.details)
        }
    }
}

impl Error for OakError {}

impl From<std::io::Error> for OakError {
    fn from(err: std::io::Error) -> Self {
        OakError::new(ErrorCode::IoError, &err.to_string())
    }
}
