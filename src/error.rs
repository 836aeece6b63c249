//! Error taxonomy shared by the store, engine, operators, and driver.
//!
//! Every failure that can reach the CLI is a [`DesignError`]; its [`ErrorKind`]
//! is what gets written to the event log and picks the process exit code.
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

pub type Result<T, E = DesignError> = std::result::Result<T, E>;

/// Exit code for an operation that committed some but not all outputs.
pub const EXIT_PARTIAL: i32 = 3;

#[derive(Debug, Error)]
pub enum DesignError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("invalid mode {0:?} (expected DNA, VARIATIONS, or FEEDBACK)")]
    InvalidMode(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("auth required: {0}")]
    AuthRequired(String),
    #[error("timed out after {waited_s}s waiting for {what}")]
    Timeout { what: String, waited_s: u64 },
    #[error("inconsistent output: expected {expected} new items, observed {observed}")]
    Inconsistent { expected: usize, observed: usize },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("external: {0}")]
    External(String),
}

/// Serializable discriminant of [`DesignError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidMode,
    InvalidInput,
    PreconditionFailed,
    AuthRequired,
    Timeout,
    Inconsistent,
    Io,
    External,
}

impl DesignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DesignError::NotFound(_) => ErrorKind::NotFound,
            DesignError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            DesignError::InvalidMode(_) => ErrorKind::InvalidMode,
            DesignError::InvalidInput(_) => ErrorKind::InvalidInput,
            DesignError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            DesignError::AuthRequired(_) => ErrorKind::AuthRequired,
            DesignError::Timeout { .. } => ErrorKind::Timeout,
            DesignError::Inconsistent { .. } => ErrorKind::Inconsistent,
            DesignError::Io { .. } | DesignError::Json { .. } => ErrorKind::Io,
            DesignError::External(_) => ErrorKind::External,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        DesignError::PreconditionFailed(message.into())
    }

    pub fn external(message: impl Into<String>) -> Self {
        DesignError::External(message.into())
    }
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::InvalidMode => "invalid_mode",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Inconsistent => "inconsistent",
            ErrorKind::Io => "io",
            ErrorKind::External => "external",
        }
    }

    /// Process exit code used by the CLI. `0` and [`EXIT_PARTIAL`] are reserved
    /// for successful and partial results.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorKind::Io | ErrorKind::External => 1,
            ErrorKind::InvalidMode | ErrorKind::InvalidInput => 2,
            ErrorKind::AuthRequired => 4,
            ErrorKind::PreconditionFailed => 5,
            ErrorKind::Timeout => 6,
            ErrorKind::Inconsistent => 7,
            ErrorKind::NotFound => 8,
            ErrorKind::AlreadyExists => 9,
        }
    }
}

/// `with_context` for results carrying raw `io::Error`s.
pub trait IoContext<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| DesignError::Io {
            context: context().into(),
            source,
        })
    }
}

/// `with_context` for serde_json results.
pub trait JsonContext<T> {
    fn json_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> JsonContext<T> for std::result::Result<T, serde_json::Error> {
    fn json_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| DesignError::Json {
            context: context().into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_for_branchable_kinds() {
        let kinds = [
            ErrorKind::AuthRequired,
            ErrorKind::PreconditionFailed,
            ErrorKind::Timeout,
            ErrorKind::Inconsistent,
            ErrorKind::NotFound,
            ErrorKind::AlreadyExists,
        ];
        let mut codes: Vec<i32> = kinds.iter().map(|kind| kind.exit_code()).collect();
        codes.push(EXIT_PARTIAL);
        codes.push(ErrorKind::External.exit_code());
        let mut deduped = codes.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len(), "exit codes collide: {codes:?}");
        assert!(!codes.contains(&0));
    }

    #[test]
    fn io_errors_keep_their_context() {
        let err = Err::<(), _>(io::Error::new(io::ErrorKind::NotFound, "gone"))
            .io_context(|| "read designrun.json")
            .expect_err("io error");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.to_string(), "read designrun.json: gone");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let text = serde_json::to_string(&ErrorKind::PreconditionFailed).expect("serialize");
        assert_eq!(text, "\"precondition_failed\"");
        assert_eq!(ErrorKind::PreconditionFailed.as_str(), "precondition_failed");
    }
}
