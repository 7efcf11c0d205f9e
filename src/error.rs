//! Error types for the scheduler and cache
//!
//! Provides a tagged error taxonomy using thiserror. Retry decisions are made
//! from the closed `ErrorKind` set rather than by inspecting error messages.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::scheduler::JobId;

// == Error Kind ==
/// Closed classification of failure causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Unavailable,
    ResourceExhausted,
    Internal,
    PermissionDenied,
    InvalidArgument,
    NotFound,
    Serialization,
    Cancelled,
    Other,
}

impl ErrorKind {
    /// Returns true for the transient kinds that a retry policy may act on.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::Unavailable
                | ErrorKind::ResourceExhausted
                | ErrorKind::Internal
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ResourceExhausted => "resource-exhausted",
            ErrorKind::Internal => "internal",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::InvalidArgument => "invalid-argument",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

// == Job Error ==
/// Terminal or per-attempt failure of a scheduled job.
///
/// Cloneable because a single outcome may be delivered to several handles
/// observing the same de-duplicated job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Transient failure, eligible for the job's retry policy
    #[error("retryable {kind} error: {message}")]
    Retryable { kind: ErrorKind, message: String },

    /// Permanent failure, the job fails without further attempts
    #[error("fatal {kind} error: {message}")]
    Fatal { kind: ErrorKind, message: String },

    /// The attempt exceeded its configured timeout
    #[error("job timed out after {0:?}")]
    TimedOut(Duration),

    /// The job was cancelled before it could complete
    #[error("job cancelled: {0}")]
    Cancelled(JobId),

    /// The scheduler no longer accepts work
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// A de-duplicated handle was requested with a different result type
    #[error("job {0} produces a different result type")]
    ResultType(JobId),
}

impl JobError {
    /// Builds an error, tagging it retryable or fatal from its kind.
    pub fn classify(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        if kind.is_retryable() {
            JobError::Retryable { kind, message }
        } else {
            JobError::Fatal { kind, message }
        }
    }

    /// Shorthand for a transient failure.
    pub fn retryable(kind: ErrorKind, message: impl Into<String>) -> Self {
        JobError::Retryable {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for a permanent failure.
    pub fn fatal(kind: ErrorKind, message: impl Into<String>) -> Self {
        JobError::Fatal {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Retryable { kind, .. } | JobError::Fatal { kind, .. } => *kind,
            JobError::TimedOut(_) => ErrorKind::Timeout,
            JobError::Cancelled(_) => ErrorKind::Cancelled,
            JobError::ShuttingDown => ErrorKind::Unavailable,
            JobError::ResultType(_) => ErrorKind::InvalidArgument,
        }
    }

    /// Whether a retry policy may schedule another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, JobError::Retryable { .. } | JobError::TimedOut(_))
    }
}

// == Store Error ==
/// Failure reported by a persistent store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("store quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("store permission denied: {0}")]
    PermissionDenied(String),

    #[error("corrupt store entry: {0}")]
    Corrupt(String),

    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Unavailable(_) => ErrorKind::Unavailable,
            StoreError::Timeout(_) => ErrorKind::Timeout,
            StoreError::QuotaExceeded(_) => ErrorKind::ResourceExhausted,
            StoreError::Transient(_) => ErrorKind::Internal,
            StoreError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            StoreError::Corrupt(_) => ErrorKind::InvalidArgument,
            StoreError::Serialization(_) => ErrorKind::Serialization,
        }
    }
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        JobError::classify(err.kind(), err.to_string())
    }
}

// == Cache Error ==
/// Caller-facing errors of the cache.
///
/// Persistent tier failures never appear here; they are logged and absorbed.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key is empty or too long
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Value cannot be represented in persistable form
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
