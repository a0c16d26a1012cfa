//! # Session Error Types Module
//!
//! This module defines the user-recoverable error kinds a session can hit.
//! Every kind maps to a localized message; none of them ends the process.

/// Error kinds reported back to the user by the session state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Teacher authentication input did not match the shared secret
    InvalidTeacherCode,
    /// No test exists under the given code
    UnknownTestCode(String),
    /// The test exists but its key or feedback mode is not set yet
    TestNotReady(String),
    /// Submitted answer string length differs from the key length
    AnswerLengthMismatch { expected: usize, actual: usize },
    /// An upload stage received something that is not a usable file
    MissingAttachment,
    /// The storage backend failed or the circuit breaker is open
    StorageUnavailable(String),
}

impl SessionError {
    /// Localization key of the message shown to the user
    pub fn message_key(&self) -> &'static str {
        match self {
            SessionError::InvalidTeacherCode => "error-invalid-teacher-code",
            SessionError::UnknownTestCode(_) => "error-unknown-test-code",
            SessionError::TestNotReady(_) => "error-test-not-ready",
            SessionError::AnswerLengthMismatch { .. } => "error-answer-length",
            SessionError::MissingAttachment => "error-missing-attachment",
            SessionError::StorageUnavailable(_) => "error-storage-unavailable",
        }
    }

    /// Whether the current operation is aborted rather than re-prompted
    pub fn aborts_operation(&self) -> bool {
        matches!(self, SessionError::StorageUnavailable(_))
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidTeacherCode => write!(f, "Invalid teacher code"),
            SessionError::UnknownTestCode(code) => write!(f, "Unknown test code: {code}"),
            SessionError::TestNotReady(code) => write!(f, "Test not ready: {code}"),
            SessionError::AnswerLengthMismatch { expected, actual } => write!(
                f,
                "Answer length mismatch: expected {expected}, got {actual}"
            ),
            SessionError::MissingAttachment => write!(f, "Missing attachment"),
            SessionError::StorageUnavailable(msg) => write!(f, "Storage unavailable: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::StorageUnavailable(err.to_string())
    }
}
