//! Error types for session automation, batch execution and scheduling.
//!
//! Every failure the crate can report is a [`PlinkError`]. Per-device
//! failures inside a batch never escape as errors; they are folded into a
//! failed [`ExecutionResult`](crate::batch::ExecutionResult) instead.

use thiserror::Error;

/// Errors that can occur while driving devices, running batches or managing triggers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlinkError {
    /// The transport could not reach or authenticate against the device.
    ///
    /// Raised while connecting, authenticating or opening the interactive
    /// shell, before any command has been sent.
    #[error("SSH connection failed: {0}")]
    Connection(String),

    /// The interactive channel failed after the shell was opened.
    #[error("session failed: {0}")]
    Session(String),

    /// The transcript was captured but could not be persisted.
    #[error("Failed to save log: {0}")]
    LogPersist(String),

    /// Input rejected before any execution started.
    ///
    /// Covers empty device or command lists, incomplete credentials and
    /// malformed schedules.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A trigger with the same name already exists.
    #[error("schedule name '{0}' already exists")]
    DuplicateName(String),

    /// No trigger with the given id is known.
    #[error("trigger not found: {0}")]
    NotFound(String),

    /// A batch is already running on this orchestrator.
    #[error("another execution is already running")]
    AlreadyRunning,

    /// Internal failures such as poisoned locks or encoding errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PlinkError {
    /// Returns true if the error happened before the device session was established.
    pub fn is_connection(&self) -> bool {
        matches!(self, PlinkError::Connection(_))
    }
}

#[cfg(test)]
mod tests {
    use super::PlinkError;

    #[test]
    fn log_persist_message_has_save_prefix() {
        let err = PlinkError::LogPersist("disk full".to_string());
        assert_eq!(err.to_string(), "Failed to save log: disk full");
    }

    #[test]
    fn only_connection_errors_are_classified_as_connection() {
        assert!(PlinkError::Connection("refused".to_string()).is_connection());
        assert!(!PlinkError::Session("eof".to_string()).is_connection());
    }
}
