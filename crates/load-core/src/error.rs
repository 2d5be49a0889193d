//! Error types for the load pipeline.

use thiserror::Error;

/// Classification of backend collaborator failures.
///
/// Backends report a structured kind instead of free-form error text so
/// the run controller can recognize the one recoverable case (an
/// idempotent create) without matching on driver messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// The database or schema object already exists.
    AlreadyExists,
    /// Failure to establish or keep a connection/session.
    Connection,
    /// Any other failed backend operation.
    Operation,
}

/// Errors that can occur during a load run.
///
/// Everything here is fatal: the run controller stops all workers and
/// reports the first error. The single built-in recovery path is
/// [`BackendErrorKind::AlreadyExists`] during database creation.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Malformed header or data row in the input stream.
    #[error("protocol error at line {line}: {message}")]
    Protocol { line: u64, message: String },

    /// Invalid combination of pipeline options, detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure reported by the backend collaborator.
    #[error("backend error: {message}")]
    Backend {
        kind: BackendErrorKind,
        message: String,
    },

    /// IO error while reading the input stream.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    /// Build a protocol error for the given input line.
    pub fn protocol(line: u64, message: impl Into<String>) -> Self {
        LoadError::Protocol {
            line,
            message: message.into(),
        }
    }

    /// Build a backend error of the given kind.
    pub fn backend(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        LoadError::Backend {
            kind,
            message: message.into(),
        }
    }

    /// Whether this is an "already exists" response from the backend.
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            LoadError::Backend {
                kind: BackendErrorKind::AlreadyExists,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_exists_detection() {
        let err = LoadError::backend(BackendErrorKind::AlreadyExists, "database 'bench' exists");
        assert!(err.is_already_exists());

        let err = LoadError::backend(BackendErrorKind::Operation, "insert failed");
        assert!(!err.is_already_exists());

        let err = LoadError::Config("zero workers".into());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = LoadError::protocol(3, "missing blank line after header");
        assert_eq!(
            err.to_string(),
            "protocol error at line 3: missing blank line after header"
        );
    }
}
