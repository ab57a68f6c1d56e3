//! Error types for sf-orchestrator.

/// Result type alias for sf-orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-orchestrator operations.
#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional source error.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Create a new error with the given kind.
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    /// Create a new error with the given kind and source.
    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The operation was cancelled before it finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation ran past its configured timeout.
    #[error("Operation timed out")]
    TimedOut,

    /// The worker panicked.
    #[error("Worker panicked: {0}")]
    Panicked(String),

    /// The control loop has shut down; nothing can be scheduled.
    #[error("Control loop is closed")]
    LoopClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            Error::new(ErrorKind::Panicked("boom".into())).to_string(),
            "Worker panicked: boom"
        );
        assert_eq!(Error::new(ErrorKind::LoopClosed).to_string(), "Control loop is closed");
    }
}
