//! Success/failure judgement over operation payloads.

use busbar_sf_client::ApiResult;

use crate::operation::Outcome;

/// A payload that can say whether it represents a failure.
pub trait Envelope {
    fn is_failure(&self) -> bool;

    /// One-line description of the failure, `None` on success.
    fn error_summary(&self) -> Option<String>;
}

impl Envelope for ApiResult {
    fn is_failure(&self) -> bool {
        ApiResult::is_failure(self)
    }

    fn error_summary(&self) -> Option<String> {
        self.error_message()
    }
}

impl<T, E: std::fmt::Display> Envelope for Result<T, E> {
    fn is_failure(&self) -> bool {
        self.is_err()
    }

    fn error_summary(&self) -> Option<String> {
        self.as_ref().err().map(ToString::to_string)
    }
}

impl<T: Envelope> Envelope for Outcome<T> {
    fn is_failure(&self) -> bool {
        match self {
            Outcome::Completed(value) => value.is_failure(),
            _ => true,
        }
    }

    fn error_summary(&self) -> Option<String> {
        match self {
            Outcome::Completed(value) => value.error_summary(),
            Outcome::Panicked(message) => Some(format!("worker panicked: {message}")),
            Outcome::Cancelled => Some("cancelled".to_string()),
            Outcome::TimedOut => Some("timed out".to_string()),
        }
    }
}
