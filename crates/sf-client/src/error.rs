//! Error types for sf-client.

use std::time::Duration;

use crate::envelope::ApiFault;

/// Result type alias for sf-client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-client operations.
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

    /// Returns true if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the retry-after duration if this is a rate limit error.
    pub fn retry_after(&self) -> Option<Duration> {
        match &self.kind {
            ErrorKind::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// The HTTP status this error is reported under in an [`crate::ApiResult`].
    ///
    /// Errors that never produced a response are mapped onto the nearest
    /// HTTP status so every failure lands above the success threshold.
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            ErrorKind::Http { status, .. } => *status,
            ErrorKind::Api { status, .. } => *status,
            ErrorKind::RateLimited { .. } => 429,
            ErrorKind::Authentication(_) => 401,
            ErrorKind::Timeout => 408,
            ErrorKind::Connection(_) | ErrorKind::RetriesExhausted { .. } => 503,
            ErrorKind::Config(_) | ErrorKind::InvalidUrl(_) => 400,
            ErrorKind::Json(_)
            | ErrorKind::SoapFault { .. }
            | ErrorKind::InvalidResponse(_)
            | ErrorKind::JobFailed(_)
            | ErrorKind::Other(_) => 500,
        }
    }

    /// The structured fault carried into the envelope.
    pub fn fault(&self) -> ApiFault {
        match &self.kind {
            ErrorKind::Api { fault, .. } => fault.clone(),
            ErrorKind::SoapFault { code, message } => ApiFault::new(code.clone(), message.clone()),
            ErrorKind::Authentication(message) => ApiFault::new("INVALID_LOGIN", message.clone()),
            ErrorKind::Timeout => ApiFault::new("TIMEOUT", self.kind.to_string()),
            ErrorKind::Connection(_) => ApiFault::new("CONNECTION_ERROR", self.kind.to_string()),
            ErrorKind::JobFailed(message) => ApiFault::new("JOB_FAILED", message.clone()),
            other => ApiFault::new("CLIENT_ERROR", other.to_string()),
        }
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// HTTP request failed with a status and no structured body.
    #[error("HTTP error: {status} {message}")]
    Http { status: u16, message: String },

    /// Salesforce returned a structured error body.
    #[error("Salesforce API error ({status}): {fault}")]
    Api { status: u16, fault: ApiFault },

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limited{}", retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// Login or session failure.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Request timeout.
    #[error("Request timeout")]
    Timeout,

    /// Connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// SOAP fault from the Metadata API.
    #[error("SOAP fault: {code} - {message}")]
    SoapFault { code: String, message: String },

    /// Response did not contain what the call expects.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// An asynchronous server-side job (bulk, test run, deploy) ended unsuccessfully.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// All retries exhausted.
    #[error("All {attempts} retry attempts exhausted")]
    RetriesExhausted { attempts: u32 },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl ErrorKind {
    /// Returns true if this error kind is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            ErrorKind::RateLimited { .. } => true,
            ErrorKind::Timeout => true,
            ErrorKind::Connection(_) => true,
            ErrorKind::Http { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Check if an HTTP status code is typically retryable.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            ErrorKind::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            ErrorKind::Other(err.to_string())
        };

        Error::with_source(kind, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::with_source(ErrorKind::InvalidUrl(err.to_string()), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(Error::new(ErrorKind::Timeout).status_code(), 408);
        assert_eq!(
            Error::new(ErrorKind::Connection("refused".into())).status_code(),
            503
        );
        assert_eq!(
            Error::new(ErrorKind::Http {
                status: 404,
                message: "gone".into()
            })
            .status_code(),
            404
        );
        assert_eq!(Error::new(ErrorKind::Json("eof".into())).status_code(), 500);
    }

    #[test]
    fn test_every_error_is_a_failure_status() {
        let kinds = vec![
            ErrorKind::Timeout,
            ErrorKind::Connection("x".into()),
            ErrorKind::Json("x".into()),
            ErrorKind::Config("x".into()),
            ErrorKind::SoapFault {
                code: "sf:INVALID_SESSION_ID".into(),
                message: "expired".into(),
            },
            ErrorKind::JobFailed("x".into()),
            ErrorKind::RetriesExhausted { attempts: 3 },
        ];
        for kind in kinds {
            let err = Error::new(kind);
            assert!(err.status_code() > 399, "{err} mapped below threshold");
        }
    }

    #[test]
    fn test_fault_carries_api_error_code() {
        let err = Error::new(ErrorKind::Api {
            status: 400,
            fault: ApiFault::new("INVALID_FIELD", "No such column 'foo'"),
        });
        assert_eq!(err.fault().error_code, "INVALID_FIELD");
        assert!(err.to_string().contains("INVALID_FIELD"));

        let err = Error::new(ErrorKind::SoapFault {
            code: "sf:INVALID_SESSION_ID".into(),
            message: "Invalid Session ID".into(),
        });
        assert_eq!(err.fault().error_code, "sf:INVALID_SESSION_ID");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::new(ErrorKind::RateLimited { retry_after: None }).is_retryable());
        assert!(Error::new(ErrorKind::Timeout).is_retryable());
        assert!(Error::new(ErrorKind::Http {
            status: 503,
            message: "unavailable".into()
        })
        .is_retryable());
        assert!(!Error::new(ErrorKind::Http {
            status: 400,
            message: "bad".into()
        })
        .is_retryable());
        assert!(!Error::new(ErrorKind::Authentication("bad password".into())).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err.kind, ErrorKind::Json(_)));
        assert!(err.source.is_some());
    }
}
