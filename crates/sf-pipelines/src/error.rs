//! Error types for sf-pipelines.

use busbar_sf_client::ApiResult;

/// Result type alias for sf-pipelines operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sf-pipelines operations.
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

    /// Error for a failed envelope. Successful envelopes are not errors.
    pub fn from_result(result: &ApiResult) -> Option<Self> {
        result
            .error_message()
            .map(|message| Self::new(ErrorKind::Api(message)))
    }
}

/// The kind of error that occurred.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// A remote call came back as a failure envelope.
    #[error("{0}")]
    Api(String),

    /// The transport could not be set up.
    #[error("Client error: {0}")]
    Client(String),

    /// Local file system failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(String),

    /// Zip archive could not be read or written.
    #[error("Archive error: {0}")]
    Zip(String),

    /// CSV could not be read or written.
    #[error("CSV error: {0}")]
    Csv(String),

    /// Missing or invalid plugin settings.
    #[error("Settings error: {0}")]
    Settings(String),

    /// Component registry lookups that found nothing usable.
    #[error("Component registry: {0}")]
    Registry(String),
}

impl From<busbar_sf_client::Error> for Error {
    fn from(err: busbar_sf_client::Error) -> Self {
        Error::with_source(ErrorKind::Client(err.to_string()), err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(ErrorKind::Io(err.to_string()), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Json(err.to_string()), err)
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        Error::with_source(ErrorKind::Zip(err.to_string()), err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::with_source(ErrorKind::Zip(err.to_string()), err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::with_source(ErrorKind::Csv(err.to_string()), err)
    }
}
