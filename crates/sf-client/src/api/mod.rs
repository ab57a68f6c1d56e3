//! Salesforce API client.
//!
//! `SalesforceApi` wraps the retrying HTTP client and a [`Session`], and
//! exposes every remote call the workbench makes. Each public call resolves
//! to an [`ApiResult`] envelope; calls that chain several requests are
//! written against `Result` internally and folded into the envelope once.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::config::ClientConfig;
use crate::envelope::{ApiFault, ApiResult};
use crate::error::{Error, ErrorKind, Result};
use crate::http::{Response, SfHttpClient};
use crate::request::{RequestBuilder, RequestMethod};
use crate::session::{OrgIdentity, Session};

mod bulk;
mod metadata;
mod rest;
mod tooling;

pub use bulk::BulkOperation;
pub use metadata::{DeployOptions, PackageType};

/// Client for the REST, Tooling, Bulk 2.0 and Metadata APIs of one org.
#[derive(Debug, Clone)]
pub struct SalesforceApi {
    http: SfHttpClient,
    session: Session,
}

impl SalesforceApi {
    pub fn new(session: Session, config: ClientConfig) -> Result<Self> {
        Ok(Self {
            http: SfHttpClient::new(config)?,
            session,
        })
    }

    /// Reuse an existing HTTP client (connection pool) for a new session.
    pub fn from_parts(http: SfHttpClient, session: Session) -> Self {
        Self { http, session }
    }

    pub fn http(&self) -> &SfHttpClient {
        &self.http
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn org(&self) -> &OrgIdentity {
        self.session.org()
    }

    fn job_poll_interval(&self) -> Duration {
        self.http.config().job_poll_interval
    }

    fn job_max_wait(&self) -> Duration {
        self.http.config().job_max_wait
    }

    /// Resolve a path against the REST API base.
    ///
    /// Absolute URLs pass through, `/services/...` paths are joined to the
    /// instance URL, anything else is relative to `/services/data/vXX.X`.
    pub fn rest_url(&self, path: &str) -> String {
        self.resolve(path, "")
    }

    /// Resolve a path against the Tooling API base.
    pub fn tooling_url(&self, path: &str) -> String {
        self.resolve(path, "/tooling")
    }

    fn resolve(&self, path: &str, api: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with("/services/") {
            format!("{}{}", self.session.instance_url(), path)
        } else {
            format!(
                "{}/services/data/v{}{}/{}",
                self.session.instance_url(),
                self.session.api_version(),
                api,
                path.trim_start_matches('/')
            )
        }
    }

    pub(crate) fn request(&self, method: RequestMethod, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url)
            .bearer_auth(self.session.access_token())
            .header("Accept", "application/json")
    }

    /// Send a request and fold the response into an envelope.
    pub async fn send(&self, request: RequestBuilder) -> ApiResult {
        match self.http.execute(&request).await {
            Ok(response) => ApiResult::from_response(response.status, response.json_value()),
            Err(err) => ApiResult::from_error(&err),
        }
    }

    /// Send a request; error statuses become [`ErrorKind::Api`].
    pub(crate) async fn send_raw(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.http.execute(&request).await?;
        if response.status > crate::SUCCESS_THRESHOLD {
            let body = response.json_value();
            let fault = ApiFault::from_body(&body)
                .unwrap_or_else(|| ApiFault::new(format!("HTTP_{}", response.status), response.text.clone()));
            debug!(status = response.status, %fault, "Request failed");
            return Err(Error::new(ErrorKind::Api {
                status: response.status,
                fault,
            }));
        }
        Ok(response)
    }

    pub(crate) async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        Ok(self.send_raw(request).await?.json_value())
    }
}

/// Read a string field, failing with a descriptive error.
pub(crate) fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value.get(field).and_then(Value::as_str).ok_or_else(|| {
        Error::new(ErrorKind::InvalidResponse(format!(
            "response is missing \"{field}\""
        )))
    })
}
