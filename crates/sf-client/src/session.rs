//! Authenticated session and the organization identity derived from it.
//!
//! Sensitive fields are redacted in `Debug` output and skipped in spans.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::envelope::{ApiFault, ApiResult};
use crate::error::{Error, ErrorKind, Result};
use crate::http::SfHttpClient;
use crate::request::{RequestBuilder, RequestMethod};
use crate::DEFAULT_API_VERSION;

/// Identifies the authenticated organization/user pair.
///
/// Immutable once a session exists; used as the cache partition key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgIdentity(String);

impl OrgIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self(username.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrgIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrgIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Instance URL + access token for one org.
#[derive(Clone)]
pub struct Session {
    org: OrgIdentity,
    instance_url: String,
    access_token: String,
    api_version: String,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("org", &self.org)
            .field("instance_url", &self.instance_url)
            .field("access_token", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Session {
    pub fn new(
        org: OrgIdentity,
        instance_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            org,
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Session from `SF_USERNAME`, `SF_INSTANCE_URL` and `SF_ACCESS_TOKEN`
    /// (optionally `SF_API_VERSION`).
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| {
            std::env::var(name)
                .map_err(|_| Error::new(ErrorKind::Config(format!("{name} is not set"))))
        };
        let session = Self::new(
            OrgIdentity::new(var("SF_USERNAME")?),
            var("SF_INSTANCE_URL")?,
            var("SF_ACCESS_TOKEN")?,
        );
        Ok(match std::env::var("SF_API_VERSION") {
            Ok(version) => session.with_api_version(version),
            Err(_) => session,
        })
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    pub fn org(&self) -> &OrgIdentity {
        &self.org
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Establish a session with the OAuth 2.0 username-password flow.
    ///
    /// Returns the session together with the raw token response so callers
    /// can print session details when asked to.
    #[instrument(skip(http, request), fields(username = %request.username))]
    pub async fn login(http: &SfHttpClient, request: &LoginRequest) -> Result<(Self, ApiResult)> {
        let url = format!(
            "{}/services/oauth2/token",
            request.login_url.trim_end_matches('/')
        );
        let form = vec![
            ("grant_type".to_string(), "password".to_string()),
            ("client_id".to_string(), request.client_id.clone()),
            ("client_secret".to_string(), request.client_secret.clone()),
            ("username".to_string(), request.username.clone()),
            ("password".to_string(), request.password.clone()),
        ];

        let response = http
            .execute(&RequestBuilder::new(RequestMethod::Post, url).form(form))
            .await?;
        let body = response.json_value();

        if !response.is_success() {
            let fault = ApiFault::from_body(&body)
                .unwrap_or_else(|| ApiFault::new("INVALID_LOGIN", response.text.clone()));
            return Err(Error::new(ErrorKind::Authentication(fault.to_string())));
        }

        let field = |name: &str| {
            body.get(name).and_then(Value::as_str).ok_or_else(|| {
                Error::new(ErrorKind::InvalidResponse(format!(
                    "token response is missing {name}"
                )))
            })
        };

        let session = Session::new(
            OrgIdentity::new(request.username.clone()),
            field("instance_url")?,
            field("access_token")?,
        )
        .with_api_version(request.api_version.clone());

        let mut details = body.clone();
        if let Some(obj) = details.as_object_mut() {
            obj.insert("access_token".into(), Value::String("[REDACTED]".into()));
        }

        Ok((session, ApiResult::ok(response.status, details)))
    }
}

/// Parameters of a username-password login.
#[derive(Clone)]
pub struct LoginRequest {
    pub login_url: String,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub client_secret: String,
    pub api_version: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientConfig;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn login_request(login_url: String) -> LoginRequest {
        LoginRequest {
            login_url,
            username: "dev@example.com".into(),
            password: "secret".into(),
            client_id: "cid".into(),
            client_secret: "csecret".into(),
            api_version: "62.0".into(),
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = Session::new("dev@example.com".into(), "https://na1.salesforce.com/", "00Dxx!tok");
        let debug = format!("{session:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("00Dxx!tok"));
        assert_eq!(session.instance_url(), "https://na1.salesforce.com");
    }

    #[tokio::test]
    async fn test_login_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "00Dxx!token",
                "instance_url": "https://acme.my.salesforce.com",
                "id": "https://login.salesforce.com/id/00D/005",
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let http = SfHttpClient::new(ClientConfig::builder().without_retry().build()).unwrap();
        let (session, details) = Session::login(&http, &login_request(server.uri()))
            .await
            .unwrap();

        assert_eq!(session.org().as_str(), "dev@example.com");
        assert_eq!(session.instance_url(), "https://acme.my.salesforce.com");
        assert_eq!(session.access_token(), "00Dxx!token");
        assert_eq!(details.body["access_token"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_login_failure_is_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "authentication failure"
            })))
            .mount(&server)
            .await;

        let http = SfHttpClient::new(ClientConfig::builder().without_retry().build()).unwrap();
        let err = Session::login(&http, &login_request(server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err.kind, ErrorKind::Authentication(_)));
        assert_eq!(err.status_code(), 401);
        assert!(err.to_string().contains("invalid_grant"));
    }
}
