//! Core HTTP client with retry and Salesforce-specific status handling.

use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::ClientConfig;
use crate::error::{is_retryable_status, Error, ErrorKind, Result};
use crate::request::{RequestBody, RequestBuilder};

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub text: String,
    /// `Sforce-Locator` of a paged bulk result, absent on the last page.
    pub locator: Option<String>,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Parse the body as JSON. An empty body (204) parses as `null`; a body
    /// that is not JSON is kept as a JSON string.
    pub fn json_value(&self) -> serde_json::Value {
        if self.text.trim().is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_str(&self.text)
            .unwrap_or_else(|_| serde_json::Value::String(self.text.clone()))
    }
}

/// HTTP client with built-in retry.
#[derive(Debug, Clone)]
pub struct SfHttpClient {
    inner: reqwest::Client,
    config: ClientConfig,
}

impl SfHttpClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent)
            .gzip(config.accept_compressed)
            .deflate(config.accept_compressed)
            .build()
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))?;

        Ok(Self { inner, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a request, retrying rate limits, timeouts and 5xx responses.
    ///
    /// Non-retryable error statuses are returned as a normal [`Response`];
    /// turning them into failures is the caller's concern.
    #[instrument(skip(self, request), fields(method = ?request.method, url = %request.url))]
    pub async fn execute(&self, request: &RequestBuilder) -> Result<Response> {
        let mut policy = self
            .config
            .retry
            .clone()
            .map(crate::retry::RetryPolicy::new);

        loop {
            let err = match self.execute_once(request).await {
                Ok(response) if is_retryable_status(response.status) => Error::new(ErrorKind::Http {
                    status: response.status,
                    message: response.text,
                }),
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() => err,
                Err(err) => return Err(err),
            };

            let Some(policy) = policy.as_mut() else {
                return give_up(err, None);
            };

            match policy.next_delay(err.retry_after()) {
                Some(delay) => {
                    warn!(
                        attempt = policy.attempt(),
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => return give_up(err, Some(policy.attempt())),
            }
        }
    }

    async fn execute_once(&self, request: &RequestBuilder) -> Result<Response> {
        let mut url = url::Url::parse(&request.url)?;
        if !request.query_params.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query_params);
        }

        let mut req = self.inner.request(request.method.to_reqwest(), url);

        if let Some(ref token) = request.bearer_token {
            req = req.bearer_auth(token);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        req = match &request.body {
            Some(RequestBody::Json(value)) => req.json(value),
            Some(RequestBody::Text(text)) => req.body(text.clone()),
            Some(RequestBody::Form(data)) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(data)
                    .finish();
                req.header("Content-Type", "application/x-www-form-urlencoded")
                    .body(encoded)
            }
            None => req,
        };

        if self.config.enable_tracing {
            debug!(method = ?request.method, url = %request.url, "Sending request");
        }

        let response = req.send().await?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(Error::new(ErrorKind::RateLimited { retry_after }));
        }

        let locator = response
            .headers()
            .get("sforce-locator")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty() && *v != "null")
            .map(str::to_string);
        let text = response.text().await?;

        if self.config.enable_tracing {
            if (200..400).contains(&status) {
                debug!(status, bytes = text.len(), "Response received");
            } else {
                info!(status, bytes = text.len(), "Non-success response");
            }
        }

        Ok(Response {
            status,
            text,
            locator,
        })
    }
}

/// The last server answer is more useful to the caller than a retry count.
fn give_up(err: Error, attempts: Option<u32>) -> Result<Response> {
    match (err.kind, attempts) {
        (ErrorKind::Http { status, message }, _) => Ok(Response {
            status,
            text: message,
            locator: None,
        }),
        (_, Some(attempts)) if attempts > 0 => {
            Err(Error::new(ErrorKind::RetriesExhausted { attempts }))
        }
        (kind, _) => Err(Error {
            kind,
            source: err.source,
        }),
    }
}
