//! # sf-client
//!
//! Salesforce transport for the workbench.
//!
//! Everything the orchestration layer sends to an org goes through
//! [`SalesforceApi`], and every call resolves to an [`ApiResult`] envelope
//! (status code, JSON body, optional [`ApiFault`]), so a background worker
//! always has something to store, even when the request never reached the
//! server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Pipelines / orchestrator                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ ApiResult
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SalesforceApi                           │
//! │  - Session (instance URL, token, API version)               │
//! │  - REST, Tooling, Bulk 2.0 and Metadata (SOAP) calls        │
//! │  - Server-side job polling (bulk, tests, deploy, retrieve)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SfHttpClient                           │
//! │  - Raw HTTP with retry, compression, rate limiting          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use busbar_sf_client::{ClientConfig, SalesforceApi, Session};
//!
//! let api = SalesforceApi::new(Session::from_env()?, ClientConfig::default())?;
//! let result = api.query("SELECT Id, Name FROM Account", false).await;
//! if let Some(message) = result.error_message() {
//!     eprintln!("{message}");
//! }
//! ```

mod api;
mod config;
mod envelope;
mod error;
mod http;
mod request;
mod retry;
mod session;

pub mod security;

pub use api::{BulkOperation, DeployOptions, PackageType, SalesforceApi};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use envelope::{ApiFault, ApiResult, SUCCESS_THRESHOLD};
pub use error::{Error, ErrorKind, Result};
pub use http::{Response, SfHttpClient};
pub use request::{RequestBuilder, RequestMethod};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy};
pub use session::{LoginRequest, OrgIdentity, Session};

/// Default Salesforce API version.
pub const DEFAULT_API_VERSION: &str = "62.0";

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("busbar-sf-workbench/", env!("CARGO_PKG_VERSION"));
