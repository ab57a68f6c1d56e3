//! # busbar-sf-workbench
//!
//! An asynchronous Salesforce workbench: long-running org requests run on
//! background workers while a single control loop observes their completion
//! and drives follow-up steps.
//!
//! ## Crates
//!
//! - **busbar-sf-client** - Session, retrying HTTP, REST/Tooling/Bulk/Metadata calls resolving to [`ApiResult`] envelopes
//! - **busbar-sf-orchestrator** - Background operations, deferred polling, fan-out coordination, progress reporting, org-scoped caching
//! - **busbar-sf-pipelines** - The workbench pipelines: login, project download, save/deploy, tests, bulk, describe
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use busbar_sf_workbench::{
//!     ClientConfig, ConsoleHost, JsonMetadataStore, Orchestrator, OrchestratorConfig,
//!     PipelineContext, Settings, SfHttpClient,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::default().with_env_overrides();
//!     let store = Arc::new(JsonMetadataStore::with_path(settings.workspace.join(".workbench")));
//!     let (orchestrator, mut control) = Orchestrator::new(OrchestratorConfig::default());
//!     let ctx = PipelineContext::new(&orchestrator, settings, Arc::new(ConsoleHost), store);
//!
//!     ctx.login(SfHttpClient::new(ClientConfig::default())?, |pipelines| {
//!         pipelines.execute_query("SELECT Id, Name FROM Account LIMIT 10");
//!     })?;
//!     control.run_until_idle().await;
//!     Ok(())
//! }
//! ```

pub use busbar_sf_client as client;
pub use busbar_sf_orchestrator as orchestrator;
pub use busbar_sf_pipelines as pipelines;

pub use busbar_sf_client::{ApiResult, ClientConfig, SalesforceApi, Session, SfHttpClient};
pub use busbar_sf_orchestrator::{ControlLoop, Orchestrator, OrchestratorConfig};
pub use busbar_sf_pipelines::{
    ConsoleHost, Host, JsonMetadataStore, MetadataStore, PipelineContext, Pipelines, Settings,
};
