//! # sf-pipelines
//!
//! The workbench's operation pipelines, chained on the orchestration layer.
//!
//! A pipeline launches remote work through [`busbar_sf_client::SalesforceApi`]
//! on a background worker, reports progress while it runs and continues on
//! the control loop once it finished: write files, update the component
//! registry, show a result view, or launch the next step. The editor side is
//! abstracted behind [`Host`] and [`MetadataStore`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use busbar_sf_client::{ClientConfig, SfHttpClient};
//! use busbar_sf_orchestrator::{Orchestrator, OrchestratorConfig};
//! use busbar_sf_pipelines::{ConsoleHost, JsonMetadataStore, PipelineContext, Settings};
//!
//! let settings = Settings::load("workbench.json")?.with_env_overrides();
//! let (orchestrator, mut control) = Orchestrator::new(OrchestratorConfig::default());
//! let store = Arc::new(JsonMetadataStore::with_path(settings.workspace.join(".workbench")));
//! let ctx = PipelineContext::new(&orchestrator, settings, Arc::new(ConsoleHost), store);
//!
//! ctx.login(SfHttpClient::new(ClientConfig::default())?, |pipelines| {
//!     let _ = pipelines.new_project();
//! })?;
//! control.run_until_idle().await;
//! ```

pub mod archive;
pub mod completions;
mod context;
mod error;
pub mod format;
pub mod history;
pub mod host;
mod pipelines;
pub mod reference;
pub mod registry;
pub mod settings;

pub use completions::{SObjectCompletion, SObjectCompletions};
pub use context::PipelineContext;
pub use error::{Error, ErrorKind, Result};
pub use host::{ConsoleHost, Host, HostEvent, HostSink, JsonMetadataStore, MemoryHost, MetadataStore};
pub use pipelines::{
    LoginOutcome, Pipelines, RestOperation, ANONYMOUS_VIEW, DEBUG_LOGS_VIEW, DEBUG_LOG_DETAIL_VIEW,
    QUERY_VIEW, RETRIEVE_VIEW, RUN_ALL_TEST_VIEW, TEST_RESULT_VIEW,
};
pub use reference::{ReferenceCache, MASTER_RECORD_TYPE_ID};
pub use registry::{ComponentAttributes, ComponentMetadata};
pub use settings::{ComponentTypeSettings, Settings};
