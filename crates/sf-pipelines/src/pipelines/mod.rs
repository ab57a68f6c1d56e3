//! The operation pipelines.
//!
//! Each pipeline launches remote work through the shared
//! [`PipelineContext`], reports it, and continues on the control loop once the
//! work finished. A failed step ends its chain; the progress line shows why.
//! Fan-out pipelines continue after every member finished, whatever the
//! members' outcomes.

mod apex;
mod bulk;
mod components;
mod describe;
mod metadata;
mod session;
mod testing;
mod workbook;

use std::path::Path;

use busbar_sf_client::{OrgIdentity, SalesforceApi};
use tracing::warn;

use crate::context::PipelineContext;
use crate::error::Result;
use crate::history;
use crate::registry::ComponentMetadata;

pub use apex::{RestOperation, ANONYMOUS_VIEW, DEBUG_LOGS_VIEW, DEBUG_LOG_DETAIL_VIEW, QUERY_VIEW};
pub use metadata::RETRIEVE_VIEW;
pub use session::LoginOutcome;
pub use testing::{RUN_ALL_TEST_VIEW, TEST_RESULT_VIEW};

/// Pipelines bound to one logged-in org.
#[derive(Clone, Debug)]
pub struct Pipelines {
    ctx: PipelineContext,
    api: SalesforceApi,
}

impl Pipelines {
    pub fn new(ctx: PipelineContext, api: SalesforceApi) -> Self {
        Self { ctx, api }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn api(&self) -> &SalesforceApi {
        &self.api
    }

    pub fn org(&self) -> &OrgIdentity {
        self.api.org()
    }

    /// The org's component registry, empty before the first refresh.
    pub fn registry(&self) -> Result<ComponentMetadata> {
        Ok(self
            .ctx
            .store()
            .load_components(self.org())?
            .unwrap_or_default())
    }

    pub(crate) fn save_registry(&self, metadata: &ComponentMetadata) -> Result<()> {
        self.ctx.store().save_components(self.org(), metadata)
    }

    /// Keep a copy of an operation's output in the workspace history.
    pub(crate) fn remember(&self, category: &str, name: &str, content: &str) {
        if let Err(err) = history::record(&self.ctx.settings().workspace, category, name, content) {
            warn!(category, name, error = %err, "Could not record history");
        }
    }
}

/// Write `contents` to `path`, creating parent directories.
pub(crate) fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}
