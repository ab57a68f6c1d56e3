//! # sf-orchestrator
//!
//! Asynchronous request/response orchestration for the workbench.
//!
//! Remote work is launched off the control loop ([`Launcher`]), its
//! completion observed without blocking the loop ([`Poller`],
//! [`Coordinator`]), progress rendered uniformly ([`ProgressReporter`]),
//! and slow-changing reference data kept per org ([`OrgCache`]).
//!
//! ```rust,ignore
//! use busbar_sf_orchestrator::{Orchestrator, OrchestratorConfig};
//!
//! let (orchestrator, mut control) = Orchestrator::new(OrchestratorConfig::default());
//! let op = orchestrator.launcher().launch("describe", async move { api.describe_global().await });
//! orchestrator.poller().poll(&op, |outcome| {
//!     // runs on the control loop
//! });
//! control.run_until_idle().await;
//! ```

mod cache;
mod config;
mod control_loop;
mod envelope;
mod error;
mod fanout;
mod inflight;
mod operation;
mod poller;
mod progress;

use std::sync::Arc;

pub use cache::{CacheKey, OrgCache, ResourceKind};
pub use config::{OrchestratorConfig, OrchestratorConfigBuilder, PollStrategy};
pub use control_loop::{ControlLoop, LoopHandle};
pub use envelope::Envelope;
pub use error::{Error, ErrorKind, Result};
pub use fanout::{Coordinator, FanOutSet, Gathered};
pub use inflight::{InFlight, InFlightGuard, RequestKey};
pub use operation::{Launcher, Operation, Outcome};
pub use poller::Poller;
pub use progress::{indicator, MemorySink, ProgressEvent, ProgressReporter, ProgressSink, TracingSink};

/// The launcher, poller and coordinator wired to one control loop.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: OrchestratorConfig,
    handle: LoopHandle,
    launcher: Launcher,
    poller: Poller,
    coordinator: Coordinator,
}

impl Orchestrator {
    /// Build the components and the loop they schedule onto.
    pub fn new(config: OrchestratorConfig) -> (Self, ControlLoop) {
        let control = ControlLoop::new();
        let handle = control.handle();
        let orchestrator = Self {
            launcher: Launcher::new(config.max_concurrency, config.operation_timeout),
            poller: Poller::new(handle.clone(), config.poll_strategy, config.poll_timeout),
            coordinator: Coordinator::new(handle.clone(), config.poll_strategy),
            handle,
            config,
        };
        (orchestrator, control)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// A progress reporter rendering into `sink`.
    pub fn reporter(&self, sink: Arc<dyn ProgressSink>) -> ProgressReporter {
        ProgressReporter::new(self.handle.clone(), sink, self.config.progress_interval)
    }

    /// Same wiring, with a launcher whose operations can be abandoned
    /// together via [`Launcher::cancel_all`].
    pub fn scoped(&self) -> Self {
        Self {
            launcher: self.launcher.scoped(),
            ..self.clone()
        }
    }
}
