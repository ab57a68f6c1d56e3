//! Shared state every pipeline launches through.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use busbar_sf_orchestrator::{
    Envelope, FanOutSet, Gathered, InFlight, Operation, Orchestrator, Outcome, ProgressReporter,
    RequestKey,
};
use tracing::{debug, warn};

use crate::error::Error;
use crate::format;
use crate::host::{Host, HostSink, MetadataStore};
use crate::reference::ReferenceCache;
use crate::settings::Settings;

/// Orchestrator, settings and host collaborators for one project.
///
/// Cloning is cheap. Every operation launched through a context can be
/// abandoned together with [`PipelineContext::abandon`].
#[derive(Clone)]
pub struct PipelineContext {
    orchestrator: Orchestrator,
    reporter: ProgressReporter,
    settings: Arc<Settings>,
    host: Arc<dyn Host>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<ReferenceCache>,
    inflight: InFlight<RequestKey>,
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("org", &self.settings.username)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl PipelineContext {
    pub fn new(
        orchestrator: &Orchestrator,
        settings: Settings,
        host: Arc<dyn Host>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        let orchestrator = orchestrator.scoped();
        let reporter = orchestrator.reporter(Arc::new(HostSink::new(host.clone())));
        Self {
            orchestrator,
            reporter,
            settings: Arc::new(settings),
            host,
            store,
            cache: Arc::new(ReferenceCache::new()),
            inflight: InFlight::new(),
        }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.host
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ReferenceCache> {
        &self.cache
    }

    pub fn inflight(&self) -> &InFlight<RequestKey> {
        &self.inflight
    }

    /// Cancel every operation this context launched. Their continuations
    /// see a cancelled outcome and stop the chain.
    pub fn abandon(&self) {
        debug!(org = %self.settings.username, "Abandoning pipelines");
        self.orchestrator.launcher().cancel_all();
    }

    pub fn is_abandoned(&self) -> bool {
        self.orchestrator.launcher().is_cancelled()
    }

    /// Launch one unit of remote work, report its progress and run
    /// `on_success` on the control loop when it succeeds.
    ///
    /// A failure ends the chain; the progress reporter shows it.
    pub(crate) fn single<T, F, C>(
        &self,
        in_progress: impl Into<String>,
        success: impl Into<String>,
        work: F,
        on_success: C,
    ) -> Operation<T>
    where
        T: Envelope + Clone + Send + Sync + 'static,
        F: Future<Output = T> + Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let in_progress = in_progress.into();
        let step = in_progress.clone();
        self.single_then(in_progress, success, work, move |outcome| match outcome {
            Outcome::Completed(value) if !value.is_failure() => on_success(value),
            other => {
                let reason = other.error_summary().unwrap_or_else(|| "failed".to_string());
                debug!(step = %step, %reason, "Chain stopped");
            }
        })
    }

    /// Like [`PipelineContext::single`], but `continuation` sees every
    /// outcome, failures included.
    pub(crate) fn single_then<T, F, C>(
        &self,
        in_progress: impl Into<String>,
        success: impl Into<String>,
        work: F,
        continuation: C,
    ) -> Operation<T>
    where
        T: Envelope + Clone + Send + Sync + 'static,
        F: Future<Output = T> + Send + 'static,
        C: FnOnce(Outcome<T>) + Send + 'static,
    {
        let in_progress = in_progress.into();
        let op = self.orchestrator.launcher().launch(&in_progress, work);
        self.reporter
            .report(std::slice::from_ref(&op), in_progress, success);
        self.orchestrator.poller().poll(&op, continuation);
        op
    }

    /// Report a fan-out set as one progress line and continue once every
    /// member finished, whatever their outcome.
    pub(crate) fn fan_out<T, M, P, C>(
        &self,
        set: FanOutSet<T, M>,
        in_progress: impl Into<String>,
        success: impl Into<String>,
        on_member: P,
        continuation: C,
    ) -> Vec<Operation<T>>
    where
        T: Envelope + Clone + Send + Sync + 'static,
        M: Send + 'static,
        P: FnMut(&M, &Outcome<T>) + Send + 'static,
        C: FnOnce(Gathered<T, M>) + Send + 'static,
    {
        let ops: Vec<Operation<T>> = set.operations().cloned().collect();
        self.reporter.report(&ops, in_progress, success);
        self.orchestrator
            .coordinator()
            .coordinate_each(set, on_member, continuation);
        ops
    }

    /// Print a framed message to the console.
    pub(crate) fn announce(&self, message: impl Display) {
        self.host.console(&format::banner(&message.to_string()));
    }

    /// Report a local failure inside a continuation.
    pub(crate) fn report_error(&self, step: &str, err: &Error) {
        warn!(step, error = %err, "Pipeline step failed");
        self.host.console(&format::banner(&format!("{step} failed: {err}")));
    }
}
