//! Orchestrator configuration.

use std::time::Duration;

/// How the poller and coordinator learn that an operation finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollStrategy {
    /// Wake on the operation's completion signal.
    #[default]
    Notify,
    /// Re-check on the control loop every interval.
    Interval(Duration),
}

/// Configuration for the launcher, poller, coordinator and progress reporter.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Most operations allowed to run at once. Further launches queue.
    pub max_concurrency: usize,
    /// Completion observation strategy.
    pub poll_strategy: PollStrategy,
    /// Delay between progress frames.
    pub progress_interval: Duration,
    /// Operations running longer than this finish as timed out.
    pub operation_timeout: Option<Duration>,
    /// A poll waiting longer than this cancels the operation it waits on.
    pub poll_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            poll_strategy: PollStrategy::default(),
            progress_interval: Duration::from_millis(100),
            operation_timeout: None,
            poll_timeout: None,
        }
    }
}

impl OrchestratorConfig {
    /// Create a new orchestrator config builder.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::default()
    }
}

/// Builder for OrchestratorConfig.
#[derive(Debug, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Set the concurrency bound (at least 1).
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.config.max_concurrency = max.max(1);
        self
    }

    pub fn with_poll_strategy(mut self, strategy: PollStrategy) -> Self {
        self.config.poll_strategy = strategy;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config.progress_interval = interval;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.config.operation_timeout = Some(timeout);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.config.poll_timeout = Some(timeout);
        self
    }

    /// Build the orchestrator configuration.
    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}
