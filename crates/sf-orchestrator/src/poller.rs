//! Deferred completion polling.
//!
//! [`Poller::poll`] runs a continuation on the control loop once an
//! operation has finished. If the operation is already done the
//! continuation runs immediately, on the caller's loop turn; otherwise the
//! poll is re-armed without ever blocking the loop.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::PollStrategy;
use crate::control_loop::LoopHandle;
use crate::operation::{Operation, Outcome};

#[derive(Debug, Clone)]
pub struct Poller {
    handle: LoopHandle,
    strategy: PollStrategy,
    poll_timeout: Option<Duration>,
}

impl Poller {
    pub fn new(handle: LoopHandle, strategy: PollStrategy, poll_timeout: Option<Duration>) -> Self {
        Self {
            handle,
            strategy,
            poll_timeout,
        }
    }

    pub fn strategy(&self) -> PollStrategy {
        self.strategy
    }

    /// Invoke `continuation` with the operation's outcome exactly once,
    /// after `is_running` has been observed false.
    ///
    /// Must be called from the control loop (or before it starts).
    pub fn poll<T, F>(&self, op: &Operation<T>, continuation: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        match self.strategy {
            PollStrategy::Interval(interval) => self.poll_every(op, interval, continuation),
            PollStrategy::Notify => self.poll_notify(op, continuation),
        }
    }

    /// Interval form: re-check every `interval` on the loop.
    pub fn poll_every<T, F>(&self, op: &Operation<T>, interval: Duration, continuation: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        let deadline = self.poll_timeout.map(|limit| Instant::now() + limit);
        recheck(self.handle.clone(), op.clone(), interval, deadline, continuation);
    }

    fn poll_notify<T, F>(&self, op: &Operation<T>, continuation: F)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(Outcome<T>) + Send + 'static,
    {
        if let Some(outcome) = op.result() {
            continuation(outcome);
            return;
        }

        if let Some(limit) = self.poll_timeout {
            let watched = op.clone();
            tokio::spawn(async move {
                if tokio::time::timeout(limit, watched.finished()).await.is_err() {
                    warn!(id = watched.id(), label = watched.label(), "Poll timed out, cancelling");
                    watched.cancel();
                }
            });
        }

        let waited = op.clone();
        self.handle
            .schedule_when(async move { waited.finished().await }, continuation);
    }
}

fn recheck<T, F>(
    handle: LoopHandle,
    op: Operation<T>,
    interval: Duration,
    deadline: Option<Instant>,
    continuation: F,
) where
    T: Clone + Send + Sync + 'static,
    F: FnOnce(Outcome<T>) + Send + 'static,
{
    if let Some(outcome) = op.result() {
        continuation(outcome);
        return;
    }

    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        warn!(id = op.id(), label = op.label(), "Poll timed out, cancelling");
        op.cancel();
    }

    debug!(id = op.id(), delay_ms = interval.as_millis(), "Operation still running");
    let next = handle.clone();
    handle.schedule_after(interval, move || recheck(next, op, interval, deadline, continuation));
}
