//! Fan-out coordination: wait for a set of operations, then continue once.
//!
//! The coordinator never short-circuits: a failed member does not cancel
//! its siblings and does not fire the continuation early. Results are
//! correlated through the metadata the caller attached to each member,
//! never by position.

use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, error};

use crate::config::PollStrategy;
use crate::control_loop::LoopHandle;
use crate::envelope::Envelope;
use crate::operation::{Operation, Outcome};

/// Operations launched together, each tagged with owner metadata.
pub struct FanOutSet<T, M> {
    members: Vec<(Operation<T>, M)>,
}

impl<T, M> Default for FanOutSet<T, M> {
    fn default() -> Self {
        Self {
            members: Vec::new(),
        }
    }
}

impl<T, M> FanOutSet<T, M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: Operation<T>, metadata: M) {
        self.members.push((op, metadata));
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation<T>> {
        self.members.iter().map(|(op, _)| op)
    }
}

impl<T, M> FromIterator<(Operation<T>, M)> for FanOutSet<T, M> {
    fn from_iter<I: IntoIterator<Item = (Operation<T>, M)>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

/// Every member's metadata and outcome, in completion order.
#[derive(Debug, Clone)]
pub struct Gathered<T, M> {
    results: Vec<(M, Outcome<T>)>,
}

impl<T, M> Gathered<T, M> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(M, Outcome<T>)> {
        self.results.iter()
    }

    /// Payloads of members that completed, with their metadata.
    pub fn completed(&self) -> impl Iterator<Item = (&M, &T)> {
        self.results
            .iter()
            .filter_map(|(meta, outcome)| outcome.completed().map(|value| (meta, value)))
    }
}

impl<T: Envelope, M> Gathered<T, M> {
    /// Members whose outcome is a failure.
    pub fn failures(&self) -> Vec<(&M, &Outcome<T>)> {
        self.results
            .iter()
            .filter(|(_, outcome)| outcome.is_failure())
            .map(|(meta, outcome)| (meta, outcome))
            .collect()
    }
}

impl<T: Envelope, M: Display> Gathered<T, M> {
    /// One line per failing member, `None` when every member succeeded.
    pub fn failure_summary(&self) -> Option<String> {
        let lines: Vec<String> = self
            .failures()
            .into_iter()
            .map(|(meta, outcome)| {
                format!(
                    "{meta}: {}",
                    outcome
                        .error_summary()
                        .unwrap_or_else(|| "failed".to_string())
                )
            })
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

struct Barrier<T, M, P, C> {
    results: Vec<(M, Outcome<T>)>,
    remaining: usize,
    on_member: P,
    continuation: Option<C>,
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    handle: LoopHandle,
    strategy: PollStrategy,
}

impl Coordinator {
    pub fn new(handle: LoopHandle, strategy: PollStrategy) -> Self {
        Self { handle, strategy }
    }

    /// Run `continuation` on the loop once every member has finished.
    pub fn coordinate<T, M, C>(&self, set: FanOutSet<T, M>, continuation: C)
    where
        T: Clone + Send + Sync + 'static,
        M: Send + 'static,
        C: FnOnce(Gathered<T, M>) + Send + 'static,
    {
        self.coordinate_each(set, |_: &M, _: &Outcome<T>| {}, continuation);
    }

    /// Like [`Coordinator::coordinate`], also calling `on_member` on the loop
    /// as each member finishes, in completion order.
    pub fn coordinate_each<T, M, P, C>(&self, set: FanOutSet<T, M>, on_member: P, continuation: C)
    where
        T: Clone + Send + Sync + 'static,
        M: Send + 'static,
        P: FnMut(&M, &Outcome<T>) + Send + 'static,
        C: FnOnce(Gathered<T, M>) + Send + 'static,
    {
        debug!(members = set.len(), "Coordinating fan-out");
        if set.is_empty() {
            continuation(Gathered {
                results: Vec::new(),
            });
            return;
        }

        match self.strategy {
            PollStrategy::Notify => self.notify_each(set, on_member, continuation),
            PollStrategy::Interval(interval) => scan(
                self.handle.clone(),
                interval,
                set.members,
                Vec::new(),
                on_member,
                continuation,
            ),
        }
    }

    fn notify_each<T, M, P, C>(&self, set: FanOutSet<T, M>, on_member: P, continuation: C)
    where
        T: Clone + Send + Sync + 'static,
        M: Send + 'static,
        P: FnMut(&M, &Outcome<T>) + Send + 'static,
        C: FnOnce(Gathered<T, M>) + Send + 'static,
    {
        let barrier = Arc::new(Mutex::new(Barrier {
            results: Vec::with_capacity(set.len()),
            remaining: set.len(),
            on_member,
            continuation: Some(continuation),
        }));

        for (op, metadata) in set.members {
            let barrier = barrier.clone();
            self.handle.schedule_when(
                async move { op.finished().await },
                move |outcome| {
                    let ready = {
                        let mut state = barrier.lock().unwrap_or_else(PoisonError::into_inner);
                        state.remaining -= 1;
                        observe(&mut state.on_member, &metadata, &outcome);
                        state.results.push((metadata, outcome));
                        if state.remaining == 0 {
                            state
                                .continuation
                                .take()
                                .map(|c| (c, std::mem::take(&mut state.results)))
                        } else {
                            None
                        }
                    };
                    if let Some((continuation, results)) = ready {
                        continuation(Gathered { results });
                    }
                },
            );
        }
    }
}

/// A panicking member callback must not cost the fan-out its barrier.
fn observe<T, M, P>(on_member: &mut P, metadata: &M, outcome: &Outcome<T>)
where
    P: FnMut(&M, &Outcome<T>),
{
    if catch_unwind(AssertUnwindSafe(|| on_member(metadata, outcome))).is_err() {
        error!("Fan-out member callback panicked");
    }
}

fn scan<T, M, P, C>(
    handle: LoopHandle,
    interval: Duration,
    pending: Vec<(Operation<T>, M)>,
    mut results: Vec<(M, Outcome<T>)>,
    mut on_member: P,
    continuation: C,
) where
    T: Clone + Send + Sync + 'static,
    M: Send + 'static,
    P: FnMut(&M, &Outcome<T>) + Send + 'static,
    C: FnOnce(Gathered<T, M>) + Send + 'static,
{
    let mut still_running = Vec::with_capacity(pending.len());
    for (op, metadata) in pending {
        match op.result() {
            Some(outcome) => {
                observe(&mut on_member, &metadata, &outcome);
                results.push((metadata, outcome));
            }
            None => still_running.push((op, metadata)),
        }
    }

    if still_running.is_empty() {
        continuation(Gathered { results });
        return;
    }

    let next = handle.clone();
    handle.schedule_after(interval, move || {
        scan(next, interval, still_running, results, on_member, continuation)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_loop::ControlLoop;
    use crate::operation::Launcher;

    #[tokio::test]
    async fn test_empty_set_continues_immediately() {
        let control = ControlLoop::new();
        let coordinator = Coordinator::new(control.handle(), PollStrategy::Notify);
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();

        coordinator.coordinate(FanOutSet::<u8, String>::new(), move |gathered| {
            assert!(gathered.is_empty());
            *flag.lock().unwrap() = true;
        });

        assert!(*fired.lock().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_scan_sees_every_member() {
        let mut control = ControlLoop::new();
        let coordinator = Coordinator::new(
            control.handle(),
            PollStrategy::Interval(Duration::from_millis(100)),
        );
        let launcher = Launcher::new(4, None);
        let set: FanOutSet<u64, u64> = [30u64, 10, 20]
            .into_iter()
            .map(|secs| {
                let op = launcher.launch(format!("sleep {secs}"), async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    secs
                });
                (op, secs)
            })
            .collect();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let members = seen.clone();
        let gathered_out = Arc::new(Mutex::new(None));
        let sink = gathered_out.clone();
        coordinator.coordinate_each(
            set,
            move |meta: &u64, _: &Outcome<u64>| members.lock().unwrap().push(*meta),
            move |gathered| *sink.lock().unwrap() = Some(gathered),
        );
        control.run_until_idle().await;

        assert_eq!(*seen.lock().unwrap(), vec![10, 20, 30]);
        let gathered = gathered_out.lock().unwrap().take().unwrap();
        for (meta, outcome) in gathered.iter() {
            assert_eq!(outcome, &Outcome::Completed(*meta));
        }
    }

    async fn continues_despite_panicking_member(strategy: PollStrategy) -> Option<usize> {
        let mut control = ControlLoop::new();
        let coordinator = Coordinator::new(control.handle(), strategy);
        let launcher = Launcher::new(4, None);
        let set: FanOutSet<u64, u64> = [1u64, 2]
            .into_iter()
            .map(|secs| {
                let op = launcher.launch(format!("sleep {secs}"), async move {
                    tokio::time::sleep(Duration::from_secs(secs)).await;
                    secs
                });
                (op, secs)
            })
            .collect();

        let gathered_out = Arc::new(Mutex::new(None));
        let sink = gathered_out.clone();
        coordinator.coordinate_each(
            set,
            |meta: &u64, _: &Outcome<u64>| {
                if *meta == 1 {
                    panic!("member callback failed");
                }
            },
            move |gathered: Gathered<u64, u64>| *sink.lock().unwrap() = Some(gathered.len()),
        );
        control.run_until_idle().await;

        let gathered = gathered_out.lock().unwrap().take();
        gathered
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_member_callback_keeps_notify_barrier() {
        assert_eq!(
            continues_despite_panicking_member(PollStrategy::Notify).await,
            Some(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_member_callback_keeps_interval_barrier() {
        assert_eq!(
            continues_despite_panicking_member(PollStrategy::Interval(Duration::from_millis(100)))
                .await,
            Some(2)
        );
    }
}
