//! Background operations.
//!
//! [`Launcher::launch`] starts a unit of remote work on a worker task and
//! hands back an [`Operation`]: a handle over a write-once result slot. The
//! worker always writes the slot, whether the work completed, panicked,
//! was cancelled or timed out, so `is_running` flips from true to false
//! exactly once.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};

/// What a finished operation holds.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The work ran to completion and produced a payload.
    Completed(T),
    /// The work panicked; the panic message is kept.
    Panicked(String),
    /// The operation was cancelled.
    Cancelled,
    /// The operation exceeded the configured timeout.
    TimedOut,
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            Outcome::Completed(value) => Ok(value),
            Outcome::Panicked(message) => Err(Error::new(ErrorKind::Panicked(message))),
            Outcome::Cancelled => Err(Error::new(ErrorKind::Cancelled)),
            Outcome::TimedOut => Err(Error::new(ErrorKind::TimedOut)),
        }
    }
}

struct Slot<T> {
    value: Mutex<Option<Outcome<T>>>,
    done: watch::Sender<bool>,
}

impl<T> Slot<T> {
    /// Write the outcome; later writes are ignored.
    fn complete(&self, outcome: Outcome<T>) -> bool {
        {
            let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            if value.is_some() {
                return false;
            }
            *value = Some(outcome);
        }
        self.done.send_replace(true);
        true
    }
}

/// Handle to launched work.
///
/// Cloning the handle is cheap; all clones observe the same slot.
pub struct Operation<T> {
    id: u64,
    label: Arc<str>,
    slot: Arc<Slot<T>>,
    cancel: CancellationToken,
}

impl<T> Clone for Operation<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            label: self.label.clone(),
            slot: self.slot.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Operation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("running", &self.is_running())
            .finish()
    }
}

impl<T> Operation<T> {
    fn new(id: u64, label: &str, cancel: CancellationToken) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            id,
            label: Arc::from(label),
            slot: Arc::new(Slot {
                value: Mutex::new(None),
                done,
            }),
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// True until the result slot has been written. Never blocks.
    pub fn is_running(&self) -> bool {
        self.slot
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Request cancellation. A running operation finishes as
    /// [`Outcome::Cancelled`]; a finished one is unaffected.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn complete(&self, outcome: Outcome<T>) {
        if self.slot.complete(outcome) {
            debug!(id = self.id, label = %self.label, "Operation finished");
        }
    }
}

impl<T: Clone> Operation<T> {
    /// The stored outcome, or `None` while the operation is running.
    pub fn result(&self) -> Option<Outcome<T>> {
        self.slot
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for the result slot to be written.
    pub async fn finished(&self) -> Outcome<T> {
        let mut done = self.slot.done.subscribe();
        // The sender lives in the slot we hold, so this only returns once set.
        let _ = done.wait_for(|finished| *finished).await;
        self.result().unwrap_or(Outcome::Cancelled)
    }
}

/// Starts operations on bounded worker tasks.
#[derive(Clone)]
pub struct Launcher {
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    root: CancellationToken,
    operation_timeout: Option<Duration>,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for Launcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Launcher")
            .field("max_concurrency", &self.max_concurrency)
            .field("available", &self.permits.available_permits())
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl Launcher {
    pub fn new(max_concurrency: usize, operation_timeout: Option<Duration>) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            root: CancellationToken::new(),
            operation_timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// A launcher sharing this one's concurrency bound whose operations
    /// can be cancelled as a group with [`Launcher::cancel_all`].
    pub fn scoped(&self) -> Launcher {
        Launcher {
            root: self.root.child_token(),
            ..self.clone()
        }
    }

    /// Cancel every operation launched through this launcher (and its
    /// scoped children).
    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Start `work` on a worker task. Requires a Tokio runtime.
    pub fn launch<T, F>(&self, label: impl AsRef<str>, work: F) -> Operation<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op = Operation::new(id, label.as_ref(), self.root.child_token());
        debug!(id, label = label.as_ref(), "Launching operation");

        let worker = op.clone();
        let permits = self.permits.clone();
        let timeout = self.operation_timeout;
        tokio::spawn(async move {
            let outcome = run_worker(permits, worker.cancel.clone(), timeout, work).await;
            if let Outcome::Panicked(ref message) = outcome {
                warn!(id = worker.id, label = %worker.label, panic = %message, "Operation panicked");
            }
            worker.complete(outcome);
        });

        op
    }
}

async fn run_worker<T, F>(
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    work: F,
) -> Outcome<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Outcome::Cancelled,
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return Outcome::Cancelled,
        },
    };

    // A nested task turns a panic into a JoinError instead of unwinding here.
    let task = tokio::spawn(work);
    let abort = task.abort_handle();
    let joined = async move {
        match task.await {
            Ok(value) => Outcome::Completed(value),
            Err(err) if err.is_panic() => Outcome::Panicked(panic_message(err.into_panic())),
            Err(_) => Outcome::Cancelled,
        }
    };
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, joined).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    abort.abort();
                    Outcome::TimedOut
                }
            },
            None => joined.await,
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            abort.abort();
            Outcome::Cancelled
        }
        outcome = bounded => outcome,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
