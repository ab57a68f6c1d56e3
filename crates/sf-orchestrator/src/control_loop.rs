//! The single-threaded control loop continuations run on.
//!
//! Workers never touch host state. Everything that does (cache writes,
//! view updates, chaining the next stage) is a job scheduled through a
//! [`LoopHandle`] and executed one at a time by [`ControlLoop`].

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{Error, ErrorKind, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle for scheduling jobs onto the loop.
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
}

impl std::fmt::Debug for LoopHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopHandle")
            .field("pending", &self.pending())
            .finish()
    }
}

impl LoopHandle {
    /// Jobs scheduled but not yet run, including delayed ones.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a job for the next loop turn.
    pub fn try_schedule(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.send_counted(Box::new(job))
    }

    /// Queue a job; a closed loop drops it with a log line.
    pub fn schedule(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(err) = self.try_schedule(job) {
            debug!(error = %err, "Job dropped");
        }
    }

    /// Queue a job once `delay` has elapsed.
    pub fn schedule_after(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = handle.send_counted(Box::new(job));
        });
    }

    /// Queue `job` with the output of `fut` once it resolves.
    pub fn schedule_when<F, J>(&self, fut: F, job: J)
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
        J: FnOnce(F::Output) + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let handle = self.clone();
        tokio::spawn(async move {
            let value = fut.await;
            let _ = handle.send_counted(Box::new(move || job(value)));
        });
    }

    fn send_counted(&self, job: Job) -> Result<()> {
        self.tx.send(job).map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            Error::new(ErrorKind::LoopClosed)
        })
    }
}

/// Executes scheduled jobs strictly one at a time.
pub struct ControlLoop {
    rx: mpsc::UnboundedReceiver<Job>,
    handle: LoopHandle,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("pending", &self.handle.pending())
            .finish()
    }
}

impl Default for ControlLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            rx,
            handle: LoopHandle {
                tx,
                pending: Arc::new(AtomicUsize::new(0)),
            },
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// True when nothing is queued, delayed or waiting on a future.
    pub fn is_idle(&self) -> bool {
        self.handle.pending() == 0
    }

    /// Run jobs until the loop is idle.
    pub async fn run_until_idle(&mut self) {
        while !self.is_idle() {
            match self.rx.recv().await {
                Some(job) => self.run_job(job),
                None => break,
            }
        }
    }

    /// Run jobs until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                job = self.rx.recv() => match job {
                    Some(job) => self.run_job(job),
                    None => break,
                },
            }
        }
    }

    fn run_job(&mut self, job: Job) {
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Continuation panicked; loop continues");
        }
        self.handle.pending.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_in_schedule_order() {
        let mut control = ControlLoop::new();
        let handle = control.handle();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            handle.schedule(move || log.lock().unwrap().push(i));
        }
        let delayed = log.clone();
        handle.schedule_after(Duration::from_secs(1), move || delayed.lock().unwrap().push(99));

        control.run_until_idle().await;
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 99]);
        assert!(control.is_idle());
    }

    #[tokio::test]
    async fn test_schedule_when_passes_output() {
        let mut control = ControlLoop::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        control
            .handle()
            .schedule_when(async { 41 + 1 }, move |v| *sink.lock().unwrap() = Some(v));

        control.run_until_idle().await;
        assert_eq!(*seen.lock().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_stop_the_loop() {
        let mut control = ControlLoop::new();
        let handle = control.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        handle.schedule(|| panic!("bad continuation"));
        let counter = ran.clone();
        handle.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        control.run_until_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_jobs_can_schedule_jobs() {
        let mut control = ControlLoop::new();
        let handle = control.handle();
        let ran = Arc::new(AtomicUsize::new(0));

        let inner_handle = handle.clone();
        let counter = ran.clone();
        handle.schedule(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let counter = counter.clone();
            inner_handle.schedule(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        });

        control.run_until_idle().await;
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_schedule_fails_once_loop_is_dropped() {
        let control = ControlLoop::new();
        let handle = control.handle();
        drop(control);
        assert!(matches!(
            handle.try_schedule(|| {}).unwrap_err().kind,
            ErrorKind::LoopClosed
        ));
        assert_eq!(handle.pending(), 0);
    }
}
