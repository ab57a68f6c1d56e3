//! Progress reporting for one or more operations.
//!
//! The reporter only observes: it reads `is_running` and the stored
//! outcomes and renders [`ProgressEvent`]s through a [`ProgressSink`] on the
//! control loop.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::control_loop::LoopHandle;
use crate::envelope::Envelope;
use crate::operation::Operation;

const INDICATOR_WIDTH: usize = 4;

/// One rendered progress state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Running { label: String, frame: usize },
    Succeeded { label: String },
    Failed { label: String, summary: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Running { .. })
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgressEvent::Running { label, frame } => write!(f, "{label} {}", indicator(*frame)),
            ProgressEvent::Succeeded { label } => f.write_str(label),
            ProgressEvent::Failed { label, summary } => write!(f, "{label} failed: {summary}"),
        }
    }
}

/// A bouncing `[=   ]` indicator.
pub fn indicator(frame: usize) -> String {
    let span = 2 * (INDICATOR_WIDTH - 1);
    let step = frame % span;
    let position = if step < INDICATOR_WIDTH {
        step
    } else {
        span - step
    };
    let cells: String = (0..INDICATOR_WIDTH)
        .map(|i| if i == position { '=' } else { ' ' })
        .collect();
    format!("[{cells}]")
}

/// Where progress is rendered.
pub trait ProgressSink: Send + Sync {
    fn render(&self, event: &ProgressEvent);
}

/// Renders progress as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn render(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Running { label, frame } => debug!(label, frame, "In progress"),
            ProgressEvent::Succeeded { label } => info!(label, "Succeeded"),
            ProgressEvent::Failed { label, summary } => warn!(label, summary, "Failed"),
        }
    }
}

/// Records every event; hosts can read the latest state.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn last(&self) -> Option<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }

    /// Terminal events only.
    pub fn outcomes(&self) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(ProgressEvent::is_terminal)
            .collect()
    }
}

impl ProgressSink for MemorySink {
    fn render(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

impl<S: ProgressSink + ?Sized> ProgressSink for Arc<S> {
    fn render(&self, event: &ProgressEvent) {
        (**self).render(event)
    }
}

struct Report<T> {
    handles: Vec<Operation<T>>,
    in_progress: String,
    success: String,
}

#[derive(Clone)]
pub struct ProgressReporter {
    handle: LoopHandle,
    sink: Arc<dyn ProgressSink>,
    interval: Duration,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("interval", &self.interval)
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(handle: LoopHandle, sink: Arc<dyn ProgressSink>, interval: Duration) -> Self {
        Self {
            handle,
            sink,
            interval,
        }
    }

    /// Animate `in_progress` while any handle runs, then render
    /// `success`, or a failure summary built from the failing payloads.
    pub fn report<T>(
        &self,
        handles: &[Operation<T>],
        in_progress: impl Into<String>,
        success: impl Into<String>,
    ) where
        T: Envelope + Clone + Send + Sync + 'static,
    {
        let report = Arc::new(Report {
            handles: handles.to_vec(),
            in_progress: in_progress.into(),
            success: success.into(),
        });
        let this = self.clone();
        self.handle.schedule(move || this.tick(report, 0));
    }

    fn tick<T>(self, report: Arc<Report<T>>, frame: usize)
    where
        T: Envelope + Clone + Send + Sync + 'static,
    {
        if report.handles.iter().any(Operation::is_running) {
            self.sink.render(&ProgressEvent::Running {
                label: report.in_progress.clone(),
                frame,
            });
            let handle = self.handle.clone();
            handle.schedule_after(self.interval, move || self.tick(report, frame + 1));
            return;
        }

        let failures: Vec<String> = report
            .handles
            .iter()
            .filter_map(|op| op.result())
            .filter(Envelope::is_failure)
            .map(|outcome| {
                outcome
                    .error_summary()
                    .unwrap_or_else(|| "failed".to_string())
            })
            .collect();

        let event = if failures.is_empty() {
            ProgressEvent::Succeeded {
                label: report.success.clone(),
            }
        } else {
            ProgressEvent::Failed {
                label: report.in_progress.clone(),
                summary: failures.join("; "),
            }
        };
        self.sink.render(&event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_bounces() {
        let frames: Vec<String> = (0..7).map(indicator).collect();
        assert_eq!(
            frames,
            vec!["[=   ]", "[ =  ]", "[  = ]", "[   =]", "[  = ]", "[ =  ]", "[=   ]"]
        );
    }

    #[test]
    fn test_event_display() {
        let failed = ProgressEvent::Failed {
            label: "Deploying".into(),
            summary: "INVALID_SESSION_ID: expired (status 401)".into(),
        };
        assert_eq!(
            failed.to_string(),
            "Deploying failed: INVALID_SESSION_ID: expired (status 401)"
        );
    }
}
