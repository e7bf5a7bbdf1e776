//! Background execution of a processing run.
//!
//! A run executes on its own thread so the caller can observe progress and
//! request cancellation. Milestones, progress, and the terminal outcome are
//! delivered over a crossbeam channel; the stop flag is cooperative and is
//! checked between units of work, so an in-flight unit always runs to
//! completion.

use crate::batch::{self, RunTarget};
use crate::config::ProcessingConfig;
use crate::detectors::{ElgendiDetector, PeakDetector};
use crate::pipeline::RunResults;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Events emitted by a running worker, in emission order. `Failed` and
/// `Finished` are terminal.
#[derive(Debug)]
pub enum WorkerEvent {
    /// Human-readable milestone.
    Status(String),
    /// Monotonically non-decreasing percentage.
    Progress(u8),
    /// The run aborted; no results follow.
    Failed(String),
    Finished(RunResults),
}

/// Shared handle the pipeline stages use to report and to poll for
/// cancellation. Detached contexts (library/direct use) log instead of
/// sending.
pub struct RunContext {
    events: Option<Sender<WorkerEvent>>,
    stop: Arc<AtomicBool>,
    high_water: AtomicU8,
}

impl RunContext {
    /// Context without a listener; stop is never signalled externally.
    pub fn detached() -> Self {
        Self {
            events: None,
            stop: Arc::new(AtomicBool::new(false)),
            high_water: AtomicU8::new(0),
        }
    }

    fn attached(events: Sender<WorkerEvent>, stop: Arc<AtomicBool>) -> Self {
        Self {
            events: Some(events),
            stop,
            high_water: AtomicU8::new(0),
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        let message = message.into();
        match &self.events {
            Some(sender) => {
                let _ = sender.send(WorkerEvent::Status(message));
            }
            None => log::debug!("{}", message),
        }
    }

    /// Report progress, clamped so the reported value never decreases.
    pub fn progress(&self, pct: u8) {
        let pct = pct.min(100);
        let prev = self.high_water.fetch_max(pct, Ordering::Relaxed);
        let effective = pct.max(prev);
        if let Some(sender) = &self.events {
            let _ = sender.send(WorkerEvent::Progress(effective));
        }
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Handle to a spawned run: event stream plus cooperative cancellation.
pub struct WorkerHandle {
    pub events: Receiver<WorkerEvent>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Ask the worker to stop after the unit currently in flight.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the worker thread to exit.
    pub fn join(mut self) {
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Spawn a run with the built-in peak detector.
pub fn spawn(target: RunTarget, config: ProcessingConfig) -> WorkerHandle {
    spawn_with_detector(target, config, Arc::new(ElgendiDetector::default()))
}

/// Spawn a run with a caller-supplied detector implementation.
pub fn spawn_with_detector(
    target: RunTarget,
    config: ProcessingConfig,
    detector: Arc<dyn PeakDetector + Send + Sync>,
) -> WorkerHandle {
    let (sender, receiver) = unbounded();
    let stop = Arc::new(AtomicBool::new(false));
    let ctx_stop = Arc::clone(&stop);
    let thread = thread::spawn(move || {
        let ctx = RunContext::attached(sender.clone(), ctx_stop);
        match batch::run(&target, &config, detector.as_ref(), &ctx) {
            Ok(results) => {
                ctx.progress(100);
                let _ = sender.send(WorkerEvent::Finished(results));
            }
            Err(err) => {
                let _ = sender.send(WorkerEvent::Failed(err.to_string()));
            }
        }
    });
    WorkerHandle {
        events: receiver,
        stop,
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_never_decreases() {
        let (sender, receiver) = unbounded();
        let ctx = RunContext::attached(sender, Arc::new(AtomicBool::new(false)));
        ctx.progress(40);
        ctx.progress(10);
        ctx.progress(60);
        let seen: Vec<u8> = receiver
            .try_iter()
            .map(|e| match e {
                WorkerEvent::Progress(p) => p,
                _ => panic!("unexpected event"),
            })
            .collect();
        assert_eq!(seen, vec![40, 40, 60]);
    }

    #[test]
    fn failed_run_reports_terminal_event() {
        let handle = spawn(
            RunTarget::Directory("/definitely/not/a/real/dir".into()),
            ProcessingConfig::default(),
        );
        let mut saw_failed = false;
        for event in handle.events.iter() {
            if let WorkerEvent::Failed(_) = event {
                saw_failed = true;
                break;
            }
        }
        assert!(saw_failed);
        handle.join();
    }
}
