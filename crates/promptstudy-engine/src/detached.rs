use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideCallKind {
    Logging,
    Submission,
}

impl fmt::Display for SideCallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideCallKind::Logging => f.write_str("interaction logging"),
            SideCallKind::Submission => f.write_str("task submission"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} failed: {message}")]
pub struct SideCallFailure {
    pub kind: SideCallKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachMode {
    /// One short-lived thread per call.
    Thread,
    /// Run on the caller's thread. Used where ordering must be deterministic.
    Inline,
}

/// Runs best-effort side calls off the send path.
///
/// Failures never reach the caller of [`Detached::spawn`]. They are logged and
/// queued on a separate channel that the owner drains when it wants them.
pub struct Detached {
    mode: DetachMode,
    failures_tx: Sender<SideCallFailure>,
    failures_rx: Receiver<SideCallFailure>,
    handles: Vec<JoinHandle<()>>,
}

impl Detached {
    pub fn new(mode: DetachMode) -> Self {
        let (failures_tx, failures_rx) = mpsc::channel();
        Self {
            mode,
            failures_tx,
            failures_rx,
            handles: Vec::new(),
        }
    }

    pub fn threaded() -> Self {
        Self::new(DetachMode::Thread)
    }

    pub fn inline() -> Self {
        Self::new(DetachMode::Inline)
    }

    pub fn spawn<F>(&mut self, kind: SideCallKind, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        self.handles.retain(|handle| !handle.is_finished());
        let failures = self.failures_tx.clone();
        match self.mode {
            DetachMode::Inline => run_side_call(kind, job, &failures),
            DetachMode::Thread => {
                let spawned = thread::Builder::new()
                    .name(format!("side-call-{kind:?}").to_ascii_lowercase())
                    .spawn(move || run_side_call(kind, job, &failures));
                match spawned {
                    Ok(handle) => self.handles.push(handle),
                    Err(err) => self.report(SideCallFailure {
                        kind,
                        message: format!("could not start worker: {err}"),
                    }),
                }
            }
        }
    }

    /// Queues a failure observed outside [`Detached::spawn`].
    pub fn report(&self, failure: SideCallFailure) {
        tracing::warn!(kind = %failure.kind, message = %failure.message, "side call failed");
        let _ = self.failures_tx.send(failure);
    }

    pub fn drain_failures(&self) -> Vec<SideCallFailure> {
        self.failures_rx.try_iter().collect()
    }

    /// Waits for in-flight side calls, e.g. before the process exits.
    pub fn join_all(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("side call worker panicked");
            }
        }
    }
}

fn run_side_call<F>(kind: SideCallKind, job: F, failures: &Sender<SideCallFailure>)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    if let Err(err) = job() {
        let failure = SideCallFailure {
            kind,
            message: format!("{err:#}"),
        };
        tracing::warn!(kind = %failure.kind, message = %failure.message, "side call failed");
        let _ = failures.send(failure);
    }
}
