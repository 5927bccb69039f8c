//! Dedicated event worker.
//!
//! Network namespace membership is per-thread kernel state, so every
//! namespace switch the controller makes happens on one OS thread owned by
//! the [`Worker`]. Events are queued to it over a channel and handled one
//! at a time in arrival order, which also keeps the events of any single
//! workload ordered.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use nicctl_common::error::{NicError, Result};
use serde::Serialize;

use crate::event::WorkloadEvent;
use crate::orchestrator::{Disposition, Orchestrator};

/// Name of the worker thread.
pub const WORKER_THREAD_NAME: &str = "nicctl-worker";

/// Messages accepted by the worker.
#[derive(Debug)]
pub enum Message {
    /// Handle a workload event.
    Event(Box<WorkloadEvent>),
    /// Stop after the messages queued before this one.
    Shutdown,
}

/// Tally of the events a worker handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Events received.
    pub handled: u64,
    /// Events that bound a link or found one already bound.
    pub bound: u64,
    /// Events that released a link or found none to release.
    pub unbound: u64,
    /// Events filtered out.
    pub skipped: u64,
    /// Events whose bind or unbind failed.
    pub failed: u64,
}

impl WorkerStats {
    fn record(&mut self, disposition: &Disposition) {
        self.handled += 1;
        match disposition {
            Disposition::Skipped(_) => self.skipped += 1,
            Disposition::Bound(_) => self.bound += 1,
            Disposition::Unbound(_) => self.unbound += 1,
            Disposition::Failed(_) => self.failed += 1,
        }
    }
}

/// Handle to the worker thread.
#[derive(Debug)]
pub struct Worker {
    sender: Sender<Message>,
    thread: JoinHandle<WorkerStats>,
}

impl Worker {
    /// Starts the worker thread running `orchestrator`.
    ///
    /// # Errors
    ///
    /// Returns [`NicError::Worker`] if the thread cannot be spawned.
    pub fn spawn(orchestrator: Orchestrator) -> Result<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || run(&orchestrator, &receiver))
            .map_err(|e| NicError::Worker {
                message: format!("failed to spawn worker thread: {e}"),
            })?;
        Ok(Self { sender, thread })
    }

    /// A sender that can feed the worker from other threads.
    #[must_use]
    pub fn sender(&self) -> Sender<Message> {
        self.sender.clone()
    }

    /// Queues `event` for handling.
    ///
    /// # Errors
    ///
    /// Returns [`NicError::Worker`] if the worker has already stopped.
    pub fn submit(&self, event: WorkloadEvent) -> Result<()> {
        self.sender
            .send(Message::Event(Box::new(event)))
            .map_err(|_| NicError::Worker {
                message: "worker is no longer running".into(),
            })
    }

    /// Waits for the worker to stop on its own, after a
    /// [`Message::Shutdown`] or once every sender is gone.
    ///
    /// # Errors
    ///
    /// Returns [`NicError::Worker`] if the worker thread panicked.
    pub fn join(self) -> Result<WorkerStats> {
        drop(self.sender);
        self.thread.join().map_err(|_| NicError::Worker {
            message: "worker thread panicked".into(),
        })
    }

    /// Asks the worker to stop after the queued events and waits for it.
    ///
    /// # Errors
    ///
    /// Returns [`NicError::Worker`] if the worker thread panicked.
    pub fn shutdown(self) -> Result<WorkerStats> {
        let _ = self.sender.send(Message::Shutdown);
        self.join()
    }
}

fn run(orchestrator: &Orchestrator, receiver: &Receiver<Message>) -> WorkerStats {
    tracing::info!("event worker started");
    let mut stats = WorkerStats::default();
    for message in receiver {
        match message {
            Message::Event(event) => {
                let disposition = orchestrator.handle(&event);
                stats.record(&disposition);
            }
            Message::Shutdown => {
                tracing::info!("event worker shutting down");
                break;
            }
        }
    }
    tracing::info!(
        handled = stats.handled,
        bound = stats.bound,
        unbound = stats.unbound,
        skipped = stats.skipped,
        failed = stats.failed,
        "event worker stopped"
    );
    stats
}
