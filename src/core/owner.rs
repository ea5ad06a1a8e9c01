//! Owner-context execution
//!
//! Some host resources may only be touched from the context that owns them.
//! [`OwnerHandle::invoke`] queues a closure for that context and returns a
//! future that resolves once the owner has run it. The owner drains the
//! queue either on a dedicated thread ([`OwnerQueue::spawn_thread`]) or by
//! calling [`OwnerQueue::drain`] from its own loop.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tokio::sync::{mpsc, oneshot};

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OwnerError {
    #[error("owner context is no longer running")]
    Closed,
    #[error("owner callback panicked: {0}")]
    Panicked(String),
}

/// Cloneable submission side of the owner queue.
#[derive(Clone, Debug)]
pub struct OwnerHandle {
    jobs: mpsc::UnboundedSender<Job>,
}

/// Receiving side, held by the owning context.
#[derive(Debug)]
pub struct OwnerQueue {
    jobs: mpsc::UnboundedReceiver<Job>,
}

pub fn owner_channel() -> (OwnerHandle, OwnerQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OwnerHandle { jobs: tx }, OwnerQueue { jobs: rx })
}

impl OwnerHandle {
    /// Run `work` on the owner and await its value.
    pub async fn invoke<F, T>(&self, work: F) -> Result<T, OwnerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(work)).map_err(panic_message);
            // The caller may have given up (timed out); nothing to report then.
            let _ = done_tx.send(outcome);
        });
        self.jobs.send(job).map_err(|_| OwnerError::Closed)?;
        done_rx
            .await
            .map_err(|_| OwnerError::Closed)?
            .map_err(OwnerError::Panicked)
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.is_closed()
    }
}

impl OwnerQueue {
    /// Run every job queued so far without blocking. Returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.jobs.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Block the current thread running jobs until every handle is dropped.
    pub fn run_blocking(mut self) {
        while let Some(job) = self.jobs.blocking_recv() {
            job();
        }
    }

    /// Move the queue onto a dedicated, named OS thread.
    pub fn spawn_thread(self, name: &str) -> std::io::Result<std::thread::JoinHandle<()>> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run_blocking())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
