use anyhow::Result;
use log::debug;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Result of a workflow operation. Cancellation is a normal outcome, not an error.
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Cancelled,
    /// Preconditions unmet; nothing was sent.
    Rejected(String),
    Failed(anyhow::Error),
}

impl<T> Outcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Outcome::Rejected(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Completed(v) => Outcome::Completed(f(v)),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::Rejected(msg) => Outcome::Rejected(msg),
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(v) => Some(v),
            _ => None,
        }
    }
}

/// A token handed out by [`RequestController::begin`].
#[derive(Debug, Clone)]
pub struct Lease {
    generation: u64,
    token: CancellationToken,
}

impl Lease {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `fut` until it finishes or the lease is cancelled.
    pub async fn run<T, F>(&self, fut: F) -> Outcome<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Outcome::Cancelled,
            res = fut => match res {
                Ok(v) => Outcome::Completed(v),
                // The transport may surface an abort as an error.
                Err(_) if self.token.is_cancelled() => Outcome::Cancelled,
                Err(e) => Outcome::Failed(e),
            },
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    live: Option<CancellationToken>,
}

/// Holds at most one live cancellation token per session.
#[derive(Debug, Clone, Default)]
pub struct RequestController {
    slot: Arc<Mutex<Slot>>,
}

impl RequestController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Cancels the current holder, if any, and installs a fresh token.
    pub fn begin(&self) -> Lease {
        let mut slot = self.lock();
        if let Some(previous) = slot.live.take() {
            debug!("Cancelling previous request before starting a new one");
            previous.cancel();
        }
        slot.generation += 1;
        let token = CancellationToken::new();
        slot.live = Some(token.clone());
        Lease {
            generation: slot.generation,
            token,
        }
    }

    /// Signals and clears the current token. Safe when idle.
    pub fn cancel(&self) {
        if let Some(token) = self.lock().live.take() {
            debug!("Cancelling in-flight request");
            token.cancel();
        }
    }

    /// Frees the slot after `lease` finished, unless a newer lease replaced it.
    pub fn release(&self, lease: &Lease) {
        let mut slot = self.lock();
        if slot.generation == lease.generation {
            slot.live = None;
        }
    }

    pub fn is_live(&self) -> bool {
        self.lock().live.is_some()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            controller: self.clone(),
        }
    }
}

/// Cancels whatever request is live, from outside the operation holding the workflow.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    controller: RequestController,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.controller.cancel();
    }
}
