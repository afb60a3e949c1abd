//! Caller-owned cancellation and deadlines for retry sequences.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a retry sequence stopped before running out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abort {
    /// The caller cancelled the work
    Cancelled,
    /// The caller's deadline passed
    DeadlineExceeded,
}

/// A cancellation signal plus an optional deadline.
///
/// The executor does not own either; it only observes them. Clones observe
/// the same signal.
#[derive(Debug, Clone)]
pub struct Cancellation {
    signal: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

/// The triggering side of a [`Cancellation`].
#[derive(Debug)]
pub struct CancelHandle {
    signal: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every [`Cancellation`] created from this handle.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }
}

impl Cancellation {
    /// Create a linked handle and signal.
    pub fn pair() -> (CancelHandle, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (
            CancelHandle { signal: tx },
            Cancellation {
                signal: rx,
                deadline: None,
            },
        )
    }

    /// A signal that is never cancelled and has no deadline.
    pub fn none() -> Self {
        let (_handle, cancellation) = Self::pair();
        cancellation
    }

    /// A signal with only a deadline `timeout` from now.
    pub fn timeout(timeout: Duration) -> Self {
        Self::none().with_timeout(timeout)
    }

    /// Add or tighten a deadline. An earlier existing deadline is kept.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Add or tighten a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the signal has been triggered.
    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// The reason to stop right now, if there is one.
    ///
    /// Cancellation wins over an expired deadline.
    pub fn check(&self) -> Option<Abort> {
        if self.is_cancelled() {
            return Some(Abort::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Abort::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the signal is triggered.
    ///
    /// Never resolves if the handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut signal = self.signal.clone();
        loop {
            if *signal.borrow_and_update() {
                return;
            }
            if signal.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Resolves with the first reason to stop.
    pub async fn aborted(&self) -> Abort {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancelled() => Abort::Cancelled,
            _ = deadline => Abort::DeadlineExceeded,
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::none()
    }
}
