//! Background purging of expired limiter and cache state.
//!
//! Expired state is already dropped lazily on access. The sweeper bounds
//! memory for keys that are never touched again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Something holding time-bounded state that can be purged in bulk.
///
/// Implementations must take the same lock their request path uses.
pub trait Sweep: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Drop expired state and return how many entries were removed.
    fn sweep(&self) -> usize;
}

/// Run one sweep over every target, returning the total removed.
pub fn sweep_all(targets: &[Arc<dyn Sweep>]) -> usize {
    targets
        .iter()
        .map(|target| {
            let removed = target.sweep();
            if removed > 0 {
                debug!(target_name = %target.name(), removed = removed, "Swept expired entries");
            }
            removed
        })
        .sum()
}

/// Periodic sweeper running on the tokio runtime.
pub struct Sweeper;

impl Sweeper {
    /// Spawn a task that sweeps `targets` every `interval`.
    ///
    /// The first sweep happens one interval after spawning. The task stops
    /// when [`SweeperHandle::shutdown`] is called or the handle is dropped.
    pub fn spawn(interval: Duration, targets: Vec<Arc<dyn Sweep>>) -> SweeperHandle {
        let interval = interval.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = interval.as_millis() as u64,
            targets = targets.len(),
            "Starting background sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_all(&targets);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Background sweeper stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Handle to a running [`Sweeper`] task.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.task.await;
    }

    /// Whether the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
