use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{jittered, PollWorker};

/// A running loop. Dropping the handle does not stop the loop.
pub struct LoopHandle {
    name: String,
    cancel: CancellationToken,
    wake: Arc<Notify>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the loop to stop. A unit already in flight is finished first.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cuts the current nap short.
    pub fn awaken(&self) {
        self.wake.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    pub async fn join(self) {
        if let Err(e) = self.join.await {
            error!(worker = %self.name, "loop task failed: {}", e);
        }
    }
}

/// Forces the stop flag if the loop exits without being asked to.
struct ExitGuard {
    name: String,
    cancel: CancellationToken,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            warn!(worker = %self.name, "loop exited without stop being requested");
            self.cancel.cancel();
        }
    }
}

/// Spawns `worker` on the current runtime and returns its handle.
pub fn spawn_poll_loop<W: PollWorker>(worker: Arc<W>) -> LoopHandle {
    let name = worker.name().to_string();
    let cancel = CancellationToken::new();
    let wake = Arc::new(Notify::new());

    let join = tokio::spawn(run_loop(worker, cancel.clone(), wake.clone()));

    LoopHandle {
        name,
        cancel,
        wake,
        join,
    }
}

async fn run_loop<W: PollWorker>(worker: Arc<W>, cancel: CancellationToken, wake: Arc<Notify>) {
    let _guard = ExitGuard {
        name: worker.name().to_string(),
        cancel: cancel.clone(),
    };

    info!(worker = %worker.name(), "starting");
    if let Err(e) = worker.init().await {
        error!(worker = %worker.name(), "init failed: {}", e);
    }

    while !cancel.is_cancelled() {
        let progressed = match worker.poll_once(&cancel).await {
            Ok(progressed) => progressed,
            Err(e) => {
                error!(worker = %worker.name(), "iteration failed: {}", e);
                false
            }
        };
        if progressed || cancel.is_cancelled() {
            continue;
        }

        let delay = jittered(worker.poll_interval());
        debug!(worker = %worker.name(), ?delay, "napping");
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = wake.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(worker = %worker.name(), "stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{MediaflowError, OperationError, Result};

    struct Counting {
        polls: AtomicUsize,
        fail_every: usize,
        interval: Duration,
    }

    #[async_trait]
    impl PollWorker for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn poll_interval(&self) -> Duration {
            self.interval
        }

        async fn poll_once(&self, _stop: &CancellationToken) -> Result<bool> {
            let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(MediaflowError::Operation(OperationError::Failed {
                    operation: "count".into(),
                    message: "boom".into(),
                }));
            }
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_loop_survives_errors_and_stops() {
        let worker = Arc::new(Counting {
            polls: AtomicUsize::new(0),
            fail_every: 2,
            interval: Duration::from_millis(1),
        });
        let handle = spawn_poll_loop(worker.clone());

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop();
        handle.join().await;

        assert!(worker.polls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_awaken_cuts_nap_short() {
        let worker = Arc::new(Counting {
            polls: AtomicUsize::new(0),
            fail_every: 0,
            interval: Duration::from_secs(3600),
        });
        let handle = spawn_poll_loop(worker.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.polls.load(Ordering::SeqCst), 1);

        handle.awaken();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(worker.polls.load(Ordering::SeqCst), 2);

        handle.stop();
        tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .unwrap();
    }
}
