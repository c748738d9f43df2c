//! The poll-claim-process loop shared by every stage.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub mod poll;

pub use poll::{spawn_poll_loop, LoopHandle};

/// One stage of the pipeline, driven by [`spawn_poll_loop`].
#[async_trait]
pub trait PollWorker: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Base nap between iterations that made no progress.
    fn poll_interval(&self) -> Duration;

    /// Runs once before the first iteration.
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Claims and processes at most one unit of work.
    ///
    /// Returns `true` when something was processed, in which case the loop
    /// polls again without napping. Long inner waits must watch `stop`.
    async fn poll_once(&self, stop: &CancellationToken) -> Result<bool>;
}

/// `base` plus a uniform 10%..60% of `base`, so competing workers drift apart.
pub fn jittered(base: Duration) -> Duration {
    base + base.mul_f64(rand::random::<f64>() * 0.5 + 0.1)
}

/// Sleeps for `duration` unless `stop` fires first. Returns `false` when stopped.
pub async fn nap(duration: Duration, stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(duration) => !stop.is_cancelled(),
    }
}
