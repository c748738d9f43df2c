//! Owns the stage loops of one process.

use std::sync::Arc;

use tracing::info;

use crate::stage::{AnalyzeWorker, ScanWorker, StageContext, TransformWorker, UploadWorker};
use crate::worker::{spawn_poll_loop, LoopHandle};

pub struct Coordinator {
    ctx: Arc<StageContext>,
    scanner: Option<LoopHandle>,
    loops: Vec<LoopHandle>,
}

impl Coordinator {
    pub fn new(ctx: StageContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            scanner: None,
            loops: Vec::new(),
        }
    }

    pub fn context(&self) -> &Arc<StageContext> {
        &self.ctx
    }

    /// Spawns every loop enabled by the `run_*` flags. Must be called from
    /// within a tokio runtime; calling it while running does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            info!(owner = %self.ctx.owner(), "coordinator already running");
            return;
        }
        let config = self.ctx.config.clone();
        info!(
            owner = %self.ctx.owner(),
            scanner = config.run_scanner,
            analyzer = config.run_analyzer,
            transformer = config.run_transformer,
            uploader = config.run_uploader,
            "starting coordinator"
        );

        if config.run_scanner {
            self.scanner = Some(spawn_poll_loop(Arc::new(ScanWorker::new(self.ctx.clone()))));
        }
        if config.run_analyzer {
            self.loops
                .push(spawn_poll_loop(Arc::new(AnalyzeWorker::new(self.ctx.clone()))));
        }
        if config.run_transformer {
            self.loops
                .push(spawn_poll_loop(Arc::new(TransformWorker::new(self.ctx.clone()))));
        }
        if config.run_uploader {
            self.loops
                .push(spawn_poll_loop(Arc::new(UploadWorker::new(self.ctx.clone()))));
        }
    }

    pub fn is_running(&self) -> bool {
        self.handles().any(|h| !h.is_finished())
    }

    /// Names of the loops that were started.
    pub fn running_loops(&self) -> Vec<String> {
        self.handles().map(|h| h.name().to_string()).collect()
    }

    /// Asks every loop to stop after its current unit of work.
    pub fn stop(&self) {
        info!(owner = %self.ctx.owner(), "stopping coordinator");
        for handle in self.handles() {
            handle.stop();
        }
    }

    /// Cuts the scan loop's nap short.
    pub fn awaken(&self) {
        if let Some(scanner) = &self.scanner {
            scanner.awaken();
        }
    }

    /// Waits for every loop to exit.
    pub async fn join(&mut self) {
        if let Some(scanner) = self.scanner.take() {
            scanner.join().await;
        }
        for handle in self.loops.drain(..) {
            handle.join().await;
        }
    }

    fn handles(&self) -> impl Iterator<Item = &LoopHandle> {
        self.scanner.iter().chain(self.loops.iter())
    }
}
