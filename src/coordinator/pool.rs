//! Worker pool lifecycle
//!
//! A fixed number of workers drain one shared queue. Stopping signals every
//! worker; each finishes the item in hand before exiting.

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::worker::{AgreementWorker, SharedWorkQueue, WorkerContext};

pub struct WorkerPool {
    workers: Vec<(String, JoinHandle<()>)>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn `count` workers on the current runtime. Returns immediately.
    pub fn start(count: usize, ctx: WorkerContext, queue: SharedWorkQueue) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let workers = (0..count)
            .map(|index| {
                let worker = AgreementWorker::new(index, ctx.clone());
                let id = worker.id().to_string();
                let handle = tokio::spawn(worker.run(queue.clone(), shutdown_rx.clone()));
                (id, handle)
            })
            .collect::<Vec<_>>();

        info!(workers = workers.len(), "Agreement worker pool started");
        Self {
            workers,
            shutdown_tx,
        }
    }

    /// Workers whose task is still running
    pub fn running(&self) -> usize {
        self.workers.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Signal every worker and wait for all of them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);

        let (ids, handles): (Vec<_>, Vec<_>) = self.workers.into_iter().unzip();
        for (id, result) in ids.iter().zip(join_all(handles).await) {
            if let Err(e) = result {
                warn!(worker_id = %id, error = %e, "Agreement worker ended abnormally");
            }
        }

        info!(workers = ids.len(), "Agreement worker pool stopped");
    }
}
