//! Background persist worker.
//!
//! Fast-path writes return as soon as memory is updated and hand the table
//! to this worker. Jobs wait in a bounded queue and a dispatcher runs at most
//! `max_in_flight` of them at once. Submission never blocks. While a table
//! has a job queued, further submissions for it are folded into that job,
//! since the job snapshots whatever the table holds when it starts.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::PersistConfig;
use crate::controller::TableController;
use crate::error::{TableError, TableResult};
use crate::policy::PublishPolicy;

/// How [`PersistWorker::shutdown`] treats outstanding jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Run every queued and running job to completion.
    Drain,
    /// Drop queued jobs and abort running ones.
    Discard,
}

/// Job counts reported at shutdown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub completed: usize,
    pub failed: usize,
    pub discarded: usize,
}

impl PersistStats {
    fn record(&mut self, joined: Result<bool, JoinError>) {
        match joined {
            Ok(true) => self.completed += 1,
            Ok(false) => self.failed += 1,
            Err(err) if err.is_cancelled() => self.discarded += 1,
            Err(err) => {
                error!(error = %err, "background persist task panicked");
                self.failed += 1;
            }
        }
    }
}

/// Bounded pool running [`TableController::background_persist`] jobs.
#[derive(Debug)]
pub struct PersistWorker {
    sender: Mutex<Option<mpsc::Sender<Arc<TableController>>>>,
    discard: watch::Sender<bool>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<PersistStats>>>,
}

enum Next {
    Job(Arc<TableController>),
    Closed,
    Discard,
}

impl PersistWorker {
    /// Start the dispatcher on the current runtime.
    pub fn start(config: &PersistConfig) -> Self {
        let (sender, queue) = mpsc::channel(config.queue_capacity.max(1));
        let (discard, discard_rx) = watch::channel(false);
        let dispatcher = tokio::spawn(dispatch(queue, discard_rx, config.max_in_flight.max(1)));
        info!(
            queue_capacity = config.queue_capacity,
            max_in_flight = config.max_in_flight,
            "persist worker started"
        );
        Self {
            sender: Mutex::new(Some(sender)),
            discard,
            dispatcher: tokio::sync::Mutex::new(Some(dispatcher)),
        }
    }

    /// Queue a background persist for `controller`.
    ///
    /// Returns `Ok(false)` when a job for this table is already queued.
    pub fn submit(&self, controller: Arc<TableController>) -> TableResult<bool> {
        let guard = self.sender.lock().expect("lock poisoned");
        let Some(sender) = guard.as_ref() else {
            return Err(TableError::PersisterClosed);
        };
        if !controller.try_mark_persist_queued() {
            debug!(table = %controller.id(), "persist already queued");
            return Ok(false);
        }
        match sender.try_send(controller) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(controller)) => {
                controller.clear_persist_queued();
                Err(TableError::PersistQueueFull)
            }
            Err(TrySendError::Closed(controller)) => {
                controller.clear_persist_queued();
                Err(TableError::PersisterClosed)
            }
        }
    }

    /// Stop accepting jobs and wind down the dispatcher.
    ///
    /// Safe to call more than once; later calls report empty stats.
    pub async fn shutdown(&self, mode: ShutdownMode) -> PersistStats {
        drop(self.sender.lock().expect("lock poisoned").take());
        if mode == ShutdownMode::Discard {
            let _ = self.discard.send(true);
        }
        let Some(handle) = self.dispatcher.lock().await.take() else {
            return PersistStats::default();
        };
        let stats = handle.await.unwrap_or_else(|err| {
            error!(error = %err, "persist dispatcher failed");
            PersistStats::default()
        });
        info!(
            ?mode,
            completed = stats.completed,
            failed = stats.failed,
            discarded = stats.discarded,
            "persist worker stopped"
        );
        stats
    }
}

async fn dispatch(
    mut queue: mpsc::Receiver<Arc<TableController>>,
    mut discard: watch::Receiver<bool>,
    max_in_flight: usize,
) -> PersistStats {
    let permits = Arc::new(Semaphore::new(max_in_flight));
    let mut running: JoinSet<bool> = JoinSet::new();
    let mut stats = PersistStats::default();

    loop {
        while let Some(joined) = running.try_join_next() {
            stats.record(joined);
        }

        let next = tokio::select! {
            biased;
            Ok(()) = discard.changed() => Next::Discard,
            job = queue.recv() => job.map_or(Next::Closed, Next::Job),
        };
        let controller = match next {
            Next::Job(controller) => controller,
            Next::Closed => break,
            Next::Discard => {
                discard_all(&mut queue, &mut running, &mut stats).await;
                return stats;
            }
        };

        let permit = tokio::select! {
            biased;
            Ok(()) = discard.changed() => None,
            permit = permits.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            controller.clear_persist_queued();
            stats.discarded += 1;
            discard_all(&mut queue, &mut running, &mut stats).await;
            return stats;
        };
        running.spawn(async move {
            let _permit = permit;
            run_job(controller).await
        });
    }

    while let Some(joined) = running.join_next().await {
        stats.record(joined);
    }
    stats
}

async fn discard_all(
    queue: &mut mpsc::Receiver<Arc<TableController>>,
    running: &mut JoinSet<bool>,
    stats: &mut PersistStats,
) {
    running.abort_all();
    while let Some(joined) = running.join_next().await {
        stats.record(joined);
    }
    queue.close();
    while let Ok(controller) = queue.try_recv() {
        controller.clear_persist_queued();
        stats.discarded += 1;
    }
    if stats.discarded > 0 {
        warn!(discarded = stats.discarded, "background persists discarded");
    }
}

async fn run_job(controller: Arc<TableController>) -> bool {
    controller.clear_persist_queued();
    match controller.background_persist(PublishPolicy::Propagate).await {
        Ok(receipt) => {
            info!(
                table = %controller.id(),
                digest = %receipt.digest,
                revision = receipt.revision,
                published = receipt.published,
                "background persist finished"
            );
            true
        }
        Err(err) => {
            error!(table = %controller.id(), error = %err, "background persist failed");
            false
        }
    }
}
