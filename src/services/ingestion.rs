//! Bounded, best-effort ingestion of engagement events
//!
//! Request handlers hand events to [`ViewQueue::enqueue`], which never waits:
//! when the buffer is full the event is dropped. A pool of workers shares the
//! receiving end, batches events and persists each batch with one insert.
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex, OnceLock,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch, Mutex,
    },
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    models::{IngestionEvent, ItemId},
    services::catalog::EventSink,
};

#[derive(Debug, Default)]
struct QueueStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    persisted: AtomicU64,
    failed_flushes: AtomicU64,
}

/// Point-in-time view of the queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub accepted: u64,
    pub dropped: u64,
    pub persisted: u64,
    pub failed_flushes: u64,
}

struct Running {
    // Taken on shutdown; once `None`, no send can land after the final drain
    tx: StdMutex<Option<mpsc::Sender<IngestionEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

pub struct ViewQueue {
    sink: Arc<dyn EventSink>,
    batch_size: usize,
    flush_interval: Duration,
    running: OnceLock<Running>,
    stats: Arc<QueueStats>,
}

impl ViewQueue {
    pub fn new(sink: Arc<dyn EventSink>, batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            sink,
            batch_size: batch_size.max(1),
            flush_interval,
            running: OnceLock::new(),
            stats: Arc::new(QueueStats::default()),
        }
    }

    /// Spawns the workers and opens the buffer
    ///
    /// Must be called from within a Tokio runtime. Only the first call has
    /// any effect; it returns `true`.
    pub fn start(&self, buffer_size: usize, workers: usize) -> bool {
        let mut started = false;

        self.running.get_or_init(|| {
            started = true;
            let (tx, rx) = mpsc::channel(buffer_size.max(1));
            let (shutdown_tx, _) = watch::channel(false);
            let rx = Arc::new(Mutex::new(rx));

            let handles = (0..workers.max(1))
                .map(|worker_id| {
                    tokio::spawn(worker_loop(
                        worker_id,
                        rx.clone(),
                        shutdown_tx.subscribe(),
                        self.sink.clone(),
                        self.batch_size,
                        self.flush_interval,
                        self.stats.clone(),
                    ))
                })
                .collect();

            tracing::info!(
                buffer_size,
                workers,
                batch_size = self.batch_size,
                flush_interval_ms = self.flush_interval.as_millis() as u64,
                "View ingestion queue started"
            );

            Running {
                tx: StdMutex::new(Some(tx)),
                shutdown_tx,
                workers: Mutex::new(handles),
            }
        });

        started
    }

    /// Records that an item was viewed just now
    pub fn enqueue(&self, item_id: ItemId) {
        self.enqueue_event(IngestionEvent::viewed_now(item_id));
    }

    /// Offers an event to the buffer without waiting; drops it when full,
    /// not started, or shut down
    pub fn enqueue_event(&self, event: IngestionEvent) {
        let Some(running) = self.running.get() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let Ok(tx) = running.tx.lock() else {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match tx.as_ref().map(|tx| tx.try_send(event)) {
            Some(Ok(())) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Some(Err(TrySendError::Full(_))) | Some(Err(TrySendError::Closed(_))) | None => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Stops the workers after a final drain and waits for them to exit
    pub async fn shutdown(&self) {
        let Some(running) = self.running.get() else {
            return;
        };
        let sender = match running.tx.lock() {
            Ok(mut tx) => tx.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(sender);
        let _ = running.shutdown_tx.send(true);

        let handles = std::mem::take(&mut *running.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Ingestion worker exited abnormally");
            }
        }

        let stats = self.snapshot();
        tracing::info!(
            accepted = stats.accepted,
            dropped = stats.dropped,
            persisted = stats.persisted,
            failed_flushes = stats.failed_flushes,
            "View ingestion queue stopped"
        );
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            persisted: self.stats.persisted.load(Ordering::Relaxed),
            failed_flushes: self.stats.failed_flushes.load(Ordering::Relaxed),
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<IngestionEvent>>>,
    mut shutdown_rx: watch::Receiver<bool>,
    sink: Arc<dyn EventSink>,
    batch_size: usize,
    flush_interval: Duration,
    stats: Arc<QueueStats>,
) {
    tracing::debug!(worker_id, "Ingestion worker started");
    let mut batch: Vec<IngestionEvent> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                flush(sink.as_ref(), &mut batch, &stats).await;
            }
            event = next_event(&rx) => match event {
                Some(event) => {
                    batch.push(event);
                    if batch.len() >= batch_size {
                        flush(sink.as_ref(), &mut batch, &stats).await;
                    }
                }
                None => break,
            },
        }
    }

    {
        let mut rx = rx.lock().await;
        while let Ok(event) = rx.try_recv() {
            batch.push(event);
        }
    }

    let mut remaining = std::mem::take(&mut batch);
    tracing::debug!(worker_id, pending = remaining.len(), "Ingestion worker draining");
    while !remaining.is_empty() {
        let rest = remaining.split_off(remaining.len().min(batch_size));
        flush(sink.as_ref(), &mut remaining, &stats).await;
        remaining = rest;
    }

    tracing::debug!(worker_id, "Ingestion worker stopped");
}

async fn next_event(rx: &Mutex<mpsc::Receiver<IngestionEvent>>) -> Option<IngestionEvent> {
    rx.lock().await.recv().await
}

async fn flush(sink: &dyn EventSink, batch: &mut Vec<IngestionEvent>, stats: &QueueStats) {
    if batch.is_empty() {
        return;
    }
    let events = std::mem::take(batch);

    match sink.insert_views(&events).await {
        Ok(written) => {
            stats.persisted.fetch_add(written, Ordering::Relaxed);
            tracing::trace!(written, "View batch persisted");
        }
        Err(e) => {
            stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, count = events.len(), "Dropping view batch after failed insert");
        }
    }
}
