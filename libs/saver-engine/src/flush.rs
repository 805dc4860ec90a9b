//! Flush worker: periodically drains the batch buffer and writes it to disk.
//!
//! Every tick writes, in order, batches waiting in the pending queue (carried
//! out of the buffer on a time-bucket change, or re-queued after a failed
//! write) followed by whatever the buffer holds. Writing happens on the
//! blocking pool; the buffer lock is never held across I/O.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::time::Duration;

use tokio::sync::Notify;

use saver_api::{PartitionKey, Payload, SaverError, Stoppable};

use crate::buffer::{Batch, BatchBuffer};
use crate::periodic::PeriodicTask;
use crate::writer::BatchWriter;

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub batches: usize,
    pub payloads: usize,
    pub files: usize,
    pub bytes: u64,
    /// Batches that failed and were re-queued.
    pub requeued_batches: usize,
    /// Payloads dropped after exhausting their retries.
    pub dropped_payloads: usize,
}

#[derive(Debug)]
struct PendingBatch {
    batch: Batch,
    attempts: u32,
}

struct FlushState {
    buffer: Arc<BatchBuffer>,
    writer: Arc<BatchWriter>,
    pending: Mutex<VecDeque<PendingBatch>>,
    /// Serializes ticks, explicit flushes and the final flush.
    flush_lock: tokio::sync::Mutex<()>,
    write_retries: u32,
}

impl FlushState {
    fn pending(&self) -> MutexGuard<'_, VecDeque<PendingBatch>> {
        match self.pending.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("flush pending queue lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    async fn flush(&self) -> FlushReport {
        let _guard = self.flush_lock.lock().await;

        let mut work: Vec<PendingBatch> = self.pending().drain(..).collect();
        work.extend(
            self.buffer
                .drain()
                .into_iter()
                .map(|batch| PendingBatch { batch, attempts: 0 }),
        );
        if work.is_empty() {
            return FlushReport::default();
        }

        let writer = self.writer.clone();
        let (mut report, failed) = match tokio::task::spawn_blocking(move || write_all(&writer, work)).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "flush write task failed, batch lost");
                return FlushReport::default();
            }
        };

        for mut entry in failed {
            entry.attempts += 1;
            if entry.attempts <= self.write_retries {
                report.requeued_batches += 1;
                self.pending().push_back(entry);
            } else {
                report.dropped_payloads += entry.batch.len();
                tracing::error!(
                    dir = %self.writer.dir_for(entry.batch.key.as_ref()).display(),
                    payloads = entry.batch.len(),
                    attempts = entry.attempts,
                    "dropping batch after repeated write failures"
                );
            }
        }

        tracing::debug!(
            batches = report.batches,
            payloads = report.payloads,
            files = report.files,
            bytes = report.bytes,
            requeued = report.requeued_batches,
            "flushed"
        );
        report
    }
}

/// Blocking: write every batch, collecting failures for the caller to re-queue.
fn write_all(writer: &BatchWriter, work: Vec<PendingBatch>) -> (FlushReport, Vec<PendingBatch>) {
    let mut report = FlushReport::default();
    let mut failed = Vec::new();

    for PendingBatch { batch, attempts } in work {
        report.batches += 1;
        let count = batch.len();
        let dir = writer.dir_for(batch.key.as_ref());
        match writer.write(batch) {
            Ok(records) => {
                report.payloads += count;
                report.files += records.len();
                report.bytes += records.iter().map(|r| r.bytes).sum::<u64>();
            }
            Err(failure) => {
                tracing::error!(
                    dir = %dir.display(),
                    error = %failure.error,
                    written = failure.written.len(),
                    remaining = failure.remaining.len(),
                    "batch write failed"
                );
                report.payloads += count - failure.remaining.len();
                report.files += failure.written.len();
                report.bytes += failure.written.iter().map(|r| r.bytes).sum::<u64>();
                failed.push(PendingBatch { batch: failure.remaining, attempts });
            }
        }
    }
    (report, failed)
}

/// Owns the flush timer; stopping it forces one final flush.
pub struct FlushWorker {
    state: Arc<FlushState>,
    wake: Arc<Notify>,
    task: PeriodicTask,
    /// Cleared by `stop` before the final flush. Held for reading across
    /// every add, so nothing enters the buffer after the final drain.
    open: RwLock<bool>,
}

impl std::fmt::Debug for FlushWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushWorker")
            .field("root", &self.state.writer.root())
            .field("buffer", &self.state.buffer)
            .finish()
    }
}

impl FlushWorker {
    /// Spawn the flush loop on the current tokio runtime.
    pub fn start(
        buffer: Arc<BatchBuffer>,
        writer: BatchWriter,
        period: Duration,
        write_retries: u32,
    ) -> Arc<Self> {
        let state = Arc::new(FlushState {
            buffer,
            writer: Arc::new(writer),
            pending: Mutex::new(VecDeque::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            write_retries,
        });
        let wake = Arc::new(Notify::new());

        let tick_state = state.clone();
        let task = PeriodicTask::spawn("flush", period, Some(wake.clone()), move || {
            let state = tick_state.clone();
            async move {
                state.flush().await;
            }
        });

        tracing::info!(
            root = %state.writer.root().display(),
            shape = ?state.writer.shape(),
            period_secs = period.as_secs(),
            "flush worker started"
        );
        Arc::new(Self {
            state,
            wake,
            task,
            open: RwLock::new(true),
        })
    }

    pub fn buffer(&self) -> &Arc<BatchBuffer> {
        &self.state.buffer
    }

    fn gate(&self) -> RwLockReadGuard<'_, bool> {
        match self.open.read() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("flush gate lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn close(&self) {
        match self.open.write() {
            Ok(mut g) => *g = false,
            Err(poisoned) => *poisoned.into_inner() = false,
        }
    }

    /// Buffer `payload` under `key`. Batches of a finished time bucket are
    /// queued for writing. Fails once the worker has been stopped.
    pub fn ingest(&self, payload: Payload, key: Option<PartitionKey>) -> Result<(), SaverError> {
        let open = self.gate();
        if !*open {
            return Err(SaverError::shutdown("flush worker stopped, payload not accepted"));
        }
        let carried = self.state.buffer.add(payload, key);
        if !carried.is_empty() {
            tracing::debug!(batches = carried.len(), "time bucket closed");
            self.enqueue(carried);
        }
        Ok(())
    }

    /// Queue batches and wake the worker to write them. Fails once the
    /// worker has been stopped.
    pub fn submit(&self, batches: Vec<Batch>) -> Result<(), SaverError> {
        let open = self.gate();
        if !*open {
            return Err(SaverError::shutdown(format!(
                "flush worker stopped, {} batches not accepted",
                batches.len()
            )));
        }
        self.enqueue(batches);
        Ok(())
    }

    fn enqueue(&self, batches: Vec<Batch>) {
        if batches.is_empty() {
            return;
        }
        {
            let mut pending = self.state.pending();
            pending.extend(batches.into_iter().map(|batch| PendingBatch { batch, attempts: 0 }));
        }
        self.wake.notify_one();
    }

    pub fn is_stopped(&self) -> bool {
        !*self.gate()
    }

    /// Number of batches waiting outside the buffer.
    pub fn pending_batches(&self) -> usize {
        self.state.pending().len()
    }

    /// Flush right now, serialized with the periodic tick.
    pub async fn flush_now(&self) -> FlushReport {
        self.state.flush().await
    }

    /// Flush until nothing is left to write. Terminates because every failing
    /// batch is dropped once it exhausts its retries.
    async fn flush_all(&self) -> FlushReport {
        let mut total = self.flush_now().await;
        while self.pending_batches() > 0 {
            let report = self.flush_now().await;
            total.batches += report.batches;
            total.payloads += report.payloads;
            total.files += report.files;
            total.bytes += report.bytes;
            total.requeued_batches += report.requeued_batches;
            total.dropped_payloads += report.dropped_payloads;
        }
        total
    }
}

impl Stoppable for FlushWorker {
    fn name(&self) -> &str {
        self.task.name()
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
        Box::pin(async move {
            self.close();
            self.task.stop().await;
            let report = self.flush_all().await;
            tracing::info!(
                batches = report.batches,
                files = report.files,
                bytes = report.bytes,
                dropped = report.dropped_payloads,
                "final flush complete"
            );
            if report.dropped_payloads > 0 {
                return Err(SaverError::io(format!(
                    "final flush dropped {} payloads",
                    report.dropped_payloads
                )));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
#[path = "flush_test.rs"]
mod flush_test;
