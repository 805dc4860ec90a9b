use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use saver_api::{PartitionKey, Payload};

use crate::bucket::TimeBucket;

/// Payloads accumulated for one partition since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub key: Option<PartitionKey>,
    pub payloads: Vec<Payload>,
}

impl Batch {
    pub fn new(key: Option<PartitionKey>, payloads: Vec<Payload>) -> Self {
        Self { key, payloads }
    }

    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Total payload bytes, excluding record separators.
    pub fn bytes(&self) -> usize {
        self.payloads.iter().map(Payload::len).sum()
    }
}

#[derive(Default)]
struct Inner {
    batches: HashMap<Option<PartitionKey>, Vec<Payload>>,
    pending: usize,
    /// Bucket id of the previous `add` (bucketed mode only).
    bucket: Option<i64>,
}

/// In-memory accumulator shared by ingestion and the flush worker.
///
/// The lock is only ever held for in-memory moves; callers do all I/O
/// on the batches returned by [`drain`](Self::drain) / [`add`](Self::add)
/// after it is released.
pub struct BatchBuffer {
    inner: Mutex<Inner>,
    bucket: Option<TimeBucket>,
}

impl std::fmt::Debug for BatchBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchBuffer")
            .field("bucket", &self.bucket)
            .field("pending", &self.len())
            .finish()
    }
}

impl Default for BatchBuffer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl BatchBuffer {
    pub fn new(bucket: Option<TimeBucket>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            bucket,
        }
    }

    pub fn bucket(&self) -> Option<TimeBucket> {
        self.bucket
    }

    /// Append a payload to its partition's batch.
    ///
    /// In bucketed mode, a payload whose time bucket differs from the one seen
    /// at the previous call first carries out everything buffered so far; the
    /// carried batches are returned and must be written by the caller.
    /// Otherwise the returned vector is empty.
    pub fn add(&self, payload: Payload, key: Option<PartitionKey>) -> Vec<Batch> {
        let carried = {
            let mut inner = self.lock();
            let carried = match self.bucket {
                Some(bucket) => {
                    let id = bucket.bucket_id(payload.ts_ms);
                    let changed = inner.bucket.is_some_and(|prev| prev != id);
                    inner.bucket = Some(id);
                    if changed { take(&mut inner) } else { HashMap::new() }
                }
                None => HashMap::new(),
            };
            inner.pending += 1;
            inner.batches.entry(key).or_default().push(payload);
            carried
        };
        into_batches(carried)
    }

    /// Swap the buffered contents for an empty set and return them.
    pub fn drain(&self) -> Vec<Batch> {
        let taken = take(&mut self.lock());
        into_batches(taken)
    }

    /// Number of buffered payloads.
    pub fn len(&self) -> usize {
        self.lock().pending
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("batch buffer lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn take(inner: &mut Inner) -> HashMap<Option<PartitionKey>, Vec<Payload>> {
    inner.pending = 0;
    std::mem::take(&mut inner.batches)
}

fn into_batches(map: HashMap<Option<PartitionKey>, Vec<Payload>>) -> Vec<Batch> {
    let mut batches: Vec<Batch> = map
        .into_iter()
        .map(|(key, payloads)| Batch::new(key, payloads))
        .collect();
    batches.sort_by(|a, b| a.key.cmp(&b.key));
    batches
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod buffer_test;
