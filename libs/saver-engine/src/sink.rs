//! Ingestion front-ends implementing `PayloadHandler`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use saver_api::{PartitionKey, Payload, PayloadHandler, SaverError};

use crate::buffer::Batch;
use crate::flush::FlushWorker;
use crate::writer::{BatchWriter, WriteShape};

/// Buffers payloads for the flush worker. Never touches the disk.
#[derive(Debug, Clone)]
pub struct BufferedSink {
    flush: Arc<FlushWorker>,
}

impl BufferedSink {
    pub fn new(flush: Arc<FlushWorker>) -> Self {
        Self { flush }
    }

    /// Buffer `payload` under `base`. In bucketed mode the payload's time
    /// bucket label is appended to the key; batches of a finished bucket are
    /// handed to the flush worker. Fails with `Shutdown` once the flush
    /// worker has stopped, so the producer keeps ownership of the payload.
    pub fn push(&self, payload: Payload, base: Option<PartitionKey>) -> Result<(), SaverError> {
        let key = match self.flush.buffer().bucket() {
            Some(bucket) => Some(bucket.partition(base.as_ref(), payload.ts_ms)?),
            None => base,
        };
        self.flush.ingest(payload, key)
    }
}

impl PayloadHandler for BufferedSink {
    fn process(
        &self,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
        Box::pin(async move { self.push(payload, None) })
    }
}

/// Writes every payload to its own file before acknowledging it.
#[derive(Debug, Clone)]
pub struct ImmediateSink {
    writer: Arc<BatchWriter>,
}

impl ImmediateSink {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            writer: Arc::new(BatchWriter::new(root, WriteShape::PerPayload)),
        }
    }

    pub async fn write(&self, payload: Payload) -> Result<(), SaverError> {
        let writer = self.writer.clone();
        let result = tokio::task::spawn_blocking(move || writer.write(Batch::new(None, vec![payload])))
            .await
            .map_err(|e| SaverError::io(format!("write task failed: {e}")))?;

        match result {
            Ok(_) => Ok(()),
            Err(failure) => {
                tracing::error!(
                    dir = %self.writer.root().display(),
                    error = %failure.error,
                    "couldn't write payload"
                );
                Err(failure.error)
            }
        }
    }
}

impl PayloadHandler for ImmediateSink {
    fn process(
        &self,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
        Box::pin(self.write(payload))
    }
}
