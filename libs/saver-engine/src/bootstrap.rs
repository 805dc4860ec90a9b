use std::net::SocketAddr;
use std::sync::Arc;

use saver_api::{PayloadHandler, SaverError, Stoppable};

use crate::buffer::BatchBuffer;
use crate::config::{SaverConfig, SaverMode};
use crate::error::EngineError;
use crate::flush::{FlushReport, FlushWorker};
use crate::orderbook::OrderbookSink;
use crate::quota::{QuotaSweep, QuotaWorker};
use crate::shutdown::{ShutdownCoordinator, ShutdownReport};
use crate::sink::{BufferedSink, ImmediateSink};
use crate::source::LineSource;
use crate::writer::BatchWriter;

/// Shutdown priorities: producers first, then the final flush, then housekeeping.
pub const SOURCE_PRIORITY: i32 = 0;
pub const FLUSH_PRIORITY: i32 = 1;
pub const QUOTA_PRIORITY: i32 = 2;

/// The running saver: sinks, background workers and their shutdown order.
pub struct Saver {
    handler: Arc<dyn PayloadHandler>,
    flush: Option<Arc<FlushWorker>>,
    source: Option<Arc<LineSource>>,
    coordinator: ShutdownCoordinator,
    config: SaverConfig,
}

impl std::fmt::Debug for Saver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saver")
            .field("flush", &self.flush)
            .field("source", &self.source)
            .field("coordinator", &self.coordinator)
            .field("config", &self.config)
            .finish()
    }
}

impl Saver {
    /// Bootstrap the saver from a validated configuration.
    ///
    /// Creates the root directory, starts the workers the mode needs and
    /// registers each with the shutdown coordinator.
    pub async fn bootstrap(config: SaverConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let root = config.disk_path.clone();

        // --- 1. Root directory ---
        std::fs::create_dir_all(&root).map_err(|e| {
            EngineError::Saver(SaverError::from(e).with_context(format!("disk_path '{}'", root.display())))
        })?;

        let coordinator = ShutdownCoordinator::new();

        // --- 2. Sink ---
        let bucket = config.batching.bucket();
        let (handler, flush): (Arc<dyn PayloadHandler>, Option<Arc<FlushWorker>>) = match config.mode {
            SaverMode::Immediate => {
                if bucket.is_some() {
                    tracing::warn!("batching is ignored in immediate mode");
                }
                let handler: Arc<dyn PayloadHandler> = Arc::new(ImmediateSink::new(&root));
                (handler, None)
            }
            SaverMode::Raw | SaverMode::Orderbook => {
                let worker = FlushWorker::start(
                    Arc::new(BatchBuffer::new(bucket)),
                    BatchWriter::new(&root, config.write_shape),
                    config.flush_period(),
                    config.write_retries,
                );
                coordinator.register(FLUSH_PRIORITY, worker.clone())?;

                let sink = BufferedSink::new(worker.clone());
                let handler: Arc<dyn PayloadHandler> = match config.mode {
                    SaverMode::Orderbook => Arc::new(OrderbookSink::new(sink, bucket.is_some())),
                    _ => Arc::new(sink),
                };
                (handler, Some(worker))
            }
        };

        // --- 3. Quota sweep ---
        let sweep = QuotaSweep::new(&root, config.warning_size_gb, config.max_size_gb);
        if sweep.is_disabled() {
            tracing::info!("disk quota disabled");
        } else {
            let quota = QuotaWorker::start(sweep, config.sweep_period());
            coordinator.register(QUOTA_PRIORITY, quota)?;
        }

        // --- 4. Producer ---
        let source = match &config.source {
            Some(source_cfg) => match LineSource::bind(source_cfg, handler.clone()).await {
                Ok(source) => {
                    coordinator.register(SOURCE_PRIORITY, source.clone())?;
                    Some(source)
                }
                Err(e) => {
                    // Workers are already running: stop them before giving up.
                    coordinator.stop_all().await;
                    return Err(EngineError::from(e).with_context("source"));
                }
            },
            None => None,
        };

        tracing::info!(
            root = %root.display(),
            mode = ?config.mode,
            batching = ?config.batching,
            "saver started"
        );

        Ok(Saver {
            handler,
            flush,
            source,
            coordinator,
            config,
        })
    }

    /// Ingestion entry point for in-process producers.
    pub fn handler(&self) -> &Arc<dyn PayloadHandler> {
        &self.handler
    }

    pub fn config(&self) -> &SaverConfig {
        &self.config
    }

    /// Address the line source is bound to, if one is configured.
    pub fn source_addr(&self) -> Option<SocketAddr> {
        self.source.as_ref().map(|s| s.local_addr())
    }

    /// Flush buffered payloads now. No-op in immediate mode.
    pub async fn flush_now(&self) -> FlushReport {
        match &self.flush {
            Some(flush) => flush.flush_now().await,
            None => FlushReport::default(),
        }
    }

    /// Register an extra component (e.g. an external producer) for ordered shutdown.
    pub fn register(&self, priority: i32, component: Arc<dyn Stoppable>) -> Result<(), EngineError> {
        Ok(self.coordinator.register(priority, component)?)
    }

    /// Graceful shutdown: stop the source, flush everything, stop the sweep.
    pub async fn shutdown(self) -> ShutdownReport {
        let report = self.coordinator.stop_all().await;
        tracing::info!("saver shut down");
        report
    }
}
