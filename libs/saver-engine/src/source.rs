//! Line-oriented TCP producer.
//!
//! Every newline-terminated line received on a connection becomes one
//! payload stamped with its arrival time and is passed to the handler.
//! Handler errors are logged; the line is not retried.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use saver_api::{Payload, PayloadHandler, SaverError, Stoppable};

use crate::config::SourceConfig;

pub struct LineSource {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    connections: TaskTracker,
    accept: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for LineSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineSource")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl LineSource {
    /// Bind the listener and start accepting connections.
    pub async fn bind(config: &SourceConfig, handler: Arc<dyn PayloadHandler>) -> Result<Arc<Self>, SaverError> {
        let listener = TcpListener::bind(&config.listen).await.map_err(|e| {
            let msg = format!("bind {}: {e}", config.listen);
            match e.kind() {
                io::ErrorKind::InvalidInput => SaverError::config(msg),
                _ => SaverError::io(msg),
            }
        })?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let connections = TaskTracker::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            handler,
            config.max_line_length,
            cancel.clone(),
            connections.clone(),
        ));

        tracing::info!(
            address = %local_addr,
            max_line_length = config.max_line_length,
            "line source listening"
        );
        Ok(Arc::new(Self {
            local_addr,
            cancel,
            connections,
            accept: Mutex::new(Some(accept)),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Stoppable for LineSource {
    fn name(&self) -> &str {
        "source"
    }

    /// Stop accepting, close every connection and wait for in-flight
    /// lines to reach the handler.
    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
        Box::pin(async move {
            self.cancel.cancel();
            let accept = match self.accept.lock() {
                Ok(mut g) => g.take(),
                Err(poisoned) => poisoned.into_inner().take(),
            };
            if let Some(handle) = accept {
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "accept loop panicked");
                }
            }
            self.connections.close();
            self.connections.wait().await;
            tracing::info!(address = %self.local_addr, "line source stopped");
            Ok(())
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn PayloadHandler>,
    max_line_length: usize,
    cancel: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "connection opened");
                    let handler = handler.clone();
                    let cancel = cancel.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, handler, max_line_length, cancel).await {
                            if !is_connection_reset(&e) {
                                tracing::debug!(peer = %peer, error = %e, "connection read error");
                            }
                        }
                        tracing::debug!(peer = %peer, "connection closed");
                    });
                }
                Err(e) => tracing::warn!(error = %e, "accept error"),
            },
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<dyn PayloadHandler>,
    max_line_length: usize,
    cancel: CancellationToken,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        let read = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            read = read_bounded_line(&mut reader, &mut line, max_line_length) => read?,
        };
        match read {
            LineRead::Eof => return Ok(()),
            LineRead::TooLong => {
                tracing::warn!(max = max_line_length, "line too long, dropped");
            }
            LineRead::Line => {
                let data = trim_newline(&line);
                if data.is_empty() {
                    continue;
                }
                let payload = Payload::new(Utc::now().timestamp_millis(), data);
                if let Err(e) = handler.process(payload).await {
                    tracing::warn!(error = %e, "payload rejected");
                }
            }
        }
    }
}

enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// Read one line into `buf`, including its newline. A line longer than
/// `max` (0 = unlimited) is consumed up to its newline and reported as
/// `TooLong` without buffering it. A final line without newline still counts.
async fn read_bounded_line<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> io::Result<LineRead> {
    buf.clear();
    let mut total = 0usize;
    let mut too_long = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if total == 0 {
                return Ok(LineRead::Eof);
            }
            break;
        }

        let (take, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };

        if !too_long {
            let content = if done { take - 1 } else { take };
            if max > 0 && buf.len() + content > max {
                too_long = true;
                buf.clear();
            } else {
                buf.extend_from_slice(&available[..take]);
            }
        }
        total += take;
        reader.consume(take);

        if done {
            break;
        }
    }

    if too_long {
        buf.clear();
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

fn trim_newline(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    if end > 0 && line[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && line[end - 1] == b'\r' {
        end -= 1;
    }
    &line[..end]
}

fn is_connection_reset(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

#[cfg(test)]
#[path = "source_test.rs"]
mod source_test;
