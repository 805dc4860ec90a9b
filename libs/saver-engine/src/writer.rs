use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Deserialize;

use saver_api::{PartitionKey, SaverError};

use crate::buffer::Batch;
use crate::filename::{self, AllocatedFile};

/// How a batch is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteShape {
    /// One file per payload, raw bytes.
    PerPayload,
    /// One file per batch, payloads as newline-terminated records.
    #[default]
    PerBatch,
}

/// A file written by the saver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub bytes: u64,
}

/// A batch that could not be fully written.
///
/// `remaining` holds exactly the payloads that are not on disk, so it can be
/// re-queued without duplicating anything in `written`.
#[derive(Debug)]
pub struct WriteFailure {
    pub error: SaverError,
    pub written: Vec<FileRecord>,
    pub remaining: Batch,
}

/// Writes drained batches under a root directory. All methods block on I/O.
#[derive(Debug, Clone)]
pub struct BatchWriter {
    root: PathBuf,
    shape: WriteShape,
}

impl BatchWriter {
    pub fn new(root: impl Into<PathBuf>, shape: WriteShape) -> Self {
        Self { root: root.into(), shape }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn shape(&self) -> WriteShape {
        self.shape
    }

    pub fn dir_for(&self, key: Option<&PartitionKey>) -> PathBuf {
        match key {
            Some(key) => key.dir_under(&self.root),
            None => self.root.clone(),
        }
    }

    pub fn write(&self, batch: Batch) -> Result<Vec<FileRecord>, WriteFailure> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let dir = self.dir_for(batch.key.as_ref());
        if let Err(e) = std::fs::create_dir_all(&dir) {
            return Err(WriteFailure {
                error: SaverError::io(format!("mkdir {}: {e}", dir.display())),
                written: Vec::new(),
                remaining: batch,
            });
        }
        match self.shape {
            WriteShape::PerBatch => write_batch_file(&dir, batch),
            WriteShape::PerPayload => write_payload_files(&dir, batch),
        }
    }
}

/// Allocate a file in `dir`, recreating the directory once if the quota
/// sweep pruned it after `write` created it.
fn allocate(dir: &Path) -> std::io::Result<AllocatedFile> {
    match filename::create_exclusive(dir, Utc::now()) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            std::fs::create_dir_all(dir)?;
            filename::create_exclusive(dir, Utc::now())
        }
        result => result,
    }
}

/// Remove a partially written file. A leftover would duplicate payloads once
/// the batch is retried.
fn discard_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove partial file");
    }
}

fn write_batch_file(dir: &Path, batch: Batch) -> Result<Vec<FileRecord>, WriteFailure> {
    let allocated = match allocate(dir) {
        Ok(a) => a,
        Err(e) => {
            return Err(WriteFailure {
                error: SaverError::io(format!("create in {}: {e}", dir.display())),
                written: Vec::new(),
                remaining: batch,
            });
        }
    };

    let path = allocated.path;
    let mut out = BufWriter::new(allocated.file);
    let result = (|| {
        let mut bytes = 0u64;
        for payload in &batch.payloads {
            out.write_all(&payload.data)?;
            out.write_all(b"\n")?;
            bytes += payload.data.len() as u64 + 1;
        }
        out.flush()?;
        out.get_ref().sync_data()?;
        Ok::<u64, std::io::Error>(bytes)
    })();

    match result {
        Ok(bytes) => Ok(vec![FileRecord { path, bytes }]),
        Err(e) => {
            drop(out);
            discard_partial(&path);
            Err(WriteFailure {
                error: SaverError::io(format!("write {}: {e}", path.display())),
                written: Vec::new(),
                remaining: batch,
            })
        }
    }
}

fn write_payload_files(dir: &Path, batch: Batch) -> Result<Vec<FileRecord>, WriteFailure> {
    let Batch { key, payloads } = batch;
    let mut written = Vec::with_capacity(payloads.len());
    let mut iter = payloads.into_iter();

    while let Some(payload) = iter.next() {
        let result = allocate(dir).and_then(|mut allocated| {
            let write = allocated
                .file
                .write_all(&payload.data)
                .and_then(|()| allocated.file.sync_data());
            match write {
                Ok(()) => Ok(allocated.path),
                Err(e) => {
                    drop(allocated.file);
                    discard_partial(&allocated.path);
                    Err(e)
                }
            }
        });

        match result {
            Ok(path) => written.push(FileRecord { path, bytes: payload.data.len() as u64 }),
            Err(e) => {
                let mut remaining = vec![payload];
                remaining.extend(iter);
                return Err(WriteFailure {
                    error: SaverError::io(format!("write in {}: {e}", dir.display())),
                    written,
                    remaining: Batch::new(key, remaining),
                });
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
#[path = "writer_test.rs"]
mod writer_test;
