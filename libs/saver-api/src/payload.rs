use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::SaverError;

/// One unit of ingested data. The engine only knows `ts_ms`.
/// `data` is opaque bytes; the engine never interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Timestamp in milliseconds: arrival time for raw payloads,
    /// record time for structured ones. Drives time bucketing.
    pub ts_ms: i64,
    /// Opaque bytes.
    pub data: Vec<u8>,
}

impl Payload {
    pub fn new(ts_ms: i64, data: impl Into<Vec<u8>>) -> Self {
        Self { ts_ms, data: data.into() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Relative directory under the saver root that a payload is routed to.
///
/// Always a sequence of non-empty segments restricted to `[A-Za-z0-9._-]`,
/// so it can never escape the root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    segments: Vec<String>,
}

impl PartitionKey {
    /// Build a key from a single segment, sanitizing it.
    pub fn new(segment: &str) -> Result<Self, SaverError> {
        Ok(Self { segments: vec![sanitize_segment(segment)?] })
    }

    /// Build a key from several segments (outermost first).
    pub fn from_segments<I, S>(segments: I) -> Result<Self, SaverError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let segments = segments
            .into_iter()
            .map(|s| sanitize_segment(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        if segments.is_empty() {
            return Err(SaverError::format("partition key has no segments"));
        }
        Ok(Self { segments })
    }

    /// Append a nested segment (e.g. a time bucket label).
    pub fn child(&self, segment: &str) -> Result<Self, SaverError> {
        let mut segments = self.segments.clone();
        segments.push(sanitize_segment(segment)?);
        Ok(Self { segments })
    }

    /// Resolve the key against a root directory.
    pub fn dir_under(&self, root: &Path) -> PathBuf {
        let mut dir = root.to_path_buf();
        for s in &self.segments {
            dir.push(s);
        }
        dir
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}

/// Replace characters outside `[A-Za-z0-9._-]` with `_`; reject empty, `.` and `..`.
fn sanitize_segment(raw: &str) -> Result<String, SaverError> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return Err(SaverError::format(format!("invalid partition segment '{raw}'")));
    }
    Ok(cleaned)
}
