use chrono::{DateTime, Utc};

use saver_api::{PartitionKey, SaverError};

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Time bucket granularity for batching and directory naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    /// `yyyy-MM-dd`
    Daily,
    /// `yyyy-MM-dd-HH`
    Hourly,
}

impl TimeBucket {
    /// Bucket index of a millisecond timestamp. Equal ids ⇔ same bucket.
    pub fn bucket_id(self, ts_ms: i64) -> i64 {
        match self {
            TimeBucket::Daily => ts_ms.div_euclid(DAY_MS),
            TimeBucket::Hourly => ts_ms.div_euclid(HOUR_MS),
        }
    }

    /// Directory label of the bucket containing `ts_ms` (UTC).
    pub fn label(self, ts_ms: i64) -> Result<String, SaverError> {
        let ts = DateTime::<Utc>::from_timestamp_millis(ts_ms)
            .ok_or_else(|| SaverError::format(format!("timestamp out of range: {ts_ms}")))?;
        Ok(self.label_of(&ts))
    }

    pub fn label_of(self, ts: &DateTime<Utc>) -> String {
        match self {
            TimeBucket::Daily => ts.format("%Y-%m-%d").to_string(),
            TimeBucket::Hourly => ts.format("%Y-%m-%d-%H").to_string(),
        }
    }

    /// Nest the bucket label under `base` (or use it alone for the unpartitioned root).
    pub fn partition(self, base: Option<&PartitionKey>, ts_ms: i64) -> Result<PartitionKey, SaverError> {
        let label = self.label(ts_ms)?;
        match base {
            Some(key) => key.child(&label),
            None => PartitionKey::new(&label),
        }
    }
}
