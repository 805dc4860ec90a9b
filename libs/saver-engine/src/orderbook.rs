//! Orderbook snapshots: decoding, compact line format and directory routing.
//!
//! Each snapshot is stored as one line
//! `{"t":"mm:ss.fff","p":[{"v":<volume>,"p":<price>},...]}` under
//! `<asset>-<buy|sell>/<yyyy-MM-dd-HH>/`; the rest of the timestamp is
//! carried by the directory.

use std::fmt::Write as _;
use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use saver_api::{PartitionKey, Payload, PayloadHandler, RecordFormatter, SaverError};

use crate::bucket::TimeBucket;
use crate::sink::BufferedSink;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VolumePrice {
    #[serde(rename = "Volume", alias = "volume")]
    pub volume: f64,
    #[serde(rename = "Price", alias = "price")]
    pub price: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Orderbook {
    #[serde(rename = "AssetPair", alias = "assetPair")]
    pub asset_pair: String,
    #[serde(rename = "IsBuy", alias = "isBuy")]
    pub is_buy: bool,
    #[serde(rename = "Timestamp", alias = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Prices", alias = "prices", default)]
    pub prices: Vec<VolumePrice>,
}

impl Orderbook {
    pub fn from_json(bytes: &[u8]) -> Result<Self, SaverError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn side(&self) -> &'static str {
        if self.is_buy { "buy" } else { "sell" }
    }

    /// `<asset>-<side>`, without the time segment.
    pub fn base_partition(&self) -> Result<PartitionKey, SaverError> {
        PartitionKey::new(&format!("{}-{}", self.asset_pair, self.side()))
    }

    /// `<asset>-<side>/<yyyy-MM-dd-HH>`
    pub fn partition(&self) -> Result<PartitionKey, SaverError> {
        self.base_partition()?
            .child(&TimeBucket::Hourly.label_of(&self.timestamp))
    }
}

/// Accepts RFC 3339 and offset-less ISO timestamps, the latter taken as UTC.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| serde::de::Error::custom(format!("invalid timestamp '{raw}': {e}")))
}

/// Formats a snapshot as its compact on-disk line.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderbookFormatter;

impl RecordFormatter<Orderbook> for OrderbookFormatter {
    fn format(&self, record: &Orderbook) -> String {
        let mut out = String::with_capacity(32 + record.prices.len() * 24);
        out.push_str("{\"t\":\"");
        out.push_str(&record.timestamp.format("%M:%S%.3f").to_string());
        out.push_str("\",\"p\":[");
        for (i, vp) in record.prices.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{{\"v\":{},\"p\":{}}}", vp.volume, vp.price);
        }
        out.push_str("]}");
        out
    }
}

/// Decodes JSON snapshots and buffers their formatted lines.
#[derive(Debug, Clone)]
pub struct OrderbookSink {
    sink: BufferedSink,
    formatter: OrderbookFormatter,
    /// Whether the buffer already appends a time bucket to every key.
    bucketed: bool,
}

impl OrderbookSink {
    pub fn new(sink: BufferedSink, bucketed: bool) -> Self {
        Self {
            sink,
            formatter: OrderbookFormatter,
            bucketed,
        }
    }

    /// Buffer one decoded snapshot.
    pub fn push(&self, record: &Orderbook) -> Result<(), SaverError> {
        let key = if self.bucketed {
            record.base_partition()?
        } else {
            record.partition()?
        };
        let line = self.formatter.format(record);
        let payload = Payload::new(record.timestamp.timestamp_millis(), line);
        self.sink.push(payload, Some(key))
    }

    fn handle(&self, payload: &Payload) -> Result<(), SaverError> {
        let record = Orderbook::from_json(&payload.data).map_err(|e| {
            tracing::warn!(error = %e, bytes = payload.len(), "couldn't decode orderbook");
            e.with_context("orderbook")
        })?;
        self.push(&record)
    }
}

impl PayloadHandler for OrderbookSink {
    fn process(
        &self,
        payload: Payload,
    ) -> Pin<Box<dyn Future<Output = Result<(), SaverError>> + Send + '_>> {
        Box::pin(async move { self.handle(&payload) })
    }
}
