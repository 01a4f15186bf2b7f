//! 📦 Common data structures: the building blocks of docsink.
//!
//! A [`Record`] is a bag of keys. A [`Value`] is whatever lives under a key. A
//! [`BufferedChunk`] is a pile of timestamped records the buffering layer decided were
//! ready to go. They don't ask questions. They carry the data. Please tip your records.
//!
//! 🧠 Knowledge graph:
//! - Chunk bytes are a run of bincode frames, one [`ChunkEntry`] each, back to back.
//!   No length prefix, no footer. The decoder just keeps reading until the bytes run out.
//! - `Value::DateTime` is what a store-native timestamp looks like on our side.
//! - `Value::Binary` is where quarantined leftovers end up.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 📦 One document-shaped record. Key order is irrelevant, so a `BTreeMap` it is.
pub type Record = BTreeMap<String, Value>;

/// 🎭 Everything a record field is allowed to be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Binary(Vec<u8>),
    DateTime(DateTime<Utc>),
    Array(Vec<Value>),
    Map(Record),
}

impl Value {
    /// 📏 Rough encoded size of this value, in the spirit of BSON: fixed widths for scalars,
    /// length plus payload for strings and blobs, and per-key overhead for maps.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Int(_) | Value::Float(_) | Value::DateTime(_) => 9,
            Value::String(s) => 6 + s.len(),
            Value::Binary(b) => 6 + b.len(),
            Value::Array(items) => 5 + items.iter().map(|v| 2 + v.approx_size()).sum::<usize>(),
            Value::Map(record) => record_size(record),
        }
    }

}

/// 📏 Rough encoded size of a whole record, see [`Value::approx_size`].
pub fn record_size(record: &Record) -> usize {
    5 + record
        .iter()
        .map(|(k, v)| k.len() + 2 + v.approx_size())
        .sum::<usize>()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// 🔄 JSON in, record values out. Integers stay integers, everything else that is a
/// number becomes a float, because JSON never told us which one it meant.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// ⏱️ Event time as the buffering layer hands it over: seconds and nanos since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTime {
    pub secs: i64,
    pub nanos: u32,
}

impl EventTime {
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// 🔄 Fractional epoch seconds, the way event logs like to write them.
    pub fn from_secs_f64(secs: f64) -> Self {
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
        Self {
            secs: whole as i64,
            nanos: nanos.min(999_999_999),
        }
    }

    /// 🕰️ The store-native flavor. Out-of-range times clamp to the epoch rather than panic.
    pub fn to_datetime(self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.secs, self.nanos)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// 🔢 Whole epoch seconds, clamped the same way as [`EventTime::to_datetime`].
    pub fn as_secs(self) -> i64 {
        self.to_datetime().timestamp()
    }

    /// 🔢 Epoch millis, clamped the same way as [`EventTime::to_datetime`].
    pub fn as_millis(self) -> i64 {
        self.to_datetime().timestamp_millis()
    }
}

/// 🧱 One frame inside a chunk: when it happened, and what happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub time: EventTime,
    pub record: Record,
}

/// 📦 A buffered chunk: a tag and a run of encoded [`ChunkEntry`] frames.
///
/// The buffering layer owns building these. We only read them. Once.
#[derive(Debug, Clone, Default)]
pub struct BufferedChunk {
    pub tag: String,
    pub bytes: Vec<u8>,
    pub entries: usize,
}

impl BufferedChunk {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            bytes: Vec::new(),
            entries: 0,
        }
    }

    /// ➕ Append one frame. Returns how many bytes the frame took.
    pub fn push(&mut self, time: EventTime, record: Record) -> Result<usize, bincode::Error> {
        let before = self.bytes.len();
        bincode::serialize_into(&mut self.bytes, &ChunkEntry { time, record })?;
        self.entries += 1;
        Ok(self.bytes.len() - before)
    }

    /// 🏗️ Convenience for tests and the replay CLI: build a whole chunk in one go.
    pub fn from_entries(
        tag: impl Into<String>,
        entries: impl IntoIterator<Item = (EventTime, Record)>,
    ) -> Result<Self, bincode::Error> {
        let mut chunk = Self::new(tag);
        for (time, record) in entries {
            chunk.push(time, record)?;
        }
        Ok(chunk)
    }

    pub fn len_bytes(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// 🏗️ Build a record from `(key, value)` pairs. Mostly for tests, which build a lot of them.
pub fn record<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Record
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
