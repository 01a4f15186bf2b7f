//! 🎬 *[a chunk arrives. it is a wall of bytes. somewhere inside, records are waiting.]*
//!
//! 📥 The RecordCollector: turns a [`BufferedChunk`] back into records, one frame at a time.
//!
//! 🧠 Knowledge graph:
//! - Lazy and single-pass: [`Records`] decodes the next frame only when asked.
//! - Order out == order in. Nobody downstream promises to keep it, but we do.
//! - The event time lands in the record under `time_key` only when `include_time_key`
//!   is on, encoded by the [`TimestampEncoding`] picked at configuration time.
//!   When it's off, whatever the record already had under that key stays put.
//! - `include_tag_key` stamps the chunk's tag under `tag_key`, same idea.
//! - A frame that won't decode ends the iteration with one `Err`. The chunk is toast,
//!   the buffering layer can retry it.

use serde::Deserialize;

use crate::app_config::SinkConfig;
use crate::common::{BufferedChunk, ChunkEntry, EventTime, Record, Value};
use crate::error::{Result, SinkError};

/// 🕰️ How an event time is written into a record. Picked once, used for every record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampEncoding {
    /// The store's own date type.
    #[default]
    Native,
    EpochSeconds,
    EpochMillis,
}

impl TimestampEncoding {
    pub fn encode(self, time: EventTime) -> Value {
        match self {
            Self::Native => Value::DateTime(time.to_datetime()),
            Self::EpochSeconds => Value::Int(time.as_secs()),
            Self::EpochMillis => Value::Int(time.as_millis()),
        }
    }
}

/// 🔧 The slice of [`SinkConfig`] the collector cares about.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub include_time_key: bool,
    pub time_key: String,
    pub encoding: TimestampEncoding,
    pub include_tag_key: bool,
    pub tag_key: String,
}

impl From<&SinkConfig> for CollectorSettings {
    fn from(config: &SinkConfig) -> Self {
        Self {
            include_time_key: config.include_time_key,
            time_key: config.time_key.clone(),
            encoding: config.timestamp_encoding,
            include_tag_key: config.include_tag_key,
            tag_key: config.tag_key.clone(),
        }
    }
}

/// 📥 Decodes chunks into records.
#[derive(Debug, Clone)]
pub struct RecordCollector {
    settings: CollectorSettings,
}

impl RecordCollector {
    pub fn new(settings: CollectorSettings) -> Self {
        Self { settings }
    }

    /// 🔄 A lazy, single-pass walk over the chunk's records.
    pub fn records<'a>(&'a self, chunk: &'a BufferedChunk) -> Records<'a> {
        Records {
            cursor: &chunk.bytes,
            tag: &chunk.tag,
            settings: &self.settings,
            frame: 0,
            broken: false,
        }
    }
}

/// 🚶 The iterator behind [`RecordCollector::records`].
#[derive(Debug)]
pub struct Records<'a> {
    cursor: &'a [u8],
    tag: &'a str,
    settings: &'a CollectorSettings,
    frame: usize,
    broken: bool,
}

impl Records<'_> {
    fn materialize(&self, entry: ChunkEntry) -> Record {
        let ChunkEntry { time, mut record } = entry;
        if self.settings.include_time_key {
            record.insert(
                self.settings.time_key.clone(),
                self.settings.encoding.encode(time),
            );
        }
        if self.settings.include_tag_key {
            record.insert(
                self.settings.tag_key.clone(),
                Value::String(self.tag.to_string()),
            );
        }
        record
    }
}

impl Iterator for Records<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.broken || self.cursor.is_empty() {
            return None;
        }
        let frame = self.frame;
        self.frame += 1;
        match bincode::deserialize_from::<_, ChunkEntry>(&mut self.cursor) {
            Ok(entry) => Some(Ok(self.materialize(entry))),
            Err(e) => {
                self.broken = true;
                Some(Err(SinkError::Decode {
                    frame,
                    message: e.to_string(),
                }))
            }
        }
    }
}
