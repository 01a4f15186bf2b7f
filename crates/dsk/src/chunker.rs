//! 📂 The chunker: a very small stand-in for a very large buffering layer.
//!
//! Reads NDJSON events, one per line:
//!
//! ```text
//! {"tag": "app.web", "time": 1700000000.25, "record": {"status": 200}}
//! ```
//!
//! and groups them into per-tag [`BufferedChunk`]s that never go over the chunk limit.
//! A single event bigger than the limit still gets a chunk of its own, with a warning.
//! Blank lines are skipped. A line that isn't an event stops the read with its line number.

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{trace, warn};

use crate::common::{BufferedChunk, ChunkEntry, EventTime, Record, Value};

/// 📨 One inbound event.
#[derive(Debug, Deserialize)]
pub struct Event {
    pub tag: String,
    /// Epoch seconds, fractions welcome.
    pub time: f64,
    #[serde(default)]
    pub record: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn into_parts(self) -> (String, EventTime, Record) {
        let record = self
            .record
            .into_iter()
            .map(|(k, v)| (k, Value::from(v)))
            .collect();
        (self.tag, EventTime::from_secs_f64(self.time), record)
    }
}

/// 🧱 Groups events into per-tag chunks under a byte limit.
#[derive(Debug)]
pub struct ChunkBuilder {
    limit_bytes: usize,
    // -- first-seen tag order, so output order is predictable
    open: Vec<BufferedChunk>,
    sealed: Vec<BufferedChunk>,
}

impl ChunkBuilder {
    pub fn new(limit_bytes: usize) -> Self {
        Self {
            limit_bytes,
            open: Vec::new(),
            sealed: Vec::new(),
        }
    }

    /// ➕ Add one event. Seals the tag's open chunk first if this event wouldn't fit.
    pub fn push(&mut self, tag: &str, time: EventTime, record: Record) -> Result<()> {
        let entry = ChunkEntry { time, record };
        let frame_bytes = usize::try_from(
            bincode::serialized_size(&entry).context("💀 could not size an event frame")?,
        )
        .context("💀 an event frame is larger than this platform can address")?;
        if frame_bytes > self.limit_bytes {
            warn!(tag, frame_bytes, limit = self.limit_bytes, "📦 event alone is over the chunk limit");
        }

        let index = match self.open.iter().position(|c| c.tag == tag) {
            Some(index) => index,
            None => {
                self.open.push(BufferedChunk::new(tag));
                self.open.len() - 1
            }
        };
        let chunk = &mut self.open[index];
        if !chunk.is_empty() && chunk.len_bytes() + frame_bytes > self.limit_bytes {
            let full = std::mem::replace(chunk, BufferedChunk::new(tag));
            trace!(tag, bytes = full.len_bytes(), entries = full.entries, "🔒 chunk sealed");
            self.sealed.push(full);
        }
        let ChunkEntry { time, record } = entry;
        self.open[index]
            .push(time, record)
            .context("💀 could not encode an event frame")?;
        Ok(())
    }

    /// 🏁 Everything built so far: sealed chunks first, then whatever is still open.
    pub fn finish(self) -> Vec<BufferedChunk> {
        let mut chunks = self.sealed;
        chunks.extend(self.open.into_iter().filter(|c| !c.is_empty()));
        chunks
    }
}

/// 📖 Read NDJSON events from `reader` and chunk them.
pub async fn read_chunks<R: AsyncRead + Unpin>(reader: R, limit_bytes: usize) -> Result<Vec<BufferedChunk>> {
    let mut lines = BufReader::new(reader).lines();
    let mut builder = ChunkBuilder::new(limit_bytes);
    let mut line_no = 0usize;
    while let Some(line) = lines
        .next_line()
        .await
        .context("💀 failed to read the next event line")?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(&line)
            .with_context(|| format!("💀 line {line_no} is not an event"))?;
        let (tag, time, record) = event.into_parts();
        builder.push(&tag, time, record)?;
    }
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::record;

    #[tokio::test]
    async fn the_one_where_events_sort_themselves_by_tag() {
        let input = br#"{"tag": "a", "time": 1.5, "record": {"n": 1}}

{"tag": "b", "time": 2, "record": {"n": 2}}
{"tag": "a", "time": 3, "record": {"n": 3}}
"#;
        let chunks = read_chunks(&input[..], 1024 * 1024).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].tag.as_str(), chunks[0].entries), ("a", 2));
        assert_eq!((chunks[1].tag.as_str(), chunks[1].entries), ("b", 1));
    }

    #[tokio::test]
    async fn the_one_where_a_bad_line_is_named_and_shamed() {
        let input = b"{\"tag\": \"a\", \"time\": 1}\nnot json\n";
        let err = read_chunks(&input[..], 1024).await.unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn the_one_where_the_limit_splits_a_tag_in_two() {
        let one = ChunkEntry {
            time: EventTime::from_secs(0),
            record: record([("n", 0)]),
        };
        let frame = bincode::serialized_size(&one).unwrap() as usize;
        let mut builder = ChunkBuilder::new(frame * 3);
        for i in 0..7 {
            builder
                .push("t", EventTime::from_secs(0), record([("n", i)]))
                .unwrap();
        }
        let chunks = builder.finish();
        assert_eq!(
            chunks.iter().map(|c| c.entries).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert!(chunks.iter().all(|c| c.len_bytes() <= frame * 3));
    }
}
