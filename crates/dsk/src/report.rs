//! 📊 report.rs: "so... did it work?" answered with a table.
//!
//! Flush workers each keep a [`FlushSummary`], the supervisor merges them, and the CLI
//! prints the result. One row per collection, plus a line for the chunks that didn't make it.

use std::collections::BTreeMap;
use std::fmt;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::common::BufferedChunk;
use crate::pipeline::ChunkReport;

/// 🔢 Per-collection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionTally {
    pub chunks: usize,
    pub inserted: usize,
    pub quarantined: usize,
    pub dropped: usize,
}

/// 📊 Everything a flush run did, by collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub collections: BTreeMap<String, CollectionTally>,
    pub failed_chunks: usize,
    pub failed_records: usize,
}

impl FlushSummary {
    pub fn record(&mut self, report: &ChunkReport) {
        let tally = self.collections.entry(report.collection.clone()).or_default();
        tally.chunks += 1;
        tally.inserted += report.inserted;
        tally.quarantined += report.quarantined.len();
        tally.dropped += report.dropped;
    }

    /// 💀 A chunk the sink gave up on. The buffering layer gets to try again.
    pub fn record_failure(&mut self, chunk: &BufferedChunk) {
        self.failed_chunks += 1;
        self.failed_records += chunk.entries;
    }

    pub fn merge(&mut self, other: FlushSummary) {
        for (collection, theirs) in other.collections {
            let ours = self.collections.entry(collection).or_default();
            ours.chunks += theirs.chunks;
            ours.inserted += theirs.inserted;
            ours.quarantined += theirs.quarantined;
            ours.dropped += theirs.dropped;
        }
        self.failed_chunks += other.failed_chunks;
        self.failed_records += other.failed_records;
    }

    pub fn inserted(&self) -> usize {
        self.collections.values().map(|t| t.inserted).sum()
    }

    pub fn quarantined(&self) -> usize {
        self.collections.values().map(|t| t.quarantined).sum()
    }

    pub fn dropped(&self) -> usize {
        self.collections.values().map(|t| t.dropped).sum()
    }

    fn table(&self) -> Table {
        let right = |n: usize| Cell::new(n).set_alignment(CellAlignment::Right);
        let mut table = Table::new();
        table.load_preset(UTF8_FULL_CONDENSED);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["collection", "chunks", "inserted", "quarantined", "dropped"]);
        for (collection, tally) in &self.collections {
            table.add_row(vec![
                Cell::new(collection),
                right(tally.chunks),
                right(tally.inserted),
                right(tally.quarantined),
                right(tally.dropped),
            ]);
        }
        table.add_row(vec![
            Cell::new("total"),
            right(self.collections.values().map(|t| t.chunks).sum()),
            right(self.inserted()),
            right(self.quarantined()),
            right(self.dropped()),
        ]);
        table
    }
}

impl fmt::Display for FlushSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.table())?;
        if self.failed_chunks > 0 {
            write!(
                f,
                "💀 {} chunk(s) failed ({} record(s)), see the log for why",
                self.failed_chunks, self.failed_records
            )?;
        }
        Ok(())
    }
}
