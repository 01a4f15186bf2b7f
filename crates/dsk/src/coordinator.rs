//! 🚑 The InsertCoordinator: one bulk insert, and a plan for the documents the store hates.
//!
//! 🎬 *[the store accepts 98 documents. two come back. nobody panics. they go to quarantine.]*
//!
//! 🧠 Knowledge graph:
//! - Keys get sanitized first, then the whole batch goes out in ONE best-effort insert.
//! - The store answers with an [`InsertOutcome`]. We `match` it, every arm handled:
//!   - `Accepted` → done.
//!   - `PartiallyRejected` → the rejects get wrapped as quarantine records and inserted
//!     again, into the same collection, this time strictly.
//!   - `WhollyRejected` ("no documents") → same as above for the whole batch, unless
//!     invalid records are being ignored, in which case the caller hears about it.
//!   - `Fatal` → straight back to the caller as a store failure.
//! - With `ignore_invalid_records` on, partial rejects are counted as dropped and logged.
//! - Every record ends up in exactly one of: inserted, quarantined, dropped.
//!
//! A quarantine record keeps a few fields out in the open (tag, time, configured
//! excludes) so people can still find it, and packs everything else into one binary field,
//! [`BROKEN_DATA_KEY`]. [`restore_quarantined`] undoes the packing.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::app_config::SinkConfig;
use crate::backends::{DocumentStore, InsertMode, InsertOutcome};
use crate::common::{Record, Value};
use crate::error::{Result, SinkError, StoreError};
use crate::resolver::Destination;
use crate::sanitizer::KeySanitizer;

/// 🔑 Where the unreadable remainder of a quarantined record lives.
pub const BROKEN_DATA_KEY: &str = "__broken_data";

/// 🧾 What happened to one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertReport {
    pub inserted: usize,
    /// The quarantine records as they were written to the store.
    pub quarantined: Vec<Record>,
    pub dropped: usize,
}

impl InsertReport {
    /// 🔢 Records accounted for. Always the size of the batch that went in.
    pub fn total(&self) -> usize {
        self.inserted + self.quarantined.len() + self.dropped
    }
}

/// 🔧 What to do with rejected records.
#[derive(Debug, Clone, Default)]
pub struct QuarantinePolicy {
    pub ignore_invalid: bool,
    /// Fields lifted verbatim onto the quarantine record, when present.
    pub preserved_fields: Vec<String>,
}

impl QuarantinePolicy {
    pub fn from_config(config: &SinkConfig) -> Self {
        let mut preserved_fields = Vec::new();
        if config.include_tag_key {
            preserved_fields.push(config.tag_key.clone());
        }
        preserved_fields.push(config.time_key.clone());
        for field in &config.exclude_broken_fields {
            if !preserved_fields.contains(field) {
                preserved_fields.push(field.clone());
            }
        }
        Self {
            ignore_invalid: config.ignore_invalid_records,
            preserved_fields,
        }
    }

    /// 📦 Wrap a rejected record: preserved fields stay, the rest is packed into one blob.
    pub fn wrap(&self, mut record: Record) -> Result<Record> {
        let mut quarantined = Record::new();
        for field in &self.preserved_fields {
            // -- absent fields stay absent, no nulls invented here
            if let Some(value) = record.remove(field) {
                quarantined.insert(field.clone(), value);
            }
        }
        let packed = bincode::serialize(&record).map_err(SinkError::Quarantine)?;
        quarantined.insert(BROKEN_DATA_KEY.to_string(), Value::Binary(packed));
        Ok(quarantined)
    }
}

/// 🔄 Put a quarantine record back together: preserved fields plus the unpacked remainder.
pub fn restore_quarantined(quarantined: &Record) -> Result<Record> {
    let mut restored = match quarantined.get(BROKEN_DATA_KEY) {
        Some(Value::Binary(packed)) => {
            bincode::deserialize::<Record>(packed).map_err(SinkError::Quarantine)?
        }
        _ => Record::new(),
    };
    for (key, value) in quarantined {
        if key != BROKEN_DATA_KEY {
            restored.insert(key.clone(), value.clone());
        }
    }
    Ok(restored)
}

/// 🚚 Sanitize, insert, quarantine. In that order.
#[derive(Debug)]
pub struct InsertCoordinator<S> {
    store: Arc<S>,
    sanitizer: KeySanitizer,
    policy: QuarantinePolicy,
}

impl<S: DocumentStore> InsertCoordinator<S> {
    pub fn new(store: Arc<S>, sanitizer: KeySanitizer, policy: QuarantinePolicy) -> Self {
        Self {
            store,
            sanitizer,
            policy,
        }
    }

    /// 🎯 Write `records` into `destination`, quarantining whatever the store refuses.
    pub async fn insert(&self, destination: &Destination, records: Vec<Record>) -> Result<InsertReport> {
        if records.is_empty() {
            return Ok(InsertReport::default());
        }
        let collection = destination.name.as_str();
        let docs: Vec<Record> = records
            .into_iter()
            .map(|record| self.sanitizer.sanitize(record))
            .collect();
        let total = docs.len();

        match self
            .store
            .insert_many(collection, docs, InsertMode::BestEffort)
            .await
        {
            InsertOutcome::Accepted { count } => {
                debug!(collection, count, "✅ batch accepted");
                Ok(InsertReport {
                    inserted: count,
                    ..InsertReport::default()
                })
            }
            InsertOutcome::PartiallyRejected { accepted, rejected } => {
                self.handle_rejects(collection, accepted, rejected).await
            }
            InsertOutcome::WhollyRejected { rejected } => {
                if self.policy.ignore_invalid {
                    error!(collection, records = total, "💀 store accepted none of the batch");
                    return Err(SinkError::WholeBatchRejected {
                        collection: collection.to_string(),
                        records: total,
                    });
                }
                self.handle_rejects(collection, 0, rejected).await
            }
            InsertOutcome::Fatal(e) => Err(e.into()),
        }
    }

    async fn handle_rejects(
        &self,
        collection: &str,
        inserted: usize,
        rejected: Vec<Record>,
    ) -> Result<InsertReport> {
        if self.policy.ignore_invalid {
            warn!(collection, dropped = rejected.len(), "🗑️ dropping records the store refused");
            return Ok(InsertReport {
                inserted,
                quarantined: Vec::new(),
                dropped: rejected.len(),
            });
        }

        let wrapped = rejected
            .into_iter()
            .map(|record| self.policy.wrap(record))
            .collect::<Result<Vec<_>>>()?;
        let count = wrapped.len();
        match self
            .store
            .insert_many(collection, wrapped.clone(), InsertMode::Strict)
            .await
        {
            InsertOutcome::Accepted { .. } => {
                warn!(collection, quarantined = count, "🚑 quarantined records the store refused");
                Ok(InsertReport {
                    inserted,
                    quarantined: wrapped,
                    dropped: 0,
                })
            }
            InsertOutcome::Fatal(e) => Err(e.into()),
            // -- a strict insert has no business coming back half done
            InsertOutcome::PartiallyRejected { rejected, .. }
            | InsertOutcome::WhollyRejected { rejected } => Err(StoreError::Rejected {
                collection: collection.to_string(),
                rejected: rejected.len(),
                reason: "quarantine insert refused".to_string(),
            }
            .into()),
        }
    }
}
