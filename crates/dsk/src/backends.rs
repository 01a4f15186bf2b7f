//! 🔌 Backends: where the records finally land.
//!
//! 🎭 This module is the casting agency for document stores. The pipeline only ever talks
//! to a [`DocumentStore`]: "does this collection exist?", "make one", "is it capped?",
//! "take these documents". How the store does any of that is its own business.
//!
//! 🧠 Knowledge graph:
//! - Pattern: trait → concrete impls (`InMemoryStore`, `FileStore`) → `StoreBackend` enum.
//! - `insert_many` answers with an [`InsertOutcome`], a tagged union the coordinator
//!   matches on. No exceptions for control flow, no string sniffing for "no documents".
//! - [`DocumentRules`] is the shared bouncer both stores use to decide which documents
//!   get in: no `.` in keys, no leading `$`, nothing over the document ceiling.
//! - Stores take `&self` because flush workers share them; state lives behind mutexes.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app_config::StoreConfig;
use crate::chunk_limit::ChunkSizeAdvisor;
use crate::common::{Record, Value, record_size};
use crate::error::StoreError;

pub mod file;
pub mod in_mem;

pub use file::{FileStore, FileStoreConfig};
pub use in_mem::InMemoryStore;

/// 📦 Creation parameters for a collection. Size and max only mean something when capped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionOptions {
    pub capped: bool,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub max: Option<u64>,
}

/// 🎚️ How hard an insert should try.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Attempt every document and report the ones that failed.
    BestEffort,
    /// All or nothing. Any bad document fails the whole call.
    Strict,
}

/// 🎯 What a bulk insert has to say for itself.
#[derive(Debug)]
pub enum InsertOutcome {
    Accepted { count: usize },
    PartiallyRejected { accepted: usize, rejected: Vec<Record> },
    /// The store considered the batch empty of valid documents ("no documents").
    /// Every document comes back to the caller.
    WhollyRejected { rejected: Vec<Record> },
    Fatal(StoreError),
}

impl InsertOutcome {
    fn settled(accepted: usize, rejected: Vec<Record>) -> Self {
        if rejected.is_empty() {
            Self::Accepted { count: accepted }
        } else {
            Self::PartiallyRejected { accepted, rejected }
        }
    }
}

/// 🚰 An opaque, collection-oriented document store.
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send + Sync {
    /// 🔢 Server version string, for the chunk-size advisor.
    async fn server_version(&self) -> Result<String, StoreError>;
    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError>;
    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<(), StoreError>;
    async fn is_capped(&self, name: &str) -> Result<bool, StoreError>;
    async fn insert_many(&self, name: &str, docs: Vec<Record>, mode: InsertMode)
    -> InsertOutcome;
    /// 🗑️ Release connections, flush whatever needs flushing. Call it. Always.
    async fn close(&self) -> Result<(), StoreError>;
}

/// 📏 Document ceiling for modern stores.
pub const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;
/// 📏 Document ceiling for pre-1.8 stores.
pub const LEGACY_MAX_DOCUMENT_BYTES: usize = 4 * 1024 * 1024;

/// 🚪 The rules a document has to pass to get into a collection.
#[derive(Debug, Clone, Copy)]
pub struct DocumentRules {
    pub max_document_bytes: usize,
}

impl Default for DocumentRules {
    fn default() -> Self {
        Self {
            max_document_bytes: MAX_DOCUMENT_BYTES,
        }
    }
}

impl DocumentRules {
    /// 🔢 The ceiling that matches a server version: pre-1.8 stores refuse anything over 4 MiB.
    pub fn for_version(version: &str) -> Self {
        let max_document_bytes = if ChunkSizeAdvisor::is_legacy_version(version) {
            LEGACY_MAX_DOCUMENT_BYTES
        } else {
            MAX_DOCUMENT_BYTES
        };
        Self { max_document_bytes }
    }

    /// 🔍 Why this document would be refused, if it would be.
    pub fn violation(&self, record: &Record) -> Option<String> {
        let size = record_size(record);
        if size > self.max_document_bytes {
            return Some(format!(
                "document is {size} bytes, the ceiling is {}",
                self.max_document_bytes
            ));
        }
        bad_key(record).map(|key| format!("illegal field name '{key}'"))
    }

    /// ⚖️ Split documents into the ones that get in and the ones that don't, then apply the
    /// mode's early exits. `Ok` carries the split, `Err` carries an outcome to return as is.
    pub fn triage(
        &self,
        collection: &str,
        docs: Vec<Record>,
        mode: InsertMode,
    ) -> Result<(Vec<Record>, Vec<Record>), InsertOutcome> {
        let mut first_reason = None;
        let (good, bad): (Vec<Record>, Vec<Record>) = docs.into_iter().partition(|doc| {
            match self.violation(doc) {
                Some(reason) => {
                    if first_reason.is_none() {
                        first_reason = Some(reason);
                    }
                    false
                }
                None => true,
            }
        });
        match mode {
            InsertMode::Strict if !bad.is_empty() => {
                Err(InsertOutcome::Fatal(StoreError::Rejected {
                    collection: collection.to_string(),
                    rejected: bad.len(),
                    reason: first_reason.unwrap_or_default(),
                }))
            }
            InsertMode::BestEffort if good.is_empty() => {
                Err(InsertOutcome::WhollyRejected { rejected: bad })
            }
            _ => Ok((good, bad)),
        }
    }
}

fn bad_key(record: &Record) -> Option<&str> {
    for (key, value) in record {
        if key.contains('.') || key.starts_with('$') {
            return Some(key);
        }
        if let Some(nested) = bad_key_in(value) {
            return Some(nested);
        }
    }
    None
}

fn bad_key_in(value: &Value) -> Option<&str> {
    match value {
        Value::Map(record) => bad_key(record),
        Value::Array(items) => items.iter().find_map(bad_key_in),
        _ => None,
    }
}

/// ✂️ Capped collections forget their oldest documents once they run out of room.
/// The newest document always survives, even if it alone is over the size budget.
pub(crate) fn enforce_cap(docs: &mut VecDeque<Record>, options: &CollectionOptions) {
    if !options.capped {
        return;
    }
    if let Some(max) = options.max {
        while docs.len() as u64 > max && docs.len() > 1 {
            docs.pop_front();
        }
    }
    if let Some(size) = options.size {
        let mut total: u64 = docs.iter().map(|d| record_size(d) as u64).sum();
        while total > size && docs.len() > 1 {
            if let Some(evicted) = docs.pop_front() {
                total -= record_size(&evicted) as u64;
            }
        }
    }
}

/// 🎭 The many faces of a store. Dispatches to the concrete backend so the pipeline never
/// needs to know whether its documents are in RAM or on disk.
#[derive(Debug)]
pub enum StoreBackend {
    InMemory(InMemoryStore),
    File(FileStore),
}

impl StoreBackend {
    /// 🏗️ Stand up the configured store for `database`.
    pub async fn from_config(config: &StoreConfig, database: &str) -> Result<Self, StoreError> {
        match config {
            StoreConfig::InMemory(()) => Ok(Self::InMemory(InMemoryStore::new())),
            StoreConfig::File(file_config) => {
                Ok(Self::File(FileStore::open(file_config, database).await?))
            }
        }
    }
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn server_version(&self) -> Result<String, StoreError> {
        match self {
            Self::InMemory(store) => store.server_version().await,
            Self::File(store) => store.server_version().await,
        }
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        match self {
            Self::InMemory(store) => store.collection_exists(name).await,
            Self::File(store) => store.collection_exists(name).await,
        }
    }

    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.create_collection(name, options).await,
            Self::File(store) => store.create_collection(name, options).await,
        }
    }

    async fn is_capped(&self, name: &str) -> Result<bool, StoreError> {
        match self {
            Self::InMemory(store) => store.is_capped(name).await,
            Self::File(store) => store.is_capped(name).await,
        }
    }

    async fn insert_many(
        &self,
        name: &str,
        docs: Vec<Record>,
        mode: InsertMode,
    ) -> InsertOutcome {
        match self {
            Self::InMemory(store) => store.insert_many(name, docs, mode).await,
            Self::File(store) => store.insert_many(name, docs, mode).await,
        }
    }

    async fn close(&self) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.close().await,
            Self::File(store) => store.close().await,
        }
    }
}
