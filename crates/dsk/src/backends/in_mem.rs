//! # Previously, on docsink...
//!
//! 🎬 The documents needed somewhere to go, and the real store was three network hops and
//! one expired TLS cert away. So this module built one out of a `HashMap` and good intentions.
//!
//! [`InMemoryStore`] keeps collections in RAM behind an `Arc<Mutex<...>>`, so tests can hand
//! a clone to the pipeline and still peek inside afterwards. It also counts how often it was
//! asked things, because "the cache hit did not touch the store" is a claim worth checking.
//!
//! ⚠️ This is NOT for production. When the process exits, so does your data. 🦆

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use super::{CollectionOptions, DocumentRules, DocumentStore, InsertMode, InsertOutcome, enforce_cap};
use crate::common::Record;
use crate::error::StoreError;

const DEFAULT_VERSION: &str = "7.0.0";

#[derive(Debug, Default)]
struct MemCollection {
    options: CollectionOptions,
    docs: VecDeque<Record>,
}

/// 🔢 How many times each store operation was called. Tests love receipts.
#[derive(Debug, Default)]
pub struct OpCounters {
    pub existence_checks: AtomicUsize,
    pub creations: AtomicUsize,
    pub capped_checks: AtomicUsize,
    pub inserts: AtomicUsize,
}

/// 📦 A document store that never forgets. Until the process exits.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    collections: Arc<Mutex<HashMap<String, MemCollection>>>,
    counters: Arc<OpCounters>,
    rules: DocumentRules,
    version: String,
    unavailable: Arc<AtomicBool>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(OpCounters::default()),
            rules: DocumentRules::for_version(DEFAULT_VERSION),
            version: DEFAULT_VERSION.to_string(),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 🔧 Pretend to be a different server version, document ceiling included.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self.rules = DocumentRules::for_version(&self.version);
        self
    }

    /// 🧪 Pre-create a collection behind the pipeline's back, like another process would.
    pub async fn seed_collection(&self, name: &str, options: CollectionOptions) {
        self.collections.lock().await.insert(
            name.to_string(),
            MemCollection {
                options,
                docs: VecDeque::new(),
            },
        );
    }

    /// 💀 Flip the store into "network is down" mode. Every call fails until flipped back.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn counters(&self) -> &OpCounters {
        &self.counters
    }

    /// 🔍 Everything currently stored in `name`, oldest first.
    pub async fn documents(&self, name: &str) -> Vec<Record> {
        self.collections
            .lock()
            .await
            .get(name)
            .map(|c| c.docs.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn options(&self, name: &str) -> Option<CollectionOptions> {
        self.collections.lock().await.get(name).map(|c| c.options)
    }

    fn check_available(&self, operation: &str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable {
                message: format!("in-memory store is down, '{operation}' refused"),
                source: None,
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn server_version(&self) -> Result<String, StoreError> {
        self.check_available("server_version")?;
        Ok(self.version.clone())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.counters.existence_checks.fetch_add(1, Ordering::SeqCst);
        self.check_available("collection_exists")?;
        Ok(self.collections.lock().await.contains_key(name))
    }

    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<(), StoreError> {
        self.counters.creations.fetch_add(1, Ordering::SeqCst);
        self.check_available("create_collection")?;
        let mut collections = self.collections.lock().await;
        if collections.contains_key(name) {
            return Err(StoreError::operation(
                "create_collection",
                format!("collection '{name}' already exists"),
            ));
        }
        collections.insert(
            name.to_string(),
            MemCollection {
                options: *options,
                docs: VecDeque::new(),
            },
        );
        Ok(())
    }

    async fn is_capped(&self, name: &str) -> Result<bool, StoreError> {
        self.counters.capped_checks.fetch_add(1, Ordering::SeqCst);
        self.check_available("is_capped")?;
        self.collections
            .lock()
            .await
            .get(name)
            .map(|c| c.options.capped)
            .ok_or_else(|| {
                StoreError::operation("is_capped", format!("collection '{name}' not found"))
            })
    }

    async fn insert_many(
        &self,
        name: &str,
        docs: Vec<Record>,
        mode: InsertMode,
    ) -> InsertOutcome {
        self.counters.inserts.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.check_available("insert_many") {
            return InsertOutcome::Fatal(e);
        }
        let (good, bad) = match self.rules.triage(name, docs, mode) {
            Ok(split) => split,
            Err(outcome) => return outcome,
        };
        let accepted = good.len();
        let mut collections = self.collections.lock().await;
        // -- 📦 inserting into a missing collection creates it, same as a real store would
        let collection = collections.entry(name.to_string()).or_default();
        collection.docs.extend(good);
        enforce_cap(&mut collection.docs, &collection.options);
        trace!(collection = name, accepted, rejected = bad.len(), "📥 in-memory insert");
        InsertOutcome::settled(accepted, bad)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // 🗑️ Nothing to release. We live in RAM.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::record;

    #[tokio::test]
    async fn the_one_where_inserts_land_and_bad_apples_come_back() {
        let store = InMemoryStore::new();
        let outcome = store
            .insert_many(
                "events",
                vec![record([("a", 1)]), record([("b.c", 2)]), record([("d", 3)])],
                InsertMode::BestEffort,
            )
            .await;
        match outcome {
            InsertOutcome::PartiallyRejected { accepted, rejected } => {
                assert_eq!(accepted, 2);
                assert_eq!(rejected, vec![record([("b.c", 2)])]);
            }
            other => panic!("💀 expected a partial rejection, got {other:?}"),
        }
        assert_eq!(store.documents("events").await.len(), 2);
    }

    #[tokio::test]
    async fn the_one_where_creating_twice_is_a_store_error() {
        let store = InMemoryStore::new();
        let options = CollectionOptions::default();
        store.create_collection("logs", &options).await.unwrap();
        assert!(store.create_collection("logs", &options).await.is_err());
        assert!(store.collection_exists("logs").await.unwrap());
        assert!(!store.is_capped("logs").await.unwrap());
    }

    #[tokio::test]
    async fn the_one_where_the_network_takes_a_nap() {
        let store = InMemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.collection_exists("x").await,
            Err(StoreError::Unavailable { .. })
        ));
        assert!(matches!(
            store
                .insert_many("x", vec![record([("a", 1)])], InsertMode::BestEffort)
                .await,
            InsertOutcome::Fatal(_)
        ));
        store.set_unavailable(false);
        assert!(!store.collection_exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn the_one_where_an_old_server_bounces_a_five_mebibyte_document() {
        let big = record([("blob", "x".repeat(5 * 1024 * 1024))]);
        let old = InMemoryStore::new().with_version("1.6.5");
        assert!(matches!(
            old.insert_many("events", vec![big.clone()], InsertMode::BestEffort).await,
            InsertOutcome::WhollyRejected { .. }
        ));
        let modern = InMemoryStore::new();
        assert!(matches!(
            modern.insert_many("events", vec![big], InsertMode::BestEffort).await,
            InsertOutcome::Accepted { count: 1 }
        ));
    }

    #[tokio::test]
    async fn the_one_where_capped_collections_keep_only_the_newest() {
        let store = InMemoryStore::new();
        store
            .create_collection(
                "ring",
                &CollectionOptions {
                    capped: true,
                    size: Some(1024 * 1024),
                    max: Some(3),
                },
            )
            .await
            .unwrap();
        let docs = (0..10).map(|i| record([("n", i)])).collect();
        store.insert_many("ring", docs, InsertMode::Strict).await;
        let kept = store.documents("ring").await;
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[2], record([("n", 9)]));
    }
}
