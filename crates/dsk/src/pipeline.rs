//! 🚰 The pipeline: one chunk in, one report out.
//!
//! 🧠 Knowledge graph:
//! - [`DocumentSink::configure`] runs once. It validates the sink config, compiles the key
//!   rules and route settings, and asks the [`ChunkSizeAdvisor`] how big chunks may get.
//!   When `legacy_store_size_limit` is unset the store's version decides.
//! - [`DocumentSink::write_chunk`] runs per chunk: collect → resolve → insert.
//!   Decoding happens first and completely, so a torn chunk never half-lands.
//! - Many flush workers share one sink through an `Arc`. The destination cache inside the
//!   resolver is the only thing they contend on.

use std::sync::Arc;

use tracing::{debug, info};

use crate::app_config::SinkConfig;
use crate::backends::DocumentStore;
use crate::chunk_limit::{ChunkLimit, ChunkSizeAdvisor};
use crate::collector::{CollectorSettings, RecordCollector};
use crate::common::{BufferedChunk, Record};
use crate::coordinator::{InsertCoordinator, InsertReport, QuarantinePolicy};
use crate::error::Result;
use crate::resolver::{CollectionResolver, DestinationCache, RouteSettings};
use crate::sanitizer::KeySanitizer;

/// 🧾 What became of one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    pub tag: String,
    pub collection: String,
    pub inserted: usize,
    pub quarantined: Vec<Record>,
    pub dropped: usize,
}

impl ChunkReport {
    pub fn records(&self) -> usize {
        self.inserted + self.quarantined.len() + self.dropped
    }
}

/// 🚰 The configured sink: a collector, a resolver and a coordinator sharing one store.
#[derive(Debug)]
pub struct DocumentSink<S> {
    store: Arc<S>,
    collector: RecordCollector,
    resolver: CollectionResolver<S>,
    coordinator: InsertCoordinator<S>,
    tag_mapped: bool,
    fixed_collection: String,
    chunk_limit: ChunkLimit,
}

impl<S: DocumentStore> DocumentSink<S> {
    /// 🏗️ Build a sink over `store`. `configured_chunk_limit` is whatever the buffering
    /// layer was told; the returned sink knows the effective one.
    pub async fn configure(
        config: &SinkConfig,
        configured_chunk_limit: usize,
        store: Arc<S>,
        cache: Arc<DestinationCache>,
    ) -> Result<Self> {
        config.validate()?;
        let sanitizer = KeySanitizer::from_replacements(
            config.replace_dot_in_key_with.as_deref(),
            config.replace_dollar_in_key_with.as_deref(),
        )?;
        let routes = RouteSettings::from_config(config)?;

        let legacy = match config.legacy_store_size_limit {
            Some(legacy) => legacy,
            None => {
                let version = store.server_version().await?;
                let legacy = ChunkSizeAdvisor::is_legacy_version(&version);
                debug!(version = %version, legacy, "🔢 probed store version");
                legacy
            }
        };
        let chunk_limit = ChunkSizeAdvisor::clamp(configured_chunk_limit, legacy);
        info!(
            database = %config.database,
            effective_chunk_limit = chunk_limit.effective_bytes,
            "🚀 document sink configured"
        );

        Ok(Self {
            collector: RecordCollector::new(CollectorSettings::from(config)),
            resolver: CollectionResolver::new(Arc::clone(&store), routes, cache),
            coordinator: InsertCoordinator::new(
                Arc::clone(&store),
                sanitizer,
                QuarantinePolicy::from_config(config),
            ),
            tag_mapped: config.tag_mapped,
            fixed_collection: config.collection.clone(),
            chunk_limit,
            store,
        })
    }

    pub fn chunk_limit(&self) -> ChunkLimit {
        self.chunk_limit
    }

    pub fn resolver(&self) -> &CollectionResolver<S> {
        &self.resolver
    }

    /// 🧭 The route key for a chunk: its tag when tag-mapped, the fixed collection otherwise.
    pub fn route_key<'a>(&'a self, chunk: &'a BufferedChunk) -> &'a str {
        if self.tag_mapped {
            &chunk.tag
        } else {
            &self.fixed_collection
        }
    }

    /// 🎯 Decode, resolve, insert. Any `Err` means the whole chunk should be retried upstream.
    pub async fn write_chunk(&self, chunk: &BufferedChunk) -> Result<ChunkReport> {
        let records = self
            .collector
            .records(chunk)
            .collect::<Result<Vec<Record>>>()?;
        let destination = self.resolver.resolve(self.route_key(chunk)).await?;
        let InsertReport {
            inserted,
            quarantined,
            dropped,
        } = self.coordinator.insert(&destination, records).await?;
        debug!(
            tag = %chunk.tag,
            collection = %destination.name,
            inserted,
            quarantined = quarantined.len(),
            dropped,
            "📬 chunk written"
        );
        Ok(ChunkReport {
            tag: chunk.tag.clone(),
            collection: destination.name.clone(),
            inserted,
            quarantined,
            dropped,
        })
    }

    /// 🗑️ Let the store go.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        Ok(())
    }
}
