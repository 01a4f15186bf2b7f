//! 🚰 docsink: buffered chunks in, documents out.
//!
//! A chunk of timestamped records shows up. The sink decodes it, works out which collection
//! it belongs to (creating that collection the first time), scrubs the keys the store would
//! choke on, bulk-inserts the lot, and quarantines whatever the store still refuses.

pub mod app_config;
pub mod backends;
pub mod chunk_limit;
pub mod chunker;
pub mod collector;
pub mod common;
pub mod coordinator;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod resolver;
pub mod sanitizer;
pub mod supervisors;

#[cfg(test)]
mod testing;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::app_config::AppConfig;
use crate::backends::StoreBackend;
use crate::pipeline::DocumentSink;
use crate::report::FlushSummary;
use crate::resolver::DestinationCache;
use crate::supervisors::Supervisor;

/// 🚀 Replay events from `input` (stdin when `None`) through the configured sink.
pub async fn run(app_config: AppConfig, input: Option<&Path>) -> Result<FlushSummary> {
    let store = StoreBackend::from_config(&app_config.store, &app_config.sink.database)
        .await
        .context("💀 couldn't stand up the configured store")?;
    let sink = DocumentSink::configure(
        &app_config.sink,
        app_config.runtime.chunk_limit_bytes,
        Arc::new(store),
        Arc::new(DestinationCache::new()),
    )
    .await
    .context("💀 the sink refused its configuration")?;
    let limit = sink.chunk_limit().effective_bytes;

    let chunks = match input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("💀 couldn't open events file '{}'", path.display()))?;
            chunker::read_chunks(file, limit).await?
        }
        None => chunker::read_chunks(tokio::io::stdin(), limit).await?,
    };
    info!(chunks = chunks.len(), limit, "📦 events chunked");

    let sink = Arc::new(sink);
    let summary = Supervisor::new(Arc::clone(&sink), app_config.runtime.clone())
        .flush_all(chunks)
        .await
        .context("💀 flushing stopped early")?;
    sink.close().await.context("💀 the store didn't close cleanly")?;
    Ok(summary)
}
