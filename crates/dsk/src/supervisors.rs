//! 🎬 *[a queue of chunks. a handful of workers. one supervisor with a clipboard.]*
//!
//! 📦 The Supervisor: feeds chunks into a bounded channel, lets `flush_parallelism` workers
//! drain it through the shared [`DocumentSink`], then collects everyone's notes into one
//! [`FlushSummary`].
//!
//! 🧠 Knowledge graph:
//! - A chunk that fails is logged and counted. Retrying is the buffering layer's job.
//! - A configuration error is different: the worker that hits it closes the channel, the
//!   others finish what they hold, and the whole flush returns the error.
//!
//! ⚠️ The workers stay private. The supervisor is the only one who talks to them.

mod workers;

use std::sync::Arc;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::app_config::RuntimeConfig;
use crate::backends::DocumentStore;
use crate::common::BufferedChunk;
use crate::pipeline::DocumentSink;
use crate::report::FlushSummary;
use workers::{FlushWorker, Worker};

/// 📦 Owns the sink handle and the runtime knobs, hands out work.
#[derive(Debug)]
pub struct Supervisor<S> {
    sink: Arc<DocumentSink<S>>,
    runtime: RuntimeConfig,
}

impl<S: DocumentStore + 'static> Supervisor<S> {
    pub fn new(sink: Arc<DocumentSink<S>>, runtime: RuntimeConfig) -> Self {
        Self { sink, runtime }
    }

    /// 🧵 Push every chunk through the flush workers and wait for all of them.
    pub async fn flush_all(&self, chunks: impl IntoIterator<Item = BufferedChunk>) -> Result<FlushSummary> {
        let (tx, rx) = async_channel::bounded(self.runtime.queue_capacity.max(1));
        let handles: Vec<_> = (0..self.runtime.flush_parallelism.max(1))
            .map(|id| FlushWorker::new(id, rx.clone(), Arc::clone(&self.sink)).start())
            .collect();
        drop(rx);

        let mut queued = 0usize;
        for chunk in chunks {
            if tx.send(chunk).await.is_err() {
                warn!(queued, "🛑 flush channel closed early, no more chunks will be queued");
                break;
            }
            queued += 1;
        }
        // -- 🏁 closing the sender is how workers learn the queue is done
        drop(tx);
        debug!(queued, "📤 all chunks queued");

        let mut summary = FlushSummary::default();
        let mut first_failure = None;
        for joined in join_all(handles).await {
            match joined.context("💀 a flush worker panicked")? {
                Ok(worker_summary) => summary.merge(worker_summary),
                Err(e) => {
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }
}
