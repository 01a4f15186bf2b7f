//! 🎬 *[a channel fills with chunks. somewhere, a collection waits.]*
//!
//! 🗑️ The FlushWorker: receives a chunk, hands it to the sink, writes down what happened,
//! repeats until the channel runs dry. Failed chunks get a log line and a tally mark.
//! A configuration error gets the channel closed on everyone, because no amount of
//! retrying fixes a config file.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::Worker;
use crate::backends::DocumentStore;
use crate::common::BufferedChunk;
use crate::error::SinkError;
use crate::pipeline::DocumentSink;
use crate::report::FlushSummary;

#[derive(Debug)]
pub(crate) struct FlushWorker<S> {
    id: usize,
    rx: Receiver<BufferedChunk>,
    sink: Arc<DocumentSink<S>>,
}

impl<S> FlushWorker<S> {
    pub(crate) fn new(id: usize, rx: Receiver<BufferedChunk>, sink: Arc<DocumentSink<S>>) -> Self {
        Self { id, rx, sink }
    }
}

impl<S: DocumentStore + 'static> Worker for FlushWorker<S> {
    fn start(self) -> JoinHandle<Result<FlushSummary>> {
        tokio::spawn(async move {
            let worker = self.id;
            debug!(worker, "📥 flush worker started draining the channel");
            let mut summary = FlushSummary::default();
            while let Ok(chunk) = self.rx.recv().await {
                match self.sink.write_chunk(&chunk).await {
                    Ok(report) => summary.record(&report),
                    Err(e @ SinkError::Configuration(_)) => {
                        error!(worker, tag = %chunk.tag, error = %e, "💀 configuration error, stopping the flush");
                        self.rx.close();
                        return Err(e).context(format!(
                            "💀 flush worker #{worker} gave up on chunk '{}'. The configuration and the store disagree, fix one of them.",
                            chunk.tag
                        ));
                    }
                    Err(e) => {
                        warn!(
                            worker,
                            tag = %chunk.tag,
                            records = chunk.entries,
                            retryable = e.is_retryable(),
                            error = %e,
                            "⚠️ chunk failed, leaving it to the buffering layer"
                        );
                        summary.record_failure(&chunk);
                    }
                }
            }
            debug!(worker, "🏁 channel closed, flush worker done");
            Ok(summary)
        })
    }
}
