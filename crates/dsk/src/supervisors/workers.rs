//! 🧵 Workers: the ones who actually do the flushing while the Supervisor takes the credit.

use anyhow::Result;
use tokio::task::JoinHandle;

mod flush_worker;
pub(super) use flush_worker::FlushWorker;

use crate::report::FlushSummary;

/// 🏗️ A background worker, that does work. duh.
pub(super) trait Worker {
    /// 🚀 Spawn it. The handle resolves to the worker's own notes on how things went.
    fn start(self) -> JoinHandle<Result<FlushSummary>>;
}
