//! 💀 Errors: the taxonomy of everything that can go sideways between a chunk and a collection.
//!
//! Two layers, one story:
//! - [`StoreError`] is what the store says when it is having a bad day.
//! - [`SinkError`] is what the pipeline tells its caller. Partial rejections never show up
//!   here, they get quarantined and the caller never hears about them. Like a good manager.
//!
//! The glue code (config loading, workers, CLI) speaks `anyhow` with `.context(..)`.
//! The core speaks these, because the buffering layer upstream needs to tell a broken
//! config apart from a flaky network before it decides to retry. 🦆

use thiserror::Error;

/// 🕳️ Failures reported by a [`DocumentStore`](crate::backends::DocumentStore).
#[derive(Error, Debug)]
pub enum StoreError {
    /// 📡 The store could not be reached, or stopped answering halfway through.
    #[error("store unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// 🚫 A strict insert hit a document the store refused.
    #[error("store rejected {rejected} document(s) in '{collection}': {reason}")]
    Rejected {
        collection: String,
        rejected: usize,
        reason: String,
    },

    /// 🔧 Anything else the store decided to be upset about (auth, quota, disk).
    #[error("store operation '{operation}' failed: {message}")]
    Operation { operation: String, message: String },
}

impl StoreError {
    /// 📡 Wrap an I/O-ish failure as "the store is not there right now".
    pub fn unavailable(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// 🎯 Everything the pipeline can surface to the flush caller.
#[derive(Error, Debug)]
pub enum SinkError {
    /// ⚙️ The configuration and reality disagree. Fatal. Do not retry, fix the config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 📦 The store called the whole batch "no documents" and invalid-record handling is off.
    #[error("store rejected the whole batch of {records} record(s) for '{collection}'")]
    WholeBatchRejected { collection: String, records: usize },

    /// 💀 Any other store failure. Fatal for this chunk, the buffering layer retries it later.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 🧱 A chunk frame that would not decode. The chunk is toast.
    #[error("failed to decode chunk frame #{frame}: {message}")]
    Decode { frame: usize, message: String },

    /// 🚑 A quarantine payload that would not pack (or unpack).
    #[error("quarantine payload codec failed: {0}")]
    Quarantine(#[source] bincode::Error),
}

impl SinkError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// 🔄 Whether the surrounding buffering layer should bother retrying this chunk.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_only_store_failures_earn_a_retry() {
        let flaky = SinkError::from(StoreError::operation("insert", "quota exceeded"));
        assert!(flaky.is_retryable());
        assert!(!SinkError::config("capped mismatch").is_retryable());
        assert!(
            !SinkError::WholeBatchRejected {
                collection: "events".into(),
                records: 3
            }
            .is_retryable()
        );
    }

    #[test]
    fn the_one_where_store_errors_keep_their_own_words() {
        let err = SinkError::from(StoreError::Rejected {
            collection: "events".into(),
            rejected: 2,
            reason: "key contains '.'".into(),
        });
        assert_eq!(
            err.to_string(),
            "store rejected 2 document(s) in 'events': key contains '.'"
        );
    }
}
