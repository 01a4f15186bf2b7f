//! 📏 Chunk size advice: how big a chunk can get before the store chokes on it.
//!
//! The store has a per-document ceiling (4 MiB on old servers, 16 MiB on modern ones) and
//! the binary encoding is sometimes fatter than whatever the buffer measured. So we halve
//! the ceiling and call it a heuristic. A configured chunk limit above the advice gets
//! clamped down, with one warning, at configuration time. Never an error.

use tracing::warn;

/// 📦 Advice for stores older than 1.8: 4 MiB / 2.
pub const LEGACY_CHUNK_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// 📦 Advice for modern stores: 16 MiB / 2 plus a little slack.
pub const MODERN_CHUNK_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// 🔢 First store version that lifted the document ceiling.
const MODERN_SINCE: (u64, u64) = (1, 8);

/// 📏 The advisor. Stateless, so it's just a namespace with opinions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkSizeAdvisor;

/// 🎯 What the advisor decided, and whether it had to overrule the config to get there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimit {
    pub effective_bytes: usize,
    pub clamped: bool,
}

impl ChunkSizeAdvisor {
    pub fn advise(legacy: bool) -> usize {
        if legacy {
            LEGACY_CHUNK_LIMIT_BYTES
        } else {
            MODERN_CHUNK_LIMIT_BYTES
        }
    }

    /// ✂️ Cap `configured_bytes` at the advice. Logs one warning when it had to cut.
    pub fn clamp(configured_bytes: usize, legacy: bool) -> ChunkLimit {
        let advised = Self::advise(legacy);
        if configured_bytes > advised {
            warn!(
                configured_bytes,
                advised_bytes = advised,
                legacy,
                "⚠️ chunk limit is larger than the store can swallow, capping it at the advised size"
            );
            ChunkLimit {
                effective_bytes: advised,
                clamped: true,
            }
        } else {
            ChunkLimit {
                effective_bytes: configured_bytes,
                clamped: false,
            }
        }
    }

    /// 🔍 Is this version string older than the big-document era? Unparseable versions are
    /// treated as modern, pre-1.8 stores being rarer than typos.
    pub fn is_legacy_version(version: &str) -> bool {
        let mut parts = version
            .trim()
            .split(|c: char| c == '.' || c == '-')
            .map(|p| p.parse::<u64>());
        match (parts.next(), parts.next()) {
            (Some(Ok(major)), Some(Ok(minor))) => (major, minor) < MODERN_SINCE,
            (Some(Ok(major)), None) => major < MODERN_SINCE.0,
            _ => false,
        }
    }
}
