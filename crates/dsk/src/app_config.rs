//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - `sink`: everything the routing-and-insert pipeline needs (collection, capped mode,
//!   key rules, quarantine knobs, timestamp handling). Validated by [`SinkConfig::validate`].
//! - `store`: which [`StoreBackend`](crate::backends::StoreBackend) to stand up.
//! - `connection`: host/port/write-concern/TLS for whoever opens the real connection.
//!   Checked for missing companions here, handed over untouched.
//! - `runtime`: queue capacity, flush parallelism, chunk size ceiling.

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Deserializer};
use tracing::info;

use crate::backends::{CollectionOptions, FileStoreConfig};
use crate::collector::TimestampEncoding;
use crate::error::{Result, SinkError};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub sink: SinkConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// 🎯 The pipeline's knobs. Every logical option the sink understands lives here.
#[derive(Debug, Deserialize, Clone)]
pub struct SinkConfig {
    pub database: String,
    /// 📦 The fixed collection, and the fallback when a tag normalizes to nothing.
    pub collection: String,
    /// 🏷️ Route each chunk by its tag instead of the fixed collection.
    #[serde(default)]
    pub tag_mapped: bool,
    /// ✂️ Literal tag prefix stripped before a tag becomes a collection name.
    #[serde(default)]
    pub remove_tag_prefix: Option<String>,

    #[serde(default)]
    pub capped: bool,
    #[serde(default, deserialize_with = "size_opt")]
    pub capped_size: Option<u64>,
    #[serde(default, deserialize_with = "size_opt")]
    pub capped_max: Option<u64>,
    /// 🙈 Skip the capped-mode check against collections that already exist.
    #[serde(default)]
    pub disable_collection_check: bool,

    /// 🗑️ Drop rejected records instead of quarantining them.
    #[serde(default)]
    pub ignore_invalid_records: bool,
    /// 📌 Fields kept verbatim next to the binary blob when a record is quarantined.
    #[serde(default, deserialize_with = "comma_list")]
    pub exclude_broken_fields: Vec<String>,

    #[serde(default)]
    pub replace_dot_in_key_with: Option<String>,
    #[serde(default)]
    pub replace_dollar_in_key_with: Option<String>,

    /// 📏 Force the legacy (pre 1.8) chunk ceiling on or off. Unset means ask the store.
    #[serde(default)]
    pub legacy_store_size_limit: Option<bool>,

    #[serde(default)]
    pub include_tag_key: bool,
    #[serde(default = "default_tag_key")]
    pub tag_key: String,
    #[serde(default = "default_true")]
    pub include_time_key: bool,
    #[serde(default = "default_time_key")]
    pub time_key: String,
    #[serde(default)]
    pub timestamp_encoding: TimestampEncoding,
}

fn default_tag_key() -> String {
    "tag".to_string()
}

fn default_time_key() -> String {
    "time".to_string()
}

fn default_true() -> bool {
    true
}

impl SinkConfig {
    /// 🏗️ A config with every default filled in. Tests build a lot of these.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            tag_mapped: false,
            remove_tag_prefix: None,
            capped: false,
            capped_size: None,
            capped_max: None,
            disable_collection_check: false,
            ignore_invalid_records: false,
            exclude_broken_fields: Vec::new(),
            replace_dot_in_key_with: None,
            replace_dollar_in_key_with: None,
            legacy_store_size_limit: None,
            include_tag_key: false,
            tag_key: default_tag_key(),
            include_time_key: true,
            time_key: default_time_key(),
            timestamp_encoding: TimestampEncoding::default(),
        }
    }

    /// 🔒 Catch the combinations that can never work before a single chunk shows up.
    pub fn validate(&self) -> Result<()> {
        if self.database.trim().is_empty() {
            return Err(SinkError::config("'database' must not be empty"));
        }
        if self.collection.trim().is_empty() {
            return Err(SinkError::config("'collection' must not be empty"));
        }
        if self.capped && self.capped_size.is_none() {
            return Err(SinkError::config(
                "'capped_size' is required when 'capped' is set",
            ));
        }
        if !self.capped && (self.capped_size.is_some() || self.capped_max.is_some()) {
            return Err(SinkError::config(
                "'capped_size' and 'capped_max' only make sense together with 'capped'",
            ));
        }
        if self.include_tag_key && self.tag_key.is_empty() {
            return Err(SinkError::config("'tag_key' must not be empty"));
        }
        if self.include_time_key && self.time_key.is_empty() {
            return Err(SinkError::config("'time_key' must not be empty"));
        }
        Ok(())
    }

    /// 📦 The options new collections get created with.
    pub fn collection_options(&self) -> CollectionOptions {
        CollectionOptions {
            capped: self.capped,
            size: self.capped_size,
            max: self.capped_max,
        }
    }
}

/// 🎭 Which store backend to stand up. Same externally-tagged shape as every other
/// backend config in here: `[store.File]` with a `dir`, or `InMemory`.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    InMemory(()),
    File(FileStoreConfig),
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::InMemory(())
    }
}

/// 📡 How to reach the real store. Parsed and sanity-checked here, opened elsewhere.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// ✍️ Write concern: a node count or a mode like "majority".
    #[serde(default)]
    pub write_concern: Option<String>,
    #[serde(default)]
    pub journaled: bool,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    27017
}

fn default_pool_size() -> u32 {
    1
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            write_concern: None,
            journaled: false,
            pool_size: default_pool_size(),
            tls: None,
        }
    }
}

/// 🔒 TLS material for the connection layer.
#[derive(Debug, Deserialize, Clone)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
    #[serde(default)]
    pub key_passphrase: Option<String>,
    #[serde(default)]
    pub ca_cert: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: None,
            key: None,
            key_passphrase: None,
            ca_cert: None,
            verify_peer: true,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(SinkError::config("'pool_size' must be at least 1"));
        }
        if let Some(tls) = &self.tls {
            if tls.key.is_some() && tls.cert.is_none() {
                return Err(SinkError::config("TLS 'key' requires a TLS 'cert'"));
            }
            if tls.key_passphrase.is_some() && tls.key.is_none() {
                return Err(SinkError::config(
                    "TLS 'key_passphrase' requires a TLS 'key'",
                ));
            }
        }
        Ok(())
    }
}

/// 🧵 Knobs for the flush workers and the chunker in front of them.
#[derive(Debug, Deserialize, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_queue_capacity", alias = "channel_size")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_parallelism", alias = "num_flush_workers")]
    pub flush_parallelism: usize,
    #[serde(
        default = "default_chunk_limit_bytes",
        alias = "buffer_chunk_limit",
        deserialize_with = "size_usize"
    )]
    pub chunk_limit_bytes: usize,
}

fn default_queue_capacity() -> usize {
    10
}

fn default_flush_parallelism() -> usize {
    1
}

// 📦 8 MiB, the classic buffer chunk ceiling. The advisor may still talk us down.
fn default_chunk_limit_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            flush_parallelism: default_flush_parallelism(),
            chunk_limit_bytes: default_chunk_limit_bytes(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.sink.validate()?;
        self.connection.validate()?;
        if self.runtime.flush_parallelism == 0 || self.runtime.queue_capacity == 0 {
            return Err(SinkError::config(
                "'flush_parallelism' and 'queue_capacity' must be at least 1",
            ));
        }
        Ok(())
    }
}

// ===== size parsing =====

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Number(u64),
    Text(String),
}

/// 🔢 "8m" → 8388608. Plain numbers pass through. Suffixes k/m/g/t are powers of 1024.
pub fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim().to_ascii_lowercase();
    let (digits, multiplier) = match text.chars().last()? {
        'k' => (&text[..text.len() - 1], 1u64 << 10),
        'm' => (&text[..text.len() - 1], 1u64 << 20),
        'g' => (&text[..text.len() - 1], 1u64 << 30),
        't' => (&text[..text.len() - 1], 1u64 << 40),
        _ => (text.as_str(), 1),
    };
    digits.trim().parse::<u64>().ok()?.checked_mul(multiplier)
}

fn size_value<E: serde::de::Error>(value: SizeValue) -> std::result::Result<u64, E> {
    match value {
        SizeValue::Number(n) => Ok(n),
        SizeValue::Text(text) => parse_size(&text)
            .ok_or_else(|| E::custom(format!("'{text}' is not a size"))),
    }
}

fn size_opt<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<u64>, D::Error> {
    match Option::<SizeValue>::deserialize(deserializer)? {
        Some(value) => size_value(value).map(Some),
        None => Ok(None),
    }
}

fn size_usize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<usize, D::Error> {
    let value = SizeValue::deserialize(deserializer)?;
    let bytes = size_value(value)?;
    usize::try_from(bytes).map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListValue {
    List(Vec<String>),
    Text(String),
}

/// 📌 Accept `["a", "b"]` from TOML or `"a,b"` from an env var.
fn comma_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    Ok(match ListValue::deserialize(deserializer)? {
        ListValue::List(items) => items,
        ListValue::Text(text) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    })
}

/// 🚀 Load the config from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`DOCSINK_*`, nested with `__`, so
/// `DOCSINK_SINK__DATABASE=logs`) with an optional TOML file. TOML wins on conflicts.
/// No file means env vars only. No assumptions. No pizza defaults.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("DOCSINK_").split("__"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (DOCSINK_*). \
             The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DOCSINK_*). \
                 No file was provided, this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .validate()
        .context("💀 The configuration parsed, but it does not make sense")?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_test_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("docsink.toml");
        // 🧪 A real file, because Figment wants TOML from disk, like it's method acting.
        fs::write(&path, contents).expect("💀 Failed to write test config.");
        path
    }

    #[test]
    fn the_one_where_every_knob_turns() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_config(
            &dir,
            r#"
            [sink]
            database = "fluent"
            collection = "misc"
            tag_mapped = true
            remove_tag_prefix = "app."
            capped = true
            capped_size = "100m"
            capped_max = 1000
            exclude_broken_fields = "host, level"
            replace_dot_in_key_with = "_"
            timestamp_encoding = "epoch_millis"

            [store.File]
            dir = "/tmp/docsink"

            [connection]
            host = "db.internal"
            port = 27018
            write_concern = "majority"

            [connection.tls]
            cert = "/etc/certs/client.pem"
            key = "/etc/certs/client.key"

            [runtime]
            flush_parallelism = 4
            buffer_chunk_limit = "12m"
            "#,
        );

        let config = load_config(Some(path.as_path())).expect("💀 the full config should parse");
        assert!(config.sink.tag_mapped);
        assert_eq!(config.sink.capped_size, Some(100 * 1024 * 1024));
        assert_eq!(config.sink.capped_max, Some(1000));
        assert_eq!(config.sink.exclude_broken_fields, vec!["host", "level"]);
        assert_eq!(config.sink.timestamp_encoding, TimestampEncoding::EpochMillis);
        assert!(config.sink.include_time_key);
        assert!(matches!(config.store, StoreConfig::File(_)));
        assert_eq!(config.connection.port, 27018);
        assert!(config.connection.tls.as_ref().is_some_and(|t| t.verify_peer));
        assert_eq!(config.runtime.flush_parallelism, 4);
        assert_eq!(config.runtime.chunk_limit_bytes, 12 * 1024 * 1024);
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_config(
            &dir,
            r#"
            [sink]
            database = "fluent"
            collection = "misc"
            "#,
        );
        let config: AppConfig = Figment::new()
            .merge(Toml::file(path.as_path()))
            .extract()
            .expect("💀 Defaults should fill the gaps.");

        assert_eq!(config.sink.time_key, "time");
        assert_eq!(config.sink.tag_key, "tag");
        assert!(!config.sink.include_tag_key);
        assert!(matches!(config.store, StoreConfig::InMemory(())));
        assert_eq!(config.connection.host, "localhost");
        assert_eq!(config.connection.port, 27017);
        assert_eq!(config.runtime.queue_capacity, 10);
        assert_eq!(config.runtime.chunk_limit_bytes, 8 * 1024 * 1024);
    }

    #[test]
    fn the_one_where_capped_forgets_its_size() {
        let mut config = SinkConfig::new("fluent", "misc");
        config.capped = true;
        assert!(matches!(config.validate(), Err(SinkError::Configuration(_))));

        let mut config = SinkConfig::new("fluent", "misc");
        config.capped_size = Some(1024);
        assert!(matches!(config.validate(), Err(SinkError::Configuration(_))));

        config.capped = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn the_one_where_a_tls_key_shows_up_without_a_cert() {
        let connection = ConnectionConfig {
            tls: Some(TlsConfig {
                key: Some("client.key".into()),
                ..TlsConfig::default()
            }),
            ..ConnectionConfig::default()
        };
        assert!(matches!(connection.validate(), Err(SinkError::Configuration(_))));
    }

    #[test]
    fn the_one_where_tls_trusts_nobody_by_default() {
        assert!(TlsConfig::default().verify_peer);
        let parsed: TlsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.verify_peer, TlsConfig::default().verify_peer);
    }

    #[test]
    fn the_one_where_sizes_speak_human() {
        assert_eq!(parse_size("8m"), Some(8 * 1024 * 1024));
        assert_eq!(parse_size("2K"), Some(2048));
        assert_eq!(parse_size("1234"), Some(1234));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size(""), None);
    }
}
