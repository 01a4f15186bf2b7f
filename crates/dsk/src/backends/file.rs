//! 📂 Previously, on "Things That Could Go Wrong With A Directory"...
//!
//! The store was supposed to be a real database. Then someone asked to replay last week's
//! events on a laptop with no database on it. This module happened.
//!
//! [`FileStore`] is a document store made of files: one directory per database, one
//! NDJSON file per collection, and a `<name>.meta.json` sidecar remembering how the
//! collection was created (capped or not, how big, how many). Inserts append. Capped
//! collections get rewritten when they overflow, oldest lines first out the door.
//!
//! 🚰 chunk → pipeline → FileStore → `<dir>/<database>/<collection>.ndjson`
//! 💀 Disk full → your problem now

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{CollectionOptions, DocumentRules, DocumentStore, InsertMode, InsertOutcome, enforce_cap};
use crate::common::Record;
use crate::error::StoreError;

/// 🔢 What a file store claims to be when the chunk-size advisor asks.
const FILE_STORE_VERSION: &str = "7.0.0-file";

/// 🔧 Where the database directories live.
#[derive(Debug, Deserialize, Clone)]
pub struct FileStoreConfig {
    pub dir: PathBuf,
}

/// 📂 A directory pretending, quite convincingly, to be a document store.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    rules: DocumentRules,
    // -- 🔒 one writer at a time; appends and capped rewrites must not interleave
    write_lock: Mutex<()>,
}

fn io_error(operation: &str, path: &Path, e: std::io::Error) -> StoreError {
    StoreError::unavailable(format!("{operation} failed on '{}'", path.display()), e)
}

impl FileStore {
    /// 🚀 Open (or create) the directory for `database` under the configured root.
    pub async fn open(config: &FileStoreConfig, database: &str) -> Result<Self, StoreError> {
        let root = config.dir.join(database);
        fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error("create_dir_all", &root, e))?;
        debug!(root = %root.display(), "📂 file store opened");
        Ok(Self {
            root,
            rules: DocumentRules::for_version(FILE_STORE_VERSION),
            write_lock: Mutex::new(()),
        })
    }

    fn checked_name<'a>(&self, operation: &str, name: &'a str) -> Result<&'a str, StoreError> {
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
            return Err(StoreError::operation(
                operation,
                format!("'{name}' is not a usable collection name"),
            ));
        }
        Ok(name)
    }

    fn data_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.ndjson"))
    }

    fn meta_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.meta.json"))
    }

    async fn read_options(&self, name: &str) -> Result<Option<CollectionOptions>, StoreError> {
        let path = self.meta_path(name);
        match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StoreError::operation("read_options", format!("corrupt sidecar '{}': {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read_options", &path, e)),
        }
    }

    async fn write_options(&self, name: &str, options: &CollectionOptions) -> Result<(), StoreError> {
        let path = self.meta_path(name);
        let bytes = serde_json::to_vec(options)
            .map_err(|e| StoreError::operation("write_options", e.to_string()))?;
        fs::write(&path, bytes)
            .await
            .map_err(|e| io_error("write_options", &path, e))
    }

    /// 🔍 Every document in `name`, oldest first. Missing collections are empty.
    pub async fn documents(&self, name: &str) -> Result<Vec<Record>, StoreError> {
        let path = self.data_path(name);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error("documents", &path, e)),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    StoreError::operation("documents", format!("corrupt line in '{}': {e}", path.display()))
                })
            })
            .collect()
    }

    fn render(docs: &[Record]) -> Result<String, StoreError> {
        let mut payload = String::new();
        for doc in docs {
            let line = serde_json::to_string(doc)
                .map_err(|e| StoreError::operation("insert_many", e.to_string()))?;
            payload.push_str(&line);
            payload.push('\n');
        }
        Ok(payload)
    }

    async fn append(&self, name: &str, docs: Vec<Record>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let options = match self.read_options(name).await? {
            Some(options) => options,
            None => {
                let options = CollectionOptions::default();
                self.write_options(name, &options).await?;
                options
            }
        };
        let path = self.data_path(name);
        if options.capped {
            // ✂️ capped: load, trim, rewrite the whole file
            let mut all: VecDeque<Record> = self.documents(name).await?.into();
            all.extend(docs);
            enforce_cap(&mut all, &options);
            let payload = Self::render(all.make_contiguous())?;
            fs::write(&path, payload)
                .await
                .map_err(|e| io_error("insert_many", &path, e))?;
        } else {
            let payload = Self::render(&docs)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| io_error("insert_many", &path, e))?;
            file.write_all(payload.as_bytes())
                .await
                .map_err(|e| io_error("insert_many", &path, e))?;
            file.flush()
                .await
                .map_err(|e| io_error("insert_many", &path, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn server_version(&self) -> Result<String, StoreError> {
        Ok(FILE_STORE_VERSION.to_string())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let name = self.checked_name("collection_exists", name)?;
        let path = self.meta_path(name);
        fs::try_exists(&path)
            .await
            .map_err(|e| io_error("collection_exists", &path, e))
    }

    async fn create_collection(
        &self,
        name: &str,
        options: &CollectionOptions,
    ) -> Result<(), StoreError> {
        let name = self.checked_name("create_collection", name)?;
        let _guard = self.write_lock.lock().await;
        if self.read_options(name).await?.is_some() {
            return Err(StoreError::operation(
                "create_collection",
                format!("collection '{name}' already exists"),
            ));
        }
        self.write_options(name, options).await?;
        let path = self.data_path(name);
        fs::write(&path, b"")
            .await
            .map_err(|e| io_error("create_collection", &path, e))
    }

    async fn is_capped(&self, name: &str) -> Result<bool, StoreError> {
        let name = self.checked_name("is_capped", name)?;
        match self.read_options(name).await? {
            Some(options) => Ok(options.capped),
            None => Err(StoreError::operation(
                "is_capped",
                format!("collection '{name}' not found"),
            )),
        }
    }

    async fn insert_many(
        &self,
        name: &str,
        docs: Vec<Record>,
        mode: InsertMode,
    ) -> InsertOutcome {
        let name = match self.checked_name("insert_many", name) {
            Ok(name) => name,
            Err(e) => return InsertOutcome::Fatal(e),
        };
        let (good, bad) = match self.rules.triage(name, docs, mode) {
            Ok(split) => split,
            Err(outcome) => return outcome,
        };
        let accepted = good.len();
        if let Err(e) = self.append(name, good).await {
            return InsertOutcome::Fatal(e);
        }
        trace!(collection = name, accepted, rejected = bad.len(), "📬 file store append");
        InsertOutcome::settled(accepted, bad)
    }

    async fn close(&self) -> Result<(), StoreError> {
        // -- every append opens, writes and flushes its own handle, so there's nothing left
        debug!(root = %self.root.display(), "🗑️ file store closing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{Value, record};

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().expect("💀 no temp dir, no tests");
        let store = FileStore::open(
            &FileStoreConfig {
                dir: dir.path().to_path_buf(),
            },
            "fluent",
        )
        .await
        .expect("💀 a fresh temp dir should open");
        (dir, store)
    }

    #[tokio::test]
    async fn the_one_where_collections_leave_sidecars() {
        let (_dir, store) = store().await;
        assert!(!store.collection_exists("events").await.unwrap());
        store
            .create_collection(
                "events",
                &CollectionOptions {
                    capped: true,
                    size: Some(4096),
                    max: None,
                },
            )
            .await
            .unwrap();
        assert!(store.collection_exists("events").await.unwrap());
        assert!(store.is_capped("events").await.unwrap());
        assert!(store.create_collection("events", &CollectionOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn the_one_where_documents_survive_the_round_trip_to_disk() {
        let (_dir, store) = store().await;
        let mut doc = record([("msg", "hello")]);
        doc.insert("blob".into(), Value::Binary(vec![0, 1, 2, 255]));
        doc.insert(
            "time".into(),
            Value::DateTime(crate::common::EventTime::from_secs(1_700_000_000).to_datetime()),
        );
        let outcome = store
            .insert_many("events", vec![doc.clone(), record([("bad.key", 1)])], InsertMode::BestEffort)
            .await;
        assert!(matches!(outcome, InsertOutcome::PartiallyRejected { accepted: 1, .. }));
        assert_eq!(store.documents("events").await.unwrap(), vec![doc]);
        // 📦 inserting into a missing collection created it on the way
        assert!(store.collection_exists("events").await.unwrap());
    }

    #[tokio::test]
    async fn the_one_where_capped_files_get_trimmed() {
        let (_dir, store) = store().await;
        store
            .create_collection(
                "ring",
                &CollectionOptions {
                    capped: true,
                    size: None,
                    max: Some(2),
                },
            )
            .await
            .unwrap();
        for i in 0..4 {
            store
                .insert_many("ring", vec![record([("n", i)])], InsertMode::Strict)
                .await;
        }
        assert_eq!(
            store.documents("ring").await.unwrap(),
            vec![record([("n", 2)]), record([("n", 3)])]
        );
    }

    #[tokio::test]
    async fn the_one_where_path_tricks_are_not_collection_names() {
        let (_dir, store) = store().await;
        assert!(store.collection_exists("../etc").await.is_err());
        assert!(matches!(
            store
                .insert_many("a/b", vec![record([("n", 1)])], InsertMode::BestEffort)
                .await,
            InsertOutcome::Fatal(_)
        ));
    }
}
