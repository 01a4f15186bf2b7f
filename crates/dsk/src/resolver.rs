//! 🧭 Collection resolving: from "this chunk came from `app.web.access`" to "write it here".
//!
//! 🧠 Knowledge graph:
//! - [`RouteSettings::normalize`] turns a route key into a collection name: strip the tag
//!   prefix (tag-mapped mode only), trim leading/trailing dots, fall back to the fixed
//!   collection when nothing is left.
//! - [`DestinationCache`] remembers every resolved [`Destination`] for the life of the
//!   process. Never evicts. Hits take a read lock and nothing else.
//! - Misses go through a per-name `OnceCell`: the first caller talks to the store, everyone
//!   else racing on the same name waits and gets the winner's `Arc`. A failed attempt leaves
//!   the cell empty, so the next caller simply tries again.
//! - Existing collections are checked for capped mode. A mismatch is a configuration error,
//!   never an auto-fix. `disable_collection_check` turns the check off.
//!
//! ⚠️ The only shared mutable state in the whole pipeline lives in this file. Be nice to it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use regex::Regex;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, trace};

use crate::app_config::SinkConfig;
use crate::backends::{CollectionOptions, DocumentStore};
use crate::error::{Result, SinkError};

/// 📦 One resolved, validated collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub name: String,
    pub capped: bool,
    pub size_limit_bytes: Option<u64>,
    pub max_doc_count: Option<u64>,
}

impl Destination {
    fn with_options(name: &str, options: &CollectionOptions) -> Self {
        Self {
            name: name.to_string(),
            capped: options.capped,
            size_limit_bytes: options.size,
            max_doc_count: options.max,
        }
    }

    /// 📦 An existing collection as the store reports it. Only capped mode is known.
    fn existing(name: &str, capped: bool) -> Self {
        Self {
            name: name.to_string(),
            capped,
            size_limit_bytes: None,
            max_doc_count: None,
        }
    }
}

type Slot = Arc<OnceCell<Arc<Destination>>>;

/// 🗄️ Process-wide memory of resolved destinations, with a compare-and-create primitive.
#[derive(Debug, Default)]
pub struct DestinationCache {
    slots: RwLock<HashMap<String, Slot>>,
}

impl DestinationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 A cached destination, if one has been established.
    pub async fn get(&self, name: &str) -> Option<Arc<Destination>> {
        self.slots
            .read()
            .await
            .get(name)
            .and_then(|slot| slot.get().cloned())
    }

    /// 🎯 Return the cached destination for `name`, or run `create` to establish it.
    ///
    /// At most one `create` runs per name at a time. Concurrent callers for the same name
    /// wait on the same cell and share whatever it ends up holding.
    pub async fn get_or_try_create<F, Fut>(&self, name: &str, create: F) -> Result<Arc<Destination>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Destination>>,
    {
        if let Some(hit) = self.get(name).await {
            trace!(collection = name, "🎯 destination cache hit");
            return Ok(hit);
        }
        let slot = {
            let mut slots = self.slots.write().await;
            Arc::clone(slots.entry(name.to_string()).or_default())
        };
        slot.get_or_try_init(move || async move { create().await.map(Arc::new) })
            .await
            .cloned()
    }

    /// 🔢 How many destinations are established.
    pub async fn len(&self) -> usize {
        self.slots
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// 🔧 Routing knobs, compiled once from the config.
#[derive(Debug, Clone)]
pub struct RouteSettings {
    pub default_collection: String,
    pub tag_mapped: bool,
    pub remove_tag_prefix: Option<Regex>,
    pub options: CollectionOptions,
    pub validate: bool,
}

impl RouteSettings {
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let remove_tag_prefix = match &config.remove_tag_prefix {
            Some(prefix) if !prefix.is_empty() => Some(
                Regex::new(&format!("^{}", regex::escape(prefix)))
                    .map_err(|e| SinkError::config(format!("bad 'remove_tag_prefix': {e}")))?,
            ),
            _ => None,
        };
        Ok(Self {
            default_collection: config.collection.clone(),
            tag_mapped: config.tag_mapped,
            remove_tag_prefix,
            options: config.collection_options(),
            validate: !config.disable_collection_check,
        })
    }

    /// ✂️ Route key in, collection name out.
    pub fn normalize(&self, route_key: &str) -> String {
        let stripped = match (&self.remove_tag_prefix, self.tag_mapped) {
            (Some(prefix), true) => prefix.replace(route_key, ""),
            _ => route_key.into(),
        };
        let trimmed = stripped.trim_matches('.');
        if trimmed.is_empty() {
            self.default_collection.clone()
        } else {
            trimmed.to_string()
        }
    }
}

/// 🧭 Maps route keys to validated, cached destinations.
#[derive(Debug)]
pub struct CollectionResolver<S> {
    store: Arc<S>,
    settings: RouteSettings,
    cache: Arc<DestinationCache>,
}

impl<S: DocumentStore> CollectionResolver<S> {
    pub fn new(store: Arc<S>, settings: RouteSettings, cache: Arc<DestinationCache>) -> Self {
        Self {
            store,
            settings,
            cache,
        }
    }

    pub fn cache(&self) -> &Arc<DestinationCache> {
        &self.cache
    }

    /// 🎯 Resolve a route key to its destination, creating the collection on first use.
    pub async fn resolve(&self, route_key: &str) -> Result<Arc<Destination>> {
        let name = self.settings.normalize(route_key);
        self.cache
            .get_or_try_create(&name, || self.establish(&name))
            .await
    }

    async fn establish(&self, name: &str) -> Result<Destination> {
        let expected = &self.settings.options;
        if !self.store.collection_exists(name).await? {
            self.store.create_collection(name, expected).await?;
            info!(
                collection = name,
                capped = expected.capped,
                size = ?expected.size,
                max = ?expected.max,
                "🏗️ created collection"
            );
            return Ok(Destination::with_options(name, expected));
        }

        let actual_capped = self.store.is_capped(name).await?;
        if actual_capped == expected.capped {
            debug!(collection = name, capped = actual_capped, "✅ existing collection matches");
            return Ok(Destination::existing(name, actual_capped));
        }
        if self.settings.validate {
            return Err(SinkError::config(format!(
                "collection '{name}' exists with {} mode, but the configuration expects {} mode",
                capped_label(actual_capped),
                capped_label(expected.capped),
            )));
        }
        debug!(
            collection = name,
            capped = actual_capped,
            "🙈 capped mode differs, collection check disabled, using it as is"
        );
        Ok(Destination::existing(name, actual_capped))
    }
}

fn capped_label(capped: bool) -> &'static str {
    if capped { "capped" } else { "uncapped" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use std::sync::atomic::Ordering;

    fn settings(config: &SinkConfig) -> RouteSettings {
        RouteSettings::from_config(config).unwrap()
    }

    fn resolver(store: &InMemoryStore, config: &SinkConfig) -> CollectionResolver<InMemoryStore> {
        CollectionResolver::new(
            Arc::new(store.clone()),
            settings(config),
            Arc::new(DestinationCache::new()),
        )
    }

    #[test]
    fn the_one_where_tags_get_a_haircut() {
        let mut config = SinkConfig::new("fluent", "misc");
        config.tag_mapped = true;
        config.remove_tag_prefix = Some("app.".into());
        let routes = settings(&config);

        assert_eq!(routes.normalize("app.web.access"), "web.access");
        assert_eq!(routes.normalize("..web.."), "web");
        assert_eq!(routes.normalize("app."), "misc");
        assert_eq!(routes.normalize(""), "misc");
        // 🔍 the prefix is literal and anchored, so dots are not wildcards
        assert_eq!(routes.normalize("appXweb"), "appXweb");
        assert_eq!(routes.normalize("web.app.x"), "web.app.x");
    }

    #[test]
    fn the_one_where_the_prefix_only_matters_in_tag_mode() {
        let mut config = SinkConfig::new("fluent", "app.logs");
        config.remove_tag_prefix = Some("app.".into());
        assert_eq!(settings(&config).normalize("app.logs"), "app.logs");
    }

    #[tokio::test]
    async fn the_one_where_the_second_resolve_never_calls_the_store() {
        let store = InMemoryStore::new();
        let resolver = resolver(&store, &SinkConfig::new("fluent", "events"));

        let first = resolver.resolve("events").await.unwrap();
        let checks = store.counters().existence_checks.load(Ordering::SeqCst);
        let second = resolver.resolve("events").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.counters().existence_checks.load(Ordering::SeqCst), checks);
        assert_eq!(store.counters().creations.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cache().len().await, 1);
    }

    #[tokio::test]
    async fn the_one_where_a_new_collection_is_born_capped() {
        let store = InMemoryStore::new();
        let mut config = SinkConfig::new("fluent", "ring");
        config.capped = true;
        config.capped_size = Some(1 << 20);
        config.capped_max = Some(100);
        let dest = resolver(&store, &config).resolve("ring").await.unwrap();

        assert!(dest.capped);
        assert_eq!(dest.size_limit_bytes, Some(1 << 20));
        assert_eq!(
            store.options("ring").await,
            Some(CollectionOptions {
                capped: true,
                size: Some(1 << 20),
                max: Some(100)
            })
        );
    }

    #[tokio::test]
    async fn the_one_where_capped_reality_meets_uncapped_expectations() {
        let store = InMemoryStore::new();
        store
            .seed_collection(
                "events",
                CollectionOptions {
                    capped: true,
                    size: Some(4096),
                    max: None,
                },
            )
            .await;

        let strict = resolver(&store, &SinkConfig::new("fluent", "events"));
        let err = strict.resolve("events").await.unwrap_err();
        let message = match err {
            SinkError::Configuration(message) => message,
            other => panic!("💀 expected a configuration error, got {other:?}"),
        };
        assert!(message.contains("capped mode"));
        assert!(message.contains("uncapped mode"));
        // 💀 failures are not cached
        assert!(strict.cache().is_empty().await);

        let mut relaxed_config = SinkConfig::new("fluent", "events");
        relaxed_config.disable_collection_check = true;
        let relaxed = resolver(&store, &relaxed_config);
        let dest = relaxed.resolve("events").await.unwrap();
        assert!(dest.capped);
        assert_eq!(store.counters().creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn the_one_where_an_existing_collection_is_taken_as_it_is() {
        let store = InMemoryStore::new();
        store
            .seed_collection(
                "ring",
                CollectionOptions {
                    capped: true,
                    size: Some(4096),
                    max: Some(10),
                },
            )
            .await;

        let mut config = SinkConfig::new("fluent", "ring");
        config.capped = true;
        config.capped_size = Some(1 << 20);
        config.capped_max = Some(500);
        let dest = resolver(&store, &config).resolve("ring").await.unwrap();
        assert_eq!(*dest, Destination::existing("ring", true));
        assert_eq!(store.counters().creations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_stampede_creates_exactly_one_collection() {
        let store = InMemoryStore::new();
        let resolver = Arc::new(resolver(&store, &SinkConfig::new("fluent", "events")));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                tokio::spawn(async move { resolver.resolve("events").await })
            })
            .collect();
        let destinations: Vec<Arc<Destination>> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert!(destinations.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(store.counters().existence_checks.load(Ordering::SeqCst), 1);
        assert_eq!(store.counters().creations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn the_one_where_a_flaky_store_gets_a_second_chance() {
        let store = InMemoryStore::new();
        let resolver = resolver(&store, &SinkConfig::new("fluent", "events"));

        store.set_unavailable(true);
        assert!(matches!(resolver.resolve("events").await, Err(SinkError::Store(_))));
        store.set_unavailable(false);
        assert!(resolver.resolve("events").await.is_ok());
    }
}
