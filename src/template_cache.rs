//! Process-wide cache of compiled [`StatementTemplate`]s.
//!
//! Templates are immutable once published, so they are handed out as
//! `Arc`s and shared across threads and commands. Lookups take a read lock;
//! a miss serialises on a compile mutex so each key is compiled at most once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::SqlBridgeError;
use crate::parameter::ParameterCollection;
use crate::template::{PlaceholderMode, StatementTemplate, compile, detect_mode};

static GLOBAL: OnceLock<Arc<TemplateCache>> = OnceLock::new();

/// Cache identity of a template.
///
/// Named templates depend on the parameter order they were resolved against,
/// so the ordered name list is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    sql: String,
    names: Option<Vec<Option<String>>>,
}

impl TemplateKey {
    #[must_use]
    pub fn new(sql: &str, mode: PlaceholderMode, params: &ParameterCollection) -> Self {
        let names = match mode {
            PlaceholderMode::Named => Some(params.names()),
            PlaceholderMode::Positional => None,
        };
        Self {
            sql: sql.to_string(),
            names,
        }
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Tuning for a [`TemplateCache`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TemplateCacheOptions {
    /// Upper bound on cached templates; least recently used entries are
    /// evicted past it. `None` keeps every template for the process lifetime.
    pub max_entries: Option<usize>,
}

/// Counters for a [`TemplateCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub compiles: u64,
    pub evictions: u64,
    pub entries: usize,
}

struct CacheEntry {
    template: Arc<StatementTemplate>,
    last_used: AtomicU64,
}

pub struct TemplateCache {
    options: TemplateCacheOptions,
    entries: RwLock<HashMap<TemplateKey, CacheEntry>>,
    compile_lock: Mutex<()>,
    clock: AtomicU64,
    hits: AtomicU64,
    compiles: AtomicU64,
    evictions: AtomicU64,
}

impl std::fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateCache")
            .field("options", &self.options)
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(TemplateCacheOptions::default())
    }
}

impl TemplateCache {
    #[must_use]
    pub fn new(options: TemplateCacheOptions) -> Self {
        Self {
            options,
            entries: RwLock::new(HashMap::new()),
            compile_lock: Mutex::new(()),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            compiles: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// The shared instance used by commands that were not given their own cache.
    pub fn global() -> Arc<TemplateCache> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TemplateCache::default())))
    }

    /// Configure the shared instance. Must run before the first command resolves a template.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::Config` if the shared instance already exists.
    pub fn install_global(options: TemplateCacheOptions) -> Result<Arc<TemplateCache>, SqlBridgeError> {
        let cache = Arc::new(TemplateCache::new(options));
        GLOBAL
            .set(Arc::clone(&cache))
            .map_err(|_| SqlBridgeError::Config("template cache already initialised".into()))?;
        Ok(cache)
    }

    #[must_use]
    pub fn options(&self) -> &TemplateCacheOptions {
        &self.options
    }

    /// Return the template for `sql` against `params`, compiling it on first use.
    ///
    /// # Errors
    /// Returns `SqlBridgeError::MissingParameter` if a named placeholder has no
    /// matching parameter. Failed compiles are not cached.
    pub fn resolve(
        &self,
        sql: &str,
        named_detection: bool,
        params: &ParameterCollection,
    ) -> Result<Arc<StatementTemplate>, SqlBridgeError> {
        let mode = detect_mode(sql, named_detection);
        let key = TemplateKey::new(sql, mode, params);

        if let Some(template) = self.lookup(&key) {
            trace!(sql = key.sql(), "template cache hit");
            return Ok(template);
        }

        let _compiling = match self.compile_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another thread may have published it while we waited.
        if let Some(template) = self.lookup(&key) {
            return Ok(template);
        }

        let template = Arc::new(compile(sql, mode, |name| placeholder_index(params, name))?);
        self.compiles.fetch_add(1, Ordering::Relaxed);
        debug!(
            sql = key.sql(),
            rewritten = template.rewritten_sql(),
            slots = template.slot_count(),
            "compiled statement template"
        );

        let mut entries = self.write_entries();
        if let Some(max) = self.options.max_entries {
            while !entries.is_empty() && entries.len() >= max {
                if !evict_oldest(&mut entries) {
                    break;
                }
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                template: Arc::clone(&template),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        Ok(template)
    }

    /// Forget the template `resolve` would return for these arguments.
    /// Used when the driver rejects the rewritten SQL.
    pub fn invalidate(&self, sql: &str, named_detection: bool, params: &ParameterCollection) -> bool {
        let key = TemplateKey::new(sql, detect_mode(sql, named_detection), params);
        self.write_entries().remove(&key).is_some()
    }

    /// Drop every cached template. Templates already held by commands stay valid.
    pub fn clear(&self) {
        let mut entries = self.write_entries();
        let dropped = entries.len();
        entries.clear();
        debug!(dropped, "template cache cleared");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            compiles: self.compiles.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lookup(&self, key: &TemplateKey) -> Option<Arc<StatementTemplate>> {
        let entries = self.read_entries();
        let entry = entries.get(key)?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(Arc::clone(&entry.template))
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<TemplateKey, CacheEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<TemplateKey, CacheEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Parameter names may be declared with or without the leading `@`.
fn placeholder_index(params: &ParameterCollection, name: &str) -> Option<usize> {
    params.iter().position(|param| {
        param
            .name()
            .map(|declared| declared.strip_prefix('@').unwrap_or(declared))
            == Some(name)
    })
}

fn evict_oldest(entries: &mut HashMap<TemplateKey, CacheEntry>) -> bool {
    let oldest = entries
        .iter()
        .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
        .map(|(key, _)| key.clone());
    match oldest {
        Some(key) => {
            debug!(sql = key.sql(), "evicting statement template");
            entries.remove(&key);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    fn params(names: &[&str]) -> ParameterCollection {
        let mut params = ParameterCollection::new();
        for (i, name) in names.iter().enumerate() {
            params.add_with_value(*name, i as i32);
        }
        params
    }

    #[test]
    fn second_resolve_is_a_hit() {
        let cache = TemplateCache::default();
        let p = params(&["x"]);
        let first = cache.resolve("SELECT @x", true, &p).unwrap();
        let second = cache.resolve("SELECT @x", true, &p).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!(stats.compiles, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn parameter_order_is_part_of_the_key() {
        let cache = TemplateCache::default();
        let sql = "SELECT * FROM t WHERE a=@x AND b=@y";
        let xy = cache.resolve(sql, true, &params(&["x", "y"])).unwrap();
        let yx = cache.resolve(sql, true, &params(&["y", "x"])).unwrap();
        assert_eq!(xy.slot_to_param_index(), &[0, 1]);
        assert_eq!(yx.slot_to_param_index(), &[1, 0]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn at_prefixed_parameter_names_match() {
        let cache = TemplateCache::default();
        let template = cache
            .resolve("SELECT @id", true, &params(&["@id"]))
            .unwrap();
        assert_eq!(template.slot_to_param_index(), &[0]);
    }

    #[test]
    fn failed_compile_is_not_cached() {
        let cache = TemplateCache::default();
        let err = cache
            .resolve("SELECT @missing", true, &ParameterCollection::new())
            .unwrap_err();
        assert!(matches!(err, SqlBridgeError::MissingParameter(_)));
        assert!(cache.is_empty());
        assert_eq!(cache.stats().compiles, 0);
    }

    #[test]
    fn bounded_cache_evicts_least_recently_used() {
        let cache = TemplateCache::new(TemplateCacheOptions {
            max_entries: Some(2),
        });
        let empty = ParameterCollection::new();
        cache.resolve("SELECT 1", true, &empty).unwrap();
        cache.resolve("SELECT 2", true, &empty).unwrap();
        // Touch the first so the second becomes the oldest.
        cache.resolve("SELECT 1", true, &empty).unwrap();
        cache.resolve("SELECT 3", true, &empty).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 1);
        cache.resolve("SELECT 1", true, &empty).unwrap();
        assert_eq!(cache.stats().compiles, 3);
        cache.resolve("SELECT 2", true, &empty).unwrap();
        assert_eq!(cache.stats().compiles, 4);
    }

    #[test]
    fn concurrent_first_use_compiles_once() {
        let cache = Arc::new(TemplateCache::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let p = params(&["a", "b"]);
                    cache
                        .resolve("SELECT @a, @b FROM t", true, &p)
                        .map(|t| t.rewritten_sql().to_string())
                })
            })
            .collect();

        for handle in handles {
            let rewritten = handle.join().unwrap().unwrap();
            assert_eq!(rewritten, "SELECT ?, ? FROM t");
        }
        let stats = cache.stats();
        assert_eq!(stats.compiles, 1);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn clear_keeps_outstanding_templates_valid() {
        let cache = TemplateCache::default();
        let template = cache
            .resolve("SELECT ?", true, &ParameterCollection::new())
            .unwrap();
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(template.slot_count(), 1);
    }
}
