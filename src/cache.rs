//! Key-value cache boundary.
//!
//! The translation response cache and the deferred-translation task records
//! both go through [`KvCache`]. [`MemoryCache`] is the in-process
//! implementation: absolute TTL, no sliding refresh. Expired entries are
//! evicted on read and swept in expiry order on every write.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

#[async_trait]
pub trait KvCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    /// `ttl = None` uses the cache's default TTL.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);
    async fn delete(&self, key: &str) -> bool;
    /// Live keys starting with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Vec<String>;

    /// Delete every live key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> usize {
        let mut n = 0;
        for key in self.keys(prefix).await {
            if self.delete(&key).await {
                n += 1;
            }
        }
        n
    }
}

/// Typed read helper; undecodable entries are treated as misses.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn KvCache, key: &str) -> Option<T> {
    let raw = cache.get(key).await?;
    match serde_json::from_value(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(target: "cache", key, error = %e, "dropping undecodable cache entry");
            None
        }
    }
}

pub async fn set_json<T: Serialize>(
    cache: &dyn KvCache,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> anyhow::Result<()> {
    let raw = serde_json::to_value(value)?;
    cache.set(key, raw, ttl).await;
    Ok(())
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    /// `(expires_at, key)` for every entry in `map`.
    by_expiry: BTreeSet<(Instant, String)>,
}

impl Entries {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let e = self.map.remove(key)?;
        self.by_expiry.remove(&(e.expires_at, key.to_string()));
        Some(e)
    }

    fn sweep(&mut self, now: Instant) {
        while let Some((at, _)) = self.by_expiry.first() {
            if *at > now {
                break;
            }
            if let Some((_, key)) = self.by_expiry.pop_first() {
                self.map.remove(&key);
            }
        }
    }
}

#[derive(Debug)]
pub struct MemoryCache {
    inner: Mutex<Entries>,
    default_ttl: Duration,
}

impl MemoryCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Entries::default()),
            default_ttl,
        }
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let g = self.inner.lock().expect("cache mutex poisoned");
        g.map.values().filter(|e| e.expires_at > now).count()
    }

    /// Entries held, expired or not.
    pub fn stored(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut g = self.inner.lock().expect("cache mutex poisoned");
        g.map.clear();
        g.by_expiry.clear();
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

#[async_trait]
impl KvCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Value> {
        let mut g = self.inner.lock().expect("cache mutex poisoned");
        match g.map.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                g.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = Instant::now();
        let expires_at = now + ttl.unwrap_or(self.default_ttl);
        let mut g = self.inner.lock().expect("cache mutex poisoned");
        g.remove(key);
        g.sweep(now);
        g.by_expiry.insert((expires_at, key.to_string()));
        g.map.insert(key.to_string(), Entry { value, expires_at });
    }

    async fn delete(&self, key: &str) -> bool {
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .remove(key)
            .is_some()
    }

    async fn keys(&self, prefix: &str) -> Vec<String> {
        let now = Instant::now();
        let g = self.inner.lock().expect("cache mutex poisoned");
        let mut keys: Vec<String> = g
            .map
            .iter()
            .filter(|(k, e)| e.expires_at > now && k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort_unstable();
        keys
    }
}
