use crate::cache::{CacheConfig, CacheEntry, CacheStats, Fingerprint};
use crate::mirror::{CacheMirror, MirrorPayload};
use dashmap::DashMap;
use dossier_core::{DossierError, RawResult, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Outcome shared by every caller coalesced onto one upstream fetch.
pub type FetchOutcome = std::result::Result<Arc<Vec<RawResult>>, Arc<DossierError>>;

type InFlightCell = Arc<OnceCell<FetchOutcome>>;

/// Result cache: `(source, query-fingerprint)` -> raw results, with TTL,
/// a mandatory LRU cap, and at-most-one concurrent upstream fetch per
/// fingerprint. Process-wide singleton; internal synchronization is at
/// entry granularity, never global.
pub struct ResultCache {
    config: CacheConfig,
    entries: DashMap<Fingerprint, CacheEntry<Arc<Vec<RawResult>>>>,
    lru: Mutex<LruTracker>,
    in_flight: DashMap<Fingerprint, InFlightCell>,
    mirror: Option<Arc<dyn CacheMirror>>,
    mirror_healthy: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    coalesced: AtomicU64,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries.min(4096)),
            lru: Mutex::new(LruTracker::default()),
            in_flight: DashMap::new(),
            mirror: None,
            mirror_healthy: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
            config,
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn CacheMirror>) -> Self {
        self.mirror = Some(mirror);
        self.mirror_healthy = AtomicBool::new(true);
        self
    }

    /// Look up a fresh entry, or run `fetch` exactly once for this
    /// fingerprint while concurrent callers wait on the same outcome.
    /// Error outcomes are shared with coalesced callers but never stored,
    /// so the next non-coalesced caller retries upstream.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: Fingerprint,
        ttl: Option<Duration>,
        fetch: F,
    ) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawResult>>>,
    {
        let ttl = ttl.unwrap_or(self.config.default_ttl);

        if let Some(value) = self.lookup(&fingerprint) {
            return Ok(value);
        }

        let cell = self
            .in_flight
            .entry(fingerprint.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let mut ran_fetch = false;
        let outcome = cell
            .get_or_init(|| async {
                ran_fetch = true;
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.fill(&fingerprint, ttl, fetch).await
            })
            .await
            .clone();

        if ran_fetch {
            self.in_flight.remove(&fingerprint);
        } else {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }

        outcome
    }

    /// Fresh-entry lookup; expired entries are removed and counted.
    pub fn lookup(&self, fingerprint: &Fingerprint) -> Option<Arc<Vec<RawResult>>> {
        // the shard guard must drop before any removal on the same map
        let expired = match self.entries.get(fingerprint) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.lru.lock().touch(fingerprint.clone());
                return Some(Arc::clone(&entry.value));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(fingerprint);
            self.lru.lock().remove(fingerprint);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn fill<F, Fut>(&self, fingerprint: &Fingerprint, ttl: Duration, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawResult>>>,
    {
        if let Some((results, remaining)) = self.mirror_lookup(fingerprint, ttl).await {
            let value = Arc::new(results);
            self.insert(fingerprint.clone(), Arc::clone(&value), remaining);
            return Ok(value);
        }

        match fetch().await {
            Ok(results) => {
                let value = Arc::new(results);
                self.insert(fingerprint.clone(), Arc::clone(&value), ttl);
                self.mirror_store(fingerprint, &value, ttl).await;
                Ok(value)
            }
            Err(e) => Err(Arc::new(e)),
        }
    }

    fn insert(&self, fingerprint: Fingerprint, value: Arc<Vec<RawResult>>, ttl: Duration) {
        while self.entries.len() >= self.config.max_entries {
            let victim = self.lru.lock().pop_oldest();
            match victim {
                Some(old) => {
                    if self.entries.remove(&old).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => break,
            }
        }
        self.entries
            .insert(fingerprint.clone(), CacheEntry::new(value, ttl));
        self.lru.lock().touch(fingerprint);
    }

    async fn mirror_lookup(
        &self,
        fingerprint: &Fingerprint,
        ttl: Duration,
    ) -> Option<(Vec<RawResult>, Duration)> {
        let mirror = self.mirror.as_ref()?;
        if !self.mirror_healthy.load(Ordering::Relaxed) {
            return None;
        }
        match mirror.get(fingerprint.as_str()).await {
            Ok(Some(bytes)) => {
                let payload: MirrorPayload = serde_json::from_slice(&bytes).ok()?;
                let remaining = payload.remaining_ttl(ttl)?;
                let results: Vec<RawResult> = serde_json::from_value(payload.body).ok()?;
                debug!(%fingerprint, "mirror hit");
                Some((results, remaining))
            }
            Ok(None) => None,
            Err(e) => {
                self.degrade_mirror(&e);
                None
            }
        }
    }

    async fn mirror_store(&self, fingerprint: &Fingerprint, value: &[RawResult], ttl: Duration) {
        let Some(mirror) = self.mirror.as_ref() else {
            return;
        };
        if !self.mirror_healthy.load(Ordering::Relaxed) {
            return;
        }
        let body = match serde_json::to_value(value) {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "mirror payload serialization failed");
                return;
            }
        };
        let payload = MirrorPayload::now(body);
        let bytes = match serde_json::to_vec(&payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "mirror payload serialization failed");
                return;
            }
        };
        if let Err(e) = mirror.put(fingerprint.as_str(), bytes, ttl).await {
            self.degrade_mirror(&e);
        }
    }

    /// One warning, then memory-only for the rest of the process.
    fn degrade_mirror(&self, error: &DossierError) {
        if self.mirror_healthy.swap(false, Ordering::Relaxed) {
            warn!(error = %error, "cache mirror unavailable, degrading to memory-only");
        }
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) {
        self.entries.remove(fingerprint);
        self.lru.lock().remove(fingerprint);
    }

    pub fn clear(&self) {
        self.entries.clear();
        *self.lru.lock() = LruTracker::default();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// Recency bookkeeping for eviction. A monotonic sequence number per key;
/// the oldest key is the one with the smallest sequence.
#[derive(Default)]
struct LruTracker {
    seq: u64,
    order: HashMap<Fingerprint, u64>,
}

impl LruTracker {
    fn touch(&mut self, key: Fingerprint) {
        self.seq += 1;
        self.order.insert(key, self.seq);
    }

    fn remove(&mut self, key: &Fingerprint) {
        self.order.remove(key);
    }

    fn pop_oldest(&mut self) -> Option<Fingerprint> {
        let oldest = self
            .order
            .iter()
            .min_by_key(|(_, seq)| **seq)
            .map(|(k, _)| k.clone())?;
        self.order.remove(&oldest);
        Some(oldest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dossier_core::MediaType;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn fake_result(source: &str) -> RawResult {
        RawResult::new(
            Uuid::new_v4(),
            source,
            "https://example.com",
            "title",
            b"body".to_vec(),
            MediaType::PlainText,
        )
    }

    fn fp(query: &str) -> Fingerprint {
        Fingerprint::compute("test_source", query, &BTreeMap::new())
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = ResultCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let out = cache
                .get_or_fetch(fp("alice"), None, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![fake_result("test_source")])
                })
                .await;
            assert!(out.is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_coalescing_single_upstream_call() {
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let calls = Arc::new(AtomicU64::new(0));
        let (tx, rx) = tokio::sync::watch::channel(false);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let mut rx = rx.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(fp("bob"), None, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        // hold the fetch open until all callers have joined
                        let _ = rx.wait_for(|released| *released).await;
                        Ok(vec![fake_result("test_source")])
                    })
                    .await
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let mut payload_hashes = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            payload_hashes.push(outcome[0].content_hash.clone());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(payload_hashes.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn test_coalesced_error_shared_not_cached() {
        let cache = Arc::new(ResultCache::new(CacheConfig::default()));
        let calls = Arc::new(AtomicU64::new(0));

        let out = cache
            .get_or_fetch(fp("err"), None, {
                let calls = Arc::clone(&calls);
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(DossierError::UpstreamUnavailable("down".into()))
                }
            })
            .await;
        assert!(out.is_err());

        // error was not stored; next caller fetches again and succeeds
        let out = cache
            .get_or_fetch(fp("err"), None, {
                let calls = Arc::clone(&calls);
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![fake_result("test_source")])
                }
            })
            .await;
        assert!(out.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let cache = ResultCache::new(CacheConfig::default());
        let calls = Arc::new(AtomicU64::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let out = cache
                .get_or_fetch(fp("short"), Some(Duration::from_millis(20)), move || {
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(vec![fake_result("test_source")])
                    }
                })
                .await;
            assert!(out.is_ok());
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn test_lru_eviction_at_cap() {
        let cache = ResultCache::new(CacheConfig {
            max_entries: 3,
            ..Default::default()
        });

        for name in ["a", "b", "c", "d"] {
            let out = cache
                .get_or_fetch(fp(name), None, move || async move {
                    Ok(vec![fake_result("test_source")])
                })
                .await;
            assert!(out.is_ok());
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 1);
        // "a" was the least recently used
        assert!(cache.lookup(&fp("a")).is_none());
        assert!(cache.lookup(&fp("d")).is_some());
    }
}
