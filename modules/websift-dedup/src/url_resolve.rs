//! HEAD-based URL canonicalization for suspicious company pairs.
//!
//! Regional storefronts and tracking domains often redirect to one primary
//! site; when two ambiguous candidates resolve to the same final host they
//! are duplicates without consulting the LLM. The cache is shared across
//! jobs and bounded with FIFO eviction; failures are cached too so a dead
//! host is only probed once.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

const CACHE_CAP: usize = 2000;
const HEAD_TIMEOUT: Duration = Duration::from_secs(3);
const HEAD_ATTEMPTS: u32 = 2;

#[derive(Default)]
struct ResolveCache {
    /// url → final host; None records a resolution failure.
    map: HashMap<String, Option<String>>,
    order: VecDeque<String>,
}

/// Counters surfaced by the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResolverStats {
    pub cached: usize,
    pub hits: u64,
    pub misses: u64,
    pub failures: u64,
}

pub struct UrlResolver {
    client: reqwest::Client,
    cache: Mutex<ResolveCache>,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

impl UrlResolver {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HEAD_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            cache: Mutex::new(ResolveCache::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Final host after following redirects, or None if resolution failed.
    /// Both outcomes are cached.
    pub async fn resolve(&self, url: &str) -> Option<String> {
        if url.is_empty() {
            return None;
        }

        if let Some(cached) = self
            .cache
            .lock()
            .expect("resolve cache lock poisoned")
            .map
            .get(url)
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return cached.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut resolved: Option<String> = None;
        for attempt in 0..HEAD_ATTEMPTS {
            match self.client.head(url).send().await {
                Ok(resp) => {
                    resolved = resp.url().host_str().map(|h| h.to_lowercase());
                    break;
                }
                Err(e) => {
                    debug!(url, attempt, error = %e, "HEAD resolution failed");
                }
            }
        }
        if resolved.is_none() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        let mut cache = self.cache.lock().expect("resolve cache lock poisoned");
        if !cache.map.contains_key(url) {
            if cache.order.len() >= CACHE_CAP {
                if let Some(evicted) = cache.order.pop_front() {
                    cache.map.remove(&evicted);
                }
            }
            cache.order.push_back(url.to_string());
            cache.map.insert(url.to_string(), resolved.clone());
        }
        resolved
    }

    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            cached: self.cache.lock().expect("resolve cache lock poisoned").map.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for UrlResolver {
    fn default() -> Self {
        Self::new()
    }
}
