// =============================================================================
// Request cache — URL+body keyed, TTL'd, with in-flight deduplication
// =============================================================================
//
// Two callers racing for the same URL share one outbound request: the first
// caller takes the per-key lock and performs the fetch; any caller arriving
// while that lock is held waits on it, then re-checks the cache (which the
// first caller will have just populated) before fetching again itself.
// =============================================================================

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug)]
struct CacheEntry {
    body: Value,
    fetched_at: Instant,
}

#[derive(Debug)]
pub struct RequestCache {
    entries: SyncMutex<HashMap<String, CacheEntry>>,
    locks: SyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    ttl: Duration,
}

impl RequestCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: SyncMutex::new(HashMap::new()), locks: SyncMutex::new(HashMap::new()), ttl }
    }

    fn fresh(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock();
        entries.get(key).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.body.clone())
            } else {
                None
            }
        })
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Return the cached body for `key` if fresh; otherwise call `fetch`
    /// (exactly once across any number of concurrent callers for the same
    /// key) and cache the result.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        if let Some(body) = self.fresh(key) {
            return Ok(body);
        }

        let key_lock = self.lock_for(key);
        let _guard = key_lock.lock().await;

        // Re-check: another caller may have populated the cache while we
        // waited for the key lock.
        if let Some(body) = self.fresh(key) {
            return Ok(body);
        }

        let body = fetch().await?;
        self.entries.lock().insert(key.to_string(), CacheEntry { body: body.clone(), fetched_at: Instant::now() });
        Ok(body)
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn concurrent_callers_share_one_fetch() {
        let cache = Arc::new(RequestCache::new(Duration::from_secs(10)));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("k", || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(Value::String("body".to_string()))
                        }
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let cache = RequestCache::new(Duration::from_millis(10));
        cache.get_or_fetch("k", || async { Ok(Value::from(1)) }).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = cache.get_or_fetch("k", || async { Ok(Value::from(2)) }).await.unwrap();
        assert_eq!(second, Value::from(2));
    }
}
