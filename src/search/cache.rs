//! Run-scoped search cache
//!
//! One instance per run, shared by handle across every agent and both rounds.
//! Keyed by the exact query string. Concurrent lookups of the same query wait
//! on one in-flight backend call instead of issuing their own.

use super::{SearchBackend, SearchHit};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

// ============================================================================
// Cache Statistics
// ============================================================================

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Total lookups
    pub lookups: u64,
    /// Lookups that reached the backend
    pub backend_calls: u64,
    /// Backend calls that failed (cached as empty)
    pub failures: u64,
    /// Distinct queries seen
    pub entries: usize,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.lookups.saturating_sub(self.backend_calls)
    }

    /// Calculate hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / self.lookups as f64
        }
    }
}

// ============================================================================
// Search Cache
// ============================================================================

pub struct SearchCache {
    backend: Option<Arc<dyn SearchBackend>>,
    results_per_query: usize,
    entries: Mutex<HashMap<String, Arc<OnceCell<Vec<SearchHit>>>>>,
    lookups: AtomicU64,
    backend_calls: AtomicU64,
    failures: AtomicU64,
}

impl SearchCache {
    pub fn new(backend: Option<Arc<dyn SearchBackend>>, results_per_query: usize) -> Self {
        Self {
            backend,
            results_per_query,
            entries: Mutex::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            backend_calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// A cache with no backend: every lookup is empty.
    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    pub fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// Returns cached results for `query`, fetching them on first use.
    ///
    /// Backend failures degrade to an empty result, which is cached too.
    pub async fn get_or_fetch(&self, query: &str) -> Vec<SearchHit> {
        let Some(backend) = &self.backend else {
            return Vec::new();
        };
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut entries = self.entries.lock();
            entries.entry(query.to_string()).or_default().clone()
        };

        let hits = cell
            .get_or_init(|| async {
                self.backend_calls.fetch_add(1, Ordering::Relaxed);
                match backend.query(query, self.results_per_query).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        self.failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(query, error = %e, "Search failed, continuing without results");
                        Vec::new()
                    }
                }
            })
            .await;

        hits.clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::MockSearchBackend;
    use crate::types::AppError;

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            title: "t".to_string(),
            url: url.to_string(),
            snippet: String::new(),
        }
    }

    #[tokio::test]
    async fn test_identical_query_hits_backend_once() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_query()
            .times(1)
            .returning(|q, n| {
                assert_eq!(q, "eu battery market");
                assert_eq!(n, 5);
                Ok(vec![hit("https://a.example")])
            });

        let cache = SearchCache::new(Some(Arc::new(backend)), 5);
        let first = cache.get_or_fetch("eu battery market").await;
        let second = cache.get_or_fetch("eu battery market").await;

        assert_eq!(first, second);
        let stats = cache.stats();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.backend_calls, 1);
        assert_eq!(stats.hits(), 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_concurrent_identical_queries_share_one_call() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_query()
            .times(1)
            .returning(|_, _| Ok(vec![hit("https://a.example")]));

        let cache = Arc::new(SearchCache::new(Some(Arc::new(backend)), 5));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_fetch("same").await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().len(), 1);
        }
        assert_eq!(cache.stats().backend_calls, 1);
    }

    #[tokio::test]
    async fn test_failure_is_cached_as_empty() {
        let mut backend = MockSearchBackend::new();
        backend
            .expect_query()
            .times(1)
            .returning(|_, _| Err(AppError::Search("offline".to_string())));

        let cache = SearchCache::new(Some(Arc::new(backend)), 5);
        assert!(cache.get_or_fetch("q").await.is_empty());
        assert!(cache.get_or_fetch("q").await.is_empty());
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_is_empty() {
        let cache = SearchCache::disabled();
        assert!(!cache.has_backend());
        assert!(cache.get_or_fetch("anything").await.is_empty());
        assert_eq!(cache.stats(), CacheStats::default());
    }
}
