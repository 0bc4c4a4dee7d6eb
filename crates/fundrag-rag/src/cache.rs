use fundrag_core::AnswerResult;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Lowercased, whitespace-collapsed form used for cache fingerprints.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Bounded answer cache with at most one computation in flight per key.
///
/// Finished answers live in an LRU; computations still running are kept
/// apart so capacity pressure never evicts them. Concurrent identical
/// requests share one cell and await its result. A computation that reports
/// itself uncacheable leaves nothing behind, and the next request computes
/// afresh.
pub struct AnswerCache {
    slots: Mutex<Slots>,
}

struct Slots {
    completed: LruCache<String, AnswerResult>,
    in_flight: HashMap<String, Arc<OnceCell<AnswerResult>>>,
}

impl AnswerCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: Mutex::new(Slots {
                completed: LruCache::new(capacity),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// `sha256(normalized_query \0 corpus_version)` as hex.
    pub fn fingerprint(normalized_query: &str, corpus_version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(normalized_query.as_bytes());
        hasher.update([0u8]);
        hasher.update(corpus_version.as_bytes());
        format!("answer_{:x}", hasher.finalize())
    }

    /// Number of cached answers.
    pub fn len(&self) -> usize {
        self.slots.lock().completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.slots.lock().in_flight.len()
    }

    pub fn clear(&self) {
        self.slots.lock().completed.clear();
    }

    /// Return the cached answer for `key` or run `compute` once for it.
    ///
    /// `compute` yields the answer and whether it may be cached. The bool in
    /// the return value is true when the answer was not computed by this call.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> (AnswerResult, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = (AnswerResult, bool)>,
    {
        let cell = {
            let mut slots = self.slots.lock();
            if let Some(answer) = slots.completed.get(key) {
                debug!("Answer cache hit for {}", key);
                return (answer.clone(), true);
            }
            slots
                .in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let mut computed_here = false;
        let flag = &mut computed_here;
        let outcome = cell
            .get_or_try_init(|| async move {
                *flag = true;
                let (answer, cacheable) = compute().await;
                if cacheable {
                    Ok(answer)
                } else {
                    Err(answer)
                }
            })
            .await
            .map(AnswerResult::clone);

        let mut slots = self.slots.lock();
        let ours = slots
            .in_flight
            .get(key)
            .map_or(false, |current| Arc::ptr_eq(current, &cell));
        match outcome {
            Ok(answer) => {
                if computed_here {
                    slots.completed.put(key.to_string(), answer.clone());
                }
                if ours {
                    slots.in_flight.remove(key);
                }
                (answer, !computed_here)
            }
            Err(answer) => {
                // Waiters still holding the cell will retry on it; the last one out removes it.
                if ours && Arc::strong_count(&cell) == 2 {
                    slots.in_flight.remove(key);
                }
                debug!("Answer for {} not cached", key);
                (answer, false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fundrag_core::FallbackLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn answer(text: &str) -> AnswerResult {
        AnswerResult {
            query_id: Uuid::new_v4(),
            query: "q".to_string(),
            answer_text: text.to_string(),
            citations: Vec::new(),
            confidence: 0.9,
            has_sufficient_info: true,
            fallback_used: false,
            fallback_level: FallbackLevel::External,
            chunks_retrieved: 1,
            guardrail_blocked: false,
            latency_ms: 0,
            answered_at: Utc::now(),
        }
    }

    #[test]
    fn test_fingerprint() {
        let a = AnswerCache::fingerprint(&normalize_query("  What is  the NAV? "), "v1");
        let b = AnswerCache::fingerprint(&normalize_query("what is the nav?"), "v1");
        let c = AnswerCache::fingerprint(&normalize_query("what is the nav?"), "v2");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("answer_"));
    }

    #[tokio::test]
    async fn test_single_flight() {
        let cache = Arc::new(AnswerCache::new(8));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute("k", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            (answer("shared"), true)
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            let (result, _) = task.await.unwrap();
            assert_eq!(result.answer_text, "shared");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (_, hit) = cache.get_or_compute("k", || async { (answer("new"), true) }).await;
        assert!(hit);
    }

    #[tokio::test]
    async fn test_uncacheable_is_recomputed() {
        let cache = AnswerCache::new(8);
        let (first, hit) = cache
            .get_or_compute("k", || async { (answer("degraded"), false) })
            .await;
        assert_eq!(first.answer_text, "degraded");
        assert!(!hit);

        let (second, hit) = cache
            .get_or_compute("k", || async { (answer("recovered"), true) })
            .await;
        assert_eq!(second.answer_text, "recovered");
        assert!(!hit);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_uncacheable_leaves_no_entry() {
        let cache = AnswerCache::new(1);
        cache.get_or_compute("kept", || async { (answer("kept"), true) }).await;
        cache
            .get_or_compute("degraded", || async { (answer("degraded"), false) })
            .await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.in_flight(), 0);

        let (kept, hit) = cache.get_or_compute("kept", || async { (answer("new"), true) }).await;
        assert!(hit);
        assert_eq!(kept.answer_text, "kept");
    }

    #[tokio::test]
    async fn test_in_flight_survives_capacity_pressure() {
        let cache = Arc::new(AnswerCache::new(1));
        let calls = Arc::new(AtomicUsize::new(0));

        let slow = |cache: Arc<AnswerCache>, calls: Arc<AtomicUsize>| {
            tokio::spawn(async move {
                cache
                    .get_or_compute("slow", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        (answer("slow"), true)
                    })
                    .await
            })
        };

        let first = slow(cache.clone(), calls.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.in_flight(), 1);
        for key in ["a", "b", "c"] {
            cache.get_or_compute(key, || async { (answer(key), true) }).await;
        }
        let second = slow(cache.clone(), calls.clone());

        assert_eq!(first.await.unwrap().0.answer_text, "slow");
        let (shared, hit) = second.await.unwrap();
        assert_eq!(shared.answer_text, "slow");
        assert!(hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_capacity_bound() {
        let cache = AnswerCache::new(2);
        for key in ["a", "b", "c"] {
            cache.get_or_compute(key, || async { (answer(key), true) }).await;
        }
        assert_eq!(cache.len(), 2);
    }
}
