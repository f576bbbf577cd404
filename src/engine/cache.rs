// src/engine/cache.rs
// Content-addressed inference cache with single-flight fetches

use crate::backend::{BackendError, InferenceResult};
use crate::grid::ParamIteration;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub type FetchOutcome = Result<InferenceResult, BackendError>;

type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Identity of one inference request. Two iterations with equal fields,
/// including `experiment_uuid` and `generation_index`, share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub ParamIteration);

impl CacheKey {
    pub fn experiment_uuid(&self) -> &str {
        &self.0.experiment_uuid
    }
}

impl From<ParamIteration> for CacheKey {
    fn from(params: ParamIteration) -> Self {
        CacheKey(params)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale_writes: u64,
    pub entries: usize,
}

enum Entry {
    Pending { id: u64, fetch: SharedFetch },
    Ready(FetchOutcome),
}

enum Lookup {
    Ready(FetchOutcome),
    Join { id: u64, fetch: SharedFetch },
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    active: Option<String>,
}

impl Inner {
    fn is_current(&self, experiment_uuid: &str) -> bool {
        self.active
            .as_deref()
            .map_or(true, |active| active == experiment_uuid)
    }
}

/// Results are kept until invalidated or cleared; there is no expiry.
/// Failures are cached like successes so a retry has to go through
/// [`InferenceCache::invalidate`].
#[derive(Default)]
pub struct InferenceCache {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_writes: AtomicU64,
}

impl InferenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the experiment whose results may still be written.
    pub fn set_active(&self, experiment_uuid: &str) {
        self.inner.lock().active = Some(experiment_uuid.to_string());
    }

    pub fn active(&self) -> Option<String> {
        self.inner.lock().active.clone()
    }

    pub fn is_active(&self, experiment_uuid: &str) -> bool {
        self.inner.lock().is_current(experiment_uuid)
    }

    /// Completed outcome for `key`, if any. In-flight fetches are not waited on.
    pub fn get(&self, key: &CacheKey) -> Option<FetchOutcome> {
        match self.inner.lock().entries.get(key) {
            Some(Entry::Ready(outcome)) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Return the cached outcome for `key`, join a fetch already in flight, or
    /// start `fetch`. At most one fetch runs per key at a time.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> FetchOutcome
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let (id, shared) = match self.lookup_or_start(&key, fetch) {
            Lookup::Ready(outcome) => return outcome,
            Lookup::Join { id, fetch } => (id, fetch),
        };

        let outcome = shared.await;
        self.complete(&key, id, &outcome);
        outcome
    }

    fn lookup_or_start<F, Fut>(&self, key: &CacheKey, fetch: F) -> Lookup
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FetchOutcome> + Send + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(Entry::Ready(outcome)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Ready(outcome.clone());
            }
            Some(Entry::Pending { id, fetch }) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Lookup::Join {
                    id: *id,
                    fetch: fetch.clone(),
                };
            }
            None => {}
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = fetch().boxed().shared();

        if inner.is_current(key.experiment_uuid()) {
            inner.entries.insert(
                key.clone(),
                Entry::Pending {
                    id,
                    fetch: shared.clone(),
                },
            );
        }
        Lookup::Join { id, fetch: shared }
    }

    // Every waiter calls this; only the first one for a live pending entry writes.
    fn complete(&self, key: &CacheKey, id: u64, outcome: &FetchOutcome) {
        let mut inner = self.inner.lock();

        if !inner.is_current(key.experiment_uuid()) {
            if matches!(inner.entries.get(key), Some(Entry::Pending { id: pending, .. }) if *pending == id)
            {
                inner.entries.remove(key);
            }
            self.stale_writes.fetch_add(1, Ordering::Relaxed);
            debug!(
                event = "CacheStaleWriteIgnored",
                experiment_uuid = %key.experiment_uuid(),
                generation_index = key.0.generation_index,
                "Dropping result for superseded experiment"
            );
            return;
        }

        if let Some(entry) = inner.entries.get_mut(key) {
            if matches!(entry, Entry::Pending { id: pending, .. } if *pending == id) {
                *entry = Entry::Ready(outcome.clone());
            }
        }
    }

    /// Drop one entry. A fetch in flight for it still completes for its
    /// waiters but is no longer stored.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Drop every entry whose experiment UUID starts with `prefix`.
    /// An empty prefix clears the whole cache.
    pub fn clear(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|key, _| !key.experiment_uuid().starts_with(prefix));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_writes: self.stale_writes.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{enumerate, GridForm};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    fn key(uuid: &str) -> CacheKey {
        let grid = GridForm {
            models: vec!["llama3".into()],
            prompts: vec!["Hi".into()],
            ..GridForm::default()
        }
        .validate()
        .unwrap();
        CacheKey(enumerate(&grid, uuid).remove(0))
    }

    fn ok(text: &str) -> FetchOutcome {
        Ok(InferenceResult {
            response: text.to_string(),
            created_at: String::new(),
            eval_count: 0,
            eval_duration: 0,
            prompt_eval_count: 0,
            prompt_eval_duration: 0,
            total_duration: 0,
        })
    }

    #[tokio::test]
    async fn test_second_lookup_is_a_hit() {
        let cache = InferenceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            let outcome = cache
                .get_or_fetch(key("a"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    ok("hello")
                })
                .await;
            assert_eq!(outcome.unwrap().response, "hello");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_call() {
        let cache = Arc::new(InferenceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                ok("shared")
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch(key("a"), fetch(calls.clone())),
            cache.get_or_fetch(key("a"), fetch(calls.clone())),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, b);
        assert_eq!(cache.get(&key("a")), Some(ok("shared")));
    }

    #[tokio::test]
    async fn test_errors_are_cached_until_invalidated() {
        let cache = InferenceCache::new();
        let failed = cache
            .get_or_fetch(key("a"), || async {
                Err(BackendError::Connection("refused".into()))
            })
            .await;
        assert!(failed.is_err());

        let again = cache.get_or_fetch(key("a"), || async { ok("late") }).await;
        assert!(again.is_err());

        assert!(cache.invalidate(&key("a")));
        let retried = cache.get_or_fetch(key("a"), || async { ok("late") }).await;
        assert_eq!(retried.unwrap().response, "late");
    }

    #[tokio::test]
    async fn test_distinct_experiments_do_not_share_entries() {
        let cache = InferenceCache::new();
        cache.get_or_fetch(key("exp-1"), || async { ok("one") }).await.unwrap();
        let second = cache.get_or_fetch(key("exp-2"), || async { ok("two") }).await;

        assert_eq!(second.unwrap().response, "two");
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.clear("exp-1"), 1);
        assert!(cache.get(&key("exp-1")).is_none());
        assert!(cache.get(&key("exp-2")).is_some());
    }

    #[tokio::test]
    async fn test_stale_write_dropped_after_new_experiment() {
        let cache = Arc::new(InferenceCache::new());
        cache.set_active("old");

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let in_flight = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_fetch(key("old"), move || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        ok("too late")
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        cache.set_active("new");
        release_tx.send(()).unwrap();

        // the caller still gets its answer, the cache does not keep it
        assert_eq!(in_flight.await.unwrap().unwrap().response, "too late");
        assert!(cache.get(&key("old")).is_none());
        assert_eq!(cache.stats().stale_writes, 1);
    }
}
