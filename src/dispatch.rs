//! Bounded fan-out of per-key lookups.

use std::future::Future;
use std::num::NonZeroUsize;
use std::thread;

use futures_util::stream::{self, StreamExt};
use tracing::info;

/// Completions between progress log lines.
pub const PROGRESS_INTERVAL: usize = 250;

const DEFAULT_POOL_CAP: usize = 32;
const DEFAULT_POOL_EXTRA: usize = 4;

/// Maximum number of lookups in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Concurrency(NonZeroUsize);

impl Concurrency {
    /// Uses `limit` when it is set and positive, otherwise the default pool size.
    pub fn new(limit: Option<usize>) -> Self {
        limit
            .and_then(NonZeroUsize::new)
            .map(Self)
            .unwrap_or_else(Self::default_pool)
    }

    /// `min(32, cpus + 4)`, sized for I/O-bound lookups.
    pub fn default_pool() -> Self {
        let cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let size = (cpus + DEFAULT_POOL_EXTRA).min(DEFAULT_POOL_CAP);
        Self(NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN))
    }

    /// The limit as a plain count.
    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Self::default_pool()
    }
}

/// Runs `fetch` for every key with at most `concurrency` calls in flight.
///
/// Results come back in completion order, paired with their key. Every key
/// produces exactly one result; failures must be folded into `T` by `fetch`.
pub async fn dispatch<K, T, F, Fut>(
    keys: impl IntoIterator<Item = K>,
    concurrency: Concurrency,
    label: &str,
    fetch: F,
) -> Vec<(K, T)>
where
    K: Clone,
    F: Fn(K) -> Fut,
    Fut: Future<Output = T>,
{
    let mut completions = stream::iter(keys)
        .map(|key| {
            let pending = fetch(key.clone());
            async move { (key, pending.await) }
        })
        .buffer_unordered(concurrency.get());

    let mut results = Vec::new();
    while let Some(result) = completions.next().await {
        results.push(result);
        if results.len() % PROGRESS_INTERVAL == 0 {
            info!("{label}: fetched {} records", results.len());
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn unset_or_zero_limit_uses_default_pool() {
        assert_eq!(Concurrency::new(None), Concurrency::default_pool());
        assert_eq!(Concurrency::new(Some(0)), Concurrency::default_pool());
        assert_eq!(Concurrency::new(Some(7)).get(), 7);
        let default = Concurrency::default_pool().get();
        assert!((1..=DEFAULT_POOL_CAP).contains(&default));
    }

    #[tokio::test]
    async fn every_key_yields_one_result_within_the_bound() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let keys: Vec<u32> = (0..600).collect();

        let results = dispatch(keys.clone(), Concurrency::new(Some(4)), "test", |key| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_micros(u64::from(key % 7))).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                key * 2
            }
        })
        .await;

        assert_eq!(results.len(), keys.len());
        assert!(results.iter().all(|(key, doubled)| *doubled == key * 2));
        let seen: BTreeSet<u32> = results.iter().map(|(key, _)| *key).collect();
        assert_eq!(seen.len(), keys.len());
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[tokio::test]
    async fn empty_input_returns_immediately() {
        let results: Vec<(u8, u8)> =
            dispatch(Vec::new(), Concurrency::default(), "empty", |key| async move { key }).await;
        assert!(results.is_empty());
    }
}
