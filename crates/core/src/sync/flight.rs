//! Coalescing of concurrent identical fetches.
//!
//! The first caller for a key spawns the work; everyone else awaits the same
//! shared future. The work runs on its own task, so a caller that gives up
//! only stops waiting and the fetch still completes for the others.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::Error;

type InFlight<V> = Shared<BoxFuture<'static, Result<V, Error>>>;

/// Map of in-flight operations keyed by `K`.
pub struct SingleFlight<K, V> {
    inflight: Arc<Mutex<HashMap<K, InFlight<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self { inflight: Arc::new(Mutex::new(HashMap::new())) }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a run for the same key is already in
    /// flight, in which case join it. Every joined caller sees the same result.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let registry = Arc::clone(&self.inflight);
                    let task_key = key.clone();
                    let fut = work();
                    // The map lock is held until the entry is inserted, so the
                    // removal below can never run before it.
                    let handle = tokio::spawn(async move {
                        let result = fut.await;
                        registry.lock().unwrap_or_else(PoisonError::into_inner).remove(&task_key);
                        result
                    });
                    let shared = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(Error::UpstreamUnavailable(format!("fetch task failed: {e}"))),
                        }
                    }
                    .boxed()
                    .shared();
                    inflight.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_calls_share_one_run() {
        let flights: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let flights = Arc::clone(&flights);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flights
                    .run("page", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            flights
                .run(1, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_shared_with_waiters() {
        let flights: Arc<SingleFlight<u8, u8>> = Arc::new(SingleFlight::new());

        let a = {
            let flights = Arc::clone(&flights);
            tokio::spawn(async move {
                flights
                    .run(7, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(Error::UpstreamUnavailable("boom".into()))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = flights.run(7, || async { Ok(1) }).await;

        assert!(matches!(a.await.unwrap(), Err(Error::UpstreamUnavailable(_))));
        assert!(matches!(b, Err(Error::UpstreamUnavailable(_))));
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_cancel() {
        let flights: Arc<SingleFlight<u8, u8>> = Arc::new(SingleFlight::new());
        let done = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let flights = Arc::clone(&flights);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                flights
                    .run(3, move || async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                        Ok(3)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }
}
