// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Request collapsing.
//!
//! A [`Group`] deduplicates concurrent executions of the same keyed
//! operation: the first caller's operation runs, later callers for the same
//! key wait for it and receive a clone of its result. The entry is removed
//! as soon as the operation completes, so nothing is cached beyond the
//! lifetime of the in-flight call.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

struct Flight<T> {
    tx: broadcast::Sender<T>,
    shared: Arc<AtomicBool>,
}

/// A process-wide coordinator for in-flight operations, keyed by string.
pub(crate) struct Group<T> {
    flights: Arc<Mutex<HashMap<String, Flight<T>>>>,
}

impl<T: Clone + Send + 'static> Group<T> {
    pub(crate) fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `op` under `key`, collapsing concurrent calls.
    ///
    /// If no operation is in flight for `key`, `op` is spawned onto the
    /// runtime and runs to completion on its own, detached from this
    /// caller: dropping the returned future (client disconnect, handler
    /// deadline) never cancels the shared operation. Any deadline the
    /// operation should observe must be built into `op` itself.
    ///
    /// The boolean is true when the result was shared with at least one
    /// other caller. `None` is returned only when the operation was
    /// abandoned without producing a result (it panicked or was aborted).
    pub(crate) async fn run<F>(&self, key: &str, op: F) -> (Option<T>, bool)
    where
        F: Future<Output = T> + Send + 'static,
    {
        // Join or create the flight under the lock, without awaiting.
        let (mut rx, shared, joined) = {
            let mut flights = self.flights.lock();
            if let Some(flight) = flights.get(key) {
                flight.shared.store(true, Ordering::Relaxed);
                (flight.tx.subscribe(), Arc::clone(&flight.shared), true)
            } else {
                let (tx, rx) = broadcast::channel(1);
                let shared = Arc::new(AtomicBool::new(false));
                flights.insert(
                    key.to_string(),
                    Flight {
                        tx: tx.clone(),
                        shared: Arc::clone(&shared),
                    },
                );

                let handle = tokio::spawn(op);
                let flights = Arc::clone(&self.flights);
                let key = key.to_string();
                tokio::spawn(async move {
                    let result = handle.await;
                    // Remove the entry before publishing the result, under
                    // the same lock a joiner subscribes under: a caller
                    // either subscribes before the send and receives the
                    // value, or finds no entry and starts a fresh flight.
                    let mut flights = flights.lock();
                    flights.remove(&key);
                    if let Ok(value) = result {
                        let _ = tx.send(value);
                    }
                });

                (rx, shared, false)
            }
        };

        let result = match rx.recv().await {
            Ok(value) => Some(value),
            Err(_) => None,
        };
        (result, joined || shared.load(Ordering::Relaxed))
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn single_caller_is_not_shared() {
        let group: Group<u32> = Group::new();
        let (result, shared) = group.run("k", async { 7 }).await;
        assert_eq!(result, Some(7));
        assert!(!shared);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let group: Arc<Group<u32>> = Arc::new(Group::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = Arc::clone(&group);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                group
                    .run("k", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        42
                    })
                    .await
            }));
        }

        // Give every caller a chance to join the flight before letting the
        // leader's operation finish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_waiters();

        for handle in handles {
            let (result, shared) = handle.await.unwrap();
            assert_eq!(result, Some(42));
            assert!(shared);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_collapse() {
        let group: Arc<Group<u32>> = Arc::new(Group::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let calls = Arc::clone(&calls);
            group.run("a", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                1
            })
        };
        let b = {
            let calls = Arc::clone(&calls);
            group.run("b", async move {
                calls.fetch_add(1, Ordering::SeqCst);
                2
            })
        };
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.0, Some(1));
        assert_eq!(rb.0, Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_shared_and_not_cached() {
        let group: Arc<Group<Result<u32, String>>> = Arc::new(Group::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..3 {
            let group = Arc::clone(&group);
            let calls = Arc::clone(&calls);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                group
                    .run("k", async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        release.notified().await;
                        Err::<u32, _>("boom".to_string())
                    })
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_waiters();

        for handle in handles {
            let (result, _) = handle.await.unwrap();
            assert_eq!(result, Some(Err("boom".to_string())));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The failed flight is gone; a new call runs the operation again.
        let calls2 = Arc::clone(&calls);
        let (result, shared) = group
            .run("k", async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok(9)
            })
            .await;
        assert_eq!(result, Some(Ok(9)));
        assert!(!shared);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn caller_cancellation_does_not_cancel_the_operation() {
        let group: Arc<Group<u32>> = Arc::new(Group::new());
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let finished = Arc::new(AtomicUsize::new(0));

        let leader = {
            let group = Arc::clone(&group);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            let finished = Arc::clone(&finished);
            tokio::spawn(async move {
                group
                    .run("k", async move {
                        started.notify_one();
                        release.notified().await;
                        finished.fetch_add(1, Ordering::SeqCst);
                        11
                    })
                    .await
            })
        };
        started.notified().await;

        // Cancel the only caller mid-flight.
        leader.abort();
        let _ = leader.await;

        release.notify_waiters();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn panicking_operation_clears_the_flight() {
        let group: Arc<Group<u32>> = Arc::new(Group::new());
        let (result, _) = group.run("k", async { panic!("op failed") }).await;
        assert_eq!(result, None);
        assert_eq!(group.in_flight(), 0);
    }
}
