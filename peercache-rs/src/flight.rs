//! Collapses concurrent calls for the same key into a single execution.
//!
//! If many tasks miss the same key at once, only the first one (the **leader**) actually performs
//! the expensive work. All other tasks join the call which is already in flight and receive a
//! clone of its result once it is available.
//!
//! Note that results are never memoized: as soon as a call has completed, it is removed, so that
//! the next invocation for the same key runs afresh.
//!
//! If the leader is dropped before its work completes (e.g. as the surrounding task is aborted),
//! the call is removed as well and one of the joined tasks takes over and executes its own task.
//!
//! # Examples
//! ```
//! # use peercache::flight::Deduplicator;
//! # #[tokio::main]
//! # async fn main() {
//! let flight = Deduplicator::new();
//!
//! let result = flight.work("key", || async { 42 }).await;
//! assert_eq!(result, 42);
//! # }
//! ```
use std::collections::HashMap;
use std::future::Future;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Runs at most one task per key at any given time.
pub struct Deduplicator<T> {
    calls: Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T: Clone> Default for Deduplicator<T> {
    fn default() -> Self {
        Deduplicator::new()
    }
}

impl<T: Clone> Deduplicator<T> {
    /// Creates a new deduplicator without any call in flight.
    pub fn new() -> Self {
        Deduplicator {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Executes the given task unless a call for the same key is already in flight.
    ///
    /// If another call is in flight, this waits for its completion and returns a clone of its
    /// result. Otherwise the task is executed by the calling task itself. The same happens if
    /// the call being waited for is dropped before producing a result.
    pub async fn work<F, Fut>(&self, key: &str, task: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let sender = loop {
            let leader = {
                let mut calls = self.calls.lock();
                if let Some(receiver) = calls.get(key) {
                    Err(receiver.clone())
                } else {
                    let (sender, receiver) = watch::channel(None);
                    let _ = calls.insert(key.to_owned(), receiver);
                    Ok(sender)
                }
            };

            match leader {
                Ok(sender) => break sender,
                Err(receiver) => {
                    if let Some(result) = Deduplicator::join(receiver).await {
                        return result;
                    }
                    log::debug!("The call for {} was dropped. Taking over...", key);
                }
            }
        };

        let registration = Registration {
            calls: &self.calls,
            key,
        };

        let result = task().await;
        let _ = sender.send_replace(Some(result.clone()));
        drop(registration);

        result
    }

    async fn join(mut receiver: watch::Receiver<Option<T>>) -> Option<T> {
        let outcome = receiver.wait_for(Option::is_some).await;
        match outcome {
            Ok(value) => value.clone(),
            Err(_) => None,
        }
    }

    /// Returns the number of calls currently in flight.
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Determines if there is no call in flight.
    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }
}

/// Removes the call of the leader once it completes or is dropped.
struct Registration<'a, T> {
    calls: &'a Mutex<HashMap<String, watch::Receiver<Option<T>>>>,
    key: &'a str,
}

impl<T> Drop for Registration<'_, T> {
    fn drop(&mut self) {
        let _ = self.calls.lock().remove(self.key);
    }
}
