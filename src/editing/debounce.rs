//! Keyed trailing-edge debounce for write-through of allowance edits.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runs only the last action scheduled for a key, once the key has been
/// quiet for `window`.
pub struct Debouncer<K> {
    window: Duration,
    latest: Arc<Mutex<HashMap<K, u64>>>,
    next_ticket: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            latest: Arc::new(Mutex::new(HashMap::new())),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Schedule `action` for `key`, superseding anything still waiting on it.
    pub fn schedule<F>(&self, key: K, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut latest) = self.latest.lock() {
            latest.insert(key.clone(), ticket);
        }

        let latest = self.latest.clone();
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let still_latest = match latest.lock() {
                Ok(mut map) if map.get(&key) == Some(&ticket) => {
                    map.remove(&key);
                    true
                }
                _ => false,
            };
            if still_latest {
                action.await;
            }
        });
    }

    /// Drop whatever is still waiting on `key`.
    pub fn cancel(&self, key: &K) {
        if let Ok(mut latest) = self.latest.lock() {
            latest.remove(key);
        }
    }

    /// Keys with an action still waiting.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.latest.lock().map(|m| m.len()).unwrap_or(0)
    }
}
