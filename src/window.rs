use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Shared per-user rolling window of recent transaction amounts, most recent
/// first, bounded at `capacity`.
///
/// Append is push-front plus trim under a single lock, so the window never
/// exceeds capacity and never drops an update mid-append. The read-mean /
/// append pair across a stream tick is deliberately not linearized between
/// concurrent writers for the same user (best-effort, matching the trimmed
/// list the cache collaborator exposes).
#[derive(Debug, Clone)]
pub struct WindowCache {
    capacity: usize,
    inner: Arc<Mutex<HashMap<Uuid, VecDeque<Decimal>>>>,
}

impl WindowCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Recent amounts for a user, most recent first. Empty if unseen.
    pub fn get(&self, user_id: Uuid) -> Vec<Decimal> {
        let map = self.inner.lock().unwrap();
        map.get(&user_id)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Push a committed amount to the front of the user's window and trim to
    /// capacity, as one atomic operation.
    pub fn append(&self, user_id: Uuid, amount: Decimal) {
        let mut map = self.inner.lock().unwrap();
        let window = map.entry(user_id).or_default();
        window.push_front(amount);
        window.truncate(self.capacity);
    }

    /// Arithmetic mean of the window plus its length. `(0, 0)` for an empty
    /// window, which callers must read as "no history", not a zero average.
    pub fn mean(&self, user_id: Uuid) -> (Decimal, usize) {
        let map = self.inner.lock().unwrap();
        match map.get(&user_id) {
            Some(w) if !w.is_empty() => {
                let sum: Decimal = w.iter().copied().sum();
                (sum / Decimal::from(w.len() as u64), w.len())
            }
            _ => (Decimal::ZERO, 0),
        }
    }
}
