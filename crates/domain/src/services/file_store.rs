//! Document storage capability.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::error::FetchError;

/// Retrieves stored document bytes by storage path.
#[async_trait::async_trait]
pub trait FileStore: Send + Sync {
    /// Short backend identifier used in logs and health output.
    fn backend(&self) -> &'static str;

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError>;
}

/// File store backed by a map, with hooks for simulating slow, failing or
/// hung storage.
///
/// Tracks how many fetches are in flight so callers can verify their
/// concurrency bounds.
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
    failures: RwLock<HashMap<String, FetchError>>,
    stalled: RwLock<HashSet<String>>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn insert(&self, path: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        write_lock(&self.files).insert(path.into(), bytes.into());
    }

    /// Makes fetches of `path` fail with `error`.
    pub fn fail(&self, path: impl Into<String>, error: FetchError) {
        write_lock(&self.failures).insert(path.into(), error);
    }

    /// Makes fetches of `path` never complete.
    pub fn stall(&self, path: impl Into<String>) {
        write_lock(&self.stalled).insert(path.into());
    }

    /// Highest number of concurrent fetches observed so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Total number of fetches started.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Decrements the in-flight counter even when the fetch future is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl FileStore for InMemoryFileStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let stalled = read_lock(&self.stalled).contains(path);
        if stalled {
            std::future::pending::<()>().await;
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let Some(error) = read_lock(&self.failures).get(path) {
            return Err(error.clone());
        }

        read_lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(path.to_string()))
    }
}
