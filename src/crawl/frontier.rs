//! Priority frontier and visited set shared by the worker pool.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use dashmap::DashSet;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// A URL waiting in the frontier.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierItem {
    /// Higher is drained first.
    pub priority: f64,
    /// Normalized URL.
    pub url: String,
}

#[derive(Debug)]
struct Entry {
    priority: f64,
    seq: u64,
    url: String,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Max-heap on priority; among equals the lower sequence number wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct FrontierState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

/// Priority queue of discovered URLs.
///
/// Highest priority first, FIFO among equal priorities. Consumers block in
/// [`Frontier::pop_timeout`] until an item arrives or the timeout elapses.
#[derive(Debug, Default)]
pub struct Frontier {
    state: Mutex<FrontierState>,
    available: Notify,
}

impl Frontier {
    /// Creates an empty frontier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a URL.
    pub async fn push(&self, priority: f64, url: impl Into<String>) {
        {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Entry {
                priority,
                seq,
                url: url.into(),
            });
        }
        self.available.notify_one();
    }

    /// Removes the highest-priority item without waiting.
    pub async fn try_pop(&self) -> Option<FrontierItem> {
        self.state
            .lock()
            .await
            .heap
            .pop()
            .map(|entry| FrontierItem {
                priority: entry.priority,
                url: entry.url,
            })
    }

    /// Removes the highest-priority item, waiting up to `timeout` for one to
    /// be pushed. `None` means the frontier stayed empty for the whole wait.
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<FrontierItem> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop().await {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    /// Number of queued items.
    pub async fn len(&self) -> usize {
        self.state.lock().await.heap.len()
    }

    /// Whether nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.heap.is_empty()
    }

    /// Queued items in drain order, for crash-recovery snapshots.
    pub async fn snapshot(&self) -> Vec<(f64, String)> {
        let state = self.state.lock().await;
        let mut entries: Vec<&Entry> = state.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .map(|entry| (entry.priority, entry.url.clone()))
            .collect()
    }
}

/// URLs already dispatched in this run.
#[derive(Debug, Default)]
pub struct VisitedSet {
    urls: DashSet<String>,
}

impl VisitedSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically marks `url` visited. Returns `false` if it already was,
    /// in which case the caller must not dispatch it.
    pub fn insert(&self, url: &str) -> bool {
        self.urls.insert(url.to_string())
    }

    /// Whether `url` has been dispatched.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(url)
    }

    /// Number of visited URLs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether no URL has been visited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Every visited URL, sorted.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.urls.iter().map(|url| url.key().clone()).collect();
        urls.sort();
        urls
    }
}
