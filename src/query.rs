//! Query staleness and in-flight fetch tracking.
//!
//! Mutations and push events never merge server data into the board by hand;
//! they mark the affected queries stale and let the next fetch overwrite the
//! cache. Whoever owns a fetch loop subscribes to [`QueryCache::subscribe`]
//! and refetches when a prefix covering its key is published.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use agentboard_common::ReactionTarget;
use tokio::sync::broadcast;
use tokio::task::AbortHandle;
use uuid::Uuid;

const INVALIDATION_CAPACITY: usize = 256;

/// Hierarchical cache key. A key covers every key it is a prefix of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Append one segment, e.g. a filter fingerprint under a task-list key.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn covers(&self, other: &QueryKey) -> bool {
        other.0.starts_with(&self.0)
    }

    pub fn tasks(project_id: Uuid, board_id: Uuid) -> Self {
        Self::new(["tasks".to_string(), project_id.to_string(), board_id.to_string()])
    }

    pub fn activity(project_id: Uuid) -> Self {
        Self::new(["activity".to_string(), project_id.to_string()])
    }

    pub fn subtasks(project_id: Uuid, board_id: Uuid, parent_id: Uuid) -> Self {
        Self::new([
            "subtasks".to_string(),
            project_id.to_string(),
            board_id.to_string(),
            parent_id.to_string(),
        ])
    }

    pub fn checklists(project_id: Uuid, board_id: Uuid, task_id: Uuid) -> Self {
        Self::new([
            "checklists".to_string(),
            project_id.to_string(),
            board_id.to_string(),
            task_id.to_string(),
        ])
    }

    pub fn custom_fields(project_id: Uuid, board_id: Uuid) -> Self {
        Self::new(["custom_fields".to_string(), project_id.to_string(), board_id.to_string()])
    }

    pub fn comments(project_id: Uuid, board_id: Uuid, task_id: Uuid) -> Self {
        Self::new([
            "comments".to_string(),
            project_id.to_string(),
            board_id.to_string(),
            task_id.to_string(),
        ])
    }

    pub fn reactions(target: &ReactionTarget) -> Self {
        Self::new([
            "reactions".to_string(),
            target.entity_type().to_string(),
            target.entity_id().to_string(),
        ])
    }

    pub fn notifications() -> Self {
        Self::new(["notifications"])
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

/// Identifies one registered fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchTicket(u64);

#[derive(Default)]
struct CacheState {
    stale: HashMap<QueryKey, bool>,
    in_flight: HashMap<FetchTicket, (QueryKey, AbortHandle)>,
    next_ticket: u64,
}

/// Shared staleness map plus in-flight fetch registry.
#[derive(Clone)]
pub struct QueryCache {
    state: Arc<Mutex<CacheState>>,
    invalidations: broadcast::Sender<QueryKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        let (invalidations, _) = broadcast::channel(INVALIDATION_CAPACITY);
        Self {
            state: Arc::default(),
            invalidations,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark every known key under `prefix` stale and announce the prefix.
    /// Returns how many known keys were affected.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let marked = {
            let mut state = self.lock();
            let mut marked = 0;
            for (key, stale) in state.stale.iter_mut() {
                if prefix.covers(key) {
                    *stale = true;
                    marked += 1;
                }
            }
            marked
        };
        tracing::debug!(key = %prefix, marked, "Invalidated queries");
        // No subscribers just means nobody is fetching right now.
        let _ = self.invalidations.send(prefix.clone());
        marked
    }

    /// Unknown keys count as stale: they have never been fetched.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.lock().stale.get(key).copied().unwrap_or(true)
    }

    pub fn mark_fresh(&self, key: &QueryKey) {
        self.lock().stale.insert(key.clone(), false);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.invalidations.subscribe()
    }

    /// Register a running fetch for `key` so `cancel` can reach it.
    pub fn begin_fetch(&self, key: QueryKey, handle: AbortHandle) -> FetchTicket {
        let mut state = self.lock();
        let ticket = FetchTicket(state.next_ticket);
        state.next_ticket += 1;
        state.in_flight.insert(ticket, (key, handle));
        ticket
    }

    pub fn finish_fetch(&self, ticket: FetchTicket) {
        self.lock().in_flight.remove(&ticket);
    }

    /// Abort every in-flight fetch under `prefix`. Advisory: a fetch that
    /// already delivered its result is unaffected.
    pub fn cancel(&self, prefix: &QueryKey) -> usize {
        let cancelled: Vec<(QueryKey, AbortHandle)> = {
            let mut state = self.lock();
            let tickets: Vec<FetchTicket> = state
                .in_flight
                .iter()
                .filter(|(_, (key, _))| prefix.covers(key))
                .map(|(t, _)| *t)
                .collect();
            tickets
                .into_iter()
                .filter_map(|t| state.in_flight.remove(&t))
                .collect()
        };
        for (key, handle) in &cancelled {
            tracing::debug!(key = %key, "Cancelling in-flight fetch");
            handle.abort();
        }
        cancelled.len()
    }

    pub fn in_flight(&self, prefix: &QueryKey) -> usize {
        self.lock()
            .in_flight
            .values()
            .filter(|(key, _)| prefix.covers(key))
            .count()
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn p() -> Uuid {
        Uuid::from_u128(1)
    }

    fn b() -> Uuid {
        Uuid::from_u128(2)
    }

    #[test]
    fn test_prefix_covers_children() {
        let tasks = QueryKey::tasks(p(), b());
        let filtered = tasks.child("search=foo");
        assert!(tasks.covers(&filtered));
        assert!(tasks.covers(&tasks));
        assert!(!filtered.covers(&tasks));
        assert!(!QueryKey::activity(p()).covers(&tasks));
        assert!(QueryKey::new(["tasks"]).covers(&filtered));
    }

    #[test]
    fn test_unknown_key_is_stale_until_marked_fresh() {
        let cache = QueryCache::new();
        let key = QueryKey::tasks(p(), b());
        assert!(cache.is_stale(&key));
        cache.mark_fresh(&key);
        assert!(!cache.is_stale(&key));
    }

    #[test]
    fn test_invalidate_marks_only_covered_keys() {
        let cache = QueryCache::new();
        let tasks = QueryKey::tasks(p(), b());
        let filtered = tasks.child("priority=high");
        let activity = QueryKey::activity(p());
        for k in [&tasks, &filtered, &activity] {
            cache.mark_fresh(k);
        }
        assert_eq!(cache.invalidate(&tasks), 2);
        assert!(cache.is_stale(&tasks));
        assert!(cache.is_stale(&filtered));
        assert!(!cache.is_stale(&activity));
    }

    #[tokio::test]
    async fn test_invalidate_publishes_prefix() {
        let cache = QueryCache::new();
        let mut rx = cache.subscribe();
        cache.invalidate(&QueryKey::notifications());
        assert_eq!(rx.recv().await.unwrap(), QueryKey::notifications());
    }

    #[test]
    fn test_invalidate_without_subscribers_is_fine() {
        let cache = QueryCache::new();
        assert_eq!(cache.invalidate(&QueryKey::notifications()), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_matching_fetches() {
        let cache = QueryCache::new();
        let slow = tokio::spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });
        let other = tokio::spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });
        cache.begin_fetch(QueryKey::tasks(p(), b()).child("all"), slow.abort_handle());
        let kept = cache.begin_fetch(QueryKey::activity(p()), other.abort_handle());

        assert_eq!(cache.cancel(&QueryKey::tasks(p(), b())), 1);
        assert!(slow.await.unwrap_err().is_cancelled());
        assert_eq!(cache.in_flight(&QueryKey::new(Vec::<String>::new())), 1);

        cache.finish_fetch(kept);
        assert_eq!(cache.in_flight(&QueryKey::activity(p())), 0);
        other.abort();
    }

    #[tokio::test]
    async fn test_cancel_after_finish_is_noop() {
        let cache = QueryCache::new();
        let done = tokio::spawn(async {});
        let ticket = cache.begin_fetch(QueryKey::tasks(p(), b()), done.abort_handle());
        done.await.unwrap();
        cache.finish_fetch(ticket);
        assert_eq!(cache.cancel(&QueryKey::tasks(p(), b())), 0);
    }

    #[test]
    fn test_reaction_keys_distinguish_targets() {
        let task = ReactionTarget::Task(Uuid::from_u128(5));
        let comment = ReactionTarget::Comment {
            task_id: Uuid::from_u128(5),
            comment_id: Uuid::from_u128(6),
        };
        assert_ne!(QueryKey::reactions(&task), QueryKey::reactions(&comment));
        assert_eq!(QueryKey::reactions(&task).segments()[1], "task");
    }

    #[test]
    fn test_display_joins_segments() {
        assert_eq!(QueryKey::new(["a", "b"]).to_string(), "a/b");
    }
}
