use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use agentboard_common::{ReactionSummary, ReactionTarget};
use uuid::Uuid;

/// Summaries are keyed by the reacted-to entity alone. Pushed updates name
/// a comment without its task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntityKey {
    Task(Uuid),
    Comment(Uuid),
}

impl From<&ReactionTarget> for EntityKey {
    fn from(target: &ReactionTarget) -> Self {
        match target {
            ReactionTarget::Task(id) => Self::Task(*id),
            ReactionTarget::Comment { comment_id, .. } => Self::Comment(*comment_id),
        }
    }
}

#[derive(Debug, Clone)]
struct Held {
    /// Absent for comment summaries that only ever arrived by push.
    target: Option<ReactionTarget>,
    summary: ReactionSummary,
}

/// Locally held reaction summaries, one per task or comment.
///
/// Toggles are applied here before the request resolves; the previous value
/// returned by [`ReactionStore::apply_toggle`] is what a failed request
/// restores.
#[derive(Debug, Clone, Default)]
pub struct ReactionStore {
    summaries: Arc<Mutex<HashMap<EntityKey, Held>>>,
}

impl ReactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EntityKey, Held>> {
        self.summaries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, target: &ReactionTarget) -> Option<ReactionSummary> {
        self.lock()
            .get(&EntityKey::from(target))
            .map(|held| held.summary.clone())
    }

    pub fn set(&self, target: ReactionTarget, summary: ReactionSummary) {
        self.lock().insert(
            EntityKey::from(&target),
            Held {
                target: Some(target),
                summary,
            },
        );
    }

    /// Store a summary pushed by the server for `entity_type` (`task` or
    /// `comment`). Returns false for entity types that carry no reactions.
    pub fn set_pushed(&self, entity_type: &str, entity_id: Uuid, summary: ReactionSummary) -> bool {
        let key = match entity_type {
            "task" => EntityKey::Task(entity_id),
            "comment" => EntityKey::Comment(entity_id),
            _ => return false,
        };
        let mut summaries = self.lock();
        let target = match key {
            EntityKey::Task(id) => Some(ReactionTarget::Task(id)),
            EntityKey::Comment(_) => summaries.get(&key).and_then(|held| held.target),
        };
        summaries.insert(key, Held { target, summary });
        true
    }

    /// Flip the caller's `emoji` on `target` if its summary is held. Returns
    /// the value held before the flip, or `None` when nothing was loaded and
    /// nothing changed.
    pub fn apply_toggle(&self, target: ReactionTarget, emoji: &str) -> Option<ReactionSummary> {
        let mut summaries = self.lock();
        let held = summaries.get_mut(&EntityKey::from(&target))?;
        let previous = held.summary.clone();
        held.summary = previous.toggled(emoji);
        held.target.get_or_insert(target);
        Some(previous)
    }

    /// Put back the value `apply_toggle` returned.
    pub fn restore(&self, target: ReactionTarget, previous: ReactionSummary) {
        self.set(target, previous);
    }

    /// Targets whose summary is held and can be fetched again.
    pub fn held_targets(&self) -> Vec<ReactionTarget> {
        self.lock().values().filter_map(|held| held.target).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use agentboard_common::ReactionGroup;

    use super::*;

    fn target() -> ReactionTarget {
        ReactionTarget::Task(Uuid::from_u128(7))
    }

    #[test]
    fn test_toggle_on_unloaded_target_changes_nothing() {
        let store = ReactionStore::new();
        assert!(store.apply_toggle(target(), "👍").is_none());
        assert!(store.get(&target()).is_none());
        assert!(store.held_targets().is_empty());
    }

    #[test]
    fn test_pushed_comment_summary_reaches_comment_target() {
        let store = ReactionStore::new();
        let comment = ReactionTarget::Comment {
            task_id: Uuid::from_u128(1),
            comment_id: Uuid::from_u128(2),
        };
        let summary = ReactionSummary::default().toggled("👀");
        assert!(store.set_pushed("comment", Uuid::from_u128(2), summary.clone()));
        assert_eq!(store.get(&comment), Some(summary));
        assert!(!store.set_pushed("attachment", Uuid::from_u128(2), ReactionSummary::default()));
    }

    #[test]
    fn test_restore_puts_back_previous() {
        let store = ReactionStore::new();
        store.set(target(), ReactionSummary::default());
        let previous = store.apply_toggle(target(), "🎉").unwrap();
        assert_eq!(store.get(&target()).unwrap().total, 1);
        store.restore(target(), previous);
        assert_eq!(store.get(&target()), Some(ReactionSummary::default()));
    }

    #[test]
    fn test_held_targets_keep_comment_task_across_pushes() {
        let store = ReactionStore::new();
        let comment = ReactionTarget::Comment {
            task_id: Uuid::from_u128(1),
            comment_id: Uuid::from_u128(2),
        };
        store.set(comment, ReactionSummary::default());
        store.set_pushed("comment", Uuid::from_u128(2), ReactionSummary::default().toggled("👀"));
        store.set_pushed("comment", Uuid::from_u128(9), ReactionSummary::default());
        store.set_pushed("task", Uuid::from_u128(3), ReactionSummary::default());

        let mut held = store.held_targets();
        held.sort_by_key(|t| t.entity_id());
        assert_eq!(held, vec![comment, ReactionTarget::Task(Uuid::from_u128(3))]);
    }

    #[test]
    fn test_double_toggle_returns_to_exact_value() {
        let store = ReactionStore::new();
        let original = ReactionSummary {
            groups: vec![
                ReactionGroup { emoji: "👍".into(), count: 2, reacted_by_me: false, reactors: vec![] },
                ReactionGroup { emoji: "🚀".into(), count: 1, reacted_by_me: true, reactors: vec![] },
            ],
            total: 3,
        };
        store.set(target(), original.clone());
        for emoji in ["👍", "🚀", "❤️"] {
            store.apply_toggle(target(), emoji);
            store.apply_toggle(target(), emoji);
            assert_eq!(store.get(&target()).unwrap(), original, "emoji {}", emoji);
        }
    }
}
