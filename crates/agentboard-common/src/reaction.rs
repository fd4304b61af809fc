use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::{AgentBrief, UserBrief};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactorBrief {
    #[serde(default)]
    pub user: Option<UserBrief>,
    #[serde(default)]
    pub agent: Option<AgentBrief>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: u32,
    pub reacted_by_me: bool,
    #[serde(default)]
    pub reactors: Vec<ReactorBrief>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReactionSummary {
    pub groups: Vec<ReactionGroup>,
    pub total: u32,
}

impl ReactionSummary {
    /// Flip the caller's reaction for `emoji` as the server would.
    ///
    /// Reacting adds one to the group (creating it if needed). Un-reacting
    /// subtracts one and drops the group once its count reaches zero. The
    /// total is recomputed from the groups.
    pub fn toggled(&self, emoji: &str) -> Self {
        let mut groups = self.groups.clone();
        match groups.iter().position(|g| g.emoji == emoji) {
            Some(idx) => {
                let group = &mut groups[idx];
                if group.reacted_by_me {
                    group.count = group.count.saturating_sub(1);
                    group.reacted_by_me = false;
                    if group.count == 0 {
                        groups.remove(idx);
                    }
                } else {
                    group.count += 1;
                    group.reacted_by_me = true;
                }
            }
            None => groups.push(ReactionGroup {
                emoji: emoji.to_string(),
                count: 1,
                reacted_by_me: true,
                reactors: Vec::new(),
            }),
        }
        let total = groups.iter().map(|g| g.count).sum();
        Self { groups, total }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToggleAction {
    Added,
    Removed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToggleResult {
    pub action: ToggleAction,
    pub emoji: String,
    pub summary: ReactionSummary,
}

/// The entity a reaction summary belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactionTarget {
    Task(Uuid),
    Comment { task_id: Uuid, comment_id: Uuid },
}

impl ReactionTarget {
    pub fn entity_type(&self) -> &'static str {
        match self {
            Self::Task(_) => "task",
            Self::Comment { .. } => "comment",
        }
    }

    pub fn entity_id(&self) -> Uuid {
        match self {
            Self::Task(id) => *id,
            Self::Comment { comment_id, .. } => *comment_id,
        }
    }

    pub fn task_id(&self) -> Uuid {
        match self {
            Self::Task(id) => *id,
            Self::Comment { task_id, .. } => *task_id,
        }
    }
}
