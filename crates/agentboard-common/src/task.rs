use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reaction::ReactionSummary;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserBrief {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentBrief {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub color: String,
}

/// One assignment slot: exactly one of `user` / `agent` is set by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssigneeBrief {
    pub id: Uuid,
    #[serde(default)]
    pub user: Option<UserBrief>,
    #[serde(default)]
    pub agent: Option<AgentBrief>,
}

impl AssigneeBrief {
    /// Whether this slot refers to `id`, as either the user or the agent.
    pub fn refers_to(&self, id: Uuid) -> bool {
        self.user.as_ref().is_some_and(|u| u.id == id)
            || self.agent.as_ref().is_some_and(|a| a.id == id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Status {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub position: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_terminal: bool,
    #[serde(default)]
    pub task_count: u32,
}

impl Status {
    /// Minimal status carrying only an id, as produced by an optimistic move
    /// before the server returns the full record.
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            name: String::new(),
            slug: String::new(),
            color: None,
            position: 0,
            is_default: false,
            is_terminal: false,
            task_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Label {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldValue {
    pub id: Uuid,
    pub field_definition_id: Uuid,
    #[serde(default)]
    pub value_text: Option<String>,
    #[serde(default)]
    pub value_number: Option<f64>,
    #[serde(default)]
    pub value_json: Option<serde_json::Value>,
    #[serde(default)]
    pub value_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: Option<serde_json::Value>,
    #[serde(default)]
    pub description_text: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assignees: Vec<AssigneeBrief>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    pub position: f64,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub comments_count: u32,
    #[serde(default)]
    pub custom_field_values: Vec<CustomFieldValue>,
    #[serde(default)]
    pub reactions: Option<ReactionSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Shallow-merge input for a cached task: every `Some` field overwrites.
///
/// Nullable fields use `Option<Option<_>>` so a patch can clear them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<serde_json::Value>>,
    pub description_text: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignees: Option<Vec<AssigneeBrief>>,
    pub labels: Option<Vec<Label>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub position: Option<f64>,
    pub parent_id: Option<Option<Uuid>>,
    pub comments_count: Option<u32>,
    pub custom_field_values: Option<Vec<CustomFieldValue>>,
    pub reactions: Option<Option<ReactionSummary>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskPatch {
    pub fn apply(&self, task: &mut Task) {
        if let Some(v) = &self.title {
            task.title = v.clone();
        }
        if let Some(v) = &self.description {
            task.description = v.clone();
        }
        if let Some(v) = &self.description_text {
            task.description_text = v.clone();
        }
        if let Some(v) = &self.status {
            task.status = v.clone();
        }
        if let Some(v) = self.priority {
            task.priority = v;
        }
        if let Some(v) = &self.assignees {
            task.assignees = v.clone();
        }
        if let Some(v) = &self.labels {
            task.labels = v.clone();
        }
        if let Some(v) = self.due_date {
            task.due_date = v;
        }
        if let Some(v) = self.position {
            task.position = v;
        }
        if let Some(v) = self.parent_id {
            task.parent_id = v;
        }
        if let Some(v) = self.comments_count {
            task.comments_count = v;
        }
        if let Some(v) = &self.custom_field_values {
            task.custom_field_values = v.clone();
        }
        if let Some(v) = &self.reactions {
            task.reactions = v.clone();
        }
        if let Some(v) = self.updated_at {
            task.updated_at = v;
        }
        if let Some(v) = self.completed_at {
            task.completed_at = v;
        }
    }
}

impl From<Task> for TaskPatch {
    fn from(task: Task) -> Self {
        Self {
            title: Some(task.title),
            description: Some(task.description),
            description_text: Some(task.description_text),
            status: Some(task.status),
            priority: Some(task.priority),
            assignees: Some(task.assignees),
            labels: Some(task.labels),
            due_date: Some(task.due_date),
            position: Some(task.position),
            parent_id: Some(task.parent_id),
            comments_count: Some(task.comments_count),
            custom_field_values: Some(task.custom_field_values),
            reactions: Some(task.reactions),
            updated_at: Some(task.updated_at),
            completed_at: Some(task.completed_at),
        }
    }
}

// Request payload types

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskCreate {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignee_user_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignee_agent_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub label_ids: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_user_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_agent_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_ids: Option<Vec<Uuid>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    /// The part of this update that can be shown before the server answers.
    /// Id-list fields need server-side expansion into briefs and are left out.
    pub fn optimistic_patch(&self) -> TaskPatch {
        TaskPatch {
            title: self.title.clone(),
            priority: self.priority,
            due_date: self.due_date.map(Some),
            ..TaskPatch::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskMove {
    pub status_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomFieldValueSet {
    pub field_definition_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_number: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_date: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task_json() -> serde_json::Value {
        serde_json::json!({
            "id": "00000000-0000-0000-0000-000000000001",
            "project_id": "00000000-0000-0000-0000-0000000000aa",
            "board_id": "00000000-0000-0000-0000-0000000000bb",
            "title": "Write docs",
            "status": {"id": "00000000-0000-0000-0000-000000000010", "name": "Todo"},
            "priority": "high",
            "position": 1024.0,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "watchers": [],
            "cover_type": null
        })
    }

    #[test]
    fn test_priority_roundtrip_strings() {
        for p in [Priority::None, Priority::Low, Priority::Medium, Priority::High, Priority::Urgent] {
            assert_eq!(p.as_str().parse::<Priority>().unwrap(), p);
        }
        assert!("critical".parse::<Priority>().is_err());
    }

    #[test]
    fn test_task_deserializes_with_missing_optionals_and_unknown_fields() {
        let task: Task = serde_json::from_value(sample_task_json()).unwrap();
        assert_eq!(task.title, "Write docs");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.position, 1024.0);
        assert!(task.assignees.is_empty());
        assert!(task.parent_id.is_none());
        assert_eq!(task.status.name, "Todo");
    }

    #[test]
    fn test_patch_overwrites_only_set_fields() {
        let mut task: Task = serde_json::from_value(sample_task_json()).unwrap();
        let patch = TaskPatch {
            title: Some("Renamed".into()),
            due_date: Some(None),
            ..TaskPatch::default()
        };
        patch.apply(&mut task);
        assert_eq!(task.title, "Renamed");
        assert_eq!(task.priority, Priority::High);
        assert_eq!(task.position, 1024.0);
    }

    #[test]
    fn test_full_patch_reproduces_task() {
        let original: Task = serde_json::from_value(sample_task_json()).unwrap();
        let mut replaced = original.clone();
        replaced.title = "Other".into();
        replaced.position = 5.0;
        TaskPatch::from(original.clone()).apply(&mut replaced);
        assert_eq!(replaced, original);
    }

    #[test]
    fn test_assignee_refers_to_user_or_agent() {
        let user_id = Uuid::from_u128(7);
        let agent_id = Uuid::from_u128(8);
        let by_user = AssigneeBrief {
            id: Uuid::from_u128(1),
            user: Some(UserBrief {
                id: user_id,
                username: "ana".into(),
                full_name: None,
                avatar_url: None,
            }),
            agent: None,
        };
        let by_agent = AssigneeBrief {
            id: Uuid::from_u128(2),
            user: None,
            agent: Some(AgentBrief { id: agent_id, name: "bot".into(), color: "#fff".into() }),
        };
        assert!(by_user.refers_to(user_id));
        assert!(!by_user.refers_to(agent_id));
        assert!(by_agent.refers_to(agent_id));
    }

    #[test]
    fn test_task_update_optimistic_patch_skips_id_lists() {
        let update = TaskUpdate {
            title: Some("New".into()),
            label_ids: Some(vec![Uuid::from_u128(3)]),
            ..TaskUpdate::default()
        };
        let patch = update.optimistic_patch();
        assert_eq!(patch.title.as_deref(), Some("New"));
        assert!(patch.labels.is_none());
        assert!(patch.due_date.is_none());
    }

    #[test]
    fn test_task_move_omits_missing_position() {
        let body = TaskMove { status_id: Uuid::from_u128(1), position: None };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("position"));
    }
}
