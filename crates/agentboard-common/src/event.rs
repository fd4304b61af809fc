use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::task::AgentBrief;

/// Who caused a pushed event. Agents act on behalf of a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventActor {
    pub id: Uuid,
    pub username: String,
    #[serde(default)]
    pub agent: Option<AgentBrief>,
}

impl EventActor {
    /// Name shown to other collaborators: the agent's when present.
    pub fn display_name(&self) -> &str {
        self.agent
            .as_ref()
            .map(|a| a.name.as_str())
            .unwrap_or(&self.username)
    }
}

/// Inbound event envelope.
///
/// `data` is left as raw JSON because its shape depends on `event_type`;
/// handlers decode what they need. Top-level keys that some event types add
/// (`entity_type`, `entity_id`, `parent_id`) land in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub board_id: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub user: Option<EventActor>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl WsEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            project_id: None,
            board_id: None,
            data,
            user: None,
            timestamp: None,
            extra: serde_json::Map::new(),
        }
    }

    /// String value of an extra top-level key.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }
}

/// Outbound control messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Subscribe {
        project_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        board_id: Option<Uuid>,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_serialization() {
        let msg = ControlMessage::Subscribe {
            project_id: Uuid::from_u128(1),
            board_id: None,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["project_id"], "00000000-0000-0000-0000-000000000001");
        assert!(json.get("board_id").is_none());
    }

    #[test]
    fn test_ping_serialization() {
        let json = serde_json::to_string(&ControlMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_event_keeps_extra_keys() {
        let json = r#"{
            "type": "reaction.updated",
            "entity_type": "task",
            "entity_id": "00000000-0000-0000-0000-000000000005",
            "data": {"groups": [], "total": 0}
        }"#;
        let event: WsEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, "reaction.updated");
        assert_eq!(event.extra_str("entity_type"), Some("task"));
        assert!(event.user.is_none());
    }

    #[test]
    fn test_actor_display_name_prefers_agent() {
        let mut actor = EventActor {
            id: Uuid::from_u128(1),
            username: "ana".into(),
            agent: None,
        };
        assert_eq!(actor.display_name(), "ana");
        actor.agent = Some(AgentBrief {
            id: Uuid::from_u128(2),
            name: "Reviewer Bot".into(),
            color: String::new(),
        });
        assert_eq!(actor.display_name(), "Reviewer Bot");
    }
}
