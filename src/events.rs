//! Server push events applied to the board.
//!
//! Pushed events go through the same store primitives as local mutations,
//! then invalidate the matching queries so a refetch has the last word.

use std::fmt;
use std::sync::Arc;

use agentboard_common::{ReactionSummary, Task, TaskPatch, WsEvent};
use serde::Deserialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::board::SharedBoard;
use crate::mutations::LocalMoves;
use crate::query::{QueryCache, QueryKey};
use crate::reactions::ReactionStore;
use crate::ws::{ConnectionManager, EventHandler, handler};

/// Every event type a board view listens to.
pub const BOARD_EVENT_TYPES: &[&str] = &[
    "task.created",
    "task.updated",
    "task.deleted",
    "task.moved",
    "notification.new",
    "checklist.updated",
    "reaction.updated",
    "custom_field.created",
    "custom_field.updated",
    "custom_field.deleted",
    "custom_field.reordered",
    "subtask.created",
    "subtask.updated",
    "subtask.deleted",
    "subtask.reordered",
];

const NOTICE_CAPACITY: usize = 64;

/// Something another collaborator did, worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardNotice {
    pub actor: String,
    pub task_id: Uuid,
    pub message: String,
}

impl fmt::Display for BoardNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Deserialize)]
struct TaskRef {
    task_id: Uuid,
}

/// What the event handlers write into.
#[derive(Clone)]
pub struct BoardTargets {
    pub board: SharedBoard,
    pub queries: QueryCache,
    pub reactions: ReactionStore,
    pub local_moves: LocalMoves,
    pub project_id: Uuid,
    pub board_id: Uuid,
}

struct EventApplier {
    targets: BoardTargets,
    notices: broadcast::Sender<BoardNotice>,
}

impl EventApplier {
    fn apply(&self, event: &WsEvent) {
        match event.event_type.as_str() {
            "task.created" => self.task_created(event),
            "task.updated" => self.task_updated(event),
            "task.deleted" => self.task_deleted(event),
            "task.moved" => self.task_moved(event),
            "notification.new" => {
                self.targets.queries.invalidate(&QueryKey::notifications());
            }
            "checklist.updated" => self.checklist_updated(event),
            "reaction.updated" => self.reaction_updated(event),
            t if t.starts_with("custom_field.") => {
                let t = &self.targets;
                t.queries.invalidate(&QueryKey::custom_fields(t.project_id, t.board_id));
            }
            t if t.starts_with("subtask.") => self.subtask_changed(event),
            other => tracing::debug!(event_type = other, "Ignoring unhandled board event"),
        }
    }

    fn tasks_key(&self) -> QueryKey {
        QueryKey::tasks(self.targets.project_id, self.targets.board_id)
    }

    fn invalidate_activity(&self) {
        self.targets.queries.invalidate(&QueryKey::new(["activity"]));
    }

    /// Decode the task carried by `event`, skipping tasks of other boards.
    fn board_task(&self, event: &WsEvent) -> Option<Task> {
        let task: Task = match serde_json::from_value(event.data.clone()) {
            Ok(task) => task,
            Err(e) => {
                tracing::debug!(event_type = %event.event_type, error = %e, "Event data is not a task");
                return None;
            }
        };
        if task.board_id != self.targets.board_id {
            tracing::debug!(task_id = %task.id, board_id = %task.board_id, "Event for another board");
            return None;
        }
        Some(task)
    }

    fn notify(&self, event: &WsEvent, task_id: Uuid, message: impl FnOnce(&str) -> String) {
        let Some(actor) = &event.user else {
            return;
        };
        let name = actor.display_name().to_string();
        let notice = BoardNotice {
            message: message(&name),
            actor: name,
            task_id,
        };
        let _ = self.notices.send(notice);
    }

    fn task_created(&self, event: &WsEvent) {
        let Some(task) = self.board_task(event) else {
            return;
        };
        let (task_id, title) = (task.id, task.title.clone());
        self.targets.board.with(|store| store.add_task(task));
        self.invalidate_activity();
        self.notify(event, task_id, |actor| format!("{} created \"{}\"", actor, title));
    }

    fn task_updated(&self, event: &WsEvent) {
        let Some(task) = self.board_task(event) else {
            return;
        };
        self.targets.board.with(|store| {
            let current = store.find_task(task.id).map(|(status_id, _)| status_id);
            match current {
                Some(status_id) if status_id != task.status.id => store.relocate_task(task.id, task),
                _ => {
                    store.update_task(task.id, &TaskPatch::from(task));
                }
            }
        });
        self.invalidate_activity();
    }

    fn task_deleted(&self, event: &WsEvent) {
        match serde_json::from_value::<TaskRef>(event.data.clone()) {
            Ok(r) => {
                self.targets.board.with(|store| store.remove_task(r.task_id));
            }
            Err(e) => tracing::debug!(error = %e, "task.deleted without task_id"),
        }
        self.invalidate_activity();
    }

    /// A move echo of our own drag is applied silently; a remote move also
    /// produces a notice. Either way the task list is refetched.
    fn task_moved(&self, event: &WsEvent) {
        if let Some(task) = self.board_task(event) {
            let task_id = task.id;
            let local = self.targets.local_moves.contains(task_id);
            self.targets.board.with(|store| store.relocate_task(task_id, task));
            if !local {
                self.notify(event, task_id, |actor| format!("{} moved a task", actor));
            }
        }
        self.targets.queries.invalidate(&self.tasks_key());
        self.invalidate_activity();
    }

    fn checklist_updated(&self, event: &WsEvent) {
        let t = &self.targets;
        if let Ok(r) = serde_json::from_value::<TaskRef>(event.data.clone()) {
            t.queries
                .invalidate(&QueryKey::checklists(t.project_id, t.board_id, r.task_id));
        }
        t.queries.invalidate(&self.tasks_key());
        self.invalidate_activity();
    }

    fn reaction_updated(&self, event: &WsEvent) {
        let t = &self.targets;
        let entity_type = event.extra_str("entity_type").unwrap_or_default();
        let entity_id = event.extra_str("entity_id").and_then(|s| Uuid::parse_str(s).ok());
        let summary = serde_json::from_value::<ReactionSummary>(event.data.clone());
        match (entity_id, summary) {
            (Some(entity_id), Ok(summary)) => {
                t.reactions.set_pushed(entity_type, entity_id, summary);
            }
            _ => tracing::debug!("Malformed reaction.updated event"),
        }
        if entity_type == "task" {
            t.queries.invalidate(&self.tasks_key());
        }
    }

    fn subtask_changed(&self, event: &WsEvent) {
        let t = &self.targets;
        if let Some(parent_id) = event.extra_str("parent_id").and_then(|s| Uuid::parse_str(s).ok()) {
            t.queries
                .invalidate(&QueryKey::subtasks(t.project_id, t.board_id, parent_id));
        }
        t.queries.invalidate(&self.tasks_key());
    }
}

/// The handler set a board view registers on the connection.
///
/// One handler serves every board event type, so `unregister` removes
/// exactly what `register` added.
pub struct BoardEventBindings {
    handler: EventHandler,
    notices: broadcast::Sender<BoardNotice>,
}

impl BoardEventBindings {
    pub fn new(targets: BoardTargets) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let applier = Arc::new(EventApplier {
            targets,
            notices: notices.clone(),
        });
        Self {
            handler: handler(move |event| applier.apply(event)),
            notices,
        }
    }

    pub fn register(&self, connection: &ConnectionManager) {
        for event_type in BOARD_EVENT_TYPES {
            connection.on(event_type, self.handler.clone());
        }
    }

    pub fn unregister(&self, connection: &ConnectionManager) {
        for event_type in BOARD_EVENT_TYPES {
            connection.off(event_type, &self.handler);
        }
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<BoardNotice> {
        self.notices.subscribe()
    }

    /// Apply one event directly, as the connection would.
    pub fn apply(&self, event: &WsEvent) {
        (self.handler)(event);
    }
}

#[cfg(test)]
mod tests {
    use agentboard_common::{AgentBrief, EventActor};
    use serde_json::json;
    use url::Url;

    use super::*;
    use crate::board::test_support::{assert_invariants, ids, task_at};
    use crate::ws::ConnectionSettings;
    use crate::ws::test_support::MockConnector;

    const TODO: u128 = 10;
    const DONE: u128 = 12;

    struct Fixture {
        targets: BoardTargets,
        bindings: BoardEventBindings,
    }

    fn fixture() -> Fixture {
        let targets = BoardTargets {
            board: SharedBoard::new(),
            queries: QueryCache::new(),
            reactions: ReactionStore::new(),
            local_moves: LocalMoves::new(),
            project_id: Uuid::from_u128(0xAA),
            board_id: Uuid::from_u128(0xBB),
        };
        targets.board.with(|s| {
            s.set_tasks_for_status(
                Uuid::from_u128(TODO),
                vec![task_at(1, TODO, 1024.0), task_at(2, TODO, 2048.0)],
            );
        });
        let bindings = BoardEventBindings::new(targets.clone());
        Fixture { targets, bindings }
    }

    fn actor(name: &str) -> EventActor {
        EventActor {
            id: Uuid::from_u128(0x99),
            username: name.into(),
            agent: None,
        }
    }

    fn event(kind: &str, data: serde_json::Value, user: Option<EventActor>) -> WsEvent {
        let mut e = WsEvent::new(kind, data);
        e.user = user;
        e
    }

    fn task_json(task: &Task) -> serde_json::Value {
        serde_json::to_value(task).unwrap()
    }

    fn todo_ids(f: &Fixture) -> Vec<u128> {
        f.targets.board.with(|s| ids(s.tasks(Uuid::from_u128(TODO))))
    }

    #[test]
    fn test_created_adds_task_and_announces() {
        let f = fixture();
        let mut notices = f.bindings.subscribe_notices();
        let mut task = task_at(3, TODO, 1536.0);
        task.title = "Ship it".into();
        f.bindings.apply(&event("task.created", task_json(&task), Some(actor("ana"))));

        assert_eq!(todo_ids(&f), vec![1, 3, 2]);
        assert_eq!(notices.try_recv().unwrap().message, "ana created \"Ship it\"");
    }

    #[test]
    fn test_created_echo_of_known_task_does_not_duplicate() {
        let f = fixture();
        f.bindings.apply(&event("task.created", task_json(&task_at(1, TODO, 1024.0)), None));
        assert_eq!(todo_ids(&f), vec![1, 2]);
    }

    #[test]
    fn test_updated_same_status_merges_in_place() {
        let f = fixture();
        let mut task = task_at(2, TODO, 512.0);
        task.title = "Renamed".into();
        f.bindings.apply(&event("task.updated", task_json(&task), None));
        assert_eq!(todo_ids(&f), vec![2, 1]);
        f.targets.board.with(|s| {
            assert_eq!(s.find_task(Uuid::from_u128(2)).unwrap().1.title, "Renamed");
            assert_invariants(s);
        });
    }

    #[test]
    fn test_updated_with_new_status_relocates() {
        let f = fixture();
        f.bindings.apply(&event("task.updated", task_json(&task_at(1, DONE, 1024.0)), None));
        assert_eq!(todo_ids(&f), vec![2]);
        assert_eq!(f.targets.board.with(|s| ids(s.tasks(Uuid::from_u128(DONE)))), vec![1]);
    }

    #[test]
    fn test_updated_unknown_task_is_ignored() {
        let f = fixture();
        f.bindings.apply(&event("task.updated", task_json(&task_at(9, TODO, 1.0)), None));
        assert_eq!(f.targets.board.with(|s| s.len()), 2);
    }

    #[test]
    fn test_deleted_removes_by_task_id() {
        let f = fixture();
        let data = json!({ "task_id": Uuid::from_u128(1).to_string() });
        f.bindings.apply(&event("task.deleted", data, None));
        assert_eq!(todo_ids(&f), vec![2]);
    }

    #[test]
    fn test_remote_move_relocates_and_names_agent() {
        let f = fixture();
        let mut notices = f.bindings.subscribe_notices();
        let tasks_key = QueryKey::tasks(Uuid::from_u128(0xAA), Uuid::from_u128(0xBB));
        f.targets.queries.mark_fresh(&tasks_key);
        let mut user = actor("ana");
        user.agent = Some(AgentBrief {
            id: Uuid::from_u128(0x77),
            name: "Planner".into(),
            color: String::new(),
        });
        f.bindings.apply(&event("task.moved", task_json(&task_at(2, DONE, 1024.0)), Some(user)));

        assert_eq!(todo_ids(&f), vec![1]);
        assert_eq!(notices.try_recv().unwrap().to_string(), "Planner moved a task");
        assert!(f.targets.queries.is_stale(&tasks_key));
    }

    #[test]
    fn test_echo_of_local_move_is_silent() {
        let f = fixture();
        let mut notices = f.bindings.subscribe_notices();
        f.targets.local_moves.mark(Uuid::from_u128(2));
        f.bindings.apply(&event("task.moved", task_json(&task_at(2, TODO, 512.0)), Some(actor("me"))));
        assert_eq!(todo_ids(&f), vec![2, 1]);
        assert!(notices.try_recv().is_err());
    }

    #[test]
    fn test_moved_without_task_payload_still_invalidates() {
        let f = fixture();
        let mut rx = f.targets.queries.subscribe();
        f.bindings.apply(&event("task.moved", json!({"task_id": "x"}), None));
        assert_eq!(todo_ids(&f), vec![1, 2]);
        assert_eq!(
            rx.try_recv().unwrap(),
            QueryKey::tasks(Uuid::from_u128(0xAA), Uuid::from_u128(0xBB))
        );
    }

    #[test]
    fn test_task_of_other_board_is_ignored() {
        let f = fixture();
        let mut foreign = task_at(5, TODO, 1.0);
        foreign.board_id = Uuid::from_u128(0xCC);
        f.bindings.apply(&event("task.created", task_json(&foreign), Some(actor("ana"))));
        assert_eq!(todo_ids(&f), vec![1, 2]);
    }

    #[test]
    fn test_malformed_payloads_leave_board_untouched() {
        let f = fixture();
        let before = f.targets.board.with(|s| s.snapshot());
        for kind in ["task.created", "task.updated", "task.deleted", "reaction.updated"] {
            f.bindings.apply(&event(kind, json!("garbage"), None));
        }
        assert_eq!(f.targets.board.with(|s| s.snapshot()), before);
    }

    #[test]
    fn test_reaction_update_stores_pushed_summary() {
        let f = fixture();
        let summary = ReactionSummary::default().toggled("🔥");
        let mut e = event("reaction.updated", serde_json::to_value(&summary).unwrap(), None);
        e.extra.insert("entity_type".into(), json!("task"));
        e.extra.insert("entity_id".into(), json!(Uuid::from_u128(1).to_string()));
        f.bindings.apply(&e);

        let target = agentboard_common::ReactionTarget::Task(Uuid::from_u128(1));
        assert_eq!(f.targets.reactions.get(&target), Some(summary));
    }

    #[test]
    fn test_subtask_and_checklist_events_invalidate_their_keys() {
        let f = fixture();
        let (p, b) = (Uuid::from_u128(0xAA), Uuid::from_u128(0xBB));
        let parent = Uuid::from_u128(1);
        let keys = [
            QueryKey::subtasks(p, b, parent),
            QueryKey::checklists(p, b, parent),
            QueryKey::custom_fields(p, b),
        ];
        for key in &keys {
            f.targets.queries.mark_fresh(key);
        }

        let mut sub = event("subtask.created", json!({}), None);
        sub.extra.insert("parent_id".into(), json!(parent.to_string()));
        f.bindings.apply(&sub);
        f.bindings.apply(&event("checklist.updated", json!({"task_id": parent.to_string()}), None));
        f.bindings.apply(&event("custom_field.reordered", json!({}), None));

        assert!(f.targets.queries.is_stale(&QueryKey::subtasks(p, b, parent)));
        assert!(f.targets.queries.is_stale(&QueryKey::checklists(p, b, parent)));
        assert!(f.targets.queries.is_stale(&QueryKey::custom_fields(p, b)));
    }

    #[test]
    fn test_register_then_unregister_leaves_no_handlers() {
        let f = fixture();
        let connection = ConnectionManager::new(
            Arc::new(MockConnector::new()),
            ConnectionSettings::new(Url::parse("ws://board.test").unwrap()),
        );
        f.bindings.register(&connection);
        f.bindings.register(&connection);
        for event_type in BOARD_EVENT_TYPES {
            assert_eq!(connection.handler_count(event_type), 1, "{}", event_type);
        }
        f.bindings.unregister(&connection);
        for event_type in BOARD_EVENT_TYPES {
            assert_eq!(connection.handler_count(event_type), 0, "{}", event_type);
        }
    }
}
