//! Optimistic mutations with rollback.
//!
//! Every board-changing action follows one protocol: capture what a failure
//! must restore, apply the change to the local cache, send the request, then
//! either adopt the server's copy or restore the capture. On settle the
//! affected queries are invalidated so the next fetch decides the final
//! state, whatever order the confirmations arrived in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use agentboard_common::{
    CustomFieldValue, CustomFieldValueSet, ReactionTarget, Task, TaskCreate, TaskMove, TaskUpdate,
    ToggleResult,
};
use tokio::time::Instant;
use uuid::Uuid;

use crate::api::BoardApi;
use crate::board::SharedBoard;
use crate::errors::ApiError;
use crate::position::{compute_insert_position, positions_excluding};
use crate::query::{QueryCache, QueryKey};
use crate::reactions::ReactionStore;

/// A move marker is ignored after this long even if its settle never ran.
pub const LOCAL_MOVE_TTL: Duration = Duration::from_secs(10);

/// Tasks this client is moving right now.
///
/// Push handlers consult it to stay quiet about echoes of our own moves.
#[derive(Debug, Clone, Default)]
pub struct LocalMoves {
    marked: Arc<Mutex<HashMap<Uuid, Instant>>>,
}

impl LocalMoves {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, task_id: Uuid) {
        self.lock().insert(task_id, Instant::now() + LOCAL_MOVE_TTL);
    }

    pub fn clear(&self, task_id: Uuid) {
        self.lock().remove(&task_id);
    }

    /// Whether `task_id` has an unexpired marker. Expired markers are dropped.
    pub fn contains(&self, task_id: Uuid) -> bool {
        let mut marked = self.lock();
        match marked.get(&task_id) {
            Some(expires) if *expires > Instant::now() => true,
            Some(_) => {
                marked.remove(&task_id);
                false
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Instant>> {
        self.marked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears a move marker when the move settles, including when the move
/// future is dropped before completing.
struct MoveMarker<'a> {
    moves: &'a LocalMoves,
    task_id: Uuid,
}

impl<'a> MoveMarker<'a> {
    fn set(moves: &'a LocalMoves, task_id: Uuid) -> Self {
        moves.mark(task_id);
        Self { moves, task_id }
    }
}

impl Drop for MoveMarker<'_> {
    fn drop(&mut self) {
        self.moves.clear(self.task_id);
    }
}

/// Board-scoped mutation entry points.
pub struct BoardMutations<A: BoardApi + ?Sized> {
    api: Arc<A>,
    board: SharedBoard,
    queries: QueryCache,
    reactions: ReactionStore,
    local_moves: LocalMoves,
    project_id: Uuid,
    board_id: Uuid,
}

impl<A: BoardApi + ?Sized> Clone for BoardMutations<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            board: self.board.clone(),
            queries: self.queries.clone(),
            reactions: self.reactions.clone(),
            local_moves: self.local_moves.clone(),
            project_id: self.project_id,
            board_id: self.board_id,
        }
    }
}

impl<A: BoardApi + ?Sized> BoardMutations<A> {
    pub fn new(
        api: Arc<A>,
        board: SharedBoard,
        queries: QueryCache,
        reactions: ReactionStore,
        local_moves: LocalMoves,
        project_id: Uuid,
        board_id: Uuid,
    ) -> Self {
        Self {
            api,
            board,
            queries,
            reactions,
            local_moves,
            project_id,
            board_id,
        }
    }

    pub fn local_moves(&self) -> &LocalMoves {
        &self.local_moves
    }

    fn tasks_key(&self) -> QueryKey {
        QueryKey::tasks(self.project_id, self.board_id)
    }

    fn invalidate_task_views(&self) {
        self.queries.invalidate(&self.tasks_key());
        self.queries.invalidate(&QueryKey::activity(self.project_id));
    }

    /// Move `task_id` from `from_status` to `to_status` at `position`.
    ///
    /// The cache shows the move immediately. On failure the whole board is
    /// restored to its pre-move contents and the error is returned.
    pub async fn move_task(
        &self,
        task_id: Uuid,
        from_status: Uuid,
        to_status: Uuid,
        position: f64,
    ) -> Result<Task, ApiError> {
        let _marker = MoveMarker::set(&self.local_moves, task_id);
        self.queries.cancel(&self.tasks_key());

        let snapshot = self.board.with(|store| {
            let snapshot = store.snapshot();
            store.move_task(task_id, from_status, to_status, position);
            snapshot
        });

        let body = TaskMove {
            status_id: to_status,
            position: Some(position),
        };
        let result = self
            .api
            .move_task(self.project_id, self.board_id, task_id, &body)
            .await;

        match &result {
            Ok(task) => self.board.with(|store| store.relocate_task(task_id, task.clone())),
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "Move failed; restoring board");
                self.board.with(|store| store.restore(&snapshot));
            }
        }
        self.invalidate_task_views();
        result
    }

    /// Drop `task_id` into `to_status` so that `index` cards precede it,
    /// computing the position from the column as it looks without the task.
    pub async fn move_task_to_index(
        &self,
        task_id: Uuid,
        to_status: Uuid,
        index: usize,
    ) -> Result<Task, ApiError> {
        let placement = self.board.with(|store| {
            let (from_status, _) = store.find_task(task_id)?;
            let positions = positions_excluding(store.tasks(to_status), task_id);
            Some((from_status, compute_insert_position(&positions, index)))
        });
        let Some((from_status, position)) = placement else {
            return Err(ApiError::Api {
                code: crate::errors::ErrorCode::NotFound,
                message: "Task is not on this board".to_string(),
                details: None,
            });
        };
        self.move_task(task_id, from_status, to_status, position).await
    }

    /// Create a task. Nothing is shown until the server answers; the new task
    /// arrives through the refetch (or a push event, whichever is first).
    pub async fn create_task(&self, body: &TaskCreate) -> Result<Task, ApiError> {
        let task = self
            .api
            .create_task(self.project_id, self.board_id, body)
            .await?;
        self.invalidate_task_views();
        Ok(task)
    }

    pub async fn update_task(&self, task_id: Uuid, body: &TaskUpdate) -> Result<Task, ApiError> {
        let patch = body.optimistic_patch();
        let snapshot = self.board.with(|store| {
            let snapshot = store.snapshot();
            store.update_task(task_id, &patch);
            snapshot
        });

        let result = self
            .api
            .update_task(self.project_id, self.board_id, task_id, body)
            .await;
        match &result {
            Ok(task) => self.board.with(|store| store.relocate_task(task_id, task.clone())),
            Err(e) => {
                tracing::warn!(%task_id, error = %e, "Update failed; restoring board");
                self.board.with(|store| store.restore(&snapshot));
            }
        }
        self.invalidate_task_views();
        result
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<(), ApiError> {
        let snapshot = self.board.with(|store| {
            let snapshot = store.snapshot();
            store.remove_task(task_id);
            snapshot
        });

        let result = self
            .api
            .delete_task(self.project_id, self.board_id, task_id)
            .await;
        if let Err(e) = &result {
            tracing::warn!(%task_id, error = %e, "Delete failed; restoring board");
            self.board.with(|store| store.restore(&snapshot));
        }
        self.invalidate_task_views();
        result
    }

    pub async fn set_field_value(
        &self,
        task_id: Uuid,
        value: &CustomFieldValueSet,
    ) -> Result<CustomFieldValue, ApiError> {
        let field_id = value.field_definition_id;
        let snapshot = self.board.with(|store| {
            let snapshot = store.snapshot();
            edit_field_values(store, task_id, |values| {
                let id = values
                    .iter()
                    .find(|v| v.field_definition_id == field_id)
                    .map_or_else(Uuid::nil, |v| v.id);
                values.retain(|v| v.field_definition_id != field_id);
                values.push(CustomFieldValue {
                    id,
                    field_definition_id: field_id,
                    value_text: value.value_text.clone(),
                    value_number: value.value_number,
                    value_json: value.value_json.clone(),
                    value_date: value.value_date,
                });
            });
            snapshot
        });

        let result = self
            .api
            .set_field_value(self.project_id, self.board_id, task_id, value)
            .await;
        match &result {
            Ok(stored) => self.board.with(|store| {
                edit_field_values(store, task_id, |values| {
                    values.retain(|v| v.field_definition_id != field_id);
                    values.push(stored.clone());
                })
            }),
            Err(e) => {
                tracing::warn!(%task_id, %field_id, error = %e, "Field update failed; restoring board");
                self.board.with(|store| store.restore(&snapshot));
            }
        }
        self.invalidate_task_views();
        result
    }

    pub async fn clear_field_value(&self, task_id: Uuid, field_id: Uuid) -> Result<(), ApiError> {
        let snapshot = self.board.with(|store| {
            let snapshot = store.snapshot();
            edit_field_values(store, task_id, |values| {
                values.retain(|v| v.field_definition_id != field_id);
            });
            snapshot
        });

        let result = self
            .api
            .clear_field_value(self.project_id, self.board_id, task_id, field_id)
            .await;
        if let Err(e) = &result {
            tracing::warn!(%task_id, %field_id, error = %e, "Field clear failed; restoring board");
            self.board.with(|store| store.restore(&snapshot));
        }
        self.invalidate_task_views();
        result
    }

    /// Flip the caller's `emoji` on `target` locally, then confirm with the
    /// server. A summary that was never loaded is left alone until the
    /// server answers. On success the server's summary replaces the local
    /// one; a failed request puts back the exact previous summary.
    pub async fn toggle_reaction(
        &self,
        target: ReactionTarget,
        emoji: &str,
    ) -> Result<ToggleResult, ApiError> {
        let reactions_key = QueryKey::reactions(&target);
        self.queries.cancel(&reactions_key);
        let previous = self.reactions.apply_toggle(target, emoji);

        let result = self
            .api
            .toggle_reaction(self.project_id, self.board_id, &target, emoji)
            .await;
        match &result {
            Ok(toggled) => self.reactions.set(target, toggled.summary.clone()),
            Err(e) => {
                tracing::warn!(entity_id = %target.entity_id(), emoji, error = %e, "Reaction toggle failed; restoring");
                if let Some(previous) = previous {
                    self.reactions.restore(target, previous);
                }
            }
        }

        self.queries.invalidate(&reactions_key);
        match target {
            ReactionTarget::Task(_) => {
                self.queries.invalidate(&self.tasks_key());
            }
            ReactionTarget::Comment { task_id, .. } => {
                self.queries
                    .invalidate(&QueryKey::comments(self.project_id, self.board_id, task_id));
            }
        }
        result
    }
}

/// Edit the custom field values of `task_id` in place, wherever it lives.
fn edit_field_values(
    store: &mut crate::board::BoardStore,
    task_id: Uuid,
    edit: impl FnOnce(&mut Vec<CustomFieldValue>),
) {
    let Some((_, task)) = store.find_task(task_id) else {
        return;
    };
    let mut values = task.custom_field_values.clone();
    edit(&mut values);
    let patch = agentboard_common::TaskPatch {
        custom_field_values: Some(values),
        ..Default::default()
    };
    store.update_task(task_id, &patch);
}
