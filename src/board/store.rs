use std::collections::HashMap;

use chrono::{DateTime, Local, TimeZone};
use uuid::Uuid;

use agentboard_common::{Task, TaskPatch};

use super::filter::{FilterState, FilterUpdate};

/// Captured bucket contents, used to roll back an optimistic change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoardSnapshot {
    buckets: HashMap<Uuid, Vec<Task>>,
}

impl BoardSnapshot {
    pub fn buckets(&self) -> &HashMap<Uuid, Vec<Task>> {
        &self.buckets
    }
}

/// Per-status ordered task lists for the active board, plus its filter.
///
/// Every mutator leaves each task id in at most one bucket and each bucket
/// sorted ascending by `position`. Equal positions keep insertion order.
#[derive(Debug, Default)]
pub struct BoardStore {
    tasks_by_status: HashMap<Uuid, Vec<Task>>,
    filters: FilterState,
}

fn sort_by_position(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| a.position.total_cmp(&b.position));
}

impl BoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks_by_status(&self) -> &HashMap<Uuid, Vec<Task>> {
        &self.tasks_by_status
    }

    /// Bucket for `status_id`, empty when the bucket does not exist.
    pub fn tasks(&self, status_id: Uuid) -> &[Task] {
        self.tasks_by_status
            .get(&status_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    /// The bucket holding `task_id` and the task itself.
    pub fn find_task(&self, task_id: Uuid) -> Option<(Uuid, &Task)> {
        self.tasks_by_status.iter().find_map(|(status_id, tasks)| {
            tasks
                .iter()
                .find(|t| t.id == task_id)
                .map(|t| (*status_id, t))
        })
    }

    pub fn len(&self) -> usize {
        self.tasks_by_status.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace a bucket wholesale. Ids in `tasks` are dropped from every
    /// other bucket so a refetched list cannot duplicate a stale copy.
    pub fn set_tasks_for_status(&mut self, status_id: Uuid, mut tasks: Vec<Task>) {
        let mut seen = std::collections::HashSet::new();
        tasks.retain(|t| seen.insert(t.id));
        for (other, bucket) in self.tasks_by_status.iter_mut() {
            if *other != status_id {
                bucket.retain(|t| !seen.contains(&t.id));
            }
        }
        sort_by_position(&mut tasks);
        self.tasks_by_status.insert(status_id, tasks);
    }

    /// Replace every bucket from a full fetch: one bucket per status in
    /// `status_ids` (empty when it has no tasks), plus any status a task
    /// names that the list missed.
    pub fn load_fetched(&mut self, status_ids: impl IntoIterator<Item = Uuid>, tasks: Vec<Task>) {
        let mut buckets: HashMap<Uuid, Vec<Task>> =
            status_ids.into_iter().map(|id| (id, Vec::new())).collect();
        for task in tasks {
            buckets.entry(task.status.id).or_default().push(task);
        }
        for (status_id, tasks) in buckets {
            self.set_tasks_for_status(status_id, tasks);
        }
    }

    /// Insert into the bucket named by `task.status.id`. An existing copy of
    /// the same id, wherever it is, is replaced.
    pub fn add_task(&mut self, task: Task) {
        self.detach(task.id);
        self.insert_sorted(task);
    }

    /// Shallow-merge `patch` onto the task with `task_id`. Returns whether it
    /// was found. A patch that changes the status moves the task to the
    /// matching bucket; one that changes the position re-sorts.
    pub fn update_task(&mut self, task_id: Uuid, patch: &TaskPatch) -> bool {
        let Some((status_id, idx)) = self.locate(task_id) else {
            return false;
        };
        let Some(bucket) = self.tasks_by_status.get_mut(&status_id) else {
            return false;
        };

        let task = &mut bucket[idx];
        let old_position = task.position;
        patch.apply(task);

        if task.status.id != status_id {
            let moved = bucket.remove(idx);
            self.insert_sorted(moved);
        } else if task.position != old_position {
            sort_by_position(bucket);
        }
        true
    }

    /// Move a task between (or within) buckets at a new position. No-op
    /// returning `false` when the task is not in `from_status_id`.
    pub fn move_task(
        &mut self,
        task_id: Uuid,
        from_status_id: Uuid,
        to_status_id: Uuid,
        position: f64,
    ) -> bool {
        let Some(from) = self.tasks_by_status.get_mut(&from_status_id) else {
            return false;
        };
        let Some(idx) = from.iter().position(|t| t.id == task_id) else {
            return false;
        };

        let mut task = from.remove(idx);
        task.position = position;
        task.status.id = to_status_id;
        self.insert_sorted(task);
        true
    }

    /// Drop every copy of `task_id` and insert `new_task` into the bucket its
    /// own status names. Used when the server's idea of the status may differ
    /// from the optimistic guess.
    pub fn relocate_task(&mut self, task_id: Uuid, new_task: Task) {
        self.detach(task_id);
        self.detach(new_task.id);
        self.insert_sorted(new_task);
    }

    pub fn remove_task(&mut self, task_id: Uuid) -> Option<Task> {
        let (status_id, idx) = self.locate(task_id)?;
        self.tasks_by_status
            .get_mut(&status_id)
            .map(|bucket| bucket.remove(idx))
    }

    /// Bucket contents that pass the current filter, evaluated at local time.
    pub fn filtered_tasks(&self, status_id: Uuid) -> Vec<Task> {
        self.filtered_tasks_at(status_id, &Local::now())
    }

    pub fn filtered_tasks_at<Tz: TimeZone>(&self, status_id: Uuid, now: &DateTime<Tz>) -> Vec<Task> {
        if !self.filters.allows_status(status_id) {
            return Vec::new();
        }
        self.tasks(status_id)
            .iter()
            .filter(|t| self.filters.matches(t, now))
            .cloned()
            .collect()
    }

    pub fn set_filters(&mut self, update: FilterUpdate) {
        self.filters.merge(update);
    }

    pub fn clear_filters(&mut self) {
        self.filters = FilterState::default();
    }

    pub fn has_active_filters(&self) -> bool {
        self.filters.is_active()
    }

    /// Drop every bucket and reset filters. Called when the board view goes away.
    pub fn clear_board(&mut self) {
        self.tasks_by_status.clear();
        self.filters = FilterState::default();
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            buckets: self.tasks_by_status.clone(),
        }
    }

    /// Put every captured bucket back and drop buckets created since the
    /// snapshot, leaving the buckets exactly as captured.
    pub fn restore(&mut self, snapshot: &BoardSnapshot) {
        self.tasks_by_status
            .retain(|status_id, _| snapshot.buckets.contains_key(status_id));
        for (status_id, tasks) in &snapshot.buckets {
            self.set_tasks_for_status(*status_id, tasks.clone());
        }
    }

    fn locate(&self, task_id: Uuid) -> Option<(Uuid, usize)> {
        self.tasks_by_status.iter().find_map(|(status_id, tasks)| {
            tasks
                .iter()
                .position(|t| t.id == task_id)
                .map(|idx| (*status_id, idx))
        })
    }

    fn detach(&mut self, task_id: Uuid) {
        for bucket in self.tasks_by_status.values_mut() {
            bucket.retain(|t| t.id != task_id);
        }
    }

    fn insert_sorted(&mut self, task: Task) {
        let bucket = self.tasks_by_status.entry(task.status.id).or_default();
        bucket.push(task);
        sort_by_position(bucket);
    }
}
