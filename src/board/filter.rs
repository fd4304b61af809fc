use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agentboard_common::{Priority, Task};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DueDatePreset {
    Overdue,
    Today,
    ThisWeek,
    NextWeek,
    NoDate,
}

impl DueDatePreset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::Today => "today",
            Self::ThisWeek => "this_week",
            Self::NextWeek => "next_week",
            Self::NoDate => "no_date",
        }
    }
}

impl std::str::FromStr for DueDatePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "overdue" => Ok(Self::Overdue),
            "today" => Ok(Self::Today),
            "this_week" => Ok(Self::ThisWeek),
            "next_week" => Ok(Self::NextWeek),
            "no_date" => Ok(Self::NoDate),
            _ => Err(format!("Invalid due date preset: {}", s)),
        }
    }
}

/// What the board view currently shows.
///
/// Dimensions are AND-combined; an empty dimension never excludes. Within the
/// assignee dimension (`assignee` / `unassigned`), within labels, and within
/// due-date presets, selections are OR-combined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    pub search: String,
    pub statuses: HashSet<Uuid>,
    pub priorities: HashSet<Priority>,
    pub assignee: Option<Uuid>,
    pub unassigned: bool,
    pub label_ids: HashSet<Uuid>,
    pub due_date_presets: HashSet<DueDatePreset>,
}

/// Partial filter change; `None` leaves the current value in place.
#[derive(Debug, Clone, Default)]
pub struct FilterUpdate {
    pub search: Option<String>,
    pub statuses: Option<HashSet<Uuid>>,
    pub priorities: Option<HashSet<Priority>>,
    pub assignee: Option<Option<Uuid>>,
    pub unassigned: Option<bool>,
    pub label_ids: Option<HashSet<Uuid>>,
    pub due_date_presets: Option<HashSet<DueDatePreset>>,
}

impl FilterState {
    pub fn merge(&mut self, update: FilterUpdate) {
        if let Some(v) = update.search {
            self.search = v;
        }
        if let Some(v) = update.statuses {
            self.statuses = v;
        }
        if let Some(v) = update.priorities {
            self.priorities = v;
        }
        if let Some(v) = update.assignee {
            self.assignee = v;
        }
        if let Some(v) = update.unassigned {
            self.unassigned = v;
        }
        if let Some(v) = update.label_ids {
            self.label_ids = v;
        }
        if let Some(v) = update.due_date_presets {
            self.due_date_presets = v;
        }
    }

    pub fn is_active(&self) -> bool {
        !self.search.is_empty()
            || !self.statuses.is_empty()
            || !self.priorities.is_empty()
            || self.assignee.is_some()
            || self.unassigned
            || !self.label_ids.is_empty()
            || !self.due_date_presets.is_empty()
    }

    pub fn allows_status(&self, status_id: Uuid) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&status_id)
    }

    /// Whether `task` passes every task-level dimension, with due-date
    /// presets evaluated relative to `now` in `now`'s timezone.
    pub fn matches<Tz: TimeZone>(&self, task: &Task, now: &DateTime<Tz>) -> bool {
        if !self.search.is_empty()
            && !task
                .title
                .to_lowercase()
                .contains(&self.search.to_lowercase())
        {
            return false;
        }

        if !self.priorities.is_empty() && !self.priorities.contains(&task.priority) {
            return false;
        }

        if self.assignee.is_some() || self.unassigned {
            let by_id = self
                .assignee
                .is_some_and(|id| task.assignees.iter().any(|a| a.refers_to(id)));
            let by_absence = self.unassigned && task.assignees.is_empty();
            if !by_id && !by_absence {
                return false;
            }
        }

        if !self.label_ids.is_empty()
            && !task.labels.iter().any(|l| self.label_ids.contains(&l.id))
        {
            return false;
        }

        if !self.due_date_presets.is_empty() {
            let windows = DueWindows::around(now);
            if !self
                .due_date_presets
                .iter()
                .any(|preset| windows.matches(*preset, task.due_date))
            {
                return false;
            }
        }

        true
    }
}

/// Day and week boundaries for due-date presets. Weeks end at the start of
/// the coming Sunday.
struct DueWindows {
    start_of_day: DateTime<Utc>,
    end_of_day: DateTime<Utc>,
    end_of_week: DateTime<Utc>,
    end_of_next_week: DateTime<Utc>,
}

impl DueWindows {
    fn around<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let midnight = now.date_naive().and_time(NaiveTime::MIN);
        let start_of_day = now
            .timezone()
            .from_local_datetime(&midnight)
            .earliest()
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| now.with_timezone(&Utc));
        let end_of_day = start_of_day + Duration::days(1) - Duration::milliseconds(1);
        let days_to_sunday = 7 - i64::from(now.weekday().num_days_from_sunday());
        let end_of_week = start_of_day + Duration::days(days_to_sunday);
        let end_of_next_week = end_of_week + Duration::days(7);
        Self {
            start_of_day,
            end_of_day,
            end_of_week,
            end_of_next_week,
        }
    }

    fn matches(&self, preset: DueDatePreset, due: Option<DateTime<Utc>>) -> bool {
        let Some(due) = due else {
            return preset == DueDatePreset::NoDate;
        };
        match preset {
            DueDatePreset::NoDate => false,
            DueDatePreset::Overdue => due < self.start_of_day,
            DueDatePreset::Today => due >= self.start_of_day && due <= self.end_of_day,
            DueDatePreset::ThisWeek => due >= self.start_of_day && due <= self.end_of_week,
            DueDatePreset::NextWeek => due > self.end_of_week && due <= self.end_of_next_week,
        }
    }
}
