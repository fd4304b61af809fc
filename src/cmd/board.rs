//! One-shot board listing (`agentboard board`).

use std::collections::HashSet;

use anyhow::Result;
use uuid::Uuid;

use agentboard::api::BoardApi;
use agentboard::board::{BoardStore, DueDatePreset, FilterUpdate};
use agentboard::config::Settings;
use agentboard::expanded::{ExpandedTasks, ExpandedTasksBus};
use agentboard_common::{Priority, Status, Task};

use super::short_id;
use crate::BoardRef;

#[derive(Debug, Clone, Default)]
pub struct BoardFilters {
    pub search: Option<String>,
    pub priorities: Vec<Priority>,
    pub assignee: Option<Uuid>,
    pub unassigned: bool,
    pub labels: Vec<Uuid>,
    pub due: Vec<DueDatePreset>,
}

impl BoardFilters {
    fn into_update(self) -> FilterUpdate {
        FilterUpdate {
            search: self.search,
            statuses: None,
            priorities: Some(self.priorities.into_iter().collect()),
            assignee: Some(self.assignee),
            unassigned: Some(self.unassigned),
            label_ids: Some(self.labels.into_iter().collect::<HashSet<_>>()),
            due_date_presets: Some(self.due.into_iter().collect()),
        }
    }
}

pub async fn cmd_board(
    settings: &Settings,
    target: BoardRef,
    filters: BoardFilters,
    toggle: &[Uuid],
) -> Result<()> {
    let api = super::http_api(settings)?;
    let mut statuses = api.list_statuses(target.project).await?;
    statuses.sort_by_key(|s| s.position);
    let tasks = api.list_tasks(target.project, target.board).await?;

    let mut store = BoardStore::new();
    store.load_fetched(statuses.iter().map(|s| s.id), tasks);
    store.set_filters(filters.into_update());

    let bus = ExpandedTasksBus::new();
    let mut expanded = ExpandedTasks::open(&settings.data_dir, target.board, &bus);
    for task_id in toggle {
        expanded.toggle(*task_id)?;
    }

    print_board(&statuses, &store, &expanded);
    Ok(())
}

fn print_board(statuses: &[Status], store: &BoardStore, expanded: &ExpandedTasks) {
    if store.has_active_filters() {
        println!("{}", console::style("(filtered)").dim());
    }
    for status in statuses {
        let visible = store.filtered_tasks(status.id);
        let total = store.tasks(status.id).len();
        println!();
        println!(
            "{} {}",
            console::style(&status.name).bold().cyan(),
            console::style(format!("{}/{}", visible.len(), total)).dim()
        );
        for task in &visible {
            print_task(task, expanded.is_expanded(task.id));
        }
    }
}

fn print_task(task: &Task, expanded: bool) {
    let marker = if expanded { "▾" } else { "▸" };
    println!(
        "  {} {} {:>10} {} {}",
        marker,
        console::style(short_id(task.id)).dim(),
        task.position,
        task.title,
        console::style(format!("[{}]", task.priority)).yellow()
    );
    if !expanded {
        return;
    }
    if let Some(text) = task.description_text.as_deref().filter(|t| !t.is_empty()) {
        for line in text.lines() {
            println!("        {}", line);
        }
    }
    let names: Vec<&str> = task
        .assignees
        .iter()
        .filter_map(|a| {
            a.agent
                .as_ref()
                .map(|agent| agent.name.as_str())
                .or_else(|| a.user.as_ref().map(|u| u.username.as_str()))
        })
        .collect();
    if !names.is_empty() {
        println!("        assignees: {}", names.join(", "));
    }
    if !task.labels.is_empty() {
        let labels: Vec<&str> = task.labels.iter().map(|l| l.name.as_str()).collect();
        println!("        labels: {}", labels.join(", "));
    }
    if let Some(due) = task.due_date {
        println!("        due: {}", due.format("%Y-%m-%d"));
    }
}
