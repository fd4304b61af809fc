//! Single task detail (`agentboard show`).

use anyhow::Result;
use uuid::Uuid;

use agentboard::api::BoardApi;
use agentboard::config::Settings;
use agentboard_common::{ReactionSummary, ReactionTarget, Task};

use super::short_id;
use crate::BoardRef;

pub async fn cmd_show(settings: &Settings, target: BoardRef, task_id: Uuid) -> Result<()> {
    let api = super::http_api(settings)?;
    let task = api.get_task(target.project, target.board, task_id).await?;
    let reactions = api
        .get_reactions(target.project, target.board, &ReactionTarget::Task(task_id))
        .await?;

    print_task(&task);
    if let Some(line) = reaction_line(&reactions) {
        println!("  reactions: {}", line);
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!(
        "{} {} {}",
        console::style(short_id(task.id)).dim(),
        console::style(&task.title).bold(),
        console::style(format!("[{}]", task.priority)).yellow()
    );
    println!("  status: {} @ {}", task.status.name, task.position);
    if let Some(due) = task.due_date {
        println!("  due: {}", due.format("%Y-%m-%d"));
    }
    if let Some(text) = task.description_text.as_deref().filter(|t| !t.is_empty()) {
        println!();
        for line in text.lines() {
            println!("  {}", line);
        }
    }
}

/// `👍 3*  🚀 1`, with `*` on groups the caller reacted in.
fn reaction_line(summary: &ReactionSummary) -> Option<String> {
    if summary.groups.is_empty() {
        return None;
    }
    let parts: Vec<String> = summary
        .groups
        .iter()
        .map(|g| {
            let mine = if g.reacted_by_me { "*" } else { "" };
            format!("{} {}{}", g.emoji, g.count, mine)
        })
        .collect();
    Some(parts.join("  "))
}
