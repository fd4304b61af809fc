//! Allocator-driven move (`agentboard move`).

use anyhow::Result;
use uuid::Uuid;

use agentboard::config::Settings;

use super::short_id;
use crate::BoardRef;

pub async fn cmd_move(
    settings: &Settings,
    target: BoardRef,
    task_id: Uuid,
    to_status: Uuid,
    index: usize,
) -> Result<()> {
    let (session, _connection) = super::open_session(settings, target.project, target.board).await?;
    let result = session
        .mutations()
        .move_task_to_index(task_id, to_status, index)
        .await;

    let outcome = match result {
        Ok(task) => {
            println!(
                "{} {} → {} at position {}",
                console::style("Moved").green().bold(),
                short_id(task.id),
                task.status.name,
                task.position
            );
            Ok(())
        }
        Err(e) => {
            println!(
                "{} {}",
                console::style("Move failed, board restored:").red().bold(),
                e.user_message()
            );
            Err(e.into())
        }
    };

    session.release().await;
    outcome
}
