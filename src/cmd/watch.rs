//! Live board follower (`agentboard watch`).

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;

use agentboard::config::Settings;
use agentboard::ws::ConnectionState;

use super::short_id;
use crate::BoardRef;

pub async fn cmd_watch(settings: &Settings, target: BoardRef) -> Result<()> {
    let (session, connection) = super::open_session(settings, target.project, target.board).await?;

    let columns = session.statuses().len();
    let tasks = session.board().with(|store| store.len());
    println!(
        "{} {} ({} columns, {} tasks). Ctrl-C to stop.",
        console::style("Watching board").bold().cyan(),
        short_id(target.board),
        columns,
        tasks
    );

    let mut notices = session.subscribe_notices();
    let mut refreshes = session.subscribe_refreshes();
    let mut state = connection.subscribe_state();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            notice = notices.recv() => match notice {
                Ok(notice) => println!("{} {}", console::style("•").green(), notice),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Notice stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
            changed = refreshes.changed() => {
                if changed.is_err() {
                    break;
                }
                let tasks = session.board().with(|store| store.len());
                println!("{}", console::style(format!("board refreshed: {} tasks", tasks)).dim());
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                match current {
                    ConnectionState::Open => println!("{}", console::style("connected").green()),
                    ConnectionState::Closed => {
                        println!("{}", console::style("connection lost, reconnecting").yellow())
                    }
                    ConnectionState::Connecting | ConnectionState::Disconnected => {}
                }
            }
        }
    }

    session.release().await;
    println!("Stopped.");
    Ok(())
}
