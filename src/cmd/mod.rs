//! CLI command implementations.
//!
//! | Module      | Commands handled  |
//! |-------------|-------------------|
//! | `board`     | `Board`           |
//! | `watch`     | `Watch`           |
//! | `move_task` | `Move`            |
//! | `show`      | `Show`            |
//! | `position`  | `Position`        |
//! | `config`    | `Config`          |

pub mod board;
pub mod config;
pub mod move_task;
pub mod position;
pub mod show;
pub mod watch;

use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use agentboard::api::{BoardApi, HttpBoardApi};
use agentboard::config::Settings;
use agentboard::session::BoardSession;
use agentboard::ws::{ConnectionManager, TungsteniteConnector};

pub use board::{BoardFilters, cmd_board};
pub use config::{cmd_config_init, cmd_config_show};
pub use move_task::cmd_move;
pub use position::cmd_position;
pub use show::cmd_show;
pub use watch::cmd_watch;

/// First eight characters of an id, enough to tell rows apart.
pub fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

pub fn http_api(settings: &Settings) -> Result<HttpBoardApi> {
    Ok(HttpBoardApi::new(&settings.api_url, settings.require_token()?))
}

/// Open a live session on `project_id`/`board_id` over a fresh connection.
pub async fn open_session(
    settings: &Settings,
    project_id: Uuid,
    board_id: Uuid,
) -> Result<(BoardSession, Arc<ConnectionManager>)> {
    let token = settings.require_token()?;
    let api: Arc<dyn BoardApi> = Arc::new(HttpBoardApi::new(&settings.api_url, token));
    let connection = Arc::new(ConnectionManager::new(
        Arc::new(TungsteniteConnector),
        settings.connection_settings(),
    ));
    let session = BoardSession::acquire(api, connection.clone(), project_id, board_id, token).await?;
    Ok((session, connection))
}
