use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use uuid::Uuid;

use agentboard::board::DueDatePreset;
use agentboard::config::{CliOverrides, Settings};
use agentboard_common::Priority;

mod cmd;

#[derive(Parser)]
#[command(name = "agentboard")]
#[command(version, about = "Real-time AgentBoard sync client")]
pub struct Cli {
    /// Path to agentboard.toml (defaults to ./agentboard.toml, then the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// REST base URL, e.g. https://board.example.com
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// WebSocket base URL (derived from --api-url when omitted)
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// API token. Prefer AGENTBOARD_TOKEN so it stays out of shell history.
    #[arg(long, global = true)]
    pub token: Option<String>,

    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level or filter directives. RUST_LOG wins when set.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            api_url: self.api_url.clone(),
            ws_url: self.ws_url.clone(),
            token: self.token.clone(),
            data_dir: self.data_dir.clone(),
            log_level: self.log_level.clone(),
            json_logs: self.json_logs,
        }
    }
}

#[derive(clap::Args, Clone, Copy)]
pub struct BoardRef {
    #[arg(long)]
    pub project: Uuid,
    #[arg(long)]
    pub board: Uuid,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch a board and print its columns
    Board {
        #[command(flatten)]
        target: BoardRef,

        /// Case-insensitive match on the task title
        #[arg(long)]
        search: Option<String>,

        /// Only these priorities (comma-separated)
        #[arg(long, value_delimiter = ',')]
        priority: Vec<Priority>,

        /// Only tasks assigned to this user or agent id
        #[arg(long)]
        assignee: Option<Uuid>,

        /// Include tasks with no assignees
        #[arg(long)]
        unassigned: bool,

        /// Only tasks carrying any of these label ids (comma-separated)
        #[arg(long, value_delimiter = ',')]
        label: Vec<Uuid>,

        /// Due date presets: overdue, today, this_week, next_week, no_date
        #[arg(long, value_delimiter = ',')]
        due: Vec<DueDatePreset>,

        /// Toggle a task's expanded row (remembered per board)
        #[arg(long)]
        expand: Vec<Uuid>,
    },
    /// Print one task with its reactions
    Show {
        #[command(flatten)]
        target: BoardRef,

        #[arg(long)]
        task: Uuid,
    },
    /// Follow a board live and print what changes
    Watch {
        #[command(flatten)]
        target: BoardRef,
    },
    /// Move a task to an index within a status column
    Move {
        #[command(flatten)]
        target: BoardRef,

        #[arg(long)]
        task: Uuid,

        /// Destination status id
        #[arg(long)]
        to: Uuid,

        /// Index in the destination column, counted without the moving task
        #[arg(long)]
        index: usize,
    },
    /// Compute the position for an insert into an ordered column
    Position {
        /// Existing positions in the column
        positions: Vec<f64>,

        #[arg(long)]
        index: usize,
    },
    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Print the resolved configuration
    Show,
    /// Write a default agentboard.toml in the current directory
    Init {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Pure computation; needs no configuration.
    if let Commands::Position { positions, index } = &cli.command {
        return cmd::cmd_position(positions, *index);
    }
    if let Commands::Config {
        command: Some(ConfigCommands::Init { force }),
    } = &cli.command
    {
        return cmd::cmd_config_init(*force);
    }

    let settings = Settings::load(cli.config.as_deref(), cli.overrides())?;
    let _telemetry = agentboard::telemetry::init(&settings.logging);

    match &cli.command {
        Commands::Board {
            target,
            search,
            priority,
            assignee,
            unassigned,
            label,
            due,
            expand,
        } => {
            let filters = cmd::BoardFilters {
                search: search.clone(),
                priorities: priority.clone(),
                assignee: *assignee,
                unassigned: *unassigned,
                labels: label.clone(),
                due: due.clone(),
            };
            cmd::cmd_board(&settings, *target, filters, expand).await?;
        }
        Commands::Show { target, task } => cmd::cmd_show(&settings, *target, *task).await?,
        Commands::Watch { target } => cmd::cmd_watch(&settings, *target).await?,
        Commands::Move {
            target,
            task,
            to,
            index,
        } => cmd::cmd_move(&settings, *target, *task, *to, *index).await?,
        Commands::Config { .. } => cmd::cmd_config_show(&settings),
        Commands::Position { .. } => {}
    }

    Ok(())
}
