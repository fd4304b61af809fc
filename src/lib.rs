pub mod api;
pub mod board;
pub mod config;
pub mod errors;
pub mod events;
pub mod expanded;
pub mod mutations;
pub mod position;
pub mod query;
pub mod reactions;
pub mod session;
pub mod telemetry;
pub mod ws;
