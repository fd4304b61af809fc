//! Shared domain types for the AgentBoard sync client.
//!
//! Everything here is plain serde data with no I/O: the task model the board
//! cache orders, the reaction summaries the optimistic toggle edits, the REST
//! envelopes, and the push-event envelope carried over the WebSocket.

pub mod envelope;
pub mod event;
pub mod reaction;
pub mod task;

pub use envelope::{ApiErrorBody, ApiErrorEnvelope, ApiResponse, FieldError, Pagination, PaginatedResponse, ResponseMeta};
pub use event::{ControlMessage, EventActor, WsEvent};
pub use reaction::{ReactionGroup, ReactionSummary, ReactionTarget, ReactorBrief, ToggleAction, ToggleResult};
pub use task::{
    AgentBrief, AssigneeBrief, CustomFieldValue, CustomFieldValueSet, Label, Priority, Status,
    Task, TaskCreate, TaskMove, TaskPatch, TaskUpdate, UserBrief,
};
