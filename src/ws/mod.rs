//! Live board event stream.
//!
//! [`ConnectionManager`] keeps one WebSocket session open for the board or
//! project being viewed, re-subscribes after every reconnect, and fans
//! inbound events out to handlers keyed by event type.

mod backoff;
mod manager;
mod transport;

pub use backoff::{Backoff, RECONNECT_BASE, RECONNECT_CEILING};
pub use manager::{
    ConnectionManager, ConnectionSettings, ConnectionState, EventHandler, HEARTBEAT_INTERVAL,
    handler,
};
pub use transport::{
    Connector, SubscriptionTarget, Transport, TungsteniteConnector, endpoint_url, redact,
};
