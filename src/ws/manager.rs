use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use agentboard_common::{ControlMessage, WsEvent};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::backoff::{Backoff, RECONNECT_BASE, RECONNECT_CEILING};
use super::transport::{Connector, SubscriptionTarget, Transport, endpoint_url, redact};

/// How often to send a liveness ping while the connection is open.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Event type the server uses for heartbeat replies; never dispatched.
const PONG: &str = "pong";

pub type EventHandler = Arc<dyn Fn(&WsEvent) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]. Keep the returned `Arc` to `off` it later.
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&WsEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Dropped; a reconnect is scheduled.
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ws_base: Url,
    pub reconnect_base: Duration,
    pub reconnect_ceiling: Duration,
    pub heartbeat_interval: Duration,
}

impl ConnectionSettings {
    pub fn new(ws_base: Url) -> Self {
        Self {
            ws_base,
            reconnect_base: RECONNECT_BASE,
            reconnect_ceiling: RECONNECT_CEILING,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Subscribers per event type. A handler is identified by its `Arc`.
#[derive(Default)]
struct HandlerRegistry {
    by_type: HashMap<String, Vec<EventHandler>>,
}

impl HandlerRegistry {
    fn add(&mut self, event_type: &str, handler: EventHandler) -> bool {
        let handlers = self.by_type.entry(event_type.to_string()).or_default();
        if handlers.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            return false;
        }
        handlers.push(handler);
        true
    }

    fn remove(&mut self, event_type: &str, handler: &EventHandler) -> bool {
        let Some(handlers) = self.by_type.get_mut(event_type) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            self.by_type.remove(event_type);
        }
        removed
    }

    fn handlers_for(&self, event_type: &str) -> Vec<EventHandler> {
        self.by_type.get(event_type).cloned().unwrap_or_default()
    }

    fn count(&self, event_type: &str) -> usize {
        self.by_type.get(event_type).map_or(0, Vec::len)
    }
}

type SharedRegistry = Arc<RwLock<HandlerRegistry>>;

struct ActiveSession {
    target: SubscriptionTarget,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns at most one live event-stream session at a time.
///
/// `connect` tears down any previous session before starting the next, and
/// `disconnect` returns only after the session task (its socket, heartbeat,
/// and any pending reconnect sleep) is gone. Transport failures never reach
/// the caller; they are retried with [`Backoff`] until `disconnect`.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    handlers: SharedRegistry,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<ActiveSession>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, settings: ConnectionSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            settings,
            handlers: Arc::default(),
            state_tx,
            session: Mutex::new(None),
        }
    }

    /// Start a session for `target`, replacing any current one.
    pub async fn connect(&self, target: SubscriptionTarget, credential: impl Into<String>) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            shutdown(previous).await;
        }

        let credential = credential.into();
        let url = match endpoint_url(&self.settings.ws_base, &target, &credential) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(error = %e, "Cannot build WebSocket endpoint; staying disconnected");
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return;
            }
        };

        let cancel = CancellationToken::new();
        let ctx = SessionContext {
            connector: self.connector.clone(),
            url,
            target,
            handlers: self.handlers.clone(),
            state_tx: self.state_tx.clone(),
            backoff: Backoff::new(self.settings.reconnect_base, self.settings.reconnect_ceiling),
            heartbeat_interval: self.settings.heartbeat_interval,
        };
        let task = tokio::spawn(run_session(ctx, cancel.clone()));
        *session = Some(ActiveSession {
            target,
            cancel,
            task,
        });
    }

    /// End the current session. No reconnect happens afterwards.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            shutdown(previous).await;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    pub async fn target(&self) -> Option<SubscriptionTarget> {
        self.session.lock().await.as_ref().map(|s| s.target)
    }

    /// Register `handler` for `event_type`. Registering the same `Arc` twice
    /// is a no-op; returns whether it was newly added.
    pub fn on(&self, event_type: &str, handler: EventHandler) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(event_type, handler)
    }

    pub fn off(&self, event_type: &str, handler: &EventHandler) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_type, handler)
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .count(event_type)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
            session.task.abort();
        }
    }
}

async fn shutdown(session: ActiveSession) {
    session.cancel.cancel();
    if let Err(e) = session.task.await {
        if e.is_panic() {
            tracing::warn!("WebSocket session task panicked during shutdown");
        }
    }
}

struct SessionContext {
    connector: Arc<dyn Connector>,
    url: Url,
    target: SubscriptionTarget,
    handlers: SharedRegistry,
    state_tx: watch::Sender<ConnectionState>,
    backoff: Backoff,
    heartbeat_interval: Duration,
}

enum SessionEnd {
    Cancelled,
    Dropped,
}

/// Connect, pump, and reconnect until cancelled. This task is the only
/// place a transport or timer of the session lives.
async fn run_session(mut ctx: SessionContext, cancel: CancellationToken) {
    loop {
        ctx.state_tx.send_replace(ConnectionState::Connecting);
        let attempt = tokio::select! {
            _ = cancel.cancelled() => return,
            attempt = ctx.connector.connect(&ctx.url) => attempt,
        };

        match attempt {
            Ok(transport) => {
                ctx.backoff.reset();
                ctx.state_tx.send_replace(ConnectionState::Open);
                tracing::info!(
                    project_id = %ctx.target.project_id,
                    board_id = ?ctx.target.board_id,
                    "WebSocket connected"
                );
                if let SessionEnd::Cancelled = pump(&ctx, transport, &cancel).await {
                    return;
                }
                tracing::warn!(project_id = %ctx.target.project_id, "WebSocket closed");
            }
            Err(e) => {
                tracing::warn!(url = %redact(&ctx.url), error = %e, "WebSocket connect failed");
            }
        }

        ctx.state_tx.send_replace(ConnectionState::Closed);
        let delay = ctx.backoff.next_delay();
        tracing::debug!(delay_ms = delay.as_millis() as u64, "Scheduling WebSocket reconnect");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Subscribe, then forward inbound events and send heartbeats until the
/// stream ends or the session is cancelled.
async fn pump(
    ctx: &SessionContext,
    mut transport: Box<dyn Transport>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let subscribe = ControlMessage::Subscribe {
        project_id: ctx.target.project_id,
        board_id: ctx.target.board_id,
    };
    if send_control(transport.as_mut(), &subscribe).await.is_err() {
        transport.close().await;
        return SessionEnd::Dropped;
    }

    let period = ctx.heartbeat_interval;
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                transport.close().await;
                return SessionEnd::Cancelled;
            }

            _ = heartbeat.tick() => {
                if send_control(transport.as_mut(), &ControlMessage::Ping).await.is_err() {
                    transport.close().await;
                    return SessionEnd::Dropped;
                }
            }

            frame = transport.next_text() => {
                match frame {
                    Some(Ok(text)) => dispatch(&ctx.handlers, &text),
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WebSocket error; closing");
                        transport.close().await;
                        return SessionEnd::Dropped;
                    }
                    None => return SessionEnd::Dropped,
                }
            }
        }
    }
}

async fn send_control(transport: &mut dyn Transport, msg: &ControlMessage) -> anyhow::Result<()> {
    let text = serde_json::to_string(msg)?;
    transport.send_text(text).await
}

/// Deliver one inbound frame to every handler registered for its type.
/// Heartbeat replies and unparseable frames are consumed here.
fn dispatch(handlers: &SharedRegistry, text: &str) {
    if text.trim() == PONG {
        return;
    }
    let event: WsEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "Dropping malformed WebSocket frame");
            return;
        }
    };
    if event.event_type == PONG {
        return;
    }

    let targets = handlers
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .handlers_for(&event.event_type);
    for handler in targets {
        if std::panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
            tracing::warn!(event_type = %event.event_type, "WebSocket event handler panicked");
        }
    }
}
