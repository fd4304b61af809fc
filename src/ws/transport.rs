use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;
use uuid::Uuid;

/// What a session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionTarget {
    pub project_id: Uuid,
    pub board_id: Option<Uuid>,
}

impl SubscriptionTarget {
    pub fn board(project_id: Uuid, board_id: Uuid) -> Self {
        Self {
            project_id,
            board_id: Some(board_id),
        }
    }

    pub fn project(project_id: Uuid) -> Self {
        Self {
            project_id,
            board_id: None,
        }
    }
}

/// `<ws_base>/api/v1/ws?token=..&project_id=..[&board_id=..]`
pub fn endpoint_url(ws_base: &Url, target: &SubscriptionTarget, credential: &str) -> Result<Url> {
    let mut url = ws_base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("WebSocket base URL cannot carry a path: {}", ws_base))?
        .pop_if_empty()
        .extend(["api", "v1", "ws"]);
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        query.append_pair("token", credential);
        query.append_pair("project_id", &target.project_id.to_string());
        if let Some(board_id) = target.board_id {
            query.append_pair("board_id", &board_id.to_string());
        }
    }
    Ok(url)
}

/// One live bidirectional text stream.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next inbound text frame. `None` once the peer closed the stream.
    async fn next_text(&mut self) -> Option<Result<String>>;

    /// Best-effort close; never fails.
    async fn close(&mut self);
}

/// Opens transports. Real implementation: [`TungsteniteConnector`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .with_context(|| format!("Failed to open WebSocket to {}", redact(url)))?;
        Ok(Box::new(TungsteniteTransport { stream }))
    }
}

struct TungsteniteTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("WebSocket send failed")
    }

    async fn next_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Close(_)) => return None,
                // Ping replies are queued by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {
                    continue;
                }
                Err(e) => return Some(Err(anyhow!(e).context("WebSocket receive failed"))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// URL with the credential query value masked, for logs and errors.
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    if !pairs.is_empty() {
        shown.query_pairs_mut().clear().extend_pairs(pairs);
    }
    shown.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_with_board() {
        let base = Url::parse("ws://localhost:8000").unwrap();
        let target = SubscriptionTarget::board(Uuid::from_u128(1), Uuid::from_u128(2));
        let url = endpoint_url(&base, &target, "tok en").unwrap();
        assert_eq!(url.path(), "/api/v1/ws");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs[0], ("token".into(), "tok en".into()));
        assert_eq!(pairs[1].1, Uuid::from_u128(1).to_string());
        assert_eq!(pairs[2].0, "board_id");
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let base = Url::parse("wss://example.com/board/").unwrap();
        let target = SubscriptionTarget::project(Uuid::from_u128(1));
        let url = endpoint_url(&base, &target, "t").unwrap();
        assert_eq!(url.path(), "/board/api/v1/ws");
        assert!(!url.as_str().contains("board_id"));
    }

    #[test]
    fn test_endpoint_url_rejects_opaque_base() {
        let base = Url::parse("mailto:someone@example.com").unwrap();
        let target = SubscriptionTarget::project(Uuid::from_u128(1));
        assert!(endpoint_url(&base, &target, "t").is_err());
    }

    #[test]
    fn test_redact_masks_token() {
        let url = Url::parse("ws://h/api/v1/ws?token=secret&project_id=p").unwrap();
        let shown = redact(&url);
        assert!(!shown.contains("secret"));
        assert!(shown.contains("project_id=p"));
    }
}
