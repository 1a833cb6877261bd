//! Reconnecting WebSocket client for the hub's change stream

use std::time::Duration;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Message, client::IntoClientRequest, http::Uri},
};
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// What the app loop hears from the stream
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A (re)connection succeeded; local state should be re-fetched
    Connected,

    /// Raw change message text
    Message(String),

    Disconnected,
}

pub struct SyncClient {
    url: String,
    auth_token: Option<String>,
}

impl SyncClient {
    pub fn new(api_url: &str, auth_token: Option<String>) -> Self {
        let ws_url = api_url
            .trim_end_matches('/')
            .replace("http://", "ws://")
            .replace("https://", "wss://");

        Self {
            url: format!("{ws_url}/api/stream"),
            auth_token,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start streaming; the task reconnects until the receiver is dropped
    pub fn connect(self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.run(tx));
        rx
    }

    async fn run(self, tx: mpsc::UnboundedSender<SyncEvent>) {
        loop {
            info!("Connecting to change stream: {}", self.url);

            match self.connect_once(&tx).await {
                Ok(()) => info!("Change stream disconnected, reconnecting in 5s..."),
                Err(e) => error!("Change stream error: {e:#}. Reconnecting in 5s..."),
            }

            if tx.is_closed() {
                debug!("sync receiver dropped, stopping");
                return;
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_once(&self, tx: &mpsc::UnboundedSender<SyncEvent>) -> Result<()> {
        let url = match &self.auth_token {
            Some(token) => format!("{}?token={token}", self.url),
            None => self.url.clone(),
        };

        let uri: Uri = url.parse().context("Failed to parse WebSocket URL")?;
        let host = uri
            .authority()
            .ok_or_else(|| anyhow::anyhow!("WebSocket URL missing host"))?
            .to_string();
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| anyhow::anyhow!("WebSocket URL missing scheme"))?;
        let origin_scheme = if scheme == "wss" { "https" } else { "http" };
        let origin = format!("{origin_scheme}://{host}");

        let mut request = url
            .as_str()
            .into_client_request()
            .context("Failed to create WebSocket request")?;
        let headers = request.headers_mut();
        headers.insert(
            "Origin",
            origin.parse().context("Failed to parse Origin header value")?,
        );
        if let Some(token) = &self.auth_token {
            headers.insert(
                "Authorization",
                format!("Bearer {token}")
                    .parse()
                    .context("Failed to parse Authorization header value")?,
            );
        }

        let (ws_stream, _) = connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to {} (host: {host})", self.url))?;

        info!("Change stream connected");
        if tx.send(SyncEvent::Connected).is_err() {
            return Ok(());
        }

        let (mut write, mut read) = ws_stream.split();

        let ping_task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(KEEPALIVE_INTERVAL).await;
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        });

        let result = async {
            while let Some(msg) = read.next().await {
                match msg.context("WebSocket message error")? {
                    Message::Text(text) => {
                        if tx.send(SyncEvent::Message(text.to_string())).is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => {
                        info!("Change stream closed by hub");
                        break;
                    }
                    Message::Binary(_) => warn!("ignoring binary frame"),
                    _ => {}
                }
            }
            Ok(())
        }
        .await;

        ping_task.abort();
        let _ = tx.send(SyncEvent::Disconnected);
        result
    }
}
