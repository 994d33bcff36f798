//! Hot-reload transport.
//!
//! A WebSocket endpoint on its own port. Every connected client gets a
//! `connected` message, then a `reload` after each successful compile.

use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HotMessage {
    Connected,
    Reload,
}

impl HotMessage {
    fn to_json(self) -> String {
        serde_json::to_string(&self).unwrap_or_default()
    }
}

/// Sending half of the transport, shared with the compiler.
#[derive(Debug, Clone)]
pub struct HotReloader {
    tx: broadcast::Sender<HotMessage>,
}

impl Default for HotReloader {
    fn default() -> Self {
        Self::new()
    }
}

impl HotReloader {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(100);
        Self { tx }
    }

    /// Tell every connected client to reload. Returns how many were told.
    pub fn reload(&self) -> usize {
        self.tx.send(HotMessage::Reload).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HotMessage> {
        self.tx.subscribe()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(websocket_handler))
            .with_state(self.clone())
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(reloader): State<HotReloader>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, reloader.subscribe()))
}

async fn websocket_connection(mut socket: WebSocket, mut rx: broadcast::Receiver<HotMessage>) {
    if socket
        .send(Message::Text(HotMessage::Connected.to_json().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(msg) => {
                        if socket.send(Message::Text(msg.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    // A slow client only needs the latest reload
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Hot client disconnected");
}

/// Client script that reloads the page when the transport says so.
pub fn hot_client_script(port: u16) -> String {
    format!(
        r#"(function () {{
  var url = (location.protocol === 'https:' ? 'wss://' : 'ws://') + location.hostname + ':{port}/';
  function connect() {{
    var socket = new WebSocket(url);
    socket.onmessage = function (event) {{
      var message = JSON.parse(event.data);
      if (message.type === 'reload') {{
        location.reload();
      }}
    }};
    socket.onclose = function () {{
      setTimeout(connect, 1000);
    }};
  }}
  connect();
}})();
"#
    )
}
