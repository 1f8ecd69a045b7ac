//! Embedded signaling relay for integration tests
//!
//! Accepts WebSocket connections on a random port, checks the `token` query
//! parameter and relays every text frame to all other connected clients.
//! Keepalive pings are recorded but not relayed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};

use super::{HarnessError, HarnessResult};

/// A frame received by the relay
#[derive(Debug, Clone)]
pub struct Received {
    /// Connection that sent it
    pub client: u64,
    /// Token that connection authenticated with
    pub token: String,
    /// Parsed JSON payload
    pub message: Value,
}

impl Received {
    pub fn kind(&self) -> Option<&str> {
        self.message.get("type").and_then(Value::as_str)
    }
}

#[derive(Default)]
struct RelayState {
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    received: Mutex<Vec<Received>>,
    allowed_tokens: Option<Vec<String>>,
    next_client: AtomicU64,
    handshakes: AtomicU64,
    rejections: AtomicU64,
}

/// Embedded relay server
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<RelayState>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Start a relay accepting any non-empty token
    pub async fn start() -> HarnessResult<Self> {
        Self::start_with(None).await
    }

    /// Start a relay accepting only the listed tokens; others get HTTP 401
    pub async fn with_tokens(tokens: &[&str]) -> HarnessResult<Self> {
        Self::start_with(Some(tokens.iter().map(|t| t.to_string()).collect())).await
    }

    async fn start_with(allowed_tokens: Option<Vec<String>>) -> HarnessResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| HarnessError::ServerError(format!("Failed to bind: {}", e)))?;
        let addr = listener.local_addr()?;

        let state = Arc::new(RelayState {
            allowed_tokens,
            ..Default::default()
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle_connection(stream, Arc::clone(&accept_state)));
            }
        });

        info!("Test relay listening on {}", addr);
        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    /// Signaling URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}/api/signal", self.addr)
    }

    /// WebSocket handshakes attempted, accepted or not
    pub fn handshakes(&self) -> u64 {
        self.state.handshakes.load(Ordering::SeqCst)
    }

    /// Handshakes rejected for a bad or missing token
    pub fn rejections(&self) -> u64 {
        self.state.rejections.load(Ordering::SeqCst)
    }

    /// Currently connected clients
    pub fn connected_clients(&self) -> usize {
        self.state.clients.lock().len()
    }

    /// Every frame received so far, in arrival order
    pub fn received(&self) -> Vec<Received> {
        self.state.received.lock().clone()
    }

    /// Frames of one `type`, in arrival order
    pub fn received_of_type(&self, kind: &str) -> Vec<Received> {
        self.state
            .received
            .lock()
            .iter()
            .filter(|r| r.kind() == Some(kind))
            .cloned()
            .collect()
    }

    /// Send a raw text frame to every connected client
    pub fn inject(&self, text: &str) {
        for tx in self.state.clients.lock().values() {
            let _ = tx.send(Message::Text(text.to_string()));
        }
    }

    /// Close every connection from the server side
    pub fn kick_all(&self) {
        // Dropping the senders makes each writer send a close frame
        self.state.clients.lock().clear();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.kick_all();
    }
}

fn token_from(request: &Request) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}

async fn handle_connection(stream: TcpStream, state: Arc<RelayState>) {
    state.handshakes.fetch_add(1, Ordering::SeqCst);

    let mut token = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        token = token_from(request);
        let permitted = match (&state.allowed_tokens, &token) {
            (None, Some(_)) => true,
            (Some(allowed), Some(t)) => allowed.iter().any(|a| a == t),
            _ => false,
        };
        if permitted {
            Ok(response)
        } else {
            state.rejections.fetch_add(1, Ordering::SeqCst);
            let mut rejection = ErrorResponse::new(Some("unauthorized".to_string()));
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejection)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("Test relay handshake failed: {}", e);
            return;
        }
    };
    let token = token.unwrap_or_default();

    let id = state.next_client.fetch_add(1, Ordering::SeqCst) + 1;
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.clients.lock().insert(id, tx);
    debug!(client = id, "Test relay client connected");

    let (mut write, mut read) = ws.split();
    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if write.send(message).await.is_err() {
                return;
            }
        }
        let _ = write.send(Message::Close(None)).await;
    });

    while let Some(Ok(frame)) = read.next().await {
        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(message) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        let is_ping = message.get("type").and_then(Value::as_str) == Some("ping");

        state.received.lock().push(Received {
            client: id,
            token: token.clone(),
            message,
        });

        if !is_ping {
            for (other, tx) in state.clients.lock().iter() {
                if *other != id {
                    let _ = tx.send(Message::Text(text.clone()));
                }
            }
        }
    }

    state.clients.lock().remove(&id);
    let _ = writer.await;
    debug!(client = id, "Test relay client disconnected");
}
