//! WebSocket signaling channel with keepalive and reconnection
//!
//! One supervisor task owns the connection. Each connection runs a session
//! loop that multiplexes outbound messages, the keepalive timer, inbound
//! frames and shutdown. When a session ends without [`ChannelManager::close`]
//! having been called, the supervisor waits per the [`ReconnectPolicy`] and
//! dials again. Negotiation state lives elsewhere and is untouched by
//! reconnects.
//!
//! [`ReconnectPolicy`]: crate::signaling::reconnect::ReconnectPolicy

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::config::SignalingConfig;
use crate::identity::{CredentialSupplier, SessionIdentity};
use crate::negotiation::engine::SignalSink;
use crate::signaling::protocol::{self, Inbound, WireMessage};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const KEEPALIVE: &str = r#"{"type":"ping"}"#;

/// Connectivity of the signaling channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Not connected (initial, between reconnects, or after close)
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Connected; messages can be sent
    Open,
    /// Deliberate teardown in progress
    Closing,
}

/// State shared between the manager handle and its supervisor task
struct Shared {
    state: watch::Sender<ChannelState>,
    closing: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    shutdown: watch::Sender<bool>,
    connection_attempts: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ChannelState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            debug!("Signaling channel {:?} -> {:?}", *state, next);
            *state = next;
            true
        });
    }
}

/// Owns the signaling connection
pub struct ChannelManager {
    config: Arc<SignalingConfig>,
    credentials: Arc<dyn CredentialSupplier>,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelManager {
    /// Create a manager; nothing is dialed until [`connect`](Self::connect)
    pub fn new(config: Arc<SignalingConfig>, credentials: Arc<dyn CredentialSupplier>) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            credentials,
            shared: Arc::new(Shared {
                state,
                closing: AtomicBool::new(false),
                outbound: Mutex::new(None),
                shutdown,
                connection_attempts: AtomicU64::new(0),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Start connecting; inbound messages are forwarded to `inbound` in arrival order
    ///
    /// `ping` frames are consumed here and never forwarded.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingCredentials`] if the supplier has no identity
    /// - [`Error::ChannelClosed`] if the channel was already closed
    pub fn connect(&self, inbound: mpsc::UnboundedSender<WireMessage>) -> Result<()> {
        if self.shared.closing.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed);
        }
        if self.credentials.current().is_none() {
            warn!("No session credentials, signaling channel stays disconnected");
            return Err(Error::MissingCredentials);
        }

        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Signaling channel already running");
            return Ok(());
        }

        *supervisor = Some(tokio::spawn(supervise(
            Arc::clone(&self.config),
            Arc::clone(&self.credentials),
            Arc::clone(&self.shared),
            inbound,
        )));
        Ok(())
    }

    /// Send a message if the channel is open
    ///
    /// Returns `false` without queueing when the channel is not open.
    pub fn send(&self, message: WireMessage) -> bool {
        if self.state() != ChannelState::Open {
            warn!("Signaling channel not open, dropping {} message", message.kind());
            return false;
        }

        let text = match protocol::encode(&message) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} message: {}", message.kind(), e);
                return false;
            }
        };

        match self.shared.outbound.lock().as_ref() {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    /// Close the channel for good; no reconnect follows
    ///
    /// Idempotent.
    pub fn close(&self) {
        if self.shared.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Closing signaling channel");

        let running = self
            .supervisor
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished());
        if running {
            self.shared.set_state(ChannelState::Closing);
        } else {
            self.shared.set_state(ChannelState::Disconnected);
        }
        self.shared.shutdown.send_replace(true);
    }

    /// Current channel state
    pub fn state(&self) -> ChannelState {
        *self.shared.state.borrow()
    }

    /// Watch channel state changes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Number of connection attempts made so far
    pub fn connection_attempts(&self) -> u64 {
        self.shared.connection_attempts.load(Ordering::SeqCst)
    }
}

impl SignalSink for ChannelManager {
    fn send(&self, message: WireMessage) -> bool {
        ChannelManager::send(self, message)
    }

    fn close(&self) {
        ChannelManager::close(self)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.shutdown.send_replace(true);
        if let Some(task) = self.supervisor.lock().take() {
            task.abort();
        }
    }
}

/// How a connected session ended
enum SessionEnd {
    /// Closed locally via shutdown
    Shutdown,
    /// Dropped by the server or the network
    Lost,
}

async fn supervise(
    config: Arc<SignalingConfig>,
    credentials: Arc<dyn CredentialSupplier>,
    shared: Arc<Shared>,
    inbound: mpsc::UnboundedSender<WireMessage>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut failures: u32 = 0;

    loop {
        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
        let Some(identity) = credentials.current() else {
            warn!("Session credentials gone, not reconnecting");
            break;
        };
        let url = match config.channel_url(identity.token()) {
            Ok(url) => url,
            Err(e) => {
                error!("Cannot build signaling URL: {}", e);
                break;
            }
        };

        shared.set_state(ChannelState::Connecting);
        let attempt = shared.connection_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        info!(attempt, "Connecting to signaling server: {}", config.signaling_url);

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = shutdown.changed() => break,
        };

        match connected {
            Ok((ws_stream, _response)) => {
                failures = 0;
                let end = run_session(
                    ws_stream,
                    &identity,
                    &shared,
                    &inbound,
                    Duration::from_millis(config.keepalive_interval_ms),
                    &mut shutdown,
                )
                .await;
                *shared.outbound.lock() = None;
                if matches!(end, SessionEnd::Shutdown) {
                    break;
                }
            }
            Err(e) => {
                let err = Error::from(e);
                warn!("Signaling connection failed: {}", err);
                if !err.is_retryable() {
                    break;
                }
                if let Error::HandshakeRejected(401 | 403) = err {
                    info!("Signaling token rejected, asking for fresh credentials");
                    if credentials.refresh().await.is_none() {
                        warn!("No fresh credentials available, not reconnecting");
                        break;
                    }
                }
                failures = failures.saturating_add(1);
            }
        }

        if shared.closing.load(Ordering::SeqCst) {
            break;
        }
        shared.set_state(ChannelState::Disconnected);

        if !config.reconnect.should_retry(failures) {
            warn!(failures, "Giving up on signaling reconnection");
            break;
        }

        let delay = config.reconnect.delay_for(failures);
        info!(
            delay_ms = delay.as_millis() as u64,
            "Signaling channel down, reconnecting"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    *shared.outbound.lock() = None;
    shared.set_state(ChannelState::Disconnected);
    debug!("Signaling supervisor stopped");
}

async fn run_session(
    ws_stream: WsStream,
    identity: &SessionIdentity,
    shared: &Shared,
    inbound: &mpsc::UnboundedSender<WireMessage>,
    keepalive_period: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut write, mut read) = ws_stream.split();

    let hello = WireMessage::Hello {
        from: Some(identity.display_name().to_string()),
    };
    let greeting = match protocol::encode(&hello) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode hello: {}", e);
            return SessionEnd::Lost;
        }
    };
    if let Err(e) = write.send(Message::Text(greeting)).await {
        warn!("Failed to send hello: {}", e);
        return SessionEnd::Lost;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *shared.outbound.lock() = Some(tx);
    shared.set_state(ChannelState::Open);
    info!("Signaling channel open");

    let mut keepalive = interval_at(Instant::now() + keepalive_period, keepalive_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Flush what was queued before close, endCall in particular
                while let Ok(message) = rx.try_recv() {
                    if write.send(message).await.is_err() {
                        break;
                    }
                }
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            Some(message) = rx.recv() => {
                if let Err(e) = write.send(message).await {
                    warn!("Failed to send signaling message: {}", e);
                    return SessionEnd::Lost;
                }
            }
            _ = keepalive.tick() => {
                trace!("Sending keepalive");
                if let Err(e) = write.send(Message::Text(KEEPALIVE.to_string())).await {
                    warn!("Failed to send keepalive: {}", e);
                    return SessionEnd::Lost;
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => dispatch(&text, inbound),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => dispatch(&text, inbound),
                    Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("Signaling server closed the connection: {:?}", frame);
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Signaling WebSocket error: {}", e);
                    return SessionEnd::Lost;
                }
                None => {
                    info!("Signaling stream ended");
                    return SessionEnd::Lost;
                }
            },
        }
    }
}

fn dispatch(text: &str, inbound: &mpsc::UnboundedSender<WireMessage>) {
    match protocol::decode(text) {
        Ok(Inbound::Message(WireMessage::Ping)) => trace!("Keepalive received"),
        Ok(Inbound::Message(message)) => {
            debug!("Received {} message", message.kind());
            if inbound.send(message).is_err() {
                debug!("Inbound receiver gone, dropping message");
            }
        }
        Ok(Inbound::Unknown(kind)) => warn!("Unknown signaling message type: {}", kind),
        Ok(Inbound::Untyped) => debug!("Dropping signaling message without a type"),
        Err(e) => warn!("Failed to parse signaling message: {}", e),
    }
}
