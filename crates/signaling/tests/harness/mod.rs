//! Signaling test harness
//!
//! Provides infrastructure for integration testing of the coordinator with:
//! - Embedded WebSocket relay server on a random port
//! - Scriptable fake peer links that record every call
//! - A recording signal sink for driving the engine without a network
//!
//! Basic usage pattern:
//!
//! 1. Start a `TestServer` (or build an engine `Fixture`)
//! 2. Point one or more coordinators at `server.url()`
//! 3. Drive traffic with `server.inject()` or the engine's handlers
//! 4. Assert on recorded traffic and link calls

#![allow(dead_code)]

pub mod fake_link;
pub mod test_server;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_signaling::identity::{CredentialSupplier, SessionIdentity};
use peercall_signaling::negotiation::SignalSink;
use peercall_signaling::signaling::WireMessage;

pub use fake_link::{FakeLinkFactory, FakePeerLink};
pub use test_server::TestServer;

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Install a test subscriber once; later calls are no-ops
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Await `future`, failing with a harness timeout
pub async fn within<T>(
    timeout: Duration,
    what: &str,
    future: impl Future<Output = T>,
) -> HarnessResult<T> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| HarnessError::Timeout(what.to_string()))
}

/// Signal sink that records what the engine sends
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<WireMessage>>,
    down: AtomicBool,
    closed: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Simulate the channel being down; sends are rejected
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<WireMessage> {
        self.sent.lock().clone()
    }

    /// Sent messages of one wire type, in order
    pub fn sent_of_kind(&self, kind: &str) -> Vec<WireMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.kind() == kind)
            .cloned()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SignalSink for RecordingSink {
    fn send(&self, message: WireMessage) -> bool {
        if self.down.load(Ordering::SeqCst) || self.is_closed() {
            return false;
        }
        self.sent.lock().push(message);
        true
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Credentials whose refresh always fails (session expired)
pub struct ExpiredCredentials {
    identity: SessionIdentity,
    refreshes: Mutex<u32>,
}

impl ExpiredCredentials {
    pub fn new(token: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: SessionIdentity::new(token, name),
            refreshes: Mutex::new(0),
        })
    }

    pub fn refreshes(&self) -> u32 {
        *self.refreshes.lock()
    }
}

#[async_trait]
impl CredentialSupplier for ExpiredCredentials {
    fn current(&self) -> Option<SessionIdentity> {
        Some(self.identity.clone())
    }

    async fn refresh(&self) -> Option<SessionIdentity> {
        *self.refreshes.lock() += 1;
        None
    }
}
