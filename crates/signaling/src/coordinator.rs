//! Signaling coordinator: the only type the application talks to
//!
//! Wires the channel manager, the negotiation engine and the quality sampler
//! together. The engine runs on a single actor task fed by three queues
//! (application commands, inbound wire messages, peer link events) plus the
//! local media slot while an inbound offer is parked on it. The quality sampler runs on its own timer task and only reads the engine's
//! published snapshot.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SignalingConfig;
use crate::events::CallEvent;
use crate::ice::{IceServerSource, RelayCredentialClient, StaticIceServers};
use crate::identity::CredentialSupplier;
use crate::media::LocalMediaSlot;
use crate::negotiation::engine::{EngineDeps, NegotiationEngine};
use crate::negotiation::state::{EngineSnapshot, NegotiationRole, NegotiationState};
use crate::peer::connection::RtcPeerLinkFactory;
use crate::peer::link::{LinkEvent, PeerLink, PeerLinkFactory};
use crate::quality::QualitySampler;
use crate::signaling::channel::{ChannelManager, ChannelState};
use crate::signaling::protocol::WireMessage;
use crate::{Error, Result};

/// Requests from the application to the engine actor
enum Command {
    DropRemote(oneshot::Sender<()>),
    Terminate(oneshot::Sender<()>),
}

/// Configures and starts a [`SignalingCoordinator`]
pub struct CoordinatorBuilder {
    config: SignalingConfig,
    credentials: Arc<dyn CredentialSupplier>,
    link_factory: Option<Arc<dyn PeerLinkFactory>>,
    ice_source: Option<Arc<dyn IceServerSource>>,
    media: LocalMediaSlot,
}

impl CoordinatorBuilder {
    /// Use a custom peer link factory instead of webrtc-rs
    pub fn with_link_factory(mut self, factory: Arc<dyn PeerLinkFactory>) -> Self {
        self.link_factory = Some(factory);
        self
    }

    /// Use a custom ICE server source instead of the configured endpoint
    pub fn with_ice_source(mut self, source: Arc<dyn IceServerSource>) -> Self {
        self.ice_source = Some(source);
        self
    }

    /// Share an existing local media slot
    pub fn with_local_media(mut self, media: LocalMediaSlot) -> Self {
        self.media = media;
        self
    }

    /// Validate, spawn the tasks and start connecting
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if the configuration does not validate
    /// - [`Error::MissingCredentials`] if the supplier has no identity; nothing is spawned
    pub async fn start(self) -> Result<(SignalingCoordinator, mpsc::UnboundedReceiver<CallEvent>)> {
        self.config.validate()?;
        let identity = self.credentials.current().ok_or_else(|| {
            warn!("No session credentials, coordinator stays inert");
            Error::MissingCredentials
        })?;

        let config = Arc::new(self.config);
        let link_factory: Arc<dyn PeerLinkFactory> = match self.link_factory {
            Some(factory) => factory,
            None => Arc::new(RtcPeerLinkFactory::new(config.ice_candidate_pool_size)),
        };
        let ice_source: Arc<dyn IceServerSource> = match (self.ice_source, &config.relay_credentials_url) {
            (Some(source), _) => source,
            (None, Some(url)) => Arc::new(RelayCredentialClient::new(
                url.clone(),
                &config.fallback_stun_servers,
            )?),
            (None, None) => Arc::new(StaticIceServers::from_stun_urls(&config.fallback_stun_servers)),
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let channel = Arc::new(ChannelManager::new(Arc::clone(&config), self.credentials));

        info!(
            local_name = %identity.display_name(),
            signaling_url = %config.signaling_url,
            "Starting signaling coordinator"
        );

        let (engine, link_events_rx) = NegotiationEngine::new(EngineDeps {
            identity,
            link_factory,
            ice_source,
            signals: channel.clone(),
            media: self.media.clone(),
            events: events_tx.clone(),
        });
        let snapshot = engine.subscribe();

        let tasks = vec![
            tokio::spawn(run_engine(
                engine,
                self.media.clone(),
                commands_rx,
                inbound_rx,
                link_events_rx,
            )),
            tokio::spawn(run_quality_sampler(
                snapshot.clone(),
                Duration::from_millis(config.quality_interval_ms),
                events_tx.clone(),
                shutdown_rx,
            )),
            tokio::spawn(forward_channel_state(channel.subscribe(), events_tx)),
        ];

        let coordinator = SignalingCoordinator {
            channel,
            commands: commands_tx,
            snapshot,
            media: self.media,
            shutdown: shutdown_tx,
            tasks: Mutex::new(tasks),
        };

        // Credentials were checked above; a revocation since then only
        // leaves the channel disconnected.
        if let Err(e) = coordinator.channel.connect(inbound_tx) {
            warn!("Signaling channel not started: {}", e);
        }

        Ok((coordinator, events_rx))
    }
}

/// Two-party call coordinator
pub struct SignalingCoordinator {
    channel: Arc<ChannelManager>,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
    media: LocalMediaSlot,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SignalingCoordinator {
    /// Start configuring a coordinator
    pub fn builder(
        config: SignalingConfig,
        credentials: Arc<dyn CredentialSupplier>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder {
            config,
            credentials,
            link_factory: None,
            ice_source: None,
            media: LocalMediaSlot::new(),
        }
    }

    /// Current peer link, for attaching or replacing tracks
    pub fn peer_link(&self) -> Option<Arc<dyn PeerLink>> {
        self.snapshot.borrow().link.clone()
    }

    /// Slot the application fills with local media
    pub fn local_media(&self) -> &LocalMediaSlot {
        &self.media
    }

    /// Display name of the remote party while a peer link exists
    pub fn remote_party(&self) -> Option<String> {
        self.snapshot.borrow().remote_party.clone()
    }

    /// Negotiation state of the current peer link
    pub fn negotiation_state(&self) -> NegotiationState {
        self.snapshot.borrow().state
    }

    /// Role on the current peer link
    pub fn role(&self) -> NegotiationRole {
        self.snapshot.borrow().role
    }

    /// Full engine snapshot
    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Signaling channel state
    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    /// Drop the peer link, keeping the signaling channel for a new call
    ///
    /// Idempotent.
    pub async fn drop_remote(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::DropRemote(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Hang up and release everything
    ///
    /// Sends `endCall`, closes the peer link and the signaling channel, and
    /// withdraws local media. Idempotent.
    pub async fn terminate(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }

        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Terminate(ack)).is_ok() {
            let _ = done.await;
        }
        // No-op if the engine already closed it
        self.channel.close();
    }
}

impl Drop for SignalingCoordinator {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        self.channel.close();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

async fn run_engine(
    mut engine: NegotiationEngine,
    media: LocalMediaSlot,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inbound: mpsc::UnboundedReceiver<WireMessage>,
    mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
) {
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(Command::Terminate(ack)) => {
                    engine.end_call().await;
                    let _ = ack.send(());
                    break;
                }
                Some(Command::DropRemote(ack)) => {
                    engine.drop_remote().await;
                    let _ = ack.send(());
                }
                None => {
                    engine.end_call().await;
                    break;
                }
            },
            Some(message) = inbound.recv() => engine.handle_message(message).await,
            Some(event) = link_events.recv() => engine.handle_link_event(event).await,
            Ok(local) = media.ready(), if engine.awaiting_local_media() => {
                if let Err(e) = engine.handle_local_media(local).await {
                    warn!("Answering parked offer failed: {}", e);
                }
            }
        }
    }
    debug!("Negotiation engine stopped");
}

async fn run_quality_sampler(
    snapshot: watch::Receiver<EngineSnapshot>,
    period: Duration,
    events: mpsc::UnboundedSender<CallEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sampler = QualitySampler::new();
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        // Re-read on every tick; the link may have been torn down since the last one
        let link = snapshot.borrow().link.clone();
        if let Some(report) = sampler.sample(link.as_ref()).await {
            debug!(score = report.score, "Link quality");
            if events.send(CallEvent::Quality(report)).is_err() {
                break;
            }
        }
    }
}

async fn forward_channel_state(
    mut state: watch::Receiver<ChannelState>,
    events: mpsc::UnboundedSender<CallEvent>,
) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        if events.send(CallEvent::ChannelState(current)).is_err() {
            break;
        }
    }
}
