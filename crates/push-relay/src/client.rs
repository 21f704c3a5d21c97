//! Push-channel connection manager.

use crate::{
    ChannelDispatcher, Connector, Dispatch, Frame, HandlerId, InboundMessage, OutboundMessage,
    ReconnectPolicy, RelayError, RelayResult, Reserved, TransportLink, WebSocketConnector,
    WILDCARD,
};
use parking_lot::{Mutex, RwLock};
use pm_config_and_utils::{RelaySettings, DEFAULT_WS_URL};
use std::future::pending;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Connection manager configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Push-channel URL (e.g., ws://localhost:48293/ws).
    pub url: String,
    /// Interval between `ping` messages while connected.
    pub heartbeat_interval: Duration,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Reconnect when no `pong` follows a `ping` within this window.
    /// `None` relies on the transport alone to detect a dead peer.
    pub pong_timeout: Option<Duration>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_WS_URL.to_string(),
            heartbeat_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
            pong_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl RelayConfig {
    /// Build from file/env settings.
    pub fn from_settings(url: impl Into<String>, settings: &RelaySettings) -> Self {
        Self {
            url: url.into(),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs.max(1)),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
                max_attempts: settings.max_reconnect_attempts,
            },
            pong_timeout: match settings.pong_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Torn down by the caller. Only `connect()` leaves this state.
    Closed,
}

/// Lifecycle events emitted by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Transport open and subscription sent.
    Connected,
    /// Transport closed, failed to open, or missed a pong.
    Disconnected { reason: String },
    /// Reconnect attempt `attempt` will start after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// Attempt ceiling reached; no further automatic reconnects.
    ReconnectExhausted,
    /// Caller-initiated teardown finished.
    Closed,
}

struct Shared {
    state: RwLock<ConnectionState>,
    attempts: AtomicU32,
    exhausted: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    /// Intentionally-closed flag. Checked by the supervisor after every
    /// await, so a reconnect timer that already fired is still a no-op.
    closing: watch::Sender<bool>,
    event_tx: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Owner of the single push-channel connection.
///
/// A supervisor task runs connect, session and backoff in sequence, so at
/// most one transport is open or pending at a time. Every successful
/// connect re-declares the registered channels because the server keeps no
/// subscription state across connections.
pub struct ConnectionManager {
    config: RelayConfig,
    connector: Arc<dyn Connector>,
    dispatcher: ChannelDispatcher,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager over the given transport.
    pub fn new(config: RelayConfig, connector: Arc<dyn Connector>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (closing, _) = watch::channel(false);

        Self {
            config,
            connector,
            dispatcher: ChannelDispatcher::new(),
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                attempts: AtomicU32::new(0),
                exhausted: AtomicBool::new(false),
                outbound: Mutex::new(None),
                closing,
                event_tx,
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Create a manager over WebSocket.
    pub fn with_websocket(config: RelayConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether automatic reconnection gave up.
    pub fn is_exhausted(&self) -> bool {
        self.shared.exhausted.load(Ordering::SeqCst)
    }

    /// Reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// The handler registry fed by this connection.
    pub fn dispatcher(&self) -> &ChannelDispatcher {
        &self.dispatcher
    }

    /// Register a handler for a message type or [`WILDCARD`].
    ///
    /// A channel registered while connected is subscribed to right away.
    pub fn on<F>(&self, kind: &str, handler: F) -> HandlerId
    where
        F: Fn(&InboundMessage) + Send + Sync + 'static,
    {
        let new_channel = kind != WILDCARD && !self.dispatcher.has_handlers(kind);
        let id = self.dispatcher.on(kind, handler);

        if new_channel && self.is_connected() {
            let subscribe = OutboundMessage::Subscribe {
                channels: vec![kind.to_string()],
            };
            if let Err(e) = self.send(&subscribe) {
                warn!(channel = %kind, error = %e, "Failed to subscribe to new channel");
            }
        }
        id
    }

    /// Unregister a handler.
    pub fn off(&self, id: HandlerId) -> bool {
        self.dispatcher.off(id)
    }

    /// Queue a message on the open transport.
    pub fn send(&self, message: &OutboundMessage) -> RelayResult<()> {
        let json = message.to_json()?;
        let outbound = self.shared.outbound.lock();
        let outbound = outbound.as_ref().ok_or(RelayError::NotConnected)?;
        outbound
            .try_send(json)
            .map_err(|e| RelayError::Send(e.to_string()))
    }

    /// Start connecting in the background.
    ///
    /// No-op while a connection is open, opening, or waiting to reconnect.
    /// After exhaustion this makes a fresh attempt; the attempt counter is
    /// only reset by a successful connect. Must be called from within a
    /// Tokio runtime.
    pub fn connect(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Already connecting or connected");
            return;
        }

        self.shared.closing.send_replace(false);
        self.shared.exhausted.store(false, Ordering::SeqCst);

        let task = Supervisor {
            url: self.config.url.clone(),
            heartbeat_interval: self.config.heartbeat_interval,
            policy: self.config.reconnect,
            pong_timeout: self.config.pong_timeout,
            connector: self.connector.clone(),
            dispatcher: self.dispatcher.clone(),
            shared: self.shared.clone(),
            closing: self.shared.closing.subscribe(),
        };
        *supervisor = Some(tokio::spawn(task.run()));
    }

    /// Close the connection and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        self.shared.closing.send_replace(true);

        let task = self.supervisor.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        *self.shared.outbound.lock() = None;
        self.shared.set_state(ConnectionState::Closed);

        info!("Disconnected from push channel");
        self.shared.emit(ConnectionEvent::Closed);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.closing.send_replace(true);
    }
}

static SHARED: OnceLock<Arc<ConnectionManager>> = OnceLock::new();

/// The process-wide connection manager over WebSocket.
///
/// Created on first call; `config` is ignored afterwards.
pub fn shared(config: RelayConfig) -> Arc<ConnectionManager> {
    SHARED
        .get_or_init(|| Arc::new(ConnectionManager::with_websocket(config)))
        .clone()
}

struct Supervisor {
    url: String,
    heartbeat_interval: Duration,
    policy: ReconnectPolicy,
    pong_timeout: Option<Duration>,
    connector: Arc<dyn Connector>,
    dispatcher: ChannelDispatcher,
    shared: Arc<Shared>,
    closing: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            if *self.closing.borrow() {
                break;
            }

            self.shared.set_state(ConnectionState::Connecting);
            info!(url = %self.url, "Connecting to push channel");

            let opened = tokio::select! {
                biased;
                _ = closed(&mut self.closing) => break,
                result = self.connector.connect(&self.url) => result,
            };

            let reason = match opened {
                Ok(link) => self.run_session(link).await,
                Err(e) => {
                    warn!(error = %e, "Push channel connect failed");
                    e.to_string()
                }
            };

            *self.shared.outbound.lock() = None;
            self.shared.set_state(ConnectionState::Disconnected);
            self.shared
                .emit(ConnectionEvent::Disconnected { reason: reason.clone() });

            if *self.closing.borrow() {
                break;
            }
            info!(reason = %reason, "Push channel disconnected");

            let attempt = self.shared.attempts.load(Ordering::SeqCst);
            let Some(delay) = self.policy.delay_for(attempt) else {
                self.shared.exhausted.store(true, Ordering::SeqCst);
                warn!(attempts = attempt, "Max reconnect attempts reached");
                self.shared.emit(ConnectionEvent::ReconnectExhausted);
                break;
            };

            let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            self.shared
                .emit(ConnectionEvent::ReconnectScheduled { attempt, delay });

            tokio::select! {
                biased;
                _ = closed(&mut self.closing) => break,
                _ = sleep(delay) => {}
            }
        }

        debug!("Connection supervisor exited");
    }

    /// Drive one open transport. Returns the disconnect reason.
    async fn run_session(&mut self, link: TransportLink) -> String {
        let TransportLink {
            outbound,
            mut inbound,
        } = link;

        *self.shared.outbound.lock() = Some(outbound.clone());
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connected);
        info!(url = %self.url, "Connected to push channel");
        self.shared.emit(ConnectionEvent::Connected);

        let channels = self.dispatcher.channels();
        if !channels.is_empty() {
            debug!(channels = ?channels, "Subscribing");
            if let Err(e) = send(&outbound, &OutboundMessage::Subscribe { channels }).await {
                return e.to_string();
            }
        }

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = closed(&mut self.closing) => return "closed by caller".to_string(),
                frame = inbound.recv() => match frame {
                    Some(Frame::Text(text)) => match self.dispatcher.dispatch(&text) {
                        Dispatch::Reserved(Reserved::Pong) => pong_deadline = None,
                        Dispatch::Reserved(Reserved::Ping) => {
                            if let Err(e) = send(&outbound, &OutboundMessage::Pong).await {
                                return e.to_string();
                            }
                        }
                        Dispatch::Reserved(Reserved::Subscribed) => {
                            debug!("Subscription acknowledged");
                        }
                        Dispatch::Malformed | Dispatch::Delivered { .. } => {}
                    },
                    Some(Frame::Closed { reason }) => {
                        return reason.unwrap_or_else(|| "transport closed".to_string());
                    }
                    None => return "transport closed".to_string(),
                },
                _ = heartbeat.tick() => {
                    if let Err(e) = send(&outbound, &OutboundMessage::Ping).await {
                        return e.to_string();
                    }
                    if pong_deadline.is_none() {
                        pong_deadline = self.pong_timeout.map(|timeout| Instant::now() + timeout);
                    }
                }
                _ = expire(pong_deadline) => {
                    warn!("No pong within timeout");
                    return "pong timeout".to_string();
                }
            }
        }
    }
}

async fn send(outbound: &mpsc::Sender<String>, message: &OutboundMessage) -> RelayResult<()> {
    let json = message.to_json()?;
    outbound
        .send(json)
        .await
        .map_err(|e| RelayError::Send(e.to_string()))
}

/// Resolves once the intentionally-closed flag is set.
async fn closed(closing: &mut watch::Receiver<bool>) {
    let _ = closing.wait_for(|closing| *closing).await;
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
