//! Websocket listener and reconnect state machine.
//!
//! Lifecycle: `Disconnected → Connecting → Connected`, then either
//! `Reconnecting` (dropped stream) or `Terminated` (stop requested or
//! reconnects exhausted). The stream itself carries no payloads worth
//! trusting: a `tickle` only says "something changed", and the catch-up
//! fetch against the REST API is the source of truth.

use std::collections::{HashSet, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{ApiError, ListenerError};
use crate::pushbullet::api::{Push, PushApi};

const STREAM_URL: &str = "wss://stream.pushbullet.com/websocket";

/// No single frame (including nops) may take longer than this to arrive.
const FRAME_TIMEOUT: Duration = Duration::from_secs(45);
/// Connection is considered dead once no frame has arrived for this long.
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(90);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEDUP_CAPACITY: usize = 100;
const CATCH_UP_LIMIT: usize = 10;

type FrameStream = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Seam over the websocket connect, so the reconnect machinery can be
/// driven without a network.
#[async_trait::async_trait]
trait WsConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<FrameStream, tungstenite::Error>;
}

struct TlsConnector;

#[async_trait::async_trait]
impl WsConnector for TlsConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, tungstenite::Error> {
        let (ws, _) = connect_async(url).await?;
        Ok(Box::pin(ws))
    }
}

/// Where the listener currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Terminated,
}

/// Consumer of actionable pushes. Implemented by the router.
#[async_trait::async_trait]
pub trait PushHandler: Send + Sync {
    async fn on_push(&self, push: Push);
}

/// Remote control for a running listener.
pub struct ListenerHandle {
    stop: watch::Sender<bool>,
    state: watch::Receiver<ConnectionState>,
}

impl ListenerHandle {
    /// Request a clean shutdown. Idempotent.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

/// Recently processed push idens, insertion-ordered so trimming drops the
/// oldest first. Pushes without an iden bypass this entirely.
struct ProcessedIdCache {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

impl ProcessedIdCache {
    fn new() -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Record an iden. Returns false when it was already present.
    fn insert(&mut self, iden: &str) -> bool {
        if !self.seen.insert(iden.to_string()) {
            return false;
        }
        self.order.push_back(iden.to_string());
        true
    }

    /// Drop the oldest entries until at most [`DEDUP_CAPACITY`] remain.
    /// Called between connections, not per push.
    fn trim(&mut self) {
        while self.order.len() > DEDUP_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Owns the websocket connection and feeds actionable pushes to the
/// handler, exactly once per iden within the cache window.
pub struct PushListener {
    api: Arc<dyn PushApi>,
    handler: Arc<dyn PushHandler>,
    connector: Arc<dyn WsConnector>,
    ws_url: String,
    state: watch::Sender<ConnectionState>,
    stop_rx: watch::Receiver<bool>,
    processed: ProcessedIdCache,
    /// High-water mark for the catch-up fetch (epoch seconds).
    last_push_time: f64,
}

impl PushListener {
    pub fn new(
        api: Arc<dyn PushApi>,
        handler: Arc<dyn PushHandler>,
        token: &SecretString,
    ) -> (Self, ListenerHandle) {
        Self::with_connector(api, handler, token, Arc::new(TlsConnector))
    }

    fn with_connector(
        api: Arc<dyn PushApi>,
        handler: Arc<dyn PushHandler>,
        token: &SecretString,
        connector: Arc<dyn WsConnector>,
    ) -> (Self, ListenerHandle) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let listener = Self {
            api,
            handler,
            connector,
            ws_url: format!("{STREAM_URL}/{}", token.expose_secret()),
            state: state_tx,
            stop_rx,
            processed: ProcessedIdCache::new(),
            last_push_time: chrono::Utc::now().timestamp() as f64,
        };
        let handle = ListenerHandle {
            stop: stop_tx,
            state: state_rx,
        };
        (listener, handle)
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state.send(state);
    }

    /// Connect and pump frames until stopped or reconnects are exhausted.
    pub async fn run(&mut self) -> Result<(), ListenerError> {
        let mut attempts: u32 = 0;
        loop {
            if *self.stop_rx.borrow() {
                self.set_state(ConnectionState::Terminated);
                return Ok(());
            }
            self.set_state(if attempts == 0 {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            match self.connector.connect(&self.ws_url).await {
                Ok(ws) => {
                    attempts = 0;
                    self.set_state(ConnectionState::Connected);
                    tracing::info!("Websocket connected");
                    let stopped = self.receive_loop(ws).await;
                    self.processed.trim();
                    if stopped {
                        self.set_state(ConnectionState::Terminated);
                        return Ok(());
                    }
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Websocket connect failed");
                }
            }

            attempts += 1;
            if attempts > MAX_RECONNECT_ATTEMPTS {
                self.set_state(ConnectionState::Terminated);
                return Err(ListenerError::ReconnectsExhausted {
                    attempts: MAX_RECONNECT_ATTEMPTS,
                });
            }
            tracing::info!(
                attempt = attempts,
                delay_secs = RECONNECT_DELAY.as_secs(),
                "Reconnecting"
            );
            let mut stop_rx = self.stop_rx.clone();
            tokio::select! {
                _ = sleep(RECONNECT_DELAY) => {}
                _ = stop_rx.changed() => {}
            }
        }
    }

    /// Pump one connection. Returns true when a stop was requested, false
    /// when the connection dropped and a reconnect is due.
    async fn receive_loop(&mut self, mut ws: FrameStream) -> bool {
        let mut last_frame = Instant::now();
        let mut stop_rx = self.stop_rx.clone();
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return true;
                    }
                }
                frame = timeout(FRAME_TIMEOUT, ws.next()) => match frame {
                    Err(_) => {
                        if last_frame.elapsed() >= WATCHDOG_TIMEOUT {
                            tracing::warn!("No frames within watchdog window; reconnecting");
                            return false;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("Websocket closed by server");
                        return false;
                    }
                    Ok(Some(Err(err))) => {
                        tracing::warn!(error = %err, "Websocket read error");
                        return false;
                    }
                    Ok(Some(Ok(msg))) => {
                        last_frame = Instant::now();
                        if let Message::Text(text) = msg {
                            self.handle_frame(&text).await;
                        }
                    }
                },
            }
        }
    }

    /// Classify one text frame. Anything unrecognized is logged and dropped;
    /// a bad frame never takes the connection down.
    async fn handle_frame(&mut self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(err) => {
                tracing::debug!(error = %err, "Ignoring unparseable frame");
                return;
            }
        };
        match value.get("type").and_then(|t| t.as_str()) {
            Some("nop") => {}
            Some("tickle") => {
                if value.get("subtype").and_then(|s| s.as_str()) == Some("push") {
                    if let Err(err) = self.catch_up().await {
                        tracing::warn!(error = %err, "Catch-up fetch failed");
                    }
                }
            }
            Some("push") => match value.get("push") {
                Some(raw) => match serde_json::from_value::<Push>(raw.clone()) {
                    Ok(push) => self.dispatch(push).await,
                    Err(err) => tracing::debug!(error = %err, "Ignoring malformed inline push"),
                },
                None => tracing::debug!("Push frame without payload"),
            },
            other => tracing::debug!(kind = ?other, "Ignoring frame"),
        }
    }

    /// Fetch pushes modified since the high-water mark and dispatch the
    /// actionable ones.
    async fn catch_up(&mut self) -> Result<(), ApiError> {
        let pushes = self
            .api
            .list_pushes_since(self.last_push_time, CATCH_UP_LIMIT)
            .await?;
        tracing::debug!(count = pushes.len(), "Catch-up fetch returned pushes");
        for push in pushes {
            if push.modified > self.last_push_time {
                self.last_push_time = push.modified;
            }
            if !push.is_actionable() {
                continue;
            }
            self.dispatch(push).await;
        }
        Ok(())
    }

    async fn dispatch(&mut self, push: Push) {
        if let Some(iden) = push.iden.as_deref() {
            if !self.processed.insert(iden) {
                tracing::debug!(iden, "Skipping already-processed push");
                return;
            }
        }
        if push.modified > self.last_push_time {
            self.last_push_time = push.modified;
        }
        self.handler.on_push(push).await;
    }
}
