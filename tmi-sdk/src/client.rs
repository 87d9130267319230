//! Chat client: connection lifecycle, read loop, keep-alive and reconnect.
//!
//! This is the main entry point for SDK consumers. A [`Client`] owns the
//! WebSocket, sends the login sequence, feeds every inbound line through the
//! dispatcher and raises the resulting [`Event`]s.
//!
//! ## Lifecycle
//!
//! `Disconnected → Connecting → Authenticating → Connected`, then either
//! `Disconnecting` (caller asked) or `Failed` (socket error, close from the
//! server, ping timeout). A failure clears room and user state, emits
//! [`Event::Disconnected`] and, while attempts remain, schedules another
//! `connect()` after the current backoff interval (`Reconnecting`).
//!
//! ## Tasks
//!
//! Each connection runs a reader task, a writer task fed by an unbounded
//! channel, and a keep-alive task once the handshake completes. Every task
//! carries the generation number of its connection and stands down when the
//! generation moves on.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use futures_util::stream::{SplitSink, SplitStream};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::ClientConfig;
use crate::dispatch::{self, Directive};
use crate::emitter::{Emitter, HandlerId};
use crate::error::{ClientError, Result};
use crate::event::{Event, EventKind};
use crate::irc::Message;
use crate::queue::DelayedQueue;
use crate::state::{ClientState, GlobalUserState, Phase, ReadyState, UserState};
use crate::transport::{self, WsStream};
use crate::util;

/// Interval between keep-alive pings once connected.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

/// Tasks and timers tied to the current connection.
#[derive(Default)]
struct Session {
    cancel: Option<watch::Sender<bool>>,
    writer: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
    ping_timeout: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    joins: Option<DelayedQueue>,
}

impl Session {
    fn stop_timers(&mut self) {
        if let Some(task) = self.keepalive.take() {
            task.abort();
        }
        if let Some(task) = self.ping_timeout.take() {
            task.abort();
        }
        if let Some(queue) = self.joins.take() {
            queue.cancel();
        }
    }

    fn stop_reader(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(true);
        }
    }
}

struct Inner {
    state: Mutex<ClientState>,
    session: Mutex<Session>,
    emitter: Emitter,
}

/// A handle to a chat client. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ClientState::new(config)),
                session: Mutex::new(Session::default()),
                emitter: Emitter::new(),
            }),
        }
    }

    // ── Events ──

    pub fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.emitter.on(kind, handler)
    }

    pub fn once<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.emitter.once(kind, handler)
    }

    pub fn off(&self, id: HandlerId) -> bool {
        self.inner.emitter.off(id)
    }

    /// Receive every event through a channel instead of callbacks.
    ///
    /// The backing handler removes itself once the receiver is dropped.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(OnceLock::<HandlerId>::new());
        let inner = Arc::downgrade(&self.inner);
        let own_id = slot.clone();
        let id = self.inner.emitter.on_any(move |event| {
            if tx.send(event.clone()).is_err() {
                if let (Some(inner), Some(id)) = (inner.upgrade(), own_id.get()) {
                    inner.emitter.off(*id);
                }
            }
        });
        let _ = slot.set(id);
        rx
    }

    fn emit(&self, event: Event) {
        self.inner.emitter.emit(&event);
    }

    // ── Accessors ──

    pub fn username(&self) -> String {
        self.inner.state.lock().username.clone()
    }

    /// Rooms currently joined, in join order.
    pub fn channels(&self) -> Vec<String> {
        self.inner.state.lock().channels.clone()
    }

    pub fn is_mod(&self, channel: &str, username: &str) -> bool {
        self.inner.state.lock().is_mod(channel, username)
    }

    pub fn user_state(&self, channel: &str) -> Option<UserState> {
        self.inner
            .state
            .lock()
            .user_state
            .get(&util::channel(channel))
            .cloned()
    }

    pub fn global_user_state(&self) -> Option<GlobalUserState> {
        self.inner.state.lock().global_user_state.clone()
    }

    pub fn emote_sets(&self) -> String {
        self.inner.state.lock().emote_sets.clone()
    }

    /// Round trip of the last answered ping.
    pub fn latency(&self) -> Duration {
        self.inner.state.lock().latency
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().ready_state()
    }

    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().is_connected()
    }

    pub fn is_anonymous(&self) -> bool {
        self.inner.state.lock().is_anonymous()
    }

    /// Reconnect attempts since the last successful handshake.
    pub fn reconnections(&self) -> u32 {
        self.inner.state.lock().reconnections
    }

    pub fn config(&self) -> ClientConfig {
        self.inner.state.lock().config.clone()
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut ClientState) -> T) -> T {
        f(&mut self.inner.state.lock())
    }

    // ── Lifecycle ──

    /// Open the socket and send the login sequence.
    ///
    /// Returns once the credentials are written; [`Event::Connected`] follows
    /// when the server confirms the login. An open failure runs the failure
    /// path (which may schedule a reconnect) and is also returned here.
    pub async fn connect(&self) -> Result<()> {
        let (conn, generation) = {
            let mut st = self.inner.state.lock();
            if st.link.is_some() || st.phase == Phase::Connecting {
                return Err(ClientError::AlreadyConnected);
            }
            st.was_close_called = false;
            st.next_backoff();
            st.phase = Phase::Connecting;
            st.generation += 1;
            (st.config.connection.clone(), st.generation)
        };

        tracing::info!(server = %conn.server, port = conn.port(), "Connecting");
        self.emit(Event::Connecting {
            server: conn.server.clone(),
            port: conn.port(),
        });

        let ws = match transport::open(&conn).await {
            Ok(ws) => ws,
            Err(e) => {
                tracing::error!(error = %e, "Connection error");
                self.fail(generation, format!("Unable to connect: {e}"));
                return Err(e);
            }
        };

        let (sink, stream) = ws.split();
        let (link, outbound) = mpsc::unbounded_channel();
        let (cancel, cancelled) = watch::channel(false);

        let login = {
            let mut st = self.inner.state.lock();
            if st.generation != generation {
                return Err(ClientError::Closed("connection attempt superseded".into()));
            }
            st.link = Some(link.clone());
            st.phase = Phase::Authenticating;
            login_lines(&st)
        };

        let writer = tokio::spawn(self.clone().write_loop(sink, outbound, generation));
        tokio::spawn(self.clone().read_loop(stream, cancelled, generation));
        {
            let mut session = self.inner.session.lock();
            session.stop_reader();
            session.cancel = Some(cancel);
            session.writer = Some(writer);
        }

        tracing::info!("Sending authentication to server");
        self.emit(Event::Logon);
        for line in login {
            let _ = link.send(line);
        }
        Ok(())
    }

    /// Close the connection on request. Suppresses automatic reconnects,
    /// including one already waiting out its backoff.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(task) = self.inner.session.lock().reconnect.take() {
            task.abort();
        }
        self.close().await
    }

    async fn close(&self) -> Result<()> {
        let (link, timeout) = {
            let mut st = self.inner.state.lock();
            let Some(link) = st.link.take() else {
                if st.phase == Phase::Reconnecting {
                    st.reconnecting = false;
                    st.phase = Phase::Disconnected;
                }
                return Err(ClientError::NotConnected);
            };
            st.was_close_called = true;
            st.reconnecting = false;
            st.generation += 1;
            st.phase = Phase::Disconnecting;
            st.reset_session();
            (link, st.config.connection.timeout)
        };

        tracing::info!("Disconnecting from server");
        let writer = {
            let mut session = self.inner.session.lock();
            session.stop_timers();
            session.stop_reader();
            session.writer.take()
        };
        // Dropping the last sender lets the writer flush and send a close frame.
        drop(link);
        if let Some(writer) = writer {
            if tokio::time::timeout(timeout, writer).await.is_err() {
                tracing::warn!("Timed out closing the socket");
            }
        }

        self.inner.state.lock().phase = Phase::Disconnected;
        self.emit(Event::Disconnected {
            reason: "Connection closed.".to_string(),
        });
        Ok(())
    }

    /// The single failure path: clear connection state, stop timers, report
    /// the disconnect and schedule a reconnect when allowed.
    fn fail(&self, generation: u64, reason: String) {
        let (mut events, retry) = {
            let mut st = self.inner.state.lock();
            if st.generation != generation {
                return;
            }
            st.generation += 1;
            st.phase = Phase::Failed;
            st.reset_session();
            st.link = None;

            let mut events = vec![Event::Disconnected {
                reason: reason.clone(),
            }];
            let retry = if st.can_reconnect() {
                st.reconnecting = true;
                st.reconnections += 1;
                st.phase = Phase::Reconnecting;
                events.push(Event::Reconnect);
                Some((st.reconnect_timer, st.reconnections))
            } else {
                st.reconnecting = false;
                st.phase = Phase::Disconnected;
                if st.reconnect_exhausted() {
                    events.push(Event::MaxReconnect);
                }
                None
            };
            (events, retry)
        };

        {
            let mut session = self.inner.session.lock();
            session.stop_timers();
            session.stop_reader();
            session.writer = None;
        }

        tracing::warn!(reason = %reason, "Disconnected");
        match retry {
            Some((delay, attempt)) => {
                tracing::info!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting");
                let client = self.clone();
                let task = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    client.with_state(|st| st.reconnecting = false);
                    if let Err(e) = client.connect().await {
                        tracing::warn!(error = %e, "Reconnect attempt failed");
                    }
                });
                if let Some(old) = self.inner.session.lock().reconnect.replace(task) {
                    old.abort();
                }
            }
            None => {
                if events.iter().any(|e| matches!(e, Event::MaxReconnect)) {
                    tracing::error!("Maximum reconnection attempts reached");
                }
            }
        }

        for event in events.drain(..) {
            self.emit(event);
        }
    }

    // ── Connection tasks ──

    async fn read_loop(
        self,
        mut stream: SplitStream<WsStream>,
        mut cancelled: watch::Receiver<bool>,
        generation: u64,
    ) {
        let reason = loop {
            tokio::select! {
                biased;
                _ = cancelled.changed() => return,
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        for line in transport::lines(text.as_str()) {
                            tracing::trace!(line, "recv");
                            if let Some(message) = Message::parse(line) {
                                if !self.process(generation, message) {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break "Connection closed.".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("Connection error: {e}"),
                },
            }
        };
        self.fail(generation, reason);
    }

    async fn write_loop(
        self,
        mut sink: SplitSink<WsStream, WsMessage>,
        mut outbound: mpsc::UnboundedReceiver<String>,
        generation: u64,
    ) {
        while let Some(line) = outbound.recv().await {
            tracing::trace!(line = %line, "send");
            if let Err(e) = sink.send(WsMessage::text(line)).await {
                tracing::warn!(error = %e, "Write failed");
                self.fail(generation, format!("Connection error: {e}"));
                return;
            }
        }
        let _ = sink.close().await;
    }

    /// Dispatch one message. Returns false once the connection is stale.
    fn process(&self, generation: u64, message: Message) -> bool {
        let outcome = {
            let mut st = self.inner.state.lock();
            if st.generation != generation {
                return false;
            }
            dispatch::handle(&mut st, message)
        };
        for event in outcome.events {
            self.emit(event);
        }
        for directive in outcome.directives {
            self.apply(generation, directive);
        }
        true
    }

    fn apply(&self, generation: u64, directive: Directive) {
        match directive {
            Directive::Send(line) => {
                self.inner.state.lock().send(line);
            }
            Directive::StartSession { channels } => self.start_session(generation, channels),
            Directive::CancelPingTimeout => {
                if let Some(task) = self.inner.session.lock().ping_timeout.take() {
                    task.abort();
                }
            }
            Directive::Reconnect => {
                let delay = self.inner.state.lock().reconnect_timer;
                tracing::info!(delay_ms = delay.as_millis() as u64, "Disconnecting and reconnecting");
                let client = self.clone();
                let task = tokio::spawn(async move {
                    let _ = client.close().await;
                    tokio::time::sleep(delay).await;
                    if let Err(e) = client.connect().await {
                        tracing::warn!(error = %e, "Reconnect attempt failed");
                    }
                });
                if let Some(old) = self.inner.session.lock().reconnect.replace(task) {
                    old.abort();
                }
            }
        }
    }

    fn start_session(&self, generation: u64, channels: Vec<String>) {
        let interval = self.inner.state.lock().config.join_interval();
        let queue = DelayedQueue::new(interval);
        for channel in channels {
            let client = self.clone();
            queue.add(move || {
                if let Err(e) = client.send_join(&channel) {
                    tracing::debug!(channel = %channel, error = %e, "Skipped queued join");
                }
            });
        }

        let keepalive = tokio::spawn(self.clone().keepalive(generation));
        {
            let mut session = self.inner.session.lock();
            session.stop_timers();
            session.keepalive = Some(keepalive);
            session.joins = Some(queue.clone());
        }
        queue.advance();
    }

    async fn keepalive(self, generation: u64) {
        let start = tokio::time::Instant::now() + KEEPALIVE_INTERVAL;
        let mut ticker = tokio::time::interval_at(start, KEEPALIVE_INTERVAL);
        loop {
            ticker.tick().await;
            if !self.send_ping(generation) {
                return;
            }
        }
    }

    /// Write `PING`, record the send time and arm the timeout. Returns false
    /// when the connection is gone or has moved on.
    fn send_ping(&self, generation: u64) -> bool {
        let timeout = {
            let mut st = self.inner.state.lock();
            if st.generation != generation || !st.send("PING") {
                return false;
            }
            dispatch::mark_ping_sent(&mut st);
            st.config.connection.timeout
        };
        let client = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            client.with_state(|st| st.was_close_called = false);
            tracing::error!("Ping timeout");
            client.fail(generation, "Ping timeout.".to_string());
        });
        if let Some(old) = self.inner.session.lock().ping_timeout.replace(task) {
            old.abort();
        }
        true
    }

    /// Send `PING` now and measure the round trip; the answer arrives as
    /// [`Event::Pong`].
    pub fn ping(&self) -> Result<()> {
        let generation = {
            let st = self.inner.state.lock();
            if !st.is_connected() {
                return Err(ClientError::NotConnected);
            }
            st.generation
        };
        if self.send_ping(generation) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    pub(crate) fn send_join(&self, channel: &str) -> Result<()> {
        self.send_raw(&format!("JOIN {}", util::channel(channel)))
    }

    /// Queue one line on the open connection.
    pub(crate) fn send_raw(&self, line: &str) -> Result<()> {
        let st = self.inner.state.lock();
        if st.send(line) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.inner.state.lock();
        f.debug_struct("Client")
            .field("username", &st.username)
            .field("phase", &st.phase)
            .field("channels", &st.channels)
            .finish()
    }
}

/// Capability request, credentials and nick, in that order.
fn login_lines(st: &ClientState) -> Vec<String> {
    let mut caps = String::from("twitch.tv/tags twitch.tv/commands");
    if !st.config.options.skip_membership {
        caps.push_str(" twitch.tv/membership");
    }
    let mut lines = vec![format!("CAP REQ :{caps}")];
    match st.config.identity.password.as_deref() {
        Some(password) => lines.push(format!("PASS {}", util::password(password))),
        None if st.is_anonymous() => lines.push("PASS SCHMOOPIIE".to_string()),
        None => {}
    }
    lines.push(format!("NICK {}", st.username));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_login() {
        let st = ClientState::new(ClientConfig::default());
        let lines = login_lines(&st);
        assert_eq!(
            lines[0],
            "CAP REQ :twitch.tv/tags twitch.tv/commands twitch.tv/membership"
        );
        assert_eq!(lines[1], "PASS SCHMOOPIIE");
        assert!(lines[2].starts_with("NICK justinfan"));
    }

    #[test]
    fn authenticated_login_without_membership() {
        let mut config = ClientConfig::default();
        config.identity.username = Some("Bot".into());
        config.identity.password = Some("token".into());
        config.options.skip_membership = true;
        let st = ClientState::new(config);
        assert_eq!(
            login_lines(&st),
            vec![
                "CAP REQ :twitch.tv/tags twitch.tv/commands",
                "PASS oauth:token",
                "NICK bot",
            ]
        );
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_an_error() {
        let client = Client::new(ClientConfig::default());
        assert!(matches!(
            client.disconnect().await,
            Err(ClientError::NotConnected)
        ));
        assert_eq!(client.ready_state(), ReadyState::Closed);
    }

    #[tokio::test]
    async fn disconnect_while_opening_keeps_auto_reconnect() {
        let client = Client::new(ClientConfig::default());
        client.with_state(|st| st.phase = Phase::Connecting);
        assert!(matches!(
            client.disconnect().await,
            Err(ClientError::NotConnected)
        ));
        client.with_state(|st| {
            assert!(!st.was_close_called);
            assert!(st.can_reconnect());
        });
    }

    #[test]
    fn dropped_event_receiver_unregisters_its_handler() {
        let client = Client::new(ClientConfig::default());
        let kept = client.events();
        let dropped = client.events();
        assert_eq!(client.emitter().catch_all_count(), 2);

        drop(dropped);
        client.emit(Event::Logon);
        assert_eq!(client.emitter().catch_all_count(), 1);
        drop(kept);
    }

    #[tokio::test]
    async fn ping_requires_connection() {
        let client = Client::new(ClientConfig::default());
        assert!(matches!(client.ping(), Err(ClientError::NotConnected)));
    }
}
