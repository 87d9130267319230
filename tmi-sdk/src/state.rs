//! Connection-scoped state shared by the dispatcher and the lifecycle code.
//!
//! One [`ClientState`] lives behind the client's mutex. Callers only ever see
//! clones of the snapshot types defined here.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::irc::{TagValue, Tags};
use crate::util;

/// Outbound half of an open connection. Each string is one protocol line.
pub type Link = mpsc::UnboundedSender<String>;

/// Where the connection lifecycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Disconnected,
    Connecting,
    /// Socket open, waiting for the end of the welcome burst.
    Authenticating,
    Connected,
    /// Caller asked to close.
    Disconnecting,
    /// Socket failed; the failure path is running.
    Failed,
    /// Waiting out the backoff before the next attempt.
    Reconnecting,
}

/// WebSocket-style ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ReadyState {
    pub fn as_str(self) -> &'static str {
        match self {
            ReadyState::Connecting => "CONNECTING",
            ReadyState::Open => "OPEN",
            ReadyState::Closing => "CLOSING",
            ReadyState::Closed => "CLOSED",
        }
    }
}

/// Our own state in one room, from the last USERSTATE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserState {
    pub username: String,
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub is_mod: bool,
    pub subscriber: bool,
    pub user_type: Option<String>,
    pub badges: BTreeMap<String, Option<String>>,
    pub emote_sets: Option<String>,
    pub tags: Tags,
}

impl UserState {
    pub fn from_tags(tags: &Tags, username: &str) -> Self {
        Self {
            username: username.to_string(),
            display_name: tags.text("display-name").map(str::to_string),
            color: tags.text("color").map(str::to_string),
            is_mod: tags.flag("mod").unwrap_or(false),
            subscriber: tags.flag("subscriber").unwrap_or(false),
            user_type: tags.text("user-type").map(str::to_string),
            badges: tags.badges().cloned().unwrap_or_default(),
            emote_sets: tags.text("emote-sets").map(str::to_string),
            tags: tags.clone(),
        }
    }
}

/// Account-wide state from GLOBALUSERSTATE.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalUserState {
    pub display_name: Option<String>,
    pub color: Option<String>,
    pub emote_sets: Option<String>,
    pub user_id: Option<String>,
    pub tags: Tags,
}

impl GlobalUserState {
    pub fn from_tags(tags: &Tags) -> Self {
        Self {
            display_name: tags.text("display-name").map(str::to_string),
            color: tags.text("color").map(str::to_string),
            emote_sets: tags.text("emote-sets").map(str::to_string),
            user_id: tags.text("user-id").map(str::to_string),
            tags: tags.clone(),
        }
    }
}

/// The mutable record behind a client.
#[derive(Debug)]
pub struct ClientState {
    pub config: ClientConfig,
    /// Login name; replaced by the server-confirmed name on `001`.
    pub username: String,
    /// Rooms we have a join acknowledgment for, in join order.
    pub channels: Vec<String>,
    /// Rooms that were joined when the last connection failed.
    pub pending_rejoin: Vec<String>,
    pub moderators: HashMap<String, Vec<String>>,
    pub user_state: HashMap<String, UserState>,
    pub global_user_state: Option<GlobalUserState>,
    /// Last ROOMSTATE tag values per room, used to detect mode changes.
    pub room_state: HashMap<String, Tags>,
    pub emote_sets: String,
    pub last_joined: Option<String>,

    pub link: Option<Link>,
    pub phase: Phase,
    /// Bumped for every socket; stale tasks compare against it and stand down.
    pub generation: u64,
    pub reconnections: u32,
    /// Current backoff interval.
    pub reconnect_timer: Duration,
    pub latency: Duration,
    pub ping_sent_at: Option<Instant>,
    pub was_close_called: bool,
    pub reconnecting: bool,
}

impl ClientState {
    pub fn new(config: ClientConfig) -> Self {
        let config = config.normalized();
        let username = config
            .identity
            .username
            .clone()
            .unwrap_or_else(util::justinfan);
        let reconnect_timer = config.connection.reconnect_interval;
        Self {
            config,
            username,
            channels: Vec::new(),
            pending_rejoin: Vec::new(),
            moderators: HashMap::new(),
            user_state: HashMap::new(),
            global_user_state: None,
            room_state: HashMap::new(),
            emote_sets: String::new(),
            last_joined: None,
            link: None,
            phase: Phase::Disconnected,
            generation: 0,
            reconnections: 0,
            reconnect_timer,
            latency: Duration::ZERO,
            ping_sent_at: None,
            was_close_called: false,
            reconnecting: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    pub fn is_anonymous(&self) -> bool {
        util::is_justinfan(&self.username)
    }

    pub fn ready_state(&self) -> ReadyState {
        match (self.phase, self.link.is_some()) {
            (Phase::Disconnecting, true) => ReadyState::Closing,
            (_, true) => ReadyState::Open,
            (Phase::Connecting, false) => ReadyState::Connecting,
            _ => ReadyState::Closed,
        }
    }

    /// Queue `line` on the open connection. Returns false when there is none.
    pub fn send(&self, line: impl Into<String>) -> bool {
        match &self.link {
            Some(link) => link.send(line.into()).is_ok(),
            None => false,
        }
    }

    pub fn is_mod(&self, channel: &str, username: &str) -> bool {
        let user = util::username(username);
        self.moderators
            .get(&util::channel(channel))
            .is_some_and(|mods| mods.contains(&user))
    }

    pub fn add_moderator(&mut self, channel: &str, username: &str) {
        let mods = self.moderators.entry(channel.to_string()).or_default();
        if !mods.iter().any(|m| m == username) {
            mods.push(username.to_string());
        }
    }

    pub fn remove_moderator(&mut self, channel: &str, username: &str) {
        if let Some(mods) = self.moderators.get_mut(channel) {
            mods.retain(|m| m != username);
        }
    }

    /// Record a join acknowledgment.
    pub fn add_channel(&mut self, channel: &str) {
        if !self.channels.iter().any(|c| c == channel) {
            self.channels.push(channel.to_string());
        }
        self.last_joined = Some(channel.to_string());
    }

    /// Forget a room after we left it, including from the configured list so
    /// it is not rejoined after a reconnect.
    pub fn remove_channel(&mut self, channel: &str) {
        self.channels.retain(|c| c != channel);
        self.pending_rejoin.retain(|c| c != channel);
        self.config.channels.retain(|c| c != channel);
        self.user_state.remove(channel);
        self.room_state.remove(channel);
    }

    /// Clear everything that only holds for a live socket. Joined rooms are
    /// kept aside so the next handshake rejoins them.
    pub fn reset_session(&mut self) {
        self.moderators.clear();
        self.user_state.clear();
        self.global_user_state = None;
        self.room_state.clear();
        for ch in self.channels.drain(..) {
            if !self.pending_rejoin.contains(&ch) {
                self.pending_rejoin.push(ch);
            }
        }
        self.ping_sent_at = None;
    }

    /// Rooms to join after a handshake: configured rooms first, then rooms
    /// held over from the previous connection, without duplicates. Both
    /// the joined list and the holdover list are emptied.
    pub fn take_join_targets(&mut self) -> Vec<String> {
        let mut targets: Vec<String> = Vec::new();
        let held = std::mem::take(&mut self.pending_rejoin);
        let joined = std::mem::take(&mut self.channels);
        for ch in self.config.channels.iter().chain(&held).chain(&joined) {
            if !targets.contains(ch) {
                targets.push(ch.clone());
            }
        }
        targets
    }

    /// Advance the backoff: `min(timer * decay, max)`.
    pub fn next_backoff(&mut self) -> Duration {
        let conn = &self.config.connection;
        let next = self.reconnect_timer.mul_f64(conn.reconnect_decay);
        self.reconnect_timer = next.min(conn.max_reconnect_interval);
        self.reconnect_timer
    }

    pub fn reset_backoff(&mut self) {
        self.reconnections = 0;
        self.reconnect_timer = self.config.connection.reconnect_interval;
    }

    pub fn can_reconnect(&self) -> bool {
        self.config.connection.reconnect
            && !self.was_close_called
            && self.reconnections < self.config.connection.max_reconnect_attempts
    }

    pub fn reconnect_exhausted(&self) -> bool {
        self.reconnections >= self.config.connection.max_reconnect_attempts
    }
}

/// Rewrite tag values in place after complex-tag decoding: a bare flag
/// becomes absent, `"1"`/`"0"` become booleans. Tags in
/// [`RAW_VALUE_TAGS`](crate::irc::RAW_VALUE_TAGS) are left alone.
pub fn normalize_tags(tags: &mut Tags) {
    for (key, value) in tags.iter_mut() {
        if crate::irc::RAW_VALUE_TAGS.contains(&key.as_str()) {
            continue;
        }
        let replacement = match value {
            TagValue::Bool(true) => TagValue::Absent,
            TagValue::Text(s) if s == "1" => TagValue::Bool(true),
            TagValue::Text(s) if s == "0" => TagValue::Bool(false),
            _ => continue,
        };
        *value = replacement;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ClientState {
        let mut config = ClientConfig::default();
        config.identity.username = Some("Bot".into());
        config.channels = vec!["a".into(), "#b".into()];
        ClientState::new(config)
    }

    #[test]
    fn new_state_normalizes_config() {
        let s = state();
        assert_eq!(s.username, "bot");
        assert_eq!(s.config.channels, vec!["#a", "#b"]);
        assert!(!s.is_connected());
        assert_eq!(s.ready_state(), ReadyState::Closed);
    }

    #[test]
    fn anonymous_without_username() {
        let s = ClientState::new(ClientConfig::default());
        assert!(s.is_anonymous());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let mut s = state();
        s.config.connection.max_reconnect_interval = Duration::from_millis(2000);
        assert_eq!(s.next_backoff(), Duration::from_millis(1500));
        assert_eq!(s.next_backoff(), Duration::from_millis(2000));
        assert_eq!(s.next_backoff(), Duration::from_millis(2000));
        s.reconnections = 4;
        s.reset_backoff();
        assert_eq!(s.reconnect_timer, Duration::from_millis(1000));
        assert_eq!(s.reconnections, 0);
    }

    #[test]
    fn reset_session_holds_rooms_for_rejoin() {
        let mut s = state();
        s.add_channel("#c");
        s.add_moderator("#c", "x");
        s.user_state.insert("#c".into(), UserState::default());
        s.reset_session();
        assert!(s.channels.is_empty());
        assert!(s.moderators.is_empty());
        assert!(s.user_state.is_empty());
        assert_eq!(s.take_join_targets(), vec!["#a", "#b", "#c"]);
        assert!(s.pending_rejoin.is_empty());
    }

    #[test]
    fn remove_channel_forgets_config() {
        let mut s = state();
        s.add_channel("#a");
        s.remove_channel("#a");
        assert!(s.channels.is_empty());
        assert_eq!(s.config.channels, vec!["#b"]);
    }

    #[test]
    fn is_mod_normalizes() {
        let mut s = state();
        s.add_moderator("#c", "x");
        assert!(s.is_mod("C", "X"));
        s.remove_moderator("#c", "x");
        assert!(!s.is_mod("#c", "x"));
    }

    #[test]
    fn normalize_tags_skips_raw_value_tags() {
        let mut tags = Tags::new();
        tags.insert("mod", "1");
        tags.insert("subscriber", "0");
        tags.insert("flag", true);
        tags.insert("bits", "1");
        tags.insert("emote-sets", "0");
        tags.insert("color", "#fff");
        normalize_tags(&mut tags);
        assert_eq!(tags.flag("mod"), Some(true));
        assert_eq!(tags.flag("subscriber"), Some(false));
        assert_eq!(tags.get("flag"), Some(&TagValue::Absent));
        assert_eq!(tags.text("bits"), Some("1"));
        assert_eq!(tags.text("emote-sets"), Some("0"));
        assert_eq!(tags.text("color"), Some("#fff"));
    }
}
