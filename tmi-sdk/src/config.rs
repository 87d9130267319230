//! Client configuration.
//!
//! Can be built in code or loaded from a TOML file:
//!
//! ```toml
//! channels = ["#schmoopiie"]
//!
//! [identity]
//! username = "mybot"
//! password = "oauth:abc123"
//!
//! [connection]
//! secure = true
//! reconnect_interval = 1000
//! ```
//!
//! Durations are integer milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::util;

/// Default chat endpoint.
pub const DEFAULT_SERVER: &str = "irc-ws.chat.twitch.tv";
/// Room used to carry account-scoped slash commands (whisper, color).
pub const DEFAULT_GLOBAL_CHANNEL: &str = "#tmijs";
/// Lower bound applied to the join pacing interval.
pub const MIN_JOIN_INTERVAL: Duration = Duration::from_millis(300);

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Rooms joined after every successful handshake.
    pub channels: Vec<String>,
    pub options: Options,
    pub connection: Connection,
    pub identity: Identity,
}

/// Behavioural switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub global_default_channel: String,
    /// Do not request the membership capability (no JOIN/PART for others).
    pub skip_membership: bool,
    /// Pause between paced JOIN commands after the handshake.
    #[serde(with = "millis")]
    pub join_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            global_default_channel: DEFAULT_GLOBAL_CHANNEL.to_string(),
            skip_membership: false,
            join_interval: Duration::from_millis(2000),
        }
    }
}

/// Server endpoint and reconnect policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Connection {
    pub server: String,
    /// Defaults to 443 when `secure`, 80 otherwise.
    pub port: Option<u16>,
    pub secure: bool,
    pub reconnect: bool,
    /// Multiplier applied to the backoff interval on every attempt.
    pub reconnect_decay: f64,
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    #[serde(with = "millis")]
    pub max_reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Ping timeout and socket open timeout.
    #[serde(with = "millis")]
    pub timeout: Duration,
    /// Skip TLS certificate verification. Local testing only.
    pub tls_insecure: bool,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: None,
            secure: false,
            reconnect: true,
            reconnect_decay: 1.5,
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_interval: Duration::from_millis(30_000),
            max_reconnect_attempts: u32::MAX,
            timeout: Duration::from_millis(9999),
            tls_insecure: false,
        }
    }
}

impl Connection {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(if self.secure { 443 } else { 80 })
    }

    /// WebSocket URL for the configured endpoint.
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.server, self.port())
    }
}

/// Login credentials. Without a username the client logs in anonymously.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Identity {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ClientConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str::<Self>(s)?.normalized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Apply the implied settings: port 443 means TLS, room and user names
    /// are normalized, the password gets its `oauth:` prefix, and unusable
    /// backoff values fall back to their defaults.
    pub fn normalized(mut self) -> Self {
        if self.connection.port == Some(443) {
            self.connection.secure = true;
        }
        if self.connection.reconnect_decay < 1.0 || !self.connection.reconnect_decay.is_finite() {
            self.connection.reconnect_decay = Connection::default().reconnect_decay;
        }
        if self.connection.max_reconnect_interval < self.connection.reconnect_interval {
            self.connection.max_reconnect_interval = self.connection.reconnect_interval;
        }
        if self.options.global_default_channel.trim().is_empty() {
            self.options.global_default_channel = DEFAULT_GLOBAL_CHANNEL.to_string();
        }
        self.options.global_default_channel = util::channel(&self.options.global_default_channel);

        self.identity.username = self
            .identity
            .username
            .as_deref()
            .map(util::username)
            .filter(|u| !u.is_empty());
        self.identity.password = self
            .identity
            .password
            .as_deref()
            .map(util::password)
            .filter(|p| !p.is_empty());

        let mut channels: Vec<String> = Vec::with_capacity(self.channels.len());
        for ch in self.channels.iter().map(|c| util::channel(c)) {
            if ch.len() > 1 && !channels.contains(&ch) {
                channels.push(ch);
            }
        }
        self.channels = channels;
        self
    }

    /// Effective pause between paced joins.
    pub fn join_interval(&self) -> Duration {
        self.options.join_interval.max(MIN_JOIN_INTERVAL)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.connection.url(), "ws://irc-ws.chat.twitch.tv:80");
        assert_eq!(c.join_interval(), Duration::from_millis(2000));
        assert_eq!(c.options.global_default_channel, "#tmijs");
        assert!(c.connection.reconnect);
        assert_eq!(c.connection.timeout, Duration::from_millis(9999));
    }

    #[test]
    fn parse_toml() {
        let c = ClientConfig::from_toml_str(
            r##"
            channels = ["Foo", "#foo", "bar"]

            [identity]
            username = "MyBot"
            password = "abc"

            [connection]
            port = 443
            reconnect_interval = 250

            [options]
            join_interval = 100
            "##,
        )
        .unwrap();
        assert_eq!(c.channels, vec!["#foo", "#bar"]);
        assert_eq!(c.identity.username.as_deref(), Some("mybot"));
        assert_eq!(c.identity.password.as_deref(), Some("oauth:abc"));
        assert!(c.connection.secure);
        assert_eq!(c.connection.url(), "wss://irc-ws.chat.twitch.tv:443");
        assert_eq!(c.connection.reconnect_interval, Duration::from_millis(250));
        assert_eq!(c.join_interval(), MIN_JOIN_INTERVAL);
    }

    #[test]
    fn secure_defaults_to_443() {
        let c = ClientConfig::from_toml_str("[connection]\nsecure = true\n").unwrap();
        assert_eq!(c.connection.port(), 443);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(matches!(
            ClientConfig::from_toml_str("channels = 5"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn toml_roundtrip() {
        let mut c = ClientConfig::default();
        c.channels = vec!["#a".into()];
        let text = toml::to_string(&c).unwrap();
        let back = ClientConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.channels, c.channels);
        assert_eq!(back.options.join_interval, c.options.join_interval);
    }
}
