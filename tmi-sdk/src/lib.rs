//! Client SDK for Twitch chat over WebSocket.
//!
//! ```no_run
//! use tmi_sdk::{Client, ClientConfig, Event, EventKind};
//!
//! # async fn run() -> Result<(), tmi_sdk::ClientError> {
//! let mut config = ClientConfig::default();
//! config.channels = vec!["#somechannel".into()];
//! let client = Client::new(config);
//! client.on(EventKind::Chat, |event| {
//!     if let Event::Chat(msg) = event {
//!         println!("{}: {}", msg.username, msg.message);
//!     }
//! });
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod event;
pub mod irc;
pub mod queue;
pub mod state;
pub mod transport;
pub mod util;

pub use client::Client;
pub use config::ClientConfig;
pub use emitter::HandlerId;
pub use error::{ClientError, ConfigError};
pub use event::{ChatMessage, Event, EventKind};
pub use irc::{Message, TagValue, Tags};
pub use queue::DelayedQueue;
