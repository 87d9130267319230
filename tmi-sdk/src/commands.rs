//! Outbound operations on a [`Client`]: chat, membership, moderation and
//! room modes.
//!
//! Every operation fails with [`ClientError::NotConnected`] before touching
//! the socket when there is no open connection. Writes are fire-and-forget;
//! the outcome arrives later as an [`Event`](crate::event::Event), usually a
//! `Notice`.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::irc::format_line;
use crate::util;

/// Longest chat text sent in one `PRIVMSG`.
pub const MESSAGE_LIMIT: usize = 500;

/// Pause between the parts of a split message.
pub const SPLIT_DELAY: Duration = Duration::from_millis(350);

/// Tag overrides attached to an outbound line.
pub type OutboundTags = HashMap<String, String>;

const DEFAULT_TIMEOUT_SECS: u32 = 300;
const DEFAULT_SLOW_SECS: u32 = 300;
const DEFAULT_FOLLOWERS_MINUTES: u32 = 30;
const DEFAULT_COMMERCIAL_SECS: u32 = 30;

fn or_default(value: u32, default: u32) -> u32 {
    if value == 0 { default } else { value }
}

/// Whether chat text is a slash or dot command rather than plain text.
fn is_command(text: &str) -> bool {
    (text.starts_with('.') && !text.starts_with(".."))
        || text.starts_with('/')
        || text.starts_with('\\')
}

impl Client {
    // ── Chat ──

    /// Send chat text to a room.
    ///
    /// `/me text` and `.me text` are sent as actions; any other text starting
    /// with `/`, `\` or a single `.` is sent as a command. Long text is split
    /// into parts of at most [`MESSAGE_LIMIT`] bytes.
    pub async fn say(&self, channel: &str, text: &str) -> Result<()> {
        self.say_with_tags(channel, text, None).await
    }

    pub async fn say_with_tags(
        &self,
        channel: &str,
        text: &str,
        tags: Option<&OutboundTags>,
    ) -> Result<()> {
        if is_command(text) {
            if let Some(rest) = text.strip_prefix("/me ").or_else(|| text.strip_prefix(".me ")) {
                return self.action_with_tags(channel, rest, tags).await;
            }
            return self.room_command(channel, text, tags);
        }
        self.send_chat(channel, text, tags).await
    }

    /// Send a `/me` action.
    pub async fn action(&self, channel: &str, text: &str) -> Result<()> {
        self.action_with_tags(channel, text, None).await
    }

    pub async fn action_with_tags(
        &self,
        channel: &str,
        text: &str,
        tags: Option<&OutboundTags>,
    ) -> Result<()> {
        self.send_chat(channel, &util::action_envelope(text), tags)
            .await
    }

    /// Send text as a threaded reply to the message with id `parent_id`.
    pub async fn reply(&self, channel: &str, text: &str, parent_id: &str) -> Result<()> {
        if parent_id.is_empty() {
            return Err(ClientError::MissingReplyParent);
        }
        let mut tags = OutboundTags::new();
        tags.insert("reply-parent-msg-id".to_string(), parent_id.to_string());
        self.say_with_tags(channel, text, Some(&tags)).await
    }

    /// Send a highlighted announcement.
    pub async fn announce(&self, channel: &str, text: &str) -> Result<()> {
        self.send_chat(channel, &format!("/announce {text}"), None)
            .await
    }

    /// Send a private message. Fails when `username` is our own login.
    pub fn whisper(&self, username: &str, text: &str) -> Result<()> {
        let username = util::username(username);
        let (me, global) = self.with_state(|st| {
            (
                st.username.clone(),
                st.config.options.global_default_channel.clone(),
            )
        });
        if username == me {
            return Err(ClientError::WhisperToSelf);
        }
        self.room_command(&global, &format!("/w {username} {text}"), None)
    }

    async fn send_chat(
        &self,
        channel: &str,
        text: &str,
        tags: Option<&OutboundTags>,
    ) -> Result<()> {
        let channel = util::channel(channel);
        let parts = util::split_message(text, MESSAGE_LIMIT);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(SPLIT_DELAY).await;
            }
            self.with_state(|st| {
                if !st.is_connected() {
                    return Err(ClientError::NotConnected);
                }
                if st.is_anonymous() {
                    return Err(ClientError::Anonymous);
                }
                st.send(format_line(tags, &format!("PRIVMSG {channel} :{part}")));
                Ok(())
            })?;
            tracing::debug!(channel = %channel, len = part.len(), "Sent message");
        }
        Ok(())
    }

    /// Send `PRIVMSG <room> :<command>` for a slash command.
    fn room_command(&self, channel: &str, command: &str, tags: Option<&OutboundTags>) -> Result<()> {
        let channel = util::channel(channel);
        tracing::info!(channel = %channel, command, "Executing command");
        self.send_raw(&format_line(tags, &format!("PRIVMSG {channel} :{command}")))
    }

    /// Send a protocol line as is.
    pub fn raw(&self, command: &str) -> Result<()> {
        self.raw_with_tags(command, None)
    }

    pub fn raw_with_tags(&self, command: &str, tags: Option<&OutboundTags>) -> Result<()> {
        tracing::info!(command, "Executing command");
        self.send_raw(&format_line(tags, command))
    }

    // ── Membership ──

    pub fn join(&self, channel: &str) -> Result<()> {
        self.send_join(channel)
    }

    /// Join several rooms with one `JOIN`. An empty list does nothing.
    pub fn join_many<I, S>(&self, channels: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rooms: Vec<String> = channels
            .into_iter()
            .map(|c| util::channel(c.as_ref()))
            .collect();
        if rooms.is_empty() {
            return Ok(());
        }
        self.send_raw(&format!("JOIN {}", rooms.join(",")))
    }

    pub fn part(&self, channel: &str) -> Result<()> {
        self.send_raw(&format!("PART {}", util::channel(channel)))
    }

    pub fn leave(&self, channel: &str) -> Result<()> {
        self.part(channel)
    }

    // ── Moderation ──

    pub fn ban(&self, channel: &str, username: &str, reason: &str) -> Result<()> {
        let command = format!("/ban {} {reason}", util::username(username));
        self.room_command(channel, command.trim_end(), None)
    }

    /// Time a user out. A zero `seconds` means 300.
    pub fn timeout(&self, channel: &str, username: &str, seconds: u32, reason: &str) -> Result<()> {
        let seconds = or_default(seconds, DEFAULT_TIMEOUT_SECS);
        let command = format!("/timeout {} {seconds} {reason}", util::username(username));
        self.room_command(channel, command.trim_end(), None)
    }

    pub fn unban(&self, channel: &str, username: &str) -> Result<()> {
        self.room_command(channel, &format!("/unban {}", util::username(username)), None)
    }

    /// Clear the room's chat history.
    pub fn clear(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/clear", None)
    }

    pub fn delete_message(&self, channel: &str, message_id: &str) -> Result<()> {
        self.room_command(channel, &format!("/delete {message_id}"), None)
    }

    pub fn mod_user(&self, channel: &str, username: &str) -> Result<()> {
        self.room_command(channel, &format!("/mod {}", util::username(username)), None)
    }

    pub fn unmod_user(&self, channel: &str, username: &str) -> Result<()> {
        self.room_command(channel, &format!("/unmod {}", util::username(username)), None)
    }

    /// Ask for the moderator list; answered by a `Mods` event.
    pub fn mods(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/mods", None)
    }

    pub fn vip(&self, channel: &str, username: &str) -> Result<()> {
        self.room_command(channel, &format!("/vip {}", util::username(username)), None)
    }

    pub fn unvip(&self, channel: &str, username: &str) -> Result<()> {
        self.room_command(channel, &format!("/unvip {}", util::username(username)), None)
    }

    /// Ask for the VIP list; answered by a `Vips` event.
    pub fn vips(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/vips", None)
    }

    // ── Room modes ──

    /// Enable slow mode. A zero `seconds` means 300.
    pub fn slow(&self, channel: &str, seconds: u32) -> Result<()> {
        let seconds = or_default(seconds, DEFAULT_SLOW_SECS);
        self.room_command(channel, &format!("/slow {seconds}"), None)
    }

    pub fn slow_off(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/slowoff", None)
    }

    pub fn slow_mode(&self, channel: &str, seconds: u32) -> Result<()> {
        self.slow(channel, seconds)
    }

    pub fn slow_mode_off(&self, channel: &str) -> Result<()> {
        self.slow_off(channel)
    }

    /// Enable followers-only mode. A zero `minutes` means 30.
    pub fn followers_only(&self, channel: &str, minutes: u32) -> Result<()> {
        let minutes = or_default(minutes, DEFAULT_FOLLOWERS_MINUTES);
        self.room_command(channel, &format!("/followers {minutes}"), None)
    }

    pub fn followers_only_off(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/followersoff", None)
    }

    pub fn followers_mode(&self, channel: &str, minutes: u32) -> Result<()> {
        self.followers_only(channel, minutes)
    }

    pub fn followers_mode_off(&self, channel: &str) -> Result<()> {
        self.followers_only_off(channel)
    }

    pub fn subscribers(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/subscribers", None)
    }

    pub fn subscribers_off(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/subscribersoff", None)
    }

    pub fn emote_only(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/emoteonly", None)
    }

    pub fn emote_only_off(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/emoteonlyoff", None)
    }

    pub fn r9kbeta(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/r9kbeta", None)
    }

    pub fn r9kbeta_off(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/r9kbetaoff", None)
    }

    pub fn unique_chat(&self, channel: &str) -> Result<()> {
        self.r9kbeta(channel)
    }

    pub fn unique_chat_off(&self, channel: &str) -> Result<()> {
        self.r9kbeta_off(channel)
    }

    // ── Channel ──

    /// Change our name color. Sent through the global default room.
    pub fn color(&self, color: &str) -> Result<()> {
        let global = self.with_state(|st| st.config.options.global_default_channel.clone());
        self.room_command(&global, &format!("/color {color}"), None)
    }

    /// Run a commercial. A zero `seconds` means 30.
    pub fn commercial(&self, channel: &str, seconds: u32) -> Result<()> {
        let seconds = or_default(seconds, DEFAULT_COMMERCIAL_SECS);
        self.room_command(channel, &format!("/commercial {seconds}"), None)
    }

    pub fn host(&self, channel: &str, target: &str) -> Result<()> {
        self.room_command(channel, &format!("/host {}", util::username(target)), None)
    }

    pub fn unhost(&self, channel: &str) -> Result<()> {
        self.room_command(channel, "/unhost", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use tokio::sync::mpsc;

    fn connected(username: Option<&str>) -> (Client, mpsc::UnboundedReceiver<String>) {
        let mut config = ClientConfig::default();
        config.identity.username = username.map(str::to_string);
        let client = Client::new(config);
        let (tx, rx) = mpsc::unbounded_channel();
        client.with_state(|st| st.link = Some(tx));
        (client, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            out.push(line);
        }
        out
    }

    #[test]
    fn command_detection() {
        assert!(is_command("/ban x"));
        assert!(is_command(".mods"));
        assert!(is_command("\\w x"));
        assert!(!is_command("..."));
        assert!(!is_command("hello"));
    }

    #[tokio::test]
    async fn say_routes_commands_and_actions() {
        let (client, mut rx) = connected(Some("bot"));
        client.say("Room", "hello").await.unwrap();
        client.say("room", "/me waves").await.unwrap();
        client.say("room", ".mods").await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                "PRIVMSG #room :hello",
                "PRIVMSG #room :\u{1}ACTION waves\u{1}",
                "PRIVMSG #room :.mods",
            ]
        );
    }

    #[tokio::test]
    async fn anonymous_cannot_chat() {
        let (client, mut rx) = connected(None);
        assert!(matches!(
            client.say("room", "hi").await,
            Err(ClientError::Anonymous)
        ));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn usage_errors_when_disconnected() {
        let client = Client::new(ClientConfig::default());
        assert!(matches!(
            client.say("room", "hi").await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.join("room"), Err(ClientError::NotConnected)));
        assert!(matches!(client.ban("room", "x", ""), Err(ClientError::NotConnected)));
        assert!(matches!(client.slow("room", 0), Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn reply_requires_parent() {
        let (client, mut rx) = connected(Some("bot"));
        assert!(matches!(
            client.reply("room", "hi", "").await,
            Err(ClientError::MissingReplyParent)
        ));
        client.reply("room", "hi there", "abc-123").await.unwrap();
        assert_eq!(
            drain(&mut rx),
            vec!["@reply-parent-msg-id=abc-123 PRIVMSG #room :hi there"]
        );
    }

    #[tokio::test]
    async fn whisper_to_self_is_rejected() {
        let (client, mut rx) = connected(Some("Bot"));
        assert!(matches!(
            client.whisper("#BOT", "hi"),
            Err(ClientError::WhisperToSelf)
        ));
        client.whisper("Friend", "hi").unwrap();
        assert_eq!(drain(&mut rx), vec!["PRIVMSG #tmijs :/w friend hi"]);
    }

    #[tokio::test]
    async fn mode_defaults() {
        let (client, mut rx) = connected(Some("bot"));
        client.slow("room", 0).unwrap();
        client.followers_only("room", 0).unwrap();
        client.timeout("room", "Troll", 0, "").unwrap();
        client.timeout("room", "troll", 10, "spam").unwrap();
        client.commercial("room", 0).unwrap();
        client.unique_chat_off("room").unwrap();
        assert_eq!(
            drain(&mut rx),
            vec![
                "PRIVMSG #room :/slow 300",
                "PRIVMSG #room :/followers 30",
                "PRIVMSG #room :/timeout troll 300",
                "PRIVMSG #room :/timeout troll 10 spam",
                "PRIVMSG #room :/commercial 30",
                "PRIVMSG #room :/r9kbetaoff",
            ]
        );
    }

    #[tokio::test]
    async fn membership_lines() {
        let (client, mut rx) = connected(None);
        client.join("A").unwrap();
        client.join_many(["b", "#C"]).unwrap();
        client.join_many(Vec::<String>::new()).unwrap();
        client.leave("a").unwrap();
        assert_eq!(drain(&mut rx), vec!["JOIN #a", "JOIN #b,#c", "PART #a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_text_is_split() {
        let (client, mut rx) = connected(Some("bot"));
        let text = "word ".repeat(240);
        client.say("room", text.trim_end()).await.unwrap();
        let lines = drain(&mut rx);
        assert!(lines.len() >= 2);
        for line in &lines {
            let body = line.strip_prefix("PRIVMSG #room :").unwrap();
            assert!(body.len() <= MESSAGE_LIMIT);
            assert!(!body.starts_with(' '));
        }
    }
}
