//! Inbound message interpretation.
//!
//! [`handle`] takes one decoded line, updates [`ClientState`] and returns the
//! events to emit plus the side effects the connection must carry out. It
//! never blocks and never touches the socket itself; the caller holds the
//! state lock for exactly one call, which keeps every message atomic with
//! respect to state.

use tokio::time::Instant;

use crate::event::{ChatMessage, Event, SubMethods};
use crate::irc::{self, Message, TagValue, Tags};
use crate::state::{self, ClientState, GlobalUserState, Phase, UserState};
use crate::util;

/// Prefix used by the chat service for its own messages.
pub const SERVER_PREFIX: &str = "tmi.twitch.tv";
/// Legacy service identity used for MODE notifications and host messages.
pub const LEGACY_PREFIX: &str = "jtv";

/// Side effects requested by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Write a line on the current connection.
    Send(String),
    /// The welcome burst finished: start the keep-alive cycle and join these
    /// rooms through the paced queue.
    StartSession { channels: Vec<String> },
    /// A PONG arrived; disarm the ping timeout.
    CancelPingTimeout,
    /// The server asked us to reconnect.
    Reconnect,
}

/// Result of handling one message.
#[derive(Debug, Default)]
pub struct Outcome {
    pub events: Vec<Event>,
    pub directives: Vec<Directive>,
}

impl Outcome {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    fn direct(&mut self, directive: Directive) {
        self.directives.push(directive);
    }
}

/// Per-message context shared by the handlers below.
struct Ctx {
    channel: String,
    msg: String,
    msg_id: String,
}

/// Interpret one message against `state`.
pub fn handle(state: &mut ClientState, mut message: Message) -> Outcome {
    let mut out = Outcome::default();
    out.emit(Event::Raw(message.clone()));

    let ctx = Ctx {
        channel: message.param(0).map(util::channel).unwrap_or_default(),
        msg: message.param(1).unwrap_or_default().to_string(),
        msg_id: message.tags.text("msg-id").unwrap_or_default().to_string(),
    };

    irc::parse_badges(&mut message.tags);
    irc::parse_badge_info(&mut message.tags);
    irc::parse_emotes(&mut message.tags);
    state::normalize_tags(&mut message.tags);

    let prefix = message.prefix.clone();
    match prefix.as_str() {
        "" => handle_keepalive(state, &message, &mut out),
        SERVER_PREFIX => handle_server(state, message, &ctx, &mut out),
        LEGACY_PREFIX => handle_legacy(state, &message, &ctx, &mut out),
        _ => handle_user(state, message, &ctx, &mut out),
    }
    out
}

fn handle_keepalive(state: &mut ClientState, message: &Message, out: &mut Outcome) {
    match message.command.as_str() {
        "PING" => {
            out.emit(Event::Ping);
            if state.is_connected() {
                let pong = match message.param(0) {
                    Some(token) => format!("PONG :{token}"),
                    None => "PONG".to_string(),
                };
                out.direct(Directive::Send(pong));
            }
        }
        "PONG" => on_pong(state, out),
        other => tracing::trace!(command = other, "Unhandled server line"),
    }
}

fn on_pong(state: &mut ClientState, out: &mut Outcome) {
    let latency = state
        .ping_sent_at
        .take()
        .map(|sent| sent.elapsed())
        .unwrap_or_default();
    state.latency = latency;
    tracing::debug!(latency_ms = latency.as_millis() as u64, "Pong");
    out.emit(Event::Pong { latency });
    out.direct(Directive::CancelPingTimeout);
}

fn handle_server(state: &mut ClientState, mut message: Message, ctx: &Ctx, out: &mut Outcome) {
    let channel = ctx.channel.clone();
    match message.command.as_str() {
        "001" => {
            if let Some(name) = message.param(0) {
                state.username = util::username(name);
            }
        }
        "002" | "003" | "004" | "375" | "372" | "CAP" => {}
        "376" => {
            tracing::info!(username = %state.username, "Connected to server");
            let global = state.config.options.global_default_channel.clone();
            state.user_state.insert(global, UserState::default());
            state.phase = Phase::Connected;
            state.reconnecting = false;
            state.reset_backoff();
            let channels = state.take_join_targets();
            out.emit(Event::Connected {
                server: state.config.connection.server.clone(),
                port: state.config.connection.port(),
            });
            out.direct(Directive::StartSession { channels });
        }
        "PONG" => on_pong(state, out),
        "NOTICE" => on_notice(state, ctx, out),
        "USERNOTICE" => on_usernotice(&mut message.tags, ctx, out),
        "HOSTTARGET" => {
            let mut parts = ctx.msg.split(' ');
            let target = parts.next().unwrap_or_default();
            let viewers = parts.next().map(util::parse_int).unwrap_or(0);
            if target == "-" {
                tracing::info!(channel = %channel, "Exited host mode");
                out.emit(Event::Unhost { channel, viewers });
            } else {
                tracing::info!(channel = %channel, host = target, viewers, "Now hosting");
                out.emit(Event::Hosting {
                    channel,
                    target: target.to_string(),
                    viewers,
                });
            }
        }
        "CLEARCHAT" => {
            if message.params.len() > 1 {
                let username = ctx.msg.clone();
                match message.tags.text("ban-duration").map(util::parse_int) {
                    None => {
                        tracing::info!(channel = %channel, username = %username, "User banned");
                        out.emit(Event::Ban {
                            channel,
                            username,
                            tags: message.tags,
                        });
                    }
                    Some(duration) => {
                        tracing::info!(channel = %channel, username = %username, duration, "User timed out");
                        out.emit(Event::Timeout {
                            channel,
                            username,
                            duration,
                            tags: message.tags,
                        });
                    }
                }
            } else {
                tracing::info!(channel = %channel, "Chat cleared by a moderator");
                out.emit(Event::ClearChat { channel });
            }
        }
        "CLEARMSG" => {
            if message.params.len() > 1 {
                let username = message.tags.text("login").unwrap_or_default().to_string();
                message.tags.insert("message-type", "messagedeleted");
                tracing::info!(channel = %channel, username = %username, "Message deleted");
                out.emit(Event::MessageDeleted {
                    channel,
                    username,
                    message: ctx.msg.clone(),
                    tags: message.tags,
                });
            }
        }
        "RECONNECT" => {
            tracing::info!("Server requested a reconnect");
            out.direct(Directive::Reconnect);
        }
        "USERSTATE" => on_userstate(state, message.tags, &channel, out),
        "GLOBALUSERSTATE" => {
            state.global_user_state = Some(GlobalUserState::from_tags(&message.tags));
            update_emote_sets(state, &message.tags, out);
            out.emit(Event::GlobalUserState { tags: message.tags });
        }
        "ROOMSTATE" => on_roomstate(state, message.tags, channel, out),
        other => tracing::trace!(command = other, "Unhandled server message"),
    }
}

fn on_notice(state: &mut ClientState, ctx: &Ctx, out: &mut Outcome) {
    let channel = ctx.channel.clone();
    match ctx.msg_id.as_str() {
        "room_mods" => {
            let mods = listed_names(&ctx.msg);
            state.moderators.insert(channel.clone(), mods.clone());
            out.emit(Event::Mods {
                channel: channel.clone(),
                mods,
            });
        }
        "no_mods" => {
            state.moderators.insert(channel.clone(), Vec::new());
            out.emit(Event::Mods {
                channel: channel.clone(),
                mods: Vec::new(),
            });
        }
        "vips_success" => out.emit(Event::Vips {
            channel: channel.clone(),
            vips: listed_names(&ctx.msg),
        }),
        "no_vips" => out.emit(Event::Vips {
            channel: channel.clone(),
            vips: Vec::new(),
        }),
        _ => {}
    }
    tracing::info!(channel = %channel, msg_id = %ctx.msg_id, "{}", ctx.msg);
    out.emit(Event::Notice {
        channel,
        msg_id: ctx.msg_id.clone(),
        message: ctx.msg.clone(),
    });
}

/// Names from a `"The moderators of this channel are: a, b, c"` style notice.
fn listed_names(msg: &str) -> Vec<String> {
    let Some((_, list)) = msg.split_once(": ") else {
        return Vec::new();
    };
    list.trim_end_matches('.')
        .split(", ")
        .map(util::username)
        .filter(|n| !n.is_empty())
        .collect()
}

fn on_usernotice(tags: &mut Tags, ctx: &Ctx, out: &mut Outcome) {
    let channel = ctx.channel.clone();
    let message = ctx.msg.clone();
    let username = tags
        .text("login")
        .or_else(|| tags.text("display-name"))
        .unwrap_or_default()
        .to_string();
    tags.insert("message-type", ctx.msg_id.as_str());
    let methods = SubMethods::from_tags(tags);
    let tags = tags.clone();

    let event = match ctx.msg_id.as_str() {
        "sub" => Event::Subscription {
            channel,
            username,
            methods,
            message,
            tags,
        },
        "resub" => Event::Resub {
            channel,
            username,
            months: int_tag(&tags, "msg-param-cumulative-months"),
            streak_months: int_tag(&tags, "msg-param-streak-months"),
            methods,
            message,
            tags,
        },
        "subgift" => Event::SubGift {
            channel,
            username,
            streak_months: int_tag(&tags, "msg-param-months"),
            recipient: recipient(&tags),
            methods,
            tags,
        },
        "submysterygift" => Event::SubMysteryGift {
            channel,
            username,
            count: int_tag(&tags, "msg-param-mass-gift-count"),
            methods,
            tags,
        },
        "anonsubgift" => Event::AnonSubGift {
            channel,
            streak_months: int_tag(&tags, "msg-param-months"),
            recipient: recipient(&tags),
            methods,
            tags,
        },
        "anonsubmysterygift" => Event::AnonSubMysteryGift {
            channel,
            count: int_tag(&tags, "msg-param-mass-gift-count"),
            methods,
            tags,
        },
        "giftpaidupgrade" => Event::GiftPaidUpgrade {
            channel,
            username,
            sender: tags
                .text("msg-param-sender-name")
                .or_else(|| tags.text("msg-param-sender-login"))
                .unwrap_or_default()
                .to_string(),
            tags,
        },
        "anongiftpaidupgrade" => Event::AnonGiftPaidUpgrade {
            channel,
            username,
            tags,
        },
        "primepaidupgrade" => Event::PrimePaidUpgrade {
            channel,
            username,
            methods,
            tags,
        },
        "raid" => Event::Raided {
            channel,
            username: tags
                .text("msg-param-login")
                .unwrap_or(&username)
                .to_string(),
            viewers: int_tag(&tags, "msg-param-viewerCount"),
            tags,
        },
        "ritual" => Event::Ritual {
            channel,
            username,
            ritual: tags.text("msg-param-ritual-name").unwrap_or_default().to_string(),
            message,
            tags,
        },
        "announcement" => Event::Announcement {
            channel,
            message,
            color: tags.text("msg-param-color").unwrap_or_default().to_string(),
            tags,
        },
        other => Event::UserNotice {
            msg_id: other.to_string(),
            channel,
            message,
            tags,
        },
    };
    tracing::info!(channel = ctx.channel.as_str(), msg_id = %ctx.msg_id, "User notice");
    out.emit(event);
}

fn recipient(tags: &Tags) -> String {
    tags.text("msg-param-recipient-display-name")
        .or_else(|| tags.text("msg-param-recipient-user-name"))
        .unwrap_or_default()
        .to_string()
}

/// Integer value of a numeric tag. Normalization may have turned `"1"` and
/// `"0"` into booleans, so those map back to numbers.
fn int_tag(tags: &Tags, key: &str) -> i64 {
    match tags.get(key) {
        Some(TagValue::Text(s)) => util::parse_int(s),
        Some(TagValue::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

fn on_userstate(state: &mut ClientState, mut tags: Tags, channel: &str, out: &mut Outcome) {
    let username = state.username.clone();
    tags.insert("username", username.as_str());

    if tags.text("user-type") == Some("mod") {
        state.add_moderator(channel, &username);
    }

    if !state.user_state.contains_key(channel) && !state.is_anonymous() {
        state.add_channel(channel);
        tracing::info!(channel, "Joined");
        out.emit(Event::Join {
            channel: channel.to_string(),
            username: username.clone(),
            is_self: true,
        });
    }

    update_emote_sets(state, &tags, out);
    state
        .user_state
        .insert(channel.to_string(), UserState::from_tags(&tags, &username));
}

fn update_emote_sets(state: &mut ClientState, tags: &Tags, out: &mut Outcome) {
    if let Some(sets) = tags.text("emote-sets") {
        if sets != state.emote_sets {
            state.emote_sets = sets.to_string();
            out.emit(Event::EmoteSets {
                sets: sets.to_string(),
            });
        }
    }
}

/// Mode carried by a ROOMSTATE tag: `(enabled, amount)`.
fn slow_mode(value: &TagValue) -> Option<(bool, i64)> {
    match value {
        TagValue::Bool(false) => Some((false, 0)),
        TagValue::Bool(true) => Some((true, 1)),
        TagValue::Text(s) => Some((true, util::parse_int(s))),
        _ => None,
    }
}

fn followers_mode(value: &TagValue) -> Option<(bool, i64)> {
    match value {
        TagValue::Text(s) if s == "-1" => Some((false, 0)),
        TagValue::Bool(false) => Some((true, 0)),
        TagValue::Bool(true) => Some((true, 1)),
        TagValue::Text(s) => Some((true, util::parse_int(s))),
        _ => None,
    }
}

/// Mode change between the stored and the new tag value. A room seen for
/// the first time only reports modes that are switched on.
fn mode_change(
    previous: Option<&Tags>,
    tags: &Tags,
    key: &str,
    decode: fn(&TagValue) -> Option<(bool, i64)>,
) -> Option<(bool, i64)> {
    let value = tags.get(key)?;
    let mode = decode(value)?;
    match previous {
        Some(prev) if prev.get(key) == Some(value) => None,
        Some(prev) if prev.contains_key(key) => Some(mode),
        _ => mode.0.then_some(mode),
    }
}

fn on_roomstate(state: &mut ClientState, mut tags: Tags, channel: String, out: &mut Outcome) {
    tags.insert("channel", channel.as_str());
    let previous = state.room_state.get(&channel);

    let slow = mode_change(previous, &tags, "slow", slow_mode);
    let followers = mode_change(previous, &tags, "followers-only", followers_mode);

    let snapshot = state.room_state.entry(channel.clone()).or_default();
    for (key, value) in tags.iter() {
        snapshot.insert(key.clone(), value.clone());
    }

    out.emit(Event::RoomState {
        channel: channel.clone(),
        tags,
    });
    if let Some((enabled, seconds)) = slow {
        tracing::info!(channel = %channel, enabled, seconds, "Slow mode changed");
        out.emit(Event::SlowMode {
            channel: channel.clone(),
            enabled,
            seconds,
        });
    }
    if let Some((enabled, minutes)) = followers {
        tracing::info!(channel = %channel, enabled, minutes, "Followers-only mode changed");
        out.emit(Event::FollowersOnly {
            channel,
            enabled,
            minutes,
        });
    }
}

fn handle_legacy(state: &mut ClientState, message: &Message, ctx: &Ctx, out: &mut Outcome) {
    if message.command != "MODE" || message.params.len() < 3 {
        return;
    }
    let channel = ctx.channel.clone();
    let username = util::username(&message.params[2]);
    match ctx.msg.as_str() {
        "+o" => {
            state.add_moderator(&channel, &username);
            out.emit(Event::Mod { channel, username });
        }
        "-o" => {
            state.remove_moderator(&channel, &username);
            out.emit(Event::Unmod { channel, username });
        }
        _ => {}
    }
}

fn handle_user(state: &mut ClientState, mut message: Message, ctx: &Ctx, out: &mut Outcome) {
    let nick = util::username(message.nick());
    let channel = ctx.channel.clone();
    let is_self = nick == state.username;

    match message.command.as_str() {
        "JOIN" => {
            if is_self && state.is_anonymous() {
                state.add_channel(&channel);
                tracing::info!(channel = %channel, "Joined");
                out.emit(Event::Join {
                    channel,
                    username: nick,
                    is_self: true,
                });
            } else if !is_self {
                out.emit(Event::Join {
                    channel,
                    username: nick,
                    is_self: false,
                });
            }
        }
        "PART" => {
            if is_self {
                state.remove_channel(&channel);
                tracing::info!(channel = %channel, "Left");
            }
            out.emit(Event::Part {
                channel,
                username: nick,
                is_self,
            });
        }
        "WHISPER" => {
            message.tags.insert("username", nick.as_str());
            message.tags.insert("message-type", "whisper");
            tracing::info!(from = %nick, "[WHISPER] {}", ctx.msg);
            out.emit(Event::Whisper(ChatMessage {
                channel: util::channel(&nick),
                username: nick,
                message: ctx.msg.clone(),
                tags: message.tags,
                is_self: false,
            }));
        }
        "PRIVMSG" => on_privmsg(state, message.tags, nick, ctx, out),
        "353" => {
            if message.params.len() >= 4 {
                let names = message.params[3]
                    .split(' ')
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect();
                out.emit(Event::Names {
                    channel: util::channel(&message.params[2]),
                    names,
                });
            }
        }
        other => tracing::trace!(command = other, prefix = %message.prefix, "Unhandled message"),
    }
}

fn on_privmsg(state: &ClientState, mut tags: Tags, nick: String, ctx: &Ctx, out: &mut Outcome) {
    let channel = ctx.channel.clone();
    let is_self = nick == state.username;

    if nick == LEGACY_PREFIX {
        on_hosted(&ctx.msg, channel, out);
        return;
    }

    tags.insert("username", nick.as_str());

    if let Some(action) = util::action_text(&ctx.msg) {
        tags.insert("message-type", "action");
        tracing::debug!(channel = %channel, "*<{}>: {}", nick, action);
        out.emit(Event::Action(ChatMessage {
            channel,
            username: nick,
            message: action.to_string(),
            tags,
            is_self,
        }));
        return;
    }

    tags.insert("message-type", "chat");

    if tags.contains_key("bits") {
        let bits = int_tag(&tags, "bits");
        tracing::debug!(channel = %channel, bits, "<{}> cheered: {}", nick, ctx.msg);
        out.emit(Event::Cheer {
            message: ChatMessage {
                channel,
                username: nick,
                message: ctx.msg.clone(),
                tags,
                is_self,
            },
            bits,
        });
        return;
    }

    let reward = match ctx.msg_id.as_str() {
        id @ ("highlighted-message" | "skip-subs-mode-message") => Some(id.to_string()),
        _ => tags.text("custom-reward-id").map(str::to_string),
    };
    if let Some(reward) = reward {
        out.emit(Event::Redeem {
            channel: channel.clone(),
            username: nick.clone(),
            reward,
            message: ctx.msg.clone(),
            tags: tags.clone(),
        });
    }

    tracing::debug!(channel = %channel, "<{}>: {}", nick, ctx.msg);
    out.emit(Event::Chat(ChatMessage {
        channel,
        username: nick,
        message: ctx.msg.clone(),
        tags,
        is_self,
    }));
}

/// `"somebody is now hosting you for 12 viewers."`
fn on_hosted(msg: &str, channel: String, out: &mut Outcome) {
    if !msg.contains("hosting you") {
        return;
    }
    let username = util::username(msg.split(' ').next().unwrap_or_default());
    let autohost = msg.contains("auto");
    let viewers = if msg.contains("hosting you for") {
        msg.split(' ')
            .find_map(|word| word.parse::<i64>().ok())
            .unwrap_or(0)
    } else {
        0
    };
    out.emit(Event::Hosted {
        channel,
        username,
        viewers,
        autohost,
    });
}

/// Arm the ping bookkeeping. Called by the keep-alive task right before it
/// writes `PING`.
pub fn mark_ping_sent(state: &mut ClientState) {
    state.ping_sent_at = Some(Instant::now());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    fn state() -> ClientState {
        let mut config = ClientConfig::default();
        config.identity.username = Some("me".into());
        ClientState::new(config)
    }

    fn feed(state: &mut ClientState, line: &str) -> Outcome {
        handle(state, Message::parse(line).unwrap())
    }

    fn kinds(out: &Outcome) -> Vec<crate::event::EventKind> {
        out.events.iter().map(Event::kind).collect()
    }

    #[test]
    fn raw_event_comes_first() {
        let mut s = state();
        let out = feed(&mut s, ":tmi.twitch.tv 001 me :Welcome, GLHF!");
        assert!(matches!(out.events[0], Event::Raw(_)));
        assert_eq!(s.username, "me");
    }

    #[test]
    fn end_of_motd_starts_session() {
        let mut s = state();
        s.config.channels = vec!["#a".into()];
        s.pending_rejoin = vec!["#b".into(), "#a".into()];
        s.reconnections = 3;
        let out = feed(&mut s, ":tmi.twitch.tv 376 me :>");
        assert_eq!(
            out.directives,
            vec![Directive::StartSession {
                channels: vec!["#a".into(), "#b".into()]
            }]
        );
        assert_eq!(s.reconnections, 0);
        assert_eq!(s.phase, Phase::Connected);
        assert!(s.user_state.contains_key("#tmijs"));
    }

    #[test]
    fn ping_without_link_emits_but_does_not_reply() {
        let mut s = state();
        let out = feed(&mut s, "PING :tmi.twitch.tv");
        assert_eq!(kinds(&out)[1..], [crate::event::EventKind::Ping]);
        assert!(out.directives.is_empty());
    }

    #[test]
    fn userstate_mod_adds_self() {
        let mut s = state();
        feed(&mut s, "@user-type=mod;mod=1 :tmi.twitch.tv USERSTATE #chan");
        assert!(s.is_mod("#chan", "me"));
        assert!(s.user_state["#chan"].is_mod);
        assert_eq!(s.channels, vec!["#chan"]);
    }

    #[test]
    fn legacy_mode_updates_moderators() {
        let mut s = state();
        let out = feed(&mut s, ":jtv MODE #chan +o someone");
        assert!(s.is_mod("#chan", "someone"));
        assert!(matches!(out.events.last(), Some(Event::Mod { .. })));
        feed(&mut s, ":jtv MODE #chan -o someone");
        assert!(!s.is_mod("#chan", "someone"));
    }

    #[test]
    fn listed_names_parse() {
        assert_eq!(
            listed_names("The moderators of this channel are: Alice, bob, carol"),
            vec!["alice", "bob", "carol"]
        );
        assert_eq!(
            listed_names("The VIPs of this channel are: a, b."),
            vec!["a", "b"]
        );
        assert!(listed_names("There are no moderators").is_empty());
    }

    #[test]
    fn int_tag_reads_coerced_booleans() {
        let mut tags = Tags::new();
        tags.insert("one", true);
        tags.insert("n", "12");
        assert_eq!(int_tag(&tags, "one"), 1);
        assert_eq!(int_tag(&tags, "n"), 12);
        assert_eq!(int_tag(&tags, "missing"), 0);
    }

    #[test]
    fn hosted_message() {
        let mut out = Outcome::default();
        on_hosted(
            "Somebody is now auto hosting you for up to 12 viewers.",
            "#me".into(),
            &mut out,
        );
        assert_eq!(
            out.events,
            vec![Event::Hosted {
                channel: "#me".into(),
                username: "somebody".into(),
                viewers: 12,
                autohost: true,
            }]
        );
    }
}
