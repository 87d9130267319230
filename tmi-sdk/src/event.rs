//! Events emitted by the chat client for the application layer to consume.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::irc::{Message, Tags};

/// A chat line, action, or whisper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    /// Room the line was sent to. For whispers, the sender as a room name.
    pub channel: String,
    /// Sender login.
    pub username: String,
    pub message: String,
    pub tags: Tags,
    /// Sent by the account this client is logged in as.
    pub is_self: bool,
}

impl ChatMessage {
    pub fn display_name(&self) -> &str {
        self.tags.text("display-name").unwrap_or(&self.username)
    }
}

/// Subscription plan details carried by sub notices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubMethods {
    /// Paid with a Prime subscription.
    pub prime: bool,
    /// `Prime`, `1000`, `2000` or `3000`.
    pub plan: Option<String>,
    pub plan_name: Option<String>,
}

impl SubMethods {
    pub fn from_tags(tags: &Tags) -> Self {
        let plan = tags.text("msg-param-sub-plan").map(str::to_string);
        Self {
            prime: plan.as_deref().is_some_and(|p| p.contains("Prime")),
            plan,
            plan_name: tags.text("msg-param-sub-plan-name").map(str::to_string),
        }
    }
}

/// Events the client emits to the consumer (bot, overlay, logger, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    // ── Lifecycle ──
    /// Opening the socket.
    Connecting { server: String, port: u16 },
    /// Socket open, credentials sent.
    Logon,
    /// Handshake confirmed by the server.
    Connected { server: String, port: u16 },
    Disconnected { reason: String },
    /// A reconnect attempt has been scheduled.
    Reconnect,
    /// Reconnect attempts exhausted; the client stays disconnected until
    /// `connect()` is called again.
    MaxReconnect,
    Ping,
    Pong { latency: Duration },
    /// Every decoded inbound line, before any interpretation.
    Raw(Message),

    // ── Chat ──
    Chat(ChatMessage),
    Action(ChatMessage),
    Whisper(ChatMessage),
    Cheer { message: ChatMessage, bits: i64 },
    /// Channel point redemption. `reward` is the reward id or the msg-id of
    /// a built-in reward.
    Redeem {
        channel: String,
        username: String,
        reward: String,
        message: String,
        tags: Tags,
    },

    // ── Membership ──
    Join { channel: String, username: String, is_self: bool },
    Part { channel: String, username: String, is_self: bool },
    Names { channel: String, names: Vec<String> },

    // ── Room and user state ──
    RoomState { channel: String, tags: Tags },
    SlowMode { channel: String, enabled: bool, seconds: i64 },
    FollowersOnly { channel: String, enabled: bool, minutes: i64 },
    EmoteSets { sets: String },
    GlobalUserState { tags: Tags },

    // ── Subscriptions and other user notices ──
    Subscription {
        channel: String,
        username: String,
        methods: SubMethods,
        message: String,
        tags: Tags,
    },
    Resub {
        channel: String,
        username: String,
        months: i64,
        streak_months: i64,
        methods: SubMethods,
        message: String,
        tags: Tags,
    },
    SubGift {
        channel: String,
        username: String,
        streak_months: i64,
        recipient: String,
        methods: SubMethods,
        tags: Tags,
    },
    SubMysteryGift {
        channel: String,
        username: String,
        count: i64,
        methods: SubMethods,
        tags: Tags,
    },
    AnonSubGift {
        channel: String,
        streak_months: i64,
        recipient: String,
        methods: SubMethods,
        tags: Tags,
    },
    AnonSubMysteryGift {
        channel: String,
        count: i64,
        methods: SubMethods,
        tags: Tags,
    },
    GiftPaidUpgrade {
        channel: String,
        username: String,
        sender: String,
        tags: Tags,
    },
    AnonGiftPaidUpgrade { channel: String, username: String, tags: Tags },
    PrimePaidUpgrade {
        channel: String,
        username: String,
        methods: SubMethods,
        tags: Tags,
    },
    Raided {
        channel: String,
        username: String,
        viewers: i64,
        tags: Tags,
    },
    Ritual {
        channel: String,
        username: String,
        ritual: String,
        message: String,
        tags: Tags,
    },
    Announcement {
        channel: String,
        message: String,
        color: String,
        tags: Tags,
    },
    /// A USERNOTICE with an id this client does not decode further.
    UserNotice {
        msg_id: String,
        channel: String,
        message: String,
        tags: Tags,
    },

    // ── Hosting ──
    Hosting { channel: String, target: String, viewers: i64 },
    Unhost { channel: String, viewers: i64 },
    /// Another channel started hosting ours.
    Hosted {
        channel: String,
        username: String,
        viewers: i64,
        autohost: bool,
    },

    // ── Moderation ──
    Ban { channel: String, username: String, tags: Tags },
    Timeout {
        channel: String,
        username: String,
        duration: i64,
        tags: Tags,
    },
    ClearChat { channel: String },
    MessageDeleted {
        channel: String,
        username: String,
        message: String,
        tags: Tags,
    },
    Mod { channel: String, username: String },
    Unmod { channel: String, username: String },
    Mods { channel: String, mods: Vec<String> },
    Vips { channel: String, vips: Vec<String> },
    /// Server notice keyed by its machine-readable id.
    Notice {
        channel: String,
        msg_id: String,
        message: String,
    },
}

/// Handler registration key. Most kinds correspond to one [`Event`]
/// variant; a few are aliases that receive events of another variant too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Connecting,
    Logon,
    Connected,
    Disconnected,
    Reconnect,
    MaxReconnect,
    Ping,
    Pong,
    Raw,
    Chat,
    Action,
    Whisper,
    /// Alias: chat, action and whisper.
    Message,
    Cheer,
    Redeem,
    Join,
    Part,
    Names,
    RoomState,
    SlowMode,
    /// Alias of `SlowMode`.
    Slow,
    FollowersOnly,
    /// Alias of `FollowersOnly`.
    FollowersMode,
    EmoteSets,
    GlobalUserState,
    Subscription,
    /// Alias of `Subscription`.
    Sub,
    Resub,
    /// Alias of `Resub`.
    SubAnniversary,
    SubGift,
    SubMysteryGift,
    AnonSubGift,
    AnonSubMysteryGift,
    GiftPaidUpgrade,
    AnonGiftPaidUpgrade,
    PrimePaidUpgrade,
    Raided,
    Ritual,
    Announcement,
    UserNotice,
    Hosting,
    Unhost,
    Hosted,
    Ban,
    Timeout,
    ClearChat,
    MessageDeleted,
    Mod,
    Unmod,
    Mods,
    Vips,
    Notice,
}

impl EventKind {
    /// Additional kinds whose handlers also receive events of this kind.
    pub fn aliases(self) -> &'static [EventKind] {
        match self {
            EventKind::Chat | EventKind::Action | EventKind::Whisper => &[EventKind::Message],
            EventKind::SlowMode => &[EventKind::Slow],
            EventKind::FollowersOnly => &[EventKind::FollowersMode],
            EventKind::Subscription => &[EventKind::Sub],
            EventKind::Resub => &[EventKind::SubAnniversary],
            _ => &[],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::Connecting => "connecting",
            EventKind::Logon => "logon",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Reconnect => "reconnect",
            EventKind::MaxReconnect => "maxreconnect",
            EventKind::Ping => "ping",
            EventKind::Pong => "pong",
            EventKind::Raw => "raw_message",
            EventKind::Chat => "chat",
            EventKind::Action => "action",
            EventKind::Whisper => "whisper",
            EventKind::Message => "message",
            EventKind::Cheer => "cheer",
            EventKind::Redeem => "redeem",
            EventKind::Join => "join",
            EventKind::Part => "part",
            EventKind::Names => "names",
            EventKind::RoomState => "roomstate",
            EventKind::SlowMode => "slowmode",
            EventKind::Slow => "slow",
            EventKind::FollowersOnly => "followersonly",
            EventKind::FollowersMode => "followersmode",
            EventKind::EmoteSets => "emotesets",
            EventKind::GlobalUserState => "globaluserstate",
            EventKind::Subscription => "subscription",
            EventKind::Sub => "sub",
            EventKind::Resub => "resub",
            EventKind::SubAnniversary => "subanniversary",
            EventKind::SubGift => "subgift",
            EventKind::SubMysteryGift => "submysterygift",
            EventKind::AnonSubGift => "anonsubgift",
            EventKind::AnonSubMysteryGift => "anonsubmysterygift",
            EventKind::GiftPaidUpgrade => "giftpaidupgrade",
            EventKind::AnonGiftPaidUpgrade => "anongiftpaidupgrade",
            EventKind::PrimePaidUpgrade => "primepaidupgrade",
            EventKind::Raided => "raided",
            EventKind::Ritual => "ritual",
            EventKind::Announcement => "announcement",
            EventKind::UserNotice => "usernotice",
            EventKind::Hosting => "hosting",
            EventKind::Unhost => "unhost",
            EventKind::Hosted => "hosted",
            EventKind::Ban => "ban",
            EventKind::Timeout => "timeout",
            EventKind::ClearChat => "clearchat",
            EventKind::MessageDeleted => "messagedeleted",
            EventKind::Mod => "mod",
            EventKind::Unmod => "unmod",
            EventKind::Mods => "mods",
            EventKind::Vips => "vips",
            EventKind::Notice => "notice",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connecting { .. } => EventKind::Connecting,
            Event::Logon => EventKind::Logon,
            Event::Connected { .. } => EventKind::Connected,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Reconnect => EventKind::Reconnect,
            Event::MaxReconnect => EventKind::MaxReconnect,
            Event::Ping => EventKind::Ping,
            Event::Pong { .. } => EventKind::Pong,
            Event::Raw(_) => EventKind::Raw,
            Event::Chat(_) => EventKind::Chat,
            Event::Action(_) => EventKind::Action,
            Event::Whisper(_) => EventKind::Whisper,
            Event::Cheer { .. } => EventKind::Cheer,
            Event::Redeem { .. } => EventKind::Redeem,
            Event::Join { .. } => EventKind::Join,
            Event::Part { .. } => EventKind::Part,
            Event::Names { .. } => EventKind::Names,
            Event::RoomState { .. } => EventKind::RoomState,
            Event::SlowMode { .. } => EventKind::SlowMode,
            Event::FollowersOnly { .. } => EventKind::FollowersOnly,
            Event::EmoteSets { .. } => EventKind::EmoteSets,
            Event::GlobalUserState { .. } => EventKind::GlobalUserState,
            Event::Subscription { .. } => EventKind::Subscription,
            Event::Resub { .. } => EventKind::Resub,
            Event::SubGift { .. } => EventKind::SubGift,
            Event::SubMysteryGift { .. } => EventKind::SubMysteryGift,
            Event::AnonSubGift { .. } => EventKind::AnonSubGift,
            Event::AnonSubMysteryGift { .. } => EventKind::AnonSubMysteryGift,
            Event::GiftPaidUpgrade { .. } => EventKind::GiftPaidUpgrade,
            Event::AnonGiftPaidUpgrade { .. } => EventKind::AnonGiftPaidUpgrade,
            Event::PrimePaidUpgrade { .. } => EventKind::PrimePaidUpgrade,
            Event::Raided { .. } => EventKind::Raided,
            Event::Ritual { .. } => EventKind::Ritual,
            Event::Announcement { .. } => EventKind::Announcement,
            Event::UserNotice { .. } => EventKind::UserNotice,
            Event::Hosting { .. } => EventKind::Hosting,
            Event::Unhost { .. } => EventKind::Unhost,
            Event::Hosted { .. } => EventKind::Hosted,
            Event::Ban { .. } => EventKind::Ban,
            Event::Timeout { .. } => EventKind::Timeout,
            Event::ClearChat { .. } => EventKind::ClearChat,
            Event::MessageDeleted { .. } => EventKind::MessageDeleted,
            Event::Mod { .. } => EventKind::Mod,
            Event::Unmod { .. } => EventKind::Unmod,
            Event::Mods { .. } => EventKind::Mods,
            Event::Vips { .. } => EventKind::Vips,
            Event::Notice { .. } => EventKind::Notice,
        }
    }

    /// Room the event concerns, when there is one.
    pub fn channel(&self) -> Option<&str> {
        let channel = match self {
            Event::Chat(m) | Event::Action(m) | Event::Whisper(m) => Some(&m.channel),
            Event::Cheer { message, .. } => Some(&message.channel),
            Event::Redeem { channel, .. }
            | Event::Join { channel, .. }
            | Event::Part { channel, .. }
            | Event::Names { channel, .. }
            | Event::RoomState { channel, .. }
            | Event::SlowMode { channel, .. }
            | Event::FollowersOnly { channel, .. }
            | Event::Subscription { channel, .. }
            | Event::Resub { channel, .. }
            | Event::SubGift { channel, .. }
            | Event::SubMysteryGift { channel, .. }
            | Event::AnonSubGift { channel, .. }
            | Event::AnonSubMysteryGift { channel, .. }
            | Event::GiftPaidUpgrade { channel, .. }
            | Event::AnonGiftPaidUpgrade { channel, .. }
            | Event::PrimePaidUpgrade { channel, .. }
            | Event::Raided { channel, .. }
            | Event::Ritual { channel, .. }
            | Event::Announcement { channel, .. }
            | Event::UserNotice { channel, .. }
            | Event::Hosting { channel, .. }
            | Event::Unhost { channel, .. }
            | Event::Hosted { channel, .. }
            | Event::Ban { channel, .. }
            | Event::Timeout { channel, .. }
            | Event::ClearChat { channel }
            | Event::MessageDeleted { channel, .. }
            | Event::Mod { channel, .. }
            | Event::Unmod { channel, .. }
            | Event::Mods { channel, .. }
            | Event::Vips { channel, .. }
            | Event::Notice { channel, .. } => Some(channel),
            _ => None,
        };
        channel.map(String::as_str)
    }
}
