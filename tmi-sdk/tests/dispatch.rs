use std::collections::BTreeSet;

use tmi_sdk::config::ClientConfig;
use tmi_sdk::dispatch::{self, Directive, Outcome};
use tmi_sdk::event::{Event, EventKind};
use tmi_sdk::irc::Message;
use tmi_sdk::state::ClientState;
use tokio::sync::mpsc;

fn state_for(username: Option<&str>) -> ClientState {
    let mut config = ClientConfig::default();
    config.identity.username = username.map(str::to_string);
    ClientState::new(config)
}

fn feed(state: &mut ClientState, line: &str) -> Outcome {
    dispatch::handle(state, Message::parse(line).expect("valid line"))
}

fn kinds(out: &Outcome) -> Vec<EventKind> {
    out.events.iter().map(Event::kind).collect()
}

fn joined(state: &ClientState) -> BTreeSet<String> {
    state.channels.iter().cloned().collect()
}

#[test]
fn anonymous_joins_and_parts_track_rooms() {
    let mut st = state_for(None);
    let me = st.username.clone();

    feed(&mut st, &format!(":{me}!{me}@{me}.tmi.twitch.tv JOIN #a"));
    feed(&mut st, &format!(":{me}!{me}@{me}.tmi.twitch.tv JOIN #b"));
    feed(&mut st, &format!(":{me}!{me}@{me}.tmi.twitch.tv JOIN #c"));
    feed(&mut st, &format!(":{me}!{me}@{me}.tmi.twitch.tv PART #b"));
    feed(&mut st, ":other!other@other.tmi.twitch.tv JOIN #d");

    assert_eq!(joined(&st), BTreeSet::from(["#a".to_string(), "#c".to_string()]));
}

#[test]
fn authenticated_joins_come_from_userstate() {
    let mut st = state_for(Some("bot"));

    let out = feed(&mut st, ":bot!bot@bot.tmi.twitch.tv JOIN #a");
    assert!(!kinds(&out).contains(&EventKind::Join));
    assert!(st.channels.is_empty());

    let out = feed(&mut st, "@color=;display-name=Bot;mod=0 :tmi.twitch.tv USERSTATE #a");
    assert!(out.events.iter().any(|e| matches!(
        e,
        Event::Join { channel, is_self: true, .. } if channel == "#a"
    )));

    // A second snapshot for the same room is not another join.
    let out = feed(&mut st, "@mod=0 :tmi.twitch.tv USERSTATE #a");
    assert!(!kinds(&out).contains(&EventKind::Join));

    feed(&mut st, "@mod=1;user-type=mod :tmi.twitch.tv USERSTATE #b");
    feed(&mut st, ":bot!bot@bot.tmi.twitch.tv PART #a");
    assert_eq!(joined(&st), BTreeSet::from(["#b".to_string()]));
    assert!(st.is_mod("#b", "bot"));
    assert!(!st.user_state.contains_key("#a"));
}

#[test]
fn session_reset_clears_room_and_user_state() {
    let mut st = state_for(Some("bot"));
    feed(&mut st, "@mod=1;user-type=mod :tmi.twitch.tv USERSTATE #a");
    feed(&mut st, ":jtv MODE #a +o friend");
    feed(&mut st, "@display-name=Bot;user-id=1 :tmi.twitch.tv GLOBALUSERSTATE");
    feed(&mut st, "@slow=10 :tmi.twitch.tv ROOMSTATE #a");
    assert!(!st.moderators.is_empty());
    assert!(st.global_user_state.is_some());

    st.reset_session();

    assert!(st.moderators.is_empty());
    assert!(st.user_state.is_empty());
    assert!(st.global_user_state.is_none());
    assert!(st.room_state.is_empty());
    assert!(st.channels.is_empty());
    assert_eq!(st.take_join_targets(), vec!["#a".to_string()]);
}

#[test]
fn ping_while_connected_answers_once() {
    let mut st = state_for(Some("bot"));
    let (tx, _rx) = mpsc::unbounded_channel();
    st.link = Some(tx);

    let out = feed(&mut st, "PING :tmi.twitch.tv");
    assert_eq!(
        out.directives,
        vec![Directive::Send("PONG :tmi.twitch.tv".to_string())]
    );
    let pings = kinds(&out).into_iter().filter(|k| *k == EventKind::Ping).count();
    assert_eq!(pings, 1);
}

#[tokio::test(start_paused = true)]
async fn pong_reports_latency_and_disarms_timeout() {
    let mut st = state_for(Some("bot"));
    dispatch::mark_ping_sent(&mut st);
    tokio::time::advance(std::time::Duration::from_millis(40)).await;

    let out = feed(&mut st, ":tmi.twitch.tv PONG tmi.twitch.tv :tmi.twitch.tv");
    assert_eq!(out.directives, vec![Directive::CancelPingTimeout]);
    let latency = out.events.iter().find_map(|e| match e {
        Event::Pong { latency } => Some(*latency),
        _ => None,
    });
    let latency = latency.expect("pong event");
    assert!(latency >= std::time::Duration::from_millis(40));
    assert_eq!(st.latency, latency);
    assert!(st.ping_sent_at.is_none());
}

#[test]
fn chat_classification() {
    let mut st = state_for(Some("bot"));

    let out = feed(&mut st, "@badges=subscriber/12;bits=100;mod=0 :cheerer!c@c PRIVMSG #a :cheer100 nice");
    match out.events.last() {
        Some(Event::Cheer { message, bits }) => {
            assert_eq!(*bits, 100);
            assert_eq!(message.username, "cheerer");
            assert!(message.tags.badges().is_some());
        }
        other => panic!("expected cheer, got {other:?}"),
    }

    let out = feed(&mut st, ":someone!s@s PRIVMSG #a :\u{1}ACTION dances\u{1}");
    assert!(matches!(out.events.last(), Some(Event::Action(m)) if m.message == "dances"));

    let out = feed(&mut st, "@custom-reward-id=abc :someone!s@s PRIVMSG #a :redeemed");
    assert_eq!(kinds(&out)[1..], [EventKind::Redeem, EventKind::Chat]);

    let out = feed(&mut st, ":bot!bot@bot PRIVMSG #a :my own line");
    assert!(matches!(out.events.last(), Some(Event::Chat(m)) if m.is_self));
}

#[test]
fn clearchat_variants() {
    let mut st = state_for(Some("bot"));
    let out = feed(&mut st, "@ban-duration=600 :tmi.twitch.tv CLEARCHAT #a :troll");
    assert!(matches!(out.events.last(), Some(Event::Timeout { duration: 600, .. })));

    let out = feed(&mut st, ":tmi.twitch.tv CLEARCHAT #a :troll");
    assert!(matches!(out.events.last(), Some(Event::Ban { username, .. }) if username == "troll"));

    let out = feed(&mut st, ":tmi.twitch.tv CLEARCHAT #a");
    assert!(matches!(out.events.last(), Some(Event::ClearChat { .. })));
}

#[test]
fn roomstate_emits_mode_changes() {
    let mut st = state_for(Some("bot"));

    let out = feed(&mut st, "@followers-only=-1;slow=0;room-id=1 :tmi.twitch.tv ROOMSTATE #a");
    assert_eq!(kinds(&out)[1..], [EventKind::RoomState]);

    let out = feed(&mut st, "@room-id=1;slow=30 :tmi.twitch.tv ROOMSTATE #a");
    assert!(out.events.iter().any(|e| matches!(
        e,
        Event::SlowMode { enabled: true, seconds: 30, .. }
    )));

    let out = feed(&mut st, "@room-id=1;slow=0 :tmi.twitch.tv ROOMSTATE #a");
    assert!(out.events.iter().any(|e| matches!(
        e,
        Event::SlowMode { enabled: false, .. }
    )));

    let out = feed(&mut st, "@followers-only=10;room-id=1 :tmi.twitch.tv ROOMSTATE #a");
    assert!(out.events.iter().any(|e| matches!(
        e,
        Event::FollowersOnly { enabled: true, minutes: 10, .. }
    )));
}

#[test]
fn usernotice_resub() {
    let mut st = state_for(Some("bot"));
    let line = "@login=fan;display-name=Fan;msg-id=resub;msg-param-cumulative-months=6;msg-param-streak-months=2;msg-param-sub-plan=Prime;system-msg=Fan\\ssubscribed :tmi.twitch.tv USERNOTICE #a :Great stream";
    let out = feed(&mut st, line);
    match out.events.last() {
        Some(Event::Resub { username, months, streak_months, methods, message, .. }) => {
            assert_eq!(username, "fan");
            assert_eq!(*months, 6);
            assert_eq!(*streak_months, 2);
            assert!(methods.prime);
            assert_eq!(message, "Great stream");
        }
        other => panic!("expected resub, got {other:?}"),
    }
}

#[test]
fn notice_mods_list_replaces_moderators() {
    let mut st = state_for(Some("bot"));
    let out = feed(
        &mut st,
        "@msg-id=room_mods :tmi.twitch.tv NOTICE #a :The moderators of this channel are: alice, bob",
    );
    assert!(st.is_mod("#a", "alice"));
    assert!(st.is_mod("#a", "bob"));
    assert_eq!(kinds(&out)[1..], [EventKind::Mods, EventKind::Notice]);
}
