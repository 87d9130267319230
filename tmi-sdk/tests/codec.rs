use std::collections::{BTreeMap, HashMap};

use tmi_sdk::irc::{self, Message, TagValue, Tags};

#[test]
fn lines_without_a_command_are_dropped() {
    assert!(Message::parse("").is_none());
    assert!(Message::parse("@onlytags").is_none());
    assert!(Message::parse(":onlyprefix").is_none());
}

#[test]
fn bare_command() {
    let msg = Message::parse("COMMAND").unwrap();
    assert_eq!(msg.prefix, "");
    assert_eq!(msg.command, "COMMAND");
    assert!(msg.params.is_empty());
    assert!(msg.tags.is_empty());
}

#[test]
fn privmsg_with_tags() {
    let line = "@badge-info=;badges=broadcaster/1;color=#0D4200;display-name=Ronni;emotes=25:0-4;mod=0;room-id=1337 :ronni!ronni@ronni.tmi.twitch.tv PRIVMSG #ronni :Kappa Keepo Kappa";
    let msg = Message::parse(line).unwrap();
    assert_eq!(msg.nick(), "ronni");
    assert_eq!(msg.command, "PRIVMSG");
    assert_eq!(msg.params, vec!["#ronni", "Kappa Keepo Kappa"]);
    assert_eq!(msg.tags.text("display-name"), Some("Ronni"));
    assert_eq!(msg.tags.get("badge-info"), Some(&TagValue::Bool(true)));
    assert_eq!(msg.tags.text("mod"), Some("0"));
    assert_eq!(msg.raw, line);
}

#[test]
fn badges_decode_and_keep_raw() {
    let mut tags = Tags::new();
    tags.insert("badges", "broadcaster/1,moderator/1");
    irc::parse_badges(&mut tags);

    let expected = BTreeMap::from([
        ("broadcaster".to_string(), Some("1".to_string())),
        ("moderator".to_string(), Some("1".to_string())),
    ]);
    assert_eq!(tags.badges(), Some(&expected));
    assert_eq!(tags.text("badges-raw"), Some("broadcaster/1,moderator/1"));
}

#[test]
fn emotes_decode_into_ranges() {
    let mut tags = Tags::new();
    tags.insert("emotes", "25:0-4,6-10");
    irc::parse_emotes(&mut tags);

    let expected = BTreeMap::from([("25".to_string(), Some(vec![(0, 4), (6, 10)]))]);
    assert_eq!(tags.emotes(), Some(&expected));
    assert_eq!(tags.text("emotes-raw"), Some("25:0-4,6-10"));
}

#[test]
fn flag_valued_complex_tag_is_absent() {
    let mut tags = Tags::new();
    tags.insert("badges", true);
    irc::parse_badges(&mut tags);
    assert_eq!(tags.get("badges"), Some(&TagValue::Absent));
    assert_eq!(tags.get("badges-raw"), Some(&TagValue::Absent));
}

#[test]
fn missing_complex_tag_is_untouched() {
    let mut tags = Tags::new();
    irc::parse_emotes(&mut tags);
    assert!(tags.is_empty());
}

#[test]
fn encode_empty_tags() {
    assert_eq!(irc::encode_tags(&HashMap::new()), "");
}

#[test]
fn escaped_values_survive_decode_then_encode() {
    let value = "semi; colon back\\slash";
    let mut out = HashMap::new();
    out.insert("msg".to_string(), value.to_string());
    let encoded = irc::encode_tags(&out);
    assert_eq!(encoded, "@msg=semi\\:\\scolon\\sback\\\\slash");

    let msg = Message::parse(&format!("{encoded} PING")).unwrap();
    assert_eq!(msg.tags.text("msg"), Some(value));

    let mut again = HashMap::new();
    again.insert("msg".to_string(), msg.tags.text("msg").unwrap().to_string());
    assert_eq!(irc::encode_tags(&again), encoded);
}

#[test]
fn line_breaks_do_not_survive_decode() {
    let mut out = HashMap::new();
    out.insert("msg".to_string(), "a\r\nb".to_string());
    let encoded = irc::encode_tags(&out);
    assert_eq!(encoded, "@msg=a\\r\\nb");

    let msg = Message::parse(&format!("{encoded} PING")).unwrap();
    assert_eq!(msg.tags.text("msg"), Some("ab"));
}

#[test]
fn outbound_line_with_tags() {
    let mut tags = HashMap::new();
    tags.insert("reply-parent-msg-id".to_string(), "b34ccfc7".to_string());
    assert_eq!(
        irc::format_line(Some(&tags), "PRIVMSG #room :hi"),
        "@reply-parent-msg-id=b34ccfc7 PRIVMSG #room :hi"
    );
}
