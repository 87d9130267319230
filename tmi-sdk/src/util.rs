//! Identifier normalization and small helpers shared by the client and the
//! dispatcher.

use rand::Rng;

/// Marker that prefixes every room identifier.
pub const ROOM_MARKER: char = '#';

const ACTION_PREFIX: &str = "\u{1}ACTION ";
const ACTION_SUFFIX: char = '\u{1}';

/// Normalize a room name: trimmed, lower-cased, `#`-prefixed.
///
/// ```
/// assert_eq!(tmi_sdk::util::channel(" Foo "), "#foo");
/// assert_eq!(tmi_sdk::util::channel("#foo"), "#foo");
/// ```
pub fn channel(name: &str) -> String {
    let name = name.trim().to_lowercase();
    if name.starts_with(ROOM_MARKER) {
        name
    } else {
        format!("{ROOM_MARKER}{name}")
    }
}

/// Normalize a user name: trimmed, lower-cased, without a leading `#`.
pub fn username(name: &str) -> String {
    let name = name.trim().to_lowercase();
    match name.strip_prefix(ROOM_MARKER) {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// A random anonymous login (`justinfan1000`..`justinfan80999`).
pub fn justinfan() -> String {
    let n: u32 = rand::thread_rng().gen_range(1000..81000);
    format!("justinfan{n}")
}

/// Whether `name` is an anonymous login.
pub fn is_justinfan(name: &str) -> bool {
    name.strip_prefix("justinfan")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Strip an `oauth:` prefix from a credential.
pub fn token(credential: &str) -> &str {
    credential.strip_prefix("oauth:").unwrap_or(credential)
}

/// Credential in the `oauth:<token>` form the server expects in `PASS`.
/// Returns an empty string when there is no token.
pub fn password(credential: &str) -> String {
    match token(credential) {
        "" => String::new(),
        t => format!("oauth:{t}"),
    }
}

/// If `text` is wrapped in the CTCP ACTION envelope, return the inner text.
pub fn action_text(text: &str) -> Option<&str> {
    let inner = text.strip_prefix(ACTION_PREFIX)?.strip_suffix(ACTION_SUFFIX)?;
    if inner.is_empty() || inner.contains(ACTION_SUFFIX) {
        return None;
    }
    Some(inner)
}

/// Wrap `text` in the CTCP ACTION envelope.
pub fn action_envelope(text: &str) -> String {
    format!("{ACTION_PREFIX}{text}{ACTION_SUFFIX}")
}

/// Lenient integer parse; anything unparseable is zero.
pub fn parse_int(value: &str) -> i64 {
    value.trim().parse().unwrap_or(0)
}

/// Split `text` into chunks of at most `limit` bytes, breaking on the last
/// space inside each window when there is one. The separating space is
/// dropped.
pub fn split_message(text: &str, limit: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = text;
    while rest.len() > limit {
        let mut window = limit;
        while !rest.is_char_boundary(window) {
            window -= 1;
        }
        if window == 0 {
            window = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let space = if rest.as_bytes().get(window) == Some(&b' ') {
            Some(window)
        } else {
            rest[..window].rfind(' ')
        };
        match space {
            Some(space) if space > 0 => {
                parts.push(&rest[..space]);
                rest = &rest[space + 1..];
            }
            _ => {
                parts.push(&rest[..window]);
                rest = &rest[window..];
            }
        }
    }
    if !rest.is_empty() || parts.is_empty() {
        parts.push(rest);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_normalization_is_idempotent() {
        for raw in ["Twitch", "#Twitch", "  twitch  ", "#twitch"] {
            let once = channel(raw);
            assert_eq!(once, "#twitch");
            assert_eq!(channel(&once), once);
        }
        assert_eq!(channel(""), "#");
    }

    #[test]
    fn username_normalization_is_idempotent() {
        for raw in ["Schmoopiie", "#schmoopiie", " SCHMOOPIIE "] {
            let once = username(raw);
            assert_eq!(once, "schmoopiie");
            assert_eq!(username(&once), once);
        }
        assert_eq!(username(""), "");
    }

    #[test]
    fn justinfan_roundtrip() {
        for _ in 0..32 {
            let name = justinfan();
            assert!(is_justinfan(&name), "{name}");
        }
        assert!(!is_justinfan("justinfan"));
        assert!(!is_justinfan("justinfan12a"));
        assert!(!is_justinfan("schmoopiie"));
    }

    #[test]
    fn password_prefixes_oauth() {
        assert_eq!(password("abc"), "oauth:abc");
        assert_eq!(password("oauth:abc"), "oauth:abc");
        assert_eq!(password(""), "");
        assert_eq!(token("oauth:abc"), "abc");
    }

    #[test]
    fn action_detection() {
        assert_eq!(action_text("\u{1}ACTION waves\u{1}"), Some("waves"));
        assert_eq!(action_text("waves"), None);
        assert_eq!(action_text("\u{1}ACTION \u{1}"), None);
        assert_eq!(action_text(&action_envelope("dances")), Some("dances"));
    }

    #[test]
    fn parse_int_defaults_to_zero() {
        assert_eq!(parse_int("42"), 42);
        assert_eq!(parse_int("-1"), -1);
        assert_eq!(parse_int("abc"), 0);
        assert_eq!(parse_int(""), 0);
    }

    #[test]
    fn split_on_space() {
        let parts = split_message("aaaa bbbb cccc", 9);
        assert_eq!(parts, vec!["aaaa bbbb", "cccc"]);
    }

    #[test]
    fn split_without_space_cuts_hard() {
        let parts = split_message("abcdefghij", 4);
        assert_eq!(parts, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "ééééé";
        let parts = split_message(text, 3);
        assert!(parts.iter().all(|p| p.len() <= 3));
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn trailing_space_at_the_cut_leaves_no_empty_part() {
        let text = format!("{} ", "a".repeat(500));
        let parts = split_message(&text, 500);
        assert_eq!(parts, vec!["a".repeat(500)]);
    }

    #[test]
    fn short_message_is_single_part() {
        assert_eq!(split_message("hello", 500), vec!["hello"]);
    }
}
