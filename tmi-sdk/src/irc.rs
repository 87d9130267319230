//! Line codec for the tag-augmented IRC dialect spoken by the chat service.
//!
//! Inbound lines look like
//! `@tag1=val1;tag2 :prefix COMMAND param1 param2 :trailing text`.
//! Every segment except the command is optional. Parsing is lenient: a line
//! that cannot yield a command is dropped (`None`) rather than reported.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

/// Tags whose values must survive the `"1"`/`"0"` boolean coercion and the
/// flag-to-absent rewrite applied by the dispatcher.
pub const RAW_VALUE_TAGS: [&str; 3] = ["emote-sets", "ban-duration", "bits"];

/// A start/end character range of an emote inside a chat message.
pub type EmoteRange = (usize, usize);

/// The value stored under a tag key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TagValue {
    /// Present in the map but carrying no value.
    Absent,
    /// A flag. The wire form `key` / `key=` decodes to `Bool(true)`.
    Bool(bool),
    /// A plain (already unescaped) string value.
    Text(String),
    /// A decoded `key/value,key/value` structure (badges, badge-info).
    Map(BTreeMap<String, Option<String>>),
    /// A decoded `id:start-end,start-end/id:...` structure (emotes).
    Ranges(BTreeMap<String, Option<Vec<EmoteRange>>>),
}

impl TagValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            TagValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            TagValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, TagValue::Absent)
    }
}

impl From<&str> for TagValue {
    fn from(s: &str) -> Self {
        TagValue::Text(s.to_string())
    }
}

impl From<String> for TagValue {
    fn from(s: String) -> Self {
        TagValue::Text(s)
    }
}

impl From<bool> for TagValue {
    fn from(b: bool) -> Self {
        TagValue::Bool(b)
    }
}

/// Message tags keyed by tag name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Tags(HashMap<String, TagValue>);

impl Tags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&TagValue> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<TagValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<TagValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TagValue)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut TagValue)> {
        self.0.iter_mut()
    }

    /// String value of `key`, if the tag holds text.
    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(TagValue::as_str)
    }

    /// Boolean value of `key`, if the tag holds a flag.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(TagValue::as_bool)
    }

    /// Decoded `badges` map, if present.
    pub fn badges(&self) -> Option<&BTreeMap<String, Option<String>>> {
        match self.get("badges") {
            Some(TagValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Decoded `badge-info` map, if present.
    pub fn badge_info(&self) -> Option<&BTreeMap<String, Option<String>>> {
        match self.get("badge-info") {
            Some(TagValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// Decoded `emotes` ranges, if present.
    pub fn emotes(&self) -> Option<&BTreeMap<String, Option<Vec<EmoteRange>>>> {
        match self.get("emotes") {
            Some(TagValue::Ranges(m)) => Some(m),
            _ => None,
        }
    }

    /// Server timestamp carried in `tmi-sent-ts` (milliseconds since the epoch).
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let ms: i64 = self.text("tmi-sent-ts")?.parse().ok()?;
        Utc.timestamp_millis_opt(ms).single()
    }
}

impl FromIterator<(String, TagValue)> for Tags {
    fn from_iter<I: IntoIterator<Item = (String, TagValue)>>(iter: I) -> Self {
        Tags(iter.into_iter().collect())
    }
}

/// One decoded protocol line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// The line as received.
    pub raw: String,
    pub tags: Tags,
    /// Sender identity; empty when the server omitted the prefix.
    pub prefix: String,
    /// Verb or three-digit numeric.
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    /// Decode one line. Returns `None` for empty input or when the line ends
    /// before a command could be extracted.
    pub fn parse(line: &str) -> Option<Self> {
        let data = line.trim_end_matches(['\r', '\n']);
        if data.is_empty() {
            return None;
        }

        let mut tags = Tags::new();
        let mut pos = 0;

        if data.starts_with('@') {
            let space = data.find(' ')?;
            for piece in data[1..space].split(';') {
                match piece.split_once('=') {
                    Some((key, "")) => tags.insert(key, true),
                    Some((key, value)) => tags.insert(key, unescape(value)),
                    None => tags.insert(piece, true),
                }
            }
            pos = space + 1;
        }
        pos = skip_spaces(data, pos);

        let mut prefix = String::new();
        if data[pos..].starts_with(':') {
            let space = pos + data[pos..].find(' ')?;
            prefix = data[pos + 1..space].to_string();
            pos = skip_spaces(data, space + 1);
        }

        let command = match data[pos..].find(' ') {
            Some(offset) => {
                let end = pos + offset;
                let command = data[pos..end].to_string();
                pos = skip_spaces(data, end + 1);
                command
            }
            None if pos < data.len() => {
                let command = data[pos..].to_string();
                pos = data.len();
                command
            }
            None => return None,
        };

        let mut params = Vec::new();
        while pos < data.len() {
            if let Some(trailing) = data[pos..].strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match data[pos..].find(' ') {
                Some(offset) => {
                    params.push(data[pos..pos + offset].to_string());
                    pos = skip_spaces(data, pos + offset + 1);
                }
                None => {
                    params.push(data[pos..].to_string());
                    break;
                }
            }
        }

        Some(Self {
            raw: data.to_string(),
            tags,
            prefix,
            command,
            params,
        })
    }

    /// Nick portion of the prefix (`nick!user@host` → `nick`).
    pub fn nick(&self) -> &str {
        self.prefix.split('!').next().unwrap_or("")
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn skip_spaces(data: &str, mut pos: usize) -> usize {
    let bytes = data.as_bytes();
    while pos < bytes.len() && bytes[pos] == b' ' {
        pos += 1;
    }
    pos
}

/// Decode one of the multi-valued tag shapes in place.
///
/// The raw value is preserved under `"{key}-raw"` (absent when the tag was a
/// bare flag). Entries are split on `outer`, then each entry on `inner` into
/// a key and value. With a `position` separator the value is further read as
/// `start-end` pairs; pairs that are not two integers are dropped.
pub fn decode_complex_tag(
    tags: &mut Tags,
    key: &str,
    outer: char,
    inner: char,
    position: Option<char>,
) {
    let Some(raw) = tags.get(key).cloned() else {
        return;
    };
    let raw_key = format!("{key}-raw");

    let text = match raw {
        TagValue::Text(text) => text,
        TagValue::Bool(true) => {
            tags.insert(raw_key, TagValue::Absent);
            tags.insert(key, TagValue::Absent);
            return;
        }
        _ => {
            tags.insert(raw_key, TagValue::Absent);
            let empty = match position {
                Some(_) => TagValue::Ranges(BTreeMap::new()),
                None => TagValue::Map(BTreeMap::new()),
            };
            tags.insert(key, empty);
            return;
        }
    };

    let decoded = match position {
        Some(sep) => {
            let mut ranges = BTreeMap::new();
            for part in text.split(outer) {
                let mut pieces = part.split(inner);
                let id = pieces.next().unwrap_or_default().to_string();
                let value = pieces
                    .next()
                    .filter(|v| !v.is_empty())
                    .map(|v| parse_ranges(v, sep))
                    .filter(|r| !r.is_empty());
                ranges.insert(id, value);
            }
            TagValue::Ranges(ranges)
        }
        None => {
            let mut map = BTreeMap::new();
            for part in text.split(outer) {
                let mut pieces = part.split(inner);
                let name = pieces.next().unwrap_or_default().to_string();
                let value = pieces
                    .next()
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
                map.insert(name, value);
            }
            TagValue::Map(map)
        }
    };

    tags.insert(raw_key, TagValue::Text(text));
    tags.insert(key, decoded);
}

fn parse_ranges(value: &str, sep: char) -> Vec<EmoteRange> {
    value
        .split(sep)
        .filter_map(|pair| {
            let (start, end) = pair.split_once('-')?;
            if end.contains('-') {
                return None;
            }
            Some((start.parse().ok()?, end.parse().ok()?))
        })
        .collect()
}

/// `badges=broadcaster/1,subscriber/12`
pub fn parse_badges(tags: &mut Tags) {
    decode_complex_tag(tags, "badges", ',', '/', None);
}

/// `badge-info=subscriber/14`
pub fn parse_badge_info(tags: &mut Tags) {
    decode_complex_tag(tags, "badge-info", ',', '/', None);
}

/// `emotes=25:0-4,6-10/1902:12-16`
pub fn parse_emotes(tags: &mut Tags) {
    decode_complex_tag(tags, "emotes", '/', ':', Some(','));
}

/// Serialize outbound tags as `@k=v;k=v`, or an empty string when there are
/// none. Keys are emitted in sorted order.
pub fn encode_tags(tags: &HashMap<String, String>) -> String {
    if tags.is_empty() {
        return String::new();
    }
    let mut keys: Vec<&String> = tags.keys().collect();
    keys.sort();
    let body = keys
        .into_iter()
        .map(|k| format!("{}={}", escape(k), escape(&tags[k])))
        .collect::<Vec<_>>()
        .join(";");
    format!("@{body}")
}

/// Build one outbound line: optional tag block, then the command text.
pub fn format_line(tags: Option<&HashMap<String, String>>, command: &str) -> String {
    match tags.map(encode_tags).filter(|t| !t.is_empty()) {
        Some(block) => format!("{block} {command}"),
        None => command.to_string(),
    }
}

/// Escape a tag value for transmission.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            ' ' => out.push_str("\\s"),
            ';' => out.push_str("\\:"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Reverse of [`escape`]. `\r` and `\n` collapse to nothing; unknown escapes
/// keep the escaped character and drop the backslash.
pub fn unescape(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len());
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            match ch {
                's' => out.push(' '),
                ':' => out.push(';'),
                '\\' => out.push('\\'),
                'r' | 'n' => {}
                c => out.push(c),
            }
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}
