//! # JSON Envelope
//!
//! When a session negotiates JSON support, control-message payloads travel
//! as small JSON documents instead of raw text. Three encode shapes exist:
//! a single value under the default key, a flat map zipped from two
//! delimiter-separated lists, and a flat map parsed from `key: value`
//! lines. Decoding is always by key and never fatal — a malformed document
//! or missing key is simply "no value", because inbound payloads are
//! untrusted.

use serde_json::{Map, Value};

/// Key used for single-value envelopes and for the client-version field of
/// the extended login.
pub const DEFAULT_KEY: &str = "msg";

// ─── Encode ─────────────────────────────────────────────────────────────────

/// Wrap one value: `{"msg": value}`.
pub fn encode_single(value: &str) -> String {
    Value::Object(single_map(value)).to_string()
}

fn single_map(value: &str) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(DEFAULT_KEY.to_string(), Value::String(value.to_string()));
    map
}

/// Zip two delimiter-separated lists into a flat map. Pairing stops at the
/// shorter list; empty tokens are skipped, as repeated delimiters carry no
/// entry.
pub fn encode_multi(
    keys: &str,
    keys_delims: &str,
    values: &str,
    values_delims: &str,
) -> String {
    let mut map = Map::new();
    for (key, value) in tokens(keys, keys_delims).zip(tokens(values, values_delims)) {
        map.insert(key.to_string(), Value::String(value.to_string()));
    }
    Value::Object(map).to_string()
}

/// Parse a `key: value` per line blob into a flat map. Whitespace after the
/// colon is not part of the value; lines without a colon are dropped.
pub fn encode_pairs(text: &str) -> String {
    let mut map = Map::new();
    for line in text.lines() {
        if let Some((key, value)) = line.split_once(':') {
            map.insert(
                key.to_string(),
                Value::String(value.trim_start().to_string()),
            );
        }
    }
    Value::Object(map).to_string()
}

fn tokens<'a>(s: &'a str, delims: &'a str) -> impl Iterator<Item = &'a str> {
    s.split(move |c| delims.contains(c)).filter(|t| !t.is_empty())
}

// ─── Decode ─────────────────────────────────────────────────────────────────

/// String value for `key`, or `None` when the document is malformed, its
/// root is not an object, the key is absent, or the value is not a string.
pub fn decode_key(json: &str, key: &str) -> Option<String> {
    serde_json::from_str::<Value>(json)
        .ok()?
        .as_object()?
        .get(key)?
        .as_str()
        .map(str::to_string)
}
