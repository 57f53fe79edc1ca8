use std::fmt::Write as _;

use cmp_types::Payload;
use serde_json::{Map, Value};

/// Canonical encoding of an absent payload.
pub const NULL_PAYLOAD: &str = "null";

/// Deterministic, order-independent JSON encoding of a payload.
///
/// - `None` encodes as [`NULL_PAYLOAD`]; an empty payload encodes as `{}`.
/// - Object keys are emitted in byte-wise lexicographic order at every depth.
/// - No whitespace; `,` separates members and `:` separates key from value.
/// - Strings escape `"`, `\`, and control characters; all other characters
///   are written as raw UTF-8.
/// - Numbers use the shortest round-trip form (`1`, `-3`, `0.1`, `1.0`).
///
/// Key ordering is done here rather than relying on the JSON library's map
/// type, so the output is the same whichever map backing is compiled in.
pub fn canonicalize(payload: Option<&Payload>) -> String {
    match payload {
        None => NULL_PAYLOAD.to_string(),
        Some(p) => {
            let mut out = String::new();
            write_object(&mut out, p.as_map());
            out
        }
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(out, map),
    }
}

fn write_object(out: &mut String, map: &Map<String, Value>) {
    let mut members: Vec<(&String, &Value)> = map.iter().collect();
    members.sort_unstable_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    out.push('{');
    for (i, (key, value)) in members.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
