//! Value tree → block-style YAML text.
//!
//! The emitter walks depth-first with a reference tracker: containers
//! already on the emit path render as the `"[Circular Reference]"` sentinel
//! instead of recursing, and nesting past the depth cap renders
//! `"[Max Depth Reached]"`. Strings always emit double-quoted; containers
//! emit block style (flow `[]`/`{}` only when empty).

use std::collections::HashSet;
use std::sync::Arc;

use crate::value::{format_number, Value};

pub(crate) const MAX_EMIT_DEPTH: usize = 64;

pub const CIRCULAR_SENTINEL: &str = "[Circular Reference]";
pub const DEPTH_SENTINEL: &str = "[Max Depth Reached]";

struct RefTracker {
    on_path: HashSet<usize>,
    depth: usize,
}

pub(crate) fn emit(value: &Value) -> Option<String> {
    let mut out = String::new();
    out.push_str("---\n");
    let mut tracker = RefTracker {
        on_path: HashSet::new(),
        depth: 0,
    };
    emit_block(value, 0, &mut out, &mut tracker)?;
    Some(out)
}

fn container_address(value: &Value) -> Option<usize> {
    match value {
        Value::Array(a) => Some(Arc::as_ptr(a) as *const u8 as usize),
        Value::Object(o) => Some(Arc::as_ptr(o) as *const u8 as usize),
        Value::Instance(i) => Some(Arc::as_ptr(i) as *const u8 as usize),
        _ => None,
    }
}

/// Scalars and empty containers render on one line.
fn inline_repr(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => Some(format_number(*n)),
        Value::Str(s) => Some(quote(s)),
        Value::Array(items) if items.read().unwrap().is_empty() => Some("[]".to_string()),
        Value::Object(map) if map.read().unwrap().is_empty() => Some("{}".to_string()),
        Value::Array(_) | Value::Object(_) | Value::Instance(_) => None,
        // Opaque runtime kinds render as their display form.
        other => Some(quote(&other.to_display_string())),
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn pad(indent: usize, out: &mut String) {
    for _ in 0..indent {
        out.push(' ');
    }
}

fn emit_block(
    value: &Value,
    indent: usize,
    out: &mut String,
    tracker: &mut RefTracker,
) -> Option<()> {
    if let Some(inline) = inline_repr(value) {
        pad(indent, out);
        out.push_str(&inline);
        out.push('\n');
        return Some(());
    }

    let address = container_address(value)?;
    if tracker.on_path.contains(&address) {
        pad(indent, out);
        out.push_str(&quote(CIRCULAR_SENTINEL));
        out.push('\n');
        return Some(());
    }
    if tracker.depth >= MAX_EMIT_DEPTH {
        pad(indent, out);
        out.push_str(&quote(DEPTH_SENTINEL));
        out.push('\n');
        return Some(());
    }

    tracker.on_path.insert(address);
    tracker.depth += 1;

    let result = match value {
        Value::Array(items) => {
            let items = items.read().unwrap().clone();
            for item in &items {
                match inline_repr_checked(item, tracker) {
                    Some(inline) => {
                        pad(indent, out);
                        out.push_str("- ");
                        out.push_str(&inline);
                        out.push('\n');
                    }
                    None => {
                        pad(indent, out);
                        out.push_str("-\n");
                        emit_block(item, indent + 2, out, tracker)?;
                    }
                }
            }
            Some(())
        }
        Value::Object(map) => {
            let entries: Vec<(String, Value)> = map
                .read()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.ref_clone()))
                .collect();
            for (key, item) in &entries {
                match inline_repr_checked(item, tracker) {
                    Some(inline) => {
                        pad(indent, out);
                        out.push_str(&emit_key(key));
                        out.push_str(": ");
                        out.push_str(&inline);
                        out.push('\n');
                    }
                    None => {
                        pad(indent, out);
                        out.push_str(&emit_key(key));
                        out.push_str(":\n");
                        emit_block(item, indent + 2, out, tracker)?;
                    }
                }
            }
            Some(())
        }
        Value::Instance(instance) => {
            let entries: Vec<(String, Value)> = instance
                .read()
                .unwrap()
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.ref_clone()))
                .collect();
            for (key, item) in &entries {
                match inline_repr_checked(item, tracker) {
                    Some(inline) => {
                        pad(indent, out);
                        out.push_str(&emit_key(key));
                        out.push_str(": ");
                        out.push_str(&inline);
                        out.push('\n');
                    }
                    None => {
                        pad(indent, out);
                        out.push_str(&emit_key(key));
                        out.push_str(":\n");
                        emit_block(item, indent + 2, out, tracker)?;
                    }
                }
            }
            Some(())
        }
        _ => None,
    };

    tracker.depth -= 1;
    tracker.on_path.remove(&address);
    result
}

/// Inline form, treating an already-visited container as the sentinel so a
/// cyclic child never starts a nested block.
fn inline_repr_checked(value: &Value, tracker: &RefTracker) -> Option<String> {
    if let Some(address) = container_address(value) {
        if tracker.on_path.contains(&address) {
            return Some(quote(CIRCULAR_SENTINEL));
        }
    }
    inline_repr(value)
}

/// Keys stay plain when they survive a round-trip unquoted.
fn emit_key(key: &str) -> String {
    let plain_safe = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        && key.parse::<f64>().is_err()
        && !matches!(key, "null" | "~" | "true" | "false" | "yes" | "no" | "on" | "off");
    if plain_safe {
        key.to_string()
    } else {
        quote(key)
    }
}
