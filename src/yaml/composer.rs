//! Event stream → value tree.
//!
//! Maintains the anchor map (duplicate anchors: last wins), resolves
//! aliases by handing out another reference to the anchored value, and
//! folds `<<` merge keys into the surrounding mapping with local keys
//! winning.

use std::collections::HashMap;

use crate::error::ErrorCode;
use crate::value::{ObjectMap, Value};

use super::events::Event;

pub(crate) fn compose(events: &[Event]) -> Result<Value, Value> {
    let mut cursor = 0usize;
    let mut anchors: HashMap<String, Value> = HashMap::new();

    expect(events, &mut cursor, |e| matches!(e, Event::StreamStart))?;
    expect(events, &mut cursor, |e| matches!(e, Event::DocumentStart))?;
    let root = compose_node(events, &mut cursor, &mut anchors)?;
    expect(events, &mut cursor, |e| matches!(e, Event::DocumentEnd))?;
    expect(events, &mut cursor, |e| matches!(e, Event::StreamEnd))?;
    Ok(root)
}

fn expect(
    events: &[Event],
    cursor: &mut usize,
    want: fn(&Event) -> bool,
) -> Result<(), Value> {
    match events.get(*cursor) {
        Some(event) if want(event) => {
            *cursor += 1;
            Ok(())
        }
        other => Err(Value::error(
            ErrorCode::ParsingFailed,
            format!("unexpected event in stream: {:?}", other),
        )),
    }
}

fn compose_node(
    events: &[Event],
    cursor: &mut usize,
    anchors: &mut HashMap<String, Value>,
) -> Result<Value, Value> {
    let event = events
        .get(*cursor)
        .ok_or_else(|| Value::error(ErrorCode::ParsingFailed, "truncated event stream"))?
        .clone();
    *cursor += 1;

    match event {
        Event::Scalar { value, anchor, quoted } => {
            let node = classify_scalar(&value, quoted);
            if let Some(name) = anchor {
                anchors.insert(name, node.ref_clone());
            }
            Ok(node)
        }
        Event::Alias { name } => match anchors.get(&name) {
            Some(value) => Ok(value.ref_clone()),
            None => Err(Value::error(
                ErrorCode::UnknownAnchor,
                format!("Unknown anchor '{}'", name),
            )),
        },
        Event::SequenceStart { anchor } => {
            let mut items = Vec::new();
            while !matches!(events.get(*cursor), Some(Event::SequenceEnd)) {
                items.push(compose_node(events, cursor, anchors)?);
            }
            *cursor += 1;
            let node = Value::array(items);
            // Register after construction: aliases cannot see a collection
            // from inside itself.
            if let Some(name) = anchor {
                anchors.insert(name, node.ref_clone());
            }
            Ok(node)
        }
        Event::MappingStart { anchor } => {
            let mut map = ObjectMap::new();
            loop {
                match events.get(*cursor) {
                    Some(Event::MappingEnd) => {
                        *cursor += 1;
                        break;
                    }
                    Some(Event::SequenceStart { .. }) | Some(Event::MappingStart { .. }) => {
                        return Err(Value::error(
                            ErrorCode::InvalidMappingKey,
                            "mapping key must be a scalar",
                        ))
                    }
                    Some(_) => {}
                    None => {
                        return Err(Value::error(
                            ErrorCode::ParsingFailed,
                            "unterminated mapping",
                        ))
                    }
                }

                let key = compose_key(events, cursor, anchors)?;
                let value = compose_node(events, cursor, anchors)?;

                if key == "<<" {
                    merge_into(&mut map, &value)?;
                } else {
                    map.insert(key, value);
                }
            }
            let node = Value::object(map);
            if let Some(name) = anchor {
                anchors.insert(name, node.ref_clone());
            }
            Ok(node)
        }
        other => Err(Value::error(
            ErrorCode::ParsingFailed,
            format!("unexpected event: {:?}", other),
        )),
    }
}

/// Keys must be scalars and must coerce to string. An alias key resolves
/// first and must name a scalar.
fn compose_key(
    events: &[Event],
    cursor: &mut usize,
    anchors: &mut HashMap<String, Value>,
) -> Result<String, Value> {
    let event = events
        .get(*cursor)
        .ok_or_else(|| Value::error(ErrorCode::ParsingFailed, "truncated event stream"))?
        .clone();

    match event {
        Event::Scalar { value, .. } => {
            *cursor += 1;
            Ok(value)
        }
        Event::Alias { .. } => {
            let resolved = compose_node(events, cursor, anchors)?;
            match resolved {
                Value::Null
                | Value::Bool(_)
                | Value::Number(_)
                | Value::Str(_) => Ok(resolved.to_display_string()),
                other => Err(Value::error(
                    ErrorCode::InvalidMappingKey,
                    format!("mapping key must be a scalar, got {}", other.type_name()),
                )),
            }
        }
        other => Err(Value::error(
            ErrorCode::InvalidMappingKey,
            format!("mapping key must be a scalar, got {:?}", other),
        )),
    }
}

/// `<<` merge: fold the aliased mapping's entries in, keeping local values.
fn merge_into(map: &mut ObjectMap, merged: &Value) -> Result<(), Value> {
    match merged {
        Value::Object(source) => {
            for (key, value) in source.read().unwrap().iter() {
                if !map.contains_key(key) {
                    map.insert(key.clone(), value.ref_clone());
                }
            }
            Ok(())
        }
        other => Err(Value::error(
            ErrorCode::TypeMismatch,
            format!("merge key expects a mapping, got {}", other.type_name()),
        )),
    }
}

/// Scalar taxonomy: quoted scalars are always strings; bare scalars
/// classify as null, boolean, number (when fully numeric), or string.
pub(crate) fn classify_scalar(text: &str, quoted: bool) -> Value {
    if quoted {
        return Value::string(text);
    }
    match text {
        "" | "~" | "null" => return Value::Null,
        "true" | "yes" | "on" => return Value::boolean(true),
        "false" | "no" | "off" => return Value::boolean(false),
        _ => {}
    }
    match text.parse::<f64>() {
        Ok(number) => Value::number(number),
        Err(_) => Value::string(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::yaml::scanner::scan;

    fn parse(source: &str) -> Result<Value, Value> {
        compose(&scan(source).unwrap())
    }

    #[test]
    fn scalar_taxonomy() {
        assert!(classify_scalar("", false).equals(&Value::Null));
        assert!(classify_scalar("~", false).equals(&Value::Null));
        assert!(classify_scalar("null", false).equals(&Value::Null));
        assert!(classify_scalar("yes", false).equals(&Value::boolean(true)));
        assert!(classify_scalar("off", false).equals(&Value::boolean(false)));
        assert!(classify_scalar("3.5", false).equals(&Value::number(3.5)));
        assert!(classify_scalar("3.5.1", false).equals(&Value::string("3.5.1")));
        assert!(classify_scalar("30", true).equals(&Value::string("30")));
    }

    #[test]
    fn composes_nested_structures() {
        let value = parse("name: koan\nlimits:\n  depth: 64\nitems:\n  - 1\n  - 2\n")
            .unwrap();
        assert!(value.object_get("name").unwrap().equals(&Value::string("koan")));
        let limits = value.object_get("limits").unwrap();
        assert!(limits.object_get("depth").unwrap().equals(&Value::number(64.0)));
        let items = value.object_get("items").unwrap();
        assert_eq!(items.len(), Some(2));
    }

    #[test]
    fn alias_shares_the_anchored_value() {
        let value = parse("base: &b\n  x: 1\nother: *b\n").unwrap();
        let base = value.object_get("base").unwrap();
        let other = value.object_get("other").unwrap();
        assert!(base.equals(&other));
        // Shared handle, not a copy.
        assert!(other.ref_count() >= 2);
    }

    #[test]
    fn unknown_anchor_is_an_error() {
        let err = parse("data: *ghost\n").unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::UnknownAnchor));
        assert!(err.error_message().unwrap().contains("Unknown anchor"));
    }

    #[test]
    fn duplicate_anchors_last_wins() {
        let value = parse("a: &x 1\nb: &x 2\nc: *x\n").unwrap();
        assert!(value.object_get("c").unwrap().equals(&Value::number(2.0)));
    }

    #[test]
    fn merge_key_local_values_win() {
        let source = "defaults: &d\n  timeout: 30\n  retries: 3\nprod:\n  <<: *d\n  timeout: 60\n";
        let value = parse(source).unwrap();
        let prod = value.object_get("prod").unwrap();
        assert!(prod.object_get("timeout").unwrap().equals(&Value::number(60.0)));
        assert!(prod.object_get("retries").unwrap().equals(&Value::number(3.0)));
    }

    #[test]
    fn merge_of_non_mapping_is_rejected() {
        let err = parse("a: &x 5\nb:\n  <<: *x\n").unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::TypeMismatch));
    }
}
