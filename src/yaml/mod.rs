//! YAML codec over the runtime value model.
//!
//! Parsing accepts a YAML 1.1-ish subset: block and flow styles, anchors
//! and aliases, `<<` merge keys, and the null/bool/number/string scalar
//! taxonomy. Emission produces block style with double-quoted strings and
//! guards against cycles and runaway depth. Inputs beyond 64 MiB are
//! rejected up front.

mod composer;
mod emitter;
mod events;
mod scanner;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::ErrorCode;
use crate::value::Value;

pub use events::Event;

pub const MAX_INPUT_BYTES: usize = 64 * 1024 * 1024;

pub use emitter::{CIRCULAR_SENTINEL, DEPTH_SENTINEL};

/// Parse a YAML document. Failures come back as error values.
pub fn parse_str(text: &str) -> Value {
    if text.len() > MAX_INPUT_BYTES {
        return Value::error(
            ErrorCode::YamlTooLarge,
            format!("input of {} bytes exceeds the 64 MiB limit", text.len()),
        );
    }
    let events = match scanner::scan(text) {
        Ok(events) => events,
        Err(message) => return Value::error(ErrorCode::ParsingFailed, message),
    };
    match composer::compose(&events) {
        Ok(value) => value,
        Err(error) => error,
    }
}

/// Load and parse a YAML file. The file handle closes on every path; the
/// size limit is enforced before and after the read.
pub fn parse_file(path: impl AsRef<Path>) -> Value {
    let path = path.as_ref();
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(_) => {
            return Value::error(
                ErrorCode::FileNotFound,
                format!("cannot open {}", path.display()),
            )
        }
    };

    if let Ok(metadata) = file.metadata() {
        if metadata.len() > MAX_INPUT_BYTES as u64 {
            return Value::error(
                ErrorCode::YamlTooLarge,
                format!("{} exceeds the 64 MiB limit", path.display()),
            );
        }
    }

    let mut text = String::new();
    if file.read_to_string(&mut text).is_err() {
        return Value::error(
            ErrorCode::ParsingFailed,
            format!("{} is not valid UTF-8", path.display()),
        );
    }
    drop(file);

    parse_str(&text)
}

/// Emit a value as YAML text. `None` signals an internal emitter failure;
/// cycles and depth overflows are not failures, they emit sentinels.
pub fn emit_to_string(value: &Value) -> Option<String> {
    emitter::emit(value)
}

/// Emit to a file; success is `Null`, failures are error values.
pub fn emit_to_file(value: &Value, path: impl AsRef<Path>) -> Value {
    let text = match emitter::emit(value) {
        Some(text) => text,
        None => return Value::error(ErrorCode::InvalidArgument, "yaml emission failed"),
    };
    match std::fs::write(path.as_ref(), text) {
        Ok(()) => Value::Null,
        Err(_) => Value::error(
            ErrorCode::FileNotFound,
            format!("cannot write {}", path.as_ref().display()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ObjectMap;

    #[test]
    fn parse_str_rejects_oversized_input() {
        let oversized = "x".repeat(MAX_INPUT_BYTES + 1);
        let result = parse_str(&oversized);
        assert_eq!(result.error_code(), Some(ErrorCode::YamlTooLarge));
    }

    #[test]
    fn roundtrip_preserves_structure() {
        let mut inner = ObjectMap::new();
        inner.insert("timeout".to_string(), Value::number(30.0));
        inner.insert("verbose".to_string(), Value::boolean(true));
        inner.insert("name".to_string(), Value::string("prod"));
        let mut map = ObjectMap::new();
        map.insert("settings".to_string(), Value::object(inner));
        map.insert(
            "ports".to_string(),
            Value::array(vec![Value::number(80.0), Value::number(443.0)]),
        );
        map.insert("fallback".to_string(), Value::Null);
        let original = Value::object(map);

        let text = emit_to_string(&original).unwrap();
        let reparsed = parse_str(&text);
        assert!(
            original.equals(&reparsed),
            "roundtrip changed the value:\n{}",
            text
        );
    }

    #[test]
    fn roundtrip_scalar_documents() {
        for value in [
            Value::Null,
            Value::boolean(false),
            Value::number(42.0),
            Value::string("hello world"),
        ] {
            let text = emit_to_string(&value).unwrap();
            assert!(value.equals(&parse_str(&text)), "failed on {}", text);
        }
    }

    #[test]
    fn malformed_input_is_parsing_failed() {
        let result = parse_str("a: [1, 2\n");
        assert_eq!(result.error_code(), Some(ErrorCode::ParsingFailed));
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let result = parse_file("/nonexistent/config.yaml");
        assert_eq!(result.error_code(), Some(ErrorCode::FileNotFound));
    }
}
