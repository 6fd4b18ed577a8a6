//! Native standard-library functions.
//!
//! Every builtin has the plain signature `fn(&[Value]) -> Value` and is
//! registered into the root scope by name. Wrong arity or operand types
//! produce error values, never panics.

use crate::error::ErrorCode;
use crate::intern::Interner;
use crate::scope::Scope;
use crate::value::{self, Value};
use crate::yaml;

pub fn register(scope: &Scope, interner: &mut Interner) {
    let natives: &[(&str, value::NativeFn)] = &[
        ("print", native_print),
        ("length", native_length),
        ("string_upper", native_string_upper),
        ("string_lower", native_string_lower),
        ("to_number", native_to_number),
        ("type_of", native_type_of),
        ("push", native_push),
        ("keys", native_keys),
        ("range", native_range),
        ("abs", native_abs),
        ("min", native_min),
        ("max", native_max),
        ("copy", native_copy),
        ("yaml_parse", native_yaml_parse),
        ("yaml_stringify", native_yaml_stringify),
    ];
    for (name, function) in natives {
        let symbol = interner.intern(name);
        scope.define(symbol, Value::native(name, *function));
    }
}

fn arity_error(name: &str, expected: usize, got: usize) -> Value {
    Value::error(
        ErrorCode::InvalidArgument,
        format!("{} expects {} argument(s), got {}", name, expected, got),
    )
}

fn native_print(args: &[Value]) -> Value {
    let line: Vec<String> = args.iter().map(|v| v.to_display_string()).collect();
    println!("{}", line.join(" "));
    Value::Null
}

fn native_length(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("length", 1, args.len());
    }
    match args[0].len() {
        Some(len) => Value::number(len as f64),
        None => Value::error(
            ErrorCode::TypeMismatch,
            format!("cannot take length of {}", args[0].type_name()),
        ),
    }
}

fn native_string_upper(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("string_upper", 1, args.len());
    }
    match &args[0] {
        Value::Str(s) => Value::string(s.to_uppercase()),
        other => Value::error(
            ErrorCode::TypeMismatch,
            format!("string_upper expects a string, got {}", other.type_name()),
        ),
    }
}

fn native_string_lower(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("string_lower", 1, args.len());
    }
    match &args[0] {
        Value::Str(s) => Value::string(s.to_lowercase()),
        other => Value::error(
            ErrorCode::TypeMismatch,
            format!("string_lower expects a string, got {}", other.type_name()),
        ),
    }
}

fn native_to_number(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("to_number", 1, args.len());
    }
    Value::number(args[0].to_number_or_nan())
}

fn native_type_of(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("type_of", 1, args.len());
    }
    Value::string(args[0].type_of())
}

fn native_push(args: &[Value]) -> Value {
    if args.len() != 2 {
        return arity_error("push", 2, args.len());
    }
    if args[0].array_push(args[1].ref_clone()) {
        args[0].ref_clone()
    } else {
        Value::error(
            ErrorCode::TypeMismatch,
            format!("push expects an array, got {}", args[0].type_name()),
        )
    }
}

fn native_keys(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("keys", 1, args.len());
    }
    match &args[0] {
        Value::Object(map) => {
            let keys = map.read().unwrap().keys().map(Value::string).collect();
            Value::array(keys)
        }
        other => Value::error(
            ErrorCode::TypeMismatch,
            format!("keys expects an object, got {}", other.type_name()),
        ),
    }
}

fn native_range(args: &[Value]) -> Value {
    if args.len() != 2 {
        return arity_error("range", 2, args.len());
    }
    value::apply_binary(crate::ast::BinaryOp::Range, &args[0], &args[1])
}

fn native_abs(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("abs", 1, args.len());
    }
    Value::number(args[0].to_number_or_nan().abs())
}

fn native_min(args: &[Value]) -> Value {
    if args.len() != 2 {
        return arity_error("min", 2, args.len());
    }
    Value::number(args[0].to_number_or_nan().min(args[1].to_number_or_nan()))
}

fn native_max(args: &[Value]) -> Value {
    if args.len() != 2 {
        return arity_error("max", 2, args.len());
    }
    Value::number(args[0].to_number_or_nan().max(args[1].to_number_or_nan()))
}

fn native_copy(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("copy", 1, args.len());
    }
    args[0].deep_copy()
}

fn native_yaml_parse(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("yaml_parse", 1, args.len());
    }
    match &args[0] {
        Value::Str(s) => yaml::parse_str(s),
        other => Value::error(
            ErrorCode::TypeMismatch,
            format!("yaml_parse expects a string, got {}", other.type_name()),
        ),
    }
}

fn native_yaml_stringify(args: &[Value]) -> Value {
    if args.len() != 1 {
        return arity_error("yaml_stringify", 1, args.len());
    }
    match yaml::emit_to_string(&args[0]) {
        Some(text) => Value::string(text),
        None => Value::error(ErrorCode::InvalidArgument, "yaml emission failed"),
    }
}
