//! End-to-end language scenarios: source text through lexer, parser, and
//! evaluator.

use koan::{eval_source, eval_source_with, Config, ErrorCode, Value};

#[test]
fn set_and_add() {
    let result = eval_source("set x 5\nset y 10\nx + y");
    assert!(result.equals(&Value::number(15.0)), "got {:?}", result);
}

#[test]
fn function_recursion() {
    let source =
        "function fact n \n  if n <= 1 \n    return 1 \n  return n * fact (n - 1) \nfact 5";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(120.0)), "got {:?}", result);
}

#[test]
fn string_upper_builtin() {
    let result = eval_source("string_upper \"hello\"");
    assert!(result.equals(&Value::string("HELLO")), "got {:?}", result);
}

#[test]
fn nested_conditionals_and_loops() {
    let source = "\
set total 0
for n in 1 .. 20
  if n % 2 = 0
    set total total + n
total
";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(110.0)), "got {:?}", result);
}

#[test]
fn functions_are_first_class() {
    let source = "\
function twice f x
  return f(f(x))
function inc n
  return n + 1
twice inc 5
";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(7.0)), "got {:?}", result);
}

#[test]
fn classes_end_to_end() {
    let source = "\
class Counter
  function constructor start
    set this.count start
  function bump amount
    set this.count this.count + amount
    return this.count
set c new Counter(10)
c.bump(5)
c.bump(2)
c.count
";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(17.0)), "got {:?}", result);
}

#[test]
fn inheritance_overrides_methods() {
    let source = "\
class Shape
  function area
    return 0
class Square extends Shape
  function constructor side
    set this.side side
  function area
    return this.side * this.side
set s new Square(4)
s.area()
";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(16.0)), "got {:?}", result);
}

#[test]
fn try_catch_recovers_and_continues() {
    let source = "\
set log []
try
  push log \"before\"
  throw \"kaboom\"
  push log \"after\"
catch err
  push log err
length(log)
";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(2.0)), "got {:?}", result);
}

#[test]
fn runtime_errors_carry_their_code() {
    assert_eq!(
        eval_source("1 / 0").error_code(),
        Some(ErrorCode::DivisionByZero)
    );
    assert_eq!(
        eval_source("missing + 1").error_code(),
        Some(ErrorCode::UndefinedVariable)
    );
    assert_eq!(
        eval_source("set xs [1]\nxs[9]").error_code(),
        Some(ErrorCode::IndexOutOfBounds)
    );
}

#[test]
fn error_values_render_with_the_error_prefix() {
    let result = eval_source("1 / 0");
    let rendered = result.to_display_string();
    assert!(rendered.starts_with("<error: "), "got {}", rendered);
}

#[test]
fn string_concatenation_and_coercion() {
    let result = eval_source("set n 4\n\"n=\" + n");
    assert!(result.equals(&Value::string("n=4")));
    let result = eval_source("\"3\" * \"4\"");
    assert!(result.equals(&Value::number(12.0)));
}

#[test]
fn unicode_identifiers_evaluate() {
    let result = eval_source("set température_en_celsius 21\ntempérature_en_celsius + 1");
    assert!(result.equals(&Value::number(22.0)));
}

#[test]
fn natural_language_keywords() {
    let source = "\
set mode \"idle\"
when true
  set mode \"running\"
unless false
  set mode mode + \"!\"
mode
";
    let result = eval_source(source);
    assert!(result.equals(&Value::string("running!")), "got {:?}", result);
}

#[test]
fn profiling_config_is_honored() {
    let config = Config::from_json(r#"{"profiling_enabled": true, "hot_function_threshold": 2}"#)
        .unwrap();
    let source = "function f\n  return 1\nf()\nf()\nf()";
    let result = eval_source_with(source, &config);
    assert!(result.equals(&Value::number(1.0)));
}

#[test]
fn yaml_builtins_bridge_into_the_language() {
    let source = "set doc yaml_parse(\"a: 1\\nb: yes\")\ndoc.a + 1";
    let result = eval_source(source);
    assert!(result.equals(&Value::number(2.0)), "got {:?}", result);
}
