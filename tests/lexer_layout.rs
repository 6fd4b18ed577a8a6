//! Layout properties of the lexer: indentation balance, NEWLINE
//! suppression, and number-literal boundaries.

use koan::{Interner, Lexer, TokenType};

fn token_kinds(source: &str) -> Vec<TokenType> {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new(source, &mut interner);
    let mut kinds = Vec::new();
    while let Some(token) = lexer.next_token() {
        let done = token.kind == TokenType::Eof;
        kinds.push(token.kind);
        if done {
            break;
        }
    }
    kinds
}

fn layout_balance(source: &str) -> (usize, usize) {
    let kinds = token_kinds(source);
    (
        kinds.iter().filter(|k| **k == TokenType::Indent).count(),
        kinds.iter().filter(|k| **k == TokenType::Dedent).count(),
    )
}

#[test]
fn whitespace_only_inputs_produce_only_eof() {
    for source in ["", " ", "\n", "   \n\t\n ", "\t\t\t"] {
        assert_eq!(token_kinds(source), vec![TokenType::Eof], "input: {:?}", source);
    }
}

#[test]
fn indents_equal_dedents_for_valid_programs() {
    let programs = [
        "if a\n  set b 1\n",
        "if a\n  if b\n    if c\n      set d 1\n",
        "function f x\n  if x\n    return 1\n  return 2\nset y 1\n",
        "while a\n  set b 1\nset c 2\n",
        "if a\n  set b 1\nelse\n  set c 2\n",
    ];
    for source in programs {
        let (indents, dedents) = layout_balance(source);
        assert_eq!(indents, dedents, "unbalanced layout for: {:?}", source);
    }
}

#[test]
fn dedents_synthesized_at_eof_balance_too() {
    let (indents, dedents) = layout_balance("if a\n  if b\n    set c 1");
    assert_eq!(indents, 3 - 1);
    assert_eq!(indents, dedents);
}

#[test]
fn tabs_count_four_columns() {
    // One tab and four spaces describe the same block.
    let (indents, dedents) = layout_balance("if a\n\tset b 1\n    set c 2\n");
    assert_eq!((indents, dedents), (1, 1));
    // Two tabs equal eight spaces.
    let (indents, dedents) = layout_balance("if a\n\t\tset b 1\n        set c 2\n");
    assert_eq!((indents, dedents), (1, 1));
}

#[test]
fn partial_dedent_levels_are_tolerated() {
    let source = "function fact n \n  if n <= 1 \n    return 1 \n  return n * fact (n - 1) \n fact 5";
    let (indents, dedents) = layout_balance(source);
    assert_eq!(indents, dedents, "source from the recursion scenario");
}

#[test]
fn number_boundary_forms() {
    assert!(matches!(token_kinds(".5")[0], TokenType::Number(n) if n == 0.5));
    assert!(matches!(token_kinds("5.")[0], TokenType::Number(n) if n == 5.0));
    assert!(matches!(token_kinds("5.e3")[0], TokenType::Number(n) if n == 5000.0));
    assert!(matches!(token_kinds("1_000_000")[0], TokenType::Number(n) if n == 1_000_000.0));
}

#[test]
fn malformed_underscores_abort_the_token() {
    let mut interner = Interner::new();
    let mut lexer = Lexer::new("1__0", &mut interner);
    assert!(lexer.next_token().is_none());
    assert!(lexer.in_error_recovery());

    let mut interner = Interner::new();
    let mut lexer = Lexer::new("1_", &mut interner);
    assert!(lexer.next_token().is_none());
    assert!(lexer.in_error_recovery());
}

#[test]
fn leading_underscore_is_an_identifier() {
    let kinds = token_kinds("_1");
    assert!(matches!(kinds[0], TokenType::Identifier(_)));
}

#[test]
fn newline_tokens_follow_content_lines_only() {
    let kinds = token_kinds("set a 1\n\n\n\nset b 2\n\n");
    let newlines = kinds.iter().filter(|k| **k == TokenType::Newline).count();
    assert_eq!(newlines, 2);
}

#[test]
fn peek_is_side_effect_free_at_any_depth() {
    let source = "if a\n  set b 1\nset c 2\n";
    let mut interner = Interner::new();
    let mut lexer = Lexer::new(source, &mut interner);
    let deep = lexer.peek(8);
    assert!(deep.is_some());
    let mut reference = Interner::new();
    let expected = {
        let mut fresh = Lexer::new(source, &mut reference);
        let mut kinds = Vec::new();
        while let Some(token) = fresh.next_token() {
            let done = token.kind == TokenType::Eof;
            kinds.push(token.kind);
            if done {
                break;
            }
        }
        kinds
    };
    let mut observed = Vec::new();
    while let Some(token) = lexer.next_token() {
        let done = token.kind == TokenType::Eof;
        observed.push(token.kind);
        if done {
            break;
        }
    }
    assert_eq!(observed, expected);
}
