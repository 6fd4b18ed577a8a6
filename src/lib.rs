//! Interpreter core for the koan scripting language.
//!
//! The pipeline: source text → [`Lexer`] → [`Parser`] → arena-backed AST →
//! [`Interpreter`] → [`Value`]. The [`yaml`] codec and the [`memory`]
//! subsystem sit beside the pipeline and share the value model.

pub mod arena;
pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod intern;
pub mod interpreter;
pub mod lexer;
pub mod memory;
pub mod parser;
pub mod scope;
pub mod token;
pub mod value;
pub mod yaml;

pub use arena::{default_arena, ArenaStats, NodeArena, NodeId, PoolStats};
pub use ast::{BinaryOp, Node, NodeKind, UnaryOp};
pub use config::Config;
pub use error::{ErrorCode, ParseError, ParseErrorKind};
pub use intern::{Interner, Symbol};
pub use interpreter::{ExecutionStats, Flow, Interpreter};
pub use lexer::Lexer;
pub use memory::{default_allocator, AllocStats, RefCount, TrackedAllocator};
pub use parser::Parser;
pub use scope::Scope;
pub use token::{Span, Token, TokenType};
pub use value::{ObjectMap, Value};

/// Parse and evaluate a program with default configuration. Parse failures
/// come back as `parsing-failed` error values with source context.
pub fn eval_source(source: &str) -> Value {
    eval_source_with(source, &Config::default())
}

pub fn eval_source_with(source: &str, config: &Config) -> Value {
    let mut interner = Interner::new();
    let arena = if config.gc_enabled {
        NodeArena::new()
    } else {
        NodeArena::disabled()
    };

    let program = {
        let mut parser = Parser::new(source, &mut interner, &arena);
        match parser.parse_program() {
            Ok(program) => program,
            Err(error) => {
                return Value::error(
                    ErrorCode::ParsingFailed,
                    error.display_with_source(source),
                )
            }
        }
    };

    let root = Scope::root();
    builtins::register(&root, &mut interner);
    let mut interpreter = Interpreter::with_root(&arena, &interner, root);
    interpreter.apply_config(config);
    interpreter.run(&program)
}
