//! Tree-walking evaluator.
//!
//! `Interpreter::visit` walks arena nodes and produces runtime values.
//! Control transfer (`return`/`break`/`continue`/`throw`) travels as
//! dedicated `Flow` signals, never as host exceptions; runtime failures are
//! first-class error values that flow through expressions as data. The
//! evaluator never mutates the AST: a call builds a child of the callee's
//! captured scope and threads it through the visitor.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::arena::{NodeArena, NodeId};
use crate::ast::{BinaryOp, NodeKind};
use crate::config::Config;
use crate::error::ErrorCode;
use crate::intern::{Interner, Symbol};
use crate::scope::Scope;
use crate::error::nearest;
use crate::token::Span;
use crate::value::{self, FnKind, ObjectMap, Value};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

/// Outcome of visiting one node. `Value` is ordinary data flow; the rest
/// are control signals that unwind until a loop, call, or `try` handles
/// them.
#[derive(Debug)]
pub enum Flow {
    Value(Value),
    Return(Value),
    Break,
    Continue,
    Throw,
}

#[derive(Debug, Clone)]
pub struct CallFrame {
    pub name: String,
    pub depth: usize,
    pub started: Instant,
    pub arg_count: usize,
}

#[derive(Debug, Clone)]
pub struct ExceptionState {
    pub value: Value,
    pub message: String,
    pub location: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionStats {
    pub name: String,
    pub calls: u64,
    pub total_micros: u128,
    pub hot: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStats {
    pub functions: Vec<FunctionStats>,
}

struct Profile {
    calls: u64,
    total: Duration,
    hot: bool,
}

pub type ModuleLoader = Box<dyn Fn(&str) -> Option<Value>>;

macro_rules! value_of {
    ($self:ident, $id:expr, $scope:expr) => {
        match $self.visit($id, $scope) {
            Flow::Value(v) => v,
            other => return other,
        }
    };
}

pub struct Interpreter<'a> {
    arena: &'a NodeArena,
    interner: &'a Interner,
    root: Scope,
    frames: Vec<CallFrame>,
    exception: Option<ExceptionState>,
    profiling: bool,
    profiles: HashMap<String, Profile>,
    hot_threshold: u64,
    max_depth: usize,
    exports: Vec<Symbol>,
    module_loader: Option<ModuleLoader>,
}

impl<'a> Interpreter<'a> {
    pub fn new(arena: &'a NodeArena, interner: &'a Interner) -> Self {
        Self::with_root(arena, interner, Scope::root())
    }

    /// Use a prepared root scope (typically one with builtins registered).
    pub fn with_root(arena: &'a NodeArena, interner: &'a Interner, root: Scope) -> Self {
        Interpreter {
            arena,
            interner,
            root,
            frames: Vec::new(),
            exception: None,
            profiling: false,
            profiles: HashMap::new(),
            hot_threshold: 100,
            max_depth: DEFAULT_MAX_CALL_DEPTH,
            exports: Vec::new(),
            module_loader: None,
        }
    }

    pub fn apply_config(&mut self, config: &Config) {
        self.profiling = config.profiling_enabled;
        if config.hot_function_threshold > 0 {
            self.hot_threshold = config.hot_function_threshold;
        }
    }

    pub fn root_scope(&self) -> &Scope {
        &self.root
    }

    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth.max(1);
    }

    pub fn set_module_loader(&mut self, loader: ModuleLoader) {
        self.module_loader = Some(loader);
    }

    pub fn enable_profiling(&mut self, enabled: bool) {
        self.profiling = enabled;
    }

    pub fn set_hot_threshold(&mut self, calls: u64) {
        self.hot_threshold = calls.max(1);
    }

    pub fn has_exception(&self) -> bool {
        self.exception.is_some()
    }

    pub fn exception(&self) -> Option<&ExceptionState> {
        self.exception.as_ref()
    }

    pub fn clear_exception(&mut self) {
        self.exception = None;
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// Names recorded by `export` statements, in order.
    pub fn exports(&self) -> Vec<String> {
        self.exports
            .iter()
            .map(|s| self.interner.resolve(*s).to_string())
            .collect()
    }

    /// Evaluate a whole program; the result is the last statement's value.
    /// An uncaught `throw` surfaces its payload.
    pub fn run(&mut self, program: &[NodeId]) -> Value {
        let scope = self.root.clone();
        let mut last = Value::Null;
        for &statement in program {
            match self.visit(statement, &scope) {
                Flow::Value(v) => last = v,
                Flow::Return(v) => return v,
                Flow::Break | Flow::Continue => {}
                Flow::Throw => {
                    let thrown = self
                        .exception
                        .take()
                        .map(|e| e.value)
                        .unwrap_or(Value::Null);
                    return thrown;
                }
            }
        }
        last
    }

    pub fn visit(&mut self, id: NodeId, scope: &Scope) -> Flow {
        let node = match self.arena.get(id) {
            Some(node) => node,
            None => {
                return Flow::Value(Value::error(
                    ErrorCode::NullPointer,
                    "dangling syntax node handle",
                ))
            }
        };

        match node.kind {
            NodeKind::Number(n) => Flow::Value(Value::number(n)),
            NodeKind::Bool(b) => Flow::Value(Value::boolean(b)),
            NodeKind::Str(ref s) => Flow::Value(Value::string(s.as_ref())),
            NodeKind::Null | NodeKind::Undecidable => Flow::Value(Value::Null),

            NodeKind::Array(ref items) => {
                let mut values = Vec::with_capacity(items.len());
                for &item in items.iter() {
                    values.push(value_of!(self, item, scope));
                }
                Flow::Value(Value::array(values))
            }

            NodeKind::ObjectLit(ref entries) => {
                let mut map = ObjectMap::new();
                for &(key, value_id) in entries.iter() {
                    let value = value_of!(self, value_id, scope);
                    map.insert(self.interner.resolve(key).to_string(), value);
                }
                Flow::Value(Value::object(map))
            }

            NodeKind::VarRef(name) => match scope.lookup(name) {
                Some(value) => Flow::Value(value),
                None => Flow::Value(self.undefined_variable(name, scope)),
            },

            NodeKind::VarDef { name, value } => {
                let value = value_of!(self, value, scope);
                scope.define(name, value.ref_clone());
                Flow::Value(value)
            }

            NodeKind::Assign { target, value } => self.visit_assign(target, value, scope),

            NodeKind::FuncDef { name, ref params, body } => {
                let function = Value::function(
                    self.interner.resolve(name),
                    FnKind::Script {
                        params: params.clone(),
                        body,
                        captured: scope.clone(),
                    },
                );
                scope.define(name, function.ref_clone());
                Flow::Value(function)
            }

            NodeKind::Call { callee, ref args } => {
                self.visit_call(callee, args, node.span, scope)
            }

            NodeKind::Member { object, name } => {
                let object = value_of!(self, object, scope);
                Flow::Value(self.member_get(&object, name))
            }

            NodeKind::Index { object, index } => {
                let object = value_of!(self, object, scope);
                let index = value_of!(self, index, scope);
                Flow::Value(self.index_get(&object, &index))
            }

            NodeKind::Block(ref statements) => {
                let mut last = Value::Null;
                for &statement in statements.iter() {
                    match self.visit(statement, scope) {
                        Flow::Value(v) => last = v,
                        other => return other,
                    }
                }
                Flow::Value(last)
            }

            NodeKind::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = value_of!(self, left, scope);
                    if l.is_error() {
                        return Flow::Value(l);
                    }
                    if !l.truthy() {
                        return Flow::Value(Value::boolean(false));
                    }
                    let r = value_of!(self, right, scope);
                    if r.is_error() {
                        return Flow::Value(r);
                    }
                    Flow::Value(Value::boolean(r.truthy()))
                }
                BinaryOp::Or => {
                    let l = value_of!(self, left, scope);
                    if l.is_error() {
                        return Flow::Value(l);
                    }
                    if l.truthy() {
                        return Flow::Value(Value::boolean(true));
                    }
                    let r = value_of!(self, right, scope);
                    if r.is_error() {
                        return Flow::Value(r);
                    }
                    Flow::Value(Value::boolean(r.truthy()))
                }
                _ => {
                    let l = value_of!(self, left, scope);
                    let r = value_of!(self, right, scope);
                    Flow::Value(value::apply_binary(op, &l, &r))
                }
            },

            NodeKind::Unary { op, operand } => {
                let operand = value_of!(self, operand, scope);
                Flow::Value(value::apply_unary(op, &operand))
            }

            NodeKind::If { cond, then_block, else_block } => {
                let cond = value_of!(self, cond, scope);
                if cond.is_error() {
                    return Flow::Value(cond);
                }
                if cond.truthy() {
                    self.visit(then_block, scope)
                } else if let Some(else_block) = else_block {
                    self.visit(else_block, scope)
                } else {
                    Flow::Value(Value::Null)
                }
            }

            NodeKind::While { cond, body } => {
                loop {
                    let cond = value_of!(self, cond, scope);
                    if cond.is_error() {
                        return Flow::Value(cond);
                    }
                    if !cond.truthy() {
                        break;
                    }
                    match self.visit(body, scope) {
                        Flow::Value(_) | Flow::Continue => {}
                        Flow::Break => break,
                        other => return other,
                    }
                }
                Flow::Value(Value::Null)
            }

            NodeKind::For { var, iterable, body } => {
                let iterable = value_of!(self, iterable, scope);
                if iterable.is_error() {
                    return Flow::Value(iterable);
                }
                let items: Vec<Value> = match &iterable {
                    Value::Array(items) => items.read().unwrap().clone(),
                    Value::Str(s) => s
                        .chars()
                        .map(|c| Value::string(c.to_string()))
                        .collect(),
                    Value::Object(map) => map
                        .read()
                        .unwrap()
                        .keys()
                        .map(Value::string)
                        .collect(),
                    other => {
                        return Flow::Value(Value::error(
                            ErrorCode::TypeMismatch,
                            format!("cannot iterate over {}", other.type_name()),
                        ))
                    }
                };
                for item in items {
                    scope.define(var, item);
                    match self.visit(body, scope) {
                        Flow::Value(_) | Flow::Continue => {}
                        Flow::Break => break,
                        other => return other,
                    }
                }
                Flow::Value(Value::Null)
            }

            NodeKind::Return(value) => {
                let value = match value {
                    Some(id) => value_of!(self, id, scope),
                    None => Value::Null,
                };
                Flow::Return(value)
            }

            NodeKind::Break => Flow::Break,
            NodeKind::Continue => Flow::Continue,

            NodeKind::ClassDef { name, parent, ref methods } => {
                self.visit_class(name, parent, methods, scope)
            }

            NodeKind::New { class, ref args } => {
                self.visit_new(class, args, node.span, scope)
            }

            NodeKind::Import { module, alias } => {
                let module_name = self.interner.resolve(module).to_string();
                match self.module_loader.as_ref().and_then(|l| l(&module_name)) {
                    Some(value) => {
                        scope.define(alias.unwrap_or(module), value.ref_clone());
                        Flow::Value(value)
                    }
                    None => Flow::Value(Value::error(
                        ErrorCode::FileNotFound,
                        format!("module not found: {}", module_name),
                    )),
                }
            }

            NodeKind::Export { name } => {
                self.exports.push(name);
                Flow::Value(Value::Null)
            }

            NodeKind::Try { body, catch_var, catch_body } => {
                let depth = self.frames.len();
                match self.visit(body, scope) {
                    Flow::Throw => {
                        self.frames.truncate(depth);
                        let thrown = self
                            .exception
                            .take()
                            .map(|e| e.value)
                            .unwrap_or(Value::Null);
                        scope.define(catch_var, thrown);
                        self.visit(catch_body, scope)
                    }
                    other => other,
                }
            }

            NodeKind::Throw(value) => {
                let value = value_of!(self, value, scope);
                self.exception = Some(ExceptionState {
                    message: value.to_display_string(),
                    value,
                    location: node.span,
                });
                Flow::Throw
            }
        }
    }

    /// Hint candidates are the names visible from the scope first, then
    /// every spelling the interner has seen; the misspelling itself is
    /// excluded or it would match at distance zero.
    fn undefined_variable(&self, name: Symbol, scope: &Scope) -> Value {
        let spelling = self.interner.resolve(name);
        let visible = scope.visible_names();
        let scoped = visible.iter().map(|s| self.interner.resolve(*s));
        let interned = self.interner.iter().map(|(_, text)| text);
        let candidates = scoped
            .chain(interned)
            .filter(|c| !c.is_empty() && *c != spelling);
        let mut message = format!("undefined variable '{}'", spelling);
        if let Some(hint) = nearest(spelling, candidates, 2) {
            message.push_str(&format!(" (did you mean '{}'?)", hint));
        }
        Value::error(ErrorCode::UndefinedVariable, message)
    }

    fn visit_assign(&mut self, target: NodeId, value: NodeId, scope: &Scope) -> Flow {
        let target_node = match self.arena.get(target) {
            Some(node) => node,
            None => {
                return Flow::Value(Value::error(
                    ErrorCode::NullPointer,
                    "dangling assignment target",
                ))
            }
        };
        let value = value_of!(self, value, scope);

        match target_node.kind {
            NodeKind::VarRef(name) => {
                if !scope.assign(name, value.ref_clone()) {
                    scope.define(name, value.ref_clone());
                }
                Flow::Value(value)
            }
            NodeKind::Member { object, name } => {
                let object = value_of!(self, object, scope);
                let key = self.interner.resolve(name);
                match &object {
                    Value::Instance(instance) => {
                        instance
                            .write()
                            .unwrap()
                            .properties
                            .insert(key.to_string(), value.ref_clone());
                        Flow::Value(value)
                    }
                    Value::Object(_) => {
                        object.object_set(key, value.ref_clone());
                        Flow::Value(value)
                    }
                    Value::Error(_) => Flow::Value(object),
                    other => Flow::Value(Value::error(
                        ErrorCode::TypeMismatch,
                        format!("cannot set member on {}", other.type_name()),
                    )),
                }
            }
            NodeKind::Index { object, index } => {
                let object = value_of!(self, object, scope);
                let index = value_of!(self, index, scope);
                self.index_set(&object, &index, value)
            }
            ref other => Flow::Value(Value::error(
                ErrorCode::InvalidArgument,
                format!("cannot assign to {}", other.name()),
            )),
        }
    }

    fn visit_call(
        &mut self,
        callee: NodeId,
        args: &[NodeId],
        span: Span,
        scope: &Scope,
    ) -> Flow {
        let callee_node = match self.arena.get(callee) {
            Some(node) => node,
            None => {
                return Flow::Value(Value::error(
                    ErrorCode::NullPointer,
                    "dangling callee handle",
                ))
            }
        };

        // Method calls bind the receiver.
        if let NodeKind::Member { object, name } = callee_node.kind {
            let receiver = value_of!(self, object, scope);
            if receiver.is_error() {
                return Flow::Value(receiver);
            }
            let method_name = self.interner.resolve(name).to_string();
            let method = match &receiver {
                Value::Instance(instance) => {
                    let inner = instance.read().unwrap();
                    inner
                        .properties
                        .get(&method_name)
                        .map(|v| v.ref_clone())
                        .or_else(|| match &inner.class {
                            Value::Class(class) => class.method(&method_name),
                            _ => None,
                        })
                }
                Value::Object(_) => receiver.object_get(&method_name),
                Value::Class(class) => class.method(&method_name),
                _ => None,
            };
            let method = match method {
                Some(method) => method,
                None => {
                    return Flow::Value(Value::error(
                        ErrorCode::UndefinedFunction,
                        format!(
                            "no method '{}' on {}",
                            method_name,
                            receiver.type_name()
                        ),
                    ))
                }
            };
            let mut arg_values = Vec::with_capacity(args.len());
            for &arg in args {
                arg_values.push(value_of!(self, arg, scope));
            }
            return self.call_value(method, arg_values, Some(receiver), span);
        }

        let callee_value = value_of!(self, callee, scope);
        let mut arg_values = Vec::with_capacity(args.len());
        for &arg in args {
            arg_values.push(value_of!(self, arg, scope));
        }
        self.call_value(callee_value, arg_values, None, span)
    }

    /// Invoke a function value. The call scope is a fresh child of the
    /// function's captured scope; the AST is never written to.
    pub fn call_value(
        &mut self,
        callee: Value,
        args: Vec<Value>,
        this: Option<Value>,
        _span: Span,
    ) -> Flow {
        if callee.is_error() {
            return Flow::Value(callee);
        }
        let function = match &callee {
            Value::Function(function) => function.clone(),
            other => {
                return Flow::Value(Value::error(
                    ErrorCode::UndefinedFunction,
                    format!("value of type {} is not callable", other.type_name()),
                ))
            }
        };

        if self.frames.len() >= self.max_depth {
            return Flow::Value(Value::error(
                ErrorCode::StackOverflow,
                format!("maximum call depth {} exceeded", self.max_depth),
            ));
        }

        let started = Instant::now();
        self.frames.push(CallFrame {
            name: function.name.clone(),
            depth: self.frames.len(),
            started,
            arg_count: args.len(),
        });

        let outcome = match &function.kind {
            FnKind::Native(native) => Flow::Value(native(&args)),
            FnKind::Script { params, body, captured } => {
                let call_scope = captured.child();
                for (i, param) in params.iter().enumerate() {
                    let arg = args.get(i).map(|v| v.ref_clone()).unwrap_or(Value::Null);
                    call_scope.define(*param, arg);
                }
                if let Some(receiver) = this {
                    if let Some(this_symbol) = self.interner.lookup("this") {
                        call_scope.define(this_symbol, receiver);
                    }
                }
                match self.visit(*body, &call_scope) {
                    Flow::Return(v) | Flow::Value(v) => Flow::Value(v),
                    Flow::Break | Flow::Continue => Flow::Value(Value::Null),
                    Flow::Throw => Flow::Throw,
                }
            }
        };

        self.frames.pop();
        self.record_call(&function.name, started.elapsed());
        outcome
    }

    fn visit_class(
        &mut self,
        name: Symbol,
        parent: Option<Symbol>,
        methods: &[NodeId],
        scope: &Scope,
    ) -> Flow {
        let parent_value = match parent {
            Some(parent_name) => match scope.lookup(parent_name) {
                Some(value @ Value::Class(_)) => Some(value),
                Some(other) => {
                    return Flow::Value(Value::error(
                        ErrorCode::TypeMismatch,
                        format!(
                            "cannot extend {}: not a class",
                            other.type_name()
                        ),
                    ))
                }
                None => return Flow::Value(self.undefined_variable(parent_name, scope)),
            },
            None => None,
        };

        let mut method_values = Vec::with_capacity(methods.len());
        for &method_id in methods {
            let method_node = match self.arena.get(method_id) {
                Some(node) => node,
                None => continue,
            };
            if let NodeKind::FuncDef { name: method_name, params, body } = method_node.kind {
                let method_name = self.interner.resolve(method_name).to_string();
                let function = Value::function(
                    method_name.clone(),
                    FnKind::Script {
                        params,
                        body,
                        captured: scope.clone(),
                    },
                );
                method_values.push((method_name, function));
            }
        }

        let class = Value::new_class(
            self.interner.resolve(name),
            parent_value,
            method_values,
        );
        if class.is_error() {
            return Flow::Value(class);
        }
        scope.define(name, class.ref_clone());
        Flow::Value(class)
    }

    fn visit_new(
        &mut self,
        class: Symbol,
        args: &[NodeId],
        span: Span,
        scope: &Scope,
    ) -> Flow {
        let class_value = match scope.lookup(class) {
            Some(value) => value,
            None => return Flow::Value(self.undefined_variable(class, scope)),
        };
        let instance = Value::new_instance(&class_value);
        if instance.is_error() {
            return Flow::Value(instance);
        }

        let constructor = match &class_value {
            Value::Class(c) => c.constructor(),
            _ => None,
        };
        if let Some(constructor) = constructor {
            let mut arg_values = Vec::with_capacity(args.len());
            for &arg in args {
                arg_values.push(value_of!(self, arg, scope));
            }
            match self.call_value(constructor, arg_values, Some(instance.ref_clone()), span)
            {
                Flow::Value(result) => {
                    if result.is_error() {
                        return Flow::Value(result);
                    }
                }
                other => return other,
            }
        }

        Flow::Value(instance)
    }

    fn member_get(&self, object: &Value, name: Symbol) -> Value {
        let key = self.interner.resolve(name);
        match object {
            Value::Error(_) => object.ref_clone(),
            Value::Instance(instance) => {
                let inner = instance.read().unwrap();
                inner
                    .properties
                    .get(key)
                    .map(|v| v.ref_clone())
                    .or_else(|| match &inner.class {
                        Value::Class(class) => class.method(key),
                        _ => None,
                    })
                    .unwrap_or(Value::Null)
            }
            Value::Object(_) => object.object_get(key).unwrap_or(Value::Null),
            Value::Class(class) => class.method(key).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn index_get(&self, object: &Value, index: &Value) -> Value {
        match object {
            Value::Error(_) => object.ref_clone(),
            Value::Array(items) => {
                let items = items.read().unwrap();
                match index_to_offset(index, items.len()) {
                    Some(i) => items[i].ref_clone(),
                    None => Value::error(
                        ErrorCode::IndexOutOfBounds,
                        format!(
                            "index {} out of bounds for array of length {}",
                            index.to_display_string(),
                            items.len()
                        ),
                    ),
                }
            }
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                match index_to_offset(index, chars.len()) {
                    Some(i) => Value::string(chars[i].to_string()),
                    None => Value::error(
                        ErrorCode::IndexOutOfBounds,
                        format!(
                            "index {} out of bounds for string of length {}",
                            index.to_display_string(),
                            chars.len()
                        ),
                    ),
                }
            }
            Value::Object(_) => object
                .object_get(&index.to_display_string())
                .unwrap_or(Value::Null),
            other => Value::error(
                ErrorCode::TypeMismatch,
                format!("cannot index {}", other.type_name()),
            ),
        }
    }

    fn index_set(&self, object: &Value, index: &Value, value: Value) -> Flow {
        match object {
            Value::Array(items) => {
                let mut items = items.write().unwrap();
                match index_to_offset(index, items.len()) {
                    Some(i) => {
                        items[i] = value.ref_clone();
                        Flow::Value(value)
                    }
                    None => Flow::Value(Value::error(
                        ErrorCode::IndexOutOfBounds,
                        format!(
                            "index {} out of bounds for array of length {}",
                            index.to_display_string(),
                            items.len()
                        ),
                    )),
                }
            }
            Value::Object(_) => {
                object.object_set(&index.to_display_string(), value.ref_clone());
                Flow::Value(value)
            }
            Value::Error(_) => Flow::Value(object.ref_clone()),
            other => Flow::Value(Value::error(
                ErrorCode::TypeMismatch,
                format!("cannot index {}", other.type_name()),
            )),
        }
    }

    fn record_call(&mut self, name: &str, elapsed: Duration) {
        if !self.profiling {
            return;
        }
        let threshold = self.hot_threshold;
        let profile = self
            .profiles
            .entry(name.to_string())
            .or_insert(Profile {
                calls: 0,
                total: Duration::ZERO,
                hot: false,
            });
        profile.calls += 1;
        profile.total += elapsed;
        if profile.calls >= threshold {
            profile.hot = true;
        }
    }

    pub fn execution_stats(&self) -> ExecutionStats {
        let mut functions: Vec<FunctionStats> = self
            .profiles
            .iter()
            .map(|(name, profile)| FunctionStats {
                name: name.clone(),
                calls: profile.calls,
                total_micros: profile.total.as_micros(),
                hot: profile.hot,
            })
            .collect();
        functions.sort_by(|a, b| b.calls.cmp(&a.calls).then(a.name.cmp(&b.name)));
        ExecutionStats { functions }
    }

    /// Render the profiling table into the caller's buffer.
    pub fn render_execution_stats(&self, buffer: &mut String) {
        let stats = self.execution_stats();
        buffer.push_str("calls  micros  hot  function\n");
        for f in &stats.functions {
            buffer.push_str(&format!(
                "{:>5}  {:>6}  {:>3}  {}\n",
                f.calls,
                f.total_micros,
                if f.hot { "yes" } else { "no" },
                f.name
            ));
        }
    }
}

/// Array/string index: non-negative integral numbers inside bounds.
fn index_to_offset(index: &Value, len: usize) -> Option<usize> {
    match index {
        Value::Number(n) => {
            if n.fract() != 0.0 || *n < 0.0 {
                return None;
            }
            let i = *n as usize;
            if i < len {
                Some(i)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::NodeArena;
    use crate::builtins;
    use crate::parser::Parser;

    fn eval_program(source: &str) -> Value {
        let mut interner = Interner::new();
        let arena = NodeArena::new();
        let program = {
            let mut parser = Parser::new(source, &mut interner, &arena);
            parser.parse_program().expect("parse failed")
        };
        let root = Scope::root();
        builtins::register(&root, &mut interner);
        let mut interpreter = Interpreter::with_root(&arena, &interner, root);
        interpreter.run(&program)
    }

    #[test]
    fn set_and_add() {
        let result = eval_program("set x 5\nset y 10\nx + y\n");
        assert!(result.equals(&Value::number(15.0)));
    }

    #[test]
    fn function_recursion_factorial() {
        let source = "function fact n\n  if n <= 1\n    return 1\n  return n * fact (n - 1)\nfact 5\n";
        let result = eval_program(source);
        assert!(result.equals(&Value::number(120.0)), "got {:?}", result);
    }

    #[test]
    fn builtin_string_upper() {
        let result = eval_program("string_upper \"hello\"\n");
        assert!(result.equals(&Value::string("HELLO")));
    }

    #[test]
    fn while_loop_counts() {
        let source = "set i 0\nset total 0\nwhile i < 5\n  set total total + i\n  set i i + 1\ntotal\n";
        let result = eval_program(source);
        assert!(result.equals(&Value::number(10.0)), "got {:?}", result);
    }

    #[test]
    fn for_loop_over_array_and_string() {
        let source = "set total 0\nfor n in [1, 2, 3]\n  set total total + n\ntotal\n";
        assert!(eval_program(source).equals(&Value::number(6.0)));
        let source = "set out \"\"\nfor c in \"abc\"\n  set out out + c\nout\n";
        assert!(eval_program(source).equals(&Value::string("abc")));
    }

    #[test]
    fn break_and_continue() {
        let source = "set total 0\nfor n in 1 .. 10\n  if n = 3\n    continue\n  if n > 5\n    break\n  set total total + n\ntotal\n";
        // 1 + 2 + 4 + 5
        assert!(eval_program(source).equals(&Value::number(12.0)));
    }

    #[test]
    fn closures_capture_their_defining_scope() {
        let source = "set base 100\nfunction add-base n\n  return base + n\nadd-base 7\n";
        assert!(eval_program(source).equals(&Value::number(107.0)));
    }

    #[test]
    fn repeated_calls_do_not_corrupt_the_captured_scope() {
        // Regression guard: each call gets a fresh child scope; earlier
        // calls must not leak bindings into later ones.
        let source = "function double n\n  return n * 2\nset a double(3)\nset b double(10)\na + b\n";
        assert!(eval_program(source).equals(&Value::number(26.0)));
    }

    #[test]
    fn undefined_variable_is_an_error_value_with_hint() {
        let result = eval_program("set count 1\ncoutn + 1\n");
        assert_eq!(result.error_code(), Some(ErrorCode::UndefinedVariable));
        let message = result.error_message().unwrap();
        assert!(message.contains("coutn"));
        assert!(message.contains("count"), "hint missing: {}", message);
    }

    #[test]
    fn division_by_zero_propagates_through_arithmetic() {
        let result = eval_program("set x 10 / 0\nx + 1\n");
        assert_eq!(result.error_code(), Some(ErrorCode::DivisionByZero));
    }

    #[test]
    fn short_circuit_skips_the_right_operand() {
        // The undefined name on the right must never be evaluated.
        let result = eval_program("false and ghost\n");
        assert!(result.equals(&Value::boolean(false)));
        let result = eval_program("true or ghost\n");
        assert!(result.equals(&Value::boolean(true)));
    }

    #[test]
    fn throw_and_catch() {
        let source = "set out \"none\"\ntry\n  throw \"boom\"\n  set out \"unreached\"\ncatch err\n  set out err\nout\n";
        assert!(eval_program(source).equals(&Value::string("boom")));
    }

    #[test]
    fn uncaught_throw_surfaces_the_payload() {
        let result = eval_program("throw \"lost\"\n");
        assert!(result.equals(&Value::string("lost")));
    }

    #[test]
    fn catch_resets_exception_state() {
        let mut interner = Interner::new();
        let arena = NodeArena::new();
        let source = "try\n  throw 1\ncatch e\n  set x 2\nx\n";
        let program = {
            let mut parser = Parser::new(source, &mut interner, &arena);
            parser.parse_program().unwrap()
        };
        let root = Scope::root();
        builtins::register(&root, &mut interner);
        let mut interpreter = Interpreter::with_root(&arena, &interner, root);
        let result = interpreter.run(&program);
        assert!(result.equals(&Value::number(2.0)));
        assert!(!interpreter.has_exception());
    }

    #[test]
    fn stack_overflow_is_reported() {
        let mut interner = Interner::new();
        let arena = NodeArena::new();
        let source = "function spiral n\n  return spiral (n + 1)\nspiral 0\n";
        let program = {
            let mut parser = Parser::new(source, &mut interner, &arena);
            parser.parse_program().unwrap()
        };
        let root = Scope::root();
        builtins::register(&root, &mut interner);
        let mut interpreter = Interpreter::with_root(&arena, &interner, root);
        interpreter.set_max_depth(64);
        let result = interpreter.run(&program);
        assert_eq!(result.error_code(), Some(ErrorCode::StackOverflow));
        assert_eq!(interpreter.call_depth(), 0, "frames unwound");
    }

    #[test]
    fn classes_instances_and_inheritance() {
        let source = "class Animal\n  function constructor name\n    set this.name name\n  function speak\n    return \"...\"\nclass Dog extends Animal\n  function speak\n    return this.name + \" says woof\"\nset d new Dog(\"rex\")\nd.speak()\n";
        let result = eval_program(source);
        assert!(
            result.equals(&Value::string("rex says woof")),
            "got {:?}",
            result
        );
    }

    #[test]
    fn inherited_constructor_runs() {
        let source = "class Animal\n  function constructor name\n    set this.name name\nclass Cat extends Animal\nset c new Cat(\"mia\")\nc.name\n";
        let result = eval_program(source);
        assert!(result.equals(&Value::string("mia")), "got {:?}", result);
    }

    #[test]
    fn new_on_non_class_is_invalid_argument() {
        let result = eval_program("set NotAClass 5\nnew NotAClass\n");
        assert_eq!(result.error_code(), Some(ErrorCode::InvalidArgument));
    }

    #[test]
    fn member_and_index_access() {
        let source = "set o {a: 1, b: 2}\no.a + o[\"b\"]\n";
        assert!(eval_program(source).equals(&Value::number(3.0)));
        let source = "set xs [10, 20, 30]\nxs[1]\n";
        assert!(eval_program(source).equals(&Value::number(20.0)));
    }

    #[test]
    fn index_out_of_bounds_is_an_error() {
        let result = eval_program("set xs [1]\nxs[5]\n");
        assert_eq!(result.error_code(), Some(ErrorCode::IndexOutOfBounds));
    }

    #[test]
    fn put_assigns_through_paths() {
        let source = "set xs [1, 2, 3]\nput 9 xs[0]\nxs[0]\n";
        assert!(eval_program(source).equals(&Value::number(9.0)));
        let source = "set o {}\nput 7 o.score\no.score\n";
        assert!(eval_program(source).equals(&Value::number(7.0)));
    }

    #[test]
    fn missing_object_key_reads_as_null() {
        let result = eval_program("set o {a: 1}\no.missing\n");
        assert!(result.equals(&Value::Null));
    }

    #[test]
    fn import_without_loader_is_file_not_found() {
        let result = eval_program("import networking\n");
        assert_eq!(result.error_code(), Some(ErrorCode::FileNotFound));
    }

    #[test]
    fn export_records_names() {
        let mut interner = Interner::new();
        let arena = NodeArena::new();
        let source = "set answer 42\nexport answer\n";
        let program = {
            let mut parser = Parser::new(source, &mut interner, &arena);
            parser.parse_program().unwrap()
        };
        let root = Scope::root();
        builtins::register(&root, &mut interner);
        let mut interpreter = Interpreter::with_root(&arena, &interner, root);
        interpreter.run(&program);
        assert_eq!(interpreter.exports(), vec!["answer".to_string()]);
    }

    #[test]
    fn profiling_counts_calls_and_marks_hot() {
        let mut interner = Interner::new();
        let arena = NodeArena::new();
        let source = "function bump n\n  return n + 1\nset i 0\nwhile i < 6\n  set i bump(i)\ni\n";
        let program = {
            let mut parser = Parser::new(source, &mut interner, &arena);
            parser.parse_program().unwrap()
        };
        let root = Scope::root();
        builtins::register(&root, &mut interner);
        let mut interpreter = Interpreter::with_root(&arena, &interner, root);
        interpreter.enable_profiling(true);
        interpreter.set_hot_threshold(5);
        let result = interpreter.run(&program);
        assert!(result.equals(&Value::number(6.0)));
        let stats = interpreter.execution_stats();
        let bump = stats.functions.iter().find(|f| f.name == "bump").unwrap();
        assert_eq!(bump.calls, 6);
        assert!(bump.hot);
        let mut rendered = String::new();
        interpreter.render_execution_stats(&mut rendered);
        assert!(rendered.contains("bump"));
    }

    #[test]
    fn when_unless_whenever_aliases() {
        let source = "set x 0\nwhen true\n  set x 1\nunless true\n  set x 2\nx\n";
        assert!(eval_program(source).equals(&Value::number(1.0)));
        let source = "set i 0\nwhenever i < 3\n  set i i + 1\ni\n";
        assert!(eval_program(source).equals(&Value::number(3.0)));
        let source = "set i 0\nuntil i >= 3\n  set i i + 1\ni\n";
        assert!(eval_program(source).equals(&Value::number(3.0)));
    }

    #[test]
    fn undecidable_evaluates_to_null() {
        let result = eval_program("set x undecidable\nx\n");
        assert!(result.equals(&Value::Null));
    }

    #[test]
    fn equality_uses_single_equals() {
        assert!(eval_program("1 = 1\n").equals(&Value::boolean(true)));
        assert!(eval_program("1 != 2\n").equals(&Value::boolean(true)));
    }
}
