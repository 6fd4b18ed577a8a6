use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::intern::Symbol;
use crate::value::Value;

/// One link of the lexical scope chain. Cloning a `Scope` shares the link;
/// function values hold a clone of their defining scope.
#[derive(Debug, Clone)]
pub struct Scope(Arc<ScopeData>);

#[derive(Debug)]
struct ScopeData {
    vars: RwLock<HashMap<Symbol, Value>>,
    parent: Option<Scope>,
}

impl Scope {
    pub fn root() -> Scope {
        Scope(Arc::new(ScopeData {
            vars: RwLock::new(HashMap::new()),
            parent: None,
        }))
    }

    /// Fresh scope parented to this one.
    pub fn child(&self) -> Scope {
        Scope(Arc::new(ScopeData {
            vars: RwLock::new(HashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Bind in this scope, shadowing any outer binding of the same name.
    pub fn define(&self, name: Symbol, value: Value) {
        self.0.vars.write().unwrap().insert(name, value);
    }

    /// Walk the chain innermost-out.
    pub fn lookup(&self, name: Symbol) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(value) = s.0.vars.read().unwrap().get(&name) {
                return Some(value.ref_clone());
            }
            scope = s.0.parent.as_ref();
        }
        None
    }

    /// Overwrite the nearest existing binding. Returns false when the name
    /// is bound nowhere on the chain.
    pub fn assign(&self, name: Symbol, value: Value) -> bool {
        let mut scope = Some(self);
        while let Some(s) = scope {
            let mut vars = s.0.vars.write().unwrap();
            if vars.contains_key(&name) {
                vars.insert(name, value);
                return true;
            }
            drop(vars);
            scope = s.0.parent.as_ref();
        }
        false
    }

    /// Every name visible from this scope, for diagnostics.
    pub fn visible_names(&self) -> Vec<Symbol> {
        let mut names = Vec::new();
        let mut scope = Some(self);
        while let Some(s) = scope {
            names.extend(s.0.vars.read().unwrap().keys().copied());
            scope = s.0.parent.as_ref();
        }
        names
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
