//! Lexical scopes and the symbol table stack

use std::collections::HashMap;

use crate::compiler::ir::{AllocId, Value};
use crate::types::{FunctionId, ModuleId, TypeId};

/// What a name resolves to
#[derive(Debug, Clone)]
pub enum Symbol {
    /// A value (variable, argument, promoted temporary)
    Value(Value),
    /// A type
    Type(TypeId),
    /// An imported module
    Module(ModuleId),
    /// An enum with its variant values
    Enum {
        /// The enum's value type
        type_id: TypeId,
        /// Variant name -> constant value
        variants: HashMap<String, i64>,
    },
    /// Callable overload set
    Functions(Vec<FunctionId>),
}

/// A stack-constructed object registered for destruction at scope exit
#[derive(Debug, Clone)]
pub struct ScopedObject {
    /// Backing stack allocation; `None` when the storage was already
    /// released and only the destructor remains to run
    pub alloc: Option<AllocId>,
    /// Pointer (or host handle) value addressing the object
    pub ptr: Value,
    /// Object type
    pub type_id: TypeId,
}

/// One lexical scope
#[derive(Debug, Default)]
pub struct Scope {
    symbols: HashMap<String, Symbol>,
    /// Objects to destroy when the scope exits, in construction order
    pub stack_objects: Vec<ScopedObject>,
    /// Scope is a loop body; `continue`/`break` lowering consults this
    pub is_loop: bool,
}

/// The scope stack of the function currently being lowered.
#[derive(Debug)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    /// New stack with a root scope.
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::default()],
        }
    }

    /// Enter a scope.
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Leave the innermost scope, returning it so the compiler can emit
    /// destructor calls for its stack objects.
    pub fn pop(&mut self) -> Scope {
        debug_assert!(self.scopes.len() > 1, "cannot pop the root scope");
        self.scopes.pop().unwrap_or_default()
    }

    /// Depth of the stack (root scope included).
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Define a symbol in the innermost scope. Returns false if the name
    /// already exists there.
    pub fn add(&mut self, name: &str, sym: Symbol) -> bool {
        let scope = self.scopes.last_mut().expect("scope stack never empty");
        if scope.symbols.contains_key(name) {
            return false;
        }
        scope.symbols.insert(name.to_string(), sym);
        true
    }

    /// Resolve a name, innermost scope first.
    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.scopes.iter().rev().find_map(|s| s.symbols.get(name))
    }

    /// Overwrite a value symbol wherever it is defined (assignment to a
    /// promoted register).
    pub fn update_value(&mut self, name: &str, value: Value) {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(Symbol::Value(v)) = scope.symbols.get_mut(name) {
                *v = value;
                return;
            }
        }
    }

    /// Register a stack object for destruction when the innermost scope
    /// exits.
    pub fn add_stack_object(&mut self, obj: ScopedObject) {
        self.scopes
            .last_mut()
            .expect("scope stack never empty")
            .stack_objects
            .push(obj);
    }

    /// Stack objects of every open scope, outermost first. Used by
    /// return lowering, which must destroy everything before leaving
    /// the function.
    pub fn all_stack_objects(&self) -> Vec<ScopedObject> {
        self.scopes
            .iter()
            .flat_map(|s| s.stack_objects.iter().cloned())
            .collect()
    }

    /// Stack objects of the innermost scope only.
    pub fn current_stack_objects(&self) -> Vec<ScopedObject> {
        self.scopes
            .last()
            .map(|s| s.stack_objects.clone())
            .unwrap_or_default()
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::type_id_from_name;

    #[test]
    fn inner_scopes_shadow_outer() {
        let tp = type_id_from_name("i32");
        let mut s = ScopeStack::new();
        assert!(s.add("x", Symbol::Type(tp)));
        s.push();
        let other = type_id_from_name("f32");
        assert!(s.add("x", Symbol::Type(other)));
        match s.get("x") {
            Some(Symbol::Type(t)) => assert_eq!(*t, other),
            _ => panic!("expected type symbol"),
        }
        s.pop();
        match s.get("x") {
            Some(Symbol::Type(t)) => assert_eq!(*t, tp),
            _ => panic!("expected type symbol"),
        }
    }

    #[test]
    fn duplicate_in_same_scope_rejected() {
        let tp = type_id_from_name("i32");
        let mut s = ScopeStack::new();
        assert!(s.add("x", Symbol::Type(tp)));
        assert!(!s.add("x", Symbol::Type(tp)));
    }

    #[test]
    fn collects_stack_objects_across_scopes() {
        let tp = type_id_from_name("Counter");
        let mut s = ScopeStack::new();
        s.add_stack_object(ScopedObject {
            alloc: Some(1),
            ptr: Value::reg(1, tp),
            type_id: tp,
        });
        s.push();
        s.add_stack_object(ScopedObject {
            alloc: Some(2),
            ptr: Value::reg(2, tp),
            type_id: tp,
        });
        assert_eq!(s.all_stack_objects().len(), 2);
        assert_eq!(s.current_stack_objects().len(), 1);
        let popped = s.pop();
        assert_eq!(popped.stack_objects.len(), 1);
        assert_eq!(s.all_stack_objects().len(), 1);
    }
}
