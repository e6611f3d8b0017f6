// ABOUTME: Environment chain for lexically-scoped name resolution (spec §3.4)

use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug)]
pub struct Environment {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Environment>>,
    /// `Some` marks this environment as the root scope of a function call
    /// frame; the inner value is that function's varargs, if it is a vararg
    /// function. Lookup for `...` stops at the nearest such frame instead of
    /// walking all the way to the global scope (spec §3.4/§4.3).
    function_root: Option<Option<Vec<Value>>>,
}

impl Environment {
    /// Creates a new environment with no parent.
    pub fn new() -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: None,
            function_root: Some(Some(Vec::new())),
        })
    }

    /// Creates a new child environment with a parent.
    pub fn with_parent(parent: Rc<Environment>) -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
            function_root: None,
        })
    }

    /// Creates the root environment of a function call frame, capturing its
    /// varargs (`None` if the function does not declare `...`).
    pub fn with_function_root(parent: Rc<Environment>, varargs: Option<Vec<Value>>) -> Rc<Self> {
        Rc::new(Environment {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(parent),
            function_root: Some(varargs),
        })
    }

    /// Resolves `...` by walking up to the nearest function-call frame.
    /// Fails if that frame is not a vararg function.
    pub fn varargs(&self) -> Result<Vec<Value>, ()> {
        match &self.function_root {
            Some(Some(values)) => Ok(values.clone()),
            Some(None) => Err(()),
            None => match &self.parent {
                Some(parent) => parent.varargs(),
                None => Err(()),
            },
        }
    }

    /// Introduces a binding in THIS scope (local declaration). Shadows any
    /// outer binding of the same name without disturbing it.
    pub fn define(&self, name: String, value: Value) {
        self.bindings.borrow_mut().insert(name, value);
    }

    /// Looks up a local in THIS scope and parent scopes recursively.
    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.bindings.borrow().get(name) {
            return Some(value.clone());
        }
        if let Some(ref parent) = self.parent {
            return parent.get(name);
        }
        None
    }

    /// Assigns to the innermost existing binding of `name`, walking the
    /// chain. Returns `false` if no such local exists anywhere in the
    /// chain, in which case the evaluator falls back to a global write
    /// (spec §4.3 Assignment).
    pub fn assign_existing(&self, name: &str, value: Value) -> bool {
        if self.bindings.borrow().contains_key(name) {
            self.bindings.borrow_mut().insert(name.to_string(), value);
            return true;
        }
        if let Some(ref parent) = self.parent {
            return parent.assign_existing(name, value);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_and_get() {
        let env = Environment::new();
        env.define("x".to_string(), Value::Integer(42));
        assert_eq!(env.get("x"), Some(Value::Integer(42)));
    }

    #[test]
    fn undefined_name_is_none() {
        let env = Environment::new();
        assert!(env.get("undefined").is_none());
    }

    #[test]
    fn local_shadows_parent() {
        let parent = Environment::new();
        parent.define("x".to_string(), Value::Integer(42));

        let child = Environment::with_parent(parent);
        child.define("x".to_string(), Value::Integer(100));

        assert_eq!(child.get("x"), Some(Value::Integer(100)));
    }

    #[test]
    fn child_sees_parent_binding() {
        let parent = Environment::new();
        parent.define("x".to_string(), Value::Integer(42));
        let child = Environment::with_parent(parent);
        assert_eq!(child.get("x"), Some(Value::Integer(42)));
    }

    #[test]
    fn multiple_levels_resolve() {
        let grandparent = Environment::new();
        grandparent.define("a".to_string(), Value::Integer(1));
        let parent = Environment::with_parent(grandparent);
        parent.define("b".to_string(), Value::Integer(2));
        let child = Environment::with_parent(parent);
        child.define("c".to_string(), Value::Integer(3));

        assert_eq!(child.get("a"), Some(Value::Integer(1)));
        assert_eq!(child.get("b"), Some(Value::Integer(2)));
        assert_eq!(child.get("c"), Some(Value::Integer(3)));
    }

    #[test]
    fn assign_existing_walks_chain() {
        let parent = Environment::new();
        parent.define("x".to_string(), Value::Integer(1));
        let child = Environment::with_parent(parent);

        assert!(child.assign_existing("x", Value::Integer(2)));
        assert_eq!(child.get("x"), Some(Value::Integer(2)));
    }

    #[test]
    fn assign_existing_returns_false_when_unbound() {
        let env = Environment::new();
        assert!(!env.assign_existing("y", Value::Integer(1)));
    }
}
