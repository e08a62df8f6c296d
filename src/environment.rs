//! Lexical scope chain: a parent-linked chain of name→value tables.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::module::ModuleStore;
use crate::value::Value;

struct EnvNode {
    parent: Option<Env>,
    table: HashMap<String, Value>,
    /// Present only on the root node of a top-level environment (the
    /// program's root, or a module's own top-level env). Child scopes walk
    /// up to find it.
    modules: Option<Rc<RefCell<ModuleStore>>>,
}

/// A reference-counted environment node. Closures capture this handle at
/// definition time; a fresh child scope is a new node whose parent points
/// back at the enclosing one.
#[derive(Clone)]
pub struct Env(Rc<RefCell<EnvNode>>);

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Env(len={})", self.len())
    }
}

impl Env {
    pub fn new() -> Self {
        Env(Rc::new(RefCell::new(EnvNode {
            parent: None,
            table: HashMap::new(),
            modules: Some(Rc::new(RefCell::new(ModuleStore::new()))),
        })))
    }

    /// A fresh top-level environment backed by an already-existing module
    /// store, used for a module's own environment so that nested imports
    /// share the same cache as the importing program.
    pub fn new_with_store(store: Rc<RefCell<ModuleStore>>) -> Self {
        Env(Rc::new(RefCell::new(EnvNode { parent: None, table: HashMap::new(), modules: Some(store) })))
    }

    pub fn child(parent: &Env) -> Self {
        Env(Rc::new(RefCell::new(EnvNode { parent: Some(parent.clone()), table: HashMap::new(), modules: None })))
    }

    /// Walks to the owning root environment's module store.
    pub fn module_store(&self) -> Rc<RefCell<ModuleStore>> {
        let node = self.0.borrow();
        match &node.modules {
            Some(store) => store.clone(),
            None => {
                let parent = node.parent.clone().expect("environment chain has no root module store");
                drop(node);
                parent.module_store()
            }
        }
    }

    /// Installs a binding unconditionally, overwriting any existing value.
    /// Used by module import, which is idempotent by design rather than
    /// going through [`Env::def`]'s duplicate-definition check.
    pub fn define_or_overwrite(&self, name: impl Into<String>, value: Value) {
        self.0.borrow_mut().table.insert(name.into(), value);
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Defines `name` in this exact scope. Fails if already present here
    /// (shadowing a parent binding is fine; redefining locally is not).
    pub fn def(&self, name: impl Into<String>, value: Value) -> Result<Value> {
        let name = name.into();
        let mut node = self.0.borrow_mut();
        if node.table.contains_key(&name) {
            return Err(Error::DuplicateDef(name));
        }
        node.table.insert(name, value.clone());
        Ok(value)
    }

    /// Mutates the nearest binding in the chain, or fails with `UnknownSymbol`.
    pub fn set(&self, name: &str, value: Value) -> Result<Value> {
        let mut node = self.0.borrow_mut();
        if let Some(slot) = node.table.get_mut(name) {
            *slot = value.clone();
            return Ok(value);
        }
        match node.parent.clone() {
            Some(parent) => {
                drop(node);
                parent.set(name, value)
            }
            None => Err(Error::UnknownSymbol(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        let node = self.0.borrow();
        if let Some(v) = node.table.get(name) {
            return Ok(v.clone());
        }
        match node.parent.clone() {
            Some(parent) => {
                drop(node);
                parent.get(name)
            }
            None => Err(Error::UnknownSymbol(name.to_string())),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        let node = self.0.borrow();
        if node.table.contains_key(name) {
            return true;
        }
        match node.parent.clone() {
            Some(parent) => {
                drop(node);
                parent.exists(name)
            }
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().table.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().table.len()
    }

    pub fn foreach(&self, mut ftn: impl FnMut(&str, &Value)) {
        for (name, value) in self.0.borrow().table.iter() {
            ftn(name, value);
        }
    }
}

impl Default for Env {
    fn default() -> Self {
        Env::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn def_then_get_roundtrips() {
        let env = Env::new();
        env.def("x", Value::Int(1)).unwrap();
        assert_eq!(env.get("x").unwrap(), Value::Int(1));
    }

    #[test]
    fn duplicate_def_fails() {
        let env = Env::new();
        env.def("x", Value::Int(1)).unwrap();
        assert_matches::assert_matches!(env.def("x", Value::Int(2)), Err(Error::DuplicateDef(_)));
    }

    #[test]
    fn set_walks_parent_chain() {
        let parent = Env::new();
        parent.def("x", Value::Int(1)).unwrap();
        let child = Env::child(&parent);
        child.set("x", Value::Int(2)).unwrap();
        assert_eq!(parent.get("x").unwrap(), Value::Int(2));
    }

    #[test]
    fn get_unknown_fails() {
        let env = Env::new();
        assert_matches::assert_matches!(env.get("missing"), Err(Error::UnknownSymbol(_)));
    }

    #[test]
    fn child_scope_shadows_without_mutating_parent() {
        let parent = Env::new();
        parent.def("x", Value::Int(1)).unwrap();
        let child = Env::child(&parent);
        child.def("x", Value::Int(2)).unwrap();
        assert_eq!(parent.get("x").unwrap(), Value::Int(1));
        assert_eq!(child.get("x").unwrap(), Value::Int(2));
    }
}
