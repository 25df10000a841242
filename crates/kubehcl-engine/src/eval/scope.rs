//! Variable scopes for expression evaluation

use std::collections::BTreeMap;

use kubehcl_core::Value;

use crate::functions::Functions;

/// Names visible to an expression, layered over an optional parent
///
/// Child scopes bind iteration variables (`each`, `count`, `for`
/// expression names, dynamic block iterators) without copying the parent.
#[derive(Debug)]
pub struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    vars: BTreeMap<String, Value>,
    functions: &'a Functions,
}

impl<'a> Scope<'a> {
    pub fn new(functions: &'a Functions) -> Self {
        Self {
            parent: None,
            vars: BTreeMap::new(),
            functions,
        }
    }

    /// Empty scope that falls back to `self` for lookups
    pub fn child(&self) -> Scope<'_> {
        Scope {
            parent: Some(self),
            vars: BTreeMap::new(),
            functions: self.functions,
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(v) => Some(v),
            None => self.parent.and_then(|p| p.get(name)),
        }
    }

    pub fn functions(&self) -> &'a Functions {
        self.functions
    }

    /// Every visible name, innermost first, without duplicates
    pub fn names(&self) -> Vec<String> {
        let mut out: Vec<String> = self.vars.keys().cloned().collect();
        if let Some(parent) = self.parent {
            for name in parent.names() {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::functions::test_support::lib;

    #[test]
    fn test_child_shadows_parent() {
        let f = lib();
        let mut root = Scope::new(&f);
        root.set("a", Value::from(1i64));
        root.set("b", Value::from(2i64));
        let child = root.child().with("a", Value::from(10i64));
        assert_eq!(child.get("a"), Some(&Value::from(10i64)));
        assert_eq!(child.get("b"), Some(&Value::from(2i64)));
        assert_eq!(child.get("c"), None);
        assert_eq!(child.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
