use std::collections::{BTreeMap, HashMap};

use blocks::value::Value;

use crate::error::RuntimeError;

/// Locals of one procedure call.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: HashMap<String, Value>,
}

impl Scope {
    pub fn new() -> Self {
        Scope::default()
    }

    /// Bind each parameter name to the argument at the same position.
    pub fn with_parameters(names: &[String], arguments: Vec<Value>) -> Self {
        Scope {
            variables: names.iter().cloned().zip(arguments).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Globals plus a stack of procedure scopes. Only the innermost scope is
/// visible: a lookup tries it, then the globals.
#[derive(Debug, Default)]
pub struct VariableEnvironment {
    globals: HashMap<String, Value>,
    scopes: Vec<Scope>,
}

impl VariableEnvironment {
    pub fn new() -> Self {
        VariableEnvironment::default()
    }

    pub fn with_globals(globals: &BTreeMap<String, Value>) -> Self {
        VariableEnvironment {
            globals: globals
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            scopes: Vec::new(),
        }
    }

    pub fn push_scope(&mut self, scope: Scope) {
        self.scopes.push(scope);
    }

    pub fn pop_scope(&mut self) -> Option<Scope> {
        self.scopes.pop()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    /// Drop every local scope, keeping the globals.
    pub fn clear_scopes(&mut self) {
        self.scopes.clear();
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .last()
            .and_then(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    pub fn get_var(&self, name: &str) -> Result<Value, RuntimeError> {
        self.lookup(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnboundVariable(name.to_string()))
    }

    /// Update the nearest existing binding, or create one in the innermost
    /// scope if the name is unbound.
    pub fn set_var(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.get(name).is_some() {
                scope.set(name, value);
                return;
            }
        }
        if let Some(slot) = self.globals.get_mut(name) {
            *slot = value;
            return;
        }
        self.declare_var(name, value);
    }

    /// Bind in the innermost scope, shadowing any global of the same name.
    pub fn declare_var(&mut self, name: &str, value: Value) {
        match self.scopes.last_mut() {
            Some(scope) => scope.set(name, value),
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.globals.iter().map(|(name, value)| (name.as_str(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbound_lookup_fails() {
        let env = VariableEnvironment::new();
        assert_eq!(
            env.get_var("missing"),
            Err(RuntimeError::UnboundVariable("missing".into()))
        );
    }

    #[test]
    fn locals_shadow_globals_for_one_scope() {
        let mut env = VariableEnvironment::new();
        env.set_var("x", Value::Number(1.0));
        env.push_scope(Scope::with_parameters(&["x".into()], vec![Value::Number(2.0)]));
        assert_eq!(env.get_var("x"), Ok(Value::Number(2.0)));

        env.set_var("x", Value::Number(3.0));
        assert_eq!(env.global("x"), Some(&Value::Number(1.0)));

        env.pop_scope();
        assert_eq!(env.get_var("x"), Ok(Value::Number(1.0)));
    }

    #[test]
    fn set_updates_global_unless_shadowed() {
        let mut env = VariableEnvironment::new();
        env.set_var("total", Value::Number(0.0));
        env.push_scope(Scope::new());
        env.set_var("total", Value::Number(5.0));
        env.set_var("fresh", Value::Boolean(true));
        assert_eq!(env.global("total"), Some(&Value::Number(5.0)));
        assert_eq!(env.global("fresh"), None);

        env.declare_var("total", Value::Number(9.0));
        assert_eq!(env.get_var("total"), Ok(Value::Number(9.0)));
        assert_eq!(env.global("total"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn outer_scopes_are_not_visible() {
        let mut env = VariableEnvironment::new();
        env.push_scope(Scope::with_parameters(&["n".into()], vec![Value::Number(1.0)]));
        env.push_scope(Scope::new());
        assert!(env.get_var("n").is_err());
        env.clear_scopes();
        assert_eq!(env.scope_count(), 0);
    }
}
