use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::{Definition, DefinitionId, builtin};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("unknown definition: {0}")]
    UnknownDefinition(DefinitionId),
    #[error("definition '{id}' is already registered as a {existing} block")]
    DuplicateDefinition {
        id: DefinitionId,
        existing: &'static str,
    },
}

/// All definitions known to a program, indexed by identity.
/// Read-only for the interpreter once a run has started.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Definition>", into = "Vec<Definition>")]
pub struct Registry {
    definitions: BTreeMap<DefinitionId, Definition>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Registry::new();
        registry.install_builtins();
        registry
    }

    /// Add any standard definition that is missing. Never replaces an
    /// existing entry.
    pub fn install_builtins(&mut self) {
        for definition in builtin::definitions() {
            self.definitions
                .entry(definition.id.clone())
                .or_insert(definition);
        }
    }

    /// Add or replace a definition. Replacing one of a different behavior
    /// class (control, native, procedure) is rejected.
    pub fn register(&mut self, definition: Definition) -> Result<Option<Definition>, RegistryError> {
        if let Some(existing) = self.definitions.get(&definition.id) {
            let class = existing.behavior.class();
            if class != definition.behavior.class() {
                return Err(RegistryError::DuplicateDefinition {
                    id: definition.id,
                    existing: class,
                });
            }
            debug!("replacing definition '{}'", definition.id);
        }
        Ok(self.definitions.insert(definition.id.clone(), definition))
    }

    pub fn resolve(&self, id: &DefinitionId) -> Result<&Definition, RegistryError> {
        self.definitions
            .get(id)
            .ok_or_else(|| RegistryError::UnknownDefinition(id.clone()))
    }

    pub fn get(&self, id: &str) -> Option<&Definition> {
        self.definitions.get(&DefinitionId::new(id))
    }

    pub fn remove(&mut self, id: &DefinitionId) -> Option<Definition> {
        self.definitions.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl From<Vec<Definition>> for Registry {
    fn from(definitions: Vec<Definition>) -> Self {
        Registry {
            definitions: definitions
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
        }
    }
}

impl From<Registry> for Vec<Definition> {
    fn from(registry: Registry) -> Self {
        registry.definitions.into_values().collect()
    }
}
