pub mod block;
pub mod chain;
pub mod definition;
pub mod integrity;
pub mod listing;
pub mod value;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::block::{Argument, Block};
use crate::chain::{Chain, ChainId};
use crate::definition::registry::{Registry, RegistryError};
use crate::definition::{Behavior, ControlFlow, Definition};
use crate::value::Value;

#[derive(Debug, Error)]
pub enum ProgramError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed program: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Everything a run needs: definitions, initial globals and chains.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub definitions: Registry,
    /// Global variables as they are when a run starts.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub chains: Vec<Chain>,
}

impl Program {
    /// An empty program with the standard definitions installed.
    pub fn new() -> Self {
        Program {
            definitions: Registry::with_builtins(),
            ..Program::default()
        }
    }

    /// Append a chain under a fresh id. A chain headed by a `define` block
    /// also registers its procedure.
    pub fn add_chain(&mut self, blocks: Vec<Block>) -> Result<ChainId, RegistryError> {
        let id = self.next_chain_id();
        let chain = Chain::new(id, blocks);
        if let Some(definition) = procedure_of(&chain) {
            self.definitions.register(definition)?;
        }
        self.chains.push(chain);
        Ok(id)
    }

    pub fn remove_chain(&mut self, id: ChainId) -> Option<Chain> {
        let index = self.chains.iter().position(|c| c.id == id)?;
        Some(self.chains.remove(index))
    }

    pub fn chain(&self, id: ChainId) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id == id)
    }

    pub fn chain_mut(&mut self, id: ChainId) -> Option<&mut Chain> {
        self.chains.iter_mut().find(|c| c.id == id)
    }

    /// The first chain headed by the "when run" block.
    pub fn entry_chain(&self) -> Option<&Chain> {
        self.chains.iter().find(|chain| {
            chain
                .first()
                .and_then(|block| self.definitions.resolve(&block.definition).ok())
                .and_then(|d| d.behavior.as_control())
                == Some(ControlFlow::OnStart)
        })
    }

    /// Register the procedure of every chain headed by a `define` block,
    /// pointing its body at that chain. Returns how many were recorded.
    pub fn record_procedures(&mut self) -> Result<usize, RegistryError> {
        let procedures: Vec<Definition> = self.chains.iter().filter_map(procedure_of).collect();
        let count = procedures.len();
        for definition in procedures {
            self.definitions.register(definition)?;
        }
        Ok(count)
    }

    pub fn to_json(&self) -> Result<String, ProgramError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a program, filling in missing standard definitions and
    /// recording procedures.
    pub fn from_json(json: &str) -> Result<Self, ProgramError> {
        let mut program: Program = serde_json::from_str(json)?;
        program.definitions.install_builtins();
        let procedures = program.record_procedures()?;
        debug!(
            "loaded program with {} chain(s) and {} procedure(s)",
            program.chains.len(),
            procedures
        );
        Ok(program)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProgramError> {
        let json = fs::read_to_string(path)?;
        Program::from_json(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProgramError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    fn next_chain_id(&self) -> ChainId {
        self.chains
            .iter()
            .map(|c| c.id.0 + 1)
            .max()
            .map(ChainId)
            .unwrap_or(ChainId(0))
    }
}

fn procedure_of(chain: &Chain) -> Option<Definition> {
    let head = chain.first()?;
    if head.definition.as_str() != definition::builtin::DEFINE {
        return None;
    }
    match head.arguments.first() {
        Some(Argument::NestedDefinition(definition)) => Some(Definition {
            behavior: Behavior::Procedure {
                body: Some(chain.id),
            },
            ..definition.clone()
        }),
        _ => None,
    }
}
