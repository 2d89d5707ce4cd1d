pub mod structure;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::Block;

/// Identity of a chain within its program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u32);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chain {}", self.0)
    }
}

/// Where the editor placed the chain on its canvas. Ignored by execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// An ordered script or procedure body. Bodies of `repeat`, `if` and the
/// other openers are delimited inline by `else`/`end` blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chain {
    pub id: ChainId,
    #[serde(default)]
    pub position: Position,
    pub blocks: Vec<Block>,
}

impl Chain {
    pub fn new(id: ChainId, blocks: Vec<Block>) -> Self {
        Chain {
            id,
            position: Position::default(),
            blocks,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn first(&self) -> Option<&Block> {
        self.blocks.first()
    }

    pub fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Insert at `index`, clamped to the end of the chain.
    pub fn insert(&mut self, index: usize, block: Block) {
        let index = index.min(self.blocks.len());
        self.blocks.insert(index, block);
    }

    pub fn remove(&mut self, index: usize) -> Option<Block> {
        (index < self.blocks.len()).then(|| self.blocks.remove(index))
    }
}
