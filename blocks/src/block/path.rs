use std::fmt;

use serde::{Deserialize, Serialize};

/// Location of a block inside a chain: the top-level index followed by the
/// argument slots walked to reach it. Built while traversing, never stored
/// on the block itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPath {
    pub index: usize,
    pub arguments: Vec<usize>,
}

impl BlockPath {
    pub fn top_level(index: usize) -> Self {
        BlockPath {
            index,
            arguments: Vec::new(),
        }
    }

    pub fn child(&self, slot: usize) -> Self {
        let mut arguments = self.arguments.clone();
        arguments.push(slot);
        BlockPath {
            index: self.index,
            arguments,
        }
    }
}

impl fmt::Display for BlockPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.index)?;
        for slot in &self.arguments {
            write!(f, " > argument {}", slot)?;
        }
        Ok(())
    }
}
