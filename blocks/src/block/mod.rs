pub mod path;

use serde::{Deserialize, Serialize};

use crate::definition::{Definition, DefinitionId};
use crate::value::Value;

/// A block's input, owned exclusively by the block that holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Argument {
    Literal(Value),
    #[serde(rename = "choice")]
    ConstChoice(String),
    #[serde(rename = "block")]
    NestedBlock(Block),
    #[serde(rename = "definition")]
    NestedDefinition(Definition),
}

impl Argument {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Argument::Literal(_) => "literal",
            Argument::ConstChoice(_) => "choice",
            Argument::NestedBlock(_) => "block",
            Argument::NestedDefinition(_) => "definition",
        }
    }

    pub fn as_block(&self) -> Option<&Block> {
        match self {
            Argument::NestedBlock(block) => Some(block),
            _ => None,
        }
    }
}

impl From<Value> for Argument {
    fn from(value: Value) -> Self {
        Argument::Literal(value)
    }
}

impl From<Block> for Argument {
    fn from(block: Block) -> Self {
        Argument::NestedBlock(block)
    }
}

/// One executable unit: a definition reference and its arguments, one per
/// value slot of the definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub definition: DefinitionId,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

impl Block {
    pub fn new(definition: impl Into<DefinitionId>) -> Self {
        Block {
            definition: definition.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_arguments(
        definition: impl Into<DefinitionId>,
        arguments: impl IntoIterator<Item = Argument>,
    ) -> Self {
        Block {
            definition: definition.into(),
            arguments: arguments.into_iter().collect(),
        }
    }

    /// Attach `block` in argument position `slot`, returning whatever the
    /// slot held before. `None` if the slot does not exist.
    pub fn attach(&mut self, slot: usize, block: Block) -> Option<Argument> {
        let argument = self.arguments.get_mut(slot)?;
        Some(std::mem::replace(argument, Argument::NestedBlock(block)))
    }

    /// Detach the nested block at `slot`, leaving an empty literal behind.
    pub fn detach(&mut self, slot: usize) -> Option<Block> {
        let argument = self.arguments.get_mut(slot)?;
        if !matches!(argument, Argument::NestedBlock(_)) {
            return None;
        }
        match std::mem::replace(argument, Argument::Literal(Value::default())) {
            Argument::NestedBlock(block) => Some(block),
            _ => None,
        }
    }

    pub fn set_literal(&mut self, slot: usize, value: Value) -> bool {
        match self.arguments.get_mut(slot) {
            Some(argument) if matches!(argument, Argument::Literal(_)) => {
                *argument = Argument::Literal(value);
                true
            }
            _ => false,
        }
    }

    pub fn set_choice(&mut self, slot: usize, choice: impl Into<String>) -> bool {
        match self.arguments.get_mut(slot) {
            Some(Argument::ConstChoice(current)) => {
                *current = choice.into();
                true
            }
            _ => false,
        }
    }

    /// Nested blocks directly held by this block, with their slot index.
    pub fn children(&self) -> impl Iterator<Item = (usize, &Block)> {
        self.arguments
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.as_block().map(|b| (i, b)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(a: f64, b: f64) -> Block {
        Block::with_arguments(
            "add",
            [Value::Number(a).into(), Value::Number(b).into()],
        )
    }

    #[test]
    fn attach_and_detach() {
        let mut print = Block::with_arguments("print", [Value::text("hi").into()]);
        let previous = print.attach(0, add(1.0, 2.0));
        assert_eq!(previous, Some(Argument::Literal(Value::text("hi"))));
        assert_eq!(print.children().count(), 1);

        let detached = print.detach(0);
        assert_eq!(detached, Some(add(1.0, 2.0)));
        assert_eq!(print.arguments[0], Argument::Literal(Value::default()));
        assert_eq!(print.detach(0), None);
        assert!(print.attach(3, add(0.0, 0.0)).is_none());
    }

    #[test]
    fn edit_literal_and_choice() {
        let mut block = Block::with_arguments(
            "math",
            [Argument::ConstChoice("abs".into()), Value::Number(-1.0).into()],
        );
        assert!(block.set_choice(0, "floor"));
        assert!(!block.set_choice(1, "floor"));
        assert!(block.set_literal(1, Value::Number(2.5)));
        assert_eq!(block.arguments[0], Argument::ConstChoice("floor".into()));
    }

    #[test]
    fn argument_json_shape() {
        let json = serde_json::to_string(&add(1.0, 2.0)).unwrap();
        assert_eq!(
            json,
            r#"{"definition":"add","arguments":[{"literal":1.0},{"literal":2.0}]}"#
        );
    }
}
