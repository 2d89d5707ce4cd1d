pub mod builtin;
pub mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::chain::ChainId;

/// The declared identity of a block kind, e.g. `repeat` or a procedure name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(pub String);

impl DefinitionId {
    pub fn new(id: impl Into<String>) -> Self {
        DefinitionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DefinitionId {
    fn from(s: &str) -> Self {
        DefinitionId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(default = "opaque")]
    pub a: u8,
}

fn opaque() -> u8 {
    255
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b, a: 255 }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::rgb(0x88, 0x88, 0x88)
    }
}

/// One input position of a definition, in display order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputSlot {
    /// Fixed label text.
    Text { text: String },
    /// Fixed icon, identified by the editor's asset name.
    Image { image: String },
    /// An evaluable argument: a literal or a nested block.
    Argument { name: String },
    /// A choice among fixed strings.
    Dropdown { name: String, choices: Vec<String> },
    /// Holds the definition being authored by a `define` block.
    DefinitionEditor,
}

impl InputSlot {
    pub fn text(text: impl Into<String>) -> Self {
        InputSlot::Text { text: text.into() }
    }

    pub fn argument(name: impl Into<String>) -> Self {
        InputSlot::Argument { name: name.into() }
    }

    pub fn dropdown(name: impl Into<String>, choices: &[&str]) -> Self {
        InputSlot::Dropdown {
            name: name.into(),
            choices: choices.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Value slots are the ones a block must supply an Argument for.
    pub fn is_value_slot(&self) -> bool {
        matches!(
            self,
            InputSlot::Argument { .. } | InputSlot::Dropdown { .. } | InputSlot::DefinitionEditor
        )
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            InputSlot::Argument { name } | InputSlot::Dropdown { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Control-flow behaviors that shape the interpreter's frame structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlow {
    /// Hat block marking the chain started by "run".
    OnStart,
    /// Hat block heading a procedure body chain.
    DefineProcedure,
    Repeat,
    RepeatUntil,
    Forever,
    If,
    Else,
    End,
    Return,
}

impl ControlFlow {
    /// Blocks that open a body closed by a matching `End`.
    pub fn opens_body(self) -> bool {
        matches!(
            self,
            ControlFlow::Repeat | ControlFlow::RepeatUntil | ControlFlow::Forever | ControlFlow::If
        )
    }

    pub fn is_hat(self) -> bool {
        matches!(self, ControlFlow::OnStart | ControlFlow::DefineProcedure)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Behavior {
    Control { flow: ControlFlow },
    /// Implemented by the interpreter's native table under `name`.
    Native { name: String },
    /// User-authored procedure; `body` is the chain headed by its `define`
    /// block, filled in once the editor records the procedure.
    Procedure {
        #[serde(default)]
        body: Option<ChainId>,
    },
}

impl Behavior {
    pub fn control(flow: ControlFlow) -> Self {
        Behavior::Control { flow }
    }

    pub fn native(name: impl Into<String>) -> Self {
        Behavior::Native { name: name.into() }
    }

    pub fn as_control(&self) -> Option<ControlFlow> {
        match self {
            Behavior::Control { flow } => Some(*flow),
            _ => None,
        }
    }

    pub fn class(&self) -> &'static str {
        match self {
            Behavior::Control { .. } => "control",
            Behavior::Native { .. } => "native",
            Behavior::Procedure { .. } => "procedure",
        }
    }
}

/// A block's schema plus its behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: DefinitionId,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub color: Color,
    pub slots: Vec<InputSlot>,
    pub behavior: Behavior,
}

impl Definition {
    pub fn new(id: impl Into<DefinitionId>, slots: Vec<InputSlot>, behavior: Behavior) -> Self {
        Definition {
            id: id.into(),
            category: String::new(),
            color: Color::default(),
            slots,
            behavior,
        }
    }

    /// A custom procedure definition whose body has not been recorded yet.
    pub fn procedure(id: impl Into<DefinitionId>, slots: Vec<InputSlot>) -> Self {
        Definition {
            category: "custom".to_string(),
            color: Color::rgb(0xff, 0x66, 0x80),
            ..Definition::new(id, slots, Behavior::Procedure { body: None })
        }
    }

    pub fn in_category(mut self, category: &str, color: Color) -> Self {
        self.category = category.to_string();
        self.color = color;
        self
    }

    pub fn value_slots(&self) -> impl Iterator<Item = &InputSlot> {
        self.slots.iter().filter(|s| s.is_value_slot())
    }

    pub fn arity(&self) -> usize {
        self.value_slots().count()
    }

    /// Names bound as locals when the definition is called as a procedure.
    pub fn parameter_names(&self) -> Vec<String> {
        self.value_slots()
            .filter_map(|s| s.name().map(str::to_string))
            .collect()
    }
}

impl From<String> for DefinitionId {
    fn from(s: String) -> Self {
        DefinitionId(s)
    }
}
