//! Plain-text rendering of chains. Stands in for the visual editor when
//! something has to point at a block, e.g. in diagnostics.

use std::fmt;
use std::ops::Range;

use crate::block::{Argument, Block};
use crate::chain::Chain;
use crate::definition::registry::Registry;
use crate::definition::{ControlFlow, Definition, InputSlot};
use crate::value::Value;

const INDENT: &str = "    ";

/// A rendered chain: one line per top-level block, indented by body depth.
#[derive(Debug, Clone)]
pub struct Listing {
    pub text: String,
    spans: Vec<Range<usize>>,
}

impl Listing {
    pub fn of_chain(chain: &Chain, registry: &Registry) -> Self {
        let mut text = String::new();
        let mut spans = Vec::with_capacity(chain.blocks.len());
        let mut depth = 0usize;

        for block in &chain.blocks {
            let flow = registry
                .resolve(&block.definition)
                .ok()
                .and_then(|d| d.behavior.as_control());
            if matches!(flow, Some(ControlFlow::Else) | Some(ControlFlow::End)) {
                depth = depth.saturating_sub(1);
            }

            for _ in 0..depth {
                text.push_str(INDENT);
            }
            let start = text.len();
            render_block(&mut text, block, registry);
            spans.push(start..text.len());
            text.push('\n');

            match flow {
                Some(flow) if flow.opens_body() => depth += 1,
                Some(ControlFlow::Else) => depth += 1,
                _ => {}
            }
        }

        Listing { text, spans }
    }

    /// Byte range of the top-level block at `index`.
    pub fn span(&self, index: usize) -> Option<Range<usize>> {
        self.spans.get(index).cloned()
    }
}

impl fmt::Display for Listing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Render a single block, nested arguments included.
pub fn render_block(out: &mut String, block: &Block, registry: &Registry) {
    let Ok(definition) = registry.resolve(&block.definition) else {
        out.push_str(&format!("<{}>", block.definition));
        for argument in &block.arguments {
            out.push(' ');
            render_argument(out, argument, registry);
        }
        return;
    };

    let mut arguments = block.arguments.iter();
    let mut first = true;
    for slot in &definition.slots {
        if !first {
            out.push(' ');
        }
        first = false;
        match slot {
            InputSlot::Text { text } => out.push_str(text),
            InputSlot::Image { image } => out.push_str(&format!("<{}>", image)),
            _ => match arguments.next() {
                Some(argument) => render_argument(out, argument, registry),
                None => out.push_str("()"),
            },
        }
    }
}

fn render_argument(out: &mut String, argument: &Argument, registry: &Registry) {
    match argument {
        Argument::Literal(Value::Text(s)) => out.push_str(&format!("(\"{}\")", s)),
        Argument::Literal(value) => out.push_str(&format!("({})", value)),
        Argument::ConstChoice(choice) => out.push_str(&format!("[{}]", choice)),
        Argument::NestedBlock(block) => {
            out.push('(');
            render_block(out, block, registry);
            out.push(')');
        }
        Argument::NestedDefinition(definition) => render_signature(out, definition),
    }
}

fn render_signature(out: &mut String, definition: &Definition) {
    out.push_str(definition.id.as_str());
    for slot in &definition.slots {
        match slot {
            InputSlot::Text { text } if text != definition.id.as_str() => {
                out.push(' ');
                out.push_str(text);
            }
            InputSlot::Argument { name } | InputSlot::Dropdown { name, .. } => {
                out.push_str(&format!(" ({})", name));
            }
            _ => {}
        }
    }
}
