//! Structural integrity of chains: every block matches its definition's
//! schema and every body is well formed. Violations are editor bugs and are
//! reported, never executed around.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use thiserror::Error;

use crate::Program;
use crate::block::path::BlockPath;
use crate::block::{Argument, Block};
use crate::chain::structure::{self, StructureError};
use crate::chain::{Chain, ChainId};
use crate::definition::registry::Registry;
use crate::definition::{DefinitionId, InputSlot};
use crate::listing::Listing;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViolationKind {
    #[error("unknown definition '{0}'")]
    UnknownDefinition(DefinitionId),
    #[error("'{definition}' takes {expected} argument(s), found {found}")]
    ArityMismatch {
        definition: DefinitionId,
        expected: usize,
        found: usize,
    },
    #[error("argument {slot} of '{definition}' must be a {expected}, found a {found}")]
    SlotMismatch {
        definition: DefinitionId,
        slot: usize,
        expected: &'static str,
        found: &'static str,
    },
    #[error("'{choice}' is not one of the choices of argument {slot} of '{definition}'")]
    ChoiceNotOffered {
        definition: DefinitionId,
        slot: usize,
        choice: String,
    },
    #[error("control block '{0}' cannot be used as an argument")]
    ControlInArgument(DefinitionId),
    #[error("'{0}' must be the first block of its chain")]
    HatNotFirst(DefinitionId),
    #[error(transparent)]
    Structure(#[from] StructureError),
}

/// One integrity failure, located by path rather than by parent pointer.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{chain}, {path}: {kind}")]
pub struct IntegrityViolation {
    pub chain: ChainId,
    pub path: BlockPath,
    pub kind: ViolationKind,
}

impl IntegrityViolation {
    /// Diagnostic labelled on the violating block's line of `listing`.
    pub fn to_diagnostic(&self, file_id: usize, listing: &Listing) -> Diagnostic<usize> {
        let diagnostic = Diagnostic::error()
            .with_message(self.kind.to_string())
            .with_notes(vec![format!("at {}", self.path)]);
        match listing.span(self.path.index) {
            Some(span) => diagnostic.with_labels(vec![Label::primary(file_id, span)]),
            None => diagnostic,
        }
    }
}

/// Check every chain of the program.
pub fn check_program(program: &Program) -> Vec<IntegrityViolation> {
    program
        .chains
        .iter()
        .flat_map(|chain| check_chain(chain, &program.definitions))
        .collect()
}

/// Check one chain, including a transient one still being edited.
pub fn check_chain(chain: &Chain, registry: &Registry) -> Vec<IntegrityViolation> {
    let mut checker = Checker {
        chain: chain.id,
        registry,
        violations: Vec::new(),
    };

    for (index, block) in chain.blocks.iter().enumerate() {
        let path = BlockPath::top_level(index);
        if index > 0 {
            checker.check_hat_position(block, &path);
        }
        checker.check_block(block, &path);
    }

    if let Err(error) = structure::analyze(chain, registry) {
        let path = BlockPath::top_level(error.at());
        checker.report(path, error.into());
    }

    checker.violations
}

struct Checker<'a> {
    chain: ChainId,
    registry: &'a Registry,
    violations: Vec<IntegrityViolation>,
}

impl Checker<'_> {
    fn report(&mut self, path: BlockPath, kind: ViolationKind) {
        self.violations.push(IntegrityViolation {
            chain: self.chain,
            path,
            kind,
        });
    }

    fn check_hat_position(&mut self, block: &Block, path: &BlockPath) {
        let is_hat = self
            .registry
            .resolve(&block.definition)
            .ok()
            .and_then(|d| d.behavior.as_control())
            .is_some_and(|flow| flow.is_hat());
        if is_hat {
            self.report(
                path.clone(),
                ViolationKind::HatNotFirst(block.definition.clone()),
            );
        }
    }

    fn check_block(&mut self, block: &Block, path: &BlockPath) {
        let definition = match self.registry.resolve(&block.definition) {
            Ok(definition) => definition,
            Err(_) => {
                self.report(
                    path.clone(),
                    ViolationKind::UnknownDefinition(block.definition.clone()),
                );
                return;
            }
        };

        let slots: Vec<&InputSlot> = definition.value_slots().collect();
        if slots.len() != block.arguments.len() {
            self.report(
                path.clone(),
                ViolationKind::ArityMismatch {
                    definition: block.definition.clone(),
                    expected: slots.len(),
                    found: block.arguments.len(),
                },
            );
        }

        for (slot_index, (slot, argument)) in slots.iter().zip(&block.arguments).enumerate() {
            self.check_argument(block, slot_index, slot, argument, path);
        }
    }

    fn check_argument(
        &mut self,
        block: &Block,
        slot_index: usize,
        slot: &InputSlot,
        argument: &Argument,
        path: &BlockPath,
    ) {
        let mismatch = |expected: &'static str| ViolationKind::SlotMismatch {
            definition: block.definition.clone(),
            slot: slot_index,
            expected,
            found: argument.kind_name(),
        };

        match (slot, argument) {
            (InputSlot::Argument { .. }, Argument::Literal(_)) => {}
            (InputSlot::Argument { .. }, Argument::NestedBlock(nested)) => {
                let child = path.child(slot_index);
                let is_control = self
                    .registry
                    .resolve(&nested.definition)
                    .ok()
                    .and_then(|d| d.behavior.as_control())
                    .is_some();
                if is_control {
                    self.report(
                        child.clone(),
                        ViolationKind::ControlInArgument(nested.definition.clone()),
                    );
                }
                self.check_block(nested, &child);
            }
            (InputSlot::Argument { .. }, _) => {
                self.report(path.clone(), mismatch("literal or block"));
            }
            (InputSlot::Dropdown { choices, .. }, Argument::ConstChoice(choice)) => {
                if !choices.contains(choice) {
                    self.report(
                        path.clone(),
                        ViolationKind::ChoiceNotOffered {
                            definition: block.definition.clone(),
                            slot: slot_index,
                            choice: choice.clone(),
                        },
                    );
                }
            }
            (InputSlot::Dropdown { .. }, _) => self.report(path.clone(), mismatch("choice")),
            (InputSlot::DefinitionEditor, Argument::NestedDefinition(_)) => {}
            (InputSlot::DefinitionEditor, _) => {
                self.report(path.clone(), mismatch("definition"))
            }
            (InputSlot::Text { .. } | InputSlot::Image { .. }, _) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use crate::value::Value;

    fn checked(blocks: Vec<Block>) -> Vec<ViolationKind> {
        let registry = Registry::with_builtins();
        check_chain(&Chain::new(ChainId(7), blocks), &registry)
            .into_iter()
            .map(|v| v.kind)
            .collect()
    }

    #[test]
    fn well_formed_chain_passes() {
        let violations = checked(vec![
            Block::new("on_start"),
            Block::with_arguments("repeat", [Value::Number(2.0).into()]),
            Block::with_arguments("print", [Value::text("hi").into()]),
            Block::new("end"),
        ]);
        assert!(violations.is_empty(), "{:?}", violations);
    }

    #[test]
    fn reports_schema_mismatches() {
        let violations = checked(vec![
            Block::with_arguments("print", []),
            Block::with_arguments(
                "math",
                [Argument::ConstChoice("cube".into()), Value::Number(2.0).into()],
            ),
            Block::with_arguments("print", [Argument::ConstChoice("x".into())]),
            Block::new("teleport"),
        ]);
        assert_eq!(violations.len(), 4, "{:?}", violations);
        assert!(matches!(
            violations[0],
            ViolationKind::ArityMismatch { expected: 1, found: 0, .. }
        ));
        assert!(matches!(
            violations[1],
            ViolationKind::ChoiceNotOffered { slot: 0, .. }
        ));
        assert!(matches!(
            violations[2],
            ViolationKind::SlotMismatch { expected: "literal or block", .. }
        ));
        assert_eq!(violations[3], ViolationKind::UnknownDefinition("teleport".into()));
    }

    #[test]
    fn nested_violations_carry_their_path() {
        let registry = Registry::with_builtins();
        let chain = Chain::new(
            ChainId(1),
            vec![Block::with_arguments(
                "print",
                [Block::with_arguments(
                    "add",
                    [Value::Number(1.0).into(), Block::new("forever").into()],
                )
                .into()],
            )],
        );
        let violations = check_chain(&chain, &registry);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].path.arguments, vec![0, 1]);
        assert_eq!(
            violations[0].kind,
            ViolationKind::ControlInArgument("forever".into())
        );
        assert_eq!(
            violations[0].to_string(),
            "chain 1, block 0 > argument 0 > argument 1: control block 'forever' cannot be used as an argument"
        );
    }

    #[test]
    fn hats_must_lead_and_bodies_must_close() {
        let violations = checked(vec![
            Block::with_arguments("print", [Value::text("first").into()]),
            Block::new("on_start"),
            Block::with_arguments("repeat", [Value::Number(1.0).into()]),
        ]);
        assert!(violations.contains(&ViolationKind::HatNotFirst("on_start".into())));
        assert!(violations.contains(&ViolationKind::Structure(
            StructureError::Unterminated { opener: 2 }
        )));
    }

    #[test]
    fn define_block_takes_a_definition() {
        let violations = checked(vec![Block::with_arguments(
            "define",
            [Argument::NestedDefinition(Definition::procedure("f", vec![]))],
        )]);
        assert!(violations.is_empty());

        let violations = checked(vec![Block::with_arguments(
            "define",
            [Value::Number(1.0).into()],
        )]);
        assert!(matches!(
            violations[0],
            ViolationKind::SlotMismatch { expected: "definition", .. }
        ));
    }
}
