//! Chains resolved for execution.
//!
//! Every block is looked up once, when its chain is first entered: control
//! blocks become `Op`s with their jump targets filled in, everything else
//! becomes an `Expr` holding the native implementation or procedure body it
//! dispatches to. The run loop never consults the registry afterwards.

use std::sync::Arc;

use blocks::block::{Argument, Block};
use blocks::chain::structure::{self, Shape};
use blocks::chain::{Chain, ChainId};
use blocks::definition::registry::Registry;
use blocks::definition::{Behavior, ControlFlow, Definition, DefinitionId};
use blocks::value::Value;
use derivative::Derivative;

use crate::error::{Failure, RuntimeError};
use crate::natives::{NativeBlock, NativeTable};

#[derive(Debug)]
pub struct ChainPlan {
    pub chain: ChainId,
    pub ops: Vec<Op>,
}

impl ChainPlan {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// One top-level block. Indices refer to positions in the same chain.
#[derive(Debug)]
pub enum Op {
    /// Hat blocks and the `else`/`end` delimiters; bodies never run into
    /// these since frames stop short of them.
    Marker,
    Statement(Expr),
    Repeat {
        times: Expr,
        end: usize,
    },
    RepeatUntil {
        condition: Expr,
        end: usize,
    },
    Forever {
        end: usize,
    },
    If {
        condition: Expr,
        otherwise: Option<usize>,
        end: usize,
    },
    Return(Expr),
}

#[derive(Derivative)]
#[derivative(Debug)]
pub enum Expr {
    Literal(Value),
    Native {
        definition: DefinitionId,
        #[derivative(Debug = "ignore")]
        native: Arc<dyn NativeBlock>,
        args: Vec<Expr>,
    },
    Call(Call),
}

/// A resolved call of a user procedure.
#[derive(Debug)]
pub struct Call {
    pub definition: DefinitionId,
    pub body: ChainId,
    pub parameters: Vec<String>,
    pub args: Vec<Expr>,
}

/// Resolve `chain`. Failures point at the offending top-level block.
pub fn resolve(
    chain: &Chain,
    registry: &Registry,
    natives: &NativeTable,
) -> Result<ChainPlan, Failure> {
    let shapes = structure::analyze(chain, registry).map_err(|error| {
        Failure::at(
            RuntimeError::MalformedChain(error.to_string()),
            chain.id,
            error.at(),
        )
    })?;

    let resolver = Resolver { registry, natives };
    let ops = chain
        .blocks
        .iter()
        .zip(shapes)
        .enumerate()
        .map(|(index, (block, shape))| {
            resolver
                .op(block, shape)
                .map_err(|error| Failure::at(error, chain.id, index))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ChainPlan {
        chain: chain.id,
        ops,
    })
}

struct Resolver<'a> {
    registry: &'a Registry,
    natives: &'a NativeTable,
}

impl Resolver<'_> {
    fn definition(&self, block: &Block) -> Result<&Definition, RuntimeError> {
        self.registry
            .resolve(&block.definition)
            .map_err(|_| RuntimeError::UnknownDefinition(block.definition.clone()))
    }

    fn op(&self, block: &Block, shape: Shape) -> Result<Op, RuntimeError> {
        let definition = self.definition(block)?;
        let Some(flow) = definition.behavior.as_control() else {
            return Ok(Op::Statement(self.expr(block)?));
        };

        let op = match (flow, shape) {
            (ControlFlow::OnStart | ControlFlow::DefineProcedure, _) => Op::Marker,
            (ControlFlow::Else | ControlFlow::End, _) => Op::Marker,
            (ControlFlow::Repeat, Shape::Opener { end, .. }) => Op::Repeat {
                times: self.argument(block, 0)?,
                end,
            },
            (ControlFlow::RepeatUntil, Shape::Opener { end, .. }) => Op::RepeatUntil {
                condition: self.argument(block, 0)?,
                end,
            },
            (ControlFlow::Forever, Shape::Opener { end, .. }) => Op::Forever { end },
            (ControlFlow::If, Shape::Opener { otherwise, end, .. }) => Op::If {
                condition: self.argument(block, 0)?,
                otherwise,
                end,
            },
            (ControlFlow::Return, _) => Op::Return(self.argument(block, 0)?),
            (flow, _) => {
                return Err(RuntimeError::MalformedChain(format!(
                    "`{:?}` block has no matching end",
                    flow
                )));
            }
        };
        Ok(op)
    }

    fn expr(&self, block: &Block) -> Result<Expr, RuntimeError> {
        let definition = self.definition(block)?;
        let args = (0..definition.arity())
            .map(|index| self.argument(block, index))
            .collect::<Result<Vec<_>, _>>()?;

        match &definition.behavior {
            Behavior::Control { .. } => Err(RuntimeError::MalformedChain(format!(
                "control block '{}' used as a value",
                block.definition
            ))),
            Behavior::Native { name } => {
                let native = self
                    .natives
                    .get(name)
                    .ok_or_else(|| RuntimeError::UnknownNative(name.clone()))?;
                Ok(Expr::Native {
                    definition: block.definition.clone(),
                    native,
                    args,
                })
            }
            Behavior::Procedure { body } => {
                let body = body.ok_or_else(|| {
                    RuntimeError::MalformedChain(format!(
                        "procedure '{}' has no recorded body",
                        block.definition
                    ))
                })?;
                Ok(Expr::Call(Call {
                    definition: block.definition.clone(),
                    body,
                    parameters: definition.parameter_names(),
                    args,
                }))
            }
        }
    }

    fn argument(&self, block: &Block, index: usize) -> Result<Expr, RuntimeError> {
        match block.arguments.get(index) {
            None => Err(RuntimeError::MissingArgument { index }),
            Some(Argument::Literal(value)) => Ok(Expr::Literal(value.clone())),
            Some(Argument::ConstChoice(choice)) => Ok(Expr::Literal(Value::text(choice.clone()))),
            Some(Argument::NestedBlock(nested)) => self.expr(nested),
            Some(Argument::NestedDefinition(definition)) => Err(RuntimeError::MalformedChain(
                format!("definition '{}' used as a value", definition.id),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(blocks: Vec<Block>) -> Result<ChainPlan, Failure> {
        let registry = Registry::with_builtins();
        resolve(
            &Chain::new(ChainId(3), blocks),
            &registry,
            &NativeTable::standard(),
        )
    }

    #[test]
    fn openers_carry_jump_targets() {
        let plan = plan(vec![
            Block::with_arguments("if", [Value::Boolean(true).into()]),
            Block::with_arguments("print", [Value::text("a").into()]),
            Block::new("else"),
            Block::with_arguments("print", [Value::text("b").into()]),
            Block::new("end"),
        ])
        .unwrap();
        assert_eq!(plan.len(), 5);
        assert!(matches!(
            plan.ops[0],
            Op::If {
                otherwise: Some(2),
                end: 4,
                ..
            }
        ));
        assert!(matches!(plan.ops[1], Op::Statement(Expr::Native { .. })));
        assert!(matches!(plan.ops[2], Op::Marker));
    }

    #[test]
    fn choices_become_text_literals() {
        let plan = plan(vec![Block::with_arguments(
            "print",
            [Block::with_arguments(
                "math",
                [Argument::ConstChoice("abs".into()), Value::Number(-2.0).into()],
            )
            .into()],
        )])
        .unwrap();
        let Op::Statement(Expr::Native { args, .. }) = &plan.ops[0] else {
            panic!("expected a native statement, got {:?}", plan.ops[0]);
        };
        let Expr::Native { args, .. } = &args[0] else {
            panic!("expected a nested native");
        };
        assert!(matches!(&args[0], Expr::Literal(Value::Text(op)) if op == "abs"));
    }

    #[test]
    fn resolution_failures_are_located() {
        let failure = plan(vec![
            Block::new("on_start"),
            Block::with_arguments("print", []),
        ])
        .unwrap_err();
        assert_eq!(failure.error, RuntimeError::MissingArgument { index: 0 });
        assert_eq!(failure.location.map(|l| l.block), Some(1));

        let failure = plan(vec![Block::new("end")]).unwrap_err();
        assert!(matches!(failure.error, RuntimeError::MalformedChain(_)));

        let failure = plan(vec![Block::new("launch")]).unwrap_err();
        assert_eq!(
            failure.error,
            RuntimeError::UnknownDefinition("launch".into())
        );
    }

    #[test]
    fn procedures_need_a_recorded_body() {
        let mut registry = Registry::with_builtins();
        registry
            .register(Definition::procedure("greet", vec![]))
            .unwrap();
        let chain = Chain::new(ChainId(0), vec![Block::new("greet")]);
        let failure = resolve(&chain, &registry, &NativeTable::standard()).unwrap_err();
        assert!(matches!(failure.error, RuntimeError::MalformedChain(_)));
    }
}
