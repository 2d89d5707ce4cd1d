use thiserror::Error;

use crate::chain::Chain;
use crate::definition::ControlFlow;
use crate::definition::registry::Registry;

/// The role a top-level block plays in the chain's body structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Plain,
    /// Opens a body; `otherwise` is the index of the `else` splitting an
    /// `if`, `end` the index of the closing block.
    Opener {
        flow: ControlFlow,
        otherwise: Option<usize>,
        end: usize,
    },
    Else { opener: usize, end: usize },
    End { opener: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("`end` at block {at} closes no body")]
    UnmatchedEnd { at: usize },
    #[error("`else` at block {at} is not directly inside an `if` body")]
    StrayElse { at: usize },
    #[error("`if` opened at block {opener} already has an `else` before block {at}")]
    DuplicateElse { opener: usize, at: usize },
    #[error("body opened at block {opener} is never closed by `end`")]
    Unterminated { opener: usize },
}

impl StructureError {
    /// Index of the block the error should be reported on.
    pub fn at(&self) -> usize {
        match self {
            StructureError::UnmatchedEnd { at }
            | StructureError::StrayElse { at }
            | StructureError::DuplicateElse { at, .. } => *at,
            StructureError::Unterminated { opener } => *opener,
        }
    }
}

/// Match every opener with its `else` and `end`. Blocks whose definition
/// does not resolve count as plain; the integrity check reports those.
pub fn analyze(chain: &Chain, registry: &Registry) -> Result<Vec<Shape>, StructureError> {
    let mut shapes = vec![Shape::Plain; chain.blocks.len()];
    // (opener index, opener flow, else index)
    let mut open: Vec<(usize, ControlFlow, Option<usize>)> = Vec::new();

    for (at, block) in chain.blocks.iter().enumerate() {
        let flow = registry
            .resolve(&block.definition)
            .ok()
            .and_then(|d| d.behavior.as_control());

        match flow {
            Some(flow) if flow.opens_body() => open.push((at, flow, None)),
            Some(ControlFlow::Else) => match open.last_mut() {
                Some((opener, ControlFlow::If, otherwise)) => {
                    if otherwise.is_some() {
                        return Err(StructureError::DuplicateElse {
                            opener: *opener,
                            at,
                        });
                    }
                    *otherwise = Some(at);
                }
                _ => return Err(StructureError::StrayElse { at }),
            },
            Some(ControlFlow::End) => {
                let (opener, flow, otherwise) =
                    open.pop().ok_or(StructureError::UnmatchedEnd { at })?;
                shapes[opener] = Shape::Opener {
                    flow,
                    otherwise,
                    end: at,
                };
                if let Some(split) = otherwise {
                    shapes[split] = Shape::Else { opener, end: at };
                }
                shapes[at] = Shape::End { opener };
            }
            _ => {}
        }
    }

    match open.first() {
        Some((opener, _, _)) => Err(StructureError::Unterminated { opener: *opener }),
        None => Ok(shapes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::chain::ChainId;
    use crate::value::Value;

    fn chain(ids: &[&str]) -> Chain {
        let blocks = ids
            .iter()
            .map(|id| match *id {
                "repeat" | "repeat_until" | "if" | "print" => {
                    Block::with_arguments(*id, [Value::Number(1.0).into()])
                }
                other => Block::new(other),
            })
            .collect();
        Chain::new(ChainId(0), blocks)
    }

    #[test]
    fn matches_nested_bodies() {
        let registry = Registry::with_builtins();
        let shapes = analyze(
            &chain(&["repeat", "if", "print", "else", "print", "end", "end"]),
            &registry,
        )
        .unwrap();
        assert_eq!(
            shapes[0],
            Shape::Opener {
                flow: ControlFlow::Repeat,
                otherwise: None,
                end: 6
            }
        );
        assert_eq!(
            shapes[1],
            Shape::Opener {
                flow: ControlFlow::If,
                otherwise: Some(3),
                end: 5
            }
        );
        assert_eq!(shapes[3], Shape::Else { opener: 1, end: 5 });
        assert_eq!(shapes[6], Shape::End { opener: 0 });
        assert_eq!(shapes[2], Shape::Plain);
    }

    #[test]
    fn reports_unbalanced_structure() {
        let registry = Registry::with_builtins();
        assert_eq!(
            analyze(&chain(&["print", "end"]), &registry),
            Err(StructureError::UnmatchedEnd { at: 1 })
        );
        assert_eq!(
            analyze(&chain(&["repeat", "else", "end"]), &registry),
            Err(StructureError::StrayElse { at: 1 })
        );
        assert_eq!(
            analyze(&chain(&["if", "else", "else", "end"]), &registry),
            Err(StructureError::DuplicateElse { opener: 0, at: 2 })
        );
        assert_eq!(
            analyze(&chain(&["forever", "repeat", "end"]), &registry),
            Err(StructureError::Unterminated { opener: 0 })
        );
    }
}
