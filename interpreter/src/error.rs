use std::fmt;

use blocks::chain::ChainId;
use blocks::definition::DefinitionId;
use blocks::integrity::IntegrityViolation;
use thiserror::Error;

use crate::controller::RunHandle;

/// Everything that can abort a run. All of these are fatal: the call stack
/// is unwound and the run ends as `Outcome::Failed`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("unknown definition: {0}")]
    UnknownDefinition(DefinitionId),
    #[error("type mismatch: expected {expected}, got {found}")]
    TypeMismatch { expected: &'static str, found: String },
    #[error("unbound variable: {0}")]
    UnboundVariable(String),
    #[error("arithmetic error: {0}")]
    ArithmeticError(String),
    #[error("procedure '{0}' finished without returning a value")]
    MissingReturn(DefinitionId),
    #[error("stack overflow: more than {0} nested procedure calls")]
    StackOverflow(usize),
    #[error("unknown chain: {0}")]
    UnknownChain(ChainId),
    #[error("no native behavior named '{0}'")]
    UnknownNative(String),
    #[error("malformed chain: {0}")]
    MalformedChain(String),
    #[error("missing argument {index}")]
    MissingArgument { index: usize },
    #[error("'{0}' does not produce a value")]
    NoValue(DefinitionId),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),
    #[error("worker ignored the stop request and was abandoned")]
    ForcedTermination,
}

impl From<std::io::Error> for RuntimeError {
    fn from(error: std::io::Error) -> Self {
        RuntimeError::Io(error.to_string())
    }
}

/// The top-level block that was executing when a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    pub chain: ChainId,
    pub block: usize,
}

impl fmt::Display for BlockLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, block {}", self.chain, self.block)
    }
}

/// A runtime error enriched with the block it happened at, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub error: RuntimeError,
    pub location: Option<BlockLocation>,
}

impl Failure {
    pub fn new(error: RuntimeError) -> Self {
        Failure {
            error,
            location: None,
        }
    }

    pub fn at(error: RuntimeError, chain: ChainId, block: usize) -> Self {
        Failure {
            error,
            location: Some(BlockLocation { chain, block }),
        }
    }
}

impl From<RuntimeError> for Failure {
    fn from(error: RuntimeError) -> Self {
        Failure::new(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} (at {})", self.error, location),
            None => self.error.fmt(f),
        }
    }
}

impl std::error::Error for Failure {}

/// Misuse of the execution controller, returned to the caller directly.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("a run is already active; join and free it before starting another")]
    AlreadyRunning,
    #[error("{0} has not finished yet")]
    StillRunning(RunHandle),
    #[error("{0} is not owned by this controller")]
    UnknownRun(RunHandle),
    #[error("program failed its integrity check with {} violation(s)", .0.len())]
    Integrity(Vec<IntegrityViolation>),
    #[error("could not spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
