pub mod config;
pub mod controller;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod natives;
pub mod plan;
pub mod progress;
pub mod stop;

pub use config::EngineConfig;
pub use controller::{ExecutionController, RunHandle};
pub use error::{BlockLocation, ControllerError, Failure, RuntimeError};
pub use executor::{Interpreter, Outcome};
pub use natives::{NativeBlock, NativeContext, NativeTable};
pub use progress::{ProgressLog, ProgressSink, ProgressSnapshot, Resources};
pub use stop::StopFlag;
