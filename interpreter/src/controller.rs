//! Runs one interpreter at a time on a worker thread.
//!
//! The host starts a run, polls it with `try_join` once per tick (or blocks
//! in `join`), may ask it to stop, and finally frees it. While the worker
//! runs, the only state shared with the host is the stop flag, the latest
//! progress snapshot and the resource gauge.

use std::any::Any;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use blocks::Program;
use blocks::chain::ChainId;
use blocks::integrity;
use log::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::{BlockLocation, ControllerError, Failure, RuntimeError};
use crate::executor::{Interpreter, Outcome};
use crate::natives::NativeTable;
use crate::progress::{ProgressCell, ProgressSnapshot, ResourceGauge, Resources};
use crate::stop::StopFlag;

/// Identifies one run started by a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunHandle(u64);

impl fmt::Display for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run #{}", self.0)
    }
}

struct ActiveRun {
    handle: RunHandle,
    stop: StopFlag,
    progress: Arc<ProgressCell>,
    gauge: Arc<ResourceGauge>,
    receiver: mpsc::Receiver<Outcome>,
    worker: Option<JoinHandle<()>>,
    outcome: Option<Outcome>,
}

impl ActiveRun {
    /// Record the terminal outcome. `received` is `None` when the worker
    /// hung up without reporting, which only a panic does.
    fn settle(&mut self, received: Option<Outcome>) -> Outcome {
        let joined = self.worker.take().map(JoinHandle::join);
        let outcome = match (received, joined) {
            (Some(outcome), _) => outcome,
            (None, Some(Err(payload))) => self.failed(RuntimeError::WorkerPanicked(
                panic_message(payload.as_ref()),
            )),
            (None, _) => self.failed(RuntimeError::WorkerPanicked(
                "worker exited without an outcome".into(),
            )),
        };
        info!("{} finished: {}", self.handle, outcome.message());
        self.outcome = Some(outcome.clone());
        outcome
    }

    /// A failure located at the last published block.
    fn failed(&self, error: RuntimeError) -> Outcome {
        let location = self.progress.latest().map(|snapshot| BlockLocation {
            chain: snapshot.chain,
            block: snapshot.block,
        });
        Outcome::Failed(Failure { error, location })
    }

    fn poll(&mut self) -> Option<Outcome> {
        if let Some(outcome) = &self.outcome {
            return Some(outcome.clone());
        }
        match self.receiver.try_recv() {
            Ok(outcome) => Some(self.settle(Some(outcome))),
            Err(TryRecvError::Disconnected) => Some(self.settle(None)),
            Err(TryRecvError::Empty) => None,
        }
    }

    fn wait(&mut self) -> Outcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        let received = self.receiver.recv().ok();
        self.settle(received)
    }

    /// Wait up to `grace`; past that, abandon the worker.
    fn wait_within(&mut self, grace: Duration) -> Outcome {
        if let Some(outcome) = &self.outcome {
            return outcome.clone();
        }
        match self.receiver.recv_timeout(grace) {
            Ok(outcome) => self.settle(Some(outcome)),
            Err(RecvTimeoutError::Disconnected) => self.settle(None),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "{} ignored the stop request for {:?}; detaching its worker",
                    self.handle, grace
                );
                // Dropping the handle detaches the thread. Whatever it still
                // holds is leaked until it exits on its own.
                self.worker.take();
                let outcome = self.failed(RuntimeError::ForcedTermination);
                self.outcome = Some(outcome.clone());
                outcome
            }
        }
    }
}

/// Owns at most one run. A run must be joined (or observed finished) and
/// freed before the next one can start.
pub struct ExecutionController {
    config: EngineConfig,
    natives: Arc<NativeTable>,
    next_id: u64,
    run: Option<ActiveRun>,
}

impl ExecutionController {
    pub fn new(config: EngineConfig) -> Self {
        ExecutionController::with_natives(config, NativeTable::standard())
    }

    pub fn with_natives(config: EngineConfig, natives: NativeTable) -> Self {
        ExecutionController {
            config,
            natives: Arc::new(natives),
            next_id: 0,
            run: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Check `program` and start running `chain` on a new worker thread.
    /// Printed output goes to `output`.
    pub fn start(
        &mut self,
        program: Arc<Program>,
        chain: ChainId,
        output: Box<dyn Write + Send>,
    ) -> Result<RunHandle, ControllerError> {
        if self.run.is_some() {
            return Err(ControllerError::AlreadyRunning);
        }

        let violations = integrity::check_program(&program);
        if !violations.is_empty() {
            for violation in &violations {
                error!("integrity violation: {}", violation);
            }
            return Err(ControllerError::Integrity(violations));
        }

        let handle = RunHandle(self.next_id);
        self.next_id += 1;

        let stop = StopFlag::new();
        let progress = Arc::new(ProgressCell::default());
        let gauge = Arc::new(ResourceGauge::default());
        let (sender, receiver) = mpsc::channel();

        let worker = {
            let natives = Arc::clone(&self.natives);
            let stop = stop.clone();
            let progress = Arc::clone(&progress);
            let gauge = Arc::clone(&gauge);
            let max_call_depth = self.config.max_call_depth;
            thread::Builder::new()
                .name(format!("blocks-run-{}", handle.0))
                .stack_size(self.config.worker_stack_size)
                .spawn(move || {
                    let mut output = output;
                    let outcome = Interpreter::new(&program, &natives, &mut *output)
                        .with_stop(stop)
                        .with_progress(&*progress)
                        .with_gauge(gauge)
                        .with_max_call_depth(max_call_depth)
                        .run(chain);
                    if let Err(e) = output.flush() {
                        warn!("could not flush run output: {}", e);
                    }
                    // The receiver is gone if the run was abandoned.
                    let _ = sender.send(outcome);
                })?
        };

        info!("{} started on {}", handle, chain);
        self.run = Some(ActiveRun {
            handle,
            stop,
            progress,
            gauge,
            receiver,
            worker: Some(worker),
            outcome: None,
        });
        Ok(handle)
    }

    /// The outcome if the run has finished, without blocking.
    pub fn try_join(&mut self, handle: RunHandle) -> Result<Option<Outcome>, ControllerError> {
        Ok(self.active_mut(handle)?.poll())
    }

    /// Block until the run finishes.
    pub fn join(&mut self, handle: RunHandle) -> Result<Outcome, ControllerError> {
        Ok(self.active_mut(handle)?.wait())
    }

    /// Ask the run to stop at its next checkpoint. Returns immediately.
    pub fn request_stop(&self, handle: RunHandle) -> Result<(), ControllerError> {
        let run = self.active(handle)?;
        if run.outcome.is_none() {
            debug!("stop requested for {}", handle);
        }
        run.stop.request();
        Ok(())
    }

    /// Request a stop and wait for it up to `grace`. A worker that does not
    /// reach a checkpoint in time is detached and the run reported as
    /// `ForcedTermination`; its frames and scopes are not reclaimed.
    pub fn stop_within(
        &mut self,
        handle: RunHandle,
        grace: Duration,
    ) -> Result<Outcome, ControllerError> {
        self.request_stop(handle)?;
        Ok(self.active_mut(handle)?.wait_within(grace))
    }

    /// Release a finished run.
    pub fn free(&mut self, handle: RunHandle) -> Result<(), ControllerError> {
        if self.active(handle)?.outcome.is_none() {
            return Err(ControllerError::StillRunning(handle));
        }
        self.run = None;
        debug!("{} freed", handle);
        Ok(())
    }

    /// The most recently published snapshot; kept after the run ends.
    pub fn snapshot(&self, handle: RunHandle) -> Result<Option<ProgressSnapshot>, ControllerError> {
        Ok(self.active(handle)?.progress.latest())
    }

    pub fn resources(&self, handle: RunHandle) -> Result<Resources, ControllerError> {
        Ok(self.active(handle)?.gauge.resources())
    }

    /// Whether a run exists whose outcome has not been observed yet.
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| run.outcome.is_none())
    }

    fn active(&self, handle: RunHandle) -> Result<&ActiveRun, ControllerError> {
        self.run
            .as_ref()
            .filter(|run| run.handle == handle)
            .ok_or(ControllerError::UnknownRun(handle))
    }

    fn active_mut(&mut self, handle: RunHandle) -> Result<&mut ActiveRun, ControllerError> {
        self.run
            .as_mut()
            .filter(|run| run.handle == handle)
            .ok_or(ControllerError::UnknownRun(handle))
    }
}

impl Drop for ExecutionController {
    fn drop(&mut self) {
        if let Some(run) = self.run.as_mut() {
            if run.outcome.is_none() {
                run.stop.request();
                run.wait_within(self.config.stop_grace());
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
