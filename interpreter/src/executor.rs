use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use blocks::Program;
use blocks::chain::ChainId;
use blocks::value::Value;
use log::{debug, trace};

use crate::config::MAX_CALL_DEPTH;
use crate::environment::{Scope, VariableEnvironment};
use crate::error::{BlockLocation, Failure, RuntimeError};
use crate::natives::{NativeTable, expect_number};
use crate::plan::{self, Call, ChainPlan, Op};
use crate::progress::{ProgressSink, ProgressSnapshot, ResourceGauge};
use crate::stop::StopFlag;

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The chain ran to its end, or hit a `return` carrying the value.
    Completed(Option<Value>),
    Cancelled,
    Failed(Failure),
}

impl Outcome {
    /// The status line shown to the user.
    pub fn message(&self) -> String {
        match self {
            Outcome::Completed(_) => "Execution completed successfully".to_string(),
            Outcome::Cancelled => "Execution stopped".to_string(),
            Outcome::Failed(failure) => format!("Execution failed: {}", failure.error),
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Why the run loop stopped early.
#[derive(Debug)]
pub(crate) enum Halt {
    Cancelled,
    Failed(Failure),
}

impl From<Failure> for Halt {
    fn from(failure: Failure) -> Self {
        Halt::Failed(failure)
    }
}

pub(crate) enum Flow {
    Next,
    Return(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    Root,
    Procedure,
    Repeat { remaining: u64 },
    Until { opener: usize },
    Forever,
    Branch,
}

/// One activation: a run of consecutive blocks `start..end` of a chain.
#[derive(Debug)]
pub(crate) struct CallFrame {
    pub(crate) plan: Arc<ChainPlan>,
    /// Next block to execute.
    pub(crate) pc: usize,
    /// Block executing now, or the loop's opener while its condition runs.
    pub(crate) current: usize,
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) kind: FrameKind,
}

impl CallFrame {
    fn new(plan: Arc<ChainPlan>, start: usize, end: usize, kind: FrameKind) -> Self {
        CallFrame {
            plan,
            pc: start,
            current: start,
            start,
            end,
            kind,
        }
    }
}

/// Walks chains of one program. Owns all execution state of a run; nothing
/// outlives it except what it publishes.
pub struct Interpreter<'a> {
    pub(crate) program: &'a Program,
    pub(crate) natives: &'a NativeTable,
    pub(crate) output: &'a mut dyn Write,
    pub(crate) env: VariableEnvironment,
    pub(crate) stop: StopFlag,
    frames: Vec<CallFrame>,
    plans: HashMap<ChainId, Arc<ChainPlan>>,
    progress: &'a dyn ProgressSink,
    gauge: Option<Arc<ResourceGauge>>,
    max_call_depth: usize,
    procedure_depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(program: &'a Program, natives: &'a NativeTable, output: &'a mut dyn Write) -> Self {
        Interpreter {
            program,
            natives,
            output,
            env: VariableEnvironment::with_globals(&program.variables),
            stop: StopFlag::new(),
            frames: Vec::new(),
            plans: HashMap::new(),
            progress: &(),
            gauge: None,
            max_call_depth: MAX_CALL_DEPTH,
            procedure_depth: 0,
        }
    }

    pub fn with_stop(mut self, stop: StopFlag) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_gauge(mut self, gauge: Arc<ResourceGauge>) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn variables(&self) -> &VariableEnvironment {
        &self.env
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Run `chain` to a terminal outcome. All frames and local scopes are
    /// released before this returns, whatever the outcome.
    pub fn run(&mut self, chain: ChainId) -> Outcome {
        debug!("running {}", chain);
        let result = self.enter_root(chain).and_then(|()| self.run_frames(0));
        let outcome = match result {
            Ok(value) => Outcome::Completed(value),
            Err(Halt::Cancelled) => Outcome::Cancelled,
            Err(Halt::Failed(failure)) => Outcome::Failed(failure),
        };
        self.unwind();
        outcome
    }

    fn enter_root(&mut self, chain: ChainId) -> Result<(), Halt> {
        let plan = self.plan(chain)?;
        let end = plan.len();
        self.push_frame(CallFrame::new(plan, 0, end, FrameKind::Root));
        Ok(())
    }

    /// Execute until the stack shrinks back to `floor` frames. Returns the
    /// value of the `return` that got it there, if any.
    pub(crate) fn run_frames(&mut self, floor: usize) -> Result<Option<Value>, Halt> {
        while self.frames.len() > floor {
            self.checkpoint()?;

            let Some(frame) = self.frames.last_mut() else {
                break;
            };
            if frame.pc >= frame.end {
                self.finish_frame()?;
                continue;
            }

            let index = frame.pc;
            frame.pc += 1;
            frame.current = index;
            let plan = frame.plan.clone();
            self.publish();

            if let Flow::Return(value) = self.step(&plan, index)? {
                self.leave_procedure();
                if self.frames.len() <= floor {
                    return Ok(Some(value));
                }
            }
        }
        Ok(None)
    }

    fn step(&mut self, plan: &Arc<ChainPlan>, index: usize) -> Result<Flow, Halt> {
        match &plan.ops[index] {
            Op::Marker => {}
            Op::Statement(expr) => self.execute(expr)?,
            Op::Repeat { times, end } => {
                let times = self.evaluate(times)?;
                let count = repeat_count(expect_number(&times).map_err(|e| self.fail(e))?);
                self.jump_past(*end);
                if count > 0 {
                    let kind = FrameKind::Repeat { remaining: count };
                    self.push_frame(CallFrame::new(plan.clone(), index + 1, *end, kind));
                }
            }
            Op::RepeatUntil { condition, end } => {
                let done = self.evaluate(condition)?.is_truthy();
                self.jump_past(*end);
                if !done {
                    let kind = FrameKind::Until { opener: index };
                    self.push_frame(CallFrame::new(plan.clone(), index + 1, *end, kind));
                }
            }
            Op::Forever { end } => {
                self.jump_past(*end);
                let frame = CallFrame::new(plan.clone(), index + 1, *end, FrameKind::Forever);
                self.push_frame(frame);
            }
            Op::If {
                condition,
                otherwise,
                end,
            } => {
                let taken = self.evaluate(condition)?.is_truthy();
                self.jump_past(*end);
                let branch = match (taken, otherwise) {
                    (true, Some(split)) => Some((index + 1, *split)),
                    (true, None) => Some((index + 1, *end)),
                    (false, Some(split)) => Some((split + 1, *end)),
                    (false, None) => None,
                };
                if let Some((start, end)) = branch {
                    let frame = CallFrame::new(plan.clone(), start, end, FrameKind::Branch);
                    self.push_frame(frame);
                }
            }
            Op::Return(expr) => return Ok(Flow::Return(self.evaluate(expr)?)),
        }
        Ok(Flow::Next)
    }

    /// The current frame ran past its last block: loop again or pop it.
    fn finish_frame(&mut self) -> Result<(), Halt> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        let plan = frame.plan.clone();
        let again = match frame.kind {
            FrameKind::Repeat { remaining } => {
                frame.kind = FrameKind::Repeat {
                    remaining: remaining.saturating_sub(1),
                };
                remaining > 1
            }
            FrameKind::Forever => true,
            FrameKind::Until { opener } => {
                frame.current = opener;
                match &plan.ops[opener] {
                    Op::RepeatUntil { condition, .. } => !self.evaluate(condition)?.is_truthy(),
                    _ => false,
                }
            }
            FrameKind::Root | FrameKind::Procedure | FrameKind::Branch => false,
        };

        if again {
            if let Some(frame) = self.frames.last_mut() {
                frame.pc = frame.start;
            }
        } else {
            self.pop_frame();
        }
        Ok(())
    }

    /// Push a procedure frame with a fresh scope binding `args`.
    pub(crate) fn enter_procedure(&mut self, call: &Call, args: Vec<Value>) -> Result<(), Halt> {
        if self.procedure_depth >= self.max_call_depth {
            return Err(self.fail(RuntimeError::StackOverflow(self.max_call_depth)));
        }
        let plan = self.plan(call.body)?;
        debug!(
            "calling '{}' at depth {}",
            call.definition,
            self.procedure_depth + 1
        );

        self.env
            .push_scope(Scope::with_parameters(&call.parameters, args));
        self.procedure_depth += 1;
        let end = plan.len();
        self.push_frame(CallFrame::new(plan, 0, end, FrameKind::Procedure));
        Ok(())
    }

    /// Pop frames up to and including the innermost procedure or root frame.
    fn leave_procedure(&mut self) {
        while let Some(frame) = self.frames.last() {
            let boundary = matches!(frame.kind, FrameKind::Procedure | FrameKind::Root);
            self.pop_frame();
            if boundary {
                break;
            }
        }
    }

    fn jump_past(&mut self, end: usize) {
        if let Some(frame) = self.frames.last_mut() {
            frame.pc = end + 1;
        }
    }

    fn push_frame(&mut self, frame: CallFrame) {
        self.frames.push(frame);
        self.track();
        self.publish();
    }

    fn pop_frame(&mut self) {
        if let Some(frame) = self.frames.pop() {
            if frame.kind == FrameKind::Procedure {
                self.env.pop_scope();
                self.procedure_depth = self.procedure_depth.saturating_sub(1);
            }
        }
        self.track();
        self.publish();
    }

    fn unwind(&mut self) {
        self.frames.clear();
        self.env.clear_scopes();
        self.procedure_depth = 0;
        self.track();
    }

    fn plan(&mut self, chain: ChainId) -> Result<Arc<ChainPlan>, Halt> {
        if let Some(plan) = self.plans.get(&chain) {
            return Ok(plan.clone());
        }
        let program = self.program;
        let source = program
            .chain(chain)
            .ok_or_else(|| self.fail(RuntimeError::UnknownChain(chain)))?;
        let plan = Arc::new(plan::resolve(source, &program.definitions, self.natives)?);
        self.plans.insert(chain, plan.clone());
        Ok(plan)
    }

    fn checkpoint(&self) -> Result<(), Halt> {
        if self.stop.is_requested() {
            debug!("stop requested, unwinding {} frame(s)", self.frames.len());
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    /// Attach the current block to `error`.
    pub(crate) fn fail(&self, error: RuntimeError) -> Halt {
        let location = self.frames.last().map(|frame| BlockLocation {
            chain: frame.plan.chain,
            block: frame.current,
        });
        Halt::Failed(Failure { error, location })
    }

    fn publish(&self) {
        if let Some(frame) = self.frames.last() {
            let snapshot = ProgressSnapshot {
                chain: frame.plan.chain,
                block: frame.current,
                depth: self.frames.len(),
            };
            trace!("progress {:?}", snapshot);
            self.progress.publish(snapshot);
        }
    }

    fn track(&self) {
        if let Some(gauge) = &self.gauge {
            gauge.record(self.frames.len(), self.env.scope_count());
        }
    }
}

/// Iterations of `repeat n`: rounded, with negative and NaN counts as zero.
fn repeat_count(n: f64) -> u64 {
    if n.is_nan() || n <= 0.0 {
        0
    } else {
        n.round() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocks::block::Block;

    fn num(n: f64) -> blocks::block::Argument {
        Value::Number(n).into()
    }

    fn text(s: &str) -> blocks::block::Argument {
        Value::text(s).into()
    }

    fn run(blocks: Vec<Block>) -> (Outcome, String) {
        let mut program = Program::new();
        let chain = program.add_chain(blocks).unwrap();
        let natives = NativeTable::standard();
        let mut output = Vec::new();
        let outcome = Interpreter::new(&program, &natives, &mut output).run(chain);
        (outcome, String::from_utf8(output).unwrap())
    }

    #[test]
    fn repeat_counts_round_and_clamp() {
        assert_eq!(repeat_count(2.5), 3);
        assert_eq!(repeat_count(-4.0), 0);
        assert_eq!(repeat_count(f64::NAN), 0);
    }

    #[test]
    fn if_else_runs_one_branch() {
        let (outcome, output) = run(vec![
            Block::with_arguments("if", [num(0.0)]),
            Block::with_arguments("print", [text("then")]),
            Block::new("else"),
            Block::with_arguments("print", [text("else")]),
            Block::new("end"),
            Block::with_arguments("print", [text("after")]),
        ]);
        assert_eq!(outcome, Outcome::Completed(None));
        assert_eq!(output, "else\nafter\n");
    }

    #[test]
    fn nested_loops() {
        let (outcome, output) = run(vec![
            Block::with_arguments("repeat", [num(2.0)]),
            Block::with_arguments("repeat", [num(3.0)]),
            Block::with_arguments("print", [text(".")]),
            Block::new("end"),
            Block::with_arguments("print", [text("|")]),
            Block::new("end"),
        ]);
        assert_eq!(outcome, Outcome::Completed(None));
        assert_eq!(output, ".\n.\n.\n|\n.\n.\n.\n|\n");
    }

    #[test]
    fn return_leaves_loops() {
        let (outcome, output) = run(vec![
            Block::new("forever"),
            Block::with_arguments("print", [text("once")]),
            Block::with_arguments("return", [num(7.0)]),
            Block::new("end"),
        ]);
        assert_eq!(outcome, Outcome::Completed(Some(Value::Number(7.0))));
        assert_eq!(output, "once\n");
    }

    #[test]
    fn failure_points_at_block() {
        let (outcome, _) = run(vec![
            Block::new("on_start"),
            Block::with_arguments("print", [text("ok")]),
            Block::with_arguments(
                "print",
                [Block::with_arguments("div", [num(1.0), num(0.0)]).into()],
            ),
        ]);
        let failure = outcome.failure().cloned().unwrap();
        assert!(matches!(failure.error, RuntimeError::ArithmeticError(_)));
        assert_eq!(failure.location.map(|l| l.block), Some(2));
        assert_eq!(
            outcome.message(),
            "Execution failed: arithmetic error: division by zero"
        );
    }
}
