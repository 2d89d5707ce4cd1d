use std::sync::Arc;

use blocks::value::Value;

use crate::error::RuntimeError;
use crate::executor::{Halt, Interpreter};
use crate::natives::{NativeBlock, NativeContext};
use crate::plan::{Call, Expr};

// Procedures used as values recurse through `evaluate`; past the red zone
// the stack is extended on the heap instead of overflowing the worker.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

impl Interpreter<'_> {
    /// Evaluate an argument expression. Arguments of nested blocks are
    /// evaluated first, left to right.
    pub(crate) fn evaluate(&mut self, expr: &Expr) -> Result<Value, Halt> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.evaluate_inner(expr))
    }

    fn evaluate_inner(&mut self, expr: &Expr) -> Result<Value, Halt> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Native {
                definition,
                native,
                args,
            } => {
                let values = self.evaluate_all(args)?;
                match self.call_native(native, &values)? {
                    Some(value) => Ok(value),
                    None => Err(self.fail(RuntimeError::NoValue(definition.clone()))),
                }
            }
            Expr::Call(call) => self.call_for_value(call),
        }
    }

    /// Execute a top-level statement. A procedure call only pushes its
    /// frame here; the run loop carries on inside it.
    pub(crate) fn execute(&mut self, expr: &Expr) -> Result<(), Halt> {
        match expr {
            Expr::Literal(_) => Ok(()),
            Expr::Native { native, args, .. } => {
                let values = self.evaluate_all(args)?;
                self.call_native(native, &values)?;
                Ok(())
            }
            Expr::Call(call) => {
                let values = self.evaluate_all(&call.args)?;
                self.enter_procedure(call, values)
            }
        }
    }

    fn evaluate_all(&mut self, args: &[Expr]) -> Result<Vec<Value>, Halt> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate(arg)?);
        }
        Ok(values)
    }

    fn call_native(
        &mut self,
        native: &Arc<dyn NativeBlock>,
        args: &[Value],
    ) -> Result<Option<Value>, Halt> {
        let mut cx = NativeContext {
            env: &mut self.env,
            output: &mut *self.output,
            stop: &self.stop,
        };
        let result = native.call(&mut cx, args);
        result.map_err(|error| self.fail(error))
    }

    /// A procedure used as an argument runs to completion right here and
    /// must return a value.
    fn call_for_value(&mut self, call: &Call) -> Result<Value, Halt> {
        let values = self.evaluate_all(&call.args)?;
        let floor = self.frame_count();
        self.enter_procedure(call, values)?;
        match self.run_frames(floor)? {
            Some(value) => Ok(value),
            None => Err(self.fail(RuntimeError::MissingReturn(call.definition.clone()))),
        }
    }
}
