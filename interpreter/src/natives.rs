//! Native behaviors: the Rust side of every `Behavior::Native` definition.
//!
//! A native receives its arguments already evaluated, left to right, and
//! returns a value when it is an expression block. Statement natives such
//! as `print` return `None`.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use blocks::value::Value;
use derivative::Derivative;

use crate::environment::VariableEnvironment;
use crate::error::RuntimeError;
use crate::stop::StopFlag;

const WAIT_SLICE: Duration = Duration::from_millis(10);

/// What a native may touch while it runs.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct NativeContext<'a> {
    pub env: &'a mut VariableEnvironment,
    #[derivative(Debug = "ignore")]
    pub output: &'a mut dyn Write,
    pub stop: &'a StopFlag,
}

pub trait NativeBlock: Send + Sync {
    fn call(
        &self,
        cx: &mut NativeContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError>;
}

impl<F> NativeBlock for F
where
    F: Fn(&mut NativeContext<'_>, &[Value]) -> Result<Option<Value>, RuntimeError> + Send + Sync,
{
    fn call(
        &self,
        cx: &mut NativeContext<'_>,
        args: &[Value],
    ) -> Result<Option<Value>, RuntimeError> {
        self(cx, args)
    }
}

/// Native implementations by name.
#[derive(Derivative, Clone, Default)]
#[derivative(Debug)]
pub struct NativeTable {
    #[derivative(Debug = "ignore")]
    natives: HashMap<String, Arc<dyn NativeBlock>>,
}

impl NativeTable {
    pub fn new() -> Self {
        NativeTable::default()
    }

    /// The implementations behind the standard native definitions.
    pub fn standard() -> Self {
        let mut table = NativeTable::new();
        table.register_fn("add", add);
        table.register_fn("sub", sub);
        table.register_fn("mul", mul);
        table.register_fn("div", div);
        table.register_fn("mod", modulo);
        table.register_fn("eq", eq);
        table.register_fn("lt", lt);
        table.register_fn("gt", gt);
        table.register_fn("and", and);
        table.register_fn("or", or);
        table.register_fn("not", not);
        table.register_fn("join", join);
        table.register_fn("length", length);
        table.register_fn("math", math);
        table.register_fn("print", print);
        table.register_fn("declare_var", declare_var);
        table.register_fn("set_var", set_var);
        table.register_fn("change_var", change_var);
        table.register_fn("get_var", get_var);
        table.register_fn("wait", wait);
        table
    }

    pub fn register(&mut self, name: impl Into<String>, native: Arc<dyn NativeBlock>) {
        self.natives.insert(name.into(), native);
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, native: F)
    where
        F: Fn(&mut NativeContext<'_>, &[Value]) -> Result<Option<Value>, RuntimeError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(native));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn NativeBlock>> {
        self.natives.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.natives.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.natives.keys().map(String::as_str)
    }
}

/// Numeric view of `value`, or `TypeMismatch` when it has none.
pub fn expect_number(value: &Value) -> Result<f64, RuntimeError> {
    value.to_number().ok_or_else(|| RuntimeError::TypeMismatch {
        expected: "Number",
        found: format!("{} '{}'", value.type_name(), value),
    })
}

fn arg(args: &[Value], index: usize) -> Result<&Value, RuntimeError> {
    args.get(index)
        .ok_or(RuntimeError::MissingArgument { index })
}

fn number(args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    expect_number(arg(args, index)?)
}

fn numbers(args: &[Value]) -> Result<(f64, f64), RuntimeError> {
    Ok((number(args, 0)?, number(args, 1)?))
}

type NativeResult = Result<Option<Value>, RuntimeError>;

fn add(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let (a, b) = numbers(args)?;
    Ok(Some(Value::Number(a + b)))
}

fn sub(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let (a, b) = numbers(args)?;
    Ok(Some(Value::Number(a - b)))
}

fn mul(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let (a, b) = numbers(args)?;
    Ok(Some(Value::Number(a * b)))
}

fn div(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let (a, b) = numbers(args)?;
    if b == 0.0 {
        return Err(RuntimeError::ArithmeticError("division by zero".into()));
    }
    Ok(Some(Value::Number(a / b)))
}

// The result takes the sign of the divisor.
fn modulo(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let (a, b) = numbers(args)?;
    if b == 0.0 {
        return Err(RuntimeError::ArithmeticError("modulo by zero".into()));
    }
    Ok(Some(Value::Number(a - b * (a / b).floor())))
}

fn eq(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let equal = arg(args, 0)?.loosely_equals(arg(args, 1)?);
    Ok(Some(Value::Boolean(equal)))
}

fn lt(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let ordering = arg(args, 0)?.compare(arg(args, 1)?);
    Ok(Some(Value::Boolean(ordering.is_lt())))
}

fn gt(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let ordering = arg(args, 0)?.compare(arg(args, 1)?);
    Ok(Some(Value::Boolean(ordering.is_gt())))
}

fn and(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let both = arg(args, 0)?.is_truthy() && arg(args, 1)?.is_truthy();
    Ok(Some(Value::Boolean(both)))
}

fn or(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let either = arg(args, 0)?.is_truthy() || arg(args, 1)?.is_truthy();
    Ok(Some(Value::Boolean(either)))
}

fn not(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    Ok(Some(Value::Boolean(!arg(args, 0)?.is_truthy())))
}

fn join(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let joined = format!("{}{}", arg(args, 0)?, arg(args, 1)?);
    Ok(Some(Value::Text(joined)))
}

fn length(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let count = arg(args, 0)?.to_string().chars().count();
    Ok(Some(Value::Number(count as f64)))
}

fn math(_: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let operation = arg(args, 0)?.to_string();
    let n = number(args, 1)?;
    let result = match operation.as_str() {
        "abs" => n.abs(),
        "floor" => n.floor(),
        "ceil" => n.ceil(),
        "round" => n.round(),
        "sqrt" if n < 0.0 => {
            return Err(RuntimeError::ArithmeticError(format!(
                "square root of negative number {}",
                Value::Number(n)
            )));
        }
        "sqrt" => n.sqrt(),
        other => {
            return Err(RuntimeError::ArithmeticError(format!(
                "unknown math operation '{}'",
                other
            )));
        }
    };
    Ok(Some(Value::Number(result)))
}

fn print(cx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    writeln!(cx.output, "{}", arg(args, 0)?)?;
    Ok(None)
}

fn declare_var(cx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let name = arg(args, 0)?.to_string();
    cx.env.declare_var(&name, arg(args, 1)?.clone());
    Ok(None)
}

fn set_var(cx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let name = arg(args, 0)?.to_string();
    cx.env.set_var(&name, arg(args, 1)?.clone());
    Ok(None)
}

fn change_var(cx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let name = arg(args, 0)?.to_string();
    let current = expect_number(&cx.env.get_var(&name)?)?;
    let delta = number(args, 1)?;
    cx.env.set_var(&name, Value::Number(current + delta));
    Ok(None)
}

fn get_var(cx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let name = arg(args, 0)?.to_string();
    Ok(Some(cx.env.get_var(&name)?))
}

/// Sleeps in short slices so a stop request cuts the wait short.
fn wait(cx: &mut NativeContext<'_>, args: &[Value]) -> NativeResult {
    let seconds = number(args, 0)?;
    if seconds.is_nan() || seconds <= 0.0 {
        return Ok(None);
    }
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.min(u32::MAX as f64));
    while !cx.stop.is_requested() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(WAIT_SLICE.min(deadline - now));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: &[Value]) -> NativeResult {
        let mut env = VariableEnvironment::new();
        call_with(&mut env, name, args)
    }

    fn call_with(env: &mut VariableEnvironment, name: &str, args: &[Value]) -> NativeResult {
        let table = NativeTable::standard();
        let mut output = Vec::new();
        let stop = StopFlag::new();
        let mut cx = NativeContext {
            env,
            output: &mut output,
            stop: &stop,
        };
        table.get(name).unwrap().call(&mut cx, args)
    }

    #[test]
    fn arithmetic_coerces_numeric_text() {
        assert_eq!(
            call("add", &[Value::text("2"), Value::Number(3.0)]),
            Ok(Some(Value::Number(5.0)))
        );
        assert_eq!(
            call("mod", &[Value::Number(-1.0), Value::Number(3.0)]),
            Ok(Some(Value::Number(2.0)))
        );
    }

    #[test]
    fn arithmetic_faults() {
        assert!(matches!(
            call("div", &[Value::Number(1.0), Value::Number(0.0)]),
            Err(RuntimeError::ArithmeticError(_))
        ));
        assert!(matches!(
            call("math", &[Value::text("sqrt"), Value::Number(-4.0)]),
            Err(RuntimeError::ArithmeticError(_))
        ));
        assert_eq!(
            call("mul", &[Value::text("abc"), Value::Number(2.0)]),
            Err(RuntimeError::TypeMismatch {
                expected: "Number",
                found: "Text 'abc'".into()
            })
        );
    }

    #[test]
    fn change_var_requires_a_binding() {
        let mut env = VariableEnvironment::new();
        assert_eq!(
            call_with(&mut env, "change_var", &[Value::text("n"), Value::Number(1.0)]),
            Err(RuntimeError::UnboundVariable("n".into()))
        );
        env.set_var("n", Value::Number(4.0));
        call_with(&mut env, "change_var", &[Value::text("n"), Value::Number(1.5)]).unwrap();
        assert_eq!(env.get_var("n"), Ok(Value::Number(5.5)));
    }

    #[test]
    fn wait_returns_early_once_stopped() {
        let mut env = VariableEnvironment::new();
        let mut output = Vec::new();
        let stop = StopFlag::new();
        stop.request();
        let mut cx = NativeContext {
            env: &mut env,
            output: &mut output,
            stop: &stop,
        };
        let started = Instant::now();
        wait(&mut cx, &[Value::Number(30.0)]).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn closures_register_as_natives() {
        let mut table = NativeTable::new();
        table.register_fn("answer", |_cx: &mut NativeContext<'_>, _args: &[Value]| {
            Ok(Some(Value::Number(42.0)))
        });
        assert!(table.contains("answer"));
        assert!(!table.contains("print"));
    }

    #[test]
    fn standard_table_implements_every_builtin_native() {
        let table = NativeTable::standard();
        let names: Vec<&str> = table.names().collect();
        for definition in blocks::definition::builtin::definitions() {
            if let blocks::definition::Behavior::Native { name } = &definition.behavior {
                assert!(names.contains(&name.as_str()), "no native for '{}'", name);
            }
        }
    }
}
