//! Expression evaluation and binding storage.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use rustc_hash::{FxHashMap, FxHashSet};

use crate::calc::syntax::{BinaryOp, Expr, Pos};
use crate::error::{Error, Result};
use crate::evaluator::{Diagnostic, Value, ValueSource};
use crate::session::AbortHandle;

/// How often `sleep` polls the abort handle.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Why evaluation stopped.
#[derive(Debug)]
pub enum Fault {
    Diagnostic(Diagnostic),
    Interrupted,
}

impl From<Diagnostic> for Fault {
    fn from(diagnostic: Diagnostic) -> Self {
        Fault::Diagnostic(diagnostic)
    }
}

#[derive(Debug, Clone)]
enum CellState {
    Ready(Value),
    /// Lazy value, computed on first use by a snippet.
    Pending(Expr),
    /// Being computed; seeing this again means a cycle.
    Forcing,
}

/// Storage of one binding, shared with the session's tracker.
#[derive(Debug)]
pub struct BindingCell {
    name: String,
    state: Mutex<CellState>,
}

impl BindingCell {
    pub fn ready(name: &str, value: Value) -> Arc<Self> {
        Self::with_state(name, CellState::Ready(value))
    }

    pub fn pending(name: &str, expr: Expr) -> Arc<Self> {
        Self::with_state(name, CellState::Pending(expr))
    }

    fn with_state(name: &str, state: CellState) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ValueSource for BindingCell {
    fn read(&self) -> Result<Value> {
        match &*self.lock() {
            CellState::Ready(value) => Ok(value.clone()),
            CellState::Pending(_) | CellState::Forcing => {
                Err(Error::BindingNotRealized(self.name.clone()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub cell: Arc<BindingCell>,
    pub mutable: bool,
}

/// Evaluator state. Cloned at the start of a snippet and swapped in on
/// success, so a failed or interrupted snippet commits nothing.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub slots: FxHashMap<String, Slot>,
    pub types: FxHashSet<String>,
    pub imports: Vec<String>,
    pub dependencies: Vec<String>,
    pub repositories: Vec<String>,
}

impl State {
    pub fn bind(&mut self, name: &str, cell: Arc<BindingCell>, mutable: bool) {
        self.slots.insert(name.to_string(), Slot { cell, mutable });
    }
}

pub struct Interp<'a> {
    pub state: &'a mut State,
    pub abort: &'a AbortHandle,
}

impl Interp<'_> {
    pub fn eval(&mut self, expr: &Expr) -> std::result::Result<Value, Fault> {
        match expr {
            Expr::Int(value) => Ok(Value::Int(*value)),
            Expr::Str(text) => Ok(Value::Str(text.clone())),
            Expr::Bool(value) => Ok(Value::Bool(*value)),
            Expr::Name(name, pos) => self.lookup(name, *pos),
            Expr::Neg(inner, pos) => match self.eval(inner)? {
                Value::Int(value) => value
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| pos.error("integer overflow").into()),
                other => Err(pos
                    .error(format!("cannot negate a {}", other.type_name()))
                    .into()),
            },
            Expr::Binary { op, lhs, rhs, pos } => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, lhs, rhs, *pos).map_err(Fault::from)
            }
            Expr::Call { name, args, pos } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values, *pos)
            }
        }
    }

    fn lookup(&mut self, name: &str, pos: Pos) -> std::result::Result<Value, Fault> {
        let cell = self
            .state
            .slots
            .get(name)
            .map(|slot| Arc::clone(&slot.cell))
            .ok_or_else(|| pos.error(format!("unknown name '{}'", name)))?;

        let pending = {
            let mut state = cell.lock();
            match &*state {
                CellState::Ready(value) => return Ok(value.clone()),
                CellState::Forcing => {
                    return Err(pos
                        .error(format!("lazy value '{}' depends on itself", name))
                        .into());
                }
                CellState::Pending(expr) => {
                    let expr = expr.clone();
                    *state = CellState::Forcing;
                    expr
                }
            }
        };

        let result = self.eval(&pending);
        *cell.lock() = match &result {
            Ok(value) => CellState::Ready(value.clone()),
            Err(_) => CellState::Pending(pending),
        };
        result
    }

    fn call(&mut self, name: &str, args: Vec<Value>, pos: Pos) -> std::result::Result<Value, Fault> {
        if self.state.types.contains(name) {
            if !args.is_empty() {
                return Err(pos.error(format!("{} takes no arguments", name)).into());
            }
            return Ok(Value::Object {
                type_name: name.to_string(),
                repr: format!("{}()", name),
            });
        }

        let arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(pos.error(format!(
                    "{} expects {} argument(s), got {}",
                    name,
                    expected,
                    args.len()
                )))
            }
        };

        match name {
            "str" => {
                arity(1)?;
                Ok(Value::Str(args[0].to_string()))
            }
            "html" => {
                arity(1)?;
                Ok(Value::Html(args[0].to_string()))
            }
            // Arguments are evaluated first, which realizes lazy bindings
            "force" => {
                arity(1)?;
                Ok(args[0].clone())
            }
            "len" => {
                arity(1)?;
                match &args[0] {
                    Value::Str(text) | Value::Html(text) => Ok(Value::Int(text.chars().count() as i64)),
                    other => Err(pos
                        .error(format!("len() needs a string, got {}", other.type_name()))
                        .into()),
                }
            }
            "sleep" => {
                arity(1)?;
                match args[0] {
                    Value::Int(ms) if ms >= 0 => self.sleep(Duration::from_millis(ms as u64)),
                    _ => Err(pos.error("sleep() needs a non-negative Int").into()),
                }
            }
            _ => Err(pos.error(format!("unknown function '{}'", name)).into()),
        }
    }

    fn sleep(&self, duration: Duration) -> std::result::Result<Value, Fault> {
        let deadline = Instant::now() + duration;
        loop {
            if self.abort.is_aborted() {
                return Err(Fault::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Value::Unit);
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value, pos: Pos) -> std::result::Result<Value, Diagnostic> {
    match (op, lhs, rhs) {
        (BinaryOp::Eq, lhs, rhs) => Ok(Value::Bool(lhs == rhs)),
        (BinaryOp::Add, Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| pos.error("integer overflow")),
        (BinaryOp::Add, Value::Html(a), b) => Ok(Value::Html(format!("{}{}", a, b))),
        (BinaryOp::Add, a @ Value::Str(_), b) | (BinaryOp::Add, a, b @ Value::Str(_)) => {
            Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinaryOp::Sub, Value::Int(a), Value::Int(b)) => a
            .checked_sub(b)
            .map(Value::Int)
            .ok_or_else(|| pos.error("integer overflow")),
        (BinaryOp::Mul, Value::Int(a), Value::Int(b)) => a
            .checked_mul(b)
            .map(Value::Int)
            .ok_or_else(|| pos.error("integer overflow")),
        (BinaryOp::Div, Value::Int(_), Value::Int(0)) => Err(pos.error("division by zero")),
        (BinaryOp::Div, Value::Int(a), Value::Int(b)) => a
            .checked_div(b)
            .map(Value::Int)
            .ok_or_else(|| pos.error("integer overflow")),
        (op, a, b) => Err(pos.error(format!(
            "unsupported operation {:?} between {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::syntax::{Stmt, parse};

    fn eval(state: &mut State, code: &str) -> std::result::Result<Value, Fault> {
        let Stmt::Expr(expr) = parse(code).unwrap().remove(0) else {
            panic!("expected an expression");
        };
        let abort = AbortHandle::new();
        Interp {
            state,
            abort: &abort,
        }
        .eval(&expr)
    }

    #[test]
    fn test_arithmetic_and_concat() {
        let mut state = State::default();
        assert!(matches!(eval(&mut state, "1 + 2 * 3"), Ok(Value::Int(7))));
        assert!(matches!(eval(&mut state, "-(4 - 6)"), Ok(Value::Int(2))));
        let Ok(Value::Str(text)) = eval(&mut state, r#""n=" + 3"#) else {
            panic!("expected a string");
        };
        assert_eq!(text, "n=3");
    }

    #[test]
    fn test_division_by_zero_has_position() {
        let mut state = State::default();
        let Err(Fault::Diagnostic(d)) = eval(&mut state, "1 / 0") else {
            panic!("expected a diagnostic");
        };
        assert_eq!(d.column, 3);
    }

    #[test]
    fn test_min_value_overflow_is_reported() {
        let mut state = State::default();
        state.bind("m", BindingCell::ready("m", Value::Int(i64::MIN)), false);

        let Err(Fault::Diagnostic(d)) = eval(&mut state, "m / (0 - 1)") else {
            panic!("expected a diagnostic");
        };
        assert_eq!((d.message.as_str(), d.column), ("integer overflow", 3));

        let Err(Fault::Diagnostic(d)) = eval(&mut state, "-m") else {
            panic!("expected a diagnostic");
        };
        assert_eq!((d.message.as_str(), d.column), ("integer overflow", 1));
    }

    #[test]
    fn test_lazy_cell_is_forced_once() {
        let mut state = State::default();
        state.bind("x", BindingCell::ready("x", Value::Int(2)), false);
        let big = BindingCell::pending("big", Expr::Name("x".to_string(), Pos { line: 1, column: 1 }));
        state.bind("big", Arc::clone(&big), false);

        assert!(matches!(big.read(), Err(Error::BindingNotRealized(_))));
        assert!(matches!(eval(&mut state, "force(big)"), Ok(Value::Int(2))));
        assert!(matches!(eval(&mut state, "big * 10"), Ok(Value::Int(20))));
        assert_eq!(big.read().unwrap(), Value::Int(2));
    }

    #[test]
    fn test_sleep_observes_abort() {
        let mut state = State::default();
        let abort = AbortHandle::new();
        abort.abort();
        let Stmt::Expr(expr) = parse("sleep(10000)").unwrap().remove(0) else {
            panic!("expected an expression");
        };
        let result = Interp {
            state: &mut state,
            abort: &abort,
        }
        .eval(&expr);
        assert!(matches!(result, Err(Fault::Interrupted)));
    }
}
