// Formula evaluator - walks the typed AST against a cell lookup

use crate::cell_ref::CellRef;

use super::functions;
use super::parser::{Expr, Op};

/// The two error kinds a cell can surface, with distinct display tokens so
/// callers can tell a rejected circular edit from an ordinary evaluation
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellError {
    /// The edit would have created a dependency cycle.
    Circular,
    /// Malformed expression, unknown function, division by zero, or a
    /// non-numeric operand to a numeric function.
    Eval,
}

impl CellError {
    pub fn marker(&self) -> &'static str {
        match self {
            CellError::Circular => "#CIRC!",
            CellError::Eval => "#ERROR!",
        }
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.marker())
    }
}

/// Scalar result of evaluating an expression or reading a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Empty,
    Number(f64),
    Text(String),
    Error(CellError),
}

impl Default for Value {
    fn default() -> Self {
        Value::Empty
    }
}

impl Value {
    /// Numeric coercion: empty is zero, text must parse, errors carry.
    pub fn to_number(&self) -> Result<f64, CellError> {
        match self {
            Value::Number(n) => Ok(*n),
            Value::Empty => Ok(0.0),
            Value::Text(s) if s.trim().is_empty() => Ok(0.0),
            Value::Text(s) => s.trim().parse::<f64>().map_err(|_| CellError::Eval),
            Value::Error(e) => Err(*e),
        }
    }

    pub fn to_display(&self) -> String {
        match self {
            Value::Empty => String::new(),
            Value::Number(n) => crate::cell::format_number(*n),
            Value::Text(s) => s.clone(),
            Value::Error(e) => e.marker().to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }
}

/// Grid access seam for the evaluator.
///
/// The engine provides two implementations: one reading committed values
/// during propagation, and one re-deriving formula cells from their stored
/// ASTs for snapshot evaluation.
pub trait CellLookup {
    fn value(&self, cell: CellRef) -> Value;
}

/// Evaluate an expression to a scalar value. Never panics; failures come
/// back as `Value::Error`.
pub fn evaluate<L: CellLookup>(expr: &Expr, lookup: &L) -> Value {
    match expr {
        Expr::Number(n) => Value::Number(*n),
        Expr::Text(s) => Value::Text(s.clone()),
        Expr::Ref(cell) => lookup.value(*cell),
        // A bare range has no scalar meaning outside a function argument.
        Expr::Range { .. } => Value::Error(CellError::Eval),
        Expr::Call { func, args } => {
            let mut values = Vec::new();
            for arg in args {
                match arg {
                    Expr::Range { start, end } => {
                        for row in start.row..=end.row {
                            for col in start.col..=end.col {
                                values.push(lookup.value(CellRef::new(row, col)));
                            }
                        }
                    }
                    _ => values.push(evaluate(arg, lookup)),
                }
            }
            functions::call(*func, &values)
        }
        Expr::Neg(inner) => match evaluate(inner, lookup).to_number() {
            Ok(n) => Value::Number(-n),
            Err(e) => Value::Error(e),
        },
        Expr::BinaryOp { op, left, right } => {
            let left = evaluate(left, lookup);
            let right = evaluate(right, lookup);
            apply_op(*op, &left, &right)
        }
    }
}

fn apply_op(op: Op, left: &Value, right: &Value) -> Value {
    match op {
        Op::Concat => {
            if let Value::Error(e) = left {
                return Value::Error(*e);
            }
            if let Value::Error(e) = right {
                return Value::Error(*e);
            }
            Value::Text(format!("{}{}", left.to_display(), right.to_display()))
        }
        Op::Add | Op::Sub | Op::Mul | Op::Div => {
            let l = match left.to_number() {
                Ok(n) => n,
                Err(e) => return Value::Error(e),
            };
            let r = match right.to_number() {
                Ok(n) => n,
                Err(e) => return Value::Error(e),
            };
            match op {
                Op::Add => Value::Number(l + r),
                Op::Sub => Value::Number(l - r),
                Op::Mul => Value::Number(l * r),
                Op::Div if r == 0.0 => Value::Error(CellError::Eval),
                Op::Div => Value::Number(l / r),
                Op::Concat => Value::Error(CellError::Eval),
            }
        }
    }
}
