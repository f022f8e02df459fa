//! Condition expressions.
//!
//! A small closed expression tree evaluated against a read-only view
//! of the data model. Construction happens upstream in the wire
//! decoder; the engine only evaluates.

use narthex_core::{FieldId, Value};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Read access to field values during expression evaluation
pub trait FieldReader {
    /// Current value of a field, if the field exists
    fn read(&self, field: FieldId) -> Option<Value>;
}

/// Binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// Logical and
    And,
    /// Logical or
    Or,
    /// Equality
    Eq,
    /// Inequality
    Ne,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Division
    Div,
}

/// An expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Literal value
    Lit(Value),
    /// Field reference
    Field(FieldId),
    /// The skip sentinel, legal only in argument positions
    Skip,
    /// Logical negation
    Not(Box<Expr>),
    /// Binary operation
    Bin {
        /// Operator
        op: BinOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// The always-true condition
    #[must_use]
    pub const fn always() -> Self {
        Self::Lit(Value::Logical(true))
    }

    /// The always-false condition
    #[must_use]
    pub const fn never() -> Self {
        Self::Lit(Value::Logical(false))
    }

    /// Literal constructor
    #[must_use]
    pub fn lit(value: impl Into<Value>) -> Self {
        Self::Lit(value.into())
    }

    /// Field-reference constructor
    #[must_use]
    pub const fn field(field: FieldId) -> Self {
        Self::Field(field)
    }

    /// Binary-operation constructor
    #[must_use]
    pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Bin {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Whether this is the skip sentinel
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// Evaluate to a value
    ///
    /// Missing fields and the skip sentinel evaluate to `Null`.
    #[must_use]
    pub fn eval(&self, fields: &dyn FieldReader) -> Value {
        match self {
            Self::Lit(v) => v.clone(),
            Self::Field(id) => fields.read(*id).unwrap_or(Value::Null),
            Self::Skip => Value::Null,
            Self::Not(inner) => Value::Logical(!inner.eval(fields).as_bool()),
            Self::Bin { op, lhs, rhs } => {
                let l = lhs.eval(fields);
                let r = rhs.eval(fields);
                apply(*op, &l, &r)
            }
        }
    }

    /// Evaluate as a condition
    #[must_use]
    pub fn truthy(&self, fields: &dyn FieldReader) -> bool {
        self.eval(fields).as_bool()
    }
}

fn apply(op: BinOp, l: &Value, r: &Value) -> Value {
    match op {
        BinOp::And => Value::Logical(l.as_bool() && r.as_bool()),
        BinOp::Or => Value::Logical(l.as_bool() || r.as_bool()),
        BinOp::Eq => Value::Logical(compare(l, r) == Some(Ordering::Equal)),
        BinOp::Ne => Value::Logical(compare(l, r) != Some(Ordering::Equal)),
        BinOp::Lt => ordering(compare(l, r), |o| o == Ordering::Less),
        BinOp::Le => ordering(compare(l, r), |o| o != Ordering::Greater),
        BinOp::Gt => ordering(compare(l, r), |o| o == Ordering::Greater),
        BinOp::Ge => ordering(compare(l, r), |o| o != Ordering::Less),
        BinOp::Add => l.add(r),
        BinOp::Sub => l.subtract(r),
        BinOp::Mul => numeric(l, r, |a, b| a * b),
        BinOp::Div => {
            if r.as_numeric() == Some(0.0) {
                Value::Null
            } else {
                numeric(l, r, |a, b| a / b)
            }
        }
    }
}

fn ordering(cmp: Option<Ordering>, pred: impl Fn(Ordering) -> bool) -> Value {
    match cmp {
        Some(o) => Value::Logical(pred(o)),
        None => Value::Logical(false),
    }
}

fn numeric(l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Value {
    match (l.as_numeric(), r.as_numeric()) {
        (Some(a), Some(b)) => Value::Numeric(f(a, b)),
        _ => Value::Null,
    }
}

/// Compare two values of the same storage class
fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Numeric(a), Value::Numeric(b)) => a.partial_cmp(b),
        (Value::Alpha(a), Value::Alpha(b)) => Some(a.cmp(b)),
        (Value::Logical(a), Value::Logical(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapReader(HashMap<FieldId, Value>);

    impl FieldReader for MapReader {
        fn read(&self, field: FieldId) -> Option<Value> {
            self.0.get(&field).cloned()
        }
    }

    fn empty() -> MapReader {
        MapReader(HashMap::new())
    }

    #[test]
    fn test_expr_always_never() {
        assert!(Expr::always().truthy(&empty()));
        assert!(!Expr::never().truthy(&empty()));
    }

    #[test]
    fn test_expr_field_lookup() {
        let f = FieldId::from_name("qty");
        let mut map = HashMap::new();
        map.insert(f, Value::Numeric(3.0));
        let reader = MapReader(map);

        assert_eq!(Expr::field(f).eval(&reader), Value::Numeric(3.0));
    }

    #[test]
    fn test_expr_missing_field_is_null() {
        let f = FieldId::from_name("missing");
        assert_eq!(Expr::field(f).eval(&empty()), Value::Null);
        assert!(!Expr::field(f).truthy(&empty()));
    }

    #[test]
    fn test_expr_comparison() {
        let e = Expr::bin(BinOp::Gt, Expr::lit(3.0), Expr::lit(2.0));
        assert!(e.truthy(&empty()));

        let e = Expr::bin(BinOp::Le, Expr::lit(3.0), Expr::lit(2.0));
        assert!(!e.truthy(&empty()));
    }

    #[test]
    fn test_expr_mixed_class_comparison_is_false() {
        let e = Expr::bin(BinOp::Lt, Expr::lit("a"), Expr::lit(1.0));
        assert!(!e.truthy(&empty()));
    }

    #[test]
    fn test_expr_logic() {
        let e = Expr::bin(BinOp::And, Expr::lit(true), Expr::lit(false));
        assert!(!e.truthy(&empty()));

        let e = Expr::bin(BinOp::Or, Expr::lit(true), Expr::lit(false));
        assert!(e.truthy(&empty()));

        let e = Expr::Not(Box::new(Expr::lit(false)));
        assert!(e.truthy(&empty()));
    }

    #[test]
    fn test_expr_arithmetic() {
        let e = Expr::bin(BinOp::Mul, Expr::lit(3.0), Expr::lit(4.0));
        assert_eq!(e.eval(&empty()), Value::Numeric(12.0));
    }

    #[test]
    fn test_expr_division_by_zero_is_null() {
        let e = Expr::bin(BinOp::Div, Expr::lit(1.0), Expr::lit(0.0));
        assert_eq!(e.eval(&empty()), Value::Null);
    }

    #[test]
    fn test_expr_skip() {
        assert!(Expr::Skip.is_skip());
        assert_eq!(Expr::Skip.eval(&empty()), Value::Null);
    }
}
