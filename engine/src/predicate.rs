//! Predicate expressions over object fields.
//!
//! A [`Predicate`] is a boolean filter evaluated against anything that can
//! report its entity name and look up a field by key. Predicates compose with
//! [`Predicate::and`] and [`Predicate::or`], which is how observers build a
//! single expression out of many registrations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Something a predicate can be evaluated against.
pub trait Evaluate {
    /// The entity name of the object.
    fn entity_name(&self) -> &str;

    /// Look up a field value. `None` means the field is absent.
    fn field(&self, key: &str) -> Option<&Value>;
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let symbol = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        };
        f.write_str(symbol)
    }
}

/// A boolean filter expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Predicate {
    True,
    False,
    /// Matches objects of the named entity.
    Entity { name: String },
    /// Compares a field against a constant.
    Compare {
        key: String,
        op: CompareOp,
        value: Value,
    },
    And { predicates: Vec<Predicate> },
    Or { predicates: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    /// Entity-name guard.
    pub fn entity(name: impl Into<String>) -> Self {
        Predicate::Entity { name: name.into() }
    }

    pub fn compare(key: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Eq, value)
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Ne, value)
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Lt, value)
    }

    pub fn le(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Le, value)
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Gt, value)
    }

    pub fn ge(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Ge, value)
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And { mut predicates } => {
                predicates.push(other);
                Predicate::And { predicates }
            }
            first => Predicate::And {
                predicates: vec![first, other],
            },
        }
    }

    /// Disjunction of `self` and `other`.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or { mut predicates } => {
                predicates.push(other);
                Predicate::Or { predicates }
            }
            first => Predicate::Or {
                predicates: vec![first, other],
            },
        }
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not {
            predicate: Box::new(self),
        }
    }

    /// Evaluate the predicate against an object.
    pub fn evaluate(&self, object: &dyn Evaluate) -> bool {
        match self {
            Predicate::True => true,
            Predicate::False => false,
            Predicate::Entity { name } => object.entity_name() == name,
            Predicate::Compare { key, op, value } => {
                compare_field(object.field(key).unwrap_or(&Value::Null), *op, value)
            }
            Predicate::And { predicates } => predicates.iter().all(|p| p.evaluate(object)),
            Predicate::Or { predicates } => predicates.iter().any(|p| p.evaluate(object)),
            Predicate::Not { predicate } => !predicate.evaluate(object),
        }
    }
}

fn compare_field(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(actual, expected),
        CompareOp::Ne => !values_equal(actual, expected),
        CompareOp::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        CompareOp::Le => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        CompareOp::Ge => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Some(Ordering::Equal),
        _ => a == b,
    }
}

/// Order two field values.
///
/// Numbers compare across integer and float representations, strings
/// lexicographically. Null, booleans and mismatched kinds have no ordering.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            if let (Some(x), Some(y)) = (x.as_u64(), y.as_u64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order used by sort descriptors: nulls first, then booleans,
/// numbers, strings, and everything else by its JSON text.
pub(crate) fn sort_order(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare_values(a, b).unwrap_or(Ordering::Equal)
        }
        _ if rank(a) == rank(b) => a.to_string().cmp(&b.to_string()),
        _ => rank(a).cmp(&rank(b)),
    }
}
