//! Compiled evaluators.
//!
//! An evaluator tree is produced once by the compiler and then shared
//! read-only by every evaluation. Boolean evaluators decide whether an event
//! matches; value evaluators carry the literal lists and scalars of value
//! macros and are only ever consumed by the compiler.

use crate::ast::CompareOp;
use crate::macros::MacroEvaluator;
use crate::model::{Event, FieldType};
use crate::value::{Field, FieldValue, IntValues, StringMatcher, StringValues};
use serde_json::Value;
use std::sync::Arc;

/// Boolean evaluator tree.
#[derive(Debug, Clone)]
pub enum BoolEvaluator {
    Const(bool),
    /// Truthiness of a bool field.
    Field(Field),
    And(Box<BoolEvaluator>, Box<BoolEvaluator>),
    Or(Box<BoolEvaluator>, Box<BoolEvaluator>),
    Not(Box<BoolEvaluator>),
    StringMatch {
        field: Field,
        matcher: StringMatcher,
    },
    StringIn {
        field: Field,
        values: Arc<StringValues>,
    },
    IntCompare {
        field: Field,
        op: CompareOp,
        value: i64,
    },
    IntIn {
        field: Field,
        values: Arc<IntValues>,
    },
    BoolEquals {
        field: Field,
        value: bool,
    },
    /// Comparison of two fields of the same type.
    FieldCompare {
        lhs: Field,
        op: CompareOp,
        rhs: Field,
        field_type: FieldType,
    },
    /// A boolean macro captured at compile time.
    Macro {
        id: String,
        evaluator: Arc<MacroEvaluator>,
    },
}

impl BoolEvaluator {
    pub fn and(lhs: BoolEvaluator, rhs: BoolEvaluator) -> Self {
        BoolEvaluator::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: BoolEvaluator, rhs: BoolEvaluator) -> Self {
        BoolEvaluator::Or(Box::new(lhs), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(operand: BoolEvaluator) -> Self {
        match operand {
            BoolEvaluator::Const(value) => BoolEvaluator::Const(!value),
            BoolEvaluator::Not(inner) => *inner,
            other => BoolEvaluator::Not(Box::new(other)),
        }
    }

    /// Evaluate against an event. A missing field never matches.
    pub fn eval<E: Event + ?Sized>(&self, event: &E) -> bool {
        match self {
            BoolEvaluator::Const(value) => *value,
            BoolEvaluator::Field(field) => {
                any_value(event.field(field), |v| v.as_bool() == Some(true))
            }
            BoolEvaluator::And(lhs, rhs) => lhs.eval(event) && rhs.eval(event),
            BoolEvaluator::Or(lhs, rhs) => lhs.eval(event) || rhs.eval(event),
            BoolEvaluator::Not(operand) => !operand.eval(event),
            BoolEvaluator::StringMatch { field, matcher } => {
                any_value(event.field(field), |v| v.as_str().is_some_and(|s| matcher.matches(s)))
            }
            BoolEvaluator::StringIn { field, values } => {
                any_value(event.field(field), |v| v.as_str().is_some_and(|s| values.contains(s)))
            }
            BoolEvaluator::IntCompare { field, op, value } => any_value(event.field(field), |v| {
                v.as_i64().is_some_and(|actual| compare_ints(actual, *op, *value))
            }),
            BoolEvaluator::IntIn { field, values } => {
                any_value(event.field(field), |v| v.as_i64().is_some_and(|i| values.contains(i)))
            }
            BoolEvaluator::BoolEquals { field, value } => {
                any_value(event.field(field), |v| v.as_bool() == Some(*value))
            }
            BoolEvaluator::FieldCompare {
                lhs,
                op,
                rhs,
                field_type,
            } => match (event.field(lhs), event.field(rhs)) {
                (Some(lhs), Some(rhs)) => compare_values(lhs, *op, rhs, *field_type),
                _ => false,
            },
            BoolEvaluator::Macro { evaluator, .. } => match &evaluator.value {
                Evaluator::Bool(inner) => inner.eval(event),
                Evaluator::Value(_) => false,
            },
        }
    }

    /// True when the tree is a constant.
    pub fn is_const(&self) -> bool {
        matches!(self, BoolEvaluator::Const(_))
    }
}

fn any_value(value: Option<&Value>, mut pred: impl FnMut(&Value) -> bool) -> bool {
    match value {
        Some(Value::Array(items)) => items.iter().any(pred),
        Some(value) => pred(value),
        None => false,
    }
}

pub(crate) fn compare_ints(lhs: i64, op: CompareOp, rhs: i64) -> bool {
    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        CompareOp::Lt => lhs < rhs,
        CompareOp::Le => lhs <= rhs,
        CompareOp::Gt => lhs > rhs,
        CompareOp::Ge => lhs >= rhs,
        _ => false,
    }
}

fn compare_values(lhs: &Value, op: CompareOp, rhs: &Value, field_type: FieldType) -> bool {
    match field_type {
        FieldType::Int => match (lhs.as_i64(), rhs.as_i64()) {
            (Some(l), Some(r)) => compare_ints(l, op, r),
            _ => false,
        },
        FieldType::String => match (lhs.as_str(), rhs.as_str()) {
            (Some(l), Some(r)) => match op {
                CompareOp::Eq => l == r,
                CompareOp::Ne => l != r,
                _ => false,
            },
            _ => false,
        },
        FieldType::Bool => match (lhs.as_bool(), rhs.as_bool()) {
            (Some(l), Some(r)) => match op {
                CompareOp::Eq => l == r,
                CompareOp::Ne => l != r,
                _ => false,
            },
            _ => false,
        },
    }
}

/// Typed value produced by a value macro.
#[derive(Debug, Clone)]
pub enum ValueEvaluator {
    Literal(FieldValue),
    StringList(Arc<StringValues>),
    IntList(Arc<IntValues>),
}

impl ValueEvaluator {
    pub fn field_values(&self) -> Vec<FieldValue> {
        match self {
            ValueEvaluator::Literal(value) => vec![value.clone()],
            ValueEvaluator::StringList(values) => values.field_values().to_vec(),
            ValueEvaluator::IntList(values) => values.field_values().to_vec(),
        }
    }
}

/// Either kind of evaluator.
#[derive(Debug, Clone)]
pub enum Evaluator {
    Bool(BoolEvaluator),
    Value(ValueEvaluator),
}

impl Evaluator {
    pub fn as_bool(&self) -> Option<&BoolEvaluator> {
        match self {
            Evaluator::Bool(evaluator) => Some(evaluator),
            Evaluator::Value(_) => None,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Evaluator::Bool(_))
    }
}
