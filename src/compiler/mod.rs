//! Policy expression compiler.
//!
//! This module turns parsed rule and macro ASTs into evaluator trees.
//!
//! The compiler is organized into several sub-modules:
//! - [`parser`] - Tokenization and parsing of policy expressions
//! - [`state`] - Per-compilation accumulator of fields and field values
//!
//! Identifiers resolve in this order:
//!
//! | Name | Resolution |
//! |------|------------|
//! | declared in the model | field reference |
//! | dotted, not in the model | `UnknownField` |
//! | defined in the macro store | macro reference |
//! | anything else | `UnknownMacro` |
//!
//! # Examples
//!
//! ```rust
//! use secl_engine::compiler::{compile_rule_ast, parser::parse_rule};
//! use secl_engine::{CompileOptions, MacroStore, Model};
//!
//! let model = Model::runtime_security();
//! let macros = MacroStore::new();
//! let ast = parse_rule(r#"exec.file.path == "/usr/bin/curl" && process.uid == 0"#)?;
//! let compiled = compile_rule_ast(&ast, &model, &macros, &CompileOptions::default())?;
//!
//! assert_eq!(compiled.event_type.as_str(), "exec");
//! assert_eq!(compiled.fields, ["exec.file.path", "process.uid"]);
//! # Ok::<(), secl_engine::PolicyError>(())
//! ```

pub mod parser;
pub mod state;

pub use state::CompilationState;

use crate::ast::{Array, ArrayItem, CompareOp, Expr, MacroAst, Primary, RuleAst};
use crate::config::CompileOptions;
use crate::error::{PolicyError, Result};
use crate::eval::{BoolEvaluator, Evaluator, ValueEvaluator};
use crate::macros::{MacroEvaluator, MacroStore};
use crate::model::{EventType, FieldType, Model};
use crate::value::{Field, FieldValue, IntValues, Scalar, StringMatcher, StringValues};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Output of compiling a rule expression.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    pub evaluator: BoolEvaluator,
    pub event_type: EventType,
    pub fields: Vec<Field>,
    pub field_values: HashMap<Field, Vec<FieldValue>>,
}

/// Compile a rule AST into a boolean evaluator.
///
/// A rule must touch at least one field bound to an event type; rules
/// built only from cross-type fields are rejected.
pub fn compile_rule_ast(
    ast: &RuleAst,
    model: &Model,
    macros: &MacroStore,
    options: &CompileOptions,
) -> Result<CompiledExpression> {
    let mut state = CompilationState::new(model, macros, options, None);
    let evaluator = to_bool(&ast.expr, &mut state)?;

    let event_type = match event_type_from_fields(model, state.fields())? {
        Some(event_type) => event_type,
        None => return Err(PolicyError::NoEventType(ast.source.clone())),
    };
    let (fields, field_values) = state.into_parts();

    debug!(
        expression = %ast.source,
        %event_type,
        fields = fields.len(),
        "compiled rule expression"
    );

    Ok(CompiledExpression {
        evaluator,
        event_type,
        fields,
        field_values,
    })
}

/// Compile a macro AST.
///
/// `field` is the field the macro is resolved against, if any; value macros
/// compiled in the context of a field record their literals under it.
pub fn compile_macro_ast(
    ast: &MacroAst,
    model: &Model,
    macros: &MacroStore,
    options: &CompileOptions,
    field: Option<Field>,
) -> Result<MacroEvaluator> {
    let mut state = CompilationState::new(model, macros, options, field);

    let value = match ast {
        MacroAst::Expression(Expr::Primary(Primary::Ident { name, .. }))
            if !model.contains(name) =>
        {
            match to_operand_ident(name, &mut state)? {
                Operand::Bool(evaluator) => Evaluator::Bool(evaluator),
                operand => Evaluator::Value(operand.into_value()?),
            }
        }
        MacroAst::Expression(expr) => Evaluator::Bool(to_bool(expr, &mut state)?),
        MacroAst::Array(array) => {
            Evaluator::Value(to_operand_array(array, &mut state)?.into_value()?)
        }
        MacroAst::Primary(primary) => {
            Evaluator::Value(to_operand_primary(primary, &mut state)?.into_value()?)
        }
    };

    if let (Evaluator::Value(value), Some(field)) = (&value, state.field().map(str::to_string)) {
        for field_value in value.field_values() {
            state.add_field_value(&field, field_value);
        }
    }

    let event_type = event_type_from_fields(model, state.fields())?;
    let (fields, field_values) = state.into_parts();
    trace!(fields = fields.len(), bool = value.is_bool(), "compiled macro");

    Ok(MacroEvaluator::new(value, event_type, fields, field_values))
}

/// Derive the single event type implied by a set of fields.
///
/// Cross-type fields are ignored. Returns `None` when no field declares an
/// event type.
pub fn event_type_from_fields<S: AsRef<str>>(
    model: &Model,
    fields: &[S],
) -> Result<Option<EventType>> {
    let mut event_type: Option<&EventType> = None;
    for field in fields {
        let spec = model
            .field(field.as_ref())
            .ok_or_else(|| PolicyError::UnknownField(field.as_ref().to_string()))?;
        match (event_type, &spec.event_type) {
            (_, None) => {}
            (None, Some(current)) => event_type = Some(current),
            (Some(first), Some(current)) if first != current => {
                return Err(PolicyError::EventTypeConflict {
                    first: first.to_string(),
                    second: current.to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(event_type.cloned())
}

/// A resolved comparison operand.
#[derive(Debug)]
enum Operand {
    Field(Field, FieldType),
    Literal(FieldValue),
    StringList(Arc<StringValues>),
    IntList(Arc<IntValues>),
    Bool(BoolEvaluator),
}

impl Operand {
    fn describe(&self) -> String {
        match self {
            Operand::Field(field, field_type) => format!("{field_type} field `{field}`"),
            Operand::Literal(FieldValue::Scalar(scalar)) => format!("literal {scalar}"),
            Operand::Literal(FieldValue::Pattern(p)) => format!("pattern ~\"{p}\""),
            Operand::Literal(FieldValue::Regex(r)) => format!("regex r\"{r}\""),
            Operand::Literal(FieldValue::Set(_)) => "set".to_string(),
            Operand::StringList(_) => "string list".to_string(),
            Operand::IntList(_) => "int list".to_string(),
            Operand::Bool(_) => "boolean expression".to_string(),
        }
    }

    fn into_value(self) -> Result<ValueEvaluator> {
        match self {
            Operand::Literal(value) => Ok(ValueEvaluator::Literal(value)),
            Operand::StringList(values) => Ok(ValueEvaluator::StringList(values)),
            Operand::IntList(values) => Ok(ValueEvaluator::IntList(values)),
            other => Err(PolicyError::TypeMismatch(format!(
                "{} cannot be used as a macro value",
                other.describe()
            ))),
        }
    }
}

fn to_bool(expr: &Expr, state: &mut CompilationState<'_>) -> Result<BoolEvaluator> {
    match expr {
        Expr::And(lhs, rhs) => Ok(BoolEvaluator::and(to_bool(lhs, state)?, to_bool(rhs, state)?)),
        Expr::Or(lhs, rhs) => Ok(BoolEvaluator::or(to_bool(lhs, state)?, to_bool(rhs, state)?)),
        Expr::Not(operand) => Ok(BoolEvaluator::not(to_bool(operand, state)?)),
        Expr::Compare { lhs, op, rhs, .. } => compile_compare(lhs, *op, rhs, state),
        Expr::Array(array) => {
            let operand = to_operand_array(array, state)?;
            Err(not_a_boolean(&operand))
        }
        Expr::Primary(primary) => match to_operand_primary(primary, state)? {
            Operand::Bool(evaluator) => Ok(evaluator),
            Operand::Literal(FieldValue::Scalar(Scalar::Bool(value))) => {
                Ok(BoolEvaluator::Const(value))
            }
            Operand::Field(field, FieldType::Bool) => Ok(BoolEvaluator::Field(field)),
            operand => Err(not_a_boolean(&operand)),
        },
    }
}

fn not_a_boolean(operand: &Operand) -> PolicyError {
    PolicyError::TypeMismatch(format!("{} used as a boolean", operand.describe()))
}

fn to_operand(expr: &Expr, state: &mut CompilationState<'_>) -> Result<Operand> {
    match expr {
        Expr::Primary(primary) => to_operand_primary(primary, state),
        Expr::Array(array) => to_operand_array(array, state),
        other => Ok(Operand::Bool(to_bool(other, state)?)),
    }
}

fn to_operand_primary(primary: &Primary, state: &mut CompilationState<'_>) -> Result<Operand> {
    Ok(match primary {
        Primary::Ident { name, .. } => return to_operand_ident(name, state),
        Primary::Str(s) => Operand::Literal(FieldValue::string(s.clone())),
        Primary::Pattern(p) => Operand::Literal(FieldValue::Pattern(p.clone())),
        Primary::Regex(r) => {
            regex::Regex::new(r)?;
            Operand::Literal(FieldValue::Regex(r.clone()))
        }
        Primary::Int(i) => Operand::Literal(FieldValue::int(*i)),
        Primary::Bool(b) => Operand::Literal(FieldValue::Scalar(Scalar::Bool(*b))),
    })
}

fn to_operand_ident(name: &str, state: &mut CompilationState<'_>) -> Result<Operand> {
    if let Some(spec) = state.model().field(name) {
        let field_type = spec.field_type;
        state.add_field(name);
        return Ok(Operand::Field(name.to_string(), field_type));
    }
    if name.contains('.') {
        return Err(PolicyError::UnknownField(name.to_string()));
    }

    let evaluator = state
        .macros()
        .resolve(name)
        .ok_or_else(|| PolicyError::UnknownMacro(name.to_string()))?;
    state.import(&evaluator);

    Ok(match &evaluator.value {
        Evaluator::Bool(_) => Operand::Bool(BoolEvaluator::Macro {
            id: name.to_string(),
            evaluator: Arc::clone(&evaluator),
        }),
        Evaluator::Value(ValueEvaluator::Literal(value)) => Operand::Literal(value.clone()),
        Evaluator::Value(ValueEvaluator::StringList(values)) => {
            Operand::StringList(Arc::clone(values))
        }
        Evaluator::Value(ValueEvaluator::IntList(values)) => Operand::IntList(Arc::clone(values)),
    })
}

fn to_operand_array(array: &Array, state: &mut CompilationState<'_>) -> Result<Operand> {
    let items = match array {
        Array::Ident { name, .. } => {
            return match to_operand_ident(name, state)? {
                Operand::Literal(FieldValue::Scalar(Scalar::Int(i))) => {
                    Ok(Operand::IntList(Arc::new([i].into_iter().collect())))
                }
                Operand::Literal(value) => {
                    let mut values = StringValues::new(state.options().case_insensitive);
                    values.push(value)?;
                    Ok(Operand::StringList(Arc::new(values)))
                }
                operand => Ok(operand),
            };
        }
        Array::Items(items) => items,
    };

    if !items.is_empty() && items.iter().all(|item| matches!(item, ArrayItem::Int(_))) {
        let values = items
            .iter()
            .filter_map(|item| match item {
                ArrayItem::Int(i) => Some(*i),
                _ => None,
            })
            .collect();
        return Ok(Operand::IntList(Arc::new(values)));
    }

    let mut values = StringValues::new(state.options().case_insensitive);
    for item in items {
        let value = match item {
            ArrayItem::Str(s) => FieldValue::string(s.clone()),
            ArrayItem::Pattern(p) => FieldValue::Pattern(p.clone()),
            ArrayItem::Regex(r) => FieldValue::Regex(r.clone()),
            ArrayItem::Int(i) => {
                return Err(PolicyError::TypeMismatch(format!(
                    "array mixes strings and integer {i}"
                )))
            }
        };
        values.push(value)?;
    }
    Ok(Operand::StringList(Arc::new(values)))
}

/// Record the members of a list compared with `in`: string scalars as one
/// set, patterns and regexes individually.
fn record_list(state: &mut CompilationState<'_>, field: &str, values: &[FieldValue]) {
    let mut scalars = Vec::new();
    for value in values {
        match value {
            FieldValue::Scalar(scalar) => scalars.push(scalar.clone()),
            FieldValue::Set(items) => scalars.extend(items.iter().cloned()),
            other => state.add_field_value(field, other.clone()),
        }
    }
    if !scalars.is_empty() {
        state.add_field_value(field, FieldValue::Set(scalars));
    }
}

fn mirror(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        op => op,
    }
}

fn compile_compare(
    lhs: &Expr,
    op: CompareOp,
    rhs: &Expr,
    state: &mut CompilationState<'_>,
) -> Result<BoolEvaluator> {
    let (op, negated) = op.positive();
    let mut lhs = to_operand(lhs, state)?;
    let mut rhs = to_operand(rhs, state)?;
    let mut op = op;

    if op != CompareOp::In
        && matches!(lhs, Operand::Literal(_))
        && matches!(rhs, Operand::Field(..))
    {
        std::mem::swap(&mut lhs, &mut rhs);
        op = mirror(op);
    }

    let case_insensitive = state.options().case_insensitive;
    let mismatch = |lhs: &Operand, rhs: &Operand| {
        PolicyError::TypeMismatch(format!(
            "cannot compare {} with {} using `{}`",
            lhs.describe(),
            rhs.describe(),
            op.as_str()
        ))
    };

    let evaluator = match (&lhs, op, &rhs) {
        (
            Operand::Field(field, FieldType::String),
            CompareOp::Eq | CompareOp::Match,
            Operand::Literal(value),
        ) if value.kind() != crate::value::FieldValueKind::Set
            && !matches!(value, FieldValue::Scalar(Scalar::Int(_) | Scalar::Bool(_))) =>
        {
            let value = match (op, value) {
                (CompareOp::Match, FieldValue::Scalar(Scalar::Str(s))) => {
                    FieldValue::Pattern(s.clone())
                }
                _ => value.clone(),
            };
            let matcher = StringMatcher::compile(&value, case_insensitive)?;
            state.add_field_value(field, value);
            BoolEvaluator::StringMatch {
                field: field.clone(),
                matcher,
            }
        }
        (
            Operand::Field(field, FieldType::String),
            CompareOp::In,
            Operand::StringList(values),
        ) => {
            record_list(state, field, values.field_values());
            BoolEvaluator::StringIn {
                field: field.clone(),
                values: Arc::clone(values),
            }
        }
        (
            Operand::Field(field, FieldType::Int),
            op,
            Operand::Literal(FieldValue::Scalar(Scalar::Int(value))),
        ) if op == CompareOp::Eq || op.is_ordering() => {
            if op == CompareOp::Eq {
                state.add_field_value(field, FieldValue::int(*value));
            }
            BoolEvaluator::IntCompare {
                field: field.clone(),
                op,
                value: *value,
            }
        }
        (Operand::Field(field, FieldType::Int), CompareOp::In, Operand::IntList(values)) => {
            record_list(state, field, values.field_values());
            BoolEvaluator::IntIn {
                field: field.clone(),
                values: Arc::clone(values),
            }
        }
        (
            Operand::Field(field, FieldType::Bool),
            CompareOp::Eq,
            Operand::Literal(FieldValue::Scalar(Scalar::Bool(value))),
        ) => {
            state.add_field_value(field, FieldValue::Scalar(Scalar::Bool(*value)));
            BoolEvaluator::BoolEquals {
                field: field.clone(),
                value: *value,
            }
        }
        (Operand::Field(lhs_field, lhs_type), op, Operand::Field(rhs_field, rhs_type))
            if lhs_type == rhs_type
                && (op == CompareOp::Eq || (op.is_ordering() && *lhs_type == FieldType::Int)) =>
        {
            BoolEvaluator::FieldCompare {
                lhs: lhs_field.clone(),
                op,
                rhs: rhs_field.clone(),
                field_type: *lhs_type,
            }
        }
        (
            Operand::Literal(FieldValue::Scalar(a)),
            CompareOp::Eq,
            Operand::Literal(FieldValue::Scalar(b)),
        ) => BoolEvaluator::Const(a == b),
        (
            Operand::Literal(FieldValue::Scalar(Scalar::Int(a))),
            op,
            Operand::Literal(FieldValue::Scalar(Scalar::Int(b))),
        ) if op.is_ordering() => BoolEvaluator::Const(crate::eval::compare_ints(*a, op, *b)),
        (
            Operand::Literal(FieldValue::Scalar(Scalar::Str(s))),
            CompareOp::In,
            Operand::StringList(values),
        ) => BoolEvaluator::Const(values.contains(s)),
        (
            Operand::Literal(FieldValue::Scalar(Scalar::Int(i))),
            CompareOp::In,
            Operand::IntList(values),
        ) => BoolEvaluator::Const(values.contains(*i)),
        (
            Operand::Bool(expr),
            CompareOp::Eq,
            Operand::Literal(FieldValue::Scalar(Scalar::Bool(value))),
        )
        | (
            Operand::Literal(FieldValue::Scalar(Scalar::Bool(value))),
            CompareOp::Eq,
            Operand::Bool(expr),
        ) => {
            if *value {
                expr.clone()
            } else {
                BoolEvaluator::not(expr.clone())
            }
        }
        (Operand::Bool(a), CompareOp::Eq, Operand::Bool(b)) => BoolEvaluator::or(
            BoolEvaluator::and(a.clone(), b.clone()),
            BoolEvaluator::and(BoolEvaluator::not(a.clone()), BoolEvaluator::not(b.clone())),
        ),
        _ => return Err(mismatch(&lhs, &rhs)),
    };

    Ok(if negated {
        BoolEvaluator::not(evaluator)
    } else {
        evaluator
    })
}
