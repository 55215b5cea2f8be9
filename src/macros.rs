//! Macros: named, independently compiled sub-expressions and value lists.
//!
//! A macro is compiled once, when it is defined, and referenced by ID from
//! rules and later macros. References capture the macro's evaluator by
//! `Arc`, so redefining a macro only affects compilations that happen after
//! the redefinition.

use crate::ast::MacroAst;
use crate::compiler::{compile_macro_ast, parser::parse_macro};
use crate::config::CompileOptions;
use crate::error::{PolicyError, Result, RuleCompileError};
use crate::eval::{Evaluator, ValueEvaluator};
use crate::model::{EventType, Model};
use crate::value::{Field, FieldValue, StringValues};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Evaluation part of a macro.
#[derive(Debug, Clone)]
pub struct MacroEvaluator {
    pub value: Evaluator,
    pub event_type: Option<EventType>,
    fields: Vec<Field>,
    field_values: HashMap<Field, Vec<FieldValue>>,
}

impl MacroEvaluator {
    pub fn new(
        value: Evaluator,
        event_type: Option<EventType>,
        fields: Vec<Field>,
        field_values: HashMap<Field, Vec<FieldValue>>,
    ) -> Self {
        Self {
            value,
            event_type,
            fields,
            field_values,
        }
    }

    /// Fields touched by the macro and its sub-macros, first seen first.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_values(&self, field: &str) -> Option<&[FieldValue]> {
        self.field_values.get(field).map(Vec::as_slice)
    }
}

/// Source of a macro.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MacroDefinition {
    Expression(String),
    Values(Vec<String>),
}

/// A compiled macro.
#[derive(Debug, Clone)]
pub struct Macro {
    id: String,
    ast: Option<MacroAst>,
    evaluator: Arc<MacroEvaluator>,
    options: CompileOptions,
}

impl Macro {
    /// Parse and compile an expression macro.
    pub fn new(
        id: impl Into<String>,
        expression: &str,
        model: &Model,
        macros: &MacroStore,
        options: &CompileOptions,
    ) -> Result<Self> {
        let ast = parse_macro(expression)?;
        let evaluator = compile_macro_ast(&ast, model, macros, options, None)?;
        Ok(Self {
            id: id.into(),
            ast: Some(ast),
            evaluator: Arc::new(evaluator),
            options: options.clone(),
        })
    }

    /// Build a macro from a plain list of strings. It has no AST, no fields
    /// and no event type.
    pub fn from_values<S: AsRef<str>>(
        id: impl Into<String>,
        values: &[S],
        options: &CompileOptions,
    ) -> Result<Self> {
        let mut list = StringValues::new(options.case_insensitive);
        for value in values {
            list.push(FieldValue::string(value.as_ref()))?;
        }
        let value = Evaluator::Value(ValueEvaluator::StringList(Arc::new(list)));
        Ok(Self {
            id: id.into(),
            ast: None,
            evaluator: Arc::new(MacroEvaluator::new(value, None, Vec::new(), HashMap::new())),
            options: options.clone(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ast(&self) -> Option<&MacroAst> {
        self.ast.as_ref()
    }

    pub fn evaluator(&self) -> &Arc<MacroEvaluator> {
        &self.evaluator
    }

    pub fn event_type(&self) -> Option<&EventType> {
        self.evaluator.event_type.as_ref()
    }

    pub fn fields(&self) -> &[Field] {
        self.evaluator.fields()
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }
}

/// Registry of compiled macros, keyed by ID.
#[derive(Debug, Clone, Default)]
pub struct MacroStore {
    macros: HashMap<String, Arc<Macro>>,
    order: Vec<String>,
}

impl MacroStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a macro. On failure the store is unchanged.
    pub fn define(
        &mut self,
        id: &str,
        definition: MacroDefinition,
        model: &Model,
        options: &CompileOptions,
    ) -> Result<Arc<Macro>> {
        if id.is_empty() || id.contains('.') {
            return Err(PolicyError::Config(format!("invalid macro ID `{id}`")));
        }

        let compiled = match &definition {
            MacroDefinition::Expression(expression) => {
                Macro::new(id, expression, model, self, options)?
            }
            MacroDefinition::Values(values) => Macro::from_values(id, values.as_slice(), options)?,
        };
        let compiled = Arc::new(compiled);

        if self.macros.insert(id.to_string(), Arc::clone(&compiled)).is_some() {
            debug!(macro_id = id, "macro redefined");
        } else {
            self.order.push(id.to_string());
        }
        Ok(compiled)
    }

    /// Define a batch of macros in order, collecting per-macro failures.
    pub fn define_all<I>(
        &mut self,
        definitions: I,
        model: &Model,
        options: &CompileOptions,
    ) -> Vec<RuleCompileError>
    where
        I: IntoIterator<Item = (String, MacroDefinition)>,
    {
        let mut errors = Vec::new();
        for (id, definition) in definitions {
            if let Err(error) = self.define(&id, definition, model, options) {
                warn!(macro_id = %id, %error, "failed to compile macro");
                errors.push(RuleCompileError::new(id, error));
            }
        }
        errors
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Macro>> {
        self.macros.get(id)
    }

    pub fn resolve(&self, id: &str) -> Option<Arc<MacroEvaluator>> {
        self.macros.get(id).map(|m| Arc::clone(&m.evaluator))
    }

    pub fn remove(&mut self, id: &str) -> Option<Arc<Macro>> {
        let removed = self.macros.remove(id)?;
        self.order.retain(|existing| existing != id);
        Some(removed)
    }

    /// Macro IDs in definition order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }
}
