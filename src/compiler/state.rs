//! Per-compilation accumulator.

use crate::config::CompileOptions;
use crate::macros::{MacroEvaluator, MacroStore};
use crate::model::Model;
use crate::value::{Field, FieldValue};
use std::collections::HashMap;

/// State owned by one in-progress compilation.
///
/// Records every field the expression touches, in first-seen order, and the
/// literals each field is compared against. The data is moved into the
/// resulting rule or macro and never shared between compilations.
#[derive(Debug)]
pub struct CompilationState<'a> {
    model: &'a Model,
    macros: &'a MacroStore,
    options: &'a CompileOptions,
    field: Option<Field>,
    fields: Vec<Field>,
    field_values: HashMap<Field, Vec<FieldValue>>,
}

impl<'a> CompilationState<'a> {
    pub fn new(
        model: &'a Model,
        macros: &'a MacroStore,
        options: &'a CompileOptions,
        field: Option<Field>,
    ) -> Self {
        Self {
            model,
            macros,
            options,
            field,
            fields: Vec::new(),
            field_values: HashMap::new(),
        }
    }

    pub fn model(&self) -> &'a Model {
        self.model
    }

    pub fn macros(&self) -> &'a MacroStore {
        self.macros
    }

    pub fn options(&self) -> &'a CompileOptions {
        self.options
    }

    /// Field being resolved when a value macro is compiled in its context.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    pub fn add_field(&mut self, field: &str) {
        if !self.field_values.contains_key(field) {
            self.fields.push(field.to_string());
            self.field_values.insert(field.to_string(), Vec::new());
        }
    }

    pub fn add_field_value(&mut self, field: &str, value: FieldValue) {
        self.add_field(field);
        if let Some(values) = self.field_values.get_mut(field) {
            values.push(value);
        }
    }

    /// Pull the fields and values of a referenced macro into this state.
    pub fn import(&mut self, evaluator: &MacroEvaluator) {
        for field in evaluator.fields() {
            self.add_field(field);
            if let Some(values) = evaluator.field_values(field) {
                for value in values {
                    self.add_field_value(field, value.clone());
                }
            }
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_values(&self, field: &str) -> Option<&[FieldValue]> {
        self.field_values.get(field).map(Vec::as_slice)
    }

    pub fn into_parts(self) -> (Vec<Field>, HashMap<Field, Vec<FieldValue>>) {
        (self.fields, self.field_values)
    }
}
