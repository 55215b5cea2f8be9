//! Rules and rule sets.
//!
//! A [`RuleSet`] is built as a unit from a [`PolicyDocument`]: macros first,
//! then rules, with per-rule failures collected instead of aborting the
//! batch. Once built it is immutable and can be shared across threads.
//!
//! # Examples
//!
//! ```rust
//! use secl_engine::{CompileOptions, JsonEvent, Model, PolicyDocument, RuleSet};
//! use serde_json::json;
//!
//! let document = PolicyDocument::from_yaml(r#"
//! macros:
//!   - id: shells
//!     values: ["sh", "bash", "zsh"]
//! rules:
//!   - id: root_shell
//!     expression: process.name in shells && process.uid == 0 && exec.file.path != ""
//! "#)?;
//!
//! let (ruleset, errors) = RuleSet::build(
//!     &document.rules,
//!     &document.macros,
//!     &Model::runtime_security(),
//!     &CompileOptions::default(),
//! );
//! assert!(errors.is_empty());
//!
//! let event = JsonEvent::new("exec", json!({
//!     "process.name": "bash", "process.uid": 0, "exec.file.path": "/bin/bash"
//! }));
//! let matches = ruleset.evaluate(&event);
//! assert_eq!(matches[0].rule_id, "root_shell");
//! # Ok::<(), secl_engine::PolicyError>(())
//! ```

use crate::action::MatchAction;
use crate::compiler::{compile_rule_ast, parser::parse_rule};
use crate::config::{CompileOptions, ParallelConfig};
use crate::error::{PolicyError, Result, RuleCompileError};
use crate::eval::BoolEvaluator;
use crate::macros::{MacroDefinition, MacroStore};
use crate::model::{Event, EventType, Model};
use crate::value::{Field, FieldValue};
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn default_enabled() -> bool {
    true
}

/// Source definition of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub expression: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub action: Option<MatchAction>,
}

impl RuleDefinition {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            expression: expression.into(),
            enabled: true,
            tags: Vec::new(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: MatchAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Source definition of a macro: exactly one of `expression` or `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroDefinitionDoc {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl MacroDefinitionDoc {
    pub fn expression(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            expression: Some(expression.into()),
            values: None,
        }
    }

    pub fn values<S: Into<String>>(
        id: impl Into<String>,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            id: id.into(),
            description: None,
            expression: None,
            values: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn definition(&self) -> Result<MacroDefinition> {
        match (&self.expression, &self.values) {
            (Some(expression), None) => Ok(MacroDefinition::Expression(expression.clone())),
            (None, Some(values)) => Ok(MacroDefinition::Values(values.clone())),
            _ => Err(PolicyError::Config(format!(
                "macro `{}` must define exactly one of `expression` or `values`",
                self.id
            ))),
        }
    }
}

/// Define a batch of macro documents into a store, collecting failures.
pub fn define_macros(
    store: &mut MacroStore,
    macros: &[MacroDefinitionDoc],
    model: &Model,
    options: &CompileOptions,
) -> Vec<RuleCompileError> {
    let mut errors = Vec::new();
    let mut definitions = Vec::with_capacity(macros.len());
    for doc in macros {
        match doc.definition() {
            Ok(definition) => definitions.push((doc.id.clone(), definition)),
            Err(error) => errors.push(RuleCompileError::new(doc.id.clone(), error)),
        }
    }
    errors.extend(store.define_all(definitions, model, options));
    errors
}

/// A policy document holding macros and rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub macros: Vec<MacroDefinitionDoc>,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

impl PolicyDocument {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse a document from bytes, JSON first and YAML as fallback.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        match serde_json::from_slice(bytes) {
            Ok(document) => Ok(document),
            Err(_) => Ok(serde_yaml::from_slice(bytes)?),
        }
    }
}

/// A compiled rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub tags: Vec<String>,
    pub expression: String,
    pub event_type: EventType,
    pub action: MatchAction,
    evaluator: BoolEvaluator,
    fields: Vec<Field>,
    field_values: HashMap<Field, Vec<FieldValue>>,
}

impl Rule {
    pub fn compile(
        definition: &RuleDefinition,
        model: &Model,
        macros: &MacroStore,
        options: &CompileOptions,
    ) -> Result<Self> {
        let ast = parse_rule(&definition.expression)?;
        let compiled = compile_rule_ast(&ast, model, macros, options)?;
        Ok(Self {
            id: definition.id.clone(),
            description: definition.description.clone(),
            tags: definition.tags.clone(),
            expression: definition.expression.clone(),
            event_type: compiled.event_type,
            action: definition.action.clone().unwrap_or_default(),
            evaluator: compiled.evaluator,
            fields: compiled.fields,
            field_values: compiled.field_values,
        })
    }

    /// Whether the event is of the rule's type and satisfies its expression.
    pub fn matches<E: Event + ?Sized>(&self, event: &E) -> bool {
        self.event_type.as_str() == event.event_type() && self.evaluator.eval(event)
    }

    pub fn evaluator(&self) -> &BoolEvaluator {
        &self.evaluator
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_values(&self, field: &str) -> Option<&[FieldValue]> {
        self.field_values.get(field).map(Vec::as_slice)
    }

    /// Copy of the event with every referenced string field transformed by
    /// the rule's action. `None` when the action is `None` or the event has
    /// no JSON form.
    pub fn apply_action<E: Event + ?Sized>(&self, event: &E) -> Option<Value> {
        if self.action.is_none() {
            return None;
        }
        let mut output = event.to_json()?;
        for field in &self.fields {
            if let Some(target) = field_mut(&mut output, field) {
                transform(target, &self.action);
            }
        }
        Some(output)
    }
}

fn field_mut<'v>(root: &'v mut Value, field: &str) -> Option<&'v mut Value> {
    if root.get(field).is_some() {
        return root.get_mut(field);
    }
    root.pointer_mut(&format!("/{}", field.replace('.', "/")))
}

fn transform(value: &mut Value, action: &MatchAction) {
    match value {
        Value::String(s) => *s = action.apply(s),
        Value::Array(items) => items.iter_mut().for_each(|item| transform(item, action)),
        _ => {}
    }
}

/// A rule that matched an event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMatch {
    pub rule_id: String,
    /// Transformed copy of the event when the rule carries a match action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

/// Versioned, event-type indexed set of compiled rules.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<Arc<Rule>>,
    by_id: HashMap<String, usize>,
    by_event_type: HashMap<EventType, Vec<usize>>,
    version: u64,
    parallel: ParallelConfig,
    pool: Option<Arc<ThreadPool>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::from_rules(Vec::new())
    }
}

impl RuleSet {
    /// Build a rule set with its own macro store.
    pub fn build(
        rules: &[RuleDefinition],
        macros: &[MacroDefinitionDoc],
        model: &Model,
        options: &CompileOptions,
    ) -> (RuleSet, Vec<RuleCompileError>) {
        let mut store = MacroStore::new();
        let mut errors = define_macros(&mut store, macros, model, options);
        let (ruleset, rule_errors) = Self::build_with_macros(rules, &store, model, options);
        errors.extend(rule_errors);
        (ruleset, errors)
    }

    /// Build a rule set against an existing macro store.
    ///
    /// Disabled rules are skipped. A duplicate ID is reported and the first
    /// definition kept.
    pub fn build_with_macros(
        rules: &[RuleDefinition],
        macros: &MacroStore,
        model: &Model,
        options: &CompileOptions,
    ) -> (RuleSet, Vec<RuleCompileError>) {
        let mut compiled: Vec<Rule> = Vec::with_capacity(rules.len());
        let mut seen = BTreeSet::new();
        let mut errors = Vec::new();

        for definition in rules.iter().filter(|d| d.enabled) {
            if !seen.insert(definition.id.as_str()) {
                warn!(rule_id = %definition.id, "duplicate rule ID");
                errors.push(RuleCompileError::new(
                    definition.id.clone(),
                    PolicyError::DuplicateRule(definition.id.clone()),
                ));
                continue;
            }
            match Rule::compile(definition, model, macros, options) {
                Ok(rule) => compiled.push(rule),
                Err(error) => {
                    warn!(rule_id = %definition.id, %error, "failed to compile rule");
                    errors.push(RuleCompileError::new(definition.id.clone(), error));
                }
            }
        }

        let ruleset = Self::from_rules(compiled);
        debug!(
            version = ruleset.version,
            rules = ruleset.len(),
            errors = errors.len(),
            "built rule set"
        );
        (ruleset, errors)
    }

    fn from_rules(rules: Vec<Rule>) -> Self {
        let mut by_id = HashMap::with_capacity(rules.len());
        let mut by_event_type: HashMap<EventType, Vec<usize>> = HashMap::new();
        for (idx, rule) in rules.iter().enumerate() {
            by_id.insert(rule.id.clone(), idx);
            by_event_type
                .entry(rule.event_type.clone())
                .or_default()
                .push(idx);
        }
        Self {
            rules: rules.into_iter().map(Arc::new).collect(),
            by_id,
            by_event_type,
            version: NEXT_VERSION.fetch_add(1, Ordering::Relaxed),
            parallel: ParallelConfig::default(),
            pool: None,
        }
    }

    /// Use `parallel` for batches, with a pool of its own.
    pub fn with_parallel_config(self, parallel: ParallelConfig) -> Self {
        let pool = parallel.build_thread_pool();
        self.with_thread_pool(parallel, pool)
    }

    /// Use `parallel` for batches on a pool shared with other rule sets.
    pub fn with_thread_pool(
        mut self,
        parallel: ParallelConfig,
        pool: Option<Arc<ThreadPool>>,
    ) -> Self {
        self.parallel = parallel;
        self.pool = pool;
        self
    }

    /// Rules of `event_type`, in definition order.
    pub fn query(&self, event_type: &str) -> Vec<&Arc<Rule>> {
        self.by_event_type
            .get(&EventType::from(event_type))
            .map(|indices| indices.iter().map(|&idx| &self.rules[idx]).collect())
            .unwrap_or_default()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Rule>> {
        self.by_id.get(id).map(|&idx| &self.rules[idx])
    }

    /// Rule IDs in definition order.
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn event_types(&self) -> BTreeSet<&EventType> {
        self.by_event_type.keys().collect()
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate one event, returning matches in definition order.
    pub fn evaluate<E: Event + ?Sized>(&self, event: &E) -> Vec<RuleMatch> {
        self.query(event.event_type())
            .into_iter()
            .filter(|rule| rule.matches(event))
            .map(|rule| RuleMatch {
                rule_id: rule.id.clone(),
                output: rule.apply_action(event),
            })
            .collect()
    }

    /// Evaluate a batch of events. Large batches are split across the rayon
    /// pool when the parallel configuration allows it.
    pub fn evaluate_batch<E: Event + Sync>(&self, events: &[E]) -> Vec<Vec<RuleMatch>> {
        if !self.parallel.should_parallelize(events.len()) {
            return events.iter().map(|event| self.evaluate(event)).collect();
        }
        let run = || -> Vec<Vec<RuleMatch>> {
            events.par_iter().map(|event| self.evaluate(event)).collect()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}
