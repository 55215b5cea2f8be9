//! Reconfigurable policy engine.
//!
//! This module hosts the published [`RuleSet`] and implements the
//! reconfiguration protocol: macro definitions arrive first, rule documents
//! after, and every successful reconfiguration publishes a freshly compiled
//! rule set in one atomic swap.

use crate::config::EngineConfig;
use crate::error::{PolicyError, Result, RuleCompileError};
use crate::events::{heartbeat_event, ruleset_loaded_event, CustomEvent, LoadedRule};
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::macros::MacroStore;
use crate::model::{Event, Model};
use crate::publish::Published;
use crate::rule::{define_macros, PolicyDocument, Rule, RuleMatch, RuleSet};
use rayon::ThreadPool;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Reconfiguration orders accepted by [`Engine::reconfigure`].
#[derive(Debug, Clone)]
pub enum EngineOrder {
    /// Base definitions: the `macros` of the document replace the macro store.
    Macros(PolicyDocument),
    /// Rule document. Its own `macros` are layered over the base store.
    Rules(PolicyDocument),
    /// Tear down. Terminal.
    Stop,
}

/// Result of a successful reconfiguration.
#[derive(Debug, Clone)]
pub struct ReconfigureOutcome {
    /// Whether rules are now being evaluated.
    pub active: bool,
    /// Rules and macros that failed to compile; the rest was published.
    pub errors: Vec<RuleCompileError>,
    /// `ruleset_loaded` event, when a rule set was published.
    pub event: Option<CustomEvent>,
}

impl ReconfigureOutcome {
    fn inactive() -> Self {
        Self {
            active: false,
            errors: Vec::new(),
            event: None,
        }
    }
}

#[derive(Debug, Default)]
struct Control {
    lifecycle: LifecycleState,
    macros: Option<MacroStore>,
    rules: Option<PolicyDocument>,
}

/// Policy engine with atomic hot-swap of its rule set.
///
/// Evaluation never blocks on reconfiguration: each call takes a snapshot
/// of the published rule set and uses it to completion.
///
/// # Examples
///
/// ```rust
/// use secl_engine::{Engine, EngineOrder, JsonEvent, PolicyDocument};
/// use serde_json::json;
///
/// let engine = Engine::default();
/// engine.reconfigure(EngineOrder::Macros(PolicyDocument::from_yaml(r#"
/// macros:
///   - id: is_root
///     expression: process.uid == 0
/// "#)?))?;
///
/// let outcome = engine.reconfigure(EngineOrder::Rules(PolicyDocument::from_yaml(r#"
/// rules:
///   - id: root_curl
///     expression: is_root && exec.file.name == "curl"
/// "#)?))?;
/// assert!(outcome.active);
///
/// let event = JsonEvent::new("exec", json!({"process.uid": 0, "exec.file.name": "curl"}));
/// assert_eq!(engine.evaluate(&event)[0].rule_id, "root_curl");
/// # Ok::<(), secl_engine::PolicyError>(())
/// ```
#[derive(Debug)]
pub struct Engine {
    model: Model,
    config: EngineConfig,
    pool: Option<Arc<ThreadPool>>,
    published: Published<RuleSet>,
    control: Mutex<Control>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Model::runtime_security(), EngineConfig::default())
    }
}

impl Engine {
    pub fn new(model: Model, config: EngineConfig) -> Self {
        let pool = config.parallel.build_thread_pool();
        Self {
            model,
            config,
            pool,
            published: Published::new(),
            control: Mutex::new(Control::default()),
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a reconfiguration order.
    ///
    /// On error nothing changes: neither the lifecycle state nor the
    /// published rule set.
    pub fn reconfigure(&self, order: EngineOrder) -> Result<ReconfigureOutcome> {
        let mut control = self.control();
        if control.lifecycle.state() == Lifecycle::Destroyed {
            return match order {
                EngineOrder::Stop => Ok(ReconfigureOutcome::inactive()),
                _ => Err(PolicyError::Config("engine has been stopped".to_string())),
            };
        }

        match order {
            EngineOrder::Stop => {
                self.published.clear();
                control.lifecycle.destroy();
                control.macros = None;
                control.rules = None;
                info!("policy engine stopped");
                Ok(ReconfigureOutcome::inactive())
            }
            EngineOrder::Macros(document) => {
                let mut store = MacroStore::new();
                let errors =
                    define_macros(&mut store, &document.macros, &self.model, &self.config.compile);
                if !errors.is_empty() {
                    return Err(batch_error("macro definitions rejected", &errors));
                }
                debug!(macros = store.len(), "macro definitions accepted");

                let outcome = match control.rules.clone() {
                    Some(rules) => self.publish(&mut control, &store, &rules)?,
                    None => {
                        control.lifecycle.configured(false);
                        ReconfigureOutcome::inactive()
                    }
                };
                control.macros = Some(store);
                Ok(outcome)
            }
            EngineOrder::Rules(document) => {
                let Some(store) = control.macros.clone() else {
                    debug!("rules received before macro definitions, retained");
                    control.rules = Some(document);
                    return Ok(ReconfigureOutcome::inactive());
                };
                let outcome = self.publish(&mut control, &store, &document)?;
                control.rules = Some(document);
                Ok(outcome)
            }
        }
    }

    /// Compile `document` against `base` and publish the result.
    fn publish(
        &self,
        control: &mut Control,
        base: &MacroStore,
        document: &PolicyDocument,
    ) -> Result<ReconfigureOutcome> {
        let mut store = base.clone();
        let mut errors =
            define_macros(&mut store, &document.macros, &self.model, &self.config.compile);

        if !document.rules.iter().any(|r| r.enabled) {
            self.published.clear();
            control.lifecycle.configured(false);
            info!("no enabled rule, policy engine inactive");
            return Ok(ReconfigureOutcome {
                active: false,
                errors,
                event: None,
            });
        }

        let (ruleset, rule_errors) =
            RuleSet::build_with_macros(&document.rules, &store, &self.model, &self.config.compile);
        errors.extend(rule_errors);
        if ruleset.is_empty() {
            return Err(batch_error("no enabled rule compiled", &errors));
        }

        let ruleset = ruleset.with_thread_pool(self.config.parallel.clone(), self.pool.clone());
        let version = ruleset.version();
        let loaded = ruleset
            .rules()
            .iter()
            .map(|rule| LoadedRule {
                id: rule.id.clone(),
                event_type: rule.event_type.to_string(),
            })
            .collect();
        let event = ruleset_loaded_event(
            version,
            loaded,
            errors.iter().map(ToString::to_string).collect(),
        );

        info!(
            version,
            rules = ruleset.len(),
            errors = errors.len(),
            "publishing rule set"
        );
        self.published.store(Arc::new(ruleset));
        control.lifecycle.configured(true);

        Ok(ReconfigureOutcome {
            active: true,
            errors,
            event: Some(event),
        })
    }

    /// Evaluate one event against the published rule set. No-op unless active.
    pub fn evaluate<E: Event + ?Sized>(&self, event: &E) -> Vec<RuleMatch> {
        match self.published.load() {
            Some(ruleset) => ruleset.evaluate(event),
            None => Vec::new(),
        }
    }

    pub fn evaluate_batch<E: Event + Sync>(&self, events: &[E]) -> Vec<Vec<RuleMatch>> {
        match self.published.load() {
            Some(ruleset) => ruleset.evaluate_batch(events),
            None => events.iter().map(|_| Vec::new()).collect(),
        }
    }

    /// Rules evaluated for an event type in the published rule set.
    pub fn query(&self, event_type: &str) -> Vec<Arc<Rule>> {
        self.published
            .load()
            .map(|ruleset| ruleset.query(event_type).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rule_set(&self) -> Option<Arc<RuleSet>> {
        self.published.load()
    }

    pub fn state(&self) -> Lifecycle {
        self.control().lifecycle.state()
    }

    pub fn is_ready(&self) -> bool {
        self.control().lifecycle.is_ready()
    }

    /// Number of publications and teardowns so far.
    pub fn generation(&self) -> u64 {
        self.published.generation()
    }

    /// A `heartbeat` event describing the current state.
    pub fn heartbeat(&self) -> CustomEvent {
        let version = self.published.load().map(|ruleset| ruleset.version());
        heartbeat_event(version, self.state().to_string())
    }
}

fn batch_error(context: &str, errors: &[RuleCompileError]) -> PolicyError {
    let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
    warn!(context, errors = errors.len(), "reconfiguration rejected");
    PolicyError::Config(format!("{context}: {}", details.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{MacroDefinitionDoc, RuleDefinition};

    fn macros(defs: Vec<MacroDefinitionDoc>) -> EngineOrder {
        EngineOrder::Macros(PolicyDocument {
            macros: defs,
            ..Default::default()
        })
    }

    fn rules(defs: Vec<RuleDefinition>) -> EngineOrder {
        EngineOrder::Rules(PolicyDocument {
            rules: defs,
            ..Default::default()
        })
    }

    #[test]
    fn test_rules_before_macros_are_retained() {
        let engine = Engine::default();
        let outcome = engine
            .reconfigure(rules(vec![RuleDefinition::new("r", "exec.uid == 0")]))
            .unwrap();
        assert!(!outcome.active);
        assert_eq!(engine.state(), Lifecycle::Unconfigured);

        let outcome = engine.reconfigure(macros(vec![])).unwrap();
        assert!(outcome.active);
        assert!(outcome.event.is_some());
        assert_eq!(engine.state(), Lifecycle::Active);
        assert!(engine.is_ready());
    }

    #[test]
    fn test_failing_macro_update_changes_nothing() {
        let engine = Engine::default();
        engine
            .reconfigure(macros(vec![MacroDefinitionDoc::expression("is_root", "exec.uid == 0")]))
            .unwrap();
        engine
            .reconfigure(rules(vec![RuleDefinition::new("r", "is_root")]))
            .unwrap();
        let generation = engine.generation();

        let err = engine
            .reconfigure(macros(vec![MacroDefinitionDoc::expression("is_root", "exec.uid ==")]))
            .unwrap_err();
        assert!(matches!(err, PolicyError::Config(_)));
        assert_eq!(engine.generation(), generation);
        assert_eq!(engine.state(), Lifecycle::Active);
    }

    #[test]
    fn test_all_rules_failing_is_an_error() {
        let engine = Engine::default();
        engine.reconfigure(macros(vec![])).unwrap();
        let err = engine
            .reconfigure(rules(vec![RuleDefinition::new("r", "missing_macro")]))
            .unwrap_err();
        assert!(err.to_string().contains("missing_macro"));
        assert_eq!(engine.state(), Lifecycle::ConfiguredInactive);
        assert!(!engine.is_ready());
    }

    #[test]
    fn test_stop_is_terminal() {
        let engine = Engine::default();
        engine.reconfigure(macros(vec![])).unwrap();
        engine.reconfigure(EngineOrder::Stop).unwrap();
        assert_eq!(engine.state(), Lifecycle::Destroyed);
        assert!(engine.rule_set().is_none());
        assert!(engine.reconfigure(macros(vec![])).is_err());

        let generation = engine.generation();
        let outcome = engine.reconfigure(EngineOrder::Stop).unwrap();
        assert!(!outcome.active);
        assert_eq!(engine.state(), Lifecycle::Destroyed);
        assert_eq!(engine.generation(), generation);
    }

    #[test]
    fn test_stop_from_unconfigured() {
        let engine = Engine::default();
        engine.reconfigure(EngineOrder::Stop).unwrap();
        assert_eq!(engine.state(), Lifecycle::Destroyed);
        assert!(engine.reconfigure(EngineOrder::Stop).is_ok());
    }

    #[test]
    fn test_heartbeat_reports_state() {
        let engine = Engine::default();
        let payload: serde_json::Value =
            serde_json::from_slice(&engine.heartbeat().marshal_json().unwrap()).unwrap();
        assert_eq!(payload["state"], "unconfigured");
        assert!(payload["version"].is_null());
    }
}
