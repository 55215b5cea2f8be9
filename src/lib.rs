//! # SECL Policy Engine
//!
//! A Rust library for compiling security policy expressions into evaluator
//! trees and evaluating them against runtime events, with reconfigurable
//! detection surfaces that swap their rule sets atomically.
//!
//! ## Quick Start
//!
//! ### Rule Sets
//!
//! ```rust
//! use secl_engine::{CompileOptions, JsonEvent, Model, PolicyDocument, RuleSet};
//! use serde_json::json;
//!
//! let document = PolicyDocument::from_yaml(r#"
//! macros:
//!   - id: tmp_path
//!     expression: open.file.path =~ "/tmp/*"
//! rules:
//!   - id: tmp_open
//!     expression: tmp_path && process.uid != 0
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
//! let event = JsonEvent::new("open", json!({"open.file.path": "/tmp/x", "process.uid": 1000}));
//! assert_eq!(ruleset.evaluate(&event)[0].rule_id, "tmp_open");
//! # Ok::<(), secl_engine::PolicyError>(())
//! ```
//!
//! ### Reconfigurable Engine
//!
//! ```rust
//! use secl_engine::{Engine, EngineOrder, JsonEvent, PolicyDocument};
//! use serde_json::json;
//!
//! let engine = Engine::default();
//! engine.reconfigure(EngineOrder::Macros(PolicyDocument::default()))?;
//! engine.reconfigure(EngineOrder::Rules(PolicyDocument::from_yaml(r#"
//! rules:
//!   - id: curl
//!     expression: exec.file.name in ["curl", "wget"]
//! "#)?))?;
//!
//! let event = JsonEvent::new("exec", json!({"exec.file.name": "wget"}));
//! assert_eq!(engine.evaluate(&event).len(), 1);
//! # Ok::<(), secl_engine::PolicyError>(())
//! ```
//!
//! ## Modules
//!
//! | Module | Content |
//! |--------|---------|
//! | [`compiler`] | expression parser and evaluator tree compiler |
//! | [`macros`] | macro registry |
//! | [`rule`] | rules, rule documents and rule sets |
//! | [`engine`] | reconfigurable policy engine |
//! | [`scanner`] | reconfigurable text scanner and its [`definitions`] |
//! | [`events`] | lazily marshaled custom events |

pub mod action;
pub mod ast;
pub mod compiler;
pub mod config;
pub mod definitions;
pub mod engine;
pub mod error;
pub mod eval;
pub mod events;
pub mod lifecycle;
pub mod macros;
pub mod model;
pub mod publish;
pub mod rule;
pub mod scanner;
pub mod value;

// Compilation
pub use compiler::{CompilationState, CompiledExpression};
pub use config::{CompileOptions, EngineConfig, ParallelConfig, ScannerConfig};
pub use macros::{Macro, MacroDefinition, MacroEvaluator, MacroStore};
pub use model::{Event, EventType, FieldType, JsonEvent, Model};
pub use value::{Field, FieldValue, FieldValueKind, Scalar};

// Rules and evaluation
pub use action::MatchAction;
pub use eval::{BoolEvaluator, Evaluator, ValueEvaluator};
pub use rule::{MacroDefinitionDoc, PolicyDocument, Rule, RuleDefinition, RuleMatch, RuleSet};

// Reconfigurable surfaces
pub use engine::{Engine, EngineOrder, ReconfigureOutcome};
pub use lifecycle::Lifecycle;
pub use scanner::{ReconfigureOrder, ScanMatch, ScanResult, Scanner};

// Events and errors
pub use error::{PolicyError, Result, RuleCompileError};
pub use events::{CustomEvent, CustomEventType};
