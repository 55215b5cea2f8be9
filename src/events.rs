//! Custom events emitted by the engine itself.
//!
//! A [`CustomEvent`] carries a factory for its payload rather than the
//! payload itself. The factory runs at most once, the first time the event
//! is marshaled, so events that are never reported cost nothing to build.

use crate::error::{PolicyError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Service tag of every custom event.
pub const SERVICE_NAME: &str = "runtime-security-agent";

pub const RULESET_LOADED_RULE_ID: &str = "ruleset_loaded";
pub const RULESET_LOADED_RULE_DESC: &str = "New ruleset loaded";
pub const HEARTBEAT_RULE_ID: &str = "heartbeat";
pub const HEARTBEAT_RULE_DESC: &str = "Heartbeat";
pub const ABNORMAL_PATH_RULE_ID: &str = "abnormal_path";
pub const ABNORMAL_PATH_RULE_DESC: &str = "Abnormal path detected";
pub const SELF_TEST_RULE_ID: &str = "self_test";
pub const SELF_TEST_RULE_DESC: &str = "Self tests result";
pub const ANOMALY_DETECTION_RULE_ID: &str = "anomaly_detection";
pub const ANOMALY_DETECTION_RULE_DESC: &str = "Anomaly detection";
pub const NO_PROCESS_CONTEXT_RULE_ID: &str = "no_process_context";
pub const NO_PROCESS_CONTEXT_RULE_DESC: &str = "No process context detected";
pub const BROKEN_PROCESS_LINEAGE_RULE_ID: &str = "broken_process_lineage";
pub const BROKEN_PROCESS_LINEAGE_RULE_DESC: &str = "Broken process lineage detected";
pub const INTERNAL_CORE_DUMP_RULE_ID: &str = "internal_core_dump";
pub const INTERNAL_CORE_DUMP_RULE_DESC: &str = "Internal Core Dump";
pub const SYSCTL_SNAPSHOT_RULE_ID: &str = "sysctl_snapshot";
pub const SYSCTL_SNAPSHOT_RULE_DESC: &str = "A new sysctl snapshot was generated";

/// IDs of the custom rules that can be reported. Heartbeats are internal
/// and not listed.
pub fn all_custom_rule_ids() -> &'static [&'static str] {
    &[
        RULESET_LOADED_RULE_ID,
        ABNORMAL_PATH_RULE_ID,
        SELF_TEST_RULE_ID,
        ANOMALY_DETECTION_RULE_ID,
        NO_PROCESS_CONTEXT_RULE_ID,
        BROKEN_PROCESS_LINEAGE_RULE_ID,
        INTERNAL_CORE_DUMP_RULE_ID,
        SYSCTL_SNAPSHOT_RULE_ID,
    ]
}

/// Descriptor of a custom rule, as reported alongside its events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomRule {
    pub id: &'static str,
    pub description: &'static str,
}

impl CustomRule {
    pub fn new(id: &'static str, description: &'static str) -> Self {
        Self { id, description }
    }
}

/// Types of custom events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomEventType {
    RulesetLoaded,
    Heartbeat,
    SelfTest,
    AnomalyDetection,
    AbnormalPath,
    NoProcessContext,
    BrokenProcessLineage,
    InternalCoreDump,
    SysctlSnapshot,
}

impl CustomEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            CustomEventType::RulesetLoaded => "ruleset_loaded",
            CustomEventType::Heartbeat => "heartbeat",
            CustomEventType::SelfTest => "self_test",
            CustomEventType::AnomalyDetection => "anomaly_detection",
            CustomEventType::AbnormalPath => "abnormal_path",
            CustomEventType::NoProcessContext => "no_process_context",
            CustomEventType::BrokenProcessLineage => "broken_process_lineage",
            CustomEventType::InternalCoreDump => "internal_core_dump",
            CustomEventType::SysctlSnapshot => "sysctl_snapshot",
        }
    }
}

impl fmt::Display for CustomEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can produce a JSON payload.
pub trait EventMarshaler: Send + Sync {
    fn to_json(&self) -> Result<Vec<u8>>;
}

impl<T: Serialize + Send + Sync> EventMarshaler for T {
    fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PolicyError::Marshal(e.to_string()))
    }
}

type MarshalerFactory = dyn Fn() -> Box<dyn EventMarshaler> + Send + Sync;

/// An engine-internal event with a lazily built payload.
pub struct CustomEvent {
    event_type: CustomEventType,
    tags: Vec<String>,
    factory: Arc<MarshalerFactory>,
    payload: Arc<OnceLock<std::result::Result<Vec<u8>, String>>>,
}

impl CustomEvent {
    /// Create an event whose payload is built by `factory` on first use.
    pub fn new_lazy<F>(event_type: CustomEventType, factory: F, tags: Vec<String>) -> Self
    where
        F: Fn() -> Box<dyn EventMarshaler> + Send + Sync + 'static,
    {
        Self {
            event_type,
            tags,
            factory: Arc::new(factory),
            payload: Arc::new(OnceLock::new()),
        }
    }

    /// Create an event from an already built payload.
    pub fn new<M>(event_type: CustomEventType, marshaler: M, tags: Vec<String>) -> Self
    where
        M: Serialize + Clone + Send + Sync + 'static,
    {
        Self::new_lazy(
            event_type,
            move || Box::new(marshaler.clone()) as Box<dyn EventMarshaler>,
            tags,
        )
    }

    pub fn event_type(&self) -> CustomEventType {
        self.event_type
    }

    /// Tags of the event, with `type:<event type>` appended last.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = self.tags.clone();
        tags.push(format!("type:{}", self.event_type));
        tags
    }

    /// Whether the payload has been built yet.
    pub fn is_marshaled(&self) -> bool {
        self.payload.get().is_some()
    }

    /// JSON payload, built on first call and memoized.
    pub fn marshal_json(&self) -> Result<Vec<u8>> {
        self.payload
            .get_or_init(|| (self.factory)().to_json().map_err(|e| e.to_string()))
            .clone()
            .map_err(PolicyError::Marshal)
    }
}

impl Clone for CustomEvent {
    /// Clones share the factory and the memoized payload.
    fn clone(&self) -> Self {
        Self {
            event_type: self.event_type,
            tags: self.tags.clone(),
            factory: Arc::clone(&self.factory),
            payload: Arc::clone(&self.payload),
        }
    }
}

impl fmt::Debug for CustomEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomEvent")
            .field("event_type", &self.event_type)
            .field("tags", &self.tags)
            .field("marshaled", &self.is_marshaled())
            .finish()
    }
}

/// Container the agent itself runs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentContainerContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub created_at: u64,
}

/// Fields common to every custom event payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonFields {
    pub date: DateTime<Utc>,
    pub service: &'static str,
    pub container: Option<AgentContainerContext>,
}

impl CommonFields {
    pub fn new(container: Option<AgentContainerContext>) -> Self {
        Self {
            date: Utc::now(),
            service: SERVICE_NAME,
            container,
        }
    }
}

/// Summary of one rule in a `ruleset_loaded` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedRule {
    pub id: String,
    pub event_type: String,
}

/// Payload of `ruleset_loaded`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RulesetLoadedPayload {
    #[serde(flatten)]
    pub common: CommonFields,
    pub version: u64,
    pub rules: Vec<LoadedRule>,
    pub errors: Vec<String>,
}

/// Payload of `heartbeat`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeartbeatPayload {
    #[serde(flatten)]
    pub common: CommonFields,
    pub version: Option<u64>,
    pub state: String,
}

/// Payload of `self_test`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfTestPayload {
    #[serde(flatten)]
    pub common: CommonFields,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

/// Build a lazily marshaled `ruleset_loaded` event.
pub fn ruleset_loaded_event(
    version: u64,
    rules: Vec<LoadedRule>,
    errors: Vec<String>,
) -> CustomEvent {
    CustomEvent::new_lazy(
        CustomEventType::RulesetLoaded,
        move || {
            Box::new(RulesetLoadedPayload {
                common: CommonFields::new(None),
                version,
                rules: rules.clone(),
                errors: errors.clone(),
            })
        },
        Vec::new(),
    )
}

pub fn heartbeat_event(version: Option<u64>, state: impl Into<String>) -> CustomEvent {
    let state = state.into();
    CustomEvent::new_lazy(
        CustomEventType::Heartbeat,
        move || {
            Box::new(HeartbeatPayload {
                common: CommonFields::new(None),
                version,
                state: state.clone(),
            })
        },
        Vec::new(),
    )
}

pub fn self_test_event(succeeded: Vec<String>, failed: Vec<String>) -> CustomEvent {
    CustomEvent::new(
        CustomEventType::SelfTest,
        SelfTestPayload {
            common: CommonFields::new(None),
            succeeded,
            failed,
        },
        Vec::new(),
    )
}
