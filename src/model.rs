//! Event model: the known fields, their types and the event type each
//! field belongs to.
//!
//! The model is consulted at compile time only. At runtime rules are
//! evaluated against anything implementing [`Event`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Type of an event field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Bool,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Name of an event type, e.g. `exec` or `open`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    pub fn new(name: impl Into<String>) -> Self {
        EventType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        EventType::new(name)
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType(name)
    }
}

/// Declaration of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub field_type: FieldType,
    /// `None` for cross-type fields available on every event.
    pub event_type: Option<EventType>,
}

/// Set of known fields.
#[derive(Debug, Clone, Default)]
pub struct Model {
    fields: HashMap<String, FieldSpec>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field that belongs to exactly one event type.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        event_type: impl Into<EventType>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                event_type: Some(event_type.into()),
            },
        );
        self
    }

    /// Declare a field present on every event.
    pub fn with_cross_type_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                event_type: None,
            },
        );
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All concrete event types declared by the model, sorted.
    pub fn event_types(&self) -> BTreeSet<EventType> {
        self.fields
            .values()
            .filter_map(|spec| spec.event_type.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The process/file/network model used by the runtime security agent.
    ///
    /// | Prefix | Event type |
    /// |--------|------------|
    /// | `process.*`, `container.id` | cross-type |
    /// | `exec.*` | `exec` |
    /// | `open.*` | `open` |
    /// | `unlink.*` | `unlink` |
    /// | `rename.*` | `rename` |
    /// | `connect.*` | `connect` |
    /// | `dns.*` | `dns` |
    pub fn runtime_security() -> Self {
        Model::new()
            .with_cross_type_field("process.name", FieldType::String)
            .with_cross_type_field("process.file.path", FieldType::String)
            .with_cross_type_field("process.pid", FieldType::Int)
            .with_cross_type_field("process.ppid", FieldType::Int)
            .with_cross_type_field("process.uid", FieldType::Int)
            .with_cross_type_field("process.gid", FieldType::Int)
            .with_cross_type_field("process.user", FieldType::String)
            .with_cross_type_field("process.is_kworker", FieldType::Bool)
            .with_cross_type_field("process.parent.name", FieldType::String)
            .with_cross_type_field("process.parent.file.path", FieldType::String)
            .with_cross_type_field("container.id", FieldType::String)
            .with_field("exec.file.path", FieldType::String, "exec")
            .with_field("exec.file.name", FieldType::String, "exec")
            .with_field("exec.args", FieldType::String, "exec")
            .with_field("exec.argv", FieldType::String, "exec")
            .with_field("exec.comm", FieldType::String, "exec")
            .with_field("exec.uid", FieldType::Int, "exec")
            .with_field("exec.is_thread", FieldType::Bool, "exec")
            .with_field("open.file.path", FieldType::String, "open")
            .with_field("open.file.name", FieldType::String, "open")
            .with_field("open.flags", FieldType::Int, "open")
            .with_field("open.file.mode", FieldType::Int, "open")
            .with_field("unlink.file.path", FieldType::String, "unlink")
            .with_field("unlink.file.name", FieldType::String, "unlink")
            .with_field("rename.file.path", FieldType::String, "rename")
            .with_field("rename.file.destination.path", FieldType::String, "rename")
            .with_field("connect.addr.ip", FieldType::String, "connect")
            .with_field("connect.addr.port", FieldType::Int, "connect")
            .with_field("dns.question.name", FieldType::String, "dns")
            .with_field("dns.question.type", FieldType::String, "dns")
    }
}

/// A runtime event rules are evaluated against.
pub trait Event {
    fn event_type(&self) -> &str;

    /// Value of a field, `None` when the event does not carry it.
    fn field(&self, field: &str) -> Option<&Value>;

    /// JSON copy of the whole event, used to build transformed outputs.
    fn to_json(&self) -> Option<Value> {
        None
    }
}

/// An [`Event`] backed by a JSON object.
///
/// Fields are looked up first as a flat key (`"process.name"`), then as a
/// dotted path through nested objects (`{"process": {"name": ..}}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl JsonEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

impl Event for JsonEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn field(&self, field: &str) -> Option<&Value> {
        if let Some(value) = self.data.get(field) {
            return Some(value);
        }

        let mut current = &self.data;
        for part in field.split('.') {
            current = current.get(part)?;
        }
        Some(current)
    }

    fn to_json(&self) -> Option<Value> {
        Some(self.data.clone())
    }
}
