//! State sink collaborator
//!
//! The host persists decoded values; the engine only declares named
//! states, writes values into them, and reports connection up/down.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

/// Kind of value a declared state holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Boolean,
    String,
    /// Structured value, stored as its JSON text
    Object,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::Object => "object",
        };
        f.write_str(s)
    }
}

/// A decoded value
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Number(f64),
    Boolean(bool),
    Text(String),
}

impl StateValue {
    /// Scalar passthrough; arrays and objects become their JSON text
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(StateValue::Boolean(*b)),
            Value::Number(n) => n.as_f64().map(StateValue::Number),
            Value::String(s) => Some(StateValue::Text(s.clone())),
            structured => Some(StateValue::Text(structured.to_string())),
        }
    }
}

impl std::fmt::Display for StateValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateValue::Number(n) => write!(f, "{}", n),
            StateValue::Boolean(b) => write!(f, "{}", b),
            StateValue::Text(s) => f.write_str(s),
        }
    }
}

/// Declaration of a named state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ValueKind,
    /// Whether the host may write it (control states)
    pub writable: bool,
}

impl FieldSpec {
    /// Read-only telemetry state
    pub fn state(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            writable: false,
        }
    }

    /// Writable control state
    pub fn control(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            writable: true,
        }
    }
}

/// Control states the host writes intents into
pub fn control_fields() -> [FieldSpec; 3] {
    [
        FieldSpec::control("set_power", ValueKind::Number),
        FieldSpec::control("set_mode", ValueKind::Number),
        FieldSpec::control("set_state", ValueKind::String),
    ]
}

/// Where decoded state goes
pub trait StateSink: Send + Sync {
    /// Create the state if it does not exist yet
    fn declare(&self, spec: &FieldSpec);

    fn store(&self, name: &str, value: StateValue);

    fn last_value(&self, name: &str) -> Option<StateValue>;

    /// Connection usable for commands (authenticated) or not
    fn set_connected(&self, connected: bool);
}

#[derive(Debug, Clone)]
struct StoredState {
    spec: FieldSpec,
    declarations: u32,
    value: Option<StateValue>,
    updated_at: Option<DateTime<Utc>>,
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemorySink {
    states: RwLock<HashMap<String, StoredState>>,
    connected: AtomicBool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// How many times `declare` was called for a state
    pub fn declaration_count(&self, name: &str) -> u32 {
        self.states.read().get(name).map_or(0, |s| s.declarations)
    }

    pub fn kind_of(&self, name: &str) -> Option<ValueKind> {
        self.states.read().get(name).map(|s| s.spec.kind)
    }

    pub fn updated_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.states.read().get(name).and_then(|s| s.updated_at)
    }

    /// Declared state names, sorted
    pub fn declared_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.states.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// All states holding a value, sorted by name
    pub fn snapshot(&self) -> Vec<(String, StateValue)> {
        let mut values: Vec<(String, StateValue)> = self
            .states
            .read()
            .iter()
            .filter_map(|(name, s)| s.value.clone().map(|v| (name.clone(), v)))
            .collect();
        values.sort_by(|a, b| a.0.cmp(&b.0));
        values
    }
}

impl StateSink for MemorySink {
    fn declare(&self, spec: &FieldSpec) {
        let mut states = self.states.write();
        states
            .entry(spec.name.clone())
            .and_modify(|s| s.declarations += 1)
            .or_insert_with(|| {
                debug!("Declared state {} ({})", spec.name, spec.kind);
                StoredState {
                    spec: spec.clone(),
                    declarations: 1,
                    value: None,
                    updated_at: None,
                }
            });
    }

    fn store(&self, name: &str, value: StateValue) {
        let mut states = self.states.write();
        match states.get_mut(name) {
            Some(state) => {
                state.value = Some(value);
                state.updated_at = Some(Utc::now());
            }
            None => warn!("Dropping value for undeclared state {}", name),
        }
    }

    fn last_value(&self, name: &str) -> Option<StateValue> {
        self.states.read().get(name).and_then(|s| s.value.clone())
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}
