//! Type-inferring status decoder
//!
//! Every field is stored under its wire code. The kind is inferred once,
//! from the JSON text of the first value seen on the connection:
//!
//! 1. `rcd` is always numeric
//! 2. numeric-looking text is a number
//! 3. `true` / `false` in any case is a boolean
//! 4. text containing `[` is an object, stored as JSON text
//! 5. anything else is a string

use serde_json::{Map, Value};
use tracing::debug;

use super::registry::FieldRegistry;
use super::StatusDecoder;
use crate::sink::{FieldSpec, StateSink, StateValue, ValueKind};

/// Field code always declared as a number
pub const NUMERIC_OVERRIDE_CODE: &str = "rcd";

fn looks_numeric(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || text.parse::<f64>().map_or(false, f64::is_finite)
}

/// Infer the kind of a field from its JSON text
pub fn infer_kind(code: &str, rendered: &str) -> ValueKind {
    if code == NUMERIC_OVERRIDE_CODE || looks_numeric(rendered) {
        ValueKind::Number
    } else if rendered.eq_ignore_ascii_case("true") || rendered.eq_ignore_ascii_case("false") {
        ValueKind::Boolean
    } else if rendered.contains('[') {
        ValueKind::Object
    } else {
        ValueKind::String
    }
}

/// Fit a raw value into a declared kind
pub fn coerce(kind: ValueKind, value: &Value) -> Option<StateValue> {
    match kind {
        ValueKind::Object => Some(StateValue::Text(value.to_string())),
        ValueKind::Number => match value {
            Value::Number(n) => n.as_f64().map(StateValue::Number),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(StateValue::Number),
            Value::Bool(b) => Some(StateValue::Number(if *b { 1.0 } else { 0.0 })),
            _ => None,
        },
        ValueKind::Boolean => match value {
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(StateValue::Boolean(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(StateValue::Boolean(false)),
            other => StateValue::from_json(other),
        },
        ValueKind::String => match value {
            Value::Null => None,
            Value::String(s) => Some(StateValue::Text(s.clone())),
            other => Some(StateValue::Text(other.to_string())),
        },
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicDecoder;

impl StatusDecoder for DynamicDecoder {
    fn decode(
        &self,
        status: &Map<String, Value>,
        registry: &mut FieldRegistry,
        sink: &dyn StateSink,
    ) -> usize {
        for (code, value) in status {
            let kind = match registry.kind_of(code) {
                Some(kind) => {
                    if registry.last_value(code) == Some(value) {
                        debug!("{} unchanged", code);
                    }
                    registry.refresh(code, value);
                    kind
                }
                None => {
                    let kind = infer_kind(code, &value.to_string());
                    debug!("Inferred {} for {}", kind, code);
                    sink.declare(&FieldSpec::state(code.as_str(), kind));
                    registry.declare(code, kind, value);
                    kind
                }
            };

            match coerce(kind, value) {
                Some(state) => sink.store(code, state),
                None => debug!("Value of {} does not fit {}, skipped", code, kind),
            }
        }

        status.len()
    }
}
