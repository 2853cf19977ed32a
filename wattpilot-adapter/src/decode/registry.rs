//! Per-connection field registry
//!
//! Remembers which wire field codes already had their states declared, the
//! kind they were declared with, and the last raw value seen. A fresh
//! registry comes with every new connection.

use std::collections::HashMap;

use serde_json::Value;

use crate::sink::ValueKind;

/// What the registry knows about one field code
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEntry {
    pub kind: ValueKind,
    pub last: Value,
}

#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: HashMap<String, FieldEntry>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_declared(&self, code: &str) -> bool {
        self.fields.contains_key(code)
    }

    pub fn kind_of(&self, code: &str) -> Option<ValueKind> {
        self.fields.get(code).map(|f| f.kind)
    }

    pub fn last_value(&self, code: &str) -> Option<&Value> {
        self.fields.get(code).map(|f| &f.last)
    }

    /// Record a first sighting. Returns false, leaving the entry untouched,
    /// when the code was already declared.
    pub fn declare(&mut self, code: &str, kind: ValueKind, value: &Value) -> bool {
        if self.fields.contains_key(code) {
            return false;
        }
        self.fields.insert(
            code.to_string(),
            FieldEntry {
                kind,
                last: value.clone(),
            },
        );
        true
    }

    /// Refresh the last value of a declared code
    pub fn refresh(&mut self, code: &str, value: &Value) {
        if let Some(entry) = self.fields.get_mut(code) {
            entry.last = value.clone();
        }
    }

    /// Declared codes with their kinds, sorted by code
    pub fn declarations(&self) -> Vec<(String, ValueKind)> {
        let mut out: Vec<(String, ValueKind)> = self
            .fields
            .iter()
            .map(|(code, entry)| (code.clone(), entry.kind))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
