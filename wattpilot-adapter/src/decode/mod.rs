//! Status decoding
//!
//! Two interchangeable strategies turn a `status` map into named states:
//! - `strict`: fixed field-code table with human-readable names and labels
//! - `dynamic`: every field kept under its wire code, kind inferred on first sight
//!
//! Both declare a state at most once per connection (tracked in the
//! [`FieldRegistry`]) and only refresh values afterwards.

pub mod dynamic;
pub mod registry;
pub mod strict;

use serde_json::{Map, Value};

use crate::config::DecodeMode;
use crate::sink::StateSink;

pub use dynamic::DynamicDecoder;
pub use registry::{FieldEntry, FieldRegistry};
pub use strict::{FieldRule, StrictDecoder, FIELD_TABLE};

/// A status decoding strategy
pub trait StatusDecoder: Send + Sync {
    /// Decode every field code in `status` once. Returns how many codes were handled.
    fn decode(
        &self,
        status: &Map<String, Value>,
        registry: &mut FieldRegistry,
        sink: &dyn StateSink,
    ) -> usize;
}

/// Decoder for the configured mode
pub fn decoder_for(mode: DecodeMode) -> Box<dyn StatusDecoder> {
    match mode {
        DecodeMode::Strict => Box::new(StrictDecoder),
        DecodeMode::Dynamic => Box::new(DynamicDecoder),
    }
}
