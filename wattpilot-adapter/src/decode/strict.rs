//! Table-driven status decoder
//!
//! ## Field table
//!
//! | Code | State(s) | Kind | Transform |
//! |------|----------|------|-----------|
//! | `acs` | `AccessState` | string | 0 Open, 2 Wait |
//! | `cbl` | `cableType` | number | passthrough |
//! | `fhz` | `frequency` | number | passthrough |
//! | `pha` | `phases` | string | JSON text |
//! | `wh` | `energyCounterSinceStart` | number | passthrough |
//! | `err` | `errorState` | string | 0..5 labels |
//! | `ust` | `cableLock` | string | 0 Normal, 1 AutoUnlock, 2 AlwaysLock |
//! | `eto` | `energyCounterTotal` | number | passthrough |
//! | `cae` | `cae` | boolean | passthrough |
//! | `cak` | `cak` | string | passthrough |
//! | `lmo` | `mode` | string | 3 Default, 4 Eco, 5 Next Trip |
//! | `car` | `carConnected` | string | 1..4 labels |
//! | `alw` | `AllowCharging` | boolean | 0 false, 1 true |
//! | `nrg` | `voltage1..power` | number | 12 positional outputs, powers / 1000 |
//! | `amp` | `amp` | number | passthrough |
//! | `version` | `version` | string | passthrough |
//! | `fwv` | `firmware` | string | passthrough |
//! | `wss` | `WifiSSID` | string | passthrough |
//! | `upd` | `updateAvailable` | boolean | `"0"` false, else true |
//! | `fna` | `hostname` | string | passthrough |
//! | `ffna` | `serial` | string | passthrough |
//! | `utc` | `TimeStamp` | string | passthrough |
//! | `pvopt_averagePGrid` | `PVUselessPower` | number | passthrough |
//!
//! Unknown codes are ignored. Enumerated codes outside their label set are
//! dropped: the state is declared but no value is written.

use serde_json::{Map, Value};
use tracing::debug;

use super::registry::FieldRegistry;
use super::StatusDecoder;
use crate::sink::{FieldSpec, StateSink, StateValue, ValueKind};

/// One position of an exploded array field
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub name: &'static str,
    /// Milli-unit reading, divided by 1000 before storage
    pub milli: bool,
}

const fn raw(name: &'static str) -> Element {
    Element { name, milli: false }
}

const fn milli(name: &'static str) -> Element {
    Element { name, milli: true }
}

/// How a field code becomes states
#[derive(Debug, Clone, Copy)]
pub enum Transform {
    /// Scalar passthrough into a state of the given kind
    Passthrough(&'static str, ValueKind),
    /// Stored as its JSON text
    JsonText(&'static str),
    /// Integer code mapped to a label
    Labels(&'static str, &'static [(i64, &'static str)]),
    /// Integer code mapped to a flag
    Switch(&'static str, &'static [(i64, bool)]),
    /// Text `"0"` is false, anything else true
    NonZeroText(&'static str),
    /// Array exploded into positional states
    Exploded(&'static [Element]),
}

/// Table entry for one wire field code
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub code: &'static str,
    pub transform: Transform,
}

const ACCESS_LABELS: &[(i64, &str)] = &[(0, "Open"), (2, "Wait")];

const ERROR_LABELS: &[(i64, &str)] = &[
    (0, "Unknown Error"),
    (1, "Idle"),
    (2, "Charging"),
    (3, "Wait Car"),
    (4, "Complete"),
    (5, "Error"),
];

const CABLE_LOCK_LABELS: &[(i64, &str)] = &[(0, "Normal"), (1, "AutoUnlock"), (2, "AlwaysLock")];

const MODE_LABELS: &[(i64, &str)] = &[(3, "Default"), (4, "Eco"), (5, "Next Trip")];

const CAR_LABELS: &[(i64, &str)] = &[(1, "no car"), (2, "charging"), (3, "ready"), (4, "complete")];

const ALLOW_SWITCH: &[(i64, bool)] = &[(0, false), (1, true)];

/// `nrg`: voltages L1 L2 L3 N, currents L1 L2 L3, powers L1 L2 L3 N total.
///
/// Positions 7 to 11 are the five power readings (three phases, neutral and
/// total) and all five are reported in W, so all five are divided by 1000
/// to give kW. Trailing positions (power factors) are ignored.
pub const ENERGY_ELEMENTS: &[Element] = &[
    raw("voltage1"),
    raw("voltage2"),
    raw("voltage3"),
    raw("voltageN"),
    raw("amps1"),
    raw("amps2"),
    raw("amps3"),
    milli("power1"),
    milli("power2"),
    milli("power3"),
    milli("powerN"),
    milli("power"),
];

pub static FIELD_TABLE: &[FieldRule] = &[
    FieldRule { code: "acs", transform: Transform::Labels("AccessState", ACCESS_LABELS) },
    FieldRule { code: "cbl", transform: Transform::Passthrough("cableType", ValueKind::Number) },
    FieldRule { code: "fhz", transform: Transform::Passthrough("frequency", ValueKind::Number) },
    FieldRule { code: "pha", transform: Transform::JsonText("phases") },
    FieldRule { code: "wh", transform: Transform::Passthrough("energyCounterSinceStart", ValueKind::Number) },
    FieldRule { code: "err", transform: Transform::Labels("errorState", ERROR_LABELS) },
    FieldRule { code: "ust", transform: Transform::Labels("cableLock", CABLE_LOCK_LABELS) },
    FieldRule { code: "eto", transform: Transform::Passthrough("energyCounterTotal", ValueKind::Number) },
    FieldRule { code: "cae", transform: Transform::Passthrough("cae", ValueKind::Boolean) },
    FieldRule { code: "cak", transform: Transform::Passthrough("cak", ValueKind::String) },
    FieldRule { code: "lmo", transform: Transform::Labels("mode", MODE_LABELS) },
    FieldRule { code: "car", transform: Transform::Labels("carConnected", CAR_LABELS) },
    FieldRule { code: "alw", transform: Transform::Switch("AllowCharging", ALLOW_SWITCH) },
    FieldRule { code: "nrg", transform: Transform::Exploded(ENERGY_ELEMENTS) },
    FieldRule { code: "amp", transform: Transform::Passthrough("amp", ValueKind::Number) },
    FieldRule { code: "version", transform: Transform::Passthrough("version", ValueKind::String) },
    FieldRule { code: "fwv", transform: Transform::Passthrough("firmware", ValueKind::String) },
    FieldRule { code: "wss", transform: Transform::Passthrough("WifiSSID", ValueKind::String) },
    FieldRule { code: "upd", transform: Transform::NonZeroText("updateAvailable") },
    FieldRule { code: "fna", transform: Transform::Passthrough("hostname", ValueKind::String) },
    FieldRule { code: "ffna", transform: Transform::Passthrough("serial", ValueKind::String) },
    FieldRule { code: "utc", transform: Transform::Passthrough("TimeStamp", ValueKind::String) },
    FieldRule {
        code: "pvopt_averagePGrid",
        transform: Transform::Passthrough("PVUselessPower", ValueKind::Number),
    },
];

/// Look up the rule for a wire code
pub fn lookup(code: &str) -> Option<&'static FieldRule> {
    FIELD_TABLE.iter().find(|rule| rule.code == code)
}

impl FieldRule {
    /// Kind recorded in the registry for this code
    pub fn kind(&self) -> ValueKind {
        match self.transform {
            Transform::Passthrough(_, kind) => kind,
            Transform::JsonText(_) | Transform::Labels(..) => ValueKind::String,
            Transform::Switch(..) | Transform::NonZeroText(_) => ValueKind::Boolean,
            Transform::Exploded(_) => ValueKind::Number,
        }
    }

    /// States this code writes to
    pub fn outputs(&self) -> Vec<FieldSpec> {
        match self.transform {
            Transform::Exploded(elements) => elements
                .iter()
                .map(|e| FieldSpec::state(e.name, ValueKind::Number))
                .collect(),
            Transform::Passthrough(name, _)
            | Transform::JsonText(name)
            | Transform::Labels(name, _)
            | Transform::Switch(name, _)
            | Transform::NonZeroText(name) => vec![FieldSpec::state(name, self.kind())],
        }
    }

    /// Values to write for a raw wire value
    pub fn apply(&self, value: &Value) -> Vec<(&'static str, StateValue)> {
        match self.transform {
            Transform::Passthrough(name, _) => {
                StateValue::from_json(value).map(|v| (name, v)).into_iter().collect()
            }
            Transform::JsonText(name) => vec![(name, StateValue::Text(value.to_string()))],
            Transform::Labels(name, labels) => value
                .as_i64()
                .and_then(|code| labels.iter().find(|(c, _)| *c == code))
                .map(|(_, label)| (name, StateValue::Text((*label).to_string())))
                .into_iter()
                .collect(),
            Transform::Switch(name, flags) => value
                .as_i64()
                .and_then(|code| flags.iter().find(|(c, _)| *c == code))
                .map(|(_, flag)| (name, StateValue::Boolean(*flag)))
                .into_iter()
                .collect(),
            Transform::NonZeroText(name) => {
                vec![(name, StateValue::Boolean(value.as_str() != Some("0")))]
            }
            Transform::Exploded(elements) => {
                let Some(items) = value.as_array() else {
                    return Vec::new();
                };
                elements
                    .iter()
                    .zip(items)
                    .filter_map(|(element, item)| {
                        let reading = item.as_f64()?;
                        let reading = if element.milli { reading / 1000.0 } else { reading };
                        Some((element.name, StateValue::Number(reading)))
                    })
                    .collect()
            }
        }
    }
}

/// Decoder driven by [`FIELD_TABLE`]
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictDecoder;

impl StatusDecoder for StrictDecoder {
    fn decode(
        &self,
        status: &Map<String, Value>,
        registry: &mut FieldRegistry,
        sink: &dyn StateSink,
    ) -> usize {
        let mut handled = 0;

        for (code, value) in status {
            let Some(rule) = lookup(code) else {
                continue;
            };

            if registry.declare(code, rule.kind(), value) {
                debug!("Declaring states for {}", code);
                for spec in rule.outputs() {
                    sink.declare(&spec);
                }
            } else if registry.last_value(code) != Some(value) {
                registry.refresh(code, value);
            } else {
                debug!("{} unchanged", code);
            }

            for (name, state) in rule.apply(value) {
                sink.store(name, state);
            }
            handled += 1;
        }

        handled
    }
}
