//! Control intents accepted from the host
//!
//! Intents are validated here, before anything reaches the signer. The
//! textual form used by the node is one intent per line:
//!
//! ```text
//! power 16          set charging current to 16 A
//! mode eco          set charge mode (default | eco | nexttrip | 3 | 4 | 5)
//! set frc;1         write an integer to an arbitrary charger key
//! ```

use std::str::FromStr;

use crate::error::WattpilotError;
use crate::wattpilot::Command;

/// Charger charge mode (`lmo`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeMode {
    Default,
    Eco,
    NextTrip,
}

impl ChargeMode {
    /// Wire code
    pub fn code(self) -> i64 {
        match self {
            ChargeMode::Default => 3,
            ChargeMode::Eco => 4,
            ChargeMode::NextTrip => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            3 => Some(ChargeMode::Default),
            4 => Some(ChargeMode::Eco),
            5 => Some(ChargeMode::NextTrip),
            _ => None,
        }
    }
}

impl FromStr for ChargeMode {
    type Err = WattpilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();

        match normalized.as_str() {
            "default" => Ok(ChargeMode::Default),
            "eco" => Ok(ChargeMode::Eco),
            "nexttrip" => Ok(ChargeMode::NextTrip),
            code => code
                .parse::<i64>()
                .ok()
                .and_then(ChargeMode::from_code)
                .ok_or_else(|| WattpilotError::InvalidIntent(format!("unknown charge mode {:?}", s))),
        }
    }
}

/// A user-issued control intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlIntent {
    SetPower(u32),
    SetMode(ChargeMode),
    SetRaw { key: String, value: i64 },
}

impl ControlIntent {
    /// Parse a `key;value` payload as written to the `set_state` control state
    pub fn parse_raw(payload: &str) -> Result<Self, WattpilotError> {
        let (key, value) = payload
            .split_once(';')
            .ok_or_else(|| WattpilotError::InvalidIntent(format!("missing ';' in {:?}", payload)))?;

        let key = key.trim();
        if key.is_empty() {
            return Err(WattpilotError::InvalidIntent("empty key".into()));
        }

        let value = value
            .trim()
            .parse::<i64>()
            .map_err(|_| WattpilotError::InvalidIntent(format!("value {:?} is not an integer", value)))?;

        Ok(ControlIntent::SetRaw {
            key: key.to_string(),
            value,
        })
    }

    /// Turn a validated intent into a command
    pub fn into_command(self) -> Command {
        match self {
            ControlIntent::SetPower(amps) => Command::power_limit(amps),
            ControlIntent::SetMode(mode) => Command::charge_mode(mode),
            ControlIntent::SetRaw { key, value } => Command::raw(key, value),
        }
    }
}

impl FromStr for ControlIntent {
    type Err = WattpilotError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (verb, arg) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let arg = arg.trim();

        if arg.is_empty() {
            return Err(WattpilotError::InvalidIntent(format!("missing value in {:?}", line)));
        }

        match verb.to_ascii_lowercase().as_str() {
            "power" => arg
                .parse::<u32>()
                .map(ControlIntent::SetPower)
                .map_err(|_| WattpilotError::InvalidIntent(format!("power {:?} is not a whole number of amps", arg))),
            "mode" => arg.parse().map(ControlIntent::SetMode),
            "set" => ControlIntent::parse_raw(arg),
            other => Err(WattpilotError::InvalidIntent(format!("unknown intent {:?}", other))),
        }
    }
}
