//! Command signing
//!
//! Outbound commands are serialized to canonical JSON, authenticated with
//! HMAC-SHA256 keyed by the session secret, and wrapped in a `securedMsg`
//! envelope whose request id increases by one per command.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use super::auth::SessionSecret;
use super::messages::{SecuredMsg, SetValue};
use crate::error::WattpilotError;
use crate::intents::ChargeMode;

type HmacSha256 = Hmac<Sha256>;

/// Charger key written by a power limit command
pub const POWER_LIMIT_KEY: &str = "amp";

/// Charger key written by a charge mode command
pub const CHARGE_MODE_KEY: &str = "lmo";

/// What a command is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    PowerLimit,
    ChargeMode,
    RawKeyValue,
}

/// A user intent ready to be signed
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    pub key: String,
    pub value: Value,
}

impl Command {
    /// Set charging current in amps
    pub fn power_limit(amps: u32) -> Self {
        Self {
            kind: CommandKind::PowerLimit,
            key: POWER_LIMIT_KEY.to_string(),
            value: Value::from(amps),
        }
    }

    /// Set the charge mode
    pub fn charge_mode(mode: ChargeMode) -> Self {
        Self {
            kind: CommandKind::ChargeMode,
            key: CHARGE_MODE_KEY.to_string(),
            value: Value::from(mode.code()),
        }
    }

    /// Write an arbitrary integer-valued key
    pub fn raw(key: impl Into<String>, value: i64) -> Self {
        Self {
            kind: CommandKind::RawKeyValue,
            key: key.into(),
            value: Value::from(value),
        }
    }
}

/// Per-connection request id source. Starts at 0; the first id issued is 1.
#[derive(Debug, Default)]
pub struct RequestCounter {
    last: u64,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the next request id
    pub fn next_id(&mut self) -> u64 {
        self.last += 1;
        self.last
    }

    /// Last id handed out (0 when none yet)
    pub fn last(&self) -> u64 {
        self.last
    }
}

/// Sign a command into a `securedMsg` envelope
pub fn sign(
    command: &Command,
    secret: &SessionSecret,
    request_id: u64,
) -> Result<SecuredMsg, WattpilotError> {
    let data = SetValue::new(request_id, command.key.clone(), command.value.clone()).to_canonical()?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| WattpilotError::Derivation(e.to_string()))?;
    mac.update(data.as_bytes());
    let hmac = hex::encode(mac.finalize().into_bytes());

    Ok(SecuredMsg::new(data, request_id, hmac))
}
