//! Configuration for the Wattpilot adapter
//!
//! The host owns this record; the engine only reads it.

use std::time::Duration;

use crate::error::WattpilotError;

/// Cloud relay base URL
const CLOUD_BASE_URL: &str = "wss://app.wattpilot.io/app";

/// App protocol version announced to the cloud relay
const CLOUD_APP_VERSION: &str = "1.2.9";

/// Placeholder values shipped in the default adapter settings
const PLACEHOLDER_HOST: &str = "ip-host";
const PLACEHOLDER_PASSWORD: &str = "pass";
const PLACEHOLDER_SERIAL: &str = "XXXXXXXX";

/// Where the charger is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Charger on the local network, plain WebSocket
    Direct { host: String },
    /// Charger reached through the cloud relay over TLS
    Cloud { serial: String },
}

impl Target {
    /// WebSocket URL for this target
    pub fn url(&self) -> String {
        match self {
            Target::Direct { host } => format!("ws://{}/ws", host.trim_end_matches('/')),
            Target::Cloud { serial } => {
                format!("{}/{}?version={}", CLOUD_BASE_URL, serial, CLOUD_APP_VERSION)
            }
        }
    }
}

/// Which status decoding strategy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodeMode {
    /// Fixed field-code table with human-readable names
    #[default]
    Strict,
    /// Type inference on every field the charger reports
    Dynamic,
}

/// Complete adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub target: Target,

    /// Charger password (never sent over the wire)
    pub password: String,

    pub decode_mode: DecodeMode,

    /// How often the host reports decoded status
    pub report_interval: Duration,

    /// Liveness check cadence
    pub liveness_interval: Duration,

    /// Silence after which the connection is considered dead
    pub liveness_timeout: Duration,

    /// Bound on TCP + WebSocket upgrade
    pub connect_timeout: Duration,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            target: Target::Direct {
                host: PLACEHOLDER_HOST.to_string(),
            },
            password: PLACEHOLDER_PASSWORD.to_string(),
            decode_mode: DecodeMode::Strict,
            report_interval: Duration::from_secs(60),
            liveness_interval: Duration::from_secs(150),
            liveness_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl AdapterConfig {
    /// Config for a charger on the local network
    pub fn direct(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            target: Target::Direct { host: host.into() },
            password: password.into(),
            ..Default::default()
        }
    }

    /// Config for a charger behind the cloud relay
    pub fn cloud(serial: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            target: Target::Cloud {
                serial: serial.into(),
            },
            password: password.into(),
            ..Default::default()
        }
    }

    /// Set decode strategy
    pub fn with_decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    /// Set status report interval
    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    /// Set liveness cadence and timeout
    pub fn with_liveness(mut self, interval: Duration, timeout: Duration) -> Self {
        self.liveness_interval = interval;
        self.liveness_timeout = timeout;
        self
    }

    /// Set connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// WebSocket URL to connect to
    pub fn url(&self) -> String {
        self.target.url()
    }

    /// Reject empty or placeholder settings before any connect attempt
    pub fn validate(&self) -> Result<(), WattpilotError> {
        match &self.target {
            Target::Direct { host } if host.trim().is_empty() || host == PLACEHOLDER_HOST => {
                return Err(WattpilotError::InvalidConfig(format!("invalid host {:?}", host)));
            }
            Target::Cloud { serial } if serial.trim().is_empty() || serial == PLACEHOLDER_SERIAL => {
                return Err(WattpilotError::InvalidConfig(format!(
                    "invalid serial number {:?}",
                    serial
                )));
            }
            _ => {}
        }

        if self.password.is_empty() || self.password == PLACEHOLDER_PASSWORD {
            return Err(WattpilotError::InvalidConfig("password not set".into()));
        }

        if self.liveness_interval.is_zero() {
            return Err(WattpilotError::InvalidConfig(
                "liveness interval must be non-zero".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_urls() {
        let direct = AdapterConfig::direct("192.168.1.50", "secret");
        assert_eq!(direct.url(), "ws://192.168.1.50/ws");

        let cloud = AdapterConfig::cloud("12345678", "secret");
        assert_eq!(
            cloud.url(),
            "wss://app.wattpilot.io/app/12345678?version=1.2.9"
        );
    }

    #[test]
    fn test_config_builder() {
        let config = AdapterConfig::direct("charger.local", "secret")
            .with_decode_mode(DecodeMode::Dynamic)
            .with_report_interval(Duration::from_secs(5))
            .with_liveness(Duration::from_secs(1), Duration::from_secs(3));

        assert_eq!(config.decode_mode, DecodeMode::Dynamic);
        assert_eq!(config.report_interval, Duration::from_secs(5));
        assert_eq!(config.liveness_timeout, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_placeholders_rejected() {
        assert!(AdapterConfig::default().validate().is_err());
        assert!(AdapterConfig::direct("ip-host", "secret").validate().is_err());
        assert!(AdapterConfig::direct("charger.local", "pass").validate().is_err());
        assert!(AdapterConfig::cloud("XXXXXXXX", "secret").validate().is_err());
        assert!(AdapterConfig::cloud("", "secret").validate().is_err());
    }
}
