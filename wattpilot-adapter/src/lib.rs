//! # Wattpilot Adapter
//!
//! Client for the Fronius Wattpilot charger WebSocket protocol.
//!
//! The adapter logs in with the charger password, mirrors every status
//! field the charger pushes into a [`StateSink`], and turns control
//! intents (power limit, charge mode, raw key/value) into signed
//! `securedMsg` commands.
//!
//! ## Architecture
//!
//! ```text
//! Wattpilot charger (or app.wattpilot.io)
//!       │ WebSocket JSON
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │    wattpilot-adapter                    │
//! │  ┌───────────┐  ┌────────────────────┐  │
//! │  │ Client    │─►│ Connection         │  │
//! │  │ liveness  │  │ handshake │ signer │  │
//! │  └───────────┘  └─────────┬──────────┘  │
//! │                           ▼             │
//! │                 ┌────────────────────┐  │
//! │                 │ Strict │ Dynamic   │  │
//! │                 │ status decoders    │  │
//! │                 └─────────┬──────────┘  │
//! └───────────────────────────┼─────────────┘
//!                             ▼
//!                         StateSink
//! ```
//!
//! ## Handshake
//!
//! | Charger sends | Client answers |
//! |---------------|----------------|
//! | `hello {serial}` | remembers the serial |
//! | `authRequired {token1, token2}` | derives the secret, sends `auth {token3, hash}` |
//! | `authSuccess` | marks the sink connected |
//! | `authError` | marks the sink disconnected, logs the error |
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use wattpilot_adapter::{AdapterConfig, ControlIntent, MemorySink, WattpilotClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AdapterConfig::direct("192.168.1.50", "charger-password");
//!     let sink = Arc::new(MemorySink::new());
//!
//!     let (client, handle) = WattpilotClient::new(config, sink.clone());
//!     tokio::spawn(client.run());
//!
//!     handle.send_intent(ControlIntent::SetPower(16)).await?;
//!     handle.shutdown().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decode;
pub mod error;
pub mod intents;
pub mod sink;
pub mod wattpilot;

pub use config::{AdapterConfig, DecodeMode, Target};
pub use error::WattpilotError;
pub use intents::{ChargeMode, ControlIntent};
pub use sink::{FieldSpec, MemorySink, StateSink, StateValue, ValueKind};

// Re-export key types
pub use wattpilot::{
    ClientHandle, Command, Connection, ConnectionState, SessionEvent, SessionSecret,
    WattpilotClient,
};
