//! Wattpilot protocol implementation
//!
//! - `messages`: JSON framing
//! - `auth`: session secret derivation and handshake proof
//! - `signer`: command signing
//! - `session`: per-socket connection state machine
//! - `client`: socket supervisor with liveness-driven reconnect

pub mod auth;
pub mod client;
pub mod messages;
pub mod session;
pub mod signer;

pub use auth::{AuthChallenge, SessionSecret};
pub use client::{ClientHandle, SocketGauge, WattpilotClient};
pub use messages::{AuthReply, Frame, FrameType, SecuredMsg, SetValue};
pub use session::{Connection, ConnectionState, SessionEvent};
pub use signer::{Command, CommandKind, RequestCounter};
