//! Connection state machine
//!
//! One [`Connection`] exists per socket and owns everything scoped to it:
//! lifecycle state, charger serial, session secret, request counter and
//! field registry. It is driven by synthetic or real text frames and never
//! touches the socket itself, so it can be tested without one.
//!
//! ```text
//! Disconnected → Connecting → AwaitingHello → AwaitingAuth → Authenticated
//!       ▲                                                         │
//!       └──────────────────────── Closing ◄───────────────────────┘
//! ```

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::auth::{auth_reply, AuthChallenge, SessionSecret};
use super::messages::{AuthReply, Frame, FrameType, SecuredMsg};
use super::signer::{sign, Command, RequestCounter};
use crate::config::AdapterConfig;
use crate::decode::{decoder_for, FieldRegistry, StatusDecoder};
use crate::error::WattpilotError;
use crate::sink::StateSink;

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Socket being opened
    Connecting,
    /// Socket open, waiting for `hello` and `authRequired`
    AwaitingHello,
    /// `auth` sent, waiting for the verdict
    AwaitingAuth,
    /// Commands may be signed
    Authenticated,
    /// Teardown in progress
    Closing,
}

/// Events that drive the state machine
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Socket opened
    Opened,
    /// `auth` reply sent
    AuthSent,
    /// `authSuccess` received
    AuthAccepted,
    /// `authError` received
    AuthRejected,
    /// Socket failed or timed out
    TransportFailed,
    /// Deliberate teardown started
    Closing,
    /// Socket gone
    Closed,
}

/// State for one socket's lifetime
pub struct Connection {
    id: u64,
    url: String,
    state: ConnectionState,
    serial: Option<String>,
    secret: Option<SessionSecret>,
    counter: RequestCounter,
    registry: FieldRegistry,
    decoder: Box<dyn StatusDecoder>,
    sink: Arc<dyn StateSink>,
    last_traffic: Instant,
}

impl Connection {
    /// A connection about to open its socket
    pub fn new(id: u64, config: &AdapterConfig, sink: Arc<dyn StateSink>) -> Self {
        Self {
            id,
            url: config.url(),
            state: ConnectionState::Connecting,
            serial: None,
            secret: None,
            counter: RequestCounter::new(),
            registry: FieldRegistry::new(),
            decoder: decoder_for(config.decode_mode),
            sink,
            last_traffic: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.registry
    }

    /// Last request id issued on this connection
    pub fn last_request_id(&self) -> u64 {
        self.counter.last()
    }

    /// When the charger was last heard from on this socket
    pub fn last_traffic(&self) -> Instant {
        self.last_traffic
    }

    /// Record traffic that carries no frame (ping, pong, binary)
    pub fn touch(&mut self) {
        self.last_traffic = Instant::now();
    }

    /// Apply a lifecycle event
    pub fn handle_event(&mut self, event: SessionEvent) {
        debug!("Connection {} event: {:?}", self.id, event);

        match event {
            SessionEvent::Opened => {
                self.state = ConnectionState::AwaitingHello;
                self.last_traffic = Instant::now();
                info!("Socket open to {}, waiting for hello", self.url);
            }

            SessionEvent::AuthSent => {
                self.state = ConnectionState::AwaitingAuth;
            }

            SessionEvent::AuthAccepted => {
                self.state = ConnectionState::Authenticated;
                self.sink.set_connected(true);
                info!("Connected to charger {}", self.serial.as_deref().unwrap_or("?"));
            }

            SessionEvent::AuthRejected => {
                // Socket stays open; the charger decides when to drop it.
                self.state = ConnectionState::AwaitingAuth;
                self.secret = None;
                self.sink.set_connected(false);
                error!("Authentication rejected by charger, check the password");
            }

            SessionEvent::TransportFailed => {
                self.discard();
                warn!("Connection {} to {} failed, will retry", self.id, self.url);
            }

            SessionEvent::Closing => {
                self.state = ConnectionState::Closing;
            }

            SessionEvent::Closed => {
                self.discard();
                info!("Connection {} closed", self.id);
            }
        }
    }

    fn discard(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.secret = None;
        self.sink.set_connected(false);
    }

    /// Handle one text frame.
    ///
    /// Returns the challenge to answer when the frame is `authRequired`.
    /// Malformed frames are logged and dropped.
    pub fn on_frame(&mut self, text: &str) -> Option<AuthChallenge> {
        self.last_traffic = Instant::now();

        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed frame: {}", e);
                return None;
            }
        };

        let challenge = match frame.frame_type {
            FrameType::Hello => {
                match frame.require_str("serial") {
                    Ok(serial) => {
                        debug!("Hello from charger {}", serial);
                        self.serial = Some(serial.to_string());
                    }
                    Err(e) => warn!("{}", e),
                }
                None
            }
            FrameType::AuthRequired => self.challenge(&frame),
            FrameType::AuthSuccess => {
                self.handle_event(SessionEvent::AuthAccepted);
                None
            }
            FrameType::AuthError => {
                self.handle_event(SessionEvent::AuthRejected);
                None
            }
            FrameType::Response => {
                let request_id = frame.body.get("requestId").unwrap_or(&Value::Null);
                let success = frame.body.get("success").unwrap_or(&Value::Null);
                info!("Charger acknowledged {} (success: {})", request_id, success);
                None
            }
            FrameType::FullStatus | FrameType::DeltaStatus => None,
            FrameType::Other(ref other) => {
                debug!("Ignoring {:?} frame", other);
                None
            }
        };

        if let Some(status) = frame.status() {
            self.decode(status);
        }

        challenge
    }

    fn challenge(&self, frame: &Frame) -> Option<AuthChallenge> {
        let Some(serial) = self.serial.clone() else {
            warn!("authRequired before hello, cannot derive secret");
            return None;
        };

        match (frame.require_str("token1"), frame.require_str("token2")) {
            (Ok(token1), Ok(token2)) => Some(AuthChallenge {
                serial,
                token1: token1.to_string(),
                token2: token2.to_string(),
            }),
            (Err(e), _) | (_, Err(e)) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn decode(&mut self, status: &Map<String, Value>) {
        let handled = self.decoder.decode(status, &mut self.registry, self.sink.as_ref());
        debug!("Decoded {} of {} status fields", handled, status.len());
    }

    /// Answer a challenge with a freshly derived secret
    pub fn authenticate(
        &mut self,
        challenge: &AuthChallenge,
        secret: SessionSecret,
        token3: String,
    ) -> AuthReply {
        let reply = auth_reply(&challenge.token1, &challenge.token2, token3, &secret);
        self.secret = Some(secret);
        self.handle_event(SessionEvent::AuthSent);
        reply
    }

    /// Sign a command with the next request id.
    ///
    /// Fails with [`WattpilotError::NoActiveSecret`] unless authenticated.
    pub fn sign(&mut self, command: &Command) -> Result<SecuredMsg, WattpilotError> {
        let secret = match (self.state, self.secret.as_ref()) {
            (ConnectionState::Authenticated, Some(secret)) => secret,
            _ => return Err(WattpilotError::NoActiveSecret),
        };

        let envelope = sign(command, secret, self.counter.last() + 1)?;
        self.counter.next_id();
        Ok(envelope)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("serial", &self.serial)
            .field("fields", &self.registry.len())
            .finish()
    }
}
