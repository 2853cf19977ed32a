//! Wattpilot WebSocket client
//!
//! Supervises the single socket to the charger:
//! - opens it with a bounded connect timeout
//! - feeds frames to the [`Connection`] state machine in arrival order
//! - derives the session secret off the runtime threads
//! - signs and sends control intents
//! - reconnects when the charger has been silent for too long
//!
//! Everything runs in one task that owns the socket, so writes are
//! serialized and at most one socket is ever open.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::auth::{generate_token3, spawn_derivation, AuthChallenge, SessionSecret};
use super::messages::DISCONNECT_FRAME;
use super::session::{Connection, ConnectionState, SessionEvent};
use crate::config::AdapterConfig;
use crate::error::WattpilotError;
use crate::intents::ControlIntent;
use crate::sink::{control_fields, StateSink};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Requests from the host to the supervisor task
#[derive(Debug)]
enum Control {
    Intent(ControlIntent),
    Reconnect,
    Shutdown(oneshot::Sender<()>),
}

/// Counts open sockets and remembers the peak
#[derive(Debug, Default)]
pub struct SocketGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
}

impl SocketGauge {
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn acquire(self: &Arc<Self>) -> SocketGuard {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        SocketGuard(self.clone())
    }
}

struct SocketGuard(Arc<SocketGauge>);

impl Drop for SocketGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Secret derivation running for the current socket
struct PendingAuth {
    challenge: AuthChallenge,
    task: JoinHandle<SessionSecret>,
}

/// An open socket and the state scoped to it
struct Link {
    writer: SplitSink<WsStream, Message>,
    reader: SplitStream<WsStream>,
    connection: Connection,
    pending: Option<PendingAuth>,
    _guard: SocketGuard,
}

enum LinkEvent {
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Derived(Result<SessionSecret, JoinError>),
}

/// Next thing that happens on the current socket.
///
/// While a derivation is pending the socket is not read, so frames keep
/// their order relative to the handshake.
async fn next_event(link: &mut Option<Link>) -> LinkEvent {
    let Some(active) = link.as_mut() else {
        return std::future::pending().await;
    };

    match active.pending.as_mut() {
        Some(pending) => LinkEvent::Derived((&mut pending.task).await),
        None => LinkEvent::Frame(active.reader.next().await),
    }
}

/// Host-side handle to a running client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    control_tx: mpsc::Sender<Control>,
    state_rx: watch::Receiver<ConnectionState>,
    gauge: Arc<SocketGauge>,
}

impl ClientHandle {
    /// Queue a control intent for signing and sending
    pub async fn send_intent(&self, intent: ControlIntent) -> Result<(), WattpilotError> {
        self.control(Control::Intent(intent)).await
    }

    /// Drop the current socket and open a new one
    pub async fn reconnect(&self) -> Result<(), WattpilotError> {
        self.control(Control::Reconnect).await
    }

    /// Close the socket and stop the client; waits for teardown
    pub async fn shutdown(&self) -> Result<(), WattpilotError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control(Control::Shutdown(ack_tx)).await?;
        ack_rx.await.map_err(|_| WattpilotError::ConnectionClosed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Wait until the client reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), WattpilotError> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| WattpilotError::ConnectionClosed)
    }

    pub fn sockets(&self) -> &SocketGauge {
        &self.gauge
    }

    async fn control(&self, control: Control) -> Result<(), WattpilotError> {
        self.control_tx
            .send(control)
            .await
            .map_err(|_| WattpilotError::ConnectionClosed)
    }
}

/// Wattpilot connection supervisor
pub struct WattpilotClient {
    config: AdapterConfig,
    sink: Arc<dyn StateSink>,
    control_rx: mpsc::Receiver<Control>,
    state_tx: watch::Sender<ConnectionState>,
    gauge: Arc<SocketGauge>,
    connections: u64,
}

impl WattpilotClient {
    /// Create a client and the handle used to drive it
    pub fn new(config: AdapterConfig, sink: Arc<dyn StateSink>) -> (Self, ClientHandle) {
        let (control_tx, control_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let gauge = Arc::new(SocketGauge::default());

        let handle = ClientHandle {
            control_tx,
            state_rx,
            gauge: gauge.clone(),
        };

        let client = Self {
            config,
            sink,
            control_rx,
            state_tx,
            gauge,
            connections: 0,
        };

        (client, handle)
    }

    /// Run until shutdown. Only a configuration error ends it early.
    pub async fn run(mut self) -> Result<(), WattpilotError> {
        if let Err(e) = self.config.validate() {
            error!("Please use a valid host and password: {}", e);
            return Err(e);
        }

        for spec in control_fields() {
            self.sink.declare(&spec);
        }
        self.sink.set_connected(false);

        let period = self.config.liveness_interval;
        let mut liveness = interval_at(Instant::now() + period, period);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut link = self.connect(None).await;

        loop {
            tokio::select! {
                control = self.control_rx.recv() => match control {
                    Some(Control::Intent(intent)) => self.dispatch_intent(&mut link, intent).await,
                    Some(Control::Reconnect) => {
                        info!("Reconnect requested");
                        link = self.connect(link.take()).await;
                    }
                    Some(Control::Shutdown(ack)) => {
                        self.shutdown(link.take()).await;
                        let _ = ack.send(());
                        return Ok(());
                    }
                    None => {
                        self.shutdown(link.take()).await;
                        return Ok(());
                    }
                },

                _ = liveness.tick() => {
                    match link.as_ref().map(|active| active.connection.last_traffic().elapsed()) {
                        Some(silent) if silent < self.config.liveness_timeout => {}
                        Some(silent) => {
                            warn!("No traffic for {:?}, reconnecting", silent);
                            self.sink.set_connected(false);
                            link = self.connect(link.take()).await;
                        }
                        None => {
                            info!("Not connected, retrying");
                            link = self.connect(None).await;
                        }
                    }
                }

                event = next_event(&mut link) => match event {
                    LinkEvent::Frame(Some(Ok(message))) => self.handle_message(&mut link, message).await,
                    LinkEvent::Frame(Some(Err(e))) => {
                        warn!("WebSocket error: {}", e);
                        self.drop_link(&mut link);
                    }
                    LinkEvent::Frame(None) => {
                        info!("WebSocket stream ended");
                        self.drop_link(&mut link);
                    }
                    LinkEvent::Derived(result) => self.finish_auth(&mut link, result).await,
                },
            }
        }
    }

    fn publish(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Tear down `previous` (if any), then open a fresh socket
    async fn connect(&mut self, previous: Option<Link>) -> Option<Link> {
        if let Some(old) = previous {
            self.teardown(old, false).await;
        }

        self.connections += 1;
        let mut connection = Connection::new(self.connections, &self.config, self.sink.clone());
        self.publish(connection.state());

        let url = self.config.url();
        info!("Connecting to {}", url);

        let result = tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str())).await;
        let ws_stream = match result {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                warn!("WebSocket connection failed: {}", WattpilotError::from(e));
                connection.handle_event(SessionEvent::TransportFailed);
                self.publish(connection.state());
                return None;
            }
            Err(_) => {
                warn!("{}", WattpilotError::ConnectTimeout);
                connection.handle_event(SessionEvent::TransportFailed);
                self.publish(connection.state());
                return None;
            }
        };

        let guard = self.gauge.acquire();
        connection.handle_event(SessionEvent::Opened);
        self.publish(connection.state());

        let (writer, reader) = ws_stream.split();
        Some(Link {
            writer,
            reader,
            connection,
            pending: None,
            _guard: guard,
        })
    }

    /// Close a socket deliberately
    async fn teardown(&self, mut link: Link, goodbye: bool) {
        link.connection.handle_event(SessionEvent::Closing);
        self.publish(link.connection.state());

        if let Some(pending) = link.pending.take() {
            pending.task.abort();
        }

        let timeout = self.config.connect_timeout;
        let close = async {
            if goodbye {
                link.writer.send(Message::Text(DISCONNECT_FRAME.to_string())).await?;
            }
            link.writer.close().await
        };
        match tokio::time::timeout(timeout, close).await {
            Ok(Ok(())) => debug!("Socket closed cleanly"),
            Ok(Err(e)) => debug!("Error while closing socket: {}", e),
            Err(_) => debug!("Timed out closing socket"),
        }

        link.connection.handle_event(SessionEvent::Closed);
        self.publish(link.connection.state());
    }

    /// Forget a socket that already failed
    fn drop_link(&self, link: &mut Option<Link>) {
        if let Some(mut dead) = link.take() {
            if let Some(pending) = dead.pending.take() {
                pending.task.abort();
            }
            dead.connection.handle_event(SessionEvent::TransportFailed);
            self.publish(dead.connection.state());
        }
    }

    async fn shutdown(&self, link: Option<Link>) {
        info!("Shutting down Wattpilot client");
        if let Some(active) = link {
            self.teardown(active, true).await;
        }
        self.sink.set_connected(false);
        self.publish(ConnectionState::Disconnected);
    }

    async fn handle_message(&self, link: &mut Option<Link>, message: Message) {
        let Some(active) = link.as_mut() else {
            return;
        };

        active.connection.touch();
        match message {
            Message::Text(text) => {
                debug!("Received: {}", text);
                if let Some(challenge) = active.connection.on_frame(&text) {
                    let task = spawn_derivation(self.config.password.clone(), challenge.serial.clone());
                    active.pending = Some(PendingAuth { challenge, task });
                }
                self.publish(active.connection.state());
            }
            Message::Binary(data) => {
                warn!("Dropping {} byte binary frame", data.len());
            }
            Message::Close(frame) => {
                info!("WebSocket closed by charger: {:?}", frame);
                self.drop_link(link);
            }
            // Ping/pong handled by tungstenite
            _ => {}
        }
    }

    async fn finish_auth(&self, link: &mut Option<Link>, result: Result<SessionSecret, JoinError>) {
        let Some(active) = link.as_mut() else {
            return;
        };
        let Some(pending) = active.pending.take() else {
            return;
        };

        let secret = match result {
            Ok(secret) => secret,
            Err(e) => {
                error!("{}", WattpilotError::Derivation(e.to_string()));
                return;
            }
        };

        let reply = active
            .connection
            .authenticate(&pending.challenge, secret, generate_token3());
        self.publish(active.connection.state());

        let sent = match reply.to_text() {
            Ok(text) => active.writer.send(Message::Text(text)).await.map_err(WattpilotError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Failed to send auth reply: {}", e);
            self.drop_link(link);
        }
    }

    async fn dispatch_intent(&self, link: &mut Option<Link>, intent: ControlIntent) {
        let command = intent.into_command();
        let Some(active) = link.as_mut() else {
            warn!("Not connected, dropping {} command", command.key);
            return;
        };

        let envelope = match active.connection.sign(&command) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!("Refusing to send {} command: {}", command.key, e);
                return;
            }
        };

        let sent = match envelope.to_text() {
            Ok(text) => {
                debug!("Sending securedMsg {} ({}={})", envelope.request_id, command.key, command.value);
                active.writer.send(Message::Text(text)).await.map_err(WattpilotError::from)
            }
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Failed to send command: {}", e);
            self.drop_link(link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_socket_gauge_tracks_peak() {
        let gauge = Arc::new(SocketGauge::default());

        let first = gauge.acquire();
        let second = gauge.acquire();
        assert_eq!(gauge.open(), 2);
        drop(first);
        drop(second);

        let _third = gauge.acquire();
        assert_eq!(gauge.open(), 1);
        assert_eq!(gauge.peak(), 2);
    }

    #[tokio::test]
    async fn test_placeholder_config_is_rejected() {
        let sink = Arc::new(MemorySink::new());
        let (client, handle) = WattpilotClient::new(AdapterConfig::default(), sink.clone());

        assert!(matches!(client.run().await, Err(WattpilotError::InvalidConfig(_))));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
        assert!(sink.declared_names().is_empty());
    }

    #[tokio::test]
    async fn test_handle_fails_after_client_stops() {
        let sink = Arc::new(MemorySink::new());
        let (client, handle) = WattpilotClient::new(AdapterConfig::default(), sink);
        drop(client);

        assert_err!(handle.reconnect().await);
        assert_err!(handle.shutdown().await);
    }

    #[tokio::test]
    async fn test_unreachable_charger_stays_disconnected() {
        let sink = Arc::new(MemorySink::new());
        let config = AdapterConfig::direct("127.0.0.1:1", "pw")
            .with_connect_timeout(std::time::Duration::from_millis(200));
        let (client, handle) = WattpilotClient::new(config, sink.clone());
        let task = tokio::spawn(client.run());

        assert_ok!(handle.send_intent(ControlIntent::SetPower(16)).await);
        assert_ok!(handle.shutdown().await);
        assert_ok!(task.await.unwrap());

        assert_eq!(handle.sockets().peak(), 0);
        assert!(!sink.is_connected());
        assert_eq!(sink.declaration_count("set_power"), 1);
    }
}
