//! Integration test: boots an in-process WebSocket server that plays the
//! charger, connects a real [`WattpilotClient`] and checks the handshake,
//! status mirroring, command signing and reconnect behaviour end to end.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use wattpilot_adapter::{
    AdapterConfig, ChargeMode, ClientHandle, ConnectionState, ControlIntent, FieldSpec,
    MemorySink, StateSink, StateValue, WattpilotClient,
};

// Golden values for password "pw", serial "S1", token1 "A"
const SECRET: &str = "jgpoTzwimG7OaCQm9YwNoPbP/FnYzODU";
const HASH1: &str = "3cb447ce58569b943f673532684c5e4d43e00205efbfb6de906a4a8c0626b1e8";

// ── Mini charger: in-process WS server ──────────────────────────────────

/// Text frame received by the charger, tagged with its connection number
#[derive(Debug)]
struct Received {
    conn: usize,
    text: String,
}

#[derive(Clone, Copy)]
enum Behaviour {
    /// Accept correct proofs and push a status snapshot
    Chatty,
    /// Accept correct proofs, then say nothing
    Silent,
    /// Send `hello`, then nothing at all
    HelloOnly,
}

/// Fake charger endpoint
struct Charger {
    addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    accepted: Arc<AtomicUsize>,
}

fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Boots a fake charger on an ephemeral port. Every text frame it receives
/// is forwarded on the returned channel.
async fn start_charger(behaviour: Behaviour) -> Charger {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        let mut conn = 0;
        while let Ok((stream, _peer)) = listener.accept().await {
            conn += 1;
            let tx = tx.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let (mut sink, mut stream) = ws.split();

                let hello = json!({"type": "hello", "serial": "S1", "version": "38.5"});
                if sink.send(Message::Text(hello.to_string())).await.is_err() {
                    return;
                }
                if !matches!(behaviour, Behaviour::HelloOnly) {
                    let challenge = json!({"type": "authRequired", "token1": "A", "token2": "B"});
                    if sink.send(Message::Text(challenge.to_string())).await.is_err() {
                        return;
                    }
                }

                while let Some(Ok(message)) = stream.next().await {
                    let Message::Text(text) = message else {
                        continue;
                    };
                    let _ = tx.send(Received { conn, text: text.clone() });

                    let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                        continue;
                    };
                    if frame["type"] != "auth" {
                        continue;
                    }

                    let token3 = frame["token3"].as_str().unwrap_or_default();
                    let expected = sha256_hex(&format!("{}B{}", token3, HASH1));
                    if frame["hash"] != expected.as_str() {
                        let reject = json!({"type": "authError", "message": "Wrong password"});
                        let _ = sink.send(Message::Text(reject.to_string())).await;
                        continue;
                    }

                    let _ = sink.send(Message::Text(json!({"type": "authSuccess"}).to_string())).await;
                    if let Behaviour::Chatty = behaviour {
                        let status = json!({
                            "type": "fullStatus",
                            "partial": false,
                            "status": {
                                "acs": 0,
                                "amp": 16,
                                "car": 2,
                                "nrg": [230, 231, 229, 0, 16, 16, 15, 3680, 3700, 3450, 0, 10830, 99, 98, 97, 0]
                            }
                        });
                        let _ = sink.send(Message::Text(status.to_string())).await;
                    }
                }
            });
        }
    });

    Charger {
        addr,
        received: rx,
        accepted,
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn next_text(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("charger received nothing")
        .expect("charger gone")
}

/// Skip frames until a securedMsg arrives
async fn next_secured(rx: &mut mpsc::UnboundedReceiver<Received>) -> (usize, Value) {
    loop {
        let received = next_text(rx).await;
        let frame: Value = serde_json::from_str(&received.text).unwrap();
        if frame["type"] == "securedMsg" {
            return (received.conn, frame);
        }
    }
}

fn assert_signed(envelope: &Value, request_id: u64, key: &str, value: Value) {
    let data = envelope["data"].as_str().unwrap();
    let expected = json!({"type": "setValue", "requestId": request_id, "key": key, "value": value});
    assert_eq!(serde_json::from_str::<Value>(data).unwrap(), expected);
    assert_eq!(envelope["requestId"], format!("{}sm", request_id));

    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(data.as_bytes());
    assert_eq!(envelope["hmac"], hex::encode(mac.finalize().into_bytes()));
}

/// Sink that counts connection-down reports
#[derive(Default)]
struct RecordingSink {
    inner: MemorySink,
    downs: AtomicUsize,
}

impl StateSink for RecordingSink {
    fn declare(&self, spec: &FieldSpec) {
        self.inner.declare(spec);
    }

    fn store(&self, name: &str, value: StateValue) {
        self.inner.store(name, value);
    }

    fn last_value(&self, name: &str) -> Option<StateValue> {
        self.inner.last_value(name)
    }

    fn set_connected(&self, connected: bool) {
        if !connected {
            self.downs.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.set_connected(connected);
    }
}

fn spawn_client(config: AdapterConfig) -> (Arc<MemorySink>, ClientHandle) {
    let sink = Arc::new(MemorySink::new());
    let (client, handle) = WattpilotClient::new(config, sink.clone());
    tokio::spawn(client.run());
    (sink, handle)
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_handshake_status_and_signed_commands() {
    let Charger { addr, received: mut rx, .. } = start_charger(Behaviour::Chatty).await;
    let (sink, handle) = spawn_client(AdapterConfig::direct(addr.to_string(), "pw"));

    let auth = next_text(&mut rx).await;
    let auth: Value = serde_json::from_str(&auth.text).unwrap();
    assert_eq!(auth["type"], "auth");
    let token3 = auth["token3"].as_str().unwrap();
    assert!(token3.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(auth["hash"], sha256_hex(&format!("{}B{}", token3, HASH1)).as_str());

    handle.wait_for_state(ConnectionState::Authenticated).await.unwrap();
    eventually("status snapshot", || sink.last_value("AccessState").is_some()).await;
    assert!(sink.is_connected());
    assert_eq!(sink.last_value("AccessState"), Some(StateValue::Text("Open".into())));
    assert_eq!(sink.last_value("carConnected"), Some(StateValue::Text("charging".into())));
    assert_eq!(sink.last_value("power"), Some(StateValue::Number(10.83)));
    assert_eq!(sink.last_value("voltage1"), Some(StateValue::Number(230.0)));

    handle.send_intent(ControlIntent::SetPower(16)).await.unwrap();
    let (_, first) = next_secured(&mut rx).await;
    assert_signed(&first, 1, "amp", json!(16));

    handle.send_intent(ControlIntent::SetMode(ChargeMode::Eco)).await.unwrap();
    let (_, second) = next_secured(&mut rx).await;
    assert_signed(&second, 2, "lmo", json!(4));

    handle.send_intent("set fup;1".parse().unwrap()).await.unwrap();
    let (_, third) = next_secured(&mut rx).await;
    assert_signed(&third, 3, "fup", json!(1));

    handle.shutdown().await.unwrap();
    let goodbye = next_text(&mut rx).await;
    assert_eq!(goodbye.text, "disconnect");
    assert!(!sink.is_connected());
    assert_eq!(handle.state(), ConnectionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_request_ids_restart_after_reconnect() {
    let Charger { addr, received: mut rx, .. } = start_charger(Behaviour::Chatty).await;
    let (sink, handle) = spawn_client(AdapterConfig::direct(addr.to_string(), "pw"));

    handle.wait_for_state(ConnectionState::Authenticated).await.unwrap();
    handle.send_intent(ControlIntent::SetPower(6)).await.unwrap();
    let (conn, envelope) = next_secured(&mut rx).await;
    assert_eq!(conn, 1);
    assert_signed(&envelope, 1, "amp", json!(6));

    handle.reconnect().await.unwrap();
    loop {
        let received = next_text(&mut rx).await;
        if received.conn == 2 && received.text.contains("\"type\":\"auth\"") {
            break;
        }
    }
    eventually("second session", || {
        handle.state() == ConnectionState::Authenticated && sink.is_connected()
    })
    .await;

    handle.send_intent(ControlIntent::SetPower(10)).await.unwrap();
    let (conn, envelope) = next_secured(&mut rx).await;
    assert_eq!(conn, 2);
    assert_signed(&envelope, 1, "amp", json!(10));
    // Declared once per connection
    assert_eq!(sink.declaration_count("AccessState"), 2);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_password_keeps_socket_open() {
    let Charger { addr, received: mut rx, .. } = start_charger(Behaviour::Chatty).await;
    let (sink, handle) = spawn_client(AdapterConfig::direct(addr.to_string(), "not-the-password"));

    let auth = next_text(&mut rx).await;
    assert!(auth.text.contains("\"type\":\"auth\""));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!sink.is_connected());
    assert_eq!(handle.state(), ConnectionState::AwaitingAuth);
    assert_eq!(handle.sockets().open(), 1);

    handle.send_intent(ControlIntent::SetPower(16)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_never_more_than_one_socket() {
    let charger = start_charger(Behaviour::Silent).await;
    let config = AdapterConfig::direct(charger.addr.to_string(), "pw")
        .with_liveness(Duration::from_millis(50), Duration::from_millis(100));
    let (_sink, handle) = spawn_client(config);

    let storms: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move {
                for _ in 0..5 {
                    let _ = handle.reconnect().await;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
        })
        .collect();
    for storm in storms {
        storm.await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(handle.sockets().peak(), 1);
    assert!(handle.sockets().open() <= 1);

    handle.shutdown().await.unwrap();
    assert_eq!(handle.sockets().open(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_silent_charger_triggers_liveness_reconnect() {
    let charger = start_charger(Behaviour::HelloOnly).await;
    let config = AdapterConfig::direct(charger.addr.to_string(), "pw")
        .with_liveness(Duration::from_millis(100), Duration::from_millis(250));
    let sink = Arc::new(RecordingSink::default());
    let (client, handle) = WattpilotClient::new(config, sink.clone());
    tokio::spawn(client.run());

    eventually("first connection", || charger.accepted.load(Ordering::SeqCst) >= 1).await;
    let downs_before = sink.downs.load(Ordering::SeqCst);

    // No manual reconnect: only the liveness tick may open new sockets
    eventually("liveness reconnects", || charger.accepted.load(Ordering::SeqCst) >= 3).await;

    assert!(sink.downs.load(Ordering::SeqCst) >= downs_before + 2);
    assert!(!sink.inner.is_connected());
    assert_eq!(handle.sockets().peak(), 1);

    handle.shutdown().await.unwrap();
    assert_eq!(handle.sockets().open(), 0);
}
