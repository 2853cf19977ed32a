//! Wattpilot Node - CLI for the Wattpilot adapter
//!
//! Keeps an authenticated session with one charger, mirrors its status and
//! relays control intents typed on stdin.
//!
//! # Usage
//!
//! ```bash
//! # Charger on the local network
//! wattpilot-node --host 192.168.1.50 --password secret
//!
//! # Through the cloud relay
//! wattpilot-node --cloud-serial 91234567 --password secret
//!
//! # Keep raw field codes, report every 10 s
//! wattpilot-node --host 192.168.1.50 --password secret --dynamic --report-interval 10
//! ```
//!
//! # Intents
//!
//! ```text
//! power 16        set the current limit to 16 A
//! mode eco        switch to Eco charging (default | eco | nexttrip | 3 | 4 | 5)
//! set fup;1       write integer 1 to field code fup
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use wattpilot_adapter::{
    AdapterConfig, ClientHandle, ControlIntent, DecodeMode, MemorySink, StateSink, StateValue,
    WattpilotClient,
};

/// Wattpilot charger session node
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["host", "cloud_serial"])))]
struct Args {
    /// Charger address on the local network (host or host:port)
    #[arg(long)]
    host: Option<String>,

    /// Charger serial number, connects through the cloud relay
    #[arg(long)]
    cloud_serial: Option<String>,

    /// Charger password
    #[arg(short, long)]
    password: String,

    /// Store raw field codes with inferred types instead of the named table
    #[arg(long)]
    dynamic: bool,

    /// Seconds between status reports
    #[arg(long, default_value = "60")]
    report_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging
    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Build configuration
    let config = match (&args.host, &args.cloud_serial) {
        (Some(host), _) => AdapterConfig::direct(host, &args.password),
        (None, Some(serial)) => AdapterConfig::cloud(serial, &args.password),
        (None, None) => return Err("either --host or --cloud-serial is required".into()),
    };
    let decode_mode = if args.dynamic {
        DecodeMode::Dynamic
    } else {
        DecodeMode::Strict
    };
    let report_interval = Duration::from_secs(args.report_interval.max(1));
    let config = config
        .with_decode_mode(decode_mode)
        .with_report_interval(report_interval);

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              Wattpilot Node - Charger Session                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  URL:      {:<50} ║", truncate(&config.url(), 50));
    println!("║  Decoder:  {:<50} ║", format!("{:?}", config.decode_mode));
    println!("║  Report:   {:<50} ║", format!("every {}s", report_interval.as_secs()));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let sink = Arc::new(MemorySink::new());
    let (client, handle) = WattpilotClient::new(config, sink.clone());

    info!("Starting Wattpilot client...");
    let mut client_task = tokio::spawn(client.run());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut report = tokio::time::interval(report_interval);
    report.tick().await;

    loop {
        tokio::select! {
            result = &mut client_task => {
                // Only a rejected configuration ends the client on its own
                result??;
                return Ok(());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }

            _ = report.tick() => print_report(&sink),

            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => relay_intent(&handle, sink.as_ref(), &line).await,
                Ok(None) => {
                    info!("stdin closed, no more intents");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    handle.shutdown().await?;
    client_task.await??;

    Ok(())
}

/// Validate an intent line, record it in its control state and send it
async fn relay_intent(handle: &ClientHandle, sink: &dyn StateSink, line: &str) {
    let intent: ControlIntent = match line.parse() {
        Ok(intent) => intent,
        Err(e) => {
            warn!("Ignoring intent: {}", e);
            return;
        }
    };

    let (state, value) = match &intent {
        ControlIntent::SetPower(amps) => ("set_power", StateValue::Number(f64::from(*amps))),
        ControlIntent::SetMode(mode) => ("set_mode", StateValue::Number(mode.code() as f64)),
        ControlIntent::SetRaw { key, value } => ("set_state", StateValue::Text(format!("{};{}", key, value))),
    };
    sink.store(state, value);

    if let Err(e) = handle.send_intent(intent).await {
        warn!("Client not running: {}", e);
    }
}

fn print_report(sink: &MemorySink) {
    let connected = if sink.is_connected() { "connected" } else { "not connected" };
    println!("── Wattpilot status ({}) ──", connected);
    for (name, value) in sink.snapshot() {
        println!("  {:<28} {}", name, value);
    }
}

/// Truncate string with ellipsis, counting characters
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
