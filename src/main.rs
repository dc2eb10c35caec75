use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use lan_probe_rs::config::EngineConfig;
use lan_probe_rs::delivery::{Consumer, DeviceRepository, EventSink};
use lan_probe_rs::devices::DeviceStore;
use lan_probe_rs::events::event_queue;
use lan_probe_rs::orchestrator::{Orchestrator, StopOutcome, TaskRequest};
use lan_probe_rs::targets::expand_targets;
use lan_probe_rs::types::{Device, ProbeEvent, ScanMode};

/// lan-probe-rs: ping, traceroute, nslookup and phased TCP port tests for LAN devices.
#[derive(Debug, Clone, Parser)]
#[command(name = "lan-probe-rs", version, about, long_about = None)]
struct Cli {
    /// Device list (JSON array). Ping and bulk results are written back to it.
    #[arg(long, global = true)]
    devices: Option<PathBuf>,

    /// Engine config (JSON). Missing keys use built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `info` or `lan_probe_rs=debug`. Overridden by RUST_LOG.
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Continuous ping until Ctrl+C.
    Ping { target: String },
    /// Trace the route to a host.
    Trace { target: String },
    /// DNS lookup, optionally against a specific server.
    Lookup {
        target: String,
        #[arg(long)]
        server: Option<String>,
    },
    /// Port test: priority ports, then the curated list or every port.
    Ports {
        target: String,
        /// Sweep all 65535 ports in the second phase.
        #[arg(long, default_value_t = false)]
        full: bool,
    },
    /// Ping many hosts once. Accepts IPs, hostnames and IPv4 CIDRs; defaults
    /// to every device in the device list.
    Bulk { targets: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    let store = match cli.devices.as_deref() {
        Some(path) if path.exists() => DeviceStore::from_devices(load_devices(path)?)
            .with_context(|| format!("invalid device list: {}", path.display()))?,
        _ => DeviceStore::new(),
    };

    let request = build_request(cli.command, &store)?;
    info!(devices = store.len(), "starting {:?}", request.kind());

    let (tx, rx) = event_queue();
    let orchestrator = Orchestrator::new(config.clone(), tx);
    let consumer = Consumer::new(
        rx,
        store,
        ConsoleSink::default(),
        JsonFileRepository { path: cli.devices.clone() },
        config.max_events_per_tick,
    );
    let shutdown = CancellationToken::new();
    let delivery = tokio::spawn(consumer.run(config.tick_interval(), shutdown.clone()));

    orchestrator.start(request).await?;

    let idle = orchestrator.wait_idle();
    tokio::pin!(idle);
    loop {
        tokio::select! {
            _ = &mut idle => break,
            _ = tokio::signal::ctrl_c() => {
                if orchestrator.stop_current().await == StopOutcome::Unsupported {
                    eprintln!("Bulk ping cannot be cancelled; waiting for it to finish...");
                }
            }
        }
    }

    shutdown.cancel();
    let mut consumer = delivery.await.context("delivery loop panicked")?;
    consumer.flush();
    if cli.devices.is_some() {
        print_devices_table(consumer.devices().as_slice());
    }
    Ok(())
}

fn build_request(command: Command, store: &DeviceStore) -> Result<TaskRequest> {
    Ok(match command {
        Command::Ping { target } => TaskRequest::Ping { target },
        Command::Trace { target } => TaskRequest::Trace { target },
        Command::Lookup { target, server } => TaskRequest::NsLookup { target, server },
        Command::Ports { target, full } => TaskRequest::PortTest {
            target,
            mode: if full { ScanMode::Full } else { ScanMode::Fast },
        },
        Command::Bulk { targets } if targets.is_empty() => TaskRequest::bulk_for(store.as_slice()),
        Command::Bulk { targets } => TaskRequest::Bulk {
            targets: expand_targets(&targets)?,
        },
    })
}

fn load_devices(path: &Path) -> Result<Vec<Device>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read device list: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("invalid device JSON: {}", path.display()))
}

/// Writes the device list back as pretty JSON after every changing batch.
struct JsonFileRepository {
    path: Option<PathBuf>,
}

impl DeviceRepository for JsonFileRepository {
    fn save(&mut self, devices: &[Device]) -> Result<()> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, devices)?;
        Ok(())
    }
}

/// Prints events to stdout; progress goes to stderr at 5% steps.
#[derive(Default)]
struct ConsoleSink {
    last_progress_pct: Option<u64>,
}

impl EventSink for ConsoleSink {
    fn on_event(&mut self, event: &ProbeEvent) {
        match event {
            ProbeEvent::TaskStarted { task, target, .. } => {
                println!("--- {task} started: {target} ---")
            }
            ProbeEvent::TaskStopping { task, .. } => println!("--- stopping {task} ---"),
            ProbeEvent::TaskIdle { task, .. } => println!("--- {task} idle ---"),
            ProbeEvent::PingLine { line, .. } | ProbeEvent::OutputLine { line, .. } => {
                println!("{line}")
            }
            ProbeEvent::StreamDone { task, target, cancelled } => {
                let how = if *cancelled { "stopped" } else { "finished" };
                println!("--- {task} {how}: {target} ---");
            }
            ProbeEvent::BulkResult { ip, latency_ms, done, total } => match latency_ms {
                Some(ms) => println!("[{done}/{total}] {ip:<15} {ms:.1} ms"),
                None => println!("[{done}/{total}] {ip:<15} DOWN"),
            },
            ProbeEvent::BulkDone { total } => println!("Bulk ping complete ({total} hosts)"),
            ProbeEvent::PortScanStarted { ip, mode, total } => {
                self.last_progress_pct = None;
                println!("--- Port test started: {ip} ({mode:?}, {total} ports) ---");
            }
            ProbeEvent::PortPhase { phase, .. } => println!("\n>>> {phase} <<<"),
            ProbeEvent::PortResult { result, .. } => {
                println!("{:<5} ({}) -> OPEN", result.port, result.service)
            }
            ProbeEvent::PortProgress { totals, .. } => {
                let pct = if totals.total == 0 { 100 } else { totals.done * 100 / totals.total };
                if self.last_progress_pct.map_or(true, |last| pct >= last + 5) {
                    self.last_progress_pct = Some(pct);
                    eprintln!(
                        "Port test: {}/{} | OPEN: {} CLOSED: {}",
                        totals.done, totals.total, totals.open, totals.closed
                    );
                }
            }
            ProbeEvent::PortScanCancelled { ip, totals } => {
                println!("\n--- Port test stopped: {ip} ---");
                println!(
                    "Progress: {}/{} | OPEN: {} | CLOSED: {}",
                    totals.done, totals.total, totals.open, totals.closed
                );
            }
            ProbeEvent::PortScanDone { ip, totals, open_ports } => {
                println!("\n--- Port test finished: {ip} ---");
                println!(
                    "Total: {} | OPEN: {} | CLOSED: {}",
                    totals.total, totals.open, totals.closed
                );
                println!("\n=== OPEN PORTS ===");
                for p in open_ports {
                    println!("{:<5} ({}) -> OPEN", p.port, p.service);
                }
            }
            ProbeEvent::LaunchFailed { task, message, .. } => {
                eprintln!("{task} could not start: {message}")
            }
        }
    }
}

fn print_devices_table(devices: &[Device]) {
    let mut ip_w = "ip".len();
    let mut name_w = "name".len();
    for d in devices {
        ip_w = ip_w.max(d.ip.len());
        name_w = name_w.max(d.name.chars().count().min(30));
    }
    let lat_w = "latency_ms".len();
    let status_w = "VERY_SLOW".len();

    println!(
        "\n{:<ip_w$}  {:<name_w$}  {:>lat_w$}  {:<status_w$}  last_probe",
        "ip", "name", "latency_ms", "status"
    );
    println!(
        "{:-<ip_w$}  {:-<name_w$}  {:-<lat_w$}  {:-<status_w$}  {:-<10}",
        "", "", "", "", ""
    );
    for d in devices {
        let name: String = d.name.chars().take(30).collect();
        let latency = d.latency_ms.map(|ms| format!("{ms:.1}")).unwrap_or_else(|| "-".into());
        println!(
            "{:<ip_w$}  {:<name_w$}  {:>lat_w$}  {:<status_w$}  {}",
            d.ip,
            name,
            latency,
            d.status().to_string(),
            d.last_probe_time.as_deref().unwrap_or("-"),
        );
    }
}
