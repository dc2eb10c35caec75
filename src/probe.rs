//! Single network operations: one echo, one TCP connect, one streamed command.
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{self, TcpStream};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::types::PingSample;

static LATENCY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)time\s*[=<]\s*([\d.]+)\s*ms").expect("latency regex"));

const LOST_MARKERS: &[&str] = &[
    "request timed out",
    "request timeout",
    "destination host unreachable",
    "destination net unreachable",
    "destination port unreachable",
    "100% packet loss",
    "general failure",
    "transmit failed",
];

/// Extract the round-trip time from one line of ping output.
///
/// Handles `time=14.2 ms`, `time<1ms` and `time=1ms` in any letter case.
pub fn parse_latency(line: &str) -> Option<f64> {
    LATENCY_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Decide whether a ping line is a reply, a lost probe, or just chatter.
pub fn classify_ping_line(line: &str) -> PingSample {
    if let Some(ms) = parse_latency(line) {
        return PingSample::Reply(ms);
    }
    let lower = line.to_lowercase();
    if LOST_MARKERS.iter().any(|m| lower.contains(m)) {
        PingSample::Lost
    } else {
        PingSample::Info
    }
}

/// Program plus arguments for an external probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: &'static str,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub(crate) fn new(program: &'static str, args: &[&str]) -> Self {
        Self {
            program,
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        cmd
    }
}

/// One echo request with a reply deadline.
pub fn single_ping_command(ip: &str, timeout: Duration) -> CommandSpec {
    if cfg!(windows) {
        let ms = timeout.as_millis().max(1).to_string();
        CommandSpec::new("ping", &["-n", "1", "-w", &ms, ip])
    } else if cfg!(target_os = "macos") {
        let ms = timeout.as_millis().max(1).to_string();
        CommandSpec::new("ping", &["-c", "1", "-W", &ms, ip])
    } else {
        let secs = timeout.as_secs_f64().ceil().max(1.0) as u64;
        CommandSpec::new("ping", &["-c", "1", "-W", &secs.to_string(), ip])
    }
}

/// Endless echo until the process is killed.
pub fn continuous_ping_command(ip: &str) -> CommandSpec {
    if cfg!(windows) {
        CommandSpec::new("ping", &["-t", ip])
    } else {
        CommandSpec::new("ping", &[ip])
    }
}

pub fn traceroute_command(ip: &str) -> CommandSpec {
    if cfg!(windows) {
        CommandSpec::new("tracert", &["-d", ip])
    } else {
        CommandSpec::new("traceroute", &[ip])
    }
}

pub fn nslookup_command(target: &str, server: Option<&str>) -> CommandSpec {
    match server {
        Some(s) => CommandSpec::new("nslookup", &[target, s]),
        None => CommandSpec::new("nslookup", &[target]),
    }
}

/// Send one echo and return the round trip in milliseconds.
///
/// Any failure (binary missing, no reply, unparsable output, deadline) is `None`.
pub async fn ping_once(ip: &str, timeout: Duration) -> Option<f64> {
    let mut cmd = single_ping_command(ip, timeout).to_command();
    let deadline = timeout + Duration::from_secs(1);
    let output = match time::timeout(deadline, cmd.output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(e)) => {
            debug!(ip, error = %e, "single ping failed to run");
            return None;
        }
        Err(_) => {
            debug!(ip, "single ping timed out");
            return None;
        }
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    stdout.lines().chain(stderr.lines()).find_map(parse_latency)
}

/// `true` iff a TCP connection to `host:port` completes within `timeout`.
///
/// Name resolution is not charged to `timeout`; an unresolvable host is `false`.
pub async fn tcp_probe(host: &str, port: u16, timeout: Duration) -> bool {
    match resolve_host(host).await {
        Some(ip) => tcp_connect(SocketAddr::new(ip, port), timeout).await,
        None => false,
    }
}

/// Connect to an already resolved address.
pub async fn tcp_connect(addr: SocketAddr, timeout: Duration) -> bool {
    matches!(time::timeout(timeout, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// First address `host` resolves to. IP literals skip the resolver.
pub async fn resolve_host(host: &str) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }
    match net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs.next().map(|a| a.ip()),
        Err(e) => {
            debug!(host, error = %e, "name resolution failed");
            None
        }
    }
}

/// Lazily read output lines of an external command (stdout and stderr merged).
///
/// Cancelling the token kills the process and ends the sequence.
#[derive(Debug)]
pub struct LineStream {
    program: &'static str,
    child: Child,
    lines: mpsc::Receiver<String>,
    cancel: CancellationToken,
    finished: bool,
}

impl LineStream {
    pub fn spawn(spec: &CommandSpec, cancel: CancellationToken) -> EngineResult<Self> {
        let mut child = spec
            .to_command()
            .spawn()
            .map_err(|source| EngineError::ProcessLaunch {
                program: spec.program.to_string(),
                source,
            })?;

        let (tx, rx) = mpsc::channel(256);
        if let Some(out) = child.stdout.take() {
            tokio::spawn(pump_lines(out, tx.clone()));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(pump_lines(err, tx));
        }
        debug!(program = spec.program, args = ?spec.args, "spawned probe process");

        Ok(Self {
            program: spec.program,
            child,
            lines: rx,
            cancel,
            finished: false,
        })
    }

    /// Next output line, or `None` when the process exited or was cancelled.
    pub async fn next_line(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.terminate().await;
                None
            }
            line = self.lines.recv() => match line {
                Some(l) => Some(l),
                None => {
                    self.reap().await;
                    None
                }
            },
        }
    }

    /// Both pipes closed: wait for exit, still honouring `cancel`.
    async fn reap(&mut self) {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => self.terminate().await,
            status = self.child.wait() => {
                if let Err(e) = status {
                    debug!(program = self.program, error = %e, "wait failed");
                }
                self.finished = true;
            }
        }
    }

    /// Kill the underlying process now. Idempotent.
    pub async fn terminate(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.child.kill().await {
            debug!(program = self.program, error = %e, "kill after exit");
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn pump_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "probe output read failed");
                break;
            }
        }
        // Localised tools may print in a non-UTF-8 code page.
        let line = String::from_utf8_lossy(trim_line_end(&buf)).into_owned();
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

fn trim_line_end(mut line: &[u8]) -> &[u8] {
    while let [rest @ .., b'\n' | b'\r'] = line {
        line = rest;
    }
    line
}

/// Continuous echo against `ip` until `cancel` fires. Each call starts a fresh process.
pub fn ping_stream(ip: &str, cancel: CancellationToken) -> EngineResult<LineStream> {
    LineStream::spawn(&continuous_ping_command(ip), cancel)
}

pub fn traceroute_stream(ip: &str, cancel: CancellationToken) -> EngineResult<LineStream> {
    LineStream::spawn(&traceroute_command(ip), cancel)
}

pub fn dns_lookup_stream(
    target: &str,
    server: Option<&str>,
    cancel: CancellationToken,
) -> EngineResult<LineStream> {
    LineStream::spawn(&nslookup_command(target, server), cancel)
}
