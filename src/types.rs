use serde::{Deserialize, Serialize};
use std::fmt;

/// One monitored device record. Descriptive fields come from the record
/// collaborator; `latency_ms` and `last_probe_time` are written by the reducer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Device {
    pub ip: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "latency")]
    pub latency_ms: Option<f64>,
    #[serde(default, rename = "last_ping")]
    pub last_probe_time: Option<String>,
}

impl Device {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ..Self::default()
        }
    }

    pub fn status(&self) -> Status {
        Status::from_latency(self.latency_ms)
    }
}

/// Reachability bucket derived from the last measured latency.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Down,
    Fast,
    Normal,
    Slow,
    VerySlow,
}

impl Status {
    pub fn from_latency(latency_ms: Option<f64>) -> Self {
        match latency_ms {
            None => Status::Down,
            Some(ms) if ms < 50.0 => Status::Fast,
            Some(ms) if ms < 100.0 => Status::Normal,
            Some(ms) if ms < 200.0 => Status::Slow,
            Some(_) => Status::VerySlow,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Down => "DOWN",
            Status::Fast => "FAST",
            Status::Normal => "NORMAL",
            Status::Slow => "SLOW",
            Status::VerySlow => "VERY_SLOW",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Ping,
    Trace,
    NsLookup,
    PortTest,
    Bulk,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Ping => "PING",
            TaskKind::Trace => "TRACE",
            TaskKind::NsLookup => "NSLOOKUP",
            TaskKind::PortTest => "PORTTEST",
            TaskKind::Bulk => "BULK",
        };
        f.write_str(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Idle,
    Running,
    Stopping,
}

/// Port test breadth: curated secondary list, or every TCP port.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    #[default]
    Fast,
    Full,
}

/// Monotonically increasing id handed out per started task.
pub type TaskId = u64;

/// One TCP connect outcome inside a scan phase.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PortResult {
    pub port: u16,
    pub service: String,
    pub is_open: bool,
    pub phase: String,
}

/// Running counters across all phases of one scan.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanTotals {
    pub done: u64,
    pub total: u64,
    pub open: u64,
    pub closed: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OpenPort {
    pub port: u16,
    pub service: String,
}

/// How a single line of ping output reads.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type", content = "ms", rename_all = "snake_case")]
pub enum PingSample {
    Reply(f64),
    Lost,
    Info,
}

impl PingSample {
    /// `Some(latency)` for result lines, `None` for informational output.
    pub fn as_measurement(&self) -> Option<Option<f64>> {
        match self {
            PingSample::Reply(ms) => Some(Some(*ms)),
            PingSample::Lost => Some(None),
            PingSample::Info => None,
        }
    }
}

/// Every message a worker hands to the consumer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeEvent {
    TaskStarted {
        id: TaskId,
        task: TaskKind,
        target: String,
    },
    /// Stop was requested; `TaskIdle` follows once the worker winds down.
    TaskStopping {
        id: TaskId,
        task: TaskKind,
    },
    TaskIdle {
        id: TaskId,
        task: TaskKind,
    },
    PingLine {
        ip: String,
        line: String,
        sample: PingSample,
    },
    /// Raw traceroute / nslookup output.
    OutputLine {
        task: TaskKind,
        target: String,
        line: String,
    },
    StreamDone {
        task: TaskKind,
        target: String,
        cancelled: bool,
    },
    BulkResult {
        ip: String,
        latency_ms: Option<f64>,
        done: u64,
        total: u64,
    },
    BulkDone {
        total: u64,
    },
    PortScanStarted {
        ip: String,
        mode: ScanMode,
        total: u64,
    },
    PortPhase {
        ip: String,
        phase: String,
    },
    PortResult {
        ip: String,
        result: PortResult,
    },
    PortProgress {
        ip: String,
        totals: ScanTotals,
    },
    PortScanCancelled {
        ip: String,
        totals: ScanTotals,
    },
    PortScanDone {
        ip: String,
        totals: ScanTotals,
        open_ports: Vec<OpenPort>,
    },
    LaunchFailed {
        task: TaskKind,
        target: String,
        message: String,
    },
}

impl ProbeEvent {
    /// Events whose application may change device latency.
    pub fn touches_devices(&self) -> bool {
        matches!(
            self,
            ProbeEvent::PingLine { .. } | ProbeEvent::BulkResult { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_boundaries() {
        assert_eq!(Status::from_latency(None), Status::Down);
        assert_eq!(Status::from_latency(Some(0.0)), Status::Fast);
        assert_eq!(Status::from_latency(Some(49.9)), Status::Fast);
        assert_eq!(Status::from_latency(Some(50.0)), Status::Normal);
        assert_eq!(Status::from_latency(Some(99.9)), Status::Normal);
        assert_eq!(Status::from_latency(Some(100.0)), Status::Slow);
        assert_eq!(Status::from_latency(Some(199.9)), Status::Slow);
        assert_eq!(Status::from_latency(Some(200.0)), Status::VerySlow);
        assert_eq!(Status::from_latency(Some(5000.0)), Status::VerySlow);
    }

    #[test]
    fn device_status_follows_latency() {
        let mut d = Device::new("10.0.0.5");
        assert_eq!(d.status(), Status::Down);
        d.latency_ms = Some(120.0);
        assert_eq!(d.status(), Status::Slow);
    }

    #[test]
    fn device_json_accepts_partial_records() {
        let d: Device = serde_json::from_str(r#"{"ip":"192.168.1.10","name":"core-sw"}"#).unwrap();
        assert_eq!(d.ip, "192.168.1.10");
        assert_eq!(d.name, "core-sw");
        assert!(d.latency_ms.is_none());
    }

    #[test]
    fn events_are_tagged_by_kind() {
        let ev = ProbeEvent::BulkDone { total: 3 };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["kind"], "bulk_done");
        assert_eq!(v["total"], 3);
    }
}
