use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{PhaseConfig, ScanConfig};
use crate::events::Emitter;
use crate::ports::{self, PortSpec};
use crate::probe::{resolve_host, tcp_connect};
use crate::types::{OpenPort, PortResult, ProbeEvent, ScanMode, ScanTotals};

pub const PRIORITY_PHASE: &str = "Priority ports";
pub const SECONDARY_PHASE: &str = "Other ports";
pub const FULL_PHASE: &str = "All ports (1-65535)";

/// Upper bound on concurrent connects in any single phase.
const MAX_PHASE_CONCURRENCY: usize = 5_000;

/// One stage of a port test: its own port list, timeout and pool size.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub ports: Vec<PortSpec>,
    pub timeout: Duration,
    pub concurrency: usize,
}

impl Phase {
    pub fn new(name: impl Into<String>, ports: Vec<PortSpec>, cfg: PhaseConfig) -> Self {
        Self {
            name: name.into(),
            ports,
            timeout: cfg.timeout(),
            concurrency: cfg.concurrency,
        }
    }
}

/// Ordered phases for one port test.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub phases: Vec<Phase>,
}

impl ScanPlan {
    /// Priority ports first, then the secondary list (`Fast`) or every port (`Full`).
    pub fn for_mode(mode: ScanMode, cfg: &ScanConfig) -> Self {
        let priority = Phase::new(PRIORITY_PHASE, ports::priority_ports(), cfg.priority);
        let second = match mode {
            ScanMode::Fast => Phase::new(SECONDARY_PHASE, ports::secondary_ports(), cfg.secondary),
            ScanMode::Full => Phase::new(FULL_PHASE, ports::all_ports(), cfg.full),
        };
        Self {
            phases: vec![priority, second],
        }
    }

    pub fn total_ports(&self) -> u64 {
        self.phases.iter().map(|p| p.ports.len() as u64).sum()
    }
}

/// How a scan ended, with the final counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed {
        totals: ScanTotals,
        open_ports: Vec<OpenPort>,
    },
    Cancelled {
        totals: ScanTotals,
    },
}

impl ScanOutcome {
    pub fn totals(&self) -> ScanTotals {
        match self {
            ScanOutcome::Completed { totals, .. } | ScanOutcome::Cancelled { totals } => *totals,
        }
    }
}

/// Run a port test of `host` in the given mode. See [`scan_with_plan`].
pub async fn scan<E: Emitter>(
    host: &str,
    mode: ScanMode,
    cfg: &ScanConfig,
    cancel: &CancellationToken,
    emit: &E,
) -> ScanOutcome {
    scan_with_plan(host, &ScanPlan::for_mode(mode, cfg), cancel, emit).await
}

/// Execute each phase of `plan` against `host` with TCP connects.
///
/// - Each phase announces itself with a `PortPhase` event, then probes all of
///   its ports through a `Semaphore`-bounded `JoinSet`.
/// - Every completed probe yields a `PortProgress` with totals across phases;
///   open ports additionally yield a `PortResult`.
/// - `cancel` is checked after each completion. Once set, the phase stops,
///   outstanding probes are dropped, no later phase starts and a
///   `PortScanCancelled` event carries the partial totals.
/// - On normal completion `PortScanDone` lists the open ports sorted by port,
///   one entry per port.
/// - `host` is resolved once up front. If that fails every port counts as
///   closed, so the event sequence keeps its usual shape.
pub async fn scan_with_plan<E: Emitter>(
    host: &str,
    plan: &ScanPlan,
    cancel: &CancellationToken,
    emit: &E,
) -> ScanOutcome {
    let addr = resolve_host(host).await;
    if addr.is_none() {
        warn!(host, "could not resolve port test target");
    }
    let host: Arc<str> = Arc::from(host);
    let mut totals = ScanTotals {
        total: plan.total_ports(),
        ..ScanTotals::default()
    };
    let mut open_ports: BTreeMap<u16, String> = BTreeMap::new();

    for phase in &plan.phases {
        let finished = !cancel.is_cancelled()
            && run_phase(&host, addr, phase, &mut totals, &mut open_ports, cancel, emit).await;
        if !finished {
            debug!(host = %host, phase = %phase.name, done = totals.done, "port test cancelled");
            emit.emit(ProbeEvent::PortScanCancelled {
                ip: host.to_string(),
                totals,
            });
            return ScanOutcome::Cancelled { totals };
        }
    }

    let open_ports: Vec<OpenPort> = open_ports
        .into_iter()
        .map(|(port, service)| OpenPort { port, service })
        .collect();
    emit.emit(ProbeEvent::PortScanDone {
        ip: host.to_string(),
        totals,
        open_ports: open_ports.clone(),
    });
    ScanOutcome::Completed { totals, open_ports }
}

/// Returns `false` if the phase was cut short by cancellation.
async fn run_phase<E: Emitter>(
    host: &Arc<str>,
    addr: Option<IpAddr>,
    phase: &Phase,
    totals: &mut ScanTotals,
    open_ports: &mut BTreeMap<u16, String>,
    cancel: &CancellationToken,
    emit: &E,
) -> bool {
    emit.emit(ProbeEvent::PortPhase {
        ip: host.to_string(),
        phase: phase.name.clone(),
    });
    debug!(
        host = %host,
        phase = %phase.name,
        ports = phase.ports.len(),
        concurrency = phase.concurrency,
        "starting scan phase"
    );

    let sem = Arc::new(Semaphore::new(phase.concurrency.clamp(1, MAX_PHASE_CONCURRENCY)));
    let mut set = JoinSet::new();
    for spec in phase.ports.iter().cloned() {
        let sem = sem.clone();
        let timeout = phase.timeout;
        set.spawn(async move {
            // Semaphore is never closed; a missing permit only loses the bound.
            let _permit = sem.acquire_owned().await.ok();
            let is_open = match addr {
                Some(ip) => tcp_connect(SocketAddr::new(ip, spec.port), timeout).await,
                None => false,
            };
            (spec, is_open)
        });
    }

    while let Some(joined) = set.join_next().await {
        if cancel.is_cancelled() {
            set.abort_all();
            return false;
        }

        totals.done += 1;
        match joined {
            Ok((spec, true)) => {
                totals.open += 1;
                open_ports.entry(spec.port).or_insert_with(|| spec.service.clone());
                emit.emit(ProbeEvent::PortResult {
                    ip: host.to_string(),
                    result: PortResult {
                        port: spec.port,
                        service: spec.service,
                        is_open: true,
                        phase: phase.name.clone(),
                    },
                });
            }
            Ok((_, false)) => totals.closed += 1,
            Err(e) => {
                warn!(host = %host, error = %e, "port probe task failed");
                totals.closed += 1;
            }
        }
        emit.emit(ProbeEvent::PortProgress {
            ip: host.to_string(),
            totals: *totals,
        });
    }
    true
}
