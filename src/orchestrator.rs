//! The single task slot: at most one probe task runs at a time.
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bulk::bulk_ping;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EventSender;
use crate::probe::{self, LineStream};
use crate::scanner::{self, ScanPlan};
use crate::targets::validate_host;
use crate::types::{Device, ProbeEvent, ScanMode, TaskId, TaskKind, TaskState};

/// What the caller wants to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskRequest {
    Ping { target: String },
    Trace { target: String },
    NsLookup { target: String, server: Option<String> },
    PortTest { target: String, mode: ScanMode },
    Bulk { targets: Vec<String> },
}

impl TaskRequest {
    /// Bulk ping of the given devices, in order.
    pub fn bulk_for(devices: &[Device]) -> Self {
        TaskRequest::Bulk {
            targets: devices.iter().map(|d| d.ip.clone()).collect(),
        }
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            TaskRequest::Ping { .. } => TaskKind::Ping,
            TaskRequest::Trace { .. } => TaskKind::Trace,
            TaskRequest::NsLookup { .. } => TaskKind::NsLookup,
            TaskRequest::PortTest { .. } => TaskKind::PortTest,
            TaskRequest::Bulk { .. } => TaskKind::Bulk,
        }
    }

    fn label(&self) -> String {
        match self {
            TaskRequest::Ping { target }
            | TaskRequest::Trace { target }
            | TaskRequest::NsLookup { target, .. }
            | TaskRequest::PortTest { target, .. } => target.clone(),
            TaskRequest::Bulk { targets } => format!("{} devices", targets.len()),
        }
    }

    /// Trimmed, validated copy of the request.
    fn validated(self) -> EngineResult<Self> {
        Ok(match self {
            TaskRequest::Ping { target } => TaskRequest::Ping {
                target: validate_host(&target)?,
            },
            TaskRequest::Trace { target } => TaskRequest::Trace {
                target: validate_host(&target)?,
            },
            TaskRequest::NsLookup { target, server } => TaskRequest::NsLookup {
                target: validate_host(&target)?,
                server: server
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| validate_host(&s))
                    .transpose()?,
            },
            TaskRequest::PortTest { target, mode } => TaskRequest::PortTest {
                target: validate_host(&target)?,
                mode,
            },
            TaskRequest::Bulk { targets } => {
                if targets.is_empty() {
                    return Err(EngineError::InvalidTarget(String::new()));
                }
                TaskRequest::Bulk {
                    targets: targets
                        .iter()
                        .map(|t| validate_host(t))
                        .collect::<EngineResult<_>>()?,
                }
            }
        })
    }
}

/// Snapshot of the running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub target: String,
    pub state: TaskState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stop signalled; the worker finishes and the slot returns to idle.
    Stopping,
    /// Nothing of that kind is running.
    NotRunning,
    /// The running task has no cancellation path (bulk ping).
    Unsupported,
}

#[derive(Debug, Default)]
struct Slot {
    last_id: TaskId,
    active: Option<(ActiveTask, CancellationToken)>,
}

/// Starts and stops probe tasks, holding the only task slot.
///
/// Clones share the same slot. Transitions are published as
/// `TaskStarted` / `TaskIdle` events, enqueued while the slot lock is held,
/// and mirrored on a `watch` channel.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    slot: Arc<Mutex<Slot>>,
    events: EventSender,
    config: Arc<EngineConfig>,
    state_tx: Arc<watch::Sender<Option<ActiveTask>>>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, events: EventSender) -> Self {
        let (state_tx, _) = watch::channel(None);
        Self {
            slot: Arc::new(Mutex::new(Slot::default())),
            events,
            config: Arc::new(config),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Start a task in the background.
    ///
    /// Fails with `InvalidTarget` before anything runs, or `Busy` while
    /// another task occupies the slot. Requests are never queued.
    pub async fn start(&self, request: TaskRequest) -> EngineResult<TaskId> {
        let request = request.validated()?;
        let (id, cancel) = self.claim(request.kind(), request.label()).await?;

        let this = self.clone();
        self.spawn_worker(id, async move { this.execute(request, cancel).await });
        Ok(id)
    }

    /// Take the slot for a new task and announce it.
    async fn claim(
        &self,
        kind: TaskKind,
        target: String,
    ) -> EngineResult<(TaskId, CancellationToken)> {
        let mut slot = self.slot.lock().await;
        if let Some((running, _)) = &slot.active {
            return Err(EngineError::Busy {
                running: running.kind,
            });
        }
        slot.last_id += 1;
        let id = slot.last_id;
        let cancel = CancellationToken::new();
        let task = ActiveTask {
            id,
            kind,
            target,
            state: TaskState::Running,
        };
        slot.active = Some((task.clone(), cancel.clone()));
        self.events.send(ProbeEvent::TaskStarted {
            id,
            task: kind,
            target: task.target.clone(),
        });
        info!(id, task = %kind, target = %task.target, "task started");
        self.state_tx.send_replace(Some(task));
        Ok((id, cancel))
    }

    /// Run `work` for task `id`; the slot is released even if it panics.
    fn spawn_worker<F>(&self, id: TaskId, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::spawn(work).await {
                error!(id, error = %e, "task worker failed");
            }
            this.release(id).await;
        });
    }

    /// Stop the running task if it is of `kind`.
    pub async fn stop(&self, kind: TaskKind) -> StopOutcome {
        self.stop_matching(Some(kind)).await
    }

    /// Stop whatever is running.
    pub async fn stop_current(&self) -> StopOutcome {
        self.stop_matching(None).await
    }

    async fn stop_matching(&self, kind: Option<TaskKind>) -> StopOutcome {
        let mut slot = self.slot.lock().await;
        let Some((task, cancel)) = slot.active.as_mut() else {
            return StopOutcome::NotRunning;
        };
        if kind.is_some_and(|k| k != task.kind) {
            return StopOutcome::NotRunning;
        }
        if task.kind == TaskKind::Bulk {
            return StopOutcome::Unsupported;
        }
        if task.state != TaskState::Stopping {
            task.state = TaskState::Stopping;
            self.events.send(ProbeEvent::TaskStopping {
                id: task.id,
                task: task.kind,
            });
            self.state_tx.send_replace(Some(task.clone()));
        }
        cancel.cancel();
        info!(id = task.id, task = %task.kind, "stop requested");
        StopOutcome::Stopping
    }

    pub async fn current(&self) -> Option<ActiveTask> {
        self.slot.lock().await.active.as_ref().map(|(t, _)| t.clone())
    }

    pub async fn is_busy(&self) -> bool {
        self.slot.lock().await.active.is_some()
    }

    /// Follow busy/idle transitions.
    pub fn subscribe(&self) -> watch::Receiver<Option<ActiveTask>> {
        self.state_tx.subscribe()
    }

    /// Resolve once no task is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|t| t.is_none()).await;
    }

    async fn release(&self, id: TaskId) {
        let mut slot = self.slot.lock().await;
        // A stale worker must not clear a newer task.
        if !slot.active.as_ref().is_some_and(|(t, _)| t.id == id) {
            return;
        }
        let Some((task, _)) = slot.active.take() else {
            return;
        };
        self.events.send(ProbeEvent::TaskIdle { id, task: task.kind });
        self.state_tx.send_replace(None);
        info!(id, task = %task.kind, "task finished");
    }

    async fn execute(&self, request: TaskRequest, cancel: CancellationToken) {
        let kind = request.kind();
        match request {
            TaskRequest::Ping { target } => {
                let stream = probe::ping_stream(&target, cancel);
                self.relay_stream(kind, &target, stream).await;
            }
            TaskRequest::Trace { target } => {
                let stream = probe::traceroute_stream(&target, cancel);
                self.relay_stream(kind, &target, stream).await;
            }
            TaskRequest::NsLookup { target, server } => {
                let stream = probe::dns_lookup_stream(&target, server.as_deref(), cancel);
                self.relay_stream(kind, &target, stream).await;
            }
            TaskRequest::PortTest { target, mode } => {
                let plan = ScanPlan::for_mode(mode, &self.config.scan);
                self.events.send(ProbeEvent::PortScanStarted {
                    ip: target.clone(),
                    mode,
                    total: plan.total_ports(),
                });
                scanner::scan_with_plan(&target, &plan, &cancel, &self.events).await;
            }
            TaskRequest::Bulk { targets } => {
                bulk_ping(
                    &targets,
                    self.config.bulk_concurrency,
                    self.config.ping_timeout(),
                    &self.events,
                )
                .await;
            }
        }
    }

    /// Forward process output as events until it ends or is stopped.
    async fn relay_stream(&self, kind: TaskKind, target: &str, stream: EngineResult<LineStream>) {
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                warn!(task = %kind, target, error = %e, "probe failed to start");
                self.events.send(ProbeEvent::LaunchFailed {
                    task: kind,
                    target: target.to_string(),
                    message: e.to_string(),
                });
                return;
            }
        };

        while let Some(line) = stream.next_line().await {
            let event = match kind {
                TaskKind::Ping => ProbeEvent::PingLine {
                    ip: target.to_string(),
                    sample: probe::classify_ping_line(&line),
                    line,
                },
                _ => ProbeEvent::OutputLine {
                    task: kind,
                    target: target.to_string(),
                    line,
                },
            };
            self.events.send(event);
        }
        self.events.send(ProbeEvent::StreamDone {
            task: kind,
            target: target.to_string(),
            cancelled: stream.was_cancelled(),
        });
    }
}
