use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::events::Emitter;
use crate::probe::ping_once;
use crate::types::ProbeEvent;

/// Ping every target once through a pool of `concurrency` workers.
///
/// Emits one `BulkResult` per host in completion order (`done` counts up to
/// `total`), then `BulkDone`. Unreachable hosts report `latency_ms: None`.
/// There is no cancellation path. Returns the number of hosts that replied.
pub async fn bulk_ping<E: Emitter>(
    targets: &[String],
    concurrency: usize,
    timeout: Duration,
    emit: &E,
) -> u64 {
    let total = targets.len() as u64;
    let sem = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut set = JoinSet::new();
    for ip in targets.iter().cloned() {
        let sem = sem.clone();
        set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let latency_ms = ping_once(&ip, timeout).await;
            (ip, latency_ms)
        });
    }

    let mut done = 0;
    let mut alive = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((ip, latency_ms)) => {
                done += 1;
                if latency_ms.is_some() {
                    alive += 1;
                }
                emit.emit(ProbeEvent::BulkResult {
                    ip,
                    latency_ms,
                    done,
                    total,
                });
            }
            Err(e) => warn!(error = %e, "bulk ping task failed"),
        }
    }
    emit.emit(ProbeEvent::BulkDone { total });
    alive
}
