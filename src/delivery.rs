//! The single consumer: drains a bounded batch of events per tick, applies
//! them to the device store and forwards them to the presentation sink.
use ::time::OffsetDateTime;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::devices::DeviceStore;
use crate::events::EventReceiver;
use crate::types::{Device, ProbeEvent};

/// Presentation side: renders events and device changes.
pub trait EventSink {
    fn on_event(&mut self, event: &ProbeEvent);

    /// Called once per batch in which at least one device changed.
    fn on_devices_changed(&mut self, _devices: &[Device]) {}
}

/// Record-management side: persists the device list.
pub trait DeviceRepository {
    fn save(&mut self, devices: &[Device]) -> anyhow::Result<()>;
}

/// Repository that keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPersistence;

impl DeviceRepository for NoPersistence {
    fn save(&mut self, _devices: &[Device]) -> anyhow::Result<()> {
        Ok(())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub applied: usize,
    pub devices_changed: bool,
}

pub struct Consumer<S, R> {
    rx: EventReceiver,
    devices: DeviceStore,
    sink: S,
    repo: R,
    max_per_tick: usize,
}

impl<S: EventSink, R: DeviceRepository> Consumer<S, R> {
    pub fn new(
        rx: EventReceiver,
        devices: DeviceStore,
        sink: S,
        repo: R,
        max_per_tick: usize,
    ) -> Self {
        Self {
            rx,
            devices,
            sink,
            repo,
            max_per_tick: max_per_tick.max(1),
        }
    }

    pub fn tick(&mut self) -> TickReport {
        self.tick_at(OffsetDateTime::now_utc())
    }

    /// Apply at most `max_per_tick` queued events in FIFO order. Anything
    /// left waits for the next tick. Saves once if the batch changed devices.
    pub fn tick_at(&mut self, now: OffsetDateTime) -> TickReport {
        let batch = self.rx.drain(self.max_per_tick);
        let mut changed = false;
        for event in &batch {
            if event.touches_devices() {
                changed |= self.devices.apply(event, now);
            }
            self.sink.on_event(event);
        }
        if changed {
            self.sink.on_devices_changed(self.devices.as_slice());
            if let Err(e) = self.repo.save(self.devices.as_slice()) {
                warn!(error = %e, "failed to save devices");
            }
        }
        if !batch.is_empty() {
            trace!(applied = batch.len(), pending = self.rx.len(), "delivery tick");
        }
        TickReport {
            applied: batch.len(),
            devices_changed: changed,
        }
    }

    /// Tick every `interval` until `shutdown` fires, then hand the consumer back.
    pub async fn run(mut self, interval: Duration, shutdown: CancellationToken) -> Self {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
        self
    }

    /// Tick until the queue is empty.
    pub fn flush(&mut self) -> usize {
        let mut ticks = 0;
        while !self.rx.is_empty() {
            self.tick();
            ticks += 1;
        }
        ticks
    }

    pub fn devices(&self) -> &DeviceStore {
        &self.devices
    }

    /// Edit the store between ticks (record-management changes).
    pub fn devices_mut(&mut self) -> &mut DeviceStore {
        &mut self.devices
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}
