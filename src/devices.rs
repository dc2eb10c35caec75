//! Device collection owned by the consumer, and the reducer that applies
//! latency events to it.
use ::time::{format_description::well_known, OffsetDateTime};

use crate::error::{EngineError, EngineResult};
use crate::types::{Device, ProbeEvent};

/// Devices keyed by unique IP. Lookup is a linear scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStore {
    devices: Vec<Device>,
}

impl DeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store, rejecting records with an empty or repeated IP.
    pub fn from_devices(devices: Vec<Device>) -> EngineResult<Self> {
        let mut store = Self::new();
        for d in devices {
            store.insert(d)?;
        }
        Ok(store)
    }

    pub fn insert(&mut self, device: Device) -> EngineResult<()> {
        if device.ip.trim().is_empty() {
            return Err(EngineError::InvalidTarget(device.ip));
        }
        if self.contains(&device.ip) {
            return Err(EngineError::DuplicateIp(device.ip));
        }
        self.devices.push(device);
        Ok(())
    }

    /// Change a device's IP, keeping it unique.
    pub fn update_ip(&mut self, old_ip: &str, new_ip: &str) -> EngineResult<()> {
        if new_ip.trim().is_empty() {
            return Err(EngineError::InvalidTarget(new_ip.to_string()));
        }
        if old_ip != new_ip && self.contains(new_ip) {
            return Err(EngineError::DuplicateIp(new_ip.to_string()));
        }
        match self.get_mut(old_ip) {
            Some(d) => {
                d.ip = new_ip.to_string();
                Ok(())
            }
            None => Err(EngineError::InvalidTarget(old_ip.to_string())),
        }
    }

    pub fn remove(&mut self, ip: &str) -> Option<Device> {
        let idx = self.devices.iter().position(|d| d.ip == ip)?;
        Some(self.devices.remove(idx))
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.get(ip).is_some()
    }

    pub fn get(&self, ip: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.ip == ip)
    }

    fn get_mut(&mut self, ip: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.ip == ip)
    }

    pub fn as_slice(&self) -> &[Device] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Apply one event. Returns `true` if a device record changed.
    ///
    /// Ping reply and loss lines, and bulk results, set the device latency
    /// and stamp the probe time. Informational ping output and events for
    /// IPs no longer in the store are ignored.
    pub fn apply(&mut self, event: &ProbeEvent, now: OffsetDateTime) -> bool {
        let (ip, latency) = match event {
            ProbeEvent::PingLine { ip, sample, .. } => match sample.as_measurement() {
                Some(latency) => (ip, latency),
                None => return false,
            },
            ProbeEvent::BulkResult { ip, latency_ms, .. } => (ip, *latency_ms),
            _ => return false,
        };
        match self.get_mut(ip) {
            Some(d) => {
                d.latency_ms = latency;
                d.last_probe_time = Some(format_timestamp(now));
                true
            }
            None => false,
        }
    }
}

/// RFC 3339 timestamp for `last_probe_time`.
pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
