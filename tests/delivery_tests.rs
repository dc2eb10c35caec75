use lan_probe_rs::delivery::{Consumer, DeviceRepository, EventSink};
use lan_probe_rs::devices::DeviceStore;
use lan_probe_rs::events::event_queue;
use lan_probe_rs::types::{Device, ProbeEvent, Status};

#[derive(Default)]
struct Seen(Vec<ProbeEvent>);

impl EventSink for Seen {
    fn on_event(&mut self, event: &ProbeEvent) {
        self.0.push(event.clone());
    }
}

#[derive(Default)]
struct Saved(Vec<Vec<Device>>);

impl DeviceRepository for Saved {
    fn save(&mut self, devices: &[Device]) -> anyhow::Result<()> {
        self.0.push(devices.to_vec());
        Ok(())
    }
}

const MAX_PER_TICK: usize = 200;

fn bulk_result(ip: &str, latency_ms: Option<f64>, done: u64, total: u64) -> ProbeEvent {
    ProbeEvent::BulkResult {
        ip: ip.into(),
        latency_ms,
        done,
        total,
    }
}

#[test]
fn bounded_drain_needs_ceil_ticks_in_fifo_order() {
    let (tx, rx) = event_queue();
    let n: u64 = 450;
    for i in 1..=n {
        tx.send(ProbeEvent::BulkResult {
            ip: format!("10.0.{}.{}", i / 256, i % 256),
            latency_ms: None,
            done: i,
            total: n,
        });
    }

    let mut c = Consumer::new(
        rx,
        DeviceStore::new(),
        Seen::default(),
        Saved::default(),
        MAX_PER_TICK,
    );
    let mut ticks = 0;
    let mut sizes = Vec::new();
    while c.pending() > 0 {
        sizes.push(c.tick().applied);
        ticks += 1;
    }
    assert_eq!(ticks, 3);
    assert_eq!(sizes, vec![200, 200, 50]);

    let order: Vec<u64> = c
        .sink()
        .0
        .iter()
        .map(|e| match e {
            ProbeEvent::BulkResult { done, .. } => *done,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(order, (1..=n).collect::<Vec<_>>());
}

#[test]
fn bulk_results_update_matching_devices_and_persist() {
    let (tx, rx) = event_queue();
    let store = DeviceStore::from_devices(vec![
        Device::new("192.168.1.1"),
        Device::new("192.168.1.2"),
        Device::new("192.168.1.3"),
    ])
    .unwrap();
    let mut c = Consumer::new(rx, store, Seen::default(), Saved::default(), MAX_PER_TICK);

    tx.send(ProbeEvent::TaskStarted {
        id: 1,
        task: lan_probe_rs::types::TaskKind::Bulk,
        target: "3 devices".into(),
    });
    tx.send(bulk_result("192.168.1.2", Some(230.0), 1, 3));
    tx.send(bulk_result("192.168.1.1", Some(12.5), 2, 3));
    tx.send(bulk_result("192.168.1.3", None, 3, 3));
    tx.send(ProbeEvent::BulkDone { total: 3 });
    c.tick();

    let d = c.devices();
    assert_eq!(d.get("192.168.1.1").unwrap().status(), Status::Fast);
    assert_eq!(d.get("192.168.1.2").unwrap().status(), Status::VerySlow);
    assert_eq!(d.get("192.168.1.3").unwrap().status(), Status::Down);
    assert!(d.as_slice().iter().all(|dev| dev.last_probe_time.is_some()));

    let saves = &c.repository().0;
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0][1].latency_ms, Some(230.0));
}

#[test]
fn device_removed_mid_probe_is_ignored() {
    let (tx, rx) = event_queue();
    let store = DeviceStore::from_devices(vec![Device::new("10.9.9.9")]).unwrap();
    let mut c = Consumer::new(rx, store, Seen::default(), Saved::default(), MAX_PER_TICK);

    tx.send(bulk_result("10.9.9.9", Some(3.0), 1, 1));
    assert!(c.devices_mut().remove("10.9.9.9").is_some());
    let report = c.tick();
    assert_eq!(report.applied, 1);
    assert!(!report.devices_changed);
    assert!(c.repository().0.is_empty());
}
