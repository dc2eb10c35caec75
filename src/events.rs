//! Thread-safe FIFO queue between probe workers and the single consumer.
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::types::ProbeEvent;

/// Anything a worker can hand events to.
pub trait Emitter: Send + Sync {
    fn emit(&self, event: ProbeEvent);
}

/// Producer half. Cheap to clone; one clone per worker.
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ProbeEvent>,
}

/// Consumer half, owned by the delivery loop.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ProbeEvent>,
}

pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

impl EventSender {
    pub fn send(&self, event: ProbeEvent) {
        // Receiver gone means nobody is listening any more; drop silently.
        let _ = self.tx.send(event);
    }
}

impl Emitter for EventSender {
    fn emit(&self, event: ProbeEvent) {
        self.send(event);
    }
}

impl EventReceiver {
    /// Take up to `max` queued events without waiting. Order is dequeue order.
    pub fn drain(&mut self, max: usize) -> Vec<ProbeEvent> {
        let mut out = Vec::new();
        while out.len() < max {
            match self.rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    /// Wait for the next event. `None` once every sender is dropped.
    pub async fn recv(&mut self) -> Option<ProbeEvent> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_respects_max_and_order() {
        let (tx, mut rx) = event_queue();
        for total in 0..5 {
            tx.send(ProbeEvent::BulkDone { total });
        }
        let first = rx.drain(3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0], ProbeEvent::BulkDone { total: 0 });
        assert_eq!(first[2], ProbeEvent::BulkDone { total: 2 });
        let rest = rx.drain(3);
        assert_eq!(
            rest,
            vec![ProbeEvent::BulkDone { total: 3 }, ProbeEvent::BulkDone { total: 4 }]
        );
        assert_eq!(rx.len(), 0);
        assert!(rx.drain(3).is_empty());
    }

    #[test]
    fn send_after_receiver_drop_is_silent() {
        let (tx, rx) = event_queue();
        drop(rx);
        tx.send(ProbeEvent::BulkDone { total: 1 });
    }
}
