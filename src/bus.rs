// ===============================
// src/bus.rs
// ===============================
//
// Pub/sub topic lokal di atas tokio broadcast — jembatan antara trader,
// posttrade, dan hedge engine. Publish ke bus tanpa subscriber bukan error
// fatal: event dicatat lalu dibuang (agregasi degradasi, trader jalan terus).
//
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::InstrumentClass;
use crate::domain::Order;

#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Transisi lifecycle order (entry point persistence di usecase layer).
    OrderUpdated(Order),
    /// Sebuah trader/leg selesai untuk sesi ini; parent boleh membersihkan registry.
    TraderDone(String),
    /// Trade switch berubah; hanya menggerbang ENTRY, tidak pernah exit.
    TradeSwitch { class: InstrumentClass, on: bool },
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: BusEvent) {
        if self.tx.send(event).is_err() {
            // belum ada subscriber; bukan alasan menghentikan controller
            debug!("bus publish dropped, no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
