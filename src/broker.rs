// ===============================
// src/broker.rs (order gateway seam)
// ===============================
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

use crate::domain::{Order, OrderState, OrderStatusEvent};

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker rejected order: {0}")]
    Rejected(String),
    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Seam ke venue. Submit mengembalikan order_id dari ack sinkron; konfirmasi
/// status selanjutnya (fill/cancel) datang lewat jalur OrderStatusEvent.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn submit(&self, order: &Order) -> Result<String, BrokerError>;
    async fn cancel(&self, order_id: &str) -> Result<(), BrokerError>;
}

fn mint_order_id() -> String {
    let ts = Utc::now().timestamp_millis();
    let salt: u32 = rand::thread_rng().gen();
    format!("OD-{}-{}", ts, salt)
}

/// Venue tiruan untuk paper-trading dan test: ack langsung, fill setelah
/// `fill_delay` (None = tidak pernah fill, untuk menguji jalur cancel).
pub struct MockBroker {
    status_tx: mpsc::Sender<OrderStatusEvent>,
    fill_delay: Option<Duration>,
    cancel_delay: Duration,
    submitted: Arc<Mutex<Vec<Order>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
    // order_id -> event hidup; cancel membatalkan fill yang masih pending
    pending: Arc<Mutex<HashMap<String, OrderStatusEvent>>>,
}

impl MockBroker {
    pub fn new(status_tx: mpsc::Sender<OrderStatusEvent>, fill_delay: Option<Duration>) -> Self {
        Self {
            status_tx,
            fill_delay,
            cancel_delay: Duration::from_millis(20),
            submitted: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn submitted(&self) -> Vec<Order> {
        self.submitted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn submit(&self, order: &Order) -> Result<String, BrokerError> {
        let order_id = mint_order_id();
        if let Ok(mut v) = self.submitted.lock() {
            v.push(order.clone());
        }

        let ev = OrderStatusEvent {
            order_id: order_id.clone(),
            code: order.code.clone(),
            action: order.action,
            price: order.price,
            quantity: order.quantity,
            state: OrderState::Submitted,
            order_time: order.order_time,
        };
        if let Ok(mut p) = self.pending.lock() {
            p.insert(order_id.clone(), ev.clone());
        }
        if self.status_tx.send(ev.clone()).await.is_err() {
            return Err(BrokerError::Unreachable("status channel closed".into()));
        }

        if let Some(delay) = self.fill_delay {
            let tx = self.status_tx.clone();
            let pending = self.pending.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                let fill = match pending.lock() {
                    Ok(mut p) => p.remove(&ev.order_id),
                    Err(_) => None,
                };
                if let Some(mut fill) = fill {
                    fill.state = OrderState::Filled;
                    let _ = tx.send(fill).await;
                }
            });
        }

        Ok(order_id)
    }

    async fn cancel(&self, order_id: &str) -> Result<(), BrokerError> {
        if let Ok(mut v) = self.cancelled.lock() {
            v.push(order_id.to_string());
        }
        let ev = match self.pending.lock() {
            Ok(mut p) => p.remove(order_id),
            Err(_) => None,
        };
        let Some(mut ev) = ev else {
            // sudah filled atau id tidak dikenal
            return Err(BrokerError::Rejected(format!("unknown order {}", order_id)));
        };
        ev.state = OrderState::Cancelled;
        let tx = self.status_tx.clone();
        let delay = self.cancel_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(ev).await;
        });
        Ok(())
    }
}

/// Mem-fan-out event status dari satu jalur broker ke controller per-kode.
/// Controller register sender-nya sekali di startup.
#[derive(Clone, Default)]
pub struct StatusRouter {
    routes: Arc<RwLock<AHashMap<String, Vec<mpsc::Sender<OrderStatusEvent>>>>>,
}

impl StatusRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, code: &str, tx: mpsc::Sender<OrderStatusEvent>) {
        self.routes.write().await.entry(code.to_string()).or_default().push(tx);
    }

    pub async fn route(&self, ev: OrderStatusEvent) {
        let routes = self.routes.read().await;
        match routes.get(&ev.code) {
            Some(txs) => {
                for tx in txs {
                    if tx.send(ev.clone()).await.is_err() {
                        warn!(code = %ev.code, "status route closed");
                    }
                }
            }
            None => debug!(code = %ev.code, "status event without subscriber"),
        }
    }

    /// Task dispatcher: pompa event dari jalur broker ke route per-kode.
    pub async fn run(self, mut status_rx: mpsc::Receiver<OrderStatusEvent>) {
        while let Some(ev) = status_rx.recv().await {
            self.route(ev).await;
        }
    }
}
