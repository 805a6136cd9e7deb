// ===============================
// src/posttrade.rs (trade-balance aggregation)
// ===============================
//
// Subscriber bus: mengumpulkan order Filled per hari bursa, lalu menghitung
// ulang TradeBalance tiap 20 detik dan saat ada permintaan Recalc eksplisit.
// Balance di-upsert per hari, tidak pernah dihapus.
//
use ahash::AHashMap;
use chrono::NaiveDate;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::bus::BusEvent;
use crate::config::InstrumentClass;
use crate::domain::{Event, Order, OrderState, TradeBalance};
use crate::metrics;
use crate::quota::CostEngine;
use crate::simulator::settle;

#[derive(Debug, Clone)]
pub enum PosttradeCmd {
    /// Hitung ulang hari historis tertentu (mis. setelah koreksi data).
    Recalc(NaiveDate),
}

pub struct Posttrade {
    cost: CostEngine,
    futures: Vec<String>,
    filled: AHashMap<NaiveDate, Vec<Order>>,
    balances: AHashMap<NaiveDate, TradeBalance>,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl Posttrade {
    pub fn new(cost: CostEngine, futures: Vec<String>, rec_tx: Option<mpsc::Sender<Event>>) -> Self {
        Self {
            cost,
            futures,
            filled: AHashMap::new(),
            balances: AHashMap::new(),
            rec_tx,
        }
    }

    pub fn balance(&self, day: NaiveDate) -> Option<TradeBalance> {
        self.balances.get(&day).copied()
    }

    fn on_order(&mut self, order: Order) {
        if order.state != OrderState::Filled {
            return;
        }
        let day = order.trade_time.unwrap_or(order.order_time).date_naive();
        self.filled.entry(day).or_default().push(order);
    }

    fn recompute(&mut self, day: NaiveDate) {
        let mut orders = self.filled.get(&day).cloned().unwrap_or_default();
        orders.sort_by_key(|o| o.trade_time.unwrap_or(o.order_time));

        // posisi berjalan dihitung PER instrumen; satu settle per kode, lalu
        // dijumlahkan. Posisi terbuka satu kode tidak boleh menihilkan saldo
        // kode lain.
        let mut per_code: AHashMap<String, Vec<Order>> = AHashMap::new();
        for o in orders {
            per_code.entry(o.code.clone()).or_default().push(o);
        }

        let mut merged = TradeBalance {
            day,
            count: 0,
            forward: 0,
            reverse: 0,
            discount: 0,
            total: 0,
        };
        for (code, orders) in &per_code {
            let class = if self.futures.iter().any(|c| c == code) {
                InstrumentClass::Future
            } else {
                InstrumentClass::Stock
            };
            let b = settle(orders, &self.cost, class, day);
            merged.count += b.count;
            merged.forward += b.forward;
            merged.reverse += b.reverse;
            merged.discount += b.discount;
            merged.total += b.total;
        }

        metrics::BALANCE_TOTAL
            .with_label_values(&[&day.to_string()])
            .set(merged.total);
        info!(
            day = %day,
            count = merged.count,
            forward = merged.forward,
            reverse = merged.reverse,
            discount = merged.discount,
            total = merged.total,
            "trade balance recomputed"
        );
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(Event::Balance(merged));
        }
        // upsert; hari lain tidak disentuh
        self.balances.insert(day, merged);
    }

    fn recompute_all(&mut self) {
        let days: Vec<NaiveDate> = self.filled.keys().copied().collect();
        for day in days {
            self.recompute(day);
        }
    }

    pub async fn run(
        mut self,
        mut bus_rx: broadcast::Receiver<BusEvent>,
        mut cmd_rx: mpsc::Receiver<PosttradeCmd>,
    ) {
        info!("posttrade aggregation started");
        let mut tick = interval(Duration::from_secs(20));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                res = bus_rx.recv() => match res {
                    Ok(BusEvent::OrderUpdated(order)) => self.on_order(order),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "posttrade bus stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(cmd) = cmd_rx.recv() => match cmd {
                    PosttradeCmd::Recalc(day) => self.recompute(day),
                },
                _ = tick.tick() => self.recompute_all(),
            }
        }
        info!("posttrade aggregation stopped");
    }
}
