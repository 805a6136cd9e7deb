// ===============================
// src/trader.rs (per-instrument order lifecycle controller)
// ===============================
//
// Satu task per instrumen. Seluruh state lifecycle dimiliki loop select!
// tunggal: tick masuk -> DecisionCore -> submit -> tunggu konfirmasi ->
// fill / cancel / retry. Maksimal SATU order waiting per controller.
//
use std::sync::Arc;

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::analytics::{volume_percentile, TickWindow};
use crate::broker::Broker;
use crate::bus::{BusEvent, EventBus};
use crate::cache::Cache;
use crate::config::{AnalyzeCfg, InstrumentClass, SessionCfg, Settings, TradeCfg};
use crate::domain::{BidAsk, Order, OrderAction, OrderState, OrderStatusEvent, Tick};
use crate::metrics;
use crate::quota::{CostEngine, SharedQuota};

/// Arah leg: Forward mengikuti sinyal apa adanya, Reverse membaliknya
/// (dipakai hedge engine untuk memasangkan dua instrumen).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegDirection {
    Forward,
    Reverse,
}

#[derive(Debug, Clone)]
pub struct TraderCfg {
    pub code: String,
    /// Identitas task di bus; sama dengan code untuk trader biasa, diberi
    /// suffix arah untuk leg hedge.
    pub label: String,
    pub class: InstrumentClass,
    pub direction: LegDirection,
    pub trade: TradeCfg,
    pub analyze: AnalyzeCfg,
    pub session: SessionCfg,
}

impl TraderCfg {
    pub fn from_settings(
        s: &Settings,
        code: &str,
        class: InstrumentClass,
        direction: LegDirection,
    ) -> Self {
        Self {
            code: code.to_string(),
            label: code.to_string(),
            class,
            direction,
            trade: s.trade_cfg(class).clone(),
            analyze: s.analyze.clone(),
            session: s.session.clone(),
        }
    }
}

/// Kolaborator yang disuntikkan ke controller (dan dipakai ulang hedge engine).
#[derive(Clone)]
pub struct TraderDeps {
    pub broker: Arc<dyn Broker>,
    pub quota: SharedQuota,
    pub cost: CostEngine,
    pub bus: EventBus,
    pub cache: Arc<dyn Cache>,
}

/// Jalur input controller. tick/bidask/status datang dari dispatcher per-kode;
/// switch & shutdown adalah watch global.
pub struct TraderChannels {
    pub tick_rx: mpsc::Receiver<Tick>,
    pub bidask_rx: mpsc::Receiver<BidAsk>,
    pub status_rx: mpsc::Receiver<OrderStatusEvent>,
    pub switch_rx: watch::Receiver<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

fn mint_group_id() -> String {
    let ts = Utc::now().timestamp_millis();
    let salt: u16 = rand::thread_rng().gen();
    format!("G-{}-{}", ts, salt)
}

// ---------------------------------------------------------------------------
// DecisionCore: sinyal murni, tanpa I/O. Dipakai live controller DAN simulator
// supaya replay memakai logika keputusan yang persis sama.
// ---------------------------------------------------------------------------

pub struct DecisionCore {
    pub cfg: TraderCfg,
    window: TickWindow,
    /// Order yang sudah Filled, per action, urut waktu. Entry ke-i dipasangkan
    /// dengan exit ke-i (group_id entry dipakai ulang).
    finished: AHashMap<OrderAction, Vec<Order>>,
    last_placed: Option<DateTime<Utc>>,
    volume_ref: Option<Vec<i64>>,
    bias_rate: Option<f64>,
}

impl DecisionCore {
    pub fn new(cfg: TraderCfg) -> Self {
        let window = TickWindow::new(
            cfg.analyze.max_hold_ticks,
            cfg.analyze.window_secs,
            cfg.analyze.gap_secs,
        );
        Self {
            cfg,
            window,
            finished: AHashMap::new(),
            last_placed: None,
            volume_ref: None,
            bias_rate: None,
        }
    }

    pub fn set_volume_reference(&mut self, volumes: Option<Vec<i64>>) {
        self.volume_ref = volumes;
    }

    pub fn set_bias_rate(&mut self, rate: Option<f64>) {
        self.bias_rate = rate;
    }

    pub fn push_tick(&mut self, tick: Tick) {
        self.window.push(tick);
    }

    pub fn mark_placed(&mut self, at: DateTime<Utc>) {
        self.last_placed = Some(at);
    }

    pub fn record_filled(&mut self, order: Order) {
        self.finished.entry(order.action).or_default().push(order);
    }

    fn finished_count(&self, action: OrderAction) -> usize {
        self.finished.get(&action).map_or(0, |v| v.len())
    }

    /// Event status untuk order yang sudah tercatat Filled dianggap duplikat/telat.
    pub fn is_finished(&self, order_id: &str) -> bool {
        self.finished
            .values()
            .flatten()
            .any(|o| o.order_id.as_deref() == Some(order_id))
    }

    /// Masih ada entry filled yang belum punya exit filled?
    pub fn exit_owed_any(&self) -> bool {
        self.finished_count(OrderAction::Buy) > self.finished_count(OrderAction::Sell)
            || self.finished_count(OrderAction::SellFirst)
                > self.finished_count(OrderAction::BuyLater)
    }

    /// Prioritas tertinggi: exit yang terhutang. Exit TIDAK pernah digerbang
    /// trade switch maupun jendela sesi.
    pub fn decide(&mut self, tick: &Tick, allow_entry: bool) -> Option<Order> {
        if let Some(exit) = self.exit_owed(tick) {
            return Some(exit);
        }
        if !allow_entry {
            return None;
        }
        self.entry(tick)
    }

    fn exit_owed(&self, tick: &Tick) -> Option<Order> {
        self.owed_for(OrderAction::Buy, OrderAction::Sell, tick)
            .or_else(|| self.owed_for(OrderAction::SellFirst, OrderAction::BuyLater, tick))
    }

    fn owed_for(
        &self,
        entry_action: OrderAction,
        exit_action: OrderAction,
        tick: &Tick,
    ) -> Option<Order> {
        let entries = self.finished.get(&entry_action)?;
        let exits = self.finished_count(exit_action);
        // entry ke-i dipasangkan dengan exit ke-i; yang belum ter-exit = index `exits`
        let entry = entries.get(exits)?;

        let since = entry.trade_time.unwrap_or(entry.order_time);
        let held_s = (tick.time - since).num_seconds();
        let force = held_s >= self.cfg.trade.hold_time_s;
        if !force {
            let rsi = self.window.rsi(since, self.cfg.analyze.rsi_min_count);
            if rsi == 0.0 {
                // data belum cukup sejak fill; tahan dulu
                return None;
            }
            let crossed = match entry_action {
                OrderAction::Buy => rsi >= self.cfg.analyze.rsi_exit_high,
                OrderAction::SellFirst => rsi <= self.cfg.analyze.rsi_exit_low,
                _ => false,
            };
            if !crossed {
                return None;
            }
        }

        Some(Order {
            code: self.cfg.code.clone(),
            action: exit_action,
            price: tick.close,
            quantity: entry.quantity,
            group_id: entry.group_id.clone(),
            order_id: None,
            state: OrderState::Unknown,
            order_time: tick.time,
            trade_time: None,
        })
    }

    fn entry(&mut self, tick: &Tick) -> Option<Order> {
        let a = &self.cfg.analyze;
        if !self.cfg.session.entry_allowed(self.cfg.class, tick.time.time()) {
            return None;
        }
        // 0 = gerbang kontraksi dimatikan
        if a.stable_bar_count > 0 && !self.window.bars_stable(a.stable_bar_count) {
            return None;
        }
        if let Some(last) = self.last_placed {
            if (tick.time - last).num_seconds() < self.cfg.trade.cool_off_s {
                return None;
            }
        }
        let rate = self.window.rate(a.window_secs);
        if rate < a.rate_limit {
            return None;
        }
        if let Some(refs) = self.volume_ref.as_deref() {
            let pr = volume_percentile(refs, tick.volume);
            if pr < a.volume_pr_limit {
                debug!(code = %self.cfg.code, pr, "volume percentile below limit");
                return None;
            }
        }

        let ratio = self.window.out_in_ratio(a.window_secs);
        let mut action = if ratio >= a.all_out_in_ratio {
            OrderAction::Buy
        } else if ratio > 0.0 && ratio <= a.all_in_out_ratio {
            OrderAction::SellFirst
        } else {
            return None;
        };
        if self.cfg.direction == LegDirection::Reverse {
            action = match action {
                OrderAction::Buy => OrderAction::SellFirst,
                OrderAction::SellFirst => OrderAction::Buy,
                other => other,
            };
        }

        let mut quantity = self.cfg.trade.quantity;
        if let Some(bias) = self.bias_rate {
            if bias.abs() >= a.bias_boost {
                quantity *= 2;
            }
        }

        Some(Order {
            code: self.cfg.code.clone(),
            action,
            price: tick.close,
            quantity,
            group_id: mint_group_id(),
            order_id: None,
            state: OrderState::Unknown,
            order_time: tick.time,
            trade_time: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Trader: lifecycle di sekeliling DecisionCore.
// ---------------------------------------------------------------------------

pub struct Trader {
    core: DecisionCore,
    deps: TraderDeps,
    waiting: Option<Order>,
    cancel_retries: u32,
    cancel_requested_at: Option<DateTime<Utc>>,
    /// Trade switch runtime; hanya menggerbang ENTRY.
    entries_enabled: bool,
    /// Entry di-cancel -> tidak ada entry baru sesi ini; selesai saat flat.
    entries_disabled_session: bool,
    /// Kuota yang direserve per group_id entry; dikredit balik saat exit fill
    /// atau entry gagal/batal.
    consumed: AHashMap<String, i64>,
    /// Order yang dianggap Aborted setelah retry cancel habis, keyed order_id.
    /// Status otoritatif yang datang terlambat direkonsiliasi dari sini.
    aborted: AHashMap<String, Order>,
    last_bidask: Option<BidAsk>,
}

impl Trader {
    pub fn new(cfg: TraderCfg, deps: TraderDeps) -> Self {
        let entries_enabled = cfg.trade.allow_trade;
        let mut core = DecisionCore::new(cfg);
        core.set_volume_reference(deps.cache.volume_reference(&core.cfg.code));
        core.set_bias_rate(deps.cache.bias_rate(&core.cfg.code));
        Self {
            core,
            deps,
            waiting: None,
            cancel_retries: 0,
            cancel_requested_at: None,
            entries_enabled,
            entries_disabled_session: false,
            consumed: AHashMap::new(),
            aborted: AHashMap::new(),
            last_bidask: None,
        }
    }

    pub async fn run(mut self, mut ch: TraderChannels) {
        metrics::TRADERS_ACTIVE.inc();
        info!(code = %self.core.cfg.code, direction = ?self.core.cfg.direction, "trader started");
        let mut check = interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                Some(tick) = ch.tick_rx.recv() => self.on_tick(tick).await,
                Some(ba) = ch.bidask_rx.recv() => { self.last_bidask = Some(ba); }
                Some(ev) = ch.status_rx.recv() => self.on_status(ev).await,
                Ok(()) = ch.switch_rx.changed() => {
                    self.entries_enabled = *ch.switch_rx.borrow();
                    info!(code = %self.core.cfg.code, on = self.entries_enabled, "trade switch changed");
                }
                _ = check.tick() => self.check_waiting(Utc::now()).await,
                Ok(()) = ch.shutdown_rx.changed() => {
                    if *ch.shutdown_rx.borrow() {
                        info!(code = %self.core.cfg.code, "trader shutting down");
                        break;
                    }
                }
                else => break,
            }

            if self.session_complete() {
                info!(code = %self.core.cfg.code, "trader done for session");
                self.deps
                    .bus
                    .publish(BusEvent::TraderDone(self.core.cfg.label.clone()));
                break;
            }
        }
        metrics::TRADERS_ACTIVE.dec();
    }

    /// Entry sudah dimatikan untuk sesi ini, tidak ada order menggantung, dan
    /// semua posisi sudah ditutup -> controller boleh berhenti.
    fn session_complete(&self) -> bool {
        self.entries_disabled_session && self.waiting.is_none() && !self.core.exit_owed_any()
    }

    async fn on_tick(&mut self, tick: Tick) {
        metrics::TICKS.inc();
        metrics::TICKS_BY_CODE
            .with_label_values(&[&self.core.cfg.code])
            .inc();
        self.core.push_tick(tick.clone());

        // invariant: maksimal satu order waiting
        if self.waiting.is_some() {
            return;
        }
        let allow_entry = self.entries_enabled && !self.entries_disabled_session;
        if let Some(order) = self.core.decide(&tick, allow_entry) {
            self.place(order).await;
        }
    }

    async fn place(&mut self, mut order: Order) {
        if order.price <= 0.0 {
            warn!(code = %order.code, action = ?order.action, "zero price, order dropped");
            metrics::REJECTS.with_label_values(&["zero_price"]).inc();
            return;
        }

        if let Some(ba) = &self.last_bidask {
            debug!(code = %order.code, bid = ba.best_bid(), ask = ba.best_ask(), "book at submit");
        }

        let is_entry = order.action.is_entry();
        let mut reserved = 0_i64;
        if is_entry && self.core.cfg.class == InstrumentClass::Stock {
            reserved = self.deps.cost.stock_buy_cost(order.price, order.quantity);
            if let Err(e) = self.deps.quota.consume(reserved) {
                warn!(code = %order.code, err = %e, "entry rejected by quota");
                metrics::REJECTS.with_label_values(&["quota"]).inc();
                return;
            }
            metrics::QUOTA_REMAINING.set(self.deps.quota.remaining());
        }

        match self.deps.broker.submit(&order).await {
            Ok(order_id) => {
                order.order_id = Some(order_id);
                order.state = OrderState::Submitted;
                self.core.mark_placed(order.order_time);
                if reserved > 0 {
                    self.consumed.insert(order.group_id.clone(), reserved);
                }
                if is_entry {
                    metrics::ENTRIES.with_label_values(&[&order.code]).inc();
                } else {
                    metrics::EXITS.with_label_values(&[&order.code]).inc();
                }
                info!(
                    code = %order.code,
                    action = ?order.action,
                    price = order.price,
                    qty = order.quantity,
                    group = %order.group_id,
                    "order submitted"
                );
                self.deps.bus.publish(BusEvent::OrderUpdated(order.clone()));
                self.waiting = Some(order);
                self.cancel_retries = 0;
                self.cancel_requested_at = None;
            }
            Err(e) => {
                error!(code = %order.code, err = %e, "submit failed");
                if reserved > 0 {
                    if let Err(e) = self.deps.quota.credit(reserved) {
                        error!(err = %e, "quota credit after failed submit rejected");
                    }
                    metrics::QUOTA_REMAINING.set(self.deps.quota.remaining());
                }
            }
        }
    }

    fn credit_entry_reserve(&mut self, group_id: &str) {
        if let Some(amount) = self.consumed.remove(group_id) {
            if let Err(e) = self.deps.quota.credit(amount) {
                error!(group = %group_id, err = %e, "quota credit rejected");
            }
            metrics::QUOTA_REMAINING.set(self.deps.quota.remaining());
        }
    }

    async fn on_status(&mut self, ev: OrderStatusEvent) {
        if self.core.is_finished(&ev.order_id) {
            debug!(order_id = %ev.order_id, "duplicate status for finished order");
            return;
        }
        let Some(mut order) = self.waiting.take() else {
            self.reconcile_late_status(ev).await;
            return;
        };
        if order.order_id.as_deref() != Some(ev.order_id.as_str()) {
            debug!(order_id = %ev.order_id, "status for stale order id");
            self.waiting = Some(order);
            return;
        }

        match ev.state {
            OrderState::Submitted | OrderState::Unknown => {
                // ack; tetap menunggu konfirmasi terminal
                self.waiting = Some(order);
            }
            OrderState::Filled => {
                order.state = OrderState::Filled;
                order.trade_time = Some(Utc::now());
                metrics::FILLS.with_label_values(&[&order.code]).inc();
                if !order.action.is_entry() {
                    // exit fill mengembalikan reservasi entry pasangannya
                    let group = order.group_id.clone();
                    self.credit_entry_reserve(&group);
                }
                info!(
                    code = %order.code,
                    action = ?order.action,
                    price = order.price,
                    group = %order.group_id,
                    "order filled"
                );
                self.deps.bus.publish(BusEvent::OrderUpdated(order.clone()));
                self.core.record_filled(order);
                self.cancel_retries = 0;
                self.cancel_requested_at = None;
            }
            OrderState::Cancelled => {
                order.state = OrderState::Cancelled;
                if order.action.is_entry() {
                    let group = order.group_id.clone();
                    self.credit_entry_reserve(&group);
                    self.entries_disabled_session = true;
                    info!(code = %order.code, "entry cancelled, entries disabled this session");
                } else {
                    info!(code = %order.code, "exit cancelled, will re-evaluate");
                }
                self.deps.bus.publish(BusEvent::OrderUpdated(order));
                self.cancel_retries = 0;
                self.cancel_requested_at = None;
            }
            OrderState::Aborted | OrderState::Failed => {
                order.state = ev.state;
                if order.action.is_entry() {
                    let group = order.group_id.clone();
                    self.credit_entry_reserve(&group);
                }
                warn!(code = %order.code, state = ?ev.state, "order did not complete");
                self.deps.bus.publish(BusEvent::OrderUpdated(order));
                self.cancel_retries = 0;
                self.cancel_requested_at = None;
            }
        }
    }

    /// Status untuk order yang sudah kita tandai Aborted secara lokal. Broker
    /// tetap otoritatif: Filled yang terlambat membuka kembali posisinya
    /// (dicatat ke finished, reservasi kuota dipasang ulang), Cancelled
    /// mengonfirmasi abort, non-terminal disimpan untuk direkonsiliasi nanti.
    async fn reconcile_late_status(&mut self, ev: OrderStatusEvent) {
        let Some(mut order) = self.aborted.remove(&ev.order_id) else {
            debug!(order_id = %ev.order_id, "status without waiting order");
            return;
        };
        match ev.state {
            OrderState::Filled => {
                order.state = OrderState::Filled;
                order.trade_time = Some(Utc::now());
                metrics::FILLS.with_label_values(&[&order.code]).inc();
                if order.action.is_entry() {
                    if self.core.cfg.class == InstrumentClass::Stock {
                        let reserved = self.deps.cost.stock_buy_cost(order.price, order.quantity);
                        match self.deps.quota.consume(reserved) {
                            Ok(()) => {
                                self.consumed.insert(order.group_id.clone(), reserved);
                            }
                            Err(e) => {
                                error!(code = %order.code, err = %e, "quota re-consume for late fill rejected")
                            }
                        }
                        metrics::QUOTA_REMAINING.set(self.deps.quota.remaining());
                    }
                } else {
                    let group = order.group_id.clone();
                    self.credit_entry_reserve(&group);
                }
                warn!(
                    code = %order.code,
                    order_id = %ev.order_id,
                    "late fill for aborted order, position reopened"
                );
                self.deps.bus.publish(BusEvent::OrderUpdated(order.clone()));
                self.core.record_filled(order);
            }
            OrderState::Cancelled => {
                debug!(order_id = %ev.order_id, "late cancel confirms abort");
            }
            OrderState::Submitted | OrderState::Unknown => {
                self.aborted.insert(ev.order_id, order);
            }
            OrderState::Aborted | OrderState::Failed => {}
        }
    }

    /// Jalan tiap detik. Order melewati deadline tunggu -> TEPAT SATU cancel;
    /// konfirmasi cancel tidak datang dalam cancel_wait -> retry terbatas.
    async fn check_waiting(&mut self, now: DateTime<Utc>) {
        let (order_id, code, deadline_passed) = match self.waiting.as_ref() {
            Some(order) if order.cancellable() => {
                let Some(order_id) = order.order_id.clone() else {
                    return;
                };
                let wait = if order.action.is_entry() {
                    self.core.cfg.trade.trade_in_wait_s
                } else {
                    self.core.cfg.trade.trade_out_wait_s
                };
                let age = (now - order.order_time).num_seconds();
                (order_id, order.code.clone(), age >= wait)
            }
            _ => return,
        };
        if !deadline_passed {
            return;
        }

        match self.cancel_requested_at {
            None => {
                metrics::CANCELS.with_label_values(&[&code]).inc();
                info!(code = %code, order_id = %order_id, "wait deadline passed, cancelling");
                if let Err(e) = self.deps.broker.cancel(&order_id).await {
                    warn!(code = %code, err = %e, "cancel request failed");
                }
                self.cancel_requested_at = Some(now);
                self.cancel_retries = 1;
            }
            Some(at) => {
                if (now - at).num_seconds() < self.core.cfg.trade.cancel_wait_s {
                    return;
                }
                if self.cancel_retries >= self.core.cfg.trade.max_cancel_retry {
                    error!(
                        code = %code,
                        order_id = %order_id,
                        retries = self.cancel_retries,
                        "cancel unconfirmed after max retries, treating as aborted"
                    );
                    if let Some(mut order) = self.waiting.take() {
                        order.state = OrderState::Aborted;
                        if order.action.is_entry() {
                            let group = order.group_id.clone();
                            self.credit_entry_reserve(&group);
                        }
                        self.deps.bus.publish(BusEvent::OrderUpdated(order.clone()));
                        // broker tetap otoritatif; simpan untuk rekonsiliasi
                        // kalau konfirmasi datang terlambat
                        self.aborted.insert(order_id.clone(), order);
                    }
                    self.cancel_requested_at = None;
                    self.cancel_retries = 0;
                    return;
                }
                self.cancel_retries += 1;
                metrics::CANCELS.with_label_values(&[&code]).inc();
                warn!(code = %code, retry = self.cancel_retries, "cancel unconfirmed, retrying");
                if let Err(e) = self.deps.broker.cancel(&order_id).await {
                    warn!(code = %code, err = %e, "cancel retry failed");
                }
                self.cancel_requested_at = Some(now);
            }
        }
    }
}
