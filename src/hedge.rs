// ===============================
// src/hedge.rs (hedge-pair engine)
// ===============================
//
// Mengamati dua instrumen berpasangan (saham + futures). Saat divergensi
// out-in ratio melewati ambang, spawn empat leg: A-forward/B-reverse plus
// pasangan cermin B-forward/A-reverse. Tiap leg adalah Trader penuh; engine
// hanya meneruskan tick dan membersihkan registry saat leg selesai.
//
use std::sync::Arc;

use ahash::AHashMap;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tracing::{debug, info, warn};

use crate::analytics::TickWindow;
use crate::broker::StatusRouter;
use crate::bus::BusEvent;
use crate::config::{AnalyzeCfg, HedgeCfg, InstrumentClass, Settings};
use crate::domain::Tick;
use crate::metrics;
use crate::trader::{LegDirection, Trader, TraderChannels, TraderCfg, TraderDeps};

type LegRegistry = Arc<RwLock<AHashMap<String, (String, mpsc::Sender<Tick>)>>>;

pub struct HedgeEngine {
    cfg: HedgeCfg,
    analyze: AnalyzeCfg,
    settings: Settings,
    deps: TraderDeps,
    router: StatusRouter,
    /// Trade switch per kelas; tiap leg mengikuti switch kelas instrumennya.
    stock_switch_rx: watch::Receiver<bool>,
    future_switch_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
    window_a: TickWindow,
    window_b: TickWindow,
    /// leg_id -> (code, tick sender). Fan-out di bawah read lock; selambat
    /// leg paling lambat (send().await, disengaja).
    legs: LegRegistry,
}

impl HedgeEngine {
    pub fn new(
        settings: Settings,
        deps: TraderDeps,
        router: StatusRouter,
        stock_switch_rx: watch::Receiver<bool>,
        future_switch_rx: watch::Receiver<bool>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let analyze = settings.analyze.clone();
        let window_a =
            TickWindow::new(analyze.max_hold_ticks, analyze.window_secs, analyze.gap_secs);
        let window_b =
            TickWindow::new(analyze.max_hold_ticks, analyze.window_secs, analyze.gap_secs);
        Self {
            cfg: settings.hedge.clone(),
            window_a,
            window_b,
            analyze,
            settings,
            deps,
            router,
            stock_switch_rx,
            future_switch_rx,
            shutdown_rx,
            legs: Arc::new(RwLock::new(AHashMap::new())),
        }
    }

    pub async fn run(mut self, mut tick_rx: broadcast::Receiver<Tick>) {
        let mut done_rx = self.deps.bus.subscribe();
        info!(pair = ?self.cfg.pair, gap = self.cfg.trigger_gap, "hedge engine started");
        loop {
            tokio::select! {
                res = tick_rx.recv() => match res {
                    Ok(tick) => self.on_tick(tick).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "hedge tick stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                res = done_rx.recv() => match res {
                    Ok(BusEvent::TraderDone(leg_id)) => self.on_leg_done(&leg_id).await,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "hedge bus stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Ok(()) = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("hedge engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn on_tick(&mut self, tick: Tick) {
        if tick.code == self.cfg.pair.0 {
            self.window_a.push(tick.clone());
        } else if tick.code == self.cfg.pair.1 {
            self.window_b.push(tick.clone());
        } else {
            return;
        }

        {
            let legs = self.legs.read().await;
            for (leg_id, (code, tx)) in legs.iter() {
                if *code == tick.code && tx.send(tick.clone()).await.is_err() {
                    debug!(leg = %leg_id, "leg tick channel closed");
                }
            }
        }

        // trigger hanya saat registry kosong (pasangan sebelumnya sudah flat)
        if self.legs.read().await.is_empty() && self.should_trigger() {
            self.spawn_legs().await;
        }
    }

    fn should_trigger(&self) -> bool {
        if self.window_a.len() < self.cfg.min_ticks || self.window_b.len() < self.cfg.min_ticks {
            return false;
        }
        let gap = (self.window_a.out_in_ratio(self.analyze.window_secs)
            - self.window_b.out_in_ratio(self.analyze.window_secs))
        .abs();
        gap >= self.cfg.trigger_gap
    }

    fn class_of(&self, code: &str) -> InstrumentClass {
        if self.settings.futures.iter().any(|c| c == code) {
            InstrumentClass::Future
        } else {
            InstrumentClass::Stock
        }
    }

    fn switch_for(&self, class: InstrumentClass) -> watch::Receiver<bool> {
        match class {
            InstrumentClass::Stock => self.stock_switch_rx.clone(),
            InstrumentClass::Future => self.future_switch_rx.clone(),
        }
    }

    async fn spawn_legs(&self) {
        let (a, b) = self.cfg.pair.clone();
        info!(a = %a, b = %b, "hedge divergence trigger, spawning legs");
        let plan = [
            (a.clone(), LegDirection::Forward),
            (b.clone(), LegDirection::Reverse),
            (b, LegDirection::Forward),
            (a, LegDirection::Reverse),
        ];

        let mut legs = self.legs.write().await;
        for (code, direction) in plan {
            let leg_id = format!("{}-{:?}", code, direction);
            let class = self.class_of(&code);
            let mut cfg = TraderCfg::from_settings(&self.settings, &code, class, direction);
            cfg.label = leg_id.clone();
            let switch_rx = self.switch_for(class);

            let (tick_tx, tick_rx) = mpsc::channel(256);
            let (_bidask_tx, bidask_rx) = mpsc::channel(8);
            let (status_tx, status_rx) = mpsc::channel(64);
            self.router.register(&code, status_tx).await;

            let trader = Trader::new(cfg, self.deps.clone());
            let ch = TraderChannels {
                tick_rx,
                bidask_rx,
                status_rx,
                switch_rx,
                shutdown_rx: self.shutdown_rx.clone(),
            };
            tokio::spawn(trader.run(ch));
            legs.insert(leg_id, (code, tick_tx));
            metrics::HEDGE_LEGS.inc();
        }
    }

    async fn on_leg_done(&self, leg_id: &str) {
        let mut legs = self.legs.write().await;
        if legs.remove(leg_id).is_some() {
            metrics::HEDGE_LEGS.dec();
            info!(leg = %leg_id, remaining = legs.len(), "hedge leg done");
            if legs.is_empty() {
                info!("hedge pair flat, trigger re-armed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MockBroker;
    use crate::cache::MemoryCache;
    use crate::config::{QuotaCfg, SessionCfg, TradeCfg};
    use crate::domain::TickKind;
    use crate::quota::{CostEngine, SharedQuota};
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn settings() -> Settings {
        let trade = TradeCfg {
            allow_trade: true,
            quantity: 1,
            trade_in_wait_s: 10,
            trade_out_wait_s: 15,
            cancel_wait_s: 10,
            max_cancel_retry: 5,
            cool_off_s: 60,
            hold_time_s: 3600,
        };
        Settings {
            stocks: vec!["2330".into()],
            futures: vec!["TXFA6".into()],
            record_file: None,
            metrics_port: 0,
            stock_trade: trade.clone(),
            future_trade: trade,
            analyze: AnalyzeCfg {
                max_hold_ticks: 100,
                window_secs: 60,
                gap_secs: 600,
                all_out_in_ratio: 70.0,
                all_in_out_ratio: 30.0,
                rate_limit: 0.0,
                rsi_min_count: 3,
                rsi_exit_high: 70.0,
                rsi_exit_low: 30.0,
                volume_pr_limit: 50.0,
                stable_bar_count: 0,
                bias_boost: 3.0,
            },
            quota: QuotaCfg {
                quota: 1_000_000,
                fee_ratio: Decimal::from_str("0.001425").unwrap(),
                tax_ratio: Decimal::from_str("0.0015").unwrap(),
                fee_discount_rate: Decimal::from_str("0.6").unwrap(),
                future_tax_ratio: Decimal::from_str("0.00002").unwrap(),
                future_fee_per_contract: 40,
                future_multiplier: 50,
            },
            session: SessionCfg {
                open: chrono::NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                first_part_mins: 150,
                second_part_mins: 90,
            },
            hedge: HedgeCfg {
                enabled: true,
                pair: ("2330".into(), "TXFA6".into()),
                trigger_gap: 30.0,
                min_ticks: 5,
            },
        }
    }

    fn engine() -> HedgeEngine {
        let (status_tx, _status_rx) = mpsc::channel(8);
        let deps = TraderDeps {
            broker: Arc::new(MockBroker::new(status_tx, None)),
            quota: SharedQuota::new(1_000_000),
            cost: CostEngine::new(settings().quota),
            bus: crate::bus::EventBus::new(64),
            cache: Arc::new(MemoryCache::new()),
        };
        let (_stock_sw_tx, stock_sw_rx) = watch::channel(true);
        let (_future_sw_tx, future_sw_rx) = watch::channel(false);
        let (_sd_tx, sd_rx) = watch::channel(false);
        HedgeEngine::new(
            settings(),
            deps,
            StatusRouter::new(),
            stock_sw_rx,
            future_sw_rx,
            sd_rx,
        )
    }

    fn tick(code: &str, sec: u32, kind: TickKind) -> Tick {
        Tick {
            code: code.into(),
            time: Utc.with_ymd_and_hms(2026, 3, 2, 1, 10, sec).single().unwrap(),
            open: 100.0,
            close: 100.0,
            high: 100.0,
            low: 100.0,
            volume: 5,
            total_volume: 100,
            kind,
            price_chg: 0.0,
            pct_chg: 0.0,
        }
    }

    #[tokio::test]
    async fn trigger_requires_populated_windows_and_divergence() {
        let mut eng = engine();
        for i in 0..6 {
            eng.window_a.push(tick("2330", i, TickKind::Out));
        }
        // window B belum terisi cukup
        assert!(!eng.should_trigger());

        for i in 0..6 {
            eng.window_b.push(tick("TXFA6", i, TickKind::Out));
        }
        // kedua ratio 100 -> divergensi 0
        assert!(!eng.should_trigger());

        for i in 6..12 {
            eng.window_b.push(tick("TXFA6", i, TickKind::In));
        }
        // A = 100, B = 50 -> gap 50 >= 30
        assert!(eng.should_trigger());
    }

    #[tokio::test]
    async fn leg_switch_follows_instrument_class() {
        // helper engine(): switch saham true, switch futures false
        let eng = engine();
        let stock = eng.switch_for(eng.class_of("2330"));
        let future = eng.switch_for(eng.class_of("TXFA6"));
        assert!(*stock.borrow());
        assert!(!*future.borrow());
    }

    #[tokio::test]
    async fn leg_registry_removal_rearms() {
        let eng = engine();
        let (tx, _rx) = mpsc::channel(4);
        eng.legs
            .write()
            .await
            .insert("2330-Forward".into(), ("2330".into(), tx));

        eng.on_leg_done("unknown-leg").await;
        assert_eq!(eng.legs.read().await.len(), 1);

        eng.on_leg_done("2330-Forward").await;
        assert!(eng.legs.read().await.is_empty());
    }
}
