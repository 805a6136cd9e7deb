// ===============================
// tests/engine_e2e.rs
// ===============================
//
// End-to-end: Trader task hidup + MockBroker + StatusRouter, diberi makan
// skenario bar kontraksi lalu burst agresor, tanpa menyentuh internal.
//
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};

use intraday_bot_rust::broker::{MockBroker, StatusRouter};
use intraday_bot_rust::bus::EventBus;
use intraday_bot_rust::cache::MemoryCache;
use intraday_bot_rust::config::{
    AnalyzeCfg, InstrumentClass, QuotaCfg, SessionCfg, TradeCfg,
};
use intraday_bot_rust::domain::{Order, OrderAction, Tick, TickKind};
use intraday_bot_rust::quota::{CostEngine, SharedQuota};
use intraday_bot_rust::trader::{LegDirection, Trader, TraderChannels, TraderCfg, TraderDeps};

const QUOTA: i64 = 10_000_000;

fn quota_cfg() -> QuotaCfg {
    QuotaCfg {
        quota: QUOTA,
        fee_ratio: Decimal::from_str("0.001425").unwrap(),
        tax_ratio: Decimal::from_str("0.0015").unwrap(),
        fee_discount_rate: Decimal::from_str("0.6").unwrap(),
        future_tax_ratio: Decimal::from_str("0.00002").unwrap(),
        future_fee_per_contract: 40,
        future_multiplier: 50,
    }
}

fn trader_cfg() -> TraderCfg {
    TraderCfg {
        code: "2330".into(),
        label: "2330".into(),
        class: InstrumentClass::Stock,
        direction: LegDirection::Forward,
        trade: TradeCfg {
            allow_trade: true,
            quantity: 1,
            trade_in_wait_s: 3600,
            trade_out_wait_s: 3600,
            cancel_wait_s: 10,
            max_cancel_retry: 5,
            cool_off_s: 60,
            hold_time_s: 3600,
        },
        analyze: AnalyzeCfg {
            max_hold_ticks: 500,
            window_secs: 60,
            gap_secs: 180,
            all_out_in_ratio: 70.0,
            all_in_out_ratio: 30.0,
            rate_limit: 1.0,
            rsi_min_count: 3,
            rsi_exit_high: 70.0,
            rsi_exit_low: 30.0,
            volume_pr_limit: 50.0,
            stable_bar_count: 3,
            bias_boost: 3.0,
        },
        // jendela entry dibuka sepanjang hari supaya test tidak peka jam dinding
        session: SessionCfg {
            open: chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            first_part_mins: 1440,
            second_part_mins: 0,
        },
    }
}

struct Harness {
    broker: Arc<MockBroker>,
    tick_tx: mpsc::Sender<Tick>,
    quota: SharedQuota,
    _switch_tx: watch::Sender<bool>,
    _shutdown_tx: watch::Sender<bool>,
}

async fn start(fill_delay: Option<Duration>) -> Harness {
    let (central_tx, central_rx) = mpsc::channel(256);
    let broker = Arc::new(MockBroker::new(central_tx, fill_delay));
    let router = StatusRouter::new();
    let (st_tx, status_rx) = mpsc::channel(64);
    router.register("2330", st_tx).await;
    tokio::spawn(router.run(central_rx));

    let quota = SharedQuota::new(QUOTA);
    let deps = TraderDeps {
        broker: broker.clone(),
        quota: quota.clone(),
        cost: CostEngine::new(quota_cfg()),
        bus: EventBus::new(256),
        cache: Arc::new(MemoryCache::new()),
    };

    let (tick_tx, tick_rx) = mpsc::channel(1024);
    let (_ba_tx, bidask_rx) = mpsc::channel(8);
    let (switch_tx, switch_rx) = watch::channel(true);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Trader::new(trader_cfg(), deps).run(TraderChannels {
        tick_rx,
        bidask_rx,
        status_rx,
        switch_rx,
        shutdown_rx,
    }));

    Harness {
        broker,
        tick_tx,
        quota,
        _switch_tx: switch_tx,
        _shutdown_tx: shutdown_tx,
    }
}

fn tick(time: DateTime<Utc>, close: f64, kind: TickKind) -> Tick {
    Tick {
        code: "2330".into(),
        time,
        open: close,
        close,
        high: close,
        low: close,
        volume: 5,
        total_volume: 100,
        kind,
        price_chg: 0.0,
        pct_chg: 0.0,
    }
}

fn current_minute() -> DateTime<Utc> {
    Utc::now()
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(Utc::now)
}

/// Empat bar menit yang mengerucut: high turun, low naik.
async fn feed_contracting_bars(h: &Harness, minute: DateTime<Utc>) {
    let bars = [(110.0, 100.0), (108.0, 101.0), (107.0, 102.0), (106.5, 102.5)];
    for (i, (high, low)) in bars.iter().enumerate() {
        let bucket = minute - chrono::Duration::minutes((4 - i) as i64);
        h.tick_tx.send(tick(bucket, *high, TickKind::Neutral)).await.unwrap();
        h.tick_tx
            .send(tick(bucket + chrono::Duration::seconds(1), *low, TickKind::Neutral))
            .await
            .unwrap();
    }
}

async fn feed_out_burst(h: &Harness, minute: DateTime<Utc>, close: f64) {
    for i in 0..10_i64 {
        let time = minute + chrono::Duration::milliseconds(i * 200);
        h.tick_tx.send(tick(time, close, TickKind::Out)).await.unwrap();
    }
}

/// Poll sampai predicate terpenuhi atau timeout.
async fn wait_for<F: Fn(&[Order]) -> bool>(h: &Harness, pred: F, ms: u64) -> Vec<Order> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    loop {
        let subs = h.broker.submitted();
        if pred(&subs) || tokio::time::Instant::now() >= deadline {
            return subs;
        }
        sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn contracting_bars_plus_out_burst_place_exactly_one_buy() {
    let h = start(None).await;
    let minute = current_minute();
    feed_contracting_bars(&h, minute).await;
    feed_out_burst(&h, minute, 103.0).await;

    let subs = wait_for(&h, |s| !s.is_empty(), 2_000).await;
    sleep(Duration::from_millis(200)).await;
    let subs_after = h.broker.submitted();

    assert_eq!(subs.len(), 1, "burst must yield one entry");
    assert_eq!(subs_after.len(), 1, "waiting order must block further entries");
    assert_eq!(subs[0].action, OrderAction::Buy);
    assert!((subs[0].price - 103.0).abs() < f64::EPSILON);

    // kuota tereserve selama entry menggantung: ceil(103000) + floor(103000*0.001425)
    assert_eq!(h.quota.remaining(), QUOTA - 103_146);
}

#[tokio::test]
async fn expanding_burst_breaks_bar_stability_and_places_nothing() {
    let h = start(None).await;
    let minute = current_minute();
    feed_contracting_bars(&h, minute).await;
    // 112 menembus high bar sebelumnya -> bar terakhir tidak lagi mengerucut
    feed_out_burst(&h, minute, 112.0).await;

    sleep(Duration::from_millis(400)).await;
    assert!(h.broker.submitted().is_empty());
    assert_eq!(h.quota.remaining(), QUOTA);
}

#[tokio::test]
async fn entry_fill_then_rally_produces_matching_exit_and_restores_quota() {
    let h = start(Some(Duration::from_millis(50))).await;
    let minute = current_minute();
    feed_contracting_bars(&h, minute).await;
    feed_out_burst(&h, minute, 103.0).await;

    // tunggu entry tersubmit lalu terisi
    let subs = wait_for(&h, |s| s.len() == 1, 2_000).await;
    assert_eq!(subs[0].action, OrderAction::Buy);
    sleep(Duration::from_millis(150)).await;

    // reli setelah fill -> RSI sejak fill menembus ambang exit long
    for close in [104.0, 105.0, 106.0, 107.0, 108.0] {
        h.tick_tx.send(tick(Utc::now(), close, TickKind::Out)).await.unwrap();
        sleep(Duration::from_millis(50)).await;
    }

    let subs = wait_for(&h, |s| s.len() == 2, 3_000).await;
    assert_eq!(subs.len(), 2, "rally after fill must produce the owed exit");
    assert_eq!(subs[1].action, OrderAction::Sell);
    assert_eq!(subs[1].group_id, subs[0].group_id, "exit reuses the entry group id");
    assert_eq!(subs[1].quantity, subs[0].quantity);

    // exit fill mengembalikan reservasi kuota secara utuh
    let deadline = tokio::time::Instant::now() + Duration::from_millis(2_000);
    while h.quota.remaining() != QUOTA && tokio::time::Instant::now() < deadline {
        sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(h.quota.remaining(), QUOTA);
}
