// ===============================
// src/main.rs
// ===============================
/*
 # cek engine yang jalan
 curl -s localhost:9898/metrics | egrep '^(ticks_total|traders_active|quota_remaining_ntd)'

 # aktivitas per instrumen
 curl -s localhost:9898/metrics | grep '^ticks_total_by_code'
 curl -s localhost:9898/metrics | egrep '^(entries_total|exits_total|cancels_total)'

 # replay offline + sweep ambang
 intraday_bot_rust sim --file events.jsonl --code 2330 --out-in-ratios 60,70,80
*/
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::{
    select,
    sync::{broadcast, mpsc, watch},
    time::Duration,
};
use tracing::{error, info, warn};

use intraday_bot_rust::broker::{Broker, MockBroker, StatusRouter};
use intraday_bot_rust::bus::{BusEvent, EventBus};
use intraday_bot_rust::cache::{Cache, MemoryCache};
use intraday_bot_rust::config::{self, InstrumentClass, Settings};
use intraday_bot_rust::domain::{BidAsk, Event, Tick};
use intraday_bot_rust::posttrade::{Posttrade, PosttradeCmd};
use intraday_bot_rust::quota::{CostEngine, SharedQuota};
use intraday_bot_rust::simulator::{Simulator, SweepGrid};
use intraday_bot_rust::trader::{LegDirection, Trader, TraderChannels, TraderCfg, TraderDeps};
use intraday_bot_rust::{feed, hedge, metrics, recorder};

#[derive(Parser)]
#[command(name = "intraday_bot_rust", about = "Intraday TW equities/futures decision engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Jalankan engine live (mock feed + mock broker)
    Run,
    /// Replay file JSONL recorder lewat simulator + Cartesian sweep ambang
    Sim {
        /// File events.jsonl hasil recorder
        #[arg(long)]
        file: String,
        /// Kode instrumen yang direplay
        #[arg(long)]
        code: String,
        #[arg(long, value_delimiter = ',')]
        out_in_ratios: Vec<f64>,
        #[arg(long, value_delimiter = ',')]
        in_out_ratios: Vec<f64>,
        #[arg(long, value_delimiter = ',')]
        rate_limits: Vec<f64>,
    },
}

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    let cli = Cli::parse();
    let settings = config::load();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_live(settings).await,
        Command::Sim { file, code, out_in_ratios, in_out_ratios, rate_limits } => {
            run_sim(settings, file, code, SweepGrid { out_in_ratios, in_out_ratios, rate_limits })
        }
    }
}

async fn run_live(settings: Settings) {
    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(settings.metrics_port));

    info!(
        stocks = ?settings.stocks,
        futures = ?settings.futures,
        quota = settings.quota.quota,
        hedge = settings.hedge.enabled,
        "startup config"
    );
    for code in settings.stocks.iter().chain(settings.futures.iter()) {
        metrics::CONFIG_CODE.with_label_values(&[code]).set(1);
    }

    // ---- Kolaborator bersama ----
    let bus = EventBus::default();
    let quota = SharedQuota::new(settings.quota.quota);
    metrics::QUOTA_REMAINING.set(quota.remaining());
    let cost = CostEngine::new(settings.quota.clone());
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

    // ---- Recorder (opsional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    if let Some(path) = settings.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
    }

    // ---- Broker + status router ----
    let (status_tx, status_rx) = mpsc::channel(4096);
    let broker: Arc<dyn Broker> =
        Arc::new(MockBroker::new(status_tx, Some(Duration::from_millis(400))));
    let router = StatusRouter::new();
    tokio::spawn(router.clone().run(status_rx));

    let deps = TraderDeps {
        broker,
        quota: quota.clone(),
        cost: cost.clone(),
        bus: bus.clone(),
        cache,
    };

    // ---- Trade switch per kelas + shutdown ----
    let (stock_sw_tx, stock_sw_rx) = watch::channel(settings.stock_trade.allow_trade);
    let (future_sw_tx, future_sw_rx) = watch::channel(settings.future_trade.allow_trade);
    tokio::spawn({
        let mut rx = bus.subscribe();
        async move {
            loop {
                match rx.recv().await {
                    Ok(BusEvent::TradeSwitch { class, on }) => {
                        let tx = match class {
                            InstrumentClass::Stock => &stock_sw_tx,
                            InstrumentClass::Future => &future_sw_tx,
                        };
                        let _ = tx.send(on);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c, broadcasting shutdown");
            let _ = shutdown_tx.send(true);
        }
        // tahan sender supaya watch tetap hidup
        std::future::pending::<()>().await;
    });

    // ---- Feed (mock) ----
    let (tick_btx, _tick_brx) = broadcast::channel::<Tick>(8192);
    let (ba_btx, _ba_brx) = broadcast::channel::<BidAsk>(4096);
    for code in settings.stocks.iter().chain(settings.futures.iter()).cloned() {
        tokio::spawn(feed::run_mock(code, tick_btx.clone(), ba_btx.clone()));
    }

    // ---- Trader per instrumen + dispatcher per-kode ----
    let classes = settings
        .stocks
        .iter()
        .cloned()
        .map(|c| (c, InstrumentClass::Stock))
        .chain(settings.futures.iter().cloned().map(|c| (c, InstrumentClass::Future)));
    for (code, class) in classes {
        let (tick_tx, tick_rx) = mpsc::channel::<Tick>(1024);
        let (ba_tx, bidask_rx) = mpsc::channel::<BidAsk>(256);
        let (st_tx, status_rx) = mpsc::channel(256);
        router.register(&code, st_tx).await;

        tokio::spawn({
            let mut rx = tick_btx.subscribe();
            let code = code.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(t) if t.code == code => {
                            if tick_tx.send(t).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(code = %code, skipped = n, "tick dispatcher lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
        tokio::spawn({
            let mut rx = ba_btx.subscribe();
            let code = code.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(b) if b.code == code => {
                            if ba_tx.send(b).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {}
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });

        let switch_rx = match class {
            InstrumentClass::Stock => stock_sw_rx.clone(),
            InstrumentClass::Future => future_sw_rx.clone(),
        };
        let cfg = TraderCfg::from_settings(&settings, &code, class, LegDirection::Forward);
        let trader = Trader::new(cfg, deps.clone());
        tokio::spawn(trader.run(TraderChannels {
            tick_rx,
            bidask_rx,
            status_rx,
            switch_rx,
            shutdown_rx: shutdown_rx.clone(),
        }));
    }

    // ---- Post-trade aggregation ----
    let (_posttrade_cmd_tx, posttrade_cmd_rx) = mpsc::channel::<PosttradeCmd>(16);
    tokio::spawn(
        Posttrade::new(cost.clone(), settings.futures.clone(), Some(rec_tx.clone()))
            .run(bus.subscribe(), posttrade_cmd_rx),
    );

    // ---- Hedge pair engine ----
    if settings.hedge.enabled {
        let engine = hedge::HedgeEngine::new(
            settings.clone(),
            deps.clone(),
            router.clone(),
            stock_sw_rx.clone(),
            future_sw_rx.clone(),
            shutdown_rx.clone(),
        );
        tokio::spawn(engine.run(tick_btx.subscribe()));
    }

    // ---- Heartbeat + record tick & order ----
    let mut md_rx = tick_btx.subscribe();
    let mut bus_rx = bus.subscribe();
    let mut tick_count: u64 = 0;

    loop {
        select! {
            Ok(t) = md_rx.recv() => {
                tick_count += 1;
                let _ = rec_tx.try_send(Event::Tick(t));
            },
            Ok(ev) = bus_rx.recv() => {
                if let BusEvent::OrderUpdated(o) = ev {
                    let _ = rec_tx.try_send(Event::Order(o));
                }
            },
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                info!(ticks = tick_count, quota = quota.remaining(), "heartbeat");
                tick_count = 0;
            }
        }
    }
}

fn run_sim(settings: Settings, file: String, code: String, grid: SweepGrid) {
    let ticks = match feed::load_ticks(&file) {
        Ok(all) => all.into_iter().filter(|t| t.code == code).collect::<Vec<_>>(),
        Err(e) => {
            error!(?e, %file, "failed to load recorder file");
            std::process::exit(1);
        }
    };
    if ticks.is_empty() {
        error!(%code, %file, "no ticks for instrument in file");
        std::process::exit(1);
    }

    let class = if settings.futures.iter().any(|c| *c == code) {
        InstrumentClass::Future
    } else {
        InstrumentClass::Stock
    };
    let cfg = TraderCfg::from_settings(&settings, &code, class, LegDirection::Forward);
    let sim = Simulator::new(cfg, CostEngine::new(settings.quota.clone()));

    let base = sim.run(&ticks);
    println!(
        "base run: day={} trades={} forward={} reverse={} discount={} total={}",
        base.balance.day,
        base.balance.count,
        base.balance.forward,
        base.balance.reverse,
        base.balance.discount,
        base.balance.total
    );

    let outcomes = sim.sweep(&ticks, &grid);
    println!("sweep ({} combos, best first):", outcomes.len());
    for o in outcomes.iter().take(20) {
        println!(
            "  out_in={:>5.1} in_out={:>5.1} rate={:>5.2} -> trades={} total={}",
            o.out_in_ratio, o.in_out_ratio, o.rate_limit, o.balance.count, o.balance.total
        );
    }
}
