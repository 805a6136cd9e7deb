// ===============================
// src/feed.rs
// ===============================
//
// Market data adapters:
// - run_mock   : random-walk generator Tick + BidAsk (paper trading)
// - load_ticks : baca ulang file JSONL recorder untuk simulator
//
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use chrono::Utc;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::domain::{BidAsk, Event, Level, Tick, TickKind};

/// Generator market data mock (random walk) ~5 ticks/s per instrumen.
pub async fn run_mock(
    code: String,
    tick_tx: broadcast::Sender<Tick>,
    bidask_tx: broadcast::Sender<BidAsk>,
) {
    info!(code = %code, "mock feed started");
    let mut px: f64 = 100.0;
    let mut total_volume: i64 = 0;

    loop {
        // jangan simpan ThreadRng melewati .await
        let (step, volume, roll) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(-5..=5_i64) as f64 * 0.01,
                rng.gen_range(1..=20_i64),
                rng.gen_range(0..100_u32),
            )
        };
        let prev = px;
        px = ((px + step) * 100.0).round() / 100.0;
        if px < 1.0 {
            px = 1.0;
        }
        // agresor: ~45% out, ~45% in, sisanya neutral
        let kind = if roll < 45 {
            TickKind::Out
        } else if roll < 90 {
            TickKind::In
        } else {
            TickKind::Neutral
        };
        total_volume += volume;
        let now = Utc::now();

        let tick = Tick {
            code: code.clone(),
            time: now,
            open: prev,
            close: px,
            high: px.max(prev),
            low: px.min(prev),
            volume,
            total_volume,
            kind,
            price_chg: px - prev,
            pct_chg: if prev > 0.0 { (px - prev) / prev * 100.0 } else { 0.0 },
        };
        let _ = tick_tx.send(tick);

        let bids: [Level; 5] = std::array::from_fn(|i| Level {
            price: px - 0.05 * (i + 1) as f64,
            volume: 10 + i as i64,
            delta: 0,
        });
        let asks: [Level; 5] = std::array::from_fn(|i| Level {
            price: px + 0.05 * (i + 1) as f64,
            volume: 10 + i as i64,
            delta: 0,
        });
        let _ = bidask_tx.send(BidAsk { code: code.clone(), time: now, bids, asks });

        sleep(Duration::from_millis(200)).await;
    }
}

/// Baca tick historis dari file JSONL recorder. Baris non-Tick dilewati,
/// baris rusak dicatat lalu dilewati; hasil diurutkan kronologis.
pub fn load_ticks(path: &str) -> io::Result<Vec<Tick>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut ticks = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(Event::Tick(t)) => ticks.push(t),
            Ok(_) => {}
            Err(e) => warn!(line = idx + 1, err = %e, "skipping unparseable recorder line"),
        }
    }
    ticks.sort_by_key(|t| t.time);
    info!(%path, count = ticks.len(), "historical ticks loaded");
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    fn tick_at(sec: u32) -> Tick {
        Tick {
            code: "2330".into(),
            time: Utc.with_ymd_and_hms(2026, 3, 2, 1, 10, sec).single().unwrap(),
            open: 100.0,
            close: 100.0,
            high: 100.0,
            low: 100.0,
            volume: 5,
            total_volume: 100,
            kind: TickKind::Out,
            price_chg: 0.0,
            pct_chg: 0.0,
        }
    }

    #[test]
    fn load_ticks_filters_and_sorts() {
        let path = std::env::temp_dir().join(format!("feed_load_test_{}.jsonl", std::process::id()));
        {
            let mut f = File::create(&path).unwrap();
            let later = serde_json::to_string(&Event::Tick(tick_at(30))).unwrap();
            let earlier = serde_json::to_string(&Event::Tick(tick_at(10))).unwrap();
            let note = serde_json::to_string(&Event::Note("boot".into())).unwrap();
            writeln!(f, "{}", later).unwrap();
            writeln!(f, "{}", note).unwrap();
            writeln!(f, "not json at all").unwrap();
            writeln!(f, "{}", earlier).unwrap();
        }

        let ticks = load_ticks(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(ticks.len(), 2);
        assert!(ticks[0].time < ticks[1].time);
    }

    #[test]
    fn load_ticks_missing_file_is_an_error() {
        assert!(load_ticks("/nonexistent/feed.jsonl").is_err());
    }
}
