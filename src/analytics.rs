// ===============================
// src/analytics.rs
// ===============================
//
// Rolling tick window + K-bar per menit untuk satu instrumen.
// Semua komputasi pure atas buffer milik sendiri; eviksi lewat tiga jalur:
// - jumlah tick maksimum (count-based)
// - horizon waktu sejak tick terbaru (time-based)
// - gap antar tick > gap_secs -> window dikosongkan total; burst "catch-up"
//   setelah feed outage tidak boleh terbaca sebagai satu burst cepat.
//
use std::collections::VecDeque;

use chrono::{DateTime, Duration, Timelike, Utc};

use crate::domain::{Tick, TickKind};

const MAX_BARS: usize = 120;

/// OHLCV agregat per menit, dibangun inkremental dari tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KBar {
    pub bucket: DateTime<Utc>,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
}

#[derive(Debug)]
pub struct TickWindow {
    max_ticks: usize,
    window_secs: i64,
    gap_secs: i64,
    ticks: VecDeque<Tick>,
    bars: VecDeque<KBar>,
}

impl TickWindow {
    pub fn new(max_ticks: usize, window_secs: i64, gap_secs: i64) -> Self {
        Self {
            max_ticks,
            window_secs,
            gap_secs,
            ticks: VecDeque::with_capacity(max_ticks),
            bars: VecDeque::with_capacity(MAX_BARS),
        }
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn last(&self) -> Option<&Tick> {
        self.ticks.back()
    }

    pub fn push(&mut self, tick: Tick) {
        // Gap reset: jeda terlalu lama antara dua tick berurutan
        if let Some(prev) = self.ticks.back() {
            if (tick.time - prev.time).num_seconds() > self.gap_secs {
                self.ticks.clear();
                self.bars.clear();
            }
        }

        self.update_bar(&tick);
        self.ticks.push_back(tick);

        while self.ticks.len() > self.max_ticks {
            self.ticks.pop_front();
        }
        if let Some(newest) = self.ticks.back().map(|t| t.time) {
            let horizon = newest - Duration::seconds(self.window_secs);
            while self.ticks.front().map(|t| t.time < horizon).unwrap_or(false) {
                self.ticks.pop_front();
            }
        }
    }

    fn update_bar(&mut self, tick: &Tick) {
        let bucket = tick
            .time
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(tick.time);

        match self.bars.back_mut() {
            Some(bar) if bar.bucket == bucket => {
                bar.close = tick.close;
                if tick.close > bar.high {
                    bar.high = tick.close;
                }
                if tick.close < bar.low {
                    bar.low = tick.close;
                }
                bar.volume += tick.volume;
            }
            _ => {
                self.bars.push_back(KBar {
                    bucket,
                    open: tick.close,
                    close: tick.close,
                    high: tick.close,
                    low: tick.close,
                    volume: tick.volume,
                });
                if self.bars.len() > MAX_BARS {
                    self.bars.pop_front();
                }
            }
        }
    }

    /// Slice tick dengan umur <= secs dari tick terbaru.
    fn trailing(&self, secs: i64) -> impl Iterator<Item = &Tick> {
        let cutoff = self
            .ticks
            .back()
            .map(|t| t.time - Duration::seconds(secs));
        self.ticks
            .iter()
            .filter(move |t| cutoff.map(|c| t.time >= c).unwrap_or(false))
    }

    /// 100 * volume out / (out + in) pada slice trailing.
    /// 0 berarti "tidak ada sinyal" (slice kosong atau semua neutral), bukan "semua jual".
    pub fn out_in_ratio(&self, secs: i64) -> f64 {
        let (mut out, mut inn) = (0i64, 0i64);
        for t in self.trailing(secs) {
            match t.kind {
                TickKind::Out => out += t.volume,
                TickKind::In => inn += t.volume,
                TickKind::Neutral => {}
            }
        }
        let total = out + inn;
        if total == 0 {
            return 0.0;
        }
        100.0 * out as f64 / total as f64
    }

    /// Tick per detik pada slice trailing; 0 jika di bawah 2 tick.
    pub fn rate(&self, secs: i64) -> f64 {
        let slice: Vec<&Tick> = self.trailing(secs).collect();
        if slice.len() < 2 {
            return 0.0;
        }
        let span = (slice[slice.len() - 1].time - slice[0].time)
            .num_milliseconds() as f64
            / 1000.0;
        if span <= 0.0 {
            return 0.0;
        }
        (slice.len() - 1) as f64 / span
    }

    /// RSI sederhana atas close sejak `since`; 0 = data belum cukup
    /// (pemanggil WAJIB menahan keputusan exit, bukan membacanya sebagai oversold).
    pub fn rsi(&self, since: DateTime<Utc>, min_count: usize) -> f64 {
        let closes: Vec<f64> = self
            .ticks
            .iter()
            .filter(|t| t.time >= since)
            .map(|t| t.close)
            .collect();
        if closes.len() < min_count || closes.len() < 2 {
            return 0.0;
        }
        let (mut gain, mut loss) = (0.0f64, 0.0f64);
        for w in closes.windows(2) {
            let d = w[1] - w[0];
            if d > 0.0 {
                gain += d;
            } else {
                loss += -d;
            }
        }
        if loss == 0.0 {
            return if gain == 0.0 { 50.0 } else { 100.0 };
        }
        let rs = gain / loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    /// Kontraksi monotonik: `count` bar terakhir high tidak naik dan low tidak
    /// turun terhadap bar tepat sebelumnya. Gerbang volatilitas-rendah untuk entry.
    pub fn bars_stable(&self, count: usize) -> bool {
        if count == 0 || self.bars.len() < count + 1 {
            return false;
        }
        let bars: Vec<&KBar> = self.bars.iter().collect();
        let start = bars.len() - count;
        for i in start..bars.len() {
            let prev = bars[i - 1];
            let cur = bars[i];
            if cur.high > prev.high || cur.low < prev.low {
                return false;
            }
        }
        true
    }

    pub fn bars(&self) -> impl Iterator<Item = &KBar> {
        self.bars.iter()
    }
}

/// Ranking volume terhadap array referensi historis TERURUT MENURUN:
/// 100 * (total - posisi) / total; 0 jika referensi < 2 titik.
pub fn volume_percentile(reference_desc: &[i64], volume: i64) -> f64 {
    let total = reference_desc.len();
    if total < 2 {
        return 0.0;
    }
    let position = reference_desc.iter().take_while(|&&v| v > volume).count();
    100.0 * (total - position) as f64 / total as f64
}
