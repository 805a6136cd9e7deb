// ===============================
// src/config.rs
// ===============================
//
// Konfigurasi via ENV (.env didukung lewat dotenvy), gaya flat key=value:
//   STOCKS=2330,2603            daftar saham yang disubscribe
//   FUTURES=MXFR1               daftar futures
//   QUOTA=500000                plafon modal posisi saham (NTD)
//   ALL_OUT_IN_RATIO=60         ambang entry beli
//   ...
// Semua angka fee/tax disimpan sebagai Decimal agar pembulatan settlement
// cocok bit-for-bit dengan aturan bursa.
//
use std::env;
use std::str::FromStr;

use chrono::NaiveTime;
use dotenvy::dotenv;
use rust_decimal::Decimal;

/// Kelas instrumen; menentukan formula biaya, multiplier, dan wait time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentClass {
    Stock,
    Future,
}

/// Switch & timing perdagangan per kelas instrumen.
#[derive(Debug, Clone)]
pub struct TradeCfg {
    /// Trade switch: false = entry baru dibuang sebelum submit, exit tetap jalan.
    pub allow_trade: bool,
    pub quantity: i64,
    pub trade_in_wait_s: i64,
    pub trade_out_wait_s: i64,
    pub cancel_wait_s: i64,
    pub max_cancel_retry: u32,
    /// Jeda minimum sejak order terakhir ditempatkan sebelum entry berikutnya.
    pub cool_off_s: i64,
    pub hold_time_s: i64,
}

/// Ambang-ambang analisis sinyal.
#[derive(Debug, Clone)]
pub struct AnalyzeCfg {
    pub max_hold_ticks: usize,
    pub window_secs: i64,
    /// Gap antar tick melebihi ini -> window direset (proteksi burst catch-up).
    pub gap_secs: i64,
    pub all_out_in_ratio: f64,
    pub all_in_out_ratio: f64,
    pub rate_limit: f64,
    pub rsi_min_count: usize,
    pub rsi_exit_high: f64,
    pub rsi_exit_low: f64,
    pub volume_pr_limit: f64,
    pub stable_bar_count: usize,
    /// Deviasi bias-rate (dari cache) yang memicu boost quantity 2x.
    pub bias_boost: f64,
}

/// Rasio biaya/pajak + kuota modal. Ratio dalam Decimal, hasil selalu integer NTD.
#[derive(Debug, Clone)]
pub struct QuotaCfg {
    pub quota: i64,
    pub fee_ratio: Decimal,
    pub tax_ratio: Decimal,
    /// Fraksi fee yang tetap dibayar; refund = fee * (1 - rate).
    pub fee_discount_rate: Decimal,
    pub future_tax_ratio: Decimal,
    pub future_fee_per_contract: i64,
    pub future_multiplier: i64,
}

/// Dua jendela waktu harian yang membatasi KAPAN entry boleh dibuat.
/// Saham: hanya bagian pertama. Futures: bagian pertama + kedua.
#[derive(Debug, Clone)]
pub struct SessionCfg {
    pub open: NaiveTime,
    pub first_part_mins: i64,
    pub second_part_mins: i64,
}

impl SessionCfg {
    /// Apakah `time` berada dalam jendela entry untuk kelas instrumen tsb.
    pub fn entry_allowed(&self, class: InstrumentClass, time: NaiveTime) -> bool {
        let elapsed = (time - self.open).num_minutes();
        if elapsed < 0 {
            return false;
        }
        match class {
            InstrumentClass::Stock => elapsed < self.first_part_mins,
            InstrumentClass::Future => elapsed < self.first_part_mins + self.second_part_mins,
        }
    }
}

/// Knob untuk hedge-pair engine.
#[derive(Debug, Clone)]
pub struct HedgeCfg {
    pub enabled: bool,
    pub pair: (String, String),
    /// Selisih absolut out-in ratio kedua instrumen yang memicu spawn pasangan.
    pub trigger_gap: f64,
    pub min_ticks: usize,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub stocks: Vec<String>,
    pub futures: Vec<String>,
    pub record_file: Option<String>,
    pub metrics_port: u16,
    pub stock_trade: TradeCfg,
    pub future_trade: TradeCfg,
    pub analyze: AnalyzeCfg,
    pub quota: QuotaCfg,
    pub session: SessionCfg,
    pub hedge: HedgeCfg,
}

impl Settings {
    pub fn trade_cfg(&self, class: InstrumentClass) -> &TradeCfg {
        match class {
            InstrumentClass::Stock => &self.stock_trade,
            InstrumentClass::Future => &self.future_trade,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => true,
        "0" | "false" | "off" | "no" => false,
        _ => default,
    }
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|x| x.trim())
                .filter(|x| !x.is_empty())
                .map(|x| x.to_ascii_uppercase())
                .collect()
        })
        .unwrap_or_default()
}

fn env_decimal(key: &str, default: &str) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|s| Decimal::from_str(&s).ok())
        .unwrap_or_else(|| Decimal::from_str(default).unwrap())
}

pub fn load() -> Settings {
    // Pastikan .env terbaca (QUOTA, STOCKS, dll)
    let _ = dotenv();

    let mut stocks = env_list("STOCKS");
    if stocks.is_empty() {
        stocks = vec!["2330".to_string()];
    }
    let futures = env_list("FUTURES");

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env_parse("METRICS_PORT", 9898u16);

    let stock_trade = TradeCfg {
        allow_trade: env_bool("STOCK_TRADE_SWITCH", true),
        quantity: env_parse("STOCK_QUANTITY", 1),
        trade_in_wait_s: env_parse("STOCK_TRADE_IN_WAIT_S", 30),
        trade_out_wait_s: env_parse("STOCK_TRADE_OUT_WAIT_S", 30),
        cancel_wait_s: env_parse("STOCK_CANCEL_WAIT_S", 15),
        max_cancel_retry: env_parse("STOCK_MAX_CANCEL_RETRY", 5u32),
        cool_off_s: env_parse("STOCK_COOL_OFF_S", 60),
        hold_time_s: env_parse("STOCK_HOLD_TIME_S", 1800),
    };
    let future_trade = TradeCfg {
        allow_trade: env_bool("FUTURE_TRADE_SWITCH", true),
        quantity: env_parse("FUTURE_QUANTITY", 1),
        trade_in_wait_s: env_parse("FUTURE_TRADE_IN_WAIT_S", 15),
        trade_out_wait_s: env_parse("FUTURE_TRADE_OUT_WAIT_S", 15),
        cancel_wait_s: env_parse("FUTURE_CANCEL_WAIT_S", 10),
        max_cancel_retry: env_parse("FUTURE_MAX_CANCEL_RETRY", 5u32),
        cool_off_s: env_parse("FUTURE_COOL_OFF_S", 30),
        hold_time_s: env_parse("FUTURE_HOLD_TIME_S", 900),
    };

    let analyze = AnalyzeCfg {
        max_hold_ticks: env_parse("MAX_HOLD_TICKS", 512usize),
        window_secs: env_parse("WINDOW_SECS", 60),
        gap_secs: env_parse("GAP_SECS", 10),
        all_out_in_ratio: env_parse("ALL_OUT_IN_RATIO", 60.0),
        all_in_out_ratio: env_parse("ALL_IN_OUT_RATIO", 40.0),
        rate_limit: env_parse("RATE_LIMIT", 3.0),
        rsi_min_count: env_parse("RSI_MIN_COUNT", 6usize),
        rsi_exit_high: env_parse("RSI_EXIT_HIGH", 70.0),
        rsi_exit_low: env_parse("RSI_EXIT_LOW", 30.0),
        volume_pr_limit: env_parse("VOLUME_PR_LIMIT", 80.0),
        stable_bar_count: env_parse("STABLE_BAR_COUNT", 3usize),
        bias_boost: env_parse("BIAS_BOOST", 4.0),
    };

    let quota = QuotaCfg {
        quota: env_parse("QUOTA", 500_000),
        fee_ratio: env_decimal("FEE_RATIO", "0.001425"),
        // Pajak day-trade saham (dipotong separuh dari 0.003)
        tax_ratio: env_decimal("TAX_RATIO", "0.0015"),
        fee_discount_rate: env_decimal("FEE_DISCOUNT_RATE", "0.6"),
        future_tax_ratio: env_decimal("FUTURE_TAX_RATIO", "0.00002"),
        future_fee_per_contract: env_parse("FUTURE_FEE_PER_CONTRACT", 40),
        future_multiplier: env_parse("FUTURE_MULTIPLIER", 50),
    };

    let session = SessionCfg {
        open: env::var("SESSION_OPEN")
            .ok()
            .and_then(|s| NaiveTime::parse_from_str(&s, "%H:%M").ok())
            .unwrap_or_else(|| NaiveTime::from_hms_opt(1, 0, 0).unwrap()), // 09:00 TW = 01:00 UTC
        first_part_mins: env_parse("FIRST_PART_MINS", 150),
        second_part_mins: env_parse("SECOND_PART_MINS", 90),
    };

    let pair = {
        let mut p = env_list("HEDGE_PAIR");
        if p.len() != 2 {
            p = vec!["2603".to_string(), "2609".to_string()];
        }
        (p[0].clone(), p[1].clone())
    };
    let hedge = HedgeCfg {
        enabled: env_bool("HEDGE_ENABLED", false),
        pair,
        trigger_gap: env_parse("HEDGE_TRIGGER_GAP", 30.0),
        min_ticks: env_parse("HEDGE_MIN_TICKS", 30usize),
    };

    Settings {
        stocks,
        futures,
        record_file,
        metrics_port,
        stock_trade,
        future_trade,
        analyze,
        quota,
        session,
        hedge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_window_stock_vs_future() {
        let s = SessionCfg {
            open: NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
            first_part_mins: 150,
            second_part_mins: 90,
        };
        let in_first = NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        let in_second = NaiveTime::from_hms_opt(4, 0, 0).unwrap();
        let after_all = NaiveTime::from_hms_opt(6, 0, 0).unwrap();
        let before_open = NaiveTime::from_hms_opt(0, 30, 0).unwrap();

        assert!(s.entry_allowed(InstrumentClass::Stock, in_first));
        assert!(!s.entry_allowed(InstrumentClass::Stock, in_second));
        assert!(s.entry_allowed(InstrumentClass::Future, in_second));
        assert!(!s.entry_allowed(InstrumentClass::Future, after_all));
        assert!(!s.entry_allowed(InstrumentClass::Stock, before_open));
    }
}
