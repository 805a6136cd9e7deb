// ===============================
// src/quota.rs
// ===============================
//
// Biaya beli/jual sesuai konvensi settlement bursa TW:
// - ceil untuk jumlah yang harus dibayar, floor untuk fee/pajak yang memotong proceeds.
// - Semua aritmetika lewat Decimal; f64 bisa salah bulat (mis. 100.12 * 1000).
// Quota modal = satu counter bersama untuk semua instrumen di buku yang sama;
// check + consume dilakukan dalam satu guard supaya interleaving antar trader
// tidak bisa menembus plafon.
//
use std::sync::{Arc, Mutex};

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::config::QuotaCfg;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("quota exhausted: need {need}, remaining {remaining}")]
    Exhausted { need: i64, remaining: i64 },
    #[error("credit {amount} would push remaining past configured {configured}")]
    OverCredit { amount: i64, configured: i64 },
    #[error("negative amount {0}")]
    Negative(i64),
}

/// Kalkulator biaya murni (tanpa state selain konfigurasi rasio).
#[derive(Debug, Clone)]
pub struct CostEngine {
    cfg: QuotaCfg,
}

const STOCK_LOT: i64 = 1000;

impl CostEngine {
    pub fn new(cfg: QuotaCfg) -> Self {
        Self { cfg }
    }

    fn dec(price: f64) -> Decimal {
        // Harga bursa maksimal 2 desimal; 4 dp cukup untuk membuang noise biner f64
        Decimal::from_f64(price).unwrap_or_default().round_dp(4)
    }

    fn stock_notional(price: f64, quantity: i64) -> Decimal {
        Self::dec(price) * Decimal::from(quantity) * Decimal::from(STOCK_LOT)
    }

    fn future_notional(&self, price: f64, quantity: i64) -> Decimal {
        Self::dec(price) * Decimal::from(quantity) * Decimal::from(self.cfg.future_multiplier)
    }

    /// ceil(n) + floor(n * fee)
    pub fn stock_buy_cost(&self, price: f64, quantity: i64) -> i64 {
        let n = Self::stock_notional(price, quantity);
        let fee = (n * self.cfg.fee_ratio).floor();
        (n.ceil() + fee).to_i64().unwrap_or(0)
    }

    /// ceil(n) - floor(n * fee) - floor(n * tax)
    pub fn stock_sell_proceeds(&self, price: f64, quantity: i64) -> i64 {
        let n = Self::stock_notional(price, quantity);
        let fee = (n * self.cfg.fee_ratio).floor();
        let tax = (n * self.cfg.tax_ratio).floor();
        (n.ceil() - fee - tax).to_i64().unwrap_or(0)
    }

    /// floor(n * fee) * (1 - discount_rate), di-floor ke integer NTD.
    pub fn stock_fee_discount(&self, price: f64, quantity: i64) -> i64 {
        let n = Self::stock_notional(price, quantity);
        let fee = (n * self.cfg.fee_ratio).floor();
        (fee * (Decimal::ONE - self.cfg.fee_discount_rate))
            .floor()
            .to_i64()
            .unwrap_or(0)
    }

    /// ceil(n) + floor(n * tax) + fixed_fee * qty
    pub fn future_buy_cost(&self, price: f64, quantity: i64) -> i64 {
        let n = self.future_notional(price, quantity);
        let tax = (n * self.cfg.future_tax_ratio).floor();
        (n.ceil() + tax).to_i64().unwrap_or(0) + self.cfg.future_fee_per_contract * quantity
    }

    /// ceil(n) - floor(n * tax) - fixed_fee * qty
    pub fn future_sell_proceeds(&self, price: f64, quantity: i64) -> i64 {
        let n = self.future_notional(price, quantity);
        let tax = (n * self.cfg.future_tax_ratio).floor();
        (n.ceil() - tax).to_i64().unwrap_or(0) - self.cfg.future_fee_per_contract * quantity
    }
}

#[derive(Debug)]
struct QuotaState {
    remaining: i64,
    configured: i64,
}

/// Plafon modal bersama. Clone murah (Arc); semua mutasi diserialisasi satu Mutex.
#[derive(Debug, Clone)]
pub struct SharedQuota {
    inner: Arc<Mutex<QuotaState>>,
}

impl SharedQuota {
    pub fn new(configured: i64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QuotaState {
                remaining: configured,
                configured,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QuotaState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn remaining(&self) -> i64 {
        self.lock().remaining
    }

    pub fn is_enough(&self, amount: i64) -> bool {
        self.lock().remaining >= amount
    }

    /// Check dan consume dalam SATU guard. Permintaan yang akan membuat counter
    /// negatif ditolak dengan error (indikasi bug logika), tidak pernah di-clamp.
    pub fn consume(&self, amount: i64) -> Result<(), QuotaError> {
        if amount < 0 {
            return Err(QuotaError::Negative(amount));
        }
        let mut st = self.lock();
        if st.remaining < amount {
            return Err(QuotaError::Exhausted {
                need: amount,
                remaining: st.remaining,
            });
        }
        st.remaining -= amount;
        Ok(())
    }

    /// Kredit balik (sell / cancel). Melebihi plafon awal juga bug logika.
    pub fn credit(&self, amount: i64) -> Result<(), QuotaError> {
        if amount < 0 {
            return Err(QuotaError::Negative(amount));
        }
        let mut st = self.lock();
        if st.remaining + amount > st.configured {
            return Err(QuotaError::OverCredit {
                amount,
                configured: st.configured,
            });
        }
        st.remaining += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn cfg() -> QuotaCfg {
        QuotaCfg {
            quota: 500_000,
            fee_ratio: Decimal::from_str("0.001425").unwrap(),
            tax_ratio: Decimal::from_str("0.0015").unwrap(),
            fee_discount_rate: Decimal::from_str("0.6").unwrap(),
            future_tax_ratio: Decimal::from_str("0.00002").unwrap(),
            future_fee_per_contract: 40,
            future_multiplier: 50,
        }
    }

    #[test]
    fn stock_buy_cost_exact() {
        let e = CostEngine::new(cfg());
        // notional 100000, fee = floor(142.5) = 142
        assert_eq!(e.stock_buy_cost(100.0, 1), 100_142);
    }

    #[test]
    fn stock_sell_proceeds_exact() {
        let e = CostEngine::new(cfg());
        // fee 142, tax = floor(150) = 150
        assert_eq!(e.stock_sell_proceeds(100.0, 1), 99_708);
    }

    #[test]
    fn stock_cost_fractional_price_no_float_drift() {
        let e = CostEngine::new(cfg());
        // 100.12 * 1000 = 100120 persis; f64 naif menghasilkan 100120.00000000001
        // dan ceil-nya salah jadi 100121
        assert_eq!(e.stock_buy_cost(100.12, 1), 100_120 + 142);
    }

    #[test]
    fn stock_fee_discount_floored() {
        let e = CostEngine::new(cfg());
        // fee 142 * (1 - 0.6) = 56.8 -> 56
        assert_eq!(e.stock_fee_discount(100.0, 1), 56);
    }

    #[test]
    fn bounds_vs_plain_notional() {
        let e = CostEngine::new(cfg());
        for (p, q) in [(17.35, 2), (512.0, 1), (88.8, 3)] {
            let ceil_n = (p * q as f64 * 1000.0).ceil() as i64;
            assert!(e.stock_buy_cost(p, q) >= ceil_n);
            assert!(e.stock_sell_proceeds(p, q) <= ceil_n);
        }
    }

    #[test]
    fn future_costs_exact() {
        let e = CostEngine::new(cfg());
        // notional 17000 * 50 = 850000, tax = floor(17) = 17
        assert_eq!(e.future_buy_cost(17_000.0, 1), 850_000 + 17 + 40);
        assert_eq!(e.future_sell_proceeds(17_000.0, 1), 850_000 - 17 - 40);
    }

    #[test]
    fn quota_consume_and_credit() {
        let q = SharedQuota::new(1_000);
        assert!(q.is_enough(1_000));
        q.consume(600).unwrap();
        assert_eq!(q.remaining(), 400);
        assert_eq!(
            q.consume(500),
            Err(QuotaError::Exhausted { need: 500, remaining: 400 })
        );
        q.credit(600).unwrap();
        assert_eq!(q.remaining(), 1_000);
        assert_eq!(
            q.credit(1),
            Err(QuotaError::OverCredit { amount: 1, configured: 1_000 })
        );
    }

    #[test]
    fn quota_concurrent_consume_is_serialized() {
        let q = SharedQuota::new(500);
        let mut handles = Vec::new();
        for _ in 0..10 {
            let q = q.clone();
            handles.push(std::thread::spawn(move || q.consume(100).is_ok()));
        }
        let ok = handles
            .into_iter()
            .map(|h| h.join().unwrap_or(false))
            .filter(|&b| b)
            .count();
        assert_eq!(ok, 5);
        assert_eq!(q.remaining(), 0);
    }
}
