// ===============================
// src/simulator.rs (historical replay & parameter sweep)
// ===============================
//
// Replay array tick historis lewat DecisionCore yang SAMA dengan live trader,
// tanpa broker: order langsung dianggap fill. Setelah replay, setiap order
// diklasifikasikan forward/reverse dari posisi berjalan, lalu saldo per leg
// dihitung dengan CostEngine.
//
use chrono::{NaiveDate, Utc};
use tracing::info;

use crate::config::InstrumentClass;
use crate::domain::{Order, OrderState, TradeBalance, Tick};
use crate::quota::CostEngine;
use crate::trader::{DecisionCore, TraderCfg};

#[derive(Debug, Clone)]
pub struct SimReport {
    pub orders: Vec<Order>,
    pub balance: TradeBalance,
}

/// Satu titik pada grid sweep beserta hasilnya.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub out_in_ratio: f64,
    pub in_out_ratio: f64,
    pub rate_limit: f64,
    pub balance: TradeBalance,
}

/// Variasi ambang yang dijelajahi. Dimensi kosong memakai nilai konfigurasi dasar.
#[derive(Debug, Clone, Default)]
pub struct SweepGrid {
    pub out_in_ratios: Vec<f64>,
    pub in_out_ratios: Vec<f64>,
    pub rate_limits: Vec<f64>,
}

pub struct Simulator {
    cfg: TraderCfg,
    cost: CostEngine,
}

impl Simulator {
    pub fn new(cfg: TraderCfg, cost: CostEngine) -> Self {
        Self { cfg, cost }
    }

    /// Replay kronologis; order diisi seketika di harga order (tanpa slippage).
    pub fn run(&self, ticks: &[Tick]) -> SimReport {
        let mut core = DecisionCore::new(self.cfg.clone());
        let mut orders: Vec<Order> = Vec::new();
        let mut seq = 0_u64;

        for tick in ticks {
            core.push_tick(tick.clone());
            if let Some(mut order) = core.decide(tick, true) {
                if order.price <= 0.0 {
                    continue;
                }
                seq += 1;
                order.order_id = Some(format!("SIM-{}", seq));
                order.state = OrderState::Filled;
                order.trade_time = Some(order.order_time);
                core.mark_placed(order.order_time);
                orders.push(order.clone());
                core.record_filled(order);
            }
        }

        let day = ticks
            .first()
            .map(|t| t.time.date_naive())
            .unwrap_or_else(|| Utc::now().date_naive());
        let balance = settle(&orders, &self.cost, self.cfg.class, day);
        SimReport { orders, balance }
    }

    /// Cartesian sweep; tiap kombinasi adalah run independen tanpa side effect.
    /// Hasil diurutkan dari total saldo terbesar.
    pub fn sweep(&self, ticks: &[Tick], grid: &SweepGrid) -> Vec<SweepOutcome> {
        let axis = |values: &[f64], base: f64| -> Vec<f64> {
            if values.is_empty() {
                vec![base]
            } else {
                values.to_vec()
            }
        };
        let out_ins = axis(&grid.out_in_ratios, self.cfg.analyze.all_out_in_ratio);
        let in_outs = axis(&grid.in_out_ratios, self.cfg.analyze.all_in_out_ratio);
        let rates = axis(&grid.rate_limits, self.cfg.analyze.rate_limit);

        let mut outcomes = Vec::with_capacity(out_ins.len() * in_outs.len() * rates.len());
        for &out_in in &out_ins {
            for &in_out in &in_outs {
                for &rate in &rates {
                    let mut cfg = self.cfg.clone();
                    cfg.analyze.all_out_in_ratio = out_in;
                    cfg.analyze.all_in_out_ratio = in_out;
                    cfg.analyze.rate_limit = rate;
                    let report = Simulator::new(cfg, self.cost.clone()).run(ticks);
                    outcomes.push(SweepOutcome {
                        out_in_ratio: out_in,
                        in_out_ratio: in_out,
                        rate_limit: rate,
                        balance: report.balance,
                    });
                }
            }
        }
        outcomes.sort_by(|a, b| b.balance.total.cmp(&a.balance.total));
        info!(combos = outcomes.len(), "sweep finished");
        outcomes
    }
}

#[derive(Debug, Default)]
struct LegLedger {
    cash: i64,
    position: i64,
    count: i64,
}

/// Settlement dari himpunan order filled. Order bersifat reverse bila ia
/// MEMBALIK tanda posisi berjalan (prev dan new sama-sama non-nol, beda tanda);
/// selain itu forward. Leg yang posisinya tidak kembali ke nol dianggap tidak
/// resolved: saldonya dilaporkan 0, hitungan trade-nya tetap.
pub fn settle(
    orders: &[Order],
    cost: &CostEngine,
    class: InstrumentClass,
    day: NaiveDate,
) -> TradeBalance {
    let mut pos = 0_i64;
    let mut fwd = LegLedger::default();
    let mut rev = LegLedger::default();
    let mut discount = 0_i64;

    for o in orders {
        let signed = o.action.sign() * o.quantity;
        let prev = pos;
        pos += signed;
        let flips = prev != 0 && pos != 0 && (prev > 0) != (pos > 0);

        let cash = if signed > 0 {
            match class {
                InstrumentClass::Stock => -cost.stock_buy_cost(o.price, o.quantity),
                InstrumentClass::Future => -cost.future_buy_cost(o.price, o.quantity),
            }
        } else {
            match class {
                InstrumentClass::Stock => cost.stock_sell_proceeds(o.price, o.quantity),
                InstrumentClass::Future => cost.future_sell_proceeds(o.price, o.quantity),
            }
        };
        if class == InstrumentClass::Stock {
            discount += cost.stock_fee_discount(o.price, o.quantity);
        }

        let leg = if flips { &mut rev } else { &mut fwd };
        leg.cash += cash;
        leg.position += signed;
        leg.count += 1;
    }

    let forward = if fwd.position == 0 { fwd.cash } else { 0 };
    let reverse = if rev.position == 0 { rev.cash } else { 0 };
    TradeBalance {
        day,
        count: fwd.count + rev.count,
        forward,
        reverse,
        discount,
        total: forward + reverse + discount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnalyzeCfg, QuotaCfg, SessionCfg, TradeCfg};
    use crate::domain::{OrderAction, TickKind};
    use crate::trader::LegDirection;
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn cost() -> CostEngine {
        CostEngine::new(QuotaCfg {
            quota: 1_000_000,
            fee_ratio: Decimal::from_str("0.001425").unwrap(),
            tax_ratio: Decimal::from_str("0.0015").unwrap(),
            fee_discount_rate: Decimal::from_str("0.6").unwrap(),
            future_tax_ratio: Decimal::from_str("0.00002").unwrap(),
            future_fee_per_contract: 40,
            future_multiplier: 50,
        })
    }

    fn cfg() -> TraderCfg {
        TraderCfg {
            code: "2330".into(),
            label: "2330".into(),
            class: InstrumentClass::Stock,
            direction: LegDirection::Forward,
            trade: TradeCfg {
                allow_trade: true,
                quantity: 1,
                trade_in_wait_s: 10,
                trade_out_wait_s: 15,
                cancel_wait_s: 10,
                max_cancel_retry: 5,
                cool_off_s: 3600,
                hold_time_s: 3600,
            },
            analyze: AnalyzeCfg {
                max_hold_ticks: 500,
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
            session: SessionCfg {
                open: chrono::NaiveTime::from_hms_opt(1, 0, 0).unwrap(),
                first_part_mins: 150,
                second_part_mins: 90,
            },
        }
    }

    fn at(sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 1, 10, 0).single().unwrap()
            + chrono::Duration::seconds(sec as i64)
    }

    fn order(action: OrderAction, price: f64, quantity: i64, sec: u32) -> Order {
        Order {
            code: "2330".into(),
            action,
            price,
            quantity,
            group_id: "G-SIM".into(),
            order_id: Some(format!("OD-{}", sec)),
            state: OrderState::Filled,
            order_time: at(sec),
            trade_time: Some(at(sec)),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn balanced_round_trip_settles_forward() {
        let orders = vec![
            order(OrderAction::Buy, 100.0, 1, 0),
            order(OrderAction::Sell, 101.0, 1, 30),
        ];
        let b = settle(&orders, &cost(), InstrumentClass::Stock, day());
        // -buy_cost(100) + sell_proceeds(101) = -100_142 + 100_706
        assert_eq!(b.forward, 564);
        assert_eq!(b.reverse, 0);
        assert_eq!(b.count, 2);
        // refund 40% dari fee: floor(142*0.4) + floor(143*0.4)
        assert_eq!(b.discount, 113);
        assert_eq!(b.total, 677);
    }

    #[test]
    fn unbalanced_leg_reports_zero_balance_with_count() {
        let orders = vec![order(OrderAction::Buy, 100.0, 1, 0)];
        let b = settle(&orders, &cost(), InstrumentClass::Stock, day());
        assert_eq!(b.forward, 0);
        assert_eq!(b.count, 1);
    }

    #[test]
    fn sign_flip_classifies_reverse() {
        let orders = vec![
            order(OrderAction::Buy, 100.0, 1, 0),
            order(OrderAction::Sell, 101.0, 2, 30), // 1 -> -1: flip
            order(OrderAction::BuyLater, 100.5, 1, 60),
        ];
        let b = settle(&orders, &cost(), InstrumentClass::Stock, day());
        // kedua leg berakhir dengan posisi non-nol -> saldo 0, count tetap
        assert_eq!(b.forward, 0);
        assert_eq!(b.reverse, 0);
        assert_eq!(b.count, 3);
    }

    #[test]
    fn empty_ledger_settles_to_zero() {
        let b = settle(&[], &cost(), InstrumentClass::Stock, day());
        assert_eq!(b.count, 0);
        assert_eq!(b.total, 0);
    }

    fn burst_ticks() -> Vec<Tick> {
        let tick = |sec: u32, close: f64, kind: TickKind| Tick {
            code: "2330".into(),
            time: at(sec),
            open: close,
            close,
            high: close,
            low: close,
            volume: 5,
            total_volume: 100,
            kind,
            price_chg: 0.0,
            pct_chg: 0.0,
        };
        let mut ticks = vec![tick(0, 100.0, TickKind::Out)];
        for i in 1..=5 {
            ticks.push(tick(i, 100.0 + i as f64, TickKind::Out));
        }
        ticks
    }

    #[test]
    fn replay_enters_then_exits_on_rsi() {
        let report = Simulator::new(cfg(), cost()).run(&burst_ticks());
        assert_eq!(report.orders.len(), 2);
        assert_eq!(report.orders[0].action, OrderAction::Buy);
        assert_eq!(report.orders[1].action, OrderAction::Sell);
        assert_eq!(report.orders[0].group_id, report.orders[1].group_id);
        assert_eq!(report.balance.count, 2);
        assert!(report.balance.forward > 0);
        assert_eq!(report.balance.reverse, 0);
    }

    #[test]
    fn sweep_is_sorted_by_total_and_independent() {
        let grid = SweepGrid {
            out_in_ratios: vec![70.0, 101.0], // 101 tidak pernah tercapai
            in_out_ratios: vec![],
            rate_limits: vec![],
        };
        let sim = Simulator::new(cfg(), cost());
        let outcomes = sim.sweep(&burst_ticks(), &grid);
        assert_eq!(outcomes.len(), 2);
        assert!((outcomes[0].out_in_ratio - 70.0).abs() < f64::EPSILON);
        assert!(outcomes[0].balance.total > outcomes[1].balance.total);
        assert_eq!(outcomes[1].balance.count, 0);
    }
}
