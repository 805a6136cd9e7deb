// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Sisi agresor dari sebuah tick (konvensi bursa TW: Out = beli di ask, In = jual di bid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickKind { Out, In, Neutral }

/// Satu trade print untuk sebuah instrumen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub code: String,
    pub time: DateTime<Utc>,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: i64,
    pub total_volume: i64,
    pub kind: TickKind,
    pub price_chg: f64,
    pub pct_chg: f64,
}

/// Satu level harga pada quote 5-level.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Level { pub price: f64, pub volume: i64, pub delta: i64 }

/// Quote bid/ask 5 level. Latest-wins: controller hanya menyimpan nilai terakhir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidAsk {
    pub code: String,
    pub time: DateTime<Utc>,
    pub bids: [Level; 5],
    pub asks: [Level; 5],
}

impl BidAsk {
    pub fn best_bid(&self) -> f64 { self.bids[0].price }
    pub fn best_ask(&self) -> f64 { self.asks[0].price }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderAction { Buy, Sell, SellFirst, BuyLater }

impl OrderAction {
    /// Tanda posisi: beli menambah, jual mengurangi.
    pub fn sign(&self) -> i64 {
        match self {
            OrderAction::Buy | OrderAction::BuyLater => 1,
            OrderAction::Sell | OrderAction::SellFirst => -1,
        }
    }

    /// Apakah action ini membuka posisi (entry) untuk leg arah forward.
    pub fn is_entry(&self) -> bool {
        matches!(self, OrderAction::Buy | OrderAction::SellFirst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState { Submitted, Filled, Cancelled, Aborted, Failed, Unknown }

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Aborted | OrderState::Failed
        )
    }
}

/// Order yang dihasilkan signal-generation dan didorong melewati lifecycle
/// submit -> wait -> {fill, cancel, retry}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub code: String,
    pub action: OrderAction,
    pub price: f64,
    pub quantity: i64,
    /// Mengikat entry dengan exit pasangannya; dicetak sekali di entry, dipakai ulang apa adanya.
    pub group_id: String,
    /// Diberikan broker setelah ack; None selama belum ter-acknowledge.
    pub order_id: Option<String>,
    pub state: OrderState,
    pub order_time: DateTime<Utc>,
    pub trade_time: Option<DateTime<Utc>>,
}

impl Order {
    /// Order masih boleh di-cancel selama belum terminal.
    pub fn cancellable(&self) -> bool {
        !self.state.is_terminal()
    }
}

/// Status event dari broker collaborator (jalur konfirmasi asinkron).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order_id: String,
    pub code: String,
    pub action: OrderAction,
    pub price: f64,
    pub quantity: i64,
    pub state: OrderState,
    pub order_time: DateTime<Utc>,
}

/// Saldo perdagangan per hari bursa. Dihitung ulang dari himpunan order filled,
/// tidak pernah dimutasi inkremental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeBalance {
    pub day: NaiveDate,
    pub count: i64,
    pub forward: i64,
    pub reverse: i64,
    pub discount: i64,
    pub total: i64,
}

/// Envelope untuk recorder JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Tick(Tick),
    BidAsk(BidAsk),
    Order(Order),
    Balance(TradeBalance),
    Note(String),
}
