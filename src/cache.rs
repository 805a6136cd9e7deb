// ===============================
// src/cache.rs
// ===============================
//
// Keyed store untuk data referensi (basic info, close historis, bias rate,
// array volume referensi untuk percentile). Diexpose sebagai trait supaya
// test bisa menyuntikkan varian in-memory deterministik; key dinamespace
// kategori + kode + (opsional) tanggal.
//
use std::sync::RwLock;

use ahash::AHashMap as HashMap;
use chrono::NaiveDate;

use crate::config::InstrumentClass;

#[derive(Debug, Clone)]
pub struct BasicInfo {
    pub code: String,
    pub name: String,
    pub class: InstrumentClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Category {
    Basic,
    HistoryClose,
    BiasRate,
    VolumeReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    category: Category,
    code: String,
    day: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
enum Value {
    Basic(BasicInfo),
    Number(f64),
    Volumes(Vec<i64>),
}

pub trait Cache: Send + Sync {
    fn basic_info(&self, code: &str) -> Option<BasicInfo>;
    fn set_basic_info(&self, info: BasicInfo);

    fn history_close(&self, code: &str, day: NaiveDate) -> Option<f64>;
    fn set_history_close(&self, code: &str, day: NaiveDate, close: f64);

    fn bias_rate(&self, code: &str) -> Option<f64>;
    fn set_bias_rate(&self, code: &str, rate: f64);

    /// Array volume historis, TERURUT MENURUN (kontrak volume_percentile).
    fn volume_reference(&self, code: &str) -> Option<Vec<i64>>;
    fn set_volume_reference(&self, code: &str, volumes: Vec<i64>);
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: RwLock<HashMap<Key, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &Key) -> Option<Value> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: Key, value: Value) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }
}

fn key(category: Category, code: &str, day: Option<NaiveDate>) -> Key {
    Key { category, code: code.to_string(), day }
}

impl Cache for MemoryCache {
    fn basic_info(&self, code: &str) -> Option<BasicInfo> {
        match self.get(&key(Category::Basic, code, None)) {
            Some(Value::Basic(info)) => Some(info),
            _ => None,
        }
    }

    fn set_basic_info(&self, info: BasicInfo) {
        let k = key(Category::Basic, &info.code, None);
        self.set(k, Value::Basic(info));
    }

    fn history_close(&self, code: &str, day: NaiveDate) -> Option<f64> {
        match self.get(&key(Category::HistoryClose, code, Some(day))) {
            Some(Value::Number(v)) => Some(v),
            _ => None,
        }
    }

    fn set_history_close(&self, code: &str, day: NaiveDate, close: f64) {
        self.set(key(Category::HistoryClose, code, Some(day)), Value::Number(close));
    }

    fn bias_rate(&self, code: &str) -> Option<f64> {
        match self.get(&key(Category::BiasRate, code, None)) {
            Some(Value::Number(v)) => Some(v),
            _ => None,
        }
    }

    fn set_bias_rate(&self, code: &str, rate: f64) {
        self.set(key(Category::BiasRate, code, None), Value::Number(rate));
    }

    fn volume_reference(&self, code: &str) -> Option<Vec<i64>> {
        match self.get(&key(Category::VolumeReference, code, None)) {
            Some(Value::Volumes(v)) => Some(v),
            _ => None,
        }
    }

    fn set_volume_reference(&self, code: &str, mut volumes: Vec<i64>) {
        // jaga kontrak descending apa pun input pemanggil
        volumes.sort_unstable_by(|a, b| b.cmp(a));
        self.set(key(Category::VolumeReference, code, None), Value::Volumes(volumes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_do_not_collide() {
        let c = MemoryCache::new();
        c.set_bias_rate("2330", 3.5);
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        c.set_history_close("2330", day, 600.0);
        assert_eq!(c.bias_rate("2330"), Some(3.5));
        assert_eq!(c.history_close("2330", day), Some(600.0));
        assert!(c.history_close("2330", day.succ_opt().unwrap()).is_none());
        assert!(c.bias_rate("2603").is_none());
    }

    #[test]
    fn volume_reference_sorted_descending() {
        let c = MemoryCache::new();
        c.set_volume_reference("2330", vec![10, 500, 40]);
        assert_eq!(c.volume_reference("2330"), Some(vec![500, 40, 10]));
    }
}
