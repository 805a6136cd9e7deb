// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Core trading metrics --------
pub static TICKS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("ticks_total", "market data ticks").unwrap());

pub static TICKS_BY_CODE: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ticks_total_by_code", "market data ticks per instrument"),
        &["code"],
    )
    .unwrap()
});

pub static ENTRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("entries_total", "entry orders submitted"),
        &["code"],
    )
    .unwrap()
});

pub static EXITS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("exits_total", "exit orders submitted"), &["code"]).unwrap()
});

pub static CANCELS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("cancels_total", "cancel requests sent"),
        &["code"],
    )
    .unwrap()
});

pub static REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "rejects_total",
            "signals dropped before submit (label: reason)",
        ),
        &["reason"],
    )
    .unwrap()
});

pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("fills_total", "order fills"), &["code"]).unwrap()
});

// Kuota & controller
pub static QUOTA_REMAINING: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("quota_remaining_ntd", "remaining capital quota (NTD)").unwrap());

pub static TRADERS_ACTIVE: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("traders_active", "running per-instrument controllers").unwrap());

pub static HEDGE_LEGS: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("hedge_legs_active", "running hedge legs").unwrap());

// Post-trade
pub static BALANCE_TOTAL: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("trade_balance_total_ntd", "daily trade balance (NTD)"),
        &["day"],
    )
    .unwrap()
});

// ---- Config visibility (codes under management) ----
pub static CONFIG_CODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_code", "configured instruments (label: code)"),
        &["code"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(TICKS.clone())),
        REGISTRY.register(Box::new(TICKS_BY_CODE.clone())),
        REGISTRY.register(Box::new(ENTRIES.clone())),
        REGISTRY.register(Box::new(EXITS.clone())),
        REGISTRY.register(Box::new(CANCELS.clone())),
        REGISTRY.register(Box::new(REJECTS.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(QUOTA_REMAINING.clone())),
        REGISTRY.register(Box::new(TRADERS_ACTIVE.clone())),
        REGISTRY.register(Box::new(HEDGE_LEGS.clone())),
        REGISTRY.register(Box::new(BALANCE_TOTAL.clone())),
        REGISTRY.register(Box::new(CONFIG_CODE.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .unwrap_or_else(|e| panic!("metrics bind {} failed: {}", addr, e));
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
