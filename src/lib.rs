// ===============================
// src/lib.rs
// ===============================
//
// Intraday decision & order-lifecycle engine untuk saham/futures TW.
// Modul diexpose sebagai library supaya integration test bisa merakit
// pipeline yang sama dengan main.rs.
//
pub mod analytics;
pub mod broker;
pub mod bus;
pub mod cache;
pub mod config;
pub mod domain;
pub mod feed;
pub mod hedge;
pub mod metrics;
pub mod posttrade;
pub mod quota;
pub mod recorder;
pub mod simulator;
pub mod trader;
