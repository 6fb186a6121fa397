//! Core domain types and logic.

pub mod aggregator;
pub mod backtest;
pub mod candle;
pub mod config_validation;
pub mod error;
pub mod indicator;
pub mod math;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod strategy;
pub mod tick_runner;
pub mod trader;
