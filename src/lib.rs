//! # Multi Martingale
//!
//! A multi-strategy martingale engine: several position-averaging strategy
//! variants run side by side on shared capital, gated by a global admission
//! controller, with every cycle recorded for performance analytics.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Market data and order types, broker traits, paper broker
//! - `strategy`: Position sizing, per-variant policies (CDM, WDM, ZRM, IZRM),
//!   strategy state machines and cross-strategy coordination
//! - `risk`: Cycle admission, daily limits, risk alerts and drawdown tracking
//! - `cycle`: Cycle ledger and aggregate performance report
//! - `engine`: Tick-driven orchestrator and its event queue
//! - `backtest`: Tick replay against the paper broker
//! - `utils`: Shared utilities and decimal arithmetic

pub mod backtest;
pub mod config;
pub mod cycle;
pub mod engine;
pub mod exchange;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
