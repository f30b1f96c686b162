//! Backtesting: replay historical ticks through the orchestrator.
//!
//! This module provides:
//! - Tick loading from CSV
//! - A replay engine driving the orchestrator with a paper broker
//! - Results combining the cycle report with the account equity curve
//!
//! # Example
//!
//! ```rust,ignore
//! use multi_martingale::backtest::{BacktestConfig, BacktestEngine, CsvTickSource};
//!
//! let source = CsvTickSource::new("data/spy_ticks.csv")?;
//! let mut engine = BacktestEngine::new(source, config, BacktestConfig::default());
//!
//! let result = engine.run(start, end)?;
//! println!("{}", result.summary());
//! ```

mod data;
mod engine;

pub use data::{CsvTickSource, TickSource};
pub use engine::{BacktestEngine, BacktestResult};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Initial capital for the paper account
    pub initial_balance: Decimal,

    /// Commission as a fraction of notional
    pub commission_rate: Decimal,

    /// Close cycles still open when the data runs out (marked STOPPED)
    pub flatten_at_end: bool,

    /// Directory for result files (optional)
    pub output_path: Option<String>,
}

impl BacktestConfig {
    /// Take balance and commission from the engine settings.
    pub fn from_engine(engine: &EngineConfig) -> Self {
        Self {
            initial_balance: engine.initial_balance,
            commission_rate: engine.commission_rate,
            ..Self::default()
        }
    }
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::new(10000, 0), // $10,000
            commission_rate: Decimal::new(2, 3),     // 0.2%
            flatten_at_end: true,
            output_path: None,
        }
    }
}
