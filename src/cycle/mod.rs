//! Cycle ledger and performance analytics.
//!
//! A cycle is one martingale position from first leg to final close. The
//! ledger records every trade of every cycle and keeps a [`CycleReport`]
//! current as cycles close.

mod ledger;
mod model;
mod report;

pub use ledger::{CycleLedger, LedgerError};
pub use model::{Cycle, CycleStatus, Trade};
pub use report::{CycleReport, CycleRow, StrategyBreakdown, SummaryStats};
