//! Risk management for the martingale engine.
//!
//! Provides:
//! - Global cycle admission against concurrency and daily P&L limits
//! - Daily risk metrics and risk-level classification
//! - Structured risk alerts
//! - Account equity drawdown tracking

mod admission;
mod alert;
mod drawdown;

pub use admission::{
    Admission, AdmissionController, AdmissionStatus, DailyRiskMetrics, HaltCause, RiskLevel,
};
pub use alert::{AlertSeverity, RiskAlert, RiskAlertType};
pub use drawdown::{DrawdownStats, DrawdownTracker, EquitySnapshot};
