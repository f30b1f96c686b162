//! Structured risk alerts.
//!
//! Alerts are logged as single-line JSON under the `risk_alert` target so they
//! can be filtered out of the regular log stream.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

/// What triggered the alert.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum RiskAlertType {
    /// New cycle admission halted
    TradingHalted { reason: String },
    /// Admission resumed after a halt
    TradingResumed { previous_reason: String },
    /// Daily realized plus unrealized loss hit the limit
    DailyLossLimit { total_pnl: Decimal, limit: Decimal },
    /// Daily profit target reached
    DailyProfitTarget { total_pnl: Decimal, target: Decimal },
    /// Active cycles near the concurrency cap
    CapacityWarning { active: usize, max: usize },
}

/// A risk alert ready for emission.
#[derive(Debug, Clone, Serialize)]
pub struct RiskAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub alert_type: RiskAlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub metrics: BTreeMap<String, Decimal>,
}

impl RiskAlert {
    pub fn new(alert_type: RiskAlertType, severity: AlertSeverity, message: impl Into<String>) -> Self {
        let timestamp = Utc::now();
        let alert_id = format!(
            "risk-{}-{}",
            timestamp.timestamp(),
            timestamp.timestamp_subsec_nanos()
        );

        Self {
            alert_id,
            timestamp,
            alert_type,
            severity,
            message: message.into(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: Decimal) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    /// Emit as a structured log line.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(target: "risk_alert", "RISK_ALERT: {}", json)
            }
        }
    }
}
