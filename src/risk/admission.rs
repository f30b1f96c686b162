//! Global admission control across every strategy.
//!
//! The controller answers "may a new cycle start now?" against the
//! concurrency cap and the daily P&L limits, and keeps one
//! [`DailyRiskMetrics`] record per calendar day. It is the only globally
//! mutable state in the engine and is owned by the orchestrator.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

use super::alert::{AlertSeverity, RiskAlert, RiskAlertType};
use crate::config::AdmissionLimits;
use crate::utils::safe_div;

/// Answer to an admission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Granted,
    Refused { reason: String },
}

impl Admission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Admission::Granted)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Admission::Granted => None,
            Admission::Refused { reason } => Some(reason),
        }
    }
}

/// Coarse risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Classify the worst of the loss, concurrency and drawdown ratios.
    pub fn from_ratio(ratio: Decimal) -> Self {
        if ratio >= dec!(0.9) {
            RiskLevel::Critical
        } else if ratio >= dec!(0.7) {
            RiskLevel::High
        } else if ratio >= dec!(0.4) {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

/// Risk figures for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRiskMetrics {
    pub date: NaiveDate,
    pub total_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub active_cycles: usize,
    pub completed_cycles: u32,
    /// Largest drop of `total_pnl` from its intraday peak
    pub max_drawdown: Decimal,
    /// Highest `total_pnl` seen today
    pub peak_equity: Decimal,
    pub trades_count: u64,
    pub traded_value: Decimal,
    pub commission_paid: Decimal,
}

impl DailyRiskMetrics {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            total_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            active_cycles: 0,
            completed_cycles: 0,
            max_drawdown: Decimal::ZERO,
            peak_equity: Decimal::ZERO,
            trades_count: 0,
            traded_value: Decimal::ZERO,
            commission_paid: Decimal::ZERO,
        }
    }

    fn update_peak_and_drawdown(&mut self) {
        if self.total_pnl > self.peak_equity {
            self.peak_equity = self.total_pnl;
        }
        let drawdown = self.peak_equity - self.total_pnl;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
        }
    }
}

/// Read-only snapshot for reporting layers.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatus {
    pub metrics: DailyRiskMetrics,
    pub limits: AdmissionLimits,
    pub halted: bool,
    pub halt_reason: Option<String>,
    pub risk_level: RiskLevel,
    pub can_start_new_cycle: bool,
    pub warnings: Vec<String>,
    /// Share of the daily loss limit consumed (0 when in profit)
    pub loss_limit_usage: Decimal,
    pub cycle_capacity_usage: Decimal,
}

/// Why admission is halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltCause {
    /// Daily loss limit or profit target; clears on day rollover
    DailyLimit,
    /// External command; clears only on resume
    Operator,
}

enum Verdict {
    Allow,
    Refuse(String),
    /// Refuse and halt all further admission
    Halt(String),
}

pub struct AdmissionController {
    limits: AdmissionLimits,
    /// Open cycle id -> owning strategy id
    active_cycles: HashMap<String, String>,
    halt_cause: Option<HaltCause>,
    halt_reason: String,
    current_date: NaiveDate,
    daily: BTreeMap<NaiveDate, DailyRiskMetrics>,
}

impl AdmissionController {
    pub fn new(limits: AdmissionLimits, today: NaiveDate) -> Self {
        let mut daily = BTreeMap::new();
        daily.insert(today, DailyRiskMetrics::new(today));

        Self {
            limits,
            active_cycles: HashMap::new(),
            halt_cause: None,
            halt_reason: String::new(),
            current_date: today,
            daily,
        }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    pub fn is_halted(&self) -> bool {
        self.halt_cause.is_some()
    }

    pub fn halt_cause(&self) -> Option<HaltCause> {
        self.halt_cause
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_cause.map(|_| self.halt_reason.as_str())
    }

    pub fn current_date(&self) -> NaiveDate {
        self.current_date
    }

    pub fn active_cycle_count(&self) -> usize {
        self.active_cycles.len()
    }

    pub fn is_cycle_active(&self, cycle_id: &str) -> bool {
        self.active_cycles.contains_key(cycle_id)
    }

    /// Today's metrics.
    pub fn today(&self) -> &DailyRiskMetrics {
        // The current date always has an entry; see `update_current_date`.
        &self.daily[&self.current_date]
    }

    /// Metrics for `date`, or an empty record if nothing happened that day.
    pub fn daily_summary(&self, date: NaiveDate) -> DailyRiskMetrics {
        self.daily
            .get(&date)
            .cloned()
            .unwrap_or_else(|| DailyRiskMetrics::new(date))
    }

    pub fn daily_history(&self) -> impl Iterator<Item = &DailyRiskMetrics> {
        self.daily.values()
    }

    fn today_mut(&mut self) -> &mut DailyRiskMetrics {
        let date = self.current_date;
        self.daily
            .entry(date)
            .or_insert_with(|| DailyRiskMetrics::new(date))
    }

    /// Advance the calendar. A halt caused by a daily limit clears on rollover.
    pub fn update_current_date(&mut self, date: NaiveDate) {
        if date == self.current_date {
            return;
        }
        debug!(from = %self.current_date, to = %date, "Trading day rolled over");
        self.current_date = date;
        self.daily
            .entry(date)
            .or_insert_with(|| DailyRiskMetrics::new(date));
        self.today_mut().active_cycles = self.active_cycles.len();

        if self.halt_cause == Some(HaltCause::DailyLimit) {
            self.resume();
        }
    }

    fn check(&self) -> Verdict {
        if self.is_halted() {
            return Verdict::Refuse(format!("Trading halted: {}", self.halt_reason));
        }

        if self.active_cycles.len() >= self.limits.max_concurrent_cycles {
            return Verdict::Refuse(format!(
                "Maximum concurrent cycles reached ({})",
                self.limits.max_concurrent_cycles
            ));
        }

        let today = self.today();
        if today.total_pnl <= -self.limits.daily_loss_limit {
            return Verdict::Halt(format!("Daily loss limit reached: ${:.2}", today.total_pnl));
        }

        if today.total_pnl >= self.limits.daily_profit_target && self.limits.enable_daily_limits {
            return Verdict::Halt(format!(
                "Daily profit target reached: ${:.2}",
                today.total_pnl
            ));
        }

        if today.completed_cycles >= self.limits.max_cycles_per_day {
            return Verdict::Refuse(format!(
                "Daily cycle limit reached ({})",
                self.limits.max_cycles_per_day
            ));
        }

        Verdict::Allow
    }

    /// May `strategy_id` start a new cycle now?
    ///
    /// Breaching a daily limit halts the controller as a side effect.
    pub fn can_start_cycle(&mut self, strategy_id: &str) -> Admission {
        match self.check() {
            Verdict::Allow => {
                let total_pnl = self.today().total_pnl;
                if total_pnl >= self.limits.daily_profit_target {
                    info!(
                        total_pnl = %total_pnl,
                        "Daily profit target reached (continuing trading)"
                    );
                }
                Admission::Granted
            }
            Verdict::Refuse(reason) => {
                debug!(strategy = %strategy_id, %reason, "Cycle admission refused");
                Admission::Refused { reason }
            }
            Verdict::Halt(reason) => {
                let total_pnl = self.today().total_pnl;
                let alert = if total_pnl < Decimal::ZERO {
                    RiskAlert::new(
                        RiskAlertType::DailyLossLimit {
                            total_pnl,
                            limit: self.limits.daily_loss_limit,
                        },
                        AlertSeverity::Critical,
                        reason.clone(),
                    )
                } else {
                    RiskAlert::new(
                        RiskAlertType::DailyProfitTarget {
                            total_pnl,
                            target: self.limits.daily_profit_target,
                        },
                        AlertSeverity::Info,
                        reason.clone(),
                    )
                };
                alert.emit();
                self.halt_with(HaltCause::DailyLimit, reason.clone());
                Admission::Refused { reason }
            }
        }
    }

    pub fn register_cycle_start(&mut self, cycle_id: &str, strategy_id: &str) {
        self.active_cycles
            .insert(cycle_id.to_string(), strategy_id.to_string());
        let active = self.active_cycles.len();
        self.today_mut().active_cycles = active;

        info!(cycle_id, strategy = %strategy_id, active, "Cycle registered");

        let max = self.limits.max_concurrent_cycles;
        if Decimal::from(active) >= Decimal::from(max) * dec!(0.8) {
            RiskAlert::new(
                RiskAlertType::CapacityWarning { active, max },
                AlertSeverity::Warning,
                "High cycle capacity usage",
            )
            .emit();
        }
    }

    /// Close a cycle and book its realized P&L. Returns false for a cycle
    /// that is not active, which is left untouched.
    pub fn register_cycle_end(&mut self, cycle_id: &str, realized_pnl: Decimal) -> bool {
        let Some(strategy_id) = self.active_cycles.remove(cycle_id) else {
            warn!(cycle_id, "Cycle end for unknown or closed cycle ignored");
            return false;
        };
        let active = self.active_cycles.len();

        let today = self.today_mut();
        today.active_cycles = active;
        today.completed_cycles += 1;
        today.realized_pnl += realized_pnl;
        today.total_pnl += realized_pnl;
        today.update_peak_and_drawdown();

        info!(
            cycle_id,
            strategy = %strategy_id,
            pnl = %realized_pnl,
            active,
            "Cycle closed"
        );

        self.check_risk_limits();
        true
    }

    pub fn register_trade(&mut self, trade_value: Decimal, commission: Decimal) {
        let today = self.today_mut();
        today.trades_count += 1;
        today.traded_value += trade_value;
        today.commission_paid += commission;
    }

    /// Replace today's unrealized P&L with the current total across machines.
    pub fn update_unrealized_pnl(&mut self, total_unrealized: Decimal) {
        let today = self.today_mut();
        today.unrealized_pnl = total_unrealized;
        today.total_pnl = today.realized_pnl + total_unrealized;
        today.update_peak_and_drawdown();
    }

    fn check_risk_limits(&mut self) {
        let total_pnl = self.today().total_pnl;
        if total_pnl <= -self.limits.daily_loss_limit {
            let reason = format!("Daily loss limit breached: ${:.2}", total_pnl);
            RiskAlert::new(
                RiskAlertType::DailyLossLimit {
                    total_pnl,
                    limit: self.limits.daily_loss_limit,
                },
                AlertSeverity::Critical,
                reason.clone(),
            )
            .with_metric("realized_pnl", self.today().realized_pnl)
            .emit();
            self.halt_with(HaltCause::DailyLimit, reason);
        }
    }

    /// Operator halt. Stays in force across day rollovers until [`Self::resume`].
    pub fn halt(&mut self, reason: impl Into<String>) {
        self.halt_with(HaltCause::Operator, reason);
    }

    fn halt_with(&mut self, cause: HaltCause, reason: impl Into<String>) {
        self.halt_cause = Some(cause);
        self.halt_reason = reason.into();
        warn!(reason = %self.halt_reason, ?cause, "TRADING HALTED");
        RiskAlert::new(
            RiskAlertType::TradingHalted {
                reason: self.halt_reason.clone(),
            },
            AlertSeverity::Error,
            format!("Trading halted: {}", self.halt_reason),
        )
        .emit();
    }

    pub fn resume(&mut self) {
        let previous_reason = std::mem::take(&mut self.halt_reason);
        self.halt_cause = None;
        info!(%previous_reason, "Trading resumed");
        RiskAlert::new(
            RiskAlertType::TradingResumed { previous_reason },
            AlertSeverity::Info,
            "Trading resumed",
        )
        .emit();
    }

    fn loss_ratio(&self) -> Decimal {
        let total_pnl = self.today().total_pnl;
        if total_pnl < Decimal::ZERO {
            safe_div(total_pnl.abs(), self.limits.daily_loss_limit)
        } else {
            Decimal::ZERO
        }
    }

    fn capacity_ratio(&self) -> Decimal {
        safe_div(
            Decimal::from(self.active_cycles.len()),
            Decimal::from(self.limits.max_concurrent_cycles),
        )
    }

    pub fn risk_level(&self) -> RiskLevel {
        let drawdown_ratio = safe_div(self.today().max_drawdown, self.limits.daily_loss_limit);
        let worst = self
            .loss_ratio()
            .max(self.capacity_ratio())
            .max(drawdown_ratio);
        RiskLevel::from_ratio(worst)
    }

    /// Snapshot of limits, today's metrics and warnings. Never halts.
    pub fn status(&self) -> AdmissionStatus {
        let today = self.today().clone();
        let limits = &self.limits;

        let mut warnings = Vec::new();
        if today.total_pnl <= -limits.daily_loss_limit * dec!(0.8) {
            warnings.push("Approaching daily loss limit".to_string());
        }
        if Decimal::from(self.active_cycles.len())
            >= Decimal::from(limits.max_concurrent_cycles) * dec!(0.8)
        {
            warnings.push("High cycle capacity usage".to_string());
        }
        if today.max_drawdown >= limits.daily_loss_limit * dec!(0.5) {
            warnings.push("Significant drawdown detected".to_string());
        }

        AdmissionStatus {
            limits: limits.clone(),
            halted: self.is_halted(),
            halt_reason: self.halt_reason().map(str::to_string),
            risk_level: self.risk_level(),
            can_start_new_cycle: matches!(self.check(), Verdict::Allow),
            warnings,
            loss_limit_usage: self.loss_ratio(),
            cycle_capacity_usage: self.capacity_ratio(),
            metrics: today,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn controller(limits: AdmissionLimits) -> AdmissionController {
        AdmissionController::new(limits, day(1))
    }

    #[test]
    fn test_concurrency_cap_refuses() {
        let mut limits = AdmissionLimits::default();
        limits.max_concurrent_cycles = 2;
        let mut ctl = controller(limits);

        assert!(ctl.can_start_cycle("a").is_granted());
        ctl.register_cycle_start("c1", "a");
        ctl.register_cycle_start("c2", "b");

        let admission = ctl.can_start_cycle("c");
        assert_eq!(
            admission,
            Admission::Refused {
                reason: "Maximum concurrent cycles reached (2)".to_string()
            }
        );
        assert!(!ctl.is_halted());
    }

    #[test]
    fn test_loss_limit_breach_halts() {
        let mut limits = AdmissionLimits::default();
        limits.daily_loss_limit = dec!(500);
        let mut ctl = controller(limits);

        ctl.register_cycle_start("c1", "cdm");
        assert!(ctl.register_cycle_end("c1", dec!(-600)));

        assert!(ctl.is_halted());
        assert_eq!(ctl.halt_reason(), Some("Daily loss limit breached: $-600.00"));
        let reason = ctl.can_start_cycle("cdm").reason().unwrap().to_string();
        assert!(reason.contains("loss limit"), "{reason}");
        assert!(reason.starts_with("Trading halted: "));
    }

    #[test]
    fn test_unrealized_loss_halts_on_next_request() {
        let mut limits = AdmissionLimits::default();
        limits.daily_loss_limit = dec!(500);
        let mut ctl = controller(limits);

        ctl.update_unrealized_pnl(dec!(-520));
        // Status is a pure read
        let status = ctl.status();
        assert!(!status.can_start_new_cycle);
        assert!(!ctl.is_halted());

        let admission = ctl.can_start_cycle("wdm");
        assert_eq!(admission.reason(), Some("Daily loss limit reached: $-520.00"));
        assert!(ctl.is_halted());
    }

    #[test]
    fn test_profit_target_respects_enforcement_flag() {
        let mut limits = AdmissionLimits::default();
        limits.daily_profit_target = dec!(100);
        limits.enable_daily_limits = false;
        let mut ctl = controller(limits.clone());
        ctl.update_unrealized_pnl(dec!(150));
        assert!(ctl.can_start_cycle("cdm").is_granted());

        limits.enable_daily_limits = true;
        let mut ctl = controller(limits);
        ctl.update_unrealized_pnl(dec!(150));
        assert!(!ctl.can_start_cycle("cdm").is_granted());
        assert!(ctl.is_halted());
    }

    #[test]
    fn test_daily_cycle_limit() {
        let mut limits = AdmissionLimits::default();
        limits.max_cycles_per_day = 2;
        let mut ctl = controller(limits);
        for id in ["c1", "c2"] {
            ctl.register_cycle_start(id, "cdm");
            ctl.register_cycle_end(id, dec!(1));
        }
        assert_eq!(
            ctl.can_start_cycle("cdm").reason(),
            Some("Daily cycle limit reached (2)")
        );

        ctl.update_current_date(day(2));
        assert!(ctl.can_start_cycle("cdm").is_granted());
    }

    #[test]
    fn test_rollover_clears_only_daily_halts() {
        let mut limits = AdmissionLimits::default();
        limits.daily_loss_limit = dec!(100);
        let mut ctl = controller(limits);
        ctl.register_cycle_start("c1", "cdm");
        ctl.register_cycle_end("c1", dec!(-150));
        assert!(ctl.is_halted());

        ctl.update_current_date(day(2));
        assert!(!ctl.is_halted());
        assert_eq!(ctl.today().total_pnl, Decimal::ZERO);
        assert_eq!(ctl.daily_summary(day(1)).realized_pnl, dec!(-150));

        ctl.halt("operator request");
        ctl.update_current_date(day(3));
        assert!(ctl.is_halted());
    }

    #[test]
    fn test_operator_halt_mentioning_daily_survives_rollover() {
        let mut ctl = controller(AdmissionLimits::default());
        ctl.halt("daily maintenance window");
        assert_eq!(ctl.halt_cause(), Some(HaltCause::Operator));

        ctl.update_current_date(day(2));
        assert!(ctl.is_halted());
        assert_eq!(ctl.halt_reason(), Some("daily maintenance window"));

        ctl.resume();
        assert!(!ctl.is_halted());
        assert_eq!(ctl.halt_cause(), None);
    }

    #[test]
    fn test_unknown_cycle_end_is_ignored() {
        let mut ctl = controller(AdmissionLimits::default());
        ctl.register_cycle_start("c1", "cdm");
        assert!(ctl.register_cycle_end("c1", dec!(10)));
        assert!(!ctl.register_cycle_end("c1", dec!(10)));
        assert_eq!(ctl.today().realized_pnl, dec!(10));
        assert_eq!(ctl.today().completed_cycles, 1);
    }

    #[test]
    fn test_risk_level_and_warnings() {
        let mut limits = AdmissionLimits::default();
        limits.daily_loss_limit = dec!(1000);
        limits.max_concurrent_cycles = 5;
        let mut ctl = controller(limits);
        assert_eq!(ctl.risk_level(), RiskLevel::Low);

        ctl.register_cycle_start("c1", "a");
        ctl.register_cycle_start("c2", "b");
        // 2/5 = 0.4
        assert_eq!(ctl.risk_level(), RiskLevel::Medium);

        ctl.update_unrealized_pnl(dec!(-850));
        let status = ctl.status();
        assert_eq!(status.risk_level, RiskLevel::High);
        assert_eq!(status.loss_limit_usage, dec!(0.85));
        assert!(status.warnings.contains(&"Approaching daily loss limit".to_string()));
        assert!(status.warnings.contains(&"Significant drawdown detected".to_string()));
        assert!(!status.warnings.contains(&"High cycle capacity usage".to_string()));
    }

    #[test]
    fn test_trade_registration() {
        let mut ctl = controller(AdmissionLimits::default());
        ctl.register_trade(dec!(2500), dec!(5));
        ctl.register_trade(dec!(2470), dec!(4.94));
        assert_eq!(ctl.today().trades_count, 2);
        assert_eq!(ctl.today().commission_paid, dec!(9.94));
        assert_eq!(ctl.today().traded_value, dec!(4970));
    }
}
