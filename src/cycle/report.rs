//! Aggregate analytics over closed cycles.
//!
//! Per-cycle return is `realized / peak invested`. Ratios that can be
//! unbounded (profit factor, Sortino, Calmar) are `f64` and may be infinite.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::BTreeMap;

use super::model::{profit_factor, Cycle, CycleStatus};
use crate::strategy::StrategyKind;
use crate::utils::safe_div;

const DAYS_PER_YEAR: f64 = 365.25;

/// Per-variant performance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StrategyBreakdown {
    pub cycle_count: usize,
    pub total_pnl: Decimal,
    pub average_pnl: Decimal,
    pub win_rate: Decimal,
    pub best_cycle: Decimal,
    pub worst_cycle: Decimal,
    pub total_trades: usize,
}

/// Distribution of closed-cycle figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub cycle_count: usize,
    pub win_rate: Decimal,
    pub average_pnl: Decimal,
    pub median_pnl: Decimal,
    /// Population standard deviation
    pub std_pnl: f64,
    pub average_duration_minutes: f64,
    pub median_duration_minutes: f64,
    pub average_investment: Decimal,
    pub median_investment: Decimal,
    pub total_trades: usize,
    pub average_trades_per_cycle: f64,
    pub max_leg_reached: usize,
}

/// One line of the per-cycle table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRow {
    pub cycle_id: String,
    pub strategy_id: String,
    pub kind: StrategyKind,
    pub instrument: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    pub duration_minutes: f64,
    pub trade_count: usize,
    pub max_leg_reached: usize,
    pub invested: Decimal,
    pub peak_invested: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub roi_pct: Decimal,
    pub commission: Decimal,
    pub risk_reward_ratio: f64,
    pub profit_factor: f64,
}

impl From<&Cycle> for CycleRow {
    fn from(cycle: &Cycle) -> Self {
        Self {
            cycle_id: cycle.id.clone(),
            strategy_id: cycle.strategy_id.clone(),
            kind: cycle.kind,
            instrument: cycle.instrument.clone(),
            start: cycle.start,
            end: cycle.end,
            status: cycle.status,
            duration_minutes: cycle.duration_minutes,
            trade_count: cycle.trade_count(),
            max_leg_reached: cycle.max_leg_reached(),
            invested: cycle.invested,
            peak_invested: cycle.peak_invested,
            realized_pnl: cycle.realized_pnl,
            unrealized_pnl: cycle.unrealized_pnl,
            total_pnl: cycle.total_pnl(),
            roi_pct: cycle.roi_pct(),
            commission: cycle.commission,
            risk_reward_ratio: cycle.risk_reward_ratio,
            profit_factor: cycle.profit_factor,
        }
    }
}

/// Portfolio-level report, rebuilt whenever a cycle closes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,

    // Counts
    pub total_cycles: usize,
    /// Completed plus stopped
    pub closed_cycles: usize,
    pub completed_cycles: usize,
    pub stopped_cycles: usize,
    pub winning_cycles: usize,
    pub losing_cycles: usize,

    // P&L
    pub total_realized_pnl: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub average_cycle_pnl: Decimal,
    pub best_cycle_pnl: Decimal,
    pub worst_cycle_pnl: Decimal,
    pub total_commission: Decimal,

    // Risk-adjusted
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    /// Peak-to-trough drop of cumulative realized P&L
    pub max_drawdown: Decimal,
    /// `max_drawdown` as a percentage of total peak invested capital
    pub max_drawdown_pct: Decimal,
    pub recovery_factor: f64,

    // Efficiency
    pub return_on_equity_pct: Decimal,
    pub order_completion_efficiency: Decimal,
    pub average_utilization_ratio: Decimal,
    pub time_weighted_return_pct: f64,
    pub internal_rate_of_return_pct: f64,
    pub compound_equivalent_rate_pct: f64,

    pub breakdown: BTreeMap<StrategyKind, StrategyBreakdown>,
    pub stats: Option<SummaryStats>,
    pub rows: Vec<CycleRow>,
}

impl CycleReport {
    /// Build the report from closed cycles plus the still-active ones.
    pub fn build<'a>(closed: &[Cycle], active: impl Iterator<Item = &'a Cycle>) -> Self {
        let active: Vec<&Cycle> = active.collect();

        let mut report = Self {
            total_cycles: closed.len() + active.len(),
            closed_cycles: closed.len(),
            total_unrealized_pnl: active.iter().map(|c| c.unrealized_pnl).sum(),
            breakdown: strategy_breakdown(closed),
            rows: closed
                .iter()
                .chain(active.iter().copied())
                .map(CycleRow::from)
                .collect(),
            ..Self::default()
        };

        if closed.is_empty() {
            return report;
        }

        let mut ordered: Vec<&Cycle> = closed.iter().collect();
        ordered.sort_by_key(|c| c.start);

        report.period_start = ordered.first().map(|c| c.start);
        report.period_end = closed.iter().filter_map(|c| c.end).max();

        report.completed_cycles = count_status(closed, CycleStatus::Completed);
        report.stopped_cycles = count_status(closed, CycleStatus::Stopped);
        report.winning_cycles = closed.iter().filter(|c| c.realized_pnl > Decimal::ZERO).count();
        report.losing_cycles = closed.iter().filter(|c| c.realized_pnl < Decimal::ZERO).count();

        let pnls: Vec<Decimal> = closed.iter().map(|c| c.realized_pnl).collect();
        report.total_realized_pnl = pnls.iter().sum();
        report.average_cycle_pnl = report.total_realized_pnl / Decimal::from(closed.len());
        report.best_cycle_pnl = pnls.iter().copied().max().unwrap_or(Decimal::ZERO);
        report.worst_cycle_pnl = pnls.iter().copied().min().unwrap_or(Decimal::ZERO);
        report.total_commission = closed.iter().map(|c| c.commission).sum();

        let gross_profit: Decimal = pnls.iter().filter(|p| **p > Decimal::ZERO).sum();
        let gross_loss: Decimal = pnls.iter().filter(|p| **p < Decimal::ZERO).sum::<Decimal>().abs();
        report.profit_factor = profit_factor(gross_profit, gross_loss);

        let total_peak: Decimal = closed.iter().map(|c| c.peak_invested).sum();
        let returns = cycle_returns(&ordered);
        let years = report.years();

        report.sharpe_ratio = sharpe(&returns);
        report.sortino_ratio = sortino(&returns);

        report.max_drawdown = realized_drawdown(&ordered);
        report.max_drawdown_pct = safe_div(report.max_drawdown, total_peak) * dec!(100);
        report.calmar_ratio = calmar(report.total_realized_pnl, report.max_drawdown, total_peak, years);

        if report.worst_cycle_pnl < Decimal::ZERO {
            report.recovery_factor = (report.total_realized_pnl / report.worst_cycle_pnl)
                .abs()
                .to_f64()
                .unwrap_or(0.0);
        }

        report.return_on_equity_pct = safe_div(report.total_realized_pnl, total_peak) * dec!(100);
        if report.completed_cycles > 0 {
            report.order_completion_efficiency = Decimal::from(report.winning_cycles)
                / Decimal::from(report.completed_cycles)
                * dec!(100);
        }
        report.average_utilization_ratio = average_utilization(closed);

        report.time_weighted_return_pct = time_weighted_return(&returns);
        report.internal_rate_of_return_pct = internal_rate_of_return(closed);
        report.compound_equivalent_rate_pct =
            compound_equivalent_rate(report.total_realized_pnl, total_peak, years);

        report.stats = Some(summary_stats(closed, report.winning_cycles));
        report
    }

    /// Whole days between first cycle start and last cycle end, in years.
    fn years(&self) -> f64 {
        match (self.period_start, self.period_end) {
            (Some(start), Some(end)) => (end - start).num_days() as f64 / DAYS_PER_YEAR,
            _ => 0.0,
        }
    }

    pub fn win_rate(&self) -> Decimal {
        if self.closed_cycles == 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.winning_cycles) / Decimal::from(self.closed_cycles) * dec!(100)
    }

    /// Format the report as a summary block.
    pub fn summary(&self) -> String {
        let mut out = format!(
            r#"═══════════════════════════════════════════════
CYCLE REPORT ({} closed, {} active)
═══════════════════════════════════════════════
CYCLES
  Completed:         {}
  Stopped:           {}
  Winning:           {}
  Losing:            {}
  Win Rate:          {:.1}%

P&L
  Total Realized:    ${:.2}
  Unrealized:        ${:.2}
  Average Cycle:     ${:.2}
  Best Cycle:        ${:.2}
  Worst Cycle:       ${:.2}
  Commission:        ${:.2}

RISK-ADJUSTED
  Profit Factor:     {}
  Sharpe Ratio:      {:.3}
  Sortino Ratio:     {}
  Calmar Ratio:      {}
  Max Drawdown:      ${:.2} ({:.2}%)
  Recovery Factor:   {:.2}

EFFICIENCY
  ROE:               {:.2}%
  OCE:               {:.1}%
  AUR:               {:.1}%
  TWR:               {:.2}%
  IRR:               {:.2}%
  CER:               {:.2}%
"#,
            self.closed_cycles,
            self.total_cycles - self.closed_cycles,
            self.completed_cycles,
            self.stopped_cycles,
            self.winning_cycles,
            self.losing_cycles,
            self.win_rate(),
            self.total_realized_pnl,
            self.total_unrealized_pnl,
            self.average_cycle_pnl,
            self.best_cycle_pnl,
            self.worst_cycle_pnl,
            self.total_commission,
            fmt_ratio(self.profit_factor),
            self.sharpe_ratio,
            fmt_ratio(self.sortino_ratio),
            fmt_ratio(self.calmar_ratio),
            self.max_drawdown,
            self.max_drawdown_pct,
            self.recovery_factor,
            self.return_on_equity_pct,
            self.order_completion_efficiency,
            self.average_utilization_ratio,
            self.time_weighted_return_pct,
            self.internal_rate_of_return_pct,
            self.compound_equivalent_rate_pct,
        );

        let traded: Vec<_> = self.breakdown.iter().filter(|(_, b)| b.cycle_count > 0).collect();
        if !traded.is_empty() {
            out.push_str("\nBY STRATEGY\n");
            for (kind, b) in traded {
                out.push_str(&format!(
                    "  {:<5} {:>4} cycles  ${:>10.2}  win {:>5.1}%\n",
                    kind.as_str(),
                    b.cycle_count,
                    b.total_pnl,
                    b.win_rate
                ));
            }
        }
        out.push_str("═══════════════════════════════════════════════");
        out
    }
}

fn fmt_ratio(value: f64) -> String {
    if value.is_infinite() {
        "∞".to_string()
    } else {
        format!("{:.3}", value)
    }
}

fn count_status(cycles: &[Cycle], status: CycleStatus) -> usize {
    cycles.iter().filter(|c| c.status == status).count()
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn cycle_returns(ordered: &[&Cycle]) -> Vec<f64> {
    ordered
        .iter()
        .filter(|c| c.peak_invested > Decimal::ZERO)
        .map(|c| to_f64(c.realized_pnl / c.peak_invested))
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean(returns);
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev < 1e-12 {
        return 0.0;
    }
    mean / std_dev
}

fn sortino(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let mean = mean(returns);
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();

    if downside.is_empty() {
        return if mean > 0.0 { f64::INFINITY } else { 0.0 };
    }

    let downside_deviation = (downside.iter().map(|r| r.powi(2)).sum::<f64>()
        / downside.len() as f64)
        .sqrt();
    if downside_deviation < 1e-12 {
        return 0.0;
    }
    mean / downside_deviation
}

/// Largest drop of cumulative realized P&L, cycles in start order, from a
/// starting peak of zero.
fn realized_drawdown(ordered: &[&Cycle]) -> Decimal {
    let mut cumulative = Decimal::ZERO;
    let mut peak = Decimal::ZERO;
    let mut max_drawdown = Decimal::ZERO;

    for cycle in ordered {
        cumulative += cycle.realized_pnl;
        peak = peak.max(cumulative);
        max_drawdown = max_drawdown.max(peak - cumulative);
    }
    max_drawdown
}

fn calmar(total: Decimal, max_drawdown: Decimal, total_peak: Decimal, years: f64) -> f64 {
    if total_peak <= Decimal::ZERO || years <= 0.0 {
        return 0.0;
    }
    let annual_return = to_f64(total / total_peak) / years;
    let drawdown = to_f64(max_drawdown / total_peak);

    if drawdown > 0.0 {
        annual_return / drawdown
    } else if annual_return > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

fn time_weighted_return(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let growth: f64 = returns.iter().map(|r| 1.0 + r).product();
    (growth - 1.0) * 100.0
}

/// Invested (peak capital out at each start) against returned (capital plus
/// P&L back at each end), annualized over the calendar span.
fn internal_rate_of_return(closed: &[Cycle]) -> f64 {
    let invested: Decimal = closed.iter().map(|c| c.peak_invested).sum();
    let returned: Decimal = closed
        .iter()
        .filter(|c| c.end.is_some())
        .map(|c| c.peak_invested + c.realized_pnl)
        .filter(|v| *v > Decimal::ZERO)
        .sum();

    let first = closed.iter().map(|c| c.start).min();
    let last = closed.iter().filter_map(|c| c.end).chain(closed.iter().map(|c| c.start)).max();
    let years = match (first, last) {
        (Some(first), Some(last)) => (last - first).num_days() as f64 / DAYS_PER_YEAR,
        _ => 0.0,
    };

    if invested <= Decimal::ZERO || years <= 0.0 {
        return 0.0;
    }
    (to_f64(returned / invested).powf(1.0 / years) - 1.0) * 100.0
}

fn compound_equivalent_rate(total: Decimal, total_peak: Decimal, years: f64) -> f64 {
    if total_peak <= Decimal::ZERO || years <= 0.0 {
        return 0.0;
    }
    let growth = to_f64((total_peak + total) / total_peak);
    if growth <= 0.0 {
        return -100.0;
    }
    (growth.powf(1.0 / years) - 1.0) * 100.0
}

/// Mean of peak exposure over committed capital, in percent.
fn average_utilization(closed: &[Cycle]) -> Decimal {
    let ratios: Vec<Decimal> = closed
        .iter()
        .filter(|c| c.invested > Decimal::ZERO)
        .map(|c| c.peak_invested / c.invested)
        .collect();
    if ratios.is_empty() {
        return Decimal::ZERO;
    }
    ratios.iter().sum::<Decimal>() / Decimal::from(ratios.len()) * dec!(100)
}

fn median_decimal(values: &mut [Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / dec!(2)
    } else {
        values[mid]
    }
}

fn median_f64(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn summary_stats(closed: &[Cycle], winning: usize) -> SummaryStats {
    let count = closed.len();
    let mut pnls: Vec<Decimal> = closed.iter().map(|c| c.realized_pnl).collect();
    let mut durations: Vec<f64> = closed.iter().map(|c| c.duration_minutes).collect();
    let mut investments: Vec<Decimal> = closed.iter().map(|c| c.invested).collect();
    let total_trades: usize = closed.iter().map(Cycle::trade_count).sum();

    let pnl_f64: Vec<f64> = pnls.iter().map(|p| to_f64(*p)).collect();
    let pnl_mean = mean(&pnl_f64);
    let std_pnl = (pnl_f64.iter().map(|p| (p - pnl_mean).powi(2)).sum::<f64>() / count as f64).sqrt();

    let divisor = Decimal::from(count);
    SummaryStats {
        cycle_count: count,
        win_rate: Decimal::from(winning) / divisor * dec!(100),
        average_pnl: pnls.iter().sum::<Decimal>() / divisor,
        median_pnl: median_decimal(&mut pnls),
        std_pnl,
        average_duration_minutes: mean(&durations),
        median_duration_minutes: median_f64(&mut durations),
        average_investment: investments.iter().sum::<Decimal>() / divisor,
        median_investment: median_decimal(&mut investments),
        total_trades,
        average_trades_per_cycle: total_trades as f64 / count as f64,
        max_leg_reached: closed.iter().map(Cycle::max_leg_reached).max().unwrap_or(0),
    }
}

fn strategy_breakdown(closed: &[Cycle]) -> BTreeMap<StrategyKind, StrategyBreakdown> {
    [StrategyKind::Cdm, StrategyKind::Wdm, StrategyKind::Zrm, StrategyKind::Izrm]
        .into_iter()
        .map(|kind| {
            let cycles: Vec<&Cycle> = closed.iter().filter(|c| c.kind == kind).collect();
            if cycles.is_empty() {
                return (kind, StrategyBreakdown::default());
            }
            let pnls: Vec<Decimal> = cycles.iter().map(|c| c.realized_pnl).collect();
            let total_pnl: Decimal = pnls.iter().sum();
            let count = Decimal::from(cycles.len());
            let winning = pnls.iter().filter(|p| **p > Decimal::ZERO).count();

            (
                kind,
                StrategyBreakdown {
                    cycle_count: cycles.len(),
                    total_pnl,
                    average_pnl: total_pnl / count,
                    win_rate: Decimal::from(winning) / count * dec!(100),
                    best_cycle: pnls.iter().copied().max().unwrap_or(Decimal::ZERO),
                    worst_cycle: pnls.iter().copied().min().unwrap_or(Decimal::ZERO),
                    total_trades: cycles.iter().map(|c| c.trade_count()).sum(),
                },
            )
        })
        .collect()
}
