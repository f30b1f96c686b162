//! Backtesting simulation engine.
//!
//! Replays historical ticks through the orchestrator against a paper broker.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, info};

use crate::backtest::{BacktestConfig, TickSource};
use crate::config::Config;
use crate::cycle::CycleReport;
use crate::engine::Orchestrator;
use crate::exchange::{AccountBalance, PaperBroker};
use crate::risk::{DailyRiskMetrics, DrawdownStats, DrawdownTracker, EquitySnapshot};
use crate::utils::safe_div;

/// Complete result of a backtest run.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub config: Config,
    pub backtest_config: BacktestConfig,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub ticks_processed: usize,
    pub orders_submitted: usize,
    pub final_balance: Decimal,
    pub total_return_pct: Decimal,
    pub total_commission: Decimal,
    pub drawdown: DrawdownStats,
    pub equity_curve: Vec<EquitySnapshot>,
    pub report: CycleReport,
    pub daily: Vec<DailyRiskMetrics>,
}

impl BacktestResult {
    /// Export equity curve to CSV.
    pub fn equity_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(file, "timestamp,equity")?;

        for point in &self.equity_curve {
            writeln!(file, "{},{}", point.timestamp.to_rfc3339(), point.equity)?;
        }

        Ok(())
    }

    /// Export the per-cycle table to CSV.
    pub fn cycles_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(
            file,
            "cycle_id,strategy_id,kind,instrument,start,end,status,trades,max_leg,invested,peak_invested,realized_pnl,roi_pct,commission"
        )?;

        for row in &self.report.rows {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{},{},{},{},{:.4},{}",
                row.cycle_id,
                row.strategy_id,
                row.kind,
                row.instrument,
                row.start.to_rfc3339(),
                row.end.map(|e| e.to_rfc3339()).unwrap_or_default(),
                row.status,
                row.trade_count,
                row.max_leg_reached,
                row.invested,
                row.peak_invested,
                row.realized_pnl,
                row.roi_pct,
                row.commission,
            )?;
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize backtest result")
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        format!(
            r#"{}

ACCOUNT
  Initial Balance:   ${:.2}
  Final Balance:     ${:.2}
  Total Return:      {:.2}%
  Commission Paid:   ${:.2}
  Max Drawdown:      {:.2}% (${:.2})

Backtest Period: {} to {}
Ticks: {}
Orders: {}"#,
            self.report.summary(),
            self.backtest_config.initial_balance,
            self.final_balance,
            self.total_return_pct,
            self.total_commission,
            self.drawdown.max_drawdown * dec!(100),
            self.drawdown.max_drawdown_amount,
            self.start_time.format("%Y-%m-%d %H:%M"),
            self.end_time.format("%Y-%m-%d %H:%M"),
            self.ticks_processed,
            self.orders_submitted,
        )
    }
}

/// The backtesting simulation engine.
pub struct BacktestEngine<S: TickSource> {
    source: S,
    config: Config,
    backtest_config: BacktestConfig,
}

impl<S: TickSource> BacktestEngine<S> {
    pub fn new(source: S, config: Config, backtest_config: BacktestConfig) -> Self {
        Self {
            source,
            config,
            backtest_config,
        }
    }

    /// Replay every tick in `[start, end]`.
    pub fn run(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<BacktestResult> {
        let ticks = self.source.load_ticks(start, end)?;
        anyhow::ensure!(!ticks.is_empty(), "No ticks between {} and {}", start, end);

        let initial_balance = self.backtest_config.initial_balance;
        let broker = PaperBroker::with_commission(initial_balance, self.backtest_config.commission_rate);
        let mut orchestrator = Orchestrator::new(&self.config, broker)?;

        let first_time = ticks[0].timestamp;
        let mut last_time = first_time;
        let mut drawdown = DrawdownTracker::new(initial_balance, first_time);
        let mut orders_submitted = 0;

        info!(
            ticks = ticks.len(),
            strategies = self.config.strategies.len(),
            %initial_balance,
            "Starting backtest"
        );

        for (i, tick) in ticks.iter().enumerate() {
            let outcome = orchestrator.on_tick(tick)?;
            orders_submitted += outcome.orders.len();
            drawdown.update(orchestrator.broker().balance(), tick.timestamp);
            last_time = tick.timestamp;

            if (i + 1) % 10_000 == 0 {
                debug!(
                    processed = i + 1,
                    equity = %orchestrator.broker().balance(),
                    "Backtest progress"
                );
            }
        }

        if self.backtest_config.flatten_at_end {
            let flattened = orchestrator.flatten_all()?;
            if !flattened.closed.is_empty() {
                info!(
                    cycles = flattened.closed.len(),
                    orders = flattened.orders.len(),
                    "Flattened open cycles at end of data"
                );
            }
            orders_submitted += flattened.orders.len();
            drawdown.update(orchestrator.broker().balance(), last_time);
        }

        let final_balance = orchestrator.broker().balance();
        let report = orchestrator.ledger().current_report();

        info!(
            cycles = report.closed_cycles,
            pnl = %report.total_realized_pnl,
            %final_balance,
            "Backtest complete"
        );

        Ok(BacktestResult {
            config: self.config.clone(),
            backtest_config: self.backtest_config.clone(),
            start_time: first_time,
            end_time: last_time,
            ticks_processed: ticks.len(),
            orders_submitted,
            final_balance,
            total_return_pct: safe_div(final_balance - initial_balance, initial_balance) * dec!(100),
            total_commission: orchestrator.broker().account().total_commission,
            drawdown: drawdown.statistics(),
            equity_curve: drawdown.curve().to_vec(),
            report,
            daily: orchestrator
                .admission()
                .daily_history()
                .filter(|day| day.date >= first_time.date_naive() && day.date <= last_time.date_naive())
                .cloned()
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::CsvTickSource;
    use crate::config::StrategyConfig;
    use crate::cycle::CycleStatus;
    use crate::strategy::StrategyKind;

    const PATH: &str = "timestamp,instrument,price
2024-03-04T14:30:00Z,SPY,100
2024-03-04T14:31:00Z,SPY,95
2024-03-04T14:32:00Z,SPY,90
2024-03-04T14:33:00Z,SPY,96
2024-03-04T14:34:00Z,SPY,97
";

    fn config() -> Config {
        let mut strategy = StrategyConfig::new("cdm", StrategyKind::Cdm, "SPY");
        strategy.capital_allocation = dec!(0.25);
        strategy.leg_distances_pct = vec![dec!(5), dec!(10)];
        strategy.size_multipliers = vec![dec!(1.0)];
        strategy.take_profit_pct = vec![dec!(2.0)];
        strategy.max_legs = 3;
        Config {
            strategies: vec![strategy],
            ..Config::default()
        }
    }

    fn run(flatten_at_end: bool) -> BacktestResult {
        let source = CsvTickSource::from_csv_content(PATH).unwrap();
        let (start, end) = source.available_range().unwrap();
        let backtest_config = BacktestConfig {
            initial_balance: dec!(10000),
            commission_rate: Decimal::ZERO,
            flatten_at_end,
            output_path: None,
        };
        BacktestEngine::new(source, config(), backtest_config)
            .run(start, end)
            .unwrap()
    }

    #[test]
    fn test_backtest_replays_cycles() {
        let result = run(true);

        // Completed at 96, restarted at 97 and flattened flat at the end
        assert_eq!(result.ticks_processed, 5);
        assert_eq!(result.report.completed_cycles, 1);
        assert_eq!(result.report.stopped_cycles, 1);
        assert_eq!(result.report.total_realized_pnl, dec!(88));
        assert_eq!(result.final_balance, dec!(10088));
        assert_eq!(result.total_return_pct, dec!(0.88));
        assert_eq!(result.orders_submitted, 6);
        assert!(result.drawdown.max_drawdown > Decimal::ZERO);
        assert!(result.summary().contains("Total Return"));
        assert!(result.to_json().unwrap().contains("\"equity_curve\""));
    }

    #[test]
    fn test_open_cycle_kept_without_flatten() {
        let result = run(false);

        assert_eq!(result.report.closed_cycles, 1);
        assert_eq!(result.report.total_cycles, 2);
        let open = result
            .report
            .rows
            .iter()
            .find(|r| r.status == CycleStatus::Active)
            .unwrap();
        assert_eq!(open.trade_count, 1);
    }

    #[test]
    fn test_per_leg_flatten_counts_every_order() {
        let ticks = "timestamp,instrument,price
2024-03-04T14:30:00Z,SPY,100
2024-03-04T14:31:00Z,SPY,95
2024-03-04T14:32:00Z,SPY,90
";
        let source = CsvTickSource::from_csv_content(ticks).unwrap();
        let (start, end) = source.available_range().unwrap();
        let mut config = config();
        config.strategies[0].hold_previous = false;
        let backtest_config = BacktestConfig {
            initial_balance: dec!(10000),
            commission_rate: Decimal::ZERO,
            flatten_at_end: true,
            output_path: None,
        };

        let result = BacktestEngine::new(source, config, backtest_config)
            .run(start, end)
            .unwrap();

        // Three opening legs, then one closing order per leg
        assert_eq!(result.report.stopped_cycles, 1);
        assert_eq!(result.orders_submitted, 6);
    }

    #[test]
    fn test_empty_window_is_an_error() {
        let source = CsvTickSource::from_csv_content(PATH).unwrap();
        let start = "2025-01-01T00:00:00Z".parse().unwrap();
        let end = "2025-01-02T00:00:00Z".parse().unwrap();
        let mut engine = BacktestEngine::new(source, config(), BacktestConfig::default());
        assert!(engine.run(start, end).is_err());
    }
}
