//! Account equity curve and maximum drawdown tracking.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, warn};

use crate::utils::safe_div;

/// A single equity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Tracks peak equity and the worst peak-to-trough decline.
///
/// Snapshots are only recorded when equity changes, so replaying long
/// stretches of flat ticks does not grow the curve.
#[derive(Debug, Clone)]
pub struct DrawdownTracker {
    peak_equity: Decimal,
    /// Current drawdown from peak (0.0-1.0)
    current_drawdown: Decimal,
    /// Worst drawdown observed (0.0-1.0)
    max_drawdown: Decimal,
    /// Worst drawdown in currency
    max_drawdown_amount: Decimal,
    curve: Vec<EquitySnapshot>,
}

impl DrawdownTracker {
    pub fn new(initial_equity: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            peak_equity: initial_equity,
            current_drawdown: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_amount: Decimal::ZERO,
            curve: vec![EquitySnapshot {
                timestamp: at,
                equity: initial_equity,
            }],
        }
    }

    /// Record an equity observation; returns the current drawdown fraction.
    pub fn update(&mut self, equity: Decimal, at: DateTime<Utc>) -> Decimal {
        if equity > self.peak_equity {
            self.peak_equity = equity;
            self.current_drawdown = Decimal::ZERO;
        } else {
            let amount = self.peak_equity - equity;
            self.current_drawdown = safe_div(amount, self.peak_equity);

            if self.current_drawdown > self.max_drawdown {
                self.max_drawdown = self.current_drawdown;
                self.max_drawdown_amount = amount;
                warn!(
                    mdd = %self.max_drawdown,
                    peak = %self.peak_equity,
                    current = %equity,
                    "New maximum drawdown recorded"
                );
            }
        }

        if self.curve.last().map(|s| s.equity) != Some(equity) {
            self.curve.push(EquitySnapshot {
                timestamp: at,
                equity,
            });
        } else {
            debug!(%equity, "Equity unchanged");
        }

        self.current_drawdown
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    pub fn max_drawdown_amount(&self) -> Decimal {
        self.max_drawdown_amount
    }

    pub fn curve(&self) -> &[EquitySnapshot] {
        &self.curve
    }

    pub fn statistics(&self) -> DrawdownStats {
        let first = self.curve.first().map(|s| s.equity).unwrap_or(Decimal::ZERO);
        let current_equity = self.curve.last().map(|s| s.equity).unwrap_or(Decimal::ZERO);
        let min_equity = self.curve.iter().map(|s| s.equity).min().unwrap_or(Decimal::ZERO);

        DrawdownStats {
            peak_equity: self.peak_equity,
            current_equity,
            min_equity,
            current_drawdown: self.current_drawdown,
            max_drawdown: self.max_drawdown,
            max_drawdown_amount: self.max_drawdown_amount,
            total_return: safe_div(current_equity - first, first),
            snapshots: self.curve.len(),
        }
    }
}

/// Summary of an equity curve.
#[derive(Debug, Clone, Serialize)]
pub struct DrawdownStats {
    pub peak_equity: Decimal,
    pub current_equity: Decimal,
    pub min_equity: Decimal,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
    pub max_drawdown_amount: Decimal,
    pub total_return: Decimal,
    pub snapshots: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_drawdown_tracking() {
        let now = Utc::now();
        let mut tracker = DrawdownTracker::new(dec!(10000), now);

        assert_eq!(tracker.update(dec!(10500), now), Decimal::ZERO);
        assert_eq!(tracker.peak_equity(), dec!(10500));

        // (10500 - 9450) / 10500 = 10%
        assert_eq!(tracker.update(dec!(9450), now), dec!(0.1));
        assert_eq!(tracker.max_drawdown_amount(), dec!(1050));

        // Recovery does not erase the worst drawdown
        tracker.update(dec!(11000), now);
        assert_eq!(tracker.current_drawdown(), Decimal::ZERO);
        assert_eq!(tracker.max_drawdown(), dec!(0.1));
    }

    #[test]
    fn test_flat_equity_not_recorded_twice() {
        let now = Utc::now();
        let mut tracker = DrawdownTracker::new(dec!(1000), now);
        tracker.update(dec!(1000), now);
        tracker.update(dec!(1100), now);
        tracker.update(dec!(1100), now);

        let stats = tracker.statistics();
        assert_eq!(stats.snapshots, 2);
        assert_eq!(stats.total_return, dec!(0.1));
        assert_eq!(stats.min_equity, dec!(1000));
    }
}
