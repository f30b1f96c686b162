//! Trades and cycles as recorded by the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::exchange::{OrderRole, OrderSide};
use crate::strategy::StrategyKind;
use crate::utils::safe_div;

/// One executed order. Immutable once appended to a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub leg_index: usize,
    pub strategy_id: String,
    pub commission: Decimal,
    pub role: OrderRole,
}

impl Trade {
    pub fn value(&self) -> Decimal {
        self.quantity * self.price
    }

    pub fn net_value(&self) -> Decimal {
        self.value() - self.commission
    }

    /// Signed quantity, positive for buys.
    pub fn signed_quantity(&self) -> Decimal {
        self.side.sign() * self.quantity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleStatus {
    Active,
    Completed,
    /// Closed by an operator flatten or end of replay
    Stopped,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStatus::Active => "ACTIVE",
            CycleStatus::Completed => "COMPLETED",
            CycleStatus::Stopped => "STOPPED",
        };
        write!(f, "{}", s)
    }
}

/// Average-cost position used to attribute P&L to individual trades.
#[derive(Debug, Clone, Copy, Default)]
struct CostBasis {
    quantity: Decimal,
    average_price: Decimal,
}

impl CostBasis {
    /// Apply a trade; returns the P&L it realizes against the open position.
    fn apply(&mut self, signed_quantity: Decimal, price: Decimal) -> Decimal {
        let same_direction = self.quantity.is_zero()
            || (self.quantity > Decimal::ZERO) == (signed_quantity > Decimal::ZERO);

        if same_direction {
            let new_quantity = self.quantity + signed_quantity;
            self.average_price = safe_div(
                self.quantity.abs() * self.average_price + signed_quantity.abs() * price,
                new_quantity.abs(),
            );
            self.quantity = new_quantity;
            return Decimal::ZERO;
        }

        let closed = signed_quantity.abs().min(self.quantity.abs());
        let direction = if self.quantity > Decimal::ZERO {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        };
        let pnl = (price - self.average_price) * closed * direction;

        let remaining = self.quantity + signed_quantity;
        if remaining.is_zero() {
            *self = Self::default();
        } else if (remaining > Decimal::ZERO) != (self.quantity > Decimal::ZERO) {
            // Flipped through flat: the excess opens at this price
            self.quantity = remaining;
            self.average_price = price;
        } else {
            self.quantity = remaining;
        }
        pnl
    }

    fn exposure(&self) -> Decimal {
        self.quantity.abs() * self.average_price
    }
}

/// Full lifetime of one strategy position.
#[derive(Debug, Clone, Serialize)]
pub struct Cycle {
    pub id: String,
    pub strategy_id: String,
    pub kind: StrategyKind,
    pub instrument: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    pub trades: Vec<Trade>,
    /// Sum of opening notional
    pub invested: Decimal,
    /// Largest open exposure at cost during the cycle
    pub peak_invested: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub commission: Decimal,
    pub duration_minutes: f64,
    /// |realized| / peak invested
    pub risk_reward_ratio: f64,
    /// Gross winning trade P&L / gross losing trade P&L
    pub profit_factor: f64,
    #[serde(skip)]
    basis: CostBasis,
}

impl Cycle {
    pub fn new(
        id: impl Into<String>,
        strategy_id: impl Into<String>,
        kind: StrategyKind,
        instrument: impl Into<String>,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            strategy_id: strategy_id.into(),
            kind,
            instrument: instrument.into(),
            start,
            end: None,
            status: CycleStatus::Active,
            trades: Vec::new(),
            invested: Decimal::ZERO,
            peak_invested: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            commission: Decimal::ZERO,
            duration_minutes: 0.0,
            risk_reward_ratio: 0.0,
            profit_factor: 0.0,
            basis: CostBasis::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == CycleStatus::Active
    }

    pub(crate) fn add_trade(&mut self, trade: Trade) {
        if trade.role == OrderRole::Open {
            self.invested += trade.value();
        }
        self.commission += trade.commission;
        self.basis.apply(trade.signed_quantity(), trade.price);
        self.peak_invested = self.peak_invested.max(self.basis.exposure());
        self.trades.push(trade);
    }

    pub(crate) fn close(&mut self, status: CycleStatus, end: DateTime<Utc>, realized_pnl: Decimal) {
        self.status = status;
        self.end = Some(end);
        self.realized_pnl = realized_pnl;
        self.unrealized_pnl = Decimal::ZERO;
        self.duration_minutes = (end - self.start).num_seconds() as f64 / 60.0;

        if self.peak_invested > Decimal::ZERO {
            self.risk_reward_ratio = (realized_pnl.abs() / self.peak_invested)
                .to_f64()
                .unwrap_or(0.0);
        }

        let pnls = self.trade_pnls();
        let gross_profit: Decimal = pnls.iter().filter(|p| **p > Decimal::ZERO).sum();
        let gross_loss: Decimal = pnls
            .iter()
            .filter(|p| **p < Decimal::ZERO)
            .sum::<Decimal>()
            .abs();
        self.profit_factor = profit_factor(gross_profit, gross_loss);
    }

    /// P&L realized by each trade under average-cost matching.
    ///
    /// Opening trades realize nothing; a trade against the open position
    /// realizes `(price - average) * matched quantity` in the position's
    /// direction.
    pub fn trade_pnls(&self) -> Vec<Decimal> {
        let mut basis = CostBasis::default();
        self.trades
            .iter()
            .map(|t| basis.apply(t.signed_quantity(), t.price))
            .collect()
    }

    pub fn total_pnl(&self) -> Decimal {
        self.realized_pnl + self.unrealized_pnl
    }

    pub fn roi_pct(&self) -> Decimal {
        safe_div(self.realized_pnl, self.invested) * Decimal::ONE_HUNDRED
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }

    /// Number of legs opened, i.e. the highest martingale level reached.
    pub fn max_leg_reached(&self) -> usize {
        self.trades
            .iter()
            .filter(|t| t.role == OrderRole::Open)
            .map(|t| t.leg_index + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Gross profit / gross loss; infinite when there is profit and no loss.
pub(crate) fn profit_factor(gross_profit: Decimal, gross_loss: Decimal) -> f64 {
    if gross_loss > Decimal::ZERO {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    } else if gross_profit > Decimal::ZERO {
        f64::INFINITY
    } else {
        0.0
    }
}
