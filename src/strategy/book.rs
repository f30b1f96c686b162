//! Per-cycle bookkeeping shared by every strategy variant.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::exchange::OrderSide;
use crate::utils::{safe_div, shift_by_pct, weighted_average};

/// One incremental position inside a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Leg {
    pub leg_index: usize,
    pub strategy_id: String,
    /// Positive for long, negative for short
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub entered_at: DateTime<Utc>,
    /// Set while the opening order awaits its fill
    pub pending_order: Option<u64>,
}

impl Leg {
    pub fn side(&self) -> OrderSide {
        if self.quantity < Decimal::ZERO {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    pub fn is_long(&self) -> bool {
        self.quantity >= Decimal::ZERO
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        (self.mark_price - self.entry_price) * self.quantity
    }

    /// Profit in percent, positive when the leg is in the money.
    pub fn profit_pct_at(&self, price: Decimal) -> Decimal {
        let raw = safe_div(price - self.entry_price, self.entry_price) * Decimal::ONE_HUNDRED;
        if self.is_long() {
            raw
        } else {
            -raw
        }
    }
}

/// Trailing stop ratchet for one leg.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrailingStop {
    pub active: bool,
    /// Most favorable price seen since activation
    pub extreme: Decimal,
    pub stop_price: Decimal,
}

impl TrailingStop {
    /// Feed a price; returns true when the stop is crossed.
    ///
    /// The stop activates once `profit_pct >= trigger_pct` and afterwards only
    /// moves in the favorable direction. The activation tick never fires.
    pub fn update(
        &mut self,
        price: Decimal,
        profit_pct: Decimal,
        trigger_pct: Decimal,
        distance_pct: Decimal,
        is_long: bool,
    ) -> bool {
        if !self.active {
            if profit_pct >= trigger_pct {
                self.active = true;
                self.extreme = price;
                self.stop_price = stop_from(price, distance_pct, is_long);
            }
            return false;
        }

        if is_long {
            if price > self.extreme {
                self.extreme = price;
                self.stop_price = self.stop_price.max(stop_from(price, distance_pct, true));
            }
            price <= self.stop_price
        } else {
            if price < self.extreme {
                self.extreme = price;
                self.stop_price = self.stop_price.min(stop_from(price, distance_pct, false));
            }
            price >= self.stop_price
        }
    }
}

fn stop_from(price: Decimal, distance_pct: Decimal, is_long: bool) -> Decimal {
    if is_long {
        shift_by_pct(price, -distance_pct)
    } else {
        shift_by_pct(price, distance_pct)
    }
}

/// Zone boundary relative to the center.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    Upper,
    Lower,
}

/// State of the cycle currently held by a machine.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleBook {
    legs: Vec<Leg>,
    trailing: Vec<TrailingStop>,
    cycle_id: Option<String>,
    entry_price: Option<Decimal>,
    started_at: Option<DateTime<Utc>>,
    last_boundary: Option<Boundary>,
    last_side: Option<OrderSide>,
    net_position: Decimal,
}

impl CycleBook {
    /// Begin a new cycle at `price`.
    pub fn start(&mut self, cycle_id: String, price: Decimal, at: DateTime<Utc>) {
        *self = Self::default();
        self.cycle_id = Some(cycle_id);
        self.entry_price = Some(price);
        self.started_at = Some(at);
    }

    /// Drop all per-cycle state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_active(&self) -> bool {
        self.cycle_id.is_some()
    }

    pub fn cycle_id(&self) -> Option<&str> {
        self.cycle_id.as_deref()
    }

    pub fn entry_price(&self) -> Option<Decimal> {
        self.entry_price
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn legs(&self) -> &[Leg] {
        &self.legs
    }

    /// Number of legs opened in this cycle, i.e. the current leg index.
    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    pub fn last_side(&self) -> Option<OrderSide> {
        self.last_side
    }

    pub fn last_boundary(&self) -> Option<Boundary> {
        self.last_boundary
    }

    pub fn set_last_boundary(&mut self, boundary: Boundary) {
        self.last_boundary = Some(boundary);
    }

    pub fn net_position(&self) -> Decimal {
        self.net_position
    }

    /// Append a leg and update net position and alternation state.
    pub fn push_leg(&mut self, leg: Leg) {
        self.net_position += leg.quantity;
        self.last_side = Some(leg.side());
        self.legs.push(leg);
        self.trailing.push(TrailingStop::default());
    }

    /// Replace a leg's provisional entry price with its confirmed fill.
    pub fn confirm_leg(&mut self, order_id: u64, fill_price: Decimal) -> Option<&Leg> {
        let leg = self
            .legs
            .iter_mut()
            .find(|leg| leg.pending_order == Some(order_id))?;
        leg.entry_price = fill_price;
        leg.pending_order = None;
        Some(leg)
    }

    pub fn mark(&mut self, price: Decimal) {
        for leg in &mut self.legs {
            leg.mark_price = price;
        }
    }

    /// Σ signed quantity.
    pub fn total_quantity(&self) -> Decimal {
        self.legs.iter().map(|leg| leg.quantity).sum()
    }

    /// Σ signed quantity * entry price.
    pub fn signed_cost(&self) -> Decimal {
        self.legs
            .iter()
            .map(|leg| leg.quantity * leg.entry_price)
            .sum()
    }

    /// Size-weighted average entry price over absolute leg quantities.
    pub fn average_price(&self) -> Decimal {
        let weighted: Vec<(Decimal, Decimal)> = self
            .legs
            .iter()
            .map(|leg| (leg.entry_price, leg.quantity.abs()))
            .collect();
        weighted_average(&weighted)
    }

    /// Σ (price - entry) * signed quantity.
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.legs
            .iter()
            .map(|leg| (price - leg.entry_price) * leg.quantity)
            .sum()
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.legs.iter().map(Leg::unrealized_pnl).sum()
    }

    /// Opening notional across legs.
    pub fn invested(&self) -> Decimal {
        self.legs
            .iter()
            .map(|leg| leg.quantity.abs() * leg.entry_price)
            .sum()
    }

    /// Run every leg's trailing stop; true if any fires.
    ///
    /// All stops are updated even after one fires so ratchets stay current.
    pub fn update_trailing(
        &mut self,
        price: Decimal,
        trigger_for: impl Fn(usize) -> Decimal,
        distance_for: impl Fn(usize) -> Decimal,
    ) -> bool {
        let mut fired = false;
        for (i, (leg, stop)) in self.legs.iter().zip(self.trailing.iter_mut()).enumerate() {
            let profit_pct = leg.profit_pct_at(price);
            if stop.update(price, profit_pct, trigger_for(i), distance_for(i), leg.is_long()) {
                fired = true;
            }
        }
        fired
    }

    pub fn trailing_stops(&self) -> &[TrailingStop] {
        &self.trailing
    }
}
