//! Per-leg position sizing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use crate::config::StrategyConfig;
use crate::utils::nth_or_last;

/// Smallest quantity ever returned for a tradable leg.
pub const MIN_QUANTITY: Decimal = dec!(0.001);
/// Largest quantity ever returned for a single leg.
pub const MAX_QUANTITY: Decimal = dec!(100000);

/// Turns account balance and leg index into an order quantity.
///
/// Two modes:
/// - fixed: `fixed_size * multiplier` shares, when a non-zero fixed size is set
/// - percentage: `balance * allocation * multiplier / price`, rounded to whole
///   units once the clamped value reaches 1
///
/// A zero return means "cannot trade" and is not an error.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    allocation: Decimal,
    multipliers: Vec<Decimal>,
    fixed_size: Decimal,
}

impl PositionSizer {
    /// Create a percentage-mode sizer.
    pub fn new(allocation: Decimal, multipliers: Vec<Decimal>) -> Self {
        Self {
            allocation,
            multipliers,
            fixed_size: Decimal::ZERO,
        }
    }

    /// Switch to fixed-size mode (0 keeps percentage mode).
    pub fn with_fixed_size(mut self, fixed_size: Decimal) -> Self {
        self.fixed_size = fixed_size;
        self
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(config.capital_allocation, config.size_multipliers.clone())
            .with_fixed_size(config.fixed_position_size)
    }

    /// Multiplier for a leg; the last configured value repeats.
    pub fn multiplier(&self, leg_index: usize) -> Decimal {
        nth_or_last(&self.multipliers, leg_index).unwrap_or(Decimal::ONE)
    }

    /// Quantity for `leg_index` given the account balance and current price.
    pub fn size(&self, balance: Decimal, leg_index: usize, price: Option<Decimal>) -> Decimal {
        if balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if matches!(price, Some(p) if p <= Decimal::ZERO) {
            return Decimal::ZERO;
        }

        let multiplier = self.multiplier(leg_index);

        if self.fixed_size > Decimal::ZERO {
            let quantity = clamp_quantity(self.fixed_size * multiplier);
            debug!(leg_index, %multiplier, %quantity, "Fixed position sizing");
            return quantity;
        }

        let base_amount = balance * self.allocation * multiplier;

        match price {
            Some(price) => {
                let quantity = clamp_quantity(base_amount / price);
                let quantity = if quantity >= Decimal::ONE {
                    quantity.round()
                } else {
                    quantity
                };
                debug!(
                    leg_index,
                    %balance,
                    %multiplier,
                    %base_amount,
                    %price,
                    %quantity,
                    "Percentage position sizing"
                );
                quantity
            }
            None => {
                let quantity = (base_amount / dec!(100)).min(dec!(100));
                warn!(%base_amount, %quantity, "No price available, using fallback sizing");
                quantity
            }
        }
    }
}

fn clamp_quantity(quantity: Decimal) -> Decimal {
    quantity.max(MIN_QUANTITY).min(MAX_QUANTITY)
}
