//! Market data and order types shared by the engine and its broker seam.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single market observation for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<Decimal>,
}

impl Tick {
    /// Create a tick with only a last price.
    pub fn new(instrument: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            timestamp,
            bid: None,
            ask: None,
            volume: None,
        }
    }

    /// Attach top-of-book quotes.
    pub fn with_quotes(mut self, bid: Decimal, ask: Decimal) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Attach traded volume.
    pub fn with_volume(mut self, volume: Decimal) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Calendar day (UTC) this tick belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Side that closes a signed position.
    pub fn closing(signed_quantity: Decimal) -> Self {
        if signed_quantity < Decimal::ZERO {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }

    pub fn is_long(&self) -> bool {
        matches!(self, OrderSide::Buy)
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type accepted by the order sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl Default for OrderType {
    fn default() -> Self {
        OrderType::Market
    }
}

/// Whether an order opens a leg or closes the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderRole {
    Open,
    Close,
}

/// An order the engine wants executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub limit_price: Option<Decimal>,
    /// Price the decision was made at
    pub reference_price: Decimal,
    pub strategy_id: String,
    pub leg_index: usize,
    pub role: OrderRole,
}

impl OrderIntent {
    /// Create a market order intent.
    pub fn market(
        instrument: impl Into<String>,
        side: OrderSide,
        quantity: Decimal,
        reference_price: Decimal,
        strategy_id: impl Into<String>,
        leg_index: usize,
        role: OrderRole,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            limit_price: None,
            reference_price,
            strategy_id: strategy_id.into(),
            leg_index,
            role,
        }
    }

    /// Convert to the given order type, limiting at the reference price.
    pub fn with_order_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self.limit_price = match order_type {
            OrderType::Market => None,
            OrderType::Limit => Some(self.reference_price),
        };
        self
    }

    /// Notional at the reference price.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.reference_price
    }
}

/// Execution report for a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Outcome of `OrderSink::submit`.
///
/// Replay sinks fill synchronously; live sinks acknowledge and deliver the
/// fill later through the engine event queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Filled(Fill),
    Pending { order_id: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_helpers() {
        assert_eq!(OrderSide::Buy.sign(), dec!(1));
        assert_eq!(OrderSide::Sell.sign(), dec!(-1));
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::closing(dec!(-3)), OrderSide::Buy);
        assert_eq!(OrderSide::closing(dec!(3)), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_limit_intent_uses_reference_price() {
        let intent = OrderIntent::market(
            "AAPL",
            OrderSide::Buy,
            dec!(10),
            dec!(101.5),
            "cdm",
            0,
            OrderRole::Open,
        )
        .with_order_type(OrderType::Limit);

        assert_eq!(intent.limit_price, Some(dec!(101.5)));
        assert_eq!(intent.notional(), dec!(1015.0));
    }
}
