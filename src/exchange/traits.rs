//! Broker-facing seams consumed by the engine.
//!
//! The orchestrator owns exactly one handle implementing both traits. A replay
//! sink fills synchronously; a live sink may acknowledge with
//! `Submission::Pending` and deliver the fill through the engine event queue.

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{OrderIntent, Submission, Tick};

/// Errors surfaced by an order sink.
#[derive(Debug, Error, PartialEq)]
pub enum ExchangeError {
    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("no mark price observed for {instrument}")]
    NoMarkPrice { instrument: String },

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
}

/// Accepts orders from the engine.
pub trait OrderSink {
    /// Submit an order; returns a fill or a pending acknowledgement.
    fn submit(&mut self, intent: &OrderIntent) -> Result<Submission, ExchangeError>;

    /// Observe a market tick before the engine evaluates it.
    fn observe(&mut self, _tick: &Tick) {}
}

/// Capital queries used for sizing and affordability checks.
pub trait AccountBalance {
    /// Total account equity used as the sizing base.
    fn balance(&self) -> Decimal;

    /// Cash currently deployable into new legs.
    fn available_cash(&self) -> Decimal;
}
