//! Broker seam for the martingale engine.
//!
//! The engine only talks to a broker through two traits:
//! - [`OrderSink`]: order submission, either filled synchronously or
//!   acknowledged and filled later through the engine event queue
//! - [`AccountBalance`]: sizing base and deployable cash
//!
//! [`PaperBroker`] implements both for tick replay.

mod paper;
mod traits;
mod types;

pub use paper::{PaperAccount, PaperBroker};
pub use traits::{AccountBalance, ExchangeError, OrderSink};
pub use types::*;
