//! Paper broker for replayed ticks.
//!
//! Fills every order synchronously at the last observed price (or the limit
//! price for limit orders) and charges a flat commission rate.

use super::traits::{AccountBalance, ExchangeError, OrderSink};
use super::types::*;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, info};

/// Simulated account state.
#[derive(Debug, Clone)]
pub struct PaperAccount {
    pub initial_balance: Decimal,
    pub cash: Decimal,
    /// Signed quantity per instrument
    pub positions: HashMap<String, Decimal>,
    pub total_commission: Decimal,
    pub order_count: u64,
}

impl PaperAccount {
    fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            cash: initial_balance,
            positions: HashMap::new(),
            total_commission: Decimal::ZERO,
            order_count: 0,
        }
    }
}

/// Replay order sink with an in-memory account.
pub struct PaperBroker {
    account: PaperAccount,
    marks: HashMap<String, Decimal>,
    last_timestamp: DateTime<Utc>,
    next_order_id: u64,
    /// Commission as a fraction of notional (0.002 = 0.2%)
    commission_rate: Decimal,
}

impl PaperBroker {
    /// Create a paper broker with the default 0.2% commission.
    pub fn new(initial_balance: Decimal) -> Self {
        Self::with_commission(initial_balance, dec!(0.002))
    }

    pub fn with_commission(initial_balance: Decimal, commission_rate: Decimal) -> Self {
        Self {
            account: PaperAccount::new(initial_balance),
            marks: HashMap::new(),
            last_timestamp: DateTime::<Utc>::default(),
            next_order_id: 1,
            commission_rate,
        }
    }

    pub fn account(&self) -> &PaperAccount {
        &self.account
    }

    pub fn mark(&self, instrument: &str) -> Option<Decimal> {
        self.marks.get(instrument).copied()
    }

    /// Mark-to-market value of all open positions.
    pub fn position_value(&self) -> Decimal {
        self.account
            .positions
            .iter()
            .map(|(instrument, qty)| *qty * self.marks.get(instrument).copied().unwrap_or(Decimal::ZERO))
            .sum()
    }

    fn allocate_order_id(&mut self) -> u64 {
        let id = self.next_order_id;
        self.next_order_id += 1;
        id
    }
}

impl OrderSink for PaperBroker {
    fn submit(&mut self, intent: &OrderIntent) -> Result<Submission, ExchangeError> {
        if intent.quantity <= Decimal::ZERO {
            return Err(ExchangeError::Rejected {
                reason: format!("non-positive quantity {}", intent.quantity),
            });
        }

        let price = match (intent.order_type, intent.limit_price) {
            (OrderType::Limit, Some(limit)) => limit,
            _ => self
                .marks
                .get(&intent.instrument)
                .copied()
                .ok_or_else(|| ExchangeError::NoMarkPrice {
                    instrument: intent.instrument.clone(),
                })?,
        };

        let notional = intent.quantity * price;
        let commission = notional * self.commission_rate;

        if intent.role == OrderRole::Open && intent.side == OrderSide::Buy {
            let required = notional + commission;
            if required > self.account.cash {
                return Err(ExchangeError::InsufficientFunds {
                    required,
                    available: self.account.cash,
                });
            }
        }

        let position = self
            .account
            .positions
            .entry(intent.instrument.clone())
            .or_insert(Decimal::ZERO);
        *position += intent.side.sign() * intent.quantity;

        // Buying spends cash, selling (including short sales) receives it.
        self.account.cash -= intent.side.sign() * notional;
        self.account.cash -= commission;
        self.account.total_commission += commission;
        self.account.order_count += 1;

        let order_id = self.allocate_order_id();

        info!(
            order_id,
            instrument = %intent.instrument,
            strategy = %intent.strategy_id,
            side = %intent.side,
            quantity = %intent.quantity,
            price = %price,
            commission = %commission,
            "Paper order filled"
        );

        Ok(Submission::Filled(Fill {
            order_id,
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            price,
            commission,
            timestamp: self.last_timestamp,
        }))
    }

    fn observe(&mut self, tick: &Tick) {
        self.marks.insert(tick.instrument.clone(), tick.price);
        self.last_timestamp = tick.timestamp;
        debug!(instrument = %tick.instrument, price = %tick.price, "Paper mark updated");
    }
}

impl AccountBalance for PaperBroker {
    fn balance(&self) -> Decimal {
        self.account.cash + self.position_value()
    }

    fn available_cash(&self) -> Decimal {
        self.account.cash
    }
}
