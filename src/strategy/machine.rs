//! Per (variant, instrument) strategy state machine.
//!
//! `IDLE -> ACTIVE(leg 1..=max_legs) -> IDLE`. The machine owns its book and
//! decides; the orchestrator consults the coordination gate and the admission
//! controller, submits orders, and reports fills back through
//! [`StrategyMachine::record_leg`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

use super::book::{CycleBook, Leg};
use super::coordination::{CoordinationGate, GateDecision, Handshake, PartnerView};
use super::policy::{build_policy, StrategyKind, VariantPolicy};
use super::sizer::PositionSizer;
use crate::config::StrategyConfig;
use crate::exchange::{OrderIntent, OrderRole, OrderSide, OrderType, Tick};

/// Machine type stored in the orchestrator registry.
pub type DynStrategyMachine = StrategyMachine<Box<dyn VariantPolicy>>;

/// Orders and realized P&L for closing the current cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    pub orders: Vec<OrderIntent>,
    pub realized_pnl: Decimal,
}

pub struct StrategyMachine<P: VariantPolicy> {
    id: String,
    config: StrategyConfig,
    policy: P,
    book: CycleBook,
    sizer: PositionSizer,
    enabled: bool,
    handshake: Handshake,
}

impl StrategyMachine<Box<dyn VariantPolicy>> {
    /// Build a machine with the policy selected by `config.kind`.
    pub fn from_config(config: StrategyConfig) -> Self {
        let policy = build_policy(&config);
        Self::new(config, policy)
    }
}

impl<P: VariantPolicy> StrategyMachine<P> {
    pub fn new(config: StrategyConfig, policy: P) -> Self {
        Self {
            id: config.id.clone(),
            sizer: PositionSizer::from_config(&config),
            enabled: config.enabled,
            config,
            policy,
            book: CycleBook::default(),
            handshake: Handshake::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn instrument(&self) -> &str {
        &self.config.instrument
    }

    pub fn kind(&self) -> StrategyKind {
        self.policy.kind()
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn book(&self) -> &CycleBook {
        &self.book
    }

    pub fn is_active(&self) -> bool {
        self.book.is_active()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn leg_count(&self) -> usize {
        self.book.leg_count()
    }

    pub fn cycle_id(&self) -> Option<&str> {
        self.book.cycle_id()
    }

    pub fn handshake(&self) -> Handshake {
        self.handshake
    }

    /// Partner id when coordination is enabled.
    pub fn partner_id(&self) -> Option<&str> {
        if self.config.coordination.enabled {
            self.config.coordination.partner.as_deref()
        } else {
            None
        }
    }

    pub fn mark(&mut self, price: Decimal) {
        self.book.mark(price);
    }

    pub fn should_enter(&mut self, tick: &Tick) -> bool {
        if !self.enabled || self.book.is_active() {
            return false;
        }
        self.policy.should_enter(&self.config, tick)
    }

    pub fn should_add_leg(&mut self, tick: &Tick) -> bool {
        if !self.book.is_active() || self.book.leg_count() >= self.config.max_legs {
            return false;
        }
        self.policy.should_add_leg(&mut self.book, &self.config, tick)
    }

    pub fn should_exit(&mut self, tick: &Tick) -> bool {
        if !self.book.is_active() || self.book.legs().is_empty() {
            return false;
        }
        self.policy.should_exit(&mut self.book, &self.config, tick)
    }

    /// Ask the coordination gate whether this machine may enter.
    pub fn coordinate(&mut self, partner: Option<&PartnerView>) -> GateDecision {
        CoordinationGate::evaluate(&self.config.coordination, &mut self.handshake, partner)
    }

    /// Quantity for the next leg.
    pub fn size_next_leg(&self, balance: Decimal, price: Decimal) -> Decimal {
        self.sizer.size(balance, self.book.leg_count(), Some(price))
    }

    /// Side of the next opening order.
    pub fn next_side(&self) -> OrderSide {
        if self.book.leg_count() == 0 {
            self.config.initial_side
        } else {
            self.policy.leg_order_side(&self.book, &self.config)
        }
    }

    /// Opening order for the next leg at the tick price.
    pub fn open_intent(&self, quantity: Decimal, tick: &Tick, order_type: OrderType) -> OrderIntent {
        OrderIntent::market(
            tick.instrument.clone(),
            self.next_side(),
            quantity,
            tick.price,
            self.id.clone(),
            self.book.leg_count(),
            OrderRole::Open,
        )
        .with_order_type(order_type)
    }

    /// Move to ACTIVE; the first leg is recorded separately.
    pub fn begin_cycle(&mut self, cycle_id: String, tick: &Tick) {
        info!(
            strategy = %self.id,
            kind = %self.policy.kind(),
            cycle_id = %cycle_id,
            price = %tick.price,
            "Cycle started"
        );
        self.book.start(cycle_id, tick.price, tick.timestamp);
        self.policy.on_cycle_start(tick);
    }

    /// Book a leg for a submitted opening order.
    ///
    /// `pending_order` is set when the fill has not arrived yet; the leg is
    /// provisionally priced at `price` until [`Self::confirm_leg`].
    pub fn record_leg(
        &mut self,
        intent: &OrderIntent,
        price: Decimal,
        at: DateTime<Utc>,
        pending_order: Option<u64>,
    ) {
        let leg = Leg {
            leg_index: self.book.leg_count(),
            strategy_id: self.id.clone(),
            quantity: intent.side.sign() * intent.quantity,
            entry_price: price,
            mark_price: price,
            entered_at: at,
            pending_order,
        };
        debug!(
            strategy = %self.id,
            leg = leg.leg_index,
            side = %intent.side,
            quantity = %intent.quantity,
            price = %price,
            "Leg opened"
        );
        self.book.push_leg(leg);
    }

    /// Apply a late fill to a pending leg; false if no leg was waiting on it.
    pub fn confirm_leg(&mut self, order_id: u64, price: Decimal) -> bool {
        self.book.confirm_leg(order_id, price).is_some()
    }

    /// Closing orders and realized P&L at `price` under the `hold_previous`
    /// policy.
    ///
    /// Holding closes the net quantity in one order. Otherwise every leg is
    /// closed individually. The two differ when legs sit on opposite sides.
    pub fn exit_plan(&self, price: Decimal, order_type: OrderType) -> ExitPlan {
        let instrument = self.config.instrument.clone();
        let close = |side: OrderSide, quantity: Decimal, leg_index: usize| {
            OrderIntent::market(
                instrument.clone(),
                side,
                quantity,
                price,
                self.id.clone(),
                leg_index,
                OrderRole::Close,
            )
            .with_order_type(order_type)
        };

        if self.config.hold_previous {
            let net_quantity = self.book.total_quantity();
            let signed_cost = self.book.signed_cost();
            let realized_pnl = if net_quantity < Decimal::ZERO {
                signed_cost.abs() - net_quantity.abs() * price
            } else {
                net_quantity * price - signed_cost
            };

            let orders = if net_quantity.is_zero() {
                Vec::new()
            } else {
                vec![close(
                    OrderSide::closing(net_quantity),
                    net_quantity.abs(),
                    self.book.leg_count(),
                )]
            };
            return ExitPlan { orders, realized_pnl };
        }

        let orders = self
            .book
            .legs()
            .iter()
            .map(|leg| close(OrderSide::closing(leg.quantity), leg.quantity.abs(), leg.leg_index))
            .collect();
        ExitPlan {
            orders,
            realized_pnl: self.book.pnl_at(price),
        }
    }

    /// Reset per-cycle state. Returns whether the machine stays armed.
    pub fn finish_cycle(&mut self) -> bool {
        self.book.clear();
        self.policy.on_cycle_end();
        self.handshake.reset();
        self.enabled = self.config.repeat_on_close && self.config.auto_restart;
        if !self.enabled {
            info!(strategy = %self.id, "Restart disabled, machine idle until re-armed");
        }
        self.enabled
    }

    /// Re-enable an idle machine.
    pub fn rearm(&mut self) {
        self.enabled = true;
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.book.unrealized_pnl()
    }

    pub fn partner_view(&self) -> PartnerView {
        PartnerView {
            id: self.id.clone(),
            active: self.book.is_active(),
            legs: self.book.leg_count(),
            unrealized_pnl: self.book.unrealized_pnl(),
        }
    }
}
