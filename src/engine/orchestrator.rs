//! Orchestrator - the single writer over strategies, admission and ledger.
//!
//! Each tick is processed fully before the next one:
//! 1. the broker observes the tick and the trading day advances
//! 2. queued external events are applied
//! 3. every machine on the tick's instrument gets at most one transition,
//!    in priority enter, add leg, exit
//! 4. unrealized P&L is pushed to the admission controller and the ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::events::{event_channel, EngineEvent, EventReceiver, EventSender};
use crate::config::Config;
use crate::cycle::{CycleLedger, CycleReport, CycleStatus, LedgerError, Trade};
use crate::exchange::{
    AccountBalance, ExchangeError, Fill, OrderIntent, OrderRole, OrderSink, OrderType, Submission,
    Tick,
};
use crate::risk::{Admission, AdmissionController, AdmissionStatus};
use crate::strategy::{DynStrategyMachine, GateDecision};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Strategy {strategy} names unknown partner {partner}")]
    UnknownPartner { strategy: String, partner: String },

    #[error("Duplicate strategy id: {0}")]
    DuplicateStrategy(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// What a single tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Cycle ids opened this tick
    pub entered: Vec<String>,
    pub legs_added: usize,
    /// Cycle ids closed this tick, including flattened ones
    pub closed: Vec<String>,
    /// Every order submitted successfully
    pub orders: Vec<OrderIntent>,
}

/// An order acknowledged but not yet filled.
#[derive(Debug, Clone)]
struct PendingOrder {
    machine: usize,
    cycle_id: String,
    intent: OrderIntent,
}

pub struct Orchestrator<B: OrderSink + AccountBalance> {
    broker: B,
    machines: Vec<DynStrategyMachine>,
    /// Strategy id -> index into `machines`
    index: HashMap<String, usize>,
    /// Resolved coordination partner per machine
    partners: Vec<Option<usize>>,
    admission: AdmissionController,
    ledger: CycleLedger,
    events_tx: EventSender,
    events_rx: EventReceiver,
    pending: HashMap<u64, PendingOrder>,
    order_type: OrderType,
    cycle_seq: u64,
    last_tick_at: Option<DateTime<Utc>>,
}

impl<B: OrderSink + AccountBalance> Orchestrator<B> {
    pub fn new(config: &Config, broker: B) -> Result<Self, EngineError> {
        let mut machines = Vec::with_capacity(config.strategies.len());
        let mut index = HashMap::new();

        for strategy in &config.strategies {
            if index.insert(strategy.id.clone(), machines.len()).is_some() {
                return Err(EngineError::DuplicateStrategy(strategy.id.clone()));
            }
            machines.push(DynStrategyMachine::from_config(strategy.clone()));
        }

        let partners = machines
            .iter()
            .map(|machine: &DynStrategyMachine| match machine.partner_id() {
                None => Ok(None),
                Some(partner) => index.get(partner).copied().map(Some).ok_or_else(|| {
                    EngineError::UnknownPartner {
                        strategy: machine.id().to_string(),
                        partner: partner.to_string(),
                    }
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            strategies = machines.len(),
            order_type = ?config.engine.order_type,
            max_concurrent = config.admission.max_concurrent_cycles,
            "Orchestrator initialized"
        );

        let (events_tx, events_rx) = event_channel();
        Ok(Self {
            broker,
            machines,
            index,
            partners,
            admission: AdmissionController::new(config.admission.clone(), Utc::now().date_naive()),
            ledger: CycleLedger::new(),
            events_tx,
            events_rx,
            pending: HashMap::new(),
            order_type: config.engine.order_type,
            cycle_seq: 0,
            last_tick_at: None,
        })
    }

    /// Handle for pushing fills and operator commands from other tasks.
    pub fn event_sender(&self) -> EventSender {
        self.events_tx.clone()
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn status(&self) -> AdmissionStatus {
        self.admission.status()
    }

    pub fn ledger(&self) -> &CycleLedger {
        &self.ledger
    }

    pub fn report(&self) -> &CycleReport {
        self.ledger.report()
    }

    pub fn machines(&self) -> &[DynStrategyMachine] {
        &self.machines
    }

    pub fn machine(&self, strategy_id: &str) -> Option<&DynStrategyMachine> {
        self.index.get(strategy_id).map(|&idx| &self.machines[idx])
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.len()
    }

    fn index_of(&self, strategy_id: &str) -> Result<usize, EngineError> {
        self.index
            .get(strategy_id)
            .copied()
            .ok_or_else(|| EngineError::UnknownStrategy(strategy_id.to_string()))
    }

    /// Process one market tick across every machine trading its instrument.
    pub fn on_tick(&mut self, tick: &Tick) -> Result<TickOutcome, EngineError> {
        self.broker.observe(tick);
        self.admission.update_current_date(tick.date());
        self.last_tick_at = Some(tick.timestamp);

        let mut outcome = TickOutcome::default();
        self.drain_events(&mut outcome)?;

        for idx in 0..self.machines.len() {
            if self.machines[idx].instrument() != tick.instrument {
                continue;
            }
            self.machines[idx].mark(tick.price);
            self.step(idx, tick, &mut outcome)?;
        }

        let total_unrealized: Decimal = self.machines.iter().map(|m| m.unrealized_pnl()).sum();
        self.admission.update_unrealized_pnl(total_unrealized);
        for machine in &self.machines {
            if let Some(cycle_id) = machine.cycle_id() {
                self.ledger.mark_unrealized(cycle_id, machine.unrealized_pnl())?;
            }
        }

        Ok(outcome)
    }

    /// At most one transition per machine per tick.
    fn step(&mut self, idx: usize, tick: &Tick, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        if self.machines[idx].should_enter(tick) {
            self.try_enter(idx, tick, outcome)
        } else if self.machines[idx].should_add_leg(tick) {
            self.try_add_leg(idx, tick, outcome)
        } else if self.machines[idx].should_exit(tick) {
            self.close_cycle(idx, tick.price, tick.timestamp, CycleStatus::Completed, outcome)
        } else {
            Ok(())
        }
    }

    fn try_enter(&mut self, idx: usize, tick: &Tick, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        let partner = self.partners[idx].map(|p| self.machines[p].partner_view());
        if let GateDecision::Refuse(reason) = self.machines[idx].coordinate(partner.as_ref()) {
            debug!(strategy = %self.machines[idx].id(), %reason, "Entry held by coordination");
            return Ok(());
        }

        let strategy_id = self.machines[idx].id().to_string();
        if let Admission::Refused { reason } = self.admission.can_start_cycle(&strategy_id) {
            debug!(strategy = %strategy_id, %reason, "Entry refused by admission");
            return Ok(());
        }

        let Some(intent) = self.open_intent(idx, tick) else {
            return Ok(());
        };
        let submission = match self.broker.submit(&intent) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(strategy = %strategy_id, error = %e, "Entry order rejected");
                return Ok(());
            }
        };

        self.cycle_seq += 1;
        let cycle_id = format!(
            "{}_{}_{}_{}",
            strategy_id,
            tick.instrument,
            tick.timestamp.format("%Y%m%d_%H%M%S"),
            self.cycle_seq
        );

        self.machines[idx].begin_cycle(cycle_id.clone(), tick);
        let kind = self.machines[idx].kind();
        self.ledger
            .start_cycle(&cycle_id, &strategy_id, kind, &tick.instrument, tick.timestamp)?;
        self.admission.register_cycle_start(&cycle_id, &strategy_id);

        self.book_open_leg(idx, &cycle_id, &intent, submission, tick.timestamp)?;
        outcome.orders.push(intent);
        outcome.entered.push(cycle_id);
        Ok(())
    }

    fn try_add_leg(&mut self, idx: usize, tick: &Tick, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        // An existing cycle adding a leg is not a new cycle: only a halt blocks it
        if let Some(reason) = self.admission.halt_reason() {
            debug!(strategy = %self.machines[idx].id(), %reason, "Leg add blocked by halt");
            return Ok(());
        }

        let Some(cycle_id) = self.machines[idx].cycle_id().map(str::to_string) else {
            return Ok(());
        };
        let Some(intent) = self.open_intent(idx, tick) else {
            return Ok(());
        };
        let submission = match self.broker.submit(&intent) {
            Ok(submission) => submission,
            Err(e) => {
                warn!(
                    strategy = %self.machines[idx].id(),
                    leg = intent.leg_index,
                    error = %e,
                    "Leg order rejected"
                );
                return Ok(());
            }
        };

        self.book_open_leg(idx, &cycle_id, &intent, submission, tick.timestamp)?;
        outcome.orders.push(intent);
        outcome.legs_added += 1;
        Ok(())
    }

    /// Size the next leg and check it is affordable; None skips the
    /// transition for this tick.
    fn open_intent(&self, idx: usize, tick: &Tick) -> Option<OrderIntent> {
        let machine = &self.machines[idx];
        let quantity = machine.size_next_leg(self.broker.balance(), tick.price);
        if quantity.is_zero() {
            debug!(strategy = %machine.id(), price = %tick.price, "Position size is zero, skipping");
            return None;
        }

        let notional = quantity * tick.price;
        let available = self.broker.available_cash();
        if notional > available {
            warn!(
                strategy = %machine.id(),
                leg = machine.leg_count(),
                required = %notional,
                available = %available,
                "Insufficient capital for leg, skipping"
            );
            return None;
        }

        Some(machine.open_intent(quantity, tick, self.order_type))
    }

    fn book_open_leg(
        &mut self,
        idx: usize,
        cycle_id: &str,
        intent: &OrderIntent,
        submission: Submission,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        match submission {
            Submission::Filled(fill) => {
                self.machines[idx].record_leg(intent, fill.price, at, None);
                self.record_trade(cycle_id, intent, &fill)?;
            }
            Submission::Pending { order_id } => {
                debug!(order_id, strategy = %intent.strategy_id, "Opening order pending");
                self.machines[idx].record_leg(intent, intent.reference_price, at, Some(order_id));
                self.pending.insert(
                    order_id,
                    PendingOrder {
                        machine: idx,
                        cycle_id: cycle_id.to_string(),
                        intent: intent.clone(),
                    },
                );
            }
        }
        Ok(())
    }

    fn record_trade(&mut self, cycle_id: &str, intent: &OrderIntent, fill: &Fill) -> Result<(), EngineError> {
        self.admission.register_trade(fill.notional(), fill.commission);
        self.ledger.add_trade(cycle_id, trade_from(intent, fill))?;
        Ok(())
    }

    /// Close the machine's cycle at `price` and finalize it with `status`.
    fn close_cycle(
        &mut self,
        idx: usize,
        price: Decimal,
        at: DateTime<Utc>,
        status: CycleStatus,
        outcome: &mut TickOutcome,
    ) -> Result<(), EngineError> {
        let Some(cycle_id) = self.machines[idx].cycle_id().map(str::to_string) else {
            return Ok(());
        };
        let plan = self.machines[idx].exit_plan(price, self.order_type);
        let mut awaiting = Vec::new();

        for (n, intent) in plan.orders.into_iter().enumerate() {
            match self.broker.submit(&intent) {
                Ok(Submission::Filled(fill)) => self.record_trade(&cycle_id, &intent, &fill)?,
                Ok(Submission::Pending { order_id }) => {
                    // Realized at the decision price; the late fill only adds commission
                    let fill = Fill {
                        order_id,
                        instrument: intent.instrument.clone(),
                        side: intent.side,
                        quantity: intent.quantity,
                        price: intent.reference_price,
                        commission: Decimal::ZERO,
                        timestamp: at,
                    };
                    self.ledger.add_trade(&cycle_id, trade_from(&intent, &fill))?;
                    awaiting.push((
                        order_id,
                        PendingOrder {
                            machine: idx,
                            cycle_id: cycle_id.clone(),
                            intent: intent.clone(),
                        },
                    ));
                }
                Err(e) if n == 0 => {
                    error!(cycle_id = %cycle_id, error = %e, "Exit order rejected, cycle stays open");
                    return Ok(());
                }
                Err(e) => {
                    error!(
                        cycle_id = %cycle_id,
                        leg = intent.leg_index,
                        error = %e,
                        "Exit order rejected after partial close, finalizing cycle"
                    );
                    break;
                }
            }
            outcome.orders.push(intent);
        }

        match status {
            CycleStatus::Stopped => self.ledger.stop_cycle(&cycle_id, at, plan.realized_pnl)?,
            _ => self.ledger.complete_cycle(&cycle_id, at, plan.realized_pnl)?,
        };
        self.admission.register_cycle_end(&cycle_id, plan.realized_pnl);
        self.machines[idx].finish_cycle();

        // Older orders of this machine can no longer book anything; only the
        // closing orders just sent stay tracked for their commission.
        let before = self.pending.len();
        self.pending.retain(|_, order| order.machine != idx);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(cycle_id = %cycle_id, dropped, "Dropped unfilled orders of finished cycle");
        }
        self.pending.extend(awaiting);

        info!(
            strategy = %self.machines[idx].id(),
            cycle_id = %cycle_id,
            %status,
            pnl = %plan.realized_pnl,
            "Cycle finalized"
        );
        outcome.closed.push(cycle_id);
        Ok(())
    }

    /// Close a machine's open cycle at its last mark as STOPPED.
    ///
    /// Returns the closed cycle id, or None if the machine was idle.
    pub fn flatten(&mut self, strategy_id: &str) -> Result<Option<String>, EngineError> {
        let mut outcome = TickOutcome::default();
        self.flatten_into(strategy_id, &mut outcome)?;
        Ok(outcome.closed.pop())
    }

    /// Flatten every active machine; the outcome lists closed cycles and
    /// every closing order sent.
    pub fn flatten_all(&mut self) -> Result<TickOutcome, EngineError> {
        let active: Vec<String> = self
            .machines
            .iter()
            .filter(|m| m.is_active())
            .map(|m| m.id().to_string())
            .collect();

        let mut outcome = TickOutcome::default();
        for strategy_id in active {
            self.flatten_into(&strategy_id, &mut outcome)?;
        }
        Ok(outcome)
    }

    fn flatten_into(&mut self, strategy_id: &str, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        let idx = self.index_of(strategy_id)?;
        let machine = &self.machines[idx];
        let Some(price) = machine.book().legs().last().map(|leg| leg.mark_price) else {
            debug!(strategy = %strategy_id, "Nothing to flatten");
            return Ok(());
        };

        warn!(strategy = %strategy_id, price = %price, "Flattening cycle");
        let at = self.last_tick_at.unwrap_or_else(Utc::now);
        self.close_cycle(idx, price, at, CycleStatus::Stopped, outcome)
    }

    fn drain_events(&mut self, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply_event(event, outcome)?;
        }
        Ok(())
    }

    fn apply_event(&mut self, event: EngineEvent, outcome: &mut TickOutcome) -> Result<(), EngineError> {
        match event {
            EngineEvent::Fill(fill) => self.apply_fill(fill)?,
            EngineEvent::Halt { reason } => self.admission.halt(reason),
            EngineEvent::Resume => {
                if self.admission.is_halted() {
                    self.admission.resume();
                }
            }
            EngineEvent::Rearm { strategy_id } => {
                let idx = self.index_of(&strategy_id)?;
                info!(strategy = %strategy_id, "Machine re-armed");
                self.machines[idx].rearm();
            }
            EngineEvent::Flatten { strategy_id } => self.flatten_into(&strategy_id, outcome)?,
        }
        Ok(())
    }

    fn apply_fill(&mut self, fill: Fill) -> Result<(), EngineError> {
        let Some(pending) = self.pending.remove(&fill.order_id) else {
            warn!(order_id = fill.order_id, "Fill for unknown order ignored");
            return Ok(());
        };

        let cycle_open = self.ledger.active_cycle(&pending.cycle_id).is_some();
        match pending.intent.role {
            OrderRole::Open if cycle_open => {
                if !self.machines[pending.machine].confirm_leg(fill.order_id, fill.price) {
                    warn!(order_id = fill.order_id, "No pending leg for fill");
                }
                debug!(
                    order_id = fill.order_id,
                    cycle_id = %pending.cycle_id,
                    price = %fill.price,
                    "Pending leg filled"
                );
                self.record_trade(&pending.cycle_id, &pending.intent, &fill)?;
            }
            _ => {
                debug!(
                    order_id = fill.order_id,
                    cycle_id = %pending.cycle_id,
                    commission = %fill.commission,
                    "Late fill for closed cycle"
                );
                self.admission.register_trade(fill.notional(), fill.commission);
            }
        }
        Ok(())
    }
}

fn trade_from(intent: &OrderIntent, fill: &Fill) -> Trade {
    Trade {
        id: fill.order_id.to_string(),
        timestamp: fill.timestamp,
        instrument: fill.instrument.clone(),
        side: fill.side,
        quantity: fill.quantity,
        price: fill.price,
        leg_index: intent.leg_index,
        strategy_id: intent.strategy_id.clone(),
        commission: fill.commission,
        role: intent.role,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use crate::exchange::PaperBroker;
    use crate::strategy::{AlignmentMode, StrategyKind};
    use chrono::{Duration, TimeZone};
    use mockall::mock;
    use rust_decimal_macros::dec;

    mock! {
        Broker {}

        impl OrderSink for Broker {
            fn submit(&mut self, intent: &OrderIntent) -> Result<Submission, ExchangeError>;
            fn observe(&mut self, tick: &Tick);
        }

        impl AccountBalance for Broker {
            fn balance(&self) -> Decimal;
            fn available_cash(&self) -> Decimal;
        }
    }

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 14, 30, 0).unwrap() + Duration::minutes(minute)
    }

    fn tick(minute: i64, price: Decimal) -> Tick {
        Tick::new("SPY", price, at(minute))
    }

    fn cdm(id: &str) -> StrategyConfig {
        let mut config = StrategyConfig::new(id, StrategyKind::Cdm, "SPY");
        config.capital_allocation = dec!(0.25);
        config.leg_distances_pct = vec![dec!(5), dec!(10)];
        config.size_multipliers = vec![dec!(1.0)];
        config.take_profit_pct = vec![dec!(2.0)];
        config.max_legs = 3;
        config
    }

    fn config_with(strategies: Vec<StrategyConfig>) -> Config {
        Config {
            strategies,
            ..Config::default()
        }
    }

    fn paper_engine(strategies: Vec<StrategyConfig>) -> Orchestrator<PaperBroker> {
        let broker = PaperBroker::with_commission(dec!(10000), Decimal::ZERO);
        Orchestrator::new(&config_with(strategies), broker).unwrap()
    }

    fn idle_mock() -> MockBroker {
        let mut broker = MockBroker::new();
        broker.expect_observe().return_const(());
        broker.expect_balance().return_const(dec!(10000));
        broker.expect_available_cash().return_const(dec!(10000));
        broker
    }

    #[test]
    fn test_cdm_cycle_end_to_end() {
        let mut engine = paper_engine(vec![cdm("cdm")]);

        let first = engine.on_tick(&tick(0, dec!(100))).unwrap();
        assert_eq!(first.entered.len(), 1);
        assert_eq!(first.orders[0].quantity, dec!(25));

        // Balance includes the marked position: 9875 * 0.25 / 95
        let second = engine.on_tick(&tick(1, dec!(95))).unwrap();
        assert_eq!(second.legs_added, 1);
        assert_eq!(second.orders[0].quantity, dec!(26));

        let third = engine.on_tick(&tick(2, dec!(90))).unwrap();
        assert_eq!(third.orders[0].quantity, dec!(27));

        // Average 7400 / 78 = 94.87, exit threshold 95.35
        let exit = engine.on_tick(&tick(3, dec!(96))).unwrap();
        assert_eq!(exit.closed.len(), 1);

        let cycle = &engine.ledger().closed_cycles()[0];
        assert_eq!(cycle.status, CycleStatus::Completed);
        assert_eq!(cycle.realized_pnl, dec!(88));
        assert_eq!(cycle.trade_count(), 4);
        assert_eq!(cycle.max_leg_reached(), 3);

        assert!(!engine.machine("cdm").unwrap().is_active());
        assert_eq!(engine.admission().active_cycle_count(), 0);
        assert_eq!(engine.admission().today().realized_pnl, dec!(88));
        assert_eq!(engine.report().total_realized_pnl, dec!(88));
        assert_eq!(engine.broker().balance(), dec!(10088));
    }

    #[test]
    fn test_per_leg_close_records_every_leg() {
        let mut config = cdm("cdm");
        config.hold_previous = false;
        let mut engine = paper_engine(vec![config]);

        for (minute, price) in [dec!(100), dec!(95), dec!(90), dec!(96)].into_iter().enumerate() {
            engine.on_tick(&tick(minute as i64, price)).unwrap();
        }

        let cycle = &engine.ledger().closed_cycles()[0];
        assert_eq!(cycle.status, CycleStatus::Completed);
        assert_eq!(cycle.trade_count(), 6);
        // -4 * 25 + 1 * 26 + 6 * 27
        assert_eq!(cycle.realized_pnl, dec!(88));
    }

    #[test]
    fn test_rejected_entry_leaves_machine_idle() {
        let mut broker = idle_mock();
        broker.expect_submit().times(1).returning(|_| {
            Err(ExchangeError::Rejected {
                reason: "market closed".to_string(),
            })
        });

        let mut engine = Orchestrator::new(&config_with(vec![cdm("cdm")]), broker).unwrap();
        let outcome = engine.on_tick(&tick(0, dec!(100))).unwrap();

        assert!(outcome.entered.is_empty());
        assert!(outcome.orders.is_empty());
        assert!(!engine.machine("cdm").unwrap().is_active());
        assert_eq!(engine.admission().active_cycle_count(), 0);
        assert_eq!(engine.ledger().active_cycles().count(), 0);
    }

    #[test]
    fn test_pending_fill_reprices_leg() {
        let mut broker = idle_mock();
        broker
            .expect_submit()
            .times(1)
            .returning(|_| Ok(Submission::Pending { order_id: 7 }));

        let mut engine = Orchestrator::new(&config_with(vec![cdm("cdm")]), broker).unwrap();
        let outcome = engine.on_tick(&tick(0, dec!(100))).unwrap();
        let cycle_id = outcome.entered[0].clone();

        let machine = engine.machine("cdm").unwrap();
        assert_eq!(machine.book().legs()[0].entry_price, dec!(100));
        assert_eq!(machine.book().legs()[0].pending_order, Some(7));
        assert_eq!(engine.ledger().active_cycle(&cycle_id).unwrap().trade_count(), 0);
        assert_eq!(engine.pending_orders(), 1);

        engine
            .event_sender()
            .send(EngineEvent::Fill(Fill {
                order_id: 7,
                instrument: "SPY".to_string(),
                side: crate::exchange::OrderSide::Buy,
                quantity: dec!(25),
                price: dec!(100.5),
                commission: dec!(0.1),
                timestamp: at(0),
            }))
            .unwrap();
        engine.on_tick(&tick(1, dec!(100))).unwrap();

        let leg = &engine.machine("cdm").unwrap().book().legs()[0];
        assert_eq!(leg.entry_price, dec!(100.5));
        assert_eq!(leg.pending_order, None);

        let cycle = engine.ledger().active_cycle(&cycle_id).unwrap();
        assert_eq!(cycle.trade_count(), 1);
        assert_eq!(cycle.trades[0].price, dec!(100.5));
        assert_eq!(cycle.commission, dec!(0.1));
        assert_eq!(engine.pending_orders(), 0);
    }

    #[test]
    fn test_finished_cycles_release_pending_orders() {
        let mut broker = idle_mock();
        let mut next_id = 0u64;
        broker.expect_submit().returning(move |_| {
            next_id += 1;
            Ok(Submission::Pending { order_id: next_id })
        });

        let mut engine = Orchestrator::new(&config_with(vec![cdm("cdm")]), broker).unwrap();
        engine.on_tick(&tick(0, dec!(100))).unwrap();
        assert_eq!(engine.pending_orders(), 1);

        // Opening order 1 never fills; closing order 2 is still awaited
        assert!(engine.flatten("cdm").unwrap().is_some());
        assert_eq!(engine.pending_orders(), 1);

        engine
            .event_sender()
            .send(EngineEvent::Fill(Fill {
                order_id: 1,
                instrument: "SPY".to_string(),
                side: crate::exchange::OrderSide::Buy,
                quantity: dec!(25),
                price: dec!(100),
                commission: Decimal::ZERO,
                timestamp: at(1),
            }))
            .unwrap();
        let outcome = engine.on_tick(&tick(1, dec!(100))).unwrap();
        assert_eq!(outcome.entered.len(), 1);
        assert_eq!(engine.pending_orders(), 2);

        // Repeated cycles do not accumulate stale entries
        engine.flatten("cdm").unwrap();
        assert_eq!(engine.pending_orders(), 1);
        assert_eq!(engine.ledger().closed_cycles().len(), 2);
    }

    #[test]
    fn test_concurrency_cap_refuses_second_cycle() {
        let mut config = config_with(vec![cdm("a"), cdm("b")]);
        config.admission.max_concurrent_cycles = 1;
        let broker = PaperBroker::with_commission(dec!(10000), Decimal::ZERO);
        let mut engine = Orchestrator::new(&config, broker).unwrap();

        let outcome = engine.on_tick(&tick(0, dec!(100))).unwrap();
        assert_eq!(outcome.entered.len(), 1);
        assert!(engine.machine("a").unwrap().is_active());
        assert!(!engine.machine("b").unwrap().is_active());
        assert_eq!(engine.admission().active_cycle_count(), 1);
    }

    #[test]
    fn test_parallel_partner_gates_entry() {
        let mut follower = cdm("follower");
        follower.coordination.enabled = true;
        follower.coordination.mode = AlignmentMode::Parallel;
        follower.coordination.partner = Some("leader".to_string());
        follower.coordination.required_partner_legs = 2;

        let mut engine = paper_engine(vec![cdm("leader"), follower]);

        // Leader enters first in registry order; follower waits for its second leg
        engine.on_tick(&tick(0, dec!(100))).unwrap();
        assert!(engine.machine("leader").unwrap().is_active());
        assert!(!engine.machine("follower").unwrap().is_active());

        engine.on_tick(&tick(1, dec!(95))).unwrap();
        assert_eq!(engine.machine("leader").unwrap().leg_count(), 2);
        assert!(engine.machine("follower").unwrap().is_active());
    }

    #[test]
    fn test_operator_events() {
        let mut config = cdm("cdm");
        config.auto_restart = false;
        let mut engine = paper_engine(vec![config]);
        let events = engine.event_sender();

        events
            .send(EngineEvent::Halt {
                reason: "operator".to_string(),
            })
            .unwrap();
        let outcome = engine.on_tick(&tick(0, dec!(100))).unwrap();
        assert!(outcome.entered.is_empty());
        assert!(engine.admission().is_halted());

        events.send(EngineEvent::Resume).unwrap();
        let outcome = engine.on_tick(&tick(1, dec!(100))).unwrap();
        assert_eq!(outcome.entered.len(), 1);

        events
            .send(EngineEvent::Flatten {
                strategy_id: "cdm".to_string(),
            })
            .unwrap();
        let outcome = engine.on_tick(&tick(2, dec!(100))).unwrap();
        assert_eq!(outcome.closed.len(), 1);
        assert!(outcome.entered.is_empty());
        assert_eq!(engine.ledger().closed_cycles()[0].status, CycleStatus::Stopped);
        assert!(!engine.machine("cdm").unwrap().is_enabled());

        events
            .send(EngineEvent::Rearm {
                strategy_id: "cdm".to_string(),
            })
            .unwrap();
        let outcome = engine.on_tick(&tick(3, dec!(100))).unwrap();
        assert_eq!(outcome.entered.len(), 1);
        assert_eq!(engine.report().stopped_cycles, 1);
    }

    #[test]
    fn test_unknown_strategy_event_fails() {
        let mut engine = paper_engine(vec![cdm("cdm")]);
        engine
            .event_sender()
            .send(EngineEvent::Rearm {
                strategy_id: "ghost".to_string(),
            })
            .unwrap();
        let err = engine.on_tick(&tick(0, dec!(100))).unwrap_err();
        assert!(matches!(err, EngineError::UnknownStrategy(id) if id == "ghost"));
    }

    #[test]
    fn test_registry_validation() {
        let broker = PaperBroker::new(dec!(10000));
        let result = Orchestrator::new(&config_with(vec![cdm("a"), cdm("a")]), broker);
        assert!(matches!(result, Err(EngineError::DuplicateStrategy(id)) if id == "a"));

        let mut lonely = cdm("a");
        lonely.coordination.enabled = true;
        lonely.coordination.partner = Some("missing".to_string());
        let broker = PaperBroker::new(dec!(10000));
        let result = Orchestrator::new(&config_with(vec![lonely]), broker);
        assert!(matches!(result, Err(EngineError::UnknownPartner { .. })));
    }

    #[test]
    fn test_flatten_all_stops_open_cycles() {
        let mut engine = paper_engine(vec![cdm("cdm")]);
        engine.on_tick(&tick(0, dec!(100))).unwrap();
        engine.on_tick(&tick(1, dec!(98))).unwrap();

        let outcome = engine.flatten_all().unwrap();
        assert_eq!(outcome.closed.len(), 1);
        assert_eq!(outcome.orders.len(), 1);

        let cycle = &engine.ledger().closed_cycles()[0];
        assert_eq!(cycle.status, CycleStatus::Stopped);
        assert_eq!(cycle.realized_pnl, dec!(-50));
        assert_eq!(engine.admission().active_cycle_count(), 0);
        assert!(engine.flatten("cdm").unwrap().is_none());
    }
}
