//! Cycle ledger: owns every cycle record and the rolling report.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use super::model::{Cycle, CycleStatus, Trade};
use super::report::CycleReport;
use crate::strategy::StrategyKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Unknown cycle: {id}")]
    UnknownCycle { id: String },

    #[error("Cycle {id} is not active")]
    NotActive { id: String },

    #[error("Cycle {id} already exists")]
    DuplicateCycle { id: String },
}

/// Records cycles from start to close.
///
/// Active cycles are keyed by id; closed cycles move to an append-only list
/// in close order. A cycle can close at most once.
#[derive(Debug, Default)]
pub struct CycleLedger {
    active: HashMap<String, Cycle>,
    closed: Vec<Cycle>,
    report: CycleReport,
}

impl CycleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_cycle(
        &mut self,
        cycle_id: &str,
        strategy_id: &str,
        kind: StrategyKind,
        instrument: &str,
        start: DateTime<Utc>,
    ) -> Result<&Cycle, LedgerError> {
        if self.active.contains_key(cycle_id) || self.closed.iter().any(|c| c.id == cycle_id) {
            return Err(LedgerError::DuplicateCycle {
                id: cycle_id.to_string(),
            });
        }

        info!(
            cycle_id = %cycle_id,
            strategy_id = %strategy_id,
            kind = %kind,
            instrument = %instrument,
            "Cycle started"
        );

        let cycle = Cycle::new(cycle_id, strategy_id, kind, instrument, start);
        Ok(self.active.entry(cycle_id.to_string()).or_insert(cycle))
    }

    pub fn add_trade(&mut self, cycle_id: &str, trade: Trade) -> Result<(), LedgerError> {
        let cycle = self.active_mut(cycle_id)?;
        debug!(
            cycle_id = %cycle_id,
            side = %trade.side,
            quantity = %trade.quantity,
            price = %trade.price,
            leg = trade.leg_index,
            "Trade recorded"
        );
        cycle.add_trade(trade);
        Ok(())
    }

    pub fn mark_unrealized(&mut self, cycle_id: &str, pnl: Decimal) -> Result<(), LedgerError> {
        self.active_mut(cycle_id)?.unrealized_pnl = pnl;
        Ok(())
    }

    /// Close a cycle that reached its exit.
    pub fn complete_cycle(
        &mut self,
        cycle_id: &str,
        end: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<&Cycle, LedgerError> {
        self.close(cycle_id, CycleStatus::Completed, end, realized_pnl)
    }

    /// Close a cycle that was flattened before its exit.
    pub fn stop_cycle(
        &mut self,
        cycle_id: &str,
        end: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<&Cycle, LedgerError> {
        self.close(cycle_id, CycleStatus::Stopped, end, realized_pnl)
    }

    fn close(
        &mut self,
        cycle_id: &str,
        status: CycleStatus,
        end: DateTime<Utc>,
        realized_pnl: Decimal,
    ) -> Result<&Cycle, LedgerError> {
        let mut cycle = self
            .active
            .remove(cycle_id)
            .ok_or_else(|| self.missing(cycle_id))?;

        cycle.close(status, end, realized_pnl);
        info!(
            cycle_id = %cycle_id,
            status = %status,
            pnl = %realized_pnl,
            trades = cycle.trade_count(),
            duration_min = cycle.duration_minutes,
            "Cycle closed"
        );

        self.closed.push(cycle);
        self.report = CycleReport::build(&self.closed, self.active.values());
        Ok(&self.closed[self.closed.len() - 1])
    }

    fn active_mut(&mut self, cycle_id: &str) -> Result<&mut Cycle, LedgerError> {
        if !self.active.contains_key(cycle_id) {
            return Err(self.missing(cycle_id));
        }
        self.active
            .get_mut(cycle_id)
            .ok_or_else(|| LedgerError::UnknownCycle {
                id: cycle_id.to_string(),
            })
    }

    fn missing(&self, cycle_id: &str) -> LedgerError {
        if self.closed.iter().any(|c| c.id == cycle_id) {
            LedgerError::NotActive {
                id: cycle_id.to_string(),
            }
        } else {
            LedgerError::UnknownCycle {
                id: cycle_id.to_string(),
            }
        }
    }

    pub fn active_cycle(&self, cycle_id: &str) -> Option<&Cycle> {
        self.active.get(cycle_id)
    }

    pub fn active_cycles(&self) -> impl Iterator<Item = &Cycle> {
        self.active.values()
    }

    pub fn closed_cycles(&self) -> &[Cycle] {
        &self.closed
    }

    pub fn cycle(&self, cycle_id: &str) -> Option<&Cycle> {
        self.active
            .get(cycle_id)
            .or_else(|| self.closed.iter().find(|c| c.id == cycle_id))
    }

    /// Report as of the last close.
    pub fn report(&self) -> &CycleReport {
        &self.report
    }

    /// Report including current unrealized P&L of active cycles.
    pub fn current_report(&self) -> CycleReport {
        CycleReport::build(&self.closed, self.active.values())
    }
}
