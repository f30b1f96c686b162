//! External events fed to the orchestrator.
//!
//! Anything that happens outside the tick loop (late fills from a live
//! broker connection, operator commands) is pushed onto one unbounded
//! channel. Only the orchestrator drains it, at the start of each tick, so
//! machine and admission state have a single writer.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::exchange::Fill;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Execution report for an order acknowledged as pending
    Fill(Fill),
    /// Stop admitting new cycles
    Halt { reason: String },
    Resume,
    /// Re-enable a machine left idle after a cycle
    Rearm { strategy_id: String },
    /// Close a machine's open cycle at its last mark
    Flatten { strategy_id: String },
}

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
