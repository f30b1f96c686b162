//! Tick-driven engine tying strategies, admission and the cycle ledger
//! together.

mod events;
mod orchestrator;

pub use events::{event_channel, EngineEvent, EventReceiver, EventSender};
pub use orchestrator::{EngineError, Orchestrator, TickOutcome};
