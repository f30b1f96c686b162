//! Strategy layer.
//!
//! Contains the core logic for:
//! - Position sizing per leg
//! - Per-cycle leg, trailing-stop and zone bookkeeping
//! - The four martingale variants behind one policy trait
//! - The per (variant, instrument) state machine
//! - Cross-strategy entry coordination

mod book;
mod cdm;
mod coordination;
mod machine;
mod policy;
mod sizer;
mod wdm;
mod zone;

pub use book::{Boundary, CycleBook, Leg, TrailingStop};
pub use cdm::CounterDirection;
pub use coordination::{AlignmentMode, CoordinationGate, GateDecision, Handshake, PartnerView};
pub use machine::{DynStrategyMachine, ExitPlan, StrategyMachine};
pub use policy::{build_policy, StrategyKind, VariantPolicy};
pub use sizer::{PositionSizer, MAX_QUANTITY, MIN_QUANTITY};
pub use wdm::WithDirection;
pub use zone::{alternating_side, boundary_touched, Breakout, InverseZoneRecovery, ZoneRecovery};
