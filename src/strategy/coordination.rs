//! Cross-strategy entry alignment.
//!
//! Machines never hold references to each other. Before entering, a machine
//! receives a [`PartnerView`] snapshot of its partner (looked up by id in the
//! orchestrator's registry) and asks the gate whether it may proceed.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CoordinationConfig;

/// How two machines on the same instrument share entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlignmentMode {
    /// Enter once the partner has built enough legs, or independently while it is idle
    #[default]
    Parallel,
    /// Take turns based on the partner's profitability
    Sequential,
}

/// Sequential-mode handshake flags, owned by the gated machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Handshake {
    pub first_edge_touched: bool,
    pub waiting_for_partner: bool,
}

impl Handshake {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only snapshot of a partner machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartnerView {
    pub id: String,
    pub active: bool,
    pub legs: usize,
    pub unrealized_pnl: Decimal,
}

/// Gate verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approve,
    Refuse(String),
}

impl GateDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, GateDecision::Approve)
    }
}

/// Stateless rule; the only state it touches is the caller's [`Handshake`].
pub struct CoordinationGate;

impl CoordinationGate {
    pub fn evaluate(
        config: &CoordinationConfig,
        handshake: &mut Handshake,
        partner: Option<&PartnerView>,
    ) -> GateDecision {
        if !config.enabled {
            return GateDecision::Approve;
        }

        match config.mode {
            AlignmentMode::Parallel => Self::parallel(config, partner),
            AlignmentMode::Sequential => Self::sequential(handshake, partner),
        }
    }

    fn parallel(config: &CoordinationConfig, partner: Option<&PartnerView>) -> GateDecision {
        let Some(partner) = partner else {
            return GateDecision::Approve;
        };
        if !partner.active || partner.legs >= config.required_partner_legs {
            return GateDecision::Approve;
        }
        GateDecision::Refuse(format!(
            "Partner {} has {} of {} required legs",
            partner.id, partner.legs, config.required_partner_legs
        ))
    }

    fn sequential(handshake: &mut Handshake, partner: Option<&PartnerView>) -> GateDecision {
        if !handshake.first_edge_touched {
            let Some(partner) = partner.filter(|p| p.active && p.legs >= 1) else {
                return GateDecision::Refuse("Waiting for partner's first edge".to_string());
            };

            handshake.first_edge_touched = true;
            debug!(partner = %partner.id, "Partner first edge latched");

            if partner.unrealized_pnl > Decimal::ZERO {
                handshake.waiting_for_partner = true;
                return GateDecision::Refuse(format!("Partner {} is in profit", partner.id));
            }
            return GateDecision::Approve;
        }

        if handshake.waiting_for_partner {
            let partner_pnl = partner.map(|p| p.unrealized_pnl).unwrap_or(Decimal::ZERO);
            if partner_pnl <= Decimal::ZERO {
                handshake.waiting_for_partner = false;
                debug!("Partner no longer profitable, releasing entry");
                return GateDecision::Approve;
            }
            return GateDecision::Refuse("Waiting for partner to give back profit".to_string());
        }

        GateDecision::Approve
    }
}
