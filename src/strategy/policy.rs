//! Variant policies: the predicates that distinguish CDM, WDM, ZRM and IZRM.
//!
//! A policy only decides. All leg, trailing and zone bookkeeping lives in the
//! shared [`CycleBook`] owned by the [`StrategyMachine`](super::StrategyMachine).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::book::CycleBook;
use super::cdm::CounterDirection;
use super::wdm::WithDirection;
use super::zone::{InverseZoneRecovery, ZoneRecovery};
use crate::config::StrategyConfig;
use crate::exchange::{OrderSide, Tick};
use crate::utils::{nth_or_last, shift_by_pct};

/// Strategy variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StrategyKind {
    /// Counter Direction Martingale: add against the move
    Cdm,
    /// With Direction Martingale: add with the move
    Wdm,
    /// Zone Recovery Martingale
    Zrm,
    /// Inverse Zone Recovery Martingale
    Izrm,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Cdm => "CDM",
            StrategyKind::Wdm => "WDM",
            StrategyKind::Zrm => "ZRM",
            StrategyKind::Izrm => "IZRM",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Entry, add-leg and exit predicates for one variant.
///
/// Predicates receive the machine's book mutably where evaluation updates
/// ratchets (trailing stops) or zone tracking. The machine guarantees
/// `should_enter` is only asked while idle and the other two only while a
/// cycle is active with room for the call.
pub trait VariantPolicy: Send {
    fn kind(&self) -> StrategyKind;

    fn should_enter(&mut self, config: &StrategyConfig, tick: &Tick) -> bool;

    fn should_add_leg(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool;

    fn should_exit(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool;

    /// Side for the next added leg (leg 0 always uses `initial_side`).
    fn leg_order_side(&self, book: &CycleBook, config: &StrategyConfig) -> OrderSide;

    fn on_cycle_start(&mut self, _tick: &Tick) {}

    fn on_cycle_end(&mut self) {}
}

impl<P: VariantPolicy + ?Sized> VariantPolicy for Box<P> {
    fn kind(&self) -> StrategyKind {
        (**self).kind()
    }

    fn should_enter(&mut self, config: &StrategyConfig, tick: &Tick) -> bool {
        (**self).should_enter(config, tick)
    }

    fn should_add_leg(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        (**self).should_add_leg(book, config, tick)
    }

    fn should_exit(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        (**self).should_exit(book, config, tick)
    }

    fn leg_order_side(&self, book: &CycleBook, config: &StrategyConfig) -> OrderSide {
        (**self).leg_order_side(book, config)
    }

    fn on_cycle_start(&mut self, tick: &Tick) {
        (**self).on_cycle_start(tick)
    }

    fn on_cycle_end(&mut self) {
        (**self).on_cycle_end()
    }
}

/// Build the policy for a configured variant.
pub fn build_policy(config: &StrategyConfig) -> Box<dyn VariantPolicy> {
    match config.kind {
        StrategyKind::Cdm => Box::new(CounterDirection),
        StrategyKind::Wdm => Box::new(WithDirection::default()),
        StrategyKind::Zrm => Box::new(ZoneRecovery::new(config.zone_center)),
        StrategyKind::Izrm => Box::new(InverseZoneRecovery::new(config.zone_center)),
    }
}

/// Distance for the next leg given the number of legs already open.
pub(crate) fn next_leg_distance(config: &StrategyConfig, leg_count: usize) -> Decimal {
    nth_or_last(&config.leg_distances_pct, leg_count.saturating_sub(1)).unwrap_or(Decimal::ZERO)
}

/// Run trailing stops if enabled; true when any leg's stop is crossed.
pub(crate) fn trailing_fired(book: &mut CycleBook, config: &StrategyConfig, price: Decimal) -> bool {
    if !config.trailing.enabled {
        return false;
    }
    let triggers = &config.trailing.trigger_pct;
    let distances = &config.trailing.distance_pct;
    book.update_trailing(
        price,
        |i| nth_or_last(triggers, i).unwrap_or(Decimal::ZERO),
        |i| nth_or_last(distances, i).unwrap_or(Decimal::ZERO),
    )
}

/// Any leg with a configured take-profit reached it.
pub(crate) fn take_profit_hit(book: &CycleBook, config: &StrategyConfig, price: Decimal) -> bool {
    book.legs()
        .iter()
        .zip(config.take_profit_pct.iter())
        .any(|(leg, tp)| {
            if leg.is_long() {
                price >= shift_by_pct(leg.entry_price, *tp)
            } else {
                price <= shift_by_pct(leg.entry_price, -*tp)
            }
        })
}

/// Any leg with a configured stop-loss was breached, measured from its entry.
pub(crate) fn stop_loss_hit(book: &CycleBook, config: &StrategyConfig, price: Decimal) -> bool {
    book.legs()
        .iter()
        .zip(config.stop_loss_pct.iter())
        .any(|(leg, sl)| {
            if leg.is_long() {
                price <= shift_by_pct(leg.entry_price, -*sl)
            } else {
                price >= shift_by_pct(leg.entry_price, *sl)
            }
        })
}

/// Price recovered 0.5% beyond the blended average in the position's favor.
pub(crate) fn blended_target_hit(book: &CycleBook, price: Decimal) -> bool {
    let average = book.average_price();
    if average <= Decimal::ZERO {
        return false;
    }
    if book.total_quantity() >= Decimal::ZERO {
        price >= average * dec!(1.005)
    } else {
        price <= average * dec!(0.995)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::book::Leg;
    use chrono::Utc;

    fn book_with(legs: &[(Decimal, Decimal)]) -> CycleBook {
        let mut book = CycleBook::default();
        book.start("c".to_string(), legs[0].1, Utc::now());
        for (i, (qty, price)) in legs.iter().enumerate() {
            book.push_leg(Leg {
                leg_index: i,
                strategy_id: "s".to_string(),
                quantity: *qty,
                entry_price: *price,
                mark_price: *price,
                entered_at: Utc::now(),
                pending_order: None,
            });
        }
        book
    }

    #[test]
    fn test_next_leg_distance_indexing() {
        let mut config = StrategyConfig::default();
        config.leg_distances_pct = vec![dec!(5), dec!(10)];
        assert_eq!(next_leg_distance(&config, 1), dec!(5));
        assert_eq!(next_leg_distance(&config, 2), dec!(10));
        assert_eq!(next_leg_distance(&config, 6), dec!(10));
    }

    #[test]
    fn test_take_profit_only_for_configured_legs() {
        let mut config = StrategyConfig::default();
        config.take_profit_pct = vec![dec!(2)];
        let book = book_with(&[(dec!(10), dec!(100)), (dec!(10), dec!(90))]);

        // Leg 1 has no take-profit of its own
        assert!(!take_profit_hit(&book, &config, dec!(95)));
        assert!(take_profit_hit(&book, &config, dec!(102)));
    }

    #[test]
    fn test_short_exit_levels() {
        let mut config = StrategyConfig::default();
        config.take_profit_pct = vec![dec!(2)];
        config.stop_loss_pct = vec![dec!(5)];
        let book = book_with(&[(dec!(-10), dec!(100))]);

        assert!(take_profit_hit(&book, &config, dec!(98)));
        assert!(!take_profit_hit(&book, &config, dec!(99)));
        assert!(stop_loss_hit(&book, &config, dec!(105)));
        assert!(!stop_loss_hit(&book, &config, dec!(104)));
        assert!(blended_target_hit(&book, dec!(99.5)));
        assert!(!blended_target_hit(&book, dec!(99.6)));
    }

    #[test]
    fn test_build_policy_kinds() {
        for kind in [StrategyKind::Cdm, StrategyKind::Wdm, StrategyKind::Zrm, StrategyKind::Izrm] {
            let mut config = StrategyConfig::default();
            config.kind = kind;
            assert_eq!(build_policy(&config).kind(), kind);
        }
    }
}
