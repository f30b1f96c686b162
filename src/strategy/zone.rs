//! Zone recovery variants (ZRM and IZRM).
//!
//! Both measure symmetric boundaries around a zone center at
//! `center * (1 ± distance / 100)` and alternate the order side on repeated
//! touches so averaging never runs one way.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use super::book::{Boundary, CycleBook};
use super::policy::{
    next_leg_distance, stop_loss_hit, take_profit_hit, trailing_fired, StrategyKind, VariantPolicy,
};
use crate::config::StrategyConfig;
use crate::exchange::{OrderSide, Tick};
use crate::utils::{percentage_diff, shift_by_pct};

/// IZRM exits when price returns this close (percent) to the center.
const CENTER_REVERSAL_PCT: Decimal = dec!(0.1);

/// Which boundary, if any, `price` has reached.
pub fn boundary_touched(center: Decimal, distance_pct: Decimal, price: Decimal) -> Option<Boundary> {
    if price >= shift_by_pct(center, distance_pct) {
        Some(Boundary::Upper)
    } else if price <= shift_by_pct(center, -distance_pct) {
        Some(Boundary::Lower)
    } else {
        None
    }
}

/// Upper touches sell and lower touches buy, unless the previous order was
/// already on that side, in which case the side flips.
pub fn alternating_side(boundary: Boundary, last_side: Option<OrderSide>) -> OrderSide {
    match boundary {
        Boundary::Upper if last_side == Some(OrderSide::Sell) => OrderSide::Buy,
        Boundary::Upper => OrderSide::Sell,
        Boundary::Lower if last_side == Some(OrderSide::Buy) => OrderSide::Sell,
        Boundary::Lower => OrderSide::Buy,
    }
}

fn zone_leg_side(book: &CycleBook, config: &StrategyConfig) -> OrderSide {
    match book.last_boundary() {
        Some(boundary) => alternating_side(boundary, book.last_side()),
        None => config.initial_side,
    }
}

/// Zone Recovery Martingale.
#[derive(Debug, Clone, Default)]
pub struct ZoneRecovery {
    center: Option<Decimal>,
}

impl ZoneRecovery {
    pub fn new(center: Option<Decimal>) -> Self {
        Self { center }
    }

    pub fn center(&self) -> Option<Decimal> {
        self.center
    }
}

impl VariantPolicy for ZoneRecovery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Zrm
    }

    fn should_enter(&mut self, config: &StrategyConfig, tick: &Tick) -> bool {
        match self.center {
            None => {
                debug!(center = %tick.price, "Zone center latched from first price");
                self.center = Some(tick.price);
                true
            }
            Some(center) => percentage_diff(tick.price, center) <= config.zone_entry_tolerance_pct,
        }
    }

    fn should_add_leg(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        let Some(center) = self.center else {
            return false;
        };
        let distance = next_leg_distance(config, book.leg_count());
        match boundary_touched(center, distance, tick.price) {
            Some(boundary) => {
                book.set_last_boundary(boundary);
                true
            }
            None => false,
        }
    }

    fn should_exit(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        if book.pnl_at(tick.price) > Decimal::ZERO {
            return true;
        }
        if trailing_fired(book, config, tick.price) {
            return true;
        }
        take_profit_hit(book, config, tick.price)
    }

    fn leg_order_side(&self, book: &CycleBook, config: &StrategyConfig) -> OrderSide {
        zone_leg_side(book, config)
    }
}

/// Breakout direction observed at IZRM entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Breakout {
    Up,
    Down,
}

/// Inverse Zone Recovery Martingale: enters on a break away from the center
/// and only adds on the boundary in the breakout direction.
#[derive(Debug, Clone, Default)]
pub struct InverseZoneRecovery {
    center: Option<Decimal>,
    breakout: Option<Breakout>,
}

impl InverseZoneRecovery {
    pub fn new(center: Option<Decimal>) -> Self {
        Self {
            center,
            breakout: None,
        }
    }

    pub fn center(&self) -> Option<Decimal> {
        self.center
    }

    pub fn breakout(&self) -> Option<Breakout> {
        self.breakout
    }
}

impl VariantPolicy for InverseZoneRecovery {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Izrm
    }

    fn should_enter(&mut self, _config: &StrategyConfig, tick: &Tick) -> bool {
        let Some(center) = self.center else {
            debug!(center = %tick.price, "Zone center latched from first price");
            self.center = Some(tick.price);
            return false;
        };

        self.breakout = if tick.price > center {
            Some(Breakout::Up)
        } else if tick.price < center {
            Some(Breakout::Down)
        } else {
            None
        };
        self.breakout.is_some()
    }

    fn should_add_leg(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        let Some(center) = self.center else {
            return false;
        };
        let distance = next_leg_distance(config, book.leg_count());
        let touched = boundary_touched(center, distance, tick.price);

        let in_breakout_direction = matches!(
            (self.breakout, touched),
            (Some(Breakout::Up), Some(Boundary::Upper)) | (Some(Breakout::Down), Some(Boundary::Lower))
        );
        if let (true, Some(boundary)) = (in_breakout_direction, touched) {
            book.set_last_boundary(boundary);
        }
        in_breakout_direction
    }

    fn should_exit(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        if book.pnl_at(tick.price) > Decimal::ZERO {
            return true;
        }
        if let Some(center) = self.center {
            if percentage_diff(tick.price, center) < CENTER_REVERSAL_PCT {
                return true;
            }
        }
        stop_loss_hit(book, config, tick.price)
    }

    fn leg_order_side(&self, book: &CycleBook, config: &StrategyConfig) -> OrderSide {
        zone_leg_side(book, config)
    }

    fn on_cycle_end(&mut self) {
        self.breakout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::book::Leg;
    use chrono::Utc;

    fn tick(price: Decimal) -> Tick {
        Tick::new("SPY", price, Utc::now())
    }

    fn push(book: &mut CycleBook, side: OrderSide, qty: Decimal, price: Decimal) {
        book.push_leg(Leg {
            leg_index: book.leg_count(),
            strategy_id: "zrm".to_string(),
            quantity: side.sign() * qty,
            entry_price: price,
            mark_price: price,
            entered_at: Utc::now(),
            pending_order: None,
        });
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(boundary_touched(dec!(100), dec!(2), dec!(102)), Some(Boundary::Upper));
        assert_eq!(boundary_touched(dec!(100), dec!(2), dec!(98)), Some(Boundary::Lower));
        assert_eq!(boundary_touched(dec!(100), dec!(2), dec!(101.9)), None);
    }

    #[test]
    fn test_consecutive_upper_touches_alternate() {
        for entry_side in [OrderSide::Buy, OrderSide::Sell] {
            let mut config = StrategyConfig::default();
            config.kind = StrategyKind::Zrm;
            config.initial_side = entry_side;
            config.leg_distances_pct = vec![dec!(1), dec!(2)];
            let mut policy = ZoneRecovery::new(Some(dec!(100)));
            let mut book = CycleBook::default();
            book.start("c".to_string(), dec!(100), Utc::now());
            push(&mut book, entry_side, dec!(10), dec!(100));

            assert!(policy.should_add_leg(&mut book, &config, &tick(dec!(101))));
            let first = policy.leg_order_side(&book, &config);
            push(&mut book, first, dec!(10), dec!(101));

            assert!(policy.should_add_leg(&mut book, &config, &tick(dec!(102))));
            let second = policy.leg_order_side(&book, &config);

            assert_ne!(first, second, "entry {entry_side}: got {first} then {second}");
        }
    }

    #[test]
    fn test_lower_touch_after_buy_sells() {
        assert_eq!(alternating_side(Boundary::Lower, Some(OrderSide::Buy)), OrderSide::Sell);
        assert_eq!(alternating_side(Boundary::Lower, Some(OrderSide::Sell)), OrderSide::Buy);
        assert_eq!(alternating_side(Boundary::Upper, None), OrderSide::Sell);
    }

    #[test]
    fn test_zrm_latches_center_and_enters() {
        let config = StrategyConfig::default();
        let mut policy = ZoneRecovery::default();
        assert!(policy.should_enter(&config, &tick(dec!(250))));
        assert_eq!(policy.center(), Some(dec!(250)));

        // Re-entry requires price near the center
        assert!(!policy.should_enter(&config, &tick(dec!(252))));
        assert!(policy.should_enter(&config, &tick(dec!(250.2))));
    }

    #[test]
    fn test_zrm_exits_when_net_profitable() {
        let config = StrategyConfig::default();
        let mut policy = ZoneRecovery::new(Some(dec!(100)));
        let mut book = CycleBook::default();
        book.start("c".to_string(), dec!(100), Utc::now());
        push(&mut book, OrderSide::Buy, dec!(10), dec!(100));
        push(&mut book, OrderSide::Sell, dec!(10), dec!(101));

        // Net flat position locked at +10
        assert!(policy.should_exit(&mut book, &config, &tick(dec!(100.5))));
    }

    #[test]
    fn test_izrm_entry_and_direction_gate() {
        let mut config = StrategyConfig::default();
        config.kind = StrategyKind::Izrm;
        config.leg_distances_pct = vec![dec!(1)];
        let mut policy = InverseZoneRecovery::default();

        // First observation only latches the center
        assert!(!policy.should_enter(&config, &tick(dec!(100))));
        assert!(!policy.should_enter(&config, &tick(dec!(100))));
        assert!(policy.should_enter(&config, &tick(dec!(100.5))));
        assert_eq!(policy.breakout(), Some(Breakout::Up));

        let mut book = CycleBook::default();
        book.start("c".to_string(), dec!(100.5), Utc::now());
        push(&mut book, OrderSide::Buy, dec!(10), dec!(100.5));

        assert!(!policy.should_add_leg(&mut book, &config, &tick(dec!(98))));
        assert!(policy.should_add_leg(&mut book, &config, &tick(dec!(101))));
        assert_eq!(book.last_boundary(), Some(Boundary::Upper));
        // Last order was BUY, upper touch sells
        assert_eq!(policy.leg_order_side(&book, &config), OrderSide::Sell);
    }

    #[test]
    fn test_izrm_exits_near_center_or_on_stop() {
        let mut config = StrategyConfig::default();
        config.stop_loss_pct = vec![dec!(3)];
        let mut policy = InverseZoneRecovery::new(Some(dec!(100)));
        let mut book = CycleBook::default();
        book.start("c".to_string(), dec!(102), Utc::now());
        push(&mut book, OrderSide::Sell, dec!(10), dec!(102));

        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(104))));
        assert!(policy.should_exit(&mut book, &config, &tick(dec!(105.06))));

        let mut long_book = CycleBook::default();
        long_book.start("c".to_string(), dec!(101), Utc::now());
        push(&mut long_book, OrderSide::Buy, dec!(10), dec!(101));
        // Back within 0.1% of center while still under water
        assert!(!policy.should_exit(&mut long_book, &config, &tick(dec!(100.5))));
        assert!(policy.should_exit(&mut long_book, &config, &tick(dec!(100.05))));
    }
}
