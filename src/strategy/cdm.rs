//! Counter Direction Martingale: average into adverse moves.

use super::book::CycleBook;
use super::policy::{
    blended_target_hit, next_leg_distance, take_profit_hit, trailing_fired, StrategyKind,
    VariantPolicy,
};
use crate::config::StrategyConfig;
use crate::exchange::{OrderSide, Tick};
use crate::utils::shift_by_pct;

/// Long CDM buys every `distance` percent below the cycle entry; short CDM
/// sells every `distance` percent above it.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDirection;

impl VariantPolicy for CounterDirection {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Cdm
    }

    fn should_enter(&mut self, config: &StrategyConfig, tick: &Tick) -> bool {
        match config.price_trigger {
            None => true,
            Some(trigger) if config.initial_side.is_long() => tick.price <= trigger,
            Some(trigger) => tick.price >= trigger,
        }
    }

    fn should_add_leg(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        let Some(entry) = book.entry_price() else {
            return false;
        };
        let distance = next_leg_distance(config, book.leg_count());

        if config.initial_side.is_long() {
            tick.price <= shift_by_pct(entry, -distance)
        } else {
            tick.price >= shift_by_pct(entry, distance)
        }
    }

    fn should_exit(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        if trailing_fired(book, config, tick.price) {
            return true;
        }
        take_profit_hit(book, config, tick.price) || blended_target_hit(book, tick.price)
    }

    fn leg_order_side(&self, _book: &CycleBook, config: &StrategyConfig) -> OrderSide {
        config.initial_side
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::book::Leg;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tick(price: Decimal) -> Tick {
        Tick::new("SPY", price, Utc::now())
    }

    fn open_book(side_sign: Decimal, price: Decimal) -> CycleBook {
        let mut book = CycleBook::default();
        book.start("c".to_string(), price, Utc::now());
        book.push_leg(Leg {
            leg_index: 0,
            strategy_id: "cdm".to_string(),
            quantity: dec!(10) * side_sign,
            entry_price: price,
            mark_price: price,
            entered_at: Utc::now(),
            pending_order: None,
        });
        book
    }

    #[test]
    fn test_price_trigger() {
        let mut config = StrategyConfig::default();
        let mut policy = CounterDirection;
        assert!(policy.should_enter(&config, &tick(dec!(123))));

        config.price_trigger = Some(dec!(100));
        assert!(!policy.should_enter(&config, &tick(dec!(101))));
        assert!(policy.should_enter(&config, &tick(dec!(100))));

        config.initial_side = OrderSide::Sell;
        assert!(policy.should_enter(&config, &tick(dec!(101))));
        assert!(!policy.should_enter(&config, &tick(dec!(99))));
    }

    #[test]
    fn test_long_adds_on_drop() {
        let mut config = StrategyConfig::default();
        config.leg_distances_pct = vec![dec!(5), dec!(10)];
        let mut policy = CounterDirection;
        let mut book = open_book(dec!(1), dec!(100));

        assert!(!policy.should_add_leg(&mut book, &config, &tick(dec!(95.01))));
        assert!(policy.should_add_leg(&mut book, &config, &tick(dec!(95))));
        assert!(!policy.should_add_leg(&mut book, &config, &tick(dec!(105))));
    }

    #[test]
    fn test_short_adds_on_rise() {
        let mut config = StrategyConfig::default();
        config.initial_side = OrderSide::Sell;
        config.leg_distances_pct = vec![dec!(5)];
        let mut policy = CounterDirection;
        let mut book = open_book(dec!(-1), dec!(100));

        assert!(policy.should_add_leg(&mut book, &config, &tick(dec!(105))));
        assert!(!policy.should_add_leg(&mut book, &config, &tick(dec!(95))));
        assert_eq!(policy.leg_order_side(&book, &config), OrderSide::Sell);
    }

    #[test]
    fn test_exit_on_blended_recovery() {
        let mut config = StrategyConfig::default();
        config.take_profit_pct = vec![];
        let mut policy = CounterDirection;
        let mut book = open_book(dec!(1), dec!(100));

        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(100.4))));
        assert!(policy.should_exit(&mut book, &config, &tick(dec!(100.5))));
    }

    #[test]
    fn test_exit_on_trailing_stop() {
        let mut config = StrategyConfig::default();
        config.take_profit_pct = vec![dec!(50)];
        config.trailing.enabled = true;
        config.trailing.trigger_pct = vec![dec!(0.2)];
        config.trailing.distance_pct = vec![dec!(0.1)];
        let mut policy = CounterDirection;
        let mut book = open_book(dec!(1), dec!(100));

        // 100.3 activates (below the blended target), 100.19 crosses 100.3 * 0.999
        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(100.3))));
        assert!(policy.should_exit(&mut book, &config, &tick(dec!(100.19))));
    }
}
