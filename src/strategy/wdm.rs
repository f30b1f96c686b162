//! With Direction Martingale: pyramid into favorable moves.

use rust_decimal::Decimal;

use super::book::CycleBook;
use super::policy::{next_leg_distance, StrategyKind, VariantPolicy};
use crate::config::StrategyConfig;
use crate::exchange::{OrderSide, Tick};
use crate::utils::shift_by_pct;

/// Adds every `distance` percent in the direction of the trade and exits when
/// price retraces from the best level seen by a leg's stop-loss percentage.
#[derive(Debug, Clone, Default)]
pub struct WithDirection {
    /// Peak for long cycles, trough for short cycles
    extreme: Option<Decimal>,
}

impl WithDirection {
    pub fn extreme(&self) -> Option<Decimal> {
        self.extreme
    }
}

impl VariantPolicy for WithDirection {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Wdm
    }

    fn should_enter(&mut self, config: &StrategyConfig, tick: &Tick) -> bool {
        match config.price_trigger {
            None => true,
            Some(trigger) if config.initial_side.is_long() => tick.price >= trigger,
            Some(trigger) => tick.price <= trigger,
        }
    }

    fn should_add_leg(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        let Some(entry) = book.entry_price() else {
            return false;
        };
        let distance = next_leg_distance(config, book.leg_count());

        if config.initial_side.is_long() {
            tick.price >= shift_by_pct(entry, distance)
        } else {
            tick.price <= shift_by_pct(entry, -distance)
        }
    }

    fn should_exit(&mut self, book: &mut CycleBook, config: &StrategyConfig, tick: &Tick) -> bool {
        let is_long = config.initial_side.is_long();
        let extreme = match self.extreme {
            Some(current) if is_long => current.max(tick.price),
            Some(current) => current.min(tick.price),
            None => tick.price,
        };
        self.extreme = Some(extreme);

        config
            .stop_loss_pct
            .iter()
            .take(book.leg_count())
            .any(|sl| {
                if is_long {
                    tick.price <= shift_by_pct(extreme, -*sl)
                } else {
                    tick.price >= shift_by_pct(extreme, *sl)
                }
            })
    }

    fn leg_order_side(&self, _book: &CycleBook, config: &StrategyConfig) -> OrderSide {
        config.initial_side
    }

    fn on_cycle_start(&mut self, tick: &Tick) {
        self.extreme = Some(tick.price);
    }

    fn on_cycle_end(&mut self) {
        self.extreme = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::book::Leg;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn tick(price: Decimal) -> Tick {
        Tick::new("SPY", price, Utc::now())
    }

    fn started(policy: &mut WithDirection, sign: Decimal) -> CycleBook {
        let mut book = CycleBook::default();
        book.start("c".to_string(), dec!(100), Utc::now());
        book.push_leg(Leg {
            leg_index: 0,
            strategy_id: "wdm".to_string(),
            quantity: dec!(10) * sign,
            entry_price: dec!(100),
            mark_price: dec!(100),
            entered_at: Utc::now(),
            pending_order: None,
        });
        policy.on_cycle_start(&tick(dec!(100)));
        book
    }

    #[test]
    fn test_long_adds_on_rise() {
        let mut config = StrategyConfig::default();
        config.leg_distances_pct = vec![dec!(2)];
        let mut policy = WithDirection::default();
        let mut book = started(&mut policy, dec!(1));

        assert!(!policy.should_add_leg(&mut book, &config, &tick(dec!(101))));
        assert!(policy.should_add_leg(&mut book, &config, &tick(dec!(102))));
        assert!(!policy.should_add_leg(&mut book, &config, &tick(dec!(98))));
    }

    #[test]
    fn test_long_exit_on_retrace_from_peak() {
        let mut config = StrategyConfig::default();
        config.stop_loss_pct = vec![dec!(5)];
        let mut policy = WithDirection::default();
        let mut book = started(&mut policy, dec!(1));

        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(110))));
        assert_eq!(policy.extreme(), Some(dec!(110)));
        // 110 * 0.95 = 104.5
        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(104.6))));
        assert!(policy.should_exit(&mut book, &config, &tick(dec!(104.5))));
    }

    #[test]
    fn test_short_exit_on_bounce_from_trough() {
        let mut config = StrategyConfig::default();
        config.initial_side = OrderSide::Sell;
        config.stop_loss_pct = vec![dec!(5)];
        let mut policy = WithDirection::default();
        let mut book = started(&mut policy, dec!(-1));

        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(80))));
        // 80 * 1.05 = 84
        assert!(!policy.should_exit(&mut book, &config, &tick(dec!(83.9))));
        assert!(policy.should_exit(&mut book, &config, &tick(dec!(84))));
    }

    #[test]
    fn test_extreme_resets_between_cycles() {
        let config = StrategyConfig::default();
        let mut policy = WithDirection::default();
        let mut book = started(&mut policy, dec!(1));
        policy.should_exit(&mut book, &config, &tick(dec!(120)));
        policy.on_cycle_end();
        assert_eq!(policy.extreme(), None);
    }
}
