//! Configuration management for the martingale engine.
//!
//! Loads settings from environment variables and config files. Every optional
//! field carries a typed default so call sites never handle missing values.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::exchange::{OrderSide, OrderType};
use crate::strategy::{AlignmentMode, StrategyKind};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Account and execution settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Global admission limits shared by every strategy
    #[serde(default)]
    pub admission: AdmissionLimits,
    /// One entry per (variant, instrument) machine
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Starting account balance
    #[serde(default = "default_initial_balance")]
    pub initial_balance: Decimal,
    /// Commission as a fraction of notional (0.002 = 0.2%)
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,
    /// MARKET or LIMIT
    #[serde(default)]
    pub order_type: OrderType,
}

/// Limits enforced by the admission controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionLimits {
    #[serde(default = "default_max_concurrent_cycles")]
    pub max_concurrent_cycles: usize,
    /// Absolute daily loss (positive number) that halts new cycles
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,
    #[serde(default = "default_daily_profit_target")]
    pub daily_profit_target: Decimal,
    /// Halt on reaching the daily profit target (otherwise only logged)
    #[serde(default = "default_true")]
    pub enable_daily_limits: bool,
    #[serde(default = "default_max_cycles_per_day")]
    pub max_cycles_per_day: u32,
}

/// Settings for a single strategy machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Unique id, also used as the coordination partner key
    pub id: String,
    pub kind: StrategyKind,
    pub instrument: String,
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Fraction of account balance per leg before multipliers (0.0-1.0]
    #[serde(default = "default_capital_allocation")]
    pub capital_allocation: Decimal,
    /// Fixed share quantity per leg; 0 selects percentage sizing
    #[serde(default)]
    pub fixed_position_size: Decimal,
    #[serde(default = "default_max_legs")]
    pub max_legs: usize,
    /// Distance in percent for each added leg; last value repeats
    #[serde(default = "default_leg_distances")]
    pub leg_distances_pct: Vec<Decimal>,
    /// Size multiplier per leg; last value repeats
    #[serde(default = "default_size_multipliers")]
    pub size_multipliers: Vec<Decimal>,
    #[serde(default = "default_take_profit")]
    pub take_profit_pct: Vec<Decimal>,
    #[serde(default = "default_stop_loss")]
    pub stop_loss_pct: Vec<Decimal>,
    #[serde(default)]
    pub trailing: TrailingConfig,

    #[serde(default = "default_initial_side")]
    pub initial_side: OrderSide,
    /// Close the net position in one order instead of leg by leg
    #[serde(default = "default_true")]
    pub hold_previous: bool,

    /// CDM/WDM entry trigger; enter immediately when unset
    #[serde(default)]
    pub price_trigger: Option<Decimal>,
    /// ZRM/IZRM zone center; latched from the first price when unset
    #[serde(default)]
    pub zone_center: Option<Decimal>,
    /// ZRM re-entry tolerance around the zone center, in percent
    #[serde(default = "default_zone_entry_tolerance")]
    pub zone_entry_tolerance_pct: Decimal,

    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Start a new cycle after one completes
    #[serde(default = "default_true")]
    pub repeat_on_close: bool,
    #[serde(default = "default_true")]
    pub auto_restart: bool,
}

/// Per-leg trailing stop parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Profit percent that activates the stop
    #[serde(default = "default_trailing_trigger")]
    pub trigger_pct: Vec<Decimal>,
    /// Stop distance from the favorable extreme, in percent
    #[serde(default = "default_trailing_distance")]
    pub distance_pct: Vec<Decimal>,
}

/// Cross-strategy entry alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mode: AlignmentMode,
    /// Strategy id of the partner machine
    #[serde(default)]
    pub partner: Option<String>,
    /// Parallel mode: partner legs required before entering
    #[serde(default = "default_required_partner_legs")]
    pub required_partner_legs: usize,
}

fn default_true() -> bool {
    true
}

fn default_initial_balance() -> Decimal {
    Decimal::new(50_000, 0) // $50k paper account
}

fn default_commission_rate() -> Decimal {
    Decimal::new(2, 3) // 0.002 (0.2%)
}

fn default_max_concurrent_cycles() -> usize {
    3
}

fn default_daily_loss_limit() -> Decimal {
    Decimal::new(1000, 0)
}

fn default_daily_profit_target() -> Decimal {
    Decimal::new(2000, 0)
}

fn default_max_cycles_per_day() -> u32 {
    100
}

fn default_capital_allocation() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_max_legs() -> usize {
    5
}

fn default_leg_distances() -> Vec<Decimal> {
    vec![dec!(1.0), dec!(2.0), dec!(3.0), dec!(4.0), dec!(5.0)]
}

fn default_size_multipliers() -> Vec<Decimal> {
    // Sums to 10x allocation across five legs
    vec![dec!(1.0), dec!(1.5), dec!(2.0), dec!(2.5), dec!(3.0)]
}

fn default_take_profit() -> Vec<Decimal> {
    vec![dec!(2.0)]
}

fn default_stop_loss() -> Vec<Decimal> {
    vec![dec!(5.0)]
}

fn default_trailing_trigger() -> Vec<Decimal> {
    vec![dec!(5.0)]
}

fn default_trailing_distance() -> Vec<Decimal> {
    vec![dec!(1.0)]
}

fn default_initial_side() -> OrderSide {
    OrderSide::Buy
}

fn default_zone_entry_tolerance() -> Decimal {
    Decimal::new(1, 1) // 0.1%
}

fn default_required_partner_legs() -> usize {
    1
}

fn default_strategies() -> Vec<StrategyConfig> {
    vec![StrategyConfig::default()]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("MMB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Load configuration from an explicit file, still honoring env overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::default().separator("__").prefix("MMB"))
            .build()
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.engine.initial_balance > Decimal::ZERO,
            "initial_balance must be positive"
        );
        anyhow::ensure!(
            self.engine.commission_rate >= Decimal::ZERO && self.engine.commission_rate < Decimal::ONE,
            "commission_rate must be in [0, 1)"
        );

        self.admission.validate()?;

        anyhow::ensure!(!self.strategies.is_empty(), "at least one strategy is required");

        let mut ids = HashSet::new();
        for strategy in &self.strategies {
            anyhow::ensure!(
                ids.insert(strategy.id.as_str()),
                "duplicate strategy id: {}",
                strategy.id
            );
        }

        for strategy in &self.strategies {
            strategy
                .validate()
                .with_context(|| format!("invalid strategy '{}'", strategy.id))?;

            if let Some(partner) = &strategy.coordination.partner {
                anyhow::ensure!(
                    ids.contains(partner.as_str()),
                    "strategy '{}' names unknown partner '{}'",
                    strategy.id,
                    partner
                );
            }
        }

        Ok(())
    }
}

impl AdmissionLimits {
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.max_concurrent_cycles > 0,
            "max_concurrent_cycles must be positive"
        );
        anyhow::ensure!(
            self.daily_loss_limit > Decimal::ZERO,
            "daily_loss_limit must be positive"
        );
        anyhow::ensure!(
            self.daily_profit_target > Decimal::ZERO,
            "daily_profit_target must be positive"
        );
        anyhow::ensure!(
            self.max_cycles_per_day > 0,
            "max_cycles_per_day must be positive"
        );
        Ok(())
    }
}

impl StrategyConfig {
    /// Create a config for the given variant with default parameters.
    pub fn new(id: impl Into<String>, kind: StrategyKind, instrument: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            instrument: instrument.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.id.trim().is_empty(), "id must not be empty");
        anyhow::ensure!(
            !self.instrument.trim().is_empty(),
            "instrument must not be empty"
        );
        anyhow::ensure!(
            self.capital_allocation > Decimal::ZERO && self.capital_allocation <= Decimal::ONE,
            "capital_allocation must be between 0 and 1"
        );
        anyhow::ensure!(
            self.fixed_position_size >= Decimal::ZERO,
            "fixed_position_size must be non-negative"
        );
        anyhow::ensure!(self.max_legs >= 1, "max_legs must be at least 1");

        ensure_positive("leg_distances_pct", &self.leg_distances_pct)?;
        ensure_positive("size_multipliers", &self.size_multipliers)?;
        anyhow::ensure!(
            self.take_profit_pct.iter().all(|v| *v >= Decimal::ZERO),
            "take_profit_pct must be non-negative"
        );
        anyhow::ensure!(
            self.stop_loss_pct.iter().all(|v| *v >= Decimal::ZERO),
            "stop_loss_pct must be non-negative"
        );

        if self.trailing.enabled {
            ensure_positive("trailing.trigger_pct", &self.trailing.trigger_pct)?;
            ensure_positive("trailing.distance_pct", &self.trailing.distance_pct)?;
        }

        if let Some(center) = self.zone_center {
            anyhow::ensure!(center > Decimal::ZERO, "zone_center must be positive");
        }
        anyhow::ensure!(
            self.zone_entry_tolerance_pct >= Decimal::ZERO,
            "zone_entry_tolerance_pct must be non-negative"
        );

        if self.coordination.enabled {
            if self.coordination.mode == AlignmentMode::Sequential {
                anyhow::ensure!(
                    self.coordination.partner.is_some(),
                    "sequential coordination requires a partner"
                );
            }
            anyhow::ensure!(
                self.coordination.partner.as_deref() != Some(self.id.as_str()),
                "a strategy cannot coordinate with itself"
            );
        }

        Ok(())
    }
}

fn ensure_positive(name: &str, values: &[Decimal]) -> Result<()> {
    anyhow::ensure!(!values.is_empty(), "{} must not be empty", name);
    anyhow::ensure!(
        values.iter().all(|v| *v > Decimal::ZERO),
        "{} entries must be positive",
        name
    );
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            admission: AdmissionLimits::default(),
            strategies: default_strategies(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: default_initial_balance(),
            commission_rate: default_commission_rate(),
            order_type: OrderType::default(),
        }
    }
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            max_concurrent_cycles: default_max_concurrent_cycles(),
            daily_loss_limit: default_daily_loss_limit(),
            daily_profit_target: default_daily_profit_target(),
            enable_daily_limits: true,
            max_cycles_per_day: default_max_cycles_per_day(),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            id: "cdm".to_string(),
            kind: StrategyKind::Cdm,
            instrument: "SPY".to_string(),
            enabled: true,
            capital_allocation: default_capital_allocation(),
            fixed_position_size: Decimal::ZERO,
            max_legs: default_max_legs(),
            leg_distances_pct: default_leg_distances(),
            size_multipliers: default_size_multipliers(),
            take_profit_pct: default_take_profit(),
            stop_loss_pct: default_stop_loss(),
            trailing: TrailingConfig::default(),
            initial_side: default_initial_side(),
            hold_previous: true,
            price_trigger: None,
            zone_center: None,
            zone_entry_tolerance_pct: default_zone_entry_tolerance(),
            coordination: CoordinationConfig::default(),
            repeat_on_close: true,
            auto_restart: true,
        }
    }
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_pct: default_trailing_trigger(),
            distance_pct: default_trailing_distance(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AlignmentMode::default(),
            partner: None,
            required_partner_legs: default_required_partner_legs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_allocation_out_of_range_is_rejected() {
        let mut config = Config::default();
        config.strategies[0].capital_allocation = dec!(1.5);
        assert!(config.validate().is_err());

        config.strategies[0].capital_allocation = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_positive_limits_are_rejected() {
        let mut config = Config::default();
        config.admission.daily_loss_limit = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.admission.max_concurrent_cycles = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_partner_is_rejected() {
        let mut config = Config::default();
        config.strategies[0].coordination.enabled = true;
        config.strategies[0].coordination.partner = Some("ghost".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown partner"));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let mut config = Config::default();
        config.strategies.push(StrategyConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "strategies": [
                { "id": "zrm-spy", "kind": "ZRM", "instrument": "SPY", "initial_side": "SELL" }
            ],
            "engine": { "order_type": "LIMIT" }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();

        assert_eq!(config.engine.order_type, OrderType::Limit);
        assert_eq!(config.engine.commission_rate, dec!(0.002));
        assert_eq!(config.admission.max_concurrent_cycles, 3);
        let strategy = &config.strategies[0];
        assert_eq!(strategy.kind, StrategyKind::Zrm);
        assert_eq!(strategy.initial_side, OrderSide::Sell);
        assert!(strategy.hold_previous);
        assert_eq!(strategy.max_legs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_enum_value_fails_to_parse() {
        let json = r#"{ "strategies": [ { "id": "x", "kind": "GRID", "instrument": "SPY" } ] }"#;
        assert!(serde_json::from_str::<Config>(json).is_err());
    }
}
