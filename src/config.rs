//! Defines the `DispatchConfig` struct, which represents the contents of `dispatch.toml`.
//!
//! The flags toggle whole constraint families on or off so that studies can run reduced
//! formulations; the violation prices set the penalty tiers used when soft constraints are
//! relaxed. Defaults reproduce the full co-optimised formulation.
use crate::input::{input_err_msg, read_toml};
use crate::units::{Dimensionless, MoneyPerMegaWattHour};
use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use std::path::Path;

const CONFIG_FILE_NAME: &str = "dispatch.toml";

macro_rules! define_price_default {
    ($name:ident, $value:expr) => {
        fn $name() -> MoneyPerMegaWattHour {
            MoneyPerMegaWattHour($value)
        }
    };
}

macro_rules! define_param_default {
    ($name:ident, $type: ty, $value: expr) => {
        fn $name() -> $type {
            $value
        }
    };
}

define_price_default!(default_fixed_target, 2_400_000.0);
define_price_default!(default_region_balance, 2_200_000.0);
define_price_default!(default_fixed_load, 1_900_000.0);
define_price_default!(default_fast_start, 1_700_000.0);
define_price_default!(default_mnsp_ramp, 1_600_000.0);
define_price_default!(default_interconnector_capacity, 1_550_000.0);
define_price_default!(default_ramp_rate, 1_400_000.0);
define_price_default!(default_interconnector_ramp, 1_350_000.0);
define_price_default!(default_max_availability, 1_200_000.0);
define_price_default!(default_band_profile, 1_100_000.0);
define_price_default!(default_daily_energy, 1_050_000.0);
define_price_default!(default_uigf, 1_000_000.0);
define_price_default!(default_fcas_max_avail, 960_000.0);
define_price_default!(default_fcas_profile, 950_000.0);
define_price_default!(default_fcas_joint_ramp, 945_000.0);
define_price_default!(default_fcas_energy_regulating, 940_000.0);
define_price_default!(default_fcas_joint_capacity, 935_000.0);
define_price_default!(default_generic, 430_000.0);
define_param_default!(default_true, bool, true);
define_param_default!(default_big_m, f64, crate::bilevel::DEFAULT_BIG_M);
define_param_default!(default_penalty_weight, Dimensionless, Dimensionless(1.0));
define_param_default!(
    default_price_tolerance,
    MoneyPerMegaWattHour,
    MoneyPerMegaWattHour(0.01)
);

/// The log level used when `dispatch.toml` does not set one
fn default_log_level() -> String {
    crate::log::DEFAULT_LOG_LEVEL.to_string()
}

/// The violation price for each family of soft constraints.
///
/// The tiers are ordered so that when the problem is stressed, lower-priced families give
/// way first and the highest-priced families are honoured for as long as possible.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ViolationPrices {
    /// Deviation of a unit's target from its historically fixed value
    #[serde(default = "default_fixed_target")]
    pub fixed_target: MoneyPerMegaWattHour,
    /// Unserved or excess energy in a region's balance
    #[serde(default = "default_region_balance")]
    pub region_balance: MoneyPerMegaWattHour,
    /// Deviation of an inflexible unit from its fixed loading level
    #[serde(default = "default_fixed_load")]
    pub fixed_load: MoneyPerMegaWattHour,
    /// Deviation from a fast-start inflexibility profile
    #[serde(default = "default_fast_start")]
    pub fast_start: MoneyPerMegaWattHour,
    /// Violation of an MNSP link's ramp limits
    #[serde(default = "default_mnsp_ramp")]
    pub mnsp_ramp: MoneyPerMegaWattHour,
    /// Flow beyond an interconnector's capacity limits
    #[serde(default = "default_interconnector_capacity")]
    pub interconnector_capacity: MoneyPerMegaWattHour,
    /// Violation of a unit's ramp limits
    #[serde(default = "default_ramp_rate")]
    pub ramp_rate: MoneyPerMegaWattHour,
    /// Flow change beyond an interconnector's ramp limit
    #[serde(default = "default_interconnector_ramp")]
    pub interconnector_ramp: MoneyPerMegaWattHour,
    /// Dispatch of a load beyond its declared maximum availability
    #[serde(default = "default_max_availability")]
    pub max_availability: MoneyPerMegaWattHour,
    /// Mismatch between a unit's target and the sum of its cleared bands
    #[serde(default = "default_band_profile")]
    pub band_profile: MoneyPerMegaWattHour,
    /// Energy beyond a unit's remaining daily limit
    #[serde(default = "default_daily_energy")]
    pub daily_energy: MoneyPerMegaWattHour,
    /// Dispatch of a semi-scheduled unit beyond its forecast
    #[serde(default = "default_uigf")]
    pub uigf: MoneyPerMegaWattHour,
    /// FCAS target beyond the scaled maximum availability
    #[serde(default = "default_fcas_max_avail")]
    pub fcas_max_avail: MoneyPerMegaWattHour,
    /// FCAS target outside the offered band profile or trapezium slopes
    #[serde(default = "default_fcas_profile")]
    pub fcas_profile: MoneyPerMegaWattHour,
    /// Violation of a joint ramping constraint
    #[serde(default = "default_fcas_joint_ramp")]
    pub fcas_joint_ramp: MoneyPerMegaWattHour,
    /// Violation of an energy-and-regulation capacity constraint
    #[serde(default = "default_fcas_energy_regulating")]
    pub fcas_energy_regulating: MoneyPerMegaWattHour,
    /// Violation of a joint capacity constraint
    #[serde(default = "default_fcas_joint_capacity")]
    pub fcas_joint_capacity: MoneyPerMegaWattHour,
    /// Fallback for generic constraints that declare no violation price
    #[serde(default = "default_generic")]
    pub generic: MoneyPerMegaWattHour,
}

impl Default for ViolationPrices {
    fn default() -> Self {
        toml::from_str("").expect("The default violation prices are invalid")
    }
}

impl ViolationPrices {
    fn all(&self) -> [(&'static str, MoneyPerMegaWattHour); 18] {
        [
            ("fixed_target", self.fixed_target),
            ("region_balance", self.region_balance),
            ("fixed_load", self.fixed_load),
            ("fast_start", self.fast_start),
            ("mnsp_ramp", self.mnsp_ramp),
            ("interconnector_capacity", self.interconnector_capacity),
            ("ramp_rate", self.ramp_rate),
            ("interconnector_ramp", self.interconnector_ramp),
            ("max_availability", self.max_availability),
            ("band_profile", self.band_profile),
            ("daily_energy", self.daily_energy),
            ("uigf", self.uigf),
            ("fcas_max_avail", self.fcas_max_avail),
            ("fcas_profile", self.fcas_profile),
            ("fcas_joint_ramp", self.fcas_joint_ramp),
            ("fcas_energy_regulating", self.fcas_energy_regulating),
            ("fcas_joint_capacity", self.fcas_joint_capacity),
            ("generic", self.generic),
        ]
    }
}

/// Represents the contents of the entire dispatch configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DispatchConfig {
    /// The level passed to [`crate::log::init`] when the caller sets up logging; the
    /// `REDISPATCH_LOG_LEVEL` environment variable overrides it
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Solve with hard constraints instead of penalised slack variables.
    ///
    /// An over-constrained interval then reports infeasibility instead of violation
    /// penalties.
    #[serde(default)]
    pub enforce_hard_constraints: bool,
    /// Co-optimise the eight FCAS markets with energy
    #[serde(default = "default_true")]
    pub include_fcas: bool,
    /// Apply generic network constraints
    #[serde(default = "default_true")]
    pub include_generic_constraints: bool,
    /// Model interconnector losses
    #[serde(default = "default_true")]
    pub include_losses: bool,
    /// Dispatch MNSP links off their offers
    #[serde(default = "default_true")]
    pub include_network_service_links: bool,
    /// Read prices from LP duals instead of re-solving with perturbed demand.
    ///
    /// Only valid when the formulation contains no discrete variables.
    #[serde(default)]
    pub use_dual_pricing: bool,
    /// Fix interconnector flow directions from telemetry, replacing the discrete loss and
    /// link formulations with linear ones
    #[serde(default)]
    pub fix_network_flows: bool,
    /// Pin unit targets to their historical values, leaving prices as the only output
    #[serde(default)]
    pub fix_unit_targets: bool,
    /// The big-M constant linearising complementarity in the bilevel reformulation
    #[serde(default = "default_big_m")]
    pub big_m: f64,
    /// Multiplier applied to every violation price
    #[serde(default = "default_penalty_weight")]
    pub penalty_weight: Dimensionless,
    /// Largest acceptable disagreement between dual and re-solve prices
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: MoneyPerMegaWattHour,
    /// The violation price for each family of soft constraints
    #[serde(default)]
    pub violation_prices: ViolationPrices,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        toml::from_str("").expect("The default dispatch configuration is invalid")
    }
}

/// Check that a violation price is usable as a penalty coefficient
fn check_violation_price(name: &str, value: MoneyPerMegaWattHour) -> Result<()> {
    ensure!(
        value.is_finite() && value > MoneyPerMegaWattHour(0.0),
        "Violation price {name} must be a finite number greater than zero"
    );
    Ok(())
}

/// Check the `big_m` parameter is valid
fn check_big_m(value: f64) -> Result<()> {
    ensure!(
        value.is_finite() && value > 0.0,
        "big_m must be a finite number greater than zero"
    );
    Ok(())
}

/// Check the `penalty_weight` parameter is valid
fn check_penalty_weight(value: Dimensionless) -> Result<()> {
    ensure!(
        value.value().is_finite() && value > Dimensionless(0.0),
        "penalty_weight must be a finite number greater than zero"
    );
    Ok(())
}

/// Check the `price_tolerance` parameter is valid
fn check_price_tolerance(value: MoneyPerMegaWattHour) -> Result<()> {
    ensure!(
        value.is_finite() && value >= MoneyPerMegaWattHour(0.0),
        "price_tolerance must be a finite number of at least zero"
    );
    Ok(())
}

impl DispatchConfig {
    /// Read the dispatch configuration from the specified directory.
    ///
    /// # Arguments
    ///
    /// * `dir` - Folder containing the configuration file
    ///
    /// # Returns
    ///
    /// The configuration as a [`DispatchConfig`] struct or an error if the file is invalid
    pub fn from_path<P: AsRef<Path>>(dir: P) -> Result<DispatchConfig> {
        let file_path = dir.as_ref().join(CONFIG_FILE_NAME);
        let config: DispatchConfig = read_toml(&file_path)?;

        config.validate().with_context(|| input_err_msg(file_path))?;

        Ok(config)
    }

    /// Validate parameters after reading in file
    pub fn validate(&self) -> Result<()> {
        check_big_m(self.big_m)?;
        check_penalty_weight(self.penalty_weight)?;
        check_price_tolerance(self.price_tolerance)?;
        for (name, value) in self.violation_prices.all() {
            check_violation_price(name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.log_level, crate::log::DEFAULT_LOG_LEVEL);
        assert!(!config.enforce_hard_constraints);
        assert!(config.include_fcas);
        assert!(config.include_losses);
        assert!(!config.use_dual_pricing);
        assert_eq!(config.penalty_weight, Dimensionless(1.0));
        assert_eq!(
            config.violation_prices.region_balance,
            MoneyPerMegaWattHour(2_200_000.0)
        );
    }

    #[test]
    fn test_penalty_tiers_ordered() {
        // the balance tier must dominate the unit profile tiers
        let prices = ViolationPrices::default();
        assert!(prices.region_balance > prices.ramp_rate);
        assert!(prices.ramp_rate > prices.band_profile);
        assert!(prices.band_profile > prices.fcas_profile);
        assert!(prices.fcas_profile > prices.generic);
    }

    #[test]
    fn test_from_path() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        writeln!(
            file,
            "log_level = \"warn\"\ninclude_fcas = false\n\n[violation_prices]\nregion_balance = 99.0"
        )
        .unwrap();

        let config = DispatchConfig::from_path(dir.path()).unwrap();
        assert_eq!(config.log_level, "warn");
        assert!(!config.include_fcas);
        assert_eq!(
            config.violation_prices.region_balance,
            MoneyPerMegaWattHour(99.0)
        );
        // unset parameters keep their defaults
        assert!(config.include_losses);
        assert_eq!(
            config.violation_prices.ramp_rate,
            MoneyPerMegaWattHour(1_400_000.0)
        );
    }

    #[rstest]
    #[case("penalty_weight = 0.0")]
    #[case("penalty_weight = inf")]
    #[case("price_tolerance = -1.0")]
    #[case("[violation_prices]\nramp_rate = 0.0")]
    fn test_invalid_config_rejected(#[case] contents: &str) {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        writeln!(file, "{contents}").unwrap();
        assert!(DispatchConfig::from_path(dir.path()).is_err());
    }
}
