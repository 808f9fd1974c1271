//! Unit energy constraint builders.
//!
//! For each unit this registers the energy side of its dispatch: one variable per offered
//! price band, a total-cleared variable tied to the band sum, and the caps the unit's offer
//! and telemetry place on that total. Offer prices are referred to the regional reference
//! node by the unit's transmission loss factor; loads enter the objective with negated
//! prices and the regional balance with negated sign.
use crate::config::DispatchConfig;
use crate::dispatch::problem::{
    ConstraintKey, DispatchProblem, RowBounds, VariableId, VariableKey,
};
use crate::id::RegionID;
use crate::market::HistoricalRecords;
use crate::unit::{DispatchRole, EnergyBid, FastStartRequirement, Unit};
use crate::units::{Dimensionless, MegaWatts, Minutes};
use indexmap::IndexMap;

/// Accumulated regional balance terms, extended by every builder that moves energy
pub type BalanceTerms = IndexMap<RegionID, Vec<(VariableId, f64)>>;

/// Register one unit's energy variables and constraints.
///
/// Returns the unit's total-cleared variable, which the FCAS builders couple against.
/// Units without an energy offer are held at their telemetered output by a hard equality;
/// everything else is soft at the configured violation prices.
pub fn add_unit_energy(
    problem: &mut DispatchProblem,
    unit: &Unit,
    interval: Minutes,
    config: &DispatchConfig,
    historical: &HistoricalRecords,
    balance: &mut BalanceTerms,
) -> VariableId {
    let prices = &config.violation_prices;
    let sign = match unit.role {
        DispatchRole::Generator => 1.0,
        DispatchRole::Load => -1.0,
    };

    let total = match &unit.energy_bid {
        Some(bid) => {
            let total = problem.add_variable(
                VariableKey::TotalCleared {
                    unit: unit.id.clone(),
                },
                0.0,
                0.0,
                f64::INFINITY,
            );
            add_band_variables(problem, unit, bid, sign, total, config);

            if unit.role == DispatchRole::Load {
                problem.add_soft_row(
                    ConstraintKey::MaxAvailability {
                        unit: unit.id.clone(),
                    },
                    RowBounds::AtMost(bid.max_avail.value()),
                    vec![(total, 1.0)],
                    prices.max_availability,
                );
            }
            if let Some(headroom) = unit.ramp_up_headroom(interval) {
                problem.add_soft_row(
                    ConstraintKey::RampUp {
                        unit: unit.id.clone(),
                    },
                    RowBounds::AtMost((unit.initial_mw + headroom).value()),
                    vec![(total, 1.0)],
                    prices.ramp_rate,
                );
            }
            if let Some(headroom) = unit.ramp_down_headroom(interval) {
                problem.add_soft_row(
                    ConstraintKey::RampDown {
                        unit: unit.id.clone(),
                    },
                    RowBounds::AtLeast((unit.initial_mw - headroom).value()),
                    vec![(total, 1.0)],
                    prices.ramp_rate,
                );
            }
            if let Some(forecast) = unit.forecast_mw {
                problem.add_soft_row(
                    ConstraintKey::UigfCeiling {
                        unit: unit.id.clone(),
                    },
                    RowBounds::AtMost(forecast.value()),
                    vec![(total, 1.0)],
                    prices.uigf,
                );
            }
            if let Some(level) = bid.fixed_load {
                problem.add_soft_row(
                    ConstraintKey::FixedLoad {
                        unit: unit.id.clone(),
                    },
                    RowBounds::Equality(level.value()),
                    vec![(total, 1.0)],
                    prices.fixed_load,
                );
            }
            if let Some(limit) = bid.daily_energy_limit {
                add_daily_energy(problem, unit, limit, interval, config, total);
            }
            if let Some(requirement) =
                unit.fast_start.as_ref().and_then(|p| p.requirement(interval))
            {
                let bounds = match requirement {
                    FastStartRequirement::Fixed(level) => RowBounds::Equality(level.value()),
                    FastStartRequirement::AtLeast(level) => RowBounds::AtLeast(level.value()),
                };
                problem.add_soft_row(
                    ConstraintKey::FastStartProfile {
                        unit: unit.id.clone(),
                    },
                    bounds,
                    vec![(total, 1.0)],
                    prices.fast_start,
                );
            }
            if config.fix_unit_targets {
                if let Some(record) = historical.unit_dispatch.get(&unit.id) {
                    problem.add_soft_row(
                        ConstraintKey::FixedTarget {
                            unit: unit.id.clone(),
                        },
                        RowBounds::Equality(record.total_cleared.value()),
                        vec![(total, 1.0)],
                        prices.fixed_target,
                    );
                }
            }
            total
        }
        None => {
            // No energy offer: the unit holds its telemetered output. The variable still
            // exists so FCAS trapeziums and generic constraints can reference it.
            let total = problem.add_variable(
                VariableKey::TotalCleared {
                    unit: unit.id.clone(),
                },
                0.0,
                f64::NEG_INFINITY,
                f64::INFINITY,
            );
            problem.add_row(
                ConstraintKey::HoldInitial {
                    unit: unit.id.clone(),
                },
                RowBounds::Equality(unit.initial_mw.value()),
                vec![(total, 1.0)],
            );
            total
        }
    };

    balance
        .entry(unit.region_id.clone())
        .or_default()
        .push((total, sign));
    total
}

fn add_band_variables(
    problem: &mut DispatchProblem,
    unit: &Unit,
    bid: &EnergyBid,
    sign: f64,
    total: VariableId,
    config: &DispatchConfig,
) {
    let mut terms = vec![(total, 1.0)];
    for (i, band) in bid.bands.iter().enumerate() {
        if band.avail <= MegaWatts(0.0) {
            continue;
        }
        let cost = sign * band.price.value() / unit.loss_factor.value();
        let var = problem.add_variable(
            VariableKey::EnergyBand {
                unit: unit.id.clone(),
                band: i + 1,
            },
            cost,
            0.0,
            band.avail.value(),
        );
        terms.push((var, -1.0));
    }
    problem.add_soft_row(
        ConstraintKey::BandSum {
            unit: unit.id.clone(),
        },
        RowBounds::Equality(0.0),
        terms,
        config.violation_prices.band_profile,
    );
}

/// Cap the energy delivered this interval at the unit's remaining daily allowance.
///
/// Interval energy is the trapezoidal average of initial and final output, matching the
/// accumulator advanced by `apply_initial_conditions` between intervals.
fn add_daily_energy(
    problem: &mut DispatchProblem,
    unit: &Unit,
    limit: crate::units::MegaWattHours,
    interval: Minutes,
    config: &DispatchConfig,
    total: VariableId,
) {
    let remaining = limit - unit.energy_today;
    let initial_half = (unit.initial_mw * Dimensionless(0.5)).energy_over(interval);
    let half_hours = 0.5 * interval.value() / 60.0;
    problem.add_soft_row(
        ConstraintKey::DailyEnergy {
            unit: unit.id.clone(),
        },
        RowBounds::AtMost((remaining - initial_half).value()),
        vec![(total, half_hours)],
        config.violation_prices.daily_energy,
    );
}
