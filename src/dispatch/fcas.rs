//! FCAS constraint builders.
//!
//! Every scaled offer that survives classification gets a target variable, band variables
//! and the coupling rows that tie the target to the unit's energy dispatch. Regulation
//! services are bounded by the energy-and-regulating capacity rows and the joint ramping
//! rows; contingency services by the joint capacity rows, which reserve headroom for the
//! same-direction regulation target on the binding side of the trapezium. Stranded offers
//! keep a target variable pinned at zero so they stay visible in solutions and reports.
use crate::config::DispatchConfig;
use crate::dispatch::problem::{
    ConstraintKey, DispatchProblem, RowBounds, TrapeziumSide, VariableId, VariableKey,
};
use crate::fcas::{EnablementStatus, FcasStatusMap};
use crate::id::RegionID;
use crate::service::{FcasCategory, FcasDirection, FcasService};
use crate::unit::{FcasBid, Unit};
use crate::units::{MegaWatts, Minutes};
use indexmap::IndexMap;

/// Accumulated FCAS target terms, one list per (region, service) pair
pub type RegionalFcasTerms = IndexMap<(RegionID, FcasService), Vec<(VariableId, f64)>>;

/// Register one unit's FCAS variables and constraints.
///
/// `energy` is the unit's total-cleared variable from the energy builder; the trapezium
/// rows couple each FCAS target against it. Offers classified as unavailable register
/// nothing. Services iterate with regulation first in each direction, so the regulation
/// target already exists when a contingency service asks for it.
pub fn add_unit_fcas(
    problem: &mut DispatchProblem,
    unit: &Unit,
    energy: VariableId,
    statuses: &FcasStatusMap,
    interval: Minutes,
    config: &DispatchConfig,
    regional: &mut RegionalFcasTerms,
) {
    for service in FcasService::iter() {
        let Some(scaled) = statuses.get(&(unit.id.clone(), service)) else {
            continue;
        };
        match scaled.status {
            EnablementStatus::Unavailable => continue,
            EnablementStatus::Stranded => {
                let target = add_target(problem, unit, service, regional);
                problem.add_row(
                    ConstraintKey::FcasStranded {
                        unit: unit.id.clone(),
                        service,
                    },
                    RowBounds::Equality(0.0),
                    vec![(target, 1.0)],
                );
            }
            EnablementStatus::Available => {
                let target = add_target(problem, unit, service, regional);
                add_band_variables(problem, unit, service, &scaled.bid, target, config);
                problem.add_soft_row(
                    ConstraintKey::FcasMaxAvail {
                        unit: unit.id.clone(),
                        service,
                    },
                    RowBounds::AtMost(scaled.bid.max_avail.value()),
                    vec![(target, 1.0)],
                    config.violation_prices.fcas_max_avail,
                );
                if service.is_regulation() {
                    add_regulating_capacity(
                        problem,
                        unit,
                        service,
                        &scaled.bid,
                        energy,
                        target,
                        config,
                    );
                    add_joint_ramp(
                        problem,
                        unit,
                        service.direction,
                        energy,
                        target,
                        interval,
                        config,
                    );
                } else {
                    add_joint_capacity(
                        problem,
                        unit,
                        service,
                        &scaled.bid,
                        energy,
                        target,
                        statuses,
                        config,
                    );
                }
            }
        }
    }
}

/// Register the target variable and enter it into the regional service sum
fn add_target(
    problem: &mut DispatchProblem,
    unit: &Unit,
    service: FcasService,
    regional: &mut RegionalFcasTerms,
) -> VariableId {
    let target = problem.add_variable(
        VariableKey::FcasTarget {
            unit: unit.id.clone(),
            service,
        },
        0.0,
        0.0,
        f64::INFINITY,
    );
    regional
        .entry((unit.region_id.clone(), service))
        .or_default()
        .push((target, 1.0));
    target
}

fn add_band_variables(
    problem: &mut DispatchProblem,
    unit: &Unit,
    service: FcasService,
    bid: &FcasBid,
    target: VariableId,
    config: &DispatchConfig,
) {
    let mut terms = vec![(target, 1.0)];
    for (i, band) in bid.bands.iter().enumerate() {
        if band.avail <= MegaWatts(0.0) {
            continue;
        }
        // FCAS offers are priced at the unit terminal, with no loss factor referral
        let var = problem.add_variable(
            VariableKey::FcasBand {
                unit: unit.id.clone(),
                service,
                band: i + 1,
            },
            band.price.value(),
            0.0,
            band.avail.value(),
        );
        terms.push((var, -1.0));
    }
    problem.add_soft_row(
        ConstraintKey::FcasBandSum {
            unit: unit.id.clone(),
            service,
        },
        RowBounds::Equality(0.0),
        terms,
        config.violation_prices.fcas_profile,
    );
}

/// The trapezium rows for a regulation service.
///
/// Lower side: energy minus the tapered target stays above the enablement minimum.
/// Upper side: energy plus the tapered target stays below the enablement maximum.
fn add_regulating_capacity(
    problem: &mut DispatchProblem,
    unit: &Unit,
    service: FcasService,
    bid: &FcasBid,
    energy: VariableId,
    target: VariableId,
    config: &DispatchConfig,
) {
    let price = config.violation_prices.fcas_energy_regulating;
    problem.add_soft_row(
        ConstraintKey::EnergyRegulatingCapacity {
            unit: unit.id.clone(),
            service,
            side: TrapeziumSide::Lower,
        },
        RowBounds::AtLeast(bid.enablement_min.value()),
        vec![(energy, 1.0), (target, -bid.lower_slope_coeff().value())],
        price,
    );
    problem.add_soft_row(
        ConstraintKey::EnergyRegulatingCapacity {
            unit: unit.id.clone(),
            service,
            side: TrapeziumSide::Upper,
        },
        RowBounds::AtMost(bid.enablement_max.value()),
        vec![(energy, 1.0), (target, bid.upper_slope_coeff().value())],
        price,
    );
}

/// The joint ramping row for a regulation service.
///
/// Raise regulation must be deliverable on top of the energy target within the unit's
/// ramp-up window for the interval; lower regulation below it within the ramp-down
/// window. Units with no effective ramp rate in the direction are unconstrained.
fn add_joint_ramp(
    problem: &mut DispatchProblem,
    unit: &Unit,
    direction: FcasDirection,
    energy: VariableId,
    target: VariableId,
    interval: Minutes,
    config: &DispatchConfig,
) {
    let price = config.violation_prices.fcas_joint_ramp;
    match direction {
        FcasDirection::Raise => {
            if let Some(rate) = unit.effective_ramp_up() {
                let ceiling = unit.initial_mw + rate * interval;
                problem.add_soft_row(
                    ConstraintKey::JointRampUp {
                        unit: unit.id.clone(),
                    },
                    RowBounds::AtMost(ceiling.value()),
                    vec![(energy, 1.0), (target, 1.0)],
                    price,
                );
            }
        }
        FcasDirection::Lower => {
            if let Some(rate) = unit.effective_ramp_down() {
                let floor = unit.initial_mw - rate * interval;
                problem.add_soft_row(
                    ConstraintKey::JointRampDown {
                        unit: unit.id.clone(),
                    },
                    RowBounds::AtLeast(floor.value()),
                    vec![(energy, 1.0), (target, -1.0)],
                    price,
                );
            }
        }
    }
}

/// The trapezium rows for a contingency service.
///
/// The side in the service's own direction also carries the same-direction regulation
/// target: a raise contingency response and raise regulation must both fit under the
/// enablement maximum, which relaxes to the regulation offer's bound when that is wider.
/// The opposite side constrains the contingency response alone.
fn add_joint_capacity(
    problem: &mut DispatchProblem,
    unit: &Unit,
    service: FcasService,
    bid: &FcasBid,
    energy: VariableId,
    target: VariableId,
    statuses: &FcasStatusMap,
    config: &DispatchConfig,
) {
    let price = config.violation_prices.fcas_joint_capacity;
    let reg = regulation_coupling(problem, unit, service.direction, statuses);
    match service.direction {
        FcasDirection::Raise => {
            let mut terms = vec![(energy, 1.0), (target, bid.upper_slope_coeff().value())];
            let mut bound = bid.enablement_max;
            if let Some((reg_target, reg_bid)) = reg {
                terms.push((reg_target, 1.0));
                bound = bound.max(reg_bid.enablement_max);
            }
            problem.add_soft_row(
                ConstraintKey::JointCapacity {
                    unit: unit.id.clone(),
                    service,
                    side: TrapeziumSide::Upper,
                },
                RowBounds::AtMost(bound.value()),
                terms,
                price,
            );
            problem.add_soft_row(
                ConstraintKey::JointCapacity {
                    unit: unit.id.clone(),
                    service,
                    side: TrapeziumSide::Lower,
                },
                RowBounds::AtLeast(bid.enablement_min.value()),
                vec![(energy, 1.0), (target, -bid.lower_slope_coeff().value())],
                price,
            );
        }
        FcasDirection::Lower => {
            let mut terms = vec![(energy, 1.0), (target, -bid.lower_slope_coeff().value())];
            let mut bound = bid.enablement_min;
            if let Some((reg_target, reg_bid)) = reg {
                terms.push((reg_target, -1.0));
                bound = bound.min(reg_bid.enablement_min);
            }
            problem.add_soft_row(
                ConstraintKey::JointCapacity {
                    unit: unit.id.clone(),
                    service,
                    side: TrapeziumSide::Lower,
                },
                RowBounds::AtLeast(bound.value()),
                terms,
                price,
            );
            problem.add_soft_row(
                ConstraintKey::JointCapacity {
                    unit: unit.id.clone(),
                    service,
                    side: TrapeziumSide::Upper,
                },
                RowBounds::AtMost(bid.enablement_max.value()),
                vec![(energy, 1.0), (target, bid.upper_slope_coeff().value())],
                price,
            );
        }
    }
}

/// The same-direction regulation target and scaled offer, when it cleared as available
fn regulation_coupling<'a>(
    problem: &DispatchProblem,
    unit: &Unit,
    direction: FcasDirection,
    statuses: &'a FcasStatusMap,
) -> Option<(VariableId, &'a FcasBid)> {
    let service = FcasService {
        direction,
        category: FcasCategory::Regulation,
    };
    let scaled = statuses.get(&(unit.id.clone(), service))?;
    if scaled.status != EnablementStatus::Available {
        return None;
    }
    let target = problem.variable(&VariableKey::FcasTarget {
        unit: unit.id.clone(),
        service,
    })?;
    Some((target, &scaled.bid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcas::ScaledFcas;
    use crate::service::{LOWER_REG, RAISE_REG};
    use crate::unit::{BandOffer, DispatchRole};
    use crate::units::{Dimensionless, MegaWattsPerMinute};
    use float_cmp::assert_approx_eq;

    const RAISE_6S: FcasService = FcasService {
        direction: FcasDirection::Raise,
        category: FcasCategory::SixSecond,
    };
    const LOWER_6S: FcasService = FcasService {
        direction: FcasDirection::Lower,
        category: FcasCategory::SixSecond,
    };

    fn trapezium(price: f64, max: f64, emin: f64, low: f64, high: f64, emax: f64) -> FcasBid {
        FcasBid::new(
            vec![BandOffer::new(price, max)],
            MegaWatts(max),
            MegaWatts(emin),
            MegaWatts(low),
            MegaWatts(high),
            MegaWatts(emax),
        )
        .unwrap()
    }

    fn statuses_for(
        unit: &Unit,
        entries: &[(FcasService, FcasBid, EnablementStatus)],
    ) -> FcasStatusMap {
        let mut map = FcasStatusMap::new();
        for (service, bid, status) in entries {
            map.insert(
                (unit.id.clone(), *service),
                ScaledFcas {
                    bid: bid.clone(),
                    status: *status,
                },
            );
        }
        map
    }

    /// Build a problem with an energy variable at the given cost, then add the FCAS side
    fn build(
        unit: &Unit,
        statuses: &FcasStatusMap,
        energy_cost: f64,
    ) -> (DispatchProblem, VariableId, RegionalFcasTerms) {
        let config = DispatchConfig::default();
        let mut problem = DispatchProblem::new(false, 1.0);
        let energy = problem.add_variable(
            VariableKey::TotalCleared {
                unit: unit.id.clone(),
            },
            energy_cost,
            0.0,
            f64::INFINITY,
        );
        let mut regional = RegionalFcasTerms::new();
        add_unit_fcas(
            &mut problem,
            unit,
            energy,
            statuses,
            Minutes(5.0),
            &config,
            &mut regional,
        );
        (problem, energy, regional)
    }

    #[test]
    fn test_available_offer_registers_target_and_bands() {
        let mut unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        unit.loss_factor = Dimensionless(0.9);
        let statuses = statuses_for(
            &unit,
            &[(
                RAISE_6S,
                trapezium(1.5, 20.0, 0.0, 0.0, 80.0, 100.0),
                EnablementStatus::Available,
            )],
        );
        let (problem, _, regional) = build(&unit, &statuses, 0.0);

        let target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "BW01".into(),
                service: RAISE_6S,
            })
            .unwrap();
        let band = problem
            .variable(&VariableKey::FcasBand {
                unit: "BW01".into(),
                service: RAISE_6S,
                band: 1,
            })
            .unwrap();
        // FCAS band prices are not referred through the loss factor
        assert_approx_eq!(f64, problem.variable_cost(band), 1.5);
        assert_eq!(problem.variable_bounds(band), (0.0, 20.0));

        let max_avail = problem
            .row(&ConstraintKey::FcasMaxAvail {
                unit: "BW01".into(),
                service: RAISE_6S,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(max_avail), RowBounds::AtMost(20.0));
        assert_eq!(regional[&("NSW1".into(), RAISE_6S)], vec![(target, 1.0)]);
    }

    #[test]
    fn test_stranded_offer_is_pinned_at_zero() {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        let statuses = statuses_for(
            &unit,
            &[(
                RAISE_6S,
                trapezium(1.5, 20.0, 0.0, 0.0, 80.0, 100.0),
                EnablementStatus::Stranded,
            )],
        );
        let (problem, _, regional) = build(&unit, &statuses, 0.0);

        let pin = problem
            .row(&ConstraintKey::FcasStranded {
                unit: "BW01".into(),
                service: RAISE_6S,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(pin), RowBounds::Equality(0.0));
        assert!(!problem.is_soft(pin));
        // no bands, but the zero target still participates in the regional sum
        assert!(problem
            .variable(&VariableKey::FcasBand {
                unit: "BW01".into(),
                service: RAISE_6S,
                band: 1,
            })
            .is_none());
        assert_eq!(regional[&("NSW1".into(), RAISE_6S)].len(), 1);
    }

    #[test]
    fn test_unavailable_offer_registers_nothing() {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        let statuses = statuses_for(
            &unit,
            &[(
                RAISE_6S,
                trapezium(1.5, 20.0, 0.0, 0.0, 80.0, 100.0),
                EnablementStatus::Unavailable,
            )],
        );
        let (problem, _, regional) = build(&unit, &statuses, 0.0);

        assert!(problem
            .variable(&VariableKey::FcasTarget {
                unit: "BW01".into(),
                service: RAISE_6S,
            })
            .is_none());
        assert!(regional.is_empty());
    }

    #[test]
    fn test_regulating_capacity_rows() {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        // slopes of one on both sides: (30 - 20) / 10 and (100 - 90) / 10
        let statuses = statuses_for(
            &unit,
            &[(
                RAISE_REG,
                trapezium(5.0, 10.0, 20.0, 30.0, 90.0, 100.0),
                EnablementStatus::Available,
            )],
        );
        let (problem, energy, _) = build(&unit, &statuses, 0.0);
        let target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "BW01".into(),
                service: RAISE_REG,
            })
            .unwrap();

        let lower = problem
            .row(&ConstraintKey::EnergyRegulatingCapacity {
                unit: "BW01".into(),
                service: RAISE_REG,
                side: TrapeziumSide::Lower,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(lower), RowBounds::AtLeast(20.0));
        assert_eq!(problem.row_terms(lower), &[(energy, 1.0), (target, -1.0)]);

        let upper = problem
            .row(&ConstraintKey::EnergyRegulatingCapacity {
                unit: "BW01".into(),
                service: RAISE_REG,
                side: TrapeziumSide::Upper,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(upper), RowBounds::AtMost(100.0));
        assert_eq!(problem.row_terms(upper), &[(energy, 1.0), (target, 1.0)]);

        // no ramp rates declared, so no joint ramp row
        assert!(problem
            .row(&ConstraintKey::JointRampUp {
                unit: "BW01".into(),
            })
            .is_none());
    }

    #[test]
    fn test_joint_ramp_windows() {
        let mut unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        unit.initial_mw = MegaWatts(50.0);
        unit.ramp_up_rate = Some(MegaWattsPerMinute(2.0));
        unit.ramp_down_rate = Some(MegaWattsPerMinute(3.0));
        let statuses = statuses_for(
            &unit,
            &[
                (
                    RAISE_REG,
                    trapezium(5.0, 10.0, 0.0, 0.0, 90.0, 100.0),
                    EnablementStatus::Available,
                ),
                (
                    LOWER_REG,
                    trapezium(5.0, 10.0, 0.0, 10.0, 100.0, 100.0),
                    EnablementStatus::Available,
                ),
            ],
        );
        let (problem, _, _) = build(&unit, &statuses, 0.0);

        // 50 + 2 MW/min over 5 minutes
        let up = problem
            .row(&ConstraintKey::JointRampUp {
                unit: "BW01".into(),
            })
            .unwrap();
        assert_eq!(problem.row_bounds(up), RowBounds::AtMost(60.0));

        // 50 - 3 MW/min over 5 minutes
        let down = problem
            .row(&ConstraintKey::JointRampDown {
                unit: "BW01".into(),
            })
            .unwrap();
        assert_eq!(problem.row_bounds(down), RowBounds::AtLeast(35.0));
    }

    #[test]
    fn test_joint_capacity_reserves_regulation_headroom() {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        let statuses = statuses_for(
            &unit,
            &[
                (
                    RAISE_REG,
                    trapezium(5.0, 10.0, 0.0, 0.0, 100.0, 110.0),
                    EnablementStatus::Available,
                ),
                (
                    RAISE_6S,
                    trapezium(1.5, 20.0, 0.0, 0.0, 80.0, 100.0),
                    EnablementStatus::Available,
                ),
            ],
        );
        let (problem, energy, _) = build(&unit, &statuses, 0.0);
        let reg_target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "BW01".into(),
                service: RAISE_REG,
            })
            .unwrap();
        let cont_target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "BW01".into(),
                service: RAISE_6S,
            })
            .unwrap();

        // upper side carries the regulation target and relaxes to the wider bound
        let upper = problem
            .row(&ConstraintKey::JointCapacity {
                unit: "BW01".into(),
                service: RAISE_6S,
                side: TrapeziumSide::Upper,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(upper), RowBounds::AtMost(110.0));
        assert_eq!(
            problem.row_terms(upper),
            &[(energy, 1.0), (cont_target, 1.0), (reg_target, 1.0)]
        );

        // lower side constrains the contingency response alone
        let lower = problem
            .row(&ConstraintKey::JointCapacity {
                unit: "BW01".into(),
                service: RAISE_6S,
                side: TrapeziumSide::Lower,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(lower), RowBounds::AtLeast(0.0));
        assert_eq!(problem.row_terms(lower).len(), 2);
    }

    #[test]
    fn test_joint_capacity_without_regulation() {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        let statuses = statuses_for(
            &unit,
            &[
                (
                    RAISE_REG,
                    trapezium(5.0, 10.0, 0.0, 0.0, 100.0, 110.0),
                    EnablementStatus::Unavailable,
                ),
                (
                    RAISE_6S,
                    trapezium(1.5, 20.0, 0.0, 0.0, 80.0, 100.0),
                    EnablementStatus::Available,
                ),
            ],
        );
        let (problem, _, _) = build(&unit, &statuses, 0.0);

        let upper = problem
            .row(&ConstraintKey::JointCapacity {
                unit: "BW01".into(),
                service: RAISE_6S,
                side: TrapeziumSide::Upper,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(upper), RowBounds::AtMost(100.0));
        assert_eq!(problem.row_terms(upper).len(), 2);
    }

    #[test]
    fn test_lower_contingency_couples_on_lower_side() {
        let unit = Unit::new("PUMP1", "NSW1", DispatchRole::Load);
        let statuses = statuses_for(
            &unit,
            &[
                (
                    LOWER_REG,
                    trapezium(5.0, 10.0, 10.0, 20.0, 100.0, 100.0),
                    EnablementStatus::Available,
                ),
                (
                    LOWER_6S,
                    trapezium(1.5, 20.0, 20.0, 40.0, 90.0, 100.0),
                    EnablementStatus::Available,
                ),
            ],
        );
        let (problem, energy, _) = build(&unit, &statuses, 0.0);
        let reg_target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "PUMP1".into(),
                service: LOWER_REG,
            })
            .unwrap();
        let cont_target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "PUMP1".into(),
                service: LOWER_6S,
            })
            .unwrap();

        // lower side carries the regulation target; the bound drops to the regulation
        // offer's enablement minimum of 10
        let lower = problem
            .row(&ConstraintKey::JointCapacity {
                unit: "PUMP1".into(),
                service: LOWER_6S,
                side: TrapeziumSide::Lower,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(lower), RowBounds::AtLeast(10.0));
        // lower slope is (40 - 20) / 20 = 1
        assert_eq!(
            problem.row_terms(lower),
            &[(energy, 1.0), (cont_target, -1.0), (reg_target, -1.0)]
        );

        let upper = problem
            .row(&ConstraintKey::JointCapacity {
                unit: "PUMP1".into(),
                service: LOWER_6S,
                side: TrapeziumSide::Upper,
            })
            .unwrap();
        assert_eq!(problem.row_bounds(upper), RowBounds::AtMost(100.0));
        assert_eq!(problem.row_terms(upper).len(), 2);
    }

    #[test]
    fn test_trapezium_trades_energy_for_fcas() {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        // the response pays ten times what energy does, so the unit backs off to 80 MW
        // and clears the full 20 MW of response under the joint bound of 100
        let statuses = statuses_for(
            &unit,
            &[(
                RAISE_6S,
                trapezium(-100.0, 20.0, 0.0, 0.0, 80.0, 100.0),
                EnablementStatus::Available,
            )],
        );
        let config = DispatchConfig::default();
        let mut problem = DispatchProblem::new(false, 1.0);
        let energy = problem.add_variable(
            VariableKey::TotalCleared {
                unit: unit.id.clone(),
            },
            -10.0,
            0.0,
            100.0,
        );
        let mut regional = RegionalFcasTerms::new();
        add_unit_fcas(
            &mut problem,
            &unit,
            energy,
            &statuses,
            Minutes(5.0),
            &config,
            &mut regional,
        );
        let solution = problem.solve().unwrap();

        let target = problem
            .variable(&VariableKey::FcasTarget {
                unit: "BW01".into(),
                service: RAISE_6S,
            })
            .unwrap();
        assert_approx_eq!(f64, solution.value(energy), 80.0);
        assert_approx_eq!(f64, solution.value(target), 20.0);
    }
}
