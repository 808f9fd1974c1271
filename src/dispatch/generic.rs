//! Generic constraint builder.
//!
//! Resolves a constraint's left-hand-side terms against the variables already registered
//! by the unit and network builders, so it must run after them. A term over an FCAS
//! offer that did not survive availability classification contributes nothing; a term
//! over an entity the interval does not know at all makes the whole constraint inactive,
//! matching how constraint equations behave when their inputs go stale.
use crate::constraint::{ConstraintSense, GenericConstraint};
use crate::dispatch::problem::{ConstraintKey, DispatchProblem, RowBounds, VariableKey};
use log::warn;

/// Add one generic constraint row.
///
/// Returns whether the constraint was activated. Inactive constraints are logged and
/// add no row.
pub fn add_generic_constraint(problem: &mut DispatchProblem, constraint: &GenericConstraint) -> bool {
    let mut terms = Vec::new();
    for factor in &constraint.unit_factors {
        // every unit in the interval has a total-cleared variable, so a missing one
        // means the unit itself is unknown
        let Some(energy) = problem.variable(&VariableKey::TotalCleared {
            unit: factor.unit_id.clone(),
        }) else {
            warn!(
                "Constraint {} references unknown unit {}; treating it as inactive",
                constraint.id, factor.unit_id
            );
            return false;
        };
        match factor.service {
            None => terms.push((energy, factor.factor)),
            Some(service) => {
                if let Some(target) = problem.variable(&VariableKey::FcasTarget {
                    unit: factor.unit_id.clone(),
                    service,
                }) {
                    terms.push((target, factor.factor));
                }
            }
        }
    }
    for factor in &constraint.interconnector_factors {
        let Some(flow) = problem.variable(&VariableKey::InterconnectorFlow {
            interconnector: factor.interconnector_id.clone(),
        }) else {
            warn!(
                "Constraint {} references unknown interconnector {}; treating it as inactive",
                constraint.id, factor.interconnector_id
            );
            return false;
        };
        terms.push((flow, factor.factor));
    }
    for factor in &constraint.region_factors {
        let Some(total) = problem.variable(&VariableKey::RegionalFcas {
            region: factor.region_id.clone(),
            service: factor.service,
        }) else {
            warn!(
                "Constraint {} references unknown region {}; treating it as inactive",
                constraint.id, factor.region_id
            );
            return false;
        };
        terms.push((total, factor.factor));
    }

    let rhs = constraint.effective_rhs();
    let bounds = match constraint.sense {
        ConstraintSense::LessOrEqual => RowBounds::AtMost(rhs),
        ConstraintSense::Equal => RowBounds::Equality(rhs),
        ConstraintSense::GreaterOrEqual => RowBounds::AtLeast(rhs),
    };
    problem.add_soft_row(
        ConstraintKey::Generic {
            id: constraint.id.clone(),
        },
        bounds,
        terms,
        constraint.violation_price,
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::constraint::{InterconnectorFactor, RegionFactor, UnitFactor};
    use crate::dispatch::unit_energy::{add_unit_energy, BalanceTerms};
    use crate::market::HistoricalRecords;
    use crate::service::RAISE_REG;
    use crate::unit::{BandOffer, DispatchRole, EnergyBid, Unit};
    use crate::units::{MegaWatts, Minutes, MoneyPerMegaWattHour};
    use float_cmp::assert_approx_eq;

    fn generator(id: &str, price: f64, avail: f64) -> Unit {
        let mut unit = Unit::new(id, "NSW1", DispatchRole::Generator);
        unit.energy_bid = Some(
            EnergyBid::new(vec![BandOffer::new(price, avail)], MegaWatts(avail)).unwrap(),
        );
        unit
    }

    fn problem_with(units: &[Unit]) -> (DispatchProblem, BalanceTerms) {
        let config = DispatchConfig::default();
        let historical = HistoricalRecords::default();
        let mut problem = DispatchProblem::new(false, 1.0);
        let mut balance = BalanceTerms::new();
        for unit in units {
            add_unit_energy(&mut problem, unit, Minutes(5.0), &config, &historical, &mut balance);
        }
        (problem, balance)
    }

    fn stability_limit(rhs: f64) -> GenericConstraint {
        let mut c = GenericConstraint::new(
            "N>>N-NIL_1",
            ConstraintSense::LessOrEqual,
            rhs,
            MoneyPerMegaWattHour(430_000.0),
        );
        c.unit_factors.push(UnitFactor {
            unit_id: "CHEAP1".into(),
            service: None,
            factor: 1.0,
        });
        c
    }

    #[test]
    fn test_binding_limit_reorders_dispatch() {
        let units = [generator("CHEAP1", 10.0, 200.0), generator("DEAR1", 50.0, 200.0)];
        let (mut problem, mut balance) = problem_with(&units);
        assert!(add_generic_constraint(&mut problem, &stability_limit(100.0)));

        let config = DispatchConfig::default();
        let terms = balance.shift_remove("NSW1").unwrap();
        problem.add_soft_row(
            ConstraintKey::RegionBalance {
                region: "NSW1".into(),
            },
            RowBounds::Equality(150.0),
            terms,
            config.violation_prices.region_balance,
        );
        let solution = problem.solve().unwrap();

        let cheap = problem
            .variable(&VariableKey::TotalCleared {
                unit: "CHEAP1".into(),
            })
            .unwrap();
        let dear = problem
            .variable(&VariableKey::TotalCleared {
                unit: "DEAR1".into(),
            })
            .unwrap();
        assert_approx_eq!(f64, solution.value(cheap), 100.0);
        assert_approx_eq!(f64, solution.value(dear), 50.0);
    }

    #[test]
    fn test_unknown_unit_makes_constraint_inactive() {
        let units = [generator("CHEAP1", 10.0, 200.0)];
        let (mut problem, _) = problem_with(&units);
        let mut c = stability_limit(100.0);
        c.unit_factors.push(UnitFactor {
            unit_id: "GHOST1".into(),
            service: None,
            factor: 1.0,
        });

        assert!(!add_generic_constraint(&mut problem, &c));
        assert!(problem
            .row(&ConstraintKey::Generic {
                id: "N>>N-NIL_1".into(),
            })
            .is_none());
    }

    #[test]
    fn test_unavailable_fcas_term_contributes_nothing() {
        // the unit exists but registered no raise regulation target
        let units = [generator("CHEAP1", 10.0, 200.0)];
        let (mut problem, _) = problem_with(&units);
        let mut c = stability_limit(100.0);
        c.unit_factors.push(UnitFactor {
            unit_id: "CHEAP1".into(),
            service: Some(RAISE_REG),
            factor: 1.0,
        });

        assert!(add_generic_constraint(&mut problem, &c));
        let row = problem
            .row(&ConstraintKey::Generic {
                id: "N>>N-NIL_1".into(),
            })
            .unwrap();
        assert_eq!(problem.row_terms(row).len(), 1);
    }

    #[test]
    fn test_unknown_interconnector_makes_constraint_inactive() {
        let units = [generator("CHEAP1", 10.0, 200.0)];
        let (mut problem, _) = problem_with(&units);
        let mut c = stability_limit(100.0);
        c.interconnector_factors.push(InterconnectorFactor {
            interconnector_id: "X-Y".into(),
            factor: -1.0,
        });

        assert!(!add_generic_constraint(&mut problem, &c));
    }

    #[test]
    fn test_region_factor_resolves_regional_total() {
        let (mut problem, _) = problem_with(&[generator("CHEAP1", 10.0, 200.0)]);
        let regional = problem.add_variable(
            VariableKey::RegionalFcas {
                region: "NSW1".into(),
                service: RAISE_REG,
            },
            0.0,
            0.0,
            f64::INFINITY,
        );
        let mut c = GenericConstraint::new(
            "F_I+NSW_RREG",
            ConstraintSense::GreaterOrEqual,
            30.0,
            MoneyPerMegaWattHour(430_000.0),
        );
        c.region_factors.push(RegionFactor {
            region_id: "NSW1".into(),
            service: RAISE_REG,
            factor: 1.0,
        });

        assert!(add_generic_constraint(&mut problem, &c));
        let row = problem
            .row(&ConstraintKey::Generic {
                id: "F_I+NSW_RREG".into(),
            })
            .unwrap();
        assert_eq!(problem.row_bounds(row), RowBounds::AtLeast(30.0));
        assert_eq!(problem.row_terms(row), &[(regional, 1.0)]);
    }

    #[test]
    fn test_override_rhs_and_equality_sense() {
        let (mut problem, _) = problem_with(&[generator("CHEAP1", 10.0, 200.0)]);
        let mut c = stability_limit(100.0);
        c.sense = ConstraintSense::Equal;
        c.rhs_override = Some(85.5);

        assert!(add_generic_constraint(&mut problem, &c));
        let row = problem
            .row(&ConstraintKey::Generic {
                id: "N>>N-NIL_1".into(),
            })
            .unwrap();
        assert_eq!(problem.row_bounds(row), RowBounds::Equality(85.5));
    }
}
