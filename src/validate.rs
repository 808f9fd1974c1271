//! Read-only comparison of a solved interval against historical market records.
//!
//! Validation runs after a solve and never alters or fails it. Every computed value that
//! diverges from its historical counterpart beyond tolerance is logged as a warning and
//! returned as a [`Discrepancy`], so a driver can count or persist the divergences while
//! the dispatch results stand.
use crate::config::DispatchConfig;
use crate::dispatch::prices::PriceSet;
use crate::dispatch::DispatchSolution;
use crate::id::{ConstraintID, InterconnectorID, RegionID, UnitID};
use crate::market::DispatchInterval;
use crate::service::{FcasService, PricedService};
use crate::units::{MegaWatts, MoneyPerMegaWattHour};
use log::warn;
use std::borrow::Borrow;
use std::fmt;

/// Megawatt quantities within this distance of history count as matching
pub const MW_TOLERANCE: MegaWatts = MegaWatts(0.1);

/// Prices within this distance of history count as matching
pub const PRICE_TOLERANCE: MoneyPerMegaWattHour = MoneyPerMegaWattHour(0.01);

/// The solved value a discrepancy was found in
#[derive(Debug, Clone, PartialEq)]
pub enum DiscrepancyField {
    /// A unit's cleared energy target
    UnitEnergy { unit: UnitID },
    /// A unit's cleared FCAS target
    UnitFcas { unit: UnitID, service: FcasService },
    /// A region's energy spot price
    RegionPrice { region: RegionID },
    /// A region's FCAS price
    RegionFcasPrice {
        region: RegionID,
        service: FcasService,
    },
    /// An interconnector's solved flow
    InterconnectorFlow { interconnector: InterconnectorID },
    /// A generic constraint's marginal value
    ConstraintMarginal { id: ConstraintID },
    /// A constraint that bound historically but was dropped from the problem
    ConstraintOmitted { id: ConstraintID },
}

impl fmt::Display for DiscrepancyField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use DiscrepancyField::*;
        match self {
            UnitEnergy { unit } => write!(f, "The energy target of {unit}"),
            UnitFcas { unit, service } => write!(f, "The {service} target of {unit}"),
            RegionPrice { region } => write!(f, "The energy price in {region}"),
            RegionFcasPrice { region, service } => write!(f, "The {service} price in {region}"),
            InterconnectorFlow { interconnector } => write!(f, "The flow on {interconnector}"),
            ConstraintMarginal { id } => write!(f, "The marginal value of {id}"),
            ConstraintOmitted { id } => {
                write!(f, "The marginal value of the omitted constraint {id}")
            }
        }
    }
}

/// One solved value that diverges from the historical record beyond tolerance
#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    /// Where the divergence was found
    pub field: DiscrepancyField,
    /// The value this engine computed
    pub computed: f64,
    /// The value the historical record holds
    pub historical: f64,
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} diverges from history: computed {:.3}, historical {:.3}",
            self.field, self.computed, self.historical
        )
    }
}

/// Compare a solved interval against the historical records loaded with it.
///
/// Each discrepancy is logged as a warning and collected. An interval with no historical
/// records validates trivially. FCAS comparisons are skipped when the solve excluded
/// FCAS, and constraint marginals are compared only where duals are available.
pub fn validate_solution(
    solution: &DispatchSolution,
    interval: &DispatchInterval,
    config: &DispatchConfig,
) -> Vec<Discrepancy> {
    let mut found = Vec::new();
    let history = &interval.historical;

    for (unit_id, record) in &history.unit_dispatch {
        let id: &str = unit_id.borrow();
        report(
            &mut found,
            DiscrepancyField::UnitEnergy {
                unit: unit_id.clone(),
            },
            solution.total_cleared(id).value(),
            record.total_cleared.value(),
            MW_TOLERANCE.value(),
        );
        if config.include_fcas {
            for (&service, &target) in &record.fcas_cleared {
                report(
                    &mut found,
                    DiscrepancyField::UnitFcas {
                        unit: unit_id.clone(),
                        service,
                    },
                    solution.fcas_cleared(id, service).value(),
                    target.value(),
                    MW_TOLERANCE.value(),
                );
            }
        }
    }

    for (region_id, record) in &history.region_prices {
        let id: &str = region_id.borrow();
        if let Some(price) = solution.price(id, PricedService::Energy) {
            report(
                &mut found,
                DiscrepancyField::RegionPrice {
                    region: region_id.clone(),
                },
                price.value(),
                record.energy.value(),
                PRICE_TOLERANCE.value(),
            );
        }
        if config.include_fcas {
            for (&service, &historical) in &record.fcas {
                if let Some(price) = solution.price(id, PricedService::Fcas(service)) {
                    report(
                        &mut found,
                        DiscrepancyField::RegionFcasPrice {
                            region: region_id.clone(),
                            service,
                        },
                        price.value(),
                        historical.value(),
                        PRICE_TOLERANCE.value(),
                    );
                }
            }
        }
    }

    for (ic_id, &flow) in &history.interconnector_flows {
        report(
            &mut found,
            DiscrepancyField::InterconnectorFlow {
                interconnector: ic_id.clone(),
            },
            solution.interconnector_flow(ic_id.borrow()).value(),
            flow.value(),
            MW_TOLERANCE.value(),
        );
    }

    for (constraint_id, state) in &history.constraints {
        let id: &str = constraint_id.borrow();
        if !solution.constraint_active(id) {
            if state.binding {
                report(
                    &mut found,
                    DiscrepancyField::ConstraintOmitted {
                        id: constraint_id.clone(),
                    },
                    0.0,
                    state.marginal_value.value(),
                    PRICE_TOLERANCE.value(),
                );
            }
            continue;
        }
        if let Some(marginal) = solution.constraint_marginal(id) {
            report(
                &mut found,
                DiscrepancyField::ConstraintMarginal {
                    id: constraint_id.clone(),
                },
                marginal.value(),
                state.marginal_value.value(),
                PRICE_TOLERANCE.value(),
            );
        }
    }

    found
}

fn report(
    found: &mut Vec<Discrepancy>,
    field: DiscrepancyField,
    computed: f64,
    historical: f64,
    tolerance: f64,
) {
    if (computed - historical).abs() <= tolerance {
        return;
    }
    let discrepancy = Discrepancy {
        field,
        computed,
        historical,
    };
    warn!("{discrepancy}");
    found.push(discrepancy);
}

/// A price the two pricing modes disagree on
#[derive(Debug, Clone, PartialEq)]
pub struct PriceDisagreement {
    /// The priced region
    pub region: RegionID,
    /// The priced service
    pub service: PricedService,
    /// The price read from the duals
    pub dual: MoneyPerMegaWattHour,
    /// The price from the finite-difference re-solve
    pub finite_difference: MoneyPerMegaWattHour,
}

impl fmt::Display for PriceDisagreement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Pricing modes disagree on {} in {}: dual {:.3} $/MWh, finite difference {:.3} $/MWh",
            self.service,
            self.region,
            self.dual.value(),
            self.finite_difference.value()
        )
    }
}

/// Compare prices produced by the two pricing modes over the same solved problem.
///
/// On a continuous problem the dual read and the finite-difference re-solve must agree;
/// each disagreement beyond tolerance is logged and returned, and indicates a defect in
/// the formulation rather than a property of the instance. Prices present in only one of
/// the sets are not compared.
pub fn compare_price_modes(
    dual: &PriceSet,
    finite_difference: &PriceSet,
    tolerance: MoneyPerMegaWattHour,
) -> Vec<PriceDisagreement> {
    let mut found = Vec::new();
    for (region, service, price) in dual.iter() {
        let Some(other) = finite_difference.get(region.borrow(), service) else {
            continue;
        };
        if (price - other).abs() <= tolerance {
            continue;
        }
        let disagreement = PriceDisagreement {
            region: region.clone(),
            service,
            dual: price,
            finite_difference: other,
        };
        warn!("{disagreement}");
        found.push(disagreement);
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ConstraintSense, GenericConstraint, UnitFactor};
    use crate::dispatch::DispatchRun;
    use crate::fixture::{generator, single_region_interval};
    use crate::market::{HistoricalRegionPrice, HistoricalUnitDispatch};
    use crate::service::RAISE_REG;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn unit_history(total_cleared: f64) -> HistoricalUnitDispatch {
        HistoricalUnitDispatch {
            total_cleared: MegaWatts(total_cleared),
            ..Default::default()
        }
    }

    fn price_history(energy: f64) -> HistoricalRegionPrice {
        HistoricalRegionPrice {
            energy: MoneyPerMegaWattHour(energy),
            ..Default::default()
        }
    }

    #[rstest]
    fn test_matching_history_validates_cleanly(single_region_interval: DispatchInterval) {
        let mut interval = single_region_interval;
        interval
            .historical
            .unit_dispatch
            .insert("BW01".into(), unit_history(80.0));
        interval
            .historical
            .region_prices
            .insert("NSW1".into(), price_history(24.0));

        let config = DispatchConfig::default();
        let solution = DispatchRun::new(&interval, &config).solve().unwrap();
        assert!(validate_solution(&solution, &interval, &config).is_empty());
    }

    #[rstest]
    fn test_divergent_history_is_reported(single_region_interval: DispatchInterval) {
        let mut interval = single_region_interval;
        interval
            .historical
            .unit_dispatch
            .insert("BW01".into(), unit_history(70.0));
        interval
            .historical
            .region_prices
            .insert("NSW1".into(), price_history(30.0));

        let config = DispatchConfig::default();
        let solution = DispatchRun::new(&interval, &config).solve().unwrap();
        let found = validate_solution(&solution, &interval, &config);

        assert_eq!(found.len(), 2);
        assert_eq!(
            found[0].field,
            DiscrepancyField::UnitEnergy {
                unit: "BW01".into()
            }
        );
        assert_approx_eq!(f64, found[0].computed, 80.0, epsilon = 1e-6);
        assert_approx_eq!(f64, found[0].historical, 70.0);
        assert_eq!(
            found[1].field,
            DiscrepancyField::RegionPrice {
                region: "NSW1".into()
            }
        );
        assert_approx_eq!(f64, found[1].computed, 24.0, epsilon = 1e-6);
    }

    #[rstest]
    fn test_fcas_comparisons_follow_the_config(single_region_interval: DispatchInterval) {
        let mut interval = single_region_interval;
        let mut record = unit_history(80.0);
        record.fcas_cleared.insert(RAISE_REG, MegaWatts(5.0));
        interval
            .historical
            .unit_dispatch
            .insert("BW01".into(), record);

        // with FCAS in the problem, the unit's missing offer shows up as a divergence
        let config = DispatchConfig::default();
        let solution = DispatchRun::new(&interval, &config).solve().unwrap();
        let found = validate_solution(&solution, &interval, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].field,
            DiscrepancyField::UnitFcas {
                unit: "BW01".into(),
                service: RAISE_REG
            }
        );

        // with FCAS excluded, the targets are not comparable and are skipped
        let config = DispatchConfig {
            include_fcas: false,
            ..Default::default()
        };
        let solution = DispatchRun::new(&interval, &config).solve().unwrap();
        assert!(validate_solution(&solution, &interval, &config).is_empty());
    }

    #[rstest]
    fn test_omitted_binding_constraint_is_flagged(single_region_interval: DispatchInterval) {
        let mut interval = single_region_interval;
        // references a unit that is not in this interval, so it is dropped
        let mut ghost = GenericConstraint::new(
            "N>>GHOST",
            ConstraintSense::LessOrEqual,
            100.0,
            MoneyPerMegaWattHour(430_000.0),
        );
        ghost.unit_factors.push(UnitFactor {
            unit_id: "GHOST1".into(),
            service: None,
            factor: 1.0,
        });
        interval.generic_constraints.insert(ghost.id.clone(), ghost);
        interval.historical.constraints.insert(
            "N>>GHOST".into(),
            crate::market::HistoricalConstraintState {
                marginal_value: MoneyPerMegaWattHour(-12.5),
                binding: true,
            },
        );

        let config = DispatchConfig::default();
        let solution = DispatchRun::new(&interval, &config).solve().unwrap();
        let found = validate_solution(&solution, &interval, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].field,
            DiscrepancyField::ConstraintOmitted {
                id: "N>>GHOST".into()
            }
        );
    }

    #[rstest]
    fn test_constraint_marginals_compared_against_history(
        single_region_interval: DispatchInterval,
    ) {
        let mut interval = single_region_interval;
        interval
            .units
            .insert("PEAK1".into(), generator("PEAK1", "NSW1", 100.0, 200.0));
        // caps the cheap unit at 50 MW, so the peaker covers the remainder
        let mut cap = GenericConstraint::new(
            "N>>BW01_CAP",
            ConstraintSense::LessOrEqual,
            50.0,
            MoneyPerMegaWattHour(430_000.0),
        );
        cap.unit_factors.push(UnitFactor {
            unit_id: "BW01".into(),
            service: None,
            factor: 1.0,
        });
        interval.generic_constraints.insert(cap.id.clone(), cap);

        let config = DispatchConfig::default();
        let solution = DispatchRun::new(&interval, &config).solve().unwrap();

        // relaxing the cap by a megawatt swaps peaker output for cheap output
        interval.historical.constraints.insert(
            "N>>BW01_CAP".into(),
            crate::market::HistoricalConstraintState {
                marginal_value: MoneyPerMegaWattHour(-76.0),
                binding: true,
            },
        );
        assert!(validate_solution(&solution, &interval, &config).is_empty());

        interval.historical.constraints.insert(
            "N>>BW01_CAP".into(),
            crate::market::HistoricalConstraintState {
                marginal_value: MoneyPerMegaWattHour(-10.0),
                binding: true,
            },
        );
        let found = validate_solution(&solution, &interval, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].field,
            DiscrepancyField::ConstraintMarginal {
                id: "N>>BW01_CAP".into()
            }
        );
        assert_approx_eq!(f64, found[0].computed, -76.0, epsilon = 1e-6);
    }

    #[test]
    fn test_price_mode_disagreement_is_reported() {
        let mut dual = PriceSet::default();
        dual.insert(
            "NSW1".into(),
            PricedService::Energy,
            MoneyPerMegaWattHour(10.0),
        );
        let mut finite_difference = PriceSet::default();
        finite_difference.insert(
            "NSW1".into(),
            PricedService::Energy,
            MoneyPerMegaWattHour(10.5),
        );

        let found = compare_price_modes(&dual, &finite_difference, MoneyPerMegaWattHour(0.01));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].region, RegionID::from("NSW1"));
        assert_eq!(found[0].service, PricedService::Energy);
        assert_approx_eq!(f64, found[0].dual.value(), 10.0);
        assert_approx_eq!(f64, found[0].finite_difference.value(), 10.5);

        // a looser tolerance absorbs the difference
        assert!(compare_price_modes(&dual, &finite_difference, MoneyPerMegaWattHour(1.0)).is_empty());
    }
}
