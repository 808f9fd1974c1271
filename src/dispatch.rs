//! Assembly and solution of single-interval dispatch problems.
//!
//! [`DispatchRun`] turns a [`DispatchInterval`] into an optimisation problem in a fixed
//! order: each unit's energy offer, then its FCAS offers, then the network, then the
//! regional energy balances and FCAS totals, and finally the generic constraints, which
//! resolve their terms against everything registered before them. The solved problem
//! comes back as a [`DispatchSolution`] carrying targets, prices and violations.
use crate::config::DispatchConfig;
use crate::fcas::{EnablementStatus, FcasStatusMap};
use crate::id::ConstraintID;
use crate::market::DispatchInterval;
use crate::output::write_infeasibility_report;
use crate::service::{FcasService, PricedService};
use crate::units::{MegaWatts, Money, MoneyPerMegaWattHour};
use anyhow::{bail, Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};

pub mod fcas;
pub mod generic;
pub mod network;
pub mod prices;
pub mod problem;
pub mod unit_energy;

use fcas::{add_unit_fcas, RegionalFcasTerms};
use generic::add_generic_constraint;
use network::add_interconnector;
use prices::{extract_prices, PriceSet};
use problem::{ConstraintKey, DispatchProblem, RowBounds, SlackSide, Solution, VariableKey};
use unit_energy::{add_unit_energy, BalanceTerms};

/// Slack values below this threshold are solver noise, not violations
const VIOLATION_TOLERANCE: f64 = 1e-6;

/// A single-interval dispatch run, ready to build and solve
pub struct DispatchRun<'a> {
    interval: &'a DispatchInterval,
    config: &'a DispatchConfig,
    diagnostics_dir: Option<PathBuf>,
}

impl<'a> DispatchRun<'a> {
    /// Create a run over the given interval inputs
    pub fn new(interval: &'a DispatchInterval, config: &'a DispatchConfig) -> Self {
        Self {
            interval,
            config,
            diagnostics_dir: None,
        }
    }

    /// Write an infeasibility report to this directory if the problem cannot be solved
    pub fn with_diagnostics_dir(mut self, dir: &Path) -> Self {
        self.diagnostics_dir = Some(dir.to_path_buf());
        self
    }

    /// Assemble the optimisation problem without solving it
    pub fn build(&self) -> Result<BuiltProblem> {
        self.interval
            .validate()
            .context("Dispatch inputs failed validation")?;
        let interval = self.interval;
        let config = self.config;
        let mut problem = DispatchProblem::new(
            config.enforce_hard_constraints,
            config.penalty_weight.value(),
        );

        let fcas_status = if config.include_fcas {
            crate::fcas::prepare_all(
                interval.units.values(),
                interval.process,
                interval.interval_minutes,
            )
        } else {
            FcasStatusMap::new()
        };

        let mut balance = BalanceTerms::new();
        let mut regional_fcas = RegionalFcasTerms::new();
        for unit in interval.units.values() {
            let energy = add_unit_energy(
                &mut problem,
                unit,
                interval.interval_minutes,
                config,
                &interval.historical,
                &mut balance,
            );
            if config.include_fcas {
                add_unit_fcas(
                    &mut problem,
                    unit,
                    energy,
                    &fcas_status,
                    interval.interval_minutes,
                    config,
                    &mut regional_fcas,
                );
            }
        }
        for ic in interval.interconnectors.values() {
            add_interconnector(
                &mut problem,
                ic,
                interval.interval_minutes,
                config,
                &mut balance,
            );
        }

        for region in interval.regions.values() {
            let terms = balance.shift_remove(&region.id).unwrap_or_default();
            problem.add_soft_row(
                ConstraintKey::RegionBalance {
                    region: region.id.clone(),
                },
                RowBounds::Equality(region.total_demand.value()),
                terms,
                config.violation_prices.region_balance,
            );
        }

        if config.include_fcas {
            add_regional_fcas_totals(&mut problem, interval, regional_fcas);
        }

        let mut inactive_constraints = Vec::new();
        if config.include_generic_constraints {
            for constraint in interval.generic_constraints.values() {
                if !constraint.applies_to(interval.process) {
                    continue;
                }
                if constraint.references_fcas() && !config.include_fcas {
                    continue;
                }
                if !add_generic_constraint(&mut problem, constraint) {
                    inactive_constraints.push(constraint.id.clone());
                }
            }
        }

        Ok(BuiltProblem {
            problem,
            fcas_status,
            inactive_constraints,
        })
    }

    /// Build, solve and price the interval
    pub fn solve(&self) -> Result<DispatchSolution> {
        let BuiltProblem {
            problem,
            fcas_status,
            inactive_constraints,
        } = self.build()?;
        info!(
            "Dispatch problem has {} variables and {} rows",
            problem.num_variables(),
            problem.num_rows()
        );

        let solution = match problem.solve() {
            Ok(solution) => solution,
            Err(err) if err.is_infeasible() => {
                if let Some(dir) = &self.diagnostics_dir {
                    let conflict = problem.extract_iis().unwrap_or_default();
                    write_infeasibility_report(dir, &problem, &conflict)
                        .context("Writing the infeasibility report")?;
                    info!("Infeasibility report written to {}", dir.display());
                }
                bail!("The dispatch problem is infeasible: {err}");
            }
            Err(err) => bail!("Solving the dispatch problem failed: {err}"),
        };
        info!(
            "Dispatch solved with objective {:.2} $/h",
            solution.objective_value.value()
        );

        let prices = extract_prices(&problem, &solution, self.interval, self.config)?;
        let result = DispatchSolution {
            problem,
            solution,
            prices,
            fcas_status,
            inactive_constraints,
        };
        for violation in result.violations() {
            warn!(
                "Constraint {} violated: {} of {:.3} MW",
                violation.constraint,
                violation.side,
                violation.amount.value()
            );
        }
        Ok(result)
    }
}

/// Register the per-region service totals and tie each to its units' targets.
///
/// The totals exist for every region and service, even where no unit offers the
/// service, so requirement constraints can always find them.
fn add_regional_fcas_totals(
    problem: &mut DispatchProblem,
    interval: &DispatchInterval,
    mut regional_fcas: RegionalFcasTerms,
) {
    for region in interval.regions.values() {
        for service in FcasService::iter() {
            let total = problem.add_variable(
                VariableKey::RegionalFcas {
                    region: region.id.clone(),
                    service,
                },
                0.0,
                0.0,
                f64::INFINITY,
            );
            let mut terms = vec![(total, 1.0)];
            if let Some(unit_terms) = regional_fcas.shift_remove(&(region.id.clone(), service)) {
                terms.extend(unit_terms.into_iter().map(|(var, coeff)| (var, -coeff)));
            }
            problem.add_row(
                ConstraintKey::RegionalFcasSum {
                    region: region.id.clone(),
                    service,
                },
                RowBounds::Equality(0.0),
                terms,
            );
        }
    }
}

/// An assembled dispatch problem with its scaling and activation byproducts
pub struct BuiltProblem {
    /// The optimisation problem, ready to solve
    pub problem: DispatchProblem,
    /// Every FCAS offer's scaled trapezium and classification
    pub fcas_status: FcasStatusMap,
    /// Generic constraints dropped because they reference unknown entities
    pub inactive_constraints: Vec<ConstraintID>,
}

/// One violated soft constraint in a solution
#[derive(Debug, Clone)]
pub struct Violation {
    /// The violated constraint
    pub constraint: ConstraintKey,
    /// Which bound was crossed
    pub side: SlackSide,
    /// The magnitude of the violation
    pub amount: MegaWatts,
}

/// A solved dispatch interval
#[derive(Debug)]
pub struct DispatchSolution {
    problem: DispatchProblem,
    solution: Solution,
    prices: PriceSet,
    fcas_status: FcasStatusMap,
    inactive_constraints: Vec<ConstraintID>,
}

impl DispatchSolution {
    /// The objective value: offered cost of the dispatch plus any violation penalties
    pub fn objective(&self) -> Money {
        self.solution.objective_value
    }

    /// A unit's cleared energy target, zero for unknown units
    pub fn total_cleared(&self, unit: &str) -> MegaWatts {
        self.variable_value(&VariableKey::TotalCleared { unit: unit.into() })
    }

    /// A unit's cleared FCAS target, zero where no target was dispatched
    pub fn fcas_cleared(&self, unit: &str, service: FcasService) -> MegaWatts {
        self.variable_value(&VariableKey::FcasTarget {
            unit: unit.into(),
            service,
        })
    }

    /// The enablement classification of a unit's offer for a service
    pub fn fcas_status(&self, unit: &str, service: FcasService) -> EnablementStatus {
        self.fcas_status
            .get(&(unit.into(), service))
            .map_or(EnablementStatus::Unavailable, |scaled| scaled.status)
    }

    /// The signed flow on an interconnector, zero for unknown interconnectors
    pub fn interconnector_flow(&self, interconnector: &str) -> MegaWatts {
        self.variable_value(&VariableKey::InterconnectorFlow {
            interconnector: interconnector.into(),
        })
    }

    /// Total losses on an interconnector, zero when losses were not modelled
    pub fn interconnector_losses(&self, interconnector: &str) -> MegaWatts {
        self.variable_value(&VariableKey::Loss {
            interconnector: interconnector.into(),
        })
    }

    /// A region's cleared total for an FCAS service
    pub fn regional_fcas(&self, region: &str, service: FcasService) -> MegaWatts {
        self.variable_value(&VariableKey::RegionalFcas {
            region: region.into(),
            service,
        })
    }

    /// The cleared prices for every region and service
    pub fn prices(&self) -> &PriceSet {
        &self.prices
    }

    /// The price for one region and service, if it was priced
    pub fn price(&self, region: &str, service: PricedService) -> Option<MoneyPerMegaWattHour> {
        self.prices.get(region, service)
    }

    /// The shadow price of a generic constraint, when duals are available
    pub fn constraint_marginal(&self, id: &str) -> Option<MoneyPerMegaWattHour> {
        let row = self.problem.row(&ConstraintKey::Generic { id: id.into() })?;
        self.solution.dual(row).map(MoneyPerMegaWattHour)
    }

    /// Whether a generic constraint was added to the problem
    pub fn constraint_active(&self, id: &str) -> bool {
        self.problem
            .row(&ConstraintKey::Generic { id: id.into() })
            .is_some()
    }

    /// Generic constraints dropped because they reference unknown entities
    pub fn inactive_constraints(&self) -> &[ConstraintID] {
        &self.inactive_constraints
    }

    /// Every violated soft constraint, with the magnitude of its violation
    pub fn violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        for (id, key) in self.problem.iter_variables() {
            let VariableKey::Slack { row, side } = key else {
                continue;
            };
            let amount = self.solution.value(id);
            if amount > VIOLATION_TOLERANCE {
                violations.push(Violation {
                    constraint: (**row).clone(),
                    side: *side,
                    amount: MegaWatts(amount),
                });
            }
        }
        violations
    }

    /// The assembled problem, for reporting
    pub fn problem(&self) -> &DispatchProblem {
        &self.problem
    }

    /// The raw solver result, for reporting
    pub fn raw(&self) -> &Solution {
        &self.solution
    }

    fn variable_value(&self, key: &VariableKey) -> MegaWatts {
        self.problem
            .variable(key)
            .map(|id| MegaWatts(self.solution.value(id)))
            .unwrap_or(MegaWatts(0.0))
    }
}
