//! Regional price extraction from a solved interval.
//!
//! Each region is priced for energy and, when FCAS is co-optimised, for the eight FCAS
//! services. The energy price is the marginal cost of serving one more megawatt of the
//! region's demand; each FCAS price is the marginal cost of one more megawatt of the
//! regional requirement. Two extraction modes are supported: dual pricing reads the
//! prices straight from the LP row duals and requires a fully continuous formulation,
//! while re-solve pricing perturbs each balance or requirement by one megawatt and reads
//! the change in objective, which stays valid for mixed-integer formulations because the
//! discrete variables are first fixed at their solved values.
use super::problem::{ConstraintKey, DispatchProblem, Solution};
use crate::config::DispatchConfig;
use crate::id::RegionID;
use crate::market::{DispatchInterval, PriceLimits};
use crate::service::{FcasService, PricedService};
use crate::units::MoneyPerMegaWattHour;
use anyhow::{ensure, Context, Result};
use indexmap::IndexMap;

/// The cleared price for every region and priced service of an interval
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceSet {
    prices: IndexMap<(RegionID, PricedService), MoneyPerMegaWattHour>,
}

impl PriceSet {
    /// The price for one region and service, `None` when it was not priced
    pub fn get(&self, region: &str, service: PricedService) -> Option<MoneyPerMegaWattHour> {
        self.prices.get(&(region.into(), service)).copied()
    }

    /// Iterate over the prices, in region order with energy before FCAS
    pub fn iter(&self) -> impl Iterator<Item = (&RegionID, PricedService, MoneyPerMegaWattHour)> {
        self.prices
            .iter()
            .map(|((region, service), price)| (region, *service, *price))
    }

    pub(crate) fn insert(
        &mut self,
        region: RegionID,
        service: PricedService,
        price: MoneyPerMegaWattHour,
    ) {
        self.prices.insert((region, service), price);
    }

    /// Clamp every price into the trading range: energy between the market floor and cap,
    /// FCAS between zero and the cap
    fn clamp(&mut self, limits: &PriceLimits) {
        for ((_, service), price) in self.prices.iter_mut() {
            let floor = match service {
                PricedService::Energy => limits.market_price_floor,
                PricedService::Fcas(_) => MoneyPerMegaWattHour(0.0),
            };
            *price = (*price).max(floor).min(limits.market_price_cap);
        }
    }
}

/// Derive the regional prices for a solved dispatch problem.
///
/// The pricing mode is chosen by `config.use_dual_pricing`. FCAS prices are produced only
/// when FCAS is co-optimised. When the interval carries price limits, every price is
/// clamped into the allowed trading range afterwards.
pub fn extract_prices(
    problem: &DispatchProblem,
    solution: &Solution,
    interval: &DispatchInterval,
    config: &DispatchConfig,
) -> Result<PriceSet> {
    let mut prices = if config.use_dual_pricing {
        dual_prices(problem, solution, interval, config)?
    } else {
        resolve_prices(problem, solution, interval, config)?
    };
    if let Some(limits) = &interval.price_limits {
        prices.clamp(limits);
    }
    Ok(prices)
}

/// Read the prices from the row duals of the continuous solve
fn dual_prices(
    problem: &DispatchProblem,
    solution: &Solution,
    interval: &DispatchInterval,
    config: &DispatchConfig,
) -> Result<PriceSet> {
    ensure!(
        !problem.has_discrete(),
        "Dual pricing requires a continuous formulation, but the problem contains discrete \
         variables. Enable fix_network_flows or switch to re-solve pricing."
    );

    let mut prices = PriceSet::default();
    for region in interval.regions.keys() {
        let row = problem
            .row(&balance_key(region))
            .with_context(|| format!("No energy balance row exists for region {region}"))?;
        let dual = solution.dual(row).context("The solve reported no duals")?;
        prices.insert(
            region.clone(),
            PricedService::Energy,
            MoneyPerMegaWattHour(dual),
        );

        if !config.include_fcas {
            continue;
        }
        for service in FcasService::iter() {
            let row = problem
                .row(&fcas_sum_key(region, service))
                .with_context(|| format!("No FCAS total row exists for {region} {service}"))?;
            let dual = solution.dual(row).context("The solve reported no duals")?;
            // Raising this row's right hand side relaxes the regional requirement by a
            // megawatt, so the marginal cost of the requirement is the negated dual
            prices.insert(
                region.clone(),
                PricedService::Fcas(service),
                MoneyPerMegaWattHour(-dual),
            );
        }
    }
    Ok(prices)
}

/// Price by re-solving with each balance or requirement perturbed by one megawatt.
///
/// The perturbation is a single megawatt, so the objective change is already a price per
/// megawatt. Discrete variables are pinned to their solved values first and the reference
/// objective is taken from a re-solve of the pinned problem, so every difference is
/// between solves of the same continuous problem.
fn resolve_prices(
    problem: &DispatchProblem,
    solution: &Solution,
    interval: &DispatchInterval,
    config: &DispatchConfig,
) -> Result<PriceSet> {
    let mut perturbed = problem.clone();
    if perturbed.has_discrete() {
        perturbed.fix_discrete_from(solution);
    }
    let reference = perturbed
        .solve()
        .context("Re-solving the reference problem for pricing")?
        .objective_value;

    let mut prices = PriceSet::default();
    for region in interval.regions.keys() {
        let row = perturbed
            .row(&balance_key(region))
            .with_context(|| format!("No energy balance row exists for region {region}"))?;
        perturbed.shift_rhs(row, 1.0);
        let objective = perturbed
            .solve()
            .with_context(|| format!("Re-solving with an extra megawatt of demand in {region}"))?
            .objective_value;
        perturbed.shift_rhs(row, -1.0);
        prices.insert(
            region.clone(),
            PricedService::Energy,
            MoneyPerMegaWattHour((objective - reference).value()),
        );

        if !config.include_fcas {
            continue;
        }
        for service in FcasService::iter() {
            let row = perturbed
                .row(&fcas_sum_key(region, service))
                .with_context(|| format!("No FCAS total row exists for {region} {service}"))?;
            perturbed.shift_rhs(row, 1.0);
            let objective = perturbed
                .solve()
                .with_context(|| {
                    format!("Re-solving with an extra megawatt of {service} in {region}")
                })?
                .objective_value;
            perturbed.shift_rhs(row, -1.0);
            // The shift relaxes the requirement, so the price is the saving
            prices.insert(
                region.clone(),
                PricedService::Fcas(service),
                MoneyPerMegaWattHour((reference - objective).value()),
            );
        }
    }
    Ok(prices)
}

fn balance_key(region: &RegionID) -> ConstraintKey {
    ConstraintKey::RegionBalance {
        region: region.clone(),
    }
}

fn fcas_sum_key(region: &RegionID, service: FcasService) -> ConstraintKey {
    ConstraintKey::RegionalFcasSum {
        region: region.clone(),
        service,
    }
}
