//! The dispatch interval: everything the engine needs to solve one run of the market.
//!
//! A [`DispatchInterval`] collects the entities assembled from market record files (units,
//! regions, interconnectors, generic constraints) together with the process being run and
//! any historical records used for fixing targets or validating results. It is immutable
//! during a solve; chaining intervals copies solved targets back in as initial conditions.
use crate::constraint::ConstraintMap;
use crate::id::{ConstraintID, InterconnectorID, RegionID, UnitID};
use crate::interconnector::InterconnectorMap;
use crate::output::DispatchLoadRecord;
use crate::region::RegionMap;
use crate::service::{FcasService, ProcessKind};
use crate::unit::UnitMap;
use crate::units::{MegaWatts, Minutes, MoneyPerMegaWattHour};
use anyhow::{ensure, Context, Result};
use indexmap::IndexMap;

/// The market price cap and floor in force for the trading day
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLimits {
    /// The maximum energy spot price
    pub market_price_cap: MoneyPerMegaWattHour,
    /// The minimum (most negative) energy spot price
    pub market_price_floor: MoneyPerMegaWattHour,
}

/// A unit's dispatch as recorded by the historical market run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoricalUnitDispatch {
    /// The historical energy target
    pub total_cleared: MegaWatts,
    /// The historical FCAS targets, keyed by service
    pub fcas_cleared: IndexMap<FcasService, MegaWatts>,
}

/// A region's prices as recorded by the historical market run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoricalRegionPrice {
    /// The historical energy spot price
    pub energy: MoneyPerMegaWattHour,
    /// The historical FCAS prices, keyed by service
    pub fcas: IndexMap<FcasService, MoneyPerMegaWattHour>,
}

/// A generic constraint's outcome as recorded by the historical market run
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalConstraintState {
    /// The historical marginal value of the constraint
    pub marginal_value: MoneyPerMegaWattHour,
    /// Whether the constraint bound in the historical run
    pub binding: bool,
}

/// Historical market outcomes for the interval, used for target fixing and validation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoricalRecords {
    /// Unit dispatch outcomes, keyed by unit ID
    pub unit_dispatch: IndexMap<UnitID, HistoricalUnitDispatch>,
    /// Regional prices, keyed by region ID
    pub region_prices: IndexMap<RegionID, HistoricalRegionPrice>,
    /// Generic constraint outcomes, keyed by constraint ID
    pub constraints: IndexMap<ConstraintID, HistoricalConstraintState>,
    /// Interconnector flows, keyed by interconnector ID
    pub interconnector_flows: IndexMap<InterconnectorID, MegaWatts>,
}

impl HistoricalRecords {
    /// Whether any historical records are present
    pub fn is_empty(&self) -> bool {
        self.unit_dispatch.is_empty()
            && self.region_prices.is_empty()
            && self.constraints.is_empty()
            && self.interconnector_flows.is_empty()
    }
}

/// All inputs for one dispatch interval
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchInterval {
    /// The market process this interval is solved for
    pub process: ProcessKind,
    /// The length of the interval
    pub interval_minutes: Minutes,
    /// The units participating this interval
    pub units: UnitMap,
    /// The pricing regions
    pub regions: RegionMap,
    /// The interconnectors between regions
    pub interconnectors: InterconnectorMap,
    /// The generic constraints defined for this interval
    pub generic_constraints: ConstraintMap,
    /// The market price cap and floor, when known
    pub price_limits: Option<PriceLimits>,
    /// Historical outcomes for this interval, when loaded
    pub historical: HistoricalRecords,
}

impl DispatchInterval {
    /// Create an empty interval for the given process, with the process's standard length
    pub fn new(process: ProcessKind) -> Self {
        let interval_minutes = match process {
            ProcessKind::Dispatch | ProcessKind::FiveMinuteForecast => Minutes(5.0),
            ProcessKind::PreDispatch => Minutes(30.0),
        };
        Self {
            process,
            interval_minutes,
            units: UnitMap::new(),
            regions: RegionMap::new(),
            interconnectors: InterconnectorMap::new(),
            generic_constraints: ConstraintMap::new(),
            price_limits: None,
            historical: HistoricalRecords::default(),
        }
    }

    /// Check cross-entity references before solving
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.interval_minutes > Minutes(0.0),
            "Interval length must be positive"
        );
        for unit in self.units.values() {
            ensure!(
                self.regions.contains_key(&unit.region_id),
                "Unit {} references unknown region {}",
                unit.id,
                unit.region_id
            );
            // offer prices are divided by the loss factor when referred to the region node
            ensure!(
                unit.loss_factor > crate::units::Dimensionless(0.0),
                "Unit {} must have a positive transmission loss factor",
                unit.id
            );
        }
        for ic in self.interconnectors.values() {
            for region in [&ic.from_region, &ic.to_region] {
                ensure!(
                    self.regions.contains_key(region),
                    "Interconnector {} references unknown region {region}",
                    ic.id
                );
            }
            for link in &ic.links {
                let joins_same_regions = (link.from_region == ic.from_region
                    && link.to_region == ic.to_region)
                    || (link.from_region == ic.to_region && link.to_region == ic.from_region);
                ensure!(
                    joins_same_regions,
                    "Link {} must join the same regions as interconnector {}",
                    link.id,
                    ic.id
                );
                // link offer prices are divided by the to-region factor and both factors
                // scale the energy drawn and delivered in the balance rows
                for factor in [link.from_region_loss_factor, link.to_region_loss_factor] {
                    ensure!(
                        factor > crate::units::Dimensionless(0.0),
                        "Link {} must have positive transmission loss factors",
                        link.id
                    );
                }
            }
        }
        Ok(())
    }

    /// Seed this interval's initial conditions from a previous interval's dispatch records.
    ///
    /// Units named in the records have their telemetered output replaced by the solved
    /// target and their daily energy accumulator advanced by the energy delivered while
    /// ramping to it.
    pub fn apply_initial_conditions(&mut self, records: &[DispatchLoadRecord]) -> Result<()> {
        for record in records {
            let unit = self
                .units
                .get_mut(record.unit_id.as_str())
                .with_context(|| {
                    format!("Dispatch record for unknown unit {}", record.unit_id)
                })?;
            let target = MegaWatts(record.total_cleared);
            // energy while ramping linearly from the old initial point to the new target
            let average = (unit.initial_mw + target) * crate::units::Dimensionless(0.5);
            unit.energy_today = unit.energy_today + average.energy_over(self.interval_minutes);
            unit.initial_mw = target;
        }
        Ok(())
    }
}
