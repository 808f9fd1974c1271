//! Market regions.
//!
//! A region is a pricing zone with its own reference node. Each interval it carries a
//! demand forecast that the energy balance must meet; the shadow price of that balance is
//! the region's energy spot price.
use crate::id::{define_id_getter, RegionID};
use crate::units::MegaWatts;
use indexmap::IndexMap;

/// A map of regions, keyed by region ID
pub type RegionMap = IndexMap<RegionID, Region>;

/// A pricing region
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    /// A unique identifier for a region (e.g. "NSW1")
    pub id: RegionID,
    /// Forecast demand at the end of the interval
    pub total_demand: MegaWatts,
}

define_id_getter! {Region, RegionID}

impl Region {
    /// Create a region with the given demand forecast
    pub fn new(id: &str, total_demand: MegaWatts) -> Self {
        Self {
            id: id.into(),
            total_demand,
        }
    }
}
