//! Fixtures for tests

use crate::market::DispatchInterval;
use crate::region::Region;
use crate::service::ProcessKind;
use crate::unit::{BandOffer, DispatchRole, EnergyBid, Unit};
use crate::units::MegaWatts;
use rstest::fixture;

/// Assert that an error with the given message occurs
macro_rules! assert_error {
    ($result:expr, $msg:expr) => {
        assert_eq!(
            $result.unwrap_err().chain().next().unwrap().to_string(),
            $msg
        );
    };
}
pub(crate) use assert_error;

/// A scheduled generator with a single-band energy offer
pub fn generator(id: &str, region: &str, price: f64, avail: f64) -> Unit {
    let mut unit = Unit::new(id, region, DispatchRole::Generator);
    unit.energy_bid =
        Some(EnergyBid::new(vec![BandOffer::new(price, avail)], MegaWatts(avail)).unwrap());
    unit
}

/// One region at 80 MW demand served by a single 24 $/MWh generator
#[fixture]
pub fn single_region_interval() -> DispatchInterval {
    let mut interval = DispatchInterval::new(ProcessKind::Dispatch);
    interval
        .regions
        .insert("NSW1".into(), Region::new("NSW1", MegaWatts(80.0)));
    let unit = generator("BW01", "NSW1", 24.0, 200.0);
    interval.units.insert(unit.id.clone(), unit);
    interval
}
