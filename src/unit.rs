//! The dispatchable unit model.
//!
//! A unit is anything with a DUID that submits offers: a scheduled generator, a
//! semi-scheduled generator or a scheduled load. Each interval a unit carries at most one
//! energy bid, up to eight FCAS bids and the telemetry snapshot (initial output, AGC state,
//! ramp capability, forecast) used to constrain its dispatch.
use crate::id::{define_id_getter, RegionID, UnitID};
use crate::service::FcasService;
use crate::units::{Dimensionless, MegaWattHours, MegaWatts, MegaWattsPerMinute, Minutes, MoneyPerMegaWattHour};
use anyhow::{ensure, Result};
use indexmap::IndexMap;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};

/// The maximum number of price bands in an offer
pub const MAX_BANDS: usize = 10;

/// A map of units, keyed by unit ID
pub type UnitMap = IndexMap<UnitID, Unit>;

/// Whether a unit is dispatched as a generator or as a load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeLabeledStringEnum, DeserializeLabeledStringEnum)]
pub enum DispatchRole {
    /// Injects energy at its connection point
    #[string = "GENERATOR"]
    Generator,
    /// Withdraws energy at its connection point
    #[string = "LOAD"]
    Load,
}

/// One price band of an offer: a price and the volume offered at that price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandOffer {
    /// The offer price
    pub price: MoneyPerMegaWattHour,
    /// The volume available in this band
    pub avail: MegaWatts,
}

impl BandOffer {
    /// Create a band offer
    pub fn new(price: f64, avail: f64) -> Self {
        Self {
            price: MoneyPerMegaWattHour(price),
            avail: MegaWatts(avail),
        }
    }
}

/// An energy offer for a single unit and interval.
///
/// Prices are fixed for the trading day; availabilities, ramp rates and the fixed-load flag
/// are rebid per interval.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyBid {
    /// Up to ten price bands, in band order
    pub bands: Vec<BandOffer>,
    /// The declared maximum availability
    pub max_avail: MegaWatts,
    /// If set, the unit is inflexible and must be dispatched to exactly this level
    pub fixed_load: Option<MegaWatts>,
    /// The offered ramp up rate
    pub ramp_up_rate: Option<MegaWattsPerMinute>,
    /// The offered ramp down rate
    pub ramp_down_rate: Option<MegaWattsPerMinute>,
    /// Remaining energy the unit may deliver today
    pub daily_energy_limit: Option<MegaWattHours>,
}

impl EnergyBid {
    /// Create an energy bid, checking band-level invariants
    pub fn new(bands: Vec<BandOffer>, max_avail: MegaWatts) -> Result<Self> {
        check_bands(&bands, max_avail)?;
        Ok(Self {
            bands,
            max_avail,
            fixed_load: None,
            ramp_up_rate: None,
            ramp_down_rate: None,
            daily_energy_limit: None,
        })
    }

    /// The total volume offered across all bands
    pub fn band_sum(&self) -> MegaWatts {
        band_sum(&self.bands)
    }
}

/// An FCAS offer for a single unit, service and interval.
///
/// The four trapezium parameters describe how much of the service the unit can deliver as a
/// function of its energy dispatch: nothing outside `[enablement_min, enablement_max]`, the
/// full `max_avail` between the breakpoints and a linear taper on either side.
#[derive(Debug, Clone, PartialEq)]
pub struct FcasBid {
    /// Up to ten price bands, in band order
    pub bands: Vec<BandOffer>,
    /// The maximum response available, at the top of the trapezium
    pub max_avail: MegaWatts,
    /// Energy dispatch level below which the service cannot be delivered
    pub enablement_min: MegaWatts,
    /// Energy dispatch level at which the full response first becomes available
    pub low_breakpoint: MegaWatts,
    /// Energy dispatch level above which the response starts to taper off
    pub high_breakpoint: MegaWatts,
    /// Energy dispatch level above which the service cannot be delivered
    pub enablement_max: MegaWatts,
}

impl FcasBid {
    /// Create an FCAS bid, checking band and trapezium invariants
    pub fn new(
        bands: Vec<BandOffer>,
        max_avail: MegaWatts,
        enablement_min: MegaWatts,
        low_breakpoint: MegaWatts,
        high_breakpoint: MegaWatts,
        enablement_max: MegaWatts,
    ) -> Result<Self> {
        check_bands(&bands, max_avail)?;
        ensure!(
            enablement_min <= low_breakpoint
                && low_breakpoint <= high_breakpoint
                && high_breakpoint <= enablement_max,
            "FCAS trapezium parameters out of order: {} <= {} <= {} <= {} does not hold",
            enablement_min.value(),
            low_breakpoint.value(),
            high_breakpoint.value(),
            enablement_max.value()
        );
        Ok(Self {
            bands,
            max_avail,
            enablement_min,
            low_breakpoint,
            high_breakpoint,
            enablement_max,
        })
    }

    /// The total volume offered across all bands
    pub fn band_sum(&self) -> MegaWatts {
        band_sum(&self.bands)
    }

    /// Units of FCAS response given up per unit of energy dispatch below the low breakpoint.
    ///
    /// Zero when `max_avail` is zero, in which case the trapezium has no left slope.
    pub fn lower_slope_coeff(&self) -> Dimensionless {
        if self.max_avail <= MegaWatts(0.0) {
            return Dimensionless(0.0);
        }
        (self.low_breakpoint - self.enablement_min) / self.max_avail
    }

    /// Units of FCAS response given up per unit of energy dispatch above the high breakpoint.
    pub fn upper_slope_coeff(&self) -> Dimensionless {
        if self.max_avail <= MegaWatts(0.0) {
            return Dimensionless(0.0);
        }
        (self.enablement_max - self.high_breakpoint) / self.max_avail
    }
}

fn check_bands(bands: &[BandOffer], max_avail: MegaWatts) -> Result<()> {
    ensure!(
        bands.len() <= MAX_BANDS,
        "An offer may have at most {MAX_BANDS} price bands ({} given)",
        bands.len()
    );
    ensure!(
        bands.iter().all(|band| band.avail >= MegaWatts(0.0)),
        "Band availabilities must be non-negative"
    );
    ensure!(
        band_sum(bands) >= max_avail,
        "Band availabilities must sum to at least the maximum availability of {} MW",
        max_avail.value()
    );
    Ok(())
}

fn band_sum(bands: &[BandOffer]) -> MegaWatts {
    bands
        .iter()
        .fold(MegaWatts(0.0), |total, band| total + band.avail)
}

/// The dispatch mode of a fast-start unit.
///
/// Fast-start units move through a fixed inflexibility profile after being committed: a
/// synchronising period with no output, a forced ramp to minimum loading, a dwell at minimum
/// loading and a protected ramp back down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastStartMode {
    /// The profile is not active; the unit dispatches freely
    Inactive,
    /// Mode 1: synchronising, output held at zero
    Synchronising,
    /// Mode 2: ramping to minimum loading along the committed profile
    RampToMinLoading,
    /// Mode 3: holding at or above minimum loading
    AtMinLoading,
    /// Mode 4: ramping down, protected from falling faster than the profile
    RampDown,
}

impl FastStartMode {
    /// The mode number used in market record files (0 for inactive)
    pub fn as_number(&self) -> u8 {
        match self {
            FastStartMode::Inactive => 0,
            FastStartMode::Synchronising => 1,
            FastStartMode::RampToMinLoading => 2,
            FastStartMode::AtMinLoading => 3,
            FastStartMode::RampDown => 4,
        }
    }

    /// Parse a mode number from a market record file
    pub fn from_number(number: u8) -> Result<Self> {
        match number {
            0 => Ok(FastStartMode::Inactive),
            1 => Ok(FastStartMode::Synchronising),
            2 => Ok(FastStartMode::RampToMinLoading),
            3 => Ok(FastStartMode::AtMinLoading),
            4 => Ok(FastStartMode::RampDown),
            _ => anyhow::bail!("Invalid fast-start mode number {number}"),
        }
    }
}

/// The constraint a fast-start profile places on a unit's cleared energy this interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FastStartRequirement {
    /// Cleared energy is pinned to this level
    Fixed(MegaWatts),
    /// Cleared energy may not fall below this level
    AtLeast(MegaWatts),
}

/// The fast-start inflexibility profile of a unit, as at the start of the interval
#[derive(Debug, Clone, PartialEq)]
pub struct FastStartProfile {
    /// Minimum stable loading once synchronised
    pub min_loading: MegaWatts,
    /// Length of the synchronising period (mode 1)
    pub t1: Minutes,
    /// Length of the ramp to minimum loading (mode 2)
    pub t2: Minutes,
    /// Minimum dwell at minimum loading (mode 3)
    pub t3: Minutes,
    /// Length of the protected ramp down (mode 4)
    pub t4: Minutes,
    /// The mode the unit is in at the start of the interval
    pub mode: FastStartMode,
    /// Time already spent in the current mode
    pub time_in_mode: Minutes,
}

impl FastStartProfile {
    /// The requirement the profile places on cleared energy at the end of this interval.
    ///
    /// Returns `None` when the profile is inactive. Elapsed mode time is measured at the end
    /// of the interval and clamped to the mode length, so a unit partway through a mode
    /// boundary is held at the boundary value rather than projected past it.
    pub fn requirement(&self, interval: Minutes) -> Option<FastStartRequirement> {
        let elapsed = self.time_in_mode + interval;
        match self.mode {
            FastStartMode::Inactive => None,
            FastStartMode::Synchronising => {
                if elapsed <= self.t1 {
                    Some(FastStartRequirement::Fixed(MegaWatts(0.0)))
                } else {
                    // Crossed into mode 2 during the interval
                    let into_mode2 = elapsed - self.t1;
                    Some(FastStartRequirement::Fixed(
                        self.min_loading * ramp_fraction(into_mode2, self.t2),
                    ))
                }
            }
            FastStartMode::RampToMinLoading => Some(FastStartRequirement::Fixed(
                self.min_loading * ramp_fraction(elapsed, self.t2),
            )),
            FastStartMode::AtMinLoading => {
                Some(FastStartRequirement::AtLeast(self.min_loading))
            }
            FastStartMode::RampDown => {
                let fraction = Dimensionless(1.0) - ramp_fraction(elapsed, self.t4);
                Some(FastStartRequirement::AtLeast(
                    (self.min_loading * fraction).max(MegaWatts(0.0)),
                ))
            }
        }
    }
}

/// The fraction of a timed mode completed after `elapsed` minutes, clamped to [0, 1]
fn ramp_fraction(elapsed: Minutes, length: Minutes) -> Dimensionless {
    if length <= Minutes(0.0) {
        return Dimensionless(1.0);
    }
    Dimensionless((elapsed.value() / length.value()).clamp(0.0, 1.0))
}

/// A dispatchable unit: its registration data, telemetry and offers for one interval
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    /// The unit's DUID
    pub id: UnitID,
    /// The region the unit's connection point lies in
    pub region_id: RegionID,
    /// Whether the unit is dispatched as a generator or a load
    pub role: DispatchRole,
    /// Transmission loss factor referring offer prices to the regional reference node
    pub loss_factor: Dimensionless,
    /// The unit's energy offer, if it made one
    pub energy_bid: Option<EnergyBid>,
    /// The unit's FCAS offers, keyed by service
    pub fcas_bids: IndexMap<FcasService, FcasBid>,
    /// Telemetered output at the start of the interval
    pub initial_mw: MegaWatts,
    /// Telemetered ramp up capability
    pub ramp_up_rate: Option<MegaWattsPerMinute>,
    /// Telemetered ramp down capability
    pub ramp_down_rate: Option<MegaWattsPerMinute>,
    /// Whether the unit is under automatic generation control
    pub agc_status: bool,
    /// Lower limit of the control system's enablement window, for regulation services
    pub agc_lower_limit: Option<MegaWatts>,
    /// Upper limit of the control system's enablement window, for regulation services
    pub agc_upper_limit: Option<MegaWatts>,
    /// Ramp rate achievable under control-system direction, for regulation services
    pub agc_ramp_up: Option<MegaWattsPerMinute>,
    /// Ramp rate achievable under control-system direction, for regulation services
    pub agc_ramp_down: Option<MegaWattsPerMinute>,
    /// Unconstrained intermittent generation forecast; `None` for non-intermittent units
    pub forecast_mw: Option<MegaWatts>,
    /// Fast-start inflexibility profile, if the unit is fast-start capable
    pub fast_start: Option<FastStartProfile>,
    /// Energy already delivered today, counted against any daily energy limit
    pub energy_today: MegaWattHours,
}

define_id_getter! {Unit, UnitID}

impl Unit {
    /// Create a unit with no offers and default telemetry
    pub fn new(id: &str, region_id: &str, role: DispatchRole) -> Self {
        Self {
            id: id.into(),
            region_id: region_id.into(),
            role,
            loss_factor: Dimensionless(1.0),
            energy_bid: None,
            fcas_bids: IndexMap::new(),
            initial_mw: MegaWatts(0.0),
            ramp_up_rate: None,
            ramp_down_rate: None,
            agc_status: false,
            agc_lower_limit: None,
            agc_upper_limit: None,
            agc_ramp_up: None,
            agc_ramp_down: None,
            forecast_mw: None,
            fast_start: None,
            energy_today: MegaWattHours(0.0),
        }
    }

    /// The effective ramp up rate: the lesser of the offered and telemetered rates
    pub fn effective_ramp_up(&self) -> Option<MegaWattsPerMinute> {
        let offered = self.energy_bid.as_ref().and_then(|bid| bid.ramp_up_rate);
        min_rate(offered, self.ramp_up_rate)
    }

    /// The effective ramp down rate: the lesser of the offered and telemetered rates
    pub fn effective_ramp_down(&self) -> Option<MegaWattsPerMinute> {
        let offered = self.energy_bid.as_ref().and_then(|bid| bid.ramp_down_rate);
        min_rate(offered, self.ramp_down_rate)
    }

    /// How far above `initial_mw` the unit can be at the end of the interval.
    ///
    /// `None` means the unit declared no ramp rate in either its offer or telemetry and is
    /// not ramp constrained.
    pub fn ramp_up_headroom(&self, interval: Minutes) -> Option<MegaWatts> {
        self.effective_ramp_up().map(|rate| rate * interval)
    }

    /// How far below `initial_mw` the unit can be at the end of the interval
    pub fn ramp_down_headroom(&self, interval: Minutes) -> Option<MegaWatts> {
        self.effective_ramp_down().map(|rate| rate * interval)
    }

    /// The unit's offered energy availability, capped by the intermittent forecast.
    ///
    /// Units without an energy offer hold their telemetered output, so that output is their
    /// availability.
    pub fn energy_availability(&self) -> MegaWatts {
        match &self.energy_bid {
            Some(bid) => match self.forecast_mw {
                Some(forecast) => bid.max_avail.min(forecast),
                None => bid.max_avail,
            },
            None => self.initial_mw,
        }
    }
}

fn min_rate(
    a: Option<MegaWattsPerMinute>,
    b: Option<MegaWattsPerMinute>,
) -> Option<MegaWattsPerMinute> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use rstest::rstest;

    fn ten_band(avail: f64) -> Vec<BandOffer> {
        (0..10).map(|i| BandOffer::new(f64::from(i) * 50.0, avail)).collect()
    }

    #[test]
    fn test_energy_bid_band_count() {
        let bands = (0..11).map(|_| BandOffer::new(10.0, 5.0)).collect();
        assert!(EnergyBid::new(bands, MegaWatts(10.0)).is_err());
    }

    #[test]
    fn test_energy_bid_negative_avail() {
        let bands = vec![BandOffer::new(10.0, -5.0)];
        assert!(EnergyBid::new(bands, MegaWatts(0.0)).is_err());
    }

    #[test]
    fn test_energy_bid_band_sum_below_max_avail() {
        let bands = vec![BandOffer::new(10.0, 5.0)];
        assert!(EnergyBid::new(bands, MegaWatts(10.0)).is_err());
    }

    #[test]
    fn test_energy_bid_band_sum() {
        let bid = EnergyBid::new(ten_band(10.0), MegaWatts(100.0)).unwrap();
        assert_approx_eq!(f64, bid.band_sum().value(), 100.0);
    }

    #[test]
    fn test_fcas_trapezium_ordering() {
        let result = FcasBid::new(
            vec![BandOffer::new(1.0, 20.0)],
            MegaWatts(20.0),
            MegaWatts(30.0),
            MegaWatts(20.0),
            MegaWatts(80.0),
            MegaWatts(100.0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_slope_coefficients() {
        let bid = FcasBid::new(
            vec![BandOffer::new(1.0, 20.0)],
            MegaWatts(20.0),
            MegaWatts(20.0),
            MegaWatts(30.0),
            MegaWatts(80.0),
            MegaWatts(100.0),
        )
        .unwrap();
        // slope times max_avail recovers the breakpoint offsets
        assert_approx_eq!(
            f64,
            (bid.lower_slope_coeff() * bid.max_avail).value(),
            (bid.low_breakpoint - bid.enablement_min).value(),
            epsilon = 1e-6
        );
        assert_approx_eq!(
            f64,
            (bid.upper_slope_coeff() * bid.max_avail).value(),
            (bid.enablement_max - bid.high_breakpoint).value(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_slope_coefficients_zero_max_avail() {
        let bid = FcasBid {
            bands: vec![],
            max_avail: MegaWatts(0.0),
            enablement_min: MegaWatts(0.0),
            low_breakpoint: MegaWatts(10.0),
            high_breakpoint: MegaWatts(20.0),
            enablement_max: MegaWatts(30.0),
        };
        assert_eq!(bid.lower_slope_coeff(), Dimensionless(0.0));
        assert_eq!(bid.upper_slope_coeff(), Dimensionless(0.0));
    }

    fn profile(mode: FastStartMode, time_in_mode: f64) -> FastStartProfile {
        FastStartProfile {
            min_loading: MegaWatts(60.0),
            t1: Minutes(10.0),
            t2: Minutes(20.0),
            t3: Minutes(30.0),
            t4: Minutes(30.0),
            mode,
            time_in_mode: Minutes(time_in_mode),
        }
    }

    #[rstest]
    #[case(FastStartMode::Inactive, 0.0, None)]
    #[case(FastStartMode::Synchronising, 0.0, Some(FastStartRequirement::Fixed(MegaWatts(0.0))))]
    // 5 min into mode 2 at interval end: 60 * 5/20
    #[case(FastStartMode::RampToMinLoading, 0.0, Some(FastStartRequirement::Fixed(MegaWatts(15.0))))]
    #[case(FastStartMode::AtMinLoading, 10.0, Some(FastStartRequirement::AtLeast(MegaWatts(60.0))))]
    // 15 min into mode 4 at interval end: 60 * (1 - 15/30)
    #[case(FastStartMode::RampDown, 10.0, Some(FastStartRequirement::AtLeast(MegaWatts(30.0))))]
    fn test_fast_start_requirement(
        #[case] mode: FastStartMode,
        #[case] time_in_mode: f64,
        #[case] expected: Option<FastStartRequirement>,
    ) {
        let requirement = profile(mode, time_in_mode).requirement(Minutes(5.0));
        assert_eq!(requirement, expected);
    }

    #[test]
    fn test_fast_start_mode_boundary_crossing() {
        // 8 min into mode 1 with a 10 min sync period: the interval ends 3 min into mode 2
        let requirement = profile(FastStartMode::Synchronising, 8.0)
            .requirement(Minutes(5.0))
            .unwrap();
        assert_eq!(requirement, FastStartRequirement::Fixed(MegaWatts(9.0)));
    }

    #[test]
    fn test_fast_start_ramp_down_floor() {
        // Far past the end of mode 4 the floor cannot go negative
        let requirement = profile(FastStartMode::RampDown, 40.0)
            .requirement(Minutes(5.0))
            .unwrap();
        assert_eq!(requirement, FastStartRequirement::AtLeast(MegaWatts(0.0)));
    }

    #[test]
    fn test_effective_ramp_rates() {
        let mut unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        let mut bid = EnergyBid::new(ten_band(70.0), MegaWatts(660.0)).unwrap();
        bid.ramp_up_rate = Some(MegaWattsPerMinute(10.0));
        unit.energy_bid = Some(bid);
        unit.ramp_up_rate = Some(MegaWattsPerMinute(4.0));

        // telemetry is the tighter of the two
        assert_eq!(unit.effective_ramp_up(), Some(MegaWattsPerMinute(4.0)));
        assert_eq!(unit.ramp_up_headroom(Minutes(5.0)), Some(MegaWatts(20.0)));
        assert_eq!(unit.effective_ramp_down(), None);
    }

    #[test]
    fn test_energy_availability_forecast_cap() {
        let mut unit = Unit::new("WF1", "SA1", DispatchRole::Generator);
        unit.energy_bid = Some(EnergyBid::new(ten_band(12.0), MegaWatts(120.0)).unwrap());
        assert_eq!(unit.energy_availability(), MegaWatts(120.0));

        unit.forecast_mw = Some(MegaWatts(45.0));
        assert_eq!(unit.energy_availability(), MegaWatts(45.0));
    }

    #[test]
    fn test_fast_start_mode_numbers() {
        for number in 0..=4 {
            let mode = FastStartMode::from_number(number).unwrap();
            assert_eq!(mode.as_number(), number);
        }
        assert!(FastStartMode::from_number(5).is_err());
    }
}
