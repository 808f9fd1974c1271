//! FCAS trapezium scaling and enablement classification.
//!
//! Before an FCAS offer reaches the problem builders it is adjusted for what the unit can
//! physically deliver this interval: the control system's enablement window and achievable
//! ramp (for regulation services) and the intermittent generation forecast (for all
//! services). Only then is the offer classified as available, unavailable or stranded. The
//! classification therefore reflects the scaled trapezium, not the offered one.
use crate::id::UnitID;
use crate::service::{FcasDirection, FcasService, ProcessKind};
use crate::unit::{FcasBid, Unit};
use crate::units::{MegaWatts, MegaWattsPerMinute, Minutes};
use indexmap::IndexMap;

/// Whether a unit can deliver an FCAS service this interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnablementStatus {
    /// The unit cannot deliver the service and receives no FCAS variables
    Unavailable,
    /// The unit can deliver the service subject to its trapezium
    Available,
    /// The unit's energy dispatch sits outside the enablement window, so its FCAS target is
    /// fixed to zero while its energy dispatch is left free
    Stranded,
}

impl EnablementStatus {
    /// The status code used in market record files
    pub fn as_number(&self) -> u8 {
        match self {
            EnablementStatus::Unavailable => 0,
            EnablementStatus::Available => 1,
            EnablementStatus::Stranded => 4,
        }
    }
}

/// An FCAS offer after scaling, together with its enablement classification
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledFcas {
    /// The offer with its trapezium adjusted for telemetry
    pub bid: FcasBid,
    /// The enablement classification of the scaled offer
    pub status: EnablementStatus,
}

/// Scaled FCAS offers for every (unit, service) pair that made an offer
pub type FcasStatusMap = IndexMap<(UnitID, FcasService), ScaledFcas>;

/// Scale and classify every FCAS offer in the unit set
pub fn prepare_all<'a>(
    units: impl Iterator<Item = &'a Unit>,
    process: ProcessKind,
    interval: Minutes,
) -> FcasStatusMap {
    let mut map = FcasStatusMap::new();
    for unit in units {
        for (service, bid) in &unit.fcas_bids {
            let scaled = prepare(unit, *service, bid, process, interval);
            map.insert((unit.id.clone(), *service), scaled);
        }
    }
    map
}

/// Scale one FCAS offer for the unit's telemetry and classify the result
pub fn prepare(
    unit: &Unit,
    service: FcasService,
    bid: &FcasBid,
    process: ProcessKind,
    interval: Minutes,
) -> ScaledFcas {
    let mut bid = bid.clone();
    if service.is_regulation() {
        scale_enablement_window(&mut bid, unit.agc_lower_limit, unit.agc_upper_limit);
        let agc_rate = match service.direction {
            FcasDirection::Raise => unit.agc_ramp_up,
            FcasDirection::Lower => unit.agc_ramp_down,
        };
        scale_agc_ramp(&mut bid, agc_rate, interval);
    }
    if let Some(forecast) = unit.forecast_mw {
        scale_forecast_ceiling(&mut bid, forecast);
    }
    clamp_breakpoints(&mut bid);

    let status = classify(unit, service, &bid, process);
    ScaledFcas { bid, status }
}

/// Tighten the enablement limits to the control system's window, shifting the adjacent
/// breakpoint by the same amount so the slope is preserved
fn scale_enablement_window(
    bid: &mut FcasBid,
    agc_lower: Option<MegaWatts>,
    agc_upper: Option<MegaWatts>,
) {
    if let Some(lower) = agc_lower {
        if lower > bid.enablement_min {
            let shift = lower - bid.enablement_min;
            bid.enablement_min = lower;
            bid.low_breakpoint = bid.low_breakpoint + shift;
        }
    }
    if let Some(upper) = agc_upper {
        if upper < bid.enablement_max {
            let shift = bid.enablement_max - upper;
            bid.enablement_max = upper;
            bid.high_breakpoint = bid.high_breakpoint - shift;
        }
    }
}

/// Cap the maximum availability at what the control system can ramp within the interval,
/// moving the breakpoints inward along the existing slopes
fn scale_agc_ramp(bid: &mut FcasBid, agc_rate: Option<MegaWattsPerMinute>, interval: Minutes) {
    let Some(rate) = agc_rate else {
        return;
    };
    let cap = (rate * interval).max(MegaWatts(0.0));
    if cap >= bid.max_avail {
        return;
    }
    let lower_slope = bid.lower_slope_coeff();
    let upper_slope = bid.upper_slope_coeff();
    bid.max_avail = cap;
    bid.low_breakpoint = bid.enablement_min + lower_slope * cap;
    bid.high_breakpoint = bid.enablement_max - upper_slope * cap;
}

/// Pull the top of the trapezium down to the intermittent forecast, shifting the high
/// breakpoint with it
fn scale_forecast_ceiling(bid: &mut FcasBid, forecast: MegaWatts) {
    if forecast >= bid.enablement_max {
        return;
    }
    let shift = bid.enablement_max - forecast;
    bid.enablement_max = forecast;
    bid.high_breakpoint = bid.high_breakpoint - shift;
}

/// Restore breakpoint ordering after scaling. A collapsed window (enablement limits
/// crossed) is left as-is and picked up by classification.
fn clamp_breakpoints(bid: &mut FcasBid) {
    if bid.enablement_max < bid.enablement_min {
        return;
    }
    bid.low_breakpoint = bid.low_breakpoint.max(bid.enablement_min).min(bid.enablement_max);
    bid.high_breakpoint = bid.high_breakpoint.max(bid.low_breakpoint).min(bid.enablement_max);
}

fn classify(
    unit: &Unit,
    service: FcasService,
    bid: &FcasBid,
    process: ProcessKind,
) -> EnablementStatus {
    // Regulation requires the unit to be on control; only real-time dispatch sees live AGC
    // status, so the check is skipped for forecast processes.
    if service.is_regulation() && process == ProcessKind::Dispatch && !unit.agc_status {
        return EnablementStatus::Unavailable;
    }
    if bid.max_avail <= MegaWatts(0.0)
        || bid.band_sum() <= MegaWatts(0.0)
        || bid.enablement_max < MegaWatts(0.0)
        || bid.enablement_max < bid.enablement_min
    {
        return EnablementStatus::Unavailable;
    }
    if unit.energy_availability() < bid.enablement_min {
        return EnablementStatus::Unavailable;
    }
    if unit.initial_mw < bid.enablement_min || unit.initial_mw > bid.enablement_max {
        return EnablementStatus::Stranded;
    }
    EnablementStatus::Available
}
