//! Interconnectors between regions.
//!
//! A regulated interconnector is a single directed flow variable with capacity limits and,
//! optionally, a piecewise-linear loss model. A market network service provider (MNSP)
//! instead offers each direction of its link into the market with price bands, like a
//! unit; the two directions are mutually exclusive.
use crate::id::{define_id_getter, InterconnectorID, LinkID, RegionID};
use crate::unit::{BandOffer, MAX_BANDS};
use crate::units::{Dimensionless, MegaWatts, MegaWattsPerMinute};
use anyhow::{ensure, Result};
use indexmap::IndexMap;
use itertools::Itertools;

/// A map of interconnectors, keyed by interconnector ID
pub type InterconnectorMap = IndexMap<InterconnectorID, Interconnector>;

/// One breakpoint of a piecewise-linear loss curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossPoint {
    /// Interconnector flow at this breakpoint
    pub flow: MegaWatts,
    /// Total losses at this breakpoint
    pub loss: MegaWatts,
}

impl LossPoint {
    /// Create a loss breakpoint
    pub fn new(flow: f64, loss: f64) -> Self {
        Self {
            flow: MegaWatts(flow),
            loss: MegaWatts(loss),
        }
    }
}

/// A piecewise-linear loss model for a regulated interconnector.
///
/// Losses are a function of flow, described by breakpoints with strictly increasing flow
/// values. A fixed share of the losses is debited to the nominated `from` region's energy
/// balance and the remainder to the `to` region.
#[derive(Debug, Clone, PartialEq)]
pub struct LossModel {
    /// Breakpoints of the loss curve, in increasing flow order
    pub breakpoints: Vec<LossPoint>,
    /// The share of losses debited to the `from` region
    pub from_region_share: Dimensionless,
}

impl LossModel {
    /// Create a loss model, checking breakpoint ordering
    pub fn new(breakpoints: Vec<LossPoint>, from_region_share: Dimensionless) -> Result<Self> {
        ensure!(
            breakpoints.len() >= 2,
            "A loss model needs at least two breakpoints ({} given)",
            breakpoints.len()
        );
        ensure!(
            breakpoints
                .iter()
                .tuple_windows()
                .all(|(a, b)| a.flow < b.flow),
            "Loss model breakpoints must have strictly increasing flow values"
        );
        ensure!(
            (0.0..=1.0).contains(&from_region_share.value()),
            "The from-region loss share must be between 0 and 1"
        );
        Ok(Self {
            breakpoints,
            from_region_share,
        })
    }

    /// The number of linear segments between breakpoints
    pub fn num_segments(&self) -> usize {
        self.breakpoints.len() - 1
    }

    /// The flow range covered by the breakpoints
    pub fn flow_range(&self) -> (MegaWatts, MegaWatts) {
        // new() guarantees at least two breakpoints
        (
            self.breakpoints.first().map_or(MegaWatts(0.0), |p| p.flow),
            self.breakpoints.last().map_or(MegaWatts(0.0), |p| p.flow),
        )
    }

    /// Losses at the given flow, interpolated along the curve.
    ///
    /// Flows beyond the outermost breakpoints are extrapolated along the end segments.
    pub fn interpolate(&self, flow: MegaWatts) -> MegaWatts {
        let (slope, intercept) = self.segment_coefficients(flow);
        MegaWatts(slope * flow.value() + intercept)
    }

    /// The `(slope, intercept)` of the linear segment containing the given flow, used when
    /// losses are substituted directly into the balance constraints for a fixed flow
    /// direction.
    pub fn segment_coefficients(&self, flow: MegaWatts) -> (f64, f64) {
        let segment = self
            .breakpoints
            .iter()
            .tuple_windows()
            .find(|(_, b)| flow <= b.flow)
            .unwrap_or_else(|| {
                // past the last breakpoint: extrapolate the final segment
                let n = self.breakpoints.len();
                (&self.breakpoints[n - 2], &self.breakpoints[n - 1])
            });
        let (a, b) = segment;
        let slope = (b.loss - a.loss).value() / (b.flow - a.flow).value();
        let intercept = a.loss.value() - slope * a.flow.value();
        (slope, intercept)
    }
}

/// One direction of an MNSP's link, offered into the market with price bands
#[derive(Debug, Clone, PartialEq)]
pub struct MnspLink {
    /// The link's ID
    pub id: LinkID,
    /// The region the link draws energy from
    pub from_region: RegionID,
    /// The region the link delivers energy to
    pub to_region: RegionID,
    /// Up to ten price bands, in band order
    pub bands: Vec<BandOffer>,
    /// The declared maximum flow on this link
    pub max_avail: MegaWatts,
    /// The offered ramp up rate for this link
    pub ramp_up_rate: Option<MegaWattsPerMinute>,
    /// The offered ramp down rate for this link
    pub ramp_down_rate: Option<MegaWattsPerMinute>,
    /// Loss factor referring the offer price to the from-region reference node
    pub from_region_loss_factor: Dimensionless,
    /// Loss factor referring the offer price to the to-region reference node
    pub to_region_loss_factor: Dimensionless,
    /// Telemetered flow on this link at the start of the interval
    pub initial_mw: MegaWatts,
}

impl MnspLink {
    /// Create a link offer, checking band-level invariants
    pub fn new(
        id: &str,
        from_region: &str,
        to_region: &str,
        bands: Vec<BandOffer>,
        max_avail: MegaWatts,
    ) -> Result<Self> {
        ensure!(
            bands.len() <= MAX_BANDS,
            "An offer may have at most {MAX_BANDS} price bands ({} given)",
            bands.len()
        );
        ensure!(
            bands.iter().all(|band| band.avail >= MegaWatts(0.0)),
            "Band availabilities must be non-negative"
        );
        Ok(Self {
            id: id.into(),
            from_region: from_region.into(),
            to_region: to_region.into(),
            bands,
            max_avail,
            ramp_up_rate: None,
            ramp_down_rate: None,
            from_region_loss_factor: Dimensionless(1.0),
            to_region_loss_factor: Dimensionless(1.0),
            initial_mw: MegaWatts(0.0),
        })
    }

    /// The total volume offered across all bands
    pub fn band_sum(&self) -> MegaWatts {
        self.bands
            .iter()
            .fold(MegaWatts(0.0), |total, band| total + band.avail)
    }
}

/// An interconnector joining two regions.
///
/// Flow is signed: positive in the nominated `from` to `to` direction, negative in
/// reverse. An interconnector with link offers is an MNSP and is dispatched off those
/// offers rather than as a free transport variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Interconnector {
    /// The interconnector's ID
    pub id: InterconnectorID,
    /// The region positive flow draws energy from
    pub from_region: RegionID,
    /// The region positive flow delivers energy to
    pub to_region: RegionID,
    /// Limit on reverse flow magnitude
    pub import_limit: MegaWatts,
    /// Limit on forward flow
    pub export_limit: MegaWatts,
    /// Telemetered flow at the start of the interval
    pub initial_mw_flow: MegaWatts,
    /// Limit on how fast flow can move within the interval
    pub ramp_limit: Option<MegaWattsPerMinute>,
    /// The loss model; `None` means the interconnector is treated as lossless
    pub loss_model: Option<LossModel>,
    /// Link offers for each direction; non-empty for MNSPs
    pub links: Vec<MnspLink>,
}

define_id_getter! {Interconnector, InterconnectorID}

impl Interconnector {
    /// Create a lossless interconnector with the given capacity limits
    pub fn new(
        id: &str,
        from_region: &str,
        to_region: &str,
        import_limit: MegaWatts,
        export_limit: MegaWatts,
    ) -> Result<Self> {
        ensure!(
            import_limit >= MegaWatts(0.0) && export_limit >= MegaWatts(0.0),
            "Interconnector capacity limits must be non-negative magnitudes"
        );
        Ok(Self {
            id: id.into(),
            from_region: from_region.into(),
            to_region: to_region.into(),
            import_limit,
            export_limit,
            initial_mw_flow: MegaWatts(0.0),
            ramp_limit: None,
            loss_model: None,
            links: Vec::new(),
        })
    }

    /// Whether this interconnector is a market network service provider
    pub fn is_mnsp(&self) -> bool {
        !self.links.is_empty()
    }

    /// The flow bounds: capacity limits intersected with the loss curve's domain
    pub fn flow_bounds(&self) -> (MegaWatts, MegaWatts) {
        let mut lower = -self.import_limit;
        let mut upper = self.export_limit;
        if let Some(model) = &self.loss_model {
            let (first, last) = model.flow_range();
            lower = lower.max(first);
            upper = upper.min(last);
        }
        (lower, upper)
    }
}
