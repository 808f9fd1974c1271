//! Generic network constraints.
//!
//! Generic constraints carry the security limits of the power system: thermal ratings,
//! stability limits, FCAS requirements. Each one is a linear expression over unit targets,
//! interconnector flows and regional FCAS totals, compared against a right-hand side with
//! its own violation price. Constraint definitions are versioned and flagged with the
//! market processes they apply to.
use crate::id::{define_id_getter, ConstraintID, InterconnectorID, RegionID, UnitID};
use crate::service::{FcasService, ProcessKind};
use crate::units::MoneyPerMegaWattHour;
use indexmap::IndexMap;
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};

/// A map of generic constraints, keyed by constraint ID
pub type ConstraintMap = IndexMap<ConstraintID, GenericConstraint>;

/// The sense of a generic constraint, as coded in market record files
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerializeLabeledStringEnum, DeserializeLabeledStringEnum)]
pub enum ConstraintSense {
    /// The left-hand side may not exceed the right-hand side
    #[string = "<="]
    LessOrEqual,
    /// The left-hand side must equal the right-hand side
    #[string = "="]
    Equal,
    /// The left-hand side may not fall below the right-hand side
    #[string = ">="]
    GreaterOrEqual,
}

/// A left-hand-side term over one unit's target for a service
#[derive(Debug, Clone, PartialEq)]
pub struct UnitFactor {
    /// The unit whose target is referenced
    pub unit_id: UnitID,
    /// The service referenced: an FCAS service, or `None` for the unit's energy target
    pub service: Option<FcasService>,
    /// The term's coefficient
    pub factor: f64,
}

/// A left-hand-side term over an interconnector's flow
#[derive(Debug, Clone, PartialEq)]
pub struct InterconnectorFactor {
    /// The interconnector whose flow is referenced
    pub interconnector_id: InterconnectorID,
    /// The term's coefficient
    pub factor: f64,
}

/// A left-hand-side term over a region's FCAS total for a service
#[derive(Debug, Clone, PartialEq)]
pub struct RegionFactor {
    /// The region whose FCAS total is referenced
    pub region_id: RegionID,
    /// The FCAS service referenced
    pub service: FcasService,
    /// The term's coefficient
    pub factor: f64,
}

/// A generic constraint definition together with its interval inputs
#[derive(Debug, Clone, PartialEq)]
pub struct GenericConstraint {
    /// The constraint's ID
    pub id: ConstraintID,
    /// The constraint's sense
    pub sense: ConstraintSense,
    /// The right-hand side from the constraint definition
    pub rhs: f64,
    /// A dynamically calculated right-hand side for this interval, taking precedence over
    /// the static one when present
    pub rhs_override: Option<f64>,
    /// The price applied to each unit of violation
    pub violation_price: MoneyPerMegaWattHour,
    /// Whether the constraint applies to the real-time dispatch process
    pub dispatch: bool,
    /// Whether the constraint applies to the five-minute forecast process
    pub five_minute_forecast: bool,
    /// Whether the constraint applies to the pre-dispatch process
    pub pre_dispatch: bool,
    /// Terms over unit energy and FCAS targets
    pub unit_factors: Vec<UnitFactor>,
    /// Terms over interconnector flows
    pub interconnector_factors: Vec<InterconnectorFactor>,
    /// Terms over regional FCAS totals
    pub region_factors: Vec<RegionFactor>,
}

define_id_getter! {GenericConstraint, ConstraintID}

impl GenericConstraint {
    /// Create a constraint with no terms
    pub fn new(
        id: &str,
        sense: ConstraintSense,
        rhs: f64,
        violation_price: MoneyPerMegaWattHour,
    ) -> Self {
        Self {
            id: id.into(),
            sense,
            rhs,
            rhs_override: None,
            violation_price,
            dispatch: true,
            five_minute_forecast: true,
            pre_dispatch: true,
            unit_factors: Vec::new(),
            interconnector_factors: Vec::new(),
            region_factors: Vec::new(),
        }
    }

    /// The right-hand side in force this interval
    pub fn effective_rhs(&self) -> f64 {
        self.rhs_override.unwrap_or(self.rhs)
    }

    /// Whether the constraint applies to the given market process
    pub fn applies_to(&self, process: ProcessKind) -> bool {
        match process {
            ProcessKind::Dispatch => self.dispatch,
            ProcessKind::FiveMinuteForecast => self.five_minute_forecast,
            ProcessKind::PreDispatch => self.pre_dispatch,
        }
    }

    /// Whether any left-hand-side term references an FCAS target or total
    pub fn references_fcas(&self) -> bool {
        !self.region_factors.is_empty()
            || self.unit_factors.iter().any(|f| f.service.is_some())
    }
}
