//! Market services and dispatch processes.
//!
//! Energy is the primary traded service. Alongside it the market co-optimises eight frequency
//! control ancillary services (FCAS), one for each combination of direction (raise or lower)
//! and response category (regulation plus three contingency speeds). Throughout the engine a
//! service is identified by its market code, e.g. `RAISE6SEC` or `LOWERREG`.
use anyhow::{anyhow, Result};
use itertools::iproduct;
use serde::de::Error;
use serde::{Deserialize, Serialize};
use serde_string_enum::{DeserializeLabeledStringEnum, SerializeLabeledStringEnum};
use std::fmt::Display;
use std::str::FromStr;
use strum::{EnumIter, IntoEnumIterator};

/// The direction of frequency response an FCAS service provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum FcasDirection {
    /// Responds to under-frequency events by raising generation (or shedding load)
    Raise,
    /// Responds to over-frequency events by lowering generation (or restoring load)
    Lower,
}

/// The response category of an FCAS service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum FcasCategory {
    /// Continuous response following control-system signals
    Regulation,
    /// Contingency response delivered within six seconds
    SixSecond,
    /// Contingency response delivered within sixty seconds
    SixtySecond,
    /// Contingency response delivered within five minutes
    FiveMinute,
}

/// One of the eight frequency control ancillary services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FcasService {
    /// Raise or lower
    pub direction: FcasDirection,
    /// Regulation or one of the contingency speeds
    pub category: FcasCategory,
}

impl FcasService {
    /// Iterate over all eight services, raise services first
    pub fn iter() -> impl Iterator<Item = Self> {
        iproduct!(FcasDirection::iter(), FcasCategory::iter())
            .map(|(direction, category)| Self { direction, category })
    }

    /// Whether this is one of the two regulation services
    pub fn is_regulation(&self) -> bool {
        self.category == FcasCategory::Regulation
    }

    /// Whether this is one of the six contingency services
    pub fn is_contingency(&self) -> bool {
        !self.is_regulation()
    }

    /// The market code for this service, as it appears in market record files
    pub fn market_code(&self) -> &'static str {
        use FcasCategory::*;
        use FcasDirection::*;
        match (self.direction, self.category) {
            (Raise, Regulation) => "RAISEREG",
            (Raise, SixSecond) => "RAISE6SEC",
            (Raise, SixtySecond) => "RAISE60SEC",
            (Raise, FiveMinute) => "RAISE5MIN",
            (Lower, Regulation) => "LOWERREG",
            (Lower, SixSecond) => "LOWER6SEC",
            (Lower, SixtySecond) => "LOWER60SEC",
            (Lower, FiveMinute) => "LOWER5MIN",
        }
    }
}

/// The raise regulation service
pub const RAISE_REG: FcasService = FcasService {
    direction: FcasDirection::Raise,
    category: FcasCategory::Regulation,
};
/// The lower regulation service
pub const LOWER_REG: FcasService = FcasService {
    direction: FcasDirection::Lower,
    category: FcasCategory::Regulation,
};

impl Display for FcasService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.market_code())
    }
}

impl FromStr for FcasService {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::iter()
            .find(|service| service.market_code() == s)
            .ok_or_else(|| anyhow!("Unknown FCAS service code '{s}'"))
    }
}

impl<'de> Deserialize<'de> for FcasService {
    fn deserialize<D>(deserialiser: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserialiser)?;
        s.parse().map_err(D::Error::custom)
    }
}

impl Serialize for FcasService {
    fn serialize<S>(&self, serialiser: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serialiser.collect_str(self)
    }
}

/// A service for which the engine produces a regional price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PricedService {
    /// The energy spot price
    Energy,
    /// The regional price for one FCAS service
    Fcas(FcasService),
}

impl Display for PricedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PricedService::Energy => write!(f, "ENERGY"),
            PricedService::Fcas(service) => write!(f, "{service}"),
        }
    }
}

/// The market process a dispatch interval is solved for.
///
/// The same formulation serves the real-time dispatch run and the two forecast processes; a
/// handful of inputs (AGC checks, generic constraint applicability) differ by process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeLabeledStringEnum, DeserializeLabeledStringEnum)]
pub enum ProcessKind {
    /// The five-minute real-time dispatch run
    #[string = "DISPATCH"]
    Dispatch,
    /// The rolling hour-ahead forecast run at five-minute resolution
    #[string = "P5MIN"]
    FiveMinuteForecast,
    /// The day-ahead forecast run at thirty-minute resolution
    #[string = "PREDISPATCH"]
    PreDispatch,
}
