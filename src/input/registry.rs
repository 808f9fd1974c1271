//! Code for reading unit registration, regional demand and historical outcomes.
//!
//! Registration rows give each unit its region, dispatch role and transmission loss
//! factor. The dispatch record file supplies the rest of the interval state: regional
//! demand forecasts, start-of-interval unit telemetry and the historical targets and
//! prices the validator compares against. Targets and telemetry follow the intervened
//! run when one is present; prices always follow the pricing run.
use super::{
    input_err_msg, keep_effective, keep_latest, read_mms_table, read_mms_table_optional,
    DISPATCH_FILE_NAME, DISPATCH_REPORT,
};
use crate::market::{
    DispatchInterval, HistoricalRecords, HistoricalRegionPrice, HistoricalUnitDispatch,
    PriceLimits,
};
use crate::region::{Region, RegionMap};
use crate::service::{FcasCategory, FcasDirection, FcasService};
use crate::unit::{DispatchRole, FastStartMode, Unit, UnitMap};
use crate::units::{Dimensionless, MegaWatts, MegaWattsPerMinute, MoneyPerMegaWattHour};
use anyhow::{ensure, Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;

const UNITS_FILE_NAME: &str = "units.csv";
const MARKET_FILE_NAME: &str = "market.csv";

const REGISTRATION_REPORT: &str = "PARTICIPANT_REGISTRATION";
const MARKET_CONFIG_REPORT: &str = "MARKET_CONFIG";

#[derive(Debug, Deserialize)]
struct UnitDetailRecord {
    #[serde(rename = "DUID")]
    unit_id: String,
    #[serde(rename = "START_DATE")]
    start_date: String,
    #[serde(rename = "DISPATCHTYPE")]
    role: DispatchRole,
    #[serde(rename = "REGIONID")]
    region_id: String,
    #[serde(rename = "TRANSMISSIONLOSSFACTOR")]
    transmission_loss_factor: f64,
}

impl UnitDetailRecord {
    // registration rows are versioned by start date alone
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.start_date)?, 0))
    }
}

/// Read the participating units from a case directory.
///
/// Each unit starts with registration data only; offers and telemetry are attached by
/// the later loading stages.
pub fn read_units(case_dir: &Path) -> Result<UnitMap> {
    let file_path = case_dir.join(UNITS_FILE_NAME);
    let records = read_mms_table(&file_path, REGISTRATION_REPORT, "DUDETAILSUMMARY")?;
    units_from_records(records).with_context(|| input_err_msg(&file_path))
}

fn units_from_records(records: Vec<UnitDetailRecord>) -> Result<UnitMap> {
    let mut units = UnitMap::new();
    for record in keep_effective(records, |r| r.unit_id.clone(), UnitDetailRecord::effective)? {
        let mut unit = Unit::new(&record.unit_id, &record.region_id, record.role);
        unit.loss_factor = Dimensionless(record.transmission_loss_factor);
        units.insert(unit.id.clone(), unit);
    }
    Ok(units)
}

#[derive(Debug, Deserialize)]
struct RegionSumRecord {
    #[serde(rename = "REGIONID")]
    region_id: String,
    #[serde(rename = "INTERVENTION")]
    intervention: u8,
    #[serde(rename = "TOTALDEMAND")]
    total_demand: f64,
}

/// Read the pricing regions and their demand forecasts from the dispatch record file
pub fn read_regions(case_dir: &Path) -> Result<RegionMap> {
    let file_path = case_dir.join(DISPATCH_FILE_NAME);
    let records: Vec<RegionSumRecord> = read_mms_table(&file_path, DISPATCH_REPORT, "REGIONSUM")?;
    Ok(keep_latest(records, |r| r.region_id.clone(), |r| r.intervention)
        .into_iter()
        .map(|record| {
            let region = Region::new(&record.region_id, MegaWatts(record.total_demand));
            (region.id.clone(), region)
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct PriceThresholdRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "VOLL")]
    market_price_cap: f64,
    #[serde(rename = "MARKETPRICEFLOOR")]
    market_price_floor: f64,
}

impl PriceThresholdRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

/// Read the market price cap and floor in force for the trading day.
///
/// Returns `None` when the case carries no threshold records.
pub fn read_price_limits(case_dir: &Path) -> Result<Option<PriceLimits>> {
    let file_path = case_dir.join(MARKET_FILE_NAME);
    let records: Vec<PriceThresholdRecord> =
        read_mms_table_optional(&file_path, MARKET_CONFIG_REPORT, "MARKET_PRICE_THRESHOLDS")?;
    price_limits_from_records(records).with_context(|| input_err_msg(&file_path))
}

fn price_limits_from_records(records: Vec<PriceThresholdRecord>) -> Result<Option<PriceLimits>> {
    let mut latest = keep_effective(records, |_| (), PriceThresholdRecord::effective)?;
    let Some(record) = latest.pop() else {
        return Ok(None);
    };
    ensure!(
        record.market_price_cap > record.market_price_floor,
        "The market price cap of {} must exceed the floor of {}",
        record.market_price_cap,
        record.market_price_floor
    );
    Ok(Some(PriceLimits {
        market_price_cap: MoneyPerMegaWattHour(record.market_price_cap),
        market_price_floor: MoneyPerMegaWattHour(record.market_price_floor),
    }))
}

/// One unit's row of the historical unit solution table.
///
/// The row carries the cleared targets of the historical run together with the
/// start-of-interval telemetry: initial output, control-system status and limits, ramp
/// capabilities and the intermittent forecast. Ramp rates are megawatts per minute.
#[derive(Debug, Deserialize)]
struct UnitSolutionRecord {
    #[serde(rename = "DUID")]
    unit_id: String,
    #[serde(rename = "INTERVENTION")]
    intervention: u8,
    #[serde(rename = "DISPATCHMODE")]
    dispatch_mode: u8,
    #[serde(rename = "AGCSTATUS")]
    agc_status: u8,
    #[serde(rename = "INITIALMW")]
    initial_mw: f64,
    #[serde(rename = "TOTALCLEARED")]
    total_cleared: f64,
    #[serde(rename = "RAMPUPRATE")]
    ramp_up_rate: Option<f64>,
    #[serde(rename = "RAMPDOWNRATE")]
    ramp_down_rate: Option<f64>,
    #[serde(rename = "RAISEREG")]
    raise_reg: f64,
    #[serde(rename = "RAISE6SEC")]
    raise_6sec: f64,
    #[serde(rename = "RAISE60SEC")]
    raise_60sec: f64,
    #[serde(rename = "RAISE5MIN")]
    raise_5min: f64,
    #[serde(rename = "LOWERREG")]
    lower_reg: f64,
    #[serde(rename = "LOWER6SEC")]
    lower_6sec: f64,
    #[serde(rename = "LOWER60SEC")]
    lower_60sec: f64,
    #[serde(rename = "LOWER5MIN")]
    lower_5min: f64,
    #[serde(rename = "UIGF")]
    uigf: Option<f64>,
    #[serde(rename = "AGCLOWERLIMIT")]
    agc_lower_limit: Option<f64>,
    #[serde(rename = "AGCUPPERLIMIT")]
    agc_upper_limit: Option<f64>,
    #[serde(rename = "AGCRAMPUP")]
    agc_ramp_up: Option<f64>,
    #[serde(rename = "AGCRAMPDOWN")]
    agc_ramp_down: Option<f64>,
}

impl UnitSolutionRecord {
    fn fcas_cleared(&self, service: FcasService) -> f64 {
        match (service.direction, service.category) {
            (FcasDirection::Raise, FcasCategory::Regulation) => self.raise_reg,
            (FcasDirection::Raise, FcasCategory::SixSecond) => self.raise_6sec,
            (FcasDirection::Raise, FcasCategory::SixtySecond) => self.raise_60sec,
            (FcasDirection::Raise, FcasCategory::FiveMinute) => self.raise_5min,
            (FcasDirection::Lower, FcasCategory::Regulation) => self.lower_reg,
            (FcasDirection::Lower, FcasCategory::SixSecond) => self.lower_6sec,
            (FcasDirection::Lower, FcasCategory::SixtySecond) => self.lower_60sec,
            (FcasDirection::Lower, FcasCategory::FiveMinute) => self.lower_5min,
        }
    }
}

/// Apply the historical unit solution rows to the interval.
///
/// Each row seeds the unit's telemetry and records its historical targets. The record
/// format carries the fast-start mode only; time already spent in the mode resets to
/// zero.
pub fn read_unit_solutions(case_dir: &Path, interval: &mut DispatchInterval) -> Result<()> {
    let file_path = case_dir.join(DISPATCH_FILE_NAME);
    let records = read_mms_table(&file_path, DISPATCH_REPORT, "UNIT_SOLUTION")?;
    apply_unit_solutions(records, interval).with_context(|| input_err_msg(&file_path))
}

fn apply_unit_solutions(
    records: Vec<UnitSolutionRecord>,
    interval: &mut DispatchInterval,
) -> Result<()> {
    for record in keep_latest(records, |r| r.unit_id.clone(), |r| r.intervention) {
        let unit = interval
            .units
            .get_mut(record.unit_id.as_str())
            .with_context(|| format!("Unit solution for unknown unit {}", record.unit_id))?;
        unit.initial_mw = MegaWatts(record.initial_mw);
        unit.agc_status = record.agc_status != 0;
        unit.ramp_up_rate = record.ramp_up_rate.map(MegaWattsPerMinute);
        unit.ramp_down_rate = record.ramp_down_rate.map(MegaWattsPerMinute);
        unit.agc_lower_limit = record.agc_lower_limit.map(MegaWatts);
        unit.agc_upper_limit = record.agc_upper_limit.map(MegaWatts);
        unit.agc_ramp_up = record.agc_ramp_up.map(MegaWattsPerMinute);
        unit.agc_ramp_down = record.agc_ramp_down.map(MegaWattsPerMinute);
        unit.forecast_mw = record.uigf.map(MegaWatts);
        if let Some(profile) = &mut unit.fast_start {
            profile.mode = FastStartMode::from_number(record.dispatch_mode)
                .with_context(|| format!("Unit solution for unit {}", record.unit_id))?;
        }

        let mut dispatch = HistoricalUnitDispatch {
            total_cleared: MegaWatts(record.total_cleared),
            ..Default::default()
        };
        for service in FcasService::iter() {
            dispatch
                .fcas_cleared
                .insert(service, MegaWatts(record.fcas_cleared(service)));
        }
        interval
            .historical
            .unit_dispatch
            .insert(unit.id.clone(), dispatch);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct PriceSolutionRecord {
    #[serde(rename = "REGIONID")]
    region_id: String,
    #[serde(rename = "INTERVENTION")]
    intervention: u8,
    #[serde(rename = "RRP")]
    rrp: f64,
    #[serde(rename = "RAISEREGRRP")]
    raise_reg_rrp: f64,
    #[serde(rename = "RAISE6SECRRP")]
    raise_6sec_rrp: f64,
    #[serde(rename = "RAISE60SECRRP")]
    raise_60sec_rrp: f64,
    #[serde(rename = "RAISE5MINRRP")]
    raise_5min_rrp: f64,
    #[serde(rename = "LOWERREGRRP")]
    lower_reg_rrp: f64,
    #[serde(rename = "LOWER6SECRRP")]
    lower_6sec_rrp: f64,
    #[serde(rename = "LOWER60SECRRP")]
    lower_60sec_rrp: f64,
    #[serde(rename = "LOWER5MINRRP")]
    lower_5min_rrp: f64,
}

impl PriceSolutionRecord {
    fn fcas_rrp(&self, service: FcasService) -> f64 {
        match (service.direction, service.category) {
            (FcasDirection::Raise, FcasCategory::Regulation) => self.raise_reg_rrp,
            (FcasDirection::Raise, FcasCategory::SixSecond) => self.raise_6sec_rrp,
            (FcasDirection::Raise, FcasCategory::SixtySecond) => self.raise_60sec_rrp,
            (FcasDirection::Raise, FcasCategory::FiveMinute) => self.raise_5min_rrp,
            (FcasDirection::Lower, FcasCategory::Regulation) => self.lower_reg_rrp,
            (FcasDirection::Lower, FcasCategory::SixSecond) => self.lower_6sec_rrp,
            (FcasDirection::Lower, FcasCategory::SixtySecond) => self.lower_60sec_rrp,
            (FcasDirection::Lower, FcasCategory::FiveMinute) => self.lower_5min_rrp,
        }
    }
}

/// Record the historical regional prices for later validation.
///
/// Only pricing-run rows set prices; intervened runs re-dispatch the system but leave
/// the published prices alone.
pub fn read_region_prices(case_dir: &Path, historical: &mut HistoricalRecords) -> Result<()> {
    let file_path = case_dir.join(DISPATCH_FILE_NAME);
    let records: Vec<PriceSolutionRecord> =
        read_mms_table(&file_path, DISPATCH_REPORT, "PRICE")?;
    for record in records.into_iter().filter(|r| r.intervention == 0) {
        let mut price = HistoricalRegionPrice {
            energy: MoneyPerMegaWattHour(record.rrp),
            ..Default::default()
        };
        for service in FcasService::iter() {
            price
                .fcas
                .insert(service, MoneyPerMegaWattHour(record.fcas_rrp(service)));
        }
        historical
            .region_prices
            .insert(record.region_id.as_str().into(), price);
    }
    Ok(())
}
