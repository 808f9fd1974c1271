//! The module responsible for writing dispatch results to disk.
//!
//! Each solved interval is appended to two CSV files using the market's column names: a
//! dispatch-load file with one row per unit and a price file with one row per region. The
//! dispatch-load rows double as the continuity records that seed the next interval's
//! initial conditions. Infeasible intervals get a separate diagnostic report naming the
//! conflicting constraints alongside an LP snapshot of the model.
use crate::dispatch::problem::{ConstraintKey, DispatchProblem};
use crate::dispatch::DispatchSolution;
use crate::market::DispatchInterval;
use crate::service::{FcasCategory, FcasDirection, FcasService, PricedService};
use anyhow::{Context, Result};
use csv;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The root folder in which case-specific output folders will be created
const OUTPUT_DIRECTORY_ROOT: &str = "redispatch_results";

/// The output file name for unit dispatch records
const DISPATCH_LOAD_FILE_NAME: &str = "dispatchload.csv";

/// The output file name for regional price records
const DISPATCH_PRICE_FILE_NAME: &str = "dispatchprice.csv";

/// The diagnostic file naming the conflicting constraints of an infeasible interval
const INFEASIBLE_CONSTRAINTS_FILE_NAME: &str = "infeasible_constraints.txt";

/// The diagnostic LP snapshot of an infeasible interval
const LP_SNAPSHOT_FILE_NAME: &str = "problem_snapshot.lp";

/// Get the output folder for the case in the specified directory
pub fn get_output_dir(case_dir: &Path) -> Result<PathBuf> {
    // canonicalise in case the user has specified "."
    let case_dir = case_dir
        .canonicalize()
        .context("Could not resolve path to case")?;

    let case_name = case_dir
        .file_name()
        .context("Case cannot be in root folder")?
        .to_str()
        .context("Invalid chars in case dir name")?;

    Ok([OUTPUT_DIRECTORY_ROOT, case_name].iter().collect())
}

/// Create the output directory if it does not already exist
pub fn create_output_directory(output_dir: &Path) -> Result<()> {
    if output_dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(output_dir)?;

    Ok(())
}

/// One unit's dispatch outcome, in the market's dispatch-load column layout.
///
/// The same layout is read back when chaining intervals or loading historical runs, so
/// the struct is shared between the writer and the loader.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DispatchLoadRecord {
    /// The unit's DUID
    #[serde(rename = "DUID")]
    pub unit_id: String,
    /// Whether the row belongs to an intervention run
    #[serde(rename = "INTERVENTION")]
    pub intervention: u8,
    /// The fast-start mode at the start of the interval, zero when inactive
    #[serde(rename = "DISPATCHMODE")]
    pub dispatch_mode: u8,
    /// Whether the unit was under automatic generation control
    #[serde(rename = "AGCSTATUS")]
    pub agc_status: u8,
    /// Telemetered output at the start of the interval
    #[serde(rename = "INITIALMW")]
    pub initial_mw: f64,
    /// The cleared energy target
    #[serde(rename = "TOTALCLEARED")]
    pub total_cleared: f64,
    /// The cleared raise regulation target
    #[serde(rename = "RAISEREG")]
    pub raise_reg: f64,
    /// The cleared raise six-second target
    #[serde(rename = "RAISE6SEC")]
    pub raise_6sec: f64,
    /// The cleared raise sixty-second target
    #[serde(rename = "RAISE60SEC")]
    pub raise_60sec: f64,
    /// The cleared raise five-minute target
    #[serde(rename = "RAISE5MIN")]
    pub raise_5min: f64,
    /// The cleared lower regulation target
    #[serde(rename = "LOWERREG")]
    pub lower_reg: f64,
    /// The cleared lower six-second target
    #[serde(rename = "LOWER6SEC")]
    pub lower_6sec: f64,
    /// The cleared lower sixty-second target
    #[serde(rename = "LOWER60SEC")]
    pub lower_60sec: f64,
    /// The cleared lower five-minute target
    #[serde(rename = "LOWER5MIN")]
    pub lower_5min: f64,
    /// The enablement status code for raise regulation
    #[serde(rename = "RAISEREGFLAGS")]
    pub raise_reg_flags: u8,
    /// The enablement status code for raise six-second
    #[serde(rename = "RAISE6SECFLAGS")]
    pub raise_6sec_flags: u8,
    /// The enablement status code for raise sixty-second
    #[serde(rename = "RAISE60SECFLAGS")]
    pub raise_60sec_flags: u8,
    /// The enablement status code for raise five-minute
    #[serde(rename = "RAISE5MINFLAGS")]
    pub raise_5min_flags: u8,
    /// The enablement status code for lower regulation
    #[serde(rename = "LOWERREGFLAGS")]
    pub lower_reg_flags: u8,
    /// The enablement status code for lower six-second
    #[serde(rename = "LOWER6SECFLAGS")]
    pub lower_6sec_flags: u8,
    /// The enablement status code for lower sixty-second
    #[serde(rename = "LOWER60SECFLAGS")]
    pub lower_60sec_flags: u8,
    /// The enablement status code for lower five-minute
    #[serde(rename = "LOWER5MINFLAGS")]
    pub lower_5min_flags: u8,
}

impl DispatchLoadRecord {
    /// The recorded target for an FCAS service
    pub fn fcas_cleared(&self, service: FcasService) -> f64 {
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

    /// Record the target and enablement status code for an FCAS service
    pub fn set_fcas(&mut self, service: FcasService, cleared: f64, flags: u8) {
        let (target, status) = match (service.direction, service.category) {
            (FcasDirection::Raise, FcasCategory::Regulation) => {
                (&mut self.raise_reg, &mut self.raise_reg_flags)
            }
            (FcasDirection::Raise, FcasCategory::SixSecond) => {
                (&mut self.raise_6sec, &mut self.raise_6sec_flags)
            }
            (FcasDirection::Raise, FcasCategory::SixtySecond) => {
                (&mut self.raise_60sec, &mut self.raise_60sec_flags)
            }
            (FcasDirection::Raise, FcasCategory::FiveMinute) => {
                (&mut self.raise_5min, &mut self.raise_5min_flags)
            }
            (FcasDirection::Lower, FcasCategory::Regulation) => {
                (&mut self.lower_reg, &mut self.lower_reg_flags)
            }
            (FcasDirection::Lower, FcasCategory::SixSecond) => {
                (&mut self.lower_6sec, &mut self.lower_6sec_flags)
            }
            (FcasDirection::Lower, FcasCategory::SixtySecond) => {
                (&mut self.lower_60sec, &mut self.lower_60sec_flags)
            }
            (FcasDirection::Lower, FcasCategory::FiveMinute) => {
                (&mut self.lower_5min, &mut self.lower_5min_flags)
            }
        };
        *target = cleared;
        *status = flags;
    }
}

/// One region's cleared prices, in the market's dispatch-price column layout
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DispatchPriceRecord {
    /// The region
    #[serde(rename = "REGIONID")]
    pub region_id: String,
    /// Whether the row belongs to an intervention run
    #[serde(rename = "INTERVENTION")]
    pub intervention: u8,
    /// The energy spot price
    #[serde(rename = "RRP")]
    pub rrp: f64,
    /// The raise regulation price
    #[serde(rename = "RAISEREGRRP")]
    pub raise_reg_rrp: f64,
    /// The raise six-second price
    #[serde(rename = "RAISE6SECRRP")]
    pub raise_6sec_rrp: f64,
    /// The raise sixty-second price
    #[serde(rename = "RAISE60SECRRP")]
    pub raise_60sec_rrp: f64,
    /// The raise five-minute price
    #[serde(rename = "RAISE5MINRRP")]
    pub raise_5min_rrp: f64,
    /// The lower regulation price
    #[serde(rename = "LOWERREGRRP")]
    pub lower_reg_rrp: f64,
    /// The lower six-second price
    #[serde(rename = "LOWER6SECRRP")]
    pub lower_6sec_rrp: f64,
    /// The lower sixty-second price
    #[serde(rename = "LOWER60SECRRP")]
    pub lower_60sec_rrp: f64,
    /// The lower five-minute price
    #[serde(rename = "LOWER5MINRRP")]
    pub lower_5min_rrp: f64,
}

impl DispatchPriceRecord {
    /// The recorded price for an FCAS service
    pub fn fcas_rrp(&self, service: FcasService) -> f64 {
        *self.fcas_field(service)
    }

    /// Record the price for an FCAS service
    pub fn set_fcas_rrp(&mut self, service: FcasService, price: f64) {
        *self.fcas_field_mut(service) = price;
    }

    fn fcas_field(&self, service: FcasService) -> &f64 {
        match (service.direction, service.category) {
            (FcasDirection::Raise, FcasCategory::Regulation) => &self.raise_reg_rrp,
            (FcasDirection::Raise, FcasCategory::SixSecond) => &self.raise_6sec_rrp,
            (FcasDirection::Raise, FcasCategory::SixtySecond) => &self.raise_60sec_rrp,
            (FcasDirection::Raise, FcasCategory::FiveMinute) => &self.raise_5min_rrp,
            (FcasDirection::Lower, FcasCategory::Regulation) => &self.lower_reg_rrp,
            (FcasDirection::Lower, FcasCategory::SixSecond) => &self.lower_6sec_rrp,
            (FcasDirection::Lower, FcasCategory::SixtySecond) => &self.lower_60sec_rrp,
            (FcasDirection::Lower, FcasCategory::FiveMinute) => &self.lower_5min_rrp,
        }
    }

    fn fcas_field_mut(&mut self, service: FcasService) -> &mut f64 {
        match (service.direction, service.category) {
            (FcasDirection::Raise, FcasCategory::Regulation) => &mut self.raise_reg_rrp,
            (FcasDirection::Raise, FcasCategory::SixSecond) => &mut self.raise_6sec_rrp,
            (FcasDirection::Raise, FcasCategory::SixtySecond) => &mut self.raise_60sec_rrp,
            (FcasDirection::Raise, FcasCategory::FiveMinute) => &mut self.raise_5min_rrp,
            (FcasDirection::Lower, FcasCategory::Regulation) => &mut self.lower_reg_rrp,
            (FcasDirection::Lower, FcasCategory::SixSecond) => &mut self.lower_6sec_rrp,
            (FcasDirection::Lower, FcasCategory::SixtySecond) => &mut self.lower_60sec_rrp,
            (FcasDirection::Lower, FcasCategory::FiveMinute) => &mut self.lower_5min_rrp,
        }
    }
}

/// Build one dispatch-load record per participating unit of a solved interval
pub fn dispatch_load_records(
    interval: &DispatchInterval,
    solution: &DispatchSolution,
) -> Vec<DispatchLoadRecord> {
    interval
        .units
        .values()
        .map(|unit| {
            let id: &str = unit.id.borrow();
            let mut record = DispatchLoadRecord {
                unit_id: id.to_string(),
                dispatch_mode: unit
                    .fast_start
                    .as_ref()
                    .map_or(0, |profile| profile.mode.as_number()),
                agc_status: unit.agc_status as u8,
                initial_mw: unit.initial_mw.value(),
                total_cleared: solution.total_cleared(id).value(),
                ..Default::default()
            };
            for service in FcasService::iter() {
                record.set_fcas(
                    service,
                    solution.fcas_cleared(id, service).value(),
                    solution.fcas_status(id, service).as_number(),
                );
            }
            record
        })
        .collect()
}

/// Build one price record per region of a solved interval
pub fn dispatch_price_records(
    interval: &DispatchInterval,
    solution: &DispatchSolution,
) -> Vec<DispatchPriceRecord> {
    interval
        .regions
        .keys()
        .map(|region| {
            let name: &str = region.borrow();
            let mut record = DispatchPriceRecord {
                region_id: name.to_string(),
                rrp: solution
                    .price(name, PricedService::Energy)
                    .map_or(0.0, |price| price.value()),
                ..Default::default()
            };
            for service in FcasService::iter() {
                if let Some(price) = solution.price(name, PricedService::Fcas(service)) {
                    record.set_fcas_rrp(service, price.value());
                }
            }
            record
        })
        .collect()
}

/// An object for writing solved intervals to the output files
pub struct DataWriter {
    load_writer: csv::Writer<File>,
    price_writer: csv::Writer<File>,
}

impl DataWriter {
    /// Open CSV files to write output data to
    ///
    /// # Arguments
    ///
    /// * `output_path` - Folder where files will be saved
    pub fn create(output_path: &Path) -> Result<Self> {
        let new_writer = |file_name| {
            let file_path = output_path.join(file_name);
            csv::Writer::from_path(file_path)
        };

        Ok(Self {
            load_writer: new_writer(DISPATCH_LOAD_FILE_NAME)?,
            price_writer: new_writer(DISPATCH_PRICE_FILE_NAME)?,
        })
    }

    /// Write one solved interval's dispatch-load and price records
    pub fn write_interval(
        &mut self,
        interval: &DispatchInterval,
        solution: &DispatchSolution,
    ) -> Result<()> {
        self.write_dispatch_load(&dispatch_load_records(interval, solution))?;
        self.write_prices(&dispatch_price_records(interval, solution))?;
        Ok(())
    }

    /// Write dispatch-load records to the unit output file
    pub fn write_dispatch_load(&mut self, records: &[DispatchLoadRecord]) -> Result<()> {
        for record in records {
            self.load_writer.serialize(record)?;
        }

        Ok(())
    }

    /// Write price records to the regional output file
    pub fn write_prices(&mut self, records: &[DispatchPriceRecord]) -> Result<()> {
        for record in records {
            self.price_writer.serialize(record)?;
        }

        Ok(())
    }

    /// Flush the underlying streams
    pub fn flush(&mut self) -> Result<()> {
        self.load_writer.flush()?;
        self.price_writer.flush()?;

        Ok(())
    }
}

/// Write the diagnostic report for an infeasible interval.
///
/// Produces a text file naming the irreducible set of conflicting constraints and an
/// LP-format snapshot of the whole problem for offline inspection.
pub fn write_infeasibility_report(
    dir: &Path,
    problem: &DispatchProblem,
    conflict: &[ConstraintKey],
) -> Result<()> {
    fs::create_dir_all(dir)?;

    let list_path = dir.join(INFEASIBLE_CONSTRAINTS_FILE_NAME);
    let mut file = File::create(&list_path)
        .with_context(|| format!("Could not create {}", list_path.display()))?;
    if conflict.is_empty() {
        writeln!(file, "No irreducible infeasible set could be isolated")?;
    }
    for key in conflict {
        writeln!(file, "{key}")?;
    }

    let lp_path = dir.join(LP_SNAPSHOT_FILE_NAME);
    let mut lp_file = File::create(&lp_path)
        .with_context(|| format!("Could not create {}", lp_path.display()))?;
    problem.write_lp(&mut lp_file)?;

    Ok(())
}
