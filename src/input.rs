//! Common routines for reading market record files.
//!
//! Market records arrive as flat files in the market operator's report format: each line
//! starts with a marker column, `C` for comment rows, `I` for a header row naming the
//! columns of one table and `D` for a data row belonging to the most recent header. A
//! single file carries several tables, identified by report type and table name in the
//! second and third columns. Rows are read into serde-deserialisable record structs by
//! header name, so tables may carry more columns than the engine uses.
use crate::config::DispatchConfig;
use crate::market::DispatchInterval;
use crate::service::ProcessKind;
use anyhow::{bail, ensure, Context, Result};
use chrono::NaiveDateTime;
use csv::StringRecord;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::de::DeserializeOwned;
use std::fs;
use std::hash::Hash;
use std::path::Path;

pub mod constraints;
pub mod network;
pub mod offers;
pub mod registry;

/// The datetime format used in market record files
const MMS_DATETIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

/// The number of marker columns before the named columns of a row
const MARKER_COLUMNS: usize = 4;

/// The dispatch record file of a case directory
pub(crate) const DISPATCH_FILE_NAME: &str = "dispatch.csv";

/// The report type of dispatch record tables
pub(crate) const DISPATCH_REPORT: &str = "DISPATCH";

/// The bid type naming the energy market in offer and factor tables
pub(crate) const ENERGY_BID_TYPE: &str = "ENERGY";

/// Format an error message to include the file path
pub fn input_err_msg<P: AsRef<Path>>(file_path: P) -> String {
    format!("Error reading {}", file_path.as_ref().to_string_lossy())
}

/// Parse a TOML file into the specified type
pub fn read_toml<T: DeserializeOwned>(file_path: &Path) -> Result<T> {
    let contents = fs::read_to_string(file_path).with_context(|| input_err_msg(file_path))?;
    toml::from_str(&contents).with_context(|| input_err_msg(file_path))
}

/// Parse a datetime in the market record format, e.g. `2023/09/05 14:50:00`
pub fn parse_mms_datetime(s: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, MMS_DATETIME_FORMAT)
        .with_context(|| format!("Invalid datetime '{s}'"))
}

/// Read one table from a market record file into a Vec of record structs.
///
/// Returns an empty Vec when the file contains no header for the requested table; a data
/// row arriving before its header is an error.
pub fn read_mms_table<T: DeserializeOwned>(
    file_path: &Path,
    report: &str,
    table: &str,
) -> Result<Vec<T>> {
    read_mms_table_impl(file_path, report, table).with_context(|| input_err_msg(file_path))
}

/// Read one table from a market record file that may be absent.
///
/// A missing file yields an empty Vec; once the file exists, it is read like
/// [`read_mms_table`].
pub fn read_mms_table_optional<T: DeserializeOwned>(
    file_path: &Path,
    report: &str,
    table: &str,
) -> Result<Vec<T>> {
    if !file_path.is_file() {
        return Ok(Vec::new());
    }
    read_mms_table(file_path, report, table)
}

fn read_mms_table_impl<T: DeserializeOwned>(
    file_path: &Path,
    report: &str,
    table: &str,
) -> Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(file_path)?;

    let mut headers: Option<StringRecord> = None;
    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let marker = row.get(0).unwrap_or("");
        if row.get(1) != Some(report) || row.get(2) != Some(table) {
            continue;
        }
        match marker {
            "I" => headers = Some(strip_markers(&row)),
            "D" => {
                let Some(headers) = &headers else {
                    bail!("Data row for table {report}.{table} before its header row");
                };
                let data = strip_markers(&row);
                let record = data.deserialize(Some(headers)).with_context(|| {
                    format!("Invalid {report}.{table} row: {}", data.iter().format(","))
                })?;
                records.push(record);
            }
            _ => {}
        }
    }
    Ok(records)
}

/// Drop the marker columns, leaving the named columns only
fn strip_markers(row: &StringRecord) -> StringRecord {
    row.iter().skip(MARKER_COLUMNS).collect()
}

/// Collapse versioned records to the latest version per key.
///
/// Record files accumulate re-submissions; the effective one for a key is the record with
/// the greatest ordering value (typically an effective datetime and version number pair).
/// First-seen key order is preserved.
pub fn keep_latest<T, K, O>(
    records: impl IntoIterator<Item = T>,
    key_fn: impl Fn(&T) -> K,
    order_fn: impl Fn(&T) -> O,
) -> Vec<T>
where
    K: Hash + Eq,
    O: PartialOrd,
{
    let mut latest: IndexMap<K, T> = IndexMap::new();
    for record in records {
        match latest.entry(key_fn(&record)) {
            indexmap::map::Entry::Occupied(mut entry) => {
                if order_fn(&record) >= order_fn(entry.get()) {
                    entry.insert(record);
                }
            }
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(record);
            }
        }
    }
    latest.into_values().collect()
}

/// Collapse versioned records to the one in force per key.
///
/// Like [`keep_latest`], but for tables that version records by an effective date and
/// version number pair which must first be parsed.
pub fn keep_effective<T, K>(
    records: Vec<T>,
    key_fn: impl Fn(&T) -> K,
    effective_fn: impl Fn(&T) -> Result<(NaiveDateTime, u32)>,
) -> Result<Vec<T>>
where
    K: Hash + Eq,
{
    let keyed: Vec<_> = records
        .into_iter()
        .map(|record| Ok((effective_fn(&record)?, record)))
        .collect::<Result<_>>()?;
    let latest = keep_latest(keyed, |(_, record)| key_fn(record), |(effective, _)| *effective);
    Ok(latest.into_iter().map(|(_, record)| record).collect())
}

/// Combine a ten-band price/availability table into band offers.
///
/// Trailing bands with no availability are dropped; earlier empty bands are kept so band
/// numbering is preserved.
pub fn collect_bands(
    prices: [Option<f64>; 10],
    avails: [Option<f64>; 10],
) -> Vec<crate::unit::BandOffer> {
    let mut bands: Vec<_> = prices
        .iter()
        .zip(avails.iter())
        .map(|(price, avail)| {
            crate::unit::BandOffer::new(price.unwrap_or(0.0), avail.unwrap_or(0.0))
        })
        .collect();
    while let Some(last) = bands.last() {
        if last.avail.value() != 0.0 {
            break;
        }
        bands.pop();
    }
    bands
}

/// Check that exactly one record is present for the given description
pub fn expect_single<T>(mut records: Vec<T>, what: &str) -> Result<T> {
    let record = records
        .pop()
        .with_context(|| format!("No {what} record found"))?;
    ensure!(records.is_empty(), "Multiple {what} records found");
    Ok(record)
}

/// Load one dispatch interval from a case directory.
///
/// A case directory holds the market record files of a single interval: `units.csv`,
/// `bids.csv` and `dispatch.csv` are required; `network.csv`, `constraints.csv` and
/// `market.csv` are optional. The dispatch record file supplies demand and start-of-interval
/// telemetry as well as the historical solution the engine is validated against.
pub fn load_interval(
    case_dir: &Path,
    process: ProcessKind,
    config: &DispatchConfig,
) -> Result<DispatchInterval> {
    let mut interval = DispatchInterval::new(process);
    interval.units = registry::read_units(case_dir)?;
    interval.regions = registry::read_regions(case_dir)?;
    interval.price_limits = registry::read_price_limits(case_dir)?;
    offers::read_unit_offers(case_dir, &mut interval.units)?;
    interval.interconnectors = network::read_interconnectors(case_dir)?;
    offers::read_link_offers(case_dir, &mut interval.interconnectors)?;
    interval.generic_constraints =
        constraints::read_constraints(case_dir, config.violation_prices.generic)?;
    // solution records last: telemetry needs the offers in place
    registry::read_unit_solutions(case_dir, &mut interval)?;
    registry::read_region_prices(case_dir, &mut interval.historical)?;
    constraints::read_constraint_solutions(case_dir, &mut interval)?;
    network::read_interconnector_solutions(case_dir, &mut interval)?;
    interval.validate()?;
    Ok(interval)
}
