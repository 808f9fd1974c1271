//! Code for reading generic constraints and their historical outcomes.
//!
//! A generic constraint is split across a definition table and three factor tables, one
//! per kind of left-hand-side term. The dispatch record file carries the interval's
//! right-hand-side overrides and the marginal values of the historical run.
use super::{
    input_err_msg, keep_effective, read_mms_table_optional, ENERGY_BID_TYPE, DISPATCH_FILE_NAME,
    DISPATCH_REPORT,
};
use crate::constraint::{
    ConstraintMap, ConstraintSense, GenericConstraint, InterconnectorFactor, RegionFactor,
    UnitFactor,
};
use crate::market::{DispatchInterval, HistoricalConstraintState};
use crate::service::FcasService;
use crate::units::MoneyPerMegaWattHour;
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::Path;

const CONSTRAINTS_FILE_NAME: &str = "constraints.csv";
const CONSTRAINTS_REPORT: &str = "GENERIC_CONSTRAINT";

#[derive(Debug, Deserialize)]
struct ConstraintRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "GENCONID")]
    constraint_id: String,
    #[serde(rename = "CONSTRAINTTYPE")]
    sense: ConstraintSense,
    #[serde(rename = "CONSTRAINTVALUE")]
    rhs: f64,
    #[serde(rename = "VIOLATIONPRICE")]
    violation_price: Option<f64>,
    /// Whether the constraint is invoked for real-time dispatch; absent means invoked
    #[serde(rename = "DISPATCH")]
    dispatch: Option<u8>,
    #[serde(rename = "FIVEMINPREDISPATCH")]
    five_minute_forecast: Option<u8>,
    #[serde(rename = "PREDISPATCH")]
    pre_dispatch: Option<u8>,
}

impl ConstraintRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

fn flag(value: Option<u8>) -> bool {
    value.map_or(true, |v| v != 0)
}

/// A term over a unit's energy or FCAS target
#[derive(Debug, Deserialize)]
struct UnitFactorRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "GENCONID")]
    constraint_id: String,
    #[serde(rename = "DUID")]
    unit_id: String,
    /// `ENERGY` or an FCAS service code
    #[serde(rename = "BIDTYPE")]
    bid_type: String,
    #[serde(rename = "FACTOR")]
    factor: f64,
}

impl UnitFactorRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }

    fn service(&self) -> Result<Option<FcasService>> {
        if self.bid_type == ENERGY_BID_TYPE {
            return Ok(None);
        }
        let service = self.bid_type.parse().with_context(|| {
            format!(
                "Invalid bid type in a factor for constraint {}",
                self.constraint_id
            )
        })?;
        Ok(Some(service))
    }
}

#[derive(Debug, Deserialize)]
struct InterconnectorFactorRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "GENCONID")]
    constraint_id: String,
    #[serde(rename = "INTERCONNECTORID")]
    interconnector_id: String,
    #[serde(rename = "FACTOR")]
    factor: f64,
}

impl InterconnectorFactorRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

/// A term over a region's total for an FCAS service
#[derive(Debug, Deserialize)]
struct RegionFactorRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "GENCONID")]
    constraint_id: String,
    #[serde(rename = "REGIONID")]
    region_id: String,
    #[serde(rename = "BIDTYPE")]
    service: FcasService,
    #[serde(rename = "FACTOR")]
    factor: f64,
}

impl RegionFactorRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

/// Read the generic constraints from a case directory.
///
/// Definitions that declare no violation price get `fallback_price`. A case with no
/// constraints file yields an empty map.
pub fn read_constraints(
    case_dir: &Path,
    fallback_price: MoneyPerMegaWattHour,
) -> Result<ConstraintMap> {
    let file_path = case_dir.join(CONSTRAINTS_FILE_NAME);
    let definitions = read_mms_table_optional(&file_path, CONSTRAINTS_REPORT, "GENCONDATA")?;
    let unit_factors =
        read_mms_table_optional(&file_path, CONSTRAINTS_REPORT, "SPDCONNECTIONPOINTCONSTRAINT")?;
    let interconnector_factors =
        read_mms_table_optional(&file_path, CONSTRAINTS_REPORT, "SPDINTERCONNECTORCONSTRAINT")?;
    let region_factors =
        read_mms_table_optional(&file_path, CONSTRAINTS_REPORT, "SPDREGIONCONSTRAINT")?;
    constraints_from_records(
        definitions,
        unit_factors,
        interconnector_factors,
        region_factors,
        fallback_price,
    )
    .with_context(|| input_err_msg(&file_path))
}

fn constraints_from_records(
    definitions: Vec<ConstraintRecord>,
    unit_factors: Vec<UnitFactorRecord>,
    interconnector_factors: Vec<InterconnectorFactorRecord>,
    region_factors: Vec<RegionFactorRecord>,
    fallback_price: MoneyPerMegaWattHour,
) -> Result<ConstraintMap> {
    let definitions = keep_effective(
        definitions,
        |r| r.constraint_id.clone(),
        ConstraintRecord::effective,
    )?;

    let mut constraints = ConstraintMap::new();
    for record in definitions {
        let mut constraint = GenericConstraint::new(
            &record.constraint_id,
            record.sense,
            record.rhs,
            record
                .violation_price
                .map_or(fallback_price, MoneyPerMegaWattHour),
        );
        constraint.dispatch = flag(record.dispatch);
        constraint.five_minute_forecast = flag(record.five_minute_forecast);
        constraint.pre_dispatch = flag(record.pre_dispatch);
        constraints.insert(constraint.id.clone(), constraint);
    }

    let unit_factors = keep_effective(
        unit_factors,
        |r| (r.constraint_id.clone(), r.unit_id.clone(), r.bid_type.clone()),
        UnitFactorRecord::effective,
    )?;
    for record in unit_factors {
        let constraint = lookup(&mut constraints, &record.constraint_id)?;
        constraint.unit_factors.push(UnitFactor {
            unit_id: record.unit_id.as_str().into(),
            service: record.service()?,
            factor: record.factor,
        });
    }

    let interconnector_factors = keep_effective(
        interconnector_factors,
        |r| (r.constraint_id.clone(), r.interconnector_id.clone()),
        InterconnectorFactorRecord::effective,
    )?;
    for record in interconnector_factors {
        let constraint = lookup(&mut constraints, &record.constraint_id)?;
        constraint
            .interconnector_factors
            .push(InterconnectorFactor {
                interconnector_id: record.interconnector_id.as_str().into(),
                factor: record.factor,
            });
    }

    let region_factors = keep_effective(
        region_factors,
        |r| (r.constraint_id.clone(), r.region_id.clone(), r.service),
        RegionFactorRecord::effective,
    )?;
    for record in region_factors {
        let constraint = lookup(&mut constraints, &record.constraint_id)?;
        constraint.region_factors.push(RegionFactor {
            region_id: record.region_id.as_str().into(),
            service: record.service,
            factor: record.factor,
        });
    }

    Ok(constraints)
}

fn lookup<'a>(
    constraints: &'a mut ConstraintMap,
    constraint_id: &str,
) -> Result<&'a mut GenericConstraint> {
    constraints
        .get_mut(constraint_id)
        .with_context(|| format!("Factor for unknown constraint {constraint_id}"))
}

/// Right-hand sides and marginal values from the historical run
#[derive(Debug, Deserialize)]
struct ConstraintSolutionRecord {
    #[serde(rename = "CONSTRAINTID")]
    constraint_id: String,
    #[serde(rename = "INTERVENTION")]
    intervention: u32,
    #[serde(rename = "RHS")]
    rhs: Option<f64>,
    #[serde(rename = "MARGINALVALUE")]
    marginal_value: f64,
}

/// Read constraint solution records, applying RHS overrides and recording history.
///
/// Only pricing-run rows are used; marginal values from an intervened run do not set
/// prices. A solution row whose constraint is absent from the definitions still lands in
/// the historical records so validation can report the omission.
pub fn read_constraint_solutions(case_dir: &Path, interval: &mut DispatchInterval) -> Result<()> {
    let file_path = case_dir.join(DISPATCH_FILE_NAME);
    let records = read_mms_table_optional(&file_path, DISPATCH_REPORT, "CONSTRAINT")?;
    apply_constraint_solutions(records, interval);
    Ok(())
}

fn apply_constraint_solutions(
    records: Vec<ConstraintSolutionRecord>,
    interval: &mut DispatchInterval,
) {
    for record in records {
        if record.intervention != 0 {
            continue;
        }
        if let Some(constraint) = interval
            .generic_constraints
            .get_mut(record.constraint_id.as_str())
        {
            constraint.rhs_override = record.rhs;
        }
        interval.historical.constraints.insert(
            record.constraint_id.as_str().into(),
            HistoricalConstraintState {
                marginal_value: MoneyPerMegaWattHour(record.marginal_value),
                binding: record.marginal_value != 0.0,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::service::{ProcessKind, RAISE_REG};
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn definition(id: &str, version: u32, rhs: f64) -> ConstraintRecord {
        ConstraintRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version,
            constraint_id: id.to_string(),
            sense: ConstraintSense::LessOrEqual,
            rhs,
            violation_price: None,
            dispatch: None,
            five_minute_forecast: None,
            pre_dispatch: None,
        }
    }

    fn unit_factor(id: &str, unit_id: &str, bid_type: &str, factor: f64) -> UnitFactorRecord {
        UnitFactorRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version: 1,
            constraint_id: id.to_string(),
            unit_id: unit_id.to_string(),
            bid_type: bid_type.to_string(),
            factor,
        }
    }

    const FALLBACK: MoneyPerMegaWattHour = MoneyPerMegaWattHour(430_000.0);

    #[test]
    fn test_definitions_resolve_to_latest_version() {
        let mut stale = definition("N>>N-NIL_HA", 1, 500.0);
        stale.violation_price = Some(35_000.0);
        let mut current = definition("N>>N-NIL_HA", 2, 661.5);
        current.dispatch = Some(1);
        current.five_minute_forecast = Some(0);

        let constraints =
            constraints_from_records(vec![stale, current], vec![], vec![], vec![], FALLBACK)
                .unwrap();

        let constraint = &constraints["N>>N-NIL_HA"];
        assert_eq!(constraint.rhs, 661.5);
        // the replacement declared no price, so the fallback applies
        assert_eq!(constraint.violation_price, FALLBACK);
        assert!(constraint.applies_to(ProcessKind::Dispatch));
        assert!(!constraint.applies_to(ProcessKind::FiveMinuteForecast));
        assert!(constraint.applies_to(ProcessKind::PreDispatch));
    }

    #[test]
    fn test_factors_attached() {
        let definitions = vec![definition("F_MAIN_RREG", 1, 150.0)];
        let unit_factors = vec![
            unit_factor("F_MAIN_RREG", "BW01", "ENERGY", -0.5),
            unit_factor("F_MAIN_RREG", "BW01", "RAISEREG", 1.0),
        ];
        let interconnector_factors = vec![InterconnectorFactorRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version: 1,
            constraint_id: "F_MAIN_RREG".to_string(),
            interconnector_id: "VIC1-NSW1".to_string(),
            factor: 0.12,
        }];
        let region_factors = vec![RegionFactorRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version: 1,
            constraint_id: "F_MAIN_RREG".to_string(),
            region_id: "NSW1".to_string(),
            service: RAISE_REG,
            factor: 1.0,
        }];

        let constraints = constraints_from_records(
            definitions,
            unit_factors,
            interconnector_factors,
            region_factors,
            FALLBACK,
        )
        .unwrap();

        let constraint = &constraints["F_MAIN_RREG"];
        assert_eq!(constraint.unit_factors.len(), 2);
        assert_eq!(constraint.unit_factors[0].service, None);
        assert_eq!(constraint.unit_factors[1].service, Some(RAISE_REG));
        assert_eq!(constraint.interconnector_factors[0].factor, 0.12);
        assert_eq!(constraint.region_factors[0].service, RAISE_REG);
        assert!(constraint.references_fcas());
    }

    #[test]
    fn test_duplicate_factors_resolve_to_latest_version() {
        let definitions = vec![definition("Q>NIL_BI_POT", 1, 1000.0)];
        let mut stale = unit_factor("Q>NIL_BI_POT", "BW01", "ENERGY", 0.5);
        stale.version = 1;
        let mut current = unit_factor("Q>NIL_BI_POT", "BW01", "ENERGY", 0.75);
        current.version = 2;

        let constraints =
            constraints_from_records(definitions, vec![stale, current], vec![], vec![], FALLBACK)
                .unwrap();

        let factors = &constraints["Q>NIL_BI_POT"].unit_factors;
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].factor, 0.75);
    }

    #[test]
    fn test_factor_for_unknown_constraint() {
        let unit_factors = vec![unit_factor("GHOST", "BW01", "ENERGY", 1.0)];
        let result = constraints_from_records(vec![], unit_factors, vec![], vec![], FALLBACK);
        assert_error!(result, "Factor for unknown constraint GHOST");
    }

    #[test]
    fn test_invalid_bid_type_in_factor() {
        let definitions = vec![definition("Q>NIL_BI_POT", 1, 1000.0)];
        let unit_factors = vec![unit_factor("Q>NIL_BI_POT", "BW01", "RAISEFAST", 1.0)];
        let result = constraints_from_records(definitions, unit_factors, vec![], vec![], FALLBACK);
        assert_error!(
            result,
            "Invalid bid type in a factor for constraint Q>NIL_BI_POT"
        );
    }

    #[test]
    fn test_missing_constraints_file_means_no_constraints() {
        let dir = tempdir().unwrap();
        let constraints = read_constraints(dir.path(), FALLBACK).unwrap();
        assert!(constraints.is_empty());
    }

    #[test]
    fn test_read_constraints_from_file() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(CONSTRAINTS_FILE_NAME)).unwrap();
        writeln!(
            file,
            "C,NEMP.WORLD,CONSTRAINTS,AEMO,PUBLIC\n\
             I,GENERIC_CONSTRAINT,GENCONDATA,1,EFFECTIVEDATE,VERSIONNO,GENCONID,CONSTRAINTTYPE,CONSTRAINTVALUE,VIOLATIONPRICE,DISPATCH,FIVEMINPREDISPATCH,PREDISPATCH\n\
             D,GENERIC_CONSTRAINT,GENCONDATA,1,2023/01/01 00:00:00,1,V>>V_NIL_2,<=,850.0,35000.0,1,1,1\n\
             I,GENERIC_CONSTRAINT,SPDINTERCONNECTORCONSTRAINT,1,EFFECTIVEDATE,VERSIONNO,GENCONID,INTERCONNECTORID,FACTOR\n\
             D,GENERIC_CONSTRAINT,SPDINTERCONNECTORCONSTRAINT,1,2023/01/01 00:00:00,1,V>>V_NIL_2,VIC1-NSW1,1.0"
        )
        .unwrap();

        let constraints = read_constraints(dir.path(), FALLBACK).unwrap();

        let constraint = &constraints["V>>V_NIL_2"];
        assert_eq!(constraint.sense, ConstraintSense::LessOrEqual);
        assert_eq!(constraint.violation_price, MoneyPerMegaWattHour(35_000.0));
        assert_eq!(constraint.interconnector_factors.len(), 1);
    }

    #[test]
    fn test_constraint_solutions_override_rhs_from_the_pricing_run() {
        let mut interval = DispatchInterval::new(ProcessKind::Dispatch);
        let constraint = GenericConstraint::new(
            "V>>V_NIL_2",
            ConstraintSense::LessOrEqual,
            850.0,
            FALLBACK,
        );
        interval
            .generic_constraints
            .insert(constraint.id.clone(), constraint);

        let records = vec![
            ConstraintSolutionRecord {
                constraint_id: "V>>V_NIL_2".to_string(),
                intervention: 0,
                rhs: Some(822.4),
                marginal_value: -76.0,
            },
            ConstraintSolutionRecord {
                constraint_id: "V>>V_NIL_2".to_string(),
                intervention: 1,
                rhs: Some(700.0),
                marginal_value: -120.0,
            },
        ];
        apply_constraint_solutions(records, &mut interval);

        assert_eq!(
            interval.generic_constraints["V>>V_NIL_2"].effective_rhs(),
            822.4
        );
        let state = &interval.historical.constraints["V>>V_NIL_2"];
        assert_eq!(state.marginal_value, MoneyPerMegaWattHour(-76.0));
        assert!(state.binding);
    }

    #[test]
    fn test_solution_for_omitted_constraint_still_recorded() {
        let mut interval = DispatchInterval::new(ProcessKind::Dispatch);
        let records = vec![ConstraintSolutionRecord {
            constraint_id: "Q>NIL_BI_POT".to_string(),
            intervention: 0,
            rhs: None,
            marginal_value: 0.0,
        }];
        apply_constraint_solutions(records, &mut interval);

        assert!(interval.generic_constraints.is_empty());
        let state = &interval.historical.constraints["Q>NIL_BI_POT"];
        assert!(!state.binding);
    }

    #[test]
    fn test_fcas_region_factor_parses_service_codes() {
        let lower_6_sec: FcasService = "LOWER6SEC".parse().unwrap();
        let definitions = vec![definition("F_T+LREG_0220", 1, 220.0)];
        let region_factors = vec![RegionFactorRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version: 1,
            constraint_id: "F_T+LREG_0220".to_string(),
            region_id: "TAS1".to_string(),
            service: lower_6_sec,
            factor: 1.0,
        }];

        let constraints =
            constraints_from_records(definitions, vec![], vec![], region_factors, FALLBACK)
                .unwrap();
        assert_eq!(
            constraints["F_T+LREG_0220"].region_factors[0].service,
            lower_6_sec
        );
    }
}
