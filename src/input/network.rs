//! Code for reading interconnectors and their flow records.
//!
//! Interconnector data is spread over a registration table, a limits table, an optional
//! loss curve and, for market network service providers, a link table. Flow telemetry and
//! historical flows for the interval come from the dispatch record file.
use super::{
    input_err_msg, keep_effective, keep_latest, read_mms_table_optional, DISPATCH_FILE_NAME,
    DISPATCH_REPORT,
};
use crate::interconnector::{Interconnector, InterconnectorMap, LossModel, LossPoint, MnspLink};
use crate::market::DispatchInterval;
use crate::units::{Dimensionless, MegaWatts, MegaWattsPerMinute};
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::Path;

const NETWORK_FILE_NAME: &str = "network.csv";
const NETWORK_REPORT: &str = "INTERCONNECTOR";

#[derive(Debug, Deserialize)]
struct InterconnectorRecord {
    #[serde(rename = "INTERCONNECTORID")]
    interconnector_id: String,
    #[serde(rename = "REGIONFROM")]
    from_region: String,
    #[serde(rename = "REGIONTO")]
    to_region: String,
}

#[derive(Debug, Deserialize)]
struct InterconnectorLimitRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "INTERCONNECTORID")]
    interconnector_id: String,
    /// Limit on reverse flow. The historical tables store this as a negative flow value;
    /// only the magnitude is used.
    #[serde(rename = "IMPORTLIMIT")]
    import_limit: f64,
    #[serde(rename = "EXPORTLIMIT")]
    export_limit: f64,
    /// Ramp limit in megawatts per minute
    #[serde(rename = "RAMPLIMIT")]
    ramp_limit: Option<f64>,
    /// Share of losses debited to the from region, required when a loss curve is given
    #[serde(rename = "FROMREGIONLOSSSHARE")]
    from_region_loss_share: Option<f64>,
}

impl InterconnectorLimitRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

/// One breakpoint of an interconnector loss curve.
///
/// The curve is supplied directly as flow and loss pairs rather than derived from a
/// loss-factor equation.
#[derive(Debug, Deserialize)]
struct LossPointRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "INTERCONNECTORID")]
    interconnector_id: String,
    #[serde(rename = "LOSSSEGMENT")]
    segment: u32,
    #[serde(rename = "MWBREAKPOINT")]
    breakpoint: f64,
    #[serde(rename = "MWLOSS")]
    loss: f64,
}

impl LossPointRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

#[derive(Debug, Deserialize)]
struct MnspLinkRecord {
    #[serde(rename = "EFFECTIVEDATE")]
    effective_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "LINKID")]
    link_id: String,
    #[serde(rename = "INTERCONNECTORID")]
    interconnector_id: String,
    #[serde(rename = "FROMREGION")]
    from_region: String,
    #[serde(rename = "TOREGION")]
    to_region: String,
    /// Registered capacity, used as the availability until an offer arrives
    #[serde(rename = "MAXCAPACITY")]
    max_capacity: f64,
    #[serde(rename = "FROM_REGION_TLF")]
    from_region_tlf: Option<f64>,
    #[serde(rename = "TO_REGION_TLF")]
    to_region_tlf: Option<f64>,
}

impl MnspLinkRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.effective_date)?, self.version))
    }
}

/// Read the interconnectors from a case directory.
///
/// A case with no network file describes a single-region market and yields an empty map.
pub fn read_interconnectors(case_dir: &Path) -> Result<InterconnectorMap> {
    let file_path = case_dir.join(NETWORK_FILE_NAME);
    let registrations = read_mms_table_optional(&file_path, NETWORK_REPORT, "INTERCONNECTOR")?;
    let limits = read_mms_table_optional(&file_path, NETWORK_REPORT, "INTERCONNECTORCONSTRAINT")?;
    let loss_points = read_mms_table_optional(&file_path, NETWORK_REPORT, "LOSSMODEL")?;
    let links = read_mms_table_optional(&file_path, NETWORK_REPORT, "MNSP_INTERCONNECTOR")?;
    interconnectors_from_records(registrations, limits, loss_points, links)
        .with_context(|| input_err_msg(&file_path))
}

fn interconnectors_from_records(
    registrations: Vec<InterconnectorRecord>,
    limits: Vec<InterconnectorLimitRecord>,
    loss_points: Vec<LossPointRecord>,
    links: Vec<MnspLinkRecord>,
) -> Result<InterconnectorMap> {
    let mut limits: IndexMap<_, _> = keep_effective(
        limits,
        |r| r.interconnector_id.clone(),
        InterconnectorLimitRecord::effective,
    )?
    .into_iter()
    .map(|r| (r.interconnector_id.clone(), r))
    .collect();
    let loss_points = keep_effective(
        loss_points,
        |r| (r.interconnector_id.clone(), r.segment),
        LossPointRecord::effective,
    )?;
    let links = keep_effective(links, |r| r.link_id.clone(), MnspLinkRecord::effective)?;

    // the loss share lives on the limits record but is only consumed with the loss curve
    let loss_shares: IndexMap<String, Option<f64>> = limits
        .values()
        .map(|r| (r.interconnector_id.clone(), r.from_region_loss_share))
        .collect();

    let mut interconnectors = InterconnectorMap::new();
    for registration in registrations {
        let limit = limits
            .swap_remove(&registration.interconnector_id)
            .with_context(|| {
                format!(
                    "Interconnector {} has no limits record",
                    registration.interconnector_id
                )
            })?;
        let mut interconnector = Interconnector::new(
            &registration.interconnector_id,
            &registration.from_region,
            &registration.to_region,
            MegaWatts(limit.import_limit).abs(),
            MegaWatts(limit.export_limit),
        )?;
        interconnector.ramp_limit = limit.ramp_limit.map(MegaWattsPerMinute);
        interconnectors.insert(interconnector.id.clone(), interconnector);
    }
    if let Some(id) = limits.keys().next() {
        bail!("Limits record for unknown interconnector {id}");
    }

    let mut curves: IndexMap<String, Vec<LossPointRecord>> = IndexMap::new();
    for point in loss_points {
        curves
            .entry(point.interconnector_id.clone())
            .or_default()
            .push(point);
    }
    for (id, mut points) in curves {
        let interconnector = interconnectors
            .get_mut(id.as_str())
            .with_context(|| format!("Loss model for unknown interconnector {id}"))?;
        points.sort_by_key(|point| point.segment);
        let breakpoints = points
            .iter()
            .map(|point| LossPoint::new(point.breakpoint, point.loss))
            .collect();
        let share = loss_shares
            .get(id.as_str())
            .copied()
            .flatten()
            .with_context(|| {
                format!("Interconnector {id} has a loss curve but no from-region loss share")
            })?;
        interconnector.loss_model = Some(LossModel::new(breakpoints, Dimensionless(share))?);
    }

    for record in links {
        let interconnector = interconnectors
            .get_mut(record.interconnector_id.as_str())
            .with_context(|| {
                format!(
                    "Network service link {} names unknown interconnector {}",
                    record.link_id, record.interconnector_id
                )
            })?;
        let mut link = MnspLink::new(
            &record.link_id,
            &record.from_region,
            &record.to_region,
            Vec::new(),
            MegaWatts(record.max_capacity),
        )?;
        link.from_region_loss_factor = Dimensionless(record.from_region_tlf.unwrap_or(1.0));
        link.to_region_loss_factor = Dimensionless(record.to_region_tlf.unwrap_or(1.0));
        interconnector.links.push(link);
    }

    Ok(interconnectors)
}

/// Cleared and telemetered interconnector flows for the interval
#[derive(Debug, Deserialize)]
struct InterconnectorSolutionRecord {
    #[serde(rename = "INTERCONNECTORID")]
    interconnector_id: String,
    #[serde(rename = "INTERVENTION")]
    intervention: u32,
    #[serde(rename = "METEREDMWFLOW")]
    metered_mw_flow: f64,
    #[serde(rename = "MWFLOW")]
    mw_flow: f64,
}

/// Read interconnector flow records, seeding initial flows and the historical solution.
///
/// The metered flow becomes the starting point for ramp limits. For an MNSP the metered
/// flow is also decomposed onto the directional links: the link aligned with the flow
/// starts at its magnitude and the opposing link starts at zero.
pub fn read_interconnector_solutions(
    case_dir: &Path,
    interval: &mut DispatchInterval,
) -> Result<()> {
    let file_path = case_dir.join(DISPATCH_FILE_NAME);
    let records = read_mms_table_optional(&file_path, DISPATCH_REPORT, "INTERCONNECTORRES")?;
    apply_interconnector_solutions(records, interval).with_context(|| input_err_msg(&file_path))
}

fn apply_interconnector_solutions(
    records: Vec<InterconnectorSolutionRecord>,
    interval: &mut DispatchInterval,
) -> Result<()> {
    // an intervened run re-dispatches flows, so its telemetry wins
    let records = keep_latest(records, |r| r.interconnector_id.clone(), |r| r.intervention);
    for record in records {
        let interconnector = interval
            .interconnectors
            .get_mut(record.interconnector_id.as_str())
            .with_context(|| {
                format!(
                    "Flow solution for unknown interconnector {}",
                    record.interconnector_id
                )
            })?;
        interconnector.initial_mw_flow = MegaWatts(record.metered_mw_flow);
        let from_region = interconnector.from_region.clone();
        for link in &mut interconnector.links {
            let aligned = link.from_region == from_region;
            let initial = if aligned {
                record.metered_mw_flow.max(0.0)
            } else {
                (-record.metered_mw_flow).max(0.0)
            };
            link.initial_mw = MegaWatts(initial);
        }
        interval
            .historical
            .interconnector_flows
            .insert(interconnector.id.clone(), MegaWatts(record.mw_flow));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::service::ProcessKind;
    use std::borrow::Borrow;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn registration(id: &str, from: &str, to: &str) -> InterconnectorRecord {
        InterconnectorRecord {
            interconnector_id: id.to_string(),
            from_region: from.to_string(),
            to_region: to.to_string(),
        }
    }

    fn limit(id: &str, version: u32, import: f64, export: f64) -> InterconnectorLimitRecord {
        InterconnectorLimitRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version,
            interconnector_id: id.to_string(),
            import_limit: import,
            export_limit: export,
            ramp_limit: None,
            from_region_loss_share: None,
        }
    }

    fn loss_point(id: &str, segment: u32, breakpoint: f64, loss: f64) -> LossPointRecord {
        LossPointRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version: 1,
            interconnector_id: id.to_string(),
            segment,
            breakpoint,
            loss,
        }
    }

    fn mnsp_link(link_id: &str, ic_id: &str, from: &str, to: &str) -> MnspLinkRecord {
        MnspLinkRecord {
            effective_date: "2023/01/01 00:00:00".to_string(),
            version: 1,
            link_id: link_id.to_string(),
            interconnector_id: ic_id.to_string(),
            from_region: from.to_string(),
            to_region: to.to_string(),
            max_capacity: 478.0,
            from_region_tlf: Some(0.99),
            to_region_tlf: None,
        }
    }

    #[test]
    fn test_registration_and_limits_joined() {
        let registrations = vec![registration("VIC1-NSW1", "VIC1", "NSW1")];
        let mut stale = limit("VIC1-NSW1", 1, -1000.0, 1500.0);
        stale.ramp_limit = Some(10.0);
        let current = limit("VIC1-NSW1", 2, -1350.0, 1600.0);

        let interconnectors =
            interconnectors_from_records(registrations, vec![stale, current], vec![], vec![])
                .unwrap();

        let ic = &interconnectors["VIC1-NSW1"];
        assert_eq!(ic.import_limit, MegaWatts(1350.0));
        assert_eq!(ic.export_limit, MegaWatts(1600.0));
        assert_eq!(ic.ramp_limit, None);
        assert!(ic.loss_model.is_none());
        assert!(!ic.is_mnsp());
    }

    #[test]
    fn test_missing_limits_record() {
        let registrations = vec![registration("VIC1-NSW1", "VIC1", "NSW1")];
        let result = interconnectors_from_records(registrations, vec![], vec![], vec![]);
        assert_error!(result, "Interconnector VIC1-NSW1 has no limits record");
    }

    #[test]
    fn test_limits_for_unknown_interconnector() {
        let limits = vec![limit("GHOST-IC", 1, -100.0, 100.0)];
        let result = interconnectors_from_records(vec![], limits, vec![], vec![]);
        assert_error!(result, "Limits record for unknown interconnector GHOST-IC");
    }

    #[test]
    fn test_loss_curve_attached_in_segment_order() {
        let registrations = vec![registration("V-SA", "VIC1", "SA1")];
        let mut limits = vec![limit("V-SA", 1, -850.0, 600.0)];
        limits[0].from_region_loss_share = Some(0.73);
        let points = vec![
            loss_point("V-SA", 3, 600.0, 40.0),
            loss_point("V-SA", 1, -850.0, 50.0),
            loss_point("V-SA", 2, 0.0, 0.0),
        ];

        let interconnectors =
            interconnectors_from_records(registrations, limits, points, vec![]).unwrap();

        let model = interconnectors["V-SA"].loss_model.as_ref().unwrap();
        assert_eq!(model.breakpoints.len(), 3);
        assert_eq!(model.breakpoints[0], LossPoint::new(-850.0, 50.0));
        assert_eq!(model.breakpoints[2], LossPoint::new(600.0, 40.0));
        assert_eq!(model.from_region_share, Dimensionless(0.73));
    }

    #[test]
    fn test_loss_curve_requires_a_share() {
        let registrations = vec![registration("V-SA", "VIC1", "SA1")];
        let limits = vec![limit("V-SA", 1, -850.0, 600.0)];
        let points = vec![
            loss_point("V-SA", 1, -850.0, 50.0),
            loss_point("V-SA", 2, 600.0, 40.0),
        ];

        let result = interconnectors_from_records(registrations, limits, points, vec![]);
        assert_error!(
            result,
            "Interconnector V-SA has a loss curve but no from-region loss share"
        );
    }

    #[test]
    fn test_mnsp_links_attached() {
        let registrations = vec![registration("T-V-MNSP1", "TAS1", "VIC1")];
        let limits = vec![limit("T-V-MNSP1", 1, -478.0, 594.0)];
        let links = vec![
            mnsp_link("BLNKTAS", "T-V-MNSP1", "VIC1", "TAS1"),
            mnsp_link("BLNKVIC", "T-V-MNSP1", "TAS1", "VIC1"),
        ];

        let interconnectors =
            interconnectors_from_records(registrations, limits, vec![], links).unwrap();

        let ic = &interconnectors["T-V-MNSP1"];
        assert!(ic.is_mnsp());
        assert_eq!(ic.links.len(), 2);
        let tas: &str = ic.links[0].id.borrow();
        assert_eq!(tas, "BLNKTAS");
        assert_eq!(ic.links[0].from_region_loss_factor, Dimensionless(0.99));
        assert_eq!(ic.links[0].to_region_loss_factor, Dimensionless(1.0));
        assert_eq!(ic.links[0].max_avail, MegaWatts(478.0));
        assert!(ic.links[0].bands.is_empty());
    }

    #[test]
    fn test_link_for_unknown_interconnector() {
        let links = vec![mnsp_link("BLNKTAS", "GHOST-IC", "VIC1", "TAS1")];
        let result = interconnectors_from_records(vec![], vec![], vec![], links);
        assert_error!(
            result,
            "Network service link BLNKTAS names unknown interconnector GHOST-IC"
        );
    }

    #[test]
    fn test_read_interconnectors_from_file() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(NETWORK_FILE_NAME)).unwrap();
        writeln!(
            file,
            "C,NEMP.WORLD,NETWORK,AEMO,PUBLIC\n\
             I,INTERCONNECTOR,INTERCONNECTOR,1,INTERCONNECTORID,REGIONFROM,REGIONTO\n\
             D,INTERCONNECTOR,INTERCONNECTOR,1,VIC1-NSW1,VIC1,NSW1\n\
             I,INTERCONNECTOR,INTERCONNECTORCONSTRAINT,1,EFFECTIVEDATE,VERSIONNO,INTERCONNECTORID,IMPORTLIMIT,EXPORTLIMIT,RAMPLIMIT,FROMREGIONLOSSSHARE\n\
             D,INTERCONNECTOR,INTERCONNECTORCONSTRAINT,1,2023/01/01 00:00:00,1,VIC1-NSW1,-1350.0,1600.0,25.0,"
        )
        .unwrap();

        let interconnectors = read_interconnectors(dir.path()).unwrap();

        let ic = &interconnectors["VIC1-NSW1"];
        assert_eq!(ic.import_limit, MegaWatts(1350.0));
        assert_eq!(ic.ramp_limit, Some(MegaWattsPerMinute(25.0)));
    }

    #[test]
    fn test_missing_network_file_means_no_interconnectors() {
        let dir = tempdir().unwrap();
        let interconnectors = read_interconnectors(dir.path()).unwrap();
        assert!(interconnectors.is_empty());
    }

    fn interval_with_mnsp() -> DispatchInterval {
        let registrations = vec![registration("T-V-MNSP1", "TAS1", "VIC1")];
        let limits = vec![limit("T-V-MNSP1", 1, -478.0, 594.0)];
        let links = vec![
            mnsp_link("BLNKVIC", "T-V-MNSP1", "TAS1", "VIC1"),
            mnsp_link("BLNKTAS", "T-V-MNSP1", "VIC1", "TAS1"),
        ];
        let mut interval = DispatchInterval::new(ProcessKind::Dispatch);
        interval.interconnectors =
            interconnectors_from_records(registrations, limits, vec![], links).unwrap();
        interval
    }

    #[test]
    fn test_flow_solution_seeds_telemetry_and_history() {
        let mut interval = interval_with_mnsp();
        let records = vec![
            InterconnectorSolutionRecord {
                interconnector_id: "T-V-MNSP1".to_string(),
                intervention: 0,
                metered_mw_flow: -200.0,
                mw_flow: -180.0,
            },
            InterconnectorSolutionRecord {
                interconnector_id: "T-V-MNSP1".to_string(),
                intervention: 1,
                metered_mw_flow: -220.0,
                mw_flow: -210.0,
            },
        ];

        apply_interconnector_solutions(records, &mut interval).unwrap();

        let ic = &interval.interconnectors["T-V-MNSP1"];
        assert_eq!(ic.initial_mw_flow, MegaWatts(-220.0));
        // reverse flow starts on the link pointing the other way
        assert_eq!(ic.links[0].initial_mw, MegaWatts(0.0));
        assert_eq!(ic.links[1].initial_mw, MegaWatts(220.0));
        assert_eq!(
            interval.historical.interconnector_flows["T-V-MNSP1"],
            MegaWatts(-210.0)
        );
    }

    #[test]
    fn test_flow_solution_for_unknown_interconnector() {
        let mut interval = DispatchInterval::new(ProcessKind::Dispatch);
        let records = vec![InterconnectorSolutionRecord {
            interconnector_id: "GHOST-IC".to_string(),
            intervention: 0,
            metered_mw_flow: 0.0,
            mw_flow: 0.0,
        }];
        assert_error!(
            apply_interconnector_solutions(records, &mut interval),
            "Flow solution for unknown interconnector GHOST-IC"
        );
    }
}
