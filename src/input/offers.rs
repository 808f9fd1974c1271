//! Code for reading energy, FCAS and network-service offers.
//!
//! Offers arrive split across two tables: a day offer fixing the ten band prices for the
//! trading day and a period offer carrying the band availabilities, ramp rates and
//! trapezium parameters rebid for the interval. The two are joined per unit and bid type,
//! with re-bids collapsed to the most recent (offer date, version) pair. Network service
//! links are offered the same way under their own pair of tables.
use super::{
    collect_bands, input_err_msg, keep_effective, read_mms_table, read_mms_table_optional,
    ENERGY_BID_TYPE,
};
use crate::interconnector::InterconnectorMap;
use crate::service::FcasService;
use crate::unit::{BandOffer, EnergyBid, FastStartMode, FastStartProfile, FcasBid, UnitMap};
use crate::units::{MegaWattHours, MegaWatts, MegaWattsPerMinute, Minutes};
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use std::borrow::Borrow;
use std::path::Path;

const BIDS_FILE_NAME: &str = "bids.csv";
const BID_REPORT: &str = "BID";

#[derive(Debug, Deserialize)]
struct DayOfferRecord {
    #[serde(rename = "DUID")]
    unit_id: String,
    #[serde(rename = "BIDTYPE")]
    bid_type: String,
    #[serde(rename = "OFFERDATE")]
    offer_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "PRICEBAND1")]
    price1: Option<f64>,
    #[serde(rename = "PRICEBAND2")]
    price2: Option<f64>,
    #[serde(rename = "PRICEBAND3")]
    price3: Option<f64>,
    #[serde(rename = "PRICEBAND4")]
    price4: Option<f64>,
    #[serde(rename = "PRICEBAND5")]
    price5: Option<f64>,
    #[serde(rename = "PRICEBAND6")]
    price6: Option<f64>,
    #[serde(rename = "PRICEBAND7")]
    price7: Option<f64>,
    #[serde(rename = "PRICEBAND8")]
    price8: Option<f64>,
    #[serde(rename = "PRICEBAND9")]
    price9: Option<f64>,
    #[serde(rename = "PRICEBAND10")]
    price10: Option<f64>,
    #[serde(rename = "MINIMUMLOAD")]
    minimum_load: Option<f64>,
    #[serde(rename = "T1")]
    t1: Option<f64>,
    #[serde(rename = "T2")]
    t2: Option<f64>,
    #[serde(rename = "T3")]
    t3: Option<f64>,
    #[serde(rename = "T4")]
    t4: Option<f64>,
    #[serde(rename = "DAILYENERGYCONSTRAINT")]
    daily_energy_limit: Option<f64>,
}

impl DayOfferRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.offer_date)?, self.version))
    }

    fn prices(&self) -> [Option<f64>; 10] {
        [
            self.price1,
            self.price2,
            self.price3,
            self.price4,
            self.price5,
            self.price6,
            self.price7,
            self.price8,
            self.price9,
            self.price10,
        ]
    }

    /// A fast-start profile when the offer declares any inflexibility times.
    ///
    /// The live dispatch mode comes from the unit solution table, so the profile starts
    /// inactive.
    fn fast_start_profile(&self) -> Option<FastStartProfile> {
        let times = [self.t1, self.t2, self.t3, self.t4].map(|t| t.unwrap_or(0.0));
        if times.iter().all(|t| *t == 0.0) {
            return None;
        }
        Some(FastStartProfile {
            min_loading: MegaWatts(self.minimum_load.unwrap_or(0.0)),
            t1: Minutes(times[0]),
            t2: Minutes(times[1]),
            t3: Minutes(times[2]),
            t4: Minutes(times[3]),
            mode: FastStartMode::Inactive,
            time_in_mode: Minutes(0.0),
        })
    }
}

#[derive(Debug, Deserialize)]
struct PeriodOfferRecord {
    #[serde(rename = "DUID")]
    unit_id: String,
    #[serde(rename = "BIDTYPE")]
    bid_type: String,
    #[serde(rename = "OFFERDATE")]
    offer_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "MAXAVAIL")]
    max_avail: f64,
    #[serde(rename = "BANDAVAIL1")]
    avail1: Option<f64>,
    #[serde(rename = "BANDAVAIL2")]
    avail2: Option<f64>,
    #[serde(rename = "BANDAVAIL3")]
    avail3: Option<f64>,
    #[serde(rename = "BANDAVAIL4")]
    avail4: Option<f64>,
    #[serde(rename = "BANDAVAIL5")]
    avail5: Option<f64>,
    #[serde(rename = "BANDAVAIL6")]
    avail6: Option<f64>,
    #[serde(rename = "BANDAVAIL7")]
    avail7: Option<f64>,
    #[serde(rename = "BANDAVAIL8")]
    avail8: Option<f64>,
    #[serde(rename = "BANDAVAIL9")]
    avail9: Option<f64>,
    #[serde(rename = "BANDAVAIL10")]
    avail10: Option<f64>,
    #[serde(rename = "FIXEDLOAD")]
    fixed_load: Option<f64>,
    #[serde(rename = "ROCUP")]
    roc_up: Option<f64>,
    #[serde(rename = "ROCDOWN")]
    roc_down: Option<f64>,
    #[serde(rename = "ENABLEMENTMIN")]
    enablement_min: Option<f64>,
    #[serde(rename = "LOWBREAKPOINT")]
    low_breakpoint: Option<f64>,
    #[serde(rename = "HIGHBREAKPOINT")]
    high_breakpoint: Option<f64>,
    #[serde(rename = "ENABLEMENTMAX")]
    enablement_max: Option<f64>,
}

impl PeriodOfferRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.offer_date)?, self.version))
    }

    fn avails(&self) -> [Option<f64>; 10] {
        [
            self.avail1,
            self.avail2,
            self.avail3,
            self.avail4,
            self.avail5,
            self.avail6,
            self.avail7,
            self.avail8,
            self.avail9,
            self.avail10,
        ]
    }
}

/// Read the unit offers from a case directory and attach them to the units.
///
/// Energy offers become [`EnergyBid`]s and FCAS offers become [`FcasBid`]s keyed by
/// service. A day offer declaring inflexibility times also attaches a fast-start
/// profile.
pub fn read_unit_offers(case_dir: &Path, units: &mut UnitMap) -> Result<()> {
    let file_path = case_dir.join(BIDS_FILE_NAME);
    let days = read_mms_table(&file_path, BID_REPORT, "BIDDAYOFFER_D")?;
    let periods = read_mms_table(&file_path, BID_REPORT, "BIDPEROFFER_D")?;
    attach_unit_offers(days, periods, units).with_context(|| input_err_msg(&file_path))
}

fn attach_unit_offers(
    days: Vec<DayOfferRecord>,
    periods: Vec<PeriodOfferRecord>,
    units: &mut UnitMap,
) -> Result<()> {
    let days = keep_effective(
        days,
        |r| (r.unit_id.clone(), r.bid_type.clone()),
        DayOfferRecord::effective,
    )?;
    let mut periods: IndexMap<_, _> = keep_effective(
        periods,
        |r| (r.unit_id.clone(), r.bid_type.clone()),
        PeriodOfferRecord::effective,
    )?
    .into_iter()
    .map(|r| ((r.unit_id.clone(), r.bid_type.clone()), r))
    .collect();

    for day in days {
        let key = (day.unit_id.clone(), day.bid_type.clone());
        let period = periods.swap_remove(&key).with_context(|| {
            format!(
                "Day offer {} for unit {} has no matching period offer",
                day.bid_type, day.unit_id
            )
        })?;
        let unit = units
            .get_mut(day.unit_id.as_str())
            .with_context(|| format!("Offer for unknown unit {}", day.unit_id))?;

        let bands = collect_bands(day.prices(), period.avails());
        // the declared maximum cannot exceed the offered volume
        let max_avail = MegaWatts(period.max_avail).min(offered_volume(&bands));
        if day.bid_type == ENERGY_BID_TYPE {
            let mut bid = EnergyBid::new(bands, max_avail)?;
            bid.fixed_load = period.fixed_load.filter(|mw| *mw > 0.0).map(MegaWatts);
            bid.ramp_up_rate = period.roc_up.map(MegaWattsPerMinute);
            bid.ramp_down_rate = period.roc_down.map(MegaWattsPerMinute);
            bid.daily_energy_limit = day.daily_energy_limit.map(MegaWattHours);
            unit.energy_bid = Some(bid);
            unit.fast_start = day.fast_start_profile();
        } else {
            let service: FcasService = day
                .bid_type
                .parse()
                .with_context(|| format!("Invalid bid type for unit {}", day.unit_id))?;
            let bid = FcasBid::new(
                bands,
                max_avail,
                trapezium(period.enablement_min, "ENABLEMENTMIN", &day.unit_id, service)?,
                trapezium(period.low_breakpoint, "LOWBREAKPOINT", &day.unit_id, service)?,
                trapezium(period.high_breakpoint, "HIGHBREAKPOINT", &day.unit_id, service)?,
                trapezium(period.enablement_max, "ENABLEMENTMAX", &day.unit_id, service)?,
            )?;
            unit.fcas_bids.insert(service, bid);
        }
    }

    if let Some((unit_id, bid_type)) = periods.keys().next() {
        bail!("Period offer {bid_type} for unit {unit_id} has no matching day offer");
    }
    Ok(())
}

fn offered_volume(bands: &[BandOffer]) -> MegaWatts {
    bands
        .iter()
        .fold(MegaWatts(0.0), |total, band| total + band.avail)
}

fn trapezium(
    value: Option<f64>,
    name: &str,
    unit_id: &str,
    service: FcasService,
) -> Result<MegaWatts> {
    value
        .map(MegaWatts)
        .with_context(|| format!("The {service} offer for unit {unit_id} is missing {name}"))
}

#[derive(Debug, Deserialize)]
struct LinkDayOfferRecord {
    #[serde(rename = "LINKID")]
    link_id: String,
    #[serde(rename = "OFFERDATE")]
    offer_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "PRICEBAND1")]
    price1: Option<f64>,
    #[serde(rename = "PRICEBAND2")]
    price2: Option<f64>,
    #[serde(rename = "PRICEBAND3")]
    price3: Option<f64>,
    #[serde(rename = "PRICEBAND4")]
    price4: Option<f64>,
    #[serde(rename = "PRICEBAND5")]
    price5: Option<f64>,
    #[serde(rename = "PRICEBAND6")]
    price6: Option<f64>,
    #[serde(rename = "PRICEBAND7")]
    price7: Option<f64>,
    #[serde(rename = "PRICEBAND8")]
    price8: Option<f64>,
    #[serde(rename = "PRICEBAND9")]
    price9: Option<f64>,
    #[serde(rename = "PRICEBAND10")]
    price10: Option<f64>,
}

impl LinkDayOfferRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.offer_date)?, self.version))
    }

    fn prices(&self) -> [Option<f64>; 10] {
        [
            self.price1,
            self.price2,
            self.price3,
            self.price4,
            self.price5,
            self.price6,
            self.price7,
            self.price8,
            self.price9,
            self.price10,
        ]
    }
}

#[derive(Debug, Deserialize)]
struct LinkPeriodOfferRecord {
    #[serde(rename = "LINKID")]
    link_id: String,
    #[serde(rename = "OFFERDATE")]
    offer_date: String,
    #[serde(rename = "VERSIONNO")]
    version: u32,
    #[serde(rename = "MAXAVAIL")]
    max_avail: f64,
    #[serde(rename = "BANDAVAIL1")]
    avail1: Option<f64>,
    #[serde(rename = "BANDAVAIL2")]
    avail2: Option<f64>,
    #[serde(rename = "BANDAVAIL3")]
    avail3: Option<f64>,
    #[serde(rename = "BANDAVAIL4")]
    avail4: Option<f64>,
    #[serde(rename = "BANDAVAIL5")]
    avail5: Option<f64>,
    #[serde(rename = "BANDAVAIL6")]
    avail6: Option<f64>,
    #[serde(rename = "BANDAVAIL7")]
    avail7: Option<f64>,
    #[serde(rename = "BANDAVAIL8")]
    avail8: Option<f64>,
    #[serde(rename = "BANDAVAIL9")]
    avail9: Option<f64>,
    #[serde(rename = "BANDAVAIL10")]
    avail10: Option<f64>,
    #[serde(rename = "RAMPUPRATE")]
    ramp_up_rate: Option<f64>,
    #[serde(rename = "RAMPDOWNRATE")]
    ramp_down_rate: Option<f64>,
}

impl LinkPeriodOfferRecord {
    fn effective(&self) -> Result<(NaiveDateTime, u32)> {
        Ok((super::parse_mms_datetime(&self.offer_date)?, self.version))
    }

    fn avails(&self) -> [Option<f64>; 10] {
        [
            self.avail1,
            self.avail2,
            self.avail3,
            self.avail4,
            self.avail5,
            self.avail6,
            self.avail7,
            self.avail8,
            self.avail9,
            self.avail10,
        ]
    }
}

/// Read the network service link offers and attach them to the registered links
pub fn read_link_offers(case_dir: &Path, interconnectors: &mut InterconnectorMap) -> Result<()> {
    let file_path = case_dir.join(BIDS_FILE_NAME);
    let days = read_mms_table_optional(&file_path, BID_REPORT, "MNSP_DAYOFFER")?;
    let periods = read_mms_table_optional(&file_path, BID_REPORT, "MNSP_PEROFFER")?;
    attach_link_offers(days, periods, interconnectors).with_context(|| input_err_msg(&file_path))
}

fn attach_link_offers(
    days: Vec<LinkDayOfferRecord>,
    periods: Vec<LinkPeriodOfferRecord>,
    interconnectors: &mut InterconnectorMap,
) -> Result<()> {
    let days = keep_effective(days, |r| r.link_id.clone(), LinkDayOfferRecord::effective)?;
    let mut periods: IndexMap<_, _> =
        keep_effective(periods, |r| r.link_id.clone(), LinkPeriodOfferRecord::effective)?
            .into_iter()
            .map(|r| (r.link_id.clone(), r))
            .collect();

    for day in days {
        let period = periods.swap_remove(&day.link_id).with_context(|| {
            format!("Day offer for link {} has no matching period offer", day.link_id)
        })?;
        let link = interconnectors
            .values_mut()
            .flat_map(|ic| ic.links.iter_mut())
            .find(|link| {
                let id: &str = link.id.borrow();
                id == day.link_id
            })
            .with_context(|| {
                format!("Offer for unknown network service link {}", day.link_id)
            })?;

        link.bands = collect_bands(day.prices(), period.avails());
        link.max_avail = MegaWatts(period.max_avail).min(offered_volume(&link.bands));
        link.ramp_up_rate = period.ramp_up_rate.map(MegaWattsPerMinute);
        link.ramp_down_rate = period.ramp_down_rate.map(MegaWattsPerMinute);
    }

    if let Some(link_id) = periods.keys().next() {
        bail!("Period offer for link {link_id} has no matching day offer");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::assert_error;
    use crate::interconnector::{Interconnector, MnspLink};
    use crate::service::{LOWER_REG, RAISE_REG};
    use crate::unit::{DispatchRole, Unit};
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn day_offer(unit_id: &str, bid_type: &str, version: u32, prices: [f64; 2]) -> DayOfferRecord {
        DayOfferRecord {
            unit_id: unit_id.to_string(),
            bid_type: bid_type.to_string(),
            offer_date: "2023/09/04 12:00:00".to_string(),
            version,
            price1: Some(prices[0]),
            price2: Some(prices[1]),
            price3: None,
            price4: None,
            price5: None,
            price6: None,
            price7: None,
            price8: None,
            price9: None,
            price10: None,
            minimum_load: None,
            t1: None,
            t2: None,
            t3: None,
            t4: None,
            daily_energy_limit: None,
        }
    }

    fn period_offer(
        unit_id: &str,
        bid_type: &str,
        max_avail: f64,
        avails: [f64; 2],
    ) -> PeriodOfferRecord {
        PeriodOfferRecord {
            unit_id: unit_id.to_string(),
            bid_type: bid_type.to_string(),
            offer_date: "2023/09/04 12:00:00".to_string(),
            version: 1,
            max_avail,
            avail1: Some(avails[0]),
            avail2: Some(avails[1]),
            avail3: None,
            avail4: None,
            avail5: None,
            avail6: None,
            avail7: None,
            avail8: None,
            avail9: None,
            avail10: None,
            fixed_load: None,
            roc_up: None,
            roc_down: None,
            enablement_min: None,
            low_breakpoint: None,
            high_breakpoint: None,
            enablement_max: None,
        }
    }

    fn single_unit() -> UnitMap {
        let unit = Unit::new("BW01", "NSW1", DispatchRole::Generator);
        UnitMap::from([(unit.id.clone(), unit)])
    }

    #[test]
    fn test_energy_offer_attached() {
        let mut units = single_unit();
        let mut day = day_offer("BW01", "ENERGY", 1, [24.0, 60.0]);
        day.daily_energy_limit = Some(9000.0);
        let mut period = period_offer("BW01", "ENERGY", 500.0, [300.0, 200.0]);
        period.roc_up = Some(3.0);
        period.roc_down = Some(4.0);

        attach_unit_offers(vec![day], vec![period], &mut units).unwrap();

        let bid = units["BW01"].energy_bid.as_ref().unwrap();
        assert_eq!(bid.bands.len(), 2);
        assert_eq!(bid.bands[0], BandOffer::new(24.0, 300.0));
        assert_eq!(bid.max_avail, MegaWatts(500.0));
        assert_eq!(bid.ramp_up_rate, Some(MegaWattsPerMinute(3.0)));
        assert_eq!(bid.ramp_down_rate, Some(MegaWattsPerMinute(4.0)));
        assert_eq!(bid.daily_energy_limit, Some(MegaWattHours(9000.0)));
        assert!(units["BW01"].fast_start.is_none());
    }

    #[test]
    fn test_max_avail_clamped_to_offered_volume() {
        let mut units = single_unit();
        let day = day_offer("BW01", "ENERGY", 1, [24.0, 60.0]);
        let period = period_offer("BW01", "ENERGY", 900.0, [300.0, 200.0]);

        attach_unit_offers(vec![day], vec![period], &mut units).unwrap();

        let bid = units["BW01"].energy_bid.as_ref().unwrap();
        assert_eq!(bid.max_avail, MegaWatts(500.0));
    }

    #[test]
    fn test_rebids_resolve_to_latest_version() {
        let mut units = single_unit();
        let stale = day_offer("BW01", "ENERGY", 1, [24.0, 60.0]);
        let rebid = day_offer("BW01", "ENERGY", 2, [19.0, 55.0]);
        let period = period_offer("BW01", "ENERGY", 500.0, [300.0, 200.0]);

        attach_unit_offers(vec![stale, rebid], vec![period], &mut units).unwrap();

        let bid = units["BW01"].energy_bid.as_ref().unwrap();
        assert_eq!(bid.bands[0].price.value(), 19.0);
    }

    #[test]
    fn test_fcas_offer_builds_a_trapezium() {
        let mut units = single_unit();
        let day = day_offer("BW01", "RAISEREG", 1, [1.5, 9.9]);
        let mut period = period_offer("BW01", "RAISEREG", 40.0, [25.0, 15.0]);
        period.enablement_min = Some(200.0);
        period.low_breakpoint = Some(240.0);
        period.high_breakpoint = Some(560.0);
        period.enablement_max = Some(600.0);

        attach_unit_offers(vec![day], vec![period], &mut units).unwrap();

        let bid = &units["BW01"].fcas_bids[&RAISE_REG];
        assert_eq!(bid.max_avail, MegaWatts(40.0));
        assert_eq!(bid.enablement_min, MegaWatts(200.0));
        assert_eq!(bid.high_breakpoint, MegaWatts(560.0));
        assert!(!units["BW01"].fcas_bids.contains_key(&LOWER_REG));
    }

    #[test]
    fn test_fcas_offer_missing_trapezium() {
        let mut units = single_unit();
        let day = day_offer("BW01", "RAISEREG", 1, [1.5, 9.9]);
        let period = period_offer("BW01", "RAISEREG", 40.0, [25.0, 15.0]);

        let result = attach_unit_offers(vec![day], vec![period], &mut units);
        assert_error!(
            result,
            "The RAISEREG offer for unit BW01 is missing ENABLEMENTMIN"
        );
    }

    #[test]
    fn test_fast_start_times_create_a_profile() {
        let mut units = single_unit();
        let mut day = day_offer("BW01", "ENERGY", 1, [24.0, 60.0]);
        day.minimum_load = Some(160.0);
        day.t1 = Some(2.0);
        day.t2 = Some(4.0);
        day.t3 = Some(10.0);
        day.t4 = Some(4.0);
        let period = period_offer("BW01", "ENERGY", 500.0, [300.0, 200.0]);

        attach_unit_offers(vec![day], vec![period], &mut units).unwrap();

        let profile = units["BW01"].fast_start.as_ref().unwrap();
        assert_eq!(profile.min_loading, MegaWatts(160.0));
        assert_eq!(profile.t2, Minutes(4.0));
        assert_eq!(profile.mode, FastStartMode::Inactive);
    }

    #[test]
    fn test_unpaired_offers_are_rejected() {
        let mut units = single_unit();
        let day = day_offer("BW01", "ENERGY", 1, [24.0, 60.0]);
        assert_error!(
            attach_unit_offers(vec![day], vec![], &mut units),
            "Day offer ENERGY for unit BW01 has no matching period offer"
        );

        let period = period_offer("BW01", "ENERGY", 500.0, [300.0, 200.0]);
        assert_error!(
            attach_unit_offers(vec![], vec![period], &mut units),
            "Period offer ENERGY for unit BW01 has no matching day offer"
        );
    }

    #[test]
    fn test_offer_for_unknown_unit() {
        let mut units = single_unit();
        let day = day_offer("GHOST1", "ENERGY", 1, [24.0, 60.0]);
        let period = period_offer("GHOST1", "ENERGY", 500.0, [300.0, 200.0]);
        assert_error!(
            attach_unit_offers(vec![day], vec![period], &mut units),
            "Offer for unknown unit GHOST1"
        );
    }

    #[test]
    fn test_read_unit_offers_from_file() {
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join(BIDS_FILE_NAME)).unwrap();
        writeln!(
            file,
            "C,NEMP.WORLD,BIDMOVE_COMPLETE,AEMO,PUBLIC\n\
             I,BID,BIDDAYOFFER_D,2,DUID,BIDTYPE,OFFERDATE,VERSIONNO,PRICEBAND1,PRICEBAND2,PRICEBAND3,PRICEBAND4,PRICEBAND5,PRICEBAND6,PRICEBAND7,PRICEBAND8,PRICEBAND9,PRICEBAND10,MINIMUMLOAD,T1,T2,T3,T4,DAILYENERGYCONSTRAINT\n\
             D,BID,BIDDAYOFFER_D,2,BW01,ENERGY,2023/09/04 12:00:00,1,24.0,60.0,,,,,,,,,,,,,,\n\
             I,BID,BIDPEROFFER_D,2,DUID,BIDTYPE,OFFERDATE,VERSIONNO,MAXAVAIL,BANDAVAIL1,BANDAVAIL2,BANDAVAIL3,BANDAVAIL4,BANDAVAIL5,BANDAVAIL6,BANDAVAIL7,BANDAVAIL8,BANDAVAIL9,BANDAVAIL10,FIXEDLOAD,ROCUP,ROCDOWN,ENABLEMENTMIN,LOWBREAKPOINT,HIGHBREAKPOINT,ENABLEMENTMAX\n\
             D,BID,BIDPEROFFER_D,2,BW01,ENERGY,2023/09/04 12:00:00,1,500.0,300.0,200.0,,,,,,,,,,3.0,4.0,,,,"
        )
        .unwrap();

        let mut units = single_unit();
        read_unit_offers(dir.path(), &mut units).unwrap();

        let bid = units["BW01"].energy_bid.as_ref().unwrap();
        assert_eq!(bid.bands.len(), 2);
        assert_eq!(bid.max_avail, MegaWatts(500.0));
        assert_eq!(bid.ramp_up_rate, Some(MegaWattsPerMinute(3.0)));
    }

    fn mnsp_interconnector() -> InterconnectorMap {
        let mut ic = Interconnector::new(
            "T-V-MNSP1",
            "TAS1",
            "VIC1",
            MegaWatts(478.0),
            MegaWatts(594.0),
        )
        .unwrap();
        ic.links.push(
            MnspLink::new("BLNKVIC", "TAS1", "VIC1", Vec::new(), MegaWatts(594.0)).unwrap(),
        );
        ic.links.push(
            MnspLink::new("BLNKTAS", "VIC1", "TAS1", Vec::new(), MegaWatts(478.0)).unwrap(),
        );
        InterconnectorMap::from([(ic.id.clone(), ic)])
    }

    fn link_day_offer(link_id: &str, version: u32, prices: [f64; 2]) -> LinkDayOfferRecord {
        LinkDayOfferRecord {
            link_id: link_id.to_string(),
            offer_date: "2023/09/04 12:00:00".to_string(),
            version,
            price1: Some(prices[0]),
            price2: Some(prices[1]),
            price3: None,
            price4: None,
            price5: None,
            price6: None,
            price7: None,
            price8: None,
            price9: None,
            price10: None,
        }
    }

    fn link_period_offer(link_id: &str, max_avail: f64, avails: [f64; 2]) -> LinkPeriodOfferRecord {
        LinkPeriodOfferRecord {
            link_id: link_id.to_string(),
            offer_date: "2023/09/04 12:00:00".to_string(),
            version: 1,
            max_avail,
            avail1: Some(avails[0]),
            avail2: Some(avails[1]),
            avail3: None,
            avail4: None,
            avail5: None,
            avail6: None,
            avail7: None,
            avail8: None,
            avail9: None,
            avail10: None,
            ramp_up_rate: Some(10.0),
            ramp_down_rate: None,
        }
    }

    #[test]
    fn test_link_offers_attached() {
        let mut interconnectors = mnsp_interconnector();
        let day = link_day_offer("BLNKVIC", 1, [12.0, 30.0]);
        let period = link_period_offer("BLNKVIC", 550.0, [400.0, 150.0]);

        attach_link_offers(vec![day], vec![period], &mut interconnectors).unwrap();

        let link = &interconnectors["T-V-MNSP1"].links[0];
        assert_eq!(link.bands.len(), 2);
        assert_eq!(link.bands[1], BandOffer::new(30.0, 150.0));
        assert_eq!(link.max_avail, MegaWatts(550.0));
        assert_eq!(link.ramp_up_rate, Some(MegaWattsPerMinute(10.0)));
        // the other link keeps its registration state
        assert!(interconnectors["T-V-MNSP1"].links[1].bands.is_empty());
    }

    #[test]
    fn test_link_offer_for_unknown_link() {
        let mut interconnectors = mnsp_interconnector();
        let day = link_day_offer("GHOSTLINK", 1, [12.0, 30.0]);
        let period = link_period_offer("GHOSTLINK", 550.0, [400.0, 150.0]);
        assert_error!(
            attach_link_offers(vec![day], vec![period], &mut interconnectors),
            "Offer for unknown network service link GHOSTLINK"
        );
    }
}
