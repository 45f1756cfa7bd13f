use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::model::{FuelGrades, PropaneRollup, PropaneSaleRecord, RawSaleRecord, StationRollup};

/// Group raw records by (date, station) and sum the six grade buckets.
///
/// `rows` must be in store order: the cost snapshot kept for a group is the
/// last one observed, not an average. Records without a snapshot leave the
/// previous one in place. Output is sorted by date, then station id.
pub fn aggregate_sales(rows: &[RawSaleRecord]) -> Vec<StationRollup> {
    let mut groups: BTreeMap<(NaiveDate, String), StationRollup> = BTreeMap::new();

    for row in rows {
        let entry = groups
            .entry((row.record_date, row.station_id.clone()))
            .or_insert_with(|| StationRollup {
                record_date: row.record_date,
                station_id: row.station_id.clone(),
                sums: FuelGrades::default(),
                costs: None,
                record_count: 0,
            });
        entry.sums.accumulate(&row.litres);
        if row.costs.is_some() {
            entry.costs = row.costs;
        }
        entry.record_count += 1;
    }

    groups.into_values().collect()
}

/// Group propane records by (date, dispenser) and sum net litres.
pub fn aggregate_propane(rows: &[PropaneSaleRecord]) -> Vec<PropaneRollup> {
    let mut groups: BTreeMap<(NaiveDate, String), f64> = BTreeMap::new();

    for row in rows {
        *groups
            .entry((row.record_date, row.dispenser_id.clone()))
            .or_insert(0.0) += row.litres;
    }

    groups
        .into_iter()
        .map(|((record_date, dispenser_id), litres)| PropaneRollup {
            record_date,
            dispenser_id,
            litres,
        })
        .collect()
}
