use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::calendar::{calendar_year, year_week};
use crate::config::{PropaneConfig, PropaneWriteMode};
use crate::error::StoreError;
use crate::model::{PropaneExportRecord, PropaneRollup, RunOutcome};
use crate::store::ExportStore;

/// One export row per (date, tank), ordered by date then tank.
///
/// Dispensers that resolve to the same tank are summed into one row; rows
/// for different tanks are never merged.
pub fn build_propane_exports(
    rollups: &[PropaneRollup],
    config: &PropaneConfig,
    import_ts: i64,
) -> Vec<PropaneExportRecord> {
    let mut tanks: BTreeMap<(NaiveDate, u32), f64> = BTreeMap::new();
    for r in rollups {
        let tank_id = config.tank_for(&r.dispenser_id);
        if tank_id == 0 {
            log::warn!(
                "dispenser {} has no tank mapping, exporting under tank 0",
                r.dispenser_id
            );
        }
        *tanks.entry((r.record_date, tank_id)).or_default() += r.litres;
    }

    tanks
        .into_iter()
        .map(|((record_date, tank_id), litres)| PropaneExportRecord {
            record_date,
            tank_id,
            litres,
            import_ts,
            year: calendar_year(record_date),
            year_week: year_week(record_date),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropaneWriteReport {
    pub written: usize,
    pub failure: Option<StoreError>,
}

impl PropaneWriteReport {
    pub fn outcome(&self) -> RunOutcome {
        match (&self.failure, self.written) {
            (None, _) => RunOutcome::Complete,
            (Some(_), 0) => RunOutcome::Failed,
            (Some(_), _) => RunOutcome::Partial,
        }
    }
}

/// Write rows in order, stopping at the first failure.
pub fn write_propane<E: ExportStore>(
    store: &E,
    records: &[PropaneExportRecord],
    mode: PropaneWriteMode,
) -> PropaneWriteReport {
    let mut written = 0;
    for record in records {
        let result = match mode {
            PropaneWriteMode::Insert => store.insert_propane_sale(record),
            PropaneWriteMode::Upsert => store.upsert_propane_sale(record),
        };
        if let Err(err) = result {
            log::error!("writing propane export {} failed, stopping: {err}", record.key());
            return PropaneWriteReport { written, failure: Some(err) };
        }
        written += 1;
    }
    PropaneWriteReport { written, failure: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use chrono::NaiveDate;

    fn rollup(dispenser: &str, litres: f64) -> PropaneRollup {
        PropaneRollup {
            record_date: NaiveDate::from_ymd_opt(2023, 6, 18).unwrap(),
            dispenser_id: dispenser.into(),
            litres,
        }
    }

    #[test]
    fn maps_dispensers_to_tanks() {
        let config = PropaneConfig::default();
        let rows = build_propane_exports(
            &[
                rollup("56e7593f982d82eeff262cd5", 120.5),
                rollup("56e7593f982d82eeff262cd6", 80.0),
                rollup("unknown", 1.0),
            ],
            &config,
            42,
        );
        let tanks: Vec<_> = rows.iter().map(|r| (r.tank_id, r.litres)).collect();
        assert_eq!(tanks, vec![(0, 1.0), (475, 120.5), (476, 80.0)]);
        assert!(rows.iter().all(|r| r.import_ts == 42 && r.year == 2023));
        // 2023-06-18 is a Sunday in ISO week 24.
        assert_eq!(rows[0].year_week, 202325);
    }

    #[test]
    fn insert_mode_duplicates_on_rerun() {
        let store = MemoryStore::new();
        let rows = build_propane_exports(&[rollup("56e7593f982d82eeff262cd5", 5.0)], &PropaneConfig::default(), 1);
        write_propane(&store, &rows, PropaneWriteMode::Insert);
        write_propane(&store, &rows, PropaneWriteMode::Insert);
        assert_eq!(store.propane_exports().len(), 2);
    }

    #[test]
    fn upsert_mode_overwrites_on_rerun() {
        let store = MemoryStore::new();
        let config = PropaneConfig::default();
        let first = build_propane_exports(&[rollup("56e7593f982d82eeff262cd5", 5.0)], &config, 1);
        let second = build_propane_exports(&[rollup("56e7593f982d82eeff262cd5", 7.5)], &config, 2);
        let report = write_propane(&store, &first, PropaneWriteMode::Upsert);
        assert_eq!(report.outcome(), RunOutcome::Complete);
        write_propane(&store, &second, PropaneWriteMode::Upsert);
        let rows = store.propane_exports();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].litres, 7.5);
        assert_eq!(rows[0].import_ts, 2);
    }

    #[test]
    fn dispensers_sharing_a_tank_are_summed() {
        let mut config = PropaneConfig::default();
        config.tanks.insert("56e7593f982d82eeff262cd7".into(), 475);
        let rows = build_propane_exports(
            &[
                rollup("unknown-a", 30.0),
                rollup("unknown-b", 12.0),
                rollup("56e7593f982d82eeff262cd5", 100.0),
                rollup("56e7593f982d82eeff262cd7", 20.5),
            ],
            &config,
            1,
        );
        let tanks: Vec<_> = rows.iter().map(|r| (r.tank_id, r.litres)).collect();
        assert_eq!(tanks, vec![(0, 42.0), (475, 120.5)]);

        for mode in [PropaneWriteMode::Insert, PropaneWriteMode::Upsert] {
            let store = MemoryStore::new();
            let report = write_propane(&store, &rows, mode);
            assert_eq!(report.written, 2, "{mode:?}");
            let mut written: Vec<_> = store
                .propane_exports()
                .iter()
                .map(|r| (r.tank_id, r.litres))
                .collect();
            written.sort_by_key(|(tank, _)| *tank);
            assert_eq!(written, vec![(0, 42.0), (475, 120.5)], "{mode:?}");
        }
    }
}
