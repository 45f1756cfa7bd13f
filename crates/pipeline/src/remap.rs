use crate::model::{FuelGrades, FuelSales, StagingRollup, StationRollup, STATUS_IMPORTED};

/// Map the six raw grade buckets onto the canonical categories.
///
/// Grade 2 is a blended product and is split evenly between NL and SNL.
/// Negative litres pass through as-is.
pub fn remap(grades: &FuelGrades) -> FuelSales {
    let split = grades.fuel2 / 2.0;
    FuelSales {
        nl: grades.fuel1 + split,
        snl: grades.fuel3 + split,
        dsl: grades.fuel4,
        cdsl: grades.fuel5,
        prop: grades.fuel6,
    }
}

/// Build one staging row per rollup, all stamped with the same run.
pub fn stage_rollups(rollups: &[StationRollup], run_id: &str, import_ts: i64) -> Vec<StagingRollup> {
    rollups
        .iter()
        .map(|r| StagingRollup {
            run_id: run_id.to_string(),
            import_ts,
            record_date: r.record_date,
            station_id: r.station_id.clone(),
            sales: remap(&r.sums),
            sums: r.sums,
            costs: r.costs,
            status: STATUS_IMPORTED.to_string(),
        })
        .collect()
}
