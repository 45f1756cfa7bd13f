use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::calendar::{date_key, year_week};
use crate::error::StoreError;
use crate::model::{FuelExportRecord, FuelSales, RunOutcome, StagingRollup, StationNode};
use crate::store::ExportStore;

/// Permanent identity of a fuel export row: `{YYYYMMDD}-{node_id}`.
pub fn composite_key(record_date: NaiveDate, node_id: &str) -> String {
    format!("{}-{}", date_key(record_date), node_id)
}

/// Mean of the grade-1 unit cost over rows that carry a positive cost.
///
/// Stations with no cost (or a zero cost) that day do not pull the average
/// toward zero. Returns 0.0 when no row qualifies.
pub fn average_price<'a>(rows: impl IntoIterator<Item = &'a StagingRollup>) -> f64 {
    let (sum, count) = rows
        .into_iter()
        .filter_map(|r| r.costs.map(|c| c.fuel1))
        .filter(|cost| *cost > 0.0)
        .fold((0.0, 0usize), |(sum, count), cost| (sum + cost, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Fold a node's member rows into one export row per (date, run timestamp).
pub fn consolidate_node(node: &StationNode, staged: &[StagingRollup]) -> Vec<FuelExportRecord> {
    let mut groups: BTreeMap<(NaiveDate, i64), Vec<&StagingRollup>> = BTreeMap::new();
    for row in staged.iter().filter(|r| node.has_member(&r.station_id)) {
        groups
            .entry((row.record_date, row.import_ts))
            .or_default()
            .push(row);
    }

    groups
        .into_iter()
        .map(|((record_date, import_ts), rows)| {
            let mut sales = FuelSales::default();
            for row in &rows {
                sales.accumulate(&row.sales);
            }
            FuelExportRecord {
                id: composite_key(record_date, &node.id),
                record_date,
                node_id: node.id.clone(),
                avg_fuel_cost: average_price(rows.iter().copied()),
                sales,
                import_ts,
                year_week: year_week(record_date),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node_id: String,
    pub record_id: String,
    pub error: StoreError,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {} (record {}): {}", self.node_id, self.record_id, self.error)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationReport {
    pub nodes_total: usize,
    pub nodes_completed: usize,
    pub records_written: usize,
    pub failure: Option<NodeFailure>,
}

impl ConsolidationReport {
    /// `Complete` here only means every node was written; the engine still
    /// downgrades it if reconciliation fails.
    pub fn outcome(&self) -> RunOutcome {
        match (&self.failure, self.records_written) {
            (None, _) => RunOutcome::Complete,
            (Some(_), 0) => RunOutcome::Failed,
            (Some(_), _) => RunOutcome::Partial,
        }
    }
}

/// Consolidate every node and upsert the results.
///
/// The first failing upsert stops the run: no further node is started, rows
/// already written stay committed. With `workers > 1` nodes are spread over
/// scoped threads; nodes already in flight when another fails still finish.
pub fn consolidate<E>(
    nodes: &[StationNode],
    staged: &[StagingRollup],
    store: &E,
    workers: usize,
) -> ConsolidationReport
where
    E: ExportStore + Sync,
{
    let plan: Vec<(&StationNode, Vec<FuelExportRecord>)> = nodes
        .iter()
        .map(|node| (node, consolidate_node(node, staged)))
        .collect();

    let workers = workers.clamp(1, plan.len().max(1));
    if workers == 1 {
        consolidate_sequential(&plan, store)
    } else {
        consolidate_parallel(&plan, store, workers)
    }
}

fn consolidate_sequential<E: ExportStore>(
    plan: &[(&StationNode, Vec<FuelExportRecord>)],
    store: &E,
) -> ConsolidationReport {
    let mut report = ConsolidationReport {
        nodes_total: plan.len(),
        nodes_completed: 0,
        records_written: 0,
        failure: None,
    };

    for (node, records) in plan {
        match write_node(store, node, records) {
            Ok(written) => {
                report.records_written += written;
                report.nodes_completed += 1;
            }
            Err((written, failure)) => {
                report.records_written += written;
                log::error!("upserting fuel sale export failed, stopping: {failure}");
                report.failure = Some(failure);
                break;
            }
        }
    }

    report
}

fn consolidate_parallel<E: ExportStore + Sync>(
    plan: &[(&StationNode, Vec<FuelExportRecord>)],
    store: &E,
    workers: usize,
) -> ConsolidationReport {
    let next = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let written = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let failure: Mutex<Option<NodeFailure>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::SeqCst);
                let Some((node, records)) = plan.get(idx) else {
                    break;
                };
                match write_node(store, node, records) {
                    Ok(n) => {
                        written.fetch_add(n, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err((n, node_failure)) => {
                        written.fetch_add(n, Ordering::SeqCst);
                        stop.store(true, Ordering::SeqCst);
                        log::error!("upserting fuel sale export failed, stopping: {node_failure}");
                        let mut slot = failure.lock();
                        if slot.is_none() {
                            *slot = Some(node_failure);
                        }
                    }
                }
            });
        }
    });

    ConsolidationReport {
        nodes_total: plan.len(),
        nodes_completed: completed.into_inner(),
        records_written: written.into_inner(),
        failure: failure.into_inner(),
    }
}

/// Upsert a node's rows plus their price history entries.
/// On failure returns how many rows were committed before it; a fuel row
/// whose price entry then fails is counted as committed.
fn write_node<E: ExportStore>(
    store: &E,
    node: &StationNode,
    records: &[FuelExportRecord],
) -> Result<usize, (usize, NodeFailure)> {
    let mut written = 0;
    for record in records {
        let fail = |error: StoreError| NodeFailure {
            node_id: node.id.clone(),
            record_id: record.id.clone(),
            error,
        };
        store.upsert_fuel_sale(record).map_err(|e| (written, fail(e)))?;
        written += 1;
        store
            .upsert_fuel_price(&record.price_record())
            .map_err(|e| (written, fail(e)))?;
    }
    log::debug!("node {} ({}): {} export rows", node.id, node.name, written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::memory::MemoryStore;
    use crate::model::{
        DateRange, FuelGrades, FuelPriceRecord, ImportLog, PropaneExportRecord, STATUS_IMPORTED,
    };

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, 15).unwrap()
    }

    fn staged(station: &str, nl: f64, cost1: Option<f64>) -> StagingRollup {
        StagingRollup {
            run_id: "run".into(),
            import_ts: 100,
            record_date: day(),
            station_id: station.into(),
            sales: FuelSales { nl, snl: 1.0, dsl: 0.0, cdsl: 0.0, prop: 0.0 },
            sums: FuelGrades::default(),
            costs: cost1.map(|c| FuelGrades { fuel1: c, ..FuelGrades::default() }),
            status: STATUS_IMPORTED.into(),
        }
    }

    fn node(id: &str, members: &[&str]) -> StationNode {
        StationNode {
            id: id.into(),
            name: format!("Node {id}"),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    #[test]
    fn composite_key_uses_eight_digit_date() {
        assert_eq!(composite_key(day(), "abc123"), "20230615-abc123");
    }

    #[test]
    fn average_ignores_non_positive_costs() {
        let rows = vec![
            staged("a", 0.0, Some(0.0)),
            staged("b", 0.0, Some(2.00)),
            staged("c", 0.0, Some(2.10)),
            staged("d", 0.0, None),
        ];
        let avg = average_price(&rows);
        assert!((avg - 2.05).abs() < 1e-9, "got {avg}");
    }

    #[test]
    fn average_is_zero_without_costs() {
        let rows = vec![staged("a", 0.0, None), staged("b", 0.0, Some(0.0))];
        assert_eq!(average_price(&rows), 0.0);
    }

    #[test]
    fn node_sums_only_member_stations() {
        let rows = vec![
            staged("a", 10.0, Some(1.0)),
            staged("b", 5.0, Some(3.0)),
            staged("other", 1000.0, Some(9.0)),
        ];
        let records = consolidate_node(&node("n1", &["a", "b"]), &rows);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.id, "20230615-n1");
        assert_eq!(rec.sales.nl, 15.0);
        assert_eq!(rec.sales.snl, 2.0);
        assert!((rec.avg_fuel_cost - 2.0).abs() < 1e-9);
        assert_eq!(rec.import_ts, 100);
        assert_eq!(rec.year_week, 202324);
    }

    #[test]
    fn node_without_rows_emits_nothing() {
        let rows = vec![staged("a", 10.0, None)];
        assert!(consolidate_node(&node("n2", &["z"]), &rows).is_empty());
    }

    #[test]
    fn failure_stops_remaining_nodes() {
        let store = MemoryStore::new();
        store.fail_fuel_upserts_after(1);
        let rows = vec![staged("a", 1.0, None), staged("b", 2.0, None), staged("c", 3.0, None)];
        let nodes = vec![node("n1", &["a"]), node("n2", &["b"]), node("n3", &["c"])];

        let report = consolidate(&nodes, &rows, &store, 1);
        assert_eq!(report.records_written, 1);
        assert_eq!(report.nodes_completed, 1);
        assert_eq!(report.outcome(), RunOutcome::Partial);
        assert_eq!(report.failure.as_ref().map(|f| f.node_id.as_str()), Some("n2"));

        let exported = store.fuel_exports();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].node_id, "n1");
    }

    #[test]
    fn failure_on_first_upsert_is_failed() {
        let store = MemoryStore::new();
        store.fail_fuel_upserts_after(0);
        let rows = vec![staged("a", 1.0, None)];
        let report = consolidate(&[node("n1", &["a"])], &rows, &store, 1);
        assert_eq!(report.outcome(), RunOutcome::Failed);
        assert!(store.fuel_exports().is_empty());
    }

    #[test]
    fn parallel_writes_every_node() {
        let store = MemoryStore::new();
        let rows: Vec<_> = (0..8).map(|i| staged(&format!("s{i}"), i as f64, None)).collect();
        let nodes: Vec<_> = (0..8)
            .map(|i| node(&format!("n{i}"), &[format!("s{i}").as_str()]))
            .collect();

        let report = consolidate(&nodes, &rows, &store, 3);
        assert_eq!(report.outcome(), RunOutcome::Complete);
        assert_eq!(report.nodes_completed, 8);
        assert_eq!(report.records_written, 8);
        assert_eq!(store.fuel_exports().len(), 8);
        assert_eq!(store.fuel_price_count(), 8);
    }

    #[test]
    fn parallel_failure_keeps_committed_rows_and_reports_once() {
        let store = MemoryStore::new();
        store.fail_fuel_upserts_after(2);
        let rows: Vec<_> = (0..6).map(|i| staged(&format!("s{i}"), 1.0, None)).collect();
        let nodes: Vec<_> = (0..6)
            .map(|i| node(&format!("n{i}"), &[format!("s{i}").as_str()]))
            .collect();

        let report = consolidate(&nodes, &rows, &store, 2);
        assert!(report.failure.is_some());
        assert_eq!(report.outcome(), RunOutcome::Partial);
        assert_eq!(report.records_written, 2);
        assert_eq!(store.fuel_exports().len(), 2);
        assert!(report.nodes_completed < 6);
    }

    #[test]
    fn price_failure_counts_the_committed_fuel_row() {
        let store = MemoryStore::new();
        store.fail_fuel_price_upserts();
        let rows = vec![staged("a", 1.0, None), staged("b", 2.0, None)];
        let nodes = vec![node("n1", &["a"]), node("n2", &["b"])];

        let report = consolidate(&nodes, &rows, &store, 1);
        assert_eq!(report.records_written, 1);
        assert_eq!(report.nodes_completed, 0);
        assert_eq!(report.outcome(), RunOutcome::Partial);
        let failure = report.failure.unwrap();
        assert_eq!(failure.node_id, "n1");
        assert_eq!(failure.record_id, "20230615-n1");
        assert!(matches!(failure.error, StoreError::Write { op: "upsert_fuel_price", .. }));

        assert_eq!(store.fuel_exports().len(), 1);
        assert_eq!(store.fuel_price_count(), 0);
    }

    /// Holds node `slow` inside its upsert until node `bad` has failed.
    #[derive(Default)]
    struct GatedStore {
        inner: MemoryStore,
        bad_failed: AtomicBool,
        slow_finished_after_failure: AtomicBool,
    }

    impl ExportStore for GatedStore {
        fn upsert_fuel_sale(&self, record: &FuelExportRecord) -> Result<(), StoreError> {
            match record.node_id.as_str() {
                "bad" => {
                    self.bad_failed.store(true, Ordering::SeqCst);
                    Err(StoreError::write("upsert_fuel_sale", "injected failure"))
                }
                "slow" => {
                    let deadline = Instant::now() + Duration::from_secs(5);
                    while !self.bad_failed.load(Ordering::SeqCst) && Instant::now() < deadline {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    // Let the failing worker raise the stop flag first.
                    std::thread::sleep(Duration::from_millis(50));
                    self.inner.upsert_fuel_sale(record)?;
                    self.slow_finished_after_failure
                        .store(self.bad_failed.load(Ordering::SeqCst), Ordering::SeqCst);
                    Ok(())
                }
                _ => self.inner.upsert_fuel_sale(record),
            }
        }
        fn upsert_fuel_price(&self, record: &FuelPriceRecord) -> Result<(), StoreError> {
            self.inner.upsert_fuel_price(record)
        }
        fn insert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError> {
            self.inner.insert_propane_sale(record)
        }
        fn upsert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError> {
            self.inner.upsert_propane_sale(record)
        }
        fn append_import_log(&self, log: &ImportLog) -> Result<(), StoreError> {
            self.inner.append_import_log(log)
        }
        fn fuel_sales_in_range(&self, range: &DateRange) -> Result<Vec<FuelExportRecord>, StoreError> {
            self.inner.fuel_sales_in_range(range)
        }
        fn fuel_prices(&self, node_id: &str, range: &DateRange) -> Result<Vec<FuelPriceRecord>, StoreError> {
            self.inner.fuel_prices(node_id, range)
        }
        fn propane_sales_in_range(&self, range: &DateRange) -> Result<Vec<PropaneExportRecord>, StoreError> {
            self.inner.propane_sales_in_range(range)
        }
        fn import_logs(&self) -> Result<Vec<ImportLog>, StoreError> {
            self.inner.import_logs()
        }
    }

    #[test]
    fn node_in_flight_finishes_after_another_fails() {
        let store = GatedStore::default();
        let rows: Vec<_> = ["s0", "s1", "s2", "s3"].iter().map(|s| staged(s, 1.0, None)).collect();
        let nodes = vec![
            node("slow", &["s0"]),
            node("bad", &["s1"]),
            node("later1", &["s2"]),
            node("later2", &["s3"]),
        ];

        let report = consolidate(&nodes, &rows, &store, 2);

        assert!(store.slow_finished_after_failure.load(Ordering::SeqCst));
        assert_eq!(report.failure.as_ref().map(|f| f.node_id.as_str()), Some("bad"));
        assert_eq!(report.nodes_completed, 1);
        assert_eq!(report.records_written, 1);
        assert_eq!(report.outcome(), RunOutcome::Partial);

        let exported: Vec<_> = store.inner.fuel_exports().into_iter().map(|r| r.node_id).collect();
        assert_eq!(exported, vec!["slow".to_string()], "no node starts after the failure");
        assert_eq!(store.inner.fuel_price_count(), 1);
    }
}
