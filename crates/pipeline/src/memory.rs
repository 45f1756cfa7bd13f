//! In-process store. Backs every store trait with plain collections; used by
//! the engine's tests and by embedders that want a dry run.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::calendar::date_key;
use crate::error::StoreError;
use crate::model::{
    DateRange, FuelExportRecord, FuelPriceRecord, ImportLog, PropaneExportRecord,
    PropaneSaleRecord, RawSaleRecord, StagedRun, StagingRollup, StationNode,
};
use crate::store::{ExportStore, ReferenceData, SalesSource, StagingStore};

#[derive(Debug, Default)]
struct MemoryState {
    sales: Vec<RawSaleRecord>,
    propane: Vec<PropaneSaleRecord>,
    nodes: Vec<StationNode>,
    staging: Vec<StagingRollup>,
    fuel_exports: BTreeMap<String, FuelExportRecord>,
    fuel_prices: BTreeMap<(String, u32), FuelPriceRecord>,
    propane_exports: Vec<PropaneExportRecord>,
    import_logs: Vec<ImportLog>,
    /// Remaining fuel upserts allowed before writes start failing.
    fuel_upsert_budget: Option<usize>,
    fail_fuel_prices: bool,
    fail_station_nodes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sales(&self, rows: impl IntoIterator<Item = RawSaleRecord>) {
        self.state.lock().sales.extend(rows);
    }

    pub fn add_propane_sales(&self, rows: impl IntoIterator<Item = PropaneSaleRecord>) {
        self.state.lock().propane.extend(rows);
    }

    pub fn add_station_node(&self, node: StationNode) {
        self.state.lock().nodes.push(node);
    }

    /// Let `n` more fuel upserts succeed, then fail every one after.
    pub fn fail_fuel_upserts_after(&self, n: usize) {
        self.state.lock().fuel_upsert_budget = Some(n);
    }

    /// Fail every price history upsert.
    pub fn fail_fuel_price_upserts(&self) {
        self.state.lock().fail_fuel_prices = true;
    }

    /// Fail station node reads, as an unreachable reference store would.
    pub fn fail_station_node_reads(&self) {
        self.state.lock().fail_station_nodes = true;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.fuel_upsert_budget = None;
        state.fail_fuel_prices = false;
        state.fail_station_nodes = false;
    }

    pub fn staging_rows(&self) -> Vec<StagingRollup> {
        self.state.lock().staging.clone()
    }

    /// Fuel export rows ordered by key.
    pub fn fuel_exports(&self) -> Vec<FuelExportRecord> {
        self.state.lock().fuel_exports.values().cloned().collect()
    }

    pub fn fuel_price_count(&self) -> usize {
        self.state.lock().fuel_prices.len()
    }

    pub fn propane_exports(&self) -> Vec<PropaneExportRecord> {
        self.state.lock().propane_exports.clone()
    }
}

impl SalesSource for MemoryStore {
    fn fetch_sales(&self, range: &DateRange) -> Result<Vec<RawSaleRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .sales
            .iter()
            .filter(|r| range.contains(r.record_date))
            .cloned()
            .collect())
    }

    fn fetch_propane_sales(
        &self,
        range: &DateRange,
        station_id: &str,
        grade_id: u32,
    ) -> Result<Vec<PropaneSaleRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .propane
            .iter()
            .filter(|r| {
                r.station_id == station_id && r.grade_id == grade_id && range.contains(r.record_date)
            })
            .cloned()
            .collect())
    }
}

impl ReferenceData for MemoryStore {
    fn station_nodes(&self) -> Result<Vec<StationNode>, StoreError> {
        let state = self.state.lock();
        if state.fail_station_nodes {
            return Err(StoreError::Connect("injected failure".into()));
        }
        Ok(state.nodes.clone())
    }
}

impl StagingStore for MemoryStore {
    fn append_staging(&self, rows: &[StagingRollup]) -> Result<(), StoreError> {
        self.state.lock().staging.extend_from_slice(rows);
        Ok(())
    }

    fn fetch_staging(&self, run_id: &str) -> Result<Vec<StagingRollup>, StoreError> {
        Ok(self
            .state
            .lock()
            .staging
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect())
    }

    fn delete_staging(&self, run_id: &str) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let before = state.staging.len();
        state.staging.retain(|r| r.run_id != run_id);
        Ok(before - state.staging.len())
    }

    fn staged_runs(&self) -> Result<Vec<StagedRun>, StoreError> {
        let state = self.state.lock();
        let mut runs: Vec<StagedRun> = Vec::new();
        for row in &state.staging {
            match runs.iter_mut().find(|r| r.run_id == row.run_id) {
                Some(run) => {
                    run.rows += 1;
                    run.import_ts = run.import_ts.min(row.import_ts);
                    run.date_from = run.date_from.min(row.record_date);
                    run.date_to = run.date_to.max(row.record_date);
                }
                None => runs.push(StagedRun {
                    run_id: row.run_id.clone(),
                    import_ts: row.import_ts,
                    rows: 1,
                    date_from: row.record_date,
                    date_to: row.record_date,
                }),
            }
        }
        runs.sort_by(|a, b| (a.import_ts, &a.run_id).cmp(&(b.import_ts, &b.run_id)));
        Ok(runs)
    }
}

impl ExportStore for MemoryStore {
    fn upsert_fuel_sale(&self, record: &FuelExportRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(budget) = state.fuel_upsert_budget.as_mut() {
            if *budget == 0 {
                return Err(StoreError::write("upsert_fuel_sale", "injected failure"));
            }
            *budget -= 1;
        }
        state.fuel_exports.insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn upsert_fuel_price(&self, record: &FuelPriceRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.fail_fuel_prices {
            return Err(StoreError::write("upsert_fuel_price", "injected failure"));
        }
        let key = (record.node_id.clone(), date_key(record.record_date));
        state.fuel_prices.insert(key, record.clone());
        Ok(())
    }

    fn insert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError> {
        self.state.lock().propane_exports.push(record.clone());
        Ok(())
    }

    fn upsert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let key = record.key();
        match state.propane_exports.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = record.clone(),
            None => state.propane_exports.push(record.clone()),
        }
        Ok(())
    }

    fn append_import_log(&self, log: &ImportLog) -> Result<(), StoreError> {
        self.state.lock().import_logs.push(log.clone());
        Ok(())
    }

    fn fuel_sales_in_range(&self, range: &DateRange) -> Result<Vec<FuelExportRecord>, StoreError> {
        let mut rows: Vec<_> = self
            .state
            .lock()
            .fuel_exports
            .values()
            .filter(|r| range.contains(r.record_date))
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.record_date, &a.node_id).cmp(&(b.record_date, &b.node_id)));
        Ok(rows)
    }

    fn fuel_prices(
        &self,
        node_id: &str,
        range: &DateRange,
    ) -> Result<Vec<FuelPriceRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .fuel_prices
            .values()
            .filter(|p| p.node_id == node_id && range.contains(p.record_date))
            .cloned()
            .collect())
    }

    fn propane_sales_in_range(
        &self,
        range: &DateRange,
    ) -> Result<Vec<PropaneExportRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .propane_exports
            .iter()
            .filter(|r| range.contains(r.record_date))
            .cloned()
            .collect())
    }

    fn import_logs(&self) -> Result<Vec<ImportLog>, StoreError> {
        Ok(self.state.lock().import_logs.clone())
    }
}
