//! Store seams. The engine only talks to these traits; `fuelsale-store`
//! backs them with SQLite and [`crate::memory::MemoryStore`] keeps them in
//! process.

use crate::error::StoreError;
use crate::model::{
    DateRange, FuelExportRecord, FuelPriceRecord, ImportLog, PropaneExportRecord,
    PropaneSaleRecord, RawSaleRecord, StagedRun, StagingRollup, StationNode,
};

/// Read-only view over raw point-of-sale records.
pub trait SalesSource {
    /// Fuel sale records dated inside `range`, in store order.
    fn fetch_sales(&self, range: &DateRange) -> Result<Vec<RawSaleRecord>, StoreError>;

    /// Propane records for one station and grade dated inside `range`.
    fn fetch_propane_sales(
        &self,
        range: &DateRange,
        station_id: &str,
        grade_id: u32,
    ) -> Result<Vec<PropaneSaleRecord>, StoreError>;
}

/// Static reference data, read once per run.
pub trait ReferenceData {
    fn station_nodes(&self) -> Result<Vec<StationNode>, StoreError>;
}

/// Transient staging rows. Every read and delete is scoped to one run.
pub trait StagingStore {
    /// Plain append, no dedup key.
    fn append_staging(&self, rows: &[StagingRollup]) -> Result<(), StoreError>;
    fn fetch_staging(&self, run_id: &str) -> Result<Vec<StagingRollup>, StoreError>;
    /// Returns the number of rows removed.
    fn delete_staging(&self, run_id: &str) -> Result<usize, StoreError>;
    /// Runs that still hold staging rows, oldest first.
    fn staged_runs(&self) -> Result<Vec<StagedRun>, StoreError>;
}

/// Permanent export store.
pub trait ExportStore {
    /// Insert or overwrite the row identified by `record.id`.
    fn upsert_fuel_sale(&self, record: &FuelExportRecord) -> Result<(), StoreError>;
    /// Insert or overwrite the price history row for (node, date).
    fn upsert_fuel_price(&self, record: &FuelPriceRecord) -> Result<(), StoreError>;
    /// Plain insert; re-running a range duplicates rows.
    fn insert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError>;
    /// Insert or overwrite the row identified by `record.key()`.
    fn upsert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError>;
    fn append_import_log(&self, log: &ImportLog) -> Result<(), StoreError>;

    fn fuel_sales_in_range(&self, range: &DateRange) -> Result<Vec<FuelExportRecord>, StoreError>;
    fn fuel_prices(
        &self,
        node_id: &str,
        range: &DateRange,
    ) -> Result<Vec<FuelPriceRecord>, StoreError>;
    fn propane_sales_in_range(
        &self,
        range: &DateRange,
    ) -> Result<Vec<PropaneExportRecord>, StoreError>;
    fn import_logs(&self) -> Result<Vec<ImportLog>, StoreError>;
}
