use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::date_key;
use crate::error::ExportError;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportType {
    Fuel,
    Propane,
}

impl ExportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fuel => "fuel",
            Self::Propane => "propane",
        }
    }
}

impl std::fmt::Display for ExportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExportType {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fuel" => Ok(Self::Fuel),
            "propane" => Ok(Self::Propane),
            other => Err(ExportError::UnknownExportType(other.to_string())),
        }
    }
}

/// Inclusive whole-day date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ExportError> {
        if start > end {
            return Err(ExportError::InvalidRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    pub fn start_key(&self) -> u32 {
        date_key(self.start)
    }

    pub fn end_key(&self) -> u32 {
        date_key(self.end)
    }
}

// ---------------------------------------------------------------------------
// Raw sales
// ---------------------------------------------------------------------------

/// Litres (or unit costs) for the six raw fuel grades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FuelGrades {
    pub fuel1: f64,
    pub fuel2: f64,
    pub fuel3: f64,
    pub fuel4: f64,
    pub fuel5: f64,
    pub fuel6: f64,
}

impl FuelGrades {
    pub fn new(values: [f64; 6]) -> Self {
        let [fuel1, fuel2, fuel3, fuel4, fuel5, fuel6] = values;
        Self { fuel1, fuel2, fuel3, fuel4, fuel5, fuel6 }
    }

    pub fn accumulate(&mut self, other: &FuelGrades) {
        self.fuel1 += other.fuel1;
        self.fuel2 += other.fuel2;
        self.fuel3 += other.fuel3;
        self.fuel4 += other.fuel4;
        self.fuel5 += other.fuel5;
        self.fuel6 += other.fuel6;
    }
}

/// Per-grade unit-cost snapshot. Same shape as the litre buckets.
pub type FuelCosts = FuelGrades;

/// One transaction-period summary from the sales store.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSaleRecord {
    pub station_id: String,
    pub record_date: NaiveDate,
    pub litres: FuelGrades,
    pub costs: Option<FuelCosts>,
}

/// Per-(date, station) sum of raw records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationRollup {
    pub record_date: NaiveDate,
    pub station_id: String,
    pub sums: FuelGrades,
    /// Most recent cost snapshot observed in the group.
    pub costs: Option<FuelCosts>,
    pub record_count: usize,
}

// ---------------------------------------------------------------------------
// Canonical taxonomy + staging
// ---------------------------------------------------------------------------

/// Canonical sale categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FuelSales {
    #[serde(rename = "NL")]
    pub nl: f64,
    #[serde(rename = "SNL")]
    pub snl: f64,
    #[serde(rename = "DSL")]
    pub dsl: f64,
    #[serde(rename = "CDSL")]
    pub cdsl: f64,
    #[serde(rename = "PROP")]
    pub prop: f64,
}

impl FuelSales {
    pub fn accumulate(&mut self, other: &FuelSales) {
        self.nl += other.nl;
        self.snl += other.snl;
        self.dsl += other.dsl;
        self.cdsl += other.cdsl;
        self.prop += other.prop;
    }
}

pub const STATUS_IMPORTED: &str = "imported";

/// Transient per-(station, date) row owned by one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagingRollup {
    pub run_id: String,
    pub import_ts: i64,
    pub record_date: NaiveDate,
    pub station_id: String,
    pub sales: FuelSales,
    pub sums: FuelGrades,
    pub costs: Option<FuelCosts>,
    pub status: String,
}

/// Staging rows still held for one run. Anything listed here belongs to a
/// run that did not reconcile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StagedRun {
    pub run_id: String,
    pub import_ts: i64,
    pub rows: usize,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// Canonical reporting node grouping one or more raw station ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationNode {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

impl StationNode {
    pub fn has_member(&self, station_id: &str) -> bool {
        self.members.iter().any(|m| m == station_id)
    }
}

// ---------------------------------------------------------------------------
// Fuel export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelExportRecord {
    /// Composite key, `{YYYYMMDD}-{node_id}`.
    pub id: String,
    pub record_date: NaiveDate,
    pub node_id: String,
    pub avg_fuel_cost: f64,
    pub sales: FuelSales,
    pub import_ts: i64,
    pub year_week: u32,
}

impl FuelExportRecord {
    pub fn price_record(&self) -> FuelPriceRecord {
        FuelPriceRecord {
            node_id: self.node_id.clone(),
            record_date: self.record_date,
            price: self.avg_fuel_cost,
            year_week: self.year_week,
        }
    }
}

/// Price history row, one per (node, date).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelPriceRecord {
    pub node_id: String,
    pub record_date: NaiveDate,
    pub price: f64,
    pub year_week: u32,
}

// ---------------------------------------------------------------------------
// Propane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct PropaneSaleRecord {
    pub station_id: String,
    pub grade_id: u32,
    pub dispenser_id: String,
    pub record_date: NaiveDate,
    /// Net litres.
    pub litres: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropaneRollup {
    pub record_date: NaiveDate,
    pub dispenser_id: String,
    pub litres: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropaneExportRecord {
    pub record_date: NaiveDate,
    pub tank_id: u32,
    pub litres: f64,
    pub import_ts: i64,
    pub year: i32,
    pub year_week: u32,
}

impl PropaneExportRecord {
    /// Natural key used when propane rows are upserted.
    pub fn key(&self) -> String {
        format!("{}-{}", date_key(self.record_date), self.tank_id)
    }
}

// ---------------------------------------------------------------------------
// Run outcome + import log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every export row written and staging reconciled.
    Complete,
    /// Some export rows committed, the rest abandoned.
    Partial,
    /// Nothing committed to the export store.
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(Self::Complete),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run outcome '{other}'")),
        }
    }
}

/// One entry per invocation. Also the summary handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportLog {
    pub run_id: String,
    pub import_type: ExportType,
    pub date_from: u32,
    pub date_to: u32,
    pub import_ts: i64,
    pub import_date: String,
    pub outcome: RunOutcome,
    pub record_quantity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn export_type_parses_known_values_only() {
        assert_eq!("fuel".parse::<ExportType>().unwrap(), ExportType::Fuel);
        assert_eq!("propane".parse::<ExportType>().unwrap(), ExportType::Propane);
        let err = "fuelSales".parse::<ExportType>().unwrap_err();
        assert!(matches!(err, ExportError::UnknownExportType(_)));
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        assert!(DateRange::new(date(2023, 6, 2), date(2023, 6, 1)).is_err());
        let range = DateRange::new(date(2023, 6, 1), date(2023, 6, 1)).unwrap();
        assert!(range.contains(date(2023, 6, 1)));
        assert!(!range.contains(date(2023, 6, 2)));
        assert_eq!(range.start_key(), 20230601);
    }

    #[test]
    fn fuel_sales_serialize_with_canonical_names() {
        let sales = FuelSales { nl: 1.0, snl: 2.0, dsl: 3.0, cdsl: 4.0, prop: 5.0 };
        let json = serde_json::to_value(sales).unwrap();
        assert_eq!(json["NL"], 1.0);
        assert_eq!(json["CDSL"], 4.0);
    }

    #[test]
    fn propane_key_joins_date_and_tank() {
        let row = PropaneExportRecord {
            record_date: date(2023, 6, 15),
            tank_id: 475,
            litres: 10.0,
            import_ts: 0,
            year: 2023,
            year_week: 202324,
        };
        assert_eq!(row.key(), "20230615-475");
    }

    #[test]
    fn import_log_omits_empty_detail() {
        let log = ImportLog {
            run_id: "r1".into(),
            import_type: ExportType::Fuel,
            date_from: 20230601,
            date_to: 20230630,
            import_ts: 1_700_000_000,
            import_date: "20231114".into(),
            outcome: RunOutcome::Complete,
            record_quantity: 3,
            detail: None,
        };
        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["outcome"], "complete");
        assert_eq!(json["import_type"], "fuel");
        assert!(json.get("detail").is_none());
    }
}
