use std::time::Duration;

use chrono::NaiveDate;
use tempfile::TempDir;

use fuelsale_pipeline::aggregate::aggregate_sales;
use fuelsale_pipeline::remap::stage_rollups;
use fuelsale_pipeline::SalesSource;

use fuelsale_pipeline::model::{
    FuelGrades, PropaneSaleRecord, RawSaleRecord, StagingRollup, StationNode, STATUS_IMPORTED,
};
use fuelsale_pipeline::{
    DateRange, ExportRequest, ExportStore, ExportType, Exporter, PipelineConfig, RunContext,
    RunOutcome, StagingStore,
};
use fuelsale_store::{SqliteExportStore, SqliteSalesStore};

const TIMEOUT: Duration = Duration::from_secs(5);

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
}

fn open(dir: &TempDir) -> (SqliteSalesStore, SqliteExportStore) {
    let sales = SqliteSalesStore::open(&dir.path().join("sales.db"), TIMEOUT).unwrap();
    let export = SqliteExportStore::open(&dir.path().join("export.db"), TIMEOUT).unwrap();
    (sales, export)
}

fn seed(sales: &SqliteSalesStore) {
    let cost = |c: f64| Some(FuelGrades::new([c, 0.0, 0.0, 0.0, 0.0, 0.0]));
    sales
        .insert_sales(&[
            RawSaleRecord {
                station_id: "s1".into(),
                record_date: date(15),
                litres: FuelGrades::new([60.0, 20.0, 30.0, 30.0, 10.0, 0.0]),
                costs: cost(1.40),
            },
            RawSaleRecord {
                station_id: "s1".into(),
                record_date: date(15),
                litres: FuelGrades::new([40.0, 0.0, 20.0, 0.0, 0.0, 0.0]),
                costs: cost(1.50),
            },
            RawSaleRecord {
                station_id: "s2".into(),
                record_date: date(15),
                litres: FuelGrades::new([80.0, 0.0, 40.0, 20.0, 5.0, 0.0]),
                costs: cost(1.60),
            },
            RawSaleRecord {
                station_id: "s2".into(),
                record_date: date(16),
                litres: FuelGrades::new([10.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
                costs: None,
            },
        ])
        .unwrap();
    sales
        .put_station_node(&StationNode {
            id: "n1".into(),
            name: "Main St".into(),
            members: vec!["s1".into(), "s2".into()],
        })
        .unwrap();
}

fn fuel_request(start: u32, end: u32) -> ExportRequest {
    ExportRequest {
        export_type: ExportType::Fuel,
        range: DateRange::new(date(start), date(end)).unwrap(),
    }
}

#[test]
fn fuel_export_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (sales, export) = open(&dir);
    seed(&sales);
    let config = PipelineConfig::default();

    let log = Exporter::new(&config, &sales, &export)
        .run_with(&fuel_request(15, 16), &RunContext::from_timestamp("run-1", 1_700_000_000))
        .unwrap();

    assert_eq!(log.outcome, RunOutcome::Complete);
    assert_eq!(log.record_quantity, 2);

    let rows = export.fuel_sales_in_range(&DateRange::new(date(1), date(30)).unwrap()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].id, "20230615-n1");
    assert_eq!(
        (rows[0].sales.nl, rows[0].sales.snl, rows[0].sales.dsl, rows[0].sales.cdsl),
        (190.0, 100.0, 50.0, 15.0)
    );
    // s1's latest cost (1.50) and s2's cost (1.60).
    assert!((rows[0].avg_fuel_cost - 1.55).abs() < 1e-9);
    assert_eq!(rows[1].id, "20230616-n1");
    assert_eq!(rows[1].avg_fuel_cost, 0.0);

    assert!(sales.all_staging().unwrap().is_empty());
    assert_eq!(export.import_logs().unwrap(), vec![log]);
}

#[test]
fn rerun_after_reopen_keeps_one_row_per_key() {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::default();
    {
        let (sales, export) = open(&dir);
        seed(&sales);
        Exporter::new(&config, &sales, &export)
            .run_with(&fuel_request(15, 15), &RunContext::from_timestamp("run-1", 1))
            .unwrap();
    }

    let (sales, export) = open(&dir);
    let log = Exporter::new(&config, &sales, &export)
        .run_with(&fuel_request(15, 15), &RunContext::from_timestamp("run-2", 2))
        .unwrap();

    assert_eq!(log.outcome, RunOutcome::Complete);
    let rows = export.fuel_sales_in_range(&DateRange::new(date(15), date(15)).unwrap()).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].import_ts, 2);
    assert_eq!(export.fuel_prices("n1", &DateRange::new(date(15), date(15)).unwrap()).unwrap().len(), 1);
    assert_eq!(export.import_logs().unwrap().len(), 2);
}

#[test]
fn staging_rows_of_other_runs_survive() {
    let dir = TempDir::new().unwrap();
    let (sales, export) = open(&dir);
    seed(&sales);
    let config = PipelineConfig::default();

    // A crashed earlier run left staging behind.
    sales
        .append_staging(&[StagingRollup {
            run_id: "crashed".into(),
            import_ts: 0,
            record_date: date(15),
            station_id: "s1".into(),
            sales: Default::default(),
            sums: FuelGrades::new([500.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
            costs: None,
            status: STATUS_IMPORTED.into(),
        }])
        .unwrap();

    Exporter::new(&config, &sales, &export)
        .run_with(&fuel_request(15, 15), &RunContext::from_timestamp("run-1", 1))
        .unwrap();

    let rows = export.fuel_sales_in_range(&DateRange::new(date(15), date(15)).unwrap()).unwrap();
    assert_eq!(rows[0].sales.nl, 190.0);
    let left = sales.all_staging().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].run_id, "crashed");
}

#[test]
fn resuming_a_crashed_run_empties_staging() {
    let dir = TempDir::new().unwrap();
    let (sales, export) = open(&dir);
    seed(&sales);
    let config = PipelineConfig::default();

    // A run that staged its rollups and died before consolidating.
    let range = DateRange::new(date(15), date(16)).unwrap();
    let raw = sales.fetch_sales(&range).unwrap();
    sales
        .append_staging(&stage_rollups(&aggregate_sales(&raw), "crashed", 1_700_000_000))
        .unwrap();
    let pending = sales.staged_runs().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!((pending[0].date_from, pending[0].date_to), (date(15), date(16)));

    let exporter = Exporter::new(&config, &sales, &export);
    let log = exporter.resume("crashed").unwrap();

    assert_eq!(log.outcome, RunOutcome::Complete);
    assert_eq!(log.record_quantity, 2);
    assert_eq!((log.date_from, log.date_to), (20230615, 20230616));
    assert!(sales.all_staging().unwrap().is_empty());
    assert!(sales.staged_runs().unwrap().is_empty());

    let rows = export.fuel_sales_in_range(&range).unwrap();
    assert_eq!(rows[0].sales.nl, 190.0);
    assert_eq!(rows[0].import_ts, 1_700_000_000);
    assert_eq!(export.import_logs().unwrap(), vec![log]);

    assert!(exporter.resume("crashed").is_err(), "a reconciled run cannot be resumed");
}

#[test]
fn propane_export_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (sales, export) = open(&dir);
    let config = PipelineConfig::default();
    let propane = &config.propane;
    let row = |dispenser: &str, litres: f64| PropaneSaleRecord {
        station_id: propane.station_id.clone(),
        grade_id: propane.grade_id,
        dispenser_id: dispenser.into(),
        record_date: date(18),
        litres,
    };
    sales
        .insert_propane_sales(&[
            row("56e7593f982d82eeff262cd5", 120.5),
            row("56e7593f982d82eeff262cd6", 80.0),
        ])
        .unwrap();

    let request = ExportRequest {
        export_type: ExportType::Propane,
        range: DateRange::new(date(18), date(18)).unwrap(),
    };
    let log = Exporter::new(&config, &sales, &export)
        .run_with(&request, &RunContext::from_timestamp("p-1", 1))
        .unwrap();

    assert_eq!(log.record_quantity, 2);
    let rows = export.propane_sales_in_range(&request.range).unwrap();
    let summary: Vec<_> = rows.iter().map(|r| (r.tank_id, r.litres, r.year_week)).collect();
    assert_eq!(summary, vec![(475, 120.5, 202325), (476, 80.0, 202325)]);
}
