//! `fsexport run | list | staging | config | year-week`

use std::path::Path;

use chrono::Local;
use serde::Serialize;

use fuelsale_config::Settings;
use fuelsale_pipeline::calendar::{parse_date_key, year_week};
use fuelsale_pipeline::{
    ExportError, ExportRequest, ExportStore, ExportType, Exporter, ImportLog, RequestInput,
    StagingStore, StoreError,
};
use fuelsale_store::{SqliteExportStore, SqliteSalesStore};

use crate::exit_codes::{export_error_exit_code, outcome_exit_code, EXIT_STORE, EXIT_SUCCESS};
use crate::CliError;

fn export_err(err: ExportError) -> CliError {
    CliError::new(export_error_exit_code(&err), err.to_string())
}

fn store_err(err: StoreError) -> CliError {
    CliError::new(EXIT_STORE, err.to_string())
}

fn validate_request(input: &RequestInput) -> Result<ExportRequest, CliError> {
    let today = Local::now().date_naive();
    ExportRequest::validate(input, today).map_err(export_err)
}

fn ensure_parent(path: &Path) -> Result<(), CliError> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir).map_err(|e| {
            CliError::new(EXIT_STORE, format!("cannot create {}: {e}", dir.display()))
        }),
        _ => Ok(()),
    }
}

fn open_export_store(settings: &Settings) -> Result<SqliteExportStore, CliError> {
    let path = settings.export_db_path();
    ensure_parent(&path)?;
    SqliteExportStore::open(&path, settings.store_timeout()).map_err(store_err)
}

fn open_sales_store(settings: &Settings) -> Result<SqliteSalesStore, CliError> {
    let path = settings.sales_db_path();
    ensure_parent(&path)?;
    SqliteSalesStore::open(&path, settings.store_timeout()).map_err(store_err)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::general(format!("JSON serialization error: {e}")))?;
    println!("{json}");
    Ok(())
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn cmd_run(settings: &Settings, input: &RequestInput, json: bool) -> Result<(), CliError> {
    let request = validate_request(input)?;

    let sales = open_sales_store(settings)?;
    let export = open_export_store(settings)?;
    log::debug!(
        "stage {}: sales {}, export {}",
        settings.stage,
        settings.sales_db_path().display(),
        settings.export_db_path().display()
    );

    let entry = Exporter::new(&settings.pipeline, &sales, &export)
        .run(&request)
        .map_err(export_err)?;
    report_run(&entry, json)
}

/// Print a run summary and turn its outcome into the exit status.
fn report_run(entry: &ImportLog, json: bool) -> Result<(), CliError> {
    if json {
        print_json(entry)?;
    }
    eprintln!(
        "{} export {}..{}: {} ({} rows, run {})",
        entry.import_type,
        entry.date_from,
        entry.date_to,
        entry.outcome,
        entry.record_quantity,
        entry.run_id
    );

    match outcome_exit_code(entry.outcome) {
        EXIT_SUCCESS => Ok(()),
        code => Err(CliError::new(
            code,
            format!("run {} {}: {}", entry.run_id, entry.outcome, entry.detail.as_deref().unwrap_or("no detail")),
        )
        .with_hint(format!(
            "rows already written stay in place; `fsexport staging resume --run {}` retries fuel runs",
            entry.run_id
        ))),
    }
}

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

pub fn cmd_list(settings: &Settings, input: &RequestInput, json: bool) -> Result<(), CliError> {
    let request = validate_request(input)?;
    let export = open_export_store(settings)?;

    match request.export_type {
        ExportType::Fuel => {
            let rows = export.fuel_sales_in_range(&request.range).map_err(store_err)?;
            if json {
                return print_json(&rows);
            }
            println!("id\tnode\tdate\tNL\tSNL\tDSL\tCDSL\tPROP\tavg_cost\tyear_week");
            for r in &rows {
                println!(
                    "{}\t{}\t{}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.3}\t{}",
                    r.id,
                    r.node_id,
                    r.record_date,
                    r.sales.nl,
                    r.sales.snl,
                    r.sales.dsl,
                    r.sales.cdsl,
                    r.sales.prop,
                    r.avg_fuel_cost,
                    r.year_week
                );
            }
            eprintln!("{} fuel rows", rows.len());
        }
        ExportType::Propane => {
            let rows = export.propane_sales_in_range(&request.range).map_err(store_err)?;
            if json {
                return print_json(&rows);
            }
            println!("date\ttank\tlitres\tyear\tyear_week");
            for r in &rows {
                println!(
                    "{}\t{}\t{:.2}\t{}\t{}",
                    r.record_date, r.tank_id, r.litres, r.year, r.year_week
                );
            }
            eprintln!("{} propane rows", rows.len());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// staging
// ---------------------------------------------------------------------------

pub fn cmd_staging_list(settings: &Settings, json: bool) -> Result<(), CliError> {
    let sales = open_sales_store(settings)?;
    let runs = sales.staged_runs().map_err(store_err)?;
    if json {
        return print_json(&runs);
    }
    println!("run_id\timport_ts\trows\tfrom\tto");
    for run in &runs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            run.run_id, run.import_ts, run.rows, run.date_from, run.date_to
        );
    }
    eprintln!("{} runs with staging rows", runs.len());
    Ok(())
}

pub fn cmd_staging_resume(settings: &Settings, run_id: &str, json: bool) -> Result<(), CliError> {
    let sales = open_sales_store(settings)?;
    let export = open_export_store(settings)?;
    let entry = Exporter::new(&settings.pipeline, &sales, &export)
        .resume(run_id)
        .map_err(unknown_run_hint)?;
    report_run(&entry, json)
}

pub fn cmd_staging_purge(settings: &Settings, run_id: &str) -> Result<(), CliError> {
    let sales = open_sales_store(settings)?;
    let export = open_export_store(settings)?;
    let removed = Exporter::new(&settings.pipeline, &sales, &export)
        .purge(run_id)
        .map_err(unknown_run_hint)?;
    eprintln!("purged {removed} staging rows of run {run_id}");
    Ok(())
}

fn unknown_run_hint(err: ExportError) -> CliError {
    let hinted = matches!(err, ExportError::UnknownRun(_));
    let cli = export_err(err);
    if hinted {
        cli.with_hint("`fsexport staging list` shows runs that still hold staging rows")
    } else {
        cli
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn describe_source(source: Option<&Path>) -> String {
    match source {
        Some(path) => path.display().to_string(),
        None => "built-in defaults".to_string(),
    }
}

pub fn cmd_config_validate(settings: &Settings, source: Option<&Path>) -> Result<(), CliError> {
    eprintln!(
        "settings OK ({}), stage {}",
        describe_source(source),
        settings.stage
    );
    Ok(())
}

pub fn cmd_config_show(settings: &Settings, source: Option<&Path>) -> Result<(), CliError> {
    let text = settings.to_toml().map_err(|e| CliError::general(e.to_string()))?;
    println!("# source: {}", describe_source(source));
    println!("# sales_db: {}", settings.sales_db_path().display());
    println!("# export_db: {}", settings.export_db_path().display());
    print!("{text}");
    Ok(())
}

// ---------------------------------------------------------------------------
// year-week
// ---------------------------------------------------------------------------

pub fn cmd_year_week(value: &str) -> Result<(), CliError> {
    let date = value
        .trim()
        .parse::<u32>()
        .ok()
        .and_then(parse_date_key)
        .ok_or_else(|| CliError::usage(format!("invalid date '{value}': expected YYYYMMDD")))?;
    println!("{}", year_week(date));
    Ok(())
}
