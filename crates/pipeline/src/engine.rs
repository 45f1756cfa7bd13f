use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::aggregate::{aggregate_propane, aggregate_sales};
use crate::config::PipelineConfig;
use crate::consolidate::consolidate;
use crate::error::{ExportError, StoreError};
use crate::model::{DateRange, ExportType, ImportLog, RunOutcome};
use crate::propane::{build_propane_exports, write_propane};
use crate::remap::stage_rollups;
use crate::request::ExportRequest;
use crate::store::{ExportStore, ReferenceData, SalesSource, StagingStore};

/// Identity of one invocation. Captured once; every staging row, export row
/// and the import log of a run share it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_id: String,
    /// UNIX seconds.
    pub import_ts: i64,
    /// `YYYYMMDD` (UTC) of `import_ts`.
    pub import_date: String,
}

impl RunContext {
    pub fn now() -> Self {
        Self::at(Uuid::new_v4().to_string(), Utc::now())
    }

    pub fn at(run_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            import_ts: at.timestamp(),
            import_date: at.format("%Y%m%d").to_string(),
        }
    }

    /// Context for a known timestamp. Out-of-range timestamps fall back to the epoch.
    pub fn from_timestamp(run_id: impl Into<String>, import_ts: i64) -> Self {
        let at = DateTime::from_timestamp(import_ts, 0).unwrap_or_default();
        Self::at(run_id, at)
    }
}

/// Runs one export request against a sales-side store and an export store.
pub struct Exporter<'a, S, E> {
    config: &'a PipelineConfig,
    sales: &'a S,
    export: &'a E,
}

impl<'a, S, E> Exporter<'a, S, E>
where
    S: SalesSource + ReferenceData + StagingStore,
    E: ExportStore + Sync,
{
    pub fn new(config: &'a PipelineConfig, sales: &'a S, export: &'a E) -> Self {
        Self { config, sales, export }
    }

    pub fn run(&self, request: &ExportRequest) -> Result<ImportLog, ExportError> {
        self.run_with(request, &RunContext::now())
    }

    /// Run with a caller-supplied context.
    ///
    /// `Err` means the run stopped before anything was staged or written and
    /// no import log was recorded. From staging on, every outcome (complete,
    /// partial or failed) is recorded in the returned log instead.
    pub fn run_with(
        &self,
        request: &ExportRequest,
        ctx: &RunContext,
    ) -> Result<ImportLog, ExportError> {
        log::info!(
            "{} export {}..{} (run {}, ts {})",
            request.export_type,
            request.range.start,
            request.range.end,
            ctx.run_id,
            ctx.import_ts
        );
        match request.export_type {
            ExportType::Fuel => self.run_fuel(&request.range, ctx),
            ExportType::Propane => self.run_propane(&request.range, ctx),
        }
    }

    /// Re-drive a fuel run from the staging rows it left behind.
    ///
    /// Fuel rows are keyed upserts, so rows the earlier attempt committed are
    /// rewritten with the same values. The run keeps its id and timestamp; a
    /// new import log entry records this attempt.
    pub fn resume(&self, run_id: &str) -> Result<ImportLog, ExportError> {
        let run = self
            .sales
            .staged_runs()?
            .into_iter()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| ExportError::UnknownRun(run_id.to_string()))?;
        let range = DateRange::new(run.date_from, run.date_to)?;
        let ctx = RunContext::from_timestamp(run.run_id, run.import_ts);
        log::info!(
            "resuming fuel run {} ({} staged rows, {}..{})",
            ctx.run_id,
            run.rows,
            range.start,
            range.end
        );
        self.consolidate_staged(&range, &ctx)
    }

    /// Drop a run's staging rows without exporting them.
    pub fn purge(&self, run_id: &str) -> Result<usize, ExportError> {
        let removed = self.sales.delete_staging(run_id)?;
        if removed == 0 {
            return Err(ExportError::UnknownRun(run_id.to_string()));
        }
        log::warn!("purged {removed} staging rows of run {run_id}");
        Ok(removed)
    }

    fn run_fuel(&self, range: &DateRange, ctx: &RunContext) -> Result<ImportLog, ExportError> {
        let raw = self.sales.fetch_sales(range)?;
        let rollups = aggregate_sales(&raw);
        log::info!("aggregated {} sale records into {} rollups", raw.len(), rollups.len());
        if rollups.is_empty() {
            log::warn!("no fuel sales between {} and {}", range.start, range.end);
        }

        let staged = stage_rollups(&rollups, &ctx.run_id, ctx.import_ts);
        self.sales.append_staging(&staged)?;

        self.consolidate_staged(range, ctx)
    }

    /// Consolidate and reconcile the staged rows of `ctx.run_id`, then log
    /// the run. Store errors past this point are recorded as a `failed` run.
    fn consolidate_staged(
        &self,
        range: &DateRange,
        ctx: &RunContext,
    ) -> Result<ImportLog, ExportError> {
        let (outcome, written, detail) = match self.consolidate_run(&ctx.run_id) {
            Ok(result) => result,
            Err(err) => {
                log::error!("run {} stopped after staging, staging kept: {err}", ctx.run_id);
                (RunOutcome::Failed, 0, Some(err.to_string()))
            }
        };
        self.finish(ExportType::Fuel, range, ctx, outcome, written, detail)
    }

    fn consolidate_run(
        &self,
        run_id: &str,
    ) -> Result<(RunOutcome, usize, Option<String>), StoreError> {
        let nodes = self.sales.station_nodes()?;
        let staged = self.sales.fetch_staging(run_id)?;
        let orphans = staged
            .iter()
            .filter(|r| !nodes.iter().any(|n| n.has_member(&r.station_id)))
            .count();
        if orphans > 0 {
            log::warn!("{orphans} staged rollups belong to no station node and will not be exported");
        }

        let report = consolidate(&nodes, &staged, self.export, self.config.consolidation_workers);
        log::info!(
            "consolidated {}/{} nodes, {} export rows",
            report.nodes_completed,
            report.nodes_total,
            report.records_written
        );

        if let Some(failure) = &report.failure {
            log::warn!("staging rows for run {run_id} kept for retry");
            return Ok((report.outcome(), report.records_written, Some(failure.to_string())));
        }
        Ok(match self.sales.delete_staging(run_id) {
            Ok(removed) => {
                log::info!("reconciled {removed} staging rows");
                (RunOutcome::Complete, report.records_written, None)
            }
            Err(err) => {
                log::error!("staging reconciliation failed: {err}");
                (
                    RunOutcome::Partial,
                    report.records_written,
                    Some(format!("staging not reconciled: {err}")),
                )
            }
        })
    }

    fn run_propane(&self, range: &DateRange, ctx: &RunContext) -> Result<ImportLog, ExportError> {
        let propane = &self.config.propane;
        let raw = self
            .sales
            .fetch_propane_sales(range, &propane.station_id, propane.grade_id)?;
        let rollups = aggregate_propane(&raw);
        log::info!("aggregated {} propane records into {} rollups", raw.len(), rollups.len());
        if rollups.is_empty() {
            log::warn!("no propane sales between {} and {}", range.start, range.end);
        }

        let records = build_propane_exports(&rollups, propane, ctx.import_ts);
        let report = write_propane(self.export, &records, propane.write_mode);
        let detail = report.failure.as_ref().map(|e| e.to_string());

        self.finish(ExportType::Propane, range, ctx, report.outcome(), report.written, detail)
    }

    fn finish(
        &self,
        import_type: ExportType,
        range: &DateRange,
        ctx: &RunContext,
        outcome: RunOutcome,
        record_quantity: usize,
        detail: Option<String>,
    ) -> Result<ImportLog, ExportError> {
        let entry = ImportLog {
            run_id: ctx.run_id.clone(),
            import_type,
            date_from: range.start_key(),
            date_to: range.end_key(),
            import_ts: ctx.import_ts,
            import_date: ctx.import_date.clone(),
            outcome,
            record_quantity,
            detail,
        };
        self.export.append_import_log(&entry)?;
        log::info!("{import_type} run {} {outcome}: {record_quantity} rows", ctx.run_id);
        Ok(entry)
    }
}
