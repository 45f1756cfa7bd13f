use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};

use fuelsale_pipeline::calendar::date_key;
use fuelsale_pipeline::model::{
    FuelExportRecord, FuelPriceRecord, FuelSales, PropaneExportRecord, RunOutcome,
};
use fuelsale_pipeline::{DateRange, ExportStore, ExportType, ImportLog, StoreError};

use crate::schema::EXPORT_SCHEMA;
use crate::{date_at, open_connection, read_err, write_err};

/// Permanent export tables plus the import log.
pub struct SqliteExportStore {
    conn: Mutex<Connection>,
}

impl SqliteExportStore {
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        Self::from_connection(open_connection(path, timeout)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(EXPORT_SCHEMA)
            .map_err(|e| StoreError::Connect(format!("creating export schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn fuel_sale_from_row(row: &Row<'_>) -> rusqlite::Result<FuelExportRecord> {
    Ok(FuelExportRecord {
        id: row.get(0)?,
        record_date: date_at(row, 1)?,
        node_id: row.get(2)?,
        avg_fuel_cost: row.get(3)?,
        sales: FuelSales {
            nl: row.get(4)?,
            snl: row.get(5)?,
            dsl: row.get(6)?,
            cdsl: row.get(7)?,
            prop: row.get(8)?,
        },
        import_ts: row.get(9)?,
        year_week: row.get(10)?,
    })
}

fn propane_from_row(row: &Row<'_>) -> rusqlite::Result<PropaneExportRecord> {
    Ok(PropaneExportRecord {
        record_date: date_at(row, 0)?,
        tank_id: row.get(1)?,
        litres: row.get(2)?,
        import_ts: row.get(3)?,
        year: row.get(4)?,
        year_week: row.get(5)?,
    })
}

impl ExportStore for SqliteExportStore {
    fn upsert_fuel_sale(&self, record: &FuelExportRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fuel_sale_export (id, record_date, node_id, avg_fuel_cost, nl, snl, dsl, cdsl, prop, import_ts, year_week)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (id) DO UPDATE SET
                record_date = excluded.record_date,
                node_id = excluded.node_id,
                avg_fuel_cost = excluded.avg_fuel_cost,
                nl = excluded.nl,
                snl = excluded.snl,
                dsl = excluded.dsl,
                cdsl = excluded.cdsl,
                prop = excluded.prop,
                import_ts = excluded.import_ts,
                year_week = excluded.year_week",
            params![
                record.id,
                date_key(record.record_date),
                record.node_id,
                record.avg_fuel_cost,
                record.sales.nl,
                record.sales.snl,
                record.sales.dsl,
                record.sales.cdsl,
                record.sales.prop,
                record.import_ts,
                record.year_week,
            ],
        )
        .map_err(write_err("upsert_fuel_sale"))?;
        Ok(())
    }

    fn upsert_fuel_price(&self, record: &FuelPriceRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO fuel_price (node_id, record_date, price, year_week) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (node_id, record_date) DO UPDATE SET
                price = excluded.price,
                year_week = excluded.year_week",
            params![
                record.node_id,
                date_key(record.record_date),
                record.price,
                record.year_week,
            ],
        )
        .map_err(write_err("upsert_fuel_price"))?;
        Ok(())
    }

    fn insert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO propane_sale_export (sale_key, record_date, tank_id, litres, import_ts, year, year_week)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.key(),
                date_key(record.record_date),
                record.tank_id,
                record.litres,
                record.import_ts,
                record.year,
                record.year_week,
            ],
        )
        .map_err(write_err("insert_propane_sale"))?;
        Ok(())
    }

    // sale_key is not unique (insert mode may duplicate it), so this is an
    // update-or-insert in one transaction rather than ON CONFLICT.
    fn upsert_propane_sale(&self, record: &PropaneExportRecord) -> Result<(), StoreError> {
        let op = "upsert_propane_sale";
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err(op))?;
        let updated = tx
            .execute(
                "UPDATE propane_sale_export
                 SET litres = ?2, import_ts = ?3, year = ?4, year_week = ?5
                 WHERE sale_key = ?1",
                params![record.key(), record.litres, record.import_ts, record.year, record.year_week],
            )
            .map_err(write_err(op))?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO propane_sale_export (sale_key, record_date, tank_id, litres, import_ts, year, year_week)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.key(),
                    date_key(record.record_date),
                    record.tank_id,
                    record.litres,
                    record.import_ts,
                    record.year,
                    record.year_week,
                ],
            )
            .map_err(write_err(op))?;
        }
        tx.commit().map_err(write_err(op))
    }

    fn append_import_log(&self, log: &ImportLog) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO import_log (run_id, import_type, date_from, date_to, import_ts, import_date, outcome, record_quantity, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                log.run_id,
                log.import_type.as_str(),
                log.date_from,
                log.date_to,
                log.import_ts,
                log.import_date,
                log.outcome.as_str(),
                log.record_quantity as i64,
                log.detail,
            ],
        )
        .map_err(write_err("append_import_log"))?;
        Ok(())
    }

    fn fuel_sales_in_range(&self, range: &DateRange) -> Result<Vec<FuelExportRecord>, StoreError> {
        let op = "fuel_sales_in_range";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, record_date, node_id, avg_fuel_cost, nl, snl, dsl, cdsl, prop, import_ts, year_week
                 FROM fuel_sale_export
                 WHERE record_date BETWEEN ?1 AND ?2
                 ORDER BY record_date, node_id",
            )
            .map_err(read_err(op))?;
        let rows = stmt
            .query_map(params![range.start_key(), range.end_key()], fuel_sale_from_row)
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        Ok(rows)
    }

    fn fuel_prices(
        &self,
        node_id: &str,
        range: &DateRange,
    ) -> Result<Vec<FuelPriceRecord>, StoreError> {
        let op = "fuel_prices";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT node_id, record_date, price, year_week FROM fuel_price
                 WHERE node_id = ?1 AND record_date BETWEEN ?2 AND ?3
                 ORDER BY record_date",
            )
            .map_err(read_err(op))?;
        let rows = stmt
            .query_map(params![node_id, range.start_key(), range.end_key()], |row| {
                Ok(FuelPriceRecord {
                    node_id: row.get(0)?,
                    record_date: date_at(row, 1)?,
                    price: row.get(2)?,
                    year_week: row.get(3)?,
                })
            })
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        Ok(rows)
    }

    fn propane_sales_in_range(
        &self,
        range: &DateRange,
    ) -> Result<Vec<PropaneExportRecord>, StoreError> {
        let op = "propane_sales_in_range";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT record_date, tank_id, litres, import_ts, year, year_week
                 FROM propane_sale_export
                 WHERE record_date BETWEEN ?1 AND ?2
                 ORDER BY record_date, tank_id, id",
            )
            .map_err(read_err(op))?;
        let rows = stmt
            .query_map(params![range.start_key(), range.end_key()], propane_from_row)
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        Ok(rows)
    }

    fn import_logs(&self) -> Result<Vec<ImportLog>, StoreError> {
        let op = "import_logs";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT run_id, import_type, date_from, date_to, import_ts, import_date, outcome, record_quantity, detail
                 FROM import_log ORDER BY id",
            )
            .map_err(read_err(op))?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, u32>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;

        raw.into_iter()
            .map(
                |(run_id, import_type, date_from, date_to, import_ts, import_date, outcome, quantity, detail)| {
                    let import_type: ExportType = import_type
                        .parse()
                        .map_err(|e: fuelsale_pipeline::ExportError| StoreError::decode(op, e.to_string()))?;
                    let outcome: RunOutcome =
                        outcome.parse().map_err(|e: String| StoreError::decode(op, e))?;
                    let record_quantity = usize::try_from(quantity)
                        .map_err(|_| StoreError::decode(op, format!("negative record_quantity {quantity}")))?;
                    Ok(ImportLog {
                        run_id,
                        import_type,
                        date_from,
                        date_to,
                        import_ts,
                        import_date,
                        outcome,
                        record_quantity,
                        detail,
                    })
                },
            )
            .collect()
    }
}
