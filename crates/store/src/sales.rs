use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};

use fuelsale_pipeline::calendar::date_key;
use fuelsale_pipeline::model::{
    FuelCosts, FuelGrades, FuelSales, PropaneSaleRecord, RawSaleRecord, StagedRun,
    StagingRollup, StationNode,
};
use fuelsale_pipeline::{DateRange, ReferenceData, SalesSource, StagingStore, StoreError};

use crate::schema::SALES_SCHEMA;
use crate::{date_at, open_connection, read_err, write_err};

/// Sales-side database: raw sales, propane sales, station nodes and staging.
pub struct SqliteSalesStore {
    conn: Mutex<Connection>,
}

impl SqliteSalesStore {
    pub fn open(path: &Path, timeout: Duration) -> Result<Self, StoreError> {
        Self::from_connection(open_connection(path, timeout)?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SALES_SCHEMA)
            .map_err(|e| StoreError::Connect(format!("creating sales schema: {e}")))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // -----------------------------------------------------------------------
    // Loading source data (fixtures, backfills)
    // -----------------------------------------------------------------------

    pub fn insert_sales(&self, rows: &[RawSaleRecord]) -> Result<(), StoreError> {
        let op = "insert_sales";
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err(op))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO sales (station_id, record_date, fuel1, fuel2, fuel3, fuel4, fuel5, fuel6, cost1, cost2, cost3, cost4, cost5, cost6) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                )
                .map_err(write_err(op))?;
            for row in rows {
                let l = &row.litres;
                let c = row.costs.as_ref();
                stmt.execute(params![
                    row.station_id,
                    date_key(row.record_date),
                    l.fuel1,
                    l.fuel2,
                    l.fuel3,
                    l.fuel4,
                    l.fuel5,
                    l.fuel6,
                    c.map(|c| c.fuel1),
                    c.map(|c| c.fuel2),
                    c.map(|c| c.fuel3),
                    c.map(|c| c.fuel4),
                    c.map(|c| c.fuel5),
                    c.map(|c| c.fuel6),
                ])
                .map_err(write_err(op))?;
            }
        }
        tx.commit().map_err(write_err(op))
    }

    pub fn insert_propane_sales(&self, rows: &[PropaneSaleRecord]) -> Result<(), StoreError> {
        let op = "insert_propane_sales";
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err(op))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO propane_sales (station_id, grade_id, dispenser_id, record_date, litres) VALUES (?1, ?2, ?3, ?4, ?5)",
                )
                .map_err(write_err(op))?;
            for row in rows {
                stmt.execute(params![
                    row.station_id,
                    row.grade_id,
                    row.dispenser_id,
                    date_key(row.record_date),
                    row.litres,
                ])
                .map_err(write_err(op))?;
            }
        }
        tx.commit().map_err(write_err(op))
    }

    /// Insert or replace a node and its member list.
    pub fn put_station_node(&self, node: &StationNode) -> Result<(), StoreError> {
        let op = "put_station_node";
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err(op))?;
        tx.execute(
            "INSERT INTO station_nodes (id, name) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET name = excluded.name",
            params![node.id, node.name],
        )
        .map_err(write_err(op))?;
        tx.execute(
            "DELETE FROM station_node_members WHERE node_id = ?1",
            params![node.id],
        )
        .map_err(write_err(op))?;
        for member in &node.members {
            tx.execute(
                "INSERT OR IGNORE INTO station_node_members (node_id, station_id) VALUES (?1, ?2)",
                params![node.id, member],
            )
            .map_err(write_err(op))?;
        }
        tx.commit().map_err(write_err(op))
    }

    /// Every staging row regardless of run, oldest first.
    pub fn all_staging(&self) -> Result<Vec<StagingRollup>, StoreError> {
        self.select_staging("SELECT * FROM fuel_sales_staging ORDER BY id", [])
    }

    fn select_staging<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<StagingRollup>, StoreError> {
        let op = "fetch_staging";
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql).map_err(read_err(op))?;
        let rows = stmt
            .query_map(params, staging_from_row)
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn grades_at(row: &Row<'_>, name: &str) -> rusqlite::Result<FuelGrades> {
    let mut values = [0.0; 6];
    for (i, value) in values.iter_mut().enumerate() {
        *value = row.get(format!("{name}{}", i + 1).as_str())?;
    }
    Ok(FuelGrades::new(values))
}

/// Costs are present when any cost column is non-NULL.
fn costs_at(row: &Row<'_>) -> rusqlite::Result<Option<FuelCosts>> {
    let mut values = [None; 6];
    for (i, value) in values.iter_mut().enumerate() {
        *value = row.get::<_, Option<f64>>(format!("cost{}", i + 1).as_str())?;
    }
    if values.iter().all(Option::is_none) {
        return Ok(None);
    }
    Ok(Some(FuelGrades::new(values.map(|v| v.unwrap_or(0.0)))))
}

fn staging_from_row(row: &Row<'_>) -> rusqlite::Result<StagingRollup> {
    let record_date_idx = row.as_ref().column_index("record_date")?;
    Ok(StagingRollup {
        run_id: row.get("run_id")?,
        import_ts: row.get("import_ts")?,
        record_date: date_at(row, record_date_idx)?,
        station_id: row.get("station_id")?,
        sales: FuelSales {
            nl: row.get("nl")?,
            snl: row.get("snl")?,
            dsl: row.get("dsl")?,
            cdsl: row.get("cdsl")?,
            prop: row.get("prop")?,
        },
        sums: grades_at(row, "fuel")?,
        costs: costs_at(row)?,
        status: row.get("status")?,
    })
}

// ---------------------------------------------------------------------------
// Store traits
// ---------------------------------------------------------------------------

impl SalesSource for SqliteSalesStore {
    fn fetch_sales(&self, range: &DateRange) -> Result<Vec<RawSaleRecord>, StoreError> {
        let op = "fetch_sales";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT station_id, record_date, fuel1, fuel2, fuel3, fuel4, fuel5, fuel6, cost1, cost2, cost3, cost4, cost5, cost6
                 FROM sales WHERE record_date BETWEEN ?1 AND ?2 ORDER BY id",
            )
            .map_err(read_err(op))?;
        let rows = stmt
            .query_map(params![range.start_key(), range.end_key()], |row| {
                Ok(RawSaleRecord {
                    station_id: row.get(0)?,
                    record_date: date_at(row, 1)?,
                    litres: grades_at(row, "fuel")?,
                    costs: costs_at(row)?,
                })
            })
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        log::debug!("{op}: {} rows", rows.len());
        Ok(rows)
    }

    fn fetch_propane_sales(
        &self,
        range: &DateRange,
        station_id: &str,
        grade_id: u32,
    ) -> Result<Vec<PropaneSaleRecord>, StoreError> {
        let op = "fetch_propane_sales";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT station_id, grade_id, dispenser_id, record_date, litres
                 FROM propane_sales
                 WHERE station_id = ?1 AND grade_id = ?2 AND record_date BETWEEN ?3 AND ?4
                 ORDER BY id",
            )
            .map_err(read_err(op))?;
        let rows = stmt
            .query_map(
                params![station_id, grade_id, range.start_key(), range.end_key()],
                |row| {
                    Ok(PropaneSaleRecord {
                        station_id: row.get(0)?,
                        grade_id: row.get(1)?,
                        dispenser_id: row.get(2)?,
                        record_date: date_at(row, 3)?,
                        litres: row.get(4)?,
                    })
                },
            )
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        log::debug!("{op}: {} rows", rows.len());
        Ok(rows)
    }
}

impl ReferenceData for SqliteSalesStore {
    fn station_nodes(&self) -> Result<Vec<StationNode>, StoreError> {
        let op = "station_nodes";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT n.id, n.name, m.station_id
                 FROM station_nodes n
                 LEFT JOIN station_node_members m ON m.node_id = n.id
                 ORDER BY n.id, m.station_id",
            )
            .map_err(read_err(op))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            })
            .map_err(read_err(op))?;

        let mut nodes: Vec<StationNode> = Vec::new();
        for row in rows {
            let (id, name, member) = row.map_err(read_err(op))?;
            if nodes.last().map(|n| n.id != id).unwrap_or(true) {
                nodes.push(StationNode { id, name, members: Vec::new() });
            }
            if let (Some(member), Some(node)) = (member, nodes.last_mut()) {
                node.members.push(member);
            }
        }
        Ok(nodes)
    }
}

impl StagingStore for SqliteSalesStore {
    fn append_staging(&self, rows: &[StagingRollup]) -> Result<(), StoreError> {
        let op = "append_staging";
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(write_err(op))?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO fuel_sales_staging (run_id, import_ts, record_date, station_id, nl, snl, dsl, cdsl, prop, fuel1, fuel2, fuel3, fuel4, fuel5, fuel6, cost1, cost2, cost3, cost4, cost5, cost6, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
                )
                .map_err(write_err(op))?;
            for row in rows {
                let s = &row.sums;
                let c = row.costs.as_ref();
                stmt.execute(params![
                    row.run_id,
                    row.import_ts,
                    date_key(row.record_date),
                    row.station_id,
                    row.sales.nl,
                    row.sales.snl,
                    row.sales.dsl,
                    row.sales.cdsl,
                    row.sales.prop,
                    s.fuel1,
                    s.fuel2,
                    s.fuel3,
                    s.fuel4,
                    s.fuel5,
                    s.fuel6,
                    c.map(|c| c.fuel1),
                    c.map(|c| c.fuel2),
                    c.map(|c| c.fuel3),
                    c.map(|c| c.fuel4),
                    c.map(|c| c.fuel5),
                    c.map(|c| c.fuel6),
                    row.status,
                ])
                .map_err(write_err(op))?;
            }
        }
        tx.commit().map_err(write_err(op))?;
        log::debug!("{op}: {} rows", rows.len());
        Ok(())
    }

    fn fetch_staging(&self, run_id: &str) -> Result<Vec<StagingRollup>, StoreError> {
        self.select_staging(
            "SELECT * FROM fuel_sales_staging WHERE run_id = ?1 ORDER BY id",
            params![run_id],
        )
    }

    fn delete_staging(&self, run_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM fuel_sales_staging WHERE run_id = ?1",
            params![run_id],
        )
        .map_err(write_err("delete_staging"))
    }

    fn staged_runs(&self) -> Result<Vec<StagedRun>, StoreError> {
        let op = "staged_runs";
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT run_id, MIN(import_ts), COUNT(*), MIN(record_date), MAX(record_date)
                 FROM fuel_sales_staging
                 GROUP BY run_id
                 ORDER BY MIN(import_ts), run_id",
            )
            .map_err(read_err(op))?;
        let runs = stmt
            .query_map([], |row| {
                Ok(StagedRun {
                    run_id: row.get(0)?,
                    import_ts: row.get(1)?,
                    rows: row.get::<_, i64>(2)? as usize,
                    date_from: date_at(row, 3)?,
                    date_to: date_at(row, 4)?,
                })
            })
            .map_err(read_err(op))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(read_err(op))?;
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fuelsale_pipeline::remap::stage_rollups;
    use fuelsale_pipeline::aggregate::aggregate_sales;

    fn store() -> SqliteSalesStore {
        SqliteSalesStore::from_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
    }

    fn sale(station: &str, d: u32, fuel1: f64, cost: Option<f64>) -> RawSaleRecord {
        RawSaleRecord {
            station_id: station.into(),
            record_date: date(d),
            litres: FuelGrades::new([fuel1, 1.0, 2.0, 3.0, 4.0, 5.0]),
            costs: cost.map(|c| FuelGrades::new([c, 0.0, 0.0, 0.0, 0.0, 0.0])),
        }
    }

    #[test]
    fn fetch_sales_filters_by_inclusive_range() {
        let store = store();
        store
            .insert_sales(&[
                sale("s1", 14, 1.0, None),
                sale("s1", 15, 2.0, Some(1.5)),
                sale("s2", 16, 3.0, None),
                sale("s2", 17, 4.0, None),
            ])
            .unwrap();

        let range = DateRange::new(date(15), date(16)).unwrap();
        let rows = store.fetch_sales(&range).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].litres.fuel1, 2.0);
        assert_eq!(rows[0].costs.map(|c| c.fuel1), Some(1.5));
        assert_eq!(rows[1].costs, None);
        assert_eq!(rows[1].litres.fuel6, 5.0);
    }

    #[test]
    fn station_nodes_group_members() {
        let store = store();
        store
            .put_station_node(&StationNode {
                id: "n1".into(),
                name: "North".into(),
                members: vec!["s2".into(), "s1".into()],
            })
            .unwrap();
        store
            .put_station_node(&StationNode { id: "n2".into(), name: "Empty".into(), members: vec![] })
            .unwrap();

        let nodes = store.station_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].members, vec!["s1".to_string(), "s2".to_string()]);
        assert!(nodes[1].members.is_empty());
    }

    #[test]
    fn staging_is_scoped_to_run() {
        let store = store();
        let rollups = aggregate_sales(&[sale("s1", 15, 10.0, Some(1.2)), sale("s2", 15, 5.0, None)]);
        store.append_staging(&stage_rollups(&rollups, "run-a", 1)).unwrap();
        store.append_staging(&stage_rollups(&rollups, "run-b", 2)).unwrap();

        let a = store.fetch_staging("run-a").unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a, stage_rollups(&rollups, "run-a", 1));

        assert_eq!(store.delete_staging("run-a").unwrap(), 2);
        assert!(store.fetch_staging("run-a").unwrap().is_empty());
        assert_eq!(store.all_staging().unwrap().len(), 2);
    }

    #[test]
    fn staged_runs_summarise_each_run() {
        let store = store();
        let early = aggregate_sales(&[sale("s1", 15, 10.0, None), sale("s1", 17, 5.0, None)]);
        let late = aggregate_sales(&[sale("s2", 16, 1.0, None)]);
        store.append_staging(&stage_rollups(&late, "run-late", 20)).unwrap();
        store.append_staging(&stage_rollups(&early, "run-early", 10)).unwrap();

        let runs = store.staged_runs().unwrap();
        assert_eq!(
            runs,
            vec![
                StagedRun {
                    run_id: "run-early".into(),
                    import_ts: 10,
                    rows: 2,
                    date_from: date(15),
                    date_to: date(17),
                },
                StagedRun {
                    run_id: "run-late".into(),
                    import_ts: 20,
                    rows: 1,
                    date_from: date(16),
                    date_to: date(16),
                },
            ]
        );

        store.delete_staging("run-early").unwrap();
        assert_eq!(store.staged_runs().unwrap().len(), 1);
    }

    #[test]
    fn malformed_date_is_a_decode_error() {
        let store = store();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO sales (station_id, record_date) VALUES ('s1', 20230700)",
                [],
            )
            .unwrap();
        let range = DateRange::new(date(1), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()).unwrap();
        let err = store.fetch_sales(&range).unwrap_err();
        assert!(matches!(err, StoreError::Decode { op: "fetch_sales", .. }));
    }
}
