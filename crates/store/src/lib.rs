//! `fuelsale-store` — SQLite stores for the fuel sales pipeline.
//!
//! [`SqliteSalesStore`] holds raw sales, reference data and staging;
//! [`SqliteExportStore`] holds the permanent export tables and the import log.
//! Dates are stored as `YYYYMMDD` integers.

pub mod export;
pub mod sales;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{Connection, Row};

use fuelsale_pipeline::calendar::parse_date_key;
use fuelsale_pipeline::StoreError;

pub use export::SqliteExportStore;
pub use sales::SqliteSalesStore;

/// Open (or create) a database file with `busy_timeout` set.
pub fn open_connection(path: &Path, timeout: Duration) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)
        .map_err(|e| StoreError::Connect(format!("{}: {e}", path.display())))?;
    conn.busy_timeout(timeout)
        .map_err(|e| StoreError::Connect(format!("{}: {e}", path.display())))?;
    log::debug!("opened {} (busy timeout {:?})", path.display(), timeout);
    Ok(conn)
}

/// Read a `YYYYMMDD` column.
pub(crate) fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let key: u32 = row.get(idx)?;
    parse_date_key(key).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("not a YYYYMMDD date: {key}").into(),
        )
    })
}

/// Map a read-side rusqlite error. Conversion failures mean a row is
/// malformed rather than the query failing.
pub(crate) fn read_err(op: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| match e {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => StoreError::decode(op, e.to_string()),
        other => StoreError::query(op, other.to_string()),
    }
}

pub(crate) fn write_err(op: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::write(op, e.to_string())
}
