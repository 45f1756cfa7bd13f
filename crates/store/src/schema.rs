// Table layouts. Every date column is an INTEGER `YYYYMMDD` key.

pub const SALES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id TEXT NOT NULL,
    record_date INTEGER NOT NULL,
    fuel1 REAL NOT NULL DEFAULT 0,
    fuel2 REAL NOT NULL DEFAULT 0,
    fuel3 REAL NOT NULL DEFAULT 0,
    fuel4 REAL NOT NULL DEFAULT 0,
    fuel5 REAL NOT NULL DEFAULT 0,
    fuel6 REAL NOT NULL DEFAULT 0,
    cost1 REAL,                   -- NULL = no cost snapshot on this record
    cost2 REAL,
    cost3 REAL,
    cost4 REAL,
    cost5 REAL,
    cost6 REAL
);
CREATE INDEX IF NOT EXISTS sales_record_date ON sales (record_date);

CREATE TABLE IF NOT EXISTS propane_sales (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    station_id TEXT NOT NULL,
    grade_id INTEGER NOT NULL,
    dispenser_id TEXT NOT NULL,
    record_date INTEGER NOT NULL,
    litres REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS propane_sales_record_date ON propane_sales (record_date);

CREATE TABLE IF NOT EXISTS station_nodes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS station_node_members (
    node_id TEXT NOT NULL REFERENCES station_nodes (id),
    station_id TEXT NOT NULL,
    PRIMARY KEY (node_id, station_id)
);

CREATE TABLE IF NOT EXISTS fuel_sales_staging (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    import_ts INTEGER NOT NULL,
    record_date INTEGER NOT NULL,
    station_id TEXT NOT NULL,
    nl REAL NOT NULL,
    snl REAL NOT NULL,
    dsl REAL NOT NULL,
    cdsl REAL NOT NULL,
    prop REAL NOT NULL,
    fuel1 REAL NOT NULL,
    fuel2 REAL NOT NULL,
    fuel3 REAL NOT NULL,
    fuel4 REAL NOT NULL,
    fuel5 REAL NOT NULL,
    fuel6 REAL NOT NULL,
    cost1 REAL,
    cost2 REAL,
    cost3 REAL,
    cost4 REAL,
    cost5 REAL,
    cost6 REAL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS fuel_sales_staging_run ON fuel_sales_staging (run_id);
"#;

pub const EXPORT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS fuel_sale_export (
    id TEXT PRIMARY KEY,          -- {YYYYMMDD}-{node_id}
    record_date INTEGER NOT NULL,
    node_id TEXT NOT NULL,
    avg_fuel_cost REAL NOT NULL,
    nl REAL NOT NULL,
    snl REAL NOT NULL,
    dsl REAL NOT NULL,
    cdsl REAL NOT NULL,
    prop REAL NOT NULL,
    import_ts INTEGER NOT NULL,
    year_week INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS fuel_sale_export_record_date ON fuel_sale_export (record_date);

CREATE TABLE IF NOT EXISTS fuel_price (
    node_id TEXT NOT NULL,
    record_date INTEGER NOT NULL,
    price REAL NOT NULL,
    year_week INTEGER NOT NULL,
    PRIMARY KEY (node_id, record_date)
);

CREATE TABLE IF NOT EXISTS propane_sale_export (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sale_key TEXT NOT NULL,       -- {YYYYMMDD}-{tank_id}; not unique in insert mode
    record_date INTEGER NOT NULL,
    tank_id INTEGER NOT NULL,
    litres REAL NOT NULL,
    import_ts INTEGER NOT NULL,
    year INTEGER NOT NULL,
    year_week INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS propane_sale_export_key ON propane_sale_export (sale_key);

CREATE TABLE IF NOT EXISTS import_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    import_type TEXT NOT NULL,
    date_from INTEGER NOT NULL,
    date_to INTEGER NOT NULL,
    import_ts INTEGER NOT NULL,
    import_date TEXT NOT NULL,
    outcome TEXT NOT NULL,
    record_quantity INTEGER NOT NULL,
    detail TEXT
);
"#;
