//! Bundled DuckDB source driver.
//!
//! DuckDB is embedded, so "connections" are clones of one database handle.
//! They are pooled so that `ConnOpts` limits (open connections, idle
//! connections, lifetime, checkout timeout) apply the same way they would
//! for a networked engine.

use super::{quote_ident, ConnOpts, Driver, Origin, ReadTableOpt, Reader, RowSender};
use crate::database::{Columns, Row, Value};
use crate::error::{Error, Result};
use crate::subset::SubsetResolver;
use chrono::{DateTime, NaiveDate, NaiveTime};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::Connection;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// DSN prefix handled by this driver
pub const DSN_PREFIX: &str = "duckdb://";

/// Path part of a `duckdb://` DSN, `None` for another scheme
pub fn dsn_path(dsn: &str) -> Option<&str> {
    dsn.strip_prefix(DSN_PREFIX)
}

/// Open the database a `duckdb://` DSN names
pub fn open(dsn: &str) -> Result<Connection> {
    let path = dsn_path(dsn).ok_or_else(|| Error::UnsupportedSource {
        dsn: dsn.to_string(),
    })?;
    let conn = if path.is_empty() || path == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    };
    conn.map_err(|e| Error::connection_with_source(format!("failed to open {}", dsn), e))
}

/// Driver for `duckdb://<path>` and `duckdb://:memory:`
#[derive(Debug, Clone, Copy, Default)]
pub struct DuckDbDriver;

impl Driver for DuckDbDriver {
    fn name(&self) -> &str {
        "duckdb"
    }

    fn is_supported(&self, dsn: &str) -> bool {
        dsn_path(dsn).is_some()
    }

    fn new_connection(&self, opts: &ConnOpts) -> Result<Box<dyn Reader>> {
        let conn = open(&opts.dsn)?;
        Ok(Box::new(DuckDbReader::with_opts(conn, opts)))
    }
}

struct Pooled {
    conn: Connection,
    created: Instant,
}

/// Small blocking pool of cloned DuckDB connections
pub struct ConnectionPool {
    root: Mutex<Connection>,
    idle_tx: Sender<Pooled>,
    idle_rx: Receiver<Pooled>,
    /// Checkout permits, `None` when the pool is unbounded
    permits: Option<(Sender<()>, Receiver<()>)>,
    max_conns: Option<usize>,
    open: AtomicUsize,
    timeout: Duration,
    max_lifetime: Duration,
}

impl ConnectionPool {
    pub fn new(root: Connection, opts: &ConnOpts) -> Self {
        let (idle_tx, idle_rx) = bounded(opts.max_idle_conns);
        let permits = (opts.max_conns > 0).then(|| {
            let (tx, rx) = bounded(opts.max_conns);
            for _ in 0..opts.max_conns {
                let _ = tx.send(());
            }
            (tx, rx)
        });

        Self {
            root: Mutex::new(root),
            idle_tx,
            idle_rx,
            permits,
            max_conns: (opts.max_conns > 0).then_some(opts.max_conns),
            open: AtomicUsize::new(0),
            timeout: opts.timeout,
            max_lifetime: opts.max_conn_lifetime,
        }
    }

    /// Check a connection out, waiting at most the configured timeout
    pub fn get(&self) -> Result<PooledConnection<'_>> {
        if let Some((_, ref rx)) = self.permits {
            let acquired = if self.timeout.is_zero() {
                rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
            } else {
                rx.recv_timeout(self.timeout)
            };
            match acquired {
                Ok(()) => {}
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::connection(format!(
                        "timed out after {:?} waiting for a connection",
                        self.timeout
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::connection("connection pool is closed"))
                }
            }
        }

        match self.take_idle().map(Ok).unwrap_or_else(|| self.create()) {
            Ok(pooled) => Ok(PooledConnection {
                pool: self,
                inner: Some(pooled),
            }),
            Err(e) => {
                self.release_permit();
                Err(e)
            }
        }
    }

    fn take_idle(&self) -> Option<Pooled> {
        while let Ok(pooled) = self.idle_rx.try_recv() {
            if self.expired(&pooled) {
                self.open.fetch_sub(1, Ordering::Relaxed);
                debug!("recycling expired connection");
                continue;
            }
            return Some(pooled);
        }
        None
    }

    fn create(&self) -> Result<Pooled> {
        let root = self
            .root
            .lock()
            .map_err(|_| Error::connection("connection pool lock poisoned"))?;
        let conn = root
            .try_clone()
            .map_err(|e| Error::connection_with_source("failed to open a connection", e))?;
        self.open.fetch_add(1, Ordering::Relaxed);
        Ok(Pooled {
            conn,
            created: Instant::now(),
        })
    }

    fn expired(&self, pooled: &Pooled) -> bool {
        !self.max_lifetime.is_zero() && pooled.created.elapsed() >= self.max_lifetime
    }

    fn release(&self, pooled: Pooled) {
        if self.expired(&pooled) || self.idle_tx.try_send(pooled).is_err() {
            self.open.fetch_sub(1, Ordering::Relaxed);
        }
        self.release_permit();
    }

    fn release_permit(&self) {
        if let Some((ref tx, _)) = self.permits {
            let _ = tx.try_send(());
        }
    }

    /// Checkout limit, `None` when unbounded
    pub fn max_conns(&self) -> Option<usize> {
        self.max_conns
    }

    /// Open connections, idle or checked out
    pub fn size(&self) -> usize {
        self.open.load(Ordering::Relaxed)
    }

    /// Idle connections
    pub fn idle(&self) -> usize {
        self.idle_rx.len()
    }

    /// Drop every idle connection
    pub fn close(&self) {
        while self.idle_rx.try_recv().is_ok() {
            self.open.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// A checked-out connection, returned to the pool on drop
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    inner: Option<Pooled>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // inner is only taken in drop
        &self.inner.as_ref().expect("connection already returned").conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(pooled) = self.inner.take() {
            self.pool.release(pooled);
        }
    }
}

/// Reader over a DuckDB database
pub struct DuckDbReader {
    pool: ConnectionPool,
}

impl DuckDbReader {
    /// Wrap an already-open connection with default pool settings
    pub fn from_connection(conn: Connection) -> Self {
        Self::with_opts(conn, &ConnOpts::default())
    }

    pub fn with_opts(conn: Connection, opts: &ConnOpts) -> Self {
        Self {
            pool: ConnectionPool::new(conn, opts),
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Run a catalog query returning one text column
    fn strings(&self, table: &str, sql: &str, param: Option<&str>) -> Result<Vec<String>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::query(table, sql, e))?;
        let mut rows = match param {
            Some(p) => stmt.query([p]),
            None => stmt.query([]),
        }
        .map_err(|e| Error::query(table, sql, e))?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(|e| Error::scan(table, e))? {
            let value: String = row.get(0).map_err(|e| Error::scan(table, e))?;
            out.push(value);
        }
        Ok(out)
    }

    /// Stream the rows of one query through `emit`
    fn query_rows<F>(&self, table: &str, sql: &str, mut emit: F) -> Result<u64>
    where
        F: FnMut(Row) -> Result<()>,
    {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| Error::query(table, sql, e))?;
        let mut rows = stmt.query([]).map_err(|e| Error::query(table, sql, e))?;

        let mut columns: Option<Columns> = None;
        let mut count = 0u64;

        while let Some(row) = rows.next().map_err(|e| Error::scan(table, e))? {
            let columns = columns
                .get_or_insert_with(|| row.as_ref().column_names().into_iter().collect())
                .clone();

            let mut values = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                let value = row.get_ref(i).map_err(|e| Error::scan(table, e))?;
                values.push(decode(table, &columns[i], value)?);
            }

            emit(Row::new(columns, values))?;
            count += 1;
        }

        Ok(count)
    }
}

impl Reader for DuckDbReader {
    fn get_structure(&self) -> Result<String> {
        let ddl = self.strings(
            "",
            "SELECT sql FROM duckdb_tables() \
             WHERE database_name = current_database() AND schema_name = current_schema() \
             ORDER BY table_oid",
            None,
        )?;
        Ok(ddl
            .into_iter()
            .map(|s| {
                let s = s.trim_end().to_string();
                if s.ends_with(';') {
                    s
                } else {
                    s + ";"
                }
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }

    fn get_tables(&self) -> Result<Vec<String>> {
        self.strings(
            "",
            "SELECT table_name FROM duckdb_tables() \
             WHERE database_name = current_database() AND schema_name = current_schema() \
             ORDER BY table_oid",
            None,
        )
    }

    fn get_columns(&self, table: &str) -> Result<Vec<String>> {
        self.strings(
            table,
            "SELECT column_name FROM duckdb_columns() \
             WHERE table_name = ? AND database_name = current_database() \
             AND schema_name = current_schema() ORDER BY column_index",
            Some(table),
        )
    }

    fn get_primary_key(&self, table: &str) -> Result<Vec<String>> {
        self.strings(
            table,
            "SELECT unnest(constraint_column_names) FROM duckdb_constraints() \
             WHERE table_name = ? AND constraint_type = 'PRIMARY KEY' \
             AND database_name = current_database() AND schema_name = current_schema()",
            Some(table),
        )
    }

    fn origin(&self) -> Result<Origin> {
        const SQL: &str = "SELECT coalesce(path, ':memory:'), database_name FROM duckdb_databases() \
                           WHERE database_name = current_database()";
        let conn = self.pool.get()?;
        conn.query_row(SQL, [], |row| {
            Ok(Origin {
                host: row.get(0)?,
                database: row.get(1)?,
            })
        })
        .map_err(|e| Error::query("", SQL, e))
    }

    fn max_connections(&self) -> Option<usize> {
        self.pool.max_conns()
    }

    fn format_column(&self, table: &str, column: &str) -> String {
        format!("{}.{}", quote_ident(table), quote_ident(column))
    }

    fn format_table(&self, table: &str) -> String {
        quote_ident(table)
    }

    fn read_subset(
        &self,
        table: &str,
        worker: usize,
        out: RowSender,
        opts: &ReadTableOpt,
    ) -> Result<()> {
        let plan = SubsetResolver::new(self).plan(table, opts)?;
        let mut deduper = plan.deduper();

        for selection in &plan.selections {
            debug!(table, worker, selection = %selection.label, sql = %selection.sql, "reading");

            let rows = self.query_rows(table, &selection.sql, |row| {
                if let Some(ref mut d) = deduper {
                    if !d.admit(&row) {
                        return Ok(());
                    }
                }
                out.send(row).map_err(|_| Error::StreamClosed {
                    table: table.to_string(),
                })
            })?;

            debug!(table, worker, selection = %selection.label, rows, "selection done");
        }

        if let Some(d) = deduper.filter(|d| d.duplicates() > 0) {
            debug!(table, duplicates = d.duplicates(), "dropped duplicate rows");
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.pool.close();
        Ok(())
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}

fn decode(table: &str, column: &str, value: ValueRef<'_>) -> Result<Value> {
    let out_of_range = |what: &str| Error::Scan {
        table: table.to_string(),
        message: format!("{} out of range in column {}", what, column),
        source: None,
    };

    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Boolean(b) => Value::Bool(b),
        ValueRef::TinyInt(n) => Value::Int(n.into()),
        ValueRef::SmallInt(n) => Value::Int(n.into()),
        ValueRef::Int(n) => Value::Int(n.into()),
        ValueRef::BigInt(n) => Value::Int(n),
        ValueRef::HugeInt(n) => Value::Decimal(n.to_string()),
        ValueRef::UTinyInt(n) => Value::UInt(n.into()),
        ValueRef::USmallInt(n) => Value::UInt(n.into()),
        ValueRef::UInt(n) => Value::UInt(n.into()),
        ValueRef::UBigInt(n) => Value::UInt(n),
        ValueRef::Float(f) => Value::Float(f.into()),
        ValueRef::Double(f) => Value::Float(f),
        ValueRef::Decimal(d) => Value::Decimal(d.to_string()),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        ValueRef::Date32(days) => {
            // 719163 = days from 0001-01-01 to 1970-01-01
            let date = NaiveDate::from_num_days_from_ce_opt(719_163 + days)
                .ok_or_else(|| out_of_range("date"))?;
            Value::Date(date)
        }
        ValueRef::Time64(unit, t) => {
            let micros = to_micros(unit, t);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(
                (micros / 1_000_000) as u32,
                ((micros % 1_000_000) * 1_000) as u32,
            )
            .ok_or_else(|| out_of_range("time"))?;
            Value::Time(time)
        }
        ValueRef::Timestamp(unit, t) => {
            let micros = to_micros(unit, t);
            let ts = DateTime::from_timestamp(
                micros.div_euclid(1_000_000),
                (micros.rem_euclid(1_000_000) * 1_000) as u32,
            )
            .ok_or_else(|| out_of_range("timestamp"))?;
            Value::Timestamp(ts.naive_utc())
        }
        other => {
            return Err(Error::Scan {
                table: table.to_string(),
                message: format!(
                    "unsupported value type {:?} in column {}",
                    other.data_type(),
                    column
                ),
                source: None,
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::SubsetOpt;
    use std::sync::Arc;

    fn seeded() -> DuckDbReader {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR, born DATE);
             CREATE TABLE orders (id INTEGER PRIMARY KEY, user_id INTEGER, total DOUBLE);
             INSERT INTO users VALUES (1, 'a@x.io', '1990-01-02'), (2, 'b@x.io', NULL), (3, 'c@x.io', NULL);
             INSERT INTO orders VALUES (10, 1, 9.5), (11, 1, 3.0), (12, 3, 1.25);",
        )
        .unwrap();
        DuckDbReader::from_connection(conn)
    }

    fn collect(reader: &DuckDbReader, table: &str, opts: &ReadTableOpt) -> Vec<Row> {
        let (tx, rx) = crossbeam_channel::unbounded();
        reader.read_subset(table, 0, tx, opts).unwrap();
        rx.iter().collect()
    }

    #[test]
    fn test_catalog() {
        let reader = seeded();
        assert_eq!(reader.get_tables().unwrap(), vec!["users", "orders"]);
        assert_eq!(
            reader.get_columns("users").unwrap(),
            vec!["id", "email", "born"]
        );
        assert_eq!(reader.get_primary_key("orders").unwrap(), vec!["id"]);

        let ddl = reader.get_structure().unwrap();
        assert!(ddl.contains("CREATE TABLE users"), "{}", ddl);
        assert!(ddl.find("users").unwrap() < ddl.find("orders").unwrap());
    }

    #[test]
    fn test_read_full_table_with_types() {
        let reader = seeded();
        let rows = collect(&reader, "users", &ReadTableOpt::blank(vec![]));

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(1)));
        assert_eq!(
            rows[0].get("born"),
            Some(&Value::Date(NaiveDate::from_ymd_opt(1990, 1, 2).unwrap()))
        );
        assert!(rows[1].get("born").unwrap().is_null());
    }

    #[test]
    fn test_read_filtered_subset() {
        let reader = seeded();
        let opts = ReadTableOpt {
            subsets: vec![Arc::new(SubsetOpt {
                name: "big".into(),
                match_expr: Some("total > 2".into()),
                limit: 1,
                sorts: vec![("total".into(), crate::config::SortDirection::Asc)],
                relationships: vec![],
            })],
            ..Default::default()
        };

        let rows = collect(&reader, "orders", &opts);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&Value::Int(11)));
    }

    #[test]
    fn test_bad_predicate_is_query_error() {
        let reader = seeded();
        let opts = ReadTableOpt {
            subsets: vec![Arc::new(SubsetOpt {
                name: "bad".into(),
                match_expr: Some("no_such_column = 1".into()),
                ..Default::default()
            })],
            ..Default::default()
        };

        let (tx, _rx) = crossbeam_channel::unbounded();
        let err = reader.read_subset("orders", 0, tx, &opts).unwrap_err();
        match err {
            Error::Query { sql, .. } => assert!(sql.unwrap().contains("no_such_column")),
            other => panic!("expected query error, got {}", other),
        }
    }

    #[test]
    fn test_closed_stream() {
        let reader = seeded();
        let (tx, rx) = crossbeam_channel::bounded(1);
        drop(rx);
        let err = reader
            .read_subset("users", 0, tx, &ReadTableOpt::blank(vec![]))
            .unwrap_err();
        assert!(matches!(err, Error::StreamClosed { .. }));
    }

    #[test]
    fn test_pool_checkout_timeout() {
        let conn = Connection::open_in_memory().unwrap();
        let opts = ConnOpts {
            timeout: Duration::from_millis(50),
            max_conns: 1,
            ..ConnOpts::new("duckdb://:memory:")
        };
        let reader = DuckDbReader::with_opts(conn, &opts);

        let held = reader.pool().get().unwrap();
        let err = reader.get_tables().unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{}", err);

        drop(held);
        assert!(reader.get_tables().is_ok());
        assert_eq!(reader.pool().size(), 1);
        assert_eq!(reader.pool().idle(), 1);
    }

    #[test]
    fn test_primary_key_errors_propagate() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY);")
            .unwrap();
        let opts = ConnOpts {
            timeout: Duration::from_millis(50),
            max_conns: 1,
            ..ConnOpts::new("duckdb://:memory:")
        };
        let reader = DuckDbReader::with_opts(conn, &opts);
        assert_eq!(reader.max_connections(), Some(1));

        let held = reader.pool().get().unwrap();
        let err = reader.get_primary_key("t").unwrap_err();
        assert!(matches!(err, Error::Connection { .. }), "{}", err);
        drop(held);

        assert_eq!(reader.get_primary_key("t").unwrap(), vec!["id"]);
    }

    #[test]
    fn test_origin_names_file_and_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("shop.db");
        let reader = DuckDbDriver
            .new_connection(&ConnOpts::new(format!("duckdb://{}", path.display())))
            .unwrap();

        let origin = reader.origin().unwrap();
        assert_eq!(origin.database, "shop");
        assert!(origin.host.ends_with("shop.db"), "{}", origin.host);

        let memory = seeded().origin().unwrap();
        assert_eq!(memory.host, ":memory:");
        assert_eq!(memory.database, "memory");
    }

    #[test]
    fn test_pool_recycles_expired() {
        let conn = Connection::open_in_memory().unwrap();
        let opts = ConnOpts {
            max_conn_lifetime: Duration::from_millis(1),
            ..ConnOpts::new("duckdb://:memory:")
        };
        let reader = DuckDbReader::with_opts(conn, &opts);

        drop(reader.pool().get().unwrap());
        std::thread::sleep(Duration::from_millis(5));

        // The idle connection is past its lifetime and gets replaced
        let fresh = reader.pool().get().unwrap();
        assert_eq!(reader.pool().size(), 1);
        assert_eq!(reader.pool().idle(), 0);
        drop(fresh);
    }
}
