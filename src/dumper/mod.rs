//! Destination side of a copy.
//!
//! A [`Dumper`] receives the source structure once, then one contiguous
//! block per table. Dumpers are owned by a single sink thread, so they only
//! need to be `Send`.
//!
//! Destinations are addressed by DSN and resolved through an append-only
//! registry, the same way sources are:
//!
//! - `os://stdout`, `os://stderr`: SQL text
//! - `file://<path>[?dialect=…&rows_per_insert=…]`: SQL text, compressed
//!   when the path ends in `.gz`, `.bz2`, `.xz` or `.zst`
//! - `duckdb://<path>`: direct load into a DuckDB database

pub mod duckdb;
pub mod sql;

pub use self::duckdb::DuckDbDumper;
pub use sql::{Compression, DumpOutput, OutputWriter, SqlDialect, SqlDumper};

use crate::database::Row;
use crate::error::{Error, Result};
use crate::reader::{ConnOpts, Origin};
use once_cell::sync::Lazy;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// How a table's block ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Every selected row was written
    Complete { rows: u64 },
    /// The table's pipeline failed after `rows` rows were written
    Failed { rows: u64, reason: String },
}

impl BlockOutcome {
    pub fn rows(&self) -> u64 {
        match self {
            BlockOutcome::Complete { rows } | BlockOutcome::Failed { rows, .. } => *rows,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, BlockOutcome::Complete { .. })
    }
}

/// Writer of a copy's output
pub trait Dumper: Send {
    /// Record where the rows come from, before anything is written
    fn set_origin(&mut self, _origin: &Origin) {}

    /// Write the DDL of the source, before any data
    fn dump_structure(&mut self, structure: &str) -> Result<()>;

    /// Start the block of `table`
    fn begin_table(&mut self, table: &str, columns: &[String]) -> Result<()>;

    /// Write one row of the current block
    fn write_row(&mut self, table: &str, row: &Row) -> Result<()>;

    /// Finish the current block
    fn end_table(&mut self, table: &str, outcome: &BlockOutcome) -> Result<()>;

    /// Flush and release the destination
    fn close(&mut self) -> Result<()>;
}

/// Factory for dumpers of one kind of destination
pub trait DumperDriver: Send + Sync {
    fn name(&self) -> &str;

    fn is_supported(&self, dsn: &str) -> bool;

    fn new_dumper(&self, opts: &ConnOpts) -> Result<Box<dyn Dumper>>;
}

/// `os://stdout` and `os://stderr`
struct OsDriver;

impl DumperDriver for OsDriver {
    fn name(&self) -> &str {
        "os"
    }

    fn is_supported(&self, dsn: &str) -> bool {
        matches!(dsn.split('?').next(), Some("os://stdout" | "os://stderr"))
    }

    fn new_dumper(&self, opts: &ConnOpts) -> Result<Box<dyn Dumper>> {
        let (target, params) = split_dsn(&opts.dsn, "os://");
        let output = match target {
            "stderr" => OutputWriter::stderr(),
            _ => OutputWriter::stdout(),
        };
        Ok(Box::new(params.apply(SqlDumper::new(output))?))
    }
}

/// `file://<path>`
struct FileDriver;

impl DumperDriver for FileDriver {
    fn name(&self) -> &str {
        "file"
    }

    fn is_supported(&self, dsn: &str) -> bool {
        dsn.starts_with("file://")
    }

    fn new_dumper(&self, opts: &ConnOpts) -> Result<Box<dyn Dumper>> {
        let (path, params) = split_dsn(&opts.dsn, "file://");
        if path.is_empty() {
            return Err(Error::config(format!("no path in {}", opts.dsn)));
        }
        let output = OutputWriter::create(&PathBuf::from(path))?;
        Ok(Box::new(params.apply(SqlDumper::new(output))?))
    }
}

/// `duckdb://<path>`
struct DuckDbDriver;

impl DumperDriver for DuckDbDriver {
    fn name(&self) -> &str {
        "duckdb"
    }

    fn is_supported(&self, dsn: &str) -> bool {
        crate::reader::duckdb::dsn_path(dsn).is_some()
    }

    fn new_dumper(&self, opts: &ConnOpts) -> Result<Box<dyn Dumper>> {
        let conn = crate::reader::duckdb::open(&opts.dsn)?;
        Ok(Box::new(DuckDbDumper::new(conn)))
    }
}

/// Query parameters of a SQL text destination
#[derive(Debug, Default)]
struct SqlParams {
    dialect: Option<String>,
    rows_per_insert: Option<String>,
}

impl SqlParams {
    fn apply<W: DumpOutput>(self, mut dumper: SqlDumper<W>) -> Result<SqlDumper<W>> {
        if let Some(d) = self.dialect {
            dumper = dumper.with_dialect(d.parse().map_err(Error::config)?);
        }
        if let Some(n) = self.rows_per_insert {
            let n: usize = n
                .parse()
                .map_err(|_| Error::config(format!("invalid rows_per_insert: {}", n)))?;
            dumper = dumper.with_rows_per_insert(n);
        }
        Ok(dumper)
    }
}

fn split_dsn<'a>(dsn: &'a str, scheme: &str) -> (&'a str, SqlParams) {
    let rest = dsn.strip_prefix(scheme).unwrap_or(dsn);
    let (target, query) = rest.split_once('?').unwrap_or((rest, ""));

    let mut params = SqlParams::default();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        match k {
            "dialect" => params.dialect = Some(v.to_string()),
            "rows_per_insert" => params.rows_per_insert = Some(v.to_string()),
            other => debug!(param = other, "ignoring unknown destination parameter"),
        }
    }
    (target, params)
}

static DRIVERS: Lazy<RwLock<Vec<Arc<dyn DumperDriver>>>> = Lazy::new(|| {
    RwLock::new(vec![
        Arc::new(OsDriver) as Arc<dyn DumperDriver>,
        Arc::new(FileDriver),
        Arc::new(DuckDbDriver),
    ])
});

/// Append a destination driver to the process-wide registry
pub fn register(driver: Arc<dyn DumperDriver>) {
    if let Ok(mut drivers) = DRIVERS.write() {
        drivers.push(driver);
    }
}

/// Open a dumper for the destination DSN; the first matching driver wins
pub fn connect(opts: &ConnOpts) -> Result<Box<dyn Dumper>> {
    let driver = DRIVERS
        .read()
        .ok()
        .and_then(|d| d.iter().find(|d| d.is_supported(&opts.dsn)).cloned())
        .ok_or_else(|| Error::UnsupportedSource {
            dsn: opts.dsn.clone(),
        })?;
    debug!(driver = driver.name(), dsn = %opts.dsn, "opening destination");
    driver.new_dumper(opts)
}
