//! SQL text dumps.

use super::{BlockOutcome, Dumper};
use crate::database::{Row, Value};
use crate::error::{Error, Result};
use crate::reader::Origin;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const WRITER_BUFFER_SIZE: usize = 256 * 1024;

/// Rows per multi-row INSERT statement
pub const DEFAULT_ROWS_PER_INSERT: usize = 100;

/// Target SQL dialect of a dump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SqlDialect {
    MySql,
    Postgres,
    Sqlite,
    #[default]
    DuckDb,
}

impl std::str::FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "sqlite" | "sqlite3" => Ok(SqlDialect::Sqlite),
            "duckdb" => Ok(SqlDialect::DuckDb),
            _ => Err(format!(
                "Unknown dialect: {}. Valid options: mysql, postgres, sqlite, duckdb",
                s
            )),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlDialect::MySql => write!(f, "mysql"),
            SqlDialect::Postgres => write!(f, "postgres"),
            SqlDialect::Sqlite => write!(f, "sqlite"),
            SqlDialect::DuckDb => write!(f, "duckdb"),
        }
    }
}

impl SqlDialect {
    /// Quote an identifier
    pub fn quote_ident(self, name: &str) -> String {
        match self {
            SqlDialect::MySql => format!("`{}`", name.replace('`', "``")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Append a value as a SQL literal
    pub fn write_literal(self, out: &mut String, value: &Value) {
        match value {
            Value::Null => out.push_str("NULL"),
            Value::Bool(b) => match self {
                SqlDialect::Sqlite => out.push_str(if *b { "1" } else { "0" }),
                _ => out.push_str(if *b { "TRUE" } else { "FALSE" }),
            },
            Value::Int(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::UInt(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Float(f) => self.write_float(out, *f),
            Value::Decimal(d) => out.push_str(d),
            Value::Text(s) => self.write_string(out, s),
            Value::Bytes(b) => self.write_bytes(out, b),
            Value::Date(d) => {
                let _ = write!(out, "'{}'", d.format("%Y-%m-%d"));
            }
            Value::Time(t) => {
                let _ = write!(out, "'{}'", t.format("%H:%M:%S%.f"));
            }
            Value::Timestamp(ts) => {
                let _ = write!(out, "'{}'", ts.format("%Y-%m-%d %H:%M:%S%.f"));
            }
        }
    }

    fn write_float(self, out: &mut String, f: f64) {
        if f.is_finite() {
            let _ = write!(out, "{:?}", f);
            return;
        }
        match self {
            SqlDialect::Postgres | SqlDialect::DuckDb => {
                let s = if f.is_nan() {
                    "'NaN'"
                } else if f > 0.0 {
                    "'Infinity'"
                } else {
                    "'-Infinity'"
                };
                out.push_str(s);
            }
            // No literal for NaN or infinity
            SqlDialect::MySql | SqlDialect::Sqlite => out.push_str("NULL"),
        }
    }

    fn write_string(self, out: &mut String, s: &str) {
        out.push('\'');
        match self {
            SqlDialect::MySql => {
                for c in s.chars() {
                    match c {
                        '\'' => out.push_str("\\'"),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\r' => out.push_str("\\r"),
                        '\0' => out.push_str("\\0"),
                        '\x1a' => out.push_str("\\Z"),
                        c => out.push(c),
                    }
                }
            }
            _ => {
                for c in s.chars() {
                    if c == '\'' {
                        out.push('\'');
                    }
                    out.push(c);
                }
            }
        }
        out.push('\'');
    }

    fn write_bytes(self, out: &mut String, b: &[u8]) {
        let hex = hex::encode(b);
        match self {
            SqlDialect::MySql | SqlDialect::Sqlite => {
                let _ = write!(out, "X'{}'", hex);
            }
            SqlDialect::Postgres => {
                let _ = write!(out, "'\\x{}'::bytea", hex);
            }
            SqlDialect::DuckDb => {
                let _ = write!(out, "from_hex('{}')", hex);
            }
        }
    }

    fn write_header<W: Write>(self, writer: &mut W) -> io::Result<()> {
        match self {
            SqlDialect::MySql => {
                writeln!(writer, "SET NAMES utf8mb4;")?;
                writeln!(writer, "SET FOREIGN_KEY_CHECKS = 0;")?;
            }
            SqlDialect::Postgres => {
                writeln!(writer, "SET client_encoding = 'UTF8';")?;
                writeln!(writer, "SET session_replication_role = replica;")?;
            }
            SqlDialect::Sqlite => {
                writeln!(writer, "PRAGMA foreign_keys = OFF;")?;
            }
            SqlDialect::DuckDb => {}
        }
        writeln!(writer)
    }

    fn write_footer<W: Write>(self, writer: &mut W) -> io::Result<()> {
        match self {
            SqlDialect::MySql => writeln!(writer, "SET FOREIGN_KEY_CHECKS = 1;"),
            SqlDialect::Postgres => writeln!(writer, "SET session_replication_role = DEFAULT;"),
            SqlDialect::Sqlite => writeln!(writer, "PRAGMA foreign_keys = ON;"),
            SqlDialect::DuckDb => Ok(()),
        }
    }
}

/// Compression format detected from file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
    Xz,
    Zstd,
}

impl Compression {
    /// Detect compression format from file extension
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("gz" | "gzip") => Compression::Gzip,
            Some("bz2" | "bzip2") => Compression::Bzip2,
            Some("xz" | "lzma") => Compression::Xz,
            Some("zst" | "zstd") => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

/// A byte sink that may need finishing (compressed streams write a trailer)
pub trait DumpOutput: Write + Send {
    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl DumpOutput for Vec<u8> {}

impl DumpOutput for io::Sink {}

/// Where a SQL dump goes
pub enum OutputWriter {
    Stdout(BufWriter<io::Stdout>),
    Stderr(io::Stderr),
    Plain(BufWriter<File>),
    Gzip(flate2::write::GzEncoder<BufWriter<File>>),
    Bzip2(bzip2::write::BzEncoder<BufWriter<File>>),
    Xz(xz2::write::XzEncoder<BufWriter<File>>),
    Zstd(zstd::stream::write::Encoder<'static, BufWriter<File>>),
}

impl OutputWriter {
    pub fn stdout() -> Self {
        OutputWriter::Stdout(BufWriter::with_capacity(WRITER_BUFFER_SIZE, io::stdout()))
    }

    pub fn stderr() -> Self {
        OutputWriter::Stderr(io::stderr())
    }

    /// Create a file, compressed according to its extension
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).map_err(|e| {
            Error::write_with_source(format!("failed to create {}", path.display()), e)
        })?;
        let writer = BufWriter::with_capacity(WRITER_BUFFER_SIZE, file);

        Ok(match Compression::from_path(path) {
            Compression::None => OutputWriter::Plain(writer),
            Compression::Gzip => OutputWriter::Gzip(flate2::write::GzEncoder::new(
                writer,
                flate2::Compression::default(),
            )),
            Compression::Bzip2 => OutputWriter::Bzip2(bzip2::write::BzEncoder::new(
                writer,
                bzip2::Compression::default(),
            )),
            Compression::Xz => OutputWriter::Xz(xz2::write::XzEncoder::new(writer, 6)),
            Compression::Zstd => OutputWriter::Zstd(
                zstd::stream::write::Encoder::new(writer, 0)
                    .map_err(|e| Error::write_with_source("failed to start zstd stream", e))?,
            ),
        })
    }

    fn inner(&mut self) -> &mut dyn Write {
        match self {
            OutputWriter::Stdout(w) => w,
            OutputWriter::Stderr(w) => w,
            OutputWriter::Plain(w) => w,
            OutputWriter::Gzip(w) => w,
            OutputWriter::Bzip2(w) => w,
            OutputWriter::Xz(w) => w,
            OutputWriter::Zstd(w) => w,
        }
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner().flush()
    }
}

impl DumpOutput for OutputWriter {
    fn finish(&mut self) -> io::Result<()> {
        match self {
            OutputWriter::Gzip(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
            OutputWriter::Bzip2(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
            OutputWriter::Xz(w) => {
                w.try_finish()?;
                w.get_mut().flush()
            }
            OutputWriter::Zstd(w) => {
                w.do_finish()?;
                w.get_mut().flush()
            }
            other => other.flush(),
        }
    }
}

/// Streams the copy as SQL text
pub struct SqlDumper<W: DumpOutput> {
    writer: W,
    dialect: SqlDialect,
    rows_per_insert: usize,
    source: Option<String>,
    database: Option<String>,
    started: bool,
    /// INSERT prefix of the open block
    insert_prefix: Option<String>,
    /// Formatted rows waiting for the next INSERT
    pending: Vec<String>,
    closed: bool,
}

impl<W: DumpOutput> SqlDumper<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            dialect: SqlDialect::default(),
            rows_per_insert: DEFAULT_ROWS_PER_INSERT,
            source: None,
            database: None,
            started: false,
            insert_prefix: None,
            pending: Vec::new(),
            closed: false,
        }
    }

    pub fn with_dialect(mut self, dialect: SqlDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_rows_per_insert(mut self, rows: usize) -> Self {
        self.rows_per_insert = rows.max(1);
        self
    }

    /// Host and database named in the preamble
    pub fn with_origin(mut self, host: impl Into<String>, database: impl Into<String>) -> Self {
        self.set_origin(&Origin {
            host: host.into(),
            database: database.into(),
        });
        self
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Consume the dumper and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_preamble(&mut self) -> io::Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        let w = &mut self.writer;
        writeln!(w, "-- *******************************")?;
        writeln!(w, "-- Subset dump generated by sql-subsetter")?;
        if let Some(ref source) = self.source {
            writeln!(w, "-- Host: {}", source)?;
        }
        if let Some(ref database) = self.database {
            writeln!(w, "-- Database: {}", database)?;
        }
        writeln!(
            w,
            "-- Dumped at: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S %z")
        )?;
        writeln!(w, "-- Dialect: {}", self.dialect)?;
        writeln!(w, "-- *******************************")?;
        writeln!(w)?;
        self.dialect.write_header(w)
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let prefix = self.insert_prefix.as_deref().unwrap_or_default();
        writeln!(self.writer, "{}", prefix)?;
        for (i, row) in self.pending.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b",\n")?;
            }
            self.writer.write_all(row.as_bytes())?;
        }
        self.writer.write_all(b";\n")?;
        self.pending.clear();
        Ok(())
    }
}

fn io_err(context: &str) -> impl FnOnce(io::Error) -> Error + '_ {
    move |e| Error::write_with_source(format!("{}: {}", context, e), e)
}

impl<W: DumpOutput> Dumper for SqlDumper<W> {
    fn set_origin(&mut self, origin: &Origin) {
        self.source = Some(origin.host.clone()).filter(|h| !h.is_empty());
        self.database = Some(origin.database.clone()).filter(|d| !d.is_empty());
    }

    fn dump_structure(&mut self, structure: &str) -> Result<()> {
        self.write_preamble().map_err(io_err("writing preamble"))?;
        let w = &mut self.writer;
        (|| -> io::Result<()> {
            writeln!(w, "-- Structure")?;
            let structure = structure.trim();
            if !structure.is_empty() {
                writeln!(w, "{}", structure)?;
            }
            writeln!(w)
        })()
        .map_err(io_err("writing structure"))
    }

    fn begin_table(&mut self, table: &str, columns: &[String]) -> Result<()> {
        self.write_preamble().map_err(io_err("writing preamble"))?;

        let quoted: Vec<String> = columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect();
        self.insert_prefix = Some(if quoted.is_empty() {
            format!("INSERT INTO {} VALUES", self.dialect.quote_ident(table))
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES",
                self.dialect.quote_ident(table),
                quoted.join(", ")
            )
        });
        writeln!(self.writer, "-- Data: {}", table).map_err(io_err("writing block header"))
    }

    fn write_row(&mut self, _table: &str, row: &Row) -> Result<()> {
        let mut values = String::with_capacity(row.len() * 8);
        values.push('(');
        for (i, value) in row.values().iter().enumerate() {
            if i > 0 {
                values.push_str(", ");
            }
            self.dialect.write_literal(&mut values, value);
        }
        values.push(')');
        self.pending.push(values);

        if self.pending.len() >= self.rows_per_insert {
            self.flush_pending().map_err(io_err("writing rows"))?;
        }
        Ok(())
    }

    fn end_table(&mut self, table: &str, outcome: &BlockOutcome) -> Result<()> {
        self.flush_pending().map_err(io_err("writing rows"))?;
        self.insert_prefix = None;

        let w = &mut self.writer;
        (|| -> io::Result<()> {
            if let BlockOutcome::Failed { rows, reason } = outcome {
                writeln!(
                    w,
                    "-- Data for {} is incomplete after {} row(s): {}",
                    table,
                    rows,
                    reason.replace(['\n', '\r'], " ")
                )?;
            }
            writeln!(w)?;
            w.flush()
        })()
        .map_err(io_err("finishing block"))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.write_preamble().map_err(io_err("writing preamble"))?;
        self.dialect
            .write_footer(&mut self.writer)
            .map_err(io_err("writing footer"))?;
        self.writer.finish().map_err(io_err("closing output"))
    }
}
