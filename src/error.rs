//! Error types for sql-subsetter.
//!
//! Errors are classified by where in a run they happen, which decides how far
//! they reach:
//! - Startup errors (unsupported DSN, bad configuration) abort before any table is read
//! - Table errors (query, scan, transform) fail one table pipeline only
//! - Connection and write errors fail the whole run

use std::fmt;
use thiserror::Error;

/// Result type for sql-subsetter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by the variants that wrap driver errors
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No registered driver accepts the DSN
    UnsupportedSource,
    /// Connecting to, or checking a connection out of, a database failed
    Connection,
    /// A selection query could not be prepared or executed
    Query,
    /// A row could not be decoded mid-stream
    Scan,
    /// The transform stage rejected a row
    Transform,
    /// The destination could not be written
    Write,
    /// Invalid configuration
    Configuration,
    /// The table was never started or was abandoned
    Cancelled,
    /// Aggregated per-table failures
    Pipeline,
}

impl ErrorCategory {
    /// Whether an error in this category ends the whole run
    #[inline]
    pub const fn is_fatal_for_run(self) -> bool {
        matches!(self, Self::Connection | Self::Write | Self::UnsupportedSource)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnsupportedSource => "unsupported_source",
            Self::Connection => "connection",
            Self::Query => "query",
            Self::Scan => "scan",
            Self::Transform => "transform",
            Self::Write => "write",
            Self::Configuration => "configuration",
            Self::Cancelled => "cancelled",
            Self::Pipeline => "pipeline",
        };
        f.write_str(s)
    }
}

/// A table that failed during a run, with the cause
#[derive(Debug)]
pub struct TableFailure {
    pub table: String,
    pub error: Error,
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.error)
    }
}

/// Main error type for sql-subsetter
#[derive(Error, Debug)]
pub enum Error {
    /// No registered driver matches the address
    #[error("unsupported dsn {dsn:?}")]
    UnsupportedSource { dsn: String },

    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Selection query failed (bad match predicate, missing column, ...)
    #[error("query error on table {table}: {message}")]
    Query {
        table: String,
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<BoxError>,
    },

    /// Row decoding failed mid-stream
    #[error("scan error on table {table}: {message}")]
    Scan {
        table: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The transform stage rejected a value
    #[error("transform error on {table}.{column}: {message}")]
    Transform {
        table: String,
        column: String,
        message: String,
    },

    /// Destination write failed
    #[error("write error: {message}")]
    Write {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The table pipeline was cancelled before it could finish
    #[error("table {table} was cancelled")]
    Cancelled { table: String },

    /// The consumer side of a row stream went away
    #[error("row stream for table {table} was closed by the consumer")]
    StreamClosed { table: String },

    /// One or more table pipelines failed
    #[error("{} table(s) failed: {}", failures.len(), join_failures(failures))]
    Pipeline { failures: Vec<TableFailure> },
}

fn join_failures(failures: &[TableFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UnsupportedSource { .. } => ErrorCategory::UnsupportedSource,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Scan { .. } => ErrorCategory::Scan,
            Self::Transform { .. } => ErrorCategory::Transform,
            Self::Write { .. } => ErrorCategory::Write,
            Self::Config { .. } => ErrorCategory::Configuration,
            Self::Cancelled { .. } | Self::StreamClosed { .. } => ErrorCategory::Cancelled,
            Self::Pipeline { .. } => ErrorCategory::Pipeline,
        }
    }

    /// Whether this error ends the whole run rather than a single table
    pub fn is_fatal_for_run(&self) -> bool {
        self.category().is_fatal_for_run()
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with a source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error with the failing SQL
    pub fn query(
        table: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            table: table.into(),
            message: source.to_string(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a scan error
    pub fn scan(
        table: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Scan {
            table: table.into(),
            message: source.to_string(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transform error
    pub fn transform(
        table: impl Into<String>,
        column: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transform {
            table: table.into(),
            column: column.into(),
            message: message.into(),
        }
    }

    /// Create a write error
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write {
            message: message.into(),
            source: None,
        }
    }

    /// Create a write error with a source
    pub fn write_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Write {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// The failing tables of an aggregated pipeline error
    pub fn failed_tables(&self) -> Vec<&str> {
        match self {
            Self::Pipeline { failures } => failures.iter().map(|f| f.table.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::write_with_source(err.to_string(), err)
    }
}
