//! Source side of a copy: the [`Reader`] contract, the options that describe
//! what to read, and the driver registry that turns a DSN into a reader.

pub mod duckdb;
mod registry;

pub use registry::{connect, register, registry, Registry};

use crate::config::{SortDirection, SubsetConfig, TableConfig};
use crate::database::Row;
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

/// Sending half of a table's row stream
pub type RowSender = crossbeam_channel::Sender<Row>;

/// Name of the implicit subset that reads a whole table
pub const DEFAULT_SUBSET: &str = "_default";

/// Connection options for a source or destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnOpts {
    /// Address, e.g. `duckdb:///tmp/app.db`
    pub dsn: String,
    /// Upper bound for acquiring a connection (zero = wait forever)
    pub timeout: Duration,
    /// Recycle connections older than this (zero = never)
    pub max_conn_lifetime: Duration,
    /// Maximum open connections (zero = unbounded)
    pub max_conns: usize,
    /// Maximum idle connections kept for reuse
    pub max_idle_conns: usize,
}

impl ConnOpts {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Default::default()
        }
    }
}

impl Default for ConnOpts {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            timeout: Duration::from_secs(30),
            max_conn_lifetime: Duration::ZERO,
            max_conns: 0,
            max_idle_conns: 2,
        }
    }
}

/// Where a copy reads from, named in dump preambles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub database: String,
}

/// Factory for readers of one kind of source
pub trait Driver: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Whether this driver handles the DSN
    fn is_supported(&self, dsn: &str) -> bool;

    /// Open a reader for the source
    fn new_connection(&self, opts: &ConnOpts) -> Result<Box<dyn Reader>>;
}

/// A source database.
///
/// Implementations are shared by every table pipeline of a run, so all
/// methods take `&self` and must be safe to call from several threads.
pub trait Reader: Send + Sync {
    /// DDL for every table, in creation order
    fn get_structure(&self) -> Result<String>;

    /// Table names in creation (dependency) order
    fn get_tables(&self) -> Result<Vec<String>>;

    /// Column names of a table, in ordinal order
    fn get_columns(&self, table: &str) -> Result<Vec<String>>;

    /// Primary key columns of a table, empty when it has none
    fn get_primary_key(&self, _table: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Host and database the rows come from
    fn origin(&self) -> Result<Origin> {
        Ok(Origin::default())
    }

    /// Most connections handed out at once, `None` when unbounded
    fn max_connections(&self) -> Option<usize> {
        None
    }

    /// Quoted, table-qualified column reference
    fn format_column(&self, table: &str, column: &str) -> String;

    /// Quoted table reference
    fn format_table(&self, table: &str) -> String;

    /// Stream every row selected for `table` into `out`.
    ///
    /// `out` is consumed: the stream closes when this returns, on success
    /// and on failure alike.
    fn read_subset(
        &self,
        table: &str,
        worker: usize,
        out: RowSender,
        opts: &ReadTableOpt,
    ) -> Result<()>;

    /// Release pooled connections
    fn close(&self) -> Result<()>;
}

/// One foreign-key edge of a relationship chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipOpt {
    /// Table holding the foreign key
    pub table: String,
    pub foreign_key: String,
    pub referenced_table: String,
    pub referenced_key: String,
}

/// One named subset of a table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubsetOpt {
    pub name: String,
    /// Opaque predicate inserted verbatim in the WHERE clause
    pub match_expr: Option<String>,
    /// ORDER BY entries, in order
    pub sorts: Vec<(String, SortDirection)>,
    /// Row cap, zero = no limit
    pub limit: u64,
    pub relationships: Vec<RelationshipOpt>,
}

impl SubsetOpt {
    /// The subset that reads everything
    pub fn full() -> Self {
        Self {
            name: DEFAULT_SUBSET.to_string(),
            ..Default::default()
        }
    }

    /// Build from configuration; relationships without a table belong to `owner`
    pub fn from_config(owner: &str, config: &SubsetConfig) -> Self {
        let match_expr = config
            .filter
            .match_expr
            .as_ref()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());

        Self {
            name: config.name.clone(),
            match_expr,
            sorts: config
                .filter
                .sorts
                .iter()
                .map(|(c, d)| (c.to_string(), *d))
                .collect(),
            limit: config.filter.limit,
            relationships: config
                .relationships
                .iter()
                .map(|r| RelationshipOpt {
                    table: r
                        .table
                        .clone()
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| owner.to_string()),
                    foreign_key: r.foreign_key.clone(),
                    referenced_table: r.referenced_table.clone(),
                    referenced_key: r.referenced_key.clone(),
                })
                .collect(),
        }
    }
}

/// Rows a table receives through another table's relationship chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Propagation {
    /// Table owning the subset the chain starts from
    pub origin_table: String,
    pub subset: Arc<SubsetOpt>,
    /// Number of relationships of the chain to follow to reach this table
    pub hops: usize,
}

/// Everything needed to read one table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadTableOpt {
    /// Quoted column references to select
    pub columns: Vec<String>,
    pub subsets: Vec<Arc<SubsetOpt>>,
    pub propagations: Vec<Propagation>,
    /// Structure only, no rows
    pub ignore_data: bool,
}

impl ReadTableOpt {
    /// Full read of the given columns
    pub fn blank(columns: Vec<String>) -> Self {
        Self {
            columns,
            subsets: vec![Arc::new(SubsetOpt::full())],
            ..Default::default()
        }
    }

    /// Options for a configured table, before any propagation is known.
    ///
    /// `table` is the catalog name, which may differ in case from `config.name`.
    pub fn from_table_config(table: &str, columns: Vec<String>, config: &TableConfig) -> Self {
        Self {
            columns,
            subsets: config
                .subsets
                .iter()
                .map(|s| Arc::new(SubsetOpt::from_config(table, s)))
                .collect(),
            propagations: Vec::new(),
            ignore_data: config.ignore_data,
        }
    }

    /// Number of selections this read turns into
    pub fn selection_count(&self) -> usize {
        if self.ignore_data {
            0
        } else {
            self.subsets.len() + self.propagations.len()
        }
    }
}

/// Quote an identifier with double quotes, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_relationship_table_defaults_to_owner() {
        let config = Config::from_yaml(
            r#"
tables:
  - name: users
    subsets:
      - name: some
        filter: { match: "  ", limit: 5 }
        relationships:
          - foreign_key: user_id
            referenced_table: orders
            referenced_key: id
"#,
        )
        .unwrap();

        let opts = ReadTableOpt::from_table_config("users", vec![], &config.tables[0]);
        let subset = &opts.subsets[0];
        assert_eq!(subset.relationships[0].table, "users");
        assert_eq!(subset.match_expr, None, "blank predicates are dropped");
        assert_eq!(subset.limit, 5);
    }

    #[test]
    fn test_blank_reads_everything() {
        let opts = ReadTableOpt::blank(vec!["\"t\".\"a\"".into()]);
        assert_eq!(opts.subsets.len(), 1);
        assert_eq!(opts.subsets[0].name, DEFAULT_SUBSET);
        assert!(opts.subsets[0].match_expr.is_none());
        assert_eq!(opts.selection_count(), 1);
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
