//! Subset resolution.
//!
//! Turns the declarative per-table subset configuration into concrete
//! row-selection queries, in two steps:
//!
//! 1. [`plan_tables`] walks every subset's relationship chain and gives each
//!    table a [`ReadTableOpt`]: its own subsets plus the rows other tables'
//!    chains propagate into it.
//! 2. [`SubsetResolver::plan`] turns one [`ReadTableOpt`] into SQL
//!    [`Selection`]s. A table read through several selections is
//!    de-duplicated with a [`RowDeduper`].
//!
//! Each relationship is exactly one semi-join hop. A relationship whose
//! referenced table has already been reached is a *child* hop (rows that
//! point at the reached rows); one whose foreign-key table has been reached
//! is a *parent* hop (rows the reached rows point at).

use crate::config::Config;
use crate::database::Row;
use crate::error::{Error, Result};
use crate::reader::{Propagation, ReadTableOpt, Reader, SubsetOpt};
use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// One resolved relationship of a chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    /// Already-reached table the key values come from
    pub source_table: String,
    pub source_key: String,
    /// Table receiving rows
    pub target_table: String,
    pub target_key: String,
}

/// Resolve the relationships of a subset owned by `origin` into hops
pub fn resolve_chain(origin: &str, subset: &SubsetOpt) -> Result<Vec<Hop>> {
    let mut reached: Vec<&str> = vec![origin];
    let mut hops = Vec::with_capacity(subset.relationships.len());

    for rel in &subset.relationships {
        let hop = if reached.contains(&rel.referenced_table.as_str()) {
            reached.push(&rel.table);
            Hop {
                source_table: rel.referenced_table.clone(),
                source_key: rel.referenced_key.clone(),
                target_table: rel.table.clone(),
                target_key: rel.foreign_key.clone(),
            }
        } else if reached.contains(&rel.table.as_str()) {
            reached.push(&rel.referenced_table);
            Hop {
                source_table: rel.table.clone(),
                source_key: rel.foreign_key.clone(),
                target_table: rel.referenced_table.clone(),
                target_key: rel.referenced_key.clone(),
            }
        } else {
            return Err(Error::config(format!(
                "subset '{}' of table '{}': relationship {}.{} -> {}.{} is not connected to the tables reached so far ({})",
                subset.name,
                origin,
                rel.table,
                rel.foreign_key,
                rel.referenced_table,
                rel.referenced_key,
                reached.join(", ")
            )));
        };
        hops.push(hop);
    }

    Ok(hops)
}

/// Read options for one table of the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTable {
    pub name: String,
    pub opts: ReadTableOpt,
}

/// Plan every table the reader knows, in the reader's table order
pub fn plan_tables(config: &Config, reader: &dyn Reader) -> Result<Vec<PlannedTable>> {
    let mut catalog = Vec::new();
    for table in reader.get_tables()? {
        let columns = reader
            .get_columns(&table)?
            .iter()
            .map(|c| reader.format_column(&table, c))
            .collect();
        catalog.push((table, columns));
    }
    plan_catalog(config, catalog)
}

/// Plan a known list of `(table, quoted columns)`
pub fn plan_catalog(
    config: &Config,
    catalog: Vec<(String, Vec<String>)>,
) -> Result<Vec<PlannedTable>> {
    let index: AHashMap<String, usize> = catalog
        .iter()
        .enumerate()
        .map(|(i, (name, _))| (name.clone(), i))
        .collect();

    for table in &config.tables {
        if !index.keys().any(|n| n.eq_ignore_ascii_case(&table.name)) {
            return Err(Error::config(format!(
                "configured table '{}' does not exist in the source",
                table.name
            )));
        }
    }

    let mut planned: Vec<PlannedTable> = catalog
        .into_iter()
        .map(|(name, columns)| {
            let opts = match config.table(&name) {
                Some(tc) => ReadTableOpt::from_table_config(&name, columns, tc),
                None => ReadTableOpt {
                    columns,
                    ..Default::default()
                },
            };
            PlannedTable { name, opts }
        })
        .collect();

    let mut propagations: Vec<(usize, Propagation)> = Vec::new();
    for table in &planned {
        for subset in &table.opts.subsets {
            let hops = resolve_chain(&table.name, subset)?;
            for (i, hop) in hops.iter().enumerate() {
                let for_table = |t: &str| {
                    index.get(t).copied().ok_or_else(|| {
                        Error::config(format!(
                            "subset '{}' of table '{}' references unknown table '{}'",
                            subset.name, table.name, t
                        ))
                    })
                };
                for_table(&hop.source_table)?;
                let target = for_table(&hop.target_table)?;
                propagations.push((
                    target,
                    Propagation {
                        origin_table: table.name.clone(),
                        subset: Arc::clone(subset),
                        hops: i + 1,
                    },
                ));
            }
        }
    }

    for (target, propagation) in propagations {
        debug!(
            table = %planned[target].name,
            origin = %propagation.origin_table,
            subset = %propagation.subset.name,
            hops = propagation.hops,
            "propagating rows"
        );
        planned[target].opts.propagations.push(propagation);
    }

    for table in &mut planned {
        if table.opts.subsets.is_empty() && table.opts.propagations.is_empty() {
            table.opts = ReadTableOpt {
                ignore_data: table.opts.ignore_data,
                ..ReadTableOpt::blank(std::mem::take(&mut table.opts.columns))
            };
        }
    }

    Ok(planned)
}

/// One query of a table's read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// `subset` or `origin.subset#hops`, for logs
    pub label: String,
    pub sql: String,
}

/// The queries that together read a table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TablePlan {
    pub selections: Vec<Selection>,
    /// Primary key used as row identity when de-duplicating
    pub primary_key: Vec<String>,
}

impl TablePlan {
    /// Rows only need de-duplicating when several selections overlap
    pub fn needs_dedup(&self) -> bool {
        self.selections.len() > 1
    }

    /// A deduper for this plan, if it needs one
    pub fn deduper(&self) -> Option<RowDeduper> {
        self.needs_dedup()
            .then(|| RowDeduper::new(self.primary_key.clone()))
    }
}

/// A filtered read of one table, used both as a selection and as the
/// source of a hop
#[derive(Debug, Clone)]
struct Source {
    table: String,
    filter: Option<String>,
    order_by: Vec<String>,
    limit: u64,
}

impl Source {
    fn select(&self, reader: &dyn Reader, projection: &str) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}",
            projection,
            reader.format_table(&self.table)
        );
        if let Some(ref filter) = self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by.join(", "));
        }
        if self.limit > 0 {
            sql.push_str(&format!(" LIMIT {}", self.limit));
        }
        sql
    }
}

/// Builds the SQL selections of a table from its [`ReadTableOpt`]
pub struct SubsetResolver<'a> {
    reader: &'a dyn Reader,
}

impl<'a> SubsetResolver<'a> {
    pub fn new(reader: &'a dyn Reader) -> Self {
        Self { reader }
    }

    /// Build the plan of `table`
    pub fn plan(&self, table: &str, opts: &ReadTableOpt) -> Result<TablePlan> {
        let mut plan = TablePlan {
            selections: Vec::new(),
            primary_key: self.reader.get_primary_key(table)?,
        };
        if opts.ignore_data {
            return Ok(plan);
        }

        let projection = self.projection(table, opts)?;

        for subset in &opts.subsets {
            let source = self.base_source(table, subset)?;
            plan.selections.push(Selection {
                label: subset.name.clone(),
                sql: source.select(self.reader, &projection),
            });
        }

        for propagation in &opts.propagations {
            let source = self.propagated_source(propagation)?;
            if source.table != table {
                return Err(Error::config(format!(
                    "propagation from '{}' ends at '{}', not '{}'",
                    propagation.origin_table, source.table, table
                )));
            }
            plan.selections.push(Selection {
                label: format!(
                    "{}.{}#{}",
                    propagation.origin_table, propagation.subset.name, propagation.hops
                ),
                sql: source.select(self.reader, &projection),
            });
        }

        Ok(plan)
    }

    fn projection(&self, table: &str, opts: &ReadTableOpt) -> Result<String> {
        if !opts.columns.is_empty() {
            return Ok(opts.columns.join(", "));
        }
        let columns: Vec<String> = self
            .reader
            .get_columns(table)?
            .iter()
            .map(|c| self.reader.format_column(table, c))
            .collect();
        if columns.is_empty() {
            Ok("*".to_string())
        } else {
            Ok(columns.join(", "))
        }
    }

    fn base_source(&self, table: &str, subset: &SubsetOpt) -> Result<Source> {
        let mut order_by: Vec<String> = subset
            .sorts
            .iter()
            .map(|(expr, dir)| format!("{} {}", expr, dir.as_sql()))
            .collect();

        // A limited driving set must be the same every time it is evaluated,
        // so the order is made total: primary key, or every column without one
        if subset.limit > 0 {
            let mut tie_break = self.reader.get_primary_key(table)?;
            if tie_break.is_empty() {
                tie_break = self.reader.get_columns(table)?;
            }
            for column in tie_break {
                if !subset.sorts.iter().any(|(expr, _)| expr == &column) {
                    order_by.push(format!("{} ASC", self.reader.format_column(table, &column)));
                }
            }
        }

        Ok(Source {
            table: table.to_string(),
            filter: subset.match_expr.as_ref().map(|m| format!("({})", m)),
            order_by,
            limit: subset.limit,
        })
    }

    fn propagated_source(&self, propagation: &Propagation) -> Result<Source> {
        let hops = resolve_chain(&propagation.origin_table, &propagation.subset)?;
        let mut reached: AHashMap<String, Source> = AHashMap::new();
        reached.insert(
            propagation.origin_table.clone(),
            self.base_source(&propagation.origin_table, &propagation.subset)?,
        );

        let mut last = None;
        for (i, hop) in hops.iter().take(propagation.hops).enumerate() {
            let source = reached.get(&hop.source_table).ok_or_else(|| {
                Error::config(format!("table '{}' was not reached", hop.source_table))
            })?;
            let alias = format!("_hop{}", i + 1);
            let keys = source.select(
                self.reader,
                &self.reader.format_column(&hop.source_table, &hop.source_key),
            );
            let filter = format!(
                "{} IN (SELECT {} FROM ({}) AS {})",
                self.reader.format_column(&hop.target_table, &hop.target_key),
                self.reader.format_column(&alias, &hop.source_key),
                keys,
                self.reader.format_table(&alias),
            );
            let target = Source {
                table: hop.target_table.clone(),
                filter: Some(filter),
                order_by: Vec::new(),
                limit: 0,
            };
            // The first way a table is reached is the one later hops use
            reached
                .entry(hop.target_table.clone())
                .or_insert_with(|| target.clone());
            last = Some(target);
        }

        last.ok_or_else(|| {
            Error::config(format!(
                "propagation from '{}' has no hops",
                propagation.origin_table
            ))
        })
    }
}

/// Drops rows already emitted by an earlier selection of the same table
#[derive(Debug)]
pub struct RowDeduper {
    key_columns: Vec<String>,
    positions: Option<SmallVec<[usize; 2]>>,
    seen: AHashSet<u64>,
    duplicates: u64,
}

impl RowDeduper {
    /// Identity is the primary key, or the whole row when `key_columns` is empty
    pub fn new(key_columns: Vec<String>) -> Self {
        Self {
            key_columns,
            positions: None,
            seen: AHashSet::new(),
            duplicates: 0,
        }
    }

    /// Whether the row is new. Records it as seen.
    pub fn admit(&mut self, row: &Row) -> bool {
        let key_columns = &self.key_columns;
        let positions = self.positions.get_or_insert_with(|| {
            let p = Row::key_positions(row.columns(), key_columns);
            // A key that does not fully resolve falls back to the whole row
            if p.len() == key_columns.len() {
                p
            } else {
                SmallVec::new()
            }
        });

        if self.seen.insert(row.identity_hash(positions)) {
            true
        } else {
            self.duplicates += 1;
            false
        }
    }

    /// Rows rejected so far
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}
