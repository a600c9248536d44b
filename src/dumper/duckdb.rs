//! Direct load into a DuckDB database.

use super::{BlockOutcome, Dumper};
use crate::database::{Row, Value};
use crate::error::{Error, Result};
use crate::reader::quote_ident;
use duckdb::types::{ToSqlOutput, ValueRef};
use duckdb::{params_from_iter, Connection, ToSql};
use tracing::{debug, warn};

impl ToSql for Value {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        use duckdb::types::Value as Db;

        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Db::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Db::Boolean(*b)),
            Value::Int(n) => ToSqlOutput::Owned(Db::BigInt(*n)),
            Value::UInt(n) => ToSqlOutput::Owned(Db::UBigInt(*n)),
            Value::Float(f) => ToSqlOutput::Owned(Db::Double(*f)),
            Value::Text(s) | Value::Decimal(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            // Temporal values go in as canonical text and DuckDB casts them
            // to the column type
            Value::Date(d) => ToSqlOutput::Owned(Db::Text(d.format("%Y-%m-%d").to_string())),
            Value::Time(t) => ToSqlOutput::Owned(Db::Text(t.format("%H:%M:%S%.f").to_string())),
            Value::Timestamp(ts) => {
                ToSqlOutput::Owned(Db::Text(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
        })
    }
}

/// Loads each table block inside its own transaction
pub struct DuckDbDumper {
    conn: Connection,
    insert_sql: Option<String>,
    in_transaction: bool,
}

impl DuckDbDumper {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            insert_sql: None,
            in_transaction: false,
        }
    }

    /// The destination connection, e.g. to inspect a load in tests
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn exec(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| Error::write_with_source(format!("{}: {}", sql, e), e))
    }
}

impl Dumper for DuckDbDumper {
    fn dump_structure(&mut self, structure: &str) -> Result<()> {
        if structure.trim().is_empty() {
            return Ok(());
        }
        self.conn
            .execute_batch(structure)
            .map_err(|e| Error::write_with_source(format!("failed to create structure: {}", e), e))
    }

    fn begin_table(&mut self, table: &str, columns: &[String]) -> Result<()> {
        self.exec("BEGIN TRANSACTION")?;
        self.in_transaction = true;

        let placeholders = vec!["?"; columns.len()].join(", ");
        let columns: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        self.insert_sql = Some(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders
        ));
        Ok(())
    }

    fn write_row(&mut self, table: &str, row: &Row) -> Result<()> {
        let sql = self
            .insert_sql
            .as_deref()
            .ok_or_else(|| Error::write(format!("row for {} outside of a block", table)))?;

        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| Error::write_with_source(format!("preparing insert into {}: {}", table, e), e))?;
        stmt.execute(params_from_iter(row.values().iter()))
            .map_err(|e| Error::write_with_source(format!("inserting into {}: {}", table, e), e))?;
        Ok(())
    }

    fn end_table(&mut self, table: &str, outcome: &BlockOutcome) -> Result<()> {
        self.insert_sql = None;
        if !self.in_transaction {
            return Ok(());
        }
        self.in_transaction = false;

        match outcome {
            BlockOutcome::Complete { rows } => {
                debug!(table, rows, "committing block");
                self.exec("COMMIT")
            }
            BlockOutcome::Failed { reason, .. } => {
                warn!(table, reason = %reason, "rolling back failed block");
                self.exec("ROLLBACK")
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.in_transaction {
            self.in_transaction = false;
            self.exec("ROLLBACK")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Columns;
    use chrono::NaiveDate;

    #[test]
    fn test_commit_and_rollback() {
        let mut dumper = DuckDbDumper::new(Connection::open_in_memory().unwrap());
        dumper
            .dump_structure("CREATE TABLE t (id INTEGER, born DATE, note VARCHAR);")
            .unwrap();

        let columns: Columns = vec!["id".to_string(), "born".into(), "note".into()].into();
        let row = |id: i64| {
            Row::new(
                columns.clone(),
                vec![
                    Value::Int(id),
                    Value::Date(NaiveDate::from_ymd_opt(2000, 1, id as u32).unwrap()),
                    Value::Null,
                ],
            )
        };

        dumper.begin_table("t", &columns).unwrap();
        dumper.write_row("t", &row(1)).unwrap();
        dumper.write_row("t", &row(2)).unwrap();
        dumper
            .end_table("t", &BlockOutcome::Complete { rows: 2 })
            .unwrap();

        dumper.begin_table("t", &columns).unwrap();
        dumper.write_row("t", &row(3)).unwrap();
        dumper
            .end_table(
                "t",
                &BlockOutcome::Failed {
                    rows: 1,
                    reason: "boom".into(),
                },
            )
            .unwrap();
        dumper.close().unwrap();

        let count: i64 = dumper
            .connection()
            .query_row("SELECT count(*) FROM t", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2, "failed block is rolled back");

        let born: String = dumper
            .connection()
            .query_row("SELECT CAST(born AS VARCHAR) FROM t WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(born, "2000-01-02");
    }

    #[test]
    fn test_row_outside_block() {
        let mut dumper = DuckDbDumper::new(Connection::open_in_memory().unwrap());
        let columns: Columns = vec!["id".to_string()].into();
        let err = dumper
            .write_row("t", &Row::new(columns, vec![Value::Int(1)]))
            .unwrap_err();
        assert!(matches!(err, Error::Write { .. }));
    }
}
