//! SQL dumps produced from a DuckDB source: reload round-trip and compressed output.

use duckdb::Connection;
use flate2::read::GzDecoder;
use sql_subsetter::anonymiser::Passthrough;
use sql_subsetter::config::Config;
use sql_subsetter::dumper::{self, SqlDialect, SqlDumper};
use sql_subsetter::pipeline::{Engine, EngineOpts};
use sql_subsetter::reader::duckdb::DuckDbReader;
use sql_subsetter::reader::ConnOpts;
use sql_subsetter::subset;
use std::io::Read;
use tempfile::TempDir;

const FIXTURE: &str = r#"
CREATE TABLE things (id INTEGER, name VARCHAR, score DOUBLE, ok BOOLEAN, data BLOB, seen TIMESTAMP);
CREATE TABLE tags (thing_id INTEGER, tag VARCHAR);

INSERT INTO things VALUES
  (3, 'O''Brien', 0.1, true, '\xDE\xAD'::BLOB, TIMESTAMP '2024-05-01 12:34:56.789'),
  (1, 'line
break', -3.75, false, NULL, NULL),
  (2, NULL, 2.5, NULL, ''::BLOB, TIMESTAMP '1999-12-31 23:59:59'),
  (7, 'back\slash', 1e10, true, 'abc'::BLOB, TIMESTAMP '2024-01-01 00:00:00'),
  (5, 'unicode ✓', 0.0, false, NULL, TIMESTAMP '2020-02-29 08:00:00.000001');
INSERT INTO tags VALUES (3, 'a'), (1, 'b'), (2, 'c'), (7, 'd');
"#;

const THINGS: &str = "SELECT CAST(id AS VARCHAR), name, CAST(score AS VARCHAR), \
                      CAST(ok AS VARCHAR), hex(data), CAST(seen AS VARCHAR) FROM things";

fn source() -> DuckDbReader {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(FIXTURE).unwrap();
    DuckDbReader::from_connection(conn)
}

fn rows(conn: &Connection, sql: &str) -> Vec<Vec<Option<String>>> {
    let mut stmt = conn.prepare(sql).unwrap();
    let mut rows = stmt.query([]).unwrap();
    let mut out = Vec::new();
    while let Some(row) = rows.next().unwrap() {
        let values = (0..6).map(|i| row.get::<_, Option<String>>(i).unwrap()).collect();
        out.push(values);
    }
    out
}

#[test]
fn test_duckdb_dump_reloads_identically() {
    let reader = source();
    let tables = subset::plan_tables(&Config::default(), &reader).unwrap();

    let mut dumper = SqlDumper::new(Vec::new())
        .with_dialect(SqlDialect::DuckDb)
        .with_rows_per_insert(2);
    let report = Engine::new(EngineOpts::default())
        .run(&reader, &mut dumper, &Passthrough, &tables)
        .unwrap();
    assert!(report.is_success());

    let sql = String::from_utf8(dumper.into_inner()).unwrap();
    assert!(sql.contains("-- Structure"));
    let things_at = sql.find("-- Data: things").unwrap();
    let tags_at = sql.find("-- Data: tags").unwrap();
    assert!(things_at < tags_at, "blocks follow table order");

    let reloaded = Connection::open_in_memory().unwrap();
    reloaded.execute_batch(&sql).unwrap();

    let conn = reader.pool().get().unwrap();
    let original = rows(&conn, THINGS);
    let copied = rows(&reloaded, THINGS);
    assert_eq!(copied.len(), 5);
    assert_eq!(copied, original, "same values in the same order");
}

#[test]
fn test_compressed_file_destination() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("subset.sql.gz");

    let reader = source();
    let tables = subset::plan_tables(&Config::default(), &reader).unwrap();
    let mut dumper = dumper::connect(&ConnOpts::new(format!(
        "file://{}?dialect=postgres",
        path.display()
    )))
    .unwrap();

    Engine::new(EngineOpts::default())
        .run(&reader, dumper.as_mut(), &Passthrough, &tables)
        .unwrap()
        .into_result()
        .unwrap();

    let mut sql = String::new();
    GzDecoder::new(std::fs::File::open(&path).unwrap())
        .read_to_string(&mut sql)
        .unwrap();
    assert!(sql.contains("-- Dialect: postgres"));
    assert!(sql.contains("SET session_replication_role = replica;"));
    assert!(sql.contains("INSERT INTO \"tags\" (\"thing_id\", \"tag\") VALUES"));
    assert!(sql.contains("'O''Brien'"));
    assert!(sql.trim_end().ends_with("SET session_replication_role = DEFAULT;"));
}

#[test]
fn test_mysql_dump_escapes() {
    let reader = source();
    let tables = subset::plan_tables(&Config::default(), &reader).unwrap();
    let mut dumper = SqlDumper::new(Vec::new()).with_dialect(SqlDialect::MySql);

    Engine::new(EngineOpts::default())
        .run(&reader, &mut dumper, &Passthrough, &tables)
        .unwrap();

    let sql = String::from_utf8(dumper.into_inner()).unwrap();
    assert!(sql.contains("SET FOREIGN_KEY_CHECKS = 0;"));
    assert!(sql.contains("INSERT INTO `things`"));
    assert!(sql.contains("'O\\'Brien'"));
    assert!(sql.contains("'back\\\\slash'"));
    assert!(sql.contains("X'dead'"));
}

#[test]
fn test_preamble_names_origin() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("subset.sql");

    let reader = source();
    let tables = subset::plan_tables(&Config::default(), &reader).unwrap();
    let mut dumper = dumper::connect(&ConnOpts::new(format!("file://{}", path.display()))).unwrap();

    Engine::new(EngineOpts::default())
        .run(&reader, dumper.as_mut(), &Passthrough, &tables)
        .unwrap()
        .into_result()
        .unwrap();
    drop(dumper);

    let sql = std::fs::read_to_string(&path).unwrap();
    let preamble = &sql[..sql.find("-- Structure").unwrap()];
    assert!(preamble.contains("-- Host: :memory:"), "{}", preamble);
    assert!(preamble.contains("-- Database: memory"), "{}", preamble);
}
