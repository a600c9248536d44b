//! Concurrent table pipelines feeding a single ordered sink.
//!
//! ```text
//!  jobs (table order)          per table                       sink thread
//!  ─────────────────►  worker ─┬─ producer: read_subset ─► raw queue
//!                              └─ transform ────────────► row queue ─► Dumper
//! ```
//!
//! Up to `max_parallel_tables` workers run at once. Every queue is bounded,
//! so a slow destination throttles the readers instead of buffering rows.
//! The sink is the only owner of the [`Dumper`]: it writes each table as one
//! contiguous block, strictly in table order, whatever order the pipelines
//! finish in. Tables are handed out in that same order, so the block the
//! sink waits for has always been started.

use crate::anonymiser::Transformer;
use crate::database::Row;
use crate::dumper::{BlockOutcome, Dumper};
use crate::error::{Error, Result, TableFailure};
use crate::reader::Reader;
use crate::subset::PlannedTable;
use crossbeam_channel::{bounded, unbounded, Receiver};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to do when the transform stage rejects a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformErrorPolicy {
    /// Log and drop the row
    #[default]
    SkipRow,
    /// Fail the whole table
    FailTable,
}

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct EngineOpts {
    pub max_parallel_tables: usize,
    /// Rows buffered per table queue
    pub queue_capacity: usize,
    /// Cancel tables that have not started once any table fails
    pub abort_on_first_error: bool,
    pub transform_errors: TransformErrorPolicy,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            max_parallel_tables: 4,
            queue_capacity: 1024,
            abort_on_first_error: false,
            transform_errors: TransformErrorPolicy::SkipRow,
        }
    }
}

/// Lifecycle of one table pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    Pending,
    Connected,
    Streaming,
    Draining,
    Done,
    Failed,
}

impl std::fmt::Display for TableState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TableState::Pending => "pending",
            TableState::Connected => "connected",
            TableState::Streaming => "streaming",
            TableState::Draining => "draining",
            TableState::Done => "done",
            TableState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one table
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TableReport {
    pub table: String,
    pub state: TableState,
    /// Every state the table went through, in order
    pub history: Vec<TableState>,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Rows dropped by the transform stage
    pub rows_skipped: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a run
#[derive(Debug, Serialize, JsonSchema)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub failures: Vec<TableFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn rows_written(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_written).sum()
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Turn table failures into one error naming every failed table
    pub fn into_result(self) -> Result<RunReport> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(Error::Pipeline {
                failures: self.failures,
            })
        }
    }
}

/// What a worker reports once its table is finished
struct WorkerResult {
    history: Vec<TableState>,
    rows_read: u64,
    rows_skipped: u64,
    error: Option<Error>,
}

/// One table's block, as handed to the sink
struct TableBlock {
    index: usize,
    table: String,
    columns: Vec<String>,
    rows: Receiver<Row>,
    result: Receiver<WorkerResult>,
    started: Instant,
}

type ProgressFn = dyn Fn(&TableReport) + Send + Sync;

/// Runs table pipelines
pub struct Engine {
    opts: EngineOpts,
    progress: Option<Box<ProgressFn>>,
}

impl Engine {
    pub fn new(opts: EngineOpts) -> Self {
        Self {
            opts,
            progress: None,
        }
    }

    /// Called by the sink after each table block is finished
    pub fn with_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(&TableReport) + Send + Sync + 'static,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Copy `tables` from `reader` to `dumper`.
    ///
    /// Returns `Err` only when the run could not start or the destination
    /// could not be closed; table failures are in the report.
    pub fn run(
        &self,
        reader: &dyn Reader,
        dumper: &mut dyn Dumper,
        transformer: &dyn Transformer,
        tables: &[PlannedTable],
    ) -> Result<RunReport> {
        let started = Instant::now();
        dumper.set_origin(&reader.origin()?);
        let structure = reader.get_structure()?;
        dumper.dump_structure(&structure)?;

        let mut workers = self.opts.max_parallel_tables.max(1).min(tables.len().max(1));
        // A running table holds one source connection; more workers than
        // the pool allows would starve the table the sink is waiting on
        if let Some(limit) = reader.max_connections() {
            if limit < workers {
                debug!(workers, limit, "capping workers at the source connection limit");
                workers = limit.max(1);
            }
        }
        let capacity = self.opts.queue_capacity.max(1);
        let cancelled = AtomicBool::new(false);

        let (job_tx, job_rx) = unbounded::<usize>();
        for i in 0..tables.len() {
            let _ = job_tx.send(i);
        }
        drop(job_tx);

        let (block_tx, block_rx) = unbounded::<TableBlock>();

        info!(tables = tables.len(), workers, "starting copy");

        let (reports, failures, close_result) = thread::scope(|s| {
            for worker in 0..workers {
                let job_rx = job_rx.clone();
                let block_tx = block_tx.clone();
                let cancelled = &cancelled;
                s.spawn(move || {
                    while let Ok(index) = job_rx.recv() {
                        let ctx = TableJob {
                            index,
                            worker,
                            table: &tables[index],
                            reader,
                            transformer,
                            capacity,
                            opts: &self.opts,
                            cancelled,
                        };
                        if !ctx.run(&block_tx) {
                            break;
                        }
                    }
                });
            }
            drop(block_tx);

            let sink = Sink {
                dumper: &mut *dumper,
                cancelled: &cancelled,
                progress: self.progress.as_deref(),
                fatal: false,
            };
            sink.run(block_rx, tables)
        });

        close_result?;

        let report = RunReport {
            tables: reports,
            duration_ms: started.elapsed().as_millis() as u64,
            failures,
        };
        info!(
            tables = report.tables.len(),
            failed = report.failures.len(),
            rows = report.rows_written(),
            elapsed_ms = report.duration_ms,
            "copy finished"
        );
        Ok(report)
    }
}

struct TableJob<'a> {
    index: usize,
    worker: usize,
    table: &'a PlannedTable,
    reader: &'a dyn Reader,
    transformer: &'a dyn Transformer,
    capacity: usize,
    opts: &'a EngineOpts,
    cancelled: &'a AtomicBool,
}

impl TableJob<'_> {
    /// Run one table. Returns false once the sink is gone.
    fn run(&self, block_tx: &crossbeam_channel::Sender<TableBlock>) -> bool {
        let name = self.table.name.as_str();
        let started = Instant::now();
        let mut history = vec![TableState::Pending];
        let (result_tx, result_rx) = bounded::<WorkerResult>(1);

        let fail_early = |history: Vec<TableState>, columns: Vec<String>, error: Error| {
            let (_, rows_rx) = bounded::<Row>(1);
            let sent = block_tx.send(TableBlock {
                index: self.index,
                table: name.to_string(),
                columns,
                rows: rows_rx,
                result: result_rx.clone(),
                started,
            });
            let _ = result_tx.send(WorkerResult {
                history,
                rows_read: 0,
                rows_skipped: 0,
                error: Some(error),
            });
            sent.is_ok()
        };

        if self.cancelled.load(Ordering::SeqCst) {
            debug!(table = name, "cancelled before start");
            return fail_early(
                history,
                Vec::new(),
                Error::Cancelled {
                    table: name.to_string(),
                },
            );
        }

        let columns = match self.reader.get_columns(name) {
            Ok(c) => c,
            Err(e) => {
                warn!(table = name, error = %e, "could not resolve columns");
                self.note_failure(&e);
                return fail_early(history, Vec::new(), e);
            }
        };
        history.push(TableState::Connected);
        info!(table = name, worker = self.worker, state = %TableState::Connected, "table state");

        let (raw_tx, raw_rx) = bounded::<Row>(self.capacity);
        let (out_tx, out_rx) = bounded::<Row>(self.capacity);

        if block_tx
            .send(TableBlock {
                index: self.index,
                table: name.to_string(),
                columns,
                rows: out_rx,
                result: result_rx,
                started,
            })
            .is_err()
        {
            return false;
        }

        let mut rows_read = 0u64;
        let mut rows_skipped = 0u64;
        let mut transform_error = None;
        let mut sink_closed = false;

        let producer_result = thread::scope(|s| {
            let producer = s.spawn(|| {
                self.reader
                    .read_subset(name, self.worker, raw_tx, &self.table.opts)
            });

            history.push(TableState::Streaming);
            info!(table = name, worker = self.worker, state = %TableState::Streaming, "table state");

            for row in raw_rx.iter() {
                rows_read += 1;
                match self.transformer.transform(name, row) {
                    Ok(row) => {
                        if out_tx.send(row).is_err() {
                            sink_closed = true;
                            break;
                        }
                    }
                    Err(e) => match self.opts.transform_errors {
                        TransformErrorPolicy::SkipRow => {
                            warn!(table = name, error = %e, "skipping row");
                            rows_skipped += 1;
                        }
                        TransformErrorPolicy::FailTable => {
                            transform_error = Some(e);
                            break;
                        }
                    },
                }
            }

            // Unblocks the producer if we stopped early
            drop(raw_rx);
            history.push(TableState::Draining);
            debug!(table = name, state = %TableState::Draining, "table state");

            producer.join().unwrap_or_else(|_| {
                Err(Error::Scan {
                    table: name.to_string(),
                    message: "reader panicked".to_string(),
                    source: None,
                })
            })
        });
        drop(out_tx);

        let error = match (transform_error, producer_result) {
            (Some(e), _) => Some(e),
            (None, Err(Error::StreamClosed { .. })) if sink_closed => Some(Error::Cancelled {
                table: name.to_string(),
            }),
            (None, Err(e)) => Some(e),
            (None, Ok(())) if sink_closed => Some(Error::Cancelled {
                table: name.to_string(),
            }),
            (None, Ok(())) => None,
        };

        if let Some(ref e) = error {
            warn!(table = name, error = %e, "table pipeline failed");
            self.note_failure(e);
        }

        let _ = result_tx.send(WorkerResult {
            history,
            rows_read,
            rows_skipped,
            error,
        });
        true
    }

    /// Cancel the tables not started yet when the failure calls for it
    fn note_failure(&self, error: &Error) {
        if self.opts.abort_on_first_error || error.is_fatal_for_run() {
            self.cancelled.store(true, Ordering::SeqCst);
        }
    }
}

struct Sink<'a> {
    dumper: &'a mut dyn Dumper,
    cancelled: &'a AtomicBool,
    progress: Option<&'a ProgressFn>,
    /// Set after a write error; nothing is written after that
    fatal: bool,
}

impl Sink<'_> {
    fn run(
        mut self,
        blocks: Receiver<TableBlock>,
        tables: &[PlannedTable],
    ) -> (Vec<TableReport>, Vec<TableFailure>, Result<()>) {
        let mut waiting: BTreeMap<usize, TableBlock> = BTreeMap::new();
        let mut reports = Vec::with_capacity(tables.len());
        let mut failures = Vec::new();
        let mut next = 0;

        while next < tables.len() {
            let block = match waiting.remove(&next) {
                Some(block) => block,
                None => match blocks.recv() {
                    Ok(block) if block.index == next => block,
                    Ok(block) => {
                        waiting.insert(block.index, block);
                        continue;
                    }
                    Err(_) => break,
                },
            };

            let (report, failure) = self.write_block(block);
            if let Some(progress) = self.progress {
                progress(&report);
            }
            reports.push(report);
            failures.extend(failure);
            next += 1;
        }

        // Only reachable if workers went away early
        for table in &tables[next..] {
            failures.push(TableFailure {
                table: table.name.clone(),
                error: Error::Cancelled {
                    table: table.name.clone(),
                },
            });
            reports.push(TableReport {
                table: table.name.clone(),
                state: TableState::Failed,
                history: vec![TableState::Pending, TableState::Failed],
                rows_read: 0,
                rows_written: 0,
                rows_skipped: 0,
                duration_ms: 0,
                error: Some("cancelled".to_string()),
            });
        }

        let close_result = self.dumper.close();
        (reports, failures, close_result)
    }

    fn abort(&mut self) {
        self.fatal = true;
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn write_block(&mut self, block: TableBlock) -> (TableReport, Option<TableFailure>) {
        let TableBlock {
            table,
            columns,
            rows,
            result,
            started,
            ..
        } = block;
        let mut written = 0u64;
        let mut write_error = None;

        if !self.fatal {
            if let Err(e) = self.dumper.begin_table(&table, &columns) {
                write_error = Some(e);
            } else {
                for row in rows.iter() {
                    if let Err(e) = self.dumper.write_row(&table, &row) {
                        write_error = Some(e);
                        break;
                    }
                    written += 1;
                }
            }
            if write_error.is_some() {
                self.abort();
            }
        }
        // Closing the queue makes the worker stop instead of blocking
        drop(rows);

        let result = result.recv().unwrap_or_else(|_| WorkerResult {
            history: vec![TableState::Pending],
            rows_read: 0,
            rows_skipped: 0,
            error: Some(Error::Cancelled {
                table: table.clone(),
            }),
        });

        let mut error = match write_error {
            Some(e) => Some(e),
            None if self.fatal && result.error.is_none() => Some(Error::Cancelled {
                table: table.clone(),
            }),
            None => result.error,
        };

        if !self.fatal {
            let outcome = match error {
                Some(ref e) => BlockOutcome::Failed {
                    rows: written,
                    reason: e.to_string(),
                },
                None => BlockOutcome::Complete { rows: written },
            };
            if let Err(e) = self.dumper.end_table(&table, &outcome) {
                warn!(table = %table, error = %e, "failed to finish block");
                self.abort();
                error = Some(e);
            }
        }

        let mut history = result.history;
        let state = if error.is_some() {
            TableState::Failed
        } else {
            TableState::Done
        };
        history.push(state);
        info!(table = %table, rows = written, state = %state, "table state");

        let report = TableReport {
            table: table.clone(),
            state,
            history,
            rows_read: result.rows_read,
            rows_written: written,
            rows_skipped: result.rows_skipped,
            duration_ms: started.elapsed().as_millis() as u64,
            error: error.as_ref().map(|e| e.to_string()),
        };
        let failure = error.map(|error| TableFailure { table, error });
        (report, failure)
    }
}
