//! Copy command CLI handler.

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use sql_subsetter::anonymiser::{Anonymiser, Passthrough, Transformer};
use sql_subsetter::config::Config;
use sql_subsetter::dumper;
use sql_subsetter::pipeline::{Engine, EngineOpts, RunReport, TransformErrorPolicy};
use sql_subsetter::reader::{self, ConnOpts};
use sql_subsetter::subset::{self, PlannedTable};
use std::path::PathBuf;
use std::time::Duration;

pub struct CopyOptions {
    pub from: String,
    pub to: String,
    pub config: Option<PathBuf>,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub timeout: u64,
    pub max_conns: usize,
    pub max_idle_conns: usize,
    pub max_conn_lifetime: u64,
    pub tables: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub seed: Option<u64>,
    pub fail_fast: bool,
    pub strict_transform: bool,
    pub json: bool,
    pub progress: bool,
}

pub fn run(opts: CopyOptions) -> anyhow::Result<()> {
    let config = match opts.config {
        Some(ref path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let source = ConnOpts {
        dsn: opts.from.clone(),
        timeout: Duration::from_secs(opts.timeout),
        max_conn_lifetime: Duration::from_secs(opts.max_conn_lifetime),
        max_conns: opts.max_conns,
        max_idle_conns: opts.max_idle_conns,
    };
    let reader = reader::connect(&source)?;

    let planned = subset::plan_tables(&config, reader.as_ref())?;
    let tables = select_tables(planned, opts.tables.as_deref(), &opts.exclude)?;
    if tables.is_empty() {
        anyhow::bail!("No tables left to copy after --tables/--exclude");
    }

    // Generate random seed if not provided
    let seed = opts.seed.unwrap_or_else(rand::random);
    let anonymiser = Anonymiser::from_config(&config, seed)?;
    let transformer: Box<dyn Transformer> = if anonymiser.is_empty() {
        Box::new(Passthrough)
    } else {
        Box::new(anonymiser)
    };

    let mut dumper = dumper::connect(&ConnOpts::new(opts.to.clone()))?;

    let mut engine = Engine::new(EngineOpts {
        max_parallel_tables: opts.concurrency,
        queue_capacity: opts.queue_capacity,
        abort_on_first_error: opts.fail_fast,
        transform_errors: if opts.strict_transform {
            TransformErrorPolicy::FailTable
        } else {
            TransformErrorPolicy::SkipRow
        },
    });

    let progress_bar = if opts.progress {
        let pb = ProgressBar::new(tables.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tables {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(Duration::from_millis(100));
        let bar = pb.clone();
        engine = engine.with_progress(move |report| {
            bar.inc(1);
            bar.set_message(format!("{} ({} rows)", report.table, report.rows_written));
        });
        Some(pb)
    } else {
        None
    };

    let result = engine.run(reader.as_ref(), dumper.as_mut(), transformer.as_ref(), &tables);

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }
    reader.close()?;
    let report = result?;

    if opts.json {
        let json = serde_json::to_string_pretty(&report)?;
        // Keep stdout clean when the dump itself goes there
        if opts.to.starts_with("os://stdout") {
            eprintln!("{}", json);
        } else {
            println!("{}", json);
        }
    } else if opts.progress {
        print_summary(&report);
    }

    report.into_result()?;
    Ok(())
}

/// Apply --tables / --exclude to the planned tables, keeping their order
fn select_tables(
    planned: Vec<PlannedTable>,
    include: Option<&[String]>,
    exclude: &[String],
) -> anyhow::Result<Vec<PlannedTable>> {
    let compile = |list: &[String]| -> anyhow::Result<Vec<glob::Pattern>> {
        list.iter()
            .map(|p| {
                glob::Pattern::new(&p.to_lowercase())
                    .with_context(|| format!("Invalid table pattern '{}'", p))
            })
            .collect()
    };
    let include = include.map(compile).transpose()?;
    let exclude = compile(exclude)?;

    Ok(planned
        .into_iter()
        .filter(|t| {
            let name = t.name.to_lowercase();
            let included = include
                .as_ref()
                .map(|pats| pats.iter().any(|p| p.matches(&name)))
                .unwrap_or(true);
            included && !exclude.iter().any(|p| p.matches(&name))
        })
        .collect())
}

fn print_summary(report: &RunReport) {
    eprintln!();
    eprintln!("Copy Statistics:");
    eprintln!("  Tables: {}", report.tables.len());
    eprintln!("  Rows written: {}", report.rows_written());
    eprintln!("  Elapsed: {} ms", report.duration_ms);
    eprintln!();
    for table in &report.tables {
        match &table.error {
            Some(e) => eprintln!("  {}: {} rows, FAILED: {}", table.table, table.rows_written, e),
            None if table.rows_skipped > 0 => eprintln!(
                "  {}: {} rows ({} skipped)",
                table.table, table.rows_written, table.rows_skipped
            ),
            None => eprintln!("  {}: {} rows", table.table, table.rows_written),
        }
    }
}
