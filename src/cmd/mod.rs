mod copy;
mod init;
mod schema;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::io;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sql-subsetter")]
#[command(version)]
#[command(
    about = "Copy a reduced, referentially-consistent and anonymised subset of a database",
    long_about = None
)]
pub struct Cli {
    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Copy a subset of a source database to a destination
    Copy {
        /// Source DSN (e.g., duckdb:///data/app.db)
        #[arg(long)]
        from: String,

        /// Destination DSN: os://stdout, file://out.sql[.gz], duckdb:///tmp/copy.db
        #[arg(long, default_value = "os://stdout")]
        to: String,

        /// YAML config file with subsets, relationships and anonymise rules
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Tables copied in parallel
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Rows buffered per table queue
        #[arg(long, default_value_t = 1024)]
        queue_capacity: usize,

        /// Seconds to wait for a source connection (0 = forever)
        #[arg(long, default_value_t = 30)]
        timeout: u64,

        /// Maximum open source connections (0 = unbounded)
        #[arg(long, default_value_t = 0)]
        max_conns: usize,

        /// Idle source connections kept for reuse
        #[arg(long, default_value_t = 2)]
        max_idle_conns: usize,

        /// Recycle source connections older than this many seconds (0 = never)
        #[arg(long, default_value_t = 0)]
        max_conn_lifetime: u64,

        /// Only copy data of these tables (comma-separated, globs allowed)
        #[arg(short, long)]
        tables: Option<String>,

        /// Skip data of these tables (comma-separated, globs allowed)
        #[arg(short, long)]
        exclude: Option<String>,

        /// Seed for anonymisation (random if not specified)
        #[arg(long)]
        seed: Option<u64>,

        /// Cancel tables not yet started after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Fail a table on the first row the anonymiser rejects instead of skipping the row
        #[arg(long)]
        strict_transform: bool,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,

        /// Show progress while copying
        #[arg(short, long)]
        progress: bool,
    },

    /// Write an example configuration file
    Init {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print JSON schemas for the config file and the copy report
    Schema {
        /// Schema to print: config or report (default: config)
        #[arg(short, long)]
        name: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// List available schemas
        #[arg(long)]
        list: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Copy {
            from,
            to,
            config,
            concurrency,
            queue_capacity,
            timeout,
            max_conns,
            max_idle_conns,
            max_conn_lifetime,
            tables,
            exclude,
            seed,
            fail_fast,
            strict_transform,
            json,
            progress,
        } => {
            if concurrency == 0 {
                anyhow::bail!("--concurrency must be greater than 0");
            }
            if queue_capacity == 0 {
                anyhow::bail!("--queue-capacity must be greater than 0");
            }
            copy::run(copy::CopyOptions {
                from,
                to,
                config,
                concurrency,
                queue_capacity,
                timeout,
                max_conns,
                max_idle_conns,
                max_conn_lifetime,
                tables: split_list(tables),
                exclude: split_list(exclude).unwrap_or_default(),
                seed,
                fail_fast,
                strict_transform,
                json,
                progress,
            })
        }
        Commands::Init { output, force } => init::run(output, force),
        Commands::Schema { name, output, list } => schema::run(name, output, list),
        Commands::Completions { shell } => {
            generate(
                shell,
                &mut Cli::command(),
                "sql-subsetter",
                &mut io::stdout(),
            );
            Ok(())
        }
    }
}

fn split_list(value: Option<String>) -> Option<Vec<String>> {
    value.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_copy() {
        let cli = Cli::try_parse_from([
            "sql-subsetter",
            "copy",
            "--from",
            "duckdb:///tmp/a.db",
            "--tables",
            "users, orders",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Copy {
                to, tables, concurrency, ..
            } => {
                assert_eq!(to, "os://stdout");
                assert_eq!(concurrency, 4);
                assert_eq!(
                    split_list(tables),
                    Some(vec!["users".to_string(), "orders".to_string()])
                );
            }
            _ => panic!("expected copy"),
        }
    }
}
