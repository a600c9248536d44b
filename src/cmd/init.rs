//! Init command CLI handler.

use sql_subsetter::config::{Config, EXAMPLE_CONFIG};
use std::fs;
use std::path::PathBuf;

pub fn run(output: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    // The example must stay loadable
    Config::from_yaml(EXAMPLE_CONFIG)?;

    match output {
        Some(path) => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&path, EXAMPLE_CONFIG)?;
            eprintln!("Wrote example configuration to {}", path.display());
        }
        None => print!("{}", EXAMPLE_CONFIG),
    }
    Ok(())
}
