//! Schema command CLI handler.

use sql_subsetter::json_schema;
use std::fs;
use std::path::PathBuf;

pub fn run(name: Option<String>, output: Option<PathBuf>, list: bool) -> anyhow::Result<()> {
    if list {
        for name in json_schema::schema_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let name = name.as_deref().unwrap_or("config");
    let schema = json_schema::get_schema(name).ok_or_else(|| {
        anyhow::anyhow!(
            "Unknown schema '{}'. Available: {}",
            name,
            json_schema::schema_names().join(", ")
        )
    })?;
    let json = serde_json::to_string_pretty(&schema)?;

    match output {
        Some(path) => {
            fs::write(&path, format!("{}\n", json))?;
            eprintln!("Wrote {} schema to {}", name, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
