//! JSON Schema generation.
//!
//! Covers the configuration file and the `copy --json` report. Schemas are
//! exported via the `schema` subcommand.

use schemars::{schema_for, Schema};
use std::collections::BTreeMap;

/// All schemas by name.
/// Uses BTreeMap for deterministic ordering (important for diffable output).
pub fn all_schemas() -> BTreeMap<&'static str, Schema> {
    let mut schemas = BTreeMap::new();

    // configuration file
    schemas.insert("config", schema_for!(crate::config::Config));

    // copy --json
    schemas.insert("report", schema_for!(crate::pipeline::RunReport));

    schemas
}

/// Generate a single schema by name.
pub fn get_schema(name: &str) -> Option<Schema> {
    all_schemas().remove(name)
}

/// List all available schema names.
pub fn schema_names() -> Vec<&'static str> {
    all_schemas().keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_names() {
        assert_eq!(schema_names(), vec!["config", "report"]);
        assert!(get_schema("nope").is_none());
    }

    #[test]
    fn test_config_schema_has_tables() {
        let schema = serde_json::to_value(get_schema("config").unwrap()).unwrap();
        assert!(schema["properties"]["tables"].is_object(), "{}", schema);
    }
}
