//! YAML configuration for a subset copy.
//!
//! Declares, per table, the named subsets to select (match predicate, sort,
//! limit, relationships), whether to skip the table's data, and the
//! anonymisation rules applied to its columns.

use crate::anonymiser::StrategyKind;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// Example configuration written by the `init` command
pub const EXAMPLE_CONFIG: &str = r#"# sql-subsetter configuration
default:
  anonymise:
    "*email*": { strategy: fake, generator: email }

tables:
  - name: users
    subsets:
      - name: recent_users
        filter:
          match: "active = true"
          sorts: { created_at: desc }
          limit: 100
        relationships:
          - table: orders
            foreign_key: user_id
            referenced_table: users
            referenced_key: id
    anonymise:
      password: { strategy: constant, value: "not-a-real-password" }
      phone: { strategy: mask, pattern: "XXX-***-****" }

  - name: sessions
    ignore_data: true
"#;

/// Sort direction of one ORDER BY entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    #[serde(alias = "ASC", alias = "Asc")]
    Asc,
    #[serde(alias = "DESC", alias = "Desc")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl std::str::FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(format!(
                "Unknown sort direction: {}. Valid options: asc, desc",
                s
            )),
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Column → direction, in priority order
pub type Sorts = IndexMap<String, SortDirection>;

/// Column pattern → anonymisation strategy, first match wins
pub type AnonymiseRules = IndexMap<String, StrategyKind>;

/// Row filter of a subset
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FilterConfig {
    /// Raw boolean predicate in the source engine's dialect
    #[serde(rename = "match")]
    pub match_expr: Option<String>,
    /// ORDER BY entries, column → asc/desc
    #[schemars(with = "BTreeMap<String, SortDirection>")]
    pub sorts: Sorts,
    /// Maximum number of driving rows; 0 means no limit
    pub limit: u64,
}

/// A foreign-key edge used to pull related rows into the copy
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RelationshipConfig {
    /// Table holding the foreign key (defaults to the table owning the subset)
    pub table: Option<String>,
    /// Foreign key column on `table`
    pub foreign_key: String,
    /// Table the foreign key points at
    pub referenced_table: String,
    /// Key column on `referenced_table`
    pub referenced_key: String,
}

/// One named subset of a table
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SubsetConfig {
    pub name: String,
    pub filter: FilterConfig,
    pub relationships: Vec<RelationshipConfig>,
}

/// Per-table settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    /// Copy the structure only, no rows
    pub ignore_data: bool,
    pub subsets: Vec<SubsetConfig>,
    /// Column pattern → strategy
    #[schemars(with = "BTreeMap<String, StrategyKind>")]
    pub anonymise: AnonymiseRules,
}

/// Settings applied to every table
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct DefaultConfig {
    /// Column pattern → strategy, checked after the table's own rules
    #[schemars(with = "BTreeMap<String, StrategyKind>")]
    pub anonymise: AnonymiseRules,
}

/// Complete YAML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub default: DefaultConfig,
    pub tables: Vec<TableConfig>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        Ok(config)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        let mut seen = HashSet::new();

        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(crate::error::Error::config("table entry without a name"));
            }
            if !seen.insert(table.name.to_lowercase()) {
                return Err(crate::error::Error::config(format!(
                    "table '{}' is configured more than once",
                    table.name
                )));
            }

            let mut subset_names = HashSet::new();
            for subset in &table.subsets {
                if !subset.name.is_empty() && !subset_names.insert(subset.name.as_str()) {
                    return Err(crate::error::Error::config(format!(
                        "table '{}' has more than one subset named '{}'",
                        table.name, subset.name
                    )));
                }

                for (column, _) in subset.filter.sorts.iter() {
                    if column.trim().is_empty() {
                        return Err(crate::error::Error::config(format!(
                            "table '{}' has an empty sort column",
                            table.name
                        )));
                    }
                }

                for rel in &subset.relationships {
                    if rel.foreign_key.is_empty()
                        || rel.referenced_table.is_empty()
                        || rel.referenced_key.is_empty()
                    {
                        return Err(crate::error::Error::config(format!(
                            "table '{}': relationships need foreign_key, referenced_table and referenced_key",
                            table.name
                        )));
                    }
                }
            }

            for (pattern, strategy) in table.anonymise.iter() {
                strategy.validate().map_err(|e| {
                    crate::error::Error::config(format!("{}.{}: {}", table.name, pattern, e))
                })?;
            }
        }

        for (pattern, strategy) in self.default.anonymise.iter() {
            strategy
                .validate()
                .map_err(|e| crate::error::Error::config(format!("default.{}: {}", pattern, e)))?;
        }

        Ok(())
    }

    /// Get configuration for a specific table
    pub fn table(&self, table_name: &str) -> Option<&TableConfig> {
        self.tables
            .iter()
            .find(|t| t.name == table_name)
            .or_else(|| {
                // Try case-insensitive match
                self.tables
                    .iter()
                    .find(|t| t.name.eq_ignore_ascii_case(table_name))
            })
    }

    /// Whether rows of this table should be skipped
    pub fn ignores_data(&self, table_name: &str) -> bool {
        self.table(table_name).map(|t| t.ignore_data).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
tables:
  - name: users
    subsets:
      - name: active
        filter:
          match: "active = true"
          sorts: { created_at: desc, id: asc }
          limit: 10
        relationships:
          - table: orders
            foreign_key: user_id
            referenced_table: users
            referenced_key: id
  - name: logs
    ignore_data: true
"#;

        let config = Config::from_yaml(yaml).unwrap();
        let users = config.table("users").unwrap();
        let subset = &users.subsets[0];

        assert_eq!(subset.name, "active");
        assert_eq!(subset.filter.match_expr.as_deref(), Some("active = true"));
        assert_eq!(subset.filter.limit, 10);
        assert_eq!(subset.relationships[0].table.as_deref(), Some("orders"));
        assert!(config.ignores_data("logs"));
        assert!(!config.ignores_data("users"));
    }

    #[test]
    fn test_sorts_keep_document_order() {
        let yaml = r#"
tables:
  - name: t
    subsets:
      - filter:
          sorts: { zeta: desc, alpha: asc, mid: DESC }
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let sorts: Vec<_> = config.tables[0].subsets[0]
            .filter
            .sorts
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();

        assert_eq!(
            sorts,
            vec![
                ("zeta".to_string(), SortDirection::Desc),
                ("alpha".to_string(), SortDirection::Asc),
                ("mid".to_string(), SortDirection::Desc),
            ]
        );
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let config = Config::from_yaml("tables:\n  - name: Users\n").unwrap();
        assert!(config.table("users").is_some());
        assert!(config.table("orders").is_none());
    }

    #[test]
    fn test_duplicate_table_rejected() {
        let yaml = "tables:\n  - name: users\n  - name: USERS\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_incomplete_relationship_rejected() {
        let yaml = r#"
tables:
  - name: users
    subsets:
      - name: s
        relationships:
          - table: orders
            foreign_key: user_id
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("referenced_table"));
    }

    #[test]
    fn test_invalid_strategy_rejected() {
        let yaml = r#"
tables:
  - name: users
    anonymise:
      email: { strategy: fake, generator: not_a_generator }
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::from_yaml(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.tables.len(), 2);
        assert_eq!(config.default.anonymise.len(), 1);
    }

    #[test]
    fn test_sort_direction_parse() {
        assert_eq!("ASC".parse::<SortDirection>().unwrap(), SortDirection::Asc);
        assert_eq!("desc".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!("sideways".parse::<SortDirection>().is_err());
    }
}
