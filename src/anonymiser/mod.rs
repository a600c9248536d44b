//! Transform stage: per-column anonymisation of rows in flight.
//!
//! Rules map a column glob pattern (optionally qualified as `table.column`)
//! to a strategy. A table's own rules are checked before the `default`
//! rules and the first matching rule wins, so a table can opt a column out
//! of a default rule with `skip`.

pub mod strategy;

pub use strategy::{Strategy, StrategyKind};

use strategy::conform;

use crate::config::{AnonymiseRules, Config};
use crate::database::Row;
use crate::error::{Error, Result};
use glob::Pattern;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Row transformation applied between the reader and the dumper
pub trait Transformer: Send + Sync {
    /// Transform one row of `table`. The row is consumed; the returned row
    /// must keep the same columns.
    fn transform(&self, table: &str, row: Row) -> Result<Row>;
}

/// Identity transformer
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Transformer for Passthrough {
    fn transform(&self, _table: &str, row: Row) -> Result<Row> {
        Ok(row)
    }
}

/// A rule with pre-compiled glob patterns
struct CompiledRule {
    /// Table pattern (None = match all tables)
    table_pattern: Option<Pattern>,
    column_pattern: Pattern,
    /// None for `skip`
    strategy: Option<Arc<dyn Strategy>>,
}

impl CompiledRule {
    fn compile(scope: Option<&str>, pattern: &str, kind: &StrategyKind) -> Result<Self> {
        let (table_part, column_part) = match pattern.split_once('.') {
            Some((t, c)) => (Some(t), c),
            None => (None, pattern),
        };

        // A per-table rule is pinned to its table; a qualifier in the
        // default section scopes it like one.
        let table_pattern = match (scope, table_part) {
            (Some(table), _) => Some(compile_pattern(&glob::Pattern::escape(table))?),
            (None, Some("*")) | (None, None) => None,
            (None, Some(t)) => Some(compile_pattern(t)?),
        };

        Ok(Self {
            table_pattern,
            column_pattern: compile_pattern(column_part)?,
            strategy: kind.build(),
        })
    }

    fn matches(&self, table: &str, column: &str) -> bool {
        if let Some(ref table_pat) = self.table_pattern {
            if !table_pat.matches(table) && !table_pat.matches(&table.to_lowercase()) {
                return false;
            }
        }
        self.column_pattern.matches(column) || self.column_pattern.matches(&column.to_lowercase())
    }
}

fn compile_pattern(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern)
        .map_err(|e| Error::config(format!("invalid anonymise pattern '{}': {}", pattern, e)))
}

/// Strategy per column position, resolved once per table
type ColumnPlan = Arc<[Option<Arc<dyn Strategy>>]>;

/// Applies anonymisation rules to rows.
///
/// Randomised strategies draw from an rng seeded by `(seed, table, column,
/// value)`, so equal inputs always produce equal outputs and anonymised join
/// keys stay consistent across tables.
pub struct Anonymiser {
    rules: Vec<CompiledRule>,
    hasher: ahash::RandomState,
    plans: RwLock<HashMap<String, ColumnPlan>>,
}

impl Anonymiser {
    /// Compile the rules of every table plus the default section
    pub fn from_config(config: &Config, seed: u64) -> Result<Self> {
        let mut rules = Vec::new();

        for table in &config.tables {
            push_rules(&mut rules, Some(&table.name), &table.anonymise)?;
        }
        push_rules(&mut rules, None, &config.default.anonymise)?;

        Ok(Self {
            rules,
            hasher: ahash::RandomState::with_seeds(
                seed,
                seed.rotate_left(17) ^ 0x9E37_79B9_7F4A_7C15,
                seed.rotate_left(31) ^ 0xC2B2_AE3D_27D4_EB4F,
                seed.rotate_left(47) ^ 0x1656_67B1_9E37_79F9,
            ),
            plans: RwLock::new(HashMap::new()),
        })
    }

    /// Whether any rule would change data
    pub fn is_empty(&self) -> bool {
        self.rules.iter().all(|r| r.strategy.is_none())
    }

    /// Strategy kind that applies to a column, `skip` when none
    pub fn strategy_for(&self, table: &str, column: &str) -> StrategyKind {
        self.rules
            .iter()
            .find(|r| r.matches(table, column))
            .and_then(|r| r.strategy.as_ref())
            .map(|s| s.kind())
            .unwrap_or_default()
    }

    fn column_plan(&self, table: &str, columns: &[String]) -> ColumnPlan {
        if let Ok(plans) = self.plans.read() {
            if let Some(plan) = plans.get(table) {
                if plan.len() == columns.len() {
                    return plan.clone();
                }
            }
        }

        let plan: ColumnPlan = columns
            .iter()
            .map(|column| {
                self.rules
                    .iter()
                    .find(|r| r.matches(table, column))
                    .and_then(|r| r.strategy.clone())
            })
            .collect();

        let active = plan.iter().filter(|s| s.is_some()).count();
        debug!(table, columns = active, "anonymising columns");

        if let Ok(mut plans) = self.plans.write() {
            plans.insert(table.to_string(), plan.clone());
        }
        plan
    }

    fn rng_for(&self, table: &str, column: &str, value: &crate::database::Value) -> StdRng {
        let mut h = self.hasher.build_hasher();
        table.hash(&mut h);
        column.hash(&mut h);
        value.hash_into(&mut h);
        StdRng::seed_from_u64(h.finish())
    }
}

fn push_rules(
    rules: &mut Vec<CompiledRule>,
    scope: Option<&str>,
    anonymise: &AnonymiseRules,
) -> Result<()> {
    for (pattern, kind) in anonymise.iter() {
        kind.validate().map_err(Error::config)?;
        rules.push(CompiledRule::compile(scope, pattern, kind)?);
    }
    Ok(())
}

impl Transformer for Anonymiser {
    fn transform(&self, table: &str, row: Row) -> Result<Row> {
        let plan = self.column_plan(table, row.columns());
        if plan.iter().all(Option::is_none) {
            return Ok(row);
        }

        let values = row
            .values()
            .iter()
            .zip(row.columns())
            .zip(plan.iter())
            .map(|((value, column), strategy)| match strategy {
                Some(s) => {
                    let mut rng = self.rng_for(table, column, value);
                    conform(value, s.apply(value, &mut rng))
                        .map_err(|message| Error::transform(table, column, message))
                }
                None => Ok(value.clone()),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(row.with_values(values))
    }
}

impl std::fmt::Debug for Anonymiser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Anonymiser")
            .field("rules", &self.rules.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Columns, Value};

    fn config() -> Config {
        Config::from_yaml(
            r#"
default:
  anonymise:
    "*email*": { strategy: hash }
    "*.ssn": { strategy: "null" }
tables:
  - name: users
    anonymise:
      password: { strategy: constant, value: "xxx" }
      email: { strategy: skip }
  - name: customers
    anonymise:
      phone: { strategy: mask, pattern: "XXX-****" }
"#,
        )
        .unwrap()
    }

    fn row(columns: &[&str], values: Vec<Value>) -> Row {
        let columns: Columns = columns.iter().map(|c| c.to_string()).collect();
        Row::new(columns, values)
    }

    #[test]
    fn test_table_rules_win_over_default() {
        let anon = Anonymiser::from_config(&config(), 1).unwrap();

        assert_eq!(anon.strategy_for("users", "email"), StrategyKind::Skip);
        assert_eq!(
            anon.strategy_for("customers", "work_email"),
            StrategyKind::Hash {
                preserve_domain: false
            }
        );
        assert_eq!(anon.strategy_for("customers", "ssn"), StrategyKind::Null);
        assert_eq!(anon.strategy_for("orders", "phone"), StrategyKind::Skip);
    }

    #[test]
    fn test_transform_row() {
        let anon = Anonymiser::from_config(&config(), 1).unwrap();
        let input = row(
            &["id", "email", "password", "ssn"],
            vec![
                Value::Int(1),
                Value::from("a@b.c"),
                Value::from("hunter2"),
                Value::from("123-45-6789"),
            ],
        );

        let out = anon.transform("users", input).unwrap();
        assert_eq!(out.get("id"), Some(&Value::Int(1)));
        assert_eq!(out.get("email"), Some(&Value::from("a@b.c")));
        assert_eq!(out.get("password"), Some(&Value::from("xxx")));
        assert_eq!(out.get("ssn"), Some(&Value::Null));
    }

    #[test]
    fn test_null_stays_null() {
        let anon = Anonymiser::from_config(&config(), 1).unwrap();
        let out = anon
            .transform("customers", row(&["phone"], vec![Value::Null]))
            .unwrap();
        assert!(out.values()[0].is_null());
    }

    #[test]
    fn test_typed_column_rejects_text_output() {
        let anon = Anonymiser::from_config(&config(), 1).unwrap();
        let err = anon
            .transform("users", row(&["password"], vec![Value::Int(42)]))
            .unwrap_err();
        assert!(
            matches!(err, Error::Transform { ref column, .. } if column == "password"),
            "{}",
            err
        );
    }

    #[test]
    fn test_deterministic_per_value() {
        let config = Config::from_yaml(
            r#####"
default:
  anonymise:
    code: { strategy: mask, pattern: "####" }
"#####,
        )
        .unwrap();
        let anon = Anonymiser::from_config(&config, 7).unwrap();

        let a = anon
            .transform("t", row(&["code"], vec![Value::from("1111")]))
            .unwrap();
        let b = anon
            .transform("t", row(&["code"], vec![Value::from("1111")]))
            .unwrap();
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn test_passthrough() {
        let input = row(&["x"], vec![Value::Int(3)]);
        let out = Passthrough.transform("t", input.clone()).unwrap();
        assert_eq!(out.values(), input.values());
    }
}
