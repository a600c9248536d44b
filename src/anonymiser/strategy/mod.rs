//! Anonymisation strategies for column values.
//!
//! Each strategy implements a different approach to replacing a value:
//! - `null`: Replace with NULL
//! - `constant`: Replace with a fixed value
//! - `hash`: One-way hash (deterministic)
//! - `mask`: Partial masking with pattern
//! - `fake`: Generate realistic fake data
//! - `skip`: No change (passthrough)

mod constant;
mod fake;
mod hash;
mod mask;
mod null;

pub use constant::ConstantStrategy;
pub use fake::FakeStrategy;
pub use hash::HashStrategy;
pub use mask::MaskStrategy;
pub use null::NullStrategy;

use crate::database::Value;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Anonymisation strategy kind with associated configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyKind {
    /// Replace value with NULL
    Null,

    /// Replace with a constant value
    Constant {
        /// The constant value to use
        value: String,
    },

    /// One-way hash (SHA256)
    Hash {
        /// Preserve email domain (user@domain.com → hash@domain.com)
        #[serde(default)]
        preserve_domain: bool,
    },

    /// Partial masking with pattern
    Mask {
        /// Pattern: * = asterisk, X = keep, # = random digit
        pattern: String,
    },

    /// Generate fake data
    Fake {
        /// Generator name: email, name, phone, address, etc.
        generator: String,
    },

    /// No change (passthrough)
    #[default]
    Skip,
}

impl StrategyKind {
    /// Validate the strategy configuration
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StrategyKind::Constant { value } if value.is_empty() => {
                Err("constant strategy requires a non-empty value".to_string())
            }
            StrategyKind::Mask { pattern } if pattern.is_empty() => {
                Err("mask strategy requires a non-empty pattern".to_string())
            }
            StrategyKind::Fake { generator } if !is_valid_generator(generator) => Err(format!(
                "unknown fake generator: {}. Use: email, name, first_name, last_name, phone, address, city, zip, company, ip, uuid, date, etc.",
                generator
            )),
            _ => Ok(()),
        }
    }

    /// Get the YAML string representation of this strategy
    pub fn to_yaml_str(&self) -> &'static str {
        match self {
            StrategyKind::Null => "null",
            StrategyKind::Constant { .. } => "constant",
            StrategyKind::Hash { .. } => "hash",
            StrategyKind::Mask { .. } => "mask",
            StrategyKind::Fake { .. } => "fake",
            StrategyKind::Skip => "skip",
        }
    }

    /// Build the strategy, or None for `skip`
    pub fn build(&self) -> Option<Arc<dyn Strategy>> {
        match self {
            StrategyKind::Null => Some(Arc::new(NullStrategy::new())),
            StrategyKind::Constant { value } => Some(Arc::new(ConstantStrategy::new(value.clone()))),
            StrategyKind::Hash { preserve_domain } => {
                Some(Arc::new(HashStrategy::new(*preserve_domain)))
            }
            StrategyKind::Mask { pattern } => Some(Arc::new(MaskStrategy::new(pattern.clone()))),
            StrategyKind::Fake { generator } => Some(Arc::new(FakeStrategy::new(generator.clone()))),
            StrategyKind::Skip => None,
        }
    }
}

/// Check if a fake generator name is valid
fn is_valid_generator(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "email"
            | "safe_email"
            | "name"
            | "first_name"
            | "last_name"
            | "full_name"
            | "phone"
            | "phone_number"
            | "address"
            | "street_address"
            | "street"
            | "street_name"
            | "city"
            | "state"
            | "zip"
            | "zip_code"
            | "postal_code"
            | "country"
            | "company"
            | "company_name"
            | "username"
            | "user_name"
            | "url"
            | "ip"
            | "ip_address"
            | "ipv4"
            | "uuid"
            | "date"
            | "ipv6"
            | "date_time"
            | "datetime"
            | "time"
            | "job_title"
            | "credit_card"
            | "iban"
            | "ssn"
            | "lorem"
            | "paragraph"
            | "sentence"
            | "word"
    )
}

/// Text form of a value for strategies that work on strings
pub(crate) fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Text(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Fit a strategy's output back into the type of the value it replaced.
///
/// Text output is parsed for typed columns; output that cannot represent
/// the original type is an error rather than a value the destination rejects.
pub(crate) fn conform(original: &Value, output: Value) -> Result<Value, String> {
    let text = match (original, output) {
        (_, Value::Null) => return Ok(Value::Null),
        (Value::Null | Value::Text(_), out) => return Ok(out),
        (orig, out) if std::mem::discriminant(orig) == std::mem::discriminant(&out) => {
            return Ok(out)
        }
        (Value::Bytes(_), Value::Text(s)) => return Ok(Value::Bytes(s.into_bytes())),
        (_, Value::Text(s)) => s,
        (orig, out) => {
            return Err(format!(
                "{} output cannot replace a {} value",
                type_name(&out),
                type_name(orig)
            ))
        }
    };

    let parsed = match original {
        Value::Bool(_) => text.parse().ok().map(Value::Bool),
        Value::Int(_) => text.parse().ok().map(Value::Int),
        Value::UInt(_) => text.parse().ok().map(Value::UInt),
        Value::Float(_) => text.parse().ok().map(Value::Float),
        Value::Decimal(_) => text
            .parse::<f64>()
            .ok()
            .map(|_| Value::Decimal(text.clone())),
        Value::Date(_) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .ok()
            .map(Value::Date),
        Value::Time(_) => NaiveTime::parse_from_str(&text, "%H:%M:%S%.f")
            .ok()
            .map(Value::Time),
        Value::Timestamp(_) => NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(Value::Timestamp),
        _ => None,
    };
    parsed.ok_or_else(|| format!("'{}' is not a valid {} value", text, type_name(original)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Int(_) | Value::UInt(_) => "integer",
        Value::Float(_) => "float",
        Value::Decimal(_) => "decimal",
        Value::Text(_) => "text",
        Value::Bytes(_) => "binary",
        Value::Date(_) => "date",
        Value::Time(_) => "time",
        Value::Timestamp(_) => "timestamp",
    }
}

/// Trait for anonymisation strategies
pub trait Strategy: Send + Sync {
    /// Apply the strategy to a value
    fn apply(&self, value: &Value, rng: &mut dyn rand::RngCore) -> Value;

    /// Get the strategy kind
    fn kind(&self) -> StrategyKind;
}
