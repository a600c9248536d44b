//! Null strategy - replace values with NULL.

use super::{Strategy, StrategyKind};
use crate::database::Value;

/// Strategy that replaces all values with NULL
#[derive(Debug, Clone, Default)]
pub struct NullStrategy;

impl NullStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Strategy for NullStrategy {
    fn apply(&self, _value: &Value, _rng: &mut dyn rand::RngCore) -> Value {
        Value::Null
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Null
    }
}
