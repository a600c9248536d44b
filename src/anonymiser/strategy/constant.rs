//! Constant strategy - replace values with a fixed constant.

use super::{Strategy, StrategyKind};
use crate::database::Value;

/// Strategy that replaces all non-NULL values with a constant
#[derive(Debug, Clone)]
pub struct ConstantStrategy {
    value: String,
}

impl ConstantStrategy {
    pub fn new(value: String) -> Self {
        Self { value }
    }
}

impl Strategy for ConstantStrategy {
    fn apply(&self, value: &Value, _rng: &mut dyn rand::RngCore) -> Value {
        if value.is_null() {
            Value::Null
        } else {
            Value::Text(self.value.clone())
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Constant {
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_constant_strategy() {
        let strategy = ConstantStrategy::new("REDACTED".to_string());
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        assert_eq!(
            strategy.apply(&Value::from("secret"), &mut rng),
            Value::from("REDACTED")
        );
        assert_eq!(
            strategy.apply(&Value::Int(123), &mut rng),
            Value::from("REDACTED")
        );

        // NULL stays NULL
        assert!(strategy.apply(&Value::Null, &mut rng).is_null());
    }
}
