//! Mask strategy - partial masking with pattern.

use super::{value_text, Strategy, StrategyKind};
use crate::database::Value;
use rand::Rng;

/// Strategy that partially masks values using a pattern.
///
/// Pattern syntax:
/// - `*` = replace with asterisk
/// - `X` = keep original character
/// - `#` = replace with random digit
/// - Any other character = literal (e.g., `-`, `.`, `@`)
#[derive(Debug, Clone)]
pub struct MaskStrategy {
    pattern: String,
}

impl MaskStrategy {
    pub fn new(pattern: String) -> Self {
        Self { pattern }
    }

    /// Apply the mask pattern to a value
    fn mask_value(&self, value: &str, rng: &mut dyn rand::RngCore) -> String {
        let chars: Vec<char> = value.chars().collect();
        let mut result = String::with_capacity(self.pattern.len());
        let mut value_idx = 0;

        for pattern_char in self.pattern.chars() {
            match pattern_char {
                '*' => {
                    result.push('*');
                    value_idx += 1;
                }
                'X' => {
                    if let Some(&c) = chars.get(value_idx) {
                        result.push(c);
                    }
                    value_idx += 1;
                }
                '#' => {
                    let digit: u8 = rng.random_range(0..10);
                    result.push(char::from(b'0' + digit));
                    value_idx += 1;
                }
                c => {
                    result.push(c);
                    // Advance past the separator if the original has it too
                    if chars.get(value_idx) == Some(&c) {
                        value_idx += 1;
                    }
                }
            }
        }

        result
    }
}

impl Strategy for MaskStrategy {
    fn apply(&self, value: &Value, rng: &mut dyn rand::RngCore) -> Value {
        match value_text(value) {
            Some(s) => Value::Text(self.mask_value(&s, rng)),
            None => Value::Null,
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Mask {
            pattern: self.pattern.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_mask_credit_card() {
        // Keep last 4 digits
        let strategy = MaskStrategy::new("****-****-****-XXXX".to_string());
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let result = strategy.apply(&Value::from("4532-0151-1283-0366"), &mut rng);
        let s = result.as_str().unwrap();
        assert!(s.starts_with("****-****-****-"));
        assert!(s.ends_with("0366"));
    }

    #[test]
    fn test_mask_random_digits() {
        let strategy = MaskStrategy::new("###-##-####".to_string());
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let result = strategy.apply(&Value::from("123-45-6789"), &mut rng);
        let s = result.as_str().unwrap();
        assert_eq!(s.len(), 11);
        assert_eq!(s.chars().nth(3), Some('-'));
        assert_eq!(s.chars().nth(6), Some('-'));
        assert!(s.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_mask_integer_value() {
        let strategy = MaskStrategy::new("XX**".to_string());
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        assert_eq!(
            strategy.apply(&Value::Int(1234), &mut rng),
            Value::from("12**")
        );
    }

    #[test]
    fn test_mask_null() {
        let strategy = MaskStrategy::new("****".to_string());
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        assert!(strategy.apply(&Value::Null, &mut rng).is_null());
    }
}
