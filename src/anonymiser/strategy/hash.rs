//! Hash strategy - one-way SHA256 hash.

use super::{value_text, Strategy, StrategyKind};
use crate::database::Value;
use sha2::{Digest, Sha256};

/// Strategy that hashes values with SHA256
#[derive(Debug, Clone)]
pub struct HashStrategy {
    /// Whether to preserve email domain
    preserve_domain: bool,
}

impl HashStrategy {
    pub fn new(preserve_domain: bool) -> Self {
        Self { preserve_domain }
    }

    /// Hash a string value
    fn hash_value(&self, value: &str) -> String {
        if self.preserve_domain {
            if let Some((local, domain)) = value.rsplit_once('@') {
                let hash = compute_hash(local);
                return format!("{}@{}", &hash[..8], domain);
            }
        }

        // Regular hash: first 16 chars of hex
        compute_hash(value)[..16].to_string()
    }
}

/// SHA256 as a hex string
fn compute_hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

impl Strategy for HashStrategy {
    fn apply(&self, value: &Value, _rng: &mut dyn rand::RngCore) -> Value {
        match value {
            Value::Bytes(b) => Value::Text(self.hash_value(&String::from_utf8_lossy(b))),
            other => match value_text(other) {
                Some(s) => Value::Text(self.hash_value(&s)),
                None => Value::Null,
            },
        }
    }

    fn kind(&self) -> StrategyKind {
        StrategyKind::Hash {
            preserve_domain: self.preserve_domain,
        }
    }
}
