//! Validator set types.

use crate::PublicKey;
use sbor::prelude::*;

/// A validator and its total delegated stake.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorStake {
    /// Validator key.
    pub validator: PublicKey,
    /// Stake weight.
    pub stake: u128,
}

/// A set of validators, ordered by key.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor, Default)]
pub struct ValidatorSet {
    /// The validators, ordered by key.
    pub validators: Vec<ValidatorStake>,
}

impl ValidatorSet {
    /// Create a new validator set.
    pub fn new(mut validators: Vec<ValidatorStake>) -> Self {
        validators.sort_by(|a, b| a.validator.cmp(&b.validator));
        Self { validators }
    }

    /// Get the number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Sum of all stake.
    pub fn total_stake(&self) -> u128 {
        self.validators
            .iter()
            .fold(0, |total, v| total.saturating_add(v.stake))
    }

    /// Find a validator by key.
    pub fn get(&self, validator: &PublicKey) -> Option<&ValidatorStake> {
        self.validators
            .binary_search_by(|v| v.validator.cmp(validator))
            .ok()
            .map(|i| &self.validators[i])
    }

    /// Whether the key is in the set.
    pub fn contains(&self, validator: &PublicKey) -> bool {
        self.get(validator).is_some()
    }

    /// Iterate keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.validators.iter().map(|v| &v.validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KeyPair;

    fn make_validator(seed: u64, stake: u128) -> ValidatorStake {
        ValidatorStake {
            validator: KeyPair::from_seed(seed).unwrap().public_key(),
            stake,
        }
    }

    #[test]
    fn test_validator_set_sorted() {
        let set = ValidatorSet::new(vec![
            make_validator(3, 1),
            make_validator(1, 1),
            make_validator(2, 1),
        ]);

        let keys: Vec<_> = set.keys().copied().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_validator_set_lookup() {
        let a = make_validator(1, 10);
        let b = make_validator(2, 20);
        let set = ValidatorSet::new(vec![a.clone(), b.clone()]);

        assert_eq!(set.len(), 2);
        assert_eq!(set.total_stake(), 30);
        assert_eq!(set.get(&b.validator).map(|v| v.stake), Some(20));
        assert!(!set.contains(&make_validator(3, 0).validator));
    }
}
