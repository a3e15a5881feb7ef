//! Rule versioning.
//!
//! A fork is a named, hash-identified rule set with an activation condition.
//! Forks form a chain; only the immediate successor of the active fork can
//! activate, and only at an epoch boundary:
//!
//! ```text
//!   FixedEpoch(v1, epoch 0) ──► FixedEpoch(v2, epoch 40) ──► Candidate(v3, ≥ 60%, epoch ≥ 90)
//!        genesis                  next epoch == 40              next epoch ≥ 90 and enough
//!                                                               stake voted for v3's hash
//! ```
//!
//! The schedule is validated once, at construction. Everything that could make
//! activation ambiguous is a [`ForkConfigError`].

use crate::config::{EngineConfig, ForkOverride, RulesConfig};
use crate::error::ForkConfigError;
use crate::rule_set::{RERules, RulesVersion};
use crate::verifier::ForkVotesVerifier;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use stratum_types::{Hash, LedgerMetadata};
use tracing::warn;

/// Parts-per-ten-thousand denominator of candidate thresholds.
pub const STAKE_THRESHOLD_DENOMINATOR: u16 = 10_000;

/// Hash identifying a fork.
pub fn fork_hash(name: &str, version: RulesVersion) -> Hash {
    Hash::from_parts(&[&b"fork"[..], name.as_bytes(), &[version.tag()]])
}

/// A fork activating at a fixed epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedEpochForkConfig {
    /// Unique name.
    pub name: String,
    /// Rules enabled by the fork.
    pub version: RulesVersion,
    /// Epoch the fork is active from.
    pub epoch: u64,
}

/// A fork activating once enough stake signals readiness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateForkConfig {
    /// Unique name.
    pub name: String,
    /// Rules enabled by the fork.
    pub version: RulesVersion,
    /// Required share of the next validator set's stake, in parts per ten thousand.
    pub required_stake: u16,
    /// Earliest epoch the fork may be active from.
    pub min_epoch: u64,
}

/// Activation rule of a fork.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkConfig {
    /// See [`FixedEpochForkConfig`].
    FixedEpoch(FixedEpochForkConfig),
    /// See [`CandidateForkConfig`].
    Candidate(CandidateForkConfig),
}

impl ForkConfig {
    /// Fork active from `epoch`.
    pub fn fixed(name: impl Into<String>, version: RulesVersion, epoch: u64) -> Self {
        ForkConfig::FixedEpoch(FixedEpochForkConfig {
            name: name.into(),
            version,
            epoch,
        })
    }

    /// Fork activated by stake votes.
    pub fn candidate(
        name: impl Into<String>,
        version: RulesVersion,
        required_stake: u16,
        min_epoch: u64,
    ) -> Self {
        ForkConfig::Candidate(CandidateForkConfig {
            name: name.into(),
            version,
            required_stake,
            min_epoch,
        })
    }

    /// Name.
    pub fn name(&self) -> &str {
        match self {
            ForkConfig::FixedEpoch(fork) => &fork.name,
            ForkConfig::Candidate(fork) => &fork.name,
        }
    }

    /// Rules version.
    pub fn version(&self) -> RulesVersion {
        match self {
            ForkConfig::FixedEpoch(fork) => fork.version,
            ForkConfig::Candidate(fork) => fork.version,
        }
    }

    /// Identifying hash.
    pub fn hash(&self) -> Hash {
        fork_hash(self.name(), self.version())
    }

    /// Epoch of activation (fixed) or earliest activation (candidate).
    pub fn activation_epoch(&self) -> u64 {
        match self {
            ForkConfig::FixedEpoch(fork) => fork.epoch,
            ForkConfig::Candidate(fork) => fork.min_epoch,
        }
    }

    fn apply_override(&mut self, fork_override: &ForkOverride) {
        if let Some(epoch) = fork_override.epoch {
            match self {
                ForkConfig::FixedEpoch(fork) => fork.epoch = epoch,
                ForkConfig::Candidate(fork) => fork.min_epoch = epoch,
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Schedule
// ═══════════════════════════════════════════════════════════════════════

/// The validated, ordered list of forks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkSchedule {
    forks: Vec<ForkConfig>,
}

impl ForkSchedule {
    /// Validate and build a schedule.
    pub fn new(forks: Vec<ForkConfig>) -> Result<Self, ForkConfigError> {
        match forks.first() {
            None => return Err(ForkConfigError::Empty),
            Some(ForkConfig::FixedEpoch(genesis)) if genesis.epoch == 0 => {}
            Some(_) => return Err(ForkConfigError::BadGenesisFork),
        }

        let mut names = HashSet::new();
        let mut hashes = HashSet::new();
        for (index, fork) in forks.iter().enumerate() {
            if !names.insert(fork.name().to_string()) {
                return Err(ForkConfigError::DuplicateName(fork.name().to_string()));
            }
            if !hashes.insert(fork.hash()) {
                return Err(ForkConfigError::DuplicateHash(fork.hash()));
            }
            if let ForkConfig::Candidate(candidate) = fork {
                if index != forks.len() - 1 {
                    return Err(ForkConfigError::CandidateNotLast(candidate.name.clone()));
                }
                if candidate.required_stake == 0
                    || candidate.required_stake > STAKE_THRESHOLD_DENOMINATOR
                {
                    return Err(ForkConfigError::InvalidThreshold {
                        name: candidate.name.clone(),
                        required_stake: candidate.required_stake,
                    });
                }
            }
            if index > 0 && fork.activation_epoch() <= forks[index - 1].activation_epoch() {
                return Err(ForkConfigError::NonIncreasingEpoch(fork.name().to_string()));
            }
        }
        Ok(Self { forks })
    }

    /// Forks in activation order.
    pub fn forks(&self) -> &[ForkConfig] {
        &self.forks
    }

    /// The fork active at genesis.
    pub fn genesis(&self) -> &ForkConfig {
        &self.forks[0]
    }

    /// Position of a fork.
    pub fn position(&self, hash: &Hash) -> Option<usize> {
        self.forks.iter().position(|fork| fork.hash() == *hash)
    }

    /// Fork with the given hash.
    pub fn get(&self, hash: &Hash) -> Option<&ForkConfig> {
        self.position(hash).map(|index| &self.forks[index])
    }

    /// The fork that activates at the end of the epoch described by `metadata`,
    /// if any.
    ///
    /// Candidate support is read from `metadata.next_validator_set` and
    /// `metadata.validators_system_metadata`; both must be filled in first.
    pub fn find_next(&self, current: &Hash, metadata: &LedgerMetadata) -> Option<&ForkConfig> {
        let next = self.forks.get(self.position(current)? + 1)?;
        let next_epoch = metadata.epoch + 1;
        let activates = match next {
            ForkConfig::FixedEpoch(fork) => next_epoch == fork.epoch,
            ForkConfig::Candidate(fork) => {
                next_epoch >= fork.min_epoch
                    && has_required_stake(&next.hash(), fork.required_stake, metadata)
            }
        };
        activates.then_some(next)
    }
}

/// Whether validators holding at least `required_stake` parts per ten
/// thousand of the next set's stake report `candidate` as their fork.
pub fn has_required_stake(candidate: &Hash, required_stake: u16, metadata: &LedgerMetadata) -> bool {
    let Some(validators) = &metadata.next_validator_set else {
        return false;
    };
    let total = validators.total_stake();
    if total == 0 {
        return false;
    }
    let voted: u128 = metadata
        .validators_system_metadata
        .iter()
        .filter(|vote| vote.data == *candidate)
        .filter_map(|vote| validators.get(&vote.validator))
        .map(|validator| validator.stake)
        .fold(0, u128::saturating_add);
    voted >= stake_threshold(total, required_stake)
}

/// Smallest stake that is at least `required_stake` parts per ten thousand
/// of `total`, computed without overflow.
fn stake_threshold(total: u128, required_stake: u16) -> u128 {
    let denominator = STAKE_THRESHOLD_DENOMINATOR as u128;
    let required = required_stake as u128;
    let (whole, rest) = (total / denominator, total % denominator);
    whole * required + (rest * required).div_ceil(denominator)
}

// ═══════════════════════════════════════════════════════════════════════
// Forks with rules
// ═══════════════════════════════════════════════════════════════════════

/// The schedule together with the rule set of every fork.
///
/// Each rule set carries a [`ForkVotesVerifier`] over the shared schedule.
#[derive(Debug, Clone)]
pub struct Forks {
    schedule: Arc<ForkSchedule>,
    rules: Vec<Arc<RERules>>,
}

impl Forks {
    /// Apply overrides, validate and build every fork's rules from `base`.
    pub fn new(
        mut forks: Vec<ForkConfig>,
        base: &RulesConfig,
        overrides: &BTreeMap<String, ForkOverride>,
    ) -> Result<Self, ForkConfigError> {
        for (name, fork_override) in overrides {
            match forks.iter_mut().find(|fork| fork.name() == name) {
                Some(fork) => {
                    warn!(fork = %name, ?fork_override, "Overriding fork configuration");
                    fork.apply_override(fork_override);
                }
                None => warn!(fork = %name, "Override for unknown fork ignored"),
            }
        }

        let schedule = Arc::new(ForkSchedule::new(forks)?);
        let rules = schedule
            .forks()
            .iter()
            .map(|fork| {
                let mut config = base.clone();
                if let Some(max_rounds) = overrides.get(fork.name()).and_then(|o| o.max_rounds) {
                    config.max_rounds = max_rounds;
                }
                let rules = RERules::new(fork.version(), config)?
                    .with_verifier(Arc::new(ForkVotesVerifier::new(schedule.clone())));
                Ok(Arc::new(rules))
            })
            .collect::<Result<Vec<_>, ForkConfigError>>()?;

        Ok(Self { schedule, rules })
    }

    /// Build from an engine configuration's rules and overrides.
    pub fn from_config(
        forks: Vec<ForkConfig>,
        config: &EngineConfig,
    ) -> Result<Self, ForkConfigError> {
        Self::new(forks, &config.rules, &config.fork_overrides)
    }

    /// The validated schedule.
    pub fn schedule(&self) -> &Arc<ForkSchedule> {
        &self.schedule
    }

    /// Genesis fork and its rules.
    pub fn genesis(&self) -> (&ForkConfig, &Arc<RERules>) {
        (self.schedule.genesis(), &self.rules[0])
    }

    /// A fork and its rules.
    pub fn get(&self, hash: &Hash) -> Option<(&ForkConfig, &Arc<RERules>)> {
        let index = self.schedule.position(hash)?;
        Some((&self.schedule.forks()[index], &self.rules[index]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_types::{KeyPair, PublicKey, ValidatorSet, ValidatorStake, ValidatorSystemMetadata};

    fn key(seed: u64) -> PublicKey {
        KeyPair::from_seed(seed).unwrap().public_key()
    }

    fn schedule() -> ForkSchedule {
        ForkSchedule::new(vec![
            ForkConfig::fixed("genesis", RulesVersion::V1, 0),
            ForkConfig::fixed("second", RulesVersion::V1, 5),
            ForkConfig::candidate("third", RulesVersion::V2, 6000, 8),
        ])
        .unwrap()
    }

    /// Epoch-end metadata for `epoch` where validator `i` has stake `stakes[i]`
    /// and votes `votes[i]`.
    fn metadata(epoch: u64, stakes: &[u128], votes: &[Hash]) -> LedgerMetadata {
        let validators: Vec<_> = stakes
            .iter()
            .enumerate()
            .map(|(i, stake)| ValidatorStake {
                validator: key(i as u64 + 1),
                stake: *stake,
            })
            .collect();
        let mut metadata = LedgerMetadata::new(epoch, 10, 1000);
        metadata.validators_system_metadata = votes
            .iter()
            .enumerate()
            .map(|(i, data)| ValidatorSystemMetadata {
                validator: key(i as u64 + 1),
                data: *data,
            })
            .collect();
        metadata.next_validator_set = Some(ValidatorSet::new(validators));
        metadata
    }

    #[test]
    fn test_fixed_fork_activates_at_its_epoch() {
        let schedule = schedule();
        let genesis = schedule.genesis().hash();

        assert!(schedule.find_next(&genesis, &metadata(3, &[1], &[])).is_none());
        let next = schedule.find_next(&genesis, &metadata(4, &[1], &[])).unwrap();
        assert_eq!(next.name(), "second");
        assert!(schedule.find_next(&genesis, &metadata(5, &[1], &[])).is_none());
    }

    #[test]
    fn test_only_immediate_successor_can_activate() {
        let schedule = schedule();
        let genesis = schedule.genesis().hash();
        let third = fork_hash("third", RulesVersion::V2);

        // Votes for the candidate are irrelevant while genesis is active
        let m = metadata(10, &[10], &[third]);
        assert!(schedule.find_next(&genesis, &m).is_none());
    }

    #[test]
    fn test_candidate_threshold() {
        let schedule = schedule();
        let second = fork_hash("second", RulesVersion::V1);
        let third = fork_hash("third", RulesVersion::V2);
        let zero = Hash::ZERO;

        // 60 of 100 voted: exactly at the 6000/10000 threshold
        let m = metadata(9, &[60, 40], &[third, zero]);
        assert_eq!(schedule.find_next(&second, &m).map(|f| f.name()), Some("third"));

        // 59 of 100: below
        let m = metadata(9, &[59, 41], &[third, zero]);
        assert!(schedule.find_next(&second, &m).is_none());

        // Enough votes but too early
        let m = metadata(6, &[60, 40], &[third, zero]);
        assert!(schedule.find_next(&second, &m).is_none());
    }

    #[test]
    fn test_threshold_with_huge_stakes() {
        let third = fork_hash("third", RulesVersion::V2);
        let half = u128::MAX / 2;

        // 60% of a total near u128::MAX
        let yes = half / 5 * 6;
        let no = half / 5 * 4;
        assert!(has_required_stake(&third, 6000, &metadata(9, &[yes, no], &[third, Hash::ZERO])));
        assert!(!has_required_stake(&third, 6000, &metadata(9, &[yes - 1, no + 1], &[third, Hash::ZERO])));
        assert!(has_required_stake(&third, 10_000, &metadata(9, &[u128::MAX], &[third])));
    }

    #[test]
    fn test_stake_threshold_rounds_up() {
        assert_eq!(stake_threshold(100, 6000), 60);
        assert_eq!(stake_threshold(3, 5000), 2);
        assert_eq!(stake_threshold(10_001, 10_000), 10_001);
        assert_eq!(stake_threshold(u128::MAX, 10_000), u128::MAX);
    }

    #[test]
    fn test_vote_change_below_threshold_does_not_change_result() {
        let schedule = schedule();
        let second = fork_hash("second", RulesVersion::V1);
        let third = fork_hash("third", RulesVersion::V2);
        let zero = Hash::ZERO;

        let before = metadata(9, &[70, 20, 10], &[third, zero, zero]);
        let after = metadata(9, &[70, 20, 10], &[third, zero, third]);
        let result_before = schedule.find_next(&second, &before).map(|f| f.hash());
        let result_after = schedule.find_next(&second, &after).map(|f| f.hash());
        assert_eq!(result_before, Some(third));
        assert_eq!(result_before, result_after);

        // Identical inputs always give identical results
        for _ in 0..3 {
            assert_eq!(
                schedule.find_next(&second, &before).map(|f| f.hash()),
                result_before
            );
        }
    }

    #[test]
    fn test_schedule_validation() {
        assert_eq!(ForkSchedule::new(vec![]), Err(ForkConfigError::Empty));
        assert_eq!(
            ForkSchedule::new(vec![ForkConfig::fixed("a", RulesVersion::V1, 1)]),
            Err(ForkConfigError::BadGenesisFork)
        );
        assert_eq!(
            ForkSchedule::new(vec![ForkConfig::candidate("a", RulesVersion::V1, 5000, 0)]),
            Err(ForkConfigError::BadGenesisFork)
        );
        assert_eq!(
            ForkSchedule::new(vec![
                ForkConfig::fixed("a", RulesVersion::V1, 0),
                ForkConfig::fixed("a", RulesVersion::V2, 3),
            ]),
            Err(ForkConfigError::DuplicateName("a".to_string()))
        );
        assert_eq!(
            ForkSchedule::new(vec![
                ForkConfig::fixed("a", RulesVersion::V1, 0),
                ForkConfig::fixed("b", RulesVersion::V2, 0),
            ]),
            Err(ForkConfigError::NonIncreasingEpoch("b".to_string()))
        );
        assert_eq!(
            ForkSchedule::new(vec![
                ForkConfig::fixed("a", RulesVersion::V1, 0),
                ForkConfig::candidate("b", RulesVersion::V2, 5000, 3),
                ForkConfig::fixed("c", RulesVersion::V2, 9),
            ]),
            Err(ForkConfigError::CandidateNotLast("b".to_string()))
        );
        assert!(matches!(
            ForkSchedule::new(vec![
                ForkConfig::fixed("a", RulesVersion::V1, 0),
                ForkConfig::candidate("b", RulesVersion::V2, 10_001, 3),
            ]),
            Err(ForkConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_overrides_apply_before_validation() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "second".to_string(),
            ForkOverride {
                epoch: Some(2),
                max_rounds: Some(77),
            },
        );
        let forks = Forks::new(
            vec![
                ForkConfig::fixed("genesis", RulesVersion::V1, 0),
                ForkConfig::fixed("second", RulesVersion::V2, 50),
            ],
            &RulesConfig::default(),
            &overrides,
        )
        .unwrap();

        let second = fork_hash("second", RulesVersion::V2);
        let (fork, rules) = forks.get(&second).unwrap();
        assert_eq!(fork.activation_epoch(), 2);
        assert_eq!(rules.config().max_rounds, 77);
        assert_eq!(rules.version(), RulesVersion::V2);

        let (genesis, genesis_rules) = forks.genesis();
        assert_eq!(genesis.name(), "genesis");
        assert_eq!(genesis_rules.config().max_rounds, RulesConfig::default().max_rounds);
    }

    #[test]
    fn test_rules_carry_fork_votes_verifier() {
        let forks = Forks::new(
            vec![ForkConfig::fixed("genesis", RulesVersion::V1, 0)],
            &RulesConfig::default(),
            &BTreeMap::new(),
        )
        .unwrap();
        let names: Vec<_> = forks.genesis().1.verifiers().iter().map(|v| v.name()).collect();
        assert_eq!(names, vec!["epoch-proof", "fork-votes"]);
    }
}
