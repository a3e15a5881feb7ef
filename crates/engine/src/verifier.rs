//! Post-batch metadata verification.
//!
//! Verifiers run once per batch, in order, each receiving the previous one's
//! output:
//!
//! ```text
//! metadata ──► EpochProofVerifier ──► ForkVotesVerifier ──► verified metadata
//!              epoch, next set        votes, next fork
//! ```
//!
//! Any error is fatal to the whole batch.

use crate::error::MetadataError;
use crate::forks::ForkSchedule;
use crate::result::REProcessedTxn;
use std::collections::BTreeMap;
use std::sync::Arc;
use stratum_storage::{SubstateIndex, SubstateReader};
use stratum_types::{
    Hash, LedgerMetadata, PublicKey, Substate, SubstateKind, ValidatorSet, ValidatorStake,
    ValidatorSystemMetadata,
};
use tracing::debug;

/// What a verifier sees of the batch.
pub struct BatchContext<'a> {
    /// Post-batch state.
    pub reader: &'a dyn SubstateReader,
    /// Transactions of the batch.
    pub processed: &'a [REProcessedTxn],
    /// Fork active while the batch executed.
    pub current_fork: Hash,
}

impl BatchContext<'_> {
    /// Whether the batch changed the epoch.
    pub fn has_epoch_change(&self) -> bool {
        self.processed.iter().any(REProcessedTxn::is_epoch_change)
    }

    /// Epoch number after the batch.
    pub fn current_epoch(&self) -> Option<u64> {
        self.reader
            .open_indexed_cursor(&SubstateIndex::of_kind(SubstateKind::EpochData))
            .find_map(|(_, substate)| match substate {
                Substate::EpochData(epoch) => Some(epoch.epoch),
                _ => None,
            })
    }
}

/// One stage of the verifier chain.
pub trait BatchVerifier: Send + Sync {
    /// Name, for logs.
    fn name(&self) -> &'static str;

    /// Check and extend `metadata`.
    fn verify(
        &self,
        ctx: &BatchContext<'_>,
        metadata: LedgerMetadata,
    ) -> Result<LedgerMetadata, MetadataError>;
}

/// Run a verifier chain.
pub fn run_verifiers(
    verifiers: &[Arc<dyn BatchVerifier>],
    ctx: &BatchContext<'_>,
    metadata: LedgerMetadata,
) -> Result<LedgerMetadata, MetadataError> {
    verifiers.iter().try_fold(metadata, |metadata, verifier| {
        let verified = verifier.verify(ctx, metadata)?;
        debug!(verifier = verifier.name(), "Batch metadata verified");
        Ok(verified)
    })
}

// ═══════════════════════════════════════════════════════════════════════
// Epoch proof
// ═══════════════════════════════════════════════════════════════════════

/// Checks the epoch claimed by the proof and computes the next validator set.
#[derive(Debug, Clone, Copy)]
pub struct EpochProofVerifier {
    max_validators: u32,
}

impl EpochProofVerifier {
    /// Verifier electing at most `max_validators` validators.
    pub fn new(max_validators: u32) -> Self {
        Self { max_validators }
    }
}

impl BatchVerifier for EpochProofVerifier {
    fn name(&self) -> &'static str {
        "epoch-proof"
    }

    fn verify(
        &self,
        ctx: &BatchContext<'_>,
        mut metadata: LedgerMetadata,
    ) -> Result<LedgerMetadata, MetadataError> {
        if !ctx.has_epoch_change() {
            if metadata.next_validator_set.is_some() {
                return Err(MetadataError::UnexpectedValidatorSet);
            }
            return Ok(metadata);
        }

        let ended = ctx.current_epoch().unwrap_or(0).saturating_sub(1);
        if metadata.epoch != ended {
            return Err(MetadataError::EpochMismatch {
                claimed: metadata.epoch,
                actual: ended,
            });
        }

        let computed = compute_validator_set(ctx.reader, self.max_validators);
        match &metadata.next_validator_set {
            Some(claimed) if *claimed != computed => {
                return Err(MetadataError::ValidatorSetMismatch)
            }
            _ => {}
        }
        debug!(epoch = ended, validators = computed.len(), "Computed next validator set");
        metadata.next_validator_set = Some(computed);
        Ok(metadata)
    }
}

/// Elect the validator set from live state: registered validators with
/// delegated stake, largest stake first (ties by key), at most `max_validators`.
pub fn compute_validator_set(reader: &dyn SubstateReader, max_validators: u32) -> ValidatorSet {
    let mut stakes: BTreeMap<PublicKey, u128> = BTreeMap::new();
    for (_, substate) in reader.open_indexed_cursor(&SubstateIndex::of_kind(SubstateKind::StakeOwnership)) {
        if let Substate::StakeOwnership(stake) = substate {
            let total = stakes.entry(stake.validator).or_default();
            *total = total.saturating_add(stake.amount);
        }
    }

    let mut candidates: Vec<ValidatorStake> = reader
        .open_indexed_cursor(&SubstateIndex::of_kind(SubstateKind::ValidatorRegistered))
        .filter_map(|(_, substate)| match substate {
            Substate::ValidatorRegistered(r) if r.registered => Some(r.validator),
            _ => None,
        })
        .filter_map(|validator| {
            let stake = stakes.get(&validator).copied().unwrap_or(0);
            (stake > 0).then_some(ValidatorStake { validator, stake })
        })
        .collect();

    candidates.sort_by(|a, b| b.stake.cmp(&a.stake).then(a.validator.cmp(&b.validator)));
    candidates.truncate(max_validators as usize);
    ValidatorSet::new(candidates)
}

// ═══════════════════════════════════════════════════════════════════════
// Fork votes
// ═══════════════════════════════════════════════════════════════════════

/// Records the next validators' fork votes and the fork they activate.
///
/// Only acts at epoch boundaries, after the next validator set is known.
/// Never modifies fields set by earlier verifiers.
#[derive(Debug, Clone)]
pub struct ForkVotesVerifier {
    schedule: Arc<ForkSchedule>,
}

impl ForkVotesVerifier {
    /// Verifier over a fork schedule.
    pub fn new(schedule: Arc<ForkSchedule>) -> Self {
        Self { schedule }
    }
}

impl BatchVerifier for ForkVotesVerifier {
    fn name(&self) -> &'static str {
        "fork-votes"
    }

    fn verify(
        &self,
        ctx: &BatchContext<'_>,
        base: LedgerMetadata,
    ) -> Result<LedgerMetadata, MetadataError> {
        let Some(validators) = &base.next_validator_set else {
            return Ok(base);
        };

        let mut metadata = base.clone();
        metadata.validators_system_metadata = validators
            .keys()
            .map(|validator| ValidatorSystemMetadata {
                validator: *validator,
                data: reported_fork(ctx.reader, validator),
            })
            .collect();

        let computed = self
            .schedule
            .find_next(&ctx.current_fork, &metadata)
            .map(|fork| fork.hash());
        if metadata.next_fork_hash.is_some() && metadata.next_fork_hash != computed {
            return Err(MetadataError::ForkHashMismatch {
                claimed: metadata.next_fork_hash,
                computed,
            });
        }
        metadata.next_fork_hash = computed;
        check_base_untouched(&base, &metadata)?;
        Ok(metadata)
    }
}

/// Fails if anything outside the fork vote fields differs from `base`.
fn check_base_untouched(
    base: &LedgerMetadata,
    extended: &LedgerMetadata,
) -> Result<(), MetadataError> {
    let untouched = base.epoch == extended.epoch
        && base.round == extended.round
        && base.timestamp == extended.timestamp
        && base.next_validator_set == extended.next_validator_set;
    if untouched {
        Ok(())
    } else {
        Err(MetadataError::BaseMetadataModified)
    }
}

fn reported_fork(reader: &dyn SubstateReader, validator: &PublicKey) -> Hash {
    reader
        .open_indexed_cursor(&SubstateIndex::with_prefix(
            SubstateKind::ValidatorSystemMetadata,
            validator.as_bytes().to_vec(),
        ))
        .find_map(|(_, substate)| match substate {
            Substate::ValidatorSystemMetadata(m) if m.validator == *validator => Some(m.data),
            _ => None,
        })
        .unwrap_or(Hash::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forks::{fork_hash, ForkConfig};
    use crate::rule_set::RulesVersion;
    use stratum_storage::test_helpers::{account, txn_substate_id, MapReader};
    use stratum_types::{
        EpochData, KeyPair, StakeOwnership, Txn, TxnBody, TxAction, ValidatorRegistered,
    };

    fn key(seed: u64) -> PublicKey {
        KeyPair::from_seed(seed).unwrap().public_key()
    }

    /// State after an epoch change into epoch 1: validators 1..=3 registered,
    /// stakes 30/20/10, validator 4 staked but unregistered.
    fn state(votes: &[(u64, Hash)]) -> MapReader {
        let mut ups = vec![(
            txn_substate_id(1, 0),
            Substate::EpochData(EpochData { epoch: 1 }),
        )];
        let mut index = 1;
        let mut push = |substate: Substate| {
            ups.push((txn_substate_id(1, index), substate));
            index += 1;
        };
        for (seed, stake) in [(1u64, 30u128), (2, 20), (3, 10), (4, 50)] {
            push(Substate::ValidatorRegistered(ValidatorRegistered {
                validator: key(seed),
                registered: seed != 4,
            }));
            push(Substate::StakeOwnership(StakeOwnership {
                validator: key(seed),
                owner: account(9),
                amount: stake,
            }));
        }
        for (seed, data) in votes {
            push(Substate::ValidatorSystemMetadata(ValidatorSystemMetadata {
                validator: key(*seed),
                data: *data,
            }));
        }
        MapReader::with(ups)
    }

    fn processed(actions: Vec<TxAction>) -> Vec<REProcessedTxn> {
        vec![REProcessedTxn {
            txn: Txn::unsigned(TxnBody {
                instructions: vec![],
                message: None,
            }),
            signer: None,
            updates: vec![],
            actions,
            fee_paid: 0,
        }]
    }

    fn epoch_change() -> Vec<REProcessedTxn> {
        processed(vec![TxAction::NextEpoch { timestamp: 5 }])
    }

    fn schedule() -> Arc<ForkSchedule> {
        Arc::new(
            ForkSchedule::new(vec![
                ForkConfig::fixed("genesis", RulesVersion::V1, 0),
                ForkConfig::candidate("next", RulesVersion::V2, 5000, 1),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_validator_set_ordering_and_truncation() {
        let reader = state(&[]);
        let set = compute_validator_set(&reader, 2);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&key(1)));
        assert!(set.contains(&key(2)));
        assert!(!set.contains(&key(3)));
        // Unregistered validators are never elected
        assert!(!compute_validator_set(&reader, 10).contains(&key(4)));
        assert_eq!(compute_validator_set(&reader, 10).total_stake(), 60);
    }

    #[test]
    fn test_epoch_proof_requires_matching_epoch() {
        let reader = state(&[]);
        let processed = epoch_change();
        let ctx = BatchContext {
            reader: &reader,
            processed: &processed,
            current_fork: Hash::ZERO,
        };
        let verifier = EpochProofVerifier::new(100);

        let verified = verifier.verify(&ctx, LedgerMetadata::new(0, 9, 5)).unwrap();
        assert_eq!(verified.next_validator_set.unwrap().len(), 3);

        assert_eq!(
            verifier.verify(&ctx, LedgerMetadata::new(3, 9, 5)),
            Err(MetadataError::EpochMismatch {
                claimed: 3,
                actual: 0
            })
        );

        let mut wrong = LedgerMetadata::new(0, 9, 5);
        wrong.next_validator_set = Some(ValidatorSet::new(vec![]));
        assert_eq!(
            verifier.verify(&ctx, wrong),
            Err(MetadataError::ValidatorSetMismatch)
        );
    }

    #[test]
    fn test_epoch_proof_rejects_unexpected_set() {
        let reader = state(&[]);
        let processed = processed(vec![]);
        let ctx = BatchContext {
            reader: &reader,
            processed: &processed,
            current_fork: Hash::ZERO,
        };
        let mut metadata = LedgerMetadata::new(0, 3, 5);
        metadata.next_validator_set = Some(ValidatorSet::new(vec![]));
        assert_eq!(
            EpochProofVerifier::new(100).verify(&ctx, metadata),
            Err(MetadataError::UnexpectedValidatorSet)
        );
    }

    #[test]
    fn test_fork_votes_verifier_leaves_base_output_untouched() {
        let next = fork_hash("next", RulesVersion::V2);
        let reader = state(&[(1, next)]);
        let processed = epoch_change();
        let ctx = BatchContext {
            reader: &reader,
            processed: &processed,
            current_fork: fork_hash("genesis", RulesVersion::V1),
        };
        let verifiers: Vec<Arc<dyn BatchVerifier>> = vec![
            Arc::new(EpochProofVerifier::new(100)),
            Arc::new(ForkVotesVerifier::new(schedule())),
        ];

        let base = verifiers[0]
            .verify(&ctx, LedgerMetadata::new(0, 9, 5))
            .unwrap();
        let full = run_verifiers(&verifiers, &ctx, LedgerMetadata::new(0, 9, 5)).unwrap();

        assert_eq!(full.epoch, base.epoch);
        assert_eq!(full.round, base.round);
        assert_eq!(full.timestamp, base.timestamp);
        assert_eq!(full.next_validator_set, base.next_validator_set);

        // 30 of 60 voted: exactly the 5000/10000 threshold
        assert_eq!(full.next_fork_hash, Some(next));
        assert_eq!(full.validators_system_metadata.len(), 3);
        assert_eq!(
            full.validators_system_metadata
                .iter()
                .filter(|m| m.data.is_zero())
                .count(),
            2
        );
    }

    #[test]
    fn test_base_modification_detected() {
        let mut base = LedgerMetadata::new(0, 9, 5);
        base.next_validator_set = Some(ValidatorSet::new(vec![]));

        let mut extended = base.clone();
        extended.next_fork_hash = Some(Hash::from_bytes(b"fork"));
        assert_eq!(check_base_untouched(&base, &extended), Ok(()));

        extended.round = 10;
        assert_eq!(
            check_base_untouched(&base, &extended),
            Err(MetadataError::BaseMetadataModified)
        );
    }

    #[test]
    fn test_fork_votes_verifier_idle_without_epoch_change() {
        let reader = state(&[(1, fork_hash("next", RulesVersion::V2))]);
        let processed = processed(vec![]);
        let ctx = BatchContext {
            reader: &reader,
            processed: &processed,
            current_fork: fork_hash("genesis", RulesVersion::V1),
        };
        let metadata = LedgerMetadata::new(0, 4, 5);
        let verified = ForkVotesVerifier::new(schedule())
            .verify(&ctx, metadata.clone())
            .unwrap();
        assert_eq!(verified, metadata);
    }

    #[test]
    fn test_fork_votes_verifier_rejects_wrong_claim() {
        let reader = state(&[]);
        let processed = epoch_change();
        let ctx = BatchContext {
            reader: &reader,
            processed: &processed,
            current_fork: fork_hash("genesis", RulesVersion::V1),
        };
        let mut metadata = EpochProofVerifier::new(100)
            .verify(&ctx, LedgerMetadata::new(0, 9, 5))
            .unwrap();
        metadata.next_fork_hash = Some(fork_hash("next", RulesVersion::V2));
        assert!(matches!(
            ForkVotesVerifier::new(schedule()).verify(&ctx, metadata),
            Err(MetadataError::ForkHashMismatch { computed: None, .. })
        ));
    }
}
