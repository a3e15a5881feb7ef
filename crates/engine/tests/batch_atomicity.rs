//! Failure handling within a batch under both atomicity policies.

mod fixtures;

use fixtures::{account, single_fork, transfer, TestLedger};
use stratum_engine::{
    BatchAtomicity, CmErrorCode, EngineConfig, EngineError, GenesisConfig, MetadataError,
    TxnError, TxnParseError,
};
use stratum_types::{LedgerMetadata, PermissionLevel, ValidatorSet};

fn ledger(atomicity: BatchAtomicity) -> TestLedger {
    let genesis = GenesisConfig::test_minimal().with_balance(account(1), 100);
    TestLedger::with(
        single_fork(),
        EngineConfig::default().with_batch_atomicity(atomicity),
        &genesis,
    )
}

#[test]
fn test_all_or_nothing_discards_earlier_transactions() {
    let mut ledger = ledger(BatchAtomicity::AllOrNothing);
    let txn_count = ledger.store().txn_count();

    let first = ledger.sign(transfer(1, 2, 40), 1);
    let second = ledger.sign(transfer(1, 3, 30), 1);
    let err = ledger.submit(vec![first.clone(), second]).unwrap_err();

    assert!(matches!(
        err,
        EngineError::Transaction { index: 1, source: TxnError::Constraint(ref cm), .. }
            if cm.code == CmErrorCode::MissingSubstate
    ));
    assert_eq!(ledger.balance(1), 100);
    assert_eq!(ledger.balance(2), 0);
    assert_eq!(ledger.store().txn_count(), txn_count);
    assert!(!ledger.store().contains_txn(&first.id()));
}

#[test]
fn test_per_transaction_commits_the_rest() {
    let mut ledger = ledger(BatchAtomicity::PerTransaction);

    let first = ledger.sign(transfer(1, 2, 40), 1);
    let second = ledger.sign(transfer(1, 3, 30), 1);
    let outcome = ledger
        .submit(vec![first.clone(), second.clone()])
        .unwrap();

    assert_eq!(outcome.len(), 1);
    assert_eq!(outcome.processed[0].txn_id(), first.id());
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].index, 1);
    assert_eq!(outcome.rejected[0].txn_id, second.id());
    assert!(matches!(
        &outcome.rejected[0].error,
        TxnError::Constraint(cm) if cm.code == CmErrorCode::MissingSubstate
    ));

    assert_eq!(ledger.balance(1), 60);
    assert_eq!(ledger.balance(2), 40);
    assert_eq!(ledger.balance(3), 0);
    assert!(!ledger.store().contains_txn(&second.id()));
}

#[test]
fn test_per_transaction_later_transactions_see_earlier_effects() {
    let mut ledger = ledger(BatchAtomicity::PerTransaction);

    let bad = ledger.sign(transfer(1, 2, 10), 3);
    let good = ledger.sign(transfer(1, 2, 10), 1);
    let outcome = ledger.submit(vec![bad, good]).unwrap();

    assert_eq!(outcome.rejected[0].index, 0);
    assert_eq!(outcome.processed.len(), 1);
    assert_eq!(ledger.balance(2), 10);
}

#[test]
fn test_raw_batch_undecodable_blob() {
    let mut strict = ledger(BatchAtomicity::AllOrNothing);
    let valid = strict.sign(transfer(1, 2, 5), 1);
    let blobs = vec![valid.bytes().to_vec(), vec![0xff; 3]];

    let err = strict
        .engine
        .execute_raw(blobs.clone(), None, PermissionLevel::User)
        .unwrap_err();
    assert!(matches!(err, EngineError::Undecodable { index: 1, .. }));
    assert_eq!(strict.balance(2), 0);

    let mut lenient = ledger(BatchAtomicity::PerTransaction);
    let outcome = lenient
        .engine
        .execute_raw(blobs, None, PermissionLevel::User)
        .unwrap();
    assert_eq!(outcome.len(), 1);
    assert_eq!(outcome.rejected[0].index, 1);
    assert!(matches!(
        outcome.rejected[0].error,
        TxnError::Parse(TxnParseError::Decode(_))
    ));
    assert_eq!(lenient.balance(2), 5);
}

#[test]
fn test_metadata_failure_aborts_batch_in_both_modes() {
    for atomicity in [BatchAtomicity::AllOrNothing, BatchAtomicity::PerTransaction] {
        let mut ledger = ledger(atomicity);
        let txn = ledger.sign(transfer(1, 2, 40), 1);

        // A proof claiming an epoch change for a batch that has none.
        let mut metadata = LedgerMetadata::new(0, 1, 2);
        metadata.next_validator_set = Some(ValidatorSet::new(Vec::new()));

        let err = ledger
            .engine
            .execute(vec![txn], Some(metadata), PermissionLevel::User)
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::Metadata(MetadataError::UnexpectedValidatorSet)
        );
        assert_eq!(ledger.balance(1), 100, "{:?}", atomicity);
        assert!(ledger.engine.last_metadata().is_none());
    }
}

#[test]
fn test_proof_without_epoch_change_is_stored() {
    let mut ledger = ledger(BatchAtomicity::AllOrNothing);
    let txn = ledger.sign(transfer(1, 2, 40), 1);
    let metadata = LedgerMetadata::new(0, 1, 2);

    let outcome = ledger
        .engine
        .execute(vec![txn], Some(metadata.clone()), PermissionLevel::User)
        .unwrap();

    assert_eq!(outcome.metadata, Some(metadata.clone()));
    assert_eq!(outcome.fork_switched, None);
    assert_eq!(ledger.engine.last_metadata(), Some(metadata));
}
