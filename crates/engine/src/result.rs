//! Execution result types.

use crate::error::TxnError;
use stratum_storage::StateUpdate;
use stratum_types::{Hash, LedgerMetadata, PublicKey, Txn, TxAction};

/// A transaction that executed successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct REProcessedTxn {
    /// The transaction.
    pub txn: Txn,
    /// Verified signer, if signed.
    pub signer: Option<PublicKey>,
    /// Substate changes, in instruction order.
    pub updates: Vec<StateUpdate>,
    /// Decoded high-level actions, in particle group order.
    pub actions: Vec<TxAction>,
    /// Native tokens paid as fee.
    pub fee_paid: u128,
}

impl REProcessedTxn {
    /// Transaction id.
    pub fn txn_id(&self) -> Hash {
        self.txn.id()
    }

    /// Number of substates spun up.
    pub fn up_count(&self) -> usize {
        self.updates.iter().filter(|u| u.is_up()).count()
    }

    /// Whether any decoded action is an epoch change.
    pub fn is_epoch_change(&self) -> bool {
        self.actions
            .iter()
            .any(|action| matches!(action, TxAction::NextEpoch { .. }))
    }
}

/// A transaction skipped under per-transaction atomicity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedTxn {
    /// Position in the batch.
    pub index: usize,
    /// Transaction id (hash of the raw bytes when they could not be decoded).
    pub txn_id: Hash,
    /// Cause.
    pub error: TxnError,
}

/// Output of executing a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Committed transactions, in batch order.
    pub processed: Vec<REProcessedTxn>,
    /// Skipped transactions. Always empty under all-or-nothing atomicity.
    pub rejected: Vec<RejectedTxn>,
    /// Verified metadata, when the batch carried a proof.
    pub metadata: Option<LedgerMetadata>,
    /// Fork activated by this batch.
    pub fork_switched: Option<Hash>,
}

impl BatchOutcome {
    /// Number of committed transactions.
    pub fn len(&self) -> usize {
        self.processed.len()
    }

    /// Whether nothing was committed.
    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }

    /// All decoded actions of the batch, in order.
    pub fn actions(&self) -> impl Iterator<Item = &TxAction> {
        self.processed.iter().flat_map(|txn| txn.actions.iter())
    }
}
