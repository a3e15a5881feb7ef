//! State updates and commit batches.

use stratum_types::{Hash, LedgerMetadata, Spin, Substate, SubstateId};

/// One spin change caused by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    /// Affected substate.
    pub id: SubstateId,
    /// Its value (for downs, the value that was consumed).
    pub substate: Substate,
    /// New spin.
    pub spin: Spin,
}

impl StateUpdate {
    /// A substate coming into existence.
    pub fn up(id: SubstateId, substate: Substate) -> Self {
        Self {
            id,
            substate,
            spin: Spin::Up,
        }
    }

    /// A substate being consumed.
    pub fn down(id: SubstateId, substate: Substate) -> Self {
        Self {
            id,
            substate,
            spin: Spin::Down,
        }
    }

    /// Whether this update creates a substate.
    pub fn is_up(&self) -> bool {
        self.spin == Spin::Up
    }
}

/// A transaction's effects, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTxn {
    /// Transaction id.
    pub txn_id: Hash,
    /// Updates in instruction order.
    pub updates: Vec<StateUpdate>,
}

/// Everything one executed batch writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    /// Transactions in execution order.
    pub txns: Vec<CommittedTxn>,
    /// Post-batch metadata, when the batch carried a proof.
    pub metadata: Option<LedgerMetadata>,
    /// New active fork, when the batch activated one.
    pub fork_hash: Option<Hash>,
}

impl CommitBatch {
    /// Whether the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.txns.is_empty() && self.metadata.is_none() && self.fork_hash.is_none()
    }
}
