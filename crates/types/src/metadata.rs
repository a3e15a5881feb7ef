//! Ledger metadata produced alongside each executed batch.

use crate::{Hash, ValidatorSet, ValidatorSystemMetadata};
use sbor::prelude::*;

/// Ordered trust tiers. Procedures declare the minimum level they need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BasicSbor)]
pub enum PermissionLevel {
    /// Ordinary signed transactions.
    User,
    /// Privileged but not consensus-internal.
    Supervisor,
    /// Consensus-generated transactions (genesis, round/epoch changes).
    System,
}

/// Proof-side metadata of a batch.
///
/// Consensus supplies `epoch`, `round` and `timestamp`; batch verifiers fill
/// in the rest at epoch boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Default, BasicSbor)]
pub struct LedgerMetadata {
    /// Epoch the batch belongs to.
    pub epoch: u64,
    /// Round of the last transaction.
    pub round: u64,
    /// Proposer timestamp.
    pub timestamp: u64,
    /// Validator set for the next epoch; present only when the batch ends an epoch.
    pub next_validator_set: Option<ValidatorSet>,
    /// Fork votes reported by the next validator set.
    pub validators_system_metadata: Vec<ValidatorSystemMetadata>,
    /// Fork that activates with the next epoch.
    pub next_fork_hash: Option<Hash>,
}

impl LedgerMetadata {
    /// Metadata for a batch within `epoch`.
    pub fn new(epoch: u64, round: u64, timestamp: u64) -> Self {
        Self {
            epoch,
            round,
            timestamp,
            ..Default::default()
        }
    }

    /// Whether the batch ends an epoch.
    pub fn is_end_of_epoch(&self) -> bool {
        self.next_validator_set.is_some()
    }
}
