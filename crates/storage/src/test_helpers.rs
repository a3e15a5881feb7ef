//! Shared test helpers for storage crate tests.
//!
//! Provides substate builders and a minimal map-backed reader so that the
//! overlay tests here and the backend tests in `stratum-storage-memory` share
//! a single source of truth.

use crate::{SubstateCursor, SubstateIndex, SubstateReader};
use std::collections::{BTreeMap, BTreeSet};
use stratum_types::{Hash, KeyPair, REAddr, Substate, SubstateId, Tokens};

/// Account address for a deterministic test key.
pub fn account(seed: u64) -> REAddr {
    REAddr::of_account(
        KeyPair::from_seed(seed)
            .expect("test seeds are non-zero")
            .public_key(),
    )
}

/// A native token balance held by `account(seed)`.
pub fn native_tokens(seed: u64, amount: u128) -> Substate {
    Substate::Tokens(Tokens {
        holder: account(seed),
        resource: REAddr::Native,
        amount,
    })
}

/// Build a transaction-scoped substate id from a seed.
pub fn txn_substate_id(seed: u8, index: u32) -> SubstateId {
    SubstateId::of_txn(Hash::from_bytes(&[seed; 32]), index)
}

/// A read-only store backed by plain maps.
#[derive(Debug, Default)]
pub struct MapReader {
    /// Live substates.
    pub ups: BTreeMap<SubstateId, Substate>,
    /// Consumed ids.
    pub downs: BTreeSet<SubstateId>,
    /// Recorded fork.
    pub fork_hash: Option<Hash>,
}

impl MapReader {
    /// Reader holding the given live substates.
    pub fn with(ups: Vec<(SubstateId, Substate)>) -> Self {
        Self {
            ups: ups.into_iter().collect(),
            ..Default::default()
        }
    }
}

impl SubstateReader for MapReader {
    fn load_up_substate(&self, id: &SubstateId) -> Option<Substate> {
        self.ups.get(id).cloned()
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.downs.contains(id)
    }

    fn open_indexed_cursor(&self, index: &SubstateIndex) -> SubstateCursor {
        SubstateCursor::new(
            self.ups
                .iter()
                .filter(|(_, substate)| index.matches(substate))
                .map(|(id, substate)| (*id, substate.clone()))
                .collect(),
        )
    }

    fn current_fork_hash(&self) -> Option<Hash> {
        self.fork_hash
    }
}
