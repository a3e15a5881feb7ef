//! Storage traits consumed by the engine.

use crate::CommitBatch;
use crate::StateUpdate;
use stratum_types::{Hash, LedgerMetadata, REAddr, Substate, SubstateId, SubstateKind};

/// Selects live substates of one kind whose index key starts with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubstateIndex {
    /// Kind to scan.
    pub kind: SubstateKind,
    /// Index key prefix; empty matches every substate of the kind.
    pub prefix: Vec<u8>,
}

impl SubstateIndex {
    /// Every live substate of a kind.
    pub fn of_kind(kind: SubstateKind) -> Self {
        Self {
            kind,
            prefix: Vec::new(),
        }
    }

    /// Substates of a kind under an index key prefix.
    pub fn with_prefix(kind: SubstateKind, prefix: Vec<u8>) -> Self {
        Self { kind, prefix }
    }

    /// Whether a substate falls under this index.
    pub fn matches(&self, substate: &Substate) -> bool {
        substate.kind() == self.kind && substate.index_key().starts_with(&self.prefix)
    }
}

/// A point-in-time, ordered result of an index scan.
///
/// Entries are sorted by `(index key, substate id)`. The cursor is a copy:
/// writes made after it was opened are not observed, and each call to
/// [`SubstateReader::open_indexed_cursor`] starts from the beginning.
#[derive(Debug, Clone, Default)]
pub struct SubstateCursor {
    entries: std::vec::IntoIter<(SubstateId, Substate)>,
}

impl SubstateCursor {
    /// Build a cursor, sorting the entries into index order.
    pub fn new(mut entries: Vec<(SubstateId, Substate)>) -> Self {
        entries.sort_by_cached_key(|(id, substate)| (substate.index_key(), *id));
        Self {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for SubstateCursor {
    type Item = (SubstateId, Substate);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

/// Read side of substate storage.
///
/// All reads within one batch must observe a consistent snapshot that
/// includes the effects of earlier transactions in that batch. Committed
/// stores satisfy this trivially; [`crate::SubstateOverlay`] provides it
/// during execution.
pub trait SubstateReader {
    /// Load a live (`Up`) substate.
    fn load_up_substate(&self, id: &SubstateId) -> Option<Substate>;

    /// Whether an id has been spun down. Virtual ids are down once claimed;
    /// materialized ids are down once consumed.
    fn is_virtual_down(&self, id: &SubstateId) -> bool;

    /// Ordered scan of live substates.
    fn open_indexed_cursor(&self, index: &SubstateIndex) -> SubstateCursor;

    /// Hash of the active fork, if one has been recorded.
    fn current_fork_hash(&self) -> Option<Hash>;

    /// Load the token resource definition at an address.
    fn load_by_address(&self, addr: &REAddr) -> Option<Substate> {
        self.open_indexed_cursor(&SubstateIndex::with_prefix(
            SubstateKind::TokenResource,
            addr.to_bytes(),
        ))
        .map(|(_, substate)| substate)
        .find(|substate| substate.resource_addr() == Some(*addr))
    }
}

/// Write side of substate storage.
///
/// All methods take `&self`; implementations use interior mutability and
/// serialize writers themselves.
pub trait EngineStore: SubstateReader + Send + Sync {
    /// Record a committed transaction and apply its state updates in order.
    fn store_txn(&self, txn_id: Hash, updates: &[StateUpdate]);

    /// Record the metadata of the last committed batch.
    fn store_metadata(&self, metadata: &LedgerMetadata);

    /// Record the active fork.
    fn store_current_fork_hash(&self, fork_hash: Hash);

    /// Metadata of the last committed batch.
    fn last_metadata(&self) -> Option<LedgerMetadata>;

    /// Apply a whole batch.
    ///
    /// The default applies each part in sequence. Backends that can make the
    /// batch atomic with respect to readers should override this.
    fn commit(&self, batch: CommitBatch) {
        for txn in &batch.txns {
            self.store_txn(txn.txn_id, &txn.updates);
        }
        if let Some(metadata) = &batch.metadata {
            self.store_metadata(metadata);
        }
        if let Some(fork_hash) = batch.fork_hash {
            self.store_current_fork_hash(fork_hash);
        }
    }
}
