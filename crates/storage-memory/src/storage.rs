//! `im`-backed substate store.

use im::{OrdMap, OrdSet};
use parking_lot::RwLock;
use std::sync::Arc;
use stratum_storage::{
    CommitBatch, EngineStore, StateUpdate, SubstateCursor, SubstateIndex, SubstateReader,
};
use stratum_types::{Hash, LedgerMetadata, Spin, Substate, SubstateId};
use tracing::{debug, trace};

// ═══════════════════════════════════════════════════════════════════════
// Shared state
// ═══════════════════════════════════════════════════════════════════════

/// Everything the store holds. Cloning is O(1) thanks to structural sharing.
#[derive(Clone, Default)]
struct StoreState {
    /// Live (`Up`) substates.
    live: OrdMap<SubstateId, Substate>,

    /// Composite key `kind ‖ index key ‖ id` → id, for ordered prefix scans.
    index: OrdMap<Vec<u8>, SubstateId>,

    /// Every id ever spun down, virtual or materialized.
    downs: OrdSet<SubstateId>,

    /// Committed transactions and their updates.
    txns: OrdMap<Hash, Arc<Vec<StateUpdate>>>,

    /// Number of committed transactions.
    txn_count: u64,

    /// Metadata of the last batch that carried one.
    metadata: Option<LedgerMetadata>,

    /// Active fork.
    fork_hash: Option<Hash>,
}

fn index_key(substate: &Substate, id: &SubstateId) -> Vec<u8> {
    let mut key = index_prefix(&SubstateIndex::with_prefix(
        substate.kind(),
        substate.index_key(),
    ));
    match id {
        SubstateId::Txn { txn_id, index } => {
            key.push(0);
            key.extend_from_slice(txn_id.as_bytes());
            key.extend_from_slice(&index.to_be_bytes());
        }
        SubstateId::Virtual(hash) => {
            key.push(1);
            key.extend_from_slice(hash.as_bytes());
        }
    }
    key
}

fn index_prefix(index: &SubstateIndex) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(1 + index.prefix.len());
    prefix.push(index.kind.tag());
    prefix.extend_from_slice(&index.prefix);
    prefix
}

impl StoreState {
    fn apply(&mut self, txn_id: Hash, updates: &[StateUpdate]) {
        for update in updates {
            match update.spin {
                Spin::Up => {
                    self.index
                        .insert(index_key(&update.substate, &update.id), update.id);
                    self.live.insert(update.id, update.substate.clone());
                }
                Spin::Down => {
                    if let Some(substate) = self.live.remove(&update.id) {
                        self.index.remove(&index_key(&substate, &update.id));
                    }
                    self.downs.insert(update.id);
                }
            }
        }
        self.txns.insert(txn_id, Arc::new(updates.to_vec()));
        self.txn_count += 1;
        trace!(%txn_id, updates = updates.len(), "Stored transaction");
    }

    fn load_up_substate(&self, id: &SubstateId) -> Option<Substate> {
        self.live.get(id).cloned()
    }

    fn scan(&self, index: &SubstateIndex) -> SubstateCursor {
        let prefix = index_prefix(index);
        let entries = self
            .index
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(_, id)| self.live.get(id).map(|s| (*id, s.clone())))
            .collect();
        SubstateCursor::new(entries)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════

/// In-memory engine store.
///
/// A single `RwLock` guards all state. Writers hold it for the duration of a
/// [`EngineStore::commit`], so concurrent readers never observe half a batch.
/// Cloning the store shares the same underlying state.
#[derive(Clone, Default)]
pub struct InMemoryEngineStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryEngineStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time view, isolated from later commits.
    pub fn snapshot(&self) -> InMemorySnapshot {
        InMemorySnapshot {
            state: self.state.read().clone(),
        }
    }

    /// Number of live substates.
    pub fn len(&self) -> usize {
        self.state.read().live.len()
    }

    /// Whether no substate is live.
    pub fn is_empty(&self) -> bool {
        self.state.read().live.is_empty()
    }

    /// Number of committed transactions.
    pub fn txn_count(&self) -> u64 {
        self.state.read().txn_count
    }

    /// Updates recorded for a committed transaction.
    pub fn txn_updates(&self, txn_id: &Hash) -> Option<Arc<Vec<StateUpdate>>> {
        self.state.read().txns.get(txn_id).cloned()
    }

    /// Whether a transaction has been committed.
    pub fn contains_txn(&self, txn_id: &Hash) -> bool {
        self.state.read().txns.contains_key(txn_id)
    }
}

impl SubstateReader for InMemoryEngineStore {
    fn load_up_substate(&self, id: &SubstateId) -> Option<Substate> {
        self.state.read().load_up_substate(id)
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.state.read().downs.contains(id)
    }

    fn open_indexed_cursor(&self, index: &SubstateIndex) -> SubstateCursor {
        self.state.read().scan(index)
    }

    fn current_fork_hash(&self) -> Option<Hash> {
        self.state.read().fork_hash
    }
}

impl EngineStore for InMemoryEngineStore {
    fn store_txn(&self, txn_id: Hash, updates: &[StateUpdate]) {
        self.state.write().apply(txn_id, updates);
    }

    fn store_metadata(&self, metadata: &LedgerMetadata) {
        self.state.write().metadata = Some(metadata.clone());
    }

    fn store_current_fork_hash(&self, fork_hash: Hash) {
        self.state.write().fork_hash = Some(fork_hash);
    }

    fn last_metadata(&self) -> Option<LedgerMetadata> {
        self.state.read().metadata.clone()
    }

    fn commit(&self, batch: CommitBatch) {
        let mut state = self.state.write();
        for txn in &batch.txns {
            state.apply(txn.txn_id, &txn.updates);
        }
        if let Some(metadata) = batch.metadata {
            state.metadata = Some(metadata);
        }
        if let Some(fork_hash) = batch.fork_hash {
            state.fork_hash = Some(fork_hash);
        }
        debug!(
            txns = batch.txns.len(),
            live = state.live.len(),
            "Committed batch"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════════════════════════════════

/// Immutable view of an [`InMemoryEngineStore`] at one point in time.
#[derive(Clone)]
pub struct InMemorySnapshot {
    state: StoreState,
}

impl InMemorySnapshot {
    /// Metadata at snapshot time.
    pub fn last_metadata(&self) -> Option<&LedgerMetadata> {
        self.state.metadata.as_ref()
    }
}

impl SubstateReader for InMemorySnapshot {
    fn load_up_substate(&self, id: &SubstateId) -> Option<Substate> {
        self.state.load_up_substate(id)
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.state.downs.contains(id)
    }

    fn open_indexed_cursor(&self, index: &SubstateIndex) -> SubstateCursor {
        self.state.scan(index)
    }

    fn current_fork_hash(&self) -> Option<Hash> {
        self.state.fork_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_storage::test_helpers::{account, native_tokens, txn_substate_id};
    use stratum_storage::CommittedTxn;
    use stratum_types::{REAddr, SubstateKind, TokenResource};

    #[test]
    fn test_basic_substate_operations() {
        let store = InMemoryEngineStore::new();
        let id = txn_substate_id(1, 0);

        assert!(store.load_up_substate(&id).is_none());

        store.store_txn(
            Hash::from_bytes(b"t1"),
            &[StateUpdate::up(id, native_tokens(1, 100))],
        );
        assert_eq!(store.load_up_substate(&id), Some(native_tokens(1, 100)));
        assert!(!store.is_virtual_down(&id));

        store.store_txn(
            Hash::from_bytes(b"t2"),
            &[StateUpdate::down(id, native_tokens(1, 100))],
        );
        assert!(store.load_up_substate(&id).is_none());
        assert!(store.is_virtual_down(&id));
        assert_eq!(store.txn_count(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_isolation() {
        let store = InMemoryEngineStore::new();
        let id = txn_substate_id(1, 0);
        store.store_txn(
            Hash::from_bytes(b"t1"),
            &[StateUpdate::up(id, native_tokens(1, 100))],
        );

        let snapshot = store.snapshot();
        store.store_txn(
            Hash::from_bytes(b"t2"),
            &[StateUpdate::down(id, native_tokens(1, 100))],
        );

        assert_eq!(snapshot.load_up_substate(&id), Some(native_tokens(1, 100)));
        assert!(store.load_up_substate(&id).is_none());
    }

    #[test]
    fn test_indexed_cursor_filters_by_prefix() {
        let store = InMemoryEngineStore::new();
        store.store_txn(
            Hash::from_bytes(b"t1"),
            &[
                StateUpdate::up(txn_substate_id(1, 0), native_tokens(1, 10)),
                StateUpdate::up(txn_substate_id(1, 1), native_tokens(2, 20)),
                StateUpdate::up(txn_substate_id(1, 2), native_tokens(1, 30)),
            ],
        );

        let index = SubstateIndex::with_prefix(SubstateKind::Tokens, account(1).to_bytes());
        let amounts: Vec<u128> = store
            .open_indexed_cursor(&index)
            .filter_map(|(_, s)| match s {
                Substate::Tokens(t) => Some(t.amount),
                _ => None,
            })
            .collect();
        assert_eq!(amounts, vec![10, 30]);

        let all = store.open_indexed_cursor(&SubstateIndex::of_kind(SubstateKind::Tokens));
        assert_eq!(all.count(), 3);
    }

    #[test]
    fn test_cursor_is_not_live() {
        let store = InMemoryEngineStore::new();
        let id = txn_substate_id(1, 0);
        store.store_txn(
            Hash::from_bytes(b"t1"),
            &[StateUpdate::up(id, native_tokens(1, 10))],
        );

        let cursor = store.open_indexed_cursor(&SubstateIndex::of_kind(SubstateKind::Tokens));
        store.store_txn(
            Hash::from_bytes(b"t2"),
            &[StateUpdate::down(id, native_tokens(1, 10))],
        );
        assert_eq!(cursor.count(), 1);
    }

    #[test]
    fn test_load_by_address() {
        let store = InMemoryEngineStore::new();
        let resource = Substate::TokenResource(TokenResource {
            addr: REAddr::Native,
            granularity: 1,
            is_mutable: true,
            owner: None,
        });
        store.store_txn(
            Hash::from_bytes(b"t1"),
            &[StateUpdate::up(txn_substate_id(1, 0), resource.clone())],
        );

        assert_eq!(store.load_by_address(&REAddr::Native), Some(resource));
        assert_eq!(store.load_by_address(&account(1)), None);
    }

    #[test]
    fn test_commit_batch_applies_everything() {
        let store = InMemoryEngineStore::new();
        let fork = Hash::from_bytes(b"fork");
        store.commit(CommitBatch {
            txns: vec![CommittedTxn {
                txn_id: Hash::from_bytes(b"t1"),
                updates: vec![StateUpdate::up(txn_substate_id(1, 0), native_tokens(1, 5))],
            }],
            metadata: Some(LedgerMetadata::new(1, 2, 3)),
            fork_hash: Some(fork),
        });

        assert_eq!(store.len(), 1);
        assert_eq!(store.current_fork_hash(), Some(fork));
        assert_eq!(store.last_metadata(), Some(LedgerMetadata::new(1, 2, 3)));
        assert!(store.contains_txn(&Hash::from_bytes(b"t1")));
    }
}
