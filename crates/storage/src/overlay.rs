//! Staging overlay for batch execution.
//!
//! [`SubstateOverlay`] wraps a base reader and captures the effects of
//! executed transactions without modifying the underlying store. Reads check
//! the overlay first, then fall through to the base. Discarding the overlay
//! discards every staged effect, which is how an all-or-nothing batch is
//! rolled back.
//!
//! ```ignore
//! let mut overlay = SubstateOverlay::new(&store);
//! overlay.apply(&txn_updates);           // visible to the next transaction
//! let tokens = overlay.open_indexed_cursor(&index);
//! // overlay dropped: store unchanged
//! ```

use crate::{StateUpdate, SubstateCursor, SubstateIndex, SubstateReader};
use std::collections::{BTreeMap, BTreeSet};
use stratum_types::{Hash, Spin, Substate, SubstateId};

/// A read-your-writes layer over a [`SubstateReader`].
pub struct SubstateOverlay<'a> {
    /// Committed state (read-only access).
    base: &'a dyn SubstateReader,

    /// Substates spun up in the overlay and still live.
    ups: BTreeMap<SubstateId, Substate>,

    /// Ids spun down in the overlay. Shadows the base.
    downs: BTreeSet<SubstateId>,
}

impl<'a> SubstateOverlay<'a> {
    /// Create a new overlay wrapping the given base reader.
    pub fn new(base: &'a dyn SubstateReader) -> Self {
        Self {
            base,
            ups: BTreeMap::new(),
            downs: BTreeSet::new(),
        }
    }

    /// Stage one transaction's updates, in order.
    pub fn apply(&mut self, updates: &[StateUpdate]) {
        for update in updates {
            match update.spin {
                Spin::Up => {
                    self.ups.insert(update.id, update.substate.clone());
                }
                Spin::Down => {
                    self.ups.remove(&update.id);
                    self.downs.insert(update.id);
                }
            }
        }
    }

    /// Number of live substates staged in the overlay.
    pub fn staged_up_count(&self) -> usize {
        self.ups.len()
    }
}

impl SubstateReader for SubstateOverlay<'_> {
    fn load_up_substate(&self, id: &SubstateId) -> Option<Substate> {
        if self.downs.contains(id) {
            return None;
        }
        if let Some(substate) = self.ups.get(id) {
            return Some(substate.clone());
        }
        self.base.load_up_substate(id)
    }

    fn is_virtual_down(&self, id: &SubstateId) -> bool {
        self.downs.contains(id) || self.base.is_virtual_down(id)
    }

    fn open_indexed_cursor(&self, index: &SubstateIndex) -> SubstateCursor {
        let mut entries: Vec<(SubstateId, Substate)> = self
            .base
            .open_indexed_cursor(index)
            .filter(|(id, _)| !self.downs.contains(id))
            .collect();
        entries.extend(
            self.ups
                .iter()
                .filter(|(_, substate)| index.matches(substate))
                .map(|(id, substate)| (*id, substate.clone())),
        );
        SubstateCursor::new(entries)
    }

    fn current_fork_hash(&self) -> Option<Hash> {
        self.base.current_fork_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{native_tokens, MapReader};
    use stratum_types::SubstateKind;

    #[test]
    fn test_reads_fall_through_to_base() {
        let base_id = SubstateId::of_txn(Hash::from_bytes(b"genesis"), 0);
        let base = MapReader::with(vec![(base_id, native_tokens(1, 100))]);
        let overlay = SubstateOverlay::new(&base);

        assert_eq!(overlay.load_up_substate(&base_id), Some(native_tokens(1, 100)));
    }

    #[test]
    fn test_down_shadows_base() {
        let base_id = SubstateId::of_txn(Hash::from_bytes(b"genesis"), 0);
        let base = MapReader::with(vec![(base_id, native_tokens(1, 100))]);
        let mut overlay = SubstateOverlay::new(&base);

        overlay.apply(&[StateUpdate::down(base_id, native_tokens(1, 100))]);

        assert_eq!(overlay.load_up_substate(&base_id), None);
        assert!(overlay.is_virtual_down(&base_id));
        // Base unchanged
        assert_eq!(base.load_up_substate(&base_id), Some(native_tokens(1, 100)));
    }

    #[test]
    fn test_cursor_merges_overlay_and_base_in_order() {
        let base_id = SubstateId::of_txn(Hash::from_bytes(b"a"), 0);
        let base = MapReader::with(vec![(base_id, native_tokens(1, 100))]);
        let mut overlay = SubstateOverlay::new(&base);

        let new_id = SubstateId::of_txn(Hash::from_bytes(b"b"), 0);
        overlay.apply(&[StateUpdate::up(new_id, native_tokens(1, 5))]);

        let index = SubstateIndex::of_kind(SubstateKind::Tokens);
        let ids: Vec<_> = overlay.open_indexed_cursor(&index).map(|(id, _)| id).collect();
        let mut expected = vec![base_id, new_id];
        expected.sort();
        assert_eq!(ids, expected);

        overlay.apply(&[StateUpdate::down(base_id, native_tokens(1, 100))]);
        let ids: Vec<_> = overlay.open_indexed_cursor(&index).map(|(id, _)| id).collect();
        assert_eq!(ids, vec![new_id]);
    }

    #[test]
    fn test_up_then_down_within_overlay() {
        let base = MapReader::default();
        let mut overlay = SubstateOverlay::new(&base);
        let id = SubstateId::of_txn(Hash::from_bytes(b"t"), 0);

        overlay.apply(&[
            StateUpdate::up(id, native_tokens(2, 7)),
            StateUpdate::down(id, native_tokens(2, 7)),
        ]);

        assert_eq!(overlay.load_up_substate(&id), None);
        assert_eq!(overlay.staged_up_count(), 0);
    }
}
