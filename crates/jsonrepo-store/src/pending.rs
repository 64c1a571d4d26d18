//! The pending-change buffer.

use jsonrepo_types::{Entity, EntityId};

/// Number of staged items in each buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingCounts {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl PendingCounts {
    /// Total staged items across all three buffers.
    pub fn total(&self) -> usize {
        self.added + self.updated + self.removed
    }

    /// Returns `true` when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Staged mutations waiting for the next flush.
///
/// Each buffer keeps staging order. Nothing is validated here: duplicate
/// additions, updates of unknown entities and removals of unknown IDs are
/// all accepted and resolved by the merge.
///
/// The epoch advances every time the buffers are cleared, so a copy taken
/// before a clear can be told apart from the buffers after it.
#[derive(Clone, Debug)]
pub struct PendingChanges<T> {
    added: Vec<T>,
    updated: Vec<T>,
    removed: Vec<EntityId>,
    epoch: u64,
}

impl<T: Entity> PendingChanges<T> {
    pub fn new() -> Self {
        Self {
            added: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
            epoch: 0,
        }
    }

    pub fn stage_add(&mut self, entity: T) {
        self.added.push(entity);
    }

    pub fn stage_update(&mut self, entity: T) {
        self.updated.push(entity);
    }

    pub fn stage_remove(&mut self, id: EntityId) {
        self.removed.push(id);
    }

    pub fn added(&self) -> &[T] {
        &self.added
    }

    pub fn updated(&self) -> &[T] {
        &self.updated
    }

    pub fn removed(&self) -> &[EntityId] {
        &self.removed
    }

    /// Number of times the buffers have been cleared.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn counts(&self) -> PendingCounts {
        PendingCounts {
            added: self.added.len(),
            updated: self.updated.len(),
            removed: self.removed.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().is_empty()
    }

    /// Drop the items of `batch` from the front of each buffer.
    ///
    /// `batch` is the copy a flush took when it started. Items staged after
    /// the copy are kept. If the buffers were cleared since the copy, none
    /// of the batch is still here and nothing is drained. Returns `false`
    /// in that case.
    pub fn drain_applied(&mut self, batch: &PendingChanges<T>) -> bool {
        if batch.epoch != self.epoch {
            return false;
        }
        let applied = batch.counts();
        self.added.drain(..applied.added.min(self.added.len()));
        self.updated.drain(..applied.updated.min(self.updated.len()));
        self.removed.drain(..applied.removed.min(self.removed.len()));
        true
    }

    /// Discard everything, returning what was staged.
    pub fn clear(&mut self) -> PendingCounts {
        let counts = self.counts();
        self.added.clear();
        self.updated.clear();
        self.removed.clear();
        self.epoch += 1;
        counts
    }
}

impl<T: Entity> Default for PendingChanges<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Tag {
        id: EntityId,
    }

    impl Entity for Tag {
        const COLLECTION: &'static str = "tags";

        fn id(&self) -> EntityId {
            self.id
        }
    }

    fn tag() -> Tag {
        Tag { id: EntityId::new() }
    }

    #[test]
    fn staging_preserves_order() {
        let mut pending = PendingChanges::new();
        let (a, b) = (tag(), tag());
        pending.stage_add(a.clone());
        pending.stage_add(b.clone());
        assert_eq!(pending.added(), &[a, b]);
    }

    #[test]
    fn duplicates_are_accepted() {
        let mut pending = PendingChanges::new();
        let a = tag();
        pending.stage_add(a.clone());
        pending.stage_add(a.clone());
        pending.stage_remove(a.id);
        pending.stage_remove(a.id);
        assert_eq!(
            pending.counts(),
            PendingCounts {
                added: 2,
                updated: 0,
                removed: 2
            }
        );
    }

    #[test]
    fn drain_keeps_later_items() {
        let mut pending = PendingChanges::new();
        let (a, b, c) = (tag(), tag(), tag());
        pending.stage_add(a);
        pending.stage_update(b.clone());
        let batch = pending.clone();

        // Staged after the flush captured its batch.
        pending.stage_add(c.clone());
        assert!(pending.drain_applied(&batch));

        assert_eq!(pending.added(), &[c]);
        assert!(pending.updated().is_empty());
        assert!(pending.removed().is_empty());
    }

    #[test]
    fn drain_after_clear_keeps_restaged_items() {
        let mut pending = PendingChanges::new();
        pending.stage_add(tag());
        pending.stage_add(tag());
        let batch = pending.clone();

        pending.clear();
        let c = tag();
        pending.stage_add(c.clone());

        assert!(!pending.drain_applied(&batch));
        assert_eq!(pending.added(), &[c]);
        assert_eq!(pending.epoch(), batch.epoch() + 1);
    }

    #[test]
    fn clear_reports_counts() {
        let mut pending = PendingChanges::new();
        pending.stage_add(tag());
        pending.stage_remove(EntityId::new());
        let counts = pending.clear();
        assert_eq!(counts.total(), 2);
        assert!(pending.is_empty());
    }
}
