//! Reconciliation of staged changes against an on-disk snapshot.
//!
//! [`apply_changes`] is pure: it takes the decoded collection and the
//! staged batch and returns the collection to write back. Both the blocking
//! and the awaitable flush call it, so they cannot drift apart.

use jsonrepo_types::Entity;
use tracing::debug;

use crate::pending::PendingChanges;

/// What a merge did with each staged change.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities appended from the add buffer.
    pub added: usize,
    /// Updates that replaced an existing entity.
    pub updated: usize,
    /// Updates dropped because no entity had their ID.
    pub updates_dropped: usize,
    /// Removals that deleted an entity.
    pub removed: usize,
    /// Removals whose ID was not present.
    pub removals_missed: usize,
    /// Entity count after the merge.
    pub total: usize,
}

/// Apply `changes` to `current` and return the new collection.
///
/// Order is fixed: additions, then updates, then removals.
///
/// 1. Every staged addition is appended after the existing entities, in
///    staging order. IDs are not checked for uniqueness.
/// 2. Each staged update removes the first entity with the same ID and
///    appends the update at the tail. An update with no match is dropped.
/// 3. Each staged removal deletes the first entity with that ID, if any.
///
/// An entity that is added and removed in the same batch, or updated and
/// then removed, ends up absent.
pub fn apply_changes<T: Entity>(
    mut current: Vec<T>,
    changes: &PendingChanges<T>,
) -> (Vec<T>, MergeReport) {
    let mut report = MergeReport::default();

    current.extend(changes.added().iter().cloned());
    report.added = changes.added().len();

    for update in changes.updated() {
        let id = update.id();
        match current.iter().position(|e| e.id() == id) {
            Some(pos) => {
                current.remove(pos);
                current.push(update.clone());
                report.updated += 1;
            }
            None => {
                debug!(id = %id, "update target not found; dropping");
                report.updates_dropped += 1;
            }
        }
    }

    for id in changes.removed() {
        match current.iter().position(|e| e.id() == *id) {
            Some(pos) => {
                current.remove(pos);
                report.removed += 1;
            }
            None => report.removals_missed += 1,
        }
    }

    report.total = current.len();
    (current, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonrepo_types::EntityId;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        id: EntityId,
        value: u32,
    }

    impl Entity for Row {
        const COLLECTION: &'static str = "rows";

        fn id(&self) -> EntityId {
            self.id
        }
    }

    fn row(value: u32) -> Row {
        Row {
            id: EntityId::new(),
            value,
        }
    }

    fn values(rows: &[Row]) -> Vec<u32> {
        rows.iter().map(|r| r.value).collect()
    }

    #[test]
    fn additions_append_in_order() {
        let existing = vec![row(1)];
        let mut changes = PendingChanges::new();
        changes.stage_add(row(2));
        changes.stage_add(row(3));

        let (merged, report) = apply_changes(existing, &changes);
        assert_eq!(values(&merged), vec![1, 2, 3]);
        assert_eq!(report.added, 2);
        assert_eq!(report.total, 3);
    }

    #[test]
    fn update_moves_entity_to_tail() {
        let (a, b) = (row(1), row(2));
        let mut changes = PendingChanges::new();
        changes.stage_update(Row { id: a.id, value: 10 });

        let (merged, report) = apply_changes(vec![a.clone(), b.clone()], &changes);
        assert_eq!(merged, vec![b, Row { id: a.id, value: 10 }]);
        assert_eq!(report.updated, 1);
    }

    #[test]
    fn update_of_unknown_id_is_dropped() {
        let a = row(1);
        let mut changes = PendingChanges::new();
        changes.stage_update(row(99));

        let (merged, report) = apply_changes(vec![a.clone()], &changes);
        assert_eq!(merged, vec![a]);
        assert_eq!(report.updates_dropped, 1);
        assert_eq!(report.updated, 0);
    }

    #[test]
    fn update_can_target_same_batch_addition() {
        let a = row(1);
        let mut changes = PendingChanges::new();
        changes.stage_add(a.clone());
        changes.stage_update(Row { id: a.id, value: 5 });

        let (merged, _) = apply_changes(Vec::new(), &changes);
        assert_eq!(merged, vec![Row { id: a.id, value: 5 }]);
    }

    #[test]
    fn remove_of_unknown_id_is_noop() {
        let existing = vec![row(1), row(2)];
        let mut changes = PendingChanges::new();
        changes.stage_remove(EntityId::new());

        let (merged, report) = apply_changes(existing.clone(), &changes);
        assert_eq!(merged, existing);
        assert_eq!(report.removals_missed, 1);
    }

    #[test]
    fn removal_wins_over_update() {
        let x = row(1);
        let mut changes = PendingChanges::new();
        changes.stage_update(Row { id: x.id, value: 2 });
        changes.stage_remove(x.id);

        let (merged, report) = apply_changes(vec![x], &changes);
        assert!(merged.is_empty());
        assert_eq!(report.updated, 1);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn removal_wins_over_addition() {
        let x = row(1);
        let mut changes = PendingChanges::new();
        changes.stage_remove(x.id);
        changes.stage_add(x.clone());

        let (merged, _) = apply_changes(Vec::new(), &changes);
        assert!(merged.is_empty());
    }

    #[test]
    fn only_first_duplicate_is_touched() {
        let a = row(1);
        let dup = Row { id: a.id, value: 2 };
        let mut changes = PendingChanges::new();
        changes.stage_remove(a.id);

        let (merged, _) = apply_changes(vec![a, dup.clone()], &changes);
        assert_eq!(merged, vec![dup]);
    }

    proptest! {
        #[test]
        fn fresh_additions_grow_collection(existing in 0usize..8, added in 0usize..8) {
            let current: Vec<Row> = (0..existing as u32).map(row).collect();
            let mut changes = PendingChanges::new();
            for v in 0..added as u32 {
                changes.stage_add(row(100 + v));
            }
            let (merged, report) = apply_changes(current.clone(), &changes);
            prop_assert_eq!(merged.len(), existing + added);
            prop_assert_eq!(&merged[..existing], &current[..]);
            prop_assert_eq!(report.total, merged.len());
        }

        #[test]
        fn removing_everything_empties(n in 0usize..10) {
            let current: Vec<Row> = (0..n as u32).map(row).collect();
            let mut changes = PendingChanges::new();
            for r in current.iter().rev() {
                changes.stage_remove(r.id);
            }
            let (merged, report) = apply_changes(current, &changes);
            prop_assert!(merged.is_empty());
            prop_assert_eq!(report.removed, n);
        }
    }
}
