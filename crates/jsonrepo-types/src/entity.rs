//! The [`Entity`] identity contract.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::id::EntityId;

/// A uniquely identified record that a repository can persist.
///
/// Implementations must return the same [`EntityId`] for the lifetime of
/// the value; stores match staged updates and removals against persisted
/// records by this ID alone. Every other field is opaque to the store and
/// only has to round-trip through serde.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Default repository key for this entity type. The backing file is
    /// named `<COLLECTION>.json`.
    const COLLECTION: &'static str;

    /// The stable identifier of this entity.
    fn id(&self) -> EntityId;

    /// Identity equality: `true` when both values carry the same ID,
    /// regardless of their other fields.
    fn same_identity(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Note {
        id: EntityId,
        body: String,
    }

    impl Entity for Note {
        const COLLECTION: &'static str = "notes";

        fn id(&self) -> EntityId {
            self.id
        }
    }

    #[test]
    fn identity_ignores_other_fields() {
        let id = EntityId::new();
        let a = Note { id, body: "first".into() };
        let b = Note { id, body: "second".into() };
        let c = Note { id: EntityId::new(), body: "first".into() };
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
    }
}
