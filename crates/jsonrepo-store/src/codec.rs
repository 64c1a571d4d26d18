//! JSON encoding of entity collections.

use jsonrepo_types::Entity;

use crate::error::{StoreError, StoreResult};

/// The decoded contents of a repository file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Snapshot<T> {
    /// The file held a JSON array (possibly empty), or nothing at all.
    Entities(Vec<T>),
    /// The file could not be decoded as an array of entities.
    Corrupt { reason: String },
}

impl<T> Snapshot<T> {
    /// Returns `true` if the file failed to decode.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }

    /// The decoded entities; empty for a corrupt file.
    pub fn entities(&self) -> &[T] {
        match self {
            Self::Entities(items) => items,
            Self::Corrupt { .. } => &[],
        }
    }

    /// Consume the snapshot, treating a corrupt file as empty.
    pub fn into_entities(self) -> Vec<T> {
        match self {
            Self::Entities(items) => items,
            Self::Corrupt { .. } => Vec::new(),
        }
    }
}

/// Encoder/decoder between entity collections and repository file text.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    /// Codec writing compact JSON.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec writing indented JSON.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    /// Encode a collection as a JSON array.
    pub fn encode<T: Entity>(&self, entities: &[T]) -> StoreResult<String> {
        let text = if self.pretty {
            serde_json::to_string_pretty(entities)
        } else {
            serde_json::to_string(entities)
        };
        text.map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode repository file text.
    ///
    /// Blank text and a literal `null` decode to an empty collection.
    /// Anything that is not an array of `T` is reported as
    /// [`Snapshot::Corrupt`]; decoding itself never fails.
    pub fn decode<T: Entity>(&self, text: &str) -> Snapshot<T> {
        if text.trim().is_empty() {
            return Snapshot::Entities(Vec::new());
        }
        match serde_json::from_str::<Option<Vec<T>>>(text) {
            Ok(items) => Snapshot::Entities(items.unwrap_or_default()),
            Err(e) => Snapshot::Corrupt {
                reason: e.to_string(),
            },
        }
    }
}
