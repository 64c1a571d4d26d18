//! File-backed entity repository for jsonrepo.
//!
//! Each entity type is persisted as one JSON array in `<root>/<key>.json`.
//! Callers stage creates, updates and deletes in memory; a flush merges the
//! staged batch into the file, and every read flushes first.
//!
//! # Components
//!
//! - [`EntityStore`] — the repository: staging, flush, reads, final flush
//!   on drop
//! - [`PendingChanges`] — the three ordered staging buffers
//! - [`apply_changes`] — the pure merge shared by the blocking and
//!   awaitable paths
//! - [`JsonCodec`] / [`Snapshot`] — JSON encode and corruption-aware decode
//! - [`FileSystem`] / [`AsyncFileSystem`] — I/O collaborators, with
//!   [`OsFileSystem`] as the real implementation
//! - [`RepositorySettings`] — root directory and policies, loadable from TOML
//!
//! # Merge Rules
//!
//! 1. Additions are appended after the existing entities, in staging order.
//! 2. An update replaces the first entity with its ID and moves it to the
//!    tail; an update with no match is dropped.
//! 3. A removal deletes the first entity with its ID; unknown IDs are ignored.
//! 4. Changes leave the buffers only when the flush that included them has
//!    rewritten the file.
//!
//! # Example
//!
//! ```no_run
//! use jsonrepo_store::{EntityStore, RepositorySettings};
//! use jsonrepo_types::{Entity, EntityId};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     id: EntityId,
//!     name: String,
//! }
//!
//! impl Entity for User {
//!     const COLLECTION: &'static str = "users";
//!     fn id(&self) -> EntityId {
//!         self.id
//!     }
//! }
//!
//! # fn main() -> jsonrepo_store::StoreResult<()> {
//! let store = EntityStore::<User>::open(&RepositorySettings::new("data"))?;
//! store.create(User { id: EntityId::new(), name: "ada".into() });
//! let users = store.read_all()?;
//! assert_eq!(users.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod fs;
mod guard;
pub mod merge;
pub mod pending;
pub mod settings;
pub mod store;

// Re-export primary types at crate root for ergonomic imports.
pub use codec::{JsonCodec, Snapshot};
pub use error::{StoreError, StoreResult};
pub use fs::{AsyncFileSystem, FileSystem, OsFileSystem};
pub use merge::{apply_changes, MergeReport};
pub use pending::{PendingChanges, PendingCounts};
pub use settings::{validate_key, CorruptPolicy, RepositorySettings};
pub use store::{EntityStore, FlushOutcome};
