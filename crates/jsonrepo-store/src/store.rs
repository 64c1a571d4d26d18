//! The [`EntityStore`] repository.
//!
//! A store is bound to one entity type and one file, `<root>/<key>.json`.
//! Mutations are staged in memory and merged into the file by a flush.
//! Every read flushes first, so staged changes are always visible to the
//! reader that follows them.
//!
//! The staged buffers and the `flushing` latch share one mutex. The mutex
//! is never held across I/O: a flush marks itself active, copies the batch,
//! releases the lock, does its I/O, then re-acquires the lock to drain what
//! it applied and clear the latch.
//!
//! A flush requested from another thread or task while one is active waits
//! for it and then runs its own merge. A flush requested from inside the
//! active flush returns [`FlushOutcome::Skipped`] without touching the file.
//! Waiting blocks the calling thread on the blocking path, so do not call
//! the blocking methods from a current-thread runtime while an awaitable
//! flush of the same store is in flight.
//!
//! Multiple stores pointed at the same file are not coordinated; the last
//! writer wins. There is no cross-process locking.

use std::fmt;
use std::path::{Path, PathBuf};

use jsonrepo_types::{Entity, EntityId};
use tracing::{debug, error, warn};

use crate::codec::{JsonCodec, Snapshot};
use crate::error::{StoreError, StoreResult};
use crate::fs::{AsyncFileSystem, FileSystem, OsFileSystem};
use crate::guard::{FlushGate, FlushTicket};
use crate::merge::{apply_changes, MergeReport};
use crate::pending::{PendingChanges, PendingCounts};
use crate::settings::{validate_key, CorruptPolicy, RepositorySettings};

/// Content written to a freshly created repository file.
const EMPTY_COLLECTION: &str = "[]";

/// Result of a flush attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The merge ran and the file was rewritten.
    Flushed(MergeReport),
    /// Requested from inside this store's active flush; nothing was done.
    Skipped,
}

impl FlushOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    /// The merge report, if the flush ran.
    pub fn report(&self) -> Option<&MergeReport> {
        match self {
            Self::Flushed(report) => Some(report),
            Self::Skipped => None,
        }
    }
}

/// File-backed repository for entities of type `T`.
///
/// Blocking methods need `F: FileSystem`; the `*_async` variants also need
/// `F: AsyncFileSystem`. Both run the same merge with the same guard.
pub struct EntityStore<T: Entity, F: FileSystem = OsFileSystem> {
    root: PathBuf,
    key: String,
    path: PathBuf,
    codec: JsonCodec,
    on_corrupt: CorruptPolicy,
    fs: F,
    gate: FlushGate<T>,
}

impl<T: Entity> EntityStore<T, OsFileSystem> {
    /// Open the store for `T` under the configured root, keyed by
    /// [`Entity::COLLECTION`].
    pub fn open(settings: &RepositorySettings) -> StoreResult<Self> {
        Self::open_keyed(settings, T::COLLECTION)
    }

    /// Open the store for `T` under the configured root with an explicit key.
    pub fn open_keyed(settings: &RepositorySettings, key: &str) -> StoreResult<Self> {
        Self::with_fs(settings, key, OsFileSystem)
    }
}

impl<T: Entity, F: FileSystem> EntityStore<T, F> {
    /// Open a store that performs its I/O through `fs`.
    ///
    /// Fails with [`StoreError::Config`] if the settings have no
    /// repository path or `key` is not a valid file stem. No I/O happens
    /// here; the directory and file are created on first flush or read.
    pub fn with_fs(settings: &RepositorySettings, key: &str, fs: F) -> StoreResult<Self> {
        let root = settings.require_repository_path()?.to_path_buf();
        validate_key(key)?;
        let path = root.join(format!("{key}.json"));
        let codec = if settings.pretty {
            JsonCodec::pretty()
        } else {
            JsonCodec::new()
        };

        Ok(Self {
            gate: FlushGate::new(&path),
            root,
            key: key.to_string(),
            path,
            codec,
            on_corrupt: settings.on_corrupt,
            fs,
        })
    }

    /// The repository key (file stem).
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The repository root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root
    }

    /// The backing file, `<root>/<key>.json`.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// The filesystem collaborator.
    pub fn file_system(&self) -> &F {
        &self.fs
    }

    // ---- Staging ----

    /// Stage `entity` for insertion. No I/O, no uniqueness check.
    pub fn create(&self, entity: T) -> &Self {
        self.gate.with_pending(|p| p.stage_add(entity));
        self
    }

    /// Stage `entity` as a replacement for the entity with the same ID.
    /// No I/O; an update with no matching entity is dropped at flush time.
    pub fn update(&self, entity: T) -> &Self {
        self.gate.with_pending(|p| p.stage_update(entity));
        self
    }

    /// Stage removal of the entity with `id`. No I/O; an unknown ID is
    /// ignored at flush time.
    pub fn delete(&self, id: EntityId) -> &Self {
        self.gate.with_pending(|p| p.stage_remove(id));
        self
    }

    /// How many changes are currently staged.
    pub fn pending(&self) -> PendingCounts {
        self.gate.with_pending(|p| p.counts())
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending().is_empty()
    }

    /// Drop every staged change without writing it. Returns what was
    /// discarded.
    ///
    /// A flush already running still writes the batch it copied, but
    /// changes staged after the discard are kept for the next flush.
    pub fn discard_pending(&self) -> PendingCounts {
        self.gate.with_pending(PendingChanges::clear)
    }

    // ---- Blocking access ----

    /// Merge the staged changes into the backing file.
    ///
    /// Creates the directory and an empty `[]` file on first use. Applied
    /// changes are removed from the buffers only once the file has been
    /// rewritten; on error they stay staged for the next attempt.
    ///
    /// Blocks while another thread's flush of this store is running.
    pub fn flush(&self) -> StoreResult<FlushOutcome> {
        let Some(ticket) = self.gate.claim() else {
            return Ok(self.skip_nested());
        };
        self.log_started(ticket.batch());

        let current = self.resolve(self.load_snapshot()?)?;
        let (merged, report) = apply_changes(current, ticket.batch());
        let text = self.codec.encode(&merged)?;
        FileSystem::write_string(&self.fs, &self.path, &text)
            .map_err(|e| StoreError::io(&self.path, e))?;

        self.finish(ticket, &report);
        Ok(FlushOutcome::Flushed(report))
    }

    /// Flush, then return every persisted entity in file order.
    ///
    /// With [`CorruptPolicy::TreatAsEmpty`] a malformed file reads as an
    /// empty collection (and is overwritten by the flush).
    pub fn read_all(&self) -> StoreResult<Vec<T>> {
        self.flush()?;
        self.resolve(self.load_snapshot()?)
    }

    /// Flush, then return the first entity with `id`.
    pub fn read_by_id(&self, id: EntityId) -> StoreResult<Option<T>> {
        Ok(self.read_all()?.into_iter().find(|e| e.id() == id))
    }

    /// Flush, then return the decoded file without applying the
    /// corrupt-file policy.
    ///
    /// If the file is already corrupt this returns [`Snapshot::Corrupt`]
    /// without flushing, so neither the file nor the staged changes are
    /// touched.
    pub fn read_snapshot(&self) -> StoreResult<Snapshot<T>> {
        let before = self.load_snapshot()?;
        if before.is_corrupt() {
            return Ok(before);
        }
        self.flush()?;
        self.load_snapshot()
    }

    /// Run the final flush and release the store.
    ///
    /// Unlike dropping the store, a failure is returned to the caller. The
    /// staged changes are discarded either way.
    pub fn close(self) -> StoreResult<FlushOutcome> {
        let outcome = self.flush();
        self.discard_pending();
        outcome
    }

    fn ensure_storage(&self) -> StoreResult<()> {
        let exists = |p: &Path| FileSystem::exists(&self.fs, p).map_err(|e| StoreError::io(p, e));

        if !exists(&self.root)? {
            FileSystem::create_dir_all(&self.fs, &self.root)
                .map_err(|e| StoreError::io(&self.root, e))?;
        }
        if !exists(&self.path)? {
            FileSystem::create_file(&self.fs, &self.path)
                .map_err(|e| StoreError::io(&self.path, e))?;
            FileSystem::append_string(&self.fs, &self.path, EMPTY_COLLECTION)
                .map_err(|e| StoreError::io(&self.path, e))?;
            debug!(path = %self.path.display(), "created repository file");
        }
        Ok(())
    }

    fn load_snapshot(&self) -> StoreResult<Snapshot<T>> {
        self.ensure_storage()?;
        let text = FileSystem::read_to_string(&self.fs, &self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(self.codec.decode(&text))
    }

    // ---- Shared by both access styles ----

    fn skip_nested(&self) -> FlushOutcome {
        debug!(path = %self.path.display(), "flush requested inside the active flush; skipping");
        FlushOutcome::Skipped
    }

    fn log_started(&self, batch: &PendingChanges<T>) {
        debug!(
            path = %self.path.display(),
            added = batch.added().len(),
            updated = batch.updated().len(),
            removed = batch.removed().len(),
            "flush started"
        );
    }

    /// Drain the applied batch, release the flush and log the result.
    fn finish(&self, ticket: FlushTicket<'_, T>, report: &MergeReport) {
        if !ticket.complete() {
            debug!(
                path = %self.path.display(),
                "staged changes were discarded during the flush; keeping later changes"
            );
        }
        self.log_flushed(report);
    }

    fn resolve(&self, snapshot: Snapshot<T>) -> StoreResult<Vec<T>> {
        match snapshot {
            Snapshot::Entities(items) => Ok(items),
            Snapshot::Corrupt { reason } => match self.on_corrupt {
                CorruptPolicy::TreatAsEmpty => {
                    warn!(
                        path = %self.path.display(),
                        %reason,
                        "repository file is corrupt; treating as empty"
                    );
                    Ok(Vec::new())
                }
                CorruptPolicy::Fail => Err(StoreError::Corrupt {
                    path: self.path.clone(),
                    reason,
                }),
            },
        }
    }

    fn log_flushed(&self, report: &MergeReport) {
        if report.updates_dropped > 0 {
            warn!(
                path = %self.path.display(),
                dropped = report.updates_dropped,
                "staged updates had no matching entity"
            );
        }
        debug!(
            path = %self.path.display(),
            added = report.added,
            updated = report.updated,
            removed = report.removed,
            total = report.total,
            "flush complete"
        );
    }
}

impl<T: Entity, F: FileSystem + AsyncFileSystem> EntityStore<T, F> {
    // ---- Awaitable access ----

    /// Awaitable [`flush`](Self::flush).
    ///
    /// Waits without blocking while another flush of this store is running.
    pub async fn flush_async(&self) -> StoreResult<FlushOutcome> {
        let Some(ticket) = self.gate.claim_async().await else {
            return Ok(self.skip_nested());
        };
        self.log_started(ticket.batch());
        self.gate.scope(self.run_flush_async(ticket)).await
    }

    async fn run_flush_async(&self, ticket: FlushTicket<'_, T>) -> StoreResult<FlushOutcome> {
        let current = self.resolve(self.load_snapshot_async().await?)?;
        let (merged, report) = apply_changes(current, ticket.batch());
        let text = self.codec.encode(&merged)?;
        AsyncFileSystem::write_string(&self.fs, &self.path, &text)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        self.finish(ticket, &report);
        Ok(FlushOutcome::Flushed(report))
    }

    /// Awaitable [`read_all`](Self::read_all).
    pub async fn read_all_async(&self) -> StoreResult<Vec<T>> {
        self.flush_async().await?;
        self.resolve(self.load_snapshot_async().await?)
    }

    /// Awaitable [`read_by_id`](Self::read_by_id).
    pub async fn read_by_id_async(&self, id: EntityId) -> StoreResult<Option<T>> {
        Ok(self
            .read_all_async()
            .await?
            .into_iter()
            .find(|e| e.id() == id))
    }

    /// Awaitable [`read_snapshot`](Self::read_snapshot).
    pub async fn read_snapshot_async(&self) -> StoreResult<Snapshot<T>> {
        let before = self.load_snapshot_async().await?;
        if before.is_corrupt() {
            return Ok(before);
        }
        self.flush_async().await?;
        self.load_snapshot_async().await
    }

    /// Awaitable [`close`](Self::close).
    pub async fn close_async(self) -> StoreResult<FlushOutcome> {
        let outcome = self.flush_async().await;
        self.discard_pending();
        outcome
    }

    async fn ensure_storage_async(&self) -> StoreResult<()> {
        let root_exists = AsyncFileSystem::exists(&self.fs, &self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;
        if !root_exists {
            AsyncFileSystem::create_dir_all(&self.fs, &self.root)
                .await
                .map_err(|e| StoreError::io(&self.root, e))?;
        }

        let file_exists = AsyncFileSystem::exists(&self.fs, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        if !file_exists {
            AsyncFileSystem::create_file(&self.fs, &self.path)
                .await
                .map_err(|e| StoreError::io(&self.path, e))?;
            AsyncFileSystem::append_string(&self.fs, &self.path, EMPTY_COLLECTION)
                .await
                .map_err(|e| StoreError::io(&self.path, e))?;
            debug!(path = %self.path.display(), "created repository file");
        }
        Ok(())
    }

    async fn load_snapshot_async(&self) -> StoreResult<Snapshot<T>> {
        self.ensure_storage_async().await?;
        let text = AsyncFileSystem::read_to_string(&self.fs, &self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(self.codec.decode(&text))
    }
}

impl<T: Entity, F: FileSystem> Drop for EntityStore<T, F> {
    fn drop(&mut self) {
        if !self.has_pending_changes() {
            return;
        }
        if let Err(e) = self.flush() {
            error!(
                path = %self.path.display(),
                error = %e,
                "final flush on drop failed; staged changes lost"
            );
        }
    }
}

impl<T: Entity, F: FileSystem> fmt::Debug for EntityStore<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending = self.pending();
        f.debug_struct("EntityStore")
            .field("path", &self.path)
            .field("on_corrupt", &self.on_corrupt)
            .field("pending", &pending)
            .finish()
    }
}
