//! Duplicate-avoiding mirror of a local tree into the remote store.
//!
//! The walk is depth first. A remote folder is resolved (reused or created)
//! before anything is done inside it, siblings are processed concurrently up
//! to [`SyncOptions::concurrency`], and the number of remote calls in flight
//! is bounded by the same figure. The resolve→create (or resolve→upload)
//! sequence of a given name under a given parent is serialized, so that two
//! tasks can't both see the name absent and both create it.
//!
//! The pass is additive. Nothing is ever trashed or deleted by it, and a
//! failure is confined to the entry (or the directory listing) that caused
//! it: siblings carry on and the failure is recorded in the [`SyncReport`].

use dmirror::path::FsPath;
use futures::{future::BoxFuture, stream, Future, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    local::{self, EntryKind, LocalEntry},
    oracle::{self, Existence},
    storage::{
        id::{Id, IdBuf},
        DeleteOutcome, RemoteObject, RemoteStore,
    },
};

mod lock;
mod report;

pub use self::report::{SyncFailure, SyncReport};

use self::{lock::CreationLocks, report::Tally};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upload files even if a live file of the same name exists.
    /// The store then holds several files with that name.
    pub overwrite: bool,
    pub concurrency: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            concurrency: 4,
        }
    }
}

/// What to do with a local entry, given what exists remotely under its parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncDecision {
    /// Descend into this existing folder
    Reuse(RemoteObject),
    /// Create a folder and descend into it
    Create,
    /// Leave the existing file alone
    Skip,
    Upload,
}

impl SyncDecision {
    /// A trashed object never blocks the creation of a live one.
    pub fn decide(kind: EntryKind, existence: Existence) -> Self {
        match (kind, existence) {
            (EntryKind::Directory, Existence::Live(folder)) => SyncDecision::Reuse(folder),
            (EntryKind::Directory, Existence::Absent | Existence::TrashedOnly) => {
                SyncDecision::Create
            }
            (EntryKind::File, Existence::Live(_)) => SyncDecision::Skip,
            (EntryKind::File, Existence::Absent | Existence::TrashedOnly) => SyncDecision::Upload,
        }
    }
}

pub struct SyncEngine<R> {
    store: R,
    options: SyncOptions,
    cancel: CancellationToken,
    calls: Semaphore,
    creations: CreationLocks,
}

impl<R> SyncEngine<R>
where
    R: RemoteStore,
{
    pub fn new(store: R, options: SyncOptions) -> Self {
        let concurrency = options.concurrency.max(1);
        Self {
            store,
            options: SyncOptions {
                concurrency,
                ..options
            },
            cancel: CancellationToken::new(),
            calls: Semaphore::new(concurrency),
            creations: CreationLocks::default(),
        }
    }

    /// Aborts the pass between entries once `cancel` is cancelled.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    /// Mirrors the content of `local_root` into the remote folder `remote_parent`.
    ///
    /// Fails only if `local_root` itself can't be listed. Any other failure is
    /// part of the returned report.
    pub async fn sync(
        &self,
        local_root: &FsPath,
        remote_parent: &Id,
    ) -> dmirror::Result<SyncReport> {
        log::info!("syncing {local_root} into remote folder {remote_parent}");
        let tally = Tally::default();
        let entries = list_dir(local_root, &tally).await?;
        self.sync_entries(entries, remote_parent, &tally).await;

        let report = tally.finish(self.cancel.is_cancelled());
        if report.cancelled {
            log::warn!("sync of {local_root} was cancelled");
        }
        log::info!("{report}");
        Ok(report)
    }

    /// Permanently deletes `id`. Never called during a sync pass.
    pub async fn remove(&self, id: &Id) -> DeleteOutcome {
        let outcome = self.store.delete(id).await;
        match &outcome {
            DeleteOutcome::Deleted => log::info!("deleted {id}"),
            DeleteOutcome::NotFound => log::warn!("could not delete {id}: not found"),
            DeleteOutcome::Failed(err) => log::error!("could not delete {id}: {err}"),
        }
        outcome
    }

    async fn sync_entries(&self, entries: Vec<LocalEntry>, parent: &Id, tally: &Tally) {
        stream::iter(entries)
            .for_each_concurrent(self.options.concurrency, |entry| {
                self.sync_entry(entry, parent, tally)
            })
            .await
    }

    async fn sync_entry(&self, entry: LocalEntry, parent: &Id, tally: &Tally) {
        if self.cancel.is_cancelled() {
            log::debug!("cancelled before {}", entry.path());
            return;
        }
        match self.apply(&entry, parent, tally).await {
            Ok(Some(folder_id)) => self.sync_dir(entry, folder_id, tally).await,
            Ok(None) => (),
            Err(err) => {
                log::error!("failed to sync {}: {err}", entry.path());
                tally.failed(entry.path(), err);
            }
        }
    }

    fn sync_dir<'a>(
        &'a self,
        dir: LocalEntry,
        folder_id: IdBuf,
        tally: &'a Tally,
    ) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.cancel.is_cancelled() {
                return;
            }
            match list_dir(dir.path(), tally).await {
                Ok(entries) => self.sync_entries(entries, &folder_id, tally).await,
                Err(err) => {
                    log::error!("abandoning {}: {err}", dir.path());
                    tally.failed(dir.path(), err);
                }
            }
        })
    }

    /// Decides for `entry` and carries the decision out.
    /// Returns the id of the remote folder to descend into, if `entry` is a directory.
    async fn apply(
        &self,
        entry: &LocalEntry,
        parent: &Id,
        tally: &Tally,
    ) -> dmirror::Result<Option<IdBuf>> {
        let _guard = self.creations.lock(parent, entry.name()).await;

        let decision = if entry.kind() == EntryKind::File && self.options.overwrite {
            SyncDecision::Upload
        } else {
            let existence = self
                .remote(oracle::resolve(&self.store, entry.name(), parent))
                .await?;
            SyncDecision::decide(entry.kind(), existence)
        };

        match decision {
            SyncDecision::Reuse(folder) => {
                log::debug!("reusing folder {} ({})", entry.path(), folder.id);
                tally.folder_reused();
                Ok(Some(folder.id))
            }
            SyncDecision::Create => {
                let folder = self
                    .remote(self.store.create_folder(entry.name(), Some(parent)))
                    .await?;
                tally.folder_created();
                Ok(Some(folder.id))
            }
            SyncDecision::Skip => {
                log::warn!("file already exists: {}, skipping", entry.path());
                tally.file_skipped();
                Ok(None)
            }
            SyncDecision::Upload => {
                let upload = self
                    .store
                    .upload_file(entry.path(), entry.name(), Some(parent));
                let file = self.remote(upload).await?;
                log::debug!("uploaded {} as {}", entry.path(), file.id);
                tally.file_uploaded();
                Ok(None)
            }
        }
    }

    /// Runs `call` once a slot for a remote call is available.
    async fn remote<T, F>(&self, call: F) -> dmirror::Result<T>
    where
        F: Future<Output = dmirror::Result<T>>,
    {
        let _permit = self
            .calls
            .acquire()
            .await
            .map_err(|_| dmirror::Error::Bug("remote call limiter is closed".into()))?;
        call.await
    }
}

/// Lists `dir`, recording entries with a non UTF-8 name as failures.
async fn list_dir(dir: &FsPath, tally: &Tally) -> dmirror::Result<Vec<LocalEntry>> {
    let entries = local::dir_entries(dir);
    futures::pin_mut!(entries);
    let mut listed = Vec::new();
    while let Some(entry) = entries.next().await {
        match entry {
            Ok(entry) => listed.push(entry),
            Err(err @ dmirror::Error::Utf8(..)) => {
                log::error!("can't mirror entry of {dir}: {err}");
                tally.failed(dir, err);
            }
            Err(err) => return Err(err),
        }
    }
    Ok(listed)
}
