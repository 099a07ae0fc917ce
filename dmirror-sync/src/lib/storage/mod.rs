//! Capabilities of the remote object store.
//!
//! The store has no path semantics: objects are found by name under a parent,
//! several live objects may share a name, and deleted objects may linger in
//! the trash. Each capability is a separate trait so that a store (or a test
//! stub) states precisely what it offers; [`RemoteStore`] gathers them all.

use dmirror::path::FsPath;
use futures::{Future, Stream};
use serde::{Deserialize, Serialize};

pub mod gdrive;
pub mod id;
pub mod query;

use self::id::{Id, IdBuf};

/// A node of the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObject {
    pub id: IdBuf,
    pub name: String,
    /// `None` for objects at the store root
    pub parent_id: Option<IdBuf>,
    pub trashed: bool,
}

/// Result of a permanent deletion
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    Failed(dmirror::Error),
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        matches!(self, DeleteOutcome::Deleted)
    }
}

pub trait FindByName {
    /// Finds an object called `name` under `parent_id`.
    ///
    /// Without `parent_id` the lookup spans the whole store.
    /// If several objects match, a live one is returned in preference to a
    /// trashed one. Among equals the choice is up to the store.
    fn find_by_name(
        &self,
        name: &str,
        parent_id: Option<&Id>,
    ) -> impl Future<Output = dmirror::Result<Option<RemoteObject>>> + Send;
}

pub trait FindById {
    /// Resolves `id` to the current display name of the object.
    fn find_by_id(&self, id: &Id) -> impl Future<Output = dmirror::Result<Option<String>>> + Send;
}

pub trait IsTrashed {
    fn is_trashed(&self, id: &Id) -> impl Future<Output = dmirror::Result<bool>> + Send;
}

pub trait ListChildren {
    /// Streams every child of `parent_id`, following pagination until
    /// the store reports no further page.
    /// Ordering is store defined and may differ between calls.
    fn list_children(
        &self,
        parent_id: &Id,
    ) -> impl Stream<Item = dmirror::Result<RemoteObject>> + Send;
}

pub trait CreateFolder {
    /// Creates a new folder, even if one with the same name exists.
    fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&Id>,
    ) -> impl Future<Output = dmirror::Result<RemoteObject>> + Send;
}

pub trait UploadFile {
    /// Streams the content of `local_path` to a new remote file called `name`.
    fn upload_file(
        &self,
        local_path: &FsPath,
        name: &str,
        parent_id: Option<&Id>,
    ) -> impl Future<Output = dmirror::Result<RemoteObject>> + Send;
}

pub trait Delete {
    /// Permanently deletes `id`, bypassing the trash.
    fn delete(&self, id: &Id) -> impl Future<Output = DeleteOutcome> + Send;
}

/// The complete capability set required by the sync engine
pub trait RemoteStore:
    FindByName
    + FindById
    + IsTrashed
    + ListChildren
    + CreateFolder
    + UploadFile
    + Delete
    + Send
    + Sync
    + 'static
{
}
