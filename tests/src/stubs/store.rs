use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use dmirror::path::{FsPath, FsPathBuf};
use dmirror_sync::storage::{
    id::{Id, IdBuf},
    CreateFolder, Delete, DeleteOutcome, FindById, FindByName, IsTrashed, ListChildren,
    RemoteObject, RemoteStore, UploadFile,
};
use futures::prelude::*;

/// An object held by the stub
#[derive(Debug, Clone)]
pub struct Object {
    pub id: IdBuf,
    pub name: String,
    pub parent: Option<IdBuf>,
    pub trashed: bool,
    pub folder: bool,
    pub content: Vec<u8>,
}

impl Object {
    fn remote(&self) -> RemoteObject {
        RemoteObject {
            id: self.id.clone(),
            name: self.name.clone(),
            parent_id: self.parent.clone(),
            trashed: self.trashed,
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: Vec<Object>,
    next_id: u64,
    failing_uploads: HashSet<String>,
    failing_creates: HashSet<String>,
    vanishing_dirs: HashMap<String, FsPathBuf>,
    folders_created: usize,
    files_uploaded: usize,
    in_flight: usize,
    max_in_flight: usize,
}

impl State {
    fn insert(
        &mut self,
        name: &str,
        parent: Option<&Id>,
        folder: bool,
        content: Vec<u8>,
    ) -> Object {
        self.next_id += 1;
        let obj = Object {
            id: IdBuf::from(format!("id{}", self.next_id)),
            name: name.to_string(),
            parent: parent.map(Id::to_id_buf),
            trashed: false,
            folder,
            content,
        };
        self.objects.push(obj.clone());
        obj
    }
}

/// In-memory remote store.
/// Names aren't unique, trashed objects stay visible to lookups, and every
/// remote call can be slowed down to let concurrent calls overlap.
#[derive(Debug, Clone, Default)]
pub struct Stub {
    state: Arc<Mutex<State>>,
    latency: Option<Duration>,
}

impl Stub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_folder(&self, name: &str, parent: Option<&Id>) -> IdBuf {
        self.state().insert(name, parent, true, Vec::new()).id
    }

    pub fn add_file(&self, name: &str, parent: Option<&Id>, content: &[u8]) -> IdBuf {
        self.state().insert(name, parent, false, content.to_vec()).id
    }

    pub fn trash(&self, id: &Id) {
        let mut state = self.state();
        let obj = state.objects.iter_mut().find(|o| &*o.id == id).unwrap();
        obj.trashed = true;
    }

    /// Makes every upload of a file called `name` fail.
    pub fn fail_upload(&self, name: &str) {
        self.state().failing_uploads.insert(name.to_string());
    }

    /// Makes every creation of a folder called `name` fail.
    pub fn fail_create(&self, name: &str) {
        self.state().failing_creates.insert(name.to_string());
    }

    /// Removes the local directory `dir` as soon as a folder called `name`
    /// is created, so that listing `dir` fails afterwards.
    pub fn remove_on_create(&self, name: &str, dir: &FsPath) {
        self.state()
            .vanishing_dirs
            .insert(name.to_string(), dir.to_path_buf());
    }

    pub fn objects(&self) -> Vec<Object> {
        self.state().objects.clone()
    }

    /// Children of `parent`, trashed ones included
    pub fn children(&self, parent: &Id) -> Vec<Object> {
        self.state()
            .objects
            .iter()
            .filter(|o| o.parent.as_deref() == Some(parent))
            .cloned()
            .collect()
    }

    /// The live children of `parent` called `name`
    pub fn live(&self, parent: &Id, name: &str) -> Vec<Object> {
        self.children(parent)
            .into_iter()
            .filter(|o| o.name == name && !o.trashed)
            .collect()
    }

    pub fn folders_created(&self) -> usize {
        self.state().folders_created
    }

    pub fn files_uploaded(&self) -> usize {
        self.state().files_uploaded
    }

    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    async fn call<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        {
            let mut state = self.state();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state();
        state.in_flight -= 1;
        f(&mut state)
    }
}

impl FindByName for Stub {
    async fn find_by_name(
        &self,
        name: &str,
        parent_id: Option<&Id>,
    ) -> dmirror::Result<Option<RemoteObject>> {
        self.call(|state| {
            let matches: Vec<_> = state
                .objects
                .iter()
                .filter(|o| {
                    o.name == name && (parent_id.is_none() || o.parent.as_deref() == parent_id)
                })
                .collect();
            let found = matches
                .iter()
                .find(|o| !o.trashed)
                .or_else(|| matches.first());
            Ok(found.map(|o| o.remote()))
        })
        .await
    }
}

impl FindById for Stub {
    async fn find_by_id(&self, id: &Id) -> dmirror::Result<Option<String>> {
        self.call(|state| {
            Ok(state
                .objects
                .iter()
                .find(|o| &*o.id == id)
                .map(|o| o.name.clone()))
        })
        .await
    }
}

impl IsTrashed for Stub {
    async fn is_trashed(&self, id: &Id) -> dmirror::Result<bool> {
        self.call(|state| {
            state
                .objects
                .iter()
                .find(|o| &*o.id == id)
                .map(|o| o.trashed)
                .ok_or_else(|| dmirror::api_error!("No such object: {id}"))
        })
        .await
    }
}

impl ListChildren for Stub {
    fn list_children(
        &self,
        parent_id: &Id,
    ) -> impl Stream<Item = dmirror::Result<RemoteObject>> + Send {
        let children: Vec<_> = self
            .children(parent_id)
            .iter()
            .map(|o| Ok(o.remote()))
            .collect();
        stream::iter(children)
    }
}

impl CreateFolder for Stub {
    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&Id>,
    ) -> dmirror::Result<RemoteObject> {
        self.call(|state| {
            if state.failing_creates.contains(name) {
                dmirror::api_bail!("creation of folder {name} rejected");
            }
            if let Some(dir) = state.vanishing_dirs.remove(name) {
                std::fs::remove_dir_all(dir)?;
            }
            state.folders_created += 1;
            Ok(state.insert(name, parent_id, true, Vec::new()).remote())
        })
        .await
    }
}

impl UploadFile for Stub {
    async fn upload_file(
        &self,
        local_path: &FsPath,
        name: &str,
        parent_id: Option<&Id>,
    ) -> dmirror::Result<RemoteObject> {
        let content = tokio::fs::read(local_path).await?;
        self.call(|state| {
            if state.failing_uploads.contains(name) {
                dmirror::api_bail!("upload of {name} rejected");
            }
            state.files_uploaded += 1;
            Ok(state.insert(name, parent_id, false, content).remote())
        })
        .await
    }
}

impl Delete for Stub {
    async fn delete(&self, id: &Id) -> DeleteOutcome {
        self.call(|state| {
            let len = state.objects.len();
            state.objects.retain(|o| &*o.id != id);
            if state.objects.len() < len {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::NotFound
            }
        })
        .await
    }
}

impl RemoteStore for Stub {}
