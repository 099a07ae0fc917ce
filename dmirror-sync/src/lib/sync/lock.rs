use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::storage::id::{Id, IdBuf};

type Key = (IdBuf, String);

/// Serializes the resolve→create sequences of a name under a parent.
/// A key only lives in the map while it is locked or awaited.
#[derive(Debug, Default)]
pub(super) struct CreationLocks(DashMap<Key, Arc<Mutex<()>>>);

impl CreationLocks {
    pub async fn lock(&self, parent: &Id, name: &str) -> CreationGuard<'_> {
        let key = (parent.to_id_buf(), name.to_string());
        let mutex = self.0.entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        CreationGuard {
            locks: self,
            key,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

pub(super) struct CreationGuard<'a> {
    locks: &'a CreationLocks,
    key: Key,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for CreationGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // a task awaiting the key holds a clone
        self.locks
            .0
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
