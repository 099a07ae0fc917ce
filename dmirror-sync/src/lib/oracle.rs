//! Existence of a name under a remote parent.
//!
//! A name match alone can't tell a usable object from a leftover in the
//! trash, so the trashed state of the match is asked separately.

use crate::storage::{id::Id, FindByName, IsTrashed, RemoteObject};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Existence {
    /// Nothing by that name
    Absent,
    /// A usable object
    Live(RemoteObject),
    /// Only trashed objects. Treated as absent by the sync engine.
    TrashedOnly,
}

impl Existence {
    pub fn live(&self) -> Option<&RemoteObject> {
        match self {
            Existence::Live(obj) => Some(obj),
            _ => None,
        }
    }
}

pub async fn resolve<S>(store: &S, name: &str, parent_id: &Id) -> dmirror::Result<Existence>
where
    S: FindByName + IsTrashed,
{
    let Some(obj) = store.find_by_name(name, Some(parent_id)).await? else {
        log::trace!("{name} is absent from {parent_id}");
        return Ok(Existence::Absent);
    };
    if store.is_trashed(&obj.id).await? {
        log::trace!("{name} is only in the trash of {parent_id}");
        Ok(Existence::TrashedOnly)
    } else {
        log::trace!("{name} exists in {parent_id} with id {}", obj.id);
        Ok(Existence::Live(obj))
    }
}
