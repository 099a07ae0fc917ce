//! Enumeration of the local tree

use async_stream::stream;
use dmirror::path::{FsPath, FsPathBuf};
use futures::Stream;
use tokio::fs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One node of the local tree, valid for the duration of a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    name: String,
    path: FsPathBuf,
    kind: EntryKind,
}

impl LocalEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &FsPath {
        &self.path
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Streams the regular files and directories directly under `dir`.
///
/// Symbolic links are neither followed nor yielded, nor are sockets, fifos
/// and devices. Order is the one of the filesystem.
///
/// A name that isn't UTF-8 yields a [`dmirror::Error::Utf8`] and the listing
/// goes on. Any other error ends the stream.
pub fn dir_entries(dir: &FsPath) -> impl Stream<Item = dmirror::Result<LocalEntry>> + Send + '_ {
    log::trace!("listing entries of {dir}");
    stream! {
        let mut read_dir = match fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(err) => {
                yield Err(dmirror::Error::from(err));
                return;
            }
        };
        loop {
            let direntry = match read_dir.next_entry().await {
                Ok(Some(direntry)) => direntry,
                Ok(None) => break,
                Err(err) => {
                    yield Err(dmirror::Error::from(err));
                    return;
                }
            };
            let name = match direntry.file_name().into_string() {
                Ok(name) => name,
                Err(name) => {
                    yield Err(dmirror::Error::Utf8(format!("{dir}/{}", name.to_string_lossy())));
                    continue;
                }
            };
            let path = dir.join(&name);
            let file_type = match direntry.file_type().await {
                Ok(file_type) => file_type,
                Err(err) => {
                    yield Err(dmirror::Error::from(err));
                    return;
                }
            };
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                log::warn!("ignoring {path}: not a regular file or directory");
                continue;
            };
            yield Ok(LocalEntry { name, path, kind });
        }
    }
}
