pub mod config;
pub mod error;
pub mod loc;
pub mod oauth;

pub use crate::config::{Config, RemoteRoot};
pub use crate::error::{Error, Result};

pub mod path {
    //! UTF-8 filesystem paths.
    //! Remote names are strings, so local names must be UTF-8 to be mirrored.
    pub use camino::{Utf8Path as FsPath, Utf8PathBuf as FsPathBuf};
}
