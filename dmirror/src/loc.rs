//! Locations module

/// Locations for the user
pub mod user {
    use crate::path::FsPathBuf;

    pub fn config_dir() -> anyhow::Result<FsPathBuf> {
        let dir =
            dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Can't get config directory"))?;
        let dir = FsPathBuf::try_from(dir)?;
        Ok(dir.join("dmirror"))
    }

    pub fn cache_dir() -> anyhow::Result<FsPathBuf> {
        let dir = dirs::cache_dir().ok_or_else(|| anyhow::anyhow!("Can't get cache directory"))?;
        let dir = FsPathBuf::try_from(dir)?;
        Ok(dir.join("dmirror"))
    }
}

pub fn config_file() -> anyhow::Result<crate::path::FsPathBuf> {
    Ok(user::config_dir()?.join("config.json"))
}

pub fn oauth_secret_file() -> anyhow::Result<crate::path::FsPathBuf> {
    Ok(user::config_dir()?.join("client_secret.json"))
}

pub fn token_cache_file() -> anyhow::Result<crate::path::FsPathBuf> {
    Ok(user::cache_dir()?.join("token_cache.json"))
}
