use chrono::{DateTime, Utc};
use dmirror::path::{FsPath, FsPathBuf};
use oauth2::{AccessToken, RefreshToken, Scope, TokenResponse, TokenType};
use serde::{Deserialize, Serialize};

use crate::PersistCache;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenEntry {
    scopes: Vec<Scope>,
    access_token: AccessToken,
    refresh_token: Option<RefreshToken>,
    expiration: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum CacheResult {
    None,
    Expired(RefreshToken, Vec<Scope>),
    Ok(AccessToken),
}

#[derive(Debug, Default)]
pub struct TokenStore {
    entries: Vec<TokenEntry>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to read the cache from disk
    /// Returns `Ok(None)` if the path doesn't exist.
    /// Returns `Err` if the deserialization failed.
    async fn try_read_from_disk(path: &FsPath) -> anyhow::Result<Option<Self>> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        log::info!("reading cached tokens from {path}");
        let entries = serde_json::from_str(&json)?;
        Ok(Some(TokenStore { entries }))
    }

    async fn write_to_disk(&self, path: &FsPath) -> anyhow::Result<()> {
        log::info!("caching tokens to {path}");
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_string_pretty(&self.entries)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    pub fn insert<T, TT>(&mut self, tok: &T)
    where
        T: TokenResponse<TT>,
        TT: TokenType,
    {
        let mut scopes = tok.scopes().cloned().unwrap_or_default();
        scopes.sort_unstable_by(|a, b| a.as_str().cmp(b.as_str()));
        log::trace!("inserting token for scopes {scopes:?}");

        let expiration = tok.expires_in().and_then(|exp| {
            chrono::Duration::from_std(exp).ok().map(|exp| Utc::now() + exp)
        });
        let entry = TokenEntry {
            scopes,
            access_token: tok.access_token().clone(),
            refresh_token: tok.refresh_token().cloned(),
            expiration,
        };
        self.emplace_entry(entry);
    }

    fn emplace_entry(&mut self, token: TokenEntry) {
        match self.entries.iter_mut().find(|ent| ent.scopes == token.scopes) {
            Some(ent) => *ent = token,
            None => self.entries.push(token),
        }
    }

    pub fn get(&self, scopes: &[Scope]) -> CacheResult {
        // the first entry holding all requested scopes wins
        let Some(ent) = self
            .entries
            .iter()
            .find(|ent| scopes.iter().all(|s| ent.scopes.contains(s)))
        else {
            return CacheResult::None;
        };
        match (ent.expiration, &ent.refresh_token) {
            (Some(expiration), Some(refresh_token)) if expiration < Utc::now() => {
                CacheResult::Expired(refresh_token.clone(), ent.scopes.clone())
            }
            (Some(expiration), None) if expiration < Utc::now() => CacheResult::None,
            _ => CacheResult::Ok(ent.access_token.clone()),
        }
    }
}

/// Tokens kept in memory for the duration of the program, loaded from and
/// saved to a JSON file.
#[derive(Debug)]
pub struct TokenCache {
    path: FsPathBuf,
    store: TokenStore,
}

impl TokenCache {
    pub async fn new(path: FsPathBuf) -> anyhow::Result<Self> {
        let store = TokenStore::try_read_from_disk(&path)
            .await?
            .unwrap_or_default();
        Ok(TokenCache { path, store })
    }

    /// A cache that disregards what was persisted earlier.
    /// It still overwrites the persisted tokens on [`PersistCache::persist_cache`].
    pub fn empty(path: FsPathBuf) -> Self {
        TokenCache {
            path,
            store: TokenStore::new(),
        }
    }

    pub fn put<T, TT>(&mut self, tok: &T)
    where
        T: TokenResponse<TT>,
        TT: TokenType,
    {
        log::trace!(
            "Put token for scopes {:?}, expires in {:?}",
            tok.scopes(),
            tok.expires_in()
        );
        self.store.insert(tok);
    }

    pub fn check(&self, scopes: &[Scope]) -> CacheResult {
        let res = self.store.get(scopes);

        if log::log_enabled!(log::Level::Trace) {
            let res = match &res {
                CacheResult::None => "None",
                CacheResult::Expired(..) => "Expired",
                CacheResult::Ok(..) => "Ok",
            };
            let scopes: Vec<&str> = scopes.iter().map(|s| s.as_str()).collect();
            log::trace!("check token for scopes {}: {res}", scopes.join(", "));
        }

        res
    }
}

impl PersistCache for TokenCache {
    async fn persist_cache(&self) -> anyhow::Result<()> {
        self.store.write_to_disk(&self.path).await
    }
}
