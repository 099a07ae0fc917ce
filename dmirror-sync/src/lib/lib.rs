use futures::{future, Future};

pub mod local;
pub mod oauth2;
pub mod oracle;
pub mod storage;
pub mod sync;

pub use crate::oracle::Existence;
pub use crate::sync::{SyncEngine, SyncOptions, SyncReport};

pub mod uri {
    #[derive(Debug)]
    pub struct QueryMap<'a>(Vec<(&'a str, &'a str)>);

    impl<'a> QueryMap<'a> {
        pub fn parse(query: Option<&'a str>) -> QueryMap<'a> {
            let mut vec = Vec::new();
            if let Some(query) = query {
                for part in query.split('&').filter(|p| !p.is_empty()) {
                    let (name, value) = part.split_once('=').unwrap_or((part, ""));
                    vec.push((name, value));
                }
            }
            QueryMap(vec)
        }

        pub fn get(&'a self, key: &str) -> Option<&'a str> {
            self.0.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
        }
    }

    #[test]
    fn test_query_map() {
        let map = QueryMap::parse(Some("state=abc&code=4/0Ad&scope=drive"));
        assert_eq!(map.get("code"), Some("4/0Ad"));
        assert_eq!(map.get("state"), Some("abc"));
        assert_eq!(map.get("error"), None);

        let map = QueryMap::parse(None);
        assert_eq!(map.get("code"), None);
    }
}

/// Writes in-memory state (e.g. OAuth tokens) back to disk.
pub trait PersistCache {
    fn persist_cache(&self) -> impl Future<Output = anyhow::Result<()>> + Send {
        future::ready(Ok(()))
    }
}
