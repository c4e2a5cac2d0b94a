//! Read-through cache of who owns each home directory.
//!
//! Ownership is decided by the creator recorded on `/home/<owner>`, so one
//! stat per home directory answers the question for every path below it.

use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;

/// Something that can report the creator of a path.
pub trait CreatorSource {
    fn creator(&mut self, path: &str) -> Result<Option<String>>;
}

/// Home directory component of `/home/<owner>/...`.
pub fn owner_key(path: &str) -> Option<&str> {
    let mut components = path.split('/').filter(|c| !c.is_empty());
    match (components.next(), components.next()) {
        (Some("home"), Some(owner)) => Some(owner),
        _ => None,
    }
}

/// Shared across sessions. Two first lookups of the same home directory may
/// both stat it; the last answer is kept.
#[derive(Debug, Default)]
pub struct OwnershipCache {
    owners: DashMap<String, String>,
}

impl OwnershipCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creator of the home directory containing `path`. Paths outside
    /// `/home/<owner>` are asked about directly and not cached.
    pub fn lookup<S: CreatorSource + ?Sized>(&self, source: &mut S, path: &str) -> Result<Option<String>> {
        let Some(key) = owner_key(path) else {
            return source.creator(path);
        };

        if let Some(owner) = self.owners.get(key) {
            return Ok(Some(owner.value().clone()));
        }

        let home = format!("/home/{}", key);
        let creator = source.creator(&home)?;
        if let Some(owner) = &creator {
            debug!("Caching owner {} for {}", owner, home);
            self.owners.insert(key.to_string(), owner.clone());
        }
        Ok(creator)
    }

    pub fn cached(&self, key: &str) -> Option<String> {
        self.owners.get(key).map(|owner| owner.value().clone())
    }

    pub fn invalidate(&self, key: &str) {
        self.owners.remove(key);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::thread;

    #[derive(Default)]
    struct FakeStat {
        creators: HashMap<String, String>,
        calls: Vec<String>,
    }

    impl FakeStat {
        fn with(mut self, path: &str, creator: &str) -> Self {
            self.creators.insert(path.to_string(), creator.to_string());
            self
        }
    }

    impl CreatorSource for FakeStat {
        fn creator(&mut self, path: &str) -> Result<Option<String>> {
            self.calls.push(path.to_string());
            Ok(self.creators.get(path).cloned())
        }
    }

    #[test]
    fn test_owner_key() {
        assert_eq!(owner_key("/home/alice/a/b"), Some("alice"));
        assert_eq!(owner_key("/home/alice"), Some("alice"));
        assert_eq!(owner_key("home//bob/"), Some("bob"));
        assert_eq!(owner_key("/home"), None);
        assert_eq!(owner_key("/projects/x"), None);
    }

    #[test]
    fn test_one_stat_per_home() {
        let cache = OwnershipCache::new();
        let mut source = FakeStat::default().with("/home/alice", "alice#1234");

        for path in ["/home/alice/a", "/home/alice/b/c", "/home/alice"] {
            assert_eq!(
                cache.lookup(&mut source, path).unwrap().as_deref(),
                Some("alice#1234")
            );
        }
        assert_eq!(source.calls, vec!["/home/alice"]);
        assert_eq!(cache.cached("alice").as_deref(), Some("alice#1234"));
    }

    #[test]
    fn test_outside_home_bypasses_cache() {
        let cache = OwnershipCache::new();
        let mut source = FakeStat::default().with("/projects/x", "carol");

        for _ in 0..2 {
            assert_eq!(
                cache.lookup(&mut source, "/projects/x").unwrap().as_deref(),
                Some("carol")
            );
        }
        assert_eq!(source.calls.len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unknown_creator_is_not_cached() {
        let cache = OwnershipCache::new();
        let mut source = FakeStat::default();
        assert_eq!(cache.lookup(&mut source, "/home/ghost/x").unwrap(), None);
        assert_eq!(cache.lookup(&mut source, "/home/ghost/y").unwrap(), None);
        assert_eq!(source.calls.len(), 2);
    }

    #[test]
    fn test_invalidate() {
        let cache = OwnershipCache::new();
        let mut source = FakeStat::default().with("/home/alice", "alice");
        cache.lookup(&mut source, "/home/alice/a").unwrap();
        cache.invalidate("alice");
        cache.lookup(&mut source, "/home/alice/a").unwrap();
        assert_eq!(source.calls.len(), 2);
    }

    #[test]
    fn test_concurrent_lookups() {
        let cache = Arc::new(OwnershipCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    let mut source = FakeStat::default()
                        .with("/home/alice", "alice")
                        .with("/home/bob", "bob");
                    let path = if i % 2 == 0 { "/home/alice/f" } else { "/home/bob/f" };
                    cache.lookup(&mut source, path).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_some());
        }
        assert_eq!(cache.len(), 2);
    }
}
