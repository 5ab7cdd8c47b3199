//! The key/value sideband store (C7). The core only ever needs `put`/`get`/`list`
//! over byte values — no transactions, no schema. Production deployments inject
//! a real backing store; [`MemoryKvStore`] is the in-process implementation used
//! by this crate's own binary and its tests.

use dashmap::DashMap;

use crate::error::{Error, Result};

/// Byte-valued hierarchical KV store, injected into [`crate::constellation::Constellation`]
/// at construction.
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    /// Every stored key with the given prefix.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// An in-process `KvStore` backed by a concurrent map. Not persisted across
/// restarts; stands in for a real KV service (etcd, consul, …) in tests and
/// standalone runs.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_owned(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// Convenience helpers for the string-valued keys the constellation persists.
pub trait KvStoreExt: KvStore {
    fn put_str(&self, key: &str, value: &str) -> Result<()> {
        self.put(key, value.as_bytes().to_vec())
    }

    fn get_str(&self, key: &str) -> Result<Option<String>> {
        match self.get(key)? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Kv(e.to_string())),
            None => Ok(None),
        }
    }
}

impl<T: KvStore + ?Sized> KvStoreExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let kv = MemoryKvStore::new();
        kv.put_str("redskull/constellations/c1/pods/alpha/quorum", "2")
            .unwrap();
        assert_eq!(
            kv.get_str("redskull/constellations/c1/pods/alpha/quorum")
                .unwrap(),
            Some("2".to_owned())
        );
    }

    #[test]
    fn list_returns_only_matching_prefix() {
        let kv = MemoryKvStore::new();
        kv.put_str("redskull/pods/alpha/quorum", "2").unwrap();
        kv.put_str("redskull/pods/beta/quorum", "3").unwrap();
        kv.put_str("redskull/sentinels/s1/ip", "10.0.0.1").unwrap();

        let mut pods = kv.list("redskull/pods/").unwrap();
        pods.sort();
        assert_eq!(
            pods,
            vec![
                "redskull/pods/alpha/quorum".to_owned(),
                "redskull/pods/beta/quorum".to_owned(),
            ]
        );
    }

    #[test]
    fn missing_key_returns_none() {
        let kv = MemoryKvStore::new();
        assert_eq!(kv.get_str("nope").unwrap(), None);
    }
}
