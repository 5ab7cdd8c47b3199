//! Sentinel model (C4): a thin, pod-centric translation layer over one
//! sentinel endpoint's `SENTINEL *` subcommands (C1).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::redis::{RedisBackend, SentinelMasterInfo, SentinelReplicaInfo};

/// Locally cached subset of a `SentinelMasterInfo` reply. `SentinelMasterInfo`
/// itself is the real driver's deserialize target and carries no `Clone`, so
/// the fields this crate actually reuses (load levelling, quorum bookkeeping)
/// are copied out into this small owned record instead of cloning the whole
/// reply.
#[derive(Debug, Clone)]
pub struct PodMasterRecord {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub quorum: usize,
    pub num_other_sentinels: usize,
}

impl From<&SentinelMasterInfo> for PodMasterRecord {
    fn from(info: &SentinelMasterInfo) -> Self {
        Self {
            name: info.name.clone(),
            ip: info.ip.clone(),
            port: info.port,
            quorum: info.quorum,
            num_other_sentinels: info.num_other_sentinels,
        }
    }
}

/// One sentinel endpoint. Cheap to hold by `Arc` and share across the
/// constellation's maps; all actual I/O goes through the injected backend,
/// keyed by `address`.
pub struct Sentinel {
    pub address: String,
    /// Local cache populated by `load_pods`; `pod_count()` reads its length.
    pods: DashMap<String, PodMasterRecord>,
}

impl Sentinel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            pods: DashMap::new(),
        }
    }

    /// Enumerate all pods seen by this sentinel and populate the local cache.
    pub async fn load_pods(&self, backend: &dyn RedisBackend) -> Result<Vec<SentinelMasterInfo>> {
        let masters = backend.sentinel_masters(&self.address).await?;
        self.pods.clear();
        for master in &masters {
            self.pods.insert(master.name.clone(), PodMasterRecord::from(master));
        }
        Ok(masters)
    }

    pub fn get_pods(&self) -> HashMap<String, PodMasterRecord> {
        self.pods
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn get_pod(&self, name: &str) -> Option<PodMasterRecord> {
        self.pods.get(name).map(|e| e.value().clone())
    }

    /// Number of pods this sentinel currently monitors, used by the
    /// constellation's load-levelling selection rule.
    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    pub async fn get_master(&self, backend: &dyn RedisBackend, name: &str) -> Result<SentinelMasterInfo> {
        backend.sentinel_master(&self.address, name).await
    }

    pub async fn get_slaves(&self, backend: &dyn RedisBackend, name: &str) -> Result<Vec<SentinelReplicaInfo>> {
        backend.sentinel_slaves(&self.address, name).await
    }

    pub async fn get_sentinels(&self, backend: &dyn RedisBackend, name: &str) -> Result<Vec<String>> {
        let sentinels = backend.sentinel_sentinels(&self.address, name).await?;
        Ok(sentinels
            .into_iter()
            .map(|s| format!("{}:{}", s.ip, s.port))
            .collect())
    }

    /// `SENTINEL MONITOR` then, if an auth token is supplied, `SENTINEL SET
    /// <name> AUTHPASS <token>`. The pod this call produces locally has
    /// `sentinel_count = 1`; the caller aggregates counts across sentinels.
    pub async fn monitor_pod(
        &self,
        backend: &dyn RedisBackend,
        name: &str,
        ip: &str,
        port: u16,
        quorum: usize,
        auth: Option<&str>,
    ) -> Result<()> {
        backend
            .sentinel_monitor(&self.address, name, ip, port, quorum)
            .await?;
        if let Some(token) = auth {
            backend.sentinel_set_authpass(&self.address, name, token).await?;
        }
        self.pods.remove(name);
        Ok(())
    }

    pub async fn remove_pod(&self, backend: &dyn RedisBackend, name: &str) -> Result<()> {
        backend.sentinel_remove(&self.address, name).await?;
        self.pods.remove(name);
        Ok(())
    }

    pub async fn do_failover(&self, backend: &dyn RedisBackend, name: &str) -> Result<()> {
        backend.sentinel_failover(&self.address, name).await
    }

    pub async fn reset_pod(&self, backend: &dyn RedisBackend, name: &str) -> Result<usize> {
        backend.sentinel_reset(&self.address, name).await
    }

    pub async fn get_master_addr_by_name(
        &self,
        backend: &dyn RedisBackend,
        name: &str,
    ) -> Result<Option<(String, u16)>> {
        backend.sentinel_get_master_addr_by_name(&self.address, name).await
    }
}

pub type SentinelHandle = Arc<Sentinel>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::mock::MockBackend;

    #[tokio::test]
    async fn load_pods_populates_local_cache() {
        let backend = MockBackend::new();
        backend.seed_monitored_pod("s1:26379", "alpha", "10.0.0.1", 6379, 2, 2);
        let sentinel = Sentinel::new("s1:26379");
        let masters = sentinel.load_pods(&backend).await.unwrap();
        assert_eq!(masters.len(), 1);
        assert_eq!(sentinel.pod_count(), 1);
        assert!(sentinel.get_pod("alpha").is_some());
    }

    #[tokio::test]
    async fn monitor_pod_invalidates_local_cache_entry() {
        let backend = MockBackend::new();
        let sentinel = Sentinel::new("s1:26379");
        sentinel
            .monitor_pod(&backend, "alpha", "10.0.0.1", 6379, 2, None)
            .await
            .unwrap();
        assert_eq!(backend.pod_count("s1:26379"), 1);
    }
}
