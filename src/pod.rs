//! Pod model (C3): one Redis master plus its slaves, as the controller's
//! unit of monitoring. Holds the latest sentinel-reported master info and a
//! reference (by address) to the master's [`RedisNode`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::node::{NodeRegistry, RedisNode};
use crate::redis::{RedisBackend, SentinelMasterInfo};

/// Which check inside `has_errors` first failed, so the dashboard can bucket
/// pods by failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodErrorClass {
    MissingSentinels,
    NeedsReset,
    TooManySentinels,
    CannotFailover,
    InsufficientSlaveMemory,
}

#[derive(Debug, Clone, Default)]
struct PodFlags {
    valid_auth: bool,
    valid_master_connection: bool,
    has_info: bool,
    missing_sentinels: bool,
    too_many_sentinels: bool,
    needs_reset: bool,
    has_valid_slaves: bool,
}

#[derive(Debug, Default)]
struct PodState {
    auth_token: Option<String>,
    master_info: Option<SentinelMasterInfo>,
    /// Adjacency-derived: how many sentinels the constellation itself has
    /// successfully dispatched `SENTINEL MONITOR`/discovered against this
    /// pod. Written only via `set_sentinel_count`.
    sentinel_count: usize,
    /// Self-reported: the last master's own `num-other-sentinels`, as seen
    /// in its most recent `SENTINEL MASTER` reply. Written only via
    /// `set_master_info`. Distinct from `sentinel_count` — a stale sentinel
    /// can keep reporting a high count after this constellation has already
    /// removed it, which is exactly the divergence `NeedsReset` detects.
    self_reported_other_sentinels: usize,
    flags: PodFlags,
}

/// One managed pod. `name` is the key the constellation's `PodMap` uses.
pub struct RedisPod {
    pub name: String,
    pub master_ip: String,
    pub master_port: u16,
    pub quorum: usize,
    state: Mutex<PodState>,
}

#[derive(Debug, Clone)]
pub struct PodSnapshot {
    pub name: String,
    pub master_ip: String,
    pub master_port: u16,
    pub quorum: usize,
    pub sentinel_count: usize,
    pub self_reported_other_sentinels: usize,
    pub valid_auth: bool,
    pub valid_master_connection: bool,
    pub has_info: bool,
    pub missing_sentinels: bool,
    pub too_many_sentinels: bool,
    pub needs_reset: bool,
    pub has_valid_slaves: bool,
}

impl PodSnapshot {
    pub fn needed_sentinels(&self) -> usize {
        self.quorum + 1
    }

    pub fn has_quorum(&self) -> bool {
        self.sentinel_count >= self.quorum
    }
}

impl RedisPod {
    pub fn new(name: impl Into<String>, master_ip: impl Into<String>, master_port: u16, quorum: usize) -> Self {
        Self {
            name: name.into(),
            master_ip: master_ip.into(),
            master_port,
            quorum,
            state: Mutex::new(PodState::default()),
        }
    }

    pub fn master_address(&self) -> String {
        format!("{}:{}", self.master_ip, self.master_port)
    }

    pub async fn set_auth_token(&self, token: Option<String>) {
        self.state.lock().await.auth_token = token;
    }

    pub async fn auth_token(&self) -> Option<String> {
        self.state.lock().await.auth_token.clone()
    }

    pub async fn set_sentinel_count(&self, count: usize) {
        self.state.lock().await.sentinel_count = count;
    }

    pub async fn mark_needs_reset(&self) {
        self.state.lock().await.flags.needs_reset = true;
    }

    pub async fn set_master_info(&self, info: SentinelMasterInfo) {
        let mut state = self.state.lock().await;
        state.self_reported_other_sentinels = info.num_other_sentinels;
        state.master_info = Some(info);
        state.flags.has_info = true;
    }

    pub async fn snapshot(&self) -> PodSnapshot {
        let state = self.state.lock().await;
        PodSnapshot {
            name: self.name.clone(),
            master_ip: self.master_ip.clone(),
            master_port: self.master_port,
            quorum: self.quorum,
            sentinel_count: state.sentinel_count,
            self_reported_other_sentinels: state.self_reported_other_sentinels,
            valid_auth: state.flags.valid_auth,
            valid_master_connection: state.flags.valid_master_connection,
            has_info: state.flags.has_info,
            missing_sentinels: state.flags.missing_sentinels,
            too_many_sentinels: state.flags.too_many_sentinels,
            needs_reset: state.flags.needs_reset,
            has_valid_slaves: state.flags.has_valid_slaves,
        }
    }

    pub async fn has_quorum(&self) -> bool {
        let state = self.state.lock().await;
        state.sentinel_count >= self.quorum
    }

    /// Ordered checks, each stamping the flag the dashboard buckets failures
    /// by: auth present, master reachable, master auth valid, master has a
    /// recent valid update, at least one promotable slave, quorum.
    pub async fn can_failover(
        &self,
        backend: &dyn RedisBackend,
        registry: &dyn NodeRegistry,
        refresh_interval: Duration,
    ) -> bool {
        let master_address = self.master_address();
        let master = registry.add_node(&master_address, self.master_port, self.auth_token().await);
        let refreshed = master
            .update_data(backend, Some(registry), refresh_interval)
            .await;

        let mut state = self.state.lock().await;
        match refreshed {
            Ok(()) => {
                state.flags.valid_auth = true;
                state.flags.valid_master_connection = true;
                state.flags.has_info = true;
            }
            Err(crate::error::Error::AuthInvalid { .. }) => {
                state.flags.valid_auth = false;
                return false;
            }
            Err(_) => {
                state.flags.valid_master_connection = false;
                return false;
            }
        }
        drop(state);

        let snapshot = master.snapshot().await;
        if !snapshot.last_update_valid {
            let mut state = self.state.lock().await;
            state.flags.has_info = false;
            return false;
        }

        let mut has_promotable_slave = false;
        for slave_addr in &snapshot.slaves {
            if let Some(slave) = registry.get_node(slave_addr) {
                if slave.snapshot().await.is_promotable() {
                    has_promotable_slave = true;
                    break;
                }
            }
        }

        let mut state = self.state.lock().await;
        state.flags.has_valid_slaves = has_promotable_slave;
        if !has_promotable_slave {
            return false;
        }
        drop(state);

        self.has_quorum().await
    }

    /// Every slave's `max_memory` must be at least the master's; stamps
    /// `has_enough_memory_for_master` is tracked per-slave by the caller
    /// inspecting each slave's own snapshot against the master's.
    pub async fn slaves_have_enough_memory(&self, registry: &dyn NodeRegistry) -> bool {
        let master = match registry.get_node(&self.master_address()) {
            Some(node) => node,
            None => return false,
        };
        let master_snapshot = master.snapshot().await;
        for slave_addr in &master_snapshot.slaves {
            let Some(slave) = registry.get_node(slave_addr) else {
                return false;
            };
            let slave_snapshot = slave.snapshot().await;
            if slave_snapshot.max_memory < master_snapshot.max_memory {
                return false;
            }
        }
        true
    }

    /// Forces a master refresh then evaluates checks in order; the first
    /// match determines the reported error class.
    pub async fn has_errors(
        &self,
        backend: &dyn RedisBackend,
        registry: &dyn NodeRegistry,
        refresh_interval: Duration,
    ) -> Option<PodErrorClass> {
        if let Some(master) = registry.get_node(&self.master_address()) {
            let _ = master.update_data(backend, Some(registry), refresh_interval).await;
        }

        let snapshot = self.snapshot().await;
        let needed = snapshot.needed_sentinels();

        if needed > snapshot.sentinel_count {
            let mut state = self.state.lock().await;
            state.flags.missing_sentinels = true;
            return Some(PodErrorClass::MissingSentinels);
        }

        if snapshot.self_reported_other_sentinels + 1 > needed {
            let mut state = self.state.lock().await;
            state.flags.needs_reset = true;
            return Some(PodErrorClass::NeedsReset);
        }

        let reported_sentinel_count = if snapshot.self_reported_other_sentinels > 0 {
            snapshot.self_reported_other_sentinels + 1
        } else {
            0
        };
        if reported_sentinel_count >= 2 * self.quorum {
            let mut state = self.state.lock().await;
            state.flags.too_many_sentinels = true;
            return Some(PodErrorClass::TooManySentinels);
        }

        if !self.can_failover(backend, registry, refresh_interval).await {
            return Some(PodErrorClass::CannotFailover);
        }

        if !self.slaves_have_enough_memory(registry).await {
            return Some(PodErrorClass::InsufficientSlaveMemory);
        }

        None
    }
}

pub fn master_handle(registry: &dyn NodeRegistry, pod: &RedisPod) -> Option<Arc<RedisNode>> {
    registry.get_node(&pod.master_address())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeMap;
    use crate::redis::mock::MockBackend;

    fn master_info(pod: &str, num_other_sentinels: usize, quorum: usize) -> SentinelMasterInfo {
        SentinelMasterInfo {
            name: pod.to_owned(),
            ip: "10.0.0.1".to_owned(),
            port: 6379,
            runid: String::new(),
            flags: "master".to_owned(),
            link_pending_commands: 0,
            link_refcount: 1,
            last_ping_sent: 0,
            last_ok_ping_reply: 0,
            last_ping_reply: 0,
            down_after_milliseconds: 30_000,
            info_refresh: 0,
            role_reported: "master".to_owned(),
            role_reported_time: 0,
            config_epoch: 0,
            num_slaves: 0,
            num_other_sentinels,
            quorum,
            failover_timeout: 180_000,
            parallel_syncs: 1,
        }
    }

    #[tokio::test]
    async fn has_quorum_compares_sentinel_count_to_quorum() {
        let pod = RedisPod::new("alpha", "10.0.0.1", 6379, 2);
        pod.set_master_info(master_info("alpha", 1, 2)).await;
        pod.set_sentinel_count(2).await;
        assert!(pod.has_quorum().await);
    }

    #[tokio::test]
    async fn needs_reset_is_independent_of_sentinel_count() {
        let backend = MockBackend::new();
        let registry = NodeMap::new();
        let pod = RedisPod::new("alpha", "10.0.0.1", 6379, 2);
        // Adjacency-derived count satisfies MissingSentinels, but the
        // sentinel's own last-reported num-other-sentinels (4) implies 5
        // monitors, more than the 3 actually needed: a stale self-report.
        pod.set_sentinel_count(3).await;
        pod.set_master_info(master_info("alpha", 4, 2)).await;
        let class = pod
            .has_errors(&backend, &registry, Duration::from_secs(60))
            .await;
        assert_eq!(class, Some(PodErrorClass::NeedsReset));
    }

    #[tokio::test]
    async fn too_many_sentinels_is_reachable_once_needs_reset_does_not_preempt_it() {
        let backend = MockBackend::new();
        let registry = NodeMap::new();
        // quorum 1 => needed = 2. self-reported other sentinels = 1 keeps
        // NeedsReset from firing (1 + 1 == needed), while the adjacency count
        // of 4 trips TooManySentinels (>= 2 * quorum).
        let pod = RedisPod::new("alpha", "10.0.0.1", 6379, 1);
        pod.set_sentinel_count(4).await;
        pod.set_master_info(master_info("alpha", 1, 1)).await;
        let class = pod
            .has_errors(&backend, &registry, Duration::from_secs(60))
            .await;
        assert_eq!(class, Some(PodErrorClass::TooManySentinels));
    }

    #[tokio::test]
    async fn has_errors_flags_missing_sentinels_first() {
        let backend = MockBackend::new();
        let registry = NodeMap::new();
        let pod = RedisPod::new("alpha", "10.0.0.1", 6379, 2);
        pod.set_master_info(master_info("alpha", 0, 2)).await;
        let class = pod
            .has_errors(&backend, &registry, Duration::from_secs(60))
            .await;
        assert_eq!(class, Some(PodErrorClass::MissingSentinels));
    }
}
