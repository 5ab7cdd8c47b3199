//! Node model (C2): one Redis server (master or slave), identified by
//! `ip:port`. Holds the last-known `INFO` snapshot and everything derived
//! from it, refreshed at most once per `refresh_interval`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::warn;
use tokio::sync::Mutex;

use crate::error::{classify, Error, Result};
use crate::redis::info::RedisInfoAll;
use crate::redis::{LatencyEvent, RedisBackend, SlowlogEntry};

/// ≥ this percentage of `max_memory` used is treated as critical.
pub const MEMORY_CRITICAL_PCT: f64 = 80.0;
/// ≥ this percentage of `max_memory` used is treated as a warning.
pub const MEMORY_WARN_PCT: f64 = 60.0;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
struct NodeState {
    auth: Option<String>,
    info: Option<RedisInfoAll>,
    max_memory: i64,
    percent_used: f64,
    memory_use_critical: bool,
    memory_use_warn: bool,
    aof_enabled: bool,
    save_enabled: bool,
    last_start: Option<Instant>,
    latency_history_command: Vec<(u32, u32)>,
    latency_history_fast_command: Vec<(u32, u32)>,
    latency_doctor: String,
    slowlog_len: usize,
    slowlog_entries: Vec<SlowlogEntry>,
    slaves: Vec<String>,
    last_update: Option<Instant>,
    last_update_valid: bool,
    has_valid_auth: bool,
}

/// A point-in-time snapshot of a node's derived state, safe to hand to
/// callers without holding the node's internal lock.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    pub address: String,
    pub port: u16,
    pub max_memory: i64,
    pub percent_used: f64,
    pub memory_use_critical: bool,
    pub memory_use_warn: bool,
    pub aof_enabled: bool,
    pub save_enabled: bool,
    pub slaves: Vec<String>,
    pub last_update_valid: bool,
    pub has_valid_auth: bool,
    pub info: Option<RedisInfoAll>,
    pub latency_history_command: Vec<(u32, u32)>,
    pub latency_history_fast_command: Vec<(u32, u32)>,
    pub latency_doctor: String,
    pub slowlog_len: usize,
    pub slowlog_entries: Vec<SlowlogEntry>,
}

impl NodeSnapshot {
    /// `in_error_state` is true iff the node is under memory pressure or its
    /// last refresh failed.
    pub fn in_error_state(&self) -> bool {
        self.memory_use_critical || !self.last_update_valid
    }

    /// `is_promotable` iff sentinel would accept this node as a failover
    /// candidate (a nonzero `slave_priority`).
    pub fn is_promotable(&self) -> bool {
        self.info
            .as_ref()
            .is_some_and(|info| info.replication.slave_priority > 0)
    }

    /// Always false: a placeholder carried over from a free-node pool
    /// feature that never shipped, kept for `NodeRegistry` interface parity.
    pub fn is_free(&self) -> bool {
        false
    }
}

/// One Redis server. Identified by `address` (`ip:port`); all mutable state
/// lives behind an internal mutex so concurrent callers racing to refresh
/// the same node serialize rather than double-dialing.
pub struct RedisNode {
    pub address: String,
    pub port: u16,
    state: Mutex<NodeState>,
}

impl RedisNode {
    pub fn new(address: impl Into<String>, port: u16, auth: Option<String>) -> Self {
        Self {
            address: address.into(),
            port,
            state: Mutex::new(NodeState {
                auth,
                has_valid_auth: true,
                ..Default::default()
            }),
        }
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        let state = self.state.lock().await;
        NodeSnapshot {
            address: self.address.clone(),
            port: self.port,
            max_memory: state.max_memory,
            percent_used: state.percent_used,
            memory_use_critical: state.memory_use_critical,
            memory_use_warn: state.memory_use_warn,
            aof_enabled: state.aof_enabled,
            save_enabled: state.save_enabled,
            slaves: state.slaves.clone(),
            last_update_valid: state.last_update_valid,
            has_valid_auth: state.has_valid_auth,
            info: state.info.clone(),
            latency_history_command: state.latency_history_command.clone(),
            latency_history_fast_command: state.latency_history_fast_command.clone(),
            latency_doctor: state.latency_doctor.clone(),
            slowlog_len: state.slowlog_len,
            slowlog_entries: state.slowlog_entries.clone(),
        }
    }

    pub async fn set_auth(&self, auth: Option<String>) {
        self.state.lock().await.auth = auth;
    }

    /// Best-effort liveness check independent of `update_data`'s rate limit.
    pub async fn ping(&self, backend: &dyn RedisBackend) -> Result<()> {
        backend.ping(&self.address).await
    }

    /// Refresh this node's data, following the policy in `SPEC_FULL.md` §4.2.
    /// `registry` is used to recursively register and refresh this node's
    /// slaves; pass `None` to skip that recursion (e.g. when refreshing a
    /// node that is itself already a slave, to bound recursion depth at one
    /// level, matching the source's non-recursive slave walk).
    pub async fn update_data(
        &self,
        backend: &dyn RedisBackend,
        registry: Option<&dyn NodeRegistry>,
        refresh_interval: Duration,
    ) -> Result<()> {
        {
            let state = self.state.lock().await;
            if state.last_update_valid {
                if let Some(last_update) = state.last_update {
                    if last_update.elapsed() < refresh_interval {
                        return Ok(());
                    }
                }
            }
        }

        let result = self.refresh(backend).await;

        let mut state = self.state.lock().await;
        match &result {
            Ok(()) => {
                state.last_update_valid = true;
                state.last_update = Some(Instant::now());
            }
            Err(Error::AuthInvalid { .. }) => {
                state.has_valid_auth = false;
                state.last_update_valid = false;
            }
            Err(_) => {
                state.last_update_valid = false;
            }
        }
        let slaves = state.slaves.clone();
        drop(state);

        result?;

        if let Some(registry) = registry {
            for slave_addr in slaves {
                let (ip, port) = split_address(&slave_addr);
                let auth = self.state.lock().await.auth.clone();
                let slave = registry.add_node(&slave_addr, port, auth);
                if let Err(err) = Box::pin(slave.update_data(backend, None, refresh_interval)).await {
                    warn!("failed to refresh slave {ip}:{port}: {err}");
                }
            }
        }

        Ok(())
    }

    async fn refresh(&self, backend: &dyn RedisBackend) -> Result<()> {
        let raw_info = match backend.info(&self.address).await {
            Ok(raw) => raw,
            Err(err) => {
                if classify::is_auth_error(&err.to_string()) {
                    return Err(Error::AuthInvalid {
                        address: self.address.clone(),
                    });
                }
                return Err(err);
            }
        };
        let info = crate::redis::info::parse_info(&raw_info);

        let max_memory: i64 = backend
            .config_get(&self.address, "maxmemory")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let used_memory = info.memory.used_memory;
        let (percent_used, memory_use_critical) = if max_memory == 0 {
            (100.0, true)
        } else {
            let pct = (used_memory as f64 / max_memory as f64) * 100.0;
            (pct, pct >= MEMORY_CRITICAL_PCT)
        };
        let memory_use_warn = memory_use_critical || percent_used >= MEMORY_WARN_PCT;

        let save_enabled = backend
            .config_get(&self.address, "save")
            .await?
            .map(|v| !v.is_empty())
            .unwrap_or(false);

        let latency_monitoring_enabled = backend
            .config_get(&self.address, "latency-monitor-threshold")
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .is_some_and(|threshold| threshold > 0);

        let (latency_history_command, latency_history_fast_command, latency_doctor) =
            if latency_monitoring_enabled {
                let command = backend.latency_history(&self.address, LatencyEvent::Command).await?;
                let fast_command = backend
                    .latency_history(&self.address, LatencyEvent::FastCommand)
                    .await?;
                let doctor = backend.latency_doctor(&self.address).await?;
                (command, fast_command, doctor)
            } else {
                (Vec::new(), Vec::new(), String::new())
            };

        let slowlog_len = backend.slowlog_len(&self.address).await?;
        let slowlog_entries = backend.slowlog_entries(&self.address, slowlog_len).await?;

        let slaves: Vec<String> = info
            .replication
            .slaves
            .iter()
            .map(|s| format!("{}:{}", s.ip, s.port))
            .collect();

        let mut state = self.state.lock().await;
        state.has_valid_auth = true;
        state.max_memory = max_memory;
        state.percent_used = percent_used;
        state.memory_use_critical = memory_use_critical;
        state.memory_use_warn = memory_use_warn;
        state.aof_enabled = info.persistence.aof_enabled;
        state.save_enabled = save_enabled;
        state.last_start = Some(
            Instant::now()
                .checked_sub(Duration::from_secs(info.server.uptime_in_seconds))
                .unwrap_or_else(Instant::now),
        );
        state.latency_history_command = latency_history_command;
        state.latency_history_fast_command = latency_history_fast_command;
        state.latency_doctor = latency_doctor;
        state.slowlog_len = slowlog_len;
        state.slowlog_entries = slowlog_entries;
        state.slaves = slaves;
        state.info = Some(info);

        Ok(())
    }
}

fn split_address(address: &str) -> (String, u16) {
    match address.split_once(':') {
        Some((ip, port)) => (ip.to_owned(), port.parse().unwrap_or(0)),
        None => (address.to_owned(), 0),
    }
}

/// Package-level node bookkeeping (supplemented from the original system's
/// `NodeStore`/`NodeManager`), implemented here by [`NodeMap`] so the
/// constellation's node table is an explicit, injectable collaborator rather
/// than module-global state.
pub trait NodeRegistry: Send + Sync {
    fn get_nodes(&self) -> Vec<Arc<RedisNode>>;
    fn get_node(&self, address: &str) -> Option<Arc<RedisNode>>;
    fn node_count(&self) -> usize;
    fn add_node(&self, address: &str, port: u16, auth: Option<String>) -> Arc<RedisNode>;
}

/// `address -> RedisNode` table, the `NodeMap` named in `SPEC_FULL.md` §3.
#[derive(Default)]
pub struct NodeMap {
    nodes: DashMap<String, Arc<RedisNode>>,
}

impl NodeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Async variants used by code already holding an `.await` context and
    /// needing error states/free-node accounting, which require locking each
    /// node's snapshot.
    pub async fn get_nodes_in_error(&self) -> Vec<Arc<RedisNode>> {
        let mut result = Vec::new();
        for entry in self.nodes.iter() {
            if entry.value().snapshot().await.in_error_state() {
                result.push(Arc::clone(entry.value()));
            }
        }
        result
    }

    pub async fn get_free_nodes(&self) -> Vec<Arc<RedisNode>> {
        let mut result = Vec::new();
        for entry in self.nodes.iter() {
            if entry.value().snapshot().await.is_free() {
                result.push(Arc::clone(entry.value()));
            }
        }
        result
    }

    pub async fn error_node_count(&self) -> usize {
        self.get_nodes_in_error().await.len()
    }

    pub async fn free_node_count(&self) -> usize {
        self.get_free_nodes().await.len()
    }

    pub async fn has_free_nodes(&self) -> bool {
        self.free_node_count().await > 0
    }

    pub async fn has_nodes_in_error_state(&self) -> bool {
        self.error_node_count().await > 0
    }

    pub fn raw_map(&self) -> &DashMap<String, Arc<RedisNode>> {
        &self.nodes
    }
}

impl NodeRegistry for NodeMap {
    fn get_nodes(&self) -> Vec<Arc<RedisNode>> {
        self.nodes.iter().map(|e| Arc::clone(e.value())).collect()
    }

    fn get_node(&self, address: &str) -> Option<Arc<RedisNode>> {
        self.nodes.get(address).map(|e| Arc::clone(e.value()))
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn add_node(&self, address: &str, port: u16, auth: Option<String>) -> Arc<RedisNode> {
        if let Some(existing) = self.nodes.get(address) {
            return Arc::clone(existing.value());
        }
        let node = Arc::new(RedisNode::new(address, port, auth));
        self.nodes.insert(address.to_owned(), Arc::clone(&node));
        node
    }
}

/// Not part of the public surface; kept here only so `snapshot()` callers
/// that want raw wire-key access to a section the typed model doesn't cover
/// can reach it without re-parsing.
pub fn raw_section<'a>(info: &'a RedisInfoAll, section: &str) -> Option<&'a BTreeMap<String, String>> {
    match section {
        "server" => Some(&info.server.raw),
        "clients" => Some(&info.clients.raw),
        "memory" => Some(&info.memory.raw),
        "persistence" => Some(&info.persistence.raw),
        "stats" => Some(&info.stats.raw),
        "replication" => Some(&info.replication.raw),
        "cpu" => Some(&info.cpu.raw),
        other => info.other_sections.get(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::mock::MockBackend;

    #[tokio::test]
    async fn update_data_is_rate_limited() {
        let backend = MockBackend::new();
        backend.set_info(
            "10.0.0.1:6379",
            "# Server\nuptime_in_seconds:1\n# Memory\nused_memory:100\n",
        );
        backend.set_config("10.0.0.1:6379", "maxmemory", "1000");
        let node = RedisNode::new("10.0.0.1:6379", 6379, None);

        node.update_data(&backend, None, Duration::from_secs(60))
            .await
            .unwrap();
        backend.set_info("10.0.0.1:6379", "# Memory\nused_memory:999999\n");
        node.update_data(&backend, None, Duration::from_secs(60))
            .await
            .unwrap();

        let snapshot = node.snapshot().await;
        assert_eq!(snapshot.percent_used, 10.0);
    }

    #[tokio::test]
    async fn zero_max_memory_is_treated_as_critical() {
        let backend = MockBackend::new();
        backend.set_info("10.0.0.1:6379", "# Memory\nused_memory:100\n");
        let node = RedisNode::new("10.0.0.1:6379", 6379, None);
        node.update_data(&backend, None, Duration::from_secs(0))
            .await
            .unwrap();
        let snapshot = node.snapshot().await;
        assert!(snapshot.memory_use_critical);
        assert_eq!(snapshot.percent_used, 100.0);
    }

    #[tokio::test]
    async fn refresh_pulls_latency_and_slowlog_when_monitoring_enabled() {
        let backend = MockBackend::new();
        backend.set_info("10.0.0.1:6379", "# Server\nuptime_in_seconds:1\n");
        backend.set_config("10.0.0.1:6379", "latency-monitor-threshold", "100");
        backend.set_latency_history("10.0.0.1:6379", LatencyEvent::Command, vec![(1_700_000_000, 120)]);
        backend.set_latency_history("10.0.0.1:6379", LatencyEvent::FastCommand, vec![]);
        backend.set_latency_doctor("10.0.0.1:6379", "Dave, I have observed the system");
        backend.set_slowlog(
            "10.0.0.1:6379",
            vec![SlowlogEntry {
                id: 1,
                unix_timestamp: 1_700_000_000,
                execution_time_micros: 15_000,
                command: vec!["GET".to_owned(), "foo".to_owned()],
                client_address: "10.0.0.5:51234".to_owned(),
                client_name: String::new(),
            }],
        );
        let node = RedisNode::new("10.0.0.1:6379", 6379, None);

        node.update_data(&backend, None, Duration::from_secs(60))
            .await
            .unwrap();

        let snapshot = node.snapshot().await;
        assert_eq!(snapshot.latency_history_command, vec![(1_700_000_000, 120)]);
        assert!(snapshot.latency_history_fast_command.is_empty());
        assert_eq!(snapshot.latency_doctor, "Dave, I have observed the system");
        assert_eq!(snapshot.slowlog_entries.len(), 1);
        assert_eq!(snapshot.slowlog_entries[0].command, vec!["GET", "foo"]);
    }

    #[tokio::test]
    async fn refresh_skips_latency_history_when_monitoring_disabled() {
        let backend = MockBackend::new();
        backend.set_info("10.0.0.1:6379", "# Server\nuptime_in_seconds:1\n");
        backend.set_latency_history("10.0.0.1:6379", LatencyEvent::Command, vec![(1_700_000_000, 120)]);
        let node = RedisNode::new("10.0.0.1:6379", 6379, None);

        node.update_data(&backend, None, Duration::from_secs(60))
            .await
            .unwrap();

        let snapshot = node.snapshot().await;
        assert!(snapshot.latency_history_command.is_empty());
        assert!(snapshot.latency_doctor.is_empty());
    }

    #[tokio::test]
    async fn node_registry_add_node_is_idempotent() {
        let map = NodeMap::new();
        let first = map.add_node("10.0.0.1:6379", 6379, None);
        let second = map.add_node("10.0.0.1:6379", 6379, None);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(map.node_count(), 1);
    }
}
