//! An in-process fake satisfying [`RedisBackend`], used by every test in this
//! crate so the constellation controller's logic can be exercised without a
//! real Redis/Sentinel fleet. Mirrors the underlying Redis driver's own
//! convention of testing protocol-adjacent logic against an in-memory double.

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;

use super::{
    LatencyEvent, RedisBackend, RedisFuture, RoleResult, SentinelInfo, SentinelMasterInfo,
    SentinelReplicaInfo, SlowlogEntry,
};
use crate::error::{Error, Result};

#[derive(Clone, Default)]
struct MonitoredPod {
    ip: String,
    port: u16,
    quorum: usize,
    num_other_sentinels: usize,
    auth_token: Option<String>,
    no_good_slave: bool,
}

/// Everything one mocked endpoint (a sentinel or a Redis node address) can
/// answer. Configure with the builder methods before handing the backend to
/// a [`crate::constellation::Constellation`] under test.
#[derive(Default)]
struct Endpoint {
    reachable: bool,
    info: String,
    config: HashMap<String, String>,
    role: Option<Role>,
    /// pod name -> record, answers `SENTINEL MASTERS`/`MASTER`.
    monitored: HashMap<String, MonitoredPod>,
    /// pod name -> sentinel addresses that (according to this endpoint) also
    /// monitor the pod, answers `SENTINEL SENTINELS`.
    sentinels_for_pod: HashMap<String, Vec<String>>,
    /// pod name -> replica addresses, answers `SENTINEL REPLICAS`/`SLAVES`.
    replicas_for_pod: HashMap<String, Vec<String>>,
    auth_rejected: bool,
    latency_history: HashMap<LatencyEventKey, Vec<(u32, u32)>>,
    latency_doctor: String,
    slowlog: Vec<SlowlogEntry>,
    /// Set by [`MockBackend::mark_already_replicating`] to make `replica_of`
    /// return the "already connected" error `add_slave_to_pod` classifies.
    already_replicating: bool,
    replica_of_target: Option<(String, u16)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LatencyEventKey {
    Command,
    FastCommand,
}

impl From<LatencyEvent> for LatencyEventKey {
    fn from(event: LatencyEvent) -> Self {
        match event {
            LatencyEvent::Command => LatencyEventKey::Command,
            LatencyEvent::FastCommand => LatencyEventKey::FastCommand,
        }
    }
}

#[derive(Clone, Copy)]
enum Role {
    Master,
    Replica,
}

/// A hand-built double for the entire fleet: every address this process
/// would dial is pre-seeded here rather than actually opening a socket.
#[derive(Default)]
pub struct MockBackend {
    endpoints: DashMap<String, Mutex<Endpoint>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_endpoint<T>(&self, address: &str, f: impl FnOnce(&mut Endpoint) -> Result<T>) -> Result<T> {
        let entry = self
            .endpoints
            .entry(address.to_owned())
            .or_insert_with(|| Mutex::new(Endpoint { reachable: true, ..Default::default() }));
        let mut guard = entry.lock().expect("mock endpoint mutex poisoned");
        if !guard.reachable {
            return Err(Error::Unreachable {
                address: address.to_owned(),
                source: rustis::Error::Client("mock: endpoint marked unreachable".to_owned()),
            });
        }
        f(&mut guard)
    }

    /// Register an address as present but unreachable (dial fails). Used to
    /// populate `BadSentinels` in tests.
    pub fn mark_unreachable(&self, address: &str) {
        self.endpoints
            .entry(address.to_owned())
            .or_insert_with(|| Mutex::new(Endpoint::default()))
            .lock()
            .expect("mock endpoint mutex poisoned")
            .reachable = false;
    }

    pub fn set_info(&self, address: &str, info: &str) {
        self.with_endpoint(address, |e| {
            e.info = info.to_owned();
            Ok(())
        })
        .expect("set_info on a reachable mock endpoint cannot fail");
    }

    pub fn set_config(&self, address: &str, key: &str, value: &str) {
        self.with_endpoint(address, |e| {
            e.config.insert(key.to_owned(), value.to_owned());
            Ok(())
        })
        .expect("set_config on a reachable mock endpoint cannot fail");
    }

    pub fn set_role_master(&self, address: &str) {
        self.with_endpoint(address, |e| {
            e.role = Some(Role::Master);
            Ok(())
        })
        .expect("set_role_master on a reachable mock endpoint cannot fail");
    }

    pub fn set_auth_rejected(&self, address: &str) {
        self.with_endpoint(address, |e| {
            e.auth_rejected = true;
            Ok(())
        })
        .expect("set_auth_rejected on a reachable mock endpoint cannot fail");
    }

    /// Seed a sentinel address with a pod it already monitors, as if a prior
    /// `SENTINEL MONITOR` had succeeded.
    pub fn seed_monitored_pod(
        &self,
        sentinel_address: &str,
        pod_name: &str,
        ip: &str,
        port: u16,
        quorum: usize,
        num_other_sentinels: usize,
    ) {
        self.with_endpoint(sentinel_address, |e| {
            e.monitored.insert(
                pod_name.to_owned(),
                MonitoredPod {
                    ip: ip.to_owned(),
                    port,
                    quorum,
                    num_other_sentinels,
                    auth_token: None,
                    no_good_slave: false,
                },
            );
            Ok(())
        })
        .expect("seed_monitored_pod on a reachable mock endpoint cannot fail");
    }

    pub fn seed_sentinels_for_pod(&self, sentinel_address: &str, pod_name: &str, peers: &[&str]) {
        self.with_endpoint(sentinel_address, |e| {
            e.sentinels_for_pod
                .insert(pod_name.to_owned(), peers.iter().map(|s| (*s).to_owned()).collect());
            Ok(())
        })
        .expect("seed_sentinels_for_pod on a reachable mock endpoint cannot fail");
    }

    pub fn seed_no_good_slave(&self, sentinel_address: &str, pod_name: &str) {
        self.with_endpoint(sentinel_address, |e| {
            if let Some(pod) = e.monitored.get_mut(pod_name) {
                pod.no_good_slave = true;
            }
            Ok(())
        })
        .expect("seed_no_good_slave on a reachable mock endpoint cannot fail");
    }

    /// Number of pods this mock endpoint currently reports monitoring —
    /// mirrors `PodCount()` (C4), used by tests asserting the balancing rule.
    pub fn pod_count(&self, sentinel_address: &str) -> usize {
        self.with_endpoint(sentinel_address, |e| Ok(e.monitored.len()))
            .unwrap_or(0)
    }

    pub fn set_latency_history(&self, address: &str, event: LatencyEvent, samples: Vec<(u32, u32)>) {
        self.with_endpoint(address, |e| {
            e.latency_history.insert(event.into(), samples);
            Ok(())
        })
        .expect("set_latency_history on a reachable mock endpoint cannot fail");
    }

    pub fn set_latency_doctor(&self, address: &str, report: &str) {
        self.with_endpoint(address, |e| {
            e.latency_doctor = report.to_owned();
            Ok(())
        })
        .expect("set_latency_doctor on a reachable mock endpoint cannot fail");
    }

    pub fn set_slowlog(&self, address: &str, entries: Vec<SlowlogEntry>) {
        self.with_endpoint(address, |e| {
            e.slowlog = entries;
            Ok(())
        })
        .expect("set_slowlog on a reachable mock endpoint cannot fail");
    }

    /// Makes `replica_of` against this address fail with the "already
    /// connected to specified master" error real Redis returns for a
    /// redundant `REPLICAOF`.
    pub fn mark_already_replicating(&self, address: &str) {
        self.with_endpoint(address, |e| {
            e.already_replicating = true;
            Ok(())
        })
        .expect("mark_already_replicating on a reachable mock endpoint cannot fail");
    }

    /// The `(master_ip, master_port)` a test-asserted `replica_of` call was
    /// last issued with against this address, if any.
    pub fn replica_of_target(&self, address: &str) -> Option<(String, u16)> {
        self.with_endpoint(address, |e| Ok(e.replica_of_target.clone()))
            .unwrap_or(None)
    }
}

fn master_info(name: &str, pod: &MonitoredPod) -> SentinelMasterInfo {
    SentinelMasterInfo {
        name: name.to_owned(),
        ip: pod.ip.clone(),
        port: pod.port,
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
        num_other_sentinels: pod.num_other_sentinels,
        quorum: pod.quorum,
        failover_timeout: 180_000,
        parallel_syncs: 1,
    }
}

fn sentinel_info(address: &str) -> SentinelInfo {
    let (ip, port) = address.split_once(':').unwrap_or((address, "0"));
    SentinelInfo {
        name: address.to_owned(),
        ip: ip.to_owned(),
        port: port.parse().unwrap_or_default(),
        runid: String::new(),
        flags: "sentinel".to_owned(),
        link_pending_commands: 0,
        link_refcount: 1,
        last_ping_sent: 0,
        last_ok_ping_reply: 0,
        last_ping_reply: 0,
        down_after_milliseconds: 30_000,
        last_hello_message: 0,
        voted_leader: "?".to_owned(),
        voted_leader_epoch: 0,
    }
}

fn replica_info(address: &str, master_ip: &str, master_port: u16) -> SentinelReplicaInfo {
    let (ip, port) = address.split_once(':').unwrap_or((address, "0"));
    SentinelReplicaInfo {
        name: address.to_owned(),
        ip: ip.to_owned(),
        port: port.parse().unwrap_or_default(),
        runid: String::new(),
        flags: "slave".to_owned(),
        link_pending_commands: 0,
        link_refcount: 1,
        last_ping_sent: 0,
        last_ok_ping_reply: 0,
        last_ping_reply: 0,
        down_after_milliseconds: 30_000,
        info_refresh: 0,
        role_reported: "slave".to_owned(),
        role_reported_time: 0,
        master_link_down_time: 0,
        master_link_status: "ok".to_owned(),
        master_host: master_ip.to_owned(),
        master_port,
        slave_priority: 100,
        slave_repl_offset: 0,
        replica_announced: 1,
    }
}

impl RedisBackend for MockBackend {
    fn info(&self, address: &str) -> RedisFuture<'_, String> {
        let result = self.with_endpoint(address, |e| Ok(e.info.clone()));
        Box::pin(async move { result })
    }

    fn config_get(&self, address: &str, param: &str) -> RedisFuture<'_, Option<String>> {
        let result = self.with_endpoint(address, |e| Ok(e.config.get(param).cloned()));
        Box::pin(async move { result })
    }

    fn role(&self, address: &str) -> RedisFuture<'_, RoleResult> {
        let result = self.with_endpoint(address, |e| {
            Ok(match e.role {
                Some(Role::Replica) => RoleResult::Replica {
                    master_ip: String::new(),
                    master_port: 0,
                    state: rustis::commands::ReplicationState::Connected,
                    amount_data_received: 0,
                },
                _ => RoleResult::Master {
                    master_replication_offset: 0,
                    replica_infos: Vec::new(),
                },
            })
        });
        Box::pin(async move { result })
    }

    fn ping(&self, address: &str) -> RedisFuture<'_, ()> {
        let result = self.with_endpoint(address, |_| Ok(()));
        Box::pin(async move { result })
    }

    fn sentinel_masters(&self, address: &str) -> RedisFuture<'_, Vec<SentinelMasterInfo>> {
        let result = self.with_endpoint(address, |e| {
            Ok(e.monitored
                .iter()
                .map(|(name, pod)| master_info(name, pod))
                .collect())
        });
        Box::pin(async move { result })
    }

    fn sentinel_master(&self, address: &str, name: &str) -> RedisFuture<'_, SentinelMasterInfo> {
        let name = name.to_owned();
        let result = self.with_endpoint(address, |e| {
            e.monitored
                .get(&name)
                .map(|pod| master_info(&name, pod))
                .ok_or_else(|| Error::NotFound { pod: name.clone() })
        });
        Box::pin(async move { result })
    }

    fn sentinel_slaves(
        &self,
        address: &str,
        name: &str,
    ) -> RedisFuture<'_, Vec<SentinelReplicaInfo>> {
        let name = name.to_owned();
        let result = self.with_endpoint(address, |e| {
            let pod = e.monitored.get(&name);
            Ok(e.replicas_for_pod
                .get(&name)
                .map(|replicas| {
                    replicas
                        .iter()
                        .map(|addr| {
                            let (ip, port) = pod
                                .map(|p| (p.ip.as_str(), p.port))
                                .unwrap_or(("", 0));
                            replica_info(addr, ip, port)
                        })
                        .collect()
                })
                .unwrap_or_default())
        });
        Box::pin(async move { result })
    }

    fn sentinel_sentinels(&self, address: &str, name: &str) -> RedisFuture<'_, Vec<SentinelInfo>> {
        let name = name.to_owned();
        let result = self.with_endpoint(address, |e| {
            Ok(e.sentinels_for_pod
                .get(&name)
                .map(|peers| peers.iter().map(|addr| sentinel_info(addr)).collect())
                .unwrap_or_default())
        });
        Box::pin(async move { result })
    }

    fn sentinel_monitor(
        &self,
        address: &str,
        name: &str,
        ip: &str,
        port: u16,
        quorum: usize,
    ) -> RedisFuture<'_, ()> {
        let (name, ip) = (name.to_owned(), ip.to_owned());
        let result = self.with_endpoint(address, |e| {
            if e.auth_rejected {
                return Err(Error::AuthInvalid {
                    address: address.to_owned(),
                });
            }
            e.monitored.insert(
                name.clone(),
                MonitoredPod {
                    ip,
                    port,
                    quorum,
                    num_other_sentinels: 0,
                    auth_token: None,
                    no_good_slave: false,
                },
            );
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn sentinel_set_authpass(&self, address: &str, name: &str, token: &str) -> RedisFuture<'_, ()> {
        let (name, token) = (name.to_owned(), token.to_owned());
        let result = self.with_endpoint(address, |e| {
            if let Some(pod) = e.monitored.get_mut(&name) {
                pod.auth_token = Some(token);
            }
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn sentinel_remove(&self, address: &str, name: &str) -> RedisFuture<'_, ()> {
        let name = name.to_owned();
        let result = self.with_endpoint(address, |e| {
            e.monitored.remove(&name);
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn sentinel_failover(&self, address: &str, name: &str) -> RedisFuture<'_, ()> {
        let name = name.to_owned();
        let result = self.with_endpoint(address, |e| {
            match e.monitored.get(&name) {
                Some(pod) if pod.no_good_slave => Err(Error::NoGoodSlave { pod: name.clone() }),
                Some(_) => Ok(()),
                None => Err(Error::NotFound { pod: name.clone() }),
            }
        });
        Box::pin(async move { result })
    }

    fn sentinel_reset(&self, address: &str, pattern: &str) -> RedisFuture<'_, usize> {
        let pattern = pattern.to_owned();
        let result = self.with_endpoint(address, |e| {
            let reset = e
                .monitored
                .keys()
                .filter(|name| pattern == "*" || *name == &pattern)
                .count();
            Ok(reset)
        });
        Box::pin(async move { result })
    }

    fn sentinel_get_master_addr_by_name(
        &self,
        address: &str,
        name: &str,
    ) -> RedisFuture<'_, Option<(String, u16)>> {
        let name = name.to_owned();
        let result = self.with_endpoint(address, |e| {
            Ok(e.monitored.get(&name).map(|pod| (pod.ip.clone(), pod.port)))
        });
        Box::pin(async move { result })
    }

    fn latency_history(&self, address: &str, event: LatencyEvent) -> RedisFuture<'_, Vec<(u32, u32)>> {
        let result = self.with_endpoint(address, |e| {
            Ok(e.latency_history.get(&event.into()).cloned().unwrap_or_default())
        });
        Box::pin(async move { result })
    }

    fn latency_doctor(&self, address: &str) -> RedisFuture<'_, String> {
        let result = self.with_endpoint(address, |e| Ok(e.latency_doctor.clone()));
        Box::pin(async move { result })
    }

    fn slowlog_len(&self, address: &str) -> RedisFuture<'_, usize> {
        let result = self.with_endpoint(address, |e| Ok(e.slowlog.len()));
        Box::pin(async move { result })
    }

    fn slowlog_entries(&self, address: &str, count: usize) -> RedisFuture<'_, Vec<SlowlogEntry>> {
        let result = self.with_endpoint(address, |e| {
            Ok(e.slowlog.iter().take(count).cloned().collect())
        });
        Box::pin(async move { result })
    }

    fn replica_of(&self, address: &str, master_ip: &str, master_port: u16) -> RedisFuture<'_, ()> {
        let master_ip = master_ip.to_owned();
        let result = self.with_endpoint(address, |e| {
            if e.already_replicating {
                return Err(Error::Redis(rustis::Error::Client(
                    "ERR Already connected to specified master".to_owned(),
                )));
            }
            e.replica_of_target = Some((master_ip, master_port));
            Ok(())
        });
        Box::pin(async move { result })
    }

    fn config_set(&self, address: &str, key: &str, value: &str) -> RedisFuture<'_, ()> {
        let (key, value) = (key.to_owned(), value.to_owned());
        let result = self.with_endpoint(address, |e| {
            e.config.insert(key, value);
            Ok(())
        });
        Box::pin(async move { result })
    }
}
