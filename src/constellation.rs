//! Constellation controller (C5) — the top object. Owns the pod, node, and
//! sentinel maps and the pod↔sentinel adjacency index; performs discovery,
//! balancing, failover coordination, and health aggregation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::join_all;
use log::{debug, error, warn};
use rand::Rng;
use tokio::sync::Mutex;

use crate::config::{ParsedConfig, SentinelPodConfig};
use crate::error::{classify, Error, Result};
use crate::kv::KvStore;
use crate::node::{NodeMap, NodeRegistry, NodeSnapshot, DEFAULT_REFRESH_INTERVAL};
use crate::pod::RedisPod;
use crate::redis::RedisBackend;
use crate::sentinel::Sentinel;

/// Settling/caching durations, all overridable so tests can zero them out.
#[derive(Debug, Clone)]
pub struct ConstellationSettings {
    pub refresh_interval: Duration,
    pub monitor_settle: Duration,
    pub rebalance_settle: Duration,
    pub reset_settle: Duration,
    pub error_cache_ttl: Duration,
}

impl Default for ConstellationSettings {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            monitor_settle: Duration::from_secs(2),
            rebalance_settle: Duration::from_millis(500),
            reset_settle: Duration::from_secs(2),
            error_cache_ttl: Duration::from_secs(3),
        }
    }
}

/// Point-in-time rollup, computed on demand and never cached (`SPEC_FULL.md`
/// §3); unlike the error-pod cache there is no correctness requirement
/// forcing memoization here.
#[derive(Debug, Clone, Default)]
pub struct ConstellationStats {
    pub pod_count: usize,
    pub node_count: usize,
    pub sentinel_count: usize,
    pub total_pod_memory_bytes: i64,
    pub total_node_memory_bytes: i64,
    pub pod_sizes: HashMap<String, usize>,
    pub memory_used_bytes: i64,
    pub memory_pct_avail: f64,
}

struct ErrorCache {
    checked_at: Option<Instant>,
    pods_in_error: Vec<String>,
}

/// The singleton per process. Cheap to wrap in an `Arc` and share with the
/// RPC front-end (C8); construction is the only place the KV store and
/// backend are injected.
pub struct Constellation {
    backend: Arc<dyn RedisBackend>,
    kv: Arc<dyn KvStore>,
    settings: ConstellationSettings,

    pods: DashMap<String, Arc<RedisPod>>,
    nodes: NodeMap,
    remote_sentinels: DashMap<String, Arc<Sentinel>>,
    bad_sentinels: DashMap<String, Arc<Sentinel>>,
    pod_to_sentinels: DashMap<String, Vec<String>>,
    local_pod_map: DashMap<String, ()>,
    remote_pod_map: DashMap<String, ()>,
    configured_sentinels: DashMap<String, ()>,
    managed_pod_configs: DashMap<String, SentinelPodConfig>,
    pod_auth_map: DashMap<String, String>,

    local_sentinel: Arc<Sentinel>,
    local_address: String,

    error_cache: Mutex<ErrorCache>,
}

const KV_BASE: &str = "redskull/constellations/default";

impl Constellation {
    /// Bootstrap discovery (`SPEC_FULL.md` §4.5): parse the config, connect
    /// to the local sentinel, seed every managed pod, then crawl outward
    /// through every configured sentinel.
    pub async fn bootstrap(
        parsed: ParsedConfig,
        local_override: Option<String>,
        backend: Arc<dyn RedisBackend>,
        kv: Arc<dyn KvStore>,
        settings: ConstellationSettings,
    ) -> Result<Self> {
        let local_address = local_override
            .or_else(|| {
                let host = parsed.local.host.clone()?;
                let port = parsed.local.port?;
                Some(format!("{host}:{port}"))
            })
            .ok_or_else(|| Error::FatalBootstrap {
                address: "<unresolved>".to_owned(),
                source: rustis::Error::Client("no local sentinel address configured".to_owned()),
            })?;

        backend.ping(&local_address).await.map_err(|source_err| {
            let source = match source_err {
                Error::Redis(e) => e,
                other => rustis::Error::Client(other.to_string()),
            };
            Error::FatalBootstrap {
                address: local_address.clone(),
                source,
            }
        })?;

        let local_sentinel = Arc::new(Sentinel::new(local_address.clone()));

        let constellation = Self {
            backend,
            kv,
            settings,
            pods: DashMap::new(),
            nodes: NodeMap::new(),
            remote_sentinels: DashMap::new(),
            bad_sentinels: DashMap::new(),
            pod_to_sentinels: DashMap::new(),
            local_pod_map: DashMap::new(),
            remote_pod_map: DashMap::new(),
            configured_sentinels: DashMap::new(),
            managed_pod_configs: DashMap::new(),
            pod_auth_map: DashMap::new(),
            local_sentinel,
            local_address,
            error_cache: Mutex::new(ErrorCache {
                checked_at: None,
                pods_in_error: Vec::new(),
            }),
        };

        for (name, pod_config) in &parsed.pods {
            constellation.seed_managed_pod(name, pod_config).await;
        }

        for address in &parsed.configured_sentinels {
            constellation.configured_sentinels.insert(address.clone(), ());
        }
        for address in &parsed.configured_sentinels {
            if let Err(err) = constellation.add_sentinel_by_address(address).await {
                warn!("discovery: could not add configured sentinel {address}: {err}");
            }
        }

        Ok(constellation)
    }

    async fn seed_managed_pod(&self, name: &str, pod_config: &SentinelPodConfig) {
        self.managed_pod_configs
            .insert(name.to_owned(), pod_config.clone());
        self.persist_pod_config(pod_config).await;

        let pod = Arc::new(RedisPod::new(
            name.to_owned(),
            pod_config.ip.clone(),
            pod_config.port,
            pod_config.quorum,
        ));
        pod.set_auth_token(pod_config.auth_token.clone()).await;

        let master_addr = match self
            .local_sentinel
            .get_master_addr_by_name(self.backend.as_ref(), name)
            .await
        {
            Ok(Some((ip, port))) => {
                self.local_pod_map.insert(name.to_owned(), ());
                Some((ip, port))
            }
            Ok(None) | Err(_) => {
                self.remote_pod_map.insert(name.to_owned(), ());
                None
            }
        };
        let (ip, port) = master_addr.unwrap_or((pod_config.ip.clone(), pod_config.port));
        let master_address = format!("{ip}:{port}");

        let master = self
            .nodes
            .add_node(&master_address, port, pod_config.auth_token.clone());
        if let Err(err) = master
            .update_data(
                self.backend.as_ref(),
                Some(&self.nodes),
                self.settings.refresh_interval,
            )
            .await
        {
            warn!("bootstrap: could not load master {master_address} for pod {name}: {err}");
        }

        match self.local_sentinel.get_master(self.backend.as_ref(), name).await {
            Ok(info) => pod.set_master_info(info).await,
            Err(err) => debug!("bootstrap: local sentinel has no record for pod {name}: {err}"),
        }

        // The config's own `known-sentinel` declarations are this pod's
        // adjacency list at bootstrap time, before any discovery crawl has
        // run; seed `pod_to_sentinels` from them (plus the local sentinel
        // itself, which monitors every managed pod by definition).
        let mut adjacency: Vec<String> = pod_config.sentinels.keys().cloned().collect();
        if !adjacency.contains(&self.local_address) {
            adjacency.push(self.local_address.clone());
        }
        pod.set_sentinel_count(adjacency.len()).await;
        self.pod_to_sentinels.insert(name.to_owned(), adjacency);

        self.pods.insert(name.to_owned(), pod);
    }

    async fn persist_pod_config(&self, pod_config: &SentinelPodConfig) {
        let base = format!("{KV_BASE}/pods/{}", pod_config.name);
        let _ = self.kv.put(&format!("{base}/quorum"), pod_config.quorum.to_string().into_bytes());
        let _ = self
            .kv
            .put(&format!("{base}/master/address"), pod_config.address().into_bytes());
        if let Some(token) = &pod_config.auth_token {
            let _ = self.kv.put(&format!("{base}/auth"), token.clone().into_bytes());
        }
    }

    /// Add `address` as a remote sentinel and recurse into its peers and
    /// pods. No-op if `address` is the local sentinel or already known.
    pub async fn add_sentinel_by_address(&self, address: &str) -> Result<()> {
        if address == self.local_address
            || self.remote_sentinels.contains_key(address)
            || self.bad_sentinels.contains_key(address)
        {
            return Ok(());
        }

        if let Err(err) = self.backend.ping(address).await {
            warn!("discovery: sentinel {address} unreachable: {err}");
            self.bad_sentinels
                .insert(address.to_owned(), Arc::new(Sentinel::new(address)));
            return Err(err);
        }

        let sentinel = Arc::new(Sentinel::new(address));
        self.remote_sentinels.insert(address.to_owned(), Arc::clone(&sentinel));

        let masters = sentinel.load_pods(self.backend.as_ref()).await?;
        for master in masters {
            let pod_name = master.name.clone();
            let already_known = self.pods.contains_key(&pod_name);

            let master_address = format!("{}:{}", master.ip, master.port);
            let node = self.nodes.add_node(&master_address, master.port, None);
            if let Err(err) = node
                .update_data(self.backend.as_ref(), Some(&self.nodes), self.settings.refresh_interval)
                .await
            {
                debug!("discovery: could not load node {master_address}: {err}");
            }

            if !already_known {
                let pod = Arc::new(RedisPod::new(
                    pod_name.clone(),
                    master.ip.clone(),
                    master.port,
                    master.quorum,
                ));
                pod.set_master_info(master).await;
                self.remote_pod_map.insert(pod_name.clone(), ());
                self.pods.insert(pod_name.clone(), pod);
            }

            let peers = self
                .backend
                .sentinel_sentinels(address, &pod_name)
                .await
                .unwrap_or_default();
            let mut peer_addresses: Vec<String> = peers
                .iter()
                .map(|p| format!("{}:{}", p.ip, p.port))
                .collect();
            peer_addresses.push(address.to_owned());
            let adjacency_count = self
                .pod_to_sentinels
                .entry(pod_name.clone())
                .and_modify(|existing| {
                    for addr in &peer_addresses {
                        if !existing.contains(addr) {
                            existing.push(addr.clone());
                        }
                    }
                })
                .or_insert(peer_addresses)
                .len();
            if let Some(pod) = self.pods.get(&pod_name) {
                pod.value().set_sentinel_count(adjacency_count).await;
            }

            for peer in peers {
                let peer_address = format!("{}:{}", peer.ip, peer.port);
                if peer_address == self.local_address
                    || peer_address == address
                    || self.remote_sentinels.contains_key(&peer_address)
                    || self.bad_sentinels.contains_key(&peer_address)
                {
                    continue;
                }
                Box::pin(self.add_sentinel_by_address(&peer_address)).await.ok();
            }
        }

        Ok(())
    }

    /// `needed = quorum + 1`; persists the auth token and pod config, then
    /// fans out `SENTINEL MONITOR` to the selected sentinels, counting
    /// successes. Partial monitors are left in place on failure — a later
    /// `balance_pod` completes or cleans them up.
    pub async fn monitor_pod(
        &self,
        name: &str,
        ip: &str,
        port: u16,
        quorum: usize,
        auth: Option<String>,
    ) -> Result<()> {
        if self.pods.contains_key(name) {
            warn!("monitor_pod: pod {name} already known, skipping duplicate monitor");
            return Ok(());
        }

        let needed = quorum + 1;
        let selected = self.get_available_sentinels(name, needed).await?;

        let pod_config = SentinelPodConfig {
            name: name.to_owned(),
            ip: ip.to_owned(),
            port,
            quorum,
            auth_token: auth.clone(),
            sentinels: HashMap::new(),
        };
        self.managed_pod_configs.insert(name.to_owned(), pod_config.clone());
        self.persist_pod_config(&pod_config).await;
        if let Some(token) = &auth {
            self.pod_auth_map.insert(name.to_owned(), token.clone());
        }

        let results = join_all(selected.iter().map(|sentinel| {
            let auth = auth.clone();
            async move {
                sentinel
                    .monitor_pod(self.backend.as_ref(), name, ip, port, quorum, auth.as_deref())
                    .await
            }
        }))
        .await;

        let mut successful_addresses = Vec::new();
        let mut successes = 0usize;
        let mut local_participated = false;
        for (sentinel, result) in selected.iter().zip(results.iter()) {
            match result {
                Ok(()) => {
                    successes += 1;
                    successful_addresses.push(sentinel.address.clone());
                    if sentinel.address == self.local_address {
                        local_participated = true;
                    }
                }
                Err(err) => warn!("monitor_pod: sentinel {} rejected monitor: {err}", sentinel.address),
            }
        }

        tokio::time::sleep(self.settings.monitor_settle).await;

        self.pod_to_sentinels.insert(name.to_owned(), successful_addresses);
        let pod = Arc::new(RedisPod::new(name.to_owned(), ip.to_owned(), port, quorum));
        pod.set_auth_token(auth).await;
        pod.set_sentinel_count(successes).await;
        self.pods.insert(name.to_owned(), Arc::clone(&pod));

        if local_participated {
            self.local_pod_map.insert(name.to_owned(), ());
        } else {
            self.remote_pod_map.insert(name.to_owned(), ());
        }

        if successes >= quorum {
            Ok(())
        } else {
            Err(Error::QuorumNotReached {
                pod: name.to_owned(),
                successes,
                quorum,
            })
        }
    }

    /// Filter first (drop sentinels already monitoring the pod), then sort
    /// by ascending `pod_count` (load levelling), then fail fast if fewer
    /// than `needed` candidates remain. See `SPEC_FULL.md` §4.5 and the
    /// REDESIGN FLAG in §9 — this corrects the original sort-then-filter
    /// ordering rather than reproducing it.
    pub async fn get_available_sentinels(&self, pod_name: &str, needed: usize) -> Result<Vec<Arc<Sentinel>>> {
        let already_monitoring: HashSet<String> = self
            .pod_to_sentinels
            .get(pod_name)
            .map(|entry| entry.value().iter().cloned().collect())
            .unwrap_or_default();

        let mut candidates: Vec<Arc<Sentinel>> = std::iter::once(Arc::clone(&self.local_sentinel))
            .chain(self.remote_sentinels.iter().map(|e| Arc::clone(e.value())))
            .filter(|sentinel| !already_monitoring.contains(&sentinel.address))
            .collect();

        candidates.sort_by_key(|sentinel| sentinel.pod_count());

        if candidates.len() < needed {
            return Err(Error::NotEnoughSentinels {
                pod: pod_name.to_owned(),
                needed,
                available: candidates.len(),
            });
        }

        candidates.truncate(needed);
        Ok(candidates)
    }

    /// Three cases: grow, shrink, or no-op, keyed by `current` vs `needed`.
    pub async fn balance_pod(&self, name: &str) -> Result<()> {
        let pod = self.pods.get(name).map(|e| Arc::clone(e.value())).ok_or_else(|| {
            Error::NotFound {
                pod: name.to_owned(),
            }
        })?;
        let quorum = pod.quorum;
        let needed = quorum + 1;
        let current_sentinels = self
            .pod_to_sentinels
            .get(name)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let current = current_sentinels.len();

        use std::cmp::Ordering;
        match current.cmp(&needed) {
            Ordering::Less => {
                let additional = self.get_available_sentinels(name, needed - current).await?;
                let auth = pod.auth_token().await;
                for sentinel in &additional {
                    if let Err(err) = sentinel
                        .monitor_pod(
                            self.backend.as_ref(),
                            name,
                            &pod.master_ip,
                            pod.master_port,
                            quorum,
                            auth.as_deref(),
                        )
                        .await
                    {
                        warn!("balance_pod: sentinel {} failed to monitor {name}: {err}", sentinel.address);
                    }
                }
                let mut updated = current_sentinels;
                updated.extend(additional.iter().map(|s| s.address.clone()));
                self.pod_to_sentinels.insert(name.to_owned(), updated.clone());
                tokio::time::sleep(self.settings.rebalance_settle).await;
                pod.set_sentinel_count(updated.len()).await;
            }
            Ordering::Greater => {
                let mut sentinels_by_load: Vec<Arc<Sentinel>> = current_sentinels
                    .iter()
                    .filter_map(|addr| self.sentinel_by_address(addr))
                    .collect();
                sentinels_by_load.sort_by_key(|s| s.pod_count());
                let pool = &sentinels_by_load[..needed.min(sentinels_by_load.len())];
                if let Some(victim) = pool.get(rand::rng().random_range(0..pool.len().max(1))) {
                    victim.remove_pod(self.backend.as_ref(), name).await.ok();
                    let remaining: Vec<String> = current_sentinels
                        .into_iter()
                        .filter(|addr| addr != &victim.address)
                        .collect();
                    self.pod_to_sentinels.insert(name.to_owned(), remaining.clone());
                    for (idx, addr) in remaining.iter().enumerate() {
                        if let Some(sentinel) = self.sentinel_by_address(addr) {
                            sentinel.reset_pod(self.backend.as_ref(), name).await.ok();
                        }
                        if idx + 1 < remaining.len() {
                            tokio::time::sleep(self.settings.reset_settle).await;
                        }
                    }
                    pod.set_sentinel_count(remaining.len()).await;
                }
            }
            Ordering::Equal => {}
        }
        Ok(())
    }

    pub async fn balance(&self) {
        let names: Vec<String> = self.pods.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(err) = self.balance_pod(&name).await {
                error!("balance: failed to balance pod {name}: {err}");
            }
        }
    }

    /// Cheap, non-mutating predicate: true iff every pod's `current ==
    /// needed`. Used by readiness checks to decide whether a `balance()`
    /// sweep is worth running.
    pub fn is_balanced(&self) -> bool {
        self.pods.iter().all(|entry| {
            let needed = entry.value().quorum + 1;
            let current = self
                .pod_to_sentinels
                .get(entry.key())
                .map(|e| e.value().len())
                .unwrap_or(0);
            current == needed
        })
    }

    fn sentinel_by_address(&self, address: &str) -> Option<Arc<Sentinel>> {
        if address == self.local_address {
            return Some(Arc::clone(&self.local_sentinel));
        }
        self.remote_sentinels.get(address).map(|e| Arc::clone(e.value()))
    }

    /// Issue `SENTINEL FAILOVER` to each sentinel monitoring the pod until
    /// one succeeds; sentinel itself ensures only one failover takes effect.
    pub async fn failover(&self, name: &str) -> Result<()> {
        let sentinels = self
            .pod_to_sentinels
            .get(name)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut last_err = None;
        for address in sentinels {
            let Some(sentinel) = self.sentinel_by_address(&address) else {
                continue;
            };
            match sentinel.do_failover(self.backend.as_ref(), name).await {
                Ok(()) => return Ok(()),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(Error::NotFound {
            pod: name.to_owned(),
        }))
    }

    /// `SENTINEL REMOVE` on every sentinel monitoring the pod (errors logged,
    /// not fatal), then delete it from every in-memory map.
    pub async fn remove_pod(&self, name: &str) -> Result<()> {
        let sentinels = self
            .pod_to_sentinels
            .get(name)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for address in &sentinels {
            if let Some(sentinel) = self.sentinel_by_address(address) {
                if let Err(err) = sentinel.remove_pod(self.backend.as_ref(), name).await {
                    warn!("remove_pod: sentinel {address} failed to remove {name}: {err}");
                }
            }
        }
        self.pods.remove(name);
        self.local_pod_map.remove(name);
        self.remote_pod_map.remove(name);
        self.pod_to_sentinels.remove(name);
        self.managed_pod_configs.remove(name);
        self.pod_auth_map.remove(name);
        Ok(())
    }

    /// Union of every sentinel that currently reports monitoring the pod and
    /// every sentinel those reports reference. A sentinel whose reply is
    /// empty is excluded and the pod is flagged as needing reset.
    pub async fn get_sentinels_for_pod(&self, name: &str) -> Result<Vec<String>> {
        let mut result: HashSet<String> = HashSet::new();
        let mut saw_empty = false;

        let candidates: Vec<Arc<Sentinel>> = std::iter::once(Arc::clone(&self.local_sentinel))
            .chain(self.remote_sentinels.iter().map(|e| Arc::clone(e.value())))
            .collect();

        for sentinel in candidates {
            match self.backend.sentinel_sentinels(&sentinel.address, name).await {
                Ok(peers) if !peers.is_empty() => {
                    result.insert(sentinel.address.clone());
                    for peer in peers {
                        result.insert(format!("{}:{}", peer.ip, peer.port));
                    }
                }
                Ok(_) => saw_empty = true,
                Err(_) => continue,
            }
        }

        if saw_empty {
            if let Some(pod) = self.pods.get(name) {
                pod.value().mark_needs_reset().await;
            }
        }

        Ok(result.into_iter().collect())
    }

    /// Cached at `error_cache_ttl` resolution.
    pub async fn error_pod_count(&self) -> usize {
        self.get_pods_in_error().await.len()
    }

    pub async fn get_pods_in_error(&self) -> Vec<String> {
        {
            let cache = self.error_cache.lock().await;
            if let Some(checked_at) = cache.checked_at {
                if checked_at.elapsed() < self.settings.error_cache_ttl {
                    return cache.pods_in_error.clone();
                }
            }
        }

        let mut in_error = Vec::new();
        for entry in self.pods.iter() {
            let pod = entry.value();
            if pod
                .has_errors(self.backend.as_ref(), &self.nodes, self.settings.refresh_interval)
                .await
                .is_some()
                && !in_error.contains(entry.key())
            {
                in_error.push(entry.key().clone());
            }
        }

        let mut cache = self.error_cache.lock().await;
        cache.checked_at = Some(Instant::now());
        cache.pods_in_error = in_error.clone();
        in_error
    }

    /// Attaches `slave_address:slave_port` to `name`'s master via
    /// `REPLICAOF`, then propagates the pod's auth (explicit `slave_auth` if
    /// given, otherwise the pod's own configured token) to the new slave via
    /// `CONFIG SET masterauth`/`requirepass`. A slave that already replicates
    /// this master is treated as success, matching the original's tolerance
    /// for a redundant `SLAVEOF`.
    pub async fn add_slave_to_pod(
        &self,
        name: &str,
        slave_address: &str,
        slave_port: u16,
        slave_auth: Option<String>,
    ) -> Result<()> {
        let pod = self.pods.get(name).map(|e| Arc::clone(e.value())).ok_or_else(|| Error::NotFound {
            pod: name.to_owned(),
        })?;
        let slave_node_address = format!("{slave_address}:{slave_port}");

        match self
            .backend
            .replica_of(&slave_node_address, &pod.master_ip, pod.master_port)
            .await
        {
            Ok(()) => {}
            Err(Error::Redis(source)) if classify::is_already_monitored(&source.to_string()) => {
                debug!("add_slave_to_pod: {slave_node_address} already replicates {name}'s master");
            }
            Err(err) => return Err(err),
        }

        let auth = match slave_auth {
            Some(token) => Some(token),
            None => self.get_pod_auth(name).await,
        };
        if let Some(token) = &auth {
            self.backend.config_set(&slave_node_address, "masterauth", token).await?;
            self.backend.config_set(&slave_node_address, "requirepass", token).await?;
        }

        self.nodes.add_node(&slave_node_address, slave_port, auth);
        Ok(())
    }

    /// Pings the pod's master and each of its slaves, returning a
    /// node-address -> reachability map. Distinct from
    /// [`Self::validate_pod_sentinels`], which checks sentinel reachability
    /// instead of the data nodes themselves.
    pub async fn check_pod_auth(&self, name: &str) -> Result<HashMap<String, bool>> {
        let master = self.get_master(name).await?;
        let slaves = self.get_slaves(name).await.unwrap_or_default();

        let mut result = HashMap::new();
        if let Some(master_node) = self.nodes.get_node(&master.address) {
            result.insert(master.address.clone(), master_node.ping(self.backend.as_ref()).await.is_ok());
        }
        for slave in slaves {
            if let Some(slave_node) = self.nodes.get_node(&slave.address) {
                result.insert(slave.address.clone(), slave_node.ping(self.backend.as_ref()).await.is_ok());
            }
        }
        Ok(result)
    }

    /// Fresh dial + `get-master-addr-by-name` against each sentinel claimed
    /// to monitor the pod. Returns the per-sentinel verdict map.
    pub async fn validate_pod_sentinels(&self, name: &str) -> Result<HashMap<String, bool>> {
        let sentinels = self
            .pod_to_sentinels
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::NotFound {
                pod: name.to_owned(),
            })?;

        let mut result = HashMap::new();
        for address in sentinels {
            let ok = self
                .backend
                .sentinel_get_master_addr_by_name(&address, name)
                .await
                .map(|addr| addr.is_some())
                .unwrap_or(false);
            result.insert(address, ok);
        }
        Ok(result)
    }

    /// Prefer the local sentinel if the pod is local; otherwise iterate
    /// known sentinels until one answers. Always refreshes the master node
    /// from the address sentinel currently reports (it may have changed due
    /// to a recent failover).
    pub async fn get_pod(&self, name: &str) -> Result<Arc<RedisPod>> {
        let is_local = self.local_pod_map.contains_key(name);

        let info = if is_local {
            self.local_sentinel.get_master(self.backend.as_ref(), name).await?
        } else {
            let mut found = None;
            for entry in self.remote_sentinels.iter() {
                if let Ok(info) = entry.value().get_master(self.backend.as_ref(), name).await {
                    found = Some(info);
                    break;
                }
            }
            found.ok_or_else(|| Error::NotFound {
                pod: name.to_owned(),
            })?
        };

        let master_address = format!("{}:{}", info.ip, info.port);
        let master = self.nodes.add_node(&master_address, info.port, None);
        master
            .update_data(self.backend.as_ref(), Some(&self.nodes), self.settings.refresh_interval)
            .await
            .ok();

        let pod = self
            .pods
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(RedisPod::new(name.to_owned(), info.ip.clone(), info.port, info.quorum)))
            .clone();
        pod.set_master_info(info).await;
        if let Some(adjacency) = self.pod_to_sentinels.get(name) {
            pod.set_sentinel_count(adjacency.value().len()).await;
        }
        Ok(pod)
    }

    pub async fn get_master(&self, name: &str) -> Result<NodeSnapshot> {
        let pod = self.get_pod(name).await?;
        let node = self
            .nodes
            .get_node(&pod.master_address())
            .ok_or_else(|| Error::NotFound {
                pod: name.to_owned(),
            })?;
        Ok(node.snapshot().await)
    }

    pub async fn get_slaves(&self, name: &str) -> Result<Vec<NodeSnapshot>> {
        let master = self.get_master(name).await?;
        let mut snapshots = Vec::new();
        for addr in master.slaves {
            if let Some(node) = self.nodes.get_node(&addr) {
                snapshots.push(node.snapshot().await);
            }
        }
        Ok(snapshots)
    }

    /// Merged view over `PodMap` (local entries win over remote on name
    /// conflict, matching the source's `GetPodMap`; here the map already
    /// holds one entry per name so this is simply a clone of the current
    /// table).
    pub fn get_pods(&self) -> HashMap<String, Arc<RedisPod>> {
        self.pods.iter().map(|e| (e.key().clone(), Arc::clone(e.value()))).collect()
    }

    /// Returns the local sentinel. Kept only as a documented legacy
    /// accessor — the source itself marks the equivalent deprecated.
    #[deprecated(note = "legacy accessor kept for interface parity; prefer addressing sentinels explicitly")]
    pub fn get_any_sentinel(&self) -> Arc<Sentinel> {
        Arc::clone(&self.local_sentinel)
    }

    pub fn pod_count(&self) -> usize {
        self.pods.len()
    }

    /// Derived from `RemoteSentinels.len() + 1` (the live sentinel count),
    /// resolving the open question `SPEC_FULL.md` §4.5/§9 leaves to this
    /// implementation rather than a KV-store-derived count.
    pub fn sentinel_count(&self) -> usize {
        self.remote_sentinels.len() + 1
    }

    pub async fn get_stats(&self) -> ConstellationStats {
        let mut pod_sizes = HashMap::new();
        let mut total_pod_memory_bytes = 0i64;
        for entry in self.pods.iter() {
            let pod = entry.value();
            if let Some(master) = self.nodes.get_node(&pod.master_address()) {
                let snapshot = master.snapshot().await;
                pod_sizes.insert(entry.key().clone(), snapshot.slaves.len());
                total_pod_memory_bytes += snapshot.max_memory;
            }
        }

        let mut total_node_memory_bytes = 0i64;
        let mut memory_used_bytes = 0i64;
        for node in self.nodes.get_nodes() {
            let snapshot = node.snapshot().await;
            total_node_memory_bytes += snapshot.max_memory;
            if let Some(info) = &snapshot.info {
                memory_used_bytes += info.memory.used_memory;
            }
        }

        let memory_pct_avail = if total_node_memory_bytes > 0 {
            100.0 - (memory_used_bytes as f64 / total_node_memory_bytes as f64) * 100.0
        } else {
            0.0
        };

        ConstellationStats {
            pod_count: self.pod_count(),
            node_count: self.nodes.node_count(),
            sentinel_count: self.sentinel_count(),
            total_pod_memory_bytes,
            total_node_memory_bytes,
            pod_sizes,
            memory_used_bytes,
            memory_pct_avail,
        }
    }

    /// Resolves a pod's auth token from, in order: the in-memory
    /// `PodAuthMap`, the config-derived pod record, then the KV store —
    /// letting a freshly loaded config override a stale KV-persisted token
    /// without losing auth for pods the config doesn't mention.
    pub async fn get_pod_auth(&self, name: &str) -> Option<String> {
        if let Some(token) = self.pod_auth_map.get(name) {
            return Some(token.value().clone());
        }
        if let Some(token) = self.get_auth_for_pod_from_config(name) {
            return Some(token);
        }
        let key = format!("{KV_BASE}/pods/{name}/auth");
        self.kv
            .get(&key)
            .ok()
            .flatten()
            .and_then(|bytes| String::from_utf8(bytes).ok())
    }

    pub fn get_auth_for_pod_from_config(&self, name: &str) -> Option<String> {
        self.managed_pod_configs
            .get(name)
            .and_then(|cfg| cfg.value().auth_token.clone())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{parse_sentinel_config, LocalSentinelConfig};
    use crate::kv::MemoryKvStore;
    use crate::redis::mock::MockBackend;

    fn settings_for_test() -> ConstellationSettings {
        ConstellationSettings {
            refresh_interval: Duration::from_secs(60),
            monitor_settle: Duration::from_millis(0),
            rebalance_settle: Duration::from_millis(0),
            reset_settle: Duration::from_millis(0),
            error_cache_ttl: Duration::from_secs(3),
        }
    }

    async fn bootstrap_two_pods() -> Constellation {
        let backend = Arc::new(MockBackend::new());
        backend.set_role_master("local:26379");
        backend.seed_monitored_pod("local:26379", "alpha", "10.0.0.1", 6379, 2, 2);
        backend.seed_monitored_pod("local:26379", "beta", "10.0.0.2", 6379, 2, 2);
        backend.seed_sentinels_for_pod("local:26379", "alpha", &["s2:26379", "s3:26379"]);
        backend.seed_sentinels_for_pod("local:26379", "beta", &["s2:26379", "s3:26379"]);
        backend.seed_monitored_pod("s2:26379", "alpha", "10.0.0.1", 6379, 2, 2);
        backend.seed_monitored_pod("s2:26379", "beta", "10.0.0.2", 6379, 2, 2);
        backend.seed_monitored_pod("s3:26379", "alpha", "10.0.0.1", 6379, 2, 2);
        backend.seed_monitored_pod("s3:26379", "beta", "10.0.0.2", 6379, 2, 2);
        backend.seed_sentinels_for_pod("s2:26379", "alpha", &["local:26379", "s3:26379"]);
        backend.seed_sentinels_for_pod("s3:26379", "alpha", &["local:26379", "s2:26379"]);

        let lines = vec![
            "port 26379".to_owned(),
            "sentinel monitor alpha 10.0.0.1 6379 2".to_owned(),
            "sentinel monitor beta 10.0.0.2 6379 2".to_owned(),
            "sentinel known-sentinel alpha 10.0.0.2 26379".to_owned(),
            "sentinel known-sentinel alpha 10.0.0.3 26379".to_owned(),
        ];
        let mut parsed = parse_sentinel_config(&lines);
        parsed.local = LocalSentinelConfig {
            host: Some("local".to_owned()),
            port: Some(26379),
            dir: None,
        };

        Constellation::bootstrap(
            parsed,
            None,
            backend,
            Arc::new(MemoryKvStore::new()),
            settings_for_test(),
        )
        .await
        .expect("bootstrap should succeed against a fully reachable mock fleet")
    }

    #[tokio::test]
    async fn bootstrap_discovers_pods_and_sentinels() {
        let constellation = bootstrap_two_pods().await;
        assert_eq!(constellation.pod_count(), 2);
        assert!(constellation.get_pods().contains_key("alpha"));
        assert!(constellation.get_pods().contains_key("beta"));
    }

    #[tokio::test]
    async fn monitor_pod_succeeds_with_partial_sentinels() {
        let backend = Arc::new(MockBackend::new());
        backend.set_role_master("local:26379");
        let parsed = ParsedConfig {
            local: LocalSentinelConfig {
                host: Some("local".to_owned()),
                port: Some(26379),
                dir: None,
            },
            ..Default::default()
        };
        let constellation = Constellation::bootstrap(
            parsed,
            None,
            backend,
            Arc::new(MemoryKvStore::new()),
            settings_for_test(),
        )
        .await
        .unwrap();

        constellation
            .monitor_pod("gamma", "10.0.0.9", 6379, 0, None)
            .await
            .expect("a single local sentinel satisfies a quorum-0 monitor request");
    }

    async fn bootstrap_single_pod(backend: Arc<MockBackend>) -> Constellation {
        backend.set_role_master("local:26379");
        backend.seed_monitored_pod("local:26379", "alpha", "10.0.0.1", 6379, 2, 0);

        let lines = vec![
            "port 26379".to_owned(),
            "sentinel monitor alpha 10.0.0.1 6379 2".to_owned(),
        ];
        let mut parsed = parse_sentinel_config(&lines);
        parsed.local = LocalSentinelConfig {
            host: Some("local".to_owned()),
            port: Some(26379),
            dir: None,
        };

        Constellation::bootstrap(
            parsed,
            None,
            backend,
            Arc::new(MemoryKvStore::new()),
            settings_for_test(),
        )
        .await
        .expect("bootstrap should succeed against a reachable mock fleet")
    }

    #[tokio::test]
    async fn add_slave_to_pod_replicates_and_propagates_auth() {
        let backend = Arc::new(MockBackend::new());
        let constellation = bootstrap_single_pod(backend.clone()).await;

        constellation
            .add_slave_to_pod("alpha", "10.0.0.9", 6379, Some("s3cr3t".to_owned()))
            .await
            .expect("replicaof against a fresh node should succeed");

        assert_eq!(
            backend.replica_of_target("10.0.0.9:6379"),
            Some(("10.0.0.1".to_owned(), 6379))
        );
        assert_eq!(
            backend.config_get("10.0.0.9:6379", "masterauth").await.unwrap(),
            Some("s3cr3t".to_owned())
        );
        assert!(constellation.nodes.get_node("10.0.0.9:6379").is_some());
    }

    #[tokio::test]
    async fn add_slave_to_pod_tolerates_already_replicating() {
        let backend = Arc::new(MockBackend::new());
        let constellation = bootstrap_single_pod(backend.clone()).await;
        backend.mark_already_replicating("10.0.0.9:6379");

        constellation
            .add_slave_to_pod("alpha", "10.0.0.9", 6379, None)
            .await
            .expect("an already-replicating slave is not an error");
    }

    #[tokio::test]
    async fn check_pod_auth_pings_master_and_slaves_not_sentinels() {
        let backend = Arc::new(MockBackend::new());
        let constellation = bootstrap_single_pod(backend).await;

        let result = constellation
            .check_pod_auth("alpha")
            .await
            .expect("check_pod_auth should succeed against a reachable master");
        assert!(result.contains_key("10.0.0.1:6379"));
        assert!(result.values().all(|ok| *ok));
    }

    #[tokio::test]
    async fn get_available_sentinels_fails_fast_when_not_enough_remain() {
        let backend = Arc::new(MockBackend::new());
        backend.set_role_master("local:26379");
        let parsed = ParsedConfig {
            local: LocalSentinelConfig {
                host: Some("local".to_owned()),
                port: Some(26379),
                dir: None,
            },
            ..Default::default()
        };
        let constellation = Constellation::bootstrap(
            parsed,
            None,
            backend,
            Arc::new(MemoryKvStore::new()),
            settings_for_test(),
        )
        .await
        .unwrap();

        let result = constellation.get_available_sentinels("gamma", 3).await;
        assert!(result.is_err());
    }
}
