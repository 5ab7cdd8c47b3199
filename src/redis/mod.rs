//! The Redis/Sentinel client facade (C1). Wraps an injected RESP driver —
//! rather than re-implementing the wire protocol, which is explicitly out of
//! scope — behind a thin capability interface: pooled connections keyed by
//! address, plus typed wrappers for `INFO`, `CONFIG GET`, and the `SENTINEL *`
//! subcommands.

pub mod info;
pub mod mock;
pub mod pool;

use futures_util::future::BoxFuture;
use rustis::commands::{
    ConnectionCommands, ReplicaOfOptions, SentinelCommands, ServerCommands, SlowLogOptions,
};

use crate::error::{Error, Result};
use pool::ConnectionPool;

pub use rustis::commands::{RoleResult, SentinelInfo, SentinelMasterInfo, SentinelReplicaInfo};

/// A boxed, address-bound async operation; mirrors the underlying driver's own
/// `Future<'a, T>` convenience alias (see its `lib.rs`).
pub type RedisFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// Which `LATENCY HISTORY` series to fetch. A local stand-in for the
/// driver's own `LatencyHistoryEvent`, limited to the two events `RedisNode`
/// actually tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyEvent {
    Command,
    FastCommand,
}

fn to_driver_latency_event(event: LatencyEvent) -> rustis::commands::LatencyHistoryEvent {
    match event {
        LatencyEvent::Command => rustis::commands::LatencyHistoryEvent::Command,
        LatencyEvent::FastCommand => rustis::commands::LatencyHistoryEvent::FastCommand,
    }
}

/// Locally cached subset of a `SLOWLOG GET` entry. The driver's own
/// `SlowLogEntry` is `#[derive(Deserialize)]`-only with no `Clone`, so this
/// crate copies out the fields it keeps rather than wrapping it directly.
#[derive(Debug, Clone)]
pub struct SlowlogEntry {
    pub id: i64,
    pub unix_timestamp: u32,
    pub execution_time_micros: u64,
    pub command: Vec<String>,
    pub client_address: String,
    pub client_name: String,
}

impl From<rustis::commands::SlowLogEntry> for SlowlogEntry {
    fn from(entry: rustis::commands::SlowLogEntry) -> Self {
        Self {
            id: entry.id,
            unix_timestamp: entry.unix_timestamp,
            execution_time_micros: entry.execution_time_micros,
            command: entry.command,
            client_address: entry.client_address,
            client_name: entry.client_name,
        }
    }
}

/// The thin capability interface every higher layer (Node, Pod, Sentinel,
/// Constellation) consumes. Implemented by [`RustisBackend`] against a real
/// fleet and by [`mock::MockBackend`] for tests that never touch a socket.
pub trait RedisBackend: Send + Sync {
    fn info(&self, address: &str) -> RedisFuture<'_, String>;
    fn config_get(&self, address: &str, param: &str) -> RedisFuture<'_, Option<String>>;
    fn role(&self, address: &str) -> RedisFuture<'_, RoleResult>;
    fn ping(&self, address: &str) -> RedisFuture<'_, ()>;

    fn sentinel_masters(&self, address: &str) -> RedisFuture<'_, Vec<SentinelMasterInfo>>;
    fn sentinel_master(&self, address: &str, name: &str) -> RedisFuture<'_, SentinelMasterInfo>;
    fn sentinel_slaves(
        &self,
        address: &str,
        name: &str,
    ) -> RedisFuture<'_, Vec<SentinelReplicaInfo>>;
    fn sentinel_sentinels(&self, address: &str, name: &str) -> RedisFuture<'_, Vec<SentinelInfo>>;
    fn sentinel_monitor(
        &self,
        address: &str,
        name: &str,
        ip: &str,
        port: u16,
        quorum: usize,
    ) -> RedisFuture<'_, ()>;
    fn sentinel_set_authpass(
        &self,
        address: &str,
        name: &str,
        token: &str,
    ) -> RedisFuture<'_, ()>;
    fn sentinel_remove(&self, address: &str, name: &str) -> RedisFuture<'_, ()>;
    fn sentinel_failover(&self, address: &str, name: &str) -> RedisFuture<'_, ()>;
    fn sentinel_reset(&self, address: &str, pattern: &str) -> RedisFuture<'_, usize>;
    fn sentinel_get_master_addr_by_name(
        &self,
        address: &str,
        name: &str,
    ) -> RedisFuture<'_, Option<(String, u16)>>;

    fn latency_history(&self, address: &str, event: LatencyEvent) -> RedisFuture<'_, Vec<(u32, u32)>>;
    fn latency_doctor(&self, address: &str) -> RedisFuture<'_, String>;
    fn slowlog_len(&self, address: &str) -> RedisFuture<'_, usize>;
    fn slowlog_entries(&self, address: &str, count: usize) -> RedisFuture<'_, Vec<SlowlogEntry>>;

    /// Issues `REPLICAOF master_ip master_port` against `address`, making it a
    /// slave of the given master.
    fn replica_of(&self, address: &str, master_ip: &str, master_port: u16) -> RedisFuture<'_, ()>;
    fn config_set(&self, address: &str, key: &str, value: &str) -> RedisFuture<'_, ()>;
}

/// The real backend: one pooled connection per address, talking the actual
/// RESP wire protocol through the underlying Redis driver.
pub struct RustisBackend {
    pools: ConnectionPool,
}

impl RustisBackend {
    pub fn new() -> Self {
        Self {
            pools: ConnectionPool::new(),
        }
    }
}

impl Default for RustisBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RedisBackend for RustisBackend {
    fn info(&self, address: &str) -> RedisFuture<'_, String> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            let info: String = conn.info(Default::default()).await?;
            Ok(info)
        })
    }

    fn config_get(&self, address: &str, param: &str) -> RedisFuture<'_, Option<String>> {
        let param = param.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            let values: std::collections::HashMap<String, String> =
                conn.config_get(param.as_str()).await?;
            Ok(values.into_values().next())
        })
    }

    fn role(&self, address: &str) -> RedisFuture<'_, RoleResult> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.role().await?)
        })
    }

    fn ping(&self, address: &str) -> RedisFuture<'_, ()> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            conn.ping::<String>(()).await?;
            Ok(())
        })
    }

    fn sentinel_masters(&self, address: &str) -> RedisFuture<'_, Vec<SentinelMasterInfo>> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.sentinel_masters().await?)
        })
    }

    fn sentinel_master(&self, address: &str, name: &str) -> RedisFuture<'_, SentinelMasterInfo> {
        let name = name.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            conn.sentinel_master(name.as_str())
                .await
                .map_err(|source| classify_sentinel_error(address, &name, source))
        })
    }

    fn sentinel_slaves(
        &self,
        address: &str,
        name: &str,
    ) -> RedisFuture<'_, Vec<SentinelReplicaInfo>> {
        let name = name.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.sentinel_replicas(name.as_str()).await?)
        })
    }

    fn sentinel_sentinels(&self, address: &str, name: &str) -> RedisFuture<'_, Vec<SentinelInfo>> {
        let name = name.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.sentinel_sentinels(name.as_str()).await?)
        })
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
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn
                .sentinel_monitor(name.as_str(), ip.as_str(), port, quorum)
                .await?)
        })
    }

    fn sentinel_set_authpass(
        &self,
        address: &str,
        name: &str,
        token: &str,
    ) -> RedisFuture<'_, ()> {
        let (name, token) = (name.to_owned(), token.to_owned());
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn
                .sentinel_set(name.as_str(), [("AUTHPASS", token.as_str())])
                .await?)
        })
    }

    fn sentinel_remove(&self, address: &str, name: &str) -> RedisFuture<'_, ()> {
        let name = name.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.sentinel_remove(name.as_str()).await?)
        })
    }

    fn sentinel_failover(&self, address: &str, name: &str) -> RedisFuture<'_, ()> {
        let name = name.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            conn.sentinel_failover(name.as_str())
                .await
                .map_err(|source| classify_sentinel_error(address, &name, source))
        })
    }

    fn sentinel_reset(&self, address: &str, pattern: &str) -> RedisFuture<'_, usize> {
        let pattern = pattern.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.sentinel_reset(pattern.as_str()).await?)
        })
    }

    fn sentinel_get_master_addr_by_name(
        &self,
        address: &str,
        name: &str,
    ) -> RedisFuture<'_, Option<(String, u16)>> {
        let name = name.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.sentinel_get_master_addr_by_name(name.as_str()).await?)
        })
    }

    fn latency_history(&self, address: &str, event: LatencyEvent) -> RedisFuture<'_, Vec<(u32, u32)>> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.latency_history(to_driver_latency_event(event)).await?)
        })
    }

    fn latency_doctor(&self, address: &str) -> RedisFuture<'_, String> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.latency_doctor().await?)
        })
    }

    fn slowlog_len(&self, address: &str) -> RedisFuture<'_, usize> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.slowlog_len().await?)
        })
    }

    fn slowlog_entries(&self, address: &str, count: usize) -> RedisFuture<'_, Vec<SlowlogEntry>> {
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            let entries = conn.slowlog_get(SlowLogOptions::default().count(count)).await?;
            Ok(entries.into_iter().map(SlowlogEntry::from).collect())
        })
    }

    fn replica_of(&self, address: &str, master_ip: &str, master_port: u16) -> RedisFuture<'_, ()> {
        let master_ip = master_ip.to_owned();
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            conn.replicaof(ReplicaOfOptions::master(master_ip.as_str(), master_port))
                .await
                .map_err(|source| {
                    let text = source.to_string();
                    if crate::error::classify::is_auth_error(&text) {
                        Error::AuthInvalid {
                            address: address.to_owned(),
                        }
                    } else {
                        Error::Redis(source)
                    }
                })
        })
    }

    fn config_set(&self, address: &str, key: &str, value: &str) -> RedisFuture<'_, ()> {
        let (key, value) = (key.to_owned(), value.to_owned());
        Box::pin(async move {
            let pool = self.pools.pool_for(address)?;
            let mut conn = self.pools.checkout(&pool, address).await?;
            Ok(conn.config_set([(key.as_str(), value.as_str())]).await?)
        })
    }
}

/// Turn a raw driver error into [`Error::NoGoodSlave`] or [`Error::AuthInvalid`]
/// when its text matches one of the classified substrings (§7 design note),
/// otherwise pass it through as [`Error::Redis`].
fn classify_sentinel_error(address: &str, pod: &str, source: rustis::Error) -> Error {
    let text = source.to_string();
    if crate::error::classify::is_no_good_slave(&text) {
        return Error::NoGoodSlave {
            pod: pod.to_owned(),
        };
    }
    if crate::error::classify::is_auth_error(&text) {
        return Error::AuthInvalid {
            address: address.to_owned(),
        };
    }
    Error::Redis(source)
}
