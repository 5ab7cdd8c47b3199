//! Red Skull: a management overlay for a fleet of Redis Sentinel processes.
//!
//! The core is the constellation controller ([`constellation::Constellation`]):
//! bootstrap discovery, a continuously refreshed pods↔sentinels↔nodes model,
//! fan-out mutation operations (monitor/remove/failover/rebalance), and a
//! sentinel-selection rule that levels load across sentinels. Everything
//! outside that — the HTTP layer, JSON transport, and the KV service itself —
//! is an external collaborator; this crate exposes the seams ([`kv::KvStore`],
//! [`rpc::RpcHandler`]) rather than implementing them.

pub mod config;
pub mod constellation;
pub mod error;
pub mod kv;
pub mod node;
pub mod pod;
pub mod redis;
pub mod rpc;
pub mod sentinel;

pub use constellation::{Constellation, ConstellationSettings, ConstellationStats};
pub use error::{Error, Result};
