//! Pooled, timeout-bounded connections keyed by address (C1 §4.1), built
//! directly on the underlying Redis driver's own `bb8`-based pool manager —
//! grounded on its `PooledClientManager`.

use std::time::Duration;

use dashmap::DashMap;
use rustis::client::PooledClientManager;

use crate::error::{Error, Result};

/// Fixed dial timeout used for every address this process connects to.
pub const DIAL_TIMEOUT: Duration = Duration::from_millis(900);

/// One `bb8` pool per address, created lazily on first use and kept for the
/// lifetime of the process (sentinels/nodes are "retained forever" per the
/// data model in `SPEC_FULL.md` §3).
pub struct ConnectionPool {
    pools: DashMap<String, bb8::Pool<PooledClientManager>>,
    dial_timeout: Duration,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
            dial_timeout: DIAL_TIMEOUT,
        }
    }

    pub fn with_dial_timeout(dial_timeout: Duration) -> Self {
        Self {
            pools: DashMap::new(),
            dial_timeout,
        }
    }

    /// Get-or-build the pool for `address`. `bb8::Pool` is a cheap `Clone`
    /// (an `Arc` internally), so callers get an owned handle rather than a
    /// `DashMap` guard, which would otherwise have to live across an
    /// `.await` in every caller.
    pub fn pool_for(&self, address: &str) -> Result<bb8::Pool<PooledClientManager>> {
        if let Some(pool) = self.pools.get(address) {
            return Ok(pool.clone());
        }
        let manager = PooledClientManager::new(address)?;
        let pool = bb8::Pool::builder().build_unchecked(manager);
        self.pools.insert(address.to_owned(), pool.clone());
        Ok(pool)
    }

    /// Check out a connection to `address`, bounded by the fixed dial
    /// timeout. The returned guard borrows the `pool` binding the caller
    /// holds, not this `ConnectionPool` — call [`pool_for`](Self::pool_for)
    /// first and keep the pool alive for as long as the connection is used.
    pub async fn checkout<'p>(
        &self,
        pool: &'p bb8::Pool<PooledClientManager>,
        address: &str,
    ) -> Result<bb8::PooledConnection<'p, PooledClientManager>> {
        match tokio::time::timeout(self.dial_timeout, pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(Error::Unreachable {
                address: address.to_owned(),
                source: bb8_error_to_rustis(source),
            }),
            Err(_) => Err(Error::DialTimeout {
                address: address.to_owned(),
                timeout: self.dial_timeout,
            }),
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

fn bb8_error_to_rustis(err: bb8::RunError<rustis::Error>) -> rustis::Error {
    match err {
        bb8::RunError::User(e) => e,
        bb8::RunError::TimedOut => rustis::Error::Client("connection pool timed out".to_owned()),
    }
}
