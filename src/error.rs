//! Error kinds the core produces, plus the substring-classification helpers
//! sentinel/Redis error text requires (see [`classify`]).

use std::time::Duration;

use thiserror::Error;

/// All error kinds the constellation controller can return.
#[derive(Debug, Error)]
pub enum Error {
    /// A node or sentinel rejected `AUTH`.
    #[error("auth rejected by {address}")]
    AuthInvalid { address: String },

    /// Dial timeout or connection refused.
    #[error("{address} is unreachable: {source}")]
    Unreachable {
        address: String,
        #[source]
        source: rustis::Error,
    },

    /// A sentinel returned no record for a pod name.
    #[error("pod {pod} not found")]
    NotFound { pod: String },

    /// `MonitorPod`/`Failover` completed but fewer than `quorum` sentinels succeeded.
    #[error("quorum not reached for {pod}: {successes}/{quorum} sentinels succeeded")]
    QuorumNotReached {
        pod: String,
        successes: usize,
        quorum: usize,
    },

    /// `FAILOVER` rejected because no promotable slave exists.
    #[error("no promotable slave for {pod}")]
    NoGoodSlave { pod: String },

    /// The config parser rejected a `sentinel …` line; the parser logs and continues.
    #[error("misconfigured directive on line {line}: {text}")]
    MisconfiguredDirective { line: usize, text: String },

    /// Local sentinel dial failure at startup; unrecoverable.
    #[error("bootstrap failed: local sentinel {address} unreachable: {source}")]
    FatalBootstrap {
        address: String,
        #[source]
        source: rustis::Error,
    },

    /// Fewer than `needed` sentinels remain once ones already monitoring the pod
    /// are filtered out.
    #[error("not enough sentinels to achieve quorum for {pod}: need {needed}, have {available}")]
    NotEnoughSentinels {
        pod: String,
        needed: usize,
        available: usize,
    },

    /// A config file could not be read.
    #[error("unable to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Dial attempt exceeded the fixed connect timeout.
    #[error("dial to {address} exceeded {timeout:?}")]
    DialTimeout { address: String, timeout: Duration },

    /// Generic passthrough for the underlying Redis driver.
    #[error(transparent)]
    Redis(#[from] rustis::Error),

    /// The key/value sideband store failed.
    #[error("kv store error: {0}")]
    Kv(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error-text classification, isolated in one module per the design note:
/// substring matching on Redis/Sentinel error text is the only language-neutral
/// signal the protocol offers, so every caller that needs to interpret a raw
/// error string goes through here rather than matching ad hoc at call sites.
pub mod classify {
    /// True if the error text indicates a rejected or missing password.
    pub fn is_auth_error(text: &str) -> bool {
        text.contains("invalid password") || text.contains("password")
    }

    /// True if the error text indicates sentinel has no promotable slave.
    pub fn is_no_good_slave(text: &str) -> bool {
        text.contains("NOGOODSLAVE")
    }

    /// True if the error text indicates the master is already monitored under
    /// this name (a duplicate `SENTINEL MONITOR`).
    pub fn is_already_monitored(text: &str) -> bool {
        text.contains("Already connected to specified master")
    }
}
