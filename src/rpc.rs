//! RPC surface (C8): the typed request/response operations an out-of-scope
//! HTTP layer would dispatch into. Plain `serde`-serializable DTOs and async
//! methods on [`Constellation`] — no transport here, matching `SPEC_FULL.md`
//! §6 ("transport is out of scope per §1").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::constellation::Constellation;
use crate::error::Result;
use crate::pod::PodSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPodRequest {
    pub name: String,
    pub master_address: String,
    pub master_port: u16,
    pub quorum: usize,
    pub auth_token: Option<String>,
}

/// Carried over from the original system's RPC layer (`common/structures.go`)
/// even though `Constellation::monitor_pod` takes its fields directly; kept
/// as the shape a transport layer would actually deserialize off the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRequest {
    pub podname: String,
    pub master_address: String,
    pub auth_token: Option<String>,
    pub master_port: u16,
    pub quorum: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverRequest {
    pub podname: String,
    pub return_new: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSlaveRequest {
    pub podname: String,
    pub slave_address: String,
    pub slave_port: u16,
    pub slave_auth: Option<String>,
}

/// Pod-cloning is out of scope for `Constellation`'s operation set — this
/// struct is retained as a forward-compatible request shape referenced
/// nowhere else, matching the source which defines but never wires a clone
/// operation into its own constellation either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneRequest {
    pub origin: String,
    pub clone: String,
    pub role: String,
    pub reconfig: bool,
    pub promote: bool,
}

/// The operations a transport layer (HTTP, JSON/RPC — out of scope) would
/// dispatch into. Implemented as plain async methods over a shared
/// `Constellation` rather than a trait, since there is exactly one real
/// implementation and no substitution point is needed.
pub struct RpcHandler {
    constellation: std::sync::Arc<Constellation>,
}

impl RpcHandler {
    pub fn new(constellation: std::sync::Arc<Constellation>) -> Self {
        Self { constellation }
    }

    pub async fn get_pod(&self, name: &str) -> Result<PodSnapshot> {
        let pod = self.constellation.get_pod(name).await?;
        Ok(pod.snapshot().await)
    }

    pub async fn add_pod(&self, request: NewPodRequest) -> Result<PodSnapshot> {
        let (ip, port) = split_address(&request.master_address, request.master_port);
        self.constellation
            .monitor_pod(&request.name, &ip, port, request.quorum, request.auth_token)
            .await?;
        let pod = self.constellation.get_pod(&request.name).await?;
        Ok(pod.snapshot().await)
    }

    pub async fn monitor(&self, request: MonitorRequest) -> Result<()> {
        let (ip, port) = split_address(&request.master_address, request.master_port);
        self.constellation
            .monitor_pod(&request.podname, &ip, port, request.quorum, request.auth_token)
            .await
    }

    pub async fn remove_pod(&self, name: &str) -> Result<()> {
        self.constellation.remove_pod(name).await
    }

    pub async fn add_sentinel(&self, address: &str) -> Result<()> {
        self.constellation.add_sentinel_by_address(address).await
    }

    pub async fn get_sentinels_for_pod(&self, name: &str) -> Result<Vec<String>> {
        self.constellation.get_sentinels_for_pod(name).await
    }

    pub async fn balance_pod(&self, name: &str) -> Result<()> {
        self.constellation.balance_pod(name).await
    }

    pub async fn validate_pod_sentinels(&self, name: &str) -> Result<HashMap<String, bool>> {
        self.constellation.validate_pod_sentinels(name).await
    }

    pub async fn check_pod_auth(&self, name: &str) -> Result<HashMap<String, bool>> {
        self.constellation.check_pod_auth(name).await
    }

    pub async fn add_slave_to_pod(&self, request: AddSlaveRequest) -> Result<()> {
        self.constellation
            .add_slave_to_pod(
                &request.podname,
                &request.slave_address,
                request.slave_port,
                request.slave_auth,
            )
            .await
    }

    pub async fn get_pod_list(&self, _verbose: bool) -> Result<Vec<String>> {
        Ok(self.constellation.get_pods().into_keys().collect())
    }

    pub async fn failover(&self, request: FailoverRequest) -> Result<()> {
        self.constellation.failover(&request.podname).await
    }
}

fn split_address(master_address: &str, fallback_port: u16) -> (String, u16) {
    match master_address.split_once(':') {
        Some((ip, port_str)) => (ip.to_owned(), port_str.parse().unwrap_or(fallback_port)),
        None => (master_address.to_owned(), fallback_port),
    }
}
