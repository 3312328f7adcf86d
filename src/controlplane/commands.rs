//! Rack Controller RPC Commands
//!
//! Typed request/response pairs for the pod calls a rack controller serves,
//! and the helper that issues them over any [`RackClient`].

use crate::domain::discovered::{
    DiscoveredMachine, DiscoveredPod, DiscoveredPodHints, RequestedMachine,
};
use crate::domain::models::PodContext;
use crate::domain::ports::RackClient;
use crate::error::RemoteError;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// A typed RPC call
pub trait RpcCommand: Serialize + Send + Sync {
    /// Wire name of the command
    const NAME: &'static str;
    /// Decoded response payload
    type Response: DeserializeOwned + Send;
}

/// Response of a call that returns nothing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Empty;

impl<'de> Deserialize<'de> for Empty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        IgnoredAny::deserialize(deserializer)?;
        Ok(Empty)
    }
}

// =============================================================================
// DiscoverPod
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverPod {
    #[serde(rename = "type")]
    pub pod_type: String,
    pub context: PodContext,
    /// None when discovering a pod that is not stored yet
    pub pod_id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverPodResponse {
    pub pod: DiscoveredPod,
}

impl RpcCommand for DiscoverPod {
    const NAME: &'static str = "DiscoverPod";
    type Response = DiscoverPodResponse;
}

// =============================================================================
// ComposeMachine
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeMachine {
    #[serde(rename = "type")]
    pub pod_type: String,
    pub context: PodContext,
    pub request: RequestedMachine,
    pub pod_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeMachineResponse {
    pub machine: DiscoveredMachine,
    pub hints: DiscoveredPodHints,
}

impl RpcCommand for ComposeMachine {
    const NAME: &'static str = "ComposeMachine";
    type Response = ComposeMachineResponse;
}

// =============================================================================
// DecomposeMachine
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposeMachine {
    #[serde(rename = "type")]
    pub pod_type: String,
    pub context: PodContext,
    pub pod_id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecomposeMachineResponse {
    pub hints: DiscoveredPodHints,
}

impl RpcCommand for DecomposeMachine {
    const NAME: &'static str = "DecomposeMachine";
    type Response = DecomposeMachineResponse;
}

// =============================================================================
// SendPodCommissioningResults
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendPodCommissioningResults {
    pub pod_id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub pod_type: String,
    pub system_id: String,
    pub context: PodContext,
    pub consumer_key: String,
    pub token_key: String,
    pub token_secret: String,
    pub metadata_url: String,
}

impl RpcCommand for SendPodCommissioningResults {
    const NAME: &'static str = "SendPodCommissioningResults";
    type Response = Empty;
}

// =============================================================================
// Call Helper
// =============================================================================

/// Issue `command` on `client`, bounded by `timeout` when given
pub async fn call<C: RpcCommand>(
    client: &dyn RackClient,
    command: &C,
    timeout: Option<Duration>,
) -> Result<C::Response, RemoteError> {
    let arguments = serde_json::to_value(command).map_err(|e| {
        RemoteError::Unhandled(format!("failed to encode {} arguments: {}", C::NAME, e))
    })?;

    let pending = client.call(C::NAME, arguments);
    let value = match timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .map_err(|_| RemoteError::Timeout(limit.as_millis() as u64))??,
        None => pending.await?,
    };

    serde_json::from_value(value).map_err(|e| {
        RemoteError::Unhandled(format!("malformed {} response: {}", C::NAME, e))
    })
}
