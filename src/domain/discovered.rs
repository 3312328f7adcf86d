//! Driver-reported snapshots
//!
//! Values returned by pod drivers through the rack controllers. The control
//! plane only reads a handful of fields; everything else is kept in `extra`
//! so it round-trips to callers untouched.

use super::models::InterfaceAttachType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unknown driver fields, preserved verbatim
pub type ExtraFields = BTreeMap<String, serde_json::Value>;

/// Updated capacity hints reported after a compose or decompose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPodHints {
    #[serde(default)]
    pub cores: u32,
    /// CPU speed in MHz
    #[serde(default)]
    pub cpu_speed: u32,
    /// Memory in MiB, as drivers report it
    #[serde(default)]
    pub memory: u64,
    /// Local storage in bytes
    #[serde(default)]
    pub local_storage: u64,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// A storage pool exposed by the pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPodStoragePool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(rename = "type", default)]
    pub pool_type: String,
    /// Size in bytes
    #[serde(default)]
    pub storage: u64,
}

/// Pod capability as reported by one rack controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPod {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub architectures: Vec<String>,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub cpu_speed: u32,
    /// Memory in MiB
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub local_storage: u64,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub mac_addresses: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub storage_pools: Vec<DiscoveredPodStoragePool>,
    #[serde(default)]
    pub hints: DiscoveredPodHints,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// A NIC of a composed machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMachineInterface {
    pub mac_address: String,
    #[serde(default)]
    pub vid: i32,
    #[serde(default)]
    pub boot: bool,
    #[serde(default)]
    pub attach_type: Option<InterfaceAttachType>,
    #[serde(default)]
    pub attach_name: Option<String>,
}

/// A disk of a composed machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMachineBlockDevice {
    pub model: Option<String>,
    pub serial: Option<String>,
    /// Size in bytes
    pub size: u64,
    #[serde(default)]
    pub id_path: Option<String>,
    #[serde(default)]
    pub storage_pool: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A guest machine created by a compose call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredMachine {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub cores: u32,
    #[serde(default)]
    pub cpu_speed: u32,
    /// Memory in MiB
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub pinned_cores: Vec<u32>,
    #[serde(default)]
    pub hugepages_backed: bool,
    #[serde(default)]
    pub interfaces: Vec<DiscoveredMachineInterface>,
    #[serde(default)]
    pub block_devices: Vec<DiscoveredMachineBlockDevice>,
    #[serde(default)]
    pub power_state: Option<String>,
    #[serde(default)]
    pub power_parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Machine requirements forwarded to the driver on compose
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestedMachine {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub cores: u32,
    /// Memory in MiB
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub cpu_speed: Option<u32>,
    #[serde(default)]
    pub pinned_cores: Vec<u32>,
    #[serde(default)]
    pub hugepages_backed: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}
