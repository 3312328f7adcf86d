//! VM Host Control Plane
//!
//! Coordinates pod driver calls across the connected rack controllers and
//! accounts for NUMA capacity on VM hosts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              REST API (axum)                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────┐        ┌─────────────────────────────────┐ │
//! │  │      RPC Coordinator        │        │        NUMA Accountant          │ │
//! │  │  discovery fan-out          │        │  cores / memory / hugepages     │ │
//! │  │  single-target pod calls    │        │  SR-IOV virtual functions       │ │
//! │  └──────────────┬──────────────┘        └────────────────┬────────────────┘ │
//! │                 │                                        │                  │
//! │  ┌──────────────┴──────────────┐        ┌────────────────┴────────────────┐ │
//! │  │  Rack Client Registry       │        │        Pod Inventory            │ │
//! │  │  (HTTP rack controllers)    │        │  (in-memory, YAML/JSON seed)    │ │
//! │  └─────────────────────────────┘        └─────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controlplane`]: RPC coordinator, rack clients, metrics and REST API
//! - [`hardware`]: NUMA capacity accounting
//! - [`inventory`]: Pod inventory adapters
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod controlplane;
pub mod domain;
pub mod error;
pub mod hardware;
pub mod inventory;

// Re-export commonly used types
pub use controlplane::{
    ApiServer, ApiServerConfig, CoordinatorConfig, CoordinatorMetrics, DiscoveryOutcome,
    HttpRackClient, HttpRackClientConfig, PodOperation, RackClientRegistry, RemoteErrorKind,
    RestRouter, RpcCoordinator,
};

pub use domain::{
    ConnectedClients, DiscoveredMachine, DiscoveredPod, DiscoveredPodHints, HostTopology, Pod,
    PodContext, PodInventory, PodSnapshot, RackClient, VirtualMachine, VirtualMachineInterface,
};

pub use error::{Error, RemoteError, Result};

pub use hardware::{
    get_vm_host_resources, AccountingConfig, NumaAccountant, NumaNodeResources, PinningPolicy,
};

pub use inventory::InMemoryInventory;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
