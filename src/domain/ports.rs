//! Domain Ports - Core trait definitions for the control plane
//!
//! These traits define the boundaries between the coordinator/accountant and
//! external systems. Adapters implement these traits to provide concrete
//! functionality.

use super::models::{Pod, PodSnapshot, VirtualMachine};
use crate::error::{RemoteError, Result};
use async_trait::async_trait;
use std::sync::Arc;

// =============================================================================
// Rack Client Port
// =============================================================================

/// RPC channel to one connected rack controller
#[async_trait]
pub trait RackClient: Send + Sync {
    /// Stable identity of the rack controller, used as a map key
    fn ident(&self) -> &str;

    /// Issue a named call with JSON arguments.
    ///
    /// Time bounds are applied by the caller; an implementation only needs to
    /// report what the remote side answered.
    async fn call(
        &self,
        command: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, RemoteError>;
}

// =============================================================================
// Connected Clients Port
// =============================================================================

/// Source of the currently connected rack controllers
pub trait ConnectedClients: Send + Sync {
    /// Snapshot of all connected clients, ordered by ident
    fn all_clients(&self) -> Vec<RackClientRef>;
}

// =============================================================================
// Pod Inventory Port
// =============================================================================

/// Read access to persisted pods, guests and host topology
#[async_trait]
pub trait PodInventory: Send + Sync {
    /// Full snapshot of one pod
    async fn pod_snapshot(&self, pod_id: u64) -> Result<Option<PodSnapshot>>;

    /// All pods ordered by ID
    async fn list_pods(&self) -> Result<Vec<Pod>>;

    /// All guests across pods ordered by ID
    async fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>>;

    /// One guest by ID
    async fn get_virtual_machine(&self, vm_id: u64) -> Result<Option<VirtualMachine>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RackClientRef = Arc<dyn RackClient>;
pub type ConnectedClientsRef = Arc<dyn ConnectedClients>;
pub type PodInventoryRef = Arc<dyn PodInventory>;
