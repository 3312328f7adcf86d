//! In-Memory Pod Inventory
//!
//! Holds pod snapshots in a lock-guarded map. Snapshots can be seeded from a
//! YAML or JSON file so the binary can serve a fixed fleet without a
//! database behind it.

use crate::domain::models::{Pod, PodSnapshot, VirtualMachine};
use crate::domain::ports::PodInventory;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// On-disk inventory layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryFile {
    #[serde(default)]
    pub pods: Vec<PodSnapshot>,
}

#[derive(Debug, Clone)]
struct StoredPod {
    snapshot: PodSnapshot,
    updated_at: DateTime<Utc>,
}

/// Pod inventory kept in process memory
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    pods: RwLock<BTreeMap<u64, StoredPod>>,
}

impl InMemoryInventory {
    /// Create an empty inventory
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create an inventory from validated snapshots
    pub fn from_snapshots(snapshots: Vec<PodSnapshot>) -> Result<Arc<Self>> {
        let inventory = Self::default();
        for snapshot in snapshots {
            inventory.upsert(snapshot)?;
        }
        Ok(Arc::new(inventory))
    }

    /// Load snapshots from a `.yaml`/`.yml` or JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;

        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("yaml") | Some("yml")
        );
        let file: InventoryFile = if is_yaml {
            serde_yaml::from_str(&raw)?
        } else {
            serde_json::from_str(&raw)?
        };

        info!("Loaded {} pods from {}", file.pods.len(), path.display());
        Self::from_snapshots(file.pods)
    }

    /// Insert or replace a pod snapshot
    pub fn upsert(&self, snapshot: PodSnapshot) -> Result<()> {
        snapshot.validate()?;
        let pod_id = snapshot.pod.id;
        debug!(
            "Storing pod {} with {} virtual machines",
            pod_id,
            snapshot.virtual_machines.len()
        );
        self.pods.write().insert(
            pod_id,
            StoredPod {
                snapshot,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn remove(&self, pod_id: u64) -> Option<PodSnapshot> {
        self.pods.write().remove(&pod_id).map(|stored| stored.snapshot)
    }

    /// When a pod snapshot was last stored
    pub fn updated_at(&self, pod_id: u64) -> Option<DateTime<Utc>> {
        self.pods.read().get(&pod_id).map(|stored| stored.updated_at)
    }

    pub fn len(&self) -> usize {
        self.pods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.read().is_empty()
    }
}

#[async_trait]
impl PodInventory for InMemoryInventory {
    async fn pod_snapshot(&self, pod_id: u64) -> Result<Option<PodSnapshot>> {
        Ok(self.pods.read().get(&pod_id).map(|stored| stored.snapshot.clone()))
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        Ok(self
            .pods
            .read()
            .values()
            .map(|stored| stored.snapshot.pod.clone())
            .collect())
    }

    async fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>> {
        let mut vms: Vec<VirtualMachine> = self
            .pods
            .read()
            .values()
            .flat_map(|stored| stored.snapshot.virtual_machines.iter().cloned())
            .collect();
        vms.sort_by_key(|vm| vm.id);
        Ok(vms)
    }

    async fn get_virtual_machine(&self, vm_id: u64) -> Result<Option<VirtualMachine>> {
        Ok(self.pods.read().values().find_map(|stored| {
            stored
                .snapshot
                .virtual_machines
                .iter()
                .find(|vm| vm.id == vm_id)
                .cloned()
        }))
    }
}
