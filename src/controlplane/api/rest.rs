//! REST API Handlers
//!
//! Read-mostly endpoints over the pod inventory, the NUMA accountant and
//! pod discovery.

use crate::controlplane::classifier::classify;
use crate::controlplane::coordinator::{select_best_discovery, RpcCoordinator};
use crate::domain::discovered::DiscoveredPod;
use crate::domain::models::{Pod, VirtualMachine};
use crate::domain::ports::PodInventoryRef;
use crate::error::Error;
use crate::hardware::numa::{summarize, HostResourceSummary, NumaAccountant, NumaNodeResources};
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Pod summary; the driver context is never exposed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodResponse {
    pub id: u64,
    pub name: String,
    pub pod_type: String,
    pub host_system_id: Option<String>,
}

impl From<&Pod> for PodResponse {
    fn from(pod: &Pod) -> Self {
        Self {
            id: pod.id,
            name: pod.name.clone(),
            pod_type: pod.pod_type.clone(),
            host_system_id: pod.host_system_id.clone(),
        }
    }
}

/// Guest summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineResponse {
    pub id: u64,
    pub pod_id: u64,
    pub identifier: String,
    pub pinned_cores: Vec<u32>,
    pub unpinned_cores: u32,
    pub memory: u64,
    pub hugepages_backed: bool,
    pub machine_system_id: Option<String>,
}

impl From<&VirtualMachine> for VirtualMachineResponse {
    fn from(vm: &VirtualMachine) -> Self {
        Self {
            id: vm.id,
            pod_id: vm.pod_id,
            identifier: vm.identifier.clone(),
            pinned_cores: vm.pinned_cores.clone(),
            unpinned_cores: vm.unpinned_cores,
            memory: vm.memory,
            hugepages_backed: vm.hugepages_backed,
            machine_system_id: vm.machine_system_id.clone(),
        }
    }
}

/// Pod detail with topology and guest counts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodDetailResponse {
    #[serde(flatten)]
    pub pod: PodResponse,
    pub numa_node_count: usize,
    pub host_interface_count: usize,
    pub virtual_machine_count: usize,
}

/// NUMA capacity of a pod host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodResourcesResponse {
    pub pod_id: u64,
    pub nodes: Vec<NumaNodeResources>,
    pub summary: HostResourceSummary,
}

/// Best discovery result for a pod
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverPodResult {
    pub pod_id: u64,
    /// Rack controller whose answer was picked
    pub rack_controller: String,
    pub discovered: DiscoveredPod,
    /// Rack controllers that failed, with their error
    pub failures: BTreeMap<String, String>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    coordinator: Arc<RpcCoordinator>,
    inventory: PodInventoryRef,
    accountant: NumaAccountant,
    shutdown: CancellationToken,
}

impl RestRouter {
    pub fn new(
        coordinator: Arc<RpcCoordinator>,
        inventory: PodInventoryRef,
        accountant: NumaAccountant,
    ) -> Self {
        Self {
            coordinator,
            inventory,
            accountant,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel in-flight discoveries when `token` fires
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            coordinator: self.coordinator,
            inventory: self.inventory,
            accountant: self.accountant,
            shutdown: self.shutdown,
        };

        Router::new()
            // Pod endpoints
            .route("/v1/pods", get(list_pods))
            .route("/v1/pods/:id", get(get_pod))
            .route("/v1/pods/:id/resources", get(get_pod_resources))
            .route("/v1/pods/:id/discover", post(discover_pod))
            // Virtual machine endpoints
            .route("/v1/virtual-machines", get(list_virtual_machines))
            .route("/v1/virtual-machines/:id", get(get_virtual_machine))
            // Health endpoint
            .route("/health", get(health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    coordinator: Arc<RpcCoordinator>,
    inventory: PodInventoryRef,
    accountant: NumaAccountant,
    shutdown: CancellationToken,
}

// =============================================================================
// Error Mapping
// =============================================================================

fn error_body(status: StatusCode, error: &str, message: String, details: Option<String>) -> Response {
    (
        status,
        Json(ApiErrorResponse {
            error: error.into(),
            message,
            details,
        }),
    )
        .into_response()
}

fn error_response(err: &Error) -> Response {
    let (status, code) = match err {
        Error::PodNotFound { .. } | Error::VirtualMachineNotFound { .. } => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        Error::PinnedCoreConflict { .. } => (StatusCode::CONFLICT, "pinned_core_conflict"),
        Error::InvalidSnapshot { .. } | Error::InvalidVirtualMachine { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "invalid_snapshot")
        }
        Error::PodProblem(_) => (StatusCode::UNPROCESSABLE_ENTITY, "pod_problem"),
        Error::Remote(remote) if !remote.is_transient() => (StatusCode::BAD_GATEWAY, "remote_error"),
        e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    };
    if status.is_server_error() {
        error!("Request failed: {}", err);
    }
    error_body(status, code, err.to_string(), None)
}

// =============================================================================
// Handlers
// =============================================================================

/// List all pods
async fn list_pods(State(state): State<AppState>) -> Response {
    match state.inventory.list_pods().await {
        Ok(pods) => {
            let pods: Vec<PodResponse> = pods.iter().map(PodResponse::from).collect();
            (StatusCode::OK, Json(pods)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Get one pod
async fn get_pod(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.inventory.pod_snapshot(id).await {
        Ok(Some(snapshot)) => {
            let (numa_node_count, host_interface_count) = snapshot
                .topology
                .as_ref()
                .map(|t| (t.numa_nodes.len(), t.interfaces.len()))
                .unwrap_or_default();
            (
                StatusCode::OK,
                Json(PodDetailResponse {
                    pod: PodResponse::from(&snapshot.pod),
                    numa_node_count,
                    host_interface_count,
                    virtual_machine_count: snapshot.virtual_machines.len(),
                }),
            )
                .into_response()
        }
        Ok(None) => error_response(&Error::PodNotFound { pod_id: id }),
        Err(e) => error_response(&e),
    }
}

/// NUMA capacity report of a pod host
async fn get_pod_resources(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let snapshot = match state.inventory.pod_snapshot(id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return error_response(&Error::PodNotFound { pod_id: id }),
        Err(e) => return error_response(&e),
    };

    match state.accountant.compute(&snapshot) {
        Ok(nodes) => {
            let summary = summarize(&nodes);
            (
                StatusCode::OK,
                Json(PodResourcesResponse {
                    pod_id: id,
                    nodes,
                    summary,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Discover a pod across all rack controllers
async fn discover_pod(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    let pod = match state.inventory.pod_snapshot(id).await {
        Ok(Some(snapshot)) => snapshot.pod,
        Ok(None) => return error_response(&Error::PodNotFound { pod_id: id }),
        Err(e) => return error_response(&e),
    };
    info!("Discovering pod {} ({})", pod.name, pod.pod_type);

    let outcome = match state
        .coordinator
        .discover_pod_until(
            &pod.pod_type,
            &pod.context,
            Some(pod.id),
            Some(&pod.name),
            &state.shutdown,
        )
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => return error_response(&e),
    };

    let rack_controller = outcome.discovered.keys().next().cloned();
    let failures: BTreeMap<String, String> = outcome
        .failures
        .iter()
        .map(|(ident, e)| (ident.clone(), e.to_string()))
        .collect();

    match (select_best_discovery(outcome), rack_controller) {
        (Ok(Some(discovered)), Some(rack_controller)) => (
            StatusCode::OK,
            Json(DiscoverPodResult {
                pod_id: id,
                rack_controller,
                discovered,
                failures,
            }),
        )
            .into_response(),
        (Err(remote), _) => {
            warn!("Discovery of pod {} failed everywhere: {}", id, remote);
            error_body(
                StatusCode::BAD_GATEWAY,
                "discovery_failed",
                remote.to_string(),
                Some(classify(&remote).to_string()),
            )
        }
        _ => error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "no_rack_controllers",
            "No rack controllers are connected".into(),
            None,
        ),
    }
}

/// List all virtual machines
async fn list_virtual_machines(State(state): State<AppState>) -> Response {
    match state.inventory.list_virtual_machines().await {
        Ok(vms) => {
            let vms: Vec<VirtualMachineResponse> =
                vms.iter().map(VirtualMachineResponse::from).collect();
            (StatusCode::OK, Json(vms)).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// Get one virtual machine
async fn get_virtual_machine(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.inventory.get_virtual_machine(id).await {
        Ok(Some(vm)) => {
            (StatusCode::OK, Json(VirtualMachineResponse::from(&vm))).into_response()
        }
        Ok(None) => error_response(&Error::VirtualMachineNotFound { vm_id: id }),
        Err(e) => error_response(&e),
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
