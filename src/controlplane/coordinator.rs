//! RPC Coordinator
//!
//! Fans pod discovery out to every connected rack controller and issues the
//! single-target compose, decompose and commissioning calls. Discovery never
//! raises per-controller failures; it collects them so the caller can pick
//! the most useful one.

use crate::controlplane::classifier::{select_representative, wrap_failure, PodOperation};
use crate::controlplane::commands::{
    self, ComposeMachine, DecomposeMachine, DiscoverPod, RpcCommand, SendPodCommissioningResults,
};
use crate::controlplane::metrics::CoordinatorMetrics;
use crate::domain::discovered::{
    DiscoveredMachine, DiscoveredPod, DiscoveredPodHints, RequestedMachine,
};
use crate::domain::models::{NodeCredentials, PodContext};
use crate::domain::ports::{ConnectedClientsRef, RackClient};
use crate::error::{Error, RemoteError, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Time bounds for rack controller calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Per-controller bound on a discovery leg
    pub discovery_timeout: Duration,
    /// Bound on a compose call; unbounded when None
    pub compose_timeout: Option<Duration>,
    /// Bound on a decompose call; unbounded when None
    pub decompose_timeout: Option<Duration>,
    /// Bound on forwarding commissioning results
    pub commissioning_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(120),
            compose_timeout: None,
            decompose_timeout: None,
            commissioning_timeout: Some(Duration::from_secs(120)),
        }
    }
}

// =============================================================================
// Discovery Outcome
// =============================================================================

/// Per-controller results of one discovery fan-out.
///
/// Every controller in the snapshot appears in exactly one of the two maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryOutcome {
    pub discovered: BTreeMap<String, DiscoveredPod>,
    pub failures: BTreeMap<String, RemoteError>,
}

impl DiscoveryOutcome {
    /// Number of controllers that answered either way
    pub fn client_count(&self) -> usize {
        self.discovered.len() + self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discovered.is_empty() && self.failures.is_empty()
    }
}

/// Pick the result to act on.
///
/// The lowest ident wins among successes. With no success the most
/// informative failure is returned; with no controllers at all, `Ok(None)`.
pub fn select_best_discovery(
    outcome: DiscoveryOutcome,
) -> std::result::Result<Option<DiscoveredPod>, RemoteError> {
    if let Some((_, pod)) = outcome.discovered.into_iter().next() {
        return Ok(Some(pod));
    }
    match select_representative(&outcome.failures) {
        Some((_, error)) => Err(error.clone()),
        None => Ok(None),
    }
}

/// Legs are aborted when the fan-out future is dropped before settling
type DiscoveryLeg = (
    String,
    AbortOnDropHandle<std::result::Result<DiscoveredPod, RemoteError>>,
);

// =============================================================================
// Coordinator
// =============================================================================

/// Coordinates pod RPCs across the connected rack controllers
pub struct RpcCoordinator {
    config: CoordinatorConfig,
    clients: ConnectedClientsRef,
    metrics: Arc<CoordinatorMetrics>,
}

impl RpcCoordinator {
    /// Create a coordinator with metrics on a private registry
    pub fn new(config: CoordinatorConfig, clients: ConnectedClientsRef) -> Arc<Self> {
        Self::with_metrics(config, clients, CoordinatorMetrics::unregistered())
    }

    pub fn with_metrics(
        config: CoordinatorConfig,
        clients: ConnectedClientsRef,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            clients,
            metrics,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.metrics
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    /// Ask every connected controller to discover a pod and wait for all of them
    pub async fn discover_pod(
        &self,
        pod_type: &str,
        context: &PodContext,
        pod_id: Option<u64>,
        name: Option<&str>,
    ) -> DiscoveryOutcome {
        let started = Instant::now();
        let legs = self.spawn_legs(pod_type, context, pod_id, name);
        self.join_legs(legs, started).await
    }

    /// Like [`discover_pod`](Self::discover_pod), but gives up as soon as
    /// `cancel` fires, aborting the legs still in flight.
    pub async fn discover_pod_until(
        &self,
        pod_type: &str,
        context: &PodContext,
        pod_id: Option<u64>,
        name: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DiscoveryOutcome> {
        let started = Instant::now();
        let legs = self.spawn_legs(pod_type, context, pod_id, name);
        let in_flight = legs.len();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Discovery of {} pod cancelled with {} legs in flight", pod_type, in_flight);
                Err(Error::Cancelled {
                    operation: DiscoverPod::NAME.to_string(),
                })
            }
            outcome = self.join_legs(legs, started) => Ok(outcome),
        }
    }

    fn spawn_legs(
        &self,
        pod_type: &str,
        context: &PodContext,
        pod_id: Option<u64>,
        name: Option<&str>,
    ) -> Vec<DiscoveryLeg> {
        let command = Arc::new(DiscoverPod {
            pod_type: pod_type.to_string(),
            context: context.clone(),
            pod_id,
            name: name.map(str::to_string),
        });
        let timeout = self.config.discovery_timeout;

        let mut seen = BTreeSet::new();
        let mut legs = Vec::new();
        for client in self.clients.all_clients() {
            let ident = client.ident().to_string();
            if !seen.insert(ident.clone()) {
                continue;
            }
            let command = command.clone();
            let handle = AbortOnDropHandle::new(tokio::spawn(async move {
                commands::call(client.as_ref(), command.as_ref(), Some(timeout))
                    .await
                    .map(|response| response.pod)
            }));
            legs.push((ident, handle));
        }

        info!("Discovering {} pod across {} rack controllers", pod_type, legs.len());
        legs
    }

    async fn join_legs(&self, legs: Vec<DiscoveryLeg>, started: Instant) -> DiscoveryOutcome {
        let (idents, handles): (Vec<String>, Vec<_>) = legs.into_iter().unzip();
        let results = join_all(handles).await;

        let mut outcome = DiscoveryOutcome::default();
        for (ident, joined) in idents.into_iter().zip(results) {
            let result = joined.unwrap_or_else(|e| {
                Err(RemoteError::Unhandled(format!("discovery task failed: {}", e)))
            });
            match result {
                Ok(pod) => {
                    debug!("Rack controller {} discovered pod", ident);
                    self.metrics.record_discovery_leg(true);
                    outcome.discovered.insert(ident, pod);
                }
                Err(e) => {
                    warn!("Rack controller {} failed pod discovery: {}", ident, e);
                    self.metrics.record_discovery_leg(false);
                    outcome.failures.insert(ident, e);
                }
            }
        }

        self.metrics.observe_discovery(started.elapsed().as_secs_f64());
        outcome
    }

    // =========================================================================
    // Single-Target Calls
    // =========================================================================

    /// Compose a machine on the pod behind `client`
    pub async fn compose_machine(
        &self,
        client: &dyn RackClient,
        pod_type: &str,
        context: &PodContext,
        request: &RequestedMachine,
        pod_id: u64,
        name: &str,
    ) -> Result<(DiscoveredMachine, DiscoveredPodHints)> {
        let command = ComposeMachine {
            pod_type: pod_type.to_string(),
            context: context.clone(),
            request: request.clone(),
            pod_id,
            name: name.to_string(),
        };
        let response = self
            .single_target(
                client,
                PodOperation::Compose,
                pod_type,
                &command,
                self.config.compose_timeout,
            )
            .await?;
        Ok((response.machine, response.hints))
    }

    /// Decompose a machine on the pod behind `client`
    pub async fn decompose_machine(
        &self,
        client: &dyn RackClient,
        pod_type: &str,
        context: &PodContext,
        pod_id: u64,
        name: &str,
    ) -> Result<DiscoveredPodHints> {
        let command = DecomposeMachine {
            pod_type: pod_type.to_string(),
            context: context.clone(),
            pod_id,
            name: name.to_string(),
        };
        let response = self
            .single_target(
                client,
                PodOperation::Decompose,
                pod_type,
                &command,
                self.config.decompose_timeout,
            )
            .await?;
        Ok(response.hints)
    }

    /// Forward commissioning credentials so the pod host can report back
    #[allow(clippy::too_many_arguments)]
    pub async fn send_pod_commissioning_results(
        &self,
        client: &dyn RackClient,
        pod_id: u64,
        name: &str,
        pod_type: &str,
        system_id: &str,
        context: &PodContext,
        credentials: &NodeCredentials,
        metadata_url: &str,
    ) -> Result<()> {
        let command = SendPodCommissioningResults {
            pod_id,
            name: name.to_string(),
            pod_type: pod_type.to_string(),
            system_id: system_id.to_string(),
            context: context.clone(),
            consumer_key: credentials.consumer_key.clone(),
            token_key: credentials.token_key.clone(),
            token_secret: credentials.token_secret.clone(),
            metadata_url: metadata_url.to_string(),
        };
        let operation = PodOperation::SendCommissioningResults {
            name: name.to_string(),
            pod_id,
        };
        self.single_target(
            client,
            operation,
            pod_type,
            &command,
            self.config.commissioning_timeout,
        )
        .await?;
        Ok(())
    }

    async fn single_target<C: RpcCommand>(
        &self,
        client: &dyn RackClient,
        operation: PodOperation,
        pod_type: &str,
        command: &C,
        timeout: Option<Duration>,
    ) -> Result<C::Response> {
        info!("Calling {} for {} pod on {}", C::NAME, pod_type, client.ident());

        match commands::call(client, command, timeout).await {
            Ok(response) => {
                self.metrics.record_pod_call(operation.label(), true);
                Ok(response)
            }
            Err(remote) => {
                self.metrics.record_pod_call(operation.label(), false);
                let err = wrap_failure(&operation, pod_type, remote);
                error!("{} failed on {}: {}", C::NAME, client.ident(), err);
                Err(err)
            }
        }
    }
}
