//! VM Host Control Plane
//!
//! Serves pod discovery and NUMA capacity accounting for a fleet of VM
//! hosts reached through HTTP rack controllers.

use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vmhost_control_plane::{
    AccountingConfig, ApiServer, ApiServerConfig, CoordinatorConfig, CoordinatorMetrics, Error,
    HttpRackClient, HttpRackClientConfig, InMemoryInventory, NumaAccountant, PinningPolicy,
    RackClientRegistry, Result, RpcCoordinator,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// VM Host Control Plane - pod discovery and NUMA accounting
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// REST API bind address
    #[arg(long, env = "API_ADDR", default_value = "0.0.0.0:8090")]
    api_addr: String,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Pod snapshot file (YAML or JSON)
    #[arg(long, env = "INVENTORY")]
    inventory: Option<String>,

    /// Rack controller as ident=url, repeatable
    #[arg(long = "rack", value_name = "IDENT=URL")]
    racks: Vec<HttpRackClientConfig>,

    /// Per rack controller bound on pod discovery
    #[arg(long, env = "DISCOVERY_TIMEOUT_SECS", default_value = "120")]
    discovery_timeout_secs: u64,

    /// Reject snapshots where two guests pin the same core
    #[arg(long, env = "STRICT_PINNING")]
    strict_pinning: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting VM Host Control Plane");
    info!("  Version: {}", vmhost_control_plane::VERSION);
    info!("  REST API: {}", args.api_addr);
    info!("  Rack controllers: {}", args.racks.len());

    // Load pod inventory
    let inventory = match &args.inventory {
        Some(path) => InMemoryInventory::load(path)?,
        None => {
            warn!("No inventory file given, starting with an empty inventory");
            InMemoryInventory::new()
        }
    };
    info!("Inventory initialized with {} pods", inventory.len());

    // Connect rack controllers
    let clients = RackClientRegistry::new();
    for rack in &args.racks {
        let client = HttpRackClient::new(rack.clone())?;
        info!("Rack controller {} at {}", rack.ident, client.base_url());
        if !clients.register_if_absent(Arc::new(client)) {
            warn!("Rack controller {} given more than once, keeping the first", rack.ident);
        }
    }

    // Metrics
    let registry = Registry::new();
    let metrics = CoordinatorMetrics::new(&registry)?;

    let coordinator = RpcCoordinator::with_metrics(
        CoordinatorConfig {
            discovery_timeout: Duration::from_secs(args.discovery_timeout_secs),
            ..Default::default()
        },
        clients.clone(),
        metrics,
    );

    let accountant = NumaAccountant::new(AccountingConfig {
        pinning: if args.strict_pinning {
            PinningPolicy::Strict
        } else {
            PinningPolicy::Lenient
        },
    });

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Create and run API server
    let api_config = ApiServerConfig {
        rest_addr: args.api_addr.parse().map_err(|e| {
            Error::Configuration(format!("Invalid REST API address: {}", e))
        })?,
        ..Default::default()
    };

    let api_server = Arc::new(ApiServer::new(api_config, coordinator, inventory, accountant));

    let signal_server = api_server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_server.shutdown();
        }
    });

    api_server.run().await?;

    info!("Control plane shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let directives = format!(
        "{},hyper=warn,tower=warn,reqwest=info,axum=info",
        args.log_level.to_lowercase()
    );
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let (status, body) = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => (StatusCode::OK, "ok"),
                _ => (StatusCode::NOT_FOUND, "not found"),
            };
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Registry) -> Result<()> {
    use hyper::header::CONTENT_TYPE;
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => {
                            let encoder = TextEncoder::new();
                            let mut buffer = Vec::new();
                            match encoder.encode(&registry.gather(), &mut buffer) {
                                Ok(()) => {
                                    let mut response = Response::new(Body::from(buffer));
                                    if let Ok(value) = encoder.format_type().parse() {
                                        response.headers_mut().insert(CONTENT_TYPE, value);
                                    }
                                    response
                                }
                                Err(e) => {
                                    let mut response = Response::new(Body::from(e.to_string()));
                                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                    response
                                }
                            }
                        }
                        _ => {
                            let mut response = Response::new(Body::from("not found"));
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            response
                        }
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
