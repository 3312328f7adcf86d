//! HTTP Rack Client
//!
//! JSON-over-HTTP transport to a rack controller. Each command is posted to
//! `{base_url}/rpc/{Command}`; a non-2xx reply carries a serialized
//! [`RemoteError`] body.

use crate::domain::ports::RackClient;
use crate::error::{Error, RemoteError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for one HTTP rack client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRackClientConfig {
    /// Rack controller ident
    pub ident: String,
    /// Base URL of the rack controller RPC endpoint
    pub base_url: String,
    /// Transport level timeout; calls are also bounded by the coordinator
    pub request_timeout: Option<Duration>,
}

impl HttpRackClientConfig {
    pub fn new(ident: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            ident: ident.into(),
            base_url: base_url.into(),
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Parses `ident=url`, the form taken on the command line
impl FromStr for HttpRackClientConfig {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (ident, url) = s
            .split_once('=')
            .ok_or_else(|| format!("expected ident=url, got '{}'", s))?;
        let (ident, url) = (ident.trim(), url.trim());
        if ident.is_empty() {
            return Err(format!("missing rack controller ident in '{}'", s));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(format!("rack controller URL must be http(s): '{}'", url));
        }
        Ok(Self::new(ident, url.trim_end_matches('/')))
    }
}

// =============================================================================
// HTTP Rack Client
// =============================================================================

/// Rack client speaking JSON over HTTP
pub struct HttpRackClient {
    config: HttpRackClientConfig,
    http: Client,
}

impl HttpRackClient {
    /// Build a client; fails only if the TLS backend cannot initialise
    pub fn new(config: HttpRackClientConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(Error::Http)?;
        Ok(Self { config, http })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self, command: &str) -> String {
        format!("{}/rpc/{}", self.config.base_url, command)
    }

    fn transport_error(&self, error: reqwest::Error) -> RemoteError {
        if error.is_timeout() {
            let millis = self
                .config
                .request_timeout
                .map(|t| t.as_millis() as u64)
                .unwrap_or_default();
            RemoteError::Timeout(millis)
        } else {
            RemoteError::Transport(error.to_string())
        }
    }
}

#[async_trait]
impl RackClient for HttpRackClient {
    fn ident(&self) -> &str {
        &self.config.ident
    }

    async fn call(
        &self,
        command: &str,
        arguments: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, RemoteError> {
        let url = self.endpoint(command);
        debug!("Calling {} on {}", command, self.config.ident);

        let response = self
            .http
            .post(&url)
            .json(&arguments)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| self.transport_error(e));
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        match serde_json::from_slice::<RemoteError>(&body) {
            Ok(remote) => Err(remote),
            Err(_) => {
                warn!(
                    "Rack controller {} answered {} with an undecodable body",
                    self.config.ident, status
                );
                Err(RemoteError::Transport(format!(
                    "HTTP {} from {}: {}",
                    status,
                    url,
                    String::from_utf8_lossy(&body)
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn rpc(Path(command): Path<String>, Json(args): Json<serde_json::Value>) -> axum::response::Response {
        match command.as_str() {
            "DiscoverPod" => Json(json!({"pod": {"cores": args["context"]["cores"].clone()}})).into_response(),
            "ComposeMachine" => (
                StatusCode::BAD_REQUEST,
                Json(json!({"kind": "ActionFailure", "message": "no space left"})),
            )
                .into_response(),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
        }
    }

    async fn spawn_fake_rack() -> String {
        let app = Router::new().route("/rpc/:command", post(rpc));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_config() {
        let config: HttpRackClientConfig = "rack-1=http://10.0.0.2:5248/".parse().unwrap();
        assert_eq!(config.ident, "rack-1");
        assert_eq!(config.base_url, "http://10.0.0.2:5248");

        assert!("rack-1".parse::<HttpRackClientConfig>().is_err());
        assert!("=http://x".parse::<HttpRackClientConfig>().is_err());
        assert!("rack-1=ftp://x".parse::<HttpRackClientConfig>().is_err());
    }

    #[tokio::test]
    async fn test_successful_call() {
        let base = spawn_fake_rack().await;
        let client = HttpRackClient::new(HttpRackClientConfig::new("rack-1", base)).unwrap();

        let reply = client
            .call("DiscoverPod", json!({"context": {"cores": 8}}))
            .await
            .unwrap();
        assert_eq!(reply, json!({"pod": {"cores": 8}}));
        assert_eq!(client.ident(), "rack-1");
    }

    #[tokio::test]
    async fn test_remote_error_body_decoded() {
        let base = spawn_fake_rack().await;
        let client = HttpRackClient::new(HttpRackClientConfig::new("rack-1", base)).unwrap();

        let err = client.call("ComposeMachine", json!({})).await.unwrap_err();
        assert_eq!(err, RemoteError::ActionFailure("no space left".into()));
    }

    #[tokio::test]
    async fn test_undecodable_error_is_transport() {
        let base = spawn_fake_rack().await;
        let client = HttpRackClient::new(HttpRackClientConfig::new("rack-1", base)).unwrap();

        let err = client.call("DecomposeMachine", json!({})).await.unwrap_err();
        assert!(matches!(err, RemoteError::Transport(msg) if msg.contains("500")));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport() {
        let client = HttpRackClient::new(
            HttpRackClientConfig::new("rack-1", "http://127.0.0.1:1")
                .with_request_timeout(Duration::from_secs(2)),
        )
        .unwrap();

        let err = client.call("DiscoverPod", json!({})).await.unwrap_err();
        assert!(err.is_transient());
    }
}
