//! Rack Client Registry
//!
//! Concurrent map of the rack controllers currently connected to the region,
//! keyed by ident. Discovery takes a snapshot of it per call.

use crate::domain::ports::{ConnectedClients, RackClientRef};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Capacity of the client event channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Connection changes emitted by the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// A rack controller connected (or replaced an older connection)
    Connected { ident: String },
    /// A rack controller went away
    Disconnected { ident: String },
}

struct ClientEntry {
    client: RackClientRef,
    connected_at: DateTime<Utc>,
}

/// Registry of connected rack controllers
pub struct RackClientRegistry {
    clients: DashMap<String, ClientEntry>,
    event_tx: broadcast::Sender<ClientEvent>,
}

impl RackClientRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            clients: DashMap::new(),
            event_tx,
        })
    }

    /// Subscribe to connection changes
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.event_tx.subscribe()
    }

    /// Register a client under its own ident, returning the one it replaced
    pub fn register(&self, client: RackClientRef) -> Option<RackClientRef> {
        let ident = client.ident().to_string();
        info!("Rack controller connected: {}", ident);

        let previous = self.clients.insert(
            ident.clone(),
            ClientEntry {
                client,
                connected_at: Utc::now(),
            },
        );
        let _ = self.event_tx.send(ClientEvent::Connected { ident });
        previous.map(|entry| entry.client)
    }

    /// Register a client unless its ident is already taken; the first one stays
    pub fn register_if_absent(&self, client: RackClientRef) -> bool {
        let ident = client.ident().to_string();
        match self.clients.entry(ident.clone()) {
            Entry::Occupied(_) => {
                debug!("Rack controller {} already connected", ident);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(ClientEntry {
                    client,
                    connected_at: Utc::now(),
                });
                info!("Rack controller connected: {}", ident);
                let _ = self.event_tx.send(ClientEvent::Connected { ident });
                true
            }
        }
    }

    /// Remove a client by ident
    pub fn deregister(&self, ident: &str) -> Option<RackClientRef> {
        let (_, entry) = self.clients.remove(ident)?;
        info!("Rack controller disconnected: {}", ident);
        let _ = self.event_tx.send(ClientEvent::Disconnected {
            ident: ident.to_string(),
        });
        Some(entry.client)
    }

    pub fn get(&self, ident: &str) -> Option<RackClientRef> {
        self.clients.get(ident).map(|entry| entry.client.clone())
    }

    /// When a client connected
    pub fn connected_at(&self, ident: &str) -> Option<DateTime<Utc>> {
        self.clients.get(ident).map(|entry| entry.connected_at)
    }

    /// Connected idents, sorted
    pub fn idents(&self) -> Vec<String> {
        let mut idents: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        idents.sort();
        idents
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl ConnectedClients for RackClientRegistry {
    fn all_clients(&self) -> Vec<RackClientRef> {
        let mut clients: Vec<RackClientRef> = self
            .clients
            .iter()
            .map(|entry| entry.value().client.clone())
            .collect();
        clients.sort_by(|a, b| a.ident().cmp(b.ident()));
        debug!("Snapshot of {} connected rack controllers", clients.len());
        clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::RackClient;
    use crate::error::RemoteError;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl RackClient for Named {
        fn ident(&self) -> &str {
            self.0
        }

        async fn call(
            &self,
            _command: &str,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, RemoteError> {
            Ok(serde_json::Value::Null)
        }
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let registry = RackClientRegistry::new();
        registry.register(Arc::new(Named("rack-c")));
        registry.register(Arc::new(Named("rack-a")));
        registry.register(Arc::new(Named("rack-b")));

        let idents: Vec<String> = registry
            .all_clients()
            .iter()
            .map(|client| client.ident().to_string())
            .collect();
        assert_eq!(idents, vec!["rack-a", "rack-b", "rack-c"]);
        assert_eq!(registry.idents(), idents);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_register_replaces_same_ident() {
        let registry = RackClientRegistry::new();
        assert!(registry.register(Arc::new(Named("rack-a"))).is_none());
        assert!(registry.register(Arc::new(Named("rack-a"))).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.connected_at("rack-a").is_some());
    }

    struct Tagged(&'static str, u32);

    #[async_trait]
    impl RackClient for Tagged {
        fn ident(&self) -> &str {
            self.0
        }

        async fn call(
            &self,
            _command: &str,
            _arguments: serde_json::Value,
        ) -> Result<serde_json::Value, RemoteError> {
            Ok(serde_json::json!(self.1))
        }
    }

    #[tokio::test]
    async fn test_register_if_absent_keeps_first() {
        let registry = RackClientRegistry::new();
        let mut events = registry.subscribe();

        assert!(registry.register_if_absent(Arc::new(Tagged("rack-a", 1))));
        assert!(!registry.register_if_absent(Arc::new(Tagged("rack-a", 2))));
        assert_eq!(registry.len(), 1);

        let kept = registry.get("rack-a").unwrap();
        assert_eq!(
            kept.call("Ping", serde_json::Value::Null).await.unwrap(),
            serde_json::json!(1)
        );

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::Connected { ident: "rack-a".into() }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_deregister() {
        let registry = RackClientRegistry::new();
        registry.register(Arc::new(Named("rack-a")));

        assert!(registry.deregister("rack-a").is_some());
        assert!(registry.deregister("rack-a").is_none());
        assert!(registry.get("rack-a").is_none());
        assert!(registry.is_empty());
        assert!(registry.all_clients().is_empty());
    }

    #[tokio::test]
    async fn test_events() {
        let registry = RackClientRegistry::new();
        let mut events = registry.subscribe();

        registry.register(Arc::new(Named("rack-a")));
        registry.deregister("rack-a");

        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Connected { ident: "rack-a".into() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ClientEvent::Disconnected { ident: "rack-a".into() }
        );
    }
}
