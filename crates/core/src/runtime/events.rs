//! Audit events attached to committed transactions

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// A named JSON payload emitted by an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

impl ChaincodeEvent {
    /// Encode `payload` as JSON under `name`
    pub fn json<T: Serialize>(name: &str, payload: &T) -> serde_json::Result<Self> {
        Ok(Self {
            name: name.to_string(),
            payload: serde_json::to_vec(payload)?,
        })
    }

    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

/// An event together with the transaction and contract that committed it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEvent {
    pub tx_id: String,
    pub contract: String,
    pub event: ChaincodeEvent,
}

/// Append-only log of committed events
#[derive(Debug, Default)]
pub struct EventLog {
    entries: RwLock<Vec<CommittedEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn append(&self, tx_id: &str, contract: &str, events: &[ChaincodeEvent]) {
        if events.is_empty() {
            return;
        }
        let mut entries = self.entries.write().await;
        entries.extend(events.iter().cloned().map(|event| CommittedEvent {
            tx_id: tx_id.to_string(),
            contract: contract.to_string(),
            event,
        }));
    }

    /// Every event committed under `tx_id`
    pub async fn for_transaction(&self, tx_id: &str) -> Vec<CommittedEvent> {
        let entries = self.entries.read().await;
        entries.iter().filter(|e| e.tx_id == tx_id).cloned().collect()
    }

    pub async fn all(&self) -> Vec<CommittedEvent> {
        self.entries.read().await.clone()
    }
}
