//! Per-operation transaction context

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChaincodeEvent, ContractInvoker, Invocation, Response};
use crate::storage::{create_composite_key, is_composite_key, Storage, StorageResult, WriteOp};

/// The authenticated caller, as supplied by the execution environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Unique identity string; account records are keyed by it
    pub id: String,
    /// Organization (membership service provider) the caller belongs to
    pub msp_id: String,
}

impl ClientIdentity {
    pub fn new<I: Into<String>, M: Into<String>>(id: I, msp_id: M) -> Self {
        Self { id: id.into(), msp_id: msp_id.into() }
    }
}

/// Whether a transaction's writes are committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    /// Commit writes and events on success
    Submit,
    /// Read-only evaluation; nothing is ever committed
    Evaluate,
}

/// State visible to one operation
///
/// Writes are buffered and shadow committed state for later reads in the
/// same transaction. The host commits them, with the events, only when the
/// operation returns successfully.
pub struct TxContext {
    tx_id: String,
    contract: String,
    function: String,
    args: Vec<String>,
    identity: ClientIdentity,
    transient: HashMap<String, Vec<u8>>,
    mode: TxMode,
    storage: Arc<dyn Storage>,
    invoker: Arc<dyn ContractInvoker>,
    /// Pending writes; `None` marks a delete
    writes: BTreeMap<String, Option<Vec<u8>>>,
    events: Vec<ChaincodeEvent>,
    nested_events: Vec<ChaincodeEvent>,
    data: Option<Vec<u8>>,
}

impl TxContext {
    pub fn new(
        invocation: Invocation,
        storage: Arc<dyn Storage>,
        invoker: Arc<dyn ContractInvoker>,
    ) -> Self {
        Self {
            tx_id: invocation.tx_id,
            contract: invocation.contract,
            function: invocation.function,
            args: invocation.args,
            identity: invocation.identity,
            transient: invocation.transient,
            mode: invocation.mode,
            storage,
            invoker,
            writes: BTreeMap::new(),
            events: Vec::new(),
            nested_events: Vec::new(),
            data: None,
        }
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// Name of the contract this context belongs to
    pub fn contract(&self) -> &str {
        &self.contract
    }

    pub fn mode(&self) -> TxMode {
        self.mode
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn client_id(&self) -> &str {
        &self.identity.id
    }

    pub fn msp_id(&self) -> &str {
        &self.identity.msp_id
    }

    pub fn function_and_parameters(&self) -> (&str, &[String]) {
        (&self.function, &self.args)
    }

    /// A request-scoped input that is never persisted
    pub fn transient(&self, key: &str) -> Option<&[u8]> {
        self.transient.get(key).map(Vec::as_slice)
    }

    /// Record attached by a before-transaction hook
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn set_data(&mut self, data: Option<Vec<u8>>) {
        self.data = data;
    }

    pub async fn get_state(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if let Some(pending) = self.writes.get(key) {
            return Ok(pending.clone());
        }
        self.storage.get(&self.storage_key(key)).await
    }

    pub fn put_state(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(key.to_string(), Some(value));
    }

    pub fn del_state(&mut self, key: &str) {
        self.writes.insert(key.to_string(), None);
    }

    /// Simple keys in `[start, end)`; an empty `end` is unbounded.
    /// Composite keys are never returned.
    pub async fn get_state_by_range(&self, start: &str, end: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let namespace = self.namespace_prefix();
        let lower = format!("{}{}", namespace, start);
        let upper = if end.is_empty() {
            self.namespace_upper_bound()
        } else {
            format!("{}{}", namespace, end)
        };

        let committed = self.storage.range(&lower, &upper).await?;
        let in_range = |key: &str| key >= start && (end.is_empty() || key < end);
        let merged = self.overlay(committed, in_range);

        Ok(merged.into_iter().filter(|(k, _)| !is_composite_key(k)).collect())
    }

    /// Every composite key in `object_type` whose leading components equal `attributes`
    pub async fn get_state_by_partial_composite_key(
        &self,
        object_type: &str,
        attributes: &[&str],
    ) -> StorageResult<Vec<(String, Vec<u8>)>> {
        let prefix = create_composite_key(object_type, attributes)?;
        let committed = self.storage.scan_prefix(&self.storage_key(&prefix)).await?;
        Ok(self.overlay(committed, |key: &str| key.starts_with(&prefix)))
    }

    /// Write straight to storage, outside the transaction's write set.
    ///
    /// The value survives even if this operation later fails. Evaluations
    /// never write.
    pub async fn put_durable(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        if self.mode == TxMode::Evaluate {
            return Ok(());
        }
        self.storage.put(&self.storage_key(key), value).await
    }

    /// Delete straight from storage, outside the transaction's write set
    pub async fn delete_durable(&self, key: &str) -> StorageResult<()> {
        if self.mode == TxMode::Evaluate {
            return Ok(());
        }
        self.storage.delete(&self.storage_key(key)).await
    }

    /// Attach a JSON event to the transaction
    pub fn set_event<T: Serialize>(&mut self, name: &str, payload: &T) -> serde_json::Result<()> {
        self.events.push(ChaincodeEvent::json(name, payload)?);
        Ok(())
    }

    pub fn events(&self) -> &[ChaincodeEvent] {
        &self.events
    }

    /// Call an operation of another contract as the same caller.
    ///
    /// The callee runs with its own write set, which commits on its own
    /// success regardless of what this transaction does afterwards.
    pub async fn invoke_contract(&mut self, contract: &str, function: &str, args: &[&str]) -> Response {
        debug!(caller = %self.contract, callee = contract, function, "cross-contract call");
        let invocation = Invocation {
            tx_id: self.tx_id.clone(),
            contract: contract.to_string(),
            function: function.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            identity: self.identity.clone(),
            transient: self.transient.clone(),
            mode: self.mode,
        };

        let invoker = Arc::clone(&self.invoker);
        let response = invoker.invoke_nested(invocation).await;
        if response.is_ok() {
            self.nested_events.extend(response.events.iter().cloned());
        }
        response
    }

    /// Drain the write set as storage operations, namespaced to this contract
    pub(crate) fn take_writes(&mut self) -> Vec<WriteOp> {
        let writes = std::mem::take(&mut self.writes);
        writes
            .into_iter()
            .map(|(key, value)| {
                let key = self.storage_key(&key);
                match value {
                    Some(value) => WriteOp::Put { key, value },
                    None => WriteOp::Delete { key },
                }
            })
            .collect()
    }

    pub(crate) fn take_events(&mut self) -> Vec<ChaincodeEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn take_nested_events(&mut self) -> Vec<ChaincodeEvent> {
        std::mem::take(&mut self.nested_events)
    }

    fn overlay<F>(&self, committed: Vec<(String, Vec<u8>)>, in_scope: F) -> Vec<(String, Vec<u8>)>
    where
        F: Fn(&str) -> bool,
    {
        let namespace = self.namespace_prefix();
        let mut merged: BTreeMap<String, Vec<u8>> = committed
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(&namespace).map(|k| (k.to_string(), v)))
            .collect();

        for (key, value) in self.writes.iter().filter(|(k, _)| in_scope(k.as_str())) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        merged.into_iter().collect()
    }

    fn namespace_prefix(&self) -> String {
        format!("{}/", self.contract)
    }

    // '0' is the byte after '/', so this bounds every key in the namespace
    fn namespace_upper_bound(&self) -> String {
        format!("{}0", self.contract)
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}/{}", self.contract, key)
    }
}
