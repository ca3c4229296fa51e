//! In-process contract host
//!
//! Stands in for the ledger platform: it routes invocations to contracts,
//! serializes top-level transactions, commits each successful write set
//! atomically and keeps the log of committed events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

use super::{
    ClientIdentity, CommittedEvent, Contract, ContractError, ContractInvoker, ErrorClass, EventLog,
    Invocation, Response, TxContext, TxMode,
};
use crate::storage::Storage;

struct HostInner {
    storage: Arc<dyn Storage>,
    contracts: HashMap<String, Arc<dyn Contract>>,
    events: EventLog,
    /// Serializes top-level transactions the way the platform orders them
    order: Mutex<()>,
}

/// Runs contracts against a shared key-value store
#[derive(Clone)]
pub struct LedgerHost {
    inner: Arc<HostInner>,
}

impl LedgerHost {
    /// Create a host serving `contracts` over `storage`
    pub fn new(storage: Arc<dyn Storage>, contracts: Vec<Arc<dyn Contract>>) -> Self {
        let contracts = contracts
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self {
            inner: Arc::new(HostInner {
                storage,
                contracts,
                events: EventLog::new(),
                order: Mutex::new(()),
            }),
        }
    }

    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::clone(&self.inner.storage)
    }

    /// Run an operation and commit its writes if it succeeds
    pub async fn submit(
        &self,
        contract: &str,
        function: &str,
        args: &[&str],
        identity: &ClientIdentity,
        transient: HashMap<String, Vec<u8>>,
    ) -> Response {
        self.run_top_level(contract, function, args, identity, transient, TxMode::Submit).await
    }

    /// Run an operation without committing anything
    pub async fn evaluate(
        &self,
        contract: &str,
        function: &str,
        args: &[&str],
        identity: &ClientIdentity,
    ) -> Response {
        self.run_top_level(contract, function, args, identity, HashMap::new(), TxMode::Evaluate).await
    }

    /// Every event committed under `tx_id`
    pub async fn events_for(&self, tx_id: &str) -> Vec<CommittedEvent> {
        self.inner.events.for_transaction(tx_id).await
    }

    /// The full event log
    pub async fn events(&self) -> Vec<CommittedEvent> {
        self.inner.events.all().await
    }

    async fn run_top_level(
        &self,
        contract: &str,
        function: &str,
        args: &[&str],
        identity: &ClientIdentity,
        transient: HashMap<String, Vec<u8>>,
        mode: TxMode,
    ) -> Response {
        let _ordered = self.inner.order.lock().await;
        let invocation = Invocation {
            tx_id: Uuid::new_v4().to_string(),
            contract: contract.to_string(),
            function: function.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            identity: identity.clone(),
            transient,
            mode,
        };
        self.execute(invocation).await
    }

    async fn execute(&self, invocation: Invocation) -> Response {
        let contract = match self.inner.contracts.get(&invocation.contract) {
            Some(contract) => Arc::clone(contract),
            None => {
                return Response::error(ContractError::new(
                    ErrorClass::Precondition,
                    format!("contract {} is not installed", invocation.contract),
                ));
            }
        };

        let span = info_span!(
            "tx",
            contract = %invocation.contract,
            function = %invocation.function,
            tx_id = %invocation.tx_id,
        );
        let invoker: Arc<dyn ContractInvoker> = Arc::new(self.clone());
        let storage = Arc::clone(&self.inner.storage);
        let events = &self.inner.events;

        async move {
            let mode = invocation.mode;
            let mut ctx = TxContext::new(invocation, Arc::clone(&storage), invoker);

            let result = match contract.before_transaction(&mut ctx).await {
                Ok(()) => contract.invoke(&mut ctx).await,
                Err(err) => Err(err),
            };
            let mut committed = ctx.take_nested_events();

            match result {
                Ok(payload) => {
                    let own_events = ctx.take_events();
                    if mode == TxMode::Submit {
                        let writes = ctx.take_writes();
                        debug!(writes = writes.len(), events = own_events.len(), "committing");
                        if let Err(err) = storage.apply_batch(writes).await {
                            error!("commit failed: {}", err);
                            let mut response = Response::error(ContractError::internal(format!(
                                "failed to commit transaction: {}",
                                err
                            )));
                            response.events = committed;
                            return response;
                        }
                        events.append(ctx.tx_id(), ctx.contract(), &own_events).await;
                    }
                    committed.extend(own_events);
                    Response::success(payload, committed)
                }
                Err(err) => {
                    warn!(class = %err.class, "transaction rejected: {}", err.message);
                    let mut response = Response::error(err);
                    response.events = committed;
                    response
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[async_trait]
impl ContractInvoker for LedgerHost {
    async fn invoke_nested(&self, invocation: Invocation) -> Response {
        self.execute(invocation).await
    }
}
