//! Pending-payment journal
//!
//! Uploads and runs pay through the token ledger, whose write set commits
//! independently of the registry's. Before paying, an operation durably
//! writes a marker; it advances the marker once the payment commits and
//! deletes it in the same write set as its own record. A marker that
//! outlives its operation points at a payment without a matching record.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use modelchain_core::storage::create_composite_key;
use modelchain_core::utils::timestamp_secs;
use modelchain_core::TxContext;

use crate::model::Model;
use crate::{RegistryError, RegistryResult};

/// Composite key namespace of pending markers
pub const PENDING_PREFIX: &str = "pending";

/// Operation a marker belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaOp {
    Upload,
    Run,
}

impl fmt::Display for SagaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SagaOp::Upload => "upload",
            SagaOp::Run => "run",
        })
    }
}

/// How far an operation got
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStage {
    /// Payment requested, outcome not yet recorded
    Started,
    /// Payment committed on the token ledger
    Paid,
}

/// A journaled upload or run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub op: SagaOp,
    pub tx_id: String,
    pub model: String,
    pub caller: String,
    /// Price the registry checked before paying
    pub price: i64,
    pub stage: SagaStage,
    pub started_at: u64,
}

impl PendingOperation {
    pub fn key(&self) -> RegistryResult<String> {
        let op = self.op.to_string();
        Ok(create_composite_key(PENDING_PREFIX, &[op.as_str(), self.tx_id.as_str()])?)
    }
}

/// Outcome of reconciling one marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStatus {
    /// The operation's record exists; the marker was cleared
    Completed,
    /// The payment's outcome was never recorded
    PaymentUnconfirmed,
    /// Paid, but the model record or usage event never committed
    PaidWithoutRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub marker: PendingOperation,
    pub status: ReconcileStatus,
}

/// Durably record that `op` is about to pay `price`
pub async fn begin(ctx: &TxContext, op: SagaOp, model: &str, price: i64) -> RegistryResult<PendingOperation> {
    let marker = PendingOperation {
        op,
        tx_id: ctx.tx_id().to_string(),
        model: model.to_string(),
        caller: ctx.client_id().to_string(),
        price,
        stage: SagaStage::Started,
        started_at: timestamp_secs(),
    };
    ctx.put_durable(&marker.key()?, &serde_json::to_vec(&marker)?).await?;
    Ok(marker)
}

/// Durably advance a marker once its payment committed
pub async fn mark_paid(ctx: &TxContext, marker: &mut PendingOperation) -> RegistryResult<()> {
    marker.stage = SagaStage::Paid;
    ctx.put_durable(&marker.key()?, &serde_json::to_vec(marker)?).await?;
    Ok(())
}

/// Durably drop a marker whose payment failed
pub async fn abandon(ctx: &TxContext, marker: &PendingOperation) -> RegistryResult<()> {
    ctx.delete_durable(&marker.key()?).await?;
    Ok(())
}

/// Clear a marker in the operation's own write set
pub fn complete(ctx: &mut TxContext, marker: &PendingOperation) -> RegistryResult<()> {
    ctx.del_state(&marker.key()?);
    Ok(())
}

/// Every marker still in the journal
pub async fn list(ctx: &TxContext) -> RegistryResult<Vec<PendingOperation>> {
    ctx.get_state_by_partial_composite_key(PENDING_PREFIX, &[])
        .await?
        .into_iter()
        .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(RegistryError::from))
        .collect()
}

/// Clear the caller's own marker once its outcome has been settled by hand
pub async fn acknowledge(ctx: &mut TxContext, tx_id: &str) -> RegistryResult<PendingOperation> {
    let marker = list(ctx)
        .await?
        .into_iter()
        .find(|m| m.tx_id == tx_id)
        .ok_or_else(|| RegistryError::PendingNotFound(tx_id.to_string()))?;
    if marker.caller != ctx.client_id() {
        warn!("{} tried to acknowledge {} of {} paid by {}", ctx.client_id(), marker.op, marker.model, marker.caller);
        return Err(RegistryError::NotPayer { tx_id: tx_id.to_string(), payer: marker.caller });
    }

    complete(ctx, &marker)?;
    info!(tx_id, "{} acknowledged {} of {} at stage {:?}", marker.caller, marker.op, marker.model, marker.stage);
    Ok(marker)
}

/// Classify every marker, clearing those whose upload did complete
pub async fn reconcile(ctx: &mut TxContext) -> RegistryResult<Vec<ReconcileOutcome>> {
    let mut outcomes = Vec::new();
    for marker in list(ctx).await? {
        let recorded = match marker.op {
            // a later upload under the same name does not settle this one
            SagaOp::Upload => match ctx.get_state(&marker.model).await? {
                Some(bytes) => serde_json::from_slice::<Model>(&bytes)?.upload_tx == marker.tx_id,
                None => false,
            },
            SagaOp::Run => false,
        };

        let status = if recorded {
            complete(ctx, &marker)?;
            info!("Cleared marker of completed {} of {}", marker.op, marker.model);
            ReconcileStatus::Completed
        } else if marker.stage == SagaStage::Started {
            warn!("{} of {} by {} has no recorded payment outcome", marker.op, marker.model, marker.caller);
            ReconcileStatus::PaymentUnconfirmed
        } else {
            error!(
                tx_id = %marker.tx_id,
                "{} paid {} for {} of {} without a committed record",
                marker.caller, marker.price, marker.op, marker.model
            );
            ReconcileStatus::PaidWithoutRecord
        };
        outcomes.push(ReconcileOutcome { marker, status });
    }
    Ok(outcomes)
}
