//! Operation dispatch for the model registry

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, error, info, warn};

use modelchain_core::config::{MarketConfig, RegistryConfig};
use modelchain_core::crypto::hash_dir;
use modelchain_core::storage::create_composite_key;
use modelchain_core::{positional, Contract, ContractError, TxContext};

use crate::blob::{blob_store_from_config, BlobStore};
use crate::inference::{DenseEngine, InferenceEngine};
use crate::model::{Model, ModelUse, ModelView, TensorSpec};
use crate::prefetch::PrefetchMiddleware;
use crate::saga::{self, SagaOp};
use crate::token_client::{TokenClient, UNAUTHORIZED_ROLE};
use crate::unpack::{Unpacker, ZipUnpacker};
use crate::{RegistryError, RegistryResult, BY_DEV_INDEX};

/// Operations the registry exports
pub const REGISTRY_FUNCTIONS: &[&str] = &[
    "SaveModel",
    "GetModel",
    "GetAllModels",
    "GetModelsByDev",
    "Authorize",
    "RunModel",
    "ListPending",
    "Reconcile",
    "Acknowledge",
];

/// Transient map key holding base64 model input
pub const INPUT_KEY: &str = "input";

/// Name of the audit event emitted by every paid run
pub const MODEL_USE_EVENT: &str = "ModelUse";

/// The model registry contract
pub struct ModelRegistry {
    config: RegistryConfig,
    tokens: TokenClient,
    prefetch: PrefetchMiddleware,
    blobs: Arc<dyn BlobStore>,
    unpacker: Arc<dyn Unpacker>,
    engine: Arc<dyn InferenceEngine>,
}

impl ModelRegistry {
    pub fn new(
        config: RegistryConfig,
        token_contract: &str,
        blobs: Arc<dyn BlobStore>,
        unpacker: Arc<dyn Unpacker>,
        engine: Arc<dyn InferenceEngine>,
    ) -> Self {
        Self {
            config,
            tokens: TokenClient::new(token_contract),
            prefetch: PrefetchMiddleware::new(REGISTRY_FUNCTIONS),
            blobs,
            unpacker,
            engine,
        }
    }

    /// Registry with the configured blob source, zip bundles and the dense engine
    pub fn from_config(config: &MarketConfig) -> RegistryResult<Self> {
        Ok(Self::new(
            config.registry.clone(),
            &config.token.contract_name,
            blob_store_from_config(&config.registry)?,
            Arc::new(ZipUnpacker),
            Arc::new(DenseEngine),
        ))
    }

    async fn dispatch(&self, ctx: &mut TxContext, function: &str, args: &[String]) -> RegistryResult<Vec<u8>> {
        match function {
            "SaveModel" => {
                let [name, cid, in_name, in_dt, in_shape, in_idx, out_name, out_dt, out_shape, out_idx] =
                    positional::<10>(function, args)?;
                let input = TensorSpec::parse(in_name, in_dt, in_shape, in_idx)?;
                let output = TensorSpec::parse(out_name, out_dt, out_shape, out_idx)?;
                self.save_model(ctx, name, cid, input, output).await?;
                Ok(Vec::new())
            }
            "GetModel" => {
                let [name] = positional::<1>(function, args)?;
                Ok(serde_json::to_vec(&prefetched(ctx, name)?.view())?)
            }
            "GetAllModels" => {
                positional::<0>(function, args)?;
                Ok(serde_json::to_vec(&self.all_models(ctx).await?)?)
            }
            "GetModelsByDev" => {
                let [dev] = positional::<1>(function, args)?;
                Ok(serde_json::to_vec(&self.models_by_dev(ctx, dev).await?)?)
            }
            "Authorize" => {
                let [name, grantee] = positional::<2>(function, args)?;
                self.authorize(ctx, name, grantee).await?;
                Ok(Vec::new())
            }
            "RunModel" => {
                let [name] = positional::<1>(function, args)?;
                self.run_model(ctx, name).await
            }
            "ListPending" => {
                positional::<0>(function, args)?;
                Ok(serde_json::to_vec(&saga::list(ctx).await?)?)
            }
            "Reconcile" => {
                positional::<0>(function, args)?;
                Ok(serde_json::to_vec(&saga::reconcile(ctx).await?)?)
            }
            "Acknowledge" => {
                let [tx_id] = positional::<1>(function, args)?;
                Ok(serde_json::to_vec(&saga::acknowledge(ctx, tx_id).await?)?)
            }
            _ => Err(RegistryError::InvalidFunction {
                function: function.to_string(),
                args: args.to_vec(),
            }),
        }
    }

    async fn save_model(
        &self,
        ctx: &mut TxContext,
        name: &str,
        cid: &str,
        input: TensorSpec,
        output: TensorSpec,
    ) -> RegistryResult<()> {
        validate_name(name)?;
        validate_cid(cid)?;
        let caller = ctx.client_id().to_string();

        let info = self.tokens.user_info(ctx, &caller).await?;
        if info.role != self.config.developer_role {
            warn!("{} with role {} tried to upload {}", caller, info.role, name);
            return Err(RegistryError::RoleNotAllowed(info.role));
        }
        let prices = self.tokens.prices(ctx).await?;
        if info.balance < prices.upload {
            return Err(RegistryError::InsufficientFunds { balance: info.balance, needed: prices.upload });
        }
        if ctx.data().is_some() {
            return Err(RegistryError::ModelExists(name.to_string()));
        }

        let bundle = self.blobs.fetch(cid, self.config.max_bundle_bytes).await?;
        let size = bundle.len() as u64;
        let location = self.config.models_dir.join(cid);
        self.unpacker.unpack(&bundle, &location)?;
        debug!("Unpacked {} ({} bytes) into {}", cid, size, location.display());

        let mut marker = saga::begin(ctx, SagaOp::Upload, name, prices.upload).await?;
        if let Err(err) = self.tokens.pay_upload(ctx).await {
            if let Err(cleanup) = saga::abandon(ctx, &marker).await {
                error!("failed to drop pending upload marker for {}: {}", name, cleanup);
            }
            return Err(err);
        }
        saga::mark_paid(ctx, &mut marker).await?;

        let hash = hash_dir(&location).map_err(|e| {
            error!(tx_id = ctx.tx_id(), "upload fee for {} paid but bundle hash failed: {}", name, e);
            RegistryError::ConsistencyGap {
                op: SagaOp::Upload.to_string(),
                model: name.to_string(),
                detail: e.to_string(),
            }
        })?;

        let model = Model {
            id: cid.to_string(),
            name: name.to_string(),
            hash,
            location: location.display().to_string(),
            input,
            output,
            creator: caller.clone(),
            allowed_users: vec![caller.clone()],
            upload_tx: marker.tx_id.clone(),
        };
        store_model(ctx, &model)?;
        saga::complete(ctx, &marker)?;

        info!("{} uploaded model {} from {}", caller, name, cid);
        Ok(())
    }

    async fn all_models(&self, ctx: &TxContext) -> RegistryResult<Vec<ModelView>> {
        ctx.get_state_by_range("", "")
            .await?
            .into_iter()
            .map(|(_, bytes)| -> RegistryResult<ModelView> { Ok(serde_json::from_slice::<Model>(&bytes)?.view()) })
            .collect()
    }

    async fn models_by_dev(&self, ctx: &TxContext, dev: &str) -> RegistryResult<Vec<ModelView>> {
        ctx.get_state_by_partial_composite_key(BY_DEV_INDEX, &[dev])
            .await?
            .into_iter()
            .map(|(_, bytes)| -> RegistryResult<ModelView> { Ok(serde_json::from_slice::<Model>(&bytes)?.view()) })
            .collect()
    }

    async fn authorize(&self, ctx: &mut TxContext, name: &str, grantee: &str) -> RegistryResult<()> {
        let mut model = prefetched(ctx, name)?;

        let info = self.tokens.user_info(ctx, grantee).await?;
        if info.role == UNAUTHORIZED_ROLE {
            return Err(RegistryError::GranteeNotApproved(grantee.to_string()));
        }
        if ctx.client_id() != model.creator {
            warn!("{} tried to grant access to {} owned by {}", ctx.client_id(), name, model.creator);
            return Err(RegistryError::NotOwner);
        }

        model.authorize(grantee)?;
        store_model(ctx, &model)?;
        info!("{} granted {} access to {}", model.creator, grantee, name);
        Ok(())
    }

    async fn run_model(&self, ctx: &mut TxContext, name: &str) -> RegistryResult<Vec<u8>> {
        let model = prefetched(ctx, name)?;
        let caller = ctx.client_id().to_string();

        let encoded = ctx.transient(INPUT_KEY).ok_or(RegistryError::MissingInput)?;
        let input = STANDARD
            .decode(encoded)
            .map_err(|e| RegistryError::MalformedInput(format!("input is not base64: {}", e)))?;

        let actual = hash_dir(Path::new(&model.location))
            .map_err(|e| RegistryError::ArtifactUnreadable(e.to_string()))?;
        if actual != model.hash {
            warn!(model = name, "stored artifacts no longer match the recorded hash");
            return Err(RegistryError::HashMismatch { expected: model.hash.clone(), actual });
        }

        let prices = self.tokens.prices(ctx).await?;
        let info = self.tokens.user_info(ctx, &caller).await?;
        let needed = if caller == model.creator {
            prices.use_price
        } else {
            if !model.is_allowed(&caller) {
                warn!("{} is not allowed to run {}", caller, name);
                return Err(RegistryError::NotAllowed(caller));
            }
            prices.use_price.saturating_mul(2)
        };
        if info.balance < needed {
            return Err(RegistryError::InsufficientFunds { balance: info.balance, needed });
        }

        let prediction = self.engine.run(&model, &input)?;

        let mut marker = saga::begin(ctx, SagaOp::Run, name, needed).await?;
        if let Err(err) = self.tokens.pay_for_model(ctx, &model.creator, name).await {
            if let Err(cleanup) = saga::abandon(ctx, &marker).await {
                error!("failed to drop pending run marker for {}: {}", name, cleanup);
            }
            return Err(err);
        }
        saga::mark_paid(ctx, &mut marker).await?;

        match self.tokens.prices(ctx).await {
            Ok(charged) if charged != prices => warn!(
                "prices changed during run of {}: checked use {}, ledger now charges {}",
                name, prices.use_price, charged.use_price
            ),
            Ok(_) => {}
            Err(err) => warn!("could not re-read prices after run of {}: {}", name, err),
        }

        ctx.set_event(
            MODEL_USE_EVENT,
            &ModelUse {
                creator: model.creator.clone(),
                model: name.to_string(),
                hash: model.hash.clone(),
                price: prices.use_price,
                user: caller.clone(),
            },
        )?;
        saga::complete(ctx, &marker)?;

        info!("{} ran {}", caller, name);
        Ok(serde_json::to_vec(&prediction)?)
    }
}

/// Decode the record the prefetch hook loaded for `name`
fn prefetched(ctx: &TxContext, name: &str) -> RegistryResult<Model> {
    let bytes = ctx.data().ok_or_else(|| RegistryError::ModelNotFound(name.to_string()))?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Write a model under its name and derive its index entry from it
fn store_model(ctx: &mut TxContext, model: &Model) -> RegistryResult<()> {
    let bytes = serde_json::to_vec(model)?;
    let index_key = create_composite_key(BY_DEV_INDEX, &[model.creator.as_str(), model.name.as_str()])?;
    ctx.put_state(&model.name, bytes.clone());
    ctx.put_state(&index_key, bytes);
    Ok(())
}

fn validate_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(RegistryError::InvalidArgument(format!("invalid model name {:?}", name)));
    }
    Ok(())
}

/// A cid names a directory under the models root, so it must stay a single path component
fn validate_cid(cid: &str) -> RegistryResult<()> {
    if cid.is_empty() || cid.contains(['/', '\\', '\0']) || cid == "." || cid.contains("..") {
        return Err(RegistryError::InvalidArgument(format!("invalid content identifier {:?}", cid)));
    }
    Ok(())
}

#[async_trait]
impl Contract for ModelRegistry {
    fn name(&self) -> &str {
        &self.config.contract_name
    }

    async fn before_transaction(&self, ctx: &mut TxContext) -> Result<(), ContractError> {
        Ok(self.prefetch.before(ctx).await?)
    }

    async fn invoke(&self, ctx: &mut TxContext) -> Result<Vec<u8>, ContractError> {
        let (function, args) = ctx.function_and_parameters();
        let function = function.to_string();
        let args = args.to_vec();
        debug!(caller = ctx.client_id(), "model registry {} {:?}", function, args);

        Ok(self.dispatch(ctx, &function, &args).await?)
    }
}
