//! Model Registry for modelchain
//!
//! This crate provides the model marketplace contract. Developers upload
//! model bundles and pay an upload fee; granted users run them and pay a
//! usage fee. Every payment is a call into the token ledger contract,
//! and every upload or run is journaled so a partially applied sequence
//! can be found again.

use thiserror::Error;

use modelchain_core::{ArityError, ContractError, ErrorClass, StorageError};

pub mod model;
pub mod prefetch;
pub mod blob;
pub mod unpack;
pub mod inference;
pub mod saga;
pub mod token_client;
pub mod contract;

pub use blob::{BlobStore, DirectoryBlobStore, IpfsBlobStore, MemoryBlobStore};
pub use contract::{ModelRegistry, REGISTRY_FUNCTIONS};
pub use inference::{DenseEngine, InferenceEngine, Prediction};
pub use model::{DataType, Model, ModelUse, ModelView, TensorSpec};
pub use prefetch::PrefetchMiddleware;
pub use saga::{PendingOperation, ReconcileOutcome, ReconcileStatus, SagaOp, SagaStage};
pub use token_client::{Prices, TokenClient, UserInfo, UNAUTHORIZED_ROLE};
pub use unpack::{Unpacker, ZipUnpacker};

/// Composite key namespace of the per-developer index
pub const BY_DEV_INDEX: &str = "byDev";

/// Error types for model registry operations
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No record under this name
    #[error("no model with key {0} found")]
    ModelNotFound(String),

    /// A record already exists under this name
    #[error("cannot create world state pair with key {0}. Already exists")]
    ModelExists(String),

    /// The caller's role may not upload
    #[error("not allowed to upload a model. role: {0}")]
    RoleNotAllowed(String),

    /// Balance below what the operation costs
    #[error("insufficient funds. balance: {balance}, needed: {needed}")]
    InsufficientFunds { balance: i64, needed: i64 },

    /// Only the creator may grant access
    #[error("you aren't the owner of the model")]
    NotOwner,

    /// The grantee was never authorized by the issuing organization
    #[error("user {0} not authorized by admin")]
    GranteeNotApproved(String),

    /// The grantee already has access
    #[error("user {0} already authorized")]
    AlreadyAuthorized(String),

    /// The caller was not granted access
    #[error("user {0} not allowed to run model")]
    NotAllowed(String),

    /// Malformed operation argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation name not exported by the registry
    #[error("invalid function {function} passed with args {args:?}")]
    InvalidFunction { function: String, args: Vec<String> },

    /// Element type name outside the supported set
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    /// Bundle larger than the configured limit
    #[error("bundle {cid} is {size} bytes, limit is {limit}")]
    BundleTooLarge { cid: String, size: u64, limit: u64 },

    /// Stored artifacts no longer match the recorded hash
    #[error("hash doesn't match: recorded {expected}, found {actual}")]
    HashMismatch { expected: String, actual: String },

    /// The transient input is absent
    #[error("error getting input from transient map")]
    MissingInput,

    /// The transient input does not decode
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Stored artifacts cannot be read
    #[error("model artifacts unreadable: {0}")]
    ArtifactUnreadable(String),

    /// The token ledger rejected a call
    #[error("error during {function}: {message}")]
    CrossService { function: String, message: String },

    /// The blob source failed
    #[error("failed to fetch {cid}: {reason}")]
    BlobFetch { cid: String, reason: String },

    /// The bundle does not extract
    #[error("error extracting bundle: {0}")]
    Unpack(String),

    /// The inference engine failed
    #[error("error executing model: {0}")]
    Inference(String),

    /// No journaled operation under this transaction id
    #[error("no pending operation for transaction {0}")]
    PendingNotFound(String),

    /// Only the account that paid may acknowledge a journaled operation
    #[error("pending operation {tx_id} was paid by {payer}")]
    NotPayer { tx_id: String, payer: String },

    /// Payment committed but the rest of the operation did not
    #[error("{op} for {model} was paid but not recorded: {detail}")]
    ConsistencyGap { op: String, model: String, detail: String },

    /// Error with storage
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RegistryError {
    /// Failure category reported to callers
    pub fn class(&self) -> ErrorClass {
        match self {
            RegistryError::HashMismatch { .. }
            | RegistryError::MissingInput
            | RegistryError::MalformedInput(_)
            | RegistryError::ArtifactUnreadable(_) => ErrorClass::Integrity,
            RegistryError::CrossService { .. } => ErrorClass::CrossService,
            RegistryError::ConsistencyGap { .. } => ErrorClass::Consistency,
            RegistryError::BlobFetch { .. }
            | RegistryError::Unpack(_)
            | RegistryError::Inference(_)
            | RegistryError::Storage(_)
            | RegistryError::Serialization(_) => ErrorClass::Internal,
            _ => ErrorClass::Precondition,
        }
    }
}

impl From<ArityError> for RegistryError {
    fn from(err: ArityError) -> Self {
        RegistryError::InvalidArgument(err.to_string())
    }
}

impl From<RegistryError> for ContractError {
    fn from(err: RegistryError) -> Self {
        ContractError::new(err.class(), err.to_string())
    }
}

/// Result type for model registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes_are_distinct() {
        assert_eq!(RegistryError::NotOwner.class(), ErrorClass::Precondition);
        assert_eq!(RegistryError::MissingInput.class(), ErrorClass::Integrity);
        assert_eq!(
            RegistryError::CrossService { function: "PayUpload".into(), message: "x".into() }.class(),
            ErrorClass::CrossService
        );
        assert_eq!(
            RegistryError::ConsistencyGap { op: "upload".into(), model: "m".into(), detail: "d".into() }.class(),
            ErrorClass::Consistency
        );
        assert_eq!(RegistryError::Unpack("bad".into()).class(), ErrorClass::Internal);
        assert_eq!(RegistryError::PendingNotFound("tx".into()).class(), ErrorClass::Precondition);
    }

    #[test]
    fn test_cross_service_message_is_verbatim() {
        let err = RegistryError::CrossService {
            function: "PayForModel".to_string(),
            message: "client account bob has insufficient funds".to_string(),
        };
        let contract_err: ContractError = err.into();
        assert!(contract_err.message.ends_with("client account bob has insufficient funds"));
    }
}
