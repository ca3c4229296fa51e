//! Contract runtime
//!
//! Operations are invoked by name with positional string arguments and
//! answer with a [`Response`]. Each invocation runs against its own
//! [`TxContext`]: reads see the transaction's own writes, and the write set
//! and events commit together only if the operation succeeds.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::StorageError;

pub mod context;
pub mod events;
pub mod host;

pub use context::{ClientIdentity, TxContext, TxMode};
pub use events::{ChaincodeEvent, CommittedEvent, EventLog};
pub use host::LedgerHost;

/// Failure categories, kept apart so operators can alert on them separately
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// A precondition did not hold; nothing was written
    Precondition,
    /// Stored artifacts or request input failed an integrity check
    Integrity,
    /// A call into another contract reported a failure
    CrossService,
    /// One side of a multi-write sequence applied and the other did not
    Consistency,
    /// Storage, serialization or collaborator failure
    Internal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Precondition => "precondition",
            ErrorClass::Integrity => "integrity",
            ErrorClass::CrossService => "cross_service",
            ErrorClass::Consistency => "consistency",
            ErrorClass::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// The failure a contract hands back to the host
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ContractError {
    pub class: ErrorClass,
    pub message: String,
}

impl ContractError {
    pub fn new<S: Into<String>>(class: ErrorClass, message: S) -> Self {
        Self { class, message: message.into() }
    }

    pub fn precondition<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorClass::Precondition, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorClass::Internal, message)
    }

    /// Rejection of an operation name the contract does not export
    pub fn invalid_function(function: &str, args: &[String]) -> Self {
        Self::precondition(format!("invalid function {} passed with args {:?}", function, args))
    }
}

impl From<StorageError> for ContractError {
    fn from(err: StorageError) -> Self {
        Self::internal(err.to_string())
    }
}

/// Result of invoking an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// [`Response::OK`] or [`Response::ERROR`]
    pub status: u16,
    /// Human readable failure message, empty on success
    pub message: String,
    /// Operation result, typically JSON
    pub payload: Vec<u8>,
    /// Events committed by this transaction, including nested calls
    pub events: Vec<ChaincodeEvent>,
    /// Failure category, `None` on success
    pub class: Option<ErrorClass>,
}

impl Response {
    pub const OK: u16 = 200;
    pub const ERROR: u16 = 500;

    pub fn success(payload: Vec<u8>, events: Vec<ChaincodeEvent>) -> Self {
        Self {
            status: Self::OK,
            message: String::new(),
            payload,
            events,
            class: None,
        }
    }

    pub fn error(err: ContractError) -> Self {
        Self {
            status: Self::ERROR,
            message: err.message,
            payload: Vec::new(),
            events: Vec::new(),
            class: Some(err.class),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }

    /// Decode the JSON payload
    pub fn payload_json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }

    /// Events with the given name, in emission order
    pub fn events_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ChaincodeEvent> + 'a {
        self.events.iter().filter(move |e| e.name == name)
    }
}

/// Wrong number of positional arguments
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{function} expects {expected} arguments, got {actual}")]
pub struct ArityError {
    pub function: String,
    pub expected: usize,
    pub actual: usize,
}

/// Borrow exactly `N` positional arguments
pub fn positional<'a, const N: usize>(function: &str, args: &'a [String]) -> Result<[&'a str; N], ArityError> {
    if args.len() != N {
        return Err(ArityError {
            function: function.to_string(),
            expected: N,
            actual: args.len(),
        });
    }
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str();
    }
    Ok(out)
}

/// A request to run one operation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub tx_id: String,
    pub contract: String,
    pub function: String,
    pub args: Vec<String>,
    pub identity: ClientIdentity,
    pub transient: HashMap<String, Vec<u8>>,
    pub mode: TxMode,
}

/// A named set of operations hosted by a [`LedgerHost`]
#[async_trait]
pub trait Contract: Send + Sync {
    /// Name other contracts and clients address this contract by
    fn name(&self) -> &str;

    /// Runs before every operation, with the operation's context
    async fn before_transaction(&self, _ctx: &mut TxContext) -> Result<(), ContractError> {
        Ok(())
    }

    /// Dispatch the operation named in `ctx`
    async fn invoke(&self, ctx: &mut TxContext) -> Result<Vec<u8>, ContractError>;
}

/// Runs cross-contract calls on behalf of a transaction
#[async_trait]
pub trait ContractInvoker: Send + Sync {
    async fn invoke_nested(&self, invocation: Invocation) -> Response;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional() {
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(positional::<2>("Transfer", &args).unwrap(), ["a", "b"]);

        let err = positional::<1>("Mint", &args).unwrap_err();
        assert_eq!(err.to_string(), "Mint expects 1 arguments, got 2");
        assert!(positional::<0>("TotalSupply", &[]).is_ok());
    }

    #[test]
    fn test_error_response() {
        let response = Response::error(ContractError::new(ErrorClass::Integrity, "hash doesn't match"));
        assert!(!response.is_ok());
        assert_eq!(response.status, Response::ERROR);
        assert_eq!(response.class, Some(ErrorClass::Integrity));
        assert_eq!(ErrorClass::CrossService.to_string(), "cross_service");
    }
}
