//! Core modelchain module
//!
//! This module provides the pieces shared by both ledgers: the key-value
//! storage abstraction, composite keys, the per-operation transaction
//! context, the contract host that runs operations and cross-contract
//! calls, configuration and directory hashing.

pub mod storage;
pub mod runtime;
pub mod crypto;
pub mod config;
pub mod utils;

// Re-export key components
pub use storage::{Storage, StorageResult, StorageError, MemoryStorage, SledStorage};
pub use runtime::{
    positional, ArityError, ChaincodeEvent, ClientIdentity, Contract, ContractError, ErrorClass,
    LedgerHost, Response, TxContext,
};
pub use config::MarketConfig;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Package description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Initialize tracing for modelchain
///
/// `RUST_LOG` takes precedence over `level` when it is set.
pub fn init_tracing(level: &str) -> Result<(), String> {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to set global tracing subscriber: {}", e))
}
