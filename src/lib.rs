//! Modelchain
//!
//! A token ledger and a paid model marketplace, run as two contracts on a
//! shared key-value ledger. Uploading and running models is paid for in
//! tokens through synchronous calls from the registry into the ledger.

use std::sync::Arc;

use modelchain_core::{LedgerHost, MarketConfig, Storage};
use modelchain_ledger::TokenLedger;
use modelchain_registry::{ModelRegistry, RegistryResult};

/// Module version information
pub mod version {
    /// The current version of the modelchain library
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Re-export the platform pieces
pub mod core {
    pub use modelchain_core::*;
}

/// Re-export the token ledger
pub mod ledger {
    pub use modelchain_ledger::*;
}

/// Re-export the model registry
pub mod registry {
    pub use modelchain_registry::*;
}

/// A host serving both contracts over `storage`, as `config` names them
pub fn build_host(config: &MarketConfig, storage: Arc<dyn Storage>) -> RegistryResult<LedgerHost> {
    let tokens = TokenLedger::new(config.token.clone());
    let registry = ModelRegistry::from_config(config)?;
    Ok(LedgerHost::new(storage, vec![Arc::new(tokens), Arc::new(registry)]))
}
