//! Record prefetch run before every registry operation

use tracing::{debug, warn};

use modelchain_core::TxContext;

use crate::{RegistryError, RegistryResult};

/// Loads the record named by an operation's first argument into the
/// transaction context, and rejects unknown operations.
#[derive(Debug, Clone)]
pub struct PrefetchMiddleware {
    functions: &'static [&'static str],
}

impl PrefetchMiddleware {
    pub fn new(functions: &'static [&'static str]) -> Self {
        Self { functions }
    }

    pub fn is_known(&self, function: &str) -> bool {
        self.functions.contains(&function)
    }

    pub async fn before(&self, ctx: &mut TxContext) -> RegistryResult<()> {
        let (function, args) = ctx.function_and_parameters();
        if !self.is_known(function) {
            warn!("Rejected unknown registry function {}", function);
            return Err(RegistryError::InvalidFunction {
                function: function.to_string(),
                args: args.to_vec(),
            });
        }

        let record = match args.first() {
            Some(key) if !key.is_empty() => ctx.get_state(key).await?,
            _ => None,
        };
        debug!(found = record.is_some(), "prefetched record for {}", function);
        ctx.set_data(record);
        Ok(())
    }
}
