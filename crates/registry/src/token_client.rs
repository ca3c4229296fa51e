//! Calls into the token ledger contract

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use modelchain_core::{Response, TxContext};

use crate::{RegistryError, RegistryResult};

/// Role of an account the issuing organization has not yet approved
pub const UNAUTHORIZED_ROLE: &str = "unauthorized_user";

/// Balance and role of an account, as the token ledger reports them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub balance: i64,
    pub role: String,
}

/// The token ledger's price list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prices {
    pub upload: i64,
    #[serde(rename = "use")]
    pub use_price: i64,
}

/// Client for the token ledger, addressed by its contract name
#[derive(Debug, Clone)]
pub struct TokenClient {
    contract: String,
}

impl TokenClient {
    pub fn new<S: Into<String>>(contract: S) -> Self {
        Self { contract: contract.into() }
    }

    pub async fn user_info(&self, ctx: &mut TxContext, id: &str) -> RegistryResult<UserInfo> {
        let response = self.call(ctx, "GetUserInfo", &[id]).await?;
        decode("GetUserInfo", &response)
    }

    pub async fn prices(&self, ctx: &mut TxContext) -> RegistryResult<Prices> {
        let response = self.call(ctx, "GetPrices", &[]).await?;
        decode("GetPrices", &response)
    }

    /// Charge the caller the upload fee
    pub async fn pay_upload(&self, ctx: &mut TxContext) -> RegistryResult<()> {
        self.call(ctx, "PayUpload", &[]).await.map(|_| ())
    }

    /// Charge the caller for one run of `model`
    pub async fn pay_for_model(&self, ctx: &mut TxContext, creator: &str, model: &str) -> RegistryResult<()> {
        self.call(ctx, "PayForModel", &[creator, model]).await.map(|_| ())
    }

    async fn call(&self, ctx: &mut TxContext, function: &str, args: &[&str]) -> RegistryResult<Response> {
        let response = ctx.invoke_contract(&self.contract, function, args).await;
        debug!(status = response.status, "{}.{} returned", self.contract, function);

        if !response.is_ok() {
            warn!("{}.{} failed: {}", self.contract, function, response.message);
            return Err(RegistryError::CrossService {
                function: function.to_string(),
                message: response.message,
            });
        }
        Ok(response)
    }
}

fn decode<T: DeserializeOwned>(function: &str, response: &Response) -> RegistryResult<T> {
    response.payload_json().map_err(|e| RegistryError::CrossService {
        function: function.to_string(),
        message: format!("undecodable payload: {}", e),
    })
}
