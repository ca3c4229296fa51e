//! Operation dispatch for the token ledger

use async_trait::async_trait;
use tracing::debug;

use modelchain_core::config::TokenConfig;
use modelchain_core::{positional, Contract, ContractError, TxContext};

use crate::transaction_processor::parse_amount;
use crate::{AccountManager, Prices, TokenError, TokenResult, TransactionProcessor};

/// The token ledger contract
#[derive(Debug, Clone)]
pub struct TokenLedger {
    name: String,
    accounts: AccountManager,
    processor: TransactionProcessor,
}

impl TokenLedger {
    pub fn new(config: TokenConfig) -> Self {
        let accounts = AccountManager::new(config.clone());
        Self {
            name: config.contract_name,
            processor: TransactionProcessor::new(accounts.clone()),
            accounts,
        }
    }

    async fn dispatch(&self, ctx: &mut TxContext, function: &str, args: &[String]) -> TokenResult<Vec<u8>> {
        match function {
            "Register" => {
                let [name] = positional::<1>(function, args)?;
                Ok(self.accounts.register(ctx, name).await?.into_bytes())
            }
            "Authorize" => {
                let [id, role] = positional::<2>(function, args)?;
                self.accounts.authorize(ctx, id, role).await?;
                Ok(Vec::new())
            }
            "Bootstrap" => {
                positional::<0>(function, args)?;
                Ok(self.accounts.bootstrap(ctx).await?.into_bytes())
            }
            "TransferAdmin" => {
                let [id] = positional::<1>(function, args)?;
                self.accounts.transfer_admin(ctx, id).await?;
                Ok(Vec::new())
            }
            "GetAdmin" => {
                positional::<0>(function, args)?;
                let admin = self.accounts.admin_id(ctx).await?.ok_or(TokenError::AdminNotSet)?;
                Ok(admin.into_bytes())
            }
            "GetClientId" => {
                positional::<0>(function, args)?;
                Ok(ctx.client_id().as_bytes().to_vec())
            }
            "GetUserInfo" => {
                let [id] = positional::<1>(function, args)?;
                Ok(serde_json::to_vec(&self.accounts.user_info(ctx, id).await?)?)
            }
            "GetBalance" => {
                positional::<0>(function, args)?;
                let caller = ctx.client_id().to_string();
                let account = self.accounts.get_account(ctx, &caller).await?;
                Ok(account.balance.to_string().into_bytes())
            }
            "GetUserBalance" => {
                let [id] = positional::<1>(function, args)?;
                let account = self.accounts.get_account(ctx, id).await?;
                Ok(account.balance.to_string().into_bytes())
            }
            "Mint" => {
                let [amount] = positional::<1>(function, args)?;
                self.processor.mint(ctx, parse_amount(amount)?).await?;
                Ok(Vec::new())
            }
            "Burn" => {
                let [amount] = positional::<1>(function, args)?;
                self.processor.burn(ctx, parse_amount(amount)?).await?;
                Ok(Vec::new())
            }
            "TotalSupply" => {
                positional::<0>(function, args)?;
                Ok(self.processor.total_supply(ctx).await?.to_string().into_bytes())
            }
            "Transfer" => {
                let [to, amount] = positional::<2>(function, args)?;
                let amount = parse_amount(amount)?;
                let from = ctx.client_id().to_string();
                self.processor.transfer(ctx, &from, to, amount).await?;
                Ok(Vec::new())
            }
            "Approve" => {
                let [spender, amount] = positional::<2>(function, args)?;
                self.processor.approve(ctx, spender, parse_amount(amount)?).await?;
                Ok(Vec::new())
            }
            "Allowance" => {
                let [owner, spender] = positional::<2>(function, args)?;
                Ok(self.processor.allowance(ctx, owner, spender).await?.to_string().into_bytes())
            }
            "TransferFrom" => {
                let [from, to, amount] = positional::<3>(function, args)?;
                self.processor.transfer_from(ctx, from, to, parse_amount(amount)?).await?;
                Ok(Vec::new())
            }
            "SetPrices" => {
                let [upload, use_price] = positional::<2>(function, args)?;
                let prices = Prices { upload: parse_amount(upload)?, use_price: parse_amount(use_price)? };
                self.processor.set_prices(ctx, prices).await?;
                Ok(Vec::new())
            }
            "GetPrices" => {
                positional::<0>(function, args)?;
                Ok(serde_json::to_vec(&self.processor.prices(ctx).await?)?)
            }
            "PayUpload" => {
                positional::<0>(function, args)?;
                self.processor.pay_upload(ctx).await?;
                Ok(Vec::new())
            }
            "PayAdmin" => {
                positional::<0>(function, args)?;
                self.processor.pay_use(ctx).await?;
                Ok(Vec::new())
            }
            "PayForModel" => {
                let [owner, model] = positional::<2>(function, args)?;
                self.processor.pay_for_model(ctx, owner, model).await?;
                Ok(Vec::new())
            }
            _ => Err(TokenError::InvalidFunction {
                function: function.to_string(),
                args: args.to_vec(),
            }),
        }
    }
}

#[async_trait]
impl Contract for TokenLedger {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &mut TxContext) -> Result<Vec<u8>, ContractError> {
        let (function, args) = ctx.function_and_parameters();
        let function = function.to_string();
        let args = args.to_vec();
        debug!(caller = ctx.client_id(), "token ledger {} {:?}", function, args);

        Ok(self.dispatch(ctx, &function, &args).await?)
    }
}
