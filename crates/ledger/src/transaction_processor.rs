//! Transaction processor for token movements
//!
//! Every balance change goes through here: mint and burn, the checked
//! transfer primitive, allowances, and the fee payments the model registry
//! triggers.

use tracing::{debug, info, warn};

use modelchain_core::storage::create_composite_key;
use modelchain_core::utils::parse_string;
use modelchain_core::TxContext;

use crate::{
    AccountManager, ApprovalEvent, Prices, TokenError, TokenResult, TransferEvent,
    ALLOWANCE_PREFIX, PRICES_KEY, TOTAL_SUPPLY_KEY, ZERO_ADDRESS,
};

/// The transaction processor for handling token movements
#[derive(Debug, Clone)]
pub struct TransactionProcessor {
    /// Account access
    accounts: AccountManager,
}

impl TransactionProcessor {
    /// Create a new transaction processor
    pub fn new(accounts: AccountManager) -> Self {
        Self { accounts }
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// Both accounts must exist and be authorized, and the sender must
    /// cover the amount. Emits a `Transfer` event.
    pub async fn transfer(&self, ctx: &mut TxContext, from: &str, to: &str, amount: i64) -> TokenResult<()> {
        if from == to {
            return Err(TokenError::SelfTransfer);
        }
        if amount < 0 {
            return Err(TokenError::InvalidAmount("transfer amount can't be negative".to_string()));
        }

        let mut sender = self.accounts.get_account(ctx, from).await?;
        if !sender.authorized {
            return Err(TokenError::Unauthorized(from.to_string()));
        }
        sender.debit(amount)?;

        let mut recipient = self.accounts.get_account(ctx, to).await?;
        if !recipient.authorized {
            return Err(TokenError::RecipientUnauthorized(to.to_string()));
        }
        recipient.credit(amount)?;

        self.accounts.store_account(ctx, &sender)?;
        self.accounts.store_account(ctx, &recipient)?;
        ctx.set_event("Transfer", &TransferEvent {
            from: from.to_string(),
            to: to.to_string(),
            value: amount,
        })?;

        info!("Transferred {} from {} (now {}) to {} (now {})", amount, from, sender.balance, to, recipient.balance);
        Ok(())
    }

    /// Create `amount` new tokens in the caller's account.
    ///
    /// The first mint on a ledger without an admin binds the caller as admin.
    pub async fn mint(&self, ctx: &mut TxContext, amount: i64) -> TokenResult<()> {
        self.accounts.require_issuer(ctx, "mint new tokens")?;
        if amount <= 0 {
            return Err(TokenError::InvalidAmount("mint amount must be a positive integer".to_string()));
        }

        let minter = ctx.client_id().to_string();
        let mut account = self.accounts.get_account(ctx, &minter).await?;
        if self.accounts.admin_id(ctx).await?.is_none() {
            self.accounts.bootstrap(ctx).await?;
        }

        account.credit(amount)?;
        let supply = self.total_supply(ctx).await?.checked_add(amount).ok_or_else(|| {
            TokenError::InvalidAmount("total supply overflows".to_string())
        })?;

        self.accounts.store_account(ctx, &account)?;
        ctx.put_state(TOTAL_SUPPLY_KEY, supply.to_string().into_bytes());
        ctx.set_event("Transfer", &TransferEvent {
            from: ZERO_ADDRESS.to_string(),
            to: minter.clone(),
            value: amount,
        })?;

        info!("Minted {} to {}; balance {}, total supply {}", amount, minter, account.balance, supply);
        Ok(())
    }

    /// Destroy `amount` tokens from the caller's account
    pub async fn burn(&self, ctx: &mut TxContext, amount: i64) -> TokenResult<()> {
        self.accounts.require_issuer(ctx, "burn tokens")?;
        if amount <= 0 {
            return Err(TokenError::InvalidAmount("burn amount must be a positive integer".to_string()));
        }

        let burner = ctx.client_id().to_string();
        let mut account = self.accounts.get_account(ctx, &burner).await?;
        account.debit(amount)?;

        let supply = self.total_supply(ctx).await?;
        if supply < amount {
            return Err(TokenError::Corrupt {
                key: TOTAL_SUPPLY_KEY.to_string(),
                reason: format!("supply {} is below a held balance", supply),
            });
        }

        self.accounts.store_account(ctx, &account)?;
        ctx.put_state(TOTAL_SUPPLY_KEY, (supply - amount).to_string().into_bytes());
        ctx.set_event("Transfer", &TransferEvent {
            from: burner.clone(),
            to: ZERO_ADDRESS.to_string(),
            value: amount,
        })?;

        info!("Burned {} from {}; balance {}", amount, burner, account.balance);
        Ok(())
    }

    /// Tokens in circulation; zero before the first mint
    pub async fn total_supply(&self, ctx: &TxContext) -> TokenResult<i64> {
        read_counter(ctx, TOTAL_SUPPLY_KEY).await
    }

    /// Let `spender` withdraw up to `amount` from the caller's account
    pub async fn approve(&self, ctx: &mut TxContext, spender: &str, amount: i64) -> TokenResult<()> {
        if amount < 0 {
            return Err(TokenError::InvalidAmount("allowance can't be negative".to_string()));
        }

        let owner = ctx.client_id().to_string();
        let key = allowance_key(&owner, spender)?;
        ctx.put_state(&key, amount.to_string().into_bytes());
        ctx.set_event("Approval", &ApprovalEvent {
            owner: owner.clone(),
            spender: spender.to_string(),
            value: amount,
        })?;

        info!("{} approved a withdrawal allowance of {} for {}", owner, amount, spender);
        Ok(())
    }

    /// What `spender` may still withdraw from `owner`
    pub async fn allowance(&self, ctx: &TxContext, owner: &str, spender: &str) -> TokenResult<i64> {
        let allowance = read_counter(ctx, &allowance_key(owner, spender)?).await?;
        debug!("Allowance left for {} from {}: {}", spender, owner, allowance);
        Ok(allowance)
    }

    /// Transfer on behalf of `from`, spending the caller's allowance
    pub async fn transfer_from(&self, ctx: &mut TxContext, from: &str, to: &str, amount: i64) -> TokenResult<()> {
        let spender = ctx.client_id().to_string();
        let key = allowance_key(from, &spender)?;
        let available = read_counter(ctx, &key).await?;
        if available < amount {
            return Err(TokenError::InsufficientAllowance { available, requested: amount });
        }

        self.transfer(ctx, from, to, amount).await?;
        let remaining = available - amount;
        ctx.put_state(&key, remaining.to_string().into_bytes());

        info!("Allowance of {} from {} updated from {} to {}", spender, from, available, remaining);
        Ok(())
    }

    /// Overwrite the price list
    pub async fn set_prices(&self, ctx: &mut TxContext, prices: Prices) -> TokenResult<()> {
        self.accounts.require_issuer(ctx, "set prices")?;
        if prices.upload < 0 || prices.use_price < 0 {
            return Err(TokenError::InvalidAmount("prices can't be negative".to_string()));
        }

        ctx.put_state(PRICES_KEY, serde_json::to_vec(&prices)?);
        info!("Prices set to upload {} / use {}", prices.upload, prices.use_price);
        Ok(())
    }

    /// The current price list
    pub async fn prices(&self, ctx: &TxContext) -> TokenResult<Prices> {
        let bytes = ctx.get_state(PRICES_KEY).await?.ok_or(TokenError::PricesNotSet)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TokenError::Corrupt { key: PRICES_KEY.to_string(), reason: e.to_string() })
    }

    /// Pay `amount` from the caller to the admin
    pub async fn pay_admin(&self, ctx: &mut TxContext, amount: i64) -> TokenResult<()> {
        let admin = self.accounts.admin_account(ctx).await?;
        let caller = ctx.client_id().to_string();
        if caller == admin.id {
            debug!("Admin {} owes itself {}, nothing to move", caller, amount);
            return Ok(());
        }
        self.transfer(ctx, &caller, &admin.id, amount).await
    }

    /// Charge the caller the upload price
    pub async fn pay_upload(&self, ctx: &mut TxContext) -> TokenResult<()> {
        let prices = self.prices(ctx).await?;
        self.pay_admin(ctx, prices.upload).await
    }

    /// Charge the caller the use price
    pub async fn pay_use(&self, ctx: &mut TxContext) -> TokenResult<()> {
        let prices = self.prices(ctx).await?;
        self.pay_admin(ctx, prices.use_price).await
    }

    /// Charge the caller for one run of `model`, owned by `owner`.
    ///
    /// The admin always receives the use price. A caller other than the
    /// owner additionally pays the use price to the owner.
    pub async fn pay_for_model(&self, ctx: &mut TxContext, owner: &str, model: &str) -> TokenResult<()> {
        let prices = self.prices(ctx).await?;
        let admin = self.accounts.admin_account(ctx).await?;
        let caller = ctx.client_id().to_string();
        let payer = self.accounts.get_account(ctx, &caller).await?;

        let legs = [caller != owner, caller != admin.id].iter().filter(|&&moves| moves).count() as i64;
        let required = prices.use_price.checked_mul(legs).ok_or_else(|| {
            TokenError::InvalidAmount("use price overflows".to_string())
        })?;
        if payer.balance < required {
            warn!("{} holds {} but running {} costs {}", caller, payer.balance, model, required);
            return Err(TokenError::InsufficientFunds(caller));
        }

        if caller != owner {
            self.transfer(ctx, &caller, owner, prices.use_price).await?;
        }
        if caller != admin.id {
            self.transfer(ctx, &caller, &admin.id, prices.use_price).await?;
        }

        info!("{} paid {} to admin and {} to use model {}", caller, prices.use_price, owner, model);
        Ok(())
    }
}

/// Parse a decimal amount argument
pub fn parse_amount(value: &str) -> TokenResult<i64> {
    parse_string::<i64>(value).map_err(|e| TokenError::InvalidArgument(e.to_string()))
}

fn allowance_key(owner: &str, spender: &str) -> TokenResult<String> {
    Ok(create_composite_key(ALLOWANCE_PREFIX, &[owner, spender])?)
}

async fn read_counter(ctx: &TxContext, key: &str) -> TokenResult<i64> {
    match ctx.get_state(key).await? {
        Some(bytes) => std::str::from_utf8(&bytes)
            .ok()
            .and_then(|text| text.parse::<i64>().ok())
            .ok_or_else(|| TokenError::Corrupt {
                key: key.escape_default().to_string(),
                reason: "not a decimal integer".to_string(),
            }),
        None => Ok(0),
    }
}
