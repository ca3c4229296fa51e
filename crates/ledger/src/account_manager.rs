//! Account manager for ledger accounts
//!
//! This module provides functionality for registering, authorizing and
//! loading accounts, and for binding the administrator account.

use tracing::{debug, info, warn};

use modelchain_core::config::TokenConfig;
use modelchain_core::TxContext;

use crate::{Account, Role, TokenError, TokenResult, UserInfo, ADMIN_KEY};

/// The account manager for handling ledger accounts
#[derive(Debug, Clone)]
pub struct AccountManager {
    /// Configuration
    config: TokenConfig,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    /// Fail unless the caller belongs to the issuing organization
    pub fn require_issuer(&self, ctx: &TxContext, action: &'static str) -> TokenResult<()> {
        if ctx.msp_id() != self.config.issuer_msp {
            warn!(caller = ctx.client_id(), msp = ctx.msp_id(), "{} refused outside the issuing organization", action);
            return Err(TokenError::NotIssuer(action));
        }
        Ok(())
    }

    /// Load an account, `None` if it was never registered
    pub async fn find_account(&self, ctx: &TxContext, id: &str) -> TokenResult<Option<Account>> {
        match ctx.get_state(id).await? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| TokenError::Corrupt { key: id.to_string(), reason: e.to_string() }),
            None => Ok(None),
        }
    }

    /// Load an account that must exist
    pub async fn get_account(&self, ctx: &TxContext, id: &str) -> TokenResult<Account> {
        self.find_account(ctx, id)
            .await?
            .ok_or_else(|| TokenError::AccountNotFound(id.to_string()))
    }

    /// Persist an account under its identity
    pub fn store_account(&self, ctx: &mut TxContext, account: &Account) -> TokenResult<()> {
        ctx.put_state(&account.id, serde_json::to_vec(account)?);
        Ok(())
    }

    /// Create the caller's account with a zero balance and no authorization
    pub async fn register(&self, ctx: &mut TxContext, name: &str) -> TokenResult<String> {
        let id = ctx.client_id().to_string();
        if self.find_account(ctx, &id).await?.is_some() {
            return Err(TokenError::AlreadyRegistered(id));
        }

        let account = Account::new(&id, name);
        self.store_account(ctx, &account)?;

        info!("Registered account {} ({})", id, name);
        Ok(format!("user {} registered", id))
    }

    /// Grant `role` to an account and mark it authorized
    pub async fn authorize(&self, ctx: &mut TxContext, id: &str, role: &str) -> TokenResult<()> {
        self.require_issuer(ctx, "authorize users")?;
        if role.trim().is_empty() {
            return Err(TokenError::InvalidArgument("role cannot be empty".to_string()));
        }

        let mut account = self.get_account(ctx, id).await?;
        account.role = Role::from(role);
        account.authorized = true;
        self.store_account(ctx, &account)?;

        info!("Authorized account {} as {}", id, account.role);
        Ok(())
    }

    /// Balance and role of an account
    pub async fn user_info(&self, ctx: &TxContext, id: &str) -> TokenResult<UserInfo> {
        let account = self.get_account(ctx, id).await?;
        debug!("Read user info of {}", id);
        Ok(account.info())
    }

    /// The bound administrator's identity, if any
    pub async fn admin_id(&self, ctx: &TxContext) -> TokenResult<Option<String>> {
        match ctx.get_state(ADMIN_KEY).await? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| TokenError::Corrupt { key: ADMIN_KEY.to_string(), reason: e.to_string() }),
            None => Ok(None),
        }
    }

    /// The administrator's account, which must be bound and registered
    pub async fn admin_account(&self, ctx: &TxContext) -> TokenResult<Account> {
        let admin_id = self.admin_id(ctx).await?.ok_or(TokenError::AdminNotSet)?;
        self.get_account(ctx, &admin_id).await
    }

    /// Bind the caller as administrator. Succeeds only once per ledger.
    pub async fn bootstrap(&self, ctx: &mut TxContext) -> TokenResult<String> {
        self.require_issuer(ctx, "bootstrap the ledger")?;
        if let Some(admin) = self.admin_id(ctx).await? {
            return Err(TokenError::AdminAlreadySet(admin));
        }

        let caller = ctx.client_id().to_string();
        self.get_account(ctx, &caller).await?;
        ctx.put_state(ADMIN_KEY, caller.clone().into_bytes());

        info!("Bound {} as ledger admin", caller);
        Ok(caller)
    }

    /// Reassign the administrator to a registered, authorized account
    pub async fn transfer_admin(&self, ctx: &mut TxContext, id: &str) -> TokenResult<()> {
        self.require_issuer(ctx, "reassign the admin")?;
        let previous = self.admin_id(ctx).await?.ok_or(TokenError::AdminNotSet)?;

        let account = self.get_account(ctx, id).await?;
        if !account.authorized {
            return Err(TokenError::Unauthorized(id.to_string()));
        }
        ctx.put_state(ADMIN_KEY, id.as_bytes().to_vec());

        info!("Ledger admin reassigned from {} to {}", previous, id);
        Ok(())
    }
}
