//! Token Ledger for modelchain
//!
//! This crate provides the fungible token ledger: registered accounts with
//! a role and an authorization flag, an administrator singleton that
//! collects fees, per-(owner, spender) allowances, aggregate supply and
//! the price list the model registry charges against.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use modelchain_core::{ArityError, ContractError, ErrorClass, StorageError};

pub mod account_manager;
pub mod transaction_processor;
pub mod contract;

pub use account_manager::AccountManager;
pub use contract::TokenLedger;
pub use transaction_processor::TransactionProcessor;

/// Key of the aggregate supply counter
pub const TOTAL_SUPPLY_KEY: &str = "totalSupply";
/// Key of the administrator's identity
pub const ADMIN_KEY: &str = "admin";
/// Key of the price list
pub const PRICES_KEY: &str = "prices";
/// Composite key namespace of allowances
pub const ALLOWANCE_PREFIX: &str = "allowance";
/// Counterparty recorded for minted and burned tokens
pub const ZERO_ADDRESS: &str = "0x0";

/// Error types for token ledger operations
#[derive(Error, Debug)]
pub enum TokenError {
    /// The caller already has an account
    #[error("account {0} already exists")]
    AlreadyRegistered(String),

    /// No account is registered under this identity
    #[error("user {0} does not exist")]
    AccountNotFound(String),

    /// The caller is not a member of the issuing organization
    #[error("client is not authorized to {0}")]
    NotIssuer(&'static str),

    /// The sender has not been authorized
    #[error("client account {0} is unauthorized")]
    Unauthorized(String),

    /// The recipient has not been authorized
    #[error("recipient account {0} is unauthorized")]
    RecipientUnauthorized(String),

    /// Sender and recipient are the same identity
    #[error("cannot transfer from and to same client")]
    SelfTransfer,

    /// Amount outside the accepted range
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance does not cover the debit
    #[error("client account {0} has insufficient funds")]
    InsufficientFunds(String),

    /// Allowance does not cover the withdrawal
    #[error("not enough allowance for transfer: {available} available, {requested} requested")]
    InsufficientAllowance { available: i64, requested: i64 },

    /// No administrator has been bound
    #[error("admin account has not been set")]
    AdminNotSet,

    /// The administrator was already bound
    #[error("admin account is already set to {0}")]
    AdminAlreadySet(String),

    /// Prices have never been set
    #[error("prices have not been set")]
    PricesNotSet,

    /// Malformed operation argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation name not exported by the ledger
    #[error("invalid function {function} passed with args {args:?}")]
    InvalidFunction { function: String, args: Vec<String> },

    /// Error with storage
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value does not decode
    #[error("corrupt ledger state under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl TokenError {
    /// Failure category reported to callers
    pub fn class(&self) -> ErrorClass {
        match self {
            TokenError::Storage(_) | TokenError::Serialization(_) | TokenError::Corrupt { .. } => {
                ErrorClass::Internal
            }
            _ => ErrorClass::Precondition,
        }
    }
}

impl From<ArityError> for TokenError {
    fn from(err: ArityError) -> Self {
        TokenError::InvalidArgument(err.to_string())
    }
}

impl From<TokenError> for ContractError {
    fn from(err: TokenError) -> Self {
        ContractError::new(err.class(), err.to_string())
    }
}

/// Result type for token ledger operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Role assigned to an account by the issuing organization
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Default role of a freshly registered account
    UnauthorizedUser,
    /// May upload models
    Dev,
    /// May run models it was granted
    User,
    /// Any other role name
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::UnauthorizedUser => "unauthorized_user",
            Role::Dev => "dev",
            Role::User => "user",
            Role::Other(name) => name,
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.as_str() {
            "unauthorized_user" => Role::UnauthorizedUser,
            "dev" => Role::Dev,
            "user" => Role::User,
            _ => Role::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account in the ledger, keyed by the owner's identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Display name given at registration
    pub name: String,
    /// The owner's identity
    pub id: String,
    /// Role assigned by the issuing organization
    pub role: Role,
    /// Token balance; never negative once committed
    pub balance: i64,
    /// Whether the account may send and receive tokens
    pub authorized: bool,
}

impl Account {
    /// A freshly registered account
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: id.to_string(),
            role: Role::UnauthorizedUser,
            balance: 0,
            authorized: false,
        }
    }

    /// Narrowed view handed to other contracts
    pub fn info(&self) -> UserInfo {
        UserInfo {
            balance: self.balance,
            role: self.role.to_string(),
        }
    }

    pub(crate) fn credit(&mut self, amount: i64) -> TokenResult<()> {
        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            TokenError::InvalidAmount(format!("crediting {} to {} overflows", amount, self.id))
        })?;
        Ok(())
    }

    pub(crate) fn debit(&mut self, amount: i64) -> TokenResult<()> {
        if self.balance < amount {
            return Err(TokenError::InsufficientFunds(self.id.clone()));
        }
        self.balance -= amount;
        Ok(())
    }
}

/// Balance and role of an account, without its authorization bits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub balance: i64,
    pub role: String,
}

/// Fees charged by the model registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prices {
    /// Charged once per model upload
    pub upload: i64,
    /// Charged per model run, twice for non-creators
    #[serde(rename = "use")]
    pub use_price: i64,
}

/// Payload of the `Transfer` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub from: String,
    pub to: String,
    pub value: i64,
}

/// Payload of the `Approval` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub owner: String,
    pub spender: String,
    pub value: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_as_string() {
        let account = Account::new("alice", "Alice");
        let json = serde_json::to_value(&account).unwrap();
        assert_eq!(json["role"], "unauthorized_user");
        assert_eq!(json["authorized"], false);

        let custom: Role = serde_json::from_str("\"auditor\"").unwrap();
        assert_eq!(custom, Role::Other("auditor".to_string()));
        assert_eq!(Role::from("dev"), Role::Dev);
    }

    #[test]
    fn test_prices_use_field_name() {
        let prices: Prices = serde_json::from_str(r#"{"upload":10,"use":5}"#).unwrap();
        assert_eq!(prices, Prices { upload: 10, use_price: 5 });
        assert_eq!(serde_json::to_string(&prices).unwrap(), r#"{"upload":10,"use":5}"#);
    }

    #[test]
    fn test_debit_never_goes_negative() {
        let mut account = Account::new("alice", "Alice");
        account.credit(5).unwrap();
        assert!(matches!(account.debit(6), Err(TokenError::InsufficientFunds(_))));
        assert_eq!(account.balance, 5);
        account.debit(5).unwrap();
        assert_eq!(account.balance, 0);

        account.balance = i64::MAX;
        assert!(matches!(account.credit(1), Err(TokenError::InvalidAmount(_))));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(TokenError::PricesNotSet.class(), ErrorClass::Precondition);
        let corrupt = TokenError::Corrupt { key: "k".to_string(), reason: "bad".to_string() };
        assert_eq!(corrupt.class(), ErrorClass::Internal);

        let err: ContractError = TokenError::SelfTransfer.into();
        assert_eq!(err.message, "cannot transfer from and to same client");
    }
}
