//! Tests for the token ledger
//!
//! These tests drive the ledger through the contract host the way clients
//! do, and check balances, events and rejections.

use std::collections::HashMap;
use std::sync::Arc;

use modelchain_core::config::TokenConfig;
use modelchain_core::{ClientIdentity, ErrorClass, LedgerHost, MemoryStorage, Response, Storage};
use modelchain_ledger::{ApprovalEvent, Prices, TokenLedger, TransferEvent, UserInfo};

const TOKENS: &str = "tokens";

struct TestLedger {
    host: LedgerHost,
}

impl TestLedger {
    async fn submit(&self, who: &ClientIdentity, function: &str, args: &[&str]) -> Response {
        self.host.submit(TOKENS, function, args, who, HashMap::new()).await
    }

    async fn evaluate(&self, who: &ClientIdentity, function: &str, args: &[&str]) -> Response {
        self.host.evaluate(TOKENS, function, args, who).await
    }

    async fn balance(&self, id: &ClientIdentity) -> i64 {
        let response = self.evaluate(id, "GetUserBalance", &[&id.id]).await;
        assert!(response.is_ok(), "{}", response.message);
        String::from_utf8(response.payload).unwrap().parse().unwrap()
    }

    async fn register_authorized(&self, who: &ClientIdentity, role: &str) {
        assert!(self.submit(who, "Register", &[&who.id]).await.is_ok());
        let response = self.submit(&issuer(), "Authorize", &[&who.id, role]).await;
        assert!(response.is_ok(), "{}", response.message);
    }
}

fn issuer() -> ClientIdentity {
    ClientIdentity::new("issuer", "Org2MSP")
}

fn alice() -> ClientIdentity {
    ClientIdentity::new("alice", "Org1MSP")
}

fn bob() -> ClientIdentity {
    ClientIdentity::new("bob", "Org1MSP")
}

fn setup_ledger() -> TestLedger {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let ledger = TokenLedger::new(TokenConfig::default());
    TestLedger { host: LedgerHost::new(storage, vec![Arc::new(ledger)]) }
}

/// Issuer registered, authorized and holding `supply`; alice and bob authorized users
async fn setup_funded(supply: i64) -> TestLedger {
    let ledger = setup_ledger();
    ledger.register_authorized(&issuer(), "admin").await;
    ledger.register_authorized(&alice(), "dev").await;
    ledger.register_authorized(&bob(), "user").await;
    let response = ledger.submit(&issuer(), "Mint", &[&supply.to_string()]).await;
    assert!(response.is_ok(), "{}", response.message);
    ledger
}

#[test_log::test(tokio::test)]
async fn test_register_creates_unauthorized_account() {
    let ledger = setup_ledger();

    let response = ledger.submit(&alice(), "Register", &["Alice"]).await;
    assert!(response.is_ok());
    assert_eq!(String::from_utf8(response.payload).unwrap(), "user alice registered");

    let info: UserInfo = ledger
        .evaluate(&bob(), "GetUserInfo", &["alice"])
        .await
        .payload_json()
        .unwrap();
    assert_eq!(info, UserInfo { balance: 0, role: "unauthorized_user".to_string() });

    let again = ledger.submit(&alice(), "Register", &["Alice"]).await;
    assert!(!again.is_ok());
    assert_eq!(again.class, Some(ErrorClass::Precondition));
    assert_eq!(again.message, "account alice already exists");
}

#[tokio::test]
async fn test_only_issuer_authorizes() {
    let ledger = setup_ledger();
    ledger.submit(&alice(), "Register", &["Alice"]).await;

    let refused = ledger.submit(&bob(), "Authorize", &["alice", "dev"]).await;
    assert_eq!(refused.message, "client is not authorized to authorize users");

    let missing = ledger.submit(&issuer(), "Authorize", &["carol", "dev"]).await;
    assert_eq!(missing.message, "user carol does not exist");

    assert!(ledger.submit(&issuer(), "Authorize", &["alice", "dev"]).await.is_ok());
    assert!(ledger.submit(&issuer(), "Authorize", &["alice", "user"]).await.is_ok());

    let info: UserInfo = ledger.evaluate(&alice(), "GetUserInfo", &["alice"]).await.payload_json().unwrap();
    assert_eq!(info.role, "user");
}

#[tokio::test]
async fn test_mint_binds_admin_once_and_emits_event() {
    let ledger = setup_ledger();
    ledger.register_authorized(&issuer(), "admin").await;

    let not_set = ledger.evaluate(&issuer(), "GetAdmin", &[]).await;
    assert_eq!(not_set.message, "admin account has not been set");

    let response = ledger.submit(&issuer(), "Mint", &["1000"]).await;
    assert!(response.is_ok(), "{}", response.message);
    let event: TransferEvent = response.events_named("Transfer").next().unwrap().decode().unwrap();
    assert_eq!(event, TransferEvent { from: "0x0".to_string(), to: "issuer".to_string(), value: 1000 });

    let admin = ledger.evaluate(&alice(), "GetAdmin", &[]).await;
    assert_eq!(admin.payload, b"issuer".to_vec());

    // a second issuer member minting does not take over the admin slot
    let deputy = ClientIdentity::new("deputy", "Org2MSP");
    ledger.submit(&deputy, "Register", &["Deputy"]).await;
    assert!(ledger.submit(&deputy, "Mint", &["5"]).await.is_ok());
    assert_eq!(ledger.evaluate(&alice(), "GetAdmin", &[]).await.payload, b"issuer".to_vec());

    let supply = ledger.evaluate(&alice(), "TotalSupply", &[]).await;
    assert_eq!(supply.payload, b"1005".to_vec());
}

#[tokio::test]
async fn test_mint_rejections() {
    let ledger = setup_ledger();
    ledger.register_authorized(&issuer(), "admin").await;
    ledger.register_authorized(&alice(), "dev").await;

    let outsider = ledger.submit(&alice(), "Mint", &["10"]).await;
    assert_eq!(outsider.message, "client is not authorized to mint new tokens");

    let zero = ledger.submit(&issuer(), "Mint", &["0"]).await;
    assert_eq!(zero.message, "invalid amount: mint amount must be a positive integer");

    let garbage = ledger.submit(&issuer(), "Mint", &["ten"]).await;
    assert_eq!(garbage.class, Some(ErrorClass::Precondition));

    let unregistered = ledger.submit(&ClientIdentity::new("ghost", "Org2MSP"), "Mint", &["10"]).await;
    assert_eq!(unregistered.message, "user ghost does not exist");

    assert_eq!(ledger.evaluate(&alice(), "TotalSupply", &[]).await.payload, b"0".to_vec());
}

#[tokio::test]
async fn test_bootstrap_and_admin_transfer() {
    let ledger = setup_ledger();
    ledger.register_authorized(&issuer(), "admin").await;
    ledger.register_authorized(&alice(), "dev").await;
    ledger.submit(&bob(), "Register", &["Bob"]).await;

    let outsider = ledger.submit(&alice(), "Bootstrap", &[]).await;
    assert!(!outsider.is_ok());

    let bound = ledger.submit(&issuer(), "Bootstrap", &[]).await;
    assert!(bound.is_ok());
    assert_eq!(bound.payload, b"issuer".to_vec());

    let again = ledger.submit(&issuer(), "Bootstrap", &[]).await;
    assert_eq!(again.message, "admin account is already set to issuer");

    let unauthorized = ledger.submit(&issuer(), "TransferAdmin", &["bob"]).await;
    assert_eq!(unauthorized.message, "client account bob is unauthorized");

    assert!(ledger.submit(&issuer(), "TransferAdmin", &["alice"]).await.is_ok());
    assert_eq!(ledger.evaluate(&bob(), "GetAdmin", &[]).await.payload, b"alice".to_vec());
}

#[tokio::test]
async fn test_transfer_moves_funds_and_emits_event() {
    let ledger = setup_funded(1000).await;

    let response = ledger.submit(&issuer(), "Transfer", &["alice", "100"]).await;
    assert!(response.is_ok(), "{}", response.message);
    let event: TransferEvent = response.events_named("Transfer").next().unwrap().decode().unwrap();
    assert_eq!(event, TransferEvent { from: "issuer".to_string(), to: "alice".to_string(), value: 100 });

    assert_eq!(ledger.balance(&issuer()).await, 900);
    assert_eq!(ledger.balance(&alice()).await, 100);

    // and back again
    assert!(ledger.submit(&alice(), "Transfer", &["issuer", "100"]).await.is_ok());
    assert_eq!(ledger.balance(&issuer()).await, 1000);
    assert_eq!(ledger.balance(&alice()).await, 0);

    let balance = ledger.evaluate(&issuer(), "GetBalance", &[]).await;
    assert_eq!(balance.payload, b"1000".to_vec());
}

#[tokio::test]
async fn test_transfer_rejections_leave_balances_unchanged() {
    let ledger = setup_funded(1000).await;
    let carol = ClientIdentity::new("carol", "Org1MSP");
    ledger.submit(&carol, "Register", &["Carol"]).await;
    ledger.submit(&issuer(), "Transfer", &["alice", "50"]).await;

    let cases = [
        (issuer(), vec!["issuer", "1"], "cannot transfer from and to same client"),
        (issuer(), vec!["alice", "-1"], "invalid amount: transfer amount can't be negative"),
        (carol.clone(), vec!["alice", "0"], "client account carol is unauthorized"),
        (alice(), vec!["bob", "51"], "client account alice has insufficient funds"),
        (alice(), vec!["dave", "1"], "user dave does not exist"),
        (alice(), vec!["carol", "1"], "recipient account carol is unauthorized"),
    ];

    for (who, args, expected) in cases {
        let response = ledger.submit(&who, "Transfer", &args).await;
        assert!(!response.is_ok());
        assert_eq!(response.message, expected);
        assert_eq!(response.class, Some(ErrorClass::Precondition));
        assert!(response.events.is_empty());
    }

    assert_eq!(ledger.balance(&issuer()).await, 950);
    assert_eq!(ledger.balance(&alice()).await, 50);
    assert_eq!(ledger.balance(&bob()).await, 0);
}

#[tokio::test]
async fn test_burn() {
    let ledger = setup_funded(100).await;

    let too_much = ledger.submit(&issuer(), "Burn", &["101"]).await;
    assert_eq!(too_much.message, "client account issuer has insufficient funds");

    let negative = ledger.submit(&issuer(), "Burn", &["-3"]).await;
    assert!(!negative.is_ok());

    let outsider = ledger.submit(&alice(), "Burn", &["1"]).await;
    assert_eq!(outsider.message, "client is not authorized to burn tokens");

    let response = ledger.submit(&issuer(), "Burn", &["40"]).await;
    assert!(response.is_ok());
    let event: TransferEvent = response.events[0].decode().unwrap();
    assert_eq!(event.to, "0x0");
    assert_eq!(event.value, 40);

    assert_eq!(ledger.balance(&issuer()).await, 60);
    assert_eq!(ledger.evaluate(&issuer(), "TotalSupply", &[]).await.payload, b"60".to_vec());
}

#[tokio::test]
async fn test_allowance_flow() {
    let ledger = setup_funded(1000).await;

    let response = ledger.submit(&issuer(), "Approve", &["alice", "100"]).await;
    assert!(response.is_ok());
    let approval: ApprovalEvent = response.events_named("Approval").next().unwrap().decode().unwrap();
    assert_eq!(
        approval,
        ApprovalEvent { owner: "issuer".to_string(), spender: "alice".to_string(), value: 100 }
    );

    assert!(ledger.submit(&alice(), "TransferFrom", &["issuer", "bob", "60"]).await.is_ok());
    assert_eq!(ledger.balance(&bob()).await, 60);
    assert_eq!(ledger.balance(&issuer()).await, 940);

    let left = ledger.evaluate(&bob(), "Allowance", &["issuer", "alice"]).await;
    assert_eq!(left.payload, b"40".to_vec());

    let over = ledger.submit(&alice(), "TransferFrom", &["issuer", "bob", "41"]).await;
    assert_eq!(over.message, "not enough allowance for transfer: 40 available, 41 requested");
    assert_eq!(ledger.evaluate(&bob(), "Allowance", &["issuer", "alice"]).await.payload, b"40".to_vec());
    assert_eq!(ledger.balance(&bob()).await, 60);

    // bob was never approved by issuer
    let unapproved = ledger.submit(&bob(), "TransferFrom", &["issuer", "bob", "1"]).await;
    assert!(!unapproved.is_ok());
    assert_eq!(ledger.evaluate(&bob(), "Allowance", &["issuer", "bob"]).await.payload, b"0".to_vec());
}

#[tokio::test]
async fn test_transfer_from_failure_keeps_allowance() {
    let ledger = setup_funded(10).await;
    ledger.submit(&issuer(), "Approve", &["alice", "100"]).await;

    let response = ledger.submit(&alice(), "TransferFrom", &["issuer", "bob", "50"]).await;
    assert_eq!(response.message, "client account issuer has insufficient funds");
    assert_eq!(ledger.evaluate(&bob(), "Allowance", &["issuer", "alice"]).await.payload, b"100".to_vec());
}

#[tokio::test]
async fn test_prices() {
    let ledger = setup_funded(1000).await;

    let unset = ledger.evaluate(&alice(), "GetPrices", &[]).await;
    assert_eq!(unset.message, "prices have not been set");
    let unpaid = ledger.submit(&alice(), "PayUpload", &[]).await;
    assert_eq!(unpaid.message, "prices have not been set");

    let outsider = ledger.submit(&alice(), "SetPrices", &["1", "1"]).await;
    assert_eq!(outsider.message, "client is not authorized to set prices");
    let negative = ledger.submit(&issuer(), "SetPrices", &["-1", "1"]).await;
    assert!(!negative.is_ok());

    assert!(ledger.submit(&issuer(), "SetPrices", &["10", "5"]).await.is_ok());
    let prices: Prices = ledger.evaluate(&alice(), "GetPrices", &[]).await.payload_json().unwrap();
    assert_eq!(prices, Prices { upload: 10, use_price: 5 });
}

#[tokio::test]
async fn test_fee_payments() {
    let ledger = setup_funded(1000).await;
    ledger.submit(&issuer(), "SetPrices", &["10", "5"]).await;
    ledger.submit(&issuer(), "Transfer", &["alice", "100"]).await;

    assert!(ledger.submit(&alice(), "PayUpload", &[]).await.is_ok());
    assert!(ledger.submit(&alice(), "PayAdmin", &[]).await.is_ok());
    assert_eq!(ledger.balance(&alice()).await, 85);
    assert_eq!(ledger.balance(&issuer()).await, 915);

    // the admin owes nothing to itself
    let own = ledger.submit(&issuer(), "PayUpload", &[]).await;
    assert!(own.is_ok());
    assert!(own.events.is_empty());
    assert_eq!(ledger.balance(&issuer()).await, 915);
}

#[tokio::test]
async fn test_pay_for_model() {
    let ledger = setup_funded(1000).await;
    ledger.submit(&issuer(), "SetPrices", &["10", "5"]).await;
    ledger.submit(&issuer(), "Transfer", &["alice", "20"]).await;
    ledger.submit(&issuer(), "Transfer", &["bob", "9"]).await;

    // the owner only pays the admin
    let own = ledger.submit(&alice(), "PayForModel", &["alice", "m1"]).await;
    assert!(own.is_ok(), "{}", own.message);
    assert_eq!(own.events.len(), 1);
    assert_eq!(ledger.balance(&alice()).await, 15);

    // anyone else pays owner and admin, and must hold both legs up front
    let short = ledger.submit(&bob(), "PayForModel", &["alice", "m1"]).await;
    assert_eq!(short.message, "client account bob has insufficient funds");
    assert_eq!(ledger.balance(&bob()).await, 9);
    assert_eq!(ledger.balance(&alice()).await, 15);

    ledger.submit(&issuer(), "Transfer", &["bob", "1"]).await;
    let paid = ledger.submit(&bob(), "PayForModel", &["alice", "m1"]).await;
    assert!(paid.is_ok(), "{}", paid.message);
    assert_eq!(paid.events_named("Transfer").count(), 2);
    assert_eq!(ledger.balance(&bob()).await, 0);
    assert_eq!(ledger.balance(&alice()).await, 20);
    assert_eq!(ledger.balance(&issuer()).await, 1000 - 20 - 10 + 5 + 5);
}

#[tokio::test]
async fn test_admin_running_a_model_pays_only_the_owner() {
    let ledger = setup_funded(1000).await;
    ledger.submit(&issuer(), "SetPrices", &["10", "5"]).await;
    ledger.submit(&issuer(), "Transfer", &["alice", "995"]).await;
    assert_eq!(ledger.balance(&issuer()).await, 5);

    let paid = ledger.submit(&issuer(), "PayForModel", &["alice", "m1"]).await;
    assert!(paid.is_ok(), "{}", paid.message);
    assert_eq!(paid.events_named("Transfer").count(), 1);
    assert_eq!(ledger.balance(&issuer()).await, 0);
    assert_eq!(ledger.balance(&alice()).await, 1000);

    // nothing moves when the admin runs its own model
    ledger.submit(&alice(), "Transfer", &["issuer", "3"]).await;
    let own = ledger.submit(&issuer(), "PayForModel", &["issuer", "m2"]).await;
    assert!(own.is_ok(), "{}", own.message);
    assert!(own.events.is_empty());
    assert_eq!(ledger.balance(&issuer()).await, 3);
}

#[tokio::test]
async fn test_priced_operations_need_admin() {
    let ledger = setup_ledger();
    ledger.register_authorized(&issuer(), "admin").await;
    ledger.register_authorized(&alice(), "dev").await;
    ledger.submit(&issuer(), "SetPrices", &["10", "5"]).await;

    let response = ledger.submit(&alice(), "PayForModel", &["alice", "m1"]).await;
    assert_eq!(response.message, "admin account has not been set");
}

#[tokio::test]
async fn test_invalid_function_and_arguments() {
    let ledger = setup_ledger();

    let response = ledger.submit(&alice(), "Steal", &["all"]).await;
    assert_eq!(response.message, "invalid function Steal passed with args [\"all\"]");

    let response = ledger.submit(&alice(), "Transfer", &["bob"]).await;
    assert_eq!(response.message, "invalid argument: Transfer expects 2 arguments, got 1");

    let id = ledger.evaluate(&alice(), "GetClientId", &[]).await;
    assert_eq!(id.payload, b"alice".to_vec());
}
