//! Account opening and transaction recording integration tests.

mod common;

use common::{utc, TestApp, CUSTOMER_ID, ONE_YEAR, RETIRED, THREE_YEAR};
use deposit_service::error::DepositError;
use deposit_service::models::{
    AccountStatus, OpenAccount, PricingRule, RedemptionRequest, Requester, TransactionType,
};
use deposit_service::services::PricingRuleResolver;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn open_request(
    customer_id: &str,
    product_code: &str,
    principal: Decimal,
    tenure_months: u32,
    rate: Option<Decimal>,
) -> OpenAccount {
    OpenAccount {
        customer_id: customer_id.to_string(),
        product_code: product_code.to_string(),
        principal,
        tenure_months,
        interest_rate: rate,
        auth_token: None,
    }
}

#[tokio::test]
async fn open_account_books_opening_deposit() {
    let app = TestApp::at(utc(2024, 1, 1));

    let account = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;

    assert!(account.account_no.starts_with("FD"));
    assert_eq!(account.account_no.len(), 18);
    assert_eq!(account.customer_id, CUSTOMER_ID);
    assert_eq!(account.currency, "INR");
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.principal, dec!(10000));
    assert_eq!(account.interest_rate, dec!(5));
    assert_eq!(account.base_interest_rate, dec!(5));
    assert_eq!(account.maturity_date, utc(2025, 1, 1));
    assert_eq!(account.next_interest_accrual_at, Some(utc(2025, 1, 1)));
    assert_eq!(account.premature_penalty_rate, dec!(0.06));
    assert_eq!(account.premature_penalty_grace_days, 0);
    // Calculator is down in tests, so this is the local formula.
    assert_eq!(account.maturity_amount, dec!(10500.00));

    let transactions = app.transactions(&account.account_no).await;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].transaction_type, TransactionType::Deposit);
    assert_eq!(transactions[0].amount, dec!(10000));
    assert_eq!(transactions[0].balance_after, dec!(10000));
    assert_eq!(transactions[0].reference.as_deref(), Some("account-opening"));
    assert_eq!(
        app.accounts
            .current_balance(&account.account_no)
            .await
            .unwrap(),
        dec!(10000)
    );
}

#[tokio::test]
async fn open_account_defaults_to_product_minimum_rate() {
    let app = TestApp::at(utc(2024, 1, 1));

    let account = app
        .accounts
        .open_account(open_request(CUSTOMER_ID, THREE_YEAR, dec!(5000), 24, None))
        .await
        .expect("Failed to open account");

    assert_eq!(account.interest_rate, dec!(1));
    assert_eq!(account.maturity_date, utc(2026, 1, 1));
    assert_eq!(account.premature_penalty_grace_days, 7);
}

#[tokio::test]
async fn open_account_rejects_invalid_input() {
    let app = TestApp::at(utc(2024, 1, 1));
    let cases = [
        open_request("blocked-9", ONE_YEAR, dec!(10000), 12, None),
        open_request(CUSTOMER_ID, RETIRED, dec!(10000), 12, None),
        open_request(CUSTOMER_ID, ONE_YEAR, dec!(10000), 24, None),
        open_request(CUSTOMER_ID, THREE_YEAR, dec!(10000), 6, None),
        open_request(CUSTOMER_ID, ONE_YEAR, dec!(10000), 12, Some(dec!(12))),
    ];
    for case in cases {
        let err = app.accounts.open_account(case.clone()).await.unwrap_err();
        assert!(
            matches!(err, DepositError::InvalidRequest(_)),
            "expected InvalidRequest for {:?}, got {:?}",
            case,
            err
        );
    }

    let too_small = app
        .accounts
        .open_account(open_request(CUSTOMER_ID, ONE_YEAR, dec!(500), 12, None))
        .await
        .unwrap_err();
    assert!(matches!(too_small, DepositError::InvalidAmount(_)));

    let unknown = app
        .accounts
        .open_account(open_request(CUSTOMER_ID, "FD-NOPE", dec!(10000), 12, None))
        .await
        .unwrap_err();
    assert!(matches!(unknown, DepositError::NotFound { .. }));
}

#[tokio::test]
async fn opening_fee_is_booked_as_penalty_debit() {
    let app = TestApp::at(utc(2024, 1, 1));
    app.catalog.set_rules(
        THREE_YEAR,
        vec![PricingRule {
            id: "premium".to_string(),
            product_id: THREE_YEAR.to_string(),
            name: "Premium tier".to_string(),
            min_threshold: Some(dec!(5000)),
            max_threshold: None,
            interest_rate: Some(dec!(6.5)),
            discount_percentage: None,
            fee_amount: Some(dec!(149.5)),
            priority: 1,
            active: true,
        }],
    );

    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    assert_eq!(account.interest_rate, dec!(6.5));
    assert_eq!(account.base_interest_rate, dec!(5));
    assert_eq!(account.pricing_rule_id.as_deref(), Some("premium"));
    assert_eq!(account.pricing_rule_name.as_deref(), Some("Premium tier"));

    let transactions = app.transactions(&account.account_no).await;
    assert_eq!(transactions.len(), 2);
    assert_eq!(transactions[1].transaction_type, TransactionType::PenaltyDebit);
    assert_eq!(transactions[1].amount, dec!(-150));
    assert_eq!(transactions[1].balance_after, dec!(9850));
    assert_eq!(
        transactions[1].reference.as_deref(),
        Some("pricing-fee:premium")
    );
}

#[tokio::test]
async fn unavailable_rules_open_at_base_rate() {
    let app = TestApp::at(utc(2024, 1, 1));
    app.catalog.set_rules_unavailable(true);

    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    assert_eq!(account.interest_rate, dec!(5));
    assert!(account.pricing_rule_id.is_none());
    assert_eq!(app.transactions(&account.account_no).await.len(), 1);
}

#[tokio::test]
async fn strict_pricing_surfaces_unreachable_rule_source() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;
    let resolver = PricingRuleResolver::new(app.catalog.clone());
    app.catalog.set_rules_unavailable(true);

    let err = resolver
        .evaluate(&account, dec!(10000), None)
        .await
        .unwrap_err();
    assert!(err.is_service_integration());

    let degraded = resolver
        .evaluate_or_base(&account, dec!(10000), None)
        .await
        .expect("degrading evaluation failed");
    assert!(degraded.rule.is_none());
    assert_eq!(degraded.applied_rate, dec!(5));
}

#[tokio::test]
async fn record_transaction_updates_running_balance() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;
    app.advance_days(10);

    let withdrawal = app
        .accounts
        .record_transaction(
            &account.account_no,
            TransactionType::Withdrawal,
            dec!(1000),
            CUSTOMER_ID,
            Some("atm"),
        )
        .await
        .expect("Failed to withdraw");
    assert_eq!(withdrawal.amount, dec!(-1000));
    assert_eq!(withdrawal.balance_after, dec!(9000));
    assert_eq!(withdrawal.reference.as_deref(), Some("atm"));

    let reversal = app
        .accounts
        .record_transaction(
            &account.account_no,
            TransactionType::Reversal,
            dec!(1000),
            "ops",
            None,
        )
        .await
        .expect("Failed to reverse");
    assert_eq!(reversal.amount, dec!(1000));
    assert_eq!(reversal.balance_after, dec!(10000));
    assert!(reversal.sequence > withdrawal.sequence);
}

#[tokio::test]
async fn record_transaction_rejects_overdraft_and_engine_types() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;

    let overdraft = app
        .accounts
        .record_transaction(
            &account.account_no,
            TransactionType::Withdrawal,
            dec!(20000),
            CUSTOMER_ID,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(overdraft, DepositError::InsufficientBalance { .. }));

    let engine_only = app
        .accounts
        .record_transaction(
            &account.account_no,
            TransactionType::InterestCredit,
            dec!(100),
            CUSTOMER_ID,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(engine_only, DepositError::InvalidRequest(_)));

    let sub_unit = app
        .accounts
        .record_transaction(
            &account.account_no,
            TransactionType::Deposit,
            dec!(0.25),
            CUSTOMER_ID,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(sub_unit, DepositError::InvalidAmount(_)));

    assert_eq!(app.transactions(&account.account_no).await.len(), 1);
}

#[tokio::test]
async fn record_transaction_on_closed_account_fails() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;
    app.redemption
        .process_redemption(RedemptionRequest {
            account_no: account.account_no.clone(),
            requester: Requester::customer(CUSTOMER_ID),
            reason: Some("Need funds".to_string()),
            idempotency_key: None,
        })
        .await
        .unwrap();

    let err = app
        .accounts
        .record_transaction(
            &account.account_no,
            TransactionType::Deposit,
            dec!(100),
            CUSTOMER_ID,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DepositError::InvalidState(_)));
    assert_eq!(
        app.account(&account.account_no).await.closure_reason.as_deref(),
        Some("Need funds")
    );
}
