//! Interest accrual and maturity integration tests.

mod common;

use common::{amounts_of, pricing_rule, utc, TestApp, BROKEN, CUSTOMER_ID, ONE_YEAR, THREE_YEAR};
use deposit_service::models::{AccountStatus, TransactionType};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

#[tokio::test]
async fn one_year_deposit_credits_interest_then_matures() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;

    app.set_date(utc(2025, 1, 2));
    let report = app.accrual.run_once().await.expect("Accrual pass failed");

    assert_eq!(report.processed, 1);
    assert_eq!(report.interest_credits, 1);
    assert_eq!(report.total_interest, dec!(500));
    assert_eq!(report.matured, 1);
    assert_eq!(report.failed, 0);

    let transactions = app.transactions(&account.account_no).await;
    let kinds: Vec<_> = transactions.iter().map(|t| t.transaction_type).collect();
    assert_eq!(
        kinds,
        vec![
            TransactionType::Deposit,
            TransactionType::InterestCredit,
            TransactionType::MaturityPayout
        ]
    );
    assert_eq!(transactions[1].amount, dec!(500));
    assert_eq!(transactions[1].balance_after, dec!(10500));
    assert_eq!(
        transactions[1].reference.as_deref(),
        Some(format!("interest:{}:2025-01-01", account.account_no).as_str())
    );
    assert_eq!(transactions[2].amount, dec!(-10500));
    assert_eq!(transactions[2].balance_after, dec!(0));

    let matured = app.account(&account.account_no).await;
    assert_eq!(matured.status, AccountStatus::Matured);
    assert_eq!(matured.closed_by.as_deref(), Some("system"));
    assert_eq!(matured.last_interest_accrual_at, Some(utc(2025, 1, 1)));
    assert!(matured.next_interest_accrual_at.is_none());
    assert!(matured.next_payout_at.is_none());

    assert_eq!(app.treasury_balance().await, dec!(500));
    assert!(app.wallet.summary().await.unwrap().is_balanced());
}

#[tokio::test]
async fn nothing_happens_before_the_first_anniversary() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    app.set_date(utc(2024, 12, 31));
    let report = app.accrual.run_once().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.interest_credits, 0);
    assert_eq!(app.transactions(&account.account_no).await.len(), 1);
    let stored = app.account(&account.account_no).await;
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(stored.next_interest_accrual_at, Some(utc(2025, 1, 1)));
}

#[tokio::test]
async fn repeated_runs_at_the_same_time_credit_once() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    app.set_date(utc(2025, 1, 2));
    let first = app.accrual.run_once().await.unwrap();
    let second = app.accrual.run_once().await.unwrap();

    assert_eq!(first.interest_credits, 1);
    assert_eq!(second.interest_credits, 0);
    let transactions = app.transactions(&account.account_no).await;
    assert_eq!(
        amounts_of(&transactions, TransactionType::InterestCredit),
        vec![dec!(500)]
    );
    assert_eq!(app.treasury_balance().await, dec!(500));
}

#[tokio::test]
async fn catch_up_matches_yearly_ticks() {
    let jumped = TestApp::at(utc(2024, 1, 1));
    let ticked = TestApp::at(utc(2024, 1, 1));
    let a = jumped.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;
    let b = ticked.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    jumped.set_date(utc(2027, 1, 2));
    let report = jumped.accrual.run_once().await.unwrap();
    assert_eq!(report.interest_credits, 3);
    assert_eq!(report.matured, 1);

    for year in [2025, 2026, 2027] {
        ticked.set_date(utc(year, 1, 2));
        ticked.accrual.run_once().await.unwrap();
    }

    let jumped_txns = jumped.transactions(&a.account_no).await;
    let ticked_txns = ticked.transactions(&b.account_no).await;
    let expected = vec![dec!(500), dec!(525), dec!(552)];
    assert_eq!(
        amounts_of(&jumped_txns, TransactionType::InterestCredit),
        expected
    );
    assert_eq!(
        amounts_of(&ticked_txns, TransactionType::InterestCredit),
        expected
    );
    assert_eq!(
        amounts_of(&jumped_txns, TransactionType::MaturityPayout),
        vec![dec!(-11577)]
    );
    assert_eq!(
        amounts_of(&ticked_txns, TransactionType::MaturityPayout),
        vec![dec!(-11577)]
    );

    for (app, account_no) in [(&jumped, &a.account_no), (&ticked, &b.account_no)] {
        let stored = app.account(account_no).await;
        assert_eq!(stored.status, AccountStatus::Matured);
        assert_eq!(stored.accrued_interest, dec!(1577));
        assert_eq!(app.balance(account_no).await, Decimal::ZERO);
        assert_eq!(app.treasury_balance().await, dec!(1577));
    }
}

#[tokio::test]
async fn catch_up_resumes_after_iteration_cap() {
    let app = TestApp::with_catch_up_cap(utc(2024, 1, 1), 1);
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    app.set_date(utc(2027, 6, 1));
    let first = app.accrual.run_once().await.unwrap();
    assert_eq!(first.interest_credits, 1);
    assert_eq!(first.matured, 0);
    let stored = app.account(&account.account_no).await;
    assert_eq!(stored.last_interest_accrual_at, Some(utc(2025, 1, 1)));
    assert_eq!(stored.next_interest_accrual_at, Some(utc(2026, 1, 1)));
    assert_eq!(stored.next_payout_at, Some(utc(2027, 1, 1)));

    app.accrual.run_once().await.unwrap();
    let last = app.accrual.run_once().await.unwrap();
    assert_eq!(last.interest_credits, 1);
    assert_eq!(last.matured, 1);

    let transactions = app.transactions(&account.account_no).await;
    assert_eq!(
        amounts_of(&transactions, TransactionType::InterestCredit),
        vec![dec!(500), dec!(525), dec!(552)]
    );
    assert_eq!(
        app.account(&account.account_no).await.status,
        AccountStatus::Matured
    );
}

#[tokio::test]
async fn pricing_rule_change_applies_at_next_anniversary() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;
    assert!(account.pricing_rule_id.is_none());

    app.catalog.set_rules(
        THREE_YEAR,
        vec![pricing_rule("gold", Some(dec!(10000)), Some(dec!(7)))],
    );
    app.set_date(utc(2025, 1, 2));
    app.accrual.run_once().await.unwrap();

    let stored = app.account(&account.account_no).await;
    assert_eq!(stored.interest_rate, dec!(7));
    assert_eq!(stored.base_interest_rate, dec!(5));
    assert_eq!(stored.pricing_rule_id.as_deref(), Some("gold"));
    assert_eq!(stored.pricing_rule_applied_at, Some(utc(2025, 1, 2)));
    let transactions = app.transactions(&account.account_no).await;
    assert_eq!(
        amounts_of(&transactions, TransactionType::InterestCredit),
        vec![dec!(700)]
    );
}

#[tokio::test]
async fn unavailable_rule_source_accrues_at_base_rate() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;

    app.catalog.set_rules_unavailable(true);
    app.set_date(utc(2025, 1, 2));
    let report = app.accrual.run_once().await.unwrap();

    assert_eq!(report.failed, 0);
    let transactions = app.transactions(&account.account_no).await;
    assert_eq!(
        amounts_of(&transactions, TransactionType::InterestCredit),
        vec![dec!(500)]
    );
}

#[tokio::test]
async fn failing_account_does_not_abort_the_pass() {
    let app = TestApp::at(utc(2024, 1, 1));
    let healthy = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;

    // Rules for this product fail hard, so open_account would reject it.
    let mut broken = healthy.clone();
    broken.account_no = "FDBROKEN00000001".to_string();
    broken.product_code = BROKEN.to_string();
    app.store_insert(broken.clone()).await;

    app.set_date(utc(2025, 1, 2));
    let report = app.accrual.run_once().await.unwrap();

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.matured, 1);
    assert_eq!(
        app.account(&healthy.account_no).await.status,
        AccountStatus::Matured
    );
    let stuck = app.account(&broken.account_no).await;
    assert_eq!(stuck.status, AccountStatus::Active);
    assert!(stuck.last_interest_accrual_at.is_none());
}

#[tokio::test]
async fn matured_account_is_skipped_by_later_passes() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(ONE_YEAR, dec!(10000), 12, dec!(5)).await;

    app.set_date(utc(2025, 1, 2));
    app.accrual.run_once().await.unwrap();
    app.set_date(utc(2026, 1, 2));
    let later = app.accrual.run_once().await.unwrap();

    assert_eq!(later.processed, 0);
    let outcome = app
        .accrual
        .process_account(&account.account_no)
        .await
        .unwrap();
    assert_eq!(outcome.interest_credits, 0);
    assert!(!outcome.matured);
    assert_eq!(app.transactions(&account.account_no).await.len(), 3);
}

#[tokio::test]
async fn idle_account_needs_no_product_lookup() {
    let app = TestApp::at(utc(2024, 1, 1));
    app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;
    let lookups_after_open = app.catalog.product_lookups();

    app.set_date(utc(2024, 6, 1));
    let report = app.accrual.run_once().await.unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(app.catalog.product_lookups(), lookups_after_open);
}

#[tokio::test]
async fn slow_product_lookup_does_not_block_postings() {
    let app = TestApp::at(utc(2024, 1, 1));
    let account = app.open(THREE_YEAR, dec!(10000), 36, dec!(5)).await;
    app.set_date(utc(2025, 1, 2));
    app.catalog.set_product_delay(Duration::from_millis(400));

    let (accrued, posted) = tokio::join!(app.accrual.process_account(&account.account_no), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tokio::time::timeout(
            Duration::from_millis(200),
            app.accounts.record_transaction(
                &account.account_no,
                TransactionType::Deposit,
                dec!(100),
                CUSTOMER_ID,
                None,
            ),
        )
        .await
    });

    let posted = posted.expect("posting waited on the product lookup");
    assert_eq!(posted.expect("Failed to post").balance_after, dec!(10100));

    let accrued = accrued.expect("Accrual failed");
    assert_eq!(accrued.interest_credits, 1);
    assert_eq!(accrued.total_interest, dec!(505));
    assert_eq!(app.balance(&account.account_no).await, dec!(10605));
}

#[tokio::test]
async fn failed_product_lookup_is_retried_not_guessed() {
    let app = TestApp::at(utc(2024, 1, 1));
    // One-year tenure on a product that runs up to three years.
    let account = app.open(THREE_YEAR, dec!(10000), 12, dec!(5)).await;
    app.set_date(utc(2025, 1, 2));
    app.catalog.fail_next_product_lookups(1);

    let first = app.accrual.run_once().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.matured, 0);
    let untouched = app.account(&account.account_no).await;
    assert_eq!(untouched.status, AccountStatus::Active);
    assert!(untouched.next_payout_at.is_none());
    assert_eq!(app.transactions(&account.account_no).await.len(), 1);

    let second = app.accrual.run_once().await.unwrap();
    assert_eq!(second.failed, 0);
    assert_eq!(second.interest_credits, 1);
    assert_eq!(second.matured, 0);
    let stored = app.account(&account.account_no).await;
    assert_eq!(stored.status, AccountStatus::Active);
    assert_eq!(stored.next_payout_at, Some(utc(2027, 1, 1)));
}
