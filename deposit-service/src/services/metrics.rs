//! Prometheus metrics for deposit-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, CounterVec, Gauge,
    HistogramVec, TextEncoder,
};

/// Accrual batch outcomes per account.
pub static ACCRUAL_ACCOUNTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_accrual_accounts_total",
        "Accounts processed by the accrual engine",
        &["status"] // ok, error
    )
    .expect("Failed to register accrual_accounts_total")
});

/// Interest credits booked.
pub static INTEREST_CREDITS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_interest_credits_total",
        "Interest credit transactions booked",
        &["currency"]
    )
    .expect("Failed to register interest_credits_total")
});

/// Accounts finalized at maturity.
pub static ACCOUNTS_MATURED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_accounts_matured_total",
        "Accounts transitioned to MATURED",
        &["payout"] // paid, empty
    )
    .expect("Failed to register accounts_matured_total")
});

/// Redemptions by type and outcome.
pub static REDEMPTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_redemptions_total",
        "Redemptions processed",
        &["redemption_type", "status"]
    )
    .expect("Failed to register redemptions_total")
});

/// Wallet ledger operations.
pub static WALLET_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_wallet_operations_total",
        "Wallet ledger operations",
        &["operation", "status"]
    )
    .expect("Failed to register wallet_operations_total")
});

/// Correlated request/response calls.
pub static CORRELATOR_CALLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_correlator_calls_total",
        "Correlated request/response calls",
        &["topic", "outcome"] // ok, timeout, error
    )
    .expect("Failed to register correlator_calls_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "deposit_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Store operation duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "deposit_db_query_duration_seconds",
        "Store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Last observed reconciliation variance (should always read 0).
pub static LEDGER_VARIANCE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "deposit_ledger_variance",
        "Sum of ledger entries minus sum of wallet balances"
    )
    .expect("Failed to register ledger_variance")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&ACCRUAL_ACCOUNTS_TOTAL);
    Lazy::force(&INTEREST_CREDITS_TOTAL);
    Lazy::force(&ACCOUNTS_MATURED_TOTAL);
    Lazy::force(&REDEMPTIONS_TOTAL);
    Lazy::force(&WALLET_OPERATIONS_TOTAL);
    Lazy::force(&CORRELATOR_CALLS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&LEDGER_VARIANCE);
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
