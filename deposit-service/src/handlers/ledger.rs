//! Wallet ledger reconciliation endpoint.

use axum::{extract::State, Json};
use service_core::error::AppError;

use crate::models::LedgerSummary;
use crate::startup::AppState;

/// `GET /ledger/summary`: ledger total, wallet supply, and their variance.
pub async fn ledger_summary(State(state): State<AppState>) -> Result<Json<LedgerSummary>, AppError> {
    let summary = state.wallet.summary().await?;
    Ok(Json(summary))
}
