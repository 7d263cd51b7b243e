//! Admin control of the business clock.
//!
//! Every endpoint requires the `x-admin-token` header to match the
//! configured admin token; with no token configured they all answer 401.

use axum::{
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use service_core::error::AppError;

use crate::clock::ClockState;
use crate::startup::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Deserialize)]
pub struct SetClockRequest {
    pub at: DateTime<Utc>,
}

/// Offset to move the clock by; fields are summed and may be negative.
#[derive(Debug, Default, Deserialize)]
pub struct AdvanceClockRequest {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub seconds: i64,
}

impl AdvanceClockRequest {
    fn duration(&self) -> Option<Duration> {
        Duration::try_days(self.days)?
            .checked_add(&Duration::try_hours(self.hours)?)?
            .checked_add(&Duration::try_minutes(self.minutes)?)?
            .checked_add(&Duration::try_seconds(self.seconds)?)
    }
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "admin endpoints are disabled"
        )));
    };
    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        tracing::warn!("Rejected admin clock request with missing or invalid token");
        return Err(AppError::Unauthorized(anyhow::anyhow!("invalid admin token")));
    }
    Ok(())
}

pub async fn get_clock(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClockState>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(state.clock.state()))
}

pub async fn set_clock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SetClockRequest>,
) -> Result<Json<ClockState>, AppError> {
    authorize(&state, &headers)?;
    state.clock.set(request.at);
    Ok(Json(state.clock.state()))
}

pub async fn advance_clock(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AdvanceClockRequest>,
) -> Result<Json<ClockState>, AppError> {
    authorize(&state, &headers)?;
    let by = request
        .duration()
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("duration out of range")))?;
    if by == Duration::zero() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "advance requires a non-zero duration"
        )));
    }
    state.clock.advance(by);
    Ok(Json(state.clock.state()))
}

pub async fn reset_clock(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ClockState>, AppError> {
    authorize(&state, &headers)?;
    state.clock.reset();
    Ok(Json(state.clock.state()))
}
