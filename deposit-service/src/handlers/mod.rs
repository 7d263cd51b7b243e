//! HTTP handlers for deposit-service.

pub mod admin;
pub mod health;
pub mod ledger;
