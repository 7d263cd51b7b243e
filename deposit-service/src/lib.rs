//! Deposit Service - Fixed-deposit accounts backed by a token wallet ledger.

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod money;
pub mod services;
pub mod startup;
