//! Middleware for the auto-pay service

pub mod cron_auth;
mod tracing;

pub use cron_auth::{secrets_match, CronAuth, CronSecret};
pub use tracing::request_tracing;
