//! HTTP handlers

pub mod cron;
pub mod health;
pub mod webhook;

pub use cron::{run_auto_pay, trigger_auto_pay};
pub use health::health_check;
pub use webhook::transfer_status_webhook;
