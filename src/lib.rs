//! Auto-pay service library
//!
//! Charges due loan installments through a facilitated-transfer gateway,
//! keeps the loan ledger consistent and feeds the borrower trust engine.

pub mod autopay;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod models;
pub mod notifications;
pub mod routes;
pub mod scheduler;
pub mod settlement;
pub mod state;
pub mod trust;
