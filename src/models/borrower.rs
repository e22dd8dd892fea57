//! Borrower trust and rating fields

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trust::rating;

/// Borrower rating, best to worst
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "borrower_rating", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BorrowerRating {
    Great,
    Good,
    Neutral,
    Poor,
    Bad,
    Worst,
}

impl BorrowerRating {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorrowerRating::Great => "great",
            BorrowerRating::Good => "good",
            BorrowerRating::Neutral => "neutral",
            BorrowerRating::Poor => "poor",
            BorrowerRating::Bad => "bad",
            BorrowerRating::Worst => "worst",
        }
    }
}

/// Trust and repayment counters stored on the borrower's user row
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct BorrowerProfile {
    pub id: Uuid,
    pub trust_score: i32,
    pub payments_missed: i32,
    pub borrower_rating: BorrowerRating,
    pub borrowing_tier: i32,
    pub max_borrowing_amount: Decimal,
    pub total_payments_made: i32,
    pub payments_early: i32,
    pub payments_on_time: i32,
    pub payments_late: i32,
    pub total_amount_repaid: Decimal,
    pub current_outstanding_amount: Decimal,
    pub loans_at_current_tier: i32,
    pub total_loans_completed: i32,
}

impl BorrowerProfile {
    /// A fresh profile as created for a new user
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            trust_score: 50,
            payments_missed: 0,
            borrower_rating: BorrowerRating::Neutral,
            borrowing_tier: 1,
            max_borrowing_amount: Decimal::from(150),
            total_payments_made: 0,
            payments_early: 0,
            payments_on_time: 0,
            payments_late: 0,
            total_amount_repaid: Decimal::ZERO,
            current_outstanding_amount: Decimal::ZERO,
            loans_at_current_tier: 0,
            total_loans_completed: 0,
        }
    }

    /// Count one more missed payment and apply the downgrade ladder
    pub fn register_miss(&mut self) {
        self.payments_missed += 1;
        self.borrower_rating = rating::downgrade_after_miss(self.borrower_rating, self.payments_missed);
    }
}
